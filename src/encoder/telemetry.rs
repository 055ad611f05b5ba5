//! Encoder diagnostics parsing
//!
//! ffmpeg reports progress on stderr about once a second (`-stats_period 1`),
//! terminating each report with `\r`. A line looks like:
//!
//! ```text
//! frame=  301 fps= 30 q=-1.0 size=    1536kB time=00:00:10.03 bitrate=1254.2kbits/s speed=   1x
//! ```

use std::sync::OnceLock;

use regex::Regex;

use crate::scheduler::PlayoutState;

fn progress_regex() -> &'static Regex {
    static RE: OnceLock<Regex> = OnceLock::new();
    RE.get_or_init(|| {
        Regex::new(
            r"frame=\s*(\d+)\s+fps=\s*(\S+)\s+q=\S+\s+L?size=\s*(\d+)\s*(?:kB|KiB)\s+time=(\d+):(\d+):(\d+)\.(\d+)\s+bitrate=\s*(\S+?)kbits/s\s+speed=\s*(\S+?)x",
        )
        .expect("progress pattern is valid")
    })
}

fn stream_regex() -> &'static Regex {
    static RE: OnceLock<Regex> = OnceLock::new();
    RE.get_or_init(|| Regex::new(r"Stream #0:0").expect("stream pattern is valid"))
}

fn io_error_regex() -> &'static Regex {
    static RE: OnceLock<Regex> = OnceLock::new();
    RE.get_or_init(|| {
        Regex::new(r"(?i)Error in the pull function|failed to read")
            .expect("error pattern is valid")
    })
}

/// One progress report
#[derive(Debug, Clone, PartialEq)]
pub struct Telemetry {
    /// Frames written so far
    pub frame_count: u64,
    pub fps: f64,
    /// Output size in kB
    pub size_kb: u64,
    /// Output time position in seconds
    pub elapsed_seconds: f64,
    pub bitrate_kbps: f64,
    /// Encoding speed relative to real time
    pub speed: f64,
}

/// Unparseable numbers (`N/A`) read as zero
fn number(s: &str) -> f64 {
    s.parse().unwrap_or(0.0)
}

impl Telemetry {
    /// Parse a progress line
    pub fn parse(line: &str) -> Option<Self> {
        let caps = progress_regex().captures(line)?;
        let int = |i: usize| caps[i].parse::<u64>().unwrap_or(0);

        let whole = int(4) * 3600 + int(5) * 60 + int(6);
        let elapsed_seconds = number(&format!("{}.{}", whole, &caps[7]));

        Some(Self {
            frame_count: int(1),
            fps: number(&caps[2]),
            size_kb: int(3),
            elapsed_seconds,
            bitrate_kbps: number(&caps[8]),
            speed: number(&caps[9]),
        })
    }

    /// `state,frameCount,fps,sizeKB,elapsedSeconds,bitrateKbps,speed,videoDepth,audioDepth`
    pub fn status_line(&self, state: PlayoutState, video_depth: usize, audio_depth: usize) -> String {
        format!(
            "{},{},{},{},{},{},{},{},{}",
            state,
            self.frame_count,
            self.fps,
            self.size_kb,
            self.elapsed_seconds,
            self.bitrate_kbps,
            self.speed,
            video_depth,
            audio_depth
        )
    }
}

/// What a stderr line means
#[derive(Debug, Clone, PartialEq)]
pub enum Diagnostic {
    Progress(Telemetry),
    /// The encoder has opened its first stream
    StreamReady,
    /// Input or output I/O failed
    StreamError,
    Other,
}

/// Classify one stderr line
pub fn classify(line: &str) -> Diagnostic {
    if let Some(telemetry) = Telemetry::parse(line) {
        Diagnostic::Progress(telemetry)
    } else if stream_regex().is_match(line) {
        Diagnostic::StreamReady
    } else if io_error_regex().is_match(line) {
        Diagnostic::StreamError
    } else {
        Diagnostic::Other
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    const PROGRESS: &str = "frame=  301 fps= 30 q=-1.0 size=    1536kB time=00:00:10.03 bitrate=1254.2kbits/s speed=   1x";

    #[test]
    fn test_parse_progress() {
        let t = Telemetry::parse(PROGRESS).unwrap();

        assert_eq!(t.frame_count, 301);
        assert_eq!(t.fps, 30.0);
        assert_eq!(t.size_kb, 1536);
        assert_eq!(t.elapsed_seconds, 10.03);
        assert_eq!(t.bitrate_kbps, 1254.2);
        assert_eq!(t.speed, 1.0);
    }

    #[test]
    fn test_parse_newer_format() {
        let line = "frame= 7260 fps= 60 q=-1.0 size=   45568KiB time=01:02:03.50 bitrate=6013.6kbits/s speed=1.01x";
        let t = Telemetry::parse(line).unwrap();

        assert_eq!(t.frame_count, 7260);
        assert_eq!(t.size_kb, 45568);
        assert_eq!(t.elapsed_seconds, 3723.5);
        assert_eq!(t.speed, 1.01);
    }

    #[test]
    fn test_status_line() {
        let t = Telemetry::parse(PROGRESS).unwrap();
        assert_eq!(
            t.status_line(PlayoutState::Live, 120, 100),
            "live,301,30,1536,10.03,1254.2,1,120,100"
        );
    }

    #[test]
    fn test_classify() {
        assert!(matches!(classify(PROGRESS), Diagnostic::Progress(_)));
        assert_eq!(
            classify("  Stream #0:0: Video: h264 (High), yuv420p, 1280x720"),
            Diagnostic::StreamReady
        );
        assert_eq!(
            classify("[flv @ 0x55] Error in the pull function."),
            Diagnostic::StreamError
        );
        assert_eq!(classify("pipe:3: Failed to read frame"), Diagnostic::StreamError);
        assert_eq!(classify("Press [q] to stop"), Diagnostic::Other);
    }
}
