//! Encoder invocation
//!
//! [`EncoderConfig`] is immutable: a change of stream parameters produces a
//! new config through [`EncoderConfig::apply`], which the session uses to
//! decide whether the running encoder must be replaced.

use std::fmt;
use std::time::Duration;

use crate::codec::{MediaInfo, Medium};
use crate::error::ConfigError;

/// Lowest descriptor an input pipe may be mapped to
pub const MIN_PIPE_FD: u8 = 3;

/// Highest descriptor an input pipe may be mapped to
pub const MAX_PIPE_FD: u8 = 63;

/// Where the encoder reads one input stream from
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum PipeSlot {
    /// Standard input
    Stdin,
    /// An inherited descriptor, 3 and up
    Fd(u8),
}

impl PipeSlot {
    /// Descriptor number inside the child
    pub fn fd(self) -> u8 {
        match self {
            PipeSlot::Stdin => 0,
            PipeSlot::Fd(n) => n,
        }
    }

    /// ffmpeg input URL for this slot
    pub fn input_url(self) -> String {
        format!("pipe:{}", self.fd())
    }
}

impl fmt::Display for PipeSlot {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            PipeSlot::Stdin => f.write_str("stdin"),
            PipeSlot::Fd(n) => write!(f, "fd {}", n),
        }
    }
}

/// Input pipe assignment
///
/// Diagnostics are always read from stderr.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct PipeMap {
    pub video: PipeSlot,
    /// `None` runs the encoder without an audio input
    pub audio: Option<PipeSlot>,
}

impl Default for PipeMap {
    fn default() -> Self {
        Self {
            video: PipeSlot::Fd(3),
            audio: Some(PipeSlot::Fd(4)),
        }
    }
}

impl PipeMap {
    /// Video input only
    pub fn video_only(video: PipeSlot) -> Self {
        Self { video, audio: None }
    }

    /// Check that slots are distinct and inheritable
    pub fn validate(&self) -> Result<(), ConfigError> {
        if Some(self.video) == self.audio {
            return Err(ConfigError::DuplicatePipe(self.video));
        }

        for (_, slot) in self.slots() {
            if let PipeSlot::Fd(n) = slot {
                if !(MIN_PIPE_FD..=MAX_PIPE_FD).contains(&n) {
                    return Err(ConfigError::InvalidPipe(slot));
                }
                #[cfg(not(unix))]
                return Err(ConfigError::UnsupportedPipe(slot));
            }
        }
        Ok(())
    }

    /// Assigned slots, video first
    pub fn slots(&self) -> impl Iterator<Item = (Medium, PipeSlot)> {
        std::iter::once((Medium::Video, self.video))
            .chain(self.audio.map(|slot| (Medium::Audio, slot)))
    }

    pub fn uses_stdin(&self) -> bool {
        self.slots().any(|(_, slot)| slot == PipeSlot::Stdin)
    }
}

/// Encoder command line parameters
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct EncoderConfig {
    url: String,
    media_info: MediaInfo,
    pipes: PipeMap,
    audio_bitrate_kbps: u16,
}

impl EncoderConfig {
    /// Default AAC output bitrate
    pub const DEFAULT_AUDIO_BITRATE_KBPS: u16 = 96;

    pub fn new(
        url: impl Into<String>,
        media_info: MediaInfo,
        pipes: PipeMap,
    ) -> Result<Self, ConfigError> {
        let url = url.into();
        if url.trim().is_empty() {
            return Err(ConfigError::EmptyOutputUrl);
        }
        pipes.validate()?;

        Ok(Self {
            url,
            media_info,
            pipes,
            audio_bitrate_kbps: Self::DEFAULT_AUDIO_BITRATE_KBPS,
        })
    }

    /// Set the AAC output bitrate
    pub fn audio_bitrate(mut self, kbps: u16) -> Self {
        self.audio_bitrate_kbps = kbps;
        self
    }

    pub fn url(&self) -> &str {
        &self.url
    }

    pub fn media_info(&self) -> &MediaInfo {
        &self.media_info
    }

    pub fn pipes(&self) -> &PipeMap {
        &self.pipes
    }

    /// The same config with the audio input removed
    pub fn without_audio(mut self) -> Self {
        self.pipes.audio = None;
        self
    }

    /// Whether the encoder gets an audio input
    pub fn has_audio(&self) -> bool {
        self.pipes.audio.is_some() && self.media_info.has_audio()
    }

    /// A config for new stream parameters, or `None` if the running
    /// encoder can keep going
    ///
    /// Bitrate fields alone never produce a new config: video is copied
    /// and the AAC bitrate is set here, not by the sender.
    pub fn apply(&self, media_info: &MediaInfo) -> Option<EncoderConfig> {
        if !self.needs_restart(media_info) {
            return None;
        }
        Some(Self {
            media_info: *media_info,
            ..self.clone()
        })
    }

    fn needs_restart(&self, next: &MediaInfo) -> bool {
        let current = &self.media_info;
        current.video_codec != next.video_codec
            || current.width != next.width
            || current.height != next.height
            || current.framerate != next.framerate
            || current.audio_channels != next.audio_channels
            || current.audio_sample_rate != next.audio_sample_rate
    }

    /// Full argument list, program name excluded
    pub fn args(&self) -> Vec<String> {
        let info = &self.media_info;
        let mut args: Vec<String> = Vec::with_capacity(64);
        let mut push = |items: &[&str]| args.extend(items.iter().map(|s| s.to_string()));

        push(&["-fflags", "+genpts", "-stats_period", "1", "-hide_banner"]);
        if !self.pipes.uses_stdin() {
            push(&["-nostdin"]);
        }

        push(&["-thread_queue_size", "128", "-use_wallclock_as_timestamps", "1"]);
        let framerate = info.framerate.to_string();
        if info.framerate > 0 {
            push(&["-r", framerate.as_str()]);
        }
        push(&["-i", self.pipes.video.input_url().as_str()]);

        let audio = self.pipes.audio.filter(|_| self.has_audio());
        let rate = info.audio_sample_rate.to_string();
        let channels = info.audio_channels.to_string();
        if let Some(slot) = audio {
            push(&["-f", "s16le", "-ar", rate.as_str(), "-ac", channels.as_str()]);
            push(&["-thread_queue_size", "128", "-i", slot.input_url().as_str()]);
        }

        push(&["-c:v", "copy"]);
        if audio.is_some() {
            let bitrate = format!("{}k", self.audio_bitrate_kbps);
            push(&["-c:a", "aac", "-ar", rate.as_str(), "-ac", channels.as_str()]);
            push(&["-b:a", bitrate.as_str(), "-cutoff", "18000"]);
        }

        push(&["-f", "flv", "-map", "0:v"]);
        if audio.is_some() {
            push(&["-map", "1:a"]);
        }

        push(&["-queue_size", "60", "-drop_pkts_on_overflow", "0"]);
        push(&["-attempt_recovery", "1", "-recovery_wait_time", "1"]);
        push(&[self.url.as_str()]);

        args
    }
}

/// Process handling options
#[derive(Debug, Clone)]
pub struct SupervisorSettings {
    /// Encoder executable
    pub program: String,

    /// Arguments placed before the generated encoder arguments, for
    /// wrappers such as `nice -n 10 ffmpeg`
    pub leading_args: Vec<String>,

    /// Wait after closing the input pipes before sending SIGINT
    pub stop_grace: Duration,

    /// Wait after SIGINT before killing the process
    pub kill_timeout: Duration,

    /// Payloads queued per input pipe
    pub pipe_queue_depth: usize,
}

impl Default for SupervisorSettings {
    fn default() -> Self {
        Self {
            program: "ffmpeg".to_string(),
            leading_args: Vec::new(),
            stop_grace: Duration::from_secs(1),
            kill_timeout: Duration::from_secs(3),
            pipe_queue_depth: 64,
        }
    }
}

impl SupervisorSettings {
    /// Set the encoder executable
    pub fn program(mut self, program: impl Into<String>) -> Self {
        self.program = program.into();
        self
    }

    /// Run the encoder through a wrapper
    pub fn leading_args<I, S>(mut self, args: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        self.leading_args = args.into_iter().map(Into::into).collect();
        self
    }

    /// Full argument list for `config`
    pub fn command_args(&self, config: &EncoderConfig) -> Vec<String> {
        let mut args = self.leading_args.clone();
        args.extend(config.args());
        args
    }

    /// Set the stop grace period
    pub fn stop_grace(mut self, grace: Duration) -> Self {
        self.stop_grace = grace;
        self
    }

    /// Set the kill timeout
    pub fn kill_timeout(mut self, timeout: Duration) -> Self {
        self.kill_timeout = timeout;
        self
    }

    /// Set the per-pipe queue depth
    pub fn pipe_queue_depth(mut self, depth: usize) -> Self {
        self.pipe_queue_depth = depth.max(1);
        self
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn info() -> MediaInfo {
        MediaInfo {
            width: 1280,
            height: 720,
            framerate: 30,
            ..MediaInfo::default()
        }
    }

    fn position(args: &[String], value: &str) -> Option<usize> {
        args.iter().position(|a| a == value)
    }

    #[test]
    fn test_default_pipes() {
        let pipes = PipeMap::default();
        assert_eq!(pipes.video, PipeSlot::Fd(3));
        assert_eq!(pipes.audio, Some(PipeSlot::Fd(4)));
        assert!(pipes.validate().is_ok());
        assert!(!pipes.uses_stdin());
    }

    #[test]
    fn test_pipe_validation() {
        let dup = PipeMap {
            video: PipeSlot::Fd(5),
            audio: Some(PipeSlot::Fd(5)),
        };
        assert_eq!(dup.validate(), Err(ConfigError::DuplicatePipe(PipeSlot::Fd(5))));

        let low = PipeMap::video_only(PipeSlot::Fd(2));
        assert_eq!(low.validate(), Err(ConfigError::InvalidPipe(PipeSlot::Fd(2))));

        let high = PipeMap::video_only(PipeSlot::Fd(64));
        assert_eq!(high.validate(), Err(ConfigError::InvalidPipe(PipeSlot::Fd(64))));

        assert!(PipeMap::video_only(PipeSlot::Stdin).validate().is_ok());
    }

    #[test]
    fn test_leading_args() {
        let config = EncoderConfig::new("rtmp://host/live/key", info(), PipeMap::default()).unwrap();
        let settings = SupervisorSettings::default()
            .program("nice")
            .leading_args(["-n", "10", "ffmpeg"]);
        let args = settings.command_args(&config);

        assert_eq!(&args[..3], ["-n", "10", "ffmpeg"]);
        assert_eq!(args.last().map(String::as_str), Some("rtmp://host/live/key"));
        assert_eq!(args.len(), config.args().len() + 3);
    }

    #[test]
    fn test_empty_url_rejected() {
        let result = EncoderConfig::new("  ", info(), PipeMap::default());
        assert_eq!(result, Err(ConfigError::EmptyOutputUrl));
    }

    #[test]
    fn test_args_with_audio() {
        let config = EncoderConfig::new("rtmp://host/live/key", info(), PipeMap::default()).unwrap();
        let args = config.args();

        assert!(position(&args, "-nostdin").is_some());
        let r = position(&args, "-r").unwrap();
        assert_eq!(args[r + 1], "30");

        let inputs: Vec<_> = args
            .iter()
            .enumerate()
            .filter(|(_, a)| *a == "-i")
            .map(|(i, _)| args[i + 1].as_str())
            .collect();
        assert_eq!(inputs, vec!["pipe:3", "pipe:4"]);

        assert!(position(&args, "1:a").is_some());
        assert!(position(&args, "96k").is_some());
        assert!(position(&args, "48000").is_some());
        assert_eq!(args.last().unwrap(), "rtmp://host/live/key");
    }

    #[test]
    fn test_args_video_only() {
        let pipes = PipeMap::video_only(PipeSlot::Stdin);
        let config = EncoderConfig::new("rtmp://host/app", info(), pipes).unwrap();
        let args = config.args();

        assert!(position(&args, "-nostdin").is_none());
        assert!(position(&args, "pipe:0").is_some());
        assert!(position(&args, "s16le").is_none());
        assert!(position(&args, "1:a").is_none());
        assert!(position(&args, "-c:a").is_none());
    }

    #[test]
    fn test_args_without_framerate() {
        let info = MediaInfo {
            framerate: 0,
            ..info()
        };
        let config = EncoderConfig::new("rtmp://host/app", info, PipeMap::default()).unwrap();
        assert!(position(&config.args(), "-r").is_none());
    }

    #[test]
    fn test_apply() {
        let config = EncoderConfig::new("rtmp://host/app", info(), PipeMap::default())
            .unwrap()
            .audio_bitrate(128);
        assert!(config.apply(&info()).is_none());

        let wider = MediaInfo {
            width: 1920,
            ..info()
        };
        let next = config.apply(&wider).unwrap();
        assert_eq!(next.media_info().width, 1920);
        assert_eq!(next.url(), config.url());
        assert!(position(&next.args(), "128k").is_some());

        // The original is untouched
        assert_eq!(config.media_info().width, 1280);
    }

    #[test]
    fn test_apply_ignores_bitrates() {
        let config = EncoderConfig::new("rtmp://host/app", info(), PipeMap::default()).unwrap();

        let faster = MediaInfo {
            video_bitrate_kbps: 2500,
            audio_bitrate_kbps: 160,
            ..info()
        };
        assert!(config.apply(&faster).is_none());

        let mono = MediaInfo {
            audio_channels: 1,
            ..faster
        };
        let next = config.apply(&mono).unwrap();
        assert_ne!(next.args(), config.args());
        assert_eq!(next.media_info().video_bitrate_kbps, 2500);
    }
}
