//! Jitter buffer and playout gate
//!
//! Chunks are held until the wall clock has advanced `playout_delay` past
//! the point where their timestamp would have been played:
//!
//! ```text
//! gate = start_timestamp + (now - start_wall) - playout_delay
//! ```
//!
//! Video is released while its head is at or before the gate; audio may run
//! `audio_lead` ahead of it. Playout starts once more than
//! `start_threshold` video chunks are buffered, and always starts on a
//! keyframe.
//!
//! The scheduler does no I/O and reads no clock: the caller passes `now`
//! and a [`MediaSink`] on every call.

use std::fmt;

use tokio::time::Instant;

use super::audio::{AudioDecoder, PassthroughDecoder};
use super::buffer::ChunkBuffer;
use super::config::PlayoutConfig;
use super::error::PlayoutError;
use super::sink::MediaSink;
use crate::codec::{Chunk, Medium};

/// Scheduler lifecycle
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum PlayoutState {
    /// Nothing buffered
    Empty,
    /// Collecting video before playout starts
    Buffering,
    /// Releasing chunks on schedule
    Live,
    /// Chunks are due but the encoder is not consuming them
    Stalled,
    /// Terminal
    Stopped,
}

impl PlayoutState {
    pub fn as_str(self) -> &'static str {
        match self {
            PlayoutState::Empty => "empty",
            PlayoutState::Buffering => "buffering",
            PlayoutState::Live => "live",
            PlayoutState::Stalled => "stalled",
            PlayoutState::Stopped => "stopped",
        }
    }
}

impl fmt::Display for PlayoutState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Outcome of [`PlayoutScheduler::push`]
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Admission {
    /// Queued; `dropped` older chunks were evicted to stay within the cap
    Admitted { dropped: usize },
    /// Audio arriving before any video
    AwaitingVideo,
    /// Audio while audio output is disabled
    AudioDisabled,
    /// The scheduler is stopped
    Stopped,
}

impl Admission {
    pub fn is_admitted(&self) -> bool {
        matches!(self, Admission::Admitted { .. })
    }
}

/// What a single tick did
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct TickReport {
    pub video_released: usize,
    pub audio_released: usize,
    /// Audio chunks dropped because they failed to decode
    pub audio_dropped: usize,
    /// Chunks discarded by the resync that started playout
    pub resynced: usize,
    /// Playout started during this tick
    pub started: bool,
    /// State after the tick
    pub state: PlayoutState,
}

impl TickReport {
    fn new(state: PlayoutState) -> Self {
        Self {
            video_released: 0,
            audio_released: 0,
            audio_dropped: 0,
            resynced: 0,
            started: false,
            state,
        }
    }

    pub fn released(&self) -> usize {
        self.video_released + self.audio_released
    }
}

#[derive(Debug, Clone, Copy)]
struct Timing {
    start_wall: Instant,
    start_timestamp: u64,
}

/// Video/audio jitter buffer feeding a [`MediaSink`]
pub struct PlayoutScheduler {
    config: PlayoutConfig,
    state: PlayoutState,
    video: ChunkBuffer,
    audio: ChunkBuffer,
    decoder: Box<dyn AudioDecoder>,
    video_seen: bool,
    timing: Option<Timing>,
    last_activity: Option<Instant>,
    last_frame_count: Option<u64>,
}

impl PlayoutScheduler {
    /// Create a scheduler that forwards audio payloads as-is
    pub fn new(config: PlayoutConfig) -> Self {
        Self::with_decoder(config, Box::new(PassthroughDecoder))
    }

    pub fn with_decoder(config: PlayoutConfig, decoder: Box<dyn AudioDecoder>) -> Self {
        Self {
            config,
            state: PlayoutState::Empty,
            video: ChunkBuffer::new(),
            audio: ChunkBuffer::new(),
            decoder,
            video_seen: false,
            timing: None,
            last_activity: None,
            last_frame_count: None,
        }
    }

    pub fn config(&self) -> &PlayoutConfig {
        &self.config
    }

    pub fn state(&self) -> PlayoutState {
        self.state
    }

    pub fn video_depth(&self) -> usize {
        self.video.len()
    }

    pub fn audio_depth(&self) -> usize {
        self.audio.len()
    }

    /// Payload bytes held across both buffers
    pub fn buffered_bytes(&self) -> usize {
        self.video.size() + self.audio.size()
    }

    pub fn is_empty(&self) -> bool {
        self.video.is_empty() && self.audio.is_empty()
    }

    pub fn is_stopped(&self) -> bool {
        self.state == PlayoutState::Stopped
    }

    /// Whether any video has been admitted
    pub fn video_seen(&self) -> bool {
        self.video_seen
    }

    /// Queue a chunk
    pub fn push(&mut self, chunk: Chunk, now: Instant) -> Admission {
        if self.state == PlayoutState::Stopped {
            return Admission::Stopped;
        }

        match chunk.medium {
            Medium::Video => self.video_seen = true,
            Medium::Audio if !self.config.audio_enabled => return Admission::AudioDisabled,
            Medium::Audio if !self.video_seen => return Admission::AwaitingVideo,
            Medium::Audio => {}
        }

        self.last_activity = Some(now);
        let is_video = chunk.is_video();
        match chunk.medium {
            Medium::Video => self.video.push(chunk),
            Medium::Audio => self.audio.push(chunk),
        }

        let dropped = self.enforce_depth();
        if dropped > 0 {
            tracing::debug!(
                dropped = dropped,
                video_depth = self.video.len(),
                audio_depth = self.audio.len(),
                "Playout buffer overflow"
            );
        }

        if is_video && self.state == PlayoutState::Empty {
            self.state = PlayoutState::Buffering;
        }

        Admission::Admitted { dropped }
    }

    /// Keep both buffers within `max_buffer_depth`
    ///
    /// Video is cut back to the next keyframe after the head so that what
    /// remains still starts decodable; audio older than that keyframe goes
    /// with it. Without a later keyframe only the oldest chunk is dropped.
    fn enforce_depth(&mut self) -> usize {
        let max = self.config.max_buffer_depth;
        let mut dropped = 0;

        while self.video.len() > max {
            match self.video.keyframe_from(1) {
                Some(index) => {
                    dropped += self.video.drain_front(index);
                    if let Some(ts) = self.video.head_timestamp() {
                        dropped += self.audio.discard_before(ts);
                    }
                }
                None => dropped += self.video.drain_front(1),
            }
        }

        while self.audio.len() > max {
            dropped += self.audio.drain_front(1);
        }

        dropped
    }

    /// Align both buffers on the first buffered keyframe
    ///
    /// Video ahead of the keyframe and audio timestamped before it are
    /// discarded. Returns the number of chunks discarded; nothing is
    /// discarded when no keyframe is buffered.
    pub fn resync(&mut self) -> usize {
        let Some(index) = self.video.keyframe_from(0) else {
            return 0;
        };

        let mut discarded = self.video.drain_front(index);
        if let Some(ts) = self.video.head_timestamp() {
            discarded += self.audio.discard_before(ts);
        }
        discarded
    }

    fn gate(&self, timing: &Timing, now: Instant) -> i64 {
        let elapsed = now.saturating_duration_since(timing.start_wall).as_micros() as i64;
        timing.start_timestamp as i64 + elapsed - self.config.playout_delay as i64
    }

    /// Advance playout to `now`, writing every due chunk into `sink`
    pub fn tick(
        &mut self,
        now: Instant,
        sink: &mut dyn MediaSink,
    ) -> Result<TickReport, PlayoutError> {
        let mut report = TickReport::new(self.state);

        match self.state {
            PlayoutState::Stopped | PlayoutState::Empty => return Ok(report),
            PlayoutState::Buffering => {
                if self.video.len() <= self.config.start_threshold {
                    return Ok(report);
                }
                report.resynced = self.resync();
                let start_timestamp = match self.video.front() {
                    Some(head) if head.is_keyframe() => head.timestamp,
                    _ => return Ok(report),
                };
                self.timing = Some(Timing {
                    start_wall: now,
                    start_timestamp,
                });
                self.last_frame_count = None;
                self.state = PlayoutState::Live;
                report.started = true;

                tracing::debug!(
                    start_timestamp = start_timestamp,
                    discarded = report.resynced,
                    video_depth = self.video.len(),
                    "Playout started"
                );
            }
            PlayoutState::Live | PlayoutState::Stalled => {
                if let Some(last) = self.last_activity {
                    let idle = now.saturating_duration_since(last);
                    if idle > self.config.data_timeout {
                        self.stop();
                        return Err(PlayoutError::Timeout { idle });
                    }
                }
            }
        }

        let Some(timing) = self.timing else {
            return Ok(report);
        };
        let gate = self.gate(&timing, now);
        let mut stalled = false;

        while self.video.front().is_some_and(|c| c.timestamp as i64 <= gate) {
            if !sink.has_capacity(Medium::Video) {
                stalled = true;
                break;
            }
            let Some(chunk) = self.video.pop() else { break };
            if let Err(e) = sink.write(Medium::Video, chunk.payload) {
                self.stop();
                return Err(e.into());
            }
            report.video_released += 1;
        }

        let audio_gate = gate + self.config.audio_lead as i64;
        while self
            .audio
            .front()
            .is_some_and(|c| c.timestamp as i64 <= audio_gate)
        {
            if !sink.has_capacity(Medium::Audio) {
                stalled = true;
                break;
            }
            let Some(chunk) = self.audio.pop() else { break };
            let pcm = match self.decoder.decode(&chunk.payload) {
                Ok(pcm) => pcm,
                Err(e) => {
                    tracing::warn!(timestamp = chunk.timestamp, error = %e, "Dropping audio chunk");
                    report.audio_dropped += 1;
                    continue;
                }
            };
            if let Err(e) = sink.write(Medium::Audio, pcm) {
                self.stop();
                return Err(e.into());
            }
            report.audio_released += 1;
        }

        if stalled {
            if self.state != PlayoutState::Stalled {
                tracing::debug!(
                    video_depth = self.video.len(),
                    audio_depth = self.audio.len(),
                    "Encoder input full, playout stalled"
                );
            }
            self.state = PlayoutState::Stalled;
        } else if report.released() > 0 {
            self.state = PlayoutState::Live;
        } else if self.is_empty() {
            self.state = PlayoutState::Empty;
        }

        report.state = self.state;
        Ok(report)
    }

    /// Feed the encoder's output frame counter
    ///
    /// A counter that stops advancing while chunks are still buffered marks
    /// playout as stalled; an advancing one marks it live again.
    pub fn observe_progress(&mut self, frame_count: u64) -> PlayoutState {
        let advanced = self.last_frame_count.map_or(true, |prev| frame_count > prev);
        self.last_frame_count = Some(frame_count);

        match self.state {
            PlayoutState::Live if !advanced && !self.is_empty() => {
                self.state = PlayoutState::Stalled;
            }
            PlayoutState::Stalled if advanced => {
                self.state = PlayoutState::Live;
            }
            _ => {}
        }
        self.state
    }

    /// Stop playout and drop everything buffered
    ///
    /// Returns false if the scheduler was already stopped.
    pub fn stop(&mut self) -> bool {
        if self.state == PlayoutState::Stopped {
            return false;
        }
        self.state = PlayoutState::Stopped;
        self.video.clear();
        self.audio.clear();
        self.timing = None;
        true
    }
}

impl fmt::Debug for PlayoutScheduler {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("PlayoutScheduler")
            .field("state", &self.state)
            .field("video_depth", &self.video.len())
            .field("audio_depth", &self.audio.len())
            .field("video_seen", &self.video_seen)
            .finish()
    }
}
