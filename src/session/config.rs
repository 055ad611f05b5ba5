//! Relay session configuration

use std::time::Duration;

use crate::codec::WireFormat;
use crate::encoder::{EncoderConfig, PipeMap, SupervisorSettings};
use crate::error::ConfigError;
use crate::scheduler::PlayoutConfig;

/// How audio payloads are turned into encoder input
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum AudioDecoding {
    /// Forward payloads untouched
    Passthrough,
    /// Decode Opus to s16le PCM (requires the `opus` feature)
    Opus,
}

impl Default for AudioDecoding {
    fn default() -> Self {
        if cfg!(feature = "opus") {
            AudioDecoding::Opus
        } else {
            AudioDecoding::Passthrough
        }
    }
}

/// Per-session options
#[derive(Debug, Clone)]
pub struct RelayConfig {
    /// RTMP destination; the stream key is used when unset
    pub output_url: Option<String>,

    /// Packet layout expected from the sender
    pub wire_format: WireFormat,

    /// Jitter buffer options
    pub playout: PlayoutConfig,

    /// Encoder process options
    pub supervisor: SupervisorSettings,

    /// Encoder input pipe assignment
    pub pipes: PipeMap,

    pub audio_decoding: AudioDecoding,

    /// AAC bitrate requested from the encoder
    pub audio_bitrate_kbps: u16,

    /// Stop when `feed` has not been called for this long
    pub inactivity_timeout: Duration,

    /// Stop when the encoder stops reporting progress for this long
    pub telemetry_timeout: Duration,

    /// Longest time a replaced encoder may keep draining
    pub drain_timeout: Duration,

    /// Period of the watchdog check
    pub watchdog_interval: Duration,
}

impl Default for RelayConfig {
    fn default() -> Self {
        Self {
            output_url: None,
            wire_format: WireFormat::default(),
            playout: PlayoutConfig::default(),
            supervisor: SupervisorSettings::default(),
            pipes: PipeMap::default(),
            audio_decoding: AudioDecoding::default(),
            audio_bitrate_kbps: EncoderConfig::DEFAULT_AUDIO_BITRATE_KBPS,
            inactivity_timeout: Duration::from_secs(30),
            telemetry_timeout: Duration::from_secs(15),
            drain_timeout: Duration::from_secs(5),
            watchdog_interval: Duration::from_secs(1),
        }
    }
}

impl RelayConfig {
    /// Publish to a fixed URL instead of the stream key
    pub fn output_url(mut self, url: impl Into<String>) -> Self {
        self.output_url = Some(url.into());
        self
    }

    pub fn wire_format(mut self, format: WireFormat) -> Self {
        self.wire_format = format;
        self
    }

    pub fn playout(mut self, playout: PlayoutConfig) -> Self {
        self.playout = playout;
        self
    }

    pub fn supervisor(mut self, settings: SupervisorSettings) -> Self {
        self.supervisor = settings;
        self
    }

    pub fn pipes(mut self, pipes: PipeMap) -> Self {
        self.pipes = pipes;
        self
    }

    pub fn audio_decoding(mut self, decoding: AudioDecoding) -> Self {
        self.audio_decoding = decoding;
        self
    }

    pub fn audio_bitrate(mut self, kbps: u16) -> Self {
        self.audio_bitrate_kbps = kbps;
        self
    }

    /// Set the inactivity timeout
    pub fn inactivity_timeout(mut self, timeout: Duration) -> Self {
        self.inactivity_timeout = timeout;
        self
    }

    /// Set the telemetry staleness timeout
    pub fn telemetry_timeout(mut self, timeout: Duration) -> Self {
        self.telemetry_timeout = timeout;
        self
    }

    /// Set the drain limit for replaced encoders
    pub fn drain_timeout(mut self, timeout: Duration) -> Self {
        self.drain_timeout = timeout;
        self
    }

    pub fn watchdog_interval(mut self, interval: Duration) -> Self {
        self.watchdog_interval = interval.max(Duration::from_millis(10));
        self
    }

    /// Check everything that can be checked before media arrives
    pub fn validate(&self) -> Result<(), ConfigError> {
        self.pipes.validate()?;
        if matches!(self.output_url.as_deref(), Some(url) if url.trim().is_empty()) {
            return Err(ConfigError::EmptyOutputUrl);
        }
        if self.audio_decoding == AudioDecoding::Opus && !cfg!(feature = "opus") {
            return Err(ConfigError::OpusUnavailable);
        }
        Ok(())
    }
}
