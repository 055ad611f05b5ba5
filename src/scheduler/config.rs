//! Playout configuration

use std::time::Duration;

/// Playout scheduler options
#[derive(Debug, Clone)]
pub struct PlayoutConfig {
    /// Stop when no chunk is admitted for this long while live
    pub data_timeout: Duration,

    /// Delay between a chunk's timestamp and its release, in microseconds
    pub playout_delay: u64,

    /// How far ahead of video audio may be released, in microseconds
    pub audio_lead: u64,

    /// Period of the playout timer
    pub tick_interval: Duration,

    /// Buffered video chunks required before playout starts
    pub start_threshold: usize,

    /// Maximum chunks held per medium
    pub max_buffer_depth: usize,

    /// Forward audio to the encoder
    pub audio_enabled: bool,
}

impl Default for PlayoutConfig {
    fn default() -> Self {
        Self {
            data_timeout: Duration::from_secs(7),
            playout_delay: 2_000_000,
            audio_lead: 20_000,
            tick_interval: Duration::from_millis(4),
            start_threshold: 30,
            max_buffer_depth: 900,
            audio_enabled: true,
        }
    }
}

impl PlayoutConfig {
    /// Set the data timeout
    pub fn data_timeout(mut self, timeout: Duration) -> Self {
        self.data_timeout = timeout;
        self
    }

    /// Set the playout delay
    pub fn playout_delay(mut self, delay: Duration) -> Self {
        self.playout_delay = delay.as_micros() as u64;
        self
    }

    /// Set the audio lead
    pub fn audio_lead(mut self, lead: Duration) -> Self {
        self.audio_lead = lead.as_micros() as u64;
        self
    }

    /// Set the playout timer period
    pub fn tick_interval(mut self, interval: Duration) -> Self {
        self.tick_interval = interval.max(Duration::from_millis(1));
        self
    }

    /// Set the start threshold
    pub fn start_threshold(mut self, frames: usize) -> Self {
        self.start_threshold = frames;
        self
    }

    /// Set the per-medium buffer cap
    pub fn max_buffer_depth(mut self, depth: usize) -> Self {
        self.max_buffer_depth = depth.max(1);
        self
    }

    /// Drop audio instead of forwarding it
    pub fn disable_audio(mut self) -> Self {
        self.audio_enabled = false;
        self
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_default_config() {
        let config = PlayoutConfig::default();

        assert_eq!(config.data_timeout, Duration::from_secs(7));
        assert_eq!(config.playout_delay, 2_000_000);
        assert_eq!(config.audio_lead, 20_000);
        assert_eq!(config.tick_interval, Duration::from_millis(4));
        assert_eq!(config.start_threshold, 30);
        assert!(config.audio_enabled);
    }

    #[test]
    fn test_builder() {
        let config = PlayoutConfig::default()
            .playout_delay(Duration::from_millis(500))
            .max_buffer_depth(0)
            .disable_audio();

        assert_eq!(config.playout_delay, 500_000);
        assert_eq!(config.max_buffer_depth, 1);
        assert!(!config.audio_enabled);
    }
}
