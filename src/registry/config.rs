//! Registry configuration

use std::time::Duration;

use crate::session::RelayConfig;

/// Configuration for the session registry
#[derive(Debug, Clone)]
pub struct RegistryConfig {
    /// Template for every session the registry creates
    pub relay: RelayConfig,

    /// Maximum concurrent sessions (0 = unlimited)
    pub max_sessions: usize,

    /// How often stopped sessions are swept
    pub cleanup_interval: Duration,
}

impl Default for RegistryConfig {
    fn default() -> Self {
        Self {
            relay: RelayConfig::default(),
            max_sessions: 0,
            cleanup_interval: Duration::from_secs(30),
        }
    }
}

impl RegistryConfig {
    /// Set the session template
    pub fn relay(mut self, relay: RelayConfig) -> Self {
        self.relay = relay;
        self
    }

    /// Set the session limit
    pub fn max_sessions(mut self, max: usize) -> Self {
        self.max_sessions = max;
        self
    }

    /// Set the cleanup interval
    pub fn cleanup_interval(mut self, interval: Duration) -> Self {
        self.cleanup_interval = interval;
        self
    }
}
