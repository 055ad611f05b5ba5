//! Registry error types

use super::key::StreamKey;

/// Error type for registry operations
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum RegistryError {
    /// The registry already holds `max_sessions` sessions
    SessionLimitReached(usize),
    /// No running session for the key
    SessionNotFound(StreamKey),
}

impl std::fmt::Display for RegistryError {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            RegistryError::SessionLimitReached(max) => {
                write!(f, "Session limit reached ({})", max)
            }
            RegistryError::SessionNotFound(key) => write!(f, "Session not found: {}", key),
        }
    }
}

impl std::error::Error for RegistryError {}
