//! Playout error types

use std::time::Duration;

use crate::codec::Medium;

/// Failure writing into a [`MediaSink`](super::MediaSink)
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum SinkError {
    /// The pipe for this medium is gone
    Closed(Medium),
    /// The sink has no input for this medium
    Unavailable(Medium),
    /// Written without capacity
    Full(Medium),
}

impl std::fmt::Display for SinkError {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            SinkError::Closed(medium) => write!(f, "{} pipe closed", medium),
            SinkError::Unavailable(medium) => write!(f, "no {} input", medium),
            SinkError::Full(medium) => write!(f, "{} pipe full", medium),
        }
    }
}

impl std::error::Error for SinkError {}

/// Fatal playout errors; the scheduler is stopped when one is returned
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum PlayoutError {
    /// No chunk admitted within the data timeout
    Timeout { idle: Duration },
    /// The sink rejected a write
    Sink(SinkError),
}

impl std::fmt::Display for PlayoutError {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            PlayoutError::Timeout { idle } => {
                write!(f, "no data for {:.1}s", idle.as_secs_f64())
            }
            PlayoutError::Sink(e) => write!(f, "stream error: {}", e),
        }
    }
}

impl std::error::Error for PlayoutError {
    fn source(&self) -> Option<&(dyn std::error::Error + 'static)> {
        match self {
            PlayoutError::Sink(e) => Some(e),
            PlayoutError::Timeout { .. } => None,
        }
    }
}

impl From<SinkError> for PlayoutError {
    fn from(e: SinkError) -> Self {
        PlayoutError::Sink(e)
    }
}

/// Audio payload could not be decoded
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct AudioDecodeError {
    message: String,
}

impl AudioDecodeError {
    pub fn new(message: impl Into<String>) -> Self {
        Self {
            message: message.into(),
        }
    }
}

impl std::fmt::Display for AudioDecodeError {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "audio decode failed: {}", self.message)
    }
}

impl std::error::Error for AudioDecodeError {}
