//! Events published by a relay session

use std::fmt;

use crate::codec::{MediaChange, MediaInfo};
use crate::event::Event;

/// Why a session ended
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum StopReason {
    /// [`RelaySession::stop`](super::RelaySession::stop) was called
    Requested,
    /// The sender sent a stop packet
    SenderStopped,
    /// Encoder input or output failed
    StreamError,
    /// Nothing was fed for too long, or playout ran dry
    InactivityTimeout,
    /// The encoder stopped reporting progress
    TelemetryTimeout,
    /// The encoder exited on its own
    EncoderExited(Option<i32>),
    /// The encoder could not be started
    SpawnFailed,
}

impl StopReason {
    /// Whether the session failed, as opposed to being wound down
    pub fn is_error(&self) -> bool {
        matches!(
            self,
            StopReason::StreamError | StopReason::EncoderExited(_) | StopReason::SpawnFailed
        )
    }
}

impl fmt::Display for StopReason {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            StopReason::Requested => f.write_str("requested"),
            StopReason::SenderStopped => f.write_str("sender stopped"),
            StopReason::StreamError => f.write_str("stream error"),
            StopReason::InactivityTimeout => f.write_str("no activity"),
            StopReason::TelemetryTimeout => f.write_str("no telemetry"),
            StopReason::EncoderExited(Some(code)) => write!(f, "ffmpeg exit {}", code),
            StopReason::EncoderExited(None) => f.write_str("ffmpeg killed"),
            StopReason::SpawnFailed => f.write_str("spawn failed"),
        }
    }
}

#[derive(Debug, Clone, PartialEq)]
pub enum RelayEvent {
    /// The encoder opened its output
    Ready,
    /// Periodic status line built from encoder telemetry
    Update(String),
    /// The session failed; a `Stopped` follows
    Error(String),
    /// Terminal; emitted exactly once
    Stopped(StopReason),
    /// One stream parameter changed
    MediaChanged { field: &'static str, value: String },
    /// Stream parameters after a change (or on first packet)
    MediaInfo(MediaInfo),
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum RelayEventKind {
    Ready,
    Update,
    Error,
    Stopped,
    MediaChanged,
    MediaInfo,
}

impl Event for RelayEvent {
    type Kind = RelayEventKind;

    fn kind(&self) -> RelayEventKind {
        match self {
            RelayEvent::Ready => RelayEventKind::Ready,
            RelayEvent::Update(_) => RelayEventKind::Update,
            RelayEvent::Error(_) => RelayEventKind::Error,
            RelayEvent::Stopped(_) => RelayEventKind::Stopped,
            RelayEvent::MediaChanged { .. } => RelayEventKind::MediaChanged,
            RelayEvent::MediaInfo(_) => RelayEventKind::MediaInfo,
        }
    }
}

impl From<MediaChange> for RelayEvent {
    fn from(change: MediaChange) -> Self {
        RelayEvent::MediaChanged {
            field: change.field,
            value: change.value,
        }
    }
}

impl RelayEvent {
    /// Text sent back to the sender, if this event is reported to it
    ///
    /// `ready`, the telemetry status line, `error,<reason>` or
    /// `stopped,<reason>`.
    pub fn status_line(&self) -> Option<String> {
        match self {
            RelayEvent::Ready => Some("ready".to_string()),
            RelayEvent::Update(status) => Some(status.clone()),
            RelayEvent::Error(reason) => Some(format!("error,{}", reason)),
            RelayEvent::Stopped(reason) => Some(format!("stopped,{}", reason)),
            RelayEvent::MediaChanged { .. } | RelayEvent::MediaInfo(_) => None,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_status_lines() {
        assert_eq!(RelayEvent::Ready.status_line().as_deref(), Some("ready"));
        assert_eq!(
            RelayEvent::Stopped(StopReason::InactivityTimeout)
                .status_line()
                .as_deref(),
            Some("stopped,no activity")
        );
        assert_eq!(
            RelayEvent::Error(StopReason::EncoderExited(Some(1)).to_string())
                .status_line()
                .as_deref(),
            Some("error,ffmpeg exit 1")
        );
        assert_eq!(
            RelayEvent::MediaInfo(MediaInfo::default()).status_line(),
            None
        );
    }

    #[test]
    fn test_error_reasons() {
        assert!(StopReason::SpawnFailed.is_error());
        assert!(StopReason::EncoderExited(None).is_error());
        assert!(!StopReason::Requested.is_error());
        assert!(!StopReason::InactivityTimeout.is_error());
    }
}
