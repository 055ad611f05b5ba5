//! Relay sessions
//!
//! A [`RelaySession`] turns the packets of one sender into one outbound
//! RTMP stream:
//!
//! ```text
//!  feed(bytes) ──► decode ──► PlayoutScheduler ──tick──► EncoderPipes ──► ffmpeg ──► rtmp://
//!                                                                           │
//!  EventBus<RelayEvent> ◄── status line ◄── Telemetry ◄──── stderr ◄────────┘
//! ```
//!
//! Transports subscribe to the session's events and forward
//! [`RelayEvent::status_line`] back to the sender.

pub mod config;
pub mod events;
mod pipeline;
pub mod relay;

pub use config::{AudioDecoding, RelayConfig};
pub use events::{RelayEvent, RelayEventKind, StopReason};
pub use relay::RelaySession;
