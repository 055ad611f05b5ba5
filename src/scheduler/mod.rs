//! Playout scheduling
//!
//! [`PlayoutScheduler`] holds decoded chunks in one buffer per medium and
//! releases them into a [`MediaSink`] on a wall-clock timeline trailing the
//! sender by a fixed delay.
//!
//! ```text
//!  push(chunk) ──► [video buffer] ──┐
//!                                   ├── tick(now) ──► MediaSink ──► encoder
//!  push(chunk) ──► [audio buffer] ──┘       │
//!                                    AudioDecoder (PCM)
//! ```

pub mod audio;
pub mod buffer;
pub mod config;
pub mod error;
pub mod playout;
pub mod sink;

pub use audio::{AudioDecoder, PassthroughDecoder};
#[cfg(feature = "opus")]
pub use audio::OpusDecoder;
pub use buffer::ChunkBuffer;
pub use config::PlayoutConfig;
pub use error::{AudioDecodeError, PlayoutError, SinkError};
pub use playout::{Admission, PlayoutScheduler, PlayoutState, TickReport};
pub use sink::MediaSink;
