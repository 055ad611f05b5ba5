//! External encoder supervision
//!
//! The relay does no transcoding itself. Video is copied and audio PCM is
//! encoded to AAC by an ffmpeg process that publishes the result over RTMP.
//!
//! ```text
//!                 ┌──────────────── EncoderSupervisor ────────────────┐
//!  MediaSink ───► │ EncoderPipes ──► fd 3 (video)                     │
//!                 │              ──► fd 4 (audio PCM)    ffmpeg ──────┼──► rtmp://
//!                 │ stderr ──► telemetry ──► EncoderEvent             │
//!                 └───────────────────────────────────────────────────┘
//! ```

pub mod config;
pub mod pipes;
pub mod supervisor;
pub mod telemetry;

pub use config::{EncoderConfig, PipeMap, PipeSlot, SupervisorSettings};
pub use pipes::EncoderPipes;
pub use supervisor::{EncoderEvent, EncoderEventKind, EncoderSupervisor};
pub use telemetry::{classify, Diagnostic, Telemetry};
