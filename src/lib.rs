//! # nomux-relay
//!
//! Relay live streams from NoMux chunk packets into an ffmpeg RTMP encoder.
//!
//! A browser-side sender encodes video and audio, packs the chunks into
//! NoMux packets and streams them over a socket. For each stream the relay
//! keeps a [`RelaySession`] that decodes the packets, holds them in a jitter
//! buffer and plays them out on a wall-clock timeline into the input pipes
//! of an ffmpeg process publishing to the RTMP destination. ffmpeg's
//! progress output is parsed and reported back to the sender as status
//! lines.
//!
//! ## Example
//!
//! ```no_run
//! use bytes::Bytes;
//! use nomux_relay::{SessionRegistry, StreamKey};
//!
//! # async fn run(packets: Vec<Bytes>) -> nomux_relay::Result<()> {
//! let registry = SessionRegistry::new();
//! let key = StreamKey::new("rtmp://live.example.com/app/stream-key");
//! let (session, _created) = registry.get_or_create(&key).await?;
//!
//! let mut events = session.subscribe();
//! tokio::spawn(async move {
//!     while let Some(event) = events.recv().await {
//!         if let Some(line) = event.status_line() {
//!             println!("{}", line);
//!         }
//!     }
//! });
//!
//! for packet in packets {
//!     if let Err(e) = session.feed(packet).await {
//!         eprintln!("dropped packet: {}", e);
//!     }
//! }
//! session.stop().await;
//! # Ok(())
//! # }
//! ```

pub mod codec;
pub mod encoder;
pub mod error;
pub mod event;
pub mod registry;
pub mod scheduler;
pub mod session;
pub mod stats;

pub use codec::{Chunk, MediaInfo, Medium, Packer, PackerConfig, Packet, WireFormat};
pub use encoder::{EncoderConfig, EncoderSupervisor, PipeMap, PipeSlot, SupervisorSettings, Telemetry};
pub use error::{Error, Result};
pub use event::{Event, EventBus, ListenerId};
pub use registry::{RegistryConfig, SessionRegistry, StreamKey};
pub use scheduler::{PlayoutConfig, PlayoutScheduler, PlayoutState};
pub use session::{RelayConfig, RelayEvent, RelaySession, StopReason};
pub use stats::SessionStats;
