//! Session lookup by stream key
//!
//! The transport asks the registry for the session of a stream key on every
//! new connection. Sessions remove themselves once they stop.
//!
//! ```text
//!                      Arc<SessionRegistry>
//!                 ┌──────────────────────────┐
//!  connection ──► │ sessions: HashMap<Key,   │ ──► RelaySession ──► ffmpeg
//!  connection ──► │   RelaySession>          │ ──► RelaySession ──► ffmpeg
//!                 └────────────▲─────────────┘
//!                              └── Stopped event: remove(key, id)
//! ```

pub mod config;
pub mod error;
pub mod key;
pub mod store;

pub use config::RegistryConfig;
pub use error::RegistryError;
pub use key::StreamKey;
pub use store::SessionRegistry;
