//! Error types
//!
//! Packet-level [`ProtocolError`]s are recoverable: the offending packet is
//! dropped and the session carries on. Everything else that reaches a
//! session ends it (see [`crate::session::StopReason`]).

use std::fmt;
use std::io;

use crate::encoder::PipeSlot;
use crate::registry::RegistryError;

/// Result alias used throughout the crate
pub type Result<T> = std::result::Result<T, Error>;

/// Top-level error type
#[derive(Debug)]
pub enum Error {
    /// I/O failure outside of the encoder pipes
    Io(io::Error),
    /// Malformed wire packet
    Protocol(ProtocolError),
    /// Invalid configuration
    Config(ConfigError),
    /// Encoder subprocess could not be started
    Encoder(EncoderError),
    /// Session registry failure
    Registry(RegistryError),
    /// The session has already been stopped
    SessionStopped,
}

impl fmt::Display for Error {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Error::Io(e) => write!(f, "I/O error: {}", e),
            Error::Protocol(e) => write!(f, "Protocol error: {}", e),
            Error::Config(e) => write!(f, "Configuration error: {}", e),
            Error::Encoder(e) => write!(f, "Encoder error: {}", e),
            Error::Registry(e) => write!(f, "Registry error: {}", e),
            Error::SessionStopped => write!(f, "Session stopped"),
        }
    }
}

impl std::error::Error for Error {
    fn source(&self) -> Option<&(dyn std::error::Error + 'static)> {
        match self {
            Error::Io(e) => Some(e),
            Error::Protocol(e) => Some(e),
            Error::Config(e) => Some(e),
            Error::Encoder(e) => Some(e),
            Error::Registry(e) => Some(e),
            Error::SessionStopped => None,
        }
    }
}

impl From<io::Error> for Error {
    fn from(e: io::Error) -> Self {
        Error::Io(e)
    }
}

impl From<ProtocolError> for Error {
    fn from(e: ProtocolError) -> Self {
        Error::Protocol(e)
    }
}

impl From<ConfigError> for Error {
    fn from(e: ConfigError) -> Self {
        Error::Config(e)
    }
}

impl From<EncoderError> for Error {
    fn from(e: EncoderError) -> Self {
        Error::Encoder(e)
    }
}

impl From<RegistryError> for Error {
    fn from(e: RegistryError) -> Self {
        Error::Registry(e)
    }
}

/// Wire packet decoding errors
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ProtocolError {
    /// Version byte was not 1
    UnsupportedVersion(u8),
    /// Declared packet size does not match the received length
    SizeMismatch { declared: u32, actual: usize },
    /// Packet is shorter than its header or index table requires
    Truncated { needed: usize, available: usize },
    /// An index table entry points outside the chunk area
    InvalidIndex { entry: usize, offset: u32 },
    /// Packet type byte is not stop/json/media
    UnknownPacketType(u8),
}

impl fmt::Display for ProtocolError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            ProtocolError::UnsupportedVersion(v) => write!(f, "unsupported version {}", v),
            ProtocolError::SizeMismatch { declared, actual } => {
                write!(f, "size mismatch: declared {}, received {}", declared, actual)
            }
            ProtocolError::Truncated { needed, available } => {
                write!(f, "truncated packet: need {} bytes, have {}", needed, available)
            }
            ProtocolError::InvalidIndex { entry, offset } => {
                write!(f, "chunk {} has out-of-range offset {}", entry, offset)
            }
            ProtocolError::UnknownPacketType(t) => write!(f, "unknown packet type {}", t),
        }
    }
}

impl std::error::Error for ProtocolError {}

/// Configuration validation errors
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ConfigError {
    /// The same pipe slot was assigned twice
    DuplicatePipe(PipeSlot),
    /// File descriptor outside the inheritable range
    InvalidPipe(PipeSlot),
    /// Pipe slot not available on this platform
    UnsupportedPipe(PipeSlot),
    /// No output URL configured
    EmptyOutputUrl,
    /// Opus decoding requested without the `opus` feature
    OpusUnavailable,
}

impl fmt::Display for ConfigError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            ConfigError::DuplicatePipe(slot) => write!(f, "pipe {} assigned twice", slot),
            ConfigError::InvalidPipe(slot) => write!(f, "pipe {} is not usable", slot),
            ConfigError::UnsupportedPipe(slot) => {
                write!(f, "pipe {} is not supported on this platform", slot)
            }
            ConfigError::EmptyOutputUrl => write!(f, "output URL is empty"),
            ConfigError::OpusUnavailable => write!(f, "built without Opus support"),
        }
    }
}

impl std::error::Error for ConfigError {}

/// Encoder startup errors
#[derive(Debug)]
pub enum EncoderError {
    /// The subprocess could not be spawned
    Spawn(io::Error),
    /// An input pipe could not be created
    PipeSetup(io::Error),
    /// A piped stdio handle was missing after spawn
    MissingHandle(&'static str),
}

impl fmt::Display for EncoderError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            EncoderError::Spawn(e) => write!(f, "failed to spawn encoder: {}", e),
            EncoderError::PipeSetup(e) => write!(f, "failed to create pipe: {}", e),
            EncoderError::MissingHandle(name) => write!(f, "encoder {} handle missing", name),
        }
    }
}

impl std::error::Error for EncoderError {
    fn source(&self) -> Option<&(dyn std::error::Error + 'static)> {
        match self {
            EncoderError::Spawn(e) | EncoderError::PipeSetup(e) => Some(e),
            EncoderError::MissingHandle(_) => None,
        }
    }
}
