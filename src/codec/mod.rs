//! NoMux wire codec
//!
//! A sender packs encoded video and audio into [`Packer`] packets; the relay
//! turns received packets back into [`Chunk`]s with [`decode`] (or
//! [`decode_legacy`] for old senders).

pub mod chunk;
pub mod legacy;
pub mod media_info;
pub mod packer;
pub mod packet;

pub use chunk::{Chunk, FrameType, Medium};
pub use legacy::decode_legacy;
pub use media_info::{MediaChange, MediaInfo, VideoCodec};
pub use packer::{Packer, PackerConfig};
pub use packet::{decode, Packet, PacketType, MAX_CHUNKS_PER_PACKET, PROTOCOL_VERSION};

use bytes::Bytes;

use crate::error::ProtocolError;

/// Packet layout expected from the sender
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum WireFormat {
    /// Versioned layout with full media info
    #[default]
    Current,
    /// Pre-versioning layout
    Legacy,
}

impl WireFormat {
    /// Decode a packet in this format
    pub fn decode(self, data: &Bytes) -> Result<Packet, ProtocolError> {
        match self {
            WireFormat::Current => decode(data),
            WireFormat::Legacy => decode_legacy(data),
        }
    }
}
