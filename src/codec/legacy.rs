//! Legacy packet variant
//!
//! Older senders emit a shorter fixed header with no version or type byte
//! and no video dimensions, framerate or bitrates:
//!
//! ```text
//! +-------+-------+---+----+----+--------+---------------+---------------+
//! | index | size  | N | vc | ch | rate   | entries ...   | N x u32 index |
//! |  (4)  |  (4)  |(1)|(1) |(1) |  (4)   |               |               |
//! +-------+-------+---+----+----+--------+---------------+---------------+
//! ```
//!
//! Chunk entries use the same 10-byte header as the current format, except
//! that the duration field already carries microseconds. Legacy packets
//! cannot signal a stop; fields missing from the header decode as zero.

use bytes::{Buf, Bytes};

use super::media_info::{MediaInfo, VideoCodec};
use super::packet::{read_chunks, read_index_table, Packet, PacketType, INDEX_ENTRY_LEN};
use crate::error::ProtocolError;

/// Legacy fixed header length
pub const LEGACY_HEADER_LEN: usize = 15;

/// Decode one legacy packet
pub fn decode_legacy(data: &Bytes) -> Result<Packet, ProtocolError> {
    if data.len() < LEGACY_HEADER_LEN {
        return Err(ProtocolError::Truncated {
            needed: LEGACY_HEADER_LEN,
            available: data.len(),
        });
    }

    let mut header = data.slice(..LEGACY_HEADER_LEN);
    let index = header.get_u32();

    let declared = header.get_u32();
    if declared as usize != data.len() {
        return Err(ProtocolError::SizeMismatch {
            declared,
            actual: data.len(),
        });
    }

    let count = header.get_u8() as usize;
    let media_info = MediaInfo {
        video_codec: VideoCodec::from_index(header.get_u8()),
        width: 0,
        height: 0,
        framerate: 0,
        audio_channels: header.get_u8(),
        audio_sample_rate: header.get_u32(),
        video_bitrate_kbps: 0,
        audio_bitrate_kbps: 0,
    };

    let needed = LEGACY_HEADER_LEN + count * INDEX_ENTRY_LEN;
    if data.len() < needed {
        return Err(ProtocolError::Truncated {
            needed,
            available: data.len(),
        });
    }

    let (table_start, offsets) = read_index_table(data, count);
    let chunks = read_chunks(data, &offsets, LEGACY_HEADER_LEN, table_start, 1)?;

    Ok(Packet {
        index,
        kind: PacketType::Media,
        media_info,
        chunks,
    })
}
