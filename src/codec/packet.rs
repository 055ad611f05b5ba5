//! NoMux packet decoding
//!
//! Packet layout (all integers big-endian):
//!
//! ```text
//! +-------+---+---+-------+---+---+-----+-----+---+---+--------+-----+-----+
//! | index |ver|typ| size  | N |vc | w   | h   |fps|ch | rate   | vbr | abr |
//! |  (4)  |(1)|(1)|  (4)  |(1)|(1)| (2) | (2) |(1)|(1)|  (4)   | (2) | (2) |
//! +-------+---+---+-------+---+---+-----+-----+---+---+--------+-----+-----+
//! | N chunk entries ...                        | N x u32 entry offsets     |
//! +--------------------------------------------+---------------------------+
//! ```
//!
//! Chunk entry:
//!
//! ```text
//! +--------+-----+-----------+-----------+----------+
//! | medium | key | timestamp | duration  | payload  |
//! |  (1)   | (1) | (4, ms)   | (4, ms)   | (rest)   |
//! +--------+-----+-----------+-----------+----------+
//! ```
//!
//! A chunk's length is not stored; it runs to the next entry offset, or to
//! the start of the index table for the last entry.

use bytes::{Buf, Bytes};

use super::chunk::{Chunk, FrameType, Medium};
use super::media_info::{MediaInfo, VideoCodec};
use crate::error::ProtocolError;

/// The only protocol version understood
pub const PROTOCOL_VERSION: u8 = 1;

/// Fixed header length, media info included
pub const HEADER_LEN: usize = 26;

/// Per-chunk entry header: medium, key flag, timestamp, duration
pub const CHUNK_HEADER_LEN: usize = 10;

/// Index table bytes per chunk
pub const INDEX_ENTRY_LEN: usize = 4;

/// Most chunks a packet may carry
pub const MAX_CHUNKS_PER_PACKET: usize = 254;

/// Byte offset of the size field
pub(crate) const SIZE_OFFSET: usize = 6;

/// Byte offset of the chunk count field
pub(crate) const COUNT_OFFSET: usize = 10;

/// Packet content type
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum PacketType {
    /// Sender is terminating the stream
    Stop = 0,
    /// Control payload (reserved)
    Json = 1,
    /// Media chunks
    Media = 2,
}

impl PacketType {
    pub fn from_byte(b: u8) -> Result<Self, ProtocolError> {
        match b {
            0 => Ok(PacketType::Stop),
            1 => Ok(PacketType::Json),
            2 => Ok(PacketType::Media),
            other => Err(ProtocolError::UnknownPacketType(other)),
        }
    }
}

/// A decoded packet
#[derive(Debug, Clone)]
pub struct Packet {
    /// Sender-side packet counter
    pub index: u32,
    /// Packet type
    pub kind: PacketType,
    /// Stream parameters at the time the packet was built
    pub media_info: MediaInfo,
    /// Chunks with a non-empty payload, in entry order
    pub chunks: Vec<Chunk>,
}

impl Packet {
    pub fn is_stop(&self) -> bool {
        self.kind == PacketType::Stop
    }
}

fn ensure(buf: &Bytes, needed: usize) -> Result<(), ProtocolError> {
    if buf.len() < needed {
        return Err(ProtocolError::Truncated {
            needed,
            available: buf.len(),
        });
    }
    Ok(())
}

/// Read the index table located at the end of the packet
///
/// The caller has already checked that `data` holds at least `count` entries.
pub(crate) fn read_index_table(data: &Bytes, count: usize) -> (usize, Vec<u32>) {
    let table_start = data.len() - count * INDEX_ENTRY_LEN;
    let mut table = data.slice(table_start..);
    let offsets = (0..count).map(|_| table.get_u32()).collect();
    (table_start, offsets)
}

/// Slice chunk entries out of `data` using the offsets from the index table
///
/// `entries_start..entries_end` is the area chunk entries may occupy.
/// `duration_scale` converts the wire duration to microseconds.
pub(crate) fn read_chunks(
    data: &Bytes,
    offsets: &[u32],
    entries_start: usize,
    entries_end: usize,
    duration_scale: u64,
) -> Result<Vec<Chunk>, ProtocolError> {
    let mut chunks = Vec::with_capacity(offsets.len());

    for (i, &offset) in offsets.iter().enumerate() {
        let start = offset as usize;
        let end = offsets
            .get(i + 1)
            .map(|&next| next as usize)
            .unwrap_or(entries_end);

        if start < entries_start || start > entries_end || end > entries_end {
            return Err(ProtocolError::InvalidIndex { entry: i, offset });
        }

        // Zero or negative length: nothing to forward
        if end <= start + CHUNK_HEADER_LEN {
            continue;
        }

        let mut entry = data.slice(start..end);
        let medium = Medium::from_byte(entry.get_u8());
        let frame_type = FrameType::from_flag(entry.get_u8());
        let timestamp = entry.get_u32() as u64 * 1000;
        let duration = entry.get_u32() as u64 * duration_scale;

        chunks.push(Chunk {
            timestamp,
            duration,
            medium,
            frame_type,
            payload: entry,
        });
    }

    Ok(chunks)
}

/// Decode one packet
///
/// Fails with a [`ProtocolError`] on a version other than 1, a declared size
/// that differs from the received length, or an index table that does not
/// fit the packet. Entries with no payload are omitted from the result.
pub fn decode(data: &Bytes) -> Result<Packet, ProtocolError> {
    ensure(data, HEADER_LEN)?;

    let mut header = data.slice(..HEADER_LEN);
    let index = header.get_u32();

    let version = header.get_u8();
    if version != PROTOCOL_VERSION {
        return Err(ProtocolError::UnsupportedVersion(version));
    }

    let kind = PacketType::from_byte(header.get_u8())?;

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
        width: header.get_u16(),
        height: header.get_u16(),
        framerate: header.get_u8(),
        audio_channels: header.get_u8(),
        audio_sample_rate: header.get_u32(),
        video_bitrate_kbps: header.get_u16(),
        audio_bitrate_kbps: header.get_u16(),
    };

    ensure(data, HEADER_LEN + count * INDEX_ENTRY_LEN)?;
    let (table_start, offsets) = read_index_table(data, count);
    let chunks = read_chunks(data, &offsets, HEADER_LEN, table_start, 1000)?;

    Ok(Packet {
        index,
        kind,
        media_info,
        chunks,
    })
}

#[cfg(test)]
mod tests {
    use bytes::{BufMut, BytesMut};

    use super::*;

    /// Build a packet by hand, independent of the packer
    fn raw_packet(version: u8, entries: &[(u8, u8, u32, u32, &[u8])]) -> BytesMut {
        let mut buf = BytesMut::new();
        buf.put_u32(7);
        buf.put_u8(version);
        buf.put_u8(2);
        buf.put_u32(0);
        buf.put_u8(entries.len() as u8);
        buf.put_u8(1);
        buf.put_u16(1920);
        buf.put_u16(1080);
        buf.put_u8(30);
        buf.put_u8(2);
        buf.put_u32(48_000);
        buf.put_u16(4_000);
        buf.put_u16(128);

        let mut offsets = Vec::new();
        for (medium, key, ts, dur, payload) in entries {
            offsets.push(buf.len() as u32);
            buf.put_u8(*medium);
            buf.put_u8(*key);
            buf.put_u32(*ts);
            buf.put_u32(*dur);
            buf.put_slice(payload);
        }
        for offset in offsets {
            buf.put_u32(offset);
        }
        let size = buf.len() as u32;
        buf[6..10].copy_from_slice(&size.to_be_bytes());
        buf
    }

    #[test]
    fn test_decode_header_and_chunks() {
        let data = raw_packet(
            1,
            &[(1, 1, 0, 16, &b"\x00\x00\x01key"[..]), (0, 0, 5, 20, &b"opus"[..])],
        )
        .freeze();

        let packet = decode(&data).unwrap();
        assert_eq!(packet.index, 7);
        assert_eq!(packet.kind, PacketType::Media);
        assert_eq!(packet.media_info.video_codec, VideoCodec::AvcMain);
        assert_eq!(packet.media_info.width, 1920);
        assert_eq!(packet.media_info.height, 1080);
        assert_eq!(packet.media_info.framerate, 30);
        assert_eq!(packet.media_info.audio_sample_rate, 48_000);
        assert_eq!(packet.media_info.video_bitrate_kbps, 4_000);
        assert_eq!(packet.media_info.audio_bitrate_kbps, 128);

        assert_eq!(packet.chunks.len(), 2);
        let video = &packet.chunks[0];
        assert_eq!(video.medium, Medium::Video);
        assert!(video.is_keyframe());
        assert_eq!(video.timestamp, 0);
        assert_eq!(video.duration, 16_000);
        assert_eq!(&video.payload[..], &b"\x00\x00\x01key"[..]);

        let audio = &packet.chunks[1];
        assert_eq!(audio.medium, Medium::Audio);
        assert_eq!(audio.timestamp, 5_000);
        assert_eq!(&audio.payload[..], &b"opus"[..]);
    }

    #[test]
    fn test_decode_rejects_bad_version() {
        let data = raw_packet(2, &[(1, 1, 0, 16, &b"abc"[..])]).freeze();
        assert_eq!(
            decode(&data).unwrap_err(),
            ProtocolError::UnsupportedVersion(2)
        );
    }

    #[test]
    fn test_decode_rejects_size_mismatch() {
        let mut buf = raw_packet(1, &[(1, 1, 0, 16, &b"abc"[..])]);
        buf.put_u8(0);
        let data = buf.freeze();
        assert!(matches!(
            decode(&data),
            Err(ProtocolError::SizeMismatch { actual, .. }) if actual == data.len()
        ));
    }

    #[test]
    fn test_decode_rejects_short_packet() {
        let data = Bytes::from_static(&[0, 0, 0, 1, 1]);
        assert!(matches!(
            decode(&data),
            Err(ProtocolError::Truncated { needed: HEADER_LEN, .. })
        ));
    }

    #[test]
    fn test_decode_skips_empty_entries() {
        let data = raw_packet(1, &[(1, 1, 0, 16, &b""[..]), (1, 0, 16, 16, &b"p"[..])]).freeze();
        let packet = decode(&data).unwrap();

        assert_eq!(packet.chunks.len(), 1);
        assert_eq!(packet.chunks[0].timestamp, 16_000);
    }

    #[test]
    fn test_decode_rejects_out_of_range_offset() {
        let mut buf = raw_packet(1, &[(1, 1, 0, 16, &b"abcd"[..])]);
        let len = buf.len();
        buf[len - 4..].copy_from_slice(&9999u32.to_be_bytes());
        let data = buf.freeze();

        assert!(matches!(
            decode(&data),
            Err(ProtocolError::InvalidIndex { entry: 0, offset: 9999 })
        ));
    }

    #[test]
    fn test_decode_stop_packet() {
        let mut buf = raw_packet(1, &[]);
        buf[5] = 0;
        let packet = decode(&buf.freeze()).unwrap();

        assert!(packet.is_stop());
        assert!(packet.chunks.is_empty());
    }

    #[test]
    fn test_decode_unknown_type() {
        let mut buf = raw_packet(1, &[]);
        buf[5] = 9;
        assert_eq!(
            decode(&buf.freeze()).unwrap_err(),
            ProtocolError::UnknownPacketType(9)
        );
    }
}
