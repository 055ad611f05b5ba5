//! NoMux packet encoding
//!
//! Chunks are appended to an open packet until it would exceed the size
//! limit, reaches the chunk count limit, or has been open for longer than
//! `max_delay`. The index table, size and count are written on flush.

use std::time::Duration;

use bytes::{BufMut, Bytes, BytesMut};
use tokio::time::Instant;

use super::chunk::Chunk;
use super::media_info::MediaInfo;
use super::packet::{
    PacketType, CHUNK_HEADER_LEN, COUNT_OFFSET, HEADER_LEN, INDEX_ENTRY_LEN, MAX_CHUNKS_PER_PACKET,
    PROTOCOL_VERSION, SIZE_OFFSET,
};

/// Microseconds to the wire's whole milliseconds, saturating at `u32::MAX`
fn wire_ms(us: u64) -> u32 {
    u32::try_from(us / 1000).unwrap_or_else(|_| {
        tracing::warn!(value_us = us, "Chunk time exceeds wire range, clamping");
        u32::MAX
    })
}

/// Packer limits
#[derive(Debug, Clone)]
pub struct PackerConfig {
    /// Packet size limit in bytes, index table included
    pub max_size: usize,

    /// Longest time a packet may stay open before it is force-flushed
    pub max_delay: Duration,
}

impl Default for PackerConfig {
    fn default() -> Self {
        Self {
            max_size: 120_000,
            max_delay: Duration::from_millis(80),
        }
    }
}

impl PackerConfig {
    /// Set the packet size limit
    pub fn max_size(mut self, size: usize) -> Self {
        self.max_size = size.max(HEADER_LEN + CHUNK_HEADER_LEN + INDEX_ENTRY_LEN);
        self
    }

    /// Set the idle flush delay
    pub fn max_delay(mut self, delay: Duration) -> Self {
        self.max_delay = delay;
        self
    }
}

struct OpenPacket {
    buf: BytesMut,
    offsets: Vec<u32>,
    opened_at: Instant,
}

impl OpenPacket {
    /// Size the packet would have with one more entry of `entry_len` bytes
    fn projected_len(&self, entry_len: usize) -> usize {
        self.buf.len() + entry_len + (self.offsets.len() + 1) * INDEX_ENTRY_LEN
    }
}

/// Builds NoMux packets from a stream of chunks
pub struct Packer {
    config: PackerConfig,
    media_info: MediaInfo,
    next_index: u32,
    open: Option<OpenPacket>,
}

impl Packer {
    pub fn new(config: PackerConfig, media_info: MediaInfo) -> Self {
        Self {
            config,
            media_info,
            next_index: 0,
            open: None,
        }
    }

    pub fn media_info(&self) -> &MediaInfo {
        &self.media_info
    }

    /// Index the next emitted packet will carry
    pub fn next_index(&self) -> u32 {
        self.next_index
    }

    /// Number of chunks in the open packet
    pub fn pending(&self) -> usize {
        self.open.as_ref().map_or(0, |p| p.offsets.len())
    }

    fn write_header(&self, buf: &mut BytesMut, kind: PacketType) {
        let info = &self.media_info;
        buf.put_u32(self.next_index);
        buf.put_u8(PROTOCOL_VERSION);
        buf.put_u8(kind as u8);
        buf.put_u32(0); // size, patched on flush
        buf.put_u8(0); // count, patched on flush
        buf.put_u8(info.video_codec.index());
        buf.put_u16(info.width);
        buf.put_u16(info.height);
        buf.put_u8(info.framerate);
        buf.put_u8(info.audio_channels);
        buf.put_u32(info.audio_sample_rate);
        buf.put_u16(info.video_bitrate_kbps);
        buf.put_u16(info.audio_bitrate_kbps);
    }

    fn open_packet(&self, now: Instant) -> OpenPacket {
        let mut buf = BytesMut::with_capacity(self.config.max_size.min(64 * 1024));
        self.write_header(&mut buf, PacketType::Media);
        OpenPacket {
            buf,
            offsets: Vec::new(),
            opened_at: now,
        }
    }

    /// Append a chunk
    ///
    /// Returns the previously open packet if it had to be flushed to make
    /// room. A chunk larger than `max_size` still gets a packet of its own.
    pub fn push(&mut self, chunk: &Chunk, now: Instant) -> Option<Bytes> {
        let entry_len = CHUNK_HEADER_LEN + chunk.size();

        let full = self.open.as_ref().is_some_and(|open| {
            open.offsets.len() >= MAX_CHUNKS_PER_PACKET
                || open.projected_len(entry_len) > self.config.max_size
        });
        let flushed = if full { self.flush() } else { None };

        if self.open.is_none() {
            self.open = Some(self.open_packet(now));
        }

        if let Some(open) = self.open.as_mut() {
            open.offsets.push(open.buf.len() as u32);
            open.buf.put_u8(chunk.medium.to_byte());
            open.buf.put_u8(chunk.frame_type.to_flag());
            open.buf.put_u32(wire_ms(chunk.timestamp));
            open.buf.put_u32(wire_ms(chunk.duration));
            open.buf.put_slice(&chunk.payload);
        }

        flushed
    }

    /// Close the open packet and return it
    ///
    /// Returns `None` when no packet is open.
    pub fn flush(&mut self) -> Option<Bytes> {
        let OpenPacket {
            mut buf, offsets, ..
        } = self.open.take()?;
        if offsets.is_empty() {
            return None;
        }

        for offset in &offsets {
            buf.put_u32(*offset);
        }

        let size = buf.len() as u32;
        buf[SIZE_OFFSET..SIZE_OFFSET + 4].copy_from_slice(&size.to_be_bytes());
        buf[COUNT_OFFSET] = offsets.len() as u8;

        self.next_index = self.next_index.wrapping_add(1);
        Some(buf.freeze())
    }

    /// When the open packet must be flushed, if one is open
    pub fn deadline(&self) -> Option<Instant> {
        self.open
            .as_ref()
            .map(|open| open.opened_at + self.config.max_delay)
    }

    /// Flush the open packet if it has been open for `max_delay`
    pub fn flush_if_due(&mut self, now: Instant) -> Option<Bytes> {
        match self.deadline() {
            Some(deadline) if now >= deadline => self.flush(),
            _ => None,
        }
    }

    /// Switch to new stream parameters
    ///
    /// Chunks already packed keep the parameters they were packed under.
    pub fn set_media_info(&mut self, info: MediaInfo) -> Option<Bytes> {
        let flushed = self.flush();
        self.media_info = info;
        flushed
    }

    /// Flush and append a stop packet
    pub fn stop(&mut self) -> Vec<Bytes> {
        let mut out = Vec::with_capacity(2);
        out.extend(self.flush());

        let mut buf = BytesMut::with_capacity(HEADER_LEN);
        self.write_header(&mut buf, PacketType::Stop);
        buf[SIZE_OFFSET..SIZE_OFFSET + 4].copy_from_slice(&(HEADER_LEN as u32).to_be_bytes());
        self.next_index = self.next_index.wrapping_add(1);
        out.push(buf.freeze());

        out
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::codec::{decode, Medium};

    fn video(ts_ms: u64, key: bool, payload: &'static [u8]) -> Chunk {
        Chunk::video(ts_ms * 1000, 16_000, key, Bytes::from_static(payload))
    }

    fn info() -> MediaInfo {
        MediaInfo {
            width: 1280,
            height: 720,
            framerate: 30,
            ..MediaInfo::default()
        }
    }

    #[test]
    fn test_pack_and_decode() {
        let now = Instant::now();
        let mut packer = Packer::new(PackerConfig::default(), info());

        assert!(packer.push(&video(0, true, b"key"), now).is_none());
        let audio = Chunk::audio(5_000, 20_000, Bytes::from_static(b"opus"));
        assert!(packer.push(&audio, now).is_none());
        assert!(packer.push(&video(33, false, b"delta"), now).is_none());

        let data = packer.flush().unwrap();
        let packet = decode(&data).unwrap();

        assert_eq!(packet.index, 0);
        assert_eq!(packet.kind, PacketType::Media);
        assert_eq!(packet.media_info, info());
        assert_eq!(packet.chunks.len(), 3);
        assert_eq!(packet.chunks[0], video(0, true, b"key"));
        assert_eq!(packet.chunks[1], audio);
        assert_eq!(packet.chunks[2].medium, Medium::Video);
        assert_eq!(packet.chunks[2].timestamp, 33_000);
        assert!(!packet.chunks[2].is_keyframe());

        assert_eq!(packer.next_index(), 1);
        assert!(packer.flush().is_none());
    }

    #[test]
    fn test_mixed_stream_truncates_to_milliseconds() {
        let now = Instant::now();
        let mut packer = Packer::new(PackerConfig::default().max_size(16 * 1024), info());

        let sent: Vec<Chunk> = (0..300u64)
            .map(|i| {
                let timestamp = i * 16_667 + (i * 137) % 1000;
                let payload = Bytes::from(vec![i as u8; ((i * 389) % 1500 + 1) as usize]);
                if i % 3 == 2 {
                    Chunk::audio(timestamp, 20_000 + (i * 53) % 1000, payload)
                } else {
                    Chunk::video(timestamp, 16_000 + (i * 71) % 1000, i % 30 == 0, payload)
                }
            })
            .collect();

        let mut packets: Vec<Bytes> = sent.iter().filter_map(|c| packer.push(c, now)).collect();
        packets.extend(packer.flush());
        assert!(packets.len() > 1);

        let received: Vec<Chunk> = packets
            .iter()
            .flat_map(|data| decode(data).unwrap().chunks)
            .collect();
        assert_eq!(received.len(), sent.len());

        for (got, want) in received.iter().zip(&sent) {
            assert_eq!(got.timestamp, want.timestamp / 1000 * 1000);
            assert_eq!(got.duration, want.duration / 1000 * 1000);
            assert_eq!(got.medium, want.medium);
            assert_eq!(got.frame_type, want.frame_type);
            assert_eq!(got.payload, want.payload);
        }
        assert_ne!(received[1].timestamp, sent[1].timestamp);
    }

    #[test]
    fn test_time_beyond_wire_range_saturates() {
        let now = Instant::now();
        let mut packer = Packer::new(PackerConfig::default(), info());

        let late = Chunk::video((u32::MAX as u64 + 5) * 1000, 16_000, true, Bytes::from_static(b"x"));
        assert!(packer.push(&late, now).is_none());

        let packet = decode(&packer.flush().unwrap()).unwrap();
        assert_eq!(packet.chunks[0].timestamp, u32::MAX as u64 * 1000);
        assert_eq!(packet.chunks[0].duration, 16_000);
    }

    #[test]
    fn test_flush_at_chunk_limit() {
        let now = Instant::now();
        let mut packer = Packer::new(PackerConfig::default(), info());

        for i in 0..MAX_CHUNKS_PER_PACKET as u64 {
            assert!(packer.push(&video(i, i == 0, b"x"), now).is_none());
        }
        assert_eq!(packer.pending(), MAX_CHUNKS_PER_PACKET);

        let full = packer.push(&video(254, false, b"x"), now).unwrap();
        let packet = decode(&full).unwrap();
        assert_eq!(packet.chunks.len(), MAX_CHUNKS_PER_PACKET);
        assert_eq!(full[COUNT_OFFSET], 254);

        let rest = decode(&packer.flush().unwrap()).unwrap();
        assert_eq!(rest.index, 1);
        assert_eq!(rest.chunks.len(), 1);
        assert_eq!(rest.chunks[0].timestamp, 254_000);
    }

    #[test]
    fn test_flush_at_size_limit() {
        let now = Instant::now();
        let config = PackerConfig::default().max_size(HEADER_LEN + 2 * (CHUNK_HEADER_LEN + 4 + 4));
        let mut packer = Packer::new(config, info());

        assert!(packer.push(&video(0, true, b"aaaa"), now).is_none());
        assert!(packer.push(&video(1, false, b"bbbb"), now).is_none());
        let flushed = packer.push(&video(2, false, b"cccc"), now).unwrap();

        assert_eq!(decode(&flushed).unwrap().chunks.len(), 2);
        assert_eq!(packer.pending(), 1);
    }

    #[test]
    fn test_oversized_chunk_gets_own_packet() {
        let now = Instant::now();
        let config = PackerConfig::default().max_size(64);
        let mut packer = Packer::new(config, info());

        let big = Chunk::video(0, 0, true, Bytes::from(vec![7u8; 500]));
        assert!(packer.push(&big, now).is_none());
        let data = packer.flush().unwrap();
        assert_eq!(decode(&data).unwrap().chunks[0].size(), 500);
    }

    #[tokio::test(start_paused = true)]
    async fn test_idle_flush() {
        let mut packer = Packer::new(PackerConfig::default(), info());
        assert!(packer.deadline().is_none());

        let start = Instant::now();
        packer.push(&video(0, true, b"k"), start);
        assert_eq!(packer.deadline(), Some(start + Duration::from_millis(80)));

        tokio::time::advance(Duration::from_millis(79)).await;
        assert!(packer.flush_if_due(Instant::now()).is_none());

        tokio::time::advance(Duration::from_millis(1)).await;
        assert!(packer.flush_if_due(Instant::now()).is_some());
        assert!(packer.deadline().is_none());
    }

    #[test]
    fn test_media_info_change_flushes() {
        let now = Instant::now();
        let mut packer = Packer::new(PackerConfig::default(), info());
        packer.push(&video(0, true, b"k"), now);

        let next = MediaInfo {
            width: 1920,
            height: 1080,
            ..info()
        };
        let flushed = packer.set_media_info(next).unwrap();
        assert_eq!(decode(&flushed).unwrap().media_info.width, 1280);

        packer.push(&video(1, true, b"k"), now);
        let after = decode(&packer.flush().unwrap()).unwrap();
        assert_eq!(after.media_info.width, 1920);
    }

    #[test]
    fn test_stop_packet() {
        let now = Instant::now();
        let mut packer = Packer::new(PackerConfig::default(), info());
        packer.push(&video(0, true, b"k"), now);

        let out = packer.stop();
        assert_eq!(out.len(), 2);

        let stop = decode(&out[1]).unwrap();
        assert!(stop.is_stop());
        assert_eq!(stop.index, 1);
        assert_eq!(out[1].len(), HEADER_LEN);

        // Nothing open: only the stop packet
        assert_eq!(packer.stop().len(), 1);
    }
}
