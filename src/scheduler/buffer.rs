//! Per-medium chunk queue

use std::collections::VecDeque;

use crate::codec::Chunk;

/// FIFO of chunks awaiting release
///
/// The head is always the earliest chunk that has been neither released
/// nor discarded.
#[derive(Debug, Default)]
pub struct ChunkBuffer {
    chunks: VecDeque<Chunk>,
    /// Payload bytes currently held
    bytes: usize,
}

impl ChunkBuffer {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn push(&mut self, chunk: Chunk) {
        self.bytes += chunk.size();
        self.chunks.push_back(chunk);
    }

    pub fn front(&self) -> Option<&Chunk> {
        self.chunks.front()
    }

    pub fn head_timestamp(&self) -> Option<u64> {
        self.chunks.front().map(|c| c.timestamp)
    }

    pub fn pop(&mut self) -> Option<Chunk> {
        let chunk = self.chunks.pop_front()?;
        self.bytes -= chunk.size();
        Some(chunk)
    }

    pub fn len(&self) -> usize {
        self.chunks.len()
    }

    pub fn is_empty(&self) -> bool {
        self.chunks.is_empty()
    }

    /// Payload bytes held
    pub fn size(&self) -> usize {
        self.bytes
    }

    pub fn clear(&mut self) {
        self.chunks.clear();
        self.bytes = 0;
    }

    /// Position of the first keyframe at or after `from`
    pub fn keyframe_from(&self, from: usize) -> Option<usize> {
        self.chunks
            .iter()
            .skip(from)
            .position(Chunk::is_keyframe)
            .map(|i| i + from)
    }

    /// Drop the first `count` chunks; returns how many were dropped
    pub fn drain_front(&mut self, count: usize) -> usize {
        let count = count.min(self.chunks.len());
        for chunk in self.chunks.drain(..count) {
            self.bytes -= chunk.size();
        }
        count
    }

    /// Drop every chunk timestamped before `timestamp`
    pub fn discard_before(&mut self, timestamp: u64) -> usize {
        let before = self.chunks.len();
        let mut freed = 0;
        self.chunks.retain(|c| {
            let keep = c.timestamp >= timestamp;
            if !keep {
                freed += c.size();
            }
            keep
        });
        self.bytes -= freed;
        before - self.chunks.len()
    }
}

#[cfg(test)]
mod tests {
    use bytes::Bytes;

    use super::*;

    fn buffer(frames: &[(u64, bool)]) -> ChunkBuffer {
        let mut buf = ChunkBuffer::new();
        for &(ts, key) in frames {
            buf.push(Chunk::video(ts, 0, key, Bytes::from_static(b"xx")));
        }
        buf
    }

    #[test]
    fn test_keyframe_search() {
        let buf = buffer(&[(0, true), (1, false), (2, true), (3, false)]);

        assert_eq!(buf.keyframe_from(0), Some(0));
        assert_eq!(buf.keyframe_from(1), Some(2));
        assert_eq!(buf.keyframe_from(3), None);
    }

    #[test]
    fn test_drain_and_discard_track_size() {
        let mut buf = buffer(&[(0, false), (10, true), (20, false), (30, false)]);
        assert_eq!(buf.size(), 8);

        assert_eq!(buf.drain_front(1), 1);
        assert_eq!(buf.head_timestamp(), Some(10));
        assert_eq!(buf.size(), 6);

        assert_eq!(buf.discard_before(25), 2);
        assert_eq!(buf.len(), 1);
        assert_eq!(buf.size(), 2);

        assert_eq!(buf.drain_front(5), 1);
        assert!(buf.is_empty());
        assert_eq!(buf.size(), 0);
    }
}
