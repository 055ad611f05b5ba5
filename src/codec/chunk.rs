//! Decoded media units

use bytes::Bytes;

/// Which elementary stream a chunk belongs to
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum Medium {
    Video,
    Audio,
}

impl Medium {
    /// Wire value (1 = video, 0 = audio)
    pub fn to_byte(self) -> u8 {
        match self {
            Medium::Video => 1,
            Medium::Audio => 0,
        }
    }

    /// Anything other than 1 is audio
    pub fn from_byte(b: u8) -> Self {
        if b == 1 {
            Medium::Video
        } else {
            Medium::Audio
        }
    }

    pub fn as_str(self) -> &'static str {
        match self {
            Medium::Video => "video",
            Medium::Audio => "audio",
        }
    }
}

impl std::fmt::Display for Medium {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Whether a chunk can be decoded on its own
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum FrameType {
    Key,
    Delta,
}

impl FrameType {
    pub fn from_flag(flag: u8) -> Self {
        if flag == 1 {
            FrameType::Key
        } else {
            FrameType::Delta
        }
    }

    pub fn to_flag(self) -> u8 {
        match self {
            FrameType::Key => 1,
            FrameType::Delta => 0,
        }
    }
}

/// One timestamped unit of encoded video or audio
///
/// Timestamps and durations are in microseconds. The payload is shared
/// (`Bytes`), so moving a chunk between buffers never copies media data.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Chunk {
    /// Presentation timestamp in microseconds
    pub timestamp: u64,
    /// Duration in microseconds
    pub duration: u64,
    /// Video or audio
    pub medium: Medium,
    /// Keyframe or delta
    pub frame_type: FrameType,
    /// Encoded payload
    pub payload: Bytes,
}

impl Chunk {
    /// Create a video chunk
    pub fn video(timestamp: u64, duration: u64, is_key: bool, payload: Bytes) -> Self {
        Self {
            timestamp,
            duration,
            medium: Medium::Video,
            frame_type: if is_key { FrameType::Key } else { FrameType::Delta },
            payload,
        }
    }

    /// Create an audio chunk (audio chunks are always keyframes)
    pub fn audio(timestamp: u64, duration: u64, payload: Bytes) -> Self {
        Self {
            timestamp,
            duration,
            medium: Medium::Audio,
            frame_type: FrameType::Key,
            payload,
        }
    }

    pub fn is_video(&self) -> bool {
        self.medium == Medium::Video
    }

    pub fn is_keyframe(&self) -> bool {
        self.frame_type == FrameType::Key
    }

    /// Payload size in bytes
    pub fn size(&self) -> usize {
        self.payload.len()
    }
}
