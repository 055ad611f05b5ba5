//! Stream parameters carried in every packet header

use std::fmt;

/// Video codec, encoded on the wire as an index into a fixed table
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum VideoCodec {
    /// H.264 Baseline (`avc1.420034`)
    AvcBaseline,
    /// H.264 Main (`avc1.4d0034`)
    AvcMain,
    /// H.264 High (`avc1.640034`)
    AvcHigh,
    /// Index not present in the table
    Unknown(u8),
}

impl VideoCodec {
    const TABLE: [VideoCodec; 3] = [
        VideoCodec::AvcBaseline,
        VideoCodec::AvcMain,
        VideoCodec::AvcHigh,
    ];

    pub fn from_index(index: u8) -> Self {
        Self::TABLE
            .get(index as usize)
            .copied()
            .unwrap_or(VideoCodec::Unknown(index))
    }

    pub fn index(self) -> u8 {
        match self {
            VideoCodec::AvcBaseline => 0,
            VideoCodec::AvcMain => 1,
            VideoCodec::AvcHigh => 2,
            VideoCodec::Unknown(i) => i,
        }
    }

    /// WebCodecs codec string
    pub fn codec_string(self) -> Option<&'static str> {
        match self {
            VideoCodec::AvcBaseline => Some("avc1.420034"),
            VideoCodec::AvcMain => Some("avc1.4d0034"),
            VideoCodec::AvcHigh => Some("avc1.640034"),
            VideoCodec::Unknown(_) => None,
        }
    }
}

impl fmt::Display for VideoCodec {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self.codec_string() {
            Some(s) => f.write_str(s),
            None => write!(f, "unknown({})", self.index()),
        }
    }
}

/// Codec, resolution and bitrate descriptor
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct MediaInfo {
    pub video_codec: VideoCodec,
    pub width: u16,
    pub height: u16,
    /// Target frames per second
    pub framerate: u8,
    pub audio_channels: u8,
    /// Audio sample rate in Hz
    pub audio_sample_rate: u32,
    pub video_bitrate_kbps: u16,
    pub audio_bitrate_kbps: u16,
}

impl Default for MediaInfo {
    fn default() -> Self {
        Self {
            video_codec: VideoCodec::AvcHigh,
            width: 0,
            height: 0,
            framerate: 60,
            audio_channels: 2,
            audio_sample_rate: 48_000,
            video_bitrate_kbps: 2_000,
            audio_bitrate_kbps: 100,
        }
    }
}

/// A single field that differs between two [`MediaInfo`] snapshots
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct MediaChange {
    pub field: &'static str,
    pub value: String,
}

impl MediaInfo {
    fn fields(&self) -> [(&'static str, String); 8] {
        [
            ("videoCodec", self.video_codec.to_string()),
            ("width", self.width.to_string()),
            ("height", self.height.to_string()),
            ("framerate", self.framerate.to_string()),
            ("audioChannels", self.audio_channels.to_string()),
            ("audioSampleRate", self.audio_sample_rate.to_string()),
            ("videoBitrate", self.video_bitrate_kbps.to_string()),
            ("audioBitrate", self.audio_bitrate_kbps.to_string()),
        ]
    }

    /// Fields of `self` that differ from `previous`, in header order
    pub fn changes(&self, previous: &MediaInfo) -> Vec<MediaChange> {
        self.fields()
            .into_iter()
            .zip(previous.fields())
            .filter(|(new, old)| new.1 != old.1)
            .map(|((field, value), _)| MediaChange { field, value })
            .collect()
    }

    /// Whether the stream carries audio at all
    pub fn has_audio(&self) -> bool {
        self.audio_channels > 0 && self.audio_sample_rate > 0
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_codec_table() {
        assert_eq!(VideoCodec::from_index(0), VideoCodec::AvcBaseline);
        assert_eq!(VideoCodec::from_index(2), VideoCodec::AvcHigh);
        assert_eq!(VideoCodec::from_index(9), VideoCodec::Unknown(9));
        assert_eq!(VideoCodec::Unknown(255).index(), 255);
        assert_eq!(VideoCodec::AvcMain.to_string(), "avc1.4d0034");
    }

    #[test]
    fn test_changes() {
        let old = MediaInfo::default();
        let new = MediaInfo {
            width: 1280,
            height: 720,
            ..old
        };

        let changes = new.changes(&old);
        assert_eq!(changes.len(), 2);
        assert_eq!(changes[0].field, "width");
        assert_eq!(changes[0].value, "1280");
        assert_eq!(changes[1].field, "height");

        assert!(old.changes(&old).is_empty());
    }
}
