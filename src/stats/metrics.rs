//! Statistics for relay sessions

use std::time::Duration;

use crate::codec::Medium;
use crate::encoder::Telemetry;
use crate::scheduler::{Admission, TickReport};

/// Session-level statistics
#[derive(Debug, Clone, Default)]
pub struct SessionStats {
    /// Packets handed to `feed`
    pub packets_received: u64,
    /// Total bytes handed to `feed`
    pub bytes_received: u64,
    /// Packets dropped as malformed
    pub protocol_errors: u64,
    /// Video chunks admitted
    pub video_chunks: u64,
    /// Audio chunks admitted
    pub audio_chunks: u64,
    /// Keyframes admitted
    pub keyframes: u64,
    /// Chunks refused by the scheduler
    pub rejected_chunks: u64,
    /// Chunks evicted, skipped by resync or failing to decode
    pub dropped_chunks: u64,
    pub video_released: u64,
    pub audio_released: u64,
    /// Encoder processes started
    pub encoder_spawns: u64,
    /// Media parameter changes seen
    pub media_changes: u64,
    /// Session duration
    pub duration: Duration,
    /// Most recent encoder progress report
    pub last_telemetry: Option<Telemetry>,
}

impl SessionStats {
    /// Create new stats tracker
    pub fn new() -> Self {
        Self::default()
    }

    pub fn record_packet(&mut self, len: usize) {
        self.packets_received += 1;
        self.bytes_received += len as u64;
    }

    /// Account for one [`PlayoutScheduler::push`](crate::scheduler::PlayoutScheduler::push)
    pub fn record_admission(&mut self, medium: Medium, keyframe: bool, admission: Admission) {
        match admission {
            Admission::Admitted { dropped } => {
                match medium {
                    Medium::Video => self.video_chunks += 1,
                    Medium::Audio => self.audio_chunks += 1,
                }
                if keyframe {
                    self.keyframes += 1;
                }
                self.dropped_chunks += dropped as u64;
            }
            _ => self.rejected_chunks += 1,
        }
    }

    pub fn record_tick(&mut self, report: &TickReport) {
        self.video_released += report.video_released as u64;
        self.audio_released += report.audio_released as u64;
        self.dropped_chunks += (report.resynced + report.audio_dropped) as u64;
    }

    /// Inbound bitrate in bits/sec
    pub fn bitrate(&self) -> u64 {
        let secs = self.duration.as_secs();
        if secs > 0 {
            (self.bytes_received * 8) / secs
        } else {
            0
        }
    }
}
