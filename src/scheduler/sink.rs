//! Destination for released chunks

use bytes::Bytes;

use super::error::SinkError;
use crate::codec::Medium;

/// Where the scheduler writes released media
///
/// Writes must not block. A sink reports back-pressure through
/// [`has_capacity`](MediaSink::has_capacity); the scheduler then keeps the
/// chunk queued and retries on a later tick.
pub trait MediaSink {
    /// Whether a write for `medium` would be accepted right now
    fn has_capacity(&self, medium: Medium) -> bool;

    /// Hand one payload to the sink
    fn write(&mut self, medium: Medium, data: Bytes) -> Result<(), SinkError>;
}

/// Sink that records every write, for tests
#[cfg(test)]
#[derive(Debug, Default)]
pub(crate) struct RecordingSink {
    pub writes: Vec<(Medium, Bytes)>,
    pub video_capacity: Option<usize>,
    pub closed: bool,
}

#[cfg(test)]
impl RecordingSink {
    pub fn payloads(&self, medium: Medium) -> Vec<Bytes> {
        self.writes
            .iter()
            .filter(|(m, _)| *m == medium)
            .map(|(_, b)| b.clone())
            .collect()
    }
}

#[cfg(test)]
impl MediaSink for RecordingSink {
    fn has_capacity(&self, medium: Medium) -> bool {
        match (medium, self.video_capacity) {
            (Medium::Video, Some(cap)) => self.payloads(Medium::Video).len() < cap,
            _ => true,
        }
    }

    fn write(&mut self, medium: Medium, data: Bytes) -> Result<(), SinkError> {
        if self.closed {
            return Err(SinkError::Closed(medium));
        }
        self.writes.push((medium, data));
        Ok(())
    }
}
