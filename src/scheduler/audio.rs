//! Audio payload decoding ahead of the encoder's PCM input

use bytes::Bytes;

use super::error::AudioDecodeError;

/// Turns one compressed audio payload into the bytes the encoder expects
pub trait AudioDecoder: Send {
    fn decode(&mut self, payload: &[u8]) -> Result<Bytes, AudioDecodeError>;
}

/// Forwards payloads untouched
///
/// Used when the sender already delivers PCM, or when the encoder is told
/// to parse the compressed stream itself.
#[derive(Debug, Default, Clone, Copy)]
pub struct PassthroughDecoder;

impl AudioDecoder for PassthroughDecoder {
    fn decode(&mut self, payload: &[u8]) -> Result<Bytes, AudioDecodeError> {
        Ok(Bytes::copy_from_slice(payload))
    }
}

#[cfg(feature = "opus")]
pub use self::opus_decoder::OpusDecoder;

#[cfg(feature = "opus")]
mod opus_decoder {
    use bytes::{BufMut, Bytes, BytesMut};

    use super::{AudioDecodeError, AudioDecoder};

    /// 120 ms at 48 kHz, the longest Opus frame
    const MAX_FRAME_SAMPLES: usize = 5760;

    /// Opus to interleaved signed 16-bit little-endian PCM
    pub struct OpusDecoder {
        decoder: opus::Decoder,
        channels: usize,
        pcm: Vec<i16>,
    }

    impl OpusDecoder {
        pub fn new(sample_rate: u32, channels: u8) -> Result<Self, AudioDecodeError> {
            let layout = match channels {
                1 => opus::Channels::Mono,
                2 => opus::Channels::Stereo,
                n => {
                    return Err(AudioDecodeError::new(format!(
                        "unsupported channel count {}",
                        n
                    )))
                }
            };
            let decoder = opus::Decoder::new(sample_rate, layout)
                .map_err(|e| AudioDecodeError::new(e.to_string()))?;

            Ok(Self {
                decoder,
                channels: channels as usize,
                pcm: vec![0; MAX_FRAME_SAMPLES * channels as usize],
            })
        }
    }

    impl AudioDecoder for OpusDecoder {
        fn decode(&mut self, payload: &[u8]) -> Result<Bytes, AudioDecodeError> {
            let samples = self
                .decoder
                .decode(payload, &mut self.pcm, false)
                .map_err(|e| AudioDecodeError::new(e.to_string()))?;

            let interleaved = &self.pcm[..samples * self.channels];
            let mut out = BytesMut::with_capacity(interleaved.len() * 2);
            for sample in interleaved {
                out.put_i16_le(*sample);
            }
            Ok(out.freeze())
        }
    }

    // opus::Decoder is not Debug
    impl std::fmt::Debug for OpusDecoder {
        fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
            f.debug_struct("OpusDecoder")
                .field("channels", &self.channels)
                .finish()
        }
    }
}

/// Decoder failing on payloads that start with `0xff`, for tests
#[cfg(test)]
pub(crate) struct FailingDecoder;

#[cfg(test)]
impl AudioDecoder for FailingDecoder {
    fn decode(&mut self, payload: &[u8]) -> Result<Bytes, AudioDecodeError> {
        if payload.first() == Some(&0xff) {
            return Err(AudioDecodeError::new("corrupt frame"));
        }
        Ok(Bytes::copy_from_slice(payload))
    }
}
