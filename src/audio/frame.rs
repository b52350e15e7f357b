//! Conversion between little-endian 16-bit PCM bytes and `i16` samples.

use bytes::{BufMut, Bytes, BytesMut};
use std::time::Duration;

use crate::error::FrameError;

pub const BYTES_PER_SAMPLE: usize = 2;

/// Encode samples as little-endian PCM bytes.
pub fn encode_samples(samples: &[i16]) -> Bytes {
    let mut buf = BytesMut::with_capacity(samples.len() * BYTES_PER_SAMPLE);
    for &sample in samples {
        buf.put_i16_le(sample);
    }
    buf.freeze()
}

/// Decode little-endian PCM bytes into samples.
pub fn decode_samples(data: &[u8]) -> Result<Vec<i16>, FrameError> {
    if data.len() % BYTES_PER_SAMPLE != 0 {
        return Err(FrameError::OddLength(data.len()));
    }
    Ok(data
        .chunks_exact(BYTES_PER_SAMPLE)
        .map(|pair| i16::from_le_bytes([pair[0], pair[1]]))
        .collect())
}

/// An immutable block of mono 16-bit PCM audio in wire (little-endian) form.
///
/// Cloning is cheap: the underlying buffer is reference counted, so the same
/// frame can be appended to an accumulation buffer and queued for playback.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct AudioFrame {
    data: Bytes,
}

impl AudioFrame {
    pub fn from_samples(samples: &[i16]) -> Self {
        Self {
            data: encode_samples(samples),
        }
    }

    pub fn silence(samples: usize) -> Self {
        Self::from_samples(&vec![0i16; samples])
    }

    pub fn samples(&self) -> Result<Vec<i16>, FrameError> {
        decode_samples(&self.data)
    }

    pub fn as_bytes(&self) -> &Bytes {
        &self.data
    }

    pub fn into_bytes(self) -> Bytes {
        self.data
    }

    pub fn len_bytes(&self) -> usize {
        self.data.len()
    }

    pub fn is_empty(&self) -> bool {
        self.data.is_empty()
    }

    /// Playing time of the frame at `sample_rate` (mono).
    pub fn duration(&self, sample_rate: u32) -> Duration {
        if sample_rate == 0 {
            return Duration::ZERO;
        }
        let samples = (self.data.len() / BYTES_PER_SAMPLE) as u64;
        Duration::from_micros(samples * 1_000_000 / sample_rate as u64)
    }
}

impl From<Bytes> for AudioFrame {
    fn from(data: Bytes) -> Self {
        Self { data }
    }
}

impl From<Vec<u8>> for AudioFrame {
    fn from(data: Vec<u8>) -> Self {
        Self { data: data.into() }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn encodes_little_endian() {
        let bytes = encode_samples(&[1, -2, 0x1234]);
        assert_eq!(&bytes[..], &[0x01, 0x00, 0xfe, 0xff, 0x34, 0x12]);
    }

    #[test]
    fn decodes_what_the_device_wrote() {
        let samples = vec![i16::MIN, -1, 0, 1, i16::MAX];
        let frame = AudioFrame::from_samples(&samples);
        assert_eq!(frame.len_bytes(), 10);
        assert_eq!(frame.samples().unwrap(), samples);
    }

    #[test]
    fn rejects_odd_length_buffers() {
        assert_eq!(decode_samples(&[0, 1, 2]), Err(FrameError::OddLength(3)));
    }

    #[test]
    fn frame_duration_at_16khz() {
        assert_eq!(AudioFrame::silence(8000).duration(16000), Duration::from_millis(500));
        assert_eq!(AudioFrame::silence(800).duration(16000), Duration::from_millis(50));
        assert_eq!(AudioFrame::silence(800).duration(0), Duration::ZERO);
    }

    #[test]
    fn silence_is_all_zero() {
        let frame = AudioFrame::silence(4);
        assert!(frame.as_bytes().iter().all(|b| *b == 0));
        assert!(!frame.is_empty());
    }
}
