//! PCM 16-bit little-endian helpers.
//!
//! Captured audio arrives as normalized `f32` samples and leaves as PCM16 LE
//! frames of a fixed sample count.

use bytes::{BufMut, Bytes, BytesMut};

/// Samples per outbound voice frame.
pub const FRAME_SAMPLES: usize = 1024;

/// Sample rate expected by the voice endpoint.
pub const VOICE_SAMPLE_RATE: u32 = 16000;

const PCM_TO_FLOAT_SCALE: f32 = 1.0 / 32768.0;

/// Convert one normalized sample to PCM16.
///
/// Negative samples scale by 0x8000 and positive by 0x7FFF so that both
/// -1.0 and 1.0 map onto the full range without overflow.
#[inline]
pub fn float_to_pcm16(sample: f32) -> i16 {
    let s = sample.clamp(-1.0, 1.0);
    if s < 0.0 {
        (s * 32768.0) as i16
    } else {
        (s * 32767.0) as i16
    }
}

#[inline]
pub fn pcm16_to_float(sample: i16) -> f32 {
    sample as f32 * PCM_TO_FLOAT_SCALE
}

/// Encode normalized samples as PCM16 LE bytes.
pub fn encode_pcm16(samples: &[f32]) -> Bytes {
    let mut buf = BytesMut::with_capacity(samples.len() * 2);
    for &sample in samples {
        buf.put_i16_le(float_to_pcm16(sample));
    }
    buf.freeze()
}

/// Decode PCM16 LE bytes into normalized samples. A trailing odd byte is ignored.
pub fn decode_pcm16(data: &[u8]) -> Vec<f32> {
    data.chunks_exact(2)
        .map(|chunk| pcm16_to_float(i16::from_le_bytes([chunk[0], chunk[1]])))
        .collect()
}

/// Serialize integer samples as PCM16 LE bytes.
pub fn samples_to_bytes(samples: &[i16]) -> Bytes {
    let mut buf = BytesMut::with_capacity(samples.len() * 2);
    for &sample in samples {
        buf.put_i16_le(sample);
    }
    buf.freeze()
}

/// Accumulates samples and emits fixed-size PCM16 frames.
#[derive(Debug, Clone)]
pub struct PcmFramer {
    frame_samples: usize,
    pending: Vec<i16>,
}

impl Default for PcmFramer {
    fn default() -> Self {
        Self::new(FRAME_SAMPLES)
    }
}

impl PcmFramer {
    pub fn new(frame_samples: usize) -> Self {
        let frame_samples = frame_samples.max(1);
        Self {
            frame_samples,
            pending: Vec::with_capacity(frame_samples),
        }
    }

    pub fn frame_samples(&self) -> usize {
        self.frame_samples
    }

    /// Samples buffered towards the next frame.
    pub fn pending(&self) -> usize {
        self.pending.len()
    }

    /// Push normalized samples and return every frame completed by them.
    pub fn push_float(&mut self, samples: &[f32]) -> Vec<Bytes> {
        let mut frames = Vec::new();
        for &sample in samples {
            self.pending.push(float_to_pcm16(sample));
            if self.pending.len() == self.frame_samples {
                frames.push(samples_to_bytes(&self.pending));
                self.pending.clear();
            }
        }
        frames
    }

    /// Push integer samples and return every completed frame.
    pub fn push_i16(&mut self, samples: &[i16]) -> Vec<Bytes> {
        let mut frames = Vec::new();
        let mut rest = samples;
        while !rest.is_empty() {
            let take = (self.frame_samples - self.pending.len()).min(rest.len());
            self.pending.extend_from_slice(&rest[..take]);
            rest = &rest[take..];
            if self.pending.len() == self.frame_samples {
                frames.push(samples_to_bytes(&self.pending));
                self.pending.clear();
            }
        }
        frames
    }

    /// Emit the partial frame, if any.
    pub fn flush(&mut self) -> Option<Bytes> {
        if self.pending.is_empty() {
            return None;
        }
        let frame = samples_to_bytes(&self.pending);
        self.pending.clear();
        Some(frame)
    }
}
