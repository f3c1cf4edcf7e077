//! Partition a PCM payload into hardware-buffer sized chunks.
//!
//! Every chunk holds interleaved signed 16-bit samples. 16-bit payloads are copied verbatim;
//! 8-bit payloads (unsigned, one byte per sample) are widened to 16 bits first, so the sample
//! count of an 8-bit payload is its byte length rather than half of it.

use byteorder::{ByteOrder, LittleEndian};

/// Samples per hardware buffer.
pub const DEFAULT_CHUNK_SAMPLES: usize = 16_384;

/// One ordered slice of samples, uploaded into a single hardware buffer.
///
/// The last chunk of a payload may be shorter than the capacity.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct SampleChunk {
    samples: Vec<i16>,
}

impl SampleChunk {
    pub fn samples(&self) -> &[i16] {
        &self.samples
    }

    pub fn len(&self) -> usize {
        self.samples.len()
    }

    pub fn is_empty(&self) -> bool {
        self.samples.is_empty()
    }
}

impl From<Vec<i16>> for SampleChunk {
    fn from(samples: Vec<i16>) -> Self {
        Self { samples }
    }
}

/// Number of whole samples carried by `payload_len` bytes at the given bit depth.
pub fn sample_count(payload_len: usize, bits_per_sample: u16) -> usize {
    if bits_per_sample == 8 {
        payload_len
    } else {
        payload_len / 2
    }
}

/// `ceil(samples / capacity)`.
pub fn chunk_count(samples: usize, capacity: usize) -> usize {
    samples.div_ceil(capacity.max(1))
}

/// Split `payload` into chunks of at most `capacity` samples, preserving order.
///
/// A trailing odd byte of a 16-bit payload is not a sample and is dropped.
pub fn chunk_payload(payload: &[u8], bits_per_sample: u16, capacity: usize) -> Vec<SampleChunk> {
    let capacity = capacity.max(1);
    let total = sample_count(payload.len(), bits_per_sample);
    let mut chunks = Vec::with_capacity(chunk_count(total, capacity));

    let mut start = 0;
    while start < total {
        let end = (start + capacity).min(total);
        let samples = if bits_per_sample == 8 {
            payload[start..end].iter().map(|b| widen_u8(*b)).collect()
        } else {
            let mut buf = vec![0i16; end - start];
            LittleEndian::read_i16_into(&payload[start * 2..end * 2], &mut buf);
            buf
        };
        chunks.push(SampleChunk { samples });
        start = end;
    }

    chunks
}

/// Unsigned 8-bit PCM (silence at 128) to signed 16-bit.
fn widen_u8(b: u8) -> i16 {
    (i16::from(b) - 128) << 8
}
