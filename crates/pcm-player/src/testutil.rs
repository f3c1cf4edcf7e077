//! Fixtures shared by unit tests.

use std::io::Write;
use std::path::PathBuf;

use byteorder::{LittleEndian, WriteBytesExt};

/// Builds RIFF/WAVE byte streams for parser and player tests.
pub(crate) struct WavBuilder {
    channels: u16,
    sample_rate: u32,
    bits_per_sample: u16,
    audio_format: u16,
    fmt_extension: Vec<u8>,
    data_id: [u8; 4],
    payload: Vec<u8>,
}

impl WavBuilder {
    pub(crate) fn new(channels: u16, sample_rate: u32, bits_per_sample: u16) -> Self {
        Self {
            channels,
            sample_rate,
            bits_per_sample,
            audio_format: 1,
            fmt_extension: Vec::new(),
            data_id: *b"data",
            payload: Vec::new(),
        }
    }

    pub(crate) fn audio_format(mut self, code: u16) -> Self {
        self.audio_format = code;
        self
    }

    pub(crate) fn fmt_extension(mut self, bytes: &[u8]) -> Self {
        self.fmt_extension = bytes.to_vec();
        self
    }

    pub(crate) fn data_id(mut self, id: [u8; 4]) -> Self {
        self.data_id = id;
        self
    }

    pub(crate) fn payload(mut self, bytes: &[u8]) -> Self {
        self.payload = bytes.to_vec();
        self
    }

    /// Payload made of 16-bit little-endian samples.
    pub(crate) fn samples_i16(self, samples: &[i16]) -> Self {
        let mut bytes = Vec::with_capacity(samples.len() * 2);
        for s in samples {
            bytes.write_i16::<LittleEndian>(*s).unwrap();
        }
        self.payload(&bytes)
    }

    pub(crate) fn build(&self) -> Vec<u8> {
        let fmt_len = 16 + self.fmt_extension.len() as u32;
        let block_align = self.channels * (self.bits_per_sample / 8);
        let byte_rate = self.sample_rate * u32::from(block_align);
        let riff_len = 4 + (8 + fmt_len) + (8 + self.payload.len() as u32);

        let mut out = Vec::new();
        out.write_all(b"RIFF").unwrap();
        out.write_u32::<LittleEndian>(riff_len).unwrap();
        out.write_all(b"WAVE").unwrap();
        out.write_all(b"fmt ").unwrap();
        out.write_u32::<LittleEndian>(fmt_len).unwrap();
        out.write_u16::<LittleEndian>(self.audio_format).unwrap();
        out.write_u16::<LittleEndian>(self.channels).unwrap();
        out.write_u32::<LittleEndian>(self.sample_rate).unwrap();
        out.write_u32::<LittleEndian>(byte_rate).unwrap();
        out.write_u16::<LittleEndian>(block_align).unwrap();
        out.write_u16::<LittleEndian>(self.bits_per_sample).unwrap();
        out.write_all(&self.fmt_extension).unwrap();
        out.write_all(&self.data_id).unwrap();
        out.write_u32::<LittleEndian>(self.payload.len() as u32).unwrap();
        out.write_all(&self.payload).unwrap();
        out
    }
}

/// Write `bytes` to a per-process temp file and return its path.
pub(crate) fn write_temp_file(name: &str, bytes: &[u8]) -> PathBuf {
    let dir = std::env::temp_dir().join(format!("pcm-player-tests-{}", std::process::id()));
    std::fs::create_dir_all(&dir).unwrap();
    let path = dir.join(name);
    std::fs::write(&path, bytes).unwrap();
    path
}
