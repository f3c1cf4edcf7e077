//! RIFF/WAVE container parsing.
//!
//! The accepted layout is strict and ordered:
//! `RIFF <size> WAVE fmt <fmt-size> <fmt fields> [fmt extension] data <len> <payload>`.
//! Any other chunk between `fmt ` and `data` is rejected rather than skipped, so compressed or
//! reordered files fail up front instead of playing garbage.

use std::fs::File;
use std::io::{self, BufReader, Read};
use std::path::Path;

use byteorder::{LittleEndian, ReadBytesExt};

use crate::error::{PlayerError, Result};
use crate::format::AudioFormat;

/// Size of the fixed PCM `fmt ` fields.
const FMT_BASE_LEN: u32 = 16;

/// Immutable description of a parsed PCM stream.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub struct StreamDescriptor {
    pub channels: u16,
    pub bits_per_sample: u16,
    pub sample_rate: u32,
}

impl StreamDescriptor {
    /// Hardware format tag for this descriptor.
    pub fn format(&self) -> Result<AudioFormat> {
        AudioFormat::resolve(self.channels, self.bits_per_sample)
    }

    /// Whole frames contained in `payload_len` bytes.
    pub fn frames_in(&self, payload_len: usize) -> usize {
        let frame_bytes = usize::from(self.channels) * usize::from(self.bits_per_sample / 8);
        if frame_bytes == 0 {
            return 0;
        }
        payload_len / frame_bytes
    }

    /// Playback duration of `payload_len` bytes in milliseconds.
    pub fn duration_ms(&self, payload_len: usize) -> u64 {
        if self.sample_rate == 0 {
            return 0;
        }
        (self.frames_in(payload_len) as u64).saturating_mul(1000) / u64::from(self.sample_rate)
    }
}

/// A parsed container: descriptor, resolved format tag and the raw PCM bytes.
#[derive(Clone, Debug)]
pub struct WavStream {
    pub descriptor: StreamDescriptor,
    pub format: AudioFormat,
    pub payload: Vec<u8>,
}

/// Parse a WAVE file from disk.
pub fn parse_file(path: &Path) -> Result<WavStream> {
    let file = File::open(path)?;
    parse(BufReader::new(file))
}

/// Parse a RIFF/WAVE byte stream.
///
/// Fails without a partial result on the first violation.
pub fn parse<R: Read>(mut reader: R) -> Result<WavStream> {
    let riff = read_tag(&mut reader, "RIFF marker")?;
    if &riff != b"RIFF" {
        return Err(PlayerError::MalformedContainer(format!(
            "expected RIFF marker, found {}",
            tag_display(&riff)
        )));
    }

    // Overall RIFF size; the stream length is not checked against it.
    field(reader.read_u32::<LittleEndian>(), "RIFF size")?;

    let wave = read_tag(&mut reader, "WAVE marker")?;
    if &wave != b"WAVE" {
        return Err(PlayerError::UnsupportedContainer(format!(
            "expected WAVE form type, found {}",
            tag_display(&wave)
        )));
    }

    let fmt = read_tag(&mut reader, "fmt chunk id")?;
    if &fmt != b"fmt " {
        return Err(PlayerError::UnsupportedContainer(format!(
            "expected fmt chunk, found {}",
            tag_display(&fmt)
        )));
    }

    let fmt_len = field(reader.read_u32::<LittleEndian>(), "fmt chunk size")?;
    // Audio format code; non-PCM codes surface through the bit depth / data checks below.
    field(reader.read_u16::<LittleEndian>(), "audio format")?;
    let channels = field(reader.read_u16::<LittleEndian>(), "channel count")?;
    let sample_rate = field(reader.read_u32::<LittleEndian>(), "sample rate")?;
    field(reader.read_u32::<LittleEndian>(), "byte rate")?;
    field(reader.read_u16::<LittleEndian>(), "block align")?;
    let bits_per_sample = field(reader.read_u16::<LittleEndian>(), "bits per sample")?;

    if fmt_len > FMT_BASE_LEN {
        skip(&mut reader, u64::from(fmt_len - FMT_BASE_LEN), "fmt extension")?;
    }

    let data = read_tag(&mut reader, "data chunk id")?;
    if &data != b"data" {
        return Err(PlayerError::UnsupportedContainer(format!(
            "only uncompressed data directly after fmt is supported, found {}",
            tag_display(&data)
        )));
    }
    let data_len = field(reader.read_u32::<LittleEndian>(), "data length")?;

    let descriptor = StreamDescriptor {
        channels,
        bits_per_sample,
        sample_rate,
    };
    let format = descriptor.format()?;
    if sample_rate == 0 {
        return Err(PlayerError::MalformedContainer(
            "sample rate is zero".to_string(),
        ));
    }

    let mut payload = Vec::new();
    let read = reader
        .by_ref()
        .take(u64::from(data_len))
        .read_to_end(&mut payload)?;
    if read != data_len as usize {
        return Err(PlayerError::MalformedContainer(format!(
            "data chunk truncated: expected {data_len} bytes, found {read}"
        )));
    }

    tracing::debug!(
        channels,
        bits_per_sample,
        rate_hz = sample_rate,
        bytes = payload.len(),
        "parsed wave container"
    );

    Ok(WavStream {
        descriptor,
        format,
        payload,
    })
}

/// Convert an early end of stream into a container error naming the missing field.
fn field<T>(res: io::Result<T>, what: &str) -> Result<T> {
    res.map_err(|err| eof_as_malformed(err, what))
}

fn eof_as_malformed(err: io::Error, what: &str) -> PlayerError {
    if err.kind() == io::ErrorKind::UnexpectedEof {
        PlayerError::MalformedContainer(format!("stream ended while reading {what}"))
    } else {
        PlayerError::Io(err)
    }
}

fn read_tag<R: Read>(reader: &mut R, what: &str) -> Result<[u8; 4]> {
    let mut tag = [0u8; 4];
    field(reader.read_exact(&mut tag), what)?;
    Ok(tag)
}

fn skip<R: Read>(reader: &mut R, len: u64, what: &str) -> Result<()> {
    let skipped = io::copy(&mut reader.by_ref().take(len), &mut io::sink())?;
    if skipped != len {
        return Err(PlayerError::MalformedContainer(format!(
            "stream ended while skipping {what}"
        )));
    }
    Ok(())
}

fn tag_display(tag: &[u8; 4]) -> String {
    format!("{:?}", String::from_utf8_lossy(tag))
}
