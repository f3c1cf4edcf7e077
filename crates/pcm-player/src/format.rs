//! Hardware sample format tags.

use std::fmt;

use crate::error::{PlayerError, Result};

/// Sample layout a hardware buffer is uploaded with.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash)]
pub enum AudioFormat {
    Mono8,
    Mono16,
    Stereo8,
    Stereo16,
}

impl AudioFormat {
    /// Map a `(channels, bits_per_sample)` pair onto a format tag.
    ///
    /// Only mono/stereo at 8 or 16 bits are representable.
    pub fn resolve(channels: u16, bits_per_sample: u16) -> Result<Self> {
        match (channels, bits_per_sample) {
            (1, 8) => Ok(AudioFormat::Mono8),
            (1, 16) => Ok(AudioFormat::Mono16),
            (2, 8) => Ok(AudioFormat::Stereo8),
            (2, 16) => Ok(AudioFormat::Stereo16),
            _ => Err(PlayerError::UnsupportedFormat {
                channels,
                bits_per_sample,
            }),
        }
    }

    pub fn channels(self) -> u16 {
        match self {
            AudioFormat::Mono8 | AudioFormat::Mono16 => 1,
            AudioFormat::Stereo8 | AudioFormat::Stereo16 => 2,
        }
    }

    pub fn bits_per_sample(self) -> u16 {
        match self {
            AudioFormat::Mono8 | AudioFormat::Stereo8 => 8,
            AudioFormat::Mono16 | AudioFormat::Stereo16 => 16,
        }
    }

    pub fn bytes_per_sample(self) -> usize {
        usize::from(self.bits_per_sample() / 8)
    }

    /// The 16-bit tag with the same channel layout.
    ///
    /// Chunks always carry `i16` samples, so 8-bit sources are uploaded with this tag.
    pub fn widened(self) -> Self {
        match self {
            AudioFormat::Mono8 | AudioFormat::Mono16 => AudioFormat::Mono16,
            AudioFormat::Stereo8 | AudioFormat::Stereo16 => AudioFormat::Stereo16,
        }
    }
}

impl fmt::Display for AudioFormat {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let name = match self {
            AudioFormat::Mono8 => "mono8",
            AudioFormat::Mono16 => "mono16",
            AudioFormat::Stereo8 => "stereo8",
            AudioFormat::Stereo16 => "stereo16",
        };
        f.write_str(name)
    }
}
