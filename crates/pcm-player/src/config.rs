//! Player tuning: chunk size and monitor poll interval.

use std::time::Duration;

use crate::chunk::DEFAULT_CHUNK_SAMPLES;
use crate::error::{PlayerError, Result};

/// Poll cadence of playback monitors.
pub const DEFAULT_POLL_INTERVAL: Duration = Duration::from_millis(100);

/// Player tuning parameters shared by the chunking and monitoring stages.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct PlayerConfig {
    /// Samples per hardware buffer (interleaved, all channels).
    pub chunk_samples: usize,
    /// Delay between two hardware state checks; also the worst-case cancel latency.
    pub poll_interval: Duration,
}

impl Default for PlayerConfig {
    fn default() -> Self {
        Self {
            chunk_samples: DEFAULT_CHUNK_SAMPLES,
            poll_interval: DEFAULT_POLL_INTERVAL,
        }
    }
}

impl PlayerConfig {
    /// Reject values the pipeline cannot honour.
    ///
    /// `chunk_samples` must be even so a stereo frame never straddles two buffers.
    pub fn validate(&self) -> Result<()> {
        if self.chunk_samples == 0 || self.chunk_samples % 2 != 0 {
            return Err(PlayerError::Config(format!(
                "chunk_samples must be a positive even number, got {}",
                self.chunk_samples
            )));
        }
        if self.poll_interval.is_zero() {
            return Err(PlayerError::Config(
                "poll_interval must be greater than zero".to_string(),
            ));
        }
        Ok(())
    }
}
