//! Audio backend seam.
//!
//! The player only speaks the small buffer/source vocabulary below; device and context setup
//! belong to each backend. Handles are plain ids minted by the backend and are never reused
//! while live.

use std::fmt;

use thiserror::Error;

use crate::format::AudioFormat;

#[cfg(feature = "cpal")]
pub mod cpal;
pub mod memory;

/// Opaque hardware buffer id.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct BufferHandle(pub u32);

/// Opaque hardware source id.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct SourceHandle(pub u32);

impl fmt::Display for BufferHandle {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "buffer#{}", self.0)
    }
}

impl fmt::Display for SourceHandle {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "source#{}", self.0)
    }
}

/// Playback state reported by a source.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum SourceState {
    /// Created, nothing played yet.
    Initial,
    Playing,
    Paused,
    /// Queue exhausted or explicitly stopped.
    Stopped,
}

#[derive(Error, Debug)]
pub enum BackendError {
    /// No more buffers/sources can be allocated.
    #[error("{0}")]
    OutOfResources(String),

    /// The handle is unknown or was already deleted.
    #[error("invalid handle {0}")]
    InvalidHandle(u32),

    /// Device or driver failure.
    #[error("device error: {0}")]
    Device(String),
}

/// Capability set the player needs from a native audio API.
///
/// Implementations must be callable from any thread: session setup runs on the caller's
/// thread, while each session's monitor queries and releases handles from its own thread.
pub trait AudioBackend: Send + Sync {
    /// Allocate `count` buffers.
    fn create_buffers(&self, count: usize) -> Result<Vec<BufferHandle>, BackendError>;

    /// Upload interleaved samples into `buffer`.
    fn upload(
        &self,
        buffer: BufferHandle,
        format: AudioFormat,
        samples: &[i16],
        sample_rate: u32,
    ) -> Result<(), BackendError>;

    fn create_source(&self) -> Result<SourceHandle, BackendError>;

    /// Append `buffers` to the source queue; they play back-to-back in this order.
    fn queue_buffers(
        &self,
        source: SourceHandle,
        buffers: &[BufferHandle],
    ) -> Result<(), BackendError>;

    fn play(&self, source: SourceHandle) -> Result<(), BackendError>;

    fn source_state(&self, source: SourceHandle) -> Result<SourceState, BackendError>;

    /// Halt a source before its resources are released.
    ///
    /// Backends whose delete already silences a playing source can keep the default.
    fn stop_source(&self, _source: SourceHandle) -> Result<(), BackendError> {
        Ok(())
    }

    fn delete_source(&self, source: SourceHandle) -> Result<(), BackendError>;

    fn delete_buffers(&self, buffers: &[BufferHandle]) -> Result<(), BackendError>;
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn handles_display_with_kind() {
        assert_eq!(BufferHandle(3).to_string(), "buffer#3");
        assert_eq!(SourceHandle(9).to_string(), "source#9");
    }
}
