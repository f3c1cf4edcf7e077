//! Playback of uncompressed PCM (RIFF/WAVE) files through a buffer/source style audio API.
//!
//! ## Pipeline
//! 1. **Parse**: [`container::parse`] validates the RIFF/WAVE framing and returns the
//!    stream descriptor plus the raw PCM payload.
//! 2. **Chunk**: [`chunk::chunk_payload`] partitions the payload into bounded sample chunks,
//!    one per hardware buffer.
//! 3. **Upload**: [`session::start_session`] allocates buffers and a source on an
//!    [`backend::AudioBackend`], queues the buffers in order and starts playback.
//! 4. **Monitor**: a [`monitor::PlaybackMonitor`] thread polls the source until it stops or is
//!    cancelled, then releases every handle exactly once.
//!
//! [`player::Player`] wires these stages together and owns the [`registry::SessionRegistry`]
//! used by `stop_all`.

pub mod backend;
pub mod chunk;
pub mod config;
pub mod container;
pub mod error;
pub mod events;
pub mod format;
pub mod monitor;
pub mod player;
pub mod registry;
pub mod session;

#[cfg(test)]
pub(crate) mod testutil;

pub use error::{PlayerError, Result};
