//! Playback session setup.
//!
//! Uploads chunks into freshly allocated buffers, queues them on a new source in chunk order,
//! starts playback and hands the session to a monitor registered with the [`SessionRegistry`].
//! Any failure before the monitor takes over releases whatever was allocated, so a failed
//! request leaves the backend exactly as it found it.

use std::sync::Arc;
use std::time::Duration;

use crate::backend::{AudioBackend, BufferHandle, SourceHandle};
use crate::chunk::SampleChunk;
use crate::error::{PlayerError, Result};
use crate::events::{EventSink, PlaybackEvent, SessionId};
use crate::format::AudioFormat;
use crate::monitor::PlaybackMonitor;
use crate::registry::SessionRegistry;

#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum SessionState {
    /// Buffers uploaded and queued, play not yet issued.
    Queued,
    Playing,
    /// Handles released.
    Stopped,
}

/// One playback instance and the hardware handles it owns.
#[derive(Debug)]
pub struct PlaybackSession {
    pub id: SessionId,
    pub source: SourceHandle,
    /// Buffers in queue (and playback) order.
    pub buffers: Vec<BufferHandle>,
    pub state: SessionState,
}

/// What a caller learns about a session it started.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct StartedSession {
    pub id: SessionId,
    pub source: SourceHandle,
    pub buffers: Vec<BufferHandle>,
}

/// Inputs for [`start_session`].
pub struct SessionRequest<'a> {
    pub id: SessionId,
    pub chunks: &'a [SampleChunk],
    pub format: AudioFormat,
    pub sample_rate: u32,
    pub poll_interval: Duration,
}

/// Handles allocated for a request that has not reached its monitor yet.
///
/// Dropping it releases them; [`Allocation::into_session`] hands them over instead.
struct Allocation<'a> {
    backend: &'a dyn AudioBackend,
    source: Option<SourceHandle>,
    buffers: Vec<BufferHandle>,
}

impl Allocation<'_> {
    fn into_session(mut self, id: SessionId, source: SourceHandle) -> PlaybackSession {
        self.source = None;
        PlaybackSession {
            id,
            source,
            buffers: std::mem::take(&mut self.buffers),
            state: SessionState::Queued,
        }
    }
}

impl Drop for Allocation<'_> {
    fn drop(&mut self) {
        if let Some(source) = self.source.take() {
            if let Err(err) = self.backend.delete_source(source) {
                tracing::warn!(source = %source, "rollback: delete source failed: {err}");
            }
        }
        if !self.buffers.is_empty() {
            if let Err(err) = self.backend.delete_buffers(&self.buffers) {
                tracing::warn!(
                    buffers = self.buffers.len(),
                    "rollback: delete buffers failed: {err}"
                );
            }
        }
    }
}

/// Start playing `request.chunks` and register a monitor for the new session.
///
/// Returns as soon as the play command has been issued.
pub fn start_session(
    backend: &Arc<dyn AudioBackend>,
    registry: &SessionRegistry,
    events: &EventSink,
    request: SessionRequest<'_>,
) -> Result<StartedSession> {
    if request.chunks.is_empty() {
        return Err(PlayerError::EmptyPayload);
    }
    let id = request.id;
    // A stop_all issued from here on must also reach this session.
    let generation = registry.generation();

    let mut alloc = Allocation {
        backend: backend.as_ref(),
        source: None,
        buffers: Vec::new(),
    };
    alloc.buffers = backend.create_buffers(request.chunks.len())?;
    for (buffer, chunk) in alloc.buffers.iter().zip(request.chunks) {
        backend.upload(*buffer, request.format, chunk.samples(), request.sample_rate)?;
    }

    let source = backend.create_source()?;
    alloc.source = Some(source);
    backend.queue_buffers(source, &alloc.buffers)?;
    backend.play(source)?;

    let mut session = alloc.into_session(id, source);
    session.state = SessionState::Playing;
    let started = StartedSession {
        id,
        source,
        buffers: session.buffers.clone(),
    };
    tracing::info!(
        session = %id,
        source = %source,
        buffers = started.buffers.len(),
        format = %request.format,
        rate_hz = request.sample_rate,
        "playback started"
    );
    events.emit(PlaybackEvent::Started { session: id });

    let monitor = PlaybackMonitor::new(
        session,
        backend.clone(),
        events.clone(),
        request.poll_interval,
    );
    let handle = monitor.spawn()?;
    registry.register_from(handle, generation);
    Ok(started)
}
