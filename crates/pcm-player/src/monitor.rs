//! Per-session playback monitor.
//!
//! A monitor owns its session's hardware handles from the moment playback starts. It polls the
//! source on a fixed interval and, on natural end of data, cancellation or a backend failure,
//! releases the source and then every buffer exactly once before reporting `Stopped`.
//!
//! State machine:
//! - `Running` → `Completed` when the source reports [`SourceState::Stopped`]
//! - `Running` → `CancelRequested` when the cancel flag is observed
//! - `CancelRequested` → `Completed` on the very next check, whatever the hardware reports
//! - `Running` → `Completed` when the state query fails

use std::io;
use std::sync::Arc;
use std::sync::atomic::{AtomicBool, AtomicU8, Ordering};
use std::thread::{self, JoinHandle};
use std::time::Duration;

use crate::backend::{AudioBackend, SourceState};
use crate::events::{EventSink, PlaybackEndReason, PlaybackEvent, SessionId};
use crate::session::{PlaybackSession, SessionState};

#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum MonitorState {
    Running,
    CancelRequested,
    Completed,
}

impl MonitorState {
    fn as_u8(self) -> u8 {
        match self {
            MonitorState::Running => 0,
            MonitorState::CancelRequested => 1,
            MonitorState::Completed => 2,
        }
    }

    fn from_u8(v: u8) -> Self {
        match v {
            0 => MonitorState::Running,
            1 => MonitorState::CancelRequested,
            _ => MonitorState::Completed,
        }
    }
}

/// State visible to both the monitor thread and its handle.
#[derive(Debug)]
struct MonitorShared {
    cancel: AtomicBool,
    state: AtomicU8,
}

pub struct PlaybackMonitor {
    session: PlaybackSession,
    backend: Arc<dyn AudioBackend>,
    events: EventSink,
    poll_interval: Duration,
    shared: Arc<MonitorShared>,
    state: MonitorState,
    end_reason: Option<PlaybackEndReason>,
}

impl PlaybackMonitor {
    /// Take ownership of a playing session.
    pub fn new(
        session: PlaybackSession,
        backend: Arc<dyn AudioBackend>,
        events: EventSink,
        poll_interval: Duration,
    ) -> Self {
        Self {
            session,
            backend,
            events,
            poll_interval,
            shared: Arc::new(MonitorShared {
                cancel: AtomicBool::new(false),
                state: AtomicU8::new(MonitorState::Running.as_u8()),
            }),
            state: MonitorState::Running,
            end_reason: None,
        }
    }

    /// Handle observing this monitor, without a thread to join.
    pub fn handle(&self) -> MonitorHandle {
        MonitorHandle {
            session: self.session.id,
            shared: self.shared.clone(),
            join: None,
        }
    }

    pub fn state(&self) -> MonitorState {
        self.state
    }

    pub fn end_reason(&self) -> Option<PlaybackEndReason> {
        self.end_reason
    }

    /// Run the poll loop on a dedicated thread.
    ///
    /// If the thread cannot be started the monitor is dropped, which releases the session.
    pub fn spawn(self) -> io::Result<MonitorHandle> {
        let mut handle = self.handle();
        let join = thread::Builder::new()
            .name(format!("monitor-{}", self.session.id.0))
            .spawn(move || self.run())?;
        handle.join = Some(join);
        Ok(handle)
    }

    /// Poll until completion; returns why playback ended.
    pub fn run(mut self) -> PlaybackEndReason {
        loop {
            match self.step() {
                MonitorState::Running => thread::sleep(self.poll_interval),
                MonitorState::CancelRequested => {}
                MonitorState::Completed => {
                    return self.end_reason.unwrap_or(PlaybackEndReason::Error);
                }
            }
        }
    }

    /// Perform one check and return the state it leaves the monitor in.
    pub fn step(&mut self) -> MonitorState {
        match self.state {
            MonitorState::Running => match self.backend.source_state(self.session.source) {
                Ok(SourceState::Stopped) => self.complete(PlaybackEndReason::Eof),
                Ok(_) => {
                    if self.shared.cancel.load(Ordering::Acquire) {
                        self.set_state(MonitorState::CancelRequested);
                    }
                }
                Err(err) => {
                    tracing::warn!(
                        session = %self.session.id,
                        source = %self.session.source,
                        "source state query failed: {err}"
                    );
                    self.complete(PlaybackEndReason::Error);
                }
            },
            MonitorState::CancelRequested => self.complete(PlaybackEndReason::Stopped),
            MonitorState::Completed => {}
        }
        self.state
    }

    fn set_state(&mut self, state: MonitorState) {
        self.state = state;
        self.shared.state.store(state.as_u8(), Ordering::Release);
    }

    /// Release the session's handles and report; no-op once completed.
    fn complete(&mut self, reason: PlaybackEndReason) {
        if self.state == MonitorState::Completed {
            return;
        }
        let id = self.session.id;
        let source = self.session.source;

        if reason == PlaybackEndReason::Stopped {
            if let Err(err) = self.backend.stop_source(source) {
                tracing::warn!(session = %id, source = %source, "stop failed: {err}");
            }
        }
        if let Err(err) = self.backend.delete_source(source) {
            tracing::warn!(session = %id, source = %source, "delete source failed: {err}");
        }
        if let Err(err) = self.backend.delete_buffers(&self.session.buffers) {
            tracing::warn!(
                session = %id,
                buffers = self.session.buffers.len(),
                "delete buffers failed: {err}"
            );
        }
        self.session.state = SessionState::Stopped;
        self.end_reason = Some(reason);

        tracing::info!(
            session = %id,
            buffers = self.session.buffers.len(),
            reason = %reason,
            "playback stopped"
        );
        self.events.emit(PlaybackEvent::Stopped {
            session: id,
            reason,
        });
        self.set_state(MonitorState::Completed);
    }
}

impl Drop for PlaybackMonitor {
    fn drop(&mut self) {
        if self.state != MonitorState::Completed {
            self.complete(PlaybackEndReason::Error);
        }
    }
}

/// Registry-side view of a monitor: cancel signal, state and (when spawned) its thread.
#[derive(Debug)]
pub struct MonitorHandle {
    session: SessionId,
    shared: Arc<MonitorShared>,
    join: Option<JoinHandle<PlaybackEndReason>>,
}

impl MonitorHandle {
    pub fn session(&self) -> SessionId {
        self.session
    }

    pub fn state(&self) -> MonitorState {
        MonitorState::from_u8(self.shared.state.load(Ordering::Acquire))
    }

    pub fn is_completed(&self) -> bool {
        self.state() == MonitorState::Completed
    }

    /// Raise the cancel flag.
    ///
    /// Returns `true` only when this call signalled a monitor that had not yet completed and
    /// had not been cancelled before.
    pub fn cancel(&self) -> bool {
        if self.is_completed() {
            return false;
        }
        !self.shared.cancel.swap(true, Ordering::AcqRel)
    }

    /// Wait for the monitor thread; `None` if there is no thread or it panicked.
    pub fn join(mut self) -> Option<PlaybackEndReason> {
        let join = self.join.take()?;
        match join.join() {
            Ok(reason) => Some(reason),
            Err(_) => {
                tracing::error!(session = %self.session, "monitor thread panicked");
                None
            }
        }
    }
}
