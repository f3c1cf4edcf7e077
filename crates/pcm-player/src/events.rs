//! Playback notifications.
//!
//! The player pushes `Started`/`Stopped` events into a channel; whatever renders state (a CLI
//! log, a UI) subscribes on the receiving side. Delivery is best-effort: a full or disconnected
//! channel never blocks or fails playback.

use std::fmt;

use crossbeam_channel::{Receiver, Sender, TrySendError};

/// Process-unique playback session id.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct SessionId(pub u64);

impl fmt::Display for SessionId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "sess:{}", self.0)
    }
}

/// Why a session stopped.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum PlaybackEndReason {
    /// Natural end of the queued data.
    Eof,
    /// Cancelled by `stop_all`.
    Stopped,
    /// The backend failed while the session was being monitored.
    Error,
}

impl fmt::Display for PlaybackEndReason {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(match self {
            PlaybackEndReason::Eof => "eof",
            PlaybackEndReason::Stopped => "stopped",
            PlaybackEndReason::Error => "error",
        })
    }
}

#[derive(Clone, Debug, PartialEq, Eq)]
pub enum PlaybackEvent {
    Started {
        session: SessionId,
    },
    Stopped {
        session: SessionId,
        reason: PlaybackEndReason,
    },
}

impl PlaybackEvent {
    pub fn session(&self) -> SessionId {
        match self {
            PlaybackEvent::Started { session } | PlaybackEvent::Stopped { session, .. } => *session,
        }
    }
}

/// Sending half of the notification channel.
#[derive(Clone, Debug, Default)]
pub struct EventSink {
    tx: Option<Sender<PlaybackEvent>>,
}

impl EventSink {
    pub fn new(tx: Sender<PlaybackEvent>) -> Self {
        Self { tx: Some(tx) }
    }

    /// Sink that drops every event.
    pub fn disabled() -> Self {
        Self { tx: None }
    }

    /// Unbounded sink plus its receiver.
    pub fn channel() -> (Self, Receiver<PlaybackEvent>) {
        let (tx, rx) = crossbeam_channel::unbounded();
        (Self::new(tx), rx)
    }

    pub(crate) fn emit(&self, event: PlaybackEvent) {
        let Some(tx) = &self.tx else {
            return;
        };
        match tx.try_send(event) {
            Ok(()) => {}
            Err(TrySendError::Full(ev)) => {
                tracing::debug!(session = %ev.session(), "notification channel full; event dropped");
            }
            Err(TrySendError::Disconnected(ev)) => {
                tracing::trace!(session = %ev.session(), "no notification subscriber");
            }
        }
    }
}
