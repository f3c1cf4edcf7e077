//! Registry of in-flight playback monitors.
//!
//! Session setup appends monitor handles; `stop_all` drains them and raises each one's cancel
//! flag. Monitors never touch the registry themselves, so a busy registry can never stall a
//! monitor's poll loop.

use std::collections::VecDeque;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::{Mutex, MutexGuard};
use std::thread;
use std::time::Duration;

use crate::events::{PlaybackEndReason, SessionId};
use crate::monitor::MonitorHandle;

/// Re-check cadence of [`SessionRegistry::wait_idle`].
const IDLE_POLL: Duration = Duration::from_millis(10);

#[derive(Debug, Default)]
pub struct SessionRegistry {
    active: Mutex<VecDeque<MonitorHandle>>,
    /// Monitors cancelled by `stop_all` that may still be releasing their handles.
    retiring: Mutex<Vec<MonitorHandle>>,
    /// Bumped by every `stop_all`; only changed while `active` is locked.
    generation: AtomicU64,
}

impl SessionRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    /// Current stop-all generation.
    ///
    /// Read it before setting up a session and pass it to [`SessionRegistry::register_from`]
    /// so a `stop_all` issued during setup still reaches the session.
    pub fn generation(&self) -> u64 {
        self.generation.load(Ordering::Acquire)
    }

    /// Track a newly started monitor.
    pub fn register(&self, handle: MonitorHandle) {
        self.register_from(handle, self.generation());
    }

    /// Track a monitor whose setup began at `generation`.
    ///
    /// If `stop_all` ran since then the monitor is cancelled on the spot. Completed entries
    /// are dropped on the way.
    pub fn register_from(&self, handle: MonitorHandle, generation: u64) {
        // Lock order everywhere: `retiring` before `active`.
        let mut retiring = lock(&self.retiring);
        retiring.retain(|m| !m.is_completed());
        let mut active = lock(&self.active);
        active.retain(|m| !m.is_completed());

        if self.generation.load(Ordering::Acquire) != generation {
            handle.cancel();
            tracing::info!(session = %handle.session(), "stop all raced setup; cancelled");
            if !handle.is_completed() {
                retiring.push(handle);
            }
            return;
        }
        tracing::debug!(session = %handle.session(), tracked = active.len() + 1, "monitor registered");
        active.push_back(handle);
    }

    /// Drain every registered monitor and cancel the ones still running.
    ///
    /// Returns how many monitors were signalled; completed ones are skipped.
    pub fn stop_all(&self) -> usize {
        let mut retiring = lock(&self.retiring);
        retiring.retain(|m| !m.is_completed());
        let drained: Vec<MonitorHandle> = {
            let mut active = lock(&self.active);
            self.generation.fetch_add(1, Ordering::AcqRel);
            active.drain(..).collect()
        };
        if drained.is_empty() {
            return 0;
        }

        let mut signalled = 0;
        for monitor in drained {
            if monitor.cancel() {
                signalled += 1;
            }
            if !monitor.is_completed() {
                retiring.push(monitor);
            }
        }
        tracing::info!(signalled, "stop all requested");
        signalled
    }

    /// Number of monitors currently tracked for `stop_all`.
    pub fn len(&self) -> usize {
        lock(&self.active).len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    /// Sessions whose monitors have not completed yet.
    pub fn running_sessions(&self) -> Vec<SessionId> {
        lock(&self.active)
            .iter()
            .filter(|m| !m.is_completed())
            .map(MonitorHandle::session)
            .collect()
    }

    /// Block until every tracked monitor (including cancelled ones) has completed.
    ///
    /// Completed monitors are removed and joined; the end reasons are returned in completion
    /// order. Monitors pruned earlier by `register` or `stop_all` are not reported.
    pub fn wait_idle(&self) -> Vec<(SessionId, PlaybackEndReason)> {
        let mut finished = Vec::new();
        loop {
            let (done, pending) = {
                let mut retiring = lock(&self.retiring);
                let mut active = lock(&self.active);
                let mut done = take_completed_vec(&mut retiring);
                done.extend(take_completed(&mut active));
                (done, retiring.len() + active.len())
            };
            for monitor in done {
                let session = monitor.session();
                if let Some(reason) = monitor.join() {
                    finished.push((session, reason));
                }
            }
            if pending == 0 {
                return finished;
            }
            thread::sleep(IDLE_POLL);
        }
    }
}

fn take_completed(queue: &mut VecDeque<MonitorHandle>) -> Vec<MonitorHandle> {
    let mut done = Vec::new();
    let mut keep = VecDeque::with_capacity(queue.len());
    for m in queue.drain(..) {
        if m.is_completed() {
            done.push(m);
        } else {
            keep.push_back(m);
        }
    }
    *queue = keep;
    done
}

fn take_completed_vec(list: &mut Vec<MonitorHandle>) -> Vec<MonitorHandle> {
    let (done, keep): (Vec<_>, Vec<_>) = list.drain(..).partition(MonitorHandle::is_completed);
    *list = keep;
    done
}

fn lock<T>(m: &Mutex<T>) -> MutexGuard<'_, T> {
    m.lock().unwrap_or_else(|err| err.into_inner())
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::backend::memory::MemoryBackend;
    use crate::backend::{AudioBackend, SourceHandle};
    use crate::events::EventSink;
    use crate::format::AudioFormat;
    use crate::monitor::{MonitorState, PlaybackMonitor};
    use crate::session::{PlaybackSession, SessionState};
    use std::sync::Arc;
    use std::time::Instant;

    const POLL: Duration = Duration::from_millis(20);

    fn spawn_monitor(backend: &Arc<MemoryBackend>, id: u64) -> (SourceHandle, MonitorHandle) {
        let buffers = backend.create_buffers(2).unwrap();
        for b in &buffers {
            backend.upload(*b, AudioFormat::Mono16, &[0; 4], 8_000).unwrap();
        }
        let source = backend.create_source().unwrap();
        backend.queue_buffers(source, &buffers).unwrap();
        backend.play(source).unwrap();
        let session = PlaybackSession {
            id: SessionId(id),
            source,
            buffers,
            state: SessionState::Playing,
        };
        let monitor = PlaybackMonitor::new(session, backend.clone(), EventSink::disabled(), POLL);
        (source, monitor.spawn().unwrap())
    }

    fn all_retiring_completed(registry: &SessionRegistry) -> bool {
        lock(&registry.retiring).iter().all(MonitorHandle::is_completed)
    }

    #[test]
    fn stop_all_on_empty_registry_is_noop() {
        let registry = SessionRegistry::new();
        assert_eq!(registry.stop_all(), 0);
        assert_eq!(registry.stop_all(), 0);
        assert!(registry.wait_idle().is_empty());
    }

    #[test]
    fn stop_all_completes_running_monitors_within_a_poll_interval() {
        let backend = Arc::new(MemoryBackend::manual());
        let registry = SessionRegistry::new();
        for id in 1..=3 {
            registry.register(spawn_monitor(&backend, id).1);
        }
        assert_eq!(registry.len(), 3);

        let started = Instant::now();
        assert_eq!(registry.stop_all(), 3);
        assert!(registry.is_empty());
        let finished = registry.wait_idle();
        // One poll to observe the flag, plus one idle re-check and scheduling slack.
        assert!(started.elapsed() < POLL * 2 + IDLE_POLL + Duration::from_millis(20));

        assert_eq!(finished.len(), 3);
        assert!(finished
            .iter()
            .all(|(_, reason)| *reason == PlaybackEndReason::Stopped));
        let stats = backend.stats();
        assert_eq!(stats.live_sources(), 0);
        assert_eq!(stats.live_buffers(), 0);
        assert_eq!(stats.invalid_deletes, 0);
    }

    #[test]
    fn stop_all_leaves_completed_sessions_alone() {
        let backend = Arc::new(MemoryBackend::manual());
        let registry = SessionRegistry::new();
        let (done_source, done) = spawn_monitor(&backend, 1);
        let (_, running) = spawn_monitor(&backend, 2);
        registry.register(done);
        registry.register(running);

        backend.finish_source(done_source);
        let deadline = Instant::now() + Duration::from_secs(2);
        while registry.running_sessions().len() != 1 && Instant::now() < deadline {
            thread::sleep(Duration::from_millis(5));
        }
        assert_eq!(registry.running_sessions(), vec![SessionId(2)]);

        assert_eq!(registry.stop_all(), 1);
        let mut finished = registry.wait_idle();
        finished.sort_by_key(|(id, _)| *id);
        assert_eq!(finished, vec![(SessionId(2), PlaybackEndReason::Stopped)]);
        assert_eq!(backend.stats().stops, 1);
        assert_eq!(backend.stats().sources_deleted, 2);
    }

    #[test]
    fn register_prunes_completed_entries() {
        let backend = Arc::new(MemoryBackend::manual());
        let registry = SessionRegistry::new();
        let (source, first) = spawn_monitor(&backend, 1);
        registry.register(first);
        backend.finish_source(source);
        let deadline = Instant::now() + Duration::from_secs(2);
        while !registry.running_sessions().is_empty() && Instant::now() < deadline {
            thread::sleep(Duration::from_millis(5));
        }

        registry.register(spawn_monitor(&backend, 2).1);
        assert_eq!(registry.len(), 1);
        registry.stop_all();
        registry.wait_idle();
    }

    #[test]
    fn repeated_stop_all_drops_finished_monitors() {
        let backend = Arc::new(MemoryBackend::manual());
        let registry = SessionRegistry::new();
        for id in 1..=20 {
            registry.register(spawn_monitor(&backend, id).1);
            registry.stop_all();
        }

        let deadline = Instant::now() + Duration::from_secs(2);
        while !all_retiring_completed(&registry) && Instant::now() < deadline {
            thread::sleep(Duration::from_millis(5));
        }
        assert_eq!(backend.stats().live_sources(), 0);

        assert_eq!(registry.stop_all(), 0);
        assert!(lock(&registry.retiring).is_empty());
        assert!(registry.wait_idle().is_empty());
    }

    #[test]
    fn register_drops_finished_retiring_monitors() {
        let backend = Arc::new(MemoryBackend::manual());
        let registry = SessionRegistry::new();
        registry.register(spawn_monitor(&backend, 1).1);
        registry.stop_all();
        let deadline = Instant::now() + Duration::from_secs(2);
        while !all_retiring_completed(&registry) && Instant::now() < deadline {
            thread::sleep(Duration::from_millis(5));
        }

        registry.register(spawn_monitor(&backend, 2).1);
        assert!(lock(&registry.retiring).is_empty());
        registry.stop_all();
        registry.wait_idle();
    }

    #[test]
    fn stop_all_during_setup_cancels_late_registration() {
        let backend = Arc::new(MemoryBackend::manual());
        let registry = SessionRegistry::new();

        let generation = registry.generation();
        let (_, handle) = spawn_monitor(&backend, 7);
        assert_eq!(registry.stop_all(), 0);
        registry.register_from(handle, generation);

        assert!(registry.is_empty());
        assert_eq!(
            registry.wait_idle(),
            vec![(SessionId(7), PlaybackEndReason::Stopped)]
        );
        assert_eq!(backend.stats().live_sources(), 0);
    }

    #[test]
    fn registration_after_stop_all_is_not_cancelled() {
        let backend = Arc::new(MemoryBackend::manual());
        let registry = SessionRegistry::new();
        registry.stop_all();

        let generation = registry.generation();
        let (_, handle) = spawn_monitor(&backend, 8);
        registry.register_from(handle, generation);
        assert_eq!(registry.running_sessions(), vec![SessionId(8)]);

        assert_eq!(registry.stop_all(), 1);
        registry.wait_idle();
    }

    #[test]
    fn concurrent_register_and_stop_all() {
        let backend = Arc::new(MemoryBackend::manual());
        let registry = Arc::new(SessionRegistry::new());

        let producers: Vec<_> = (0..4)
            .map(|t| {
                let backend = backend.clone();
                let registry = registry.clone();
                thread::spawn(move || {
                    for i in 0..5 {
                        registry.register(spawn_monitor(&backend, t * 100 + i).1);
                    }
                })
            })
            .collect();
        let stopper = {
            let registry = registry.clone();
            thread::spawn(move || {
                for _ in 0..5 {
                    registry.stop_all();
                    thread::sleep(Duration::from_millis(2));
                }
            })
        };
        for p in producers {
            p.join().unwrap();
        }
        stopper.join().unwrap();

        registry.stop_all();
        registry.wait_idle();
        let stats = backend.stats();
        assert_eq!(stats.sources_created, 20);
        assert_eq!(stats.live_sources(), 0);
        assert_eq!(stats.live_buffers(), 0);
    }

    #[test]
    fn cancelled_handle_reports_completion() {
        let backend = Arc::new(MemoryBackend::manual());
        let (_, handle) = spawn_monitor(&backend, 1);
        assert!(handle.cancel());
        assert_eq!(handle.join(), Some(PlaybackEndReason::Stopped));
        let (_, other) = spawn_monitor(&backend, 2);
        assert_ne!(other.state(), MonitorState::Completed);
        other.cancel();
        other.join();
    }
}
