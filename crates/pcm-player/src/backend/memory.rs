//! Headless in-memory backend.
//!
//! Emulates buffer/source bookkeeping without a device. With [`Timing::Realtime`] a playing
//! source reports [`SourceState::Stopped`] once the wall-clock length of its queue has
//! elapsed, which makes it a drop-in "null output". With [`Timing::Manual`] sources play until
//! [`MemoryBackend::finish_source`] is called, which tests use to drive monitors precisely.
//!
//! Every allocation and release is counted so leaks and double frees are observable.

use std::collections::{HashMap, HashSet};
use std::sync::{Mutex, MutexGuard};
use std::time::{Duration, Instant};

use super::{AudioBackend, BackendError, BufferHandle, SourceHandle, SourceState};
use crate::format::AudioFormat;

/// How a playing source decides it has reached the end of its queue.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum Timing {
    Realtime,
    Manual,
}

/// Allocation and call counters.
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq)]
pub struct MemoryStats {
    pub buffers_created: usize,
    pub buffers_deleted: usize,
    pub sources_created: usize,
    pub sources_deleted: usize,
    pub uploads: usize,
    pub plays: usize,
    pub stops: usize,
    pub state_queries: usize,
    /// Deletes of unknown or already deleted handles.
    pub invalid_deletes: usize,
}

impl MemoryStats {
    pub fn live_buffers(&self) -> usize {
        self.buffers_created - self.buffers_deleted
    }

    pub fn live_sources(&self) -> usize {
        self.sources_created - self.sources_deleted
    }
}

struct BufferData {
    format: Option<AudioFormat>,
    sample_rate: u32,
    samples: Vec<i16>,
    queued_on: Option<SourceHandle>,
}

struct SourceData {
    queue: Vec<BufferHandle>,
    state: SourceState,
    started_at: Option<Instant>,
    length: Duration,
}

#[derive(Default)]
struct Inner {
    next_id: u32,
    buffers: HashMap<BufferHandle, BufferData>,
    sources: HashMap<SourceHandle, SourceData>,
    max_live_buffers: Option<usize>,
    max_live_sources: Option<usize>,
    failing_queries: HashSet<SourceHandle>,
    stats: MemoryStats,
}

impl Inner {
    fn mint(&mut self) -> u32 {
        self.next_id += 1;
        self.next_id
    }

    fn refresh(&mut self, timing: Timing, source: SourceHandle) {
        if timing != Timing::Realtime {
            return;
        }
        if let Some(src) = self.sources.get_mut(&source) {
            if src.state == SourceState::Playing {
                let done = src
                    .started_at
                    .map(|t| t.elapsed() >= src.length)
                    .unwrap_or(false);
                if done {
                    src.state = SourceState::Stopped;
                }
            }
        }
    }
}

pub struct MemoryBackend {
    timing: Timing,
    inner: Mutex<Inner>,
}

impl Default for MemoryBackend {
    fn default() -> Self {
        Self::new(Timing::Realtime)
    }
}

impl MemoryBackend {
    pub fn new(timing: Timing) -> Self {
        Self {
            timing,
            inner: Mutex::new(Inner::default()),
        }
    }

    /// Backend whose sources only stop via [`MemoryBackend::finish_source`].
    pub fn manual() -> Self {
        Self::new(Timing::Manual)
    }

    /// Cap the number of simultaneously live buffers.
    pub fn with_buffer_limit(self, max: usize) -> Self {
        self.lock().max_live_buffers = Some(max);
        self
    }

    /// Cap the number of simultaneously live sources.
    pub fn with_source_limit(self, max: usize) -> Self {
        self.lock().max_live_sources = Some(max);
        self
    }

    pub fn stats(&self) -> MemoryStats {
        self.lock().stats
    }

    /// Mark a source as having played its whole queue.
    pub fn finish_source(&self, source: SourceHandle) {
        if let Some(src) = self.lock().sources.get_mut(&source) {
            src.state = SourceState::Stopped;
        }
    }

    /// Make every later state query for `source` fail.
    pub fn fail_state_queries(&self, source: SourceHandle) {
        self.lock().failing_queries.insert(source);
    }

    /// Live source handles, in ascending id order.
    pub fn live_sources(&self) -> Vec<SourceHandle> {
        let mut out: Vec<SourceHandle> = self.lock().sources.keys().copied().collect();
        out.sort();
        out
    }

    /// Buffers queued on `source`, in queue order.
    pub fn queued_buffers(&self, source: SourceHandle) -> Option<Vec<BufferHandle>> {
        self.lock().sources.get(&source).map(|s| s.queue.clone())
    }

    /// Samples uploaded into `buffer`, if it is still live.
    pub fn buffer_samples(&self, buffer: BufferHandle) -> Option<Vec<i16>> {
        self.lock().buffers.get(&buffer).map(|b| b.samples.clone())
    }

    /// Format and rate `buffer` was uploaded with.
    pub fn buffer_format(&self, buffer: BufferHandle) -> Option<(AudioFormat, u32)> {
        let inner = self.lock();
        let data = inner.buffers.get(&buffer)?;
        data.format.map(|f| (f, data.sample_rate))
    }

    fn lock(&self) -> MutexGuard<'_, Inner> {
        self.inner.lock().unwrap_or_else(|err| err.into_inner())
    }
}

impl AudioBackend for MemoryBackend {
    fn create_buffers(&self, count: usize) -> Result<Vec<BufferHandle>, BackendError> {
        let mut inner = self.lock();
        if let Some(max) = inner.max_live_buffers {
            if inner.buffers.len() + count > max {
                return Err(BackendError::OutOfResources(format!(
                    "cannot allocate {count} buffers ({} of {max} in use)",
                    inner.buffers.len()
                )));
            }
        }
        let mut out = Vec::with_capacity(count);
        for _ in 0..count {
            let handle = BufferHandle(inner.mint());
            inner.buffers.insert(
                handle,
                BufferData {
                    format: None,
                    sample_rate: 0,
                    samples: Vec::new(),
                    queued_on: None,
                },
            );
            out.push(handle);
        }
        inner.stats.buffers_created += count;
        Ok(out)
    }

    fn upload(
        &self,
        buffer: BufferHandle,
        format: AudioFormat,
        samples: &[i16],
        sample_rate: u32,
    ) -> Result<(), BackendError> {
        let mut inner = self.lock();
        let data = inner
            .buffers
            .get_mut(&buffer)
            .ok_or(BackendError::InvalidHandle(buffer.0))?;
        if data.queued_on.is_some() {
            return Err(BackendError::Device(format!("{buffer} is queued")));
        }
        data.format = Some(format);
        data.sample_rate = sample_rate;
        data.samples = samples.to_vec();
        inner.stats.uploads += 1;
        Ok(())
    }

    fn create_source(&self) -> Result<SourceHandle, BackendError> {
        let mut inner = self.lock();
        if let Some(max) = inner.max_live_sources {
            if inner.sources.len() >= max {
                return Err(BackendError::OutOfResources(format!(
                    "all {max} sources in use"
                )));
            }
        }
        let handle = SourceHandle(inner.mint());
        inner.sources.insert(
            handle,
            SourceData {
                queue: Vec::new(),
                state: SourceState::Initial,
                started_at: None,
                length: Duration::ZERO,
            },
        );
        inner.stats.sources_created += 1;
        Ok(handle)
    }

    fn queue_buffers(
        &self,
        source: SourceHandle,
        buffers: &[BufferHandle],
    ) -> Result<(), BackendError> {
        let mut inner = self.lock();
        if !inner.sources.contains_key(&source) {
            return Err(BackendError::InvalidHandle(source.0));
        }
        let mut added = Duration::ZERO;
        for b in buffers {
            let data = inner
                .buffers
                .get(b)
                .ok_or(BackendError::InvalidHandle(b.0))?;
            if data.queued_on.is_some() {
                return Err(BackendError::Device(format!("{b} is already queued")));
            }
            let channels = data.format.map(|f| f.channels()).unwrap_or(1);
            if data.sample_rate > 0 {
                let frames = data.samples.len() as u64 / u64::from(channels);
                added += Duration::from_micros(frames * 1_000_000 / u64::from(data.sample_rate));
            }
        }
        for b in buffers {
            if let Some(data) = inner.buffers.get_mut(b) {
                data.queued_on = Some(source);
            }
        }
        if let Some(src) = inner.sources.get_mut(&source) {
            src.queue.extend_from_slice(buffers);
            src.length += added;
        }
        Ok(())
    }

    fn play(&self, source: SourceHandle) -> Result<(), BackendError> {
        let mut inner = self.lock();
        let src = inner
            .sources
            .get_mut(&source)
            .ok_or(BackendError::InvalidHandle(source.0))?;
        src.state = SourceState::Playing;
        src.started_at = Some(Instant::now());
        inner.stats.plays += 1;
        Ok(())
    }

    fn source_state(&self, source: SourceHandle) -> Result<SourceState, BackendError> {
        let mut inner = self.lock();
        inner.stats.state_queries += 1;
        if inner.failing_queries.contains(&source) {
            return Err(BackendError::Device(format!("{source} state unavailable")));
        }
        inner.refresh(self.timing, source);
        inner
            .sources
            .get(&source)
            .map(|s| s.state)
            .ok_or(BackendError::InvalidHandle(source.0))
    }

    fn stop_source(&self, source: SourceHandle) -> Result<(), BackendError> {
        let mut inner = self.lock();
        let src = inner
            .sources
            .get_mut(&source)
            .ok_or(BackendError::InvalidHandle(source.0))?;
        src.state = SourceState::Stopped;
        inner.stats.stops += 1;
        Ok(())
    }

    fn delete_source(&self, source: SourceHandle) -> Result<(), BackendError> {
        let mut inner = self.lock();
        let Some(src) = inner.sources.remove(&source) else {
            inner.stats.invalid_deletes += 1;
            return Err(BackendError::InvalidHandle(source.0));
        };
        for b in &src.queue {
            if let Some(data) = inner.buffers.get_mut(b) {
                data.queued_on = None;
            }
        }
        inner.failing_queries.remove(&source);
        inner.stats.sources_deleted += 1;
        Ok(())
    }

    fn delete_buffers(&self, buffers: &[BufferHandle]) -> Result<(), BackendError> {
        let mut inner = self.lock();
        for b in buffers {
            match inner.buffers.get(b) {
                None => {
                    inner.stats.invalid_deletes += 1;
                    return Err(BackendError::InvalidHandle(b.0));
                }
                Some(data) if data.queued_on.is_some() => {
                    return Err(BackendError::Device(format!("{b} is still queued")));
                }
                Some(_) => {}
            }
        }
        for b in buffers {
            inner.buffers.remove(b);
        }
        inner.stats.buffers_deleted += buffers.len();
        Ok(())
    }
}
