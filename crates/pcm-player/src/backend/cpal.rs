//! CPAL output backend.
//!
//! Buffers live in memory; each played source becomes one CPAL output stream that walks the
//! source's queue and flips the source state to [`SourceState::Stopped`] once the queue is
//! drained. Streams are created and dropped on a dedicated device thread since CPAL streams
//! are not `Send` on every host.
//!
//! The callback:
//! - maps mono↔stereo (best-effort for other layouts)
//! - steps through source frames at `src_rate / device_rate` (nearest frame, no filtering)
//! - converts to the device sample format

use std::collections::HashMap;
use std::sync::atomic::{AtomicU8, AtomicU32, Ordering};
use std::sync::{Arc, Mutex, MutexGuard};
use std::thread::{self, JoinHandle};

use cpal::traits::{DeviceTrait, HostTrait, StreamTrait};
use crossbeam_channel::{Receiver, Sender};

use super::{AudioBackend, BackendError, BufferHandle, SourceHandle, SourceState};
use crate::format::AudioFormat;

struct BufferEntry {
    upload: Option<Upload>,
}

#[derive(Clone)]
struct Upload {
    format: AudioFormat,
    sample_rate: u32,
    samples: Arc<Vec<i16>>,
}

struct SourceEntry {
    queue: Vec<BufferHandle>,
    state: Arc<AtomicU8>,
}

enum DeviceCommand {
    Start {
        source: SourceHandle,
        voice: Voice,
        reply: Sender<Result<(), BackendError>>,
    },
    Stop {
        source: SourceHandle,
    },
    Shutdown,
}

pub struct CpalBackend {
    device_name: String,
    next_id: AtomicU32,
    buffers: Mutex<HashMap<BufferHandle, BufferEntry>>,
    sources: Mutex<HashMap<SourceHandle, SourceEntry>>,
    commands: Sender<DeviceCommand>,
    worker: Mutex<Option<JoinHandle<()>>>,
}

impl CpalBackend {
    /// Open the default output device, or the first whose name contains `needle`.
    pub fn open(needle: Option<&str>) -> Result<Self, BackendError> {
        let needle = needle.map(str::to_owned);
        let (cmd_tx, cmd_rx) = crossbeam_channel::unbounded();
        let (ready_tx, ready_rx) = crossbeam_channel::bounded(1);

        let worker = thread::Builder::new()
            .name("cpal-device".to_string())
            .spawn(move || {
                let host = cpal::default_host();
                let device = match pick_device(&host, needle.as_deref()) {
                    Ok(device) => device,
                    Err(err) => {
                        let _ = ready_tx.send(Err(err));
                        return;
                    }
                };
                let name = device
                    .description()
                    .map(|d| d.to_string())
                    .unwrap_or_else(|_| "<unknown>".to_string());
                let _ = ready_tx.send(Ok(name));
                run_device(&device, cmd_rx);
            })
            .map_err(|err| BackendError::Device(format!("spawn device thread: {err}")))?;

        let device_name = ready_rx
            .recv()
            .map_err(|_| BackendError::Device("device thread exited".to_string()))??;
        tracing::info!(device = %device_name, "output device opened");

        Ok(Self {
            device_name,
            next_id: AtomicU32::new(0),
            buffers: Mutex::new(HashMap::new()),
            sources: Mutex::new(HashMap::new()),
            commands: cmd_tx,
            worker: Mutex::new(Some(worker)),
        })
    }

    pub fn device_name(&self) -> &str {
        &self.device_name
    }

    fn mint(&self) -> u32 {
        self.next_id.fetch_add(1, Ordering::Relaxed) + 1
    }

    fn send(&self, cmd: DeviceCommand) -> Result<(), BackendError> {
        self.commands
            .send(cmd)
            .map_err(|_| BackendError::Device("device thread exited".to_string()))
    }
}

impl Drop for CpalBackend {
    fn drop(&mut self) {
        let _ = self.commands.send(DeviceCommand::Shutdown);
        if let Some(worker) = lock(&self.worker).take() {
            let _ = worker.join();
        }
    }
}

impl AudioBackend for CpalBackend {
    fn create_buffers(&self, count: usize) -> Result<Vec<BufferHandle>, BackendError> {
        let mut buffers = lock(&self.buffers);
        let handles: Vec<BufferHandle> = (0..count).map(|_| BufferHandle(self.mint())).collect();
        for handle in &handles {
            buffers.insert(*handle, BufferEntry { upload: None });
        }
        Ok(handles)
    }

    fn upload(
        &self,
        buffer: BufferHandle,
        format: AudioFormat,
        samples: &[i16],
        sample_rate: u32,
    ) -> Result<(), BackendError> {
        let mut buffers = lock(&self.buffers);
        let entry = buffers
            .get_mut(&buffer)
            .ok_or(BackendError::InvalidHandle(buffer.0))?;
        entry.upload = Some(Upload {
            format,
            sample_rate,
            samples: Arc::new(samples.to_vec()),
        });
        Ok(())
    }

    fn create_source(&self) -> Result<SourceHandle, BackendError> {
        let handle = SourceHandle(self.mint());
        lock(&self.sources).insert(
            handle,
            SourceEntry {
                queue: Vec::new(),
                state: Arc::new(AtomicU8::new(encode_state(SourceState::Initial))),
            },
        );
        Ok(handle)
    }

    fn queue_buffers(
        &self,
        source: SourceHandle,
        buffers: &[BufferHandle],
    ) -> Result<(), BackendError> {
        {
            let known = lock(&self.buffers);
            if let Some(missing) = buffers.iter().find(|b| !known.contains_key(b)) {
                return Err(BackendError::InvalidHandle(missing.0));
            }
        }
        let mut sources = lock(&self.sources);
        let entry = sources
            .get_mut(&source)
            .ok_or(BackendError::InvalidHandle(source.0))?;
        entry.queue.extend_from_slice(buffers);
        Ok(())
    }

    fn play(&self, source: SourceHandle) -> Result<(), BackendError> {
        let (queue, state) = {
            let sources = lock(&self.sources);
            let entry = sources
                .get(&source)
                .ok_or(BackendError::InvalidHandle(source.0))?;
            (entry.queue.clone(), entry.state.clone())
        };

        let uploads: Vec<Upload> = {
            let buffers = lock(&self.buffers);
            queue
                .iter()
                .filter_map(|b| buffers.get(b).and_then(|e| e.upload.clone()))
                .collect()
        };
        let Some(first) = uploads.first() else {
            // Nothing queued: the source is immediately done.
            state.store(encode_state(SourceState::Stopped), Ordering::Release);
            return Ok(());
        };
        let (format, sample_rate) = (first.format, first.sample_rate);
        let chunks = uploads.into_iter().map(|u| u.samples).collect();

        state.store(encode_state(SourceState::Playing), Ordering::Release);
        let voice = Voice::new(chunks, usize::from(format.channels()), sample_rate, state.clone());
        let (reply_tx, reply_rx) = crossbeam_channel::bounded(1);
        self.send(DeviceCommand::Start {
            source,
            voice,
            reply: reply_tx,
        })?;
        let res = reply_rx
            .recv()
            .map_err(|_| BackendError::Device("device thread exited".to_string()))?;
        if res.is_err() {
            state.store(encode_state(SourceState::Stopped), Ordering::Release);
        }
        res
    }

    fn source_state(&self, source: SourceHandle) -> Result<SourceState, BackendError> {
        let sources = lock(&self.sources);
        let entry = sources
            .get(&source)
            .ok_or(BackendError::InvalidHandle(source.0))?;
        Ok(decode_state(entry.state.load(Ordering::Acquire)))
    }

    fn stop_source(&self, source: SourceHandle) -> Result<(), BackendError> {
        {
            let sources = lock(&self.sources);
            let entry = sources
                .get(&source)
                .ok_or(BackendError::InvalidHandle(source.0))?;
            entry
                .state
                .store(encode_state(SourceState::Stopped), Ordering::Release);
        }
        self.send(DeviceCommand::Stop { source })
    }

    fn delete_source(&self, source: SourceHandle) -> Result<(), BackendError> {
        lock(&self.sources)
            .remove(&source)
            .ok_or(BackendError::InvalidHandle(source.0))?;
        self.send(DeviceCommand::Stop { source })
    }

    fn delete_buffers(&self, buffers: &[BufferHandle]) -> Result<(), BackendError> {
        let mut known = lock(&self.buffers);
        if let Some(missing) = buffers.iter().find(|b| !known.contains_key(b)) {
            return Err(BackendError::InvalidHandle(missing.0));
        }
        for buffer in buffers {
            known.remove(buffer);
        }
        Ok(())
    }
}

/// Pick the first output device whose name contains `needle` (case-insensitive), or the default
/// device.
pub fn pick_device(host: &cpal::Host, needle: Option<&str>) -> Result<cpal::Device, BackendError> {
    if let Some(needle) = needle {
        let mut devices = host
            .output_devices()
            .map_err(|err| BackendError::Device(format!("no output devices: {err}")))?;
        return devices
            .find(|d| {
                d.description()
                    .map(|n| matches_device_name(&n.to_string(), needle))
                    .unwrap_or(false)
            })
            .ok_or_else(|| BackendError::Device(format!("no output device matched: {needle}")));
    }

    host.default_output_device()
        .ok_or_else(|| BackendError::Device("no default output device".to_string()))
}

/// Names of the host's output devices.
pub fn list_devices() -> Result<Vec<String>, BackendError> {
    let host = cpal::default_host();
    let devices = host
        .output_devices()
        .map_err(|err| BackendError::Device(format!("no output devices: {err}")))?;
    Ok(devices
        .filter_map(|d| d.description().ok().map(|n| n.to_string()))
        .collect())
}

/// Choose the output config closest to `target_rate`.
///
/// Prefers a range containing the rate exactly, then the nearest rate; ties go to the better
/// sample format.
fn pick_output_config(
    device: &cpal::Device,
    target_rate: u32,
) -> Result<cpal::SupportedStreamConfig, BackendError> {
    let ranges = device
        .supported_output_configs()
        .map_err(|err| BackendError::Device(format!("query output configs: {err}")))?;

    let mut best: Option<(u32, u8, cpal::SupportedStreamConfig)> = None;
    for range in ranges {
        let rate = target_rate.clamp(range.min_sample_rate(), range.max_sample_rate());
        let distance = rate.abs_diff(target_rate);
        let rank = sample_format_rank(range.sample_format());
        let better = match &best {
            None => true,
            Some((d, r, _)) => (distance, rank) < (*d, *r),
        };
        if better {
            best = Some((distance, rank, range.with_sample_rate(rate)));
        }
    }
    best.map(|(_, _, cfg)| cfg)
        .ok_or_else(|| BackendError::Device("no supported output configs".to_string()))
}

fn sample_format_rank(format: cpal::SampleFormat) -> u8 {
    match format {
        cpal::SampleFormat::F32 => 0,
        cpal::SampleFormat::I16 => 1,
        cpal::SampleFormat::I32 => 2,
        cpal::SampleFormat::U16 => 3,
        _ => 10,
    }
}

fn matches_device_name(name: &str, needle: &str) -> bool {
    let needle = needle.trim();
    if needle.is_empty() {
        return false;
    }
    name.to_lowercase().contains(&needle.to_lowercase())
}

fn run_device(device: &cpal::Device, commands: Receiver<DeviceCommand>) {
    let mut streams: HashMap<SourceHandle, cpal::Stream> = HashMap::new();
    while let Ok(cmd) = commands.recv() {
        match cmd {
            DeviceCommand::Start {
                source,
                voice,
                reply,
            } => {
                let res = open_stream(device, voice).map(|stream| {
                    streams.insert(source, stream);
                });
                let _ = reply.send(res);
            }
            DeviceCommand::Stop { source } => {
                if streams.remove(&source).is_some() {
                    tracing::debug!(source = %source, "output stream closed");
                }
            }
            DeviceCommand::Shutdown => break,
        }
    }
    tracing::debug!(open = streams.len(), "device thread exiting");
}

fn open_stream(device: &cpal::Device, mut voice: Voice) -> Result<cpal::Stream, BackendError> {
    let supported = pick_output_config(device, voice.src_rate)?;
    let sample_format = supported.sample_format();
    let config = supported.config();
    voice.set_output_rate(config.sample_rate);
    if config.sample_rate != voice.src_rate {
        tracing::warn!(
            src_hz = voice.src_rate,
            device_hz = config.sample_rate,
            "device rate differs; stepping frames"
        );
    }

    let stream = match sample_format {
        cpal::SampleFormat::F32 => build_stream::<f32>(device, &config, voice),
        cpal::SampleFormat::I16 => build_stream::<i16>(device, &config, voice),
        cpal::SampleFormat::I32 => build_stream::<i32>(device, &config, voice),
        cpal::SampleFormat::U16 => build_stream::<u16>(device, &config, voice),
        other => Err(BackendError::Device(format!(
            "unsupported sample format: {other:?}"
        ))),
    }?;
    stream
        .play()
        .map_err(|err| BackendError::Device(format!("start stream: {err}")))?;
    Ok(stream)
}

fn build_stream<T>(
    device: &cpal::Device,
    config: &cpal::StreamConfig,
    mut voice: Voice,
) -> Result<cpal::Stream, BackendError>
where
    T: cpal::Sample + cpal::SizedSample + cpal::FromSample<f32>,
{
    let channels_out = usize::from(config.channels).max(1);
    let mut frame = vec![0.0f32; channels_out];
    let err_fn = |err| tracing::warn!("stream error: {err}");

    device
        .build_output_stream(
            config,
            move |data: &mut [T], _| {
                for out in data.chunks_mut(channels_out) {
                    if !voice.next_frame(&mut frame) {
                        frame.fill(0.0);
                    }
                    for (dst, src) in out.iter_mut().zip(&frame) {
                        *dst = <T as cpal::Sample>::from_sample::<f32>(*src);
                    }
                }
            },
            err_fn,
            None,
        )
        .map_err(|err| BackendError::Device(format!("build output stream: {err}")))
}

/// Read cursor over a source's queued chunks.
struct Voice {
    chunks: Vec<Arc<Vec<i16>>>,
    src_channels: usize,
    src_rate: u32,
    /// Source frames advanced per output frame.
    step: f64,
    chunk: usize,
    /// Fractional frame position inside `chunks[chunk]`.
    pos: f64,
    state: Arc<AtomicU8>,
}

impl Voice {
    fn new(
        chunks: Vec<Arc<Vec<i16>>>,
        src_channels: usize,
        src_rate: u32,
        state: Arc<AtomicU8>,
    ) -> Self {
        Self {
            chunks,
            src_channels: src_channels.max(1),
            src_rate,
            step: 1.0,
            chunk: 0,
            pos: 0.0,
            state,
        }
    }

    fn set_output_rate(&mut self, rate: u32) {
        if rate > 0 {
            self.step = f64::from(self.src_rate) / f64::from(rate);
        }
    }

    fn frames_in(&self, chunk: usize) -> usize {
        self.chunks[chunk].len() / self.src_channels
    }

    /// Write the next output frame into `out`; returns `false` once the queue is drained.
    fn next_frame(&mut self, out: &mut [f32]) -> bool {
        while self.chunk < self.chunks.len() && self.pos as usize >= self.frames_in(self.chunk) {
            self.pos -= self.frames_in(self.chunk) as f64;
            self.chunk += 1;
        }
        if self.chunk >= self.chunks.len() {
            self.state
                .store(encode_state(SourceState::Stopped), Ordering::Release);
            return false;
        }

        let start = self.pos as usize * self.src_channels;
        let samples = &self.chunks[self.chunk][start..start + self.src_channels];
        map_channels(samples, out);
        self.pos += self.step;
        true
    }
}

/// Map one interleaved source frame onto the output channels.
///
/// Mono is duplicated, stereo to mono is averaged, other layouts clamp to the last source
/// channel.
fn map_channels(src: &[i16], out: &mut [f32]) {
    let get = |ch: usize| f32::from(src[ch.min(src.len() - 1)]) / 32_768.0;
    let dst_channels = out.len();
    for (ch, dst) in out.iter_mut().enumerate() {
        *dst = match (src.len(), dst_channels) {
            (2, 1) => 0.5 * (get(0) + get(1)),
            (1, _) => get(0),
            _ => get(ch),
        };
    }
}

fn encode_state(state: SourceState) -> u8 {
    match state {
        SourceState::Initial => 0,
        SourceState::Playing => 1,
        SourceState::Paused => 2,
        SourceState::Stopped => 3,
    }
}

fn decode_state(raw: u8) -> SourceState {
    match raw {
        0 => SourceState::Initial,
        1 => SourceState::Playing,
        2 => SourceState::Paused,
        _ => SourceState::Stopped,
    }
}

fn lock<T>(m: &Mutex<T>) -> MutexGuard<'_, T> {
    m.lock().unwrap_or_else(|err| err.into_inner())
}
