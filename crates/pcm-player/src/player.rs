//! Player facade: `play` a file, `stop_all` sessions.
//!
//! Each `play` parses and chunks the file on the caller's thread, starts a session and returns
//! once the play command is issued. Completion is reported through the [`EventSink`].

use std::io::Read;
use std::path::Path;
use std::sync::Arc;
use std::sync::atomic::{AtomicU64, Ordering};

use crate::backend::AudioBackend;
use crate::chunk::{self, SampleChunk};
use crate::config::PlayerConfig;
use crate::container::{self, StreamDescriptor, WavStream};
use crate::error::Result;
use crate::events::{EventSink, PlaybackEndReason, SessionId};
use crate::format::AudioFormat;
use crate::registry::SessionRegistry;
use crate::session::{self, SessionRequest, StartedSession};

/// A parsed stream turned into upload-ready chunks.
#[derive(Clone, Debug)]
pub struct PreparedAudio {
    pub descriptor: StreamDescriptor,
    /// Format of the source data.
    pub source_format: AudioFormat,
    /// Format the chunks are uploaded with (always 16-bit).
    pub upload_format: AudioFormat,
    pub chunks: Vec<SampleChunk>,
}

impl PreparedAudio {
    pub fn from_stream(wav: &WavStream, chunk_samples: usize) -> Self {
        let chunks = chunk::chunk_payload(
            &wav.payload,
            wav.descriptor.bits_per_sample,
            chunk_samples,
        );
        Self {
            descriptor: wav.descriptor,
            source_format: wav.format,
            upload_format: wav.format.widened(),
            chunks,
        }
    }

    pub fn sample_count(&self) -> usize {
        self.chunks.iter().map(SampleChunk::len).sum()
    }
}

pub struct Player {
    backend: Arc<dyn AudioBackend>,
    registry: Arc<SessionRegistry>,
    events: EventSink,
    config: PlayerConfig,
    next_id: AtomicU64,
}

impl Player {
    pub fn new(backend: Arc<dyn AudioBackend>, config: PlayerConfig, events: EventSink) -> Result<Self> {
        Self::with_registry(backend, config, events, Arc::new(SessionRegistry::new()))
    }

    /// Build a player around an existing registry.
    pub fn with_registry(
        backend: Arc<dyn AudioBackend>,
        config: PlayerConfig,
        events: EventSink,
        registry: Arc<SessionRegistry>,
    ) -> Result<Self> {
        config.validate()?;
        Ok(Self {
            backend,
            registry,
            events,
            config,
            next_id: AtomicU64::new(0),
        })
    }

    pub fn config(&self) -> &PlayerConfig {
        &self.config
    }

    pub fn registry(&self) -> Arc<SessionRegistry> {
        self.registry.clone()
    }

    /// Start playing a WAVE file; returns once playback has been started.
    pub fn play(&self, path: &Path) -> Result<StartedSession> {
        let wav = container::parse_file(path)?;
        tracing::info!(path = %path.display(), "play requested");
        self.play_stream(&wav)
    }

    /// Start playing a WAVE stream read from `reader`.
    pub fn play_reader<R: Read>(&self, reader: R) -> Result<StartedSession> {
        let wav = container::parse(reader)?;
        self.play_stream(&wav)
    }

    pub fn play_stream(&self, wav: &WavStream) -> Result<StartedSession> {
        let prepared = PreparedAudio::from_stream(wav, self.config.chunk_samples);
        self.play_prepared(&prepared)
    }

    pub fn play_prepared(&self, prepared: &PreparedAudio) -> Result<StartedSession> {
        let id = SessionId(self.next_id.fetch_add(1, Ordering::Relaxed).saturating_add(1));
        session::start_session(
            &self.backend,
            &self.registry,
            &self.events,
            SessionRequest {
                id,
                chunks: &prepared.chunks,
                format: prepared.upload_format,
                sample_rate: prepared.descriptor.sample_rate,
                poll_interval: self.config.poll_interval,
            },
        )
    }

    /// Cancel every active session; returns how many were signalled.
    pub fn stop_all(&self) -> usize {
        self.registry.stop_all()
    }

    /// Block until every session has released its resources.
    pub fn wait_idle(&self) -> Vec<(SessionId, PlaybackEndReason)> {
        self.registry.wait_idle()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::backend::memory::{MemoryBackend, Timing};
    use crate::backend::{BufferHandle, SourceHandle};
    use crate::error::PlayerError;
    use crate::events::PlaybackEvent;
    use crate::testutil::{WavBuilder, write_temp_file};
    use std::collections::HashSet;
    use std::thread;
    use std::time::{Duration, Instant};

    fn test_config() -> PlayerConfig {
        PlayerConfig {
            chunk_samples: 8,
            poll_interval: Duration::from_millis(10),
        }
    }

    fn player_with(memory: &Arc<MemoryBackend>) -> (Player, crossbeam_channel::Receiver<PlaybackEvent>) {
        let (events, rx) = EventSink::channel();
        let player = Player::new(memory.clone(), test_config(), events).unwrap();
        (player, rx)
    }

    #[test]
    fn play_reader_uploads_stereo_samples_in_order() {
        let memory = Arc::new(MemoryBackend::manual());
        let (player, _rx) = player_with(&memory);
        let samples: Vec<i16> = (0..20).map(|i| i * 100 - 1_000).collect();
        let bytes = WavBuilder::new(2, 44_100, 16).samples_i16(&samples).build();

        let started = player.play_reader(bytes.as_slice()).unwrap();
        assert_eq!(started.buffers.len(), 3);

        let uploaded: Vec<i16> = started
            .buffers
            .iter()
            .flat_map(|b| memory.buffer_samples(*b).unwrap())
            .collect();
        assert_eq!(uploaded, samples);

        player.stop_all();
        player.wait_idle();
    }

    #[test]
    fn eight_bit_file_is_uploaded_widened() {
        let memory = Arc::new(MemoryBackend::manual());
        let (player, _rx) = player_with(&memory);
        let bytes = WavBuilder::new(1, 8_000, 8).payload(&[128, 255, 0]).build();

        let started = player.play_reader(bytes.as_slice()).unwrap();
        assert_eq!(started.buffers.len(), 1);
        assert_eq!(
            memory.buffer_format(started.buffers[0]),
            Some((AudioFormat::Mono16, 8_000))
        );
        assert_eq!(
            memory.buffer_samples(started.buffers[0]).unwrap(),
            vec![0, 127 << 8, i16::MIN]
        );
        player.stop_all();
        player.wait_idle();
    }

    #[test]
    fn play_from_file_completes_naturally() {
        let memory = Arc::new(MemoryBackend::new(Timing::Realtime));
        let (player, rx) = player_with(&memory);
        // 40 mono frames at 1 kHz: 40 ms of audio.
        let bytes = WavBuilder::new(1, 1_000, 16).samples_i16(&[7; 40]).build();
        let path = write_temp_file("play_from_file_completes_naturally.wav", &bytes);

        let started = player.play(&path).unwrap();
        let finished = player.wait_idle();
        assert_eq!(finished, vec![(started.id, PlaybackEndReason::Eof)]);

        let events: Vec<PlaybackEvent> = rx.try_iter().collect();
        assert_eq!(
            events,
            vec![
                PlaybackEvent::Started {
                    session: started.id
                },
                PlaybackEvent::Stopped {
                    session: started.id,
                    reason: PlaybackEndReason::Eof
                },
            ]
        );
        let stats = memory.stats();
        assert_eq!(stats.live_buffers(), 0);
        assert_eq!(stats.live_sources(), 0);
        let _ = std::fs::remove_file(path);
    }

    #[test]
    fn failed_parse_leaves_no_state() {
        let memory = Arc::new(MemoryBackend::manual());
        let (player, rx) = player_with(&memory);

        let err = player.play_reader(&b"NOPE"[..]).unwrap_err();
        assert!(matches!(err, PlayerError::MalformedContainer(_)));
        let bytes = WavBuilder::new(4, 44_100, 16).payload(&[0; 8]).build();
        let err = player.play_reader(bytes.as_slice()).unwrap_err();
        assert!(matches!(err, PlayerError::UnsupportedFormat { .. }));

        assert_eq!(memory.stats(), Default::default());
        assert!(player.registry().is_empty());
        assert!(rx.try_recv().is_err());
    }

    #[test]
    fn empty_data_chunk_is_rejected() {
        let memory = Arc::new(MemoryBackend::manual());
        let (player, _rx) = player_with(&memory);
        let bytes = WavBuilder::new(2, 44_100, 16).payload(&[]).build();
        assert!(matches!(
            player.play_reader(bytes.as_slice()),
            Err(PlayerError::EmptyPayload)
        ));
        assert_eq!(memory.stats().buffers_created, 0);
    }

    #[test]
    fn exhaustion_fails_the_request_only() {
        let memory = Arc::new(MemoryBackend::manual().with_source_limit(1));
        let (player, _rx) = player_with(&memory);
        let bytes = WavBuilder::new(1, 8_000, 16).samples_i16(&[1; 16]).build();

        let first = player.play_reader(bytes.as_slice()).unwrap();
        let err = player.play_reader(bytes.as_slice()).unwrap_err();
        assert!(matches!(err, PlayerError::ResourceExhausted(_)));
        assert_eq!(player.registry().running_sessions(), vec![first.id]);
        assert_eq!(memory.stats().live_buffers(), first.buffers.len());

        assert_eq!(player.stop_all(), 1);
        player.wait_idle();
        assert_eq!(memory.stats().live_buffers(), 0);
    }

    #[test]
    fn concurrent_plays_use_disjoint_handles() {
        let memory = Arc::new(MemoryBackend::manual());
        let (player, _rx) = player_with(&memory);
        let player = Arc::new(player);

        let workers: Vec<_> = [2u16, 1u16]
            .into_iter()
            .map(|channels| {
                let player = player.clone();
                thread::spawn(move || {
                    let bytes = WavBuilder::new(channels, 22_050, 16)
                        .samples_i16(&[3; 50])
                        .build();
                    player.play_reader(bytes.as_slice()).unwrap()
                })
            })
            .collect();
        let sessions: Vec<StartedSession> =
            workers.into_iter().map(|w| w.join().unwrap()).collect();

        assert_ne!(sessions[0].id, sessions[1].id);
        assert_ne!(sessions[0].source, sessions[1].source);
        let a: HashSet<BufferHandle> = sessions[0].buffers.iter().copied().collect();
        let b: HashSet<BufferHandle> = sessions[1].buffers.iter().copied().collect();
        assert!(a.is_disjoint(&b));
        let sources: Vec<SourceHandle> = memory.live_sources();
        assert_eq!(sources.len(), 2);

        // Each session progresses independently.
        memory.finish_source(sessions[0].source);
        let deadline = Instant::now() + Duration::from_secs(2);
        while player.registry().running_sessions().len() != 1 && Instant::now() < deadline {
            thread::sleep(Duration::from_millis(5));
        }
        assert_eq!(player.registry().running_sessions(), vec![sessions[1].id]);

        assert_eq!(player.stop_all(), 1);
        player.wait_idle();
        assert_eq!(memory.stats().live_sources(), 0);
    }

    #[test]
    fn invalid_config_is_rejected() {
        let memory = Arc::new(MemoryBackend::manual());
        let config = PlayerConfig {
            chunk_samples: 3,
            ..PlayerConfig::default()
        };
        assert!(matches!(
            Player::new(memory, config, EventSink::disabled()),
            Err(PlayerError::Config(_))
        ));
    }
}
