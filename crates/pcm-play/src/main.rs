//! pcm-play: plays uncompressed WAVE files through the pcm-player pipeline.
//!
//! ## Modes
//! - `play`: start one session per file, all concurrently, and wait for them to finish.
//!   Ctrl-C stops every active session.
//! - `info`: parse a file and report what playback would upload.
//! - `list-devices`: list output devices (requires the `cpal` feature).

mod cli;
mod config;

use std::path::{Path, PathBuf};
use std::sync::Arc;
use std::thread;

use anyhow::{Context, Result, bail};
use clap::Parser;
use crossbeam_channel::Receiver;
use pcm_player::backend::AudioBackend;
use pcm_player::backend::memory::MemoryBackend;
use pcm_player::container;
use pcm_player::events::{EventSink, PlaybackEvent};
use pcm_player::player::{Player, PreparedAudio};
use tracing_subscriber::EnvFilter;

use crate::cli::BackendKind;
use crate::config::Settings;

fn main() -> Result<()> {
    let args = cli::Args::parse();
    tracing_subscriber::fmt()
        .with_env_filter(EnvFilter::try_from_default_env().unwrap_or_else(|_| {
            EnvFilter::new("info,pcm_play=info,pcm_player=info")
        }))
        .init();

    match &args.cmd {
        cli::Command::ListDevices => list_devices(),
        cli::Command::Info { path } => {
            let settings = Settings::from_args(&args)?;
            print_info(path, &settings)
        }
        cli::Command::Play { paths } => {
            let settings = Settings::from_args(&args)?;
            play_files(paths, &settings)
        }
    }
}

fn open_backend(settings: &Settings) -> Result<Arc<dyn AudioBackend>> {
    match settings.backend {
        BackendKind::Null => {
            tracing::info!("using null output");
            Ok(Arc::new(MemoryBackend::default()))
        }
        #[cfg(feature = "cpal")]
        BackendKind::Cpal => {
            let backend = pcm_player::backend::cpal::CpalBackend::open(settings.device.as_deref())
                .context("open output device")?;
            Ok(Arc::new(backend))
        }
        #[cfg(not(feature = "cpal"))]
        BackendKind::Cpal => bail!("built without the `cpal` feature; use --backend null"),
    }
}

fn play_files(paths: &[PathBuf], settings: &Settings) -> Result<()> {
    let backend = open_backend(settings)?;
    let (events, events_rx) = EventSink::channel();
    let player = Player::new(backend, settings.player.clone(), events)?;

    let registry = player.registry();
    ctrlc::set_handler(move || {
        tracing::info!("interrupted; stopping all sessions");
        registry.stop_all();
    })
    .context("install Ctrl-C handler")?;

    let logger = thread::Builder::new()
        .name("events".to_string())
        .spawn(move || log_events(events_rx))
        .context("spawn event logger")?;

    let player_ref = &player;
    let failed = thread::scope(|scope| {
        let starts: Vec<_> = paths
            .iter()
            .map(|path| (path, scope.spawn(move || player_ref.play(path))))
            .collect();
        let mut failed = 0usize;
        for (path, start) in starts {
            match start.join() {
                Ok(Ok(_)) => {}
                Ok(Err(e)) => {
                    tracing::warn!(path = %path.display(), "playback failed: {e}");
                    failed += 1;
                }
                Err(_) => {
                    tracing::warn!(path = %path.display(), "playback thread panicked");
                    failed += 1;
                }
            }
        }
        failed
    });

    let finished = player.wait_idle();
    tracing::info!(sessions = finished.len(), failed, "all sessions finished");

    // Dropping the player closes the event channel once no monitor holds a sender.
    drop(player);
    let _ = logger.join();

    if failed > 0 {
        bail!("{failed} of {} files could not be played", paths.len());
    }
    Ok(())
}

fn log_events(rx: Receiver<PlaybackEvent>) {
    for event in rx {
        match event {
            PlaybackEvent::Started { session } => tracing::info!(session = %session, "playing"),
            PlaybackEvent::Stopped { session, reason } => {
                tracing::info!(session = %session, reason = %reason, "stopped")
            }
        }
    }
}

fn print_info(path: &Path, settings: &Settings) -> Result<()> {
    let wav = container::parse_file(path).with_context(|| format!("parse {:?}", path))?;
    let prepared = PreparedAudio::from_stream(&wav, settings.player.chunk_samples);
    let desc = prepared.descriptor;

    println!("file:            {}", path.display());
    println!("channels:        {}", desc.channels);
    println!("bits per sample: {}", desc.bits_per_sample);
    println!("sample rate:     {} Hz", desc.sample_rate);
    println!("format:          {}", prepared.source_format);
    println!("upload format:   {}", prepared.upload_format);
    println!("samples:         {}", prepared.sample_count());
    println!("duration:        {} ms", desc.duration_ms(wav.payload.len()));
    println!(
        "chunks:          {} (up to {} samples each)",
        prepared.chunks.len(),
        settings.player.chunk_samples
    );
    Ok(())
}

#[cfg(feature = "cpal")]
fn list_devices() -> Result<()> {
    let names = pcm_player::backend::cpal::list_devices().context("list output devices")?;
    for (i, name) in names.iter().enumerate() {
        println!("#{i}: {name}");
    }
    Ok(())
}

#[cfg(not(feature = "cpal"))]
fn list_devices() -> Result<()> {
    bail!("built without the `cpal` feature; no devices to list")
}
