use std::path::PathBuf;

use clap::{Parser, Subcommand, ValueEnum};
use serde::Deserialize;

#[derive(Parser, Debug)]
#[command(name = "pcm-play", version)]
pub struct Args {
    #[command(subcommand)]
    pub cmd: Command,

    /// TOML config file; flags override its values
    #[arg(long)]
    pub config: Option<PathBuf>,

    /// Output backend
    #[arg(long, value_enum)]
    pub backend: Option<BackendKind>,

    /// Use a specific output device by substring match
    #[arg(long)]
    pub device: Option<String>,

    /// Samples per hardware buffer (interleaved, must be even)
    #[arg(long)]
    pub chunk_samples: Option<usize>,

    /// Completion/cancel poll interval in milliseconds
    #[arg(long)]
    pub poll_interval_ms: Option<u64>,
}

#[derive(Subcommand, Debug)]
pub enum Command {
    /// Play one or more WAVE files concurrently
    Play {
        /// Paths to PCM WAVE files
        #[arg(required = true)]
        paths: Vec<PathBuf>,
    },

    /// Print what playback would do with a file, without playing it
    Info {
        path: PathBuf,
    },

    /// List output devices and exit
    ListDevices,
}

#[derive(Clone, Copy, Debug, PartialEq, Eq, ValueEnum, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum BackendKind {
    /// Headless output that only keeps time
    Null,
    /// System audio device
    Cpal,
}

impl Default for BackendKind {
    fn default() -> Self {
        if cfg!(feature = "cpal") {
            BackendKind::Cpal
        } else {
            BackendKind::Null
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn parses_play_with_flags() {
        let args = Args::try_parse_from([
            "pcm-play",
            "--backend",
            "null",
            "--chunk-samples",
            "4096",
            "play",
            "a.wav",
            "b.wav",
        ])
        .unwrap();
        assert_eq!(args.backend, Some(BackendKind::Null));
        assert_eq!(args.chunk_samples, Some(4096));
        match args.cmd {
            Command::Play { paths } => {
                assert_eq!(paths, vec![PathBuf::from("a.wav"), PathBuf::from("b.wav")])
            }
            other => panic!("unexpected command {other:?}"),
        }
    }

    #[test]
    fn play_requires_a_path() {
        assert!(Args::try_parse_from(["pcm-play", "play"]).is_err());
    }

    #[test]
    fn parses_list_devices() {
        let args = Args::try_parse_from(["pcm-play", "list-devices"]).unwrap();
        assert!(matches!(args.cmd, Command::ListDevices));
        assert_eq!(args.backend, None);
    }
}
