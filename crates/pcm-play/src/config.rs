//! Settings resolution: built-in defaults, then the TOML file, then command-line flags.

use std::path::Path;
use std::time::Duration;

use anyhow::{Context, Result};
use pcm_player::config::PlayerConfig;
use serde::Deserialize;

use crate::cli::{Args, BackendKind};

/// Optional settings file.
///
/// ```toml
/// backend = "cpal"
/// device = "usb"
/// chunk_samples = 16384
/// poll_interval_ms = 100
/// ```
#[derive(Debug, Default, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct FileConfig {
    pub backend: Option<BackendKind>,
    pub device: Option<String>,
    pub chunk_samples: Option<usize>,
    pub poll_interval_ms: Option<u64>,
}

impl FileConfig {
    pub fn load(path: &Path) -> Result<Self> {
        let raw =
            std::fs::read_to_string(path).with_context(|| format!("read config {:?}", path))?;
        let cfg = toml::from_str::<FileConfig>(&raw)
            .with_context(|| format!("parse config {:?}", path))?;
        Ok(cfg)
    }
}

/// Fully resolved settings for one run.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct Settings {
    pub backend: BackendKind,
    pub device: Option<String>,
    pub player: PlayerConfig,
}

impl Settings {
    /// Load `--config` (if given) and layer the flags over it.
    pub fn from_args(args: &Args) -> Result<Self> {
        let file = match &args.config {
            Some(path) => FileConfig::load(path)?,
            None => FileConfig::default(),
        };
        let settings = Self::merge(file, args);
        settings.player.validate().context("invalid player settings")?;
        Ok(settings)
    }

    fn merge(file: FileConfig, args: &Args) -> Self {
        let defaults = PlayerConfig::default();
        let chunk_samples = args
            .chunk_samples
            .or(file.chunk_samples)
            .unwrap_or(defaults.chunk_samples);
        let poll_interval = args
            .poll_interval_ms
            .or(file.poll_interval_ms)
            .map(Duration::from_millis)
            .unwrap_or(defaults.poll_interval);

        Self {
            backend: args.backend.or(file.backend).unwrap_or_default(),
            device: args.device.clone().or(file.device),
            player: PlayerConfig {
                chunk_samples,
                poll_interval,
            },
        }
    }
}
