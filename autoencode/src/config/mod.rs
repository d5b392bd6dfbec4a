//! Application configuration.
//!
//! Configuration is a single JSON document. Every field has a default, so an
//! absent file or a partial document both produce a usable configuration.
//! A few process-level settings can be overridden from the environment
//! (`FFMPEG_PATH`, `FFPROBE_PATH`), with `.env` files loaded through `dotenvy`.

use std::path::{Path, PathBuf};
use std::time::Duration;

use serde::{Deserialize, Serialize};
use tracing::{debug, info};

use crate::domain::QualitySet;
use crate::logging::LoggingConfig;
use crate::{Error, Result};

/// External encoder settings.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct EncoderConfig {
    /// Path to the ffmpeg binary, substituted for `{ffmpeg}` in templates.
    #[serde(default = "default_ffmpeg_path")]
    pub ffmpeg_path: String,
    /// Path to ffprobe, used to probe the source duration.
    #[serde(default = "default_ffprobe_path")]
    pub ffprobe_path: String,
    /// Directory holding staged inputs, outputs and the progress scratch file.
    #[serde(default = "default_work_dir")]
    pub work_dir: PathBuf,
    /// Name of the progress scratch file inside `work_dir`.
    #[serde(default = "default_progress_file")]
    pub progress_file: String,
    /// Seconds between progress scratch file reads.
    #[serde(default = "default_poll_interval_secs")]
    pub poll_interval_secs: u64,
    /// Duration assumed when probing fails or returns a non-positive value.
    #[serde(default = "default_fallback_duration_secs")]
    pub fallback_duration_secs: f64,
}

fn default_ffmpeg_path() -> String {
    "ffmpeg".to_string()
}

fn default_ffprobe_path() -> String {
    "ffprobe".to_string()
}

fn default_work_dir() -> PathBuf {
    PathBuf::from("encode")
}

fn default_progress_file() -> String {
    "prog.txt".to_string()
}

fn default_poll_interval_secs() -> u64 {
    8
}

fn default_fallback_duration_secs() -> f64 {
    1440.0
}

impl Default for EncoderConfig {
    fn default() -> Self {
        Self {
            ffmpeg_path: default_ffmpeg_path(),
            ffprobe_path: default_ffprobe_path(),
            work_dir: default_work_dir(),
            progress_file: default_progress_file(),
            poll_interval_secs: default_poll_interval_secs(),
            fallback_duration_secs: default_fallback_duration_secs(),
        }
    }
}

impl EncoderConfig {
    pub fn poll_interval(&self) -> Duration {
        Duration::from_secs(self.poll_interval_secs)
    }

    pub fn progress_path(&self) -> PathBuf {
        self.work_dir.join(&self.progress_file)
    }
}

/// Publishing and link bookkeeping settings.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct PublishConfig {
    /// Prefix of shareable links; the encoded payload is appended as `?start=`.
    #[serde(default = "default_link_base")]
    pub link_base: String,
    /// Store identifier folded into link payloads. The sign is ignored.
    #[serde(default = "default_file_store_id")]
    pub file_store_id: i64,
    /// Directory the outbox publisher copies artifacts into.
    #[serde(default = "default_outbox_dir")]
    pub outbox_dir: PathBuf,
    /// Keep encoded artifacts on disk after a successful publish.
    #[serde(default)]
    pub keep_artifacts: bool,
}

fn default_link_base() -> String {
    "https://telegram.me/autoencode_bot".to_string()
}

fn default_file_store_id() -> i64 {
    1
}

fn default_outbox_dir() -> PathBuf {
    PathBuf::from("outbox")
}

impl Default for PublishConfig {
    fn default() -> Self {
        Self {
            link_base: default_link_base(),
            file_store_id: default_file_store_id(),
            outbox_dir: default_outbox_dir(),
            keep_artifacts: false,
        }
    }
}

/// Periodic discovery settings.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct DiscoveryConfig {
    #[serde(default)]
    pub enabled: bool,
    /// Seconds between discovery rounds.
    #[serde(default = "default_discovery_interval_secs")]
    pub interval_secs: u64,
    /// Directory watched for new payloads, if any.
    #[serde(default)]
    pub watch_dir: Option<PathBuf>,
}

fn default_discovery_interval_secs() -> u64 {
    60
}

impl Default for DiscoveryConfig {
    fn default() -> Self {
        Self {
            enabled: false,
            interval_secs: default_discovery_interval_secs(),
            watch_dir: None,
        }
    }
}

impl DiscoveryConfig {
    pub fn interval(&self) -> Duration {
        Duration::from_secs(self.interval_secs.max(1))
    }
}

/// Top-level application configuration.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct AppConfig {
    /// Quality targets in encode order.
    #[serde(default)]
    pub qualities: QualitySet,
    #[serde(default)]
    pub encoder: EncoderConfig,
    /// Directory downloads are materialized into.
    #[serde(default = "default_download_dir")]
    pub download_dir: PathBuf,
    #[serde(default)]
    pub publish: PublishConfig,
    /// JSON file backing the persisted episode record.
    #[serde(default = "default_store_path")]
    pub store_path: PathBuf,
    #[serde(default)]
    pub discovery: DiscoveryConfig,
    #[serde(default)]
    pub logging: LoggingConfig,
}

fn default_download_dir() -> PathBuf {
    PathBuf::from("downloads")
}

fn default_store_path() -> PathBuf {
    PathBuf::from("episodes.json")
}

impl AppConfig {
    /// Load configuration from `path`, falling back to defaults when the file
    /// does not exist, then apply environment overrides and validate.
    pub fn load(path: Option<&Path>) -> Result<Self> {
        dotenvy::dotenv().ok();

        let mut config = match path {
            Some(path) if path.exists() => {
                info!(path = %path.display(), "Loading configuration");
                let raw = std::fs::read_to_string(path)?;
                Self::from_json(&raw)?
            }
            Some(path) => {
                info!(path = %path.display(), "Configuration file not found, using defaults");
                Self::default()
            }
            None => Self::default(),
        };

        config.apply_env_overrides(|key| std::env::var(key).ok());
        config.validate()?;
        Ok(config)
    }

    pub fn from_json(raw: &str) -> Result<Self> {
        serde_json::from_str(raw).map_err(|e| Error::config(format!("invalid configuration: {}", e)))
    }

    /// Apply overrides using `lookup` to read variables.
    pub fn apply_env_overrides(&mut self, lookup: impl Fn(&str) -> Option<String>) {
        if let Some(path) = lookup("FFMPEG_PATH").filter(|v| !v.is_empty()) {
            debug!(path = %path, "FFMPEG_PATH override");
            self.encoder.ffmpeg_path = path;
        }
        if let Some(path) = lookup("FFPROBE_PATH").filter(|v| !v.is_empty()) {
            debug!(path = %path, "FFPROBE_PATH override");
            self.encoder.ffprobe_path = path;
        }
    }

    pub fn validate(&self) -> Result<()> {
        self.qualities.validate()?;

        if self.encoder.poll_interval_secs == 0 {
            return Err(Error::config("encoder.poll_interval_secs must be positive"));
        }
        if !(self.encoder.fallback_duration_secs > 0.0) {
            return Err(Error::config(
                "encoder.fallback_duration_secs must be positive",
            ));
        }
        if self.encoder.progress_file.trim().is_empty() {
            return Err(Error::config("encoder.progress_file must not be empty"));
        }
        Ok(())
    }
}
