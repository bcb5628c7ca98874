use std::path::{Path, PathBuf};
use std::time::Duration;
use anyhow::{Context, Result};
use serde::{Deserialize, Serialize};

use crate::error::PreconditionError;

/// Retry and stability knobs for single-file transfers
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct TransferSettings {
    /// Attempts before a transfer is given up
    pub max_attempts: u32,
    /// Fixed delay between failed attempts, in milliseconds
    pub retry_delay_ms: u64,
    /// Interval between the two size samples of the source stability check
    pub stability_wait_ms: u64,
}

impl Default for TransferSettings {
    fn default() -> Self {
        Self {
            max_attempts: 50,
            retry_delay_ms: 5000,
            stability_wait_ms: 1000,
        }
    }
}

/// Configuration for the backup archiver
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct ArchiveConfig {
    /// Extensions routed through the encoder (case-insensitive, dot optional)
    pub video_extensions: Vec<String>,
    /// Raw still-image extensions, never tracked
    pub raw_extensions: Vec<String>,
    /// Extension the encoder writes its finished artifacts with
    pub output_extension: String,
    /// Base-name suffix marking proxy files
    pub proxy_suffix: String,
    /// Directory names pruned from the inventory walk
    pub exclude_dirs: Vec<String>,
    /// Skip non-media files sharing a stem with a video in the same folder
    pub skip_sidecars: bool,
    /// Appended to the source folder name to form the backup root
    pub backup_suffix: String,
    /// Where inventories and run reports are stored
    pub state_dir: PathBuf,
    /// Encoder watch folder (input)
    pub staging_input_root: PathBuf,
    /// Encoder output folder
    pub staging_output_root: PathBuf,
    /// Optional encoder error log to watch for failures
    pub encoder_error_log: Option<PathBuf>,
    /// Sleep between output polls, in milliseconds
    pub poll_interval_ms: u64,
    /// Interval between output size samples, in milliseconds
    pub output_stability_ms: u64,
    /// Consecutive equal nonzero samples before an output is trusted
    pub output_stability_samples: u32,
    /// Upper bound on the wait for encoder output, in seconds
    pub output_timeout_secs: u64,
    pub transfer: TransferSettings,
    /// Ratio assumed before any encoded output has been observed
    pub default_compression_ratio: f64,
}

impl Default for ArchiveConfig {
    fn default() -> Self {
        Self::default_config()
    }
}

fn strings(items: &[&str]) -> Vec<String> {
    items.iter().map(|s| s.to_string()).collect()
}

impl ArchiveConfig {
    /// Create a default configuration with sensible values
    pub fn default_config() -> Self {
        Self {
            video_extensions: strings(&["mxf", "mp4", "mov", "crm", "avi"]),
            raw_extensions: strings(&["arw", "cr2", "cr3", "nef", "dng", "raf", "orf", "rw2", "sr2"]),
            output_extension: "mp4".to_string(),
            proxy_suffix: "_proxy".to_string(),
            exclude_dirs: strings(&["Exports", "Proxies", "Proxy"]),
            skip_sidecars: true,
            backup_suffix: "-265".to_string(),
            state_dir: PathBuf::from("archive-state"),
            staging_input_root: PathBuf::from("staging/input"),
            staging_output_root: PathBuf::from("staging/output"),
            encoder_error_log: None,
            poll_interval_ms: 5000,
            output_stability_ms: 10_000,
            output_stability_samples: 2,
            output_timeout_secs: 600,
            transfer: TransferSettings::default(),
            default_compression_ratio: 0.1,
        }
    }

    /// Load configuration from a file, or return defaults if path is None or file doesn't exist
    pub fn load_config(path: Option<&Path>) -> Result<Self> {
        let mut config = Self::default_config();

        if let Some(config_path) = path {
            if config_path.exists() {
                let content = std::fs::read_to_string(config_path)
                    .with_context(|| format!("Failed to read config file: {}", config_path.display()))?;

                if config_path.extension().and_then(|s| s.to_str()) == Some("toml") {
                    config = toml::from_str(&content)
                        .with_context(|| format!("Failed to parse TOML config: {}", config_path.display()))?;
                } else {
                    config = serde_json::from_str(&content)
                        .with_context(|| format!("Failed to parse JSON config: {}", config_path.display()))?;
                }
            }
        }

        config.apply_env_overrides();
        Ok(config)
    }

    /// Override timing knobs from `ARCHIVE_*` environment variables.
    ///
    /// Unparseable values are ignored.
    pub fn apply_env_overrides(&mut self) {
        fn env_u64(key: &str) -> Option<u64> {
            std::env::var(key).ok().and_then(|v| v.trim().parse().ok())
        }

        if let Some(v) = env_u64("ARCHIVE_POLL_INTERVAL_MS") {
            self.poll_interval_ms = v;
        }
        if let Some(v) = env_u64("ARCHIVE_OUTPUT_TIMEOUT_SECS") {
            self.output_timeout_secs = v;
        }
        if let Some(v) = env_u64("ARCHIVE_OUTPUT_STABILITY_MS") {
            self.output_stability_ms = v;
        }
        if let Some(v) = env_u64("ARCHIVE_RETRY_DELAY_MS") {
            self.transfer.retry_delay_ms = v;
        }
        if let Some(v) = env_u64("ARCHIVE_MAX_ATTEMPTS") {
            self.transfer.max_attempts = v.min(u32::MAX as u64) as u32;
        }
    }

    /// Reject values the pipeline cannot run with
    pub fn validate(&self) -> Result<(), PreconditionError> {
        let invalid = |reason: &str| Err(PreconditionError::InvalidConfig(reason.to_string()));

        if self.transfer.max_attempts == 0 {
            return invalid("transfer.max_attempts must be at least 1");
        }
        if self.output_stability_samples < 2 {
            return invalid("output_stability_samples must be at least 2");
        }
        if self.output_timeout_secs == 0 {
            return invalid("output_timeout_secs must be greater than zero");
        }
        if self.output_extension.trim().trim_start_matches('.').is_empty() {
            return invalid("output_extension must not be empty");
        }
        if !(self.default_compression_ratio > 0.0) {
            return invalid("default_compression_ratio must be positive");
        }
        if self.video_extensions.is_empty() {
            return invalid("video_extensions must not be empty");
        }
        Ok(())
    }

    pub fn poll_interval(&self) -> Duration {
        Duration::from_millis(self.poll_interval_ms)
    }

    pub fn output_stability_interval(&self) -> Duration {
        Duration::from_millis(self.output_stability_ms)
    }

    pub fn output_timeout(&self) -> Duration {
        Duration::from_secs(self.output_timeout_secs)
    }
}
