use anyhow::{Context, Result};
use serde::{Deserialize, Serialize};
use std::fs;
use std::path::PathBuf;
use std::time::Duration;

/// Subordinate transfer-engine settings (`[engine]` section in config.toml).
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct EngineConfig {
    /// Program that runs the transfer engine; it speaks line-delimited JSON on stdio.
    pub command: String,
    /// Extra arguments passed to `command`.
    #[serde(default)]
    pub args: Vec<String>,
    /// Seconds between health checks.
    pub health_interval_secs: u64,
    /// Timeout for a single health check call, in milliseconds.
    pub health_timeout_ms: u64,
    /// Consecutive failed health checks tolerated before a forced restart.
    pub health_failure_threshold: u32,
    /// Timeout used when polling transfer progress, in milliseconds.
    pub progress_timeout_ms: u64,
    /// Delay before retrying a failed (re)spawn, in milliseconds.
    pub restart_delay_ms: u64,
}

impl Default for EngineConfig {
    fn default() -> Self {
        Self {
            command: "vidq-engine".to_string(),
            args: Vec::new(),
            health_interval_secs: 30,
            health_timeout_ms: 5_000,
            health_failure_threshold: 3,
            progress_timeout_ms: 2_000,
            restart_delay_ms: 1_000,
        }
    }
}

impl EngineConfig {
    pub fn health_interval(&self) -> Duration {
        Duration::from_secs(self.health_interval_secs.max(1))
    }

    pub fn health_timeout(&self) -> Duration {
        Duration::from_millis(self.health_timeout_ms)
    }

    pub fn progress_timeout(&self) -> Duration {
        Duration::from_millis(self.progress_timeout_ms)
    }

    pub fn restart_delay(&self) -> Duration {
        Duration::from_millis(self.restart_delay_ms)
    }
}

/// Job timing parameters (`[jobs]` section in config.toml).
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct JobsConfig {
    /// Initial retry interval for release searches (doubles on each miss).
    pub search_interval_secs: u64,
    /// Upper bound for any backoff interval.
    pub max_backoff_secs: u64,
    /// Interval between download health polls.
    pub monitor_interval_secs: u64,
    /// How long a completed video is kept before its data is deleted.
    pub delete_after_secs: u64,
    /// How often the daemon re-reads the store for work queued by other processes.
    #[serde(default = "default_rescan_interval_secs")]
    pub rescan_interval_secs: u64,
}

fn default_rescan_interval_secs() -> u64 {
    60
}

impl Default for JobsConfig {
    fn default() -> Self {
        Self {
            search_interval_secs: 30 * 60,
            max_backoff_secs: 24 * 60 * 60,
            monitor_interval_secs: 5 * 60,
            delete_after_secs: 3 * 24 * 60 * 60,
            rescan_interval_secs: default_rescan_interval_secs(),
        }
    }
}

/// Global configuration loaded from `~/.config/vidq/config.toml`, then
/// overridden by `MAX_DOWNLOADS`, `MAX_MEMORY_MB` and `DOWNLOAD_ROOT`.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct VidqConfig {
    /// Torrents allowed to hold a download slot at once (slow ones excluded).
    pub max_downloads: usize,
    /// Storage cap for everything under `download_root`, in MB.
    pub max_memory_mb: u64,
    /// Root directory for in-progress transfers.
    pub download_root: PathBuf,
    /// Destination for exported (finished) videos.
    pub export_root: PathBuf,
    /// Transfers below this rate are flagged slow.
    pub slow_speed_kbps: u64,
    #[serde(default)]
    pub engine: EngineConfig,
    #[serde(default)]
    pub jobs: JobsConfig,
}

impl Default for VidqConfig {
    fn default() -> Self {
        Self {
            max_downloads: 1,
            max_memory_mb: 50_000,
            download_root: PathBuf::from("downloads"),
            export_root: PathBuf::from("library"),
            slow_speed_kbps: 50,
            engine: EngineConfig::default(),
            jobs: JobsConfig::default(),
        }
    }
}

impl VidqConfig {
    /// Apply `MAX_DOWNLOADS`, `MAX_MEMORY_MB` and `DOWNLOAD_ROOT` from the process environment.
    pub fn apply_env(&mut self) -> Result<()> {
        self.apply_env_from(|key| std::env::var(key).ok())
    }

    /// Apply overrides from an arbitrary lookup (the process environment in production).
    pub fn apply_env_from<F>(&mut self, lookup: F) -> Result<()>
    where
        F: Fn(&str) -> Option<String>,
    {
        if let Some(v) = lookup("MAX_DOWNLOADS") {
            self.max_downloads = v
                .trim()
                .parse()
                .with_context(|| format!("MAX_DOWNLOADS: invalid value {v:?}"))?;
        }
        if let Some(v) = lookup("MAX_MEMORY_MB") {
            self.max_memory_mb = v
                .trim()
                .parse()
                .with_context(|| format!("MAX_MEMORY_MB: invalid value {v:?}"))?;
        }
        if let Some(v) = lookup("DOWNLOAD_ROOT") {
            if !v.trim().is_empty() {
                self.download_root = PathBuf::from(v.trim());
            }
        }
        Ok(())
    }
}

pub fn config_path() -> Result<PathBuf> {
    let xdg_dirs = xdg::BaseDirectories::with_prefix("vidq")?;
    Ok(xdg_dirs.place_config_file("config.toml")?)
}

/// Load configuration from disk, creating a default file if none exists,
/// then apply environment overrides.
pub fn load_or_init() -> Result<VidqConfig> {
    let path = config_path()?;
    let mut cfg = if !path.exists() {
        let default_cfg = VidqConfig::default();
        let toml = toml::to_string_pretty(&default_cfg)?;
        if let Some(parent) = path.parent() {
            fs::create_dir_all(parent)?;
        }
        fs::write(&path, toml)?;
        tracing::info!("created default config at {}", path.display());
        default_cfg
    } else {
        let data = fs::read_to_string(&path)?;
        toml::from_str(&data).with_context(|| format!("parse config: {}", path.display()))?
    };
    cfg.apply_env()?;
    Ok(cfg)
}
