//! Engine configuration management

use anyhow::{Context, Result};
use directories::ProjectDirs;
use serde::{Deserialize, Serialize};
use std::path::{Path, PathBuf};

use super::error_handling::RetryPolicy;
use super::models::HeaderMap;

/// Main engine configuration structure
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
#[serde(default)]
pub struct EngineConfig {
    pub download: DownloadConfig,
    pub mux: MuxConfig,
    pub planner: PlannerConfig,
    pub output_directory: PathBuf,
    pub temp_directory: PathBuf,
    /// Upper bound for a whole run; the run is cancelled once it elapses
    pub run_timeout_seconds: Option<u64>,
}

/// Network fetch settings
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
#[serde(default)]
pub struct DownloadConfig {
    /// Jobs executed in parallel
    pub concurrent_jobs: usize,
    /// Segment/fragment fetches in flight within one job
    pub concurrent_segments: usize,
    /// Longest wait for response headers or the next body chunk
    pub timeout_seconds: u64,
    /// Retries after the first attempt
    pub retry_attempts: u32,
    pub user_agent: String,
    /// Static headers added to every request
    pub headers: HeaderMap,
    pub buffer_size: usize,
}

/// External media tool settings
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
#[serde(default)]
pub struct MuxConfig {
    pub tool_path: String,
    pub timeout_seconds: u64,
    /// Keep fragment files even after a successful mux
    pub keep_intermediates: bool,
}

/// How a manifest and a fragment group are judged to be the same stream
#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq)]
#[serde(tag = "rule", rename_all = "snake_case")]
pub enum SameStreamRule {
    /// Same host, fragment directory nested under the manifest directory
    SameDirectory,
    /// Same host and the first `depth` directory segments agree
    SharedPrefix { depth: usize },
    /// Any fragment group on the manifest's host
    SameHost,
}

/// Planning heuristics
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
#[serde(default)]
pub struct PlannerConfig {
    pub same_stream_rule: SameStreamRule,
    /// Minimum size (or member-count) ratio for the audio/video split
    pub track_size_ratio: f64,
    /// Skip segments that keep failing instead of failing the job
    pub tolerate_missing_segments: bool,
}

impl Default for EngineConfig {
    fn default() -> Self {
        Self {
            download: DownloadConfig::default(),
            mux: MuxConfig::default(),
            planner: PlannerConfig::default(),
            output_directory: PathBuf::from("downloads"),
            temp_directory: std::env::temp_dir().join("video_collector"),
            run_timeout_seconds: None,
        }
    }
}

impl Default for DownloadConfig {
    fn default() -> Self {
        Self {
            concurrent_jobs: 3,
            concurrent_segments: 4,
            timeout_seconds: 30,
            retry_attempts: 3,
            user_agent: "Mozilla/5.0 (Windows NT 10.0; Win64; x64) AppleWebKit/537.36".to_string(),
            headers: HeaderMap::new(),
            buffer_size: 64 * 1024,
        }
    }
}

impl Default for MuxConfig {
    fn default() -> Self {
        Self {
            tool_path: "ffmpeg".to_string(),
            timeout_seconds: 600,
            keep_intermediates: false,
        }
    }
}

impl Default for PlannerConfig {
    fn default() -> Self {
        Self {
            same_stream_rule: SameStreamRule::SameDirectory,
            track_size_ratio: 2.0,
            tolerate_missing_segments: true,
        }
    }
}

impl DownloadConfig {
    pub fn retry_policy(&self) -> RetryPolicy {
        RetryPolicy::with_retries(self.retry_attempts)
    }
}

impl EngineConfig {
    /// Load configuration from the per-user config file, creating it if missing
    pub fn load() -> Result<Self> {
        let config_path = Self::get_config_path()?;

        if config_path.exists() {
            Self::load_from(&config_path)
        } else {
            let config = Self::default();
            config.save()?;
            tracing::info!("Created default configuration at: {:?}", config_path);
            Ok(config)
        }
    }

    /// Load configuration from an explicit file
    pub fn load_from(path: &Path) -> Result<Self> {
        let content = std::fs::read_to_string(path)
            .with_context(|| format!("Failed to read config file: {:?}", path))?;

        let config: EngineConfig =
            serde_json::from_str(&content).with_context(|| "Failed to parse config file")?;

        tracing::info!("Loaded configuration from: {:?}", path);
        Ok(config)
    }

    /// Save configuration to the per-user config file
    pub fn save(&self) -> Result<()> {
        self.save_to(&Self::get_config_path()?)
    }

    pub fn save_to(&self, path: &Path) -> Result<()> {
        if let Some(parent) = path.parent() {
            std::fs::create_dir_all(parent)
                .with_context(|| format!("Failed to create config directory: {:?}", parent))?;
        }

        let content =
            serde_json::to_string_pretty(self).with_context(|| "Failed to serialize config")?;

        std::fs::write(path, content)
            .with_context(|| format!("Failed to write config file: {:?}", path))?;

        tracing::info!("Saved configuration to: {:?}", path);
        Ok(())
    }

    /// Get the path to the configuration file
    pub fn get_config_path() -> Result<PathBuf> {
        let project_dirs = ProjectDirs::from("com", "videocollector", "collector")
            .with_context(|| "Failed to get project directories")?;

        Ok(project_dirs.config_dir().join("config.json"))
    }

    /// Validate configuration values
    pub fn validate(&self) -> Result<()> {
        if self.download.concurrent_jobs == 0 {
            anyhow::bail!("Concurrent jobs must be greater than 0");
        }

        if self.download.concurrent_jobs > 20 {
            anyhow::bail!("Concurrent jobs should not exceed 20");
        }

        if self.download.concurrent_segments == 0 || self.download.concurrent_segments > 64 {
            anyhow::bail!("Concurrent segments should be between 1 and 64");
        }

        if self.download.retry_attempts > 10 {
            anyhow::bail!("Retry attempts should not exceed 10");
        }

        if self.download.timeout_seconds == 0 || self.download.timeout_seconds > 300 {
            anyhow::bail!("Timeout should be between 1 and 300 seconds");
        }

        if self.download.buffer_size == 0 {
            anyhow::bail!("Buffer size must be greater than 0");
        }

        if self.mux.tool_path.trim().is_empty() {
            anyhow::bail!("Mux tool path must not be empty");
        }

        if self.mux.timeout_seconds == 0 || self.mux.timeout_seconds > 24 * 60 * 60 {
            anyhow::bail!("Mux timeout should be between 1 second and 24 hours");
        }

        if self.planner.track_size_ratio <= 1.0 {
            anyhow::bail!("Track size ratio must be greater than 1.0");
        }

        if let SameStreamRule::SharedPrefix { depth } = self.planner.same_stream_rule {
            if depth == 0 {
                anyhow::bail!("Shared prefix depth must be at least 1");
            }
        }

        if self.run_timeout_seconds == Some(0) {
            anyhow::bail!("Run timeout must be greater than 0 when set");
        }

        Ok(())
    }
}
