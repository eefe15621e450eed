//! Configuration for the knowledge cache and scoring service.

use serde::{Deserialize, Serialize};
use std::path::PathBuf;
use std::time::Duration;

/// Knowledge snapshot storage configuration
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct KnowledgeConfig {
    /// Local directory holding the index, chunks and monolithic snapshot
    #[serde(default = "default_data_dir")]
    pub data_dir: String,
    #[serde(default = "default_index_file")]
    pub index_file: String,
    /// Monolithic snapshot used when no partition index exists
    #[serde(default = "default_snapshot_file")]
    pub snapshot_file: String,
    /// Release location for artifacts missing locally
    #[serde(default)]
    pub remote_base_url: Option<String>,
    /// Maximum number of resident chunks
    #[serde(default = "default_cache_capacity")]
    pub cache_capacity: usize,
    /// Entities remembered by the streaming fallback reader
    #[serde(default = "default_fallback_cache_capacity")]
    pub fallback_cache_capacity: usize,
    /// Block size for streaming scans, in bytes
    #[serde(default = "default_stream_block_size")]
    pub stream_block_size: usize,
    /// Per-request timeout for remote fetches
    #[serde(default = "default_fetch_timeout_ms")]
    pub fetch_timeout_ms: u64,
}

fn default_data_dir() -> String {
    "data/knowledge".to_string()
}

fn default_index_file() -> String {
    "index.json".to_string()
}

fn default_snapshot_file() -> String {
    "knowledge.json".to_string()
}

fn default_cache_capacity() -> usize {
    8
}

fn default_fallback_cache_capacity() -> usize {
    64
}

fn default_stream_block_size() -> usize {
    64 * 1024
}

fn default_fetch_timeout_ms() -> u64 {
    10_000
}

impl Default for KnowledgeConfig {
    fn default() -> Self {
        Self {
            data_dir: default_data_dir(),
            index_file: default_index_file(),
            snapshot_file: default_snapshot_file(),
            remote_base_url: None,
            cache_capacity: default_cache_capacity(),
            fallback_cache_capacity: default_fallback_cache_capacity(),
            stream_block_size: default_stream_block_size(),
            fetch_timeout_ms: default_fetch_timeout_ms(),
        }
    }
}

impl KnowledgeConfig {
    pub fn data_path(&self) -> PathBuf {
        PathBuf::from(&self.data_dir)
    }

    pub fn fetch_timeout(&self) -> Duration {
        Duration::from_millis(self.fetch_timeout_ms)
    }
}

/// Scoring configuration
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ScoringConfig {
    /// Calibration anchor that always receives the reference score
    #[serde(default = "default_baseline_horse")]
    pub baseline_horse: String,
    #[serde(default = "default_max_batch_size")]
    pub max_batch_size: usize,
    /// Concurrent lookups per batch
    #[serde(default = "default_worker_limit")]
    pub worker_limit: usize,
    /// Deadline applied to each entity lookup
    #[serde(default = "default_request_timeout_ms")]
    pub request_timeout_ms: u64,
}

fn default_baseline_horse() -> String {
    "ディープインパクト".to_string()
}

fn default_max_batch_size() -> usize {
    20
}

fn default_worker_limit() -> usize {
    8
}

fn default_request_timeout_ms() -> u64 {
    30_000
}

impl Default for ScoringConfig {
    fn default() -> Self {
        Self {
            baseline_horse: default_baseline_horse(),
            max_batch_size: default_max_batch_size(),
            worker_limit: default_worker_limit(),
            request_timeout_ms: default_request_timeout_ms(),
        }
    }
}

impl ScoringConfig {
    pub fn request_timeout(&self) -> Duration {
        Duration::from_millis(self.request_timeout_ms)
    }
}

/// Backoff settings for transient remote failures
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct RetrySettings {
    #[serde(default = "default_max_retries")]
    pub max_retries: u32,
    #[serde(default = "default_initial_delay_ms")]
    pub initial_delay_ms: u64,
    #[serde(default = "default_max_delay_ms")]
    pub max_delay_ms: u64,
    #[serde(default = "default_multiplier")]
    pub multiplier: f64,
}

fn default_max_retries() -> u32 {
    3
}

fn default_initial_delay_ms() -> u64 {
    500
}

fn default_max_delay_ms() -> u64 {
    30_000
}

fn default_multiplier() -> f64 {
    2.0
}

impl Default for RetrySettings {
    fn default() -> Self {
        Self {
            max_retries: default_max_retries(),
            initial_delay_ms: default_initial_delay_ms(),
            max_delay_ms: default_max_delay_ms(),
            multiplier: default_multiplier(),
        }
    }
}

/// Application configuration
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct AppConfig {
    #[serde(default)]
    pub knowledge: KnowledgeConfig,
    #[serde(default)]
    pub scoring: ScoringConfig,
    #[serde(default)]
    pub retry: RetrySettings,
}

impl AppConfig {
    /// Load configuration from environment and config file
    pub fn load() -> anyhow::Result<Self> {
        let config = config::Config::builder()
            // Start with defaults
            .add_source(config::Config::try_from(&AppConfig::default())?)
            // Add config file if exists
            .add_source(config::File::with_name("config").required(false))
            // Override with environment variables (KEIBA_KNOWLEDGE__CACHE_CAPACITY, etc.)
            .add_source(
                config::Environment::with_prefix("KEIBA")
                    .prefix_separator("_")
                    .separator("__")
                    .try_parsing(true),
            )
            .build()?;

        Ok(config.try_deserialize()?)
    }
}
