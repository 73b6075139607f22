//! Configuration management for Quill
//!
//! Loaded from `.quill/config.toml` in the working directory. Every knob the
//! engine treats as tunable lives here; repetition and end-marker detection
//! are heuristics, so their thresholds are configuration rather than derived
//! constants.

use serde::{Deserialize, Serialize};
use std::path::{Path, PathBuf};

use crate::error::{QuillError, Result};

/// Top-level Quill configuration
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct QuillConfig {
    /// Directory holding per-job state (snapshot + event log)
    #[serde(default = "default_jobs_dir")]
    pub jobs_dir: PathBuf,

    /// Transport settings
    #[serde(default)]
    pub transport: TransportConfig,

    /// Circuit breaker settings
    #[serde(default)]
    pub breaker: BreakerConfig,

    /// Engine loop settings
    #[serde(default)]
    pub engine: EngineConfig,
}

/// Transport backend settings
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct TransportConfig {
    /// Base URL of the local bridge process
    #[serde(default = "default_bridge_url")]
    pub bridge_url: String,

    /// Base URL of the direct remote API
    #[serde(default = "default_api_base")]
    pub api_base: String,

    /// Environment variable holding the direct API key
    #[serde(default = "default_api_key_env")]
    pub api_key_env: String,

    /// Per-call timeout in seconds
    #[serde(default = "default_request_timeout_secs")]
    pub request_timeout_secs: u64,

    /// Fixed backoff before the single transport-side retry, in milliseconds
    #[serde(default = "default_retry_backoff_ms")]
    pub retry_backoff_ms: u64,
}

/// Circuit breaker settings
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct BreakerConfig {
    /// Consecutive failures before the circuit opens
    #[serde(default = "default_failure_threshold")]
    pub failure_threshold: u32,

    /// Seconds the circuit stays open before admitting a probe
    #[serde(default = "default_recovery_timeout_secs")]
    pub recovery_timeout_secs: u64,
}

/// Engine loop settings
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct EngineConfig {
    /// Snapshot flush cadence in completed chunks
    #[serde(default = "default_checkpoint_interval")]
    pub checkpoint_interval: usize,

    /// Fixed delay between chunks, in milliseconds
    #[serde(default = "default_inter_chunk_delay_ms")]
    pub inter_chunk_delay_ms: u64,

    /// Transport attempts per chunk before the job fails
    #[serde(default = "default_max_chunk_attempts")]
    pub max_chunk_attempts: usize,

    /// Delay between per-chunk transport attempts, in milliseconds
    #[serde(default = "default_retry_delay_ms")]
    pub retry_delay_ms: u64,

    /// Jaccard similarity above which the job auto-pauses
    #[serde(default = "default_repetition_threshold")]
    pub repetition_threshold: f64,

    /// Character n-gram size for the repetition guard
    #[serde(default = "default_repetition_ngram")]
    pub repetition_ngram: usize,

    /// Anchor tail length in characters for chunk continuations
    #[serde(default = "default_anchor_tail_chars")]
    pub anchor_tail_chars: usize,

    /// Anchor tail length in characters for micro-extend passes
    #[serde(default = "default_local_anchor_chars")]
    pub local_anchor_chars: usize,

    /// Byte bound for source segments in source-grounded runs
    #[serde(default = "default_source_chunk_bytes")]
    pub source_chunk_bytes: usize,

    /// Append the no-wrap-up line to continuation prompts
    #[serde(default = "default_coverage_hammer")]
    pub coverage_hammer: bool,
}

// Default value providers
fn default_jobs_dir() -> PathBuf {
    PathBuf::from(".quill/jobs")
}

fn default_bridge_url() -> String {
    "http://127.0.0.1:5102/v1".to_string()
}

fn default_api_base() -> String {
    "https://openrouter.ai/api/v1".to_string()
}

fn default_api_key_env() -> String {
    "QUILL_API_KEY".to_string()
}

fn default_request_timeout_secs() -> u64 {
    60
}

fn default_retry_backoff_ms() -> u64 {
    500
}

fn default_failure_threshold() -> u32 {
    3
}

fn default_recovery_timeout_secs() -> u64 {
    15
}

fn default_checkpoint_interval() -> usize {
    5
}

fn default_inter_chunk_delay_ms() -> u64 {
    500
}

fn default_max_chunk_attempts() -> usize {
    3
}

fn default_retry_delay_ms() -> u64 {
    1000
}

fn default_repetition_threshold() -> f64 {
    0.35
}

fn default_repetition_ngram() -> usize {
    4
}

fn default_anchor_tail_chars() -> usize {
    300
}

fn default_local_anchor_chars() -> usize {
    150
}

fn default_source_chunk_bytes() -> usize {
    6000
}

fn default_coverage_hammer() -> bool {
    true
}

impl QuillConfig {
    /// Load configuration from `.quill/config.toml` under `root`, or use defaults
    pub fn load_or_default(root: &Path) -> Result<Self> {
        let config_path = root.join(".quill/config.toml");

        if config_path.exists() {
            let content = std::fs::read_to_string(&config_path)?;
            toml::from_str(&content)
                .map_err(|e| QuillError::Config(format!("failed to parse {}: {}", config_path.display(), e)))
        } else {
            Ok(Self::default())
        }
    }

    /// Write the default configuration to `.quill/config.toml` under `root`
    pub fn write_default(root: &Path) -> Result<()> {
        let config_dir = root.join(".quill");
        std::fs::create_dir_all(&config_dir)?;

        let content = toml::to_string_pretty(&Self::default())
            .map_err(|e| QuillError::Config(format!("failed to serialize config: {}", e)))?;
        std::fs::write(config_dir.join("config.toml"), content)?;
        Ok(())
    }
}

impl Default for QuillConfig {
    fn default() -> Self {
        Self {
            jobs_dir: default_jobs_dir(),
            transport: TransportConfig::default(),
            breaker: BreakerConfig::default(),
            engine: EngineConfig::default(),
        }
    }
}

impl Default for TransportConfig {
    fn default() -> Self {
        Self {
            bridge_url: default_bridge_url(),
            api_base: default_api_base(),
            api_key_env: default_api_key_env(),
            request_timeout_secs: default_request_timeout_secs(),
            retry_backoff_ms: default_retry_backoff_ms(),
        }
    }
}

impl Default for BreakerConfig {
    fn default() -> Self {
        Self {
            failure_threshold: default_failure_threshold(),
            recovery_timeout_secs: default_recovery_timeout_secs(),
        }
    }
}

impl Default for EngineConfig {
    fn default() -> Self {
        Self {
            checkpoint_interval: default_checkpoint_interval(),
            inter_chunk_delay_ms: default_inter_chunk_delay_ms(),
            max_chunk_attempts: default_max_chunk_attempts(),
            retry_delay_ms: default_retry_delay_ms(),
            repetition_threshold: default_repetition_threshold(),
            repetition_ngram: default_repetition_ngram(),
            anchor_tail_chars: default_anchor_tail_chars(),
            local_anchor_chars: default_local_anchor_chars(),
            source_chunk_bytes: default_source_chunk_bytes(),
            coverage_hammer: default_coverage_hammer(),
        }
    }
}
