//! Configuration types for Docflow.
//!
//! The root [`DocflowConfig`] maps to `config.toml` in the data directory.
//! Every field has a default so a missing or partial file still yields a
//! working configuration.

use std::collections::HashMap;

use serde::{Deserialize, Serialize};

use crate::job::Stage;

// ---------------------------------------------------------------------------
// Retry settings
// ---------------------------------------------------------------------------

/// Retry settings for a stage: fixed delay between attempts, bounded count.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct RetrySettings {
    /// Delay before each retry, in milliseconds. The delay is fixed: every
    /// retry of a stage waits the same interval.
    #[serde(default = "default_initial_delay_ms")]
    pub initial_delay_ms: u64,
    /// Total attempts including the first try. Minimum 1.
    #[serde(default = "default_max_attempts")]
    pub max_attempts: u32,
}

fn default_initial_delay_ms() -> u64 {
    5_000
}

fn default_max_attempts() -> u32 {
    3
}

impl Default for RetrySettings {
    fn default() -> Self {
        Self {
            initial_delay_ms: default_initial_delay_ms(),
            max_attempts: default_max_attempts(),
        }
    }
}

// ---------------------------------------------------------------------------
// Pipeline configuration
// ---------------------------------------------------------------------------

/// Engine-level configuration: concurrency, timeouts, retry.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct PipelineConfig {
    /// Maximum number of jobs executing at once.
    #[serde(default = "default_max_concurrent_jobs")]
    pub max_concurrent_jobs: u32,
    /// Per-stage execution window in seconds. An activity still running
    /// when the window closes counts as a failed attempt.
    #[serde(default = "default_stage_timeout_secs")]
    pub stage_timeout_secs: u64,
    /// Default retry settings applied to every stage.
    #[serde(default)]
    pub retry: RetrySettings,
    /// Per-stage retry overrides, keyed by stage name.
    #[serde(default)]
    pub stage_retry: HashMap<Stage, RetrySettings>,
}

fn default_max_concurrent_jobs() -> u32 {
    8
}

fn default_stage_timeout_secs() -> u64 {
    300
}

impl Default for PipelineConfig {
    fn default() -> Self {
        Self {
            max_concurrent_jobs: default_max_concurrent_jobs(),
            stage_timeout_secs: default_stage_timeout_secs(),
            retry: RetrySettings::default(),
            stage_retry: HashMap::new(),
        }
    }
}

impl PipelineConfig {
    /// Retry settings for a stage: the per-stage override when present,
    /// otherwise the pipeline default.
    pub fn retry_for(&self, stage: Stage) -> &RetrySettings {
        self.stage_retry.get(&stage).unwrap_or(&self.retry)
    }
}

// ---------------------------------------------------------------------------
// Activity adapter configuration
// ---------------------------------------------------------------------------

/// Layout-analysis service endpoint for the extract stage.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ExtractionConfig {
    /// Base URL of the layout-analysis service.
    #[serde(default = "default_extraction_endpoint")]
    pub endpoint: String,
    /// API key sent as `x-api-key`. Empty means unauthenticated.
    #[serde(default)]
    pub api_key: String,
}

fn default_extraction_endpoint() -> String {
    "http://localhost:5000".to_string()
}

impl Default for ExtractionConfig {
    fn default() -> Self {
        Self {
            endpoint: default_extraction_endpoint(),
            api_key: String::new(),
        }
    }
}

/// Chat-completion endpoint for the summarize stage.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct SummarizationConfig {
    /// Chat-completions URL (OpenAI-compatible).
    #[serde(default = "default_summarization_endpoint")]
    pub endpoint: String,
    /// Bearer token. When empty the loader falls back to `OPENAI_API_KEY`.
    #[serde(default)]
    pub api_key: String,
    /// Model name.
    #[serde(default = "default_summarization_model")]
    pub model: String,
}

fn default_summarization_endpoint() -> String {
    "https://api.openai.com/v1/chat/completions".to_string()
}

fn default_summarization_model() -> String {
    "gpt-3.5-turbo".to_string()
}

impl Default for SummarizationConfig {
    fn default() -> Self {
        Self {
            endpoint: default_summarization_endpoint(),
            api_key: String::new(),
            model: default_summarization_model(),
        }
    }
}

// ---------------------------------------------------------------------------
// Root configuration
// ---------------------------------------------------------------------------

/// Root of `config.toml`.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct DocflowConfig {
    #[serde(default)]
    pub pipeline: PipelineConfig,
    #[serde(default)]
    pub extraction: ExtractionConfig,
    #[serde(default)]
    pub summarization: SummarizationConfig,
}

// ---------------------------------------------------------------------------
// Tests
// ---------------------------------------------------------------------------
