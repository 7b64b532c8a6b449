//! Configuration loaded from `papermeta.toml`.
//!
//! [`PapermetaConfig`] holds every tunable. Values missing from the file
//! fall back to sensible defaults. The `LLM_API_KEY` environment variable
//! takes precedence over the file for the API key.

use std::path::Path;
use std::time::Duration;

use serde::Deserialize;

use crate::batch::RetryPolicy;
use crate::error::PapermetaError;
use crate::llm::client::API_URL;
use crate::orchestrator::BatchConfig;

/// Top-level configuration loaded from `papermeta.toml`.
#[derive(Debug, Clone, Deserialize)]
pub struct PapermetaConfig {
    /// API key for the extraction service.
    #[serde(default)]
    pub api_key: String,

    /// OpenAI-compatible chat completions endpoint.
    #[serde(default = "default_endpoint")]
    pub endpoint: String,

    /// Model used for extraction.
    #[serde(default = "default_model")]
    pub model: String,

    #[serde(default = "default_max_tokens")]
    pub max_tokens: u32,

    #[serde(default = "default_temperature")]
    pub temperature: f32,

    /// Maximum in-flight extraction calls.
    #[serde(default = "default_max_concurrency")]
    pub max_concurrency: usize,

    /// Nominal calls allowed per rolling window.
    #[serde(default = "default_max_requests_per_window")]
    pub max_requests_per_window: u32,

    #[serde(default = "default_window_ms")]
    pub window_ms: u64,

    /// Attempts per job before giving up.
    #[serde(default = "default_max_attempts")]
    pub max_attempts: u32,

    /// Base delay in milliseconds for exponential backoff.
    #[serde(default = "default_base_backoff_ms")]
    pub base_backoff_ms: u64,

    /// Jitter range in milliseconds added to each backoff delay.
    #[serde(default = "default_jitter_ms")]
    pub jitter_ms: u64,

    /// Overall batch deadline in milliseconds.
    #[serde(default = "default_batch_timeout_ms")]
    pub batch_timeout_ms: u64,
}

fn default_endpoint() -> String {
    API_URL.to_string()
}

fn default_model() -> String {
    "qwen-flash".to_string()
}

fn default_max_tokens() -> u32 {
    4000
}

fn default_temperature() -> f32 {
    0.1
}

fn default_max_concurrency() -> usize {
    20
}

fn default_max_requests_per_window() -> u32 {
    1200
}

fn default_window_ms() -> u64 {
    60_000
}

fn default_max_attempts() -> u32 {
    3
}

fn default_base_backoff_ms() -> u64 {
    1000
}

fn default_jitter_ms() -> u64 {
    250
}

fn default_batch_timeout_ms() -> u64 {
    600_000
}

impl Default for PapermetaConfig {
    fn default() -> Self {
        Self {
            api_key: String::new(),
            endpoint: default_endpoint(),
            model: default_model(),
            max_tokens: default_max_tokens(),
            temperature: default_temperature(),
            max_concurrency: default_max_concurrency(),
            max_requests_per_window: default_max_requests_per_window(),
            window_ms: default_window_ms(),
            max_attempts: default_max_attempts(),
            base_backoff_ms: default_base_backoff_ms(),
            jitter_ms: default_jitter_ms(),
            batch_timeout_ms: default_batch_timeout_ms(),
        }
    }
}

impl PapermetaConfig {
    /// Load from `papermeta.toml` in the current directory, falling back
    /// to defaults when the file does not exist.
    pub fn load() -> Result<Self, PapermetaError> {
        Self::load_from(Path::new("papermeta.toml"))
    }

    pub fn load_from(path: &Path) -> Result<Self, PapermetaError> {
        let mut config = if path.exists() {
            let contents = std::fs::read_to_string(path)?;
            toml::from_str::<PapermetaConfig>(&contents)?
        } else {
            Self::default()
        };

        // Environment takes precedence over the file for the API key.
        if let Ok(key) = std::env::var("LLM_API_KEY")
            && !key.is_empty()
        {
            config.api_key = key;
        }

        Ok(config)
    }

    pub fn validate(&self) -> Result<(), PapermetaError> {
        self.batch_config().validate()
    }

    pub fn retry_policy(&self) -> RetryPolicy {
        RetryPolicy {
            max_attempts: self.max_attempts,
            base_backoff: Duration::from_millis(self.base_backoff_ms),
            jitter: Duration::from_millis(self.jitter_ms),
        }
    }

    pub fn batch_config(&self) -> BatchConfig {
        BatchConfig {
            max_concurrency: self.max_concurrency,
            max_requests_per_window: self.max_requests_per_window,
            window: Duration::from_millis(self.window_ms),
            batch_timeout: Duration::from_millis(self.batch_timeout_ms),
            retry: self.retry_policy(),
        }
    }
}
