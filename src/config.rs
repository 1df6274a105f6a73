use std::{path::Path, time::Duration};

use serde::{Deserialize, Serialize};

use crate::{artifacts::RetryPolicy, errors::ConfigError};

pub const DEFAULT_BASE_URL: &str = "http://localhost:8000/zkproof";

/// Pipeline settings, loadable from TOML.
///
/// ```toml
/// base_url = "https://artifacts.example.org/zkproof"
/// request_timeout_secs = 30
/// fetch_deadline_secs = 120
/// cache_artifacts = true
///
/// [retry]
/// max_attempts = 3
/// initial_backoff_ms = 200
/// ```
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default, deny_unknown_fields)]
pub struct PipelineConfig {
    pub base_url: String,
    pub request_timeout_secs: u64,
    /// Overall budget for fetching all three artifacts, retries included.
    pub fetch_deadline_secs: u64,
    pub cache_artifacts: bool,
    /// Run the witness program's constraint checks while proving.
    pub sanity_check: bool,
    pub retry: RetryConfig,
}

impl Default for PipelineConfig {
    fn default() -> Self {
        Self {
            base_url: DEFAULT_BASE_URL.to_string(),
            request_timeout_secs: 30,
            fetch_deadline_secs: 120,
            cache_artifacts: false,
            sanity_check: true,
            retry: RetryConfig::default(),
        }
    }
}

impl PipelineConfig {
    pub fn load(path: impl AsRef<Path>) -> Result<Self, ConfigError> {
        let text = std::fs::read_to_string(path)?;
        Self::from_toml_str(&text)
    }

    pub fn from_toml_str(text: &str) -> Result<Self, ConfigError> {
        let config: Self = toml::from_str(text)?;
        config.validate()?;
        Ok(config)
    }

    pub fn validate(&self) -> Result<(), ConfigError> {
        if self.base_url.trim().is_empty() {
            return Err(ConfigError::Invalid("base_url must not be empty".into()));
        }
        if self.request_timeout_secs == 0 {
            return Err(ConfigError::Invalid("request_timeout_secs must be positive".into()));
        }
        if self.fetch_deadline_secs == 0 {
            return Err(ConfigError::Invalid("fetch_deadline_secs must be positive".into()));
        }
        if self.retry.max_attempts == 0 {
            return Err(ConfigError::Invalid("retry.max_attempts must be at least 1".into()));
        }
        if self.retry.max_backoff_ms < self.retry.initial_backoff_ms {
            return Err(ConfigError::Invalid(
                "retry.max_backoff_ms must not be below retry.initial_backoff_ms".into(),
            ));
        }
        Ok(())
    }

    pub fn request_timeout(&self) -> Duration {
        Duration::from_secs(self.request_timeout_secs)
    }

    pub fn fetch_deadline(&self) -> Duration {
        Duration::from_secs(self.fetch_deadline_secs)
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default, deny_unknown_fields)]
pub struct RetryConfig {
    pub max_attempts: u32,
    pub initial_backoff_ms: u64,
    pub max_backoff_ms: u64,
}

impl Default for RetryConfig {
    fn default() -> Self {
        Self {
            max_attempts: 3,
            initial_backoff_ms: 200,
            max_backoff_ms: 5_000,
        }
    }
}

impl RetryConfig {
    pub fn policy(&self) -> RetryPolicy {
        RetryPolicy {
            max_attempts: self.max_attempts,
            initial_backoff: Duration::from_millis(self.initial_backoff_ms),
            max_backoff: Duration::from_millis(self.max_backoff_ms),
        }
    }
}
