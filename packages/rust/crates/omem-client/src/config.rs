//! Client configuration.
//!
//! Sources, later overriding earlier:
//! - Built-in defaults
//! - YAML file (`ClientConfig::from_yaml_path`)
//! - Environment: `OMEM_ENDPOINT`, `OMEM_TENANT_ID`, `OMEM_API_KEY`,
//!   `OMEM_MEMORY_DOMAIN`, `OMEM_TIMEOUT_SECS`

use std::path::Path;
use std::time::Duration;

use serde::Deserialize;

use crate::error::ValidationError;

const DEFAULT_ENDPOINT: &str = "http://localhost:8000";
const DEFAULT_MEMORY_DOMAIN: &str = "dialog";
const DEFAULT_REQUEST_TIMEOUT_SECS: u64 = 30;
const DEFAULT_POLL_INTERVAL_MS: u64 = 1_000;
const DEFAULT_MAX_ATTEMPTS: u32 = 3;
const DEFAULT_BASE_DELAY_MS: u64 = 500;
const DEFAULT_MAX_DELAY_MS: u64 = 8_000;
const DEFAULT_MAX_ELAPSED_MS: u64 = 30_000;

const ENV_ENDPOINT: &str = "OMEM_ENDPOINT";
const ENV_TENANT_ID: &str = "OMEM_TENANT_ID";
const ENV_API_KEY: &str = "OMEM_API_KEY";
const ENV_MEMORY_DOMAIN: &str = "OMEM_MEMORY_DOMAIN";
const ENV_TIMEOUT_SECS: &str = "OMEM_TIMEOUT_SECS";

/// Backoff settings for transient failures.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Deserialize)]
#[serde(default)]
pub struct RetryConfig {
    /// Attempts per operation, including the first.
    pub max_attempts: u32,
    /// Delay before the first retry.
    pub base_delay_ms: u64,
    /// Cap on any single delay.
    pub max_delay_ms: u64,
    /// Cap on total time spent in one operation including sleeps.
    pub max_elapsed_ms: u64,
    /// Randomise each delay within `[delay/2, delay]`.
    pub jitter: bool,
}

impl Default for RetryConfig {
    fn default() -> Self {
        Self {
            max_attempts: DEFAULT_MAX_ATTEMPTS,
            base_delay_ms: DEFAULT_BASE_DELAY_MS,
            max_delay_ms: DEFAULT_MAX_DELAY_MS,
            max_elapsed_ms: DEFAULT_MAX_ELAPSED_MS,
            jitter: true,
        }
    }
}

impl RetryConfig {
    /// Single attempt, no retries.
    #[must_use]
    pub fn disabled() -> Self {
        Self {
            max_attempts: 1,
            ..Self::default()
        }
    }

    /// Delay before the first retry.
    #[must_use]
    pub fn base_delay(&self) -> Duration {
        Duration::from_millis(self.base_delay_ms)
    }

    /// Cap on any single delay.
    #[must_use]
    pub fn max_delay(&self) -> Duration {
        Duration::from_millis(self.max_delay_ms)
    }

    /// Cap on total elapsed time.
    #[must_use]
    pub fn max_elapsed(&self) -> Duration {
        Duration::from_millis(self.max_elapsed_ms)
    }
}

/// Connection and behaviour settings for [`crate::Memory`].
#[derive(Debug, Clone, PartialEq, Eq, Deserialize)]
#[serde(default)]
pub struct ClientConfig {
    /// Service base URL.
    pub endpoint: String,
    /// Tenant identifier.
    pub tenant_id: String,
    /// API key sent as bearer token.
    pub api_key: String,
    /// User isolation tokens; empty means `[tenant_id]`.
    pub user_tokens: Vec<String>,
    /// Memory domain.
    pub memory_domain: String,
    /// Per-request timeout.
    pub request_timeout_secs: u64,
    /// Stamp turns without an explicit timestamp with the current UTC time.
    pub auto_timestamp: bool,
    /// Job status poll cadence.
    pub poll_interval_ms: u64,
    /// Backoff for transient failures.
    pub retry: RetryConfig,
}

impl Default for ClientConfig {
    fn default() -> Self {
        Self {
            endpoint: DEFAULT_ENDPOINT.to_string(),
            tenant_id: String::new(),
            api_key: String::new(),
            user_tokens: Vec::new(),
            memory_domain: DEFAULT_MEMORY_DOMAIN.to_string(),
            request_timeout_secs: DEFAULT_REQUEST_TIMEOUT_SECS,
            auto_timestamp: true,
            poll_interval_ms: DEFAULT_POLL_INTERVAL_MS,
            retry: RetryConfig::default(),
        }
    }
}

impl ClientConfig {
    /// Defaults with the two required credentials.
    pub fn new(tenant_id: impl Into<String>, api_key: impl Into<String>) -> Self {
        Self {
            tenant_id: tenant_id.into(),
            api_key: api_key.into(),
            ..Self::default()
        }
    }

    /// Set the service base URL.
    #[must_use]
    pub fn with_endpoint(mut self, endpoint: impl Into<String>) -> Self {
        self.endpoint = endpoint.into();
        self
    }

    /// Set the memory domain.
    #[must_use]
    pub fn with_memory_domain(mut self, memory_domain: impl Into<String>) -> Self {
        self.memory_domain = memory_domain.into();
        self
    }

    /// Set user isolation tokens.
    #[must_use]
    pub fn with_user_tokens(mut self, user_tokens: Vec<String>) -> Self {
        self.user_tokens = user_tokens;
        self
    }

    /// Toggle automatic timestamps.
    #[must_use]
    pub fn with_auto_timestamp(mut self, enabled: bool) -> Self {
        self.auto_timestamp = enabled;
        self
    }

    /// Set the job poll cadence.
    #[must_use]
    pub fn with_poll_interval(mut self, interval: Duration) -> Self {
        self.poll_interval_ms = u64::try_from(interval.as_millis()).unwrap_or(u64::MAX);
        self
    }

    /// Set the retry policy.
    #[must_use]
    pub fn with_retry(mut self, retry: RetryConfig) -> Self {
        self.retry = retry;
        self
    }

    /// Load from a YAML file.
    ///
    /// # Errors
    /// Returns [`ValidationError::InvalidConfig`] when the file cannot be read or parsed.
    pub fn from_yaml_path(path: &Path) -> Result<Self, ValidationError> {
        let raw = std::fs::read_to_string(path).map_err(|e| {
            ValidationError::InvalidConfig(format!("read {}: {e}", path.display()))
        })?;
        serde_yaml::from_str(&raw).map_err(|e| {
            ValidationError::InvalidConfig(format!("parse {}: {e}", path.display()))
        })
    }

    /// Defaults overridden by the process environment.
    ///
    /// # Errors
    /// Returns [`ValidationError::InvalidConfig`] when a variable is malformed.
    pub fn from_env() -> Result<Self, ValidationError> {
        Self::default().with_env(|key| std::env::var(key).ok())
    }

    /// Optional YAML file, then environment overrides, then validation.
    ///
    /// # Errors
    /// Returns [`ValidationError::InvalidConfig`] on read, parse or validation failure.
    pub fn load(path: Option<&Path>) -> Result<Self, ValidationError> {
        let base = match path {
            Some(path) => Self::from_yaml_path(path)?,
            None => Self::default(),
        };
        let config = base.with_env(|key| std::env::var(key).ok())?;
        config.validate()?;
        Ok(config)
    }

    /// Apply overrides from `lookup` (an environment reader).
    ///
    /// # Errors
    /// Returns [`ValidationError::InvalidConfig`] when `OMEM_TIMEOUT_SECS` is not an integer.
    pub fn with_env<F>(mut self, lookup: F) -> Result<Self, ValidationError>
    where
        F: Fn(&str) -> Option<String>,
    {
        let read = |key: &str| {
            lookup(key)
                .map(|value| value.trim().to_string())
                .filter(|value| !value.is_empty())
        };
        if let Some(endpoint) = read(ENV_ENDPOINT) {
            self.endpoint = endpoint;
        }
        if let Some(tenant_id) = read(ENV_TENANT_ID) {
            self.tenant_id = tenant_id;
        }
        if let Some(api_key) = read(ENV_API_KEY) {
            self.api_key = api_key;
        }
        if let Some(memory_domain) = read(ENV_MEMORY_DOMAIN) {
            self.memory_domain = memory_domain;
        }
        if let Some(raw) = read(ENV_TIMEOUT_SECS) {
            self.request_timeout_secs = raw.parse().map_err(|_| {
                ValidationError::InvalidConfig(format!("{ENV_TIMEOUT_SECS}={raw:?} is not an integer"))
            })?;
        }
        Ok(self)
    }

    /// Check required fields.
    ///
    /// # Errors
    /// Returns [`ValidationError::InvalidConfig`] naming the first missing field.
    pub fn validate(&self) -> Result<(), ValidationError> {
        if self.endpoint.trim().is_empty() {
            return Err(ValidationError::InvalidConfig("endpoint is required".to_string()));
        }
        if self.tenant_id.trim().is_empty() {
            return Err(ValidationError::InvalidConfig("tenant_id is required".to_string()));
        }
        if self.api_key.trim().is_empty() {
            return Err(ValidationError::InvalidConfig("api_key is required".to_string()));
        }
        Ok(())
    }

    /// User tokens, defaulting to the tenant id.
    #[must_use]
    pub fn effective_user_tokens(&self) -> Vec<String> {
        let tokens: Vec<String> = self
            .user_tokens
            .iter()
            .map(|token| token.trim().to_string())
            .filter(|token| !token.is_empty())
            .collect();
        if tokens.is_empty() {
            vec![self.tenant_id.trim().to_string()]
        } else {
            tokens
        }
    }

    /// Per-request timeout.
    #[must_use]
    pub fn request_timeout(&self) -> Duration {
        Duration::from_secs(self.request_timeout_secs.max(1))
    }

    /// Job status poll cadence.
    #[must_use]
    pub fn poll_interval(&self) -> Duration {
        Duration::from_millis(self.poll_interval_ms.max(1))
    }
}
