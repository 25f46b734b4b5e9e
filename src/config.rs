//! Orchestrator configuration for development and production environments.
//!
//! Mirrors the router's `development()`/`production()`/`builder()` pattern:
//! pre-shaped presets for common deployment scenarios, plus a builder for
//! callers that need to override individual fields, plus env var loading for
//! the CLI and server entry points (§6).

#![allow(clippy::missing_errors_doc, clippy::return_self_not_must_use)]

use std::path::PathBuf;

use serde::{Deserialize, Serialize};
use thiserror::Error;

use crate::domain_types::{MaxAttempts, WorkerCount};

/// Configuration errors.
#[derive(Debug, Error)]
pub enum ConfigError {
    /// A field failed validation.
    #[error("invalid configuration: {field} - {reason}")]
    Validation {
        /// Name of the offending field.
        field: String,
        /// Human-readable reason.
        reason: String,
    },

    /// Reading or writing the config file failed.
    #[error("io error: {0}")]
    Io(#[from] std::io::Error),

    /// The config file did not parse as JSON.
    #[error("serialization error: {0}")]
    Serialization(#[from] serde_json::Error),

    /// An environment variable held an unparseable value.
    #[error("invalid value for {var}: {value:?}")]
    EnvVar {
        /// Name of the environment variable.
        var: &'static str,
        /// The raw value that failed to parse.
        value: String,
    },
}

/// Complete orchestrator configuration.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct OrchestratorConfig {
    /// Root directory under which all JSON stores live (§6).
    pub data_root: PathBuf,

    /// Number of Dispatcher worker tasks (§5).
    pub worker_count: WorkerCount,

    /// Transient-failure retry budget before a receipt is marked `failed`.
    pub max_attempts: MaxAttempts,

    /// Initial backoff delay before the first retry, doubled each attempt.
    pub retry_backoff_ms: u64,

    /// Per-call bound on a Delivery Adapter `deliver` invocation; a call
    /// that does not return within this window is treated as a
    /// `transient_failure` (§5 "Cancellation & timeouts").
    pub delivery_timeout_ms: u64,

    /// How often the Bridge emits a periodic status update for a task that
    /// has seen no other activity (§4.10, "5-minute-ish").
    pub status_update_interval_secs: u64,

    /// Minimum distinct reviewers to cycle through before a reviewer may be
    /// picked again, floor-clamped to the number of eligible reviewers
    /// (§9 Open Question, resolved in `SPEC_FULL.md` as
    /// `max(20, eligible_reviewer_count)`).
    pub reviewer_fairness_window: usize,

    /// Emit `tracing` spans/events as JSON instead of human-readable text.
    pub json_logs: bool,
}

impl OrchestratorConfig {
    /// Development configuration: a throwaway data root under `./data`,
    /// one worker, short backoffs, and human-readable logs.
    #[must_use]
    pub fn development() -> Self {
        Self {
            data_root: PathBuf::from("./data"),
            worker_count: WorkerCount::try_new(2).expect("2 is a valid WorkerCount"),
            max_attempts: MaxAttempts::try_new(3).expect("3 is a valid MaxAttempts"),
            retry_backoff_ms: 200,
            delivery_timeout_ms: 5_000,
            status_update_interval_secs: 300,
            reviewer_fairness_window: 20,
            json_logs: false,
        }
    }

    /// Production configuration: more workers, a conservative retry budget,
    /// and structured JSON logs.
    #[must_use]
    pub fn production() -> Self {
        Self {
            data_root: PathBuf::from("/var/lib/orchestrator"),
            worker_count: WorkerCount::try_new(8).expect("8 is a valid WorkerCount"),
            max_attempts: MaxAttempts::try_new(5).expect("5 is a valid MaxAttempts"),
            retry_backoff_ms: 500,
            delivery_timeout_ms: 5_000,
            status_update_interval_secs: 300,
            reviewer_fairness_window: 20,
            json_logs: true,
        }
    }

    /// Configuration suitable for tests: an isolated data root must be
    /// supplied by the caller (typically a [`tempfile::TempDir`]), with
    /// otherwise-minimal resource use.
    #[must_use]
    pub fn testing(data_root: PathBuf) -> Self {
        Self {
            data_root,
            worker_count: WorkerCount::try_new(1).expect("1 is a valid WorkerCount"),
            max_attempts: MaxAttempts::try_new(2).expect("2 is a valid MaxAttempts"),
            retry_backoff_ms: 1,
            delivery_timeout_ms: 50,
            status_update_interval_secs: 1,
            reviewer_fairness_window: 20,
            json_logs: false,
        }
    }

    /// Starts a builder seeded with development defaults.
    #[must_use]
    pub fn builder() -> OrchestratorConfigBuilder {
        OrchestratorConfigBuilder::new()
    }

    /// Overlays values from the `ORCHESTRATOR_*` environment variables onto
    /// this configuration.
    ///
    /// Recognized variables: `ORCHESTRATOR_DATA_ROOT`, `ORCHESTRATOR_MODE`
    /// (`development` | `production`, selects the base preset before
    /// overlay), `ORCHESTRATOR_WORKERS`.
    ///
    /// # Errors
    ///
    /// Returns [`ConfigError::EnvVar`] if a recognized variable is set but
    /// does not parse, and [`ConfigError::Validation`] if the result fails
    /// [`Self::validate`].
    pub fn from_env() -> Result<Self, ConfigError> {
        let mut config = match std::env::var("ORCHESTRATOR_MODE").as_deref() {
            Ok("production") => Self::production(),
            _ => Self::development(),
        };

        if let Ok(root) = std::env::var("ORCHESTRATOR_DATA_ROOT") {
            config.data_root = PathBuf::from(root);
        }

        if let Ok(raw) = std::env::var("ORCHESTRATOR_WORKERS") {
            let parsed: usize = raw.parse().map_err(|_| ConfigError::EnvVar {
                var: "ORCHESTRATOR_WORKERS",
                value: raw.clone(),
            })?;
            config.worker_count =
                WorkerCount::try_new(parsed).map_err(|_| ConfigError::EnvVar {
                    var: "ORCHESTRATOR_WORKERS",
                    value: raw,
                })?;
        }

        config.validate()?;
        Ok(config)
    }

    /// Checks cross-field consistency.
    ///
    /// # Errors
    ///
    /// Returns [`ConfigError::Validation`] if `retry_backoff_ms` is zero or
    /// `status_update_interval_secs` is zero.
    pub fn validate(&self) -> Result<(), ConfigError> {
        if self.retry_backoff_ms == 0 {
            return Err(ConfigError::Validation {
                field: "retry_backoff_ms".to_string(),
                reason: "must be greater than zero".to_string(),
            });
        }

        if self.status_update_interval_secs == 0 {
            return Err(ConfigError::Validation {
                field: "status_update_interval_secs".to_string(),
                reason: "must be greater than zero".to_string(),
            });
        }

        if self.delivery_timeout_ms == 0 {
            return Err(ConfigError::Validation {
                field: "delivery_timeout_ms".to_string(),
                reason: "must be greater than zero".to_string(),
            });
        }

        Ok(())
    }

    /// Writes this configuration to `path` as pretty JSON.
    pub fn save_to_file<P: AsRef<std::path::Path>>(&self, path: P) -> Result<(), ConfigError> {
        let json = serde_json::to_string_pretty(self)?;
        std::fs::write(path, json)?;
        Ok(())
    }

    /// Reads a configuration from `path` and validates it.
    pub fn load_from_file<P: AsRef<std::path::Path>>(path: P) -> Result<Self, ConfigError> {
        let json = std::fs::read_to_string(path)?;
        let config: Self = serde_json::from_str(&json)?;
        config.validate()?;
        Ok(config)
    }
}

impl Default for OrchestratorConfig {
    fn default() -> Self {
        Self::development()
    }
}

/// Builder for custom orchestrator configurations.
pub struct OrchestratorConfigBuilder {
    config: OrchestratorConfig,
}

impl OrchestratorConfigBuilder {
    /// Starts from development defaults.
    #[must_use]
    pub fn new() -> Self {
        Self {
            config: OrchestratorConfig::development(),
        }
    }

    /// Sets the data root directory.
    #[must_use]
    pub fn data_root(mut self, path: impl Into<PathBuf>) -> Self {
        self.config.data_root = path.into();
        self
    }

    /// Sets the worker pool size.
    #[must_use]
    pub fn worker_count(mut self, count: WorkerCount) -> Self {
        self.config.worker_count = count;
        self
    }

    /// Sets the retry budget.
    #[must_use]
    pub fn max_attempts(mut self, max_attempts: MaxAttempts) -> Self {
        self.config.max_attempts = max_attempts;
        self
    }

    /// Sets the retry backoff base, in milliseconds.
    #[must_use]
    pub fn retry_backoff_ms(mut self, ms: u64) -> Self {
        self.config.retry_backoff_ms = ms;
        self
    }

    /// Sets the per-call Delivery Adapter timeout, in milliseconds.
    #[must_use]
    pub fn delivery_timeout_ms(mut self, ms: u64) -> Self {
        self.config.delivery_timeout_ms = ms;
        self
    }

    /// Sets the Bridge's periodic status update interval, in seconds.
    #[must_use]
    pub fn status_update_interval_secs(mut self, secs: u64) -> Self {
        self.config.status_update_interval_secs = secs;
        self
    }

    /// Sets whether logs are emitted as JSON.
    #[must_use]
    pub fn json_logs(mut self, enabled: bool) -> Self {
        self.config.json_logs = enabled;
        self
    }

    /// Validates and returns the built configuration.
    ///
    /// # Errors
    ///
    /// Returns [`ConfigError::Validation`] if the accumulated fields fail
    /// [`OrchestratorConfig::validate`].
    pub fn build(self) -> Result<OrchestratorConfig, ConfigError> {
        self.config.validate()?;
        Ok(self.config)
    }
}

impl Default for OrchestratorConfigBuilder {
    fn default() -> Self {
        Self::new()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn development_preset_validates() {
        OrchestratorConfig::development().validate().unwrap();
    }

    #[test]
    fn production_preset_validates() {
        OrchestratorConfig::production().validate().unwrap();
    }

    #[test]
    fn builder_rejects_zero_backoff() {
        let result = OrchestratorConfig::builder().retry_backoff_ms(0).build();
        assert!(result.is_err());
    }

    #[test]
    fn builder_overrides_take_effect() {
        let config = OrchestratorConfig::builder()
            .data_root("/tmp/orchestrator-test")
            .worker_count(WorkerCount::try_new(6).unwrap())
            .build()
            .unwrap();
        assert_eq!(config.data_root, PathBuf::from("/tmp/orchestrator-test"));
        assert_eq!(config.worker_count.as_usize(), 6);
    }
}
