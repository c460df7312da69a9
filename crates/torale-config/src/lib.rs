//! Torale configuration system: TOML file with environment variable override.

use serde::{Deserialize, Serialize};
use std::path::Path;
use thiserror::Error;

mod loader;

pub use loader::ConfigLoader;

#[derive(Error, Debug)]
pub enum ConfigError {
    #[error("Failed to read config file: {0}")]
    ReadError(#[from] std::io::Error),

    #[error("Failed to parse TOML: {0}")]
    ParseError(#[from] toml::de::Error),

    #[error("Invalid configuration: {0}")]
    ValidationError(String),
}

/// Root application configuration. Field-for-field mirror of spec.md §6's
/// Configuration list plus the ambient fields a runnable process needs
/// (http port for the health endpoint, log format, scheduler tuning).
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct AppConfig {
    pub database_url: String,
    pub agent: AgentConfig,
    pub webhook: WebhookConfig,
    pub execution: ExecutionConfig,
    pub scheduler: SchedulerConfig,
    pub oauth_encryption_key: String,
    pub http_port: u16,
    pub log_format: String,
}

impl Default for AppConfig {
    fn default() -> Self {
        Self {
            database_url: "postgres://localhost:5432/torale".to_string(),
            agent: AgentConfig::default(),
            webhook: WebhookConfig::default(),
            execution: ExecutionConfig::default(),
            scheduler: SchedulerConfig::default(),
            oauth_encryption_key: String::new(),
            http_port: 8080,
            log_format: "text".to_string(),
        }
    }
}

/// Agent JSON-RPC client configuration (spec.md §4.5, §6).
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct AgentConfig {
    pub url_free: String,
    pub url_paid: String,
    pub timeout_secs: u64,
    pub poll_failure_limit: u32,
}

impl Default for AgentConfig {
    fn default() -> Self {
        Self {
            url_free: "http://localhost:9000/rpc".to_string(),
            url_paid: "http://localhost:9001/rpc".to_string(),
            timeout_secs: 120,
            poll_failure_limit: 3,
        }
    }
}

/// Webhook delivery configuration (spec.md §4.7, §6).
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct WebhookConfig {
    pub retry_interval_secs: u64,
    pub request_timeout_secs: u64,
}

impl Default for WebhookConfig {
    fn default() -> Self {
        Self {
            retry_interval_secs: 5 * 60,
            request_timeout_secs: 30,
        }
    }
}

/// Execution engine configuration: history window, evidence truncation,
/// dedupe window (spec.md §4.4, §4.6, §6).
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct ExecutionConfig {
    pub history_window: u32,
    pub evidence_truncation_chars: usize,
    pub dedupe_window_secs: i64,
    pub default_next_run_hours: i64,
}

impl Default for ExecutionConfig {
    fn default() -> Self {
        Self {
            history_window: 5,
            evidence_truncation_chars: 300,
            dedupe_window_secs: 30,
            default_next_run_hours: 24,
        }
    }
}

/// Scheduler core configuration (spec.md §4.1, §6).
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct SchedulerConfig {
    pub poll_interval_secs: u64,
    pub batch_size: usize,
    pub stale_execution_threshold_secs: i64,
    pub misfire_grace_secs: i64,
}

impl Default for SchedulerConfig {
    fn default() -> Self {
        Self {
            poll_interval_secs: 1,
            batch_size: 100,
            stale_execution_threshold_secs: 30 * 60,
            misfire_grace_secs: 3600,
        }
    }
}

impl AppConfig {
    pub fn from_file(path: &Path) -> Result<Self, ConfigError> {
        let contents = std::fs::read_to_string(path)?;
        let config: AppConfig = toml::from_str(&contents)?;
        Ok(config)
    }

    pub fn validate(&self) -> Result<(), ConfigError> {
        if self.database_url.trim().is_empty() {
            return Err(ConfigError::ValidationError(
                "database_url must not be empty".to_string(),
            ));
        }
        if self.execution.history_window == 0 {
            return Err(ConfigError::ValidationError(
                "execution.history_window must be at least 1".to_string(),
            ));
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn defaults_are_valid() {
        assert!(AppConfig::default().validate().is_ok());
    }

    #[test]
    fn empty_database_url_rejected() {
        let mut config = AppConfig::default();
        config.database_url.clear();
        assert!(config.validate().is_err());
    }

    #[test]
    fn from_file_parses_partial_toml_with_defaults() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("config.toml");
        std::fs::write(&path, "database_url = \"postgres://db/test\"\n").unwrap();
        let config = AppConfig::from_file(&path).unwrap();
        assert_eq!(config.database_url, "postgres://db/test");
        assert_eq!(config.scheduler.batch_size, 100);
    }
}
