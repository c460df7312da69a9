//! Configuration loader with file and environment variable support.

use crate::{AppConfig, ConfigError};
use std::env;
use std::path::PathBuf;
use tracing::info;

const CONFIG_PATHS: &[&str] = &[
    "config.toml",
    "./config/config.toml",
    "/etc/torale/config.toml",
];

pub struct ConfigLoader {
    config_path: Option<PathBuf>,
}

impl Default for ConfigLoader {
    fn default() -> Self {
        Self::new()
    }
}

impl ConfigLoader {
    pub fn new() -> Self {
        Self { config_path: None }
    }

    pub fn with_path<P: Into<PathBuf>>(path: P) -> Self {
        Self {
            config_path: Some(path.into()),
        }
    }

    /// Load configuration from file (if found) with environment variable
    /// overrides, matching `fc-config::ConfigLoader::load`'s precedence:
    /// defaults < file < env.
    pub fn load(&self) -> Result<AppConfig, ConfigError> {
        let mut config = AppConfig::default();

        if let Some(path) = self.find_config_file() {
            info!(?path, "loading configuration from file");
            config = AppConfig::from_file(&path)?;
        }

        self.apply_env_overrides(&mut config);
        config.validate()?;
        Ok(config)
    }

    fn find_config_file(&self) -> Option<PathBuf> {
        if let Some(path) = &self.config_path {
            if path.exists() {
                return Some(path.clone());
            }
        }

        if let Ok(path) = env::var("TORALE_CONFIG") {
            let path = PathBuf::from(path);
            if path.exists() {
                return Some(path);
            }
        }

        for path in CONFIG_PATHS {
            let path = PathBuf::from(path);
            if path.exists() {
                return Some(path);
            }
        }

        None
    }

    fn apply_env_overrides(&self, config: &mut AppConfig) {
        if let Ok(val) = env::var("TORALE_DATABASE_URL") {
            config.database_url = val;
        }
        if let Ok(val) = env::var("TORALE_OAUTH_ENCRYPTION_KEY") {
            config.oauth_encryption_key = val;
        }
        if let Ok(val) = env::var("TORALE_HTTP_PORT") {
            if let Ok(port) = val.parse() {
                config.http_port = port;
            }
        }
        if let Ok(val) = env::var("LOG_FORMAT") {
            config.log_format = val;
        }

        if let Ok(val) = env::var("TORALE_AGENT_URL_FREE") {
            config.agent.url_free = val;
        }
        if let Ok(val) = env::var("TORALE_AGENT_URL_PAID") {
            config.agent.url_paid = val;
        }
        if let Ok(val) = env::var("TORALE_AGENT_TIMEOUT_SECS") {
            if let Ok(secs) = val.parse() {
                config.agent.timeout_secs = secs;
            }
        }
        if let Ok(val) = env::var("TORALE_AGENT_POLL_FAILURE_LIMIT") {
            if let Ok(limit) = val.parse() {
                config.agent.poll_failure_limit = limit;
            }
        }

        if let Ok(val) = env::var("TORALE_WEBHOOK_RETRY_INTERVAL_SECS") {
            if let Ok(secs) = val.parse() {
                config.webhook.retry_interval_secs = secs;
            }
        }

        if let Ok(val) = env::var("TORALE_HISTORY_WINDOW") {
            if let Ok(n) = val.parse() {
                config.execution.history_window = n;
            }
        }
        if let Ok(val) = env::var("TORALE_EVIDENCE_TRUNCATION") {
            if let Ok(n) = val.parse() {
                config.execution.evidence_truncation_chars = n;
            }
        }
        if let Ok(val) = env::var("TORALE_DEDUPE_WINDOW_SECS") {
            if let Ok(n) = val.parse() {
                config.execution.dedupe_window_secs = n;
            }
        }

        if let Ok(val) = env::var("TORALE_SCHEDULER_POLL_INTERVAL_SECS") {
            if let Ok(n) = val.parse() {
                config.scheduler.poll_interval_secs = n;
            }
        }
        if let Ok(val) = env::var("TORALE_STALE_EXECUTION_THRESHOLD_SECS") {
            if let Ok(n) = val.parse() {
                config.scheduler.stale_execution_threshold_secs = n;
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn loader_without_file_returns_defaults() {
        let loader = ConfigLoader::with_path("/nonexistent/torale.toml");
        let config = loader.load().unwrap();
        assert_eq!(config.scheduler.batch_size, 100);
    }
}
