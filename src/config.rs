use config::builder::DefaultState;
use config::{Config, ConfigBuilder, ConfigError, Environment, File};
use serde::Deserialize;
use std::path::PathBuf;
use std::time::Duration;

use crate::monitor::MonitorConfig;
use crate::retry::RetryPolicy;

#[derive(Debug, Deserialize, Clone)]
pub struct Settings {
    pub api_base_url: String,
    pub poll_interval_ms: u64,
    pub stall_timeout_secs: u64,
    pub error_threshold: u32,
    pub max_retries: u32,
    pub retry_cooldown_secs: u64,
    pub health_interval_secs: u64,
    pub history_db: PathBuf,
    pub history_limit: usize,
    pub log_level: String,
}

impl Settings {
    pub fn new() -> Result<Self, ConfigError> {
        Self::builder()?
            // Config file (optional)
            .add_source(File::with_name("artifact-monitor").required(false))
            // Environment variables (e.g. ARTIFACT_MONITOR_API_BASE_URL=http://ci:3000/api)
            .add_source(Environment::with_prefix("ARTIFACT_MONITOR"))
            .build()?
            .try_deserialize()
    }

    fn builder() -> Result<ConfigBuilder<DefaultState>, ConfigError> {
        Ok(Config::builder()
            .set_default("api_base_url", "http://localhost:3000/api")?
            .set_default("poll_interval_ms", 1000)?
            .set_default("stall_timeout_secs", 30)?
            .set_default("error_threshold", 3)?
            .set_default("max_retries", 3)?
            .set_default("retry_cooldown_secs", 5)?
            .set_default("health_interval_secs", 5)?
            .set_default("history_db", "download_history.db")?
            .set_default("history_limit", 100)?
            .set_default("log_level", "info")?)
    }

    pub fn monitor_config(&self) -> MonitorConfig {
        MonitorConfig {
            poll_interval: Duration::from_millis(self.poll_interval_ms),
            stall_timeout: Duration::from_secs(self.stall_timeout_secs),
            retry: RetryPolicy {
                error_threshold: self.error_threshold,
                max_retries: self.max_retries,
                cooldown: Duration::from_secs(self.retry_cooldown_secs),
            },
        }
    }

    pub fn health_interval(&self) -> Duration {
        Duration::from_secs(self.health_interval_secs)
    }
}
