use crate::bus::{AckPolicy, RetryPolicy, SessionOptions};
use crate::pipeline::PipelineSettings;
use serde::{Deserialize, Serialize};
use std::fs;
use std::path::{Path, PathBuf};
use std::time::Duration;
use tracing::{debug, info};

fn default_poll_interval_ms() -> u64 {
    1
}

fn default_queue_capacity() -> usize {
    1000
}

fn default_flush_timeout_ms() -> u64 {
    5000
}

fn default_message_timeout_ms() -> u64 {
    300_000
}

/// Bridge configuration as read from disk.
///
/// TOML is the native format. JSON files are accepted too, including the
/// legacy key names `kafkaIp`, `kafkaPort`, `kafkaTopic` and `joystick`.
#[derive(Deserialize, Serialize, Clone, Debug, PartialEq)]
pub struct BridgeConfig {
    #[serde(alias = "kafkaIp")]
    pub broker_host: String,
    #[serde(alias = "kafkaPort")]
    pub broker_port: u16,
    #[serde(alias = "kafkaTopic")]
    pub topic: String,
    #[serde(alias = "joystick")]
    pub device: PathBuf,

    /// Defaults to the local hostname.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub client_id: Option<String>,
    #[serde(default = "default_poll_interval_ms")]
    pub poll_interval_ms: u64,
    #[serde(default)]
    pub acks: AckPolicy,
    #[serde(default = "default_queue_capacity")]
    pub queue_capacity: usize,
    #[serde(default = "default_flush_timeout_ms")]
    pub flush_timeout_ms: u64,
    /// Per-message delivery deadline, client retries included.
    #[serde(default = "default_message_timeout_ms")]
    pub message_timeout_ms: u64,
    #[serde(default)]
    pub retry: RetryPolicy,
}

// Config errors
#[derive(Debug, thiserror::Error)]
pub enum ConfigError {
    #[error("Failed to read {}: {source}", path.display())]
    Read {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },

    #[error("Invalid TOML: {0}")]
    Toml(#[from] toml::de::Error),

    #[error("Invalid JSON: {0}")]
    Json(#[from] serde_json::Error),

    #[error("Invalid value for {field}: {reason}")]
    Invalid { field: &'static str, reason: String },
}

impl BridgeConfig {
    pub fn load(path: impl AsRef<Path>) -> Result<Self, ConfigError> {
        let path = path.as_ref();
        debug!("Reading configuration from {}", path.display());
        let content = fs::read_to_string(path).map_err(|source| ConfigError::Read {
            path: path.to_path_buf(),
            source,
        })?;

        let is_json = path
            .extension()
            .is_some_and(|ext| ext.eq_ignore_ascii_case("json"));
        let config = if is_json {
            Self::from_json_str(&content)?
        } else {
            Self::from_toml_str(&content)?
        };
        info!("Loaded configuration from {}", path.display());
        Ok(config)
    }

    pub fn from_toml_str(content: &str) -> Result<Self, ConfigError> {
        let config: Self = toml::from_str(content)?;
        config.validate()?;
        Ok(config)
    }

    pub fn from_json_str(content: &str) -> Result<Self, ConfigError> {
        let config: Self = serde_json::from_str(content)?;
        config.validate()?;
        Ok(config)
    }

    /// Local sanity checks. Broker options are checked by the session itself.
    pub fn validate(&self) -> Result<(), ConfigError> {
        if self.poll_interval_ms == 0 {
            return Err(ConfigError::Invalid {
                field: "poll_interval_ms",
                reason: "must be at least 1".to_string(),
            });
        }
        if self.queue_capacity == 0 {
            return Err(ConfigError::Invalid {
                field: "queue_capacity",
                reason: "must be at least 1".to_string(),
            });
        }
        if self.device.as_os_str().is_empty() {
            return Err(ConfigError::Invalid {
                field: "device",
                reason: "path is empty".to_string(),
            });
        }
        Ok(())
    }

    pub fn pipeline_settings(&self) -> PipelineSettings {
        PipelineSettings {
            poll_interval: Duration::from_millis(self.poll_interval_ms),
            flush_timeout: Duration::from_millis(self.flush_timeout_ms),
            ..PipelineSettings::default()
        }
    }

    pub fn session_options(&self, client_id: String) -> SessionOptions {
        SessionOptions {
            host: self.broker_host.clone(),
            port: self.broker_port,
            client_id,
            acks: self.acks,
            queue_capacity: self.queue_capacity,
            message_timeout: Duration::from_millis(self.message_timeout_ms),
            retry: self.retry,
        }
    }

    pub fn render(&self) -> String {
        toml::to_string_pretty(self).unwrap_or_else(|_| format!("{:#?}", self))
    }
}
