//! Courier Configuration System
//!
//! TOML-based configuration with environment variable overrides.

use serde::{Deserialize, Serialize};
use std::path::Path;
use thiserror::Error;

use courier_common::{BackoffSettings, BreakerSettings, QueueModuleConfig, TopicModuleConfig};

mod loader;

pub use loader::ConfigLoader;

/// Configuration error types
#[derive(Error, Debug)]
pub enum ConfigError {
    #[error("Failed to read config file: {0}")]
    ReadError(#[from] std::io::Error),

    #[error("Failed to parse TOML: {0}")]
    ParseError(#[from] toml::de::Error),

    #[error("Invalid configuration: {0}")]
    ValidationError(String),

    #[error("Environment variable error: {0}")]
    EnvError(String),
}

/// Root application configuration
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(default)]
pub struct AppConfig {
    /// Consumer side: which handlers poll which queues
    pub queue: QueueModuleConfig,
    /// Publisher side: the ordered failover list of topic endpoints
    pub topic: TopicModuleConfig,
    pub breaker: BreakerSettings,
    pub backoff: BackoffSettings,
}

impl AppConfig {
    /// Load configuration from a TOML file
    pub fn from_file<P: AsRef<Path>>(path: P) -> Result<Self, ConfigError> {
        let content = std::fs::read_to_string(path)?;
        Self::from_toml_str(&content)
    }

    pub fn from_toml_str(content: &str) -> Result<Self, ConfigError> {
        let config: AppConfig = toml::from_str(content)?;
        Ok(config)
    }

    /// Load configuration with environment variable override
    pub fn load() -> Result<Self, ConfigError> {
        let loader = ConfigLoader::new();
        loader.load()
    }

    /// Check the configuration for errors that would stop startup.
    ///
    /// Disabled modules and disabled consumers are not checked.
    pub fn validate(&self) -> Result<(), ConfigError> {
        if self.queue.enabled {
            for (index, consumer) in self.queue.consumers.iter().enumerate() {
                if !consumer.enabled {
                    continue;
                }
                if consumer.handler.trim().is_empty() {
                    return Err(ConfigError::ValidationError(format!(
                        "queue.consumers[{}]: handler reference is empty", index
                    )));
                }
                if consumer.endpoints.is_empty() {
                    return Err(ConfigError::ValidationError(format!(
                        "consumer '{}' has no endpoints", consumer.handler
                    )));
                }
                if consumer.concurrency == Some(0) {
                    return Err(ConfigError::ValidationError(format!(
                        "consumer '{}' has zero concurrency", consumer.handler
                    )));
                }
                for endpoint in &consumer.endpoints {
                    if endpoint.queue_name.trim().is_empty() {
                        return Err(ConfigError::ValidationError(format!(
                            "consumer '{}' has an endpoint with an empty queue name", consumer.handler
                        )));
                    }
                    if endpoint.region.trim().is_empty() {
                        return Err(ConfigError::ValidationError(format!(
                            "consumer '{}' endpoint '{}' requires a region",
                            consumer.handler, endpoint.queue_name
                        )));
                    }
                }
            }
        }

        if self.topic.enabled {
            if self.topic.endpoints.is_empty() {
                return Err(ConfigError::ValidationError(
                    "topic module is enabled but no endpoints are configured".to_string(),
                ));
            }
            if self.topic.endpoints.iter().any(|e| e.region.trim().is_empty()) {
                return Err(ConfigError::ValidationError(
                    "every topic endpoint requires a region".to_string(),
                ));
            }
        }

        if self.breaker.failure_threshold == 0 {
            return Err(ConfigError::ValidationError("breaker.failure_threshold must be > 0".to_string()));
        }
        if self.breaker.success_threshold == 0 {
            return Err(ConfigError::ValidationError("breaker.success_threshold must be > 0".to_string()));
        }
        if self.breaker.buffer_size == 0 {
            return Err(ConfigError::ValidationError("breaker.buffer_size must be > 0".to_string()));
        }
        if self.breaker.failure_threshold > self.breaker.buffer_size {
            return Err(ConfigError::ValidationError(
                "breaker.failure_threshold cannot exceed breaker.buffer_size".to_string(),
            ));
        }
        if self.backoff.base_delay_ms > self.backoff.max_delay_ms {
            return Err(ConfigError::ValidationError(
                "backoff.base_delay_ms cannot exceed backoff.max_delay_ms".to_string(),
            ));
        }

        Ok(())
    }

    /// Generate an example TOML configuration
    pub fn example_toml() -> String {
        r#"# Courier Configuration
# Environment variables (COURIER_*) override these settings

[queue]
enabled = true

[[queue.consumers]]
handler = "log"
enabled = true
concurrency = 2   # replicas per endpoint; omit to use the handler's own level

[[queue.consumers.endpoints]]
queue_name = "orders"
region = "us-east-1"

[[queue.consumers.endpoints]]
queue_name = "orders"
region = "us-east-1"
endpoint = "http://localhost:4566"   # LocalStack

[topic]
enabled = true

# Ordered failover list; the first entry is active at startup
[[topic.endpoints]]
region = "us-east-1"

[[topic.endpoints]]
region = "us-west-2"

[breaker]
failure_threshold = 10
success_threshold = 5
wait_duration_secs = 30
buffer_size = 100

[backoff]
base_delay_ms = 1000
max_delay_ms = 60000
"#
        .to_string()
    }
}
