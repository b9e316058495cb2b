use serde::{Deserialize, Serialize};
use std::collections::HashMap;

pub mod logging;

// ============================================================================
// Endpoint Configuration
// ============================================================================

/// Identifies one queue or topic target.
///
/// Immutable once loaded. Clients are cached per `(region, endpoint)` pair, so
/// several queues living behind the same endpoint share one client.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize, Default)]
#[serde(default)]
pub struct EndpointConfig {
    /// Queue name to poll. Empty for topic endpoints.
    pub queue_name: String,
    /// AWS region name, e.g. `us-east-1`
    pub region: String,
    /// Optional endpoint URL override (LocalStack, VPC endpoints, ...)
    pub endpoint: Option<String>,
}

impl EndpointConfig {
    pub fn new(queue_name: impl Into<String>, region: impl Into<String>) -> Self {
        Self {
            queue_name: queue_name.into(),
            region: region.into(),
            endpoint: None,
        }
    }

    pub fn with_endpoint(mut self, endpoint: impl Into<String>) -> Self {
        self.endpoint = Some(endpoint.into());
        self
    }

    /// Client cache key: region plus endpoint override.
    pub fn cache_key(&self) -> String {
        format!("{}:{}", self.region, self.endpoint.as_deref().unwrap_or("none"))
    }

    /// Stable name for the per-worker circuit breaker.
    pub fn breaker_name(&self) -> String {
        format!("sqs-{}", self.queue_name)
    }
}

// ============================================================================
// Module Configuration
// ============================================================================

/// Queue (consumer) module configuration
#[derive(Debug, Clone, Serialize, Deserialize, Default)]
#[serde(default)]
pub struct QueueModuleConfig {
    pub enabled: bool,
    pub consumers: Vec<ConsumerConfig>,
}

/// One consumer descriptor: a handler reference, how many replicas to run
/// and which endpoints each replica polls.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct ConsumerConfig {
    /// Key into the handler registration table
    pub handler: String,
    pub enabled: bool,
    /// Replica count per endpoint. Falls back to the handler's own
    /// concurrency level when absent.
    pub concurrency: Option<u32>,
    pub endpoints: Vec<EndpointConfig>,
}

impl Default for ConsumerConfig {
    fn default() -> Self {
        Self {
            handler: String::new(),
            enabled: true,
            concurrency: None,
            endpoints: Vec::new(),
        }
    }
}

/// Topic (publisher) module configuration
#[derive(Debug, Clone, Serialize, Deserialize, Default)]
#[serde(default)]
pub struct TopicModuleConfig {
    pub enabled: bool,
    pub endpoints: Vec<EndpointConfig>,
}

/// Circuit breaker tuning shared by consumers and the publisher
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct BreakerSettings {
    /// Counted failures within the window that open the circuit
    pub failure_threshold: u32,
    /// Successes in half-open before closing
    pub success_threshold: u32,
    /// Seconds an open circuit waits before permitting a probe
    pub wait_duration_secs: u64,
    /// Size of the sliding window of recent call outcomes
    pub buffer_size: u32,
}

impl Default for BreakerSettings {
    fn default() -> Self {
        Self {
            failure_threshold: 10,
            success_threshold: 5,
            wait_duration_secs: 30,
            buffer_size: 100,
        }
    }
}

/// Backoff pacing used by consumer workers while their circuit is open
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct BackoffSettings {
    pub base_delay_ms: u64,
    pub max_delay_ms: u64,
}

impl Default for BackoffSettings {
    fn default() -> Self {
        Self {
            base_delay_ms: 1000,
            max_delay_ms: 60000,
        }
    }
}

// ============================================================================
// Queue Message Types
// ============================================================================

/// A message received from a queue
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct QueueMessage {
    pub message_id: String,
    pub body: String,
    pub receipt_handle: String,
    #[serde(default)]
    pub attributes: HashMap<String, String>,
    #[serde(default)]
    pub message_attributes: HashMap<String, String>,
}

impl QueueMessage {
    pub fn new(
        message_id: impl Into<String>,
        body: impl Into<String>,
        receipt_handle: impl Into<String>,
    ) -> Self {
        Self {
            message_id: message_id.into(),
            body: body.into(),
            receipt_handle: receipt_handle.into(),
            attributes: HashMap::new(),
            message_attributes: HashMap::new(),
        }
    }
}

/// Parameters for a receive (poll) call.
///
/// The default is a 20-second long poll for up to 10 messages with the queue
/// URL left unset, in which case the worker fills it from its cache.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ReceiveRequest {
    pub queue_url: Option<String>,
    pub max_number_of_messages: i32,
    pub wait_time_seconds: i32,
    pub visibility_timeout: Option<i32>,
    pub attribute_names: Vec<String>,
    pub message_attribute_names: Vec<String>,
}

impl ReceiveRequest {
    pub const DEFAULT_WAIT_TIME_SECONDS: i32 = 20;

    pub fn with_queue_url(mut self, queue_url: impl Into<String>) -> Self {
        self.queue_url = Some(queue_url.into());
        self
    }

    pub fn has_queue_url(&self) -> bool {
        self.queue_url.as_deref().is_some_and(|url| !url.is_empty())
    }
}

impl Default for ReceiveRequest {
    fn default() -> Self {
        Self {
            queue_url: None,
            max_number_of_messages: 10,
            wait_time_seconds: Self::DEFAULT_WAIT_TIME_SECONDS,
            visibility_timeout: None,
            attribute_names: Vec::new(),
            message_attribute_names: Vec::new(),
        }
    }
}

/// Parameters for a send call
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct SendRequest {
    pub queue_url: String,
    pub body: String,
    pub delay_seconds: Option<i32>,
    /// FIFO queues only
    pub message_group_id: Option<String>,
    /// FIFO queues only
    pub message_deduplication_id: Option<String>,
    pub message_attributes: HashMap<String, String>,
}

/// Parameters for a topic publish call
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct PublishRequest {
    pub topic_arn: String,
    pub message: String,
    pub subject: Option<String>,
    pub message_attributes: HashMap<String, String>,
}

impl PublishRequest {
    pub fn new(topic_arn: impl Into<String>, message: impl Into<String>) -> Self {
        Self {
            topic_arn: topic_arn.into(),
            message: message.into(),
            ..Default::default()
        }
    }

    pub fn with_subject(mut self, subject: impl Into<String>) -> Self {
        self.subject = Some(subject.into());
        self
    }
}

// ============================================================================
// Consumer Events
// ============================================================================

/// Lifecycle notifications delivered to consumer handlers
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum ConsumerEvent {
    /// Worker poll loop started
    Started,
    /// Worker poll loop finished after shutdown
    Stopped,
    /// Worker's circuit opened; polling is paced by backoff
    Suspended,
    /// Worker's circuit closed again
    Resumed,
}

impl std::fmt::Display for ConsumerEvent {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let name = match self {
            ConsumerEvent::Started => "Started",
            ConsumerEvent::Stopped => "Stopped",
            ConsumerEvent::Suspended => "Suspended",
            ConsumerEvent::Resumed => "Resumed",
        };
        f.write_str(name)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_cache_key_uses_region_and_endpoint() {
        let plain = EndpointConfig::new("orders", "us-east-1");
        assert_eq!(plain.cache_key(), "us-east-1:none");

        let local = EndpointConfig::new("orders", "us-east-1").with_endpoint("http://localhost:4566");
        assert_eq!(local.cache_key(), "us-east-1:http://localhost:4566");

        // Queue name is not part of the key
        let other = EndpointConfig::new("invoices", "us-east-1");
        assert_eq!(other.cache_key(), plain.cache_key());
    }

    #[test]
    fn test_default_receive_request_is_long_poll() {
        let request = ReceiveRequest::default();
        assert_eq!(request.wait_time_seconds, 20);
        assert!(!request.has_queue_url());
        assert!(request.with_queue_url("http://q").has_queue_url());
    }

    #[test]
    fn test_consumer_config_defaults_from_toml_shape() {
        let json = r#"{"handler": "audit", "endpoints": [{"queue_name": "a", "region": "eu-west-1"}]}"#;
        let config: ConsumerConfig = serde_json::from_str(json).unwrap();
        assert!(config.enabled);
        assert_eq!(config.concurrency, None);
        assert_eq!(config.endpoints[0].endpoint, None);
    }
}
