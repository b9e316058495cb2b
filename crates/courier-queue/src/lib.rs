use async_trait::async_trait;
use std::collections::HashMap;
use std::sync::Arc;

use courier_common::{EndpointConfig, PublishRequest, QueueMessage, ReceiveRequest, SendRequest};

pub mod error;
pub mod disabled;
pub mod pool;

#[cfg(feature = "sqs")]
pub mod sqs;

#[cfg(feature = "sns")]
pub mod sns;

pub use error::QueueError;
pub use disabled::{DisabledQueueClient, DisabledTopicClient};
pub use pool::QueueClientPool;

pub type Result<T> = std::result::Result<T, QueueError>;

/// Pull-based queue operations for one endpoint
#[async_trait]
pub trait QueueClient: Send + Sync {
    /// Resolve a queue name to its URL. Fails with `NotFound` if the queue
    /// does not exist.
    async fn resolve_queue_url(&self, queue_name: &str) -> Result<String>;

    /// Receive a batch of messages. The request must carry a queue URL.
    async fn receive(&self, request: &ReceiveRequest) -> Result<Vec<QueueMessage>>;

    /// Acknowledge (delete) a message
    async fn delete(&self, queue_url: &str, receipt_handle: &str) -> Result<()>;

    /// Send a message, returning its message ID
    async fn send(&self, request: &SendRequest) -> Result<String>;

    /// Release any resources held by the client
    async fn close(&self) {}
}

/// Push-based topic operations for one endpoint
#[async_trait]
pub trait TopicClient: Send + Sync {
    /// Publish a message, returning its message ID
    async fn publish(&self, request: &PublishRequest) -> Result<String>;

    /// Create (or look up) a topic, returning its ARN
    async fn create_topic(&self, name: &str) -> Result<String>;

    async fn delete_topic(&self, topic_arn: &str) -> Result<()>;

    /// Subscribe an endpoint, returning the subscription ARN
    async fn subscribe(&self, topic_arn: &str, protocol: &str, endpoint: &str) -> Result<String>;

    async fn unsubscribe(&self, subscription_arn: &str) -> Result<()>;

    async fn get_topic_attributes(&self, topic_arn: &str) -> Result<HashMap<String, String>>;

    async fn set_topic_attributes(&self, topic_arn: &str, name: &str, value: &str) -> Result<()>;

    /// List topic ARNs. Returns one page plus the token for the next one.
    async fn list_topics(&self, next_token: Option<&str>) -> Result<(Vec<String>, Option<String>)>;

    async fn close(&self) {}
}

/// Builds a queue client for an endpoint
#[async_trait]
pub trait QueueClientFactory: Send + Sync {
    async fn create(&self, endpoint: &EndpointConfig) -> Result<Arc<dyn QueueClient>>;
}

/// Builds a topic client for an endpoint
#[async_trait]
pub trait TopicClientFactory: Send + Sync {
    async fn create(&self, endpoint: &EndpointConfig) -> Result<Arc<dyn TopicClient>>;
}
