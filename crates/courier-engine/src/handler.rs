use async_trait::async_trait;
use std::collections::HashMap;
use std::sync::Arc;

use courier_common::{ConsumerEvent, QueueMessage, ReceiveRequest};

/// Application logic invoked for each received message.
///
/// One instance is shared by every replica and endpoint of its consumer, so
/// `consume` must tolerate concurrent calls. Handlers that do blocking work
/// should hand it to `tokio::task::spawn_blocking`.
#[async_trait]
pub trait ConsumerHandler: Send + Sync + 'static {
    /// Process one message. An error is logged; the message is still deleted.
    async fn consume(&self, message: &QueueMessage) -> anyhow::Result<()>;

    /// Receive parameters for each poll. Leave the queue URL unset to have
    /// the worker fill it in.
    fn receive_request(&self) -> ReceiveRequest {
        ReceiveRequest::default()
    }

    /// Replicas per endpoint when the configuration does not say
    fn concurrency_level(&self) -> u32 {
        1
    }

    /// Lifecycle notification for one worker polling `queue_name`
    fn on_event(&self, _event: ConsumerEvent, _queue_name: &str) {}
}

/// Explicit mapping from a configured handler reference to its instance
#[derive(Default, Clone)]
pub struct HandlerRegistry {
    handlers: HashMap<String, Arc<dyn ConsumerHandler>>,
}

impl HandlerRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    /// Register a handler under `id`, replacing any earlier registration.
    pub fn register(&mut self, id: impl Into<String>, handler: Arc<dyn ConsumerHandler>) -> &mut Self {
        self.handlers.insert(id.into(), handler);
        self
    }

    pub fn with(mut self, id: impl Into<String>, handler: Arc<dyn ConsumerHandler>) -> Self {
        self.register(id, handler);
        self
    }

    pub fn get(&self, id: &str) -> Option<Arc<dyn ConsumerHandler>> {
        self.handlers.get(id).cloned()
    }

    pub fn contains(&self, id: &str) -> bool {
        self.handlers.contains_key(id)
    }

    pub fn len(&self) -> usize {
        self.handlers.len()
    }

    pub fn is_empty(&self) -> bool {
        self.handlers.is_empty()
    }
}
