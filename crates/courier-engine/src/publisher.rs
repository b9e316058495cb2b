//! Topic Publisher - failover pool over topic clients
//!
//! Every operation goes through the active client, guarded by one shared
//! breaker named `sns`. When that breaker goes from CLOSED to OPEN the active
//! index moves to the next client, round-robin.
//!
//! A disabled publisher holds a single [`DisabledTopicClient`] and calls it
//! directly, so every operation fails with `Disabled` and the breaker never
//! sees it.

use std::collections::HashMap;
use std::future::Future;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Arc;
use tracing::{info, warn};

use courier_common::{PublishRequest, TopicModuleConfig};
use courier_queue::{DisabledTopicClient, QueueError, TopicClient, TopicClientFactory};

use crate::circuit_breaker::{CircuitBreaker, CircuitBreakerConfig, CircuitBreakerStats};
use crate::{ConsumerError, Result};

pub const PUBLISHER_BREAKER_NAME: &str = "sns";

/// The client list plus the index of the active one
struct ActiveClientSet {
    clients: Vec<Arc<dyn TopicClient>>,
    active: AtomicUsize,
}

impl ActiveClientSet {
    fn active(&self) -> Option<Arc<dyn TopicClient>> {
        self.clients.get(self.active.load(Ordering::SeqCst)).cloned()
    }

    /// Advance to the next client. No-op with one client or none.
    fn trigger_failover(&self) {
        let size = self.clients.len();
        if size <= 1 {
            return;
        }
        let result = self.active.fetch_update(Ordering::SeqCst, Ordering::SeqCst, |index| {
            Some((index + 1) % size)
        });
        if let Ok(previous) = result {
            warn!(from = previous, to = (previous + 1) % size, clients = size, "Topic client failover");
        }
    }
}

pub struct TopicPublisher {
    enabled: bool,
    clients: Arc<ActiveClientSet>,
    breaker: Arc<CircuitBreaker>,
}

impl TopicPublisher {
    /// Build a publisher over already-created clients. The first client is
    /// active. Fails if enabled with no clients; when disabled the clients
    /// are ignored.
    pub fn new(
        enabled: bool,
        clients: Vec<Arc<dyn TopicClient>>,
        breaker_config: CircuitBreakerConfig,
    ) -> Result<Self> {
        if enabled && clients.is_empty() {
            return Err(ConsumerError::Config(
                "topic module is enabled but no endpoints are configured".to_string(),
            ));
        }

        let clients = if enabled {
            clients
        } else {
            vec![Arc::new(DisabledTopicClient) as Arc<dyn TopicClient>]
        };
        let clients = Arc::new(ActiveClientSet {
            clients,
            active: AtomicUsize::new(0),
        });
        let breaker = Arc::new(CircuitBreaker::new(PUBLISHER_BREAKER_NAME, breaker_config));

        {
            let clients = Arc::clone(&clients);
            breaker.on_state_transition(move |transition| {
                if transition.is_closed_to_open() {
                    clients.trigger_failover();
                }
            });
        }

        let publisher = Self { enabled, clients, breaker };
        info!(enabled, clients = publisher.client_count(), "Topic publisher created");
        Ok(publisher)
    }

    /// Create one client per configured endpoint, in order.
    pub async fn connect(
        config: &TopicModuleConfig,
        breaker_config: CircuitBreakerConfig,
        factory: &dyn TopicClientFactory,
    ) -> Result<Self> {
        let mut clients = Vec::new();
        if config.enabled {
            for endpoint in &config.endpoints {
                clients.push(factory.create(endpoint).await?);
            }
        }
        Self::new(config.enabled, clients, breaker_config)
    }

    pub fn is_enabled(&self) -> bool {
        self.enabled
    }

    /// Configured clients; zero when disabled
    pub fn client_count(&self) -> usize {
        if self.enabled {
            self.clients.clients.len()
        } else {
            0
        }
    }

    pub fn active_index(&self) -> usize {
        self.clients.active.load(Ordering::SeqCst)
    }

    pub fn breaker(&self) -> &Arc<CircuitBreaker> {
        &self.breaker
    }

    pub fn breaker_stats(&self) -> CircuitBreakerStats {
        self.breaker.stats()
    }

    /// Advance the active client by hand
    pub fn trigger_failover(&self) {
        self.clients.trigger_failover();
    }

    /// Run `operation` on the active client, through the breaker when enabled.
    async fn with_active<T, F, Fut>(&self, operation: F) -> std::result::Result<T, QueueError>
    where
        F: FnOnce(Arc<dyn TopicClient>) -> Fut,
        Fut: Future<Output = std::result::Result<T, QueueError>>,
    {
        let client = self.clients.active().ok_or(QueueError::Disabled("SNS"))?;
        if !self.enabled {
            return operation(client).await;
        }
        self.breaker.call(operation(client)).await
    }

    pub async fn publish(&self, request: &PublishRequest) -> std::result::Result<String, QueueError> {
        self.with_active(|client| async move { client.publish(request).await }).await
    }

    pub async fn create_topic(&self, name: &str) -> std::result::Result<String, QueueError> {
        self.with_active(|client| async move { client.create_topic(name).await }).await
    }

    pub async fn delete_topic(&self, topic_arn: &str) -> std::result::Result<(), QueueError> {
        self.with_active(|client| async move { client.delete_topic(topic_arn).await }).await
    }

    pub async fn subscribe(
        &self,
        topic_arn: &str,
        protocol: &str,
        endpoint: &str,
    ) -> std::result::Result<String, QueueError> {
        self.with_active(|client| async move { client.subscribe(topic_arn, protocol, endpoint).await })
            .await
    }

    pub async fn unsubscribe(&self, subscription_arn: &str) -> std::result::Result<(), QueueError> {
        self.with_active(|client| async move { client.unsubscribe(subscription_arn).await }).await
    }

    pub async fn get_topic_attributes(
        &self,
        topic_arn: &str,
    ) -> std::result::Result<HashMap<String, String>, QueueError> {
        self.with_active(|client| async move { client.get_topic_attributes(topic_arn).await }).await
    }

    pub async fn set_topic_attributes(
        &self,
        topic_arn: &str,
        name: &str,
        value: &str,
    ) -> std::result::Result<(), QueueError> {
        self.with_active(|client| async move { client.set_topic_attributes(topic_arn, name, value).await })
            .await
    }

    pub async fn list_topics(
        &self,
        next_token: Option<&str>,
    ) -> std::result::Result<(Vec<String>, Option<String>), QueueError> {
        self.with_active(|client| async move { client.list_topics(next_token).await }).await
    }

    /// Close every client
    pub async fn shutdown(&self) {
        for client in &self.clients.clients {
            client.close().await;
        }
        info!("Topic publisher shut down");
    }
}
