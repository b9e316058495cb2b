//! Queue Client Pool - one client per `(region, endpoint)` pair
//!
//! Clients are created at startup through [`QueueClientPool::get_or_create`]
//! and looked up mid-poll with [`QueueClientPool::resolve`]. Resolution never
//! creates: a missing client is a configuration error.

use dashmap::DashMap;
use std::sync::Arc;
use tokio::sync::OnceCell;
use tracing::{debug, error, info};

use courier_common::EndpointConfig;
use crate::{DisabledQueueClient, QueueClient, QueueClientFactory, QueueError, Result};

type ClientCell = Arc<OnceCell<Arc<dyn QueueClient>>>;

pub struct QueueClientPool {
    enabled: bool,
    /// Cache key -> lazily initialised client. The cell guarantees a single
    /// construction per key even when callers race.
    clients: DashMap<String, ClientCell>,
    factory: Arc<dyn QueueClientFactory>,
}

impl QueueClientPool {
    pub fn new(factory: Arc<dyn QueueClientFactory>) -> Self {
        Self {
            enabled: true,
            clients: DashMap::new(),
            factory,
        }
    }

    /// A pool for a disabled queue module. Every client it hands out fails
    /// with `Disabled` and the factory is never called.
    pub fn disabled(factory: Arc<dyn QueueClientFactory>) -> Self {
        Self {
            enabled: false,
            clients: DashMap::new(),
            factory,
        }
    }

    pub fn is_enabled(&self) -> bool {
        self.enabled
    }

    /// Return the cached client for this endpoint, creating it on first use.
    pub async fn get_or_create(&self, endpoint: &EndpointConfig) -> Result<Arc<dyn QueueClient>> {
        if !self.enabled {
            return Ok(Arc::new(DisabledQueueClient));
        }

        if endpoint.region.is_empty() {
            return Err(QueueError::Config(
                "Consumer endpoint config requires a valid configured AWS region".to_string(),
            ));
        }

        let key = endpoint.cache_key();
        let cell = {
            let entry = self.clients
                .entry(key.clone())
                .or_insert_with(|| Arc::new(OnceCell::new()));
            Arc::clone(entry.value())
        };

        let client = cell
            .get_or_try_init(|| async {
                info!(
                    region = %endpoint.region,
                    endpoint = endpoint.endpoint.as_deref().unwrap_or("none"),
                    "Creating queue client"
                );
                self.factory.create(endpoint).await
            })
            .await?;

        debug!(key = %key, "Resolved queue client from pool");
        Ok(Arc::clone(client))
    }

    /// Look up a client created earlier. Fails with `Resolution` when none
    /// was created for this endpoint's key.
    pub fn resolve(&self, endpoint: &EndpointConfig) -> Result<Arc<dyn QueueClient>> {
        if !self.enabled {
            return Ok(Arc::new(DisabledQueueClient));
        }

        let key = endpoint.cache_key();
        let client = self.clients
            .get(&key)
            .and_then(|cell| cell.get().cloned());

        match client {
            Some(client) => Ok(client),
            None => {
                error!(
                    region = %endpoint.region,
                    endpoint = endpoint.endpoint.as_deref().unwrap_or("none"),
                    "No queue client exists for endpoint"
                );
                Err(QueueError::Resolution(format!(
                    "no queue client for region={} endpoint={}",
                    endpoint.region,
                    endpoint.endpoint.as_deref().unwrap_or("none"),
                )))
            }
        }
    }

    /// Number of initialised clients
    pub fn len(&self) -> usize {
        self.clients.iter().filter(|entry| entry.value().initialized()).count()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    /// Close every initialised client
    pub async fn close_all(&self) {
        let clients: Vec<Arc<dyn QueueClient>> = self.clients
            .iter()
            .filter_map(|entry| entry.value().get().cloned())
            .collect();

        for client in clients {
            client.close().await;
        }
        info!("Queue client pool closed");
    }
}
