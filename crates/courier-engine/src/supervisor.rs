//! Consumer Supervisor - expands configuration into running workers
//!
//! One worker per (consumer, endpoint, replica). Every worker owns its own
//! breaker, named after its queue, and its own backoff.

use futures::future::join_all;
use parking_lot::Mutex;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use tokio::task::JoinHandle;
use tracing::{error, info, warn};

use courier_common::{BackoffSettings, ConsumerConfig, QueueModuleConfig};
use courier_queue::QueueClientPool;

use crate::backoff::ExponentialBackoff;
use crate::circuit_breaker::{CircuitBreaker, CircuitBreakerConfig, CircuitBreakerStats};
use crate::handler::{ConsumerHandler, HandlerRegistry};
use crate::worker::ConsumerWorker;
use crate::{ConsumerError, Result};

struct RunningWorker {
    worker: Arc<ConsumerWorker>,
    handle: JoinHandle<()>,
}

/// A consumer whose handler and replica count have been resolved
struct PlannedConsumer<'a> {
    config: &'a ConsumerConfig,
    handler: Arc<dyn ConsumerHandler>,
    replicas: u32,
}

pub struct ConsumerSupervisor {
    config: QueueModuleConfig,
    breaker_config: CircuitBreakerConfig,
    backoff: BackoffSettings,
    handlers: HandlerRegistry,
    pool: Arc<QueueClientPool>,
    workers: Mutex<Vec<RunningWorker>>,
    started: AtomicBool,
    paused: AtomicBool,
}

impl ConsumerSupervisor {
    pub fn new(
        config: QueueModuleConfig,
        breaker_config: CircuitBreakerConfig,
        backoff: BackoffSettings,
        handlers: HandlerRegistry,
        pool: Arc<QueueClientPool>,
    ) -> Self {
        Self {
            config,
            breaker_config,
            backoff,
            handlers,
            pool,
            workers: Mutex::new(Vec::new()),
            started: AtomicBool::new(false),
            paused: AtomicBool::new(false),
        }
    }

    /// Create and spawn every configured worker. Returns how many started.
    ///
    /// Configuration problems (unknown handler, zero concurrency, missing
    /// region) abort before any worker is spawned.
    pub async fn start(&self) -> Result<usize> {
        if !self.config.enabled {
            info!("Queue module disabled, no consumers started");
            return Ok(0);
        }
        if self.started.swap(true, Ordering::SeqCst) {
            return Err(ConsumerError::AlreadyStarted);
        }

        let result = self.spawn_workers().await;
        if result.is_err() {
            self.started.store(false, Ordering::SeqCst);
        }
        result
    }

    async fn spawn_workers(&self) -> Result<usize> {
        let plan = self.plan()?;

        // Create every client up front so workers only ever resolve
        for consumer in &plan {
            for endpoint in &consumer.config.endpoints {
                self.pool.get_or_create(endpoint).await?;
            }
        }

        let mut built = Vec::new();
        for consumer in &plan {
            for endpoint in &consumer.config.endpoints {
                let client = self.pool.resolve(endpoint)?;
                for replica in 0..consumer.replicas {
                    let breaker = Arc::new(CircuitBreaker::new(
                        endpoint.breaker_name(),
                        self.breaker_config.clone(),
                    ));
                    built.push(Arc::new(ConsumerWorker::new(
                        format!("{}/{}#{}", consumer.config.handler, endpoint.queue_name, replica),
                        endpoint.clone(),
                        Arc::clone(&client),
                        Arc::clone(&consumer.handler),
                        breaker,
                        ExponentialBackoff::from_settings(&self.backoff),
                    )));
                }
            }
        }

        // Checked under the lock so a concurrent pause() sees these workers
        let count = built.len();
        let mut workers = self.workers.lock();
        let paused = self.is_paused();
        for worker in built {
            if paused {
                worker.breaker().transition_to_open();
            }
            let handle = tokio::spawn(Arc::clone(&worker).run());
            workers.push(RunningWorker { worker, handle });
        }
        drop(workers);

        info!(workers = count, consumers = plan.len(), "Consumer supervisor started");
        Ok(count)
    }

    fn plan(&self) -> Result<Vec<PlannedConsumer<'_>>> {
        let mut plan = Vec::new();
        for config in self.config.consumers.iter().filter(|c| c.enabled) {
            let handler = self.handlers
                .get(&config.handler)
                .ok_or_else(|| ConsumerError::HandlerNotFound(config.handler.clone()))?;

            let replicas = config.concurrency.unwrap_or_else(|| handler.concurrency_level());
            if replicas == 0 {
                return Err(ConsumerError::Config(format!(
                    "consumer '{}' has zero concurrency", config.handler
                )));
            }
            if config.endpoints.is_empty() {
                return Err(ConsumerError::Config(format!(
                    "consumer '{}' has no endpoints", config.handler
                )));
            }
            if let Some(endpoint) = config.endpoints.iter().find(|e| e.queue_name.is_empty()) {
                return Err(ConsumerError::Config(format!(
                    "consumer '{}' has an endpoint in region '{}' with no queue name",
                    config.handler, endpoint.region
                )));
            }

            plan.push(PlannedConsumer { config, handler, replicas });
        }
        Ok(plan)
    }

    /// Shut every worker down and wait for all of them to finish.
    pub async fn stop(&self) {
        let workers = std::mem::take(&mut *self.workers.lock());
        if workers.is_empty() {
            return;
        }
        info!(workers = workers.len(), "Stopping consumer workers");

        join_all(workers.iter().map(|w| w.worker.shutdown())).await;

        for running in workers {
            if let Err(e) = running.handle.await {
                error!(worker = %running.worker.id(), error = %e, "Consumer worker task failed");
            }
        }

        self.started.store(false, Ordering::SeqCst);
        info!("Consumer supervisor stopped");
    }

    /// Force every worker's breaker open, suspending consumption. Workers
    /// started while paused begin suspended.
    pub fn pause(&self) {
        self.paused.store(true, Ordering::SeqCst);
        let workers = self.workers.lock();
        for running in workers.iter() {
            running.worker.breaker().transition_to_open();
        }
        warn!(workers = workers.len(), "Consumers paused");
    }

    /// Close every worker's breaker, resuming consumption.
    pub fn resume(&self) {
        self.paused.store(false, Ordering::SeqCst);
        let workers = self.workers.lock();
        for running in workers.iter() {
            running.worker.breaker().transition_to_closed();
        }
        info!(workers = workers.len(), "Consumers resumed");
    }

    pub fn is_paused(&self) -> bool {
        self.paused.load(Ordering::SeqCst)
    }

    pub fn worker_count(&self) -> usize {
        self.workers.lock().len()
    }

    pub fn breaker_stats(&self) -> Vec<CircuitBreakerStats> {
        self.workers
            .lock()
            .iter()
            .map(|running| running.worker.breaker().stats())
            .collect()
    }
}
