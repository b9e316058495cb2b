//! Consumer Worker - the per-replica poll loop
//!
//! Each iteration:
//! 1. back off if the circuit is open
//! 2. build the receive request, filling the cached queue URL if needed
//! 3. receive through the breaker (failure yields an empty batch)
//! 4. hand each message to the handler in order
//! 5. delete each message through the breaker, whatever the handler said
//! 6. stop if shutdown was requested, otherwise go again
//!
//! Shutdown is cooperative: the flag is checked once per iteration and
//! in-flight calls are never interrupted. A backoff sleep is the one wait
//! that a shutdown request cuts short.

use std::panic::{catch_unwind, AssertUnwindSafe};
use std::sync::{Arc, OnceLock};
use std::time::Duration;
use tokio::sync::watch;
use tracing::{debug, error, info, warn};

use courier_common::{ConsumerEvent, EndpointConfig, QueueMessage, ReceiveRequest};
use courier_queue::{QueueClient, QueueError};

use crate::backoff::ExponentialBackoff;
use crate::circuit_breaker::{CircuitBreaker, CircuitState};
use crate::handler::ConsumerHandler;
use crate::Result;

/// Interval at which `shutdown()` re-checks for completion
const SHUTDOWN_WAIT_INTERVAL: Duration = Duration::from_millis(500);

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum WorkerState {
    Running,
    ShutdownRequested,
    ShutdownComplete,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum PollOutcome {
    Continue,
    Shutdown,
}

pub struct ConsumerWorker {
    id: String,
    endpoint: EndpointConfig,
    client: Arc<dyn QueueClient>,
    handler: Arc<dyn ConsumerHandler>,
    breaker: Arc<CircuitBreaker>,
    backoff: Arc<ExponentialBackoff>,
    queue_url: OnceLock<String>,
    state: watch::Sender<WorkerState>,
}

impl ConsumerWorker {
    /// Build a worker and wire its breaker: entering CLOSED resets the
    /// backoff and reports `Resumed`; CLOSED to OPEN reports `Suspended`.
    pub fn new(
        id: impl Into<String>,
        endpoint: EndpointConfig,
        client: Arc<dyn QueueClient>,
        handler: Arc<dyn ConsumerHandler>,
        breaker: Arc<CircuitBreaker>,
        backoff: ExponentialBackoff,
    ) -> Self {
        let id = id.into();
        let backoff = Arc::new(backoff);

        {
            let backoff = Arc::clone(&backoff);
            let handler = Arc::clone(&handler);
            let queue_name = endpoint.queue_name.clone();
            let worker_id = id.clone();
            breaker.on_state_transition(move |transition| match transition.to {
                CircuitState::Closed => {
                    backoff.reset();
                    info!(worker = %worker_id, queue = %queue_name, "Consumer resumed");
                    emit(&worker_id, handler.as_ref(), ConsumerEvent::Resumed, &queue_name);
                }
                CircuitState::Open if transition.from == CircuitState::Closed => {
                    warn!(worker = %worker_id, queue = %queue_name, "Consumer suspended, circuit open");
                    emit(&worker_id, handler.as_ref(), ConsumerEvent::Suspended, &queue_name);
                }
                _ => {}
            });
        }

        let (state, _) = watch::channel(WorkerState::Running);

        Self {
            id,
            endpoint,
            client,
            handler,
            breaker,
            backoff,
            queue_url: OnceLock::new(),
            state,
        }
    }

    pub fn id(&self) -> &str {
        &self.id
    }

    pub fn endpoint(&self) -> &EndpointConfig {
        &self.endpoint
    }

    pub fn breaker(&self) -> &Arc<CircuitBreaker> {
        &self.breaker
    }

    pub fn backoff(&self) -> &ExponentialBackoff {
        &self.backoff
    }

    pub fn state(&self) -> WorkerState {
        *self.state.borrow()
    }

    /// Run the poll loop until shutdown is requested.
    ///
    /// The worker reaches `ShutdownComplete` however this future ends, so a
    /// task that dies mid-loop never leaves `shutdown()` waiting.
    pub async fn run(self: Arc<Self>) {
        let _complete = CompletionGuard { state: &self.state };

        info!(worker = %self.id, queue = %self.endpoint.queue_name, "Consumer worker started");
        self.emit(ConsumerEvent::Started);

        loop {
            match self.poll_once().await {
                Ok(PollOutcome::Continue) => {}
                Ok(PollOutcome::Shutdown) => {
                    warn!(worker = %self.id, queue = %self.endpoint.queue_name, "Shutdown requested, consumer worker stopping");
                    break;
                }
                Err(e) => {
                    error!(
                        worker = %self.id,
                        queue = %self.endpoint.queue_name,
                        error = %e,
                        "Consumer poll iteration failed"
                    );
                    if self.shutdown_requested() {
                        warn!(worker = %self.id, queue = %self.endpoint.queue_name, "Shutdown requested, consumer worker stopping");
                        break;
                    }
                }
            }

            // Let other workers run between iterations
            tokio::task::yield_now().await;
        }

        self.emit(ConsumerEvent::Stopped);
        self.state.send_replace(WorkerState::ShutdownComplete);
        info!(worker = %self.id, queue = %self.endpoint.queue_name, "Consumer worker stopped");
    }

    /// Request shutdown and wait until the loop has exited.
    pub async fn shutdown(&self) {
        self.state.send_if_modified(|state| {
            if *state == WorkerState::Running {
                *state = WorkerState::ShutdownRequested;
                true
            } else {
                false
            }
        });

        let mut rx = self.state.subscribe();
        loop {
            if *rx.borrow_and_update() == WorkerState::ShutdownComplete {
                break;
            }
            let _ = tokio::time::timeout(SHUTDOWN_WAIT_INTERVAL, rx.changed()).await;
        }
        debug!(worker = %self.id, "Consumer worker shutdown complete");
    }

    /// The queue URL for this worker's endpoint. Resolved through the breaker
    /// on first use and cached for the life of the worker.
    pub async fn queue_url(&self) -> std::result::Result<String, QueueError> {
        if let Some(url) = self.queue_url.get() {
            return Ok(url.clone());
        }

        let url = self.breaker
            .call(self.client.resolve_queue_url(&self.endpoint.queue_name))
            .await?;
        debug!(worker = %self.id, queue = %self.endpoint.queue_name, url = %url, "Queue URL resolved");

        // A concurrent resolution may have won; both values are the same URL
        Ok(self.queue_url.get_or_init(|| url).clone())
    }

    fn shutdown_requested(&self) -> bool {
        *self.state.borrow() != WorkerState::Running
    }

    fn emit(&self, event: ConsumerEvent) {
        emit(&self.id, self.handler.as_ref(), event, &self.endpoint.queue_name);
    }

    /// Resolves once shutdown has been requested.
    async fn shutdown_signal(&self) {
        let mut rx = self.state.subscribe();
        loop {
            let running = *rx.borrow_and_update() == WorkerState::Running;
            if !running || rx.changed().await.is_err() {
                break;
            }
        }
    }

    async fn poll_once(&self) -> Result<PollOutcome> {
        self.maybe_backoff().await;

        let request = self.receive_request().await?;
        let queue_url = request.queue_url.clone().unwrap_or_default();

        let messages = self.breaker
            .call_or_recover(self.client.receive(&request), |e| {
                warn!(worker = %self.id, queue = %self.endpoint.queue_name, error = %e, "Receive failed");
                Vec::new()
            })
            .await;

        if !messages.is_empty() {
            debug!(worker = %self.id, queue = %self.endpoint.queue_name, count = messages.len(), "Received batch");
            self.consume_batch(&queue_url, messages).await;
        }

        if self.shutdown_requested() {
            return Ok(PollOutcome::Shutdown);
        }
        Ok(PollOutcome::Continue)
    }

    async fn maybe_backoff(&self) {
        if !self.breaker.is_open() {
            return;
        }
        let delay = self.backoff.next_delay();
        debug!(
            worker = %self.id,
            queue = %self.endpoint.queue_name,
            delay_ms = delay.as_millis() as u64,
            attempt = self.backoff.attempts(),
            "Circuit open, backing off"
        );
        tokio::select! {
            _ = self.backoff.backoff() => {}
            _ = self.shutdown_signal() => {
                debug!(worker = %self.id, "Backoff cut short by shutdown");
            }
        }
    }

    async fn receive_request(&self) -> Result<ReceiveRequest> {
        let request = self.handler.receive_request();
        if request.has_queue_url() {
            return Ok(request);
        }
        let url = self.queue_url().await?;
        Ok(request.with_queue_url(url))
    }

    /// Dispatch and acknowledge a batch in order. Each dispatch runs as its
    /// own task so a panicking handler cannot take the worker down.
    async fn consume_batch(&self, queue_url: &str, messages: Vec<QueueMessage>) {
        for message in messages {
            let handler = Arc::clone(&self.handler);
            let dispatched = message.clone();
            let outcome = tokio::spawn(async move { handler.consume(&dispatched).await }).await;

            match outcome {
                Ok(Ok(())) => {
                    debug!(worker = %self.id, message_id = %message.message_id, "Message consumed");
                }
                Ok(Err(e)) => {
                    error!(
                        worker = %self.id,
                        queue = %self.endpoint.queue_name,
                        message_id = %message.message_id,
                        error = %format!("{:#}", e),
                        "Handler failed, acknowledging anyway"
                    );
                }
                Err(join_error) => {
                    error!(
                        worker = %self.id,
                        queue = %self.endpoint.queue_name,
                        message_id = %message.message_id,
                        error = %join_error,
                        "Handler panicked, acknowledging anyway"
                    );
                }
            }

            self.breaker
                .call_or_recover(self.client.delete(queue_url, &message.receipt_handle), |e| {
                    warn!(
                        worker = %self.id,
                        message_id = %message.message_id,
                        error = %e,
                        "Delete failed, message will be redelivered"
                    );
                })
                .await;
        }
    }
}

/// Deliver a lifecycle event, containing any panic in the handler's callback.
fn emit(worker_id: &str, handler: &dyn ConsumerHandler, event: ConsumerEvent, queue_name: &str) {
    if catch_unwind(AssertUnwindSafe(|| handler.on_event(event, queue_name))).is_err() {
        error!(worker = %worker_id, queue = %queue_name, event = %event, "Handler event callback panicked");
    }
}

/// Publishes `ShutdownComplete` when dropped
struct CompletionGuard<'a> {
    state: &'a watch::Sender<WorkerState>,
}

impl Drop for CompletionGuard<'_> {
    fn drop(&mut self) {
        self.state.send_replace(WorkerState::ShutdownComplete);
    }
}

impl std::fmt::Debug for ConsumerWorker {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("ConsumerWorker")
            .field("id", &self.id)
            .field("queue", &self.endpoint.queue_name)
            .field("state", &self.state())
            .finish()
    }
}
