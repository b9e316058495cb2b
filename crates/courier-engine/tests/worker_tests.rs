//! ConsumerWorker Tests
//!
//! Tests for:
//! - Receive, dispatch and acknowledge of a batch
//! - Queue URL caching
//! - Handler failures and panics
//! - Backoff while the circuit is open
//! - Cooperative shutdown

use std::collections::VecDeque;
use std::sync::atomic::{AtomicU32, Ordering};
use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use parking_lot::Mutex;
use tokio::time::Instant;

use courier_common::{ConsumerEvent, EndpointConfig, QueueMessage, ReceiveRequest, SendRequest};
use courier_engine::{
    CircuitBreaker, CircuitBreakerConfig, CircuitState, ConsumerHandler, ConsumerWorker,
    ExponentialBackoff, WorkerState,
};
use courier_queue::{QueueClient, QueueError};

const QUEUE_URL: &str = "http://localhost:4566/000000000000/orders";

/// Mock queue client. Scripted receive results are served first; after that
/// every receive waits briefly and returns nothing, like an idle long poll.
struct MockQueueClient {
    script: Mutex<VecDeque<Result<Vec<QueueMessage>, QueueError>>>,
    receives: Mutex<Vec<(Instant, Option<String>)>>,
    resolve_calls: AtomicU32,
    deleted: Mutex<Vec<(String, String)>>,
    delete_error: Mutex<Option<QueueError>>,
}

impl MockQueueClient {
    fn new() -> Self {
        Self {
            script: Mutex::new(VecDeque::new()),
            receives: Mutex::new(Vec::new()),
            resolve_calls: AtomicU32::new(0),
            deleted: Mutex::new(Vec::new()),
            delete_error: Mutex::new(None),
        }
    }

    fn with_script(script: Vec<Result<Vec<QueueMessage>, QueueError>>) -> Self {
        let client = Self::new();
        *client.script.lock() = script.into();
        client
    }

    fn receive_count(&self) -> usize {
        self.receives.lock().len()
    }

    fn deleted_handles(&self) -> Vec<String> {
        self.deleted.lock().iter().map(|(_, handle)| handle.clone()).collect()
    }
}

#[async_trait]
impl QueueClient for MockQueueClient {
    async fn resolve_queue_url(&self, queue_name: &str) -> courier_queue::Result<String> {
        self.resolve_calls.fetch_add(1, Ordering::SeqCst);
        assert_eq!(queue_name, "orders");
        Ok(QUEUE_URL.to_string())
    }

    async fn receive(&self, request: &ReceiveRequest) -> courier_queue::Result<Vec<QueueMessage>> {
        self.receives.lock().push((Instant::now(), request.queue_url.clone()));
        let next = self.script.lock().pop_front();
        match next {
            Some(result) => result,
            None => {
                tokio::time::sleep(Duration::from_millis(10)).await;
                Ok(Vec::new())
            }
        }
    }

    async fn delete(&self, queue_url: &str, receipt_handle: &str) -> courier_queue::Result<()> {
        self.deleted.lock().push((queue_url.to_string(), receipt_handle.to_string()));
        match self.delete_error.lock().clone() {
            Some(e) => Err(e),
            None => Ok(()),
        }
    }

    async fn send(&self, _request: &SendRequest) -> courier_queue::Result<String> {
        Ok("sent".to_string())
    }
}

/// What a mock handler does with a given message body
#[derive(Clone, Copy)]
enum Behavior {
    Succeed,
    Fail,
    Panic,
}

struct RecordingHandler {
    consumed: Mutex<Vec<String>>,
    events: Mutex<Vec<ConsumerEvent>>,
    behavior: fn(&str) -> Behavior,
    request: ReceiveRequest,
}

impl RecordingHandler {
    fn new() -> Self {
        Self::with_behavior(|_| Behavior::Succeed)
    }

    fn with_behavior(behavior: fn(&str) -> Behavior) -> Self {
        Self {
            consumed: Mutex::new(Vec::new()),
            events: Mutex::new(Vec::new()),
            behavior,
            request: ReceiveRequest::default(),
        }
    }

    fn consumed(&self) -> Vec<String> {
        self.consumed.lock().clone()
    }

    fn events(&self) -> Vec<ConsumerEvent> {
        self.events.lock().clone()
    }
}

#[async_trait]
impl ConsumerHandler for RecordingHandler {
    async fn consume(&self, message: &QueueMessage) -> anyhow::Result<()> {
        self.consumed.lock().push(message.body.clone());
        match (self.behavior)(&message.body) {
            Behavior::Succeed => Ok(()),
            Behavior::Fail => anyhow::bail!("cannot process {}", message.body),
            Behavior::Panic => panic!("handler exploded on {}", message.body),
        }
    }

    fn receive_request(&self) -> ReceiveRequest {
        self.request.clone()
    }

    fn on_event(&self, event: ConsumerEvent, queue_name: &str) {
        assert_eq!(queue_name, "orders");
        self.events.lock().push(event);
    }
}

fn message(id: &str) -> QueueMessage {
    QueueMessage::new(id, format!("body-{}", id), format!("handle-{}", id))
}

fn breaker_config(failure_threshold: u32) -> CircuitBreakerConfig {
    CircuitBreakerConfig {
        failure_threshold,
        success_threshold: 1,
        wait_duration: Duration::ZERO,
        buffer_size: 10,
    }
}

fn worker(client: Arc<MockQueueClient>, handler: Arc<RecordingHandler>, config: CircuitBreakerConfig) -> Arc<ConsumerWorker> {
    let endpoint = EndpointConfig::new("orders", "us-east-1");
    let breaker = Arc::new(CircuitBreaker::new(endpoint.breaker_name(), config));
    Arc::new(ConsumerWorker::new(
        "test/orders#0",
        endpoint,
        client,
        handler,
        breaker,
        ExponentialBackoff::default(),
    ))
}

async fn wait_until(condition: impl Fn() -> bool) {
    tokio::time::timeout(Duration::from_secs(300), async {
        while !condition() {
            tokio::time::sleep(Duration::from_millis(5)).await;
        }
    })
    .await
    .expect("condition not reached");
}

#[tokio::test(start_paused = true)]
async fn test_batch_consumed_and_deleted_with_cached_url() {
    let client = Arc::new(MockQueueClient::with_script(vec![Ok(vec![message("1"), message("2")])]));
    let handler = Arc::new(RecordingHandler::new());
    let worker = worker(client.clone(), handler.clone(), breaker_config(5));

    let handle = tokio::spawn(worker.clone().run());
    wait_until(|| client.receive_count() >= 3).await;

    assert_eq!(handler.consumed(), vec!["body-1", "body-2"]);
    assert_eq!(client.deleted_handles(), vec!["handle-1", "handle-2"]);
    assert!(client.deleted.lock().iter().all(|(url, _)| url == QUEUE_URL));

    // Every receive used the cached URL; it was looked up once
    assert_eq!(client.resolve_calls.load(Ordering::SeqCst), 1);
    assert!(client.receives.lock().iter().all(|(_, url)| url.as_deref() == Some(QUEUE_URL)));

    worker.shutdown().await;
    handle.await.unwrap();
    assert_eq!(handler.events(), vec![ConsumerEvent::Started, ConsumerEvent::Stopped]);
}

#[tokio::test(start_paused = true)]
async fn test_handler_failure_still_deletes_and_loop_continues() {
    let client = Arc::new(MockQueueClient::with_script(vec![Ok(vec![message("bad"), message("good")])]));
    let handler = Arc::new(RecordingHandler::with_behavior(|body| {
        if body == "body-bad" { Behavior::Fail } else { Behavior::Succeed }
    }));
    let worker = worker(client.clone(), handler.clone(), breaker_config(5));

    let handle = tokio::spawn(worker.clone().run());
    wait_until(|| client.receive_count() >= 3).await;

    assert_eq!(handler.consumed(), vec!["body-bad", "body-good"]);
    assert_eq!(client.deleted_handles(), vec!["handle-bad", "handle-good"]);
    assert_eq!(worker.state(), WorkerState::Running);

    worker.shutdown().await;
    handle.await.unwrap();
}

#[tokio::test(start_paused = true)]
async fn test_panicking_handler_does_not_stop_worker() {
    let client = Arc::new(MockQueueClient::with_script(vec![
        Ok(vec![message("boom")]),
        Ok(vec![message("after")]),
    ]));
    let handler = Arc::new(RecordingHandler::with_behavior(|body| {
        if body == "body-boom" { Behavior::Panic } else { Behavior::Succeed }
    }));
    let worker = worker(client.clone(), handler.clone(), breaker_config(5));

    let handle = tokio::spawn(worker.clone().run());
    wait_until(|| client.deleted.lock().len() >= 2).await;

    assert_eq!(client.deleted_handles(), vec!["handle-boom", "handle-after"]);

    worker.shutdown().await;
    handle.await.unwrap();
}

#[tokio::test(start_paused = true)]
async fn test_delete_failure_is_swallowed() {
    let client = Arc::new(MockQueueClient::with_script(vec![
        Ok(vec![message("1")]),
        Ok(vec![message("2")]),
    ]));
    *client.delete_error.lock() = Some(QueueError::Client { status: Some(400), message: "receipt expired".into() });
    let handler = Arc::new(RecordingHandler::new());
    let worker = worker(client.clone(), handler.clone(), breaker_config(5));

    let handle = tokio::spawn(worker.clone().run());
    wait_until(|| client.receive_count() >= 3).await;

    assert_eq!(handler.consumed(), vec!["body-1", "body-2"]);
    assert_eq!(client.deleted_handles(), vec!["handle-1", "handle-2"]);

    worker.shutdown().await;
    handle.await.unwrap();
}

#[tokio::test(start_paused = true)]
async fn test_open_circuit_delays_next_receive() {
    let upstream = || Err(QueueError::Upstream { status: 503, message: "unavailable".into() });
    let client = Arc::new(MockQueueClient::with_script(vec![upstream(), upstream(), upstream()]));
    let handler = Arc::new(RecordingHandler::new());
    let worker = worker(client.clone(), handler.clone(), breaker_config(3));

    let handle = tokio::spawn(worker.clone().run());
    wait_until(|| client.receive_count() >= 5).await;

    let times: Vec<Instant> = client.receives.lock().iter().map(|(at, _)| *at).collect();
    // Third failure opened the circuit; the fourth receive waited out attempt 0
    assert!(times[3] - times[2] >= Duration::from_millis(1000));
    assert!(times[2] - times[1] < Duration::from_millis(1000));

    // The probe succeeded, so the circuit closed and the backoff reset
    assert_eq!(worker.breaker().state(), CircuitState::Closed);
    assert_eq!(worker.backoff().attempts(), 0);
    assert_eq!(
        handler.events(),
        vec![ConsumerEvent::Started, ConsumerEvent::Suspended, ConsumerEvent::Resumed]
    );

    worker.shutdown().await;
    handle.await.unwrap();
}

#[tokio::test(start_paused = true)]
async fn test_validation_errors_never_open_circuit() {
    let script = (0..20)
        .map(|_| Err(QueueError::Client { status: Some(400), message: "invalid parameter".into() }))
        .collect();
    let client = Arc::new(MockQueueClient::with_script(script));
    let handler = Arc::new(RecordingHandler::new());
    let worker = worker(client.clone(), handler.clone(), breaker_config(3));

    let handle = tokio::spawn(worker.clone().run());
    wait_until(|| client.receive_count() >= 21).await;

    assert_eq!(worker.breaker().state(), CircuitState::Closed);
    assert_eq!(worker.backoff().attempts(), 0);

    worker.shutdown().await;
    handle.await.unwrap();
}

#[tokio::test(start_paused = true)]
async fn test_no_receive_after_shutdown_completes() {
    let client = Arc::new(MockQueueClient::new());
    let handler = Arc::new(RecordingHandler::new());
    let worker = worker(client.clone(), handler.clone(), breaker_config(5));

    let handle = tokio::spawn(worker.clone().run());
    wait_until(|| client.receive_count() >= 2).await;

    worker.shutdown().await;
    assert_eq!(worker.state(), WorkerState::ShutdownComplete);
    let count = client.receive_count();

    tokio::time::sleep(Duration::from_secs(5)).await;
    assert_eq!(client.receive_count(), count);
    assert!(handle.is_finished());
    assert_eq!(handler.events().last(), Some(&ConsumerEvent::Stopped));

    // A second shutdown returns immediately
    worker.shutdown().await;
}

#[tokio::test(start_paused = true)]
async fn test_shutdown_interrupts_backoff_sleep() {
    let client = Arc::new(MockQueueClient::new());
    let handler = Arc::new(RecordingHandler::new());
    let worker = worker(client.clone(), handler.clone(), breaker_config(5));
    worker.breaker().transition_to_open();

    let handle = tokio::spawn(worker.clone().run());
    // 1 + 2 + 4 + 8 + 16 seconds slept; now inside a 32 second backoff
    wait_until(|| worker.backoff().attempts() >= 5).await;

    let start = Instant::now();
    worker.shutdown().await;
    assert!(start.elapsed() < Duration::from_secs(1));
    assert_eq!(worker.state(), WorkerState::ShutdownComplete);
    assert_eq!(client.receive_count(), 0);

    handle.await.unwrap();
    assert_eq!(handler.events().last(), Some(&ConsumerEvent::Stopped));
}

#[tokio::test]
async fn test_queue_url_resolved_once() {
    let client = Arc::new(MockQueueClient::new());
    let worker = worker(client.clone(), Arc::new(RecordingHandler::new()), breaker_config(5));

    let first = worker.queue_url().await.unwrap();
    let second = worker.queue_url().await.unwrap();

    assert_eq!(first, QUEUE_URL);
    assert_eq!(first, second);
    assert_eq!(client.resolve_calls.load(Ordering::SeqCst), 1);
}

#[tokio::test(start_paused = true)]
async fn test_handler_supplied_queue_url_skips_resolution() {
    let client = Arc::new(MockQueueClient::with_script(vec![Ok(vec![message("1")])]));
    let mut handler = RecordingHandler::new();
    handler.request = ReceiveRequest::default().with_queue_url("http://custom/orders");
    let handler = Arc::new(handler);
    let worker = worker(client.clone(), handler.clone(), breaker_config(5));

    let handle = tokio::spawn(worker.clone().run());
    wait_until(|| client.receive_count() >= 2).await;

    assert_eq!(client.resolve_calls.load(Ordering::SeqCst), 0);
    assert_eq!(client.deleted.lock()[0].0, "http://custom/orders");

    worker.shutdown().await;
    handle.await.unwrap();
}
