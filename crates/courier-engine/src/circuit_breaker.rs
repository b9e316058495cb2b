//! Circuit Breaker - guards calls against one endpoint
//!
//! Calls are wrapped with [`CircuitBreaker::call`] or
//! [`CircuitBreaker::call_or_recover`]. Outcomes land in a sliding window of
//! the last `buffer_size` calls; once the counted failures in that window
//! reach `failure_threshold` the circuit opens.
//!
//! An open circuit rejects calls immediately with `QueueError::CircuitOpen`.
//! Once `wait_duration` has passed, the next permission check moves it to
//! half-open, where `success_threshold` successes close it again and any
//! counted failure re-opens it. Nothing here ever sleeps; pacing is the
//! worker's job.
//!
//! Transition listeners run synchronously, in registration order, on the task
//! that caused the transition and before that call returns.

use parking_lot::{Mutex, RwLock};
use serde::{Deserialize, Serialize};
use std::collections::VecDeque;
use std::future::Future;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;
use std::time::Duration;
use tokio::time::Instant;
use tracing::{info, warn};

use courier_common::BreakerSettings;
use courier_queue::QueueError;

/// Circuit breaker state
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum CircuitState {
    /// Normal operation, failures counted
    #[default]
    Closed,
    /// Rejecting calls
    Open,
    /// Probing after the wait duration
    HalfOpen,
}

/// A state change, handed to every listener
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct StateTransition {
    pub from: CircuitState,
    pub to: CircuitState,
}

impl StateTransition {
    pub fn is_closed_to_open(&self) -> bool {
        self.from == CircuitState::Closed && self.to == CircuitState::Open
    }
}

/// Statistics for a single circuit breaker
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct CircuitBreakerStats {
    pub name: String,
    pub state: CircuitState,
    #[serde(rename = "successfulCalls")]
    pub successful_calls: u64,
    #[serde(rename = "failedCalls")]
    pub failed_calls: u64,
    /// Calls rejected while open
    #[serde(rename = "rejectedCalls")]
    pub rejected_calls: u64,
    /// Failure rate over the buffered window (0.0 - 1.0)
    #[serde(rename = "failureRate")]
    pub failure_rate: f64,
    #[serde(rename = "bufferedCalls")]
    pub buffered_calls: u32,
    #[serde(rename = "bufferSize")]
    pub buffer_size: u32,
    /// Held open by an operator until explicitly closed
    pub forced: bool,
}

#[derive(Debug, Clone)]
pub struct CircuitBreakerConfig {
    /// Counted failures in the window that open the circuit
    pub failure_threshold: u32,
    /// Successes in half-open before closing
    pub success_threshold: u32,
    /// Time spent open before a probe is permitted
    pub wait_duration: Duration,
    /// Sliding window size
    pub buffer_size: u32,
}

impl Default for CircuitBreakerConfig {
    fn default() -> Self {
        Self::from(&BreakerSettings::default())
    }
}

impl From<&BreakerSettings> for CircuitBreakerConfig {
    fn from(settings: &BreakerSettings) -> Self {
        Self {
            failure_threshold: settings.failure_threshold.max(1),
            success_threshold: settings.success_threshold.max(1),
            wait_duration: Duration::from_secs(settings.wait_duration_secs),
            buffer_size: settings.buffer_size.max(1),
        }
    }
}

type Classifier = Box<dyn Fn(&QueueError) -> bool + Send + Sync>;
type TransitionListener = Arc<dyn Fn(&StateTransition) + Send + Sync>;

struct BreakerInner {
    state: CircuitState,
    /// `true` = success, `false` = counted failure
    recent_results: VecDeque<bool>,
    opened_at: Option<Instant>,
    half_open_successes: u32,
    forced: bool,
}

impl BreakerInner {
    fn move_to(&mut self, to: CircuitState) -> StateTransition {
        let from = self.state;
        self.state = to;
        self.half_open_successes = 0;
        match to {
            CircuitState::Open => self.opened_at = Some(Instant::now()),
            CircuitState::Closed => {
                self.opened_at = None;
                self.recent_results.clear();
            }
            CircuitState::HalfOpen => {}
        }
        StateTransition { from, to }
    }

    fn push(&mut self, success: bool, capacity: usize) {
        if self.recent_results.len() >= capacity {
            self.recent_results.pop_front();
        }
        self.recent_results.push_back(success);
    }

    fn failures_in_window(&self) -> u32 {
        self.recent_results.iter().filter(|&&ok| !ok).count() as u32
    }
}

pub struct CircuitBreaker {
    name: String,
    config: CircuitBreakerConfig,
    classifier: Classifier,
    inner: Mutex<BreakerInner>,
    listeners: RwLock<Vec<TransitionListener>>,
    successful_calls: AtomicU64,
    failed_calls: AtomicU64,
    rejected_calls: AtomicU64,
}

impl CircuitBreaker {
    /// A breaker that counts upstream faults (5xx, transport) as failures.
    pub fn new(name: impl Into<String>, config: CircuitBreakerConfig) -> Self {
        Self::with_classifier(name, config, QueueError::is_upstream_fault)
    }

    /// A breaker with a custom failure classifier. Errors the classifier
    /// rejects are returned to the caller but recorded as successes.
    pub fn with_classifier<F>(name: impl Into<String>, config: CircuitBreakerConfig, classifier: F) -> Self
    where
        F: Fn(&QueueError) -> bool + Send + Sync + 'static,
    {
        let capacity = config.buffer_size as usize;
        Self {
            name: name.into(),
            config,
            classifier: Box::new(classifier),
            inner: Mutex::new(BreakerInner {
                state: CircuitState::Closed,
                recent_results: VecDeque::with_capacity(capacity),
                opened_at: None,
                half_open_successes: 0,
                forced: false,
            }),
            listeners: RwLock::new(Vec::new()),
            successful_calls: AtomicU64::new(0),
            failed_calls: AtomicU64::new(0),
            rejected_calls: AtomicU64::new(0),
        }
    }

    pub fn name(&self) -> &str {
        &self.name
    }

    pub fn state(&self) -> CircuitState {
        self.inner.lock().state
    }

    pub fn is_open(&self) -> bool {
        self.state() == CircuitState::Open
    }

    /// Register a listener for every state transition.
    pub fn on_state_transition<F>(&self, listener: F)
    where
        F: Fn(&StateTransition) + Send + Sync + 'static,
    {
        self.listeners.write().push(Arc::new(listener));
    }

    /// Run an operation through the breaker.
    ///
    /// Rejected immediately with `CircuitOpen` while the circuit is open.
    /// Otherwise the outcome is recorded and returned unchanged.
    pub async fn call<T, F>(&self, operation: F) -> Result<T, QueueError>
    where
        F: Future<Output = Result<T, QueueError>>,
    {
        self.acquire_permission()?;

        match operation.await {
            Ok(value) => {
                self.record_success();
                Ok(value)
            }
            Err(e) => {
                if (self.classifier)(&e) {
                    self.record_failure();
                } else {
                    self.record_success();
                }
                Err(e)
            }
        }
    }

    /// Like [`call`](Self::call), but any failure (including rejection) is
    /// replaced by the value `recover` builds from the error.
    pub async fn call_or_recover<T, F, R>(&self, operation: F, recover: R) -> T
    where
        F: Future<Output = Result<T, QueueError>>,
        R: FnOnce(&QueueError) -> T,
    {
        match self.call(operation).await {
            Ok(value) => value,
            Err(e) => recover(&e),
        }
    }

    /// Force the circuit open and hold it there until
    /// [`transition_to_closed`](Self::transition_to_closed).
    pub fn transition_to_open(&self) {
        let transition = {
            let mut inner = self.inner.lock();
            let transition = (inner.state != CircuitState::Open).then(|| inner.move_to(CircuitState::Open));
            inner.forced = true;
            transition
        };
        self.notify(transition);
    }

    /// Close the circuit and clear the window, releasing any forced open.
    pub fn transition_to_closed(&self) {
        let transition = {
            let mut inner = self.inner.lock();
            inner.forced = false;
            (inner.state != CircuitState::Closed).then(|| inner.move_to(CircuitState::Closed))
        };
        self.notify(transition);
    }

    pub fn stats(&self) -> CircuitBreakerStats {
        let inner = self.inner.lock();
        let buffered = inner.recent_results.len() as u32;
        let failure_rate = if buffered > 0 {
            inner.failures_in_window() as f64 / buffered as f64
        } else {
            0.0
        };

        CircuitBreakerStats {
            name: self.name.clone(),
            state: inner.state,
            successful_calls: self.successful_calls.load(Ordering::Relaxed),
            failed_calls: self.failed_calls.load(Ordering::Relaxed),
            rejected_calls: self.rejected_calls.load(Ordering::Relaxed),
            failure_rate,
            buffered_calls: buffered,
            buffer_size: self.config.buffer_size,
            forced: inner.forced,
        }
    }

    fn acquire_permission(&self) -> Result<(), QueueError> {
        let (permitted, transition) = {
            let mut inner = self.inner.lock();
            let state = inner.state;
            match state {
                CircuitState::Closed | CircuitState::HalfOpen => (true, None),
                CircuitState::Open => {
                    let waited = inner
                        .opened_at
                        .map_or(true, |at| at.elapsed() >= self.config.wait_duration);
                    if !inner.forced && waited {
                        (true, Some(inner.move_to(CircuitState::HalfOpen)))
                    } else {
                        (false, None)
                    }
                }
            }
        };
        self.notify(transition);

        if permitted {
            Ok(())
        } else {
            self.rejected_calls.fetch_add(1, Ordering::Relaxed);
            Err(QueueError::CircuitOpen(self.name.clone()))
        }
    }

    fn record_success(&self) {
        self.successful_calls.fetch_add(1, Ordering::Relaxed);

        let transition = {
            let mut inner = self.inner.lock();
            inner.push(true, self.config.buffer_size as usize);
            if inner.state == CircuitState::HalfOpen {
                inner.half_open_successes += 1;
                (inner.half_open_successes >= self.config.success_threshold)
                    .then(|| inner.move_to(CircuitState::Closed))
            } else {
                None
            }
        };
        self.notify(transition);
    }

    fn record_failure(&self) {
        self.failed_calls.fetch_add(1, Ordering::Relaxed);

        let transition = {
            let mut inner = self.inner.lock();
            inner.push(false, self.config.buffer_size as usize);
            let state = inner.state;
            match state {
                CircuitState::Closed => (inner.failures_in_window() >= self.config.failure_threshold)
                    .then(|| inner.move_to(CircuitState::Open)),
                CircuitState::HalfOpen => Some(inner.move_to(CircuitState::Open)),
                CircuitState::Open => None,
            }
        };
        self.notify(transition);
    }

    fn notify(&self, transition: Option<StateTransition>) {
        let Some(transition) = transition else {
            return;
        };

        match transition.to {
            CircuitState::Open => warn!(
                breaker = %self.name,
                from = ?transition.from,
                "Circuit breaker opened"
            ),
            _ => info!(
                breaker = %self.name,
                from = ?transition.from,
                to = ?transition.to,
                "Circuit breaker state changed"
            ),
        }

        // Snapshot so listeners may call back into the breaker
        let listeners: Vec<TransitionListener> = self.listeners.read().clone();
        for listener in listeners {
            listener(&transition);
        }
    }
}

impl std::fmt::Debug for CircuitBreaker {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("CircuitBreaker")
            .field("name", &self.name)
            .field("state", &self.state())
            .finish()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn config(failure_threshold: u32, wait: Duration) -> CircuitBreakerConfig {
        CircuitBreakerConfig {
            failure_threshold,
            success_threshold: 2,
            wait_duration: wait,
            buffer_size: 10,
        }
    }

    fn upstream() -> QueueError {
        QueueError::Upstream { status: 503, message: "unavailable".into() }
    }

    fn validation() -> QueueError {
        QueueError::Client { status: Some(400), message: "bad request".into() }
    }

    async fn fail(breaker: &CircuitBreaker, error: QueueError) -> Result<(), QueueError> {
        breaker.call(async { Err::<(), _>(error) }).await
    }

    async fn succeed(breaker: &CircuitBreaker) -> Result<u32, QueueError> {
        breaker.call(async { Ok(7) }).await
    }

    #[tokio::test]
    async fn test_opens_after_threshold_upstream_failures() {
        let breaker = CircuitBreaker::new("sqs-orders", config(3, Duration::from_secs(30)));

        let _ = fail(&breaker, upstream()).await;
        let _ = fail(&breaker, upstream()).await;
        assert_eq!(breaker.state(), CircuitState::Closed);

        let _ = fail(&breaker, upstream()).await;
        assert_eq!(breaker.state(), CircuitState::Open);

        let rejected = succeed(&breaker).await;
        assert_eq!(rejected, Err(QueueError::CircuitOpen("sqs-orders".into())));
        assert_eq!(breaker.stats().rejected_calls, 1);
    }

    #[tokio::test]
    async fn test_validation_errors_never_open() {
        let breaker = CircuitBreaker::new("sqs-orders", config(3, Duration::from_secs(30)));

        for _ in 0..50 {
            let result = fail(&breaker, validation()).await;
            assert_eq!(result, Err(validation()));
        }
        assert_eq!(breaker.state(), CircuitState::Closed);
        assert_eq!(breaker.stats().failed_calls, 0);
    }

    #[tokio::test]
    async fn test_window_slides_out_old_failures() {
        let breaker = CircuitBreaker::new("sqs-orders", CircuitBreakerConfig {
            failure_threshold: 3,
            success_threshold: 1,
            wait_duration: Duration::from_secs(30),
            buffer_size: 4,
        });

        let _ = fail(&breaker, upstream()).await;
        let _ = fail(&breaker, upstream()).await;
        for _ in 0..4 {
            succeed(&breaker).await.unwrap();
        }
        let _ = fail(&breaker, upstream()).await;
        let _ = fail(&breaker, upstream()).await;
        assert_eq!(breaker.state(), CircuitState::Closed);
    }

    #[tokio::test]
    async fn test_recover_substitutes_fallback() {
        let breaker = CircuitBreaker::new("sqs-orders", config(1, Duration::from_secs(30)));

        let first: Vec<u32> = breaker
            .call_or_recover(async { Err(upstream()) }, |_| Vec::new())
            .await;
        assert!(first.is_empty());
        assert!(breaker.is_open());

        let second = breaker
            .call_or_recover(async { Ok(vec![1, 2]) }, |e| {
                assert!(e.is_circuit_open());
                Vec::new()
            })
            .await;
        assert!(second.is_empty());
    }

    #[tokio::test(start_paused = true)]
    async fn test_half_open_closes_after_successes() {
        let breaker = CircuitBreaker::new("sqs-orders", config(1, Duration::from_secs(5)));
        let _ = fail(&breaker, upstream()).await;
        assert!(breaker.is_open());

        tokio::time::advance(Duration::from_secs(4)).await;
        assert!(succeed(&breaker).await.is_err());

        tokio::time::advance(Duration::from_secs(1)).await;
        succeed(&breaker).await.unwrap();
        assert_eq!(breaker.state(), CircuitState::HalfOpen);

        succeed(&breaker).await.unwrap();
        assert_eq!(breaker.state(), CircuitState::Closed);
        assert_eq!(breaker.stats().buffered_calls, 0);
    }

    #[tokio::test(start_paused = true)]
    async fn test_failure_in_half_open_reopens() {
        let breaker = CircuitBreaker::new("sqs-orders", config(1, Duration::from_secs(5)));
        let _ = fail(&breaker, upstream()).await;

        tokio::time::advance(Duration::from_secs(5)).await;
        let _ = fail(&breaker, upstream()).await;
        assert_eq!(breaker.state(), CircuitState::Open);
    }

    #[tokio::test]
    async fn test_listeners_fire_in_registration_order() {
        let breaker = CircuitBreaker::new("sns", config(1, Duration::ZERO));
        let seen = Arc::new(Mutex::new(Vec::new()));

        for tag in ["first", "second"] {
            let seen = seen.clone();
            breaker.on_state_transition(move |t| seen.lock().push((tag, t.from, t.to)));
        }

        let _ = fail(&breaker, upstream()).await;
        {
            let seen = seen.lock();
            assert_eq!(seen.len(), 2);
            assert_eq!(seen[0], ("first", CircuitState::Closed, CircuitState::Open));
            assert_eq!(seen[1], ("second", CircuitState::Closed, CircuitState::Open));
        }

        breaker.transition_to_closed();
        assert_eq!(seen.lock().len(), 4);
        assert_eq!(seen.lock()[3], ("second", CircuitState::Open, CircuitState::Closed));
    }

    #[tokio::test]
    async fn test_forced_open_holds_until_closed() {
        let breaker = CircuitBreaker::new("sqs-orders", config(5, Duration::ZERO));
        let transitions = Arc::new(Mutex::new(Vec::new()));
        let sink = transitions.clone();
        breaker.on_state_transition(move |t| sink.lock().push(*t));

        breaker.transition_to_open();
        breaker.transition_to_open();
        assert!(breaker.is_open());
        assert!(breaker.stats().forced);

        // Zero wait would normally permit a probe
        assert!(succeed(&breaker).await.is_err());
        assert!(breaker.is_open());

        breaker.transition_to_closed();
        assert_eq!(breaker.state(), CircuitState::Closed);
        assert_eq!(succeed(&breaker).await, Ok(7));
        assert_eq!(transitions.lock().len(), 2);
        assert!(transitions.lock()[0].is_closed_to_open());
    }

    #[test]
    fn test_rejects_without_polling_operation() {
        let breaker = CircuitBreaker::new("sqs-orders", config(1, Duration::from_secs(30)));
        breaker.transition_to_open();

        let polled = std::sync::atomic::AtomicBool::new(false);
        let result = tokio_test::block_on(breaker.call(async {
            polled.store(true, Ordering::SeqCst);
            Ok(1)
        }));
        assert!(matches!(result, Err(QueueError::CircuitOpen(_))));
        assert!(!polled.load(Ordering::SeqCst));
    }

    #[tokio::test]
    async fn test_custom_classifier() {
        let breaker = CircuitBreaker::with_classifier(
            "strict",
            config(2, Duration::from_secs(30)),
            |_| true,
        );
        let _ = fail(&breaker, validation()).await;
        let _ = fail(&breaker, validation()).await;
        assert!(breaker.is_open());
    }

    #[tokio::test]
    async fn test_stats_serialize() {
        let breaker = CircuitBreaker::new("sqs-orders", config(3, Duration::from_secs(30)));
        succeed(&breaker).await.unwrap();
        let _ = fail(&breaker, upstream()).await;

        let stats = breaker.stats();
        assert_eq!(stats.successful_calls, 1);
        assert_eq!(stats.failed_calls, 1);
        assert!((stats.failure_rate - 0.5).abs() < f64::EPSILON);

        let json = serde_json::to_value(&stats).unwrap();
        assert_eq!(json["state"], "CLOSED");
        assert_eq!(json["bufferedCalls"], 2);
    }
}
