//! Courier Consumer Engine
//!
//! - ConsumerWorker: per-replica poll loop with backoff and cooperative shutdown
//! - ConsumerSupervisor: expands configuration into workers, pause/resume, stop
//! - CircuitBreaker: sliding-window breaker with transition listeners
//! - ExponentialBackoff: bounded exponential pacing while a circuit is open
//! - TopicPublisher: round-robin failover across topic clients

pub mod error;
pub mod backoff;
pub mod circuit_breaker;
pub mod handler;
pub mod worker;
pub mod supervisor;
pub mod publisher;

pub use error::ConsumerError;
pub use backoff::{delay_for_attempt, ExponentialBackoff};
pub use circuit_breaker::{
    CircuitBreaker, CircuitBreakerConfig, CircuitBreakerStats, CircuitState, StateTransition,
};
pub use handler::{ConsumerHandler, HandlerRegistry};
pub use worker::{ConsumerWorker, WorkerState};
pub use supervisor::ConsumerSupervisor;
pub use publisher::{TopicPublisher, PUBLISHER_BREAKER_NAME};

pub type Result<T> = std::result::Result<T, ConsumerError>;
