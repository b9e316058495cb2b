use thiserror::Error;

use courier_queue::QueueError;

#[derive(Error, Debug)]
pub enum ConsumerError {
    #[error("Queue error: {0}")]
    Queue(#[from] QueueError),

    #[error("Configuration error: {0}")]
    Config(String),

    #[error("No handler registered for '{0}'")]
    HandlerNotFound(String),

    #[error("Consumer supervisor already started")]
    AlreadyStarted,
}
