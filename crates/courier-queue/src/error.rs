use thiserror::Error;

#[cfg(feature = "sqs")]
use aws_sdk_sqs::{config::http::HttpResponse, error::{DisplayErrorContext, SdkError}};
#[cfg(all(feature = "sns", not(feature = "sqs")))]
use aws_sdk_sns::{config::http::HttpResponse, error::{DisplayErrorContext, SdkError}};

#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum QueueError {
    /// 5xx-class fault reported by the service
    #[error("Upstream error (status {status}): {message}")]
    Upstream { status: u16, message: String },

    /// 4xx-class or validation fault caused by the request
    #[error("Client error (status {status:?}): {message}")]
    Client { status: Option<u16>, message: String },

    /// Network, dispatch or timeout failure before a response arrived
    #[error("Transport error: {0}")]
    Transport(String),

    #[error("Queue not found: {0}")]
    NotFound(String),

    #[error("Circuit breaker '{0}' is open")]
    CircuitOpen(String),

    #[error("{0} module is disabled")]
    Disabled(&'static str),

    #[error("Unable to resolve client: {0}")]
    Resolution(String),

    #[error("Configuration error: {0}")]
    Config(String),
}

impl QueueError {
    /// Classify an HTTP status from the service.
    pub fn from_status(status: u16, message: impl Into<String>) -> Self {
        let message = message.into();
        if (500..=599).contains(&status) {
            QueueError::Upstream { status, message }
        } else {
            QueueError::Client { status: Some(status), message }
        }
    }

    /// Classify an AWS SDK failure: responses by HTTP status, a request that
    /// could not be built as a caller fault, anything else (dispatch,
    /// timeout) as transport.
    #[cfg(any(feature = "sqs", feature = "sns"))]
    pub fn from_sdk_error<E>(err: SdkError<E, HttpResponse>) -> Self
    where
        E: std::error::Error + Send + Sync + 'static,
    {
        let message = DisplayErrorContext(&err).to_string();
        match &err {
            SdkError::ServiceError(ctx) => QueueError::from_status(ctx.raw().status().as_u16(), message),
            SdkError::ResponseError(ctx) => QueueError::from_status(ctx.raw().status().as_u16(), message),
            SdkError::ConstructionFailure(_) => QueueError::Client { status: None, message },
            _ => QueueError::Transport(message),
        }
    }

    /// True for faults on the service side (5xx, network, timeout).
    ///
    /// Only these count toward opening a circuit; caller faults never do.
    pub fn is_upstream_fault(&self) -> bool {
        matches!(self, QueueError::Upstream { .. } | QueueError::Transport(_))
    }

    pub fn is_circuit_open(&self) -> bool {
        matches!(self, QueueError::CircuitOpen(_))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_status_classification() {
        assert!(QueueError::from_status(500, "boom").is_upstream_fault());
        assert!(QueueError::from_status(503, "unavailable").is_upstream_fault());
        assert!(!QueueError::from_status(400, "bad request").is_upstream_fault());
        assert!(!QueueError::from_status(403, "denied").is_upstream_fault());
        assert!(!QueueError::from_status(600, "odd").is_upstream_fault());
    }

    #[test]
    fn test_non_status_errors() {
        assert!(QueueError::Transport("timeout".into()).is_upstream_fault());
        assert!(!QueueError::NotFound("q".into()).is_upstream_fault());
        assert!(!QueueError::CircuitOpen("sqs-q".into()).is_upstream_fault());
        assert!(!QueueError::Disabled("SQS").is_upstream_fault());
        assert!(QueueError::CircuitOpen("sqs-q".into()).is_circuit_open());
    }

    #[cfg(any(feature = "sqs", feature = "sns"))]
    #[test]
    fn test_sdk_error_classification() {
        type Sdk = SdkError<std::io::Error, HttpResponse>;

        let timeout = QueueError::from_sdk_error(Sdk::timeout_error("request timed out"));
        assert!(matches!(timeout, QueueError::Transport(_)));
        assert!(timeout.is_upstream_fault());

        let construction = QueueError::from_sdk_error(Sdk::construction_failure("missing queue url"));
        assert!(matches!(construction, QueueError::Client { status: None, .. }));
        assert!(!construction.is_upstream_fault());
    }
}
