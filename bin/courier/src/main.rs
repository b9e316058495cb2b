//! Courier Service
//!
//! Polls the configured SQS queues with the registered handlers and keeps a
//! failover-capable SNS publisher for outbound messages.
//!
//! ## Configuration
//!
//! Loaded from `COURIER_CONFIG` or the standard search paths, with
//! `COURIER_*` environment overrides. See `AppConfig::example_toml()`.
//!
//! ## Handlers
//!
//! - `log`: logs every message and acknowledges it
//! - `relay`: republishes every message to `COURIER_RELAY_TOPIC_ARN`
//!   (registered only when that variable is set)

use anyhow::Result;
use async_trait::async_trait;
use std::sync::Arc;
use tokio::signal;
use tracing::{error, info, warn};

use courier_common::{ConsumerEvent, PublishRequest, QueueMessage};
use courier_config::ConfigLoader;
use courier_engine::{
    CircuitBreakerConfig, ConsumerHandler, ConsumerSupervisor, HandlerRegistry, TopicPublisher,
};
use courier_queue::sns::SnsClientFactory;
use courier_queue::sqs::SqsClientFactory;
use courier_queue::QueueClientPool;

/// Logs each message
struct LoggingHandler;

#[async_trait]
impl ConsumerHandler for LoggingHandler {
    async fn consume(&self, message: &QueueMessage) -> anyhow::Result<()> {
        info!(
            message_id = %message.message_id,
            body_len = message.body.len(),
            attributes = %serde_json::to_string(&message.message_attributes)?,
            "Message received"
        );
        Ok(())
    }

    fn on_event(&self, event: ConsumerEvent, queue_name: &str) {
        info!(queue = %queue_name, event = %event, "Consumer event");
    }
}

/// Republishes each message body to one topic
struct RelayHandler {
    publisher: Arc<TopicPublisher>,
    topic_arn: String,
}

#[async_trait]
impl ConsumerHandler for RelayHandler {
    async fn consume(&self, message: &QueueMessage) -> anyhow::Result<()> {
        let request = PublishRequest {
            topic_arn: self.topic_arn.clone(),
            message: message.body.clone(),
            subject: None,
            message_attributes: message.message_attributes.clone(),
        };
        let message_id = self.publisher.publish(&request).await?;
        info!(source_id = %message.message_id, message_id = %message_id, "Message relayed");
        Ok(())
    }
}

#[tokio::main]
async fn main() -> Result<()> {
    // Load .env file if present (for local development)
    let _ = dotenvy::dotenv();

    courier_common::logging::init_logging("courier");

    info!("Starting Courier");

    let config = ConfigLoader::new().load()?;
    let breaker_config = CircuitBreakerConfig::from(&config.breaker);

    // 1. Publisher
    let publisher = Arc::new(
        TopicPublisher::connect(&config.topic, breaker_config.clone(), &SnsClientFactory).await?,
    );

    // 2. Handlers
    let mut handlers = HandlerRegistry::new();
    handlers.register("log", Arc::new(LoggingHandler));
    match std::env::var("COURIER_RELAY_TOPIC_ARN") {
        Ok(topic_arn) if !topic_arn.is_empty() => {
            info!(topic_arn = %topic_arn, "Relay handler enabled");
            handlers.register("relay", Arc::new(RelayHandler {
                publisher: publisher.clone(),
                topic_arn,
            }));
        }
        _ => {}
    }

    // 3. Consumers
    let factory = Arc::new(SqsClientFactory);
    let pool = Arc::new(if config.queue.enabled {
        QueueClientPool::new(factory)
    } else {
        QueueClientPool::disabled(factory)
    });

    let supervisor = ConsumerSupervisor::new(
        config.queue.clone(),
        breaker_config,
        config.backoff.clone(),
        handlers,
        pool.clone(),
    );

    let workers = supervisor.start().await?;
    info!(
        workers,
        publisher_clients = publisher.client_count(),
        "Courier started"
    );

    shutdown_signal().await;
    info!("Shutdown signal received...");

    supervisor.stop().await;
    publisher.shutdown().await;
    pool.close_all().await;

    info!("Courier shutdown complete");
    Ok(())
}

async fn shutdown_signal() {
    let ctrl_c = async {
        if let Err(e) = signal::ctrl_c().await {
            error!(error = %e, "Failed to install Ctrl+C handler");
            std::future::pending::<()>().await;
        }
    };

    #[cfg(unix)]
    let terminate = async {
        match signal::unix::signal(signal::unix::SignalKind::terminate()) {
            Ok(mut sigterm) => {
                sigterm.recv().await;
            }
            Err(e) => {
                warn!(error = %e, "Failed to install SIGTERM handler");
                std::future::pending::<()>().await;
            }
        }
    };

    #[cfg(not(unix))]
    let terminate = std::future::pending::<()>();

    tokio::select! {
        _ = ctrl_c => {},
        _ = terminate => {},
    }
}
