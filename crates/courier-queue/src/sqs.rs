use async_trait::async_trait;
use aws_config::{BehaviorVersion, Region};
use aws_sdk_sqs::types::{Message as SqsMessage, MessageAttributeValue, MessageSystemAttributeName};
use aws_sdk_sqs::Client;
use std::sync::Arc;
use tracing::{debug, info};

use courier_common::{EndpointConfig, QueueMessage, ReceiveRequest, SendRequest};
use crate::{QueueClient, QueueClientFactory, QueueError, Result};

/// AWS SQS client for a single `(region, endpoint)` pair
pub struct SqsQueueClient {
    client: Client,
    region: String,
}

impl SqsQueueClient {
    pub fn new(client: Client, region: impl Into<String>) -> Self {
        Self {
            client,
            region: region.into(),
        }
    }

    fn convert_message(sqs_msg: SqsMessage) -> QueueMessage {
        let attributes = sqs_msg.attributes
            .unwrap_or_default()
            .into_iter()
            .map(|(name, value)| (name.as_str().to_string(), value))
            .collect();

        let message_attributes = sqs_msg.message_attributes
            .unwrap_or_default()
            .into_iter()
            .filter_map(|(name, value)| value.string_value.map(|v| (name, v)))
            .collect();

        QueueMessage {
            message_id: sqs_msg.message_id.unwrap_or_default(),
            body: sqs_msg.body.unwrap_or_default(),
            receipt_handle: sqs_msg.receipt_handle.unwrap_or_default(),
            attributes,
            message_attributes,
        }
    }
}

#[async_trait]
impl QueueClient for SqsQueueClient {
    async fn resolve_queue_url(&self, queue_name: &str) -> Result<String> {
        let result = self.client
            .get_queue_url()
            .queue_name(queue_name)
            .send()
            .await;

        let output = match result {
            Ok(output) => output,
            Err(e) => {
                let missing = e.as_service_error().is_some_and(|se| se.is_queue_does_not_exist());
                if missing {
                    return Err(QueueError::NotFound(queue_name.to_string()));
                }
                return Err(QueueError::from_sdk_error(e));
            }
        };

        let url = output.queue_url
            .ok_or_else(|| QueueError::NotFound(queue_name.to_string()))?;
        debug!(queue = %queue_name, url = %url, region = %self.region, "Resolved queue URL");
        Ok(url)
    }

    async fn receive(&self, request: &ReceiveRequest) -> Result<Vec<QueueMessage>> {
        let queue_url = request.queue_url.as_deref()
            .filter(|url| !url.is_empty())
            .ok_or_else(|| QueueError::Client {
                status: None,
                message: "receive request has no queue URL".to_string(),
            })?;

        let mut builder = self.client
            .receive_message()
            .queue_url(queue_url)
            .max_number_of_messages(request.max_number_of_messages.clamp(1, 10))
            .wait_time_seconds(request.wait_time_seconds.clamp(0, 20))
            .set_visibility_timeout(request.visibility_timeout);

        for name in &request.attribute_names {
            builder = builder.message_system_attribute_names(MessageSystemAttributeName::from(name.as_str()));
        }
        for name in &request.message_attribute_names {
            builder = builder.message_attribute_names(name.clone());
        }

        let output = builder.send().await.map_err(QueueError::from_sdk_error)?;
        let messages: Vec<QueueMessage> = output.messages
            .unwrap_or_default()
            .into_iter()
            .map(Self::convert_message)
            .collect();

        if !messages.is_empty() {
            debug!(queue_url = %queue_url, count = messages.len(), "Received messages from SQS");
        }
        Ok(messages)
    }

    async fn delete(&self, queue_url: &str, receipt_handle: &str) -> Result<()> {
        self.client
            .delete_message()
            .queue_url(queue_url)
            .receipt_handle(receipt_handle)
            .send()
            .await
            .map_err(QueueError::from_sdk_error)?;

        debug!(queue_url = %queue_url, "Message deleted from SQS");
        Ok(())
    }

    async fn send(&self, request: &SendRequest) -> Result<String> {
        let mut builder = self.client
            .send_message()
            .queue_url(&request.queue_url)
            .message_body(&request.body)
            .set_delay_seconds(request.delay_seconds)
            .set_message_group_id(request.message_group_id.clone())
            .set_message_deduplication_id(request.message_deduplication_id.clone());

        for (name, value) in &request.message_attributes {
            let attribute = MessageAttributeValue::builder()
                .data_type("String")
                .string_value(value)
                .build()
                .map_err(|e| QueueError::Client { status: None, message: e.to_string() })?;
            builder = builder.message_attributes(name, attribute);
        }

        let output = builder.send().await.map_err(QueueError::from_sdk_error)?;
        Ok(output.message_id.unwrap_or_default())
    }

    async fn close(&self) {
        info!(region = %self.region, "SQS client closed");
    }
}

/// Creates SQS clients from the default AWS credential chain
#[derive(Debug, Default, Clone)]
pub struct SqsClientFactory;

#[async_trait]
impl QueueClientFactory for SqsClientFactory {
    async fn create(&self, endpoint: &EndpointConfig) -> Result<Arc<dyn QueueClient>> {
        let mut loader = aws_config::defaults(BehaviorVersion::latest())
            .region(Region::new(endpoint.region.clone()));

        if let Some(url) = &endpoint.endpoint {
            loader = loader.endpoint_url(url);
        }

        let sdk_config = loader.load().await;
        info!(
            region = %endpoint.region,
            endpoint = endpoint.endpoint.as_deref().unwrap_or("default"),
            "SQS client created"
        );
        Ok(Arc::new(SqsQueueClient::new(Client::new(&sdk_config), endpoint.region.clone())))
    }
}
