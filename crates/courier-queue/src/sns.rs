use async_trait::async_trait;
use aws_config::{BehaviorVersion, Region};
use aws_sdk_sns::types::MessageAttributeValue;
use aws_sdk_sns::Client;
use std::collections::HashMap;
use std::sync::Arc;
use tracing::{debug, info};

use courier_common::{EndpointConfig, PublishRequest};
use crate::{QueueError, Result, TopicClient, TopicClientFactory};

/// AWS SNS client for a single endpoint
pub struct SnsTopicClient {
    client: Client,
    region: String,
}

impl SnsTopicClient {
    pub fn new(client: Client, region: impl Into<String>) -> Self {
        Self {
            client,
            region: region.into(),
        }
    }
}

#[async_trait]
impl TopicClient for SnsTopicClient {
    async fn publish(&self, request: &PublishRequest) -> Result<String> {
        let mut builder = self.client
            .publish()
            .topic_arn(&request.topic_arn)
            .message(&request.message)
            .set_subject(request.subject.clone());

        for (name, value) in &request.message_attributes {
            let attribute = MessageAttributeValue::builder()
                .data_type("String")
                .string_value(value)
                .build()
                .map_err(|e| QueueError::Client { status: None, message: e.to_string() })?;
            builder = builder.message_attributes(name, attribute);
        }

        let output = builder.send().await.map_err(QueueError::from_sdk_error)?;
        let message_id = output.message_id.unwrap_or_default();
        debug!(topic_arn = %request.topic_arn, message_id = %message_id, "Published to SNS");
        Ok(message_id)
    }

    async fn create_topic(&self, name: &str) -> Result<String> {
        let output = self.client
            .create_topic()
            .name(name)
            .send()
            .await
            .map_err(QueueError::from_sdk_error)?;

        output.topic_arn.ok_or_else(|| QueueError::Upstream {
            status: 200,
            message: format!("create_topic returned no ARN for '{}'", name),
        })
    }

    async fn delete_topic(&self, topic_arn: &str) -> Result<()> {
        self.client
            .delete_topic()
            .topic_arn(topic_arn)
            .send()
            .await
            .map_err(QueueError::from_sdk_error)?;
        Ok(())
    }

    async fn subscribe(&self, topic_arn: &str, protocol: &str, endpoint: &str) -> Result<String> {
        let output = self.client
            .subscribe()
            .topic_arn(topic_arn)
            .protocol(protocol)
            .endpoint(endpoint)
            .send()
            .await
            .map_err(QueueError::from_sdk_error)?;

        Ok(output.subscription_arn.unwrap_or_default())
    }

    async fn unsubscribe(&self, subscription_arn: &str) -> Result<()> {
        self.client
            .unsubscribe()
            .subscription_arn(subscription_arn)
            .send()
            .await
            .map_err(QueueError::from_sdk_error)?;
        Ok(())
    }

    async fn get_topic_attributes(&self, topic_arn: &str) -> Result<HashMap<String, String>> {
        let output = self.client
            .get_topic_attributes()
            .topic_arn(topic_arn)
            .send()
            .await
            .map_err(QueueError::from_sdk_error)?;

        Ok(output.attributes.unwrap_or_default())
    }

    async fn set_topic_attributes(&self, topic_arn: &str, name: &str, value: &str) -> Result<()> {
        self.client
            .set_topic_attributes()
            .topic_arn(topic_arn)
            .attribute_name(name)
            .attribute_value(value)
            .send()
            .await
            .map_err(QueueError::from_sdk_error)?;
        Ok(())
    }

    async fn list_topics(&self, next_token: Option<&str>) -> Result<(Vec<String>, Option<String>)> {
        let output = self.client
            .list_topics()
            .set_next_token(next_token.map(str::to_string))
            .send()
            .await
            .map_err(QueueError::from_sdk_error)?;

        let arns = output.topics
            .unwrap_or_default()
            .into_iter()
            .filter_map(|topic| topic.topic_arn)
            .collect();
        Ok((arns, output.next_token))
    }

    async fn close(&self) {
        info!(region = %self.region, "SNS client closed");
    }
}

/// Creates SNS clients from the default AWS credential chain
#[derive(Debug, Default, Clone)]
pub struct SnsClientFactory;

#[async_trait]
impl TopicClientFactory for SnsClientFactory {
    async fn create(&self, endpoint: &EndpointConfig) -> Result<Arc<dyn TopicClient>> {
        let mut loader = aws_config::defaults(BehaviorVersion::latest())
            .region(Region::new(endpoint.region.clone()));

        if let Some(url) = &endpoint.endpoint {
            loader = loader.endpoint_url(url);
        }

        let sdk_config = loader.load().await;
        info!(
            region = %endpoint.region,
            endpoint = endpoint.endpoint.as_deref().unwrap_or("default"),
            "SNS client created"
        );
        Ok(Arc::new(SnsTopicClient::new(Client::new(&sdk_config), endpoint.region.clone())))
    }
}
