//! Clients handed out while a module is disabled.
//!
//! Every operation fails immediately with [`QueueError::Disabled`]; nothing
//! touches the network.

use async_trait::async_trait;
use std::collections::HashMap;

use courier_common::{PublishRequest, QueueMessage, ReceiveRequest, SendRequest};
use crate::{QueueClient, QueueError, Result, TopicClient};

#[derive(Debug, Default, Clone, Copy)]
pub struct DisabledQueueClient;

#[async_trait]
impl QueueClient for DisabledQueueClient {
    async fn resolve_queue_url(&self, _queue_name: &str) -> Result<String> {
        Err(QueueError::Disabled("SQS"))
    }

    async fn receive(&self, _request: &ReceiveRequest) -> Result<Vec<QueueMessage>> {
        Err(QueueError::Disabled("SQS"))
    }

    async fn delete(&self, _queue_url: &str, _receipt_handle: &str) -> Result<()> {
        Err(QueueError::Disabled("SQS"))
    }

    async fn send(&self, _request: &SendRequest) -> Result<String> {
        Err(QueueError::Disabled("SQS"))
    }
}

#[derive(Debug, Default, Clone, Copy)]
pub struct DisabledTopicClient;

#[async_trait]
impl TopicClient for DisabledTopicClient {
    async fn publish(&self, _request: &PublishRequest) -> Result<String> {
        Err(QueueError::Disabled("SNS"))
    }

    async fn create_topic(&self, _name: &str) -> Result<String> {
        Err(QueueError::Disabled("SNS"))
    }

    async fn delete_topic(&self, _topic_arn: &str) -> Result<()> {
        Err(QueueError::Disabled("SNS"))
    }

    async fn subscribe(&self, _topic_arn: &str, _protocol: &str, _endpoint: &str) -> Result<String> {
        Err(QueueError::Disabled("SNS"))
    }

    async fn unsubscribe(&self, _subscription_arn: &str) -> Result<()> {
        Err(QueueError::Disabled("SNS"))
    }

    async fn get_topic_attributes(&self, _topic_arn: &str) -> Result<HashMap<String, String>> {
        Err(QueueError::Disabled("SNS"))
    }

    async fn set_topic_attributes(&self, _topic_arn: &str, _name: &str, _value: &str) -> Result<()> {
        Err(QueueError::Disabled("SNS"))
    }

    async fn list_topics(&self, _next_token: Option<&str>) -> Result<(Vec<String>, Option<String>)> {
        Err(QueueError::Disabled("SNS"))
    }
}
