//! Amazon SQS queue client.
//!
//! # Example
//!
//! ```rust,ignore
//! use queuetap::queue::{QueueSettings, SqsQueue};
//!
//! let settings = QueueSettings::new("https://sqs.us-east-1.amazonaws.com/123456789012/orders")
//!     .with_endpoint_url("http://localhost:4566"); // LocalStack
//! let queue = SqsQueue::connect(&settings).await;
//! queue.ping().await?;
//! ```

use super::{QueueClient, QueueError, ReceiveRequest};
use crate::event::RawMessage;
use crate::publish::{EventPublisher, PublishError, PublishRequest};
use async_trait::async_trait;
use aws_config::{BehaviorVersion, SdkConfig};
use aws_sdk_sqs::config::Region;
use aws_sdk_sqs::error::DisplayErrorContext;
use aws_sdk_sqs::types::{
    Message, MessageAttributeValue, MessageSystemAttributeName, QueueAttributeName,
};
use aws_sdk_sqs::Client;
use serde::Deserialize;
use tracing::{debug, info, warn};

/// Where the queue lives and how to reach it.
#[derive(Debug, Clone, Default, PartialEq, Eq, Deserialize)]
pub struct QueueSettings {
    /// Queue URL
    #[serde(default)]
    pub url: String,

    /// AWS region; falls back to the default provider chain
    #[serde(default)]
    pub region: Option<String>,

    /// Endpoint override for SQS-compatible emulators
    #[serde(default)]
    pub endpoint_url: Option<String>,
}

impl QueueSettings {
    pub fn new(url: impl Into<String>) -> Self {
        Self {
            url: url.into(),
            region: None,
            endpoint_url: None,
        }
    }

    pub fn with_region(mut self, region: impl Into<String>) -> Self {
        self.region = Some(region.into());
        self
    }

    pub fn with_endpoint_url(mut self, endpoint_url: impl Into<String>) -> Self {
        self.endpoint_url = Some(endpoint_url.into());
        self
    }
}

/// Queue client backed by the AWS SDK.
#[derive(Debug, Clone)]
pub struct SqsQueue {
    client: Client,
    queue_url: String,
}

impl SqsQueue {
    /// Load AWS configuration from the environment and build a client.
    pub async fn connect(settings: &QueueSettings) -> Self {
        let conf =
            load_aws_config(settings.region.as_deref(), settings.endpoint_url.as_deref()).await;

        debug!(
            queue_url = %settings.url,
            region = ?conf.region(),
            "SQS client configured"
        );

        Self::from_client(Client::new(&conf), settings.url.clone())
    }

    pub fn from_client(client: Client, queue_url: impl Into<String>) -> Self {
        Self {
            client,
            queue_url: queue_url.into(),
        }
    }
}

/// Shared AWS configuration: default provider chain, with optional region
/// and endpoint overrides.
pub(crate) async fn load_aws_config(region: Option<&str>, endpoint_url: Option<&str>) -> SdkConfig {
    let mut loader = aws_config::defaults(BehaviorVersion::latest());
    if let Some(region) = region {
        loader = loader.region(Region::new(region.to_string()));
    }
    if let Some(endpoint_url) = endpoint_url {
        loader = loader.endpoint_url(endpoint_url);
    }
    loader.load().await
}

/// Convert an SDK message, skipping ones the queue should never produce.
fn into_raw(message: &Message) -> Result<RawMessage, QueueError> {
    let id = message
        .message_id()
        .ok_or_else(|| QueueError::InvalidMessage("missing message id".to_string()))?;
    let receipt_handle = message.receipt_handle().ok_or_else(|| {
        QueueError::InvalidMessage(format!("message {} has no receipt handle", id))
    })?;

    let mut raw = RawMessage::new(id, message.body().unwrap_or_default(), receipt_handle);
    if let Some(attributes) = message.attributes() {
        for (name, value) in attributes {
            raw.attributes
                .insert(name.as_str().to_string(), value.clone());
        }
    }
    Ok(raw)
}

fn string_attribute(value: &str) -> Result<MessageAttributeValue, PublishError> {
    MessageAttributeValue::builder()
        .data_type("String")
        .string_value(value)
        .build()
        .map_err(|e| PublishError::Queue(QueueError::Send(e.to_string())))
}

#[async_trait]
impl QueueClient for SqsQueue {
    async fn receive(&self, request: &ReceiveRequest) -> Result<Vec<RawMessage>, QueueError> {
        let output = self
            .client
            .receive_message()
            .queue_url(&self.queue_url)
            .max_number_of_messages(request.max_messages)
            .wait_time_seconds(request.wait_time_seconds)
            .visibility_timeout(request.visibility_timeout_seconds)
            .message_system_attribute_names(MessageSystemAttributeName::All)
            .send()
            .await
            .map_err(|e| QueueError::Receive(DisplayErrorContext(&e).to_string()))?;

        let messages = output
            .messages()
            .iter()
            .filter_map(|message| match into_raw(message) {
                Ok(raw) => Some(raw),
                Err(e) => {
                    warn!(error = %e, "Skipping malformed SQS message");
                    None
                }
            })
            .collect::<Vec<_>>();

        debug!(count = messages.len(), "Received SQS batch");
        Ok(messages)
    }

    async fn acknowledge(&self, receipt_handle: &str) -> Result<(), QueueError> {
        self.client
            .delete_message()
            .queue_url(&self.queue_url)
            .receipt_handle(receipt_handle)
            .send()
            .await
            .map_err(|e| QueueError::Acknowledge(DisplayErrorContext(&e).to_string()))?;
        Ok(())
    }

    async fn ping(&self) -> Result<(), QueueError> {
        let output = self
            .client
            .get_queue_attributes()
            .queue_url(&self.queue_url)
            .attribute_names(QueueAttributeName::ApproximateNumberOfMessages)
            .send()
            .await
            .map_err(|e| QueueError::Unreachable(DisplayErrorContext(&e).to_string()))?;

        let backlog = output
            .attributes()
            .and_then(|a| a.get(&QueueAttributeName::ApproximateNumberOfMessages))
            .map(String::as_str)
            .unwrap_or("unknown");

        info!(
            queue_url = %self.queue_url,
            approximate_messages = %backlog,
            "Queue reachable"
        );
        Ok(())
    }
}

#[async_trait]
impl EventPublisher for SqsQueue {
    async fn publish(&self, request: &PublishRequest) -> Result<String, PublishError> {
        let envelope = request.to_envelope(uuid::Uuid::new_v4().to_string(), chrono::Utc::now());
        let body = serde_json::to_string(&envelope)?;

        let mut send = self
            .client
            .send_message()
            .queue_url(&self.queue_url)
            .message_body(body)
            .message_attributes("source", string_attribute(&request.source)?)
            .message_attributes("detail-type", string_attribute(&request.detail_type)?);

        if let Some(trace_header) = &request.trace_header {
            send = send.message_attributes("trace-header", string_attribute(trace_header)?);
        }

        let output = send
            .send()
            .await
            .map_err(|e| PublishError::Queue(QueueError::Send(DisplayErrorContext(&e).to_string())))?;

        Ok(output.message_id().unwrap_or_default().to_string())
    }
}
