//! Publishing side: submit one event.
//!
//! The consumer never publishes. This module exists so the `queuetap-publish`
//! binary (and tests) can put correctly shaped events on the queue, either
//! through an EventBridge bus ([`EventBusPublisher`]) or by sending the
//! envelope straight to the queue ([`crate::queue::SqsQueue`],
//! [`crate::queue::MemoryQueue`]). Either way the consumer receives the same
//! event-bus envelope and unwraps it.
//!
//! # Example
//!
//! ```rust,ignore
//! use queuetap::publish::{EventPublisher, PublishRequest};
//!
//! let request = PublishRequest::builder()
//!     .source("myapp.orders")
//!     .detail_type("OrderCreated")
//!     .detail(r#"{"orderId":"o1","status":"created","customerId":"c1"}"#)
//!     .build()?;
//! let id = queue.publish(&request).await?;
//! ```

pub mod eventbus;

use crate::queue::QueueError;
use async_trait::async_trait;
use chrono::{DateTime, SecondsFormat, Utc};
use serde_json::{json, Value};
use thiserror::Error;

pub use eventbus::{EventBusPublisher, DEFAULT_EVENT_BUS};

#[derive(Debug, Error)]
pub enum PublishError {
    #[error("detail payload cannot be empty")]
    EmptyDetail,

    #[error("missing required field: {0}")]
    MissingField(&'static str),

    #[error("serialization error: {0}")]
    Serialization(#[from] serde_json::Error),

    #[error(transparent)]
    Queue(#[from] QueueError),

    #[error("event bus request failed: {0}")]
    Bus(String),

    /// The bus accepted the call but refused the entry
    #[error("event rejected ({code}): {message}")]
    Rejected { code: String, message: String },
}

/// A single event to publish.
#[derive(Debug, Clone, PartialEq)]
pub struct PublishRequest {
    pub source: String,
    pub detail_type: String,

    /// Event payload; always valid JSON (see [`prepare_detail`])
    pub detail: Value,

    pub resources: Vec<String>,
    pub trace_header: Option<String>,
}

impl PublishRequest {
    pub fn builder() -> PublishRequestBuilder {
        PublishRequestBuilder::default()
    }

    /// Wrap the request in an event-bus envelope.
    pub fn to_envelope(&self, id: String, time: DateTime<Utc>) -> Value {
        json!({
            "version": "0",
            "id": id,
            "detail-type": self.detail_type,
            "source": self.source,
            "time": time.to_rfc3339_opts(SecondsFormat::Secs, true),
            "resources": self.resources,
            "detail": self.detail,
        })
    }
}

#[derive(Debug, Default, Clone)]
pub struct PublishRequestBuilder {
    source: Option<String>,
    detail_type: Option<String>,
    detail: Option<String>,
    resources: Vec<String>,
    trace_header: Option<String>,
}

impl PublishRequestBuilder {
    pub fn source(mut self, source: impl Into<String>) -> Self {
        self.source = Some(source.into());
        self
    }

    pub fn detail_type(mut self, detail_type: impl Into<String>) -> Self {
        self.detail_type = Some(detail_type.into());
        self
    }

    /// Raw detail text; JSON is kept as-is, anything else becomes a JSON string
    pub fn detail(mut self, detail: impl Into<String>) -> Self {
        self.detail = Some(detail.into());
        self
    }

    /// Comma-separated resource list
    pub fn resources(mut self, resources: &str) -> Self {
        self.resources = split_and_trim(resources);
        self
    }

    pub fn trace_header(mut self, trace_header: &str) -> Self {
        let trimmed = trace_header.trim();
        self.trace_header = (!trimmed.is_empty()).then(|| trimmed.to_string());
        self
    }

    pub fn build(self) -> Result<PublishRequest, PublishError> {
        let source = non_blank(self.source).ok_or(PublishError::MissingField("source"))?;
        let detail_type =
            non_blank(self.detail_type).ok_or(PublishError::MissingField("detail-type"))?;
        let detail = self.detail.ok_or(PublishError::MissingField("message"))?;

        Ok(PublishRequest {
            source,
            detail_type,
            detail: prepare_detail(&detail)?,
            resources: self.resources,
            trace_header: self.trace_header,
        })
    }
}

fn non_blank(value: Option<String>) -> Option<String> {
    value.filter(|v| !v.trim().is_empty())
}

/// Turn user input into a JSON detail payload.
///
/// Valid JSON passes through unchanged; other text is wrapped as a JSON
/// string. Blank input is rejected.
pub fn prepare_detail(input: &str) -> Result<Value, PublishError> {
    if input.trim().is_empty() {
        return Err(PublishError::EmptyDetail);
    }

    match serde_json::from_str(input) {
        Ok(value) => Ok(value),
        Err(_) => Ok(Value::String(input.to_string())),
    }
}

/// Split a comma-separated list, dropping blank entries.
pub fn split_and_trim(value: &str) -> Vec<String> {
    value
        .split(',')
        .map(str::trim)
        .filter(|part| !part.is_empty())
        .map(str::to_string)
        .collect()
}

/// Something that can submit an event and return its assigned ID.
#[async_trait]
pub trait EventPublisher: Send + Sync {
    async fn publish(&self, request: &PublishRequest) -> Result<String, PublishError>;
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::TimeZone;

    #[test]
    fn test_prepare_detail_json_passthrough() {
        let detail = prepare_detail(r#"{"orderId":"o1"}"#).unwrap();
        assert_eq!(detail, json!({"orderId": "o1"}));
    }

    #[test]
    fn test_prepare_detail_wraps_text() {
        let detail = prepare_detail("hello there").unwrap();
        assert_eq!(detail, Value::String("hello there".to_string()));
    }

    #[test]
    fn test_prepare_detail_rejects_blank() {
        assert!(matches!(prepare_detail("   "), Err(PublishError::EmptyDetail)));
    }

    #[test]
    fn test_split_and_trim() {
        assert_eq!(
            split_and_trim(" arn:a , ,arn:b,"),
            vec!["arn:a".to_string(), "arn:b".to_string()]
        );
        assert!(split_and_trim("").is_empty());
    }

    #[test]
    fn test_builder_requires_fields() {
        let missing_source = PublishRequest::builder()
            .detail_type("OrderCreated")
            .detail("{}")
            .build();
        assert!(matches!(
            missing_source,
            Err(PublishError::MissingField("source"))
        ));

        let blank_type = PublishRequest::builder()
            .source("app")
            .detail_type("  ")
            .detail("{}")
            .build();
        assert!(matches!(
            blank_type,
            Err(PublishError::MissingField("detail-type"))
        ));
    }

    #[test]
    fn test_envelope_shape() {
        let request = PublishRequest::builder()
            .source("myapp.orders")
            .detail_type("OrderUpdated")
            .detail(r#"{"orderId":"o1","status":"shipped"}"#)
            .resources("arn:one, arn:two")
            .trace_header("  ")
            .build()
            .unwrap();
        assert!(request.trace_header.is_none());

        let time = Utc.with_ymd_and_hms(2024, 1, 1, 0, 0, 0).unwrap();
        let envelope = request.to_envelope("evt-1".to_string(), time);

        assert_eq!(envelope["detail-type"], "OrderUpdated");
        assert_eq!(envelope["source"], "myapp.orders");
        assert_eq!(envelope["time"], "2024-01-01T00:00:00Z");
        assert_eq!(envelope["resources"], json!(["arn:one", "arn:two"]));
        assert_eq!(envelope["detail"]["orderId"], "o1");
    }
}
