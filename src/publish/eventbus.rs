//! Publishing through an EventBridge event bus.
//!
//! The bus wraps the detail in its own envelope and routes it (via a rule)
//! to the queue the consumer reads, where it arrives in the same shape
//! [`PublishRequest::to_envelope`] produces for direct sends.

use super::{EventPublisher, PublishError, PublishRequest};
use crate::queue::sqs::load_aws_config;
use async_trait::async_trait;
use aws_sdk_eventbridge::error::DisplayErrorContext;
use aws_sdk_eventbridge::primitives::DateTime;
use aws_sdk_eventbridge::types::{PutEventsRequestEntry, PutEventsResultEntry};
use aws_sdk_eventbridge::Client;
use std::time::SystemTime;
use tracing::debug;

/// Bus used when none is named
pub const DEFAULT_EVENT_BUS: &str = "default";

/// Publishes events with `PutEvents`, one entry per request.
#[derive(Debug, Clone)]
pub struct EventBusPublisher {
    client: Client,
    bus_name: String,
}

impl EventBusPublisher {
    pub async fn connect(
        bus_name: impl Into<String>,
        region: Option<&str>,
        endpoint_url: Option<&str>,
    ) -> Self {
        let conf = load_aws_config(region, endpoint_url).await;
        let bus_name = bus_name.into();

        debug!(
            bus = %bus_name,
            region = ?conf.region(),
            "EventBridge client configured"
        );

        Self::from_client(Client::new(&conf), bus_name)
    }

    pub fn from_client(client: Client, bus_name: impl Into<String>) -> Self {
        Self {
            client,
            bus_name: bus_name.into(),
        }
    }

    pub fn bus_name(&self) -> &str {
        &self.bus_name
    }
}

fn entry_for(
    request: &PublishRequest,
    bus_name: &str,
    time: SystemTime,
) -> Result<PutEventsRequestEntry, PublishError> {
    let detail = serde_json::to_string(&request.detail)?;
    let resources = (!request.resources.is_empty()).then(|| request.resources.clone());

    Ok(PutEventsRequestEntry::builder()
        .event_bus_name(bus_name)
        .source(&request.source)
        .detail_type(&request.detail_type)
        .detail(detail)
        .time(DateTime::from(time))
        .set_resources(resources)
        .set_trace_header(request.trace_header.clone())
        .build())
}

/// The bus answers 200 even when it rejects an entry; the rejection is in
/// the per-entry result.
fn accepted_id(result: Option<&PutEventsResultEntry>) -> Result<String, PublishError> {
    let Some(result) = result else {
        return Err(PublishError::Rejected {
            code: "NoResult".to_string(),
            message: "event bus returned no result entry".to_string(),
        });
    };

    if let Some(code) = result.error_code() {
        return Err(PublishError::Rejected {
            code: code.to_string(),
            message: result.error_message().unwrap_or_default().to_string(),
        });
    }

    result
        .event_id()
        .map(str::to_string)
        .ok_or_else(|| PublishError::Rejected {
            code: "NoEventId".to_string(),
            message: "event bus accepted the entry without an event id".to_string(),
        })
}

#[async_trait]
impl EventPublisher for EventBusPublisher {
    async fn publish(&self, request: &PublishRequest) -> Result<String, PublishError> {
        let entry = entry_for(request, &self.bus_name, SystemTime::now())?;

        let output = self
            .client
            .put_events()
            .entries(entry)
            .send()
            .await
            .map_err(|e| PublishError::Bus(DisplayErrorContext(&e).to_string()))?;

        accepted_id(output.entries().first())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn request() -> PublishRequest {
        PublishRequest::builder()
            .source("myapp.orders")
            .detail_type("OrderCreated")
            .detail(r#"{"orderId":"o1","customerId":"c1","status":"created"}"#)
            .resources("arn:one, arn:two")
            .trace_header("Root=1-abc")
            .build()
            .unwrap()
    }

    #[test]
    fn test_entry_carries_request() {
        let entry = entry_for(&request(), "orders-bus", SystemTime::UNIX_EPOCH).unwrap();

        assert_eq!(entry.event_bus_name(), Some("orders-bus"));
        assert_eq!(entry.source(), Some("myapp.orders"));
        assert_eq!(entry.detail_type(), Some("OrderCreated"));
        assert_eq!(entry.resources().to_vec(), vec!["arn:one".to_string(), "arn:two".to_string()]);
        assert_eq!(entry.trace_header(), Some("Root=1-abc"));
        assert_eq!(entry.time().map(|t| t.secs()), Some(0));

        let detail: serde_json::Value = serde_json::from_str(entry.detail().unwrap()).unwrap();
        assert_eq!(detail["orderId"], "o1");
    }

    #[test]
    fn test_entry_omits_empty_optionals() {
        let request = PublishRequest::builder()
            .source("app")
            .detail_type("Ping")
            .detail("hello")
            .build()
            .unwrap();

        let entry = entry_for(&request, DEFAULT_EVENT_BUS, SystemTime::now()).unwrap();
        assert!(entry.resources().is_empty());
        assert!(entry.trace_header().is_none());
        assert_eq!(entry.detail(), Some("\"hello\""));
    }

    #[test]
    fn test_accepted_entry_returns_event_id() {
        let result = PutEventsResultEntry::builder().event_id("evt-1").build();
        assert_eq!(accepted_id(Some(&result)).unwrap(), "evt-1");
    }

    #[test]
    fn test_rejected_entry_is_an_error() {
        let result = PutEventsResultEntry::builder()
            .error_code("MalformedDetail")
            .error_message("Detail is malformed.")
            .build();

        let err = accepted_id(Some(&result)).unwrap_err();
        assert!(matches!(
            &err,
            PublishError::Rejected { code, message }
                if code == "MalformedDetail" && message == "Detail is malformed."
        ));
        assert!(err.to_string().contains("MalformedDetail"));

        assert!(matches!(
            accepted_id(None),
            Err(PublishError::Rejected { .. })
        ));
    }
}
