//! Per-message unit of work.
//!
//! [`MessageProcessor::process`] parses a message body, unwraps an event-bus
//! envelope if there is one, classifies the event (by `detail-type` when the
//! envelope names a known one, by shape otherwise), decodes it, and renders a
//! human-readable report. It holds no mutable state, so one processor is
//! shared by every worker and the same message always renders the same way.

use crate::classify::{classify_envelope, decode_as};
use crate::event::{EnvelopeHeader, EventKind, RawMessage, TypedEvent};
use serde_json::Value;
use thiserror::Error;
use tracing::debug;

/// Why a message could not be rendered as a typed event.
///
/// Neither case is fatal: the message is still considered handled.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum ProcessingError {
    /// Body is not JSON at all
    #[error("unparsable body: {0}")]
    Unparsable(String),

    /// Body is JSON but does not fit the schema of its classified kind
    #[error("schema mismatch: {0}")]
    SchemaMismatch(String),
}

/// Observability record for one processed delivery.
#[derive(Debug, Clone, PartialEq)]
pub struct ProcessingOutcome {
    pub message_id: String,

    /// Worker that handled the delivery
    pub worker_id: usize,

    /// Classified kind; `None` when the body was not JSON
    pub kind: Option<EventKind>,

    /// Envelope header when the event arrived wrapped
    pub envelope: Option<EnvelopeHeader>,

    /// Decoded event, when decoding succeeded
    pub event: Option<TypedEvent>,

    pub error: Option<ProcessingError>,

    /// Multi-line report for operators
    pub rendering: String,
}

impl ProcessingOutcome {
    pub fn is_unparsable(&self) -> bool {
        matches!(self.error, Some(ProcessingError::Unparsable(_)))
    }
}

/// Renders queue messages into typed, human-readable reports.
#[derive(Debug, Clone, Default)]
pub struct MessageProcessor;

impl MessageProcessor {
    pub fn new() -> Self {
        Self
    }

    /// Process one delivery on behalf of `worker_id`.
    pub fn process(&self, worker_id: usize, message: &RawMessage) -> ProcessingOutcome {
        let mut outcome = ProcessingOutcome {
            message_id: message.id.clone(),
            worker_id,
            kind: None,
            envelope: None,
            event: None,
            error: None,
            rendering: String::new(),
        };

        let parsed: Value = match serde_json::from_str(&message.body) {
            Ok(value) => value,
            Err(e) => {
                debug!(message_id = %message.id, error = %e, "Message body is not JSON");
                outcome.error = Some(ProcessingError::Unparsable(e.to_string()));
                outcome.rendering = render(message, &outcome, None);
                return outcome;
            }
        };

        let (envelope, detail) = EnvelopeHeader::unwrap(parsed);
        let kind = classify_envelope(envelope.as_ref(), &detail);
        outcome.kind = Some(kind);
        outcome.envelope = envelope;

        match decode_as(kind, &detail) {
            Ok(event) => outcome.event = Some(event),
            Err(e) => {
                debug!(message_id = %message.id, kind = %kind, error = %e, "Event decode failed");
                outcome.error = Some(ProcessingError::SchemaMismatch(e.source.to_string()));
            }
        }

        outcome.rendering = render(message, &outcome, Some(&detail));
        outcome
    }
}

/// Build the operator-facing report.
///
/// Attributes are sorted by name so identical input renders identically.
fn render(message: &RawMessage, outcome: &ProcessingOutcome, detail: Option<&Value>) -> String {
    let mut lines = vec![format!("========== Message {} ==========", message.id)];

    if let Some(envelope) = &outcome.envelope {
        lines.push(format!(
            "Envelope: {} from {} (id {}, time {})",
            envelope.detail_type,
            envelope.source.as_deref().unwrap_or("-"),
            envelope.id.as_deref().unwrap_or("-"),
            envelope.time.as_deref().unwrap_or("-"),
        ));
    }

    match (&outcome.kind, &outcome.error) {
        (None, _) => lines.push(format!("Body (unparsable): {}", message.body)),
        (Some(kind), Some(error)) => {
            lines.push(format!("Kind: {} ({})", kind, error));
            lines.extend(render_json(detail));
        }
        (Some(kind), None) => {
            lines.push(format!("Kind: {}", kind));
            match &outcome.event {
                Some(TypedEvent::Unknown(_)) | None => lines.extend(render_json(detail)),
                Some(event) => lines.extend(
                    event
                        .fields()
                        .into_iter()
                        .map(|(name, value)| format!("  {}: {}", name, value)),
                ),
            }
        }
    }

    if !message.attributes.is_empty() {
        let mut attributes: Vec<_> = message.attributes.iter().collect();
        attributes.sort();
        lines.push("Attributes:".to_string());
        lines.extend(
            attributes
                .into_iter()
                .map(|(name, value)| format!("  {}: {}", name, value)),
        );
    }

    lines.push("==================================".to_string());
    lines.join("\n")
}

fn render_json(detail: Option<&Value>) -> Option<String> {
    detail.map(|value| {
        let pretty = serde_json::to_string_pretty(value).unwrap_or_else(|_| value.to_string());
        format!("Event JSON:\n{}", pretty)
    })
}

#[cfg(test)]
mod tests {
    use super::*;

    const PAYMENT: &str = r#"{"paymentId":"p1","orderId":"o1","amount":9.99,"currency":"USD","paymentMethod":"card","status":"captured","timestamp":"2024-01-01T00:00:00Z"}"#;

    #[test]
    fn test_payment_scenario() {
        let processor = MessageProcessor::new();
        let message = RawMessage::new("m1", PAYMENT, "r1");

        let outcome = processor.process(3, &message);
        assert_eq!(outcome.kind, Some(EventKind::PaymentProcessed));
        assert_eq!(outcome.worker_id, 3);
        assert!(outcome.error.is_none());
        assert!(outcome.rendering.contains("Kind: PaymentProcessed"));
        assert!(outcome.rendering.contains("  paymentId: p1"));
        assert!(outcome.rendering.contains("  amount: 9.99"));
        assert!(!outcome.rendering.contains("transactionId"));
        assert!(!outcome.rendering.contains("customerId"));
    }

    #[test]
    fn test_unparsable_body() {
        let processor = MessageProcessor::new();
        let message = RawMessage::new("m2", "not json at all", "r2");

        let outcome = processor.process(0, &message);
        assert!(outcome.is_unparsable());
        assert!(outcome.kind.is_none());
        assert!(outcome.event.is_none());
        assert!(outcome
            .rendering
            .contains("Body (unparsable): not json at all"));
    }

    #[test]
    fn test_schema_mismatch_shows_json() {
        let processor = MessageProcessor::new();
        let message = RawMessage::new(
            "m3",
            r#"{"orderId":"o1","status":"new","customerId":"c1"}"#,
            "r3",
        );

        let outcome = processor.process(0, &message);
        assert_eq!(outcome.kind, Some(EventKind::OrderCreated));
        assert!(matches!(
            outcome.error,
            Some(ProcessingError::SchemaMismatch(_))
        ));
        assert!(outcome.event.is_none());
        assert!(outcome.rendering.contains("Event JSON:"));
        assert!(outcome.rendering.contains("\"customerId\": \"c1\""));
    }

    #[test]
    fn test_unknown_shape_shows_json() {
        let processor = MessageProcessor::new();
        let message = RawMessage::new("m4", r#"{"hello":"world"}"#, "r4");

        let outcome = processor.process(0, &message);
        assert_eq!(outcome.kind, Some(EventKind::Unknown));
        assert!(outcome.error.is_none());
        assert!(outcome.rendering.contains("Kind: Unknown"));
        assert!(outcome.rendering.contains("\"hello\": \"world\""));
    }

    #[test]
    fn test_envelope_is_unwrapped() {
        let processor = MessageProcessor::new();
        let body = format!(
            r#"{{"id":"evt-1","detail-type":"PaymentProcessed","source":"myapp.payments","time":"2024-01-01T00:00:00Z","detail":{}}}"#,
            PAYMENT
        );
        let message = RawMessage::new("m5", body, "r5");

        let outcome = processor.process(0, &message);
        assert_eq!(outcome.kind, Some(EventKind::PaymentProcessed));
        assert_eq!(
            outcome.envelope.as_ref().map(|e| e.detail_type.as_str()),
            Some("PaymentProcessed")
        );
        assert!(outcome
            .rendering
            .contains("Envelope: PaymentProcessed from myapp.payments (id evt-1"));
    }

    fn s3_message(id: &str, detail_type: &str, detail: &str) -> RawMessage {
        let body = format!(
            r#"{{"version":"0","id":"evt-{id}","detail-type":"{detail_type}","source":"aws.s3","account":"123456789012","time":"2024-01-01T00:00:00Z","region":"us-east-1","resources":["arn:aws:s3:::uploads"],"detail":{detail}}}"#
        );
        RawMessage::new(id, body, "r")
    }

    #[test]
    fn test_s3_object_created() {
        let message = s3_message(
            "m7",
            "Object Created",
            r#"{"version":"0","bucket":{"name":"uploads"},"object":{"key":"a.txt","size":12,"etag":"e1","sequencer":"01"},"request-id":"q1","requester":"123456789012","source-ip-address":"10.0.0.1","reason":"PutObject"}"#,
        );

        let outcome = MessageProcessor::new().process(0, &message);
        assert_eq!(outcome.kind, Some(EventKind::ObjectCreated));
        assert!(outcome.error.is_none());
        assert!(outcome.rendering.contains("Kind: ObjectCreated"));
        assert!(outcome.rendering.contains("  bucket: uploads"));
        assert!(outcome.rendering.contains("  key: a.txt"));
        assert!(outcome.rendering.contains("  reason: PutObject"));
        assert!(!outcome.rendering.contains("deletion-type"));
    }

    #[test]
    fn test_s3_object_deleted() {
        let message = s3_message(
            "m8",
            "Object Deleted",
            r#"{"version":"0","bucket":{"name":"uploads"},"object":{"key":"a.txt","etag":"e1","sequencer":"02"},"deletion-type":"Permanently Deleted","reason":"DeleteObject"}"#,
        );

        let outcome = MessageProcessor::new().process(0, &message);
        assert_eq!(outcome.kind, Some(EventKind::ObjectDeleted));
        assert!(matches!(outcome.event, Some(TypedEvent::ObjectDeleted(_))));
        assert!(outcome
            .rendering
            .contains("  deletion-type: Permanently Deleted"));
    }

    #[test]
    fn test_unknown_detail_type_classified_by_shape() {
        let message = s3_message(
            "m9",
            "Order Shipped",
            r#"{"orderId":"o1","status":"shipped","timestamp":"t"}"#,
        );

        let outcome = MessageProcessor::new().process(0, &message);
        assert_eq!(outcome.kind, Some(EventKind::OrderUpdated));
        assert!(outcome.rendering.contains("Envelope: Order Shipped from aws.s3"));
        assert!(outcome.rendering.contains("  orderId: o1"));
    }

    #[test]
    fn test_rendering_layout() {
        let message = RawMessage::new("m10", PAYMENT, "r10").with_attribute("SenderId", "AID");
        let rendering = MessageProcessor::new().process(0, &message).rendering;

        let lines: Vec<&str> = rendering.lines().collect();
        assert_eq!(lines[0], "========== Message m10 ==========");
        assert_eq!(lines[1], "Kind: PaymentProcessed");
        assert_eq!(lines[2], "  paymentId: p1");
        assert_eq!(lines[lines.len() - 3], "Attributes:");
        assert_eq!(lines[lines.len() - 2], "  SenderId: AID");
        assert_eq!(*lines.last().unwrap(), "==================================");
    }

    #[test]
    fn test_rendering_is_idempotent() {
        let processor = MessageProcessor::new();
        let message = RawMessage::new("m6", PAYMENT, "r6")
            .with_attribute("SentTimestamp", "1700000000000")
            .with_attribute("ApproximateReceiveCount", "1")
            .with_attribute("SenderId", "AID");

        let first = processor.process(1, &message);
        let second = processor.process(1, &message);
        assert_eq!(first, second);

        let attributes_at = first.rendering.find("Attributes:").unwrap();
        let receive = first.rendering.find("ApproximateReceiveCount").unwrap();
        let sent = first.rendering.find("SentTimestamp").unwrap();
        assert!(attributes_at < receive && receive < sent);
    }
}
