//! Core message and event types for queuetap.
//!
//! A [`RawMessage`] is what the queue hands us. Its body is expected to hold
//! one of the known order/payment events as JSON, optionally wrapped in an
//! event-bus [`EnvelopeHeader`]. The typed shapes below mirror the wire
//! format field for field: camelCase for application events, kebab-case for
//! the S3 notifications the event bus forwards.

use serde::{Deserialize, Serialize};
use serde_json::Value;
use std::collections::HashMap;
use std::fmt;

/// A message as received from the queue.
///
/// Immutable once received. The `receipt_handle` is the opaque token the
/// queue requires to acknowledge (delete) this particular delivery.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RawMessage {
    /// Queue-assigned message ID
    pub id: String,

    /// Message body, expected to be JSON
    pub body: String,

    /// Token for acknowledging this delivery
    pub receipt_handle: String,

    /// Queue system attributes (e.g. `SentTimestamp`, `ApproximateReceiveCount`)
    pub attributes: HashMap<String, String>,
}

impl RawMessage {
    /// Create a message with no attributes
    pub fn new(
        id: impl Into<String>,
        body: impl Into<String>,
        receipt_handle: impl Into<String>,
    ) -> Self {
        Self {
            id: id.into(),
            body: body.into(),
            receipt_handle: receipt_handle.into(),
            attributes: HashMap::new(),
        }
    }

    /// Add a queue attribute
    pub fn with_attribute(mut self, name: impl Into<String>, value: impl Into<String>) -> Self {
        self.attributes.insert(name.into(), value.into());
        self
    }
}

/// The logical type of an event, inferred from its JSON shape.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize)]
pub enum EventKind {
    OrderCreated,
    OrderUpdated,
    PaymentProcessed,
    /// S3 "Object Created" notification
    ObjectCreated,
    /// S3 "Object Deleted" notification
    ObjectDeleted,
    Unknown,
}

impl EventKind {
    pub fn as_str(&self) -> &'static str {
        match self {
            EventKind::OrderCreated => "OrderCreated",
            EventKind::OrderUpdated => "OrderUpdated",
            EventKind::PaymentProcessed => "PaymentProcessed",
            EventKind::ObjectCreated => "ObjectCreated",
            EventKind::ObjectDeleted => "ObjectDeleted",
            EventKind::Unknown => "Unknown",
        }
    }

    /// Kind named by an envelope `detail-type`, for the types that carry a
    /// fixed schema. Anything else is left to shape classification.
    pub fn from_detail_type(detail_type: &str) -> Option<EventKind> {
        match detail_type {
            "Object Created" => Some(EventKind::ObjectCreated),
            "Object Deleted" => Some(EventKind::ObjectDeleted),
            _ => None,
        }
    }
}

impl fmt::Display for EventKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// One line item of an order.
#[derive(Debug, Clone, PartialEq, Deserialize, Serialize)]
pub struct OrderItem {
    pub sku: String,
    /// Negative for returned lines
    pub quantity: i64,
    pub price: f64,
}

/// A newly placed order.
///
/// `items` may be absent on the wire (orders recognised by
/// `orderId` + `status` + `customerId` alone), in which case it is empty.
#[derive(Debug, Clone, PartialEq, Deserialize, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct OrderCreated {
    pub order_id: String,
    pub customer_id: String,
    pub amount: f64,
    pub currency: String,
    #[serde(default)]
    pub items: Vec<OrderItem>,
    pub status: String,
    pub timestamp: String,
}

/// A status change on an existing order.
#[derive(Debug, Clone, PartialEq, Deserialize, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct OrderUpdated {
    pub order_id: String,
    pub status: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub previous_status: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub updated_fields: Option<Vec<String>>,
    pub timestamp: String,
}

/// A payment attempt against an order.
#[derive(Debug, Clone, PartialEq, Deserialize, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct PaymentProcessed {
    pub payment_id: String,
    pub order_id: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub customer_id: Option<String>,
    pub amount: f64,
    pub currency: String,
    pub payment_method: String,
    pub status: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub transaction_id: Option<String>,
    pub timestamp: String,
}

#[derive(Debug, Clone, PartialEq, Eq, Deserialize, Serialize)]
pub struct S3Bucket {
    pub name: String,
}

#[derive(Debug, Clone, PartialEq, Deserialize, Serialize)]
#[serde(rename_all = "kebab-case")]
pub struct S3Object {
    pub key: String,
    #[serde(default)]
    pub size: f64,
    #[serde(default)]
    pub etag: String,
    #[serde(default)]
    pub sequencer: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub version_id: Option<String>,
}

/// `detail` of an S3 object notification delivered through the event bus.
///
/// Shared by "Object Created" and "Object Deleted"; `deletion-type` is only
/// sent for deletes.
#[derive(Debug, Clone, PartialEq, Deserialize, Serialize)]
#[serde(rename_all = "kebab-case")]
pub struct S3Detail {
    pub bucket: S3Bucket,
    pub object: S3Object,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub deletion_type: Option<String>,
    #[serde(default)]
    pub reason: String,
    #[serde(default)]
    pub request_id: String,
    #[serde(default)]
    pub requester: String,
    #[serde(default)]
    pub source_ip_address: String,
    #[serde(default)]
    pub version: String,
}

/// A decoded event, one variant per [`EventKind`].
///
/// `Unknown` keeps the original JSON so it can still be shown to an operator.
#[derive(Debug, Clone, PartialEq)]
pub enum TypedEvent {
    OrderCreated(OrderCreated),
    OrderUpdated(OrderUpdated),
    PaymentProcessed(PaymentProcessed),
    ObjectCreated(S3Detail),
    ObjectDeleted(S3Detail),
    Unknown(Value),
}

impl TypedEvent {
    pub fn kind(&self) -> EventKind {
        match self {
            TypedEvent::OrderCreated(_) => EventKind::OrderCreated,
            TypedEvent::OrderUpdated(_) => EventKind::OrderUpdated,
            TypedEvent::PaymentProcessed(_) => EventKind::PaymentProcessed,
            TypedEvent::ObjectCreated(_) => EventKind::ObjectCreated,
            TypedEvent::ObjectDeleted(_) => EventKind::ObjectDeleted,
            TypedEvent::Unknown(_) => EventKind::Unknown,
        }
    }

    /// Field name/value pairs in wire declaration order.
    ///
    /// Optional fields are omitted when absent. Items are flattened to one
    /// entry each. `Unknown` has no typed fields.
    pub fn fields(&self) -> Vec<(String, String)> {
        let mut fields = Vec::new();
        let mut push = |name: &str, value: String| fields.push((name.to_string(), value));

        match self {
            TypedEvent::OrderCreated(e) => {
                push("orderId", e.order_id.clone());
                push("customerId", e.customer_id.clone());
                push("amount", e.amount.to_string());
                push("currency", e.currency.clone());
                for (i, item) in e.items.iter().enumerate() {
                    push(
                        &format!("items[{}]", i),
                        format!(
                            "sku={} quantity={} price={}",
                            item.sku, item.quantity, item.price
                        ),
                    );
                }
                push("status", e.status.clone());
                push("timestamp", e.timestamp.clone());
            }
            TypedEvent::OrderUpdated(e) => {
                push("orderId", e.order_id.clone());
                push("status", e.status.clone());
                if let Some(previous) = &e.previous_status {
                    push("previousStatus", previous.clone());
                }
                if let Some(updated) = &e.updated_fields {
                    push("updatedFields", updated.join(", "));
                }
                push("timestamp", e.timestamp.clone());
            }
            TypedEvent::PaymentProcessed(e) => {
                push("paymentId", e.payment_id.clone());
                push("orderId", e.order_id.clone());
                if let Some(customer) = &e.customer_id {
                    push("customerId", customer.clone());
                }
                push("amount", e.amount.to_string());
                push("currency", e.currency.clone());
                push("paymentMethod", e.payment_method.clone());
                push("status", e.status.clone());
                if let Some(transaction) = &e.transaction_id {
                    push("transactionId", transaction.clone());
                }
                push("timestamp", e.timestamp.clone());
            }
            TypedEvent::ObjectCreated(d) | TypedEvent::ObjectDeleted(d) => {
                push("bucket", d.bucket.name.clone());
                push("key", d.object.key.clone());
                push("size", d.object.size.to_string());
                push("etag", d.object.etag.clone());
                push("sequencer", d.object.sequencer.clone());
                if let Some(version_id) = &d.object.version_id {
                    push("version-id", version_id.clone());
                }
                if let Some(deletion_type) = &d.deletion_type {
                    push("deletion-type", deletion_type.clone());
                }
                push("reason", d.reason.clone());
                push("request-id", d.request_id.clone());
                push("requester", d.requester.clone());
                push("source-ip-address", d.source_ip_address.clone());
                push("version", d.version.clone());
            }
            TypedEvent::Unknown(_) => {}
        }

        fields
    }
}

/// Header of an event-bus envelope wrapping the actual event in `detail`.
///
/// ```json
/// {
///   "version": "0",
///   "id": "6a7e8feb-b491-4cf7-a9f1-bf3703467718",
///   "detail-type": "OrderCreated",
///   "source": "myapp.orders",
///   "account": "111122223333",
///   "time": "2024-01-01T00:00:00Z",
///   "region": "us-east-1",
///   "resources": [],
///   "detail": { "orderId": "o1", ... }
/// }
/// ```
#[derive(Debug, Clone, PartialEq, Eq, Deserialize, Serialize)]
pub struct EnvelopeHeader {
    #[serde(rename = "detail-type")]
    pub detail_type: String,

    #[serde(default)]
    pub source: Option<String>,

    #[serde(default)]
    pub id: Option<String>,

    #[serde(default)]
    pub time: Option<String>,

    #[serde(default)]
    pub account: Option<String>,

    #[serde(default)]
    pub region: Option<String>,

    #[serde(default)]
    pub resources: Vec<String>,
}

impl EnvelopeHeader {
    /// Split an envelope into its header and `detail` object.
    ///
    /// Returns the value untouched (and no header) unless it is an object
    /// carrying both `detail-type` and an object-valued `detail`.
    pub fn unwrap(value: Value) -> (Option<EnvelopeHeader>, Value) {
        let is_envelope = value.get("detail-type").is_some()
            && value.get("detail").is_some_and(Value::is_object);
        if !is_envelope {
            return (None, value);
        }

        let Value::Object(mut object) = value else {
            return (None, value);
        };
        let detail = object.remove("detail").unwrap_or(Value::Null);

        match serde_json::from_value::<EnvelopeHeader>(Value::Object(object.clone())) {
            Ok(header) => (Some(header), detail),
            Err(_) => {
                // Header fields of the wrong type: treat the whole thing as the event
                object.insert("detail".to_string(), detail);
                (None, Value::Object(object))
            }
        }
    }
}
