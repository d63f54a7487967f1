//! Event classification by JSON shape.
//!
//! Producers do not tag their payloads, so the kind of an event is inferred
//! from which fields are present. The rules overlap, so they are checked in
//! a fixed order and the first match wins:
//!
//! ```text
//! Rule | Present fields                         | Kind
//! -----|----------------------------------------|------------------
//!  1   | paymentId                              | PaymentProcessed
//!  2   | customerId + amount + items            | OrderCreated
//!  3   | previousStatus                         | OrderUpdated
//!  4   | orderId + status (+ customerId)        | OrderCreated
//!  4   | orderId + status (no customerId)       | OrderUpdated
//!  -   | anything else                          | Unknown
//! ```
//!
//! Events that arrive in an event-bus envelope are first dispatched on the
//! envelope's `detail-type` (see [`classify_envelope`]); only detail types
//! without a fixed schema fall through to the shape rules.
//!
//! [`decode`] then turns the classified value into the matching
//! [`TypedEvent`] variant.

use crate::event::{
    EnvelopeHeader, EventKind, OrderCreated, OrderUpdated, PaymentProcessed, S3Detail, TypedEvent,
};
use serde::de::DeserializeOwned;
use serde_json::Value;
use thiserror::Error;

/// The classified payload did not match the typed shape for its kind.
#[derive(Debug, Error)]
#[error("payload classified as {kind} does not match its schema: {source}")]
pub struct DecodeError {
    pub kind: EventKind,
    #[source]
    pub source: serde_json::Error,
}

/// Infer the [`EventKind`] of a decoded JSON value.
///
/// Total and side-effect free: non-objects and unrecognised shapes are
/// [`EventKind::Unknown`]. A field counts as present when its key exists,
/// whatever its value (including `null`).
pub fn classify(value: &Value) -> EventKind {
    let Some(object) = value.as_object() else {
        return EventKind::Unknown;
    };
    let has = |key: &str| object.contains_key(key);

    if has("paymentId") {
        return EventKind::PaymentProcessed;
    }

    if has("customerId") && has("amount") && has("items") {
        return EventKind::OrderCreated;
    }

    if has("previousStatus") {
        return EventKind::OrderUpdated;
    }

    if has("orderId") && has("status") {
        return if has("customerId") {
            EventKind::OrderCreated
        } else {
            EventKind::OrderUpdated
        };
    }

    EventKind::Unknown
}

/// Classify an event that may have come wrapped in an envelope.
///
/// A known `detail-type` decides the kind outright; otherwise `detail` is
/// classified by shape.
pub fn classify_envelope(header: Option<&EnvelopeHeader>, detail: &Value) -> EventKind {
    header
        .and_then(|h| EventKind::from_detail_type(&h.detail_type))
        .unwrap_or_else(|| classify(detail))
}

/// Classify `value` and decode it into the matching typed event.
///
/// Unknown shapes decode to [`TypedEvent::Unknown`] and never fail.
pub fn decode(value: &Value) -> Result<TypedEvent, DecodeError> {
    let kind = classify(value);
    decode_as(kind, value)
}

/// Decode `value` as a specific kind.
pub fn decode_as(kind: EventKind, value: &Value) -> Result<TypedEvent, DecodeError> {
    match kind {
        EventKind::OrderCreated => typed::<OrderCreated>(kind, value).map(TypedEvent::OrderCreated),
        EventKind::OrderUpdated => typed::<OrderUpdated>(kind, value).map(TypedEvent::OrderUpdated),
        EventKind::PaymentProcessed => {
            typed::<PaymentProcessed>(kind, value).map(TypedEvent::PaymentProcessed)
        }
        EventKind::ObjectCreated => typed::<S3Detail>(kind, value).map(TypedEvent::ObjectCreated),
        EventKind::ObjectDeleted => typed::<S3Detail>(kind, value).map(TypedEvent::ObjectDeleted),
        EventKind::Unknown => Ok(TypedEvent::Unknown(value.clone())),
    }
}

fn typed<T: DeserializeOwned>(kind: EventKind, value: &Value) -> Result<T, DecodeError> {
    T::deserialize(value).map_err(|source| DecodeError { kind, source })
}
