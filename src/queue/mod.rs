//! Queue client abstraction.
//!
//! The consumer only needs three operations from a queue: a long-polling
//! [`QueueClient::receive`], [`QueueClient::acknowledge`] to delete a handled
//! delivery, and a startup [`QueueClient::ping`]. Delivery is at-least-once:
//! anything not acknowledged before its visibility timeout expires comes back.
//!
//! - [`SqsQueue`]: Amazon SQS (or any SQS-compatible endpoint)
//! - [`MemoryQueue`]: in-process queue with visibility timeouts, for tests

pub mod memory;
pub mod sqs;

use crate::event::RawMessage;
use async_trait::async_trait;
use thiserror::Error;

pub use memory::MemoryQueue;
pub use sqs::{QueueSettings, SqsQueue};

/// Largest batch a single receive may request
pub const MAX_BATCH: i32 = 10;

/// Longest long-poll wait, in seconds
pub const MAX_WAIT_SECONDS: i32 = 20;

/// Errors returned by queue clients.
#[derive(Debug, Error)]
pub enum QueueError {
    #[error("receive failed: {0}")]
    Receive(String),

    #[error("acknowledge failed: {0}")]
    Acknowledge(String),

    #[error("queue unreachable: {0}")]
    Unreachable(String),

    #[error("send failed: {0}")]
    Send(String),

    /// The queue returned a message missing an ID or receipt handle
    #[error("invalid message from queue: {0}")]
    InvalidMessage(String),
}

/// Parameters of one receive call.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct ReceiveRequest {
    /// 1..=10
    pub max_messages: i32,

    /// Long-poll wait, 0..=20 seconds
    pub wait_time_seconds: i32,

    /// Lease on each received message, > 0 seconds
    pub visibility_timeout_seconds: i32,
}

impl Default for ReceiveRequest {
    fn default() -> Self {
        Self {
            max_messages: MAX_BATCH,
            wait_time_seconds: MAX_WAIT_SECONDS,
            visibility_timeout_seconds: 30,
        }
    }
}

/// A message queue the consumer can poll and acknowledge.
#[async_trait]
pub trait QueueClient: Send + Sync {
    /// Receive up to `request.max_messages` messages, waiting up to
    /// `request.wait_time_seconds` for at least one to arrive.
    async fn receive(&self, request: &ReceiveRequest) -> Result<Vec<RawMessage>, QueueError>;

    /// Delete the delivery identified by `receipt_handle`.
    async fn acknowledge(&self, receipt_handle: &str) -> Result<(), QueueError>;

    /// Check that the queue exists and is reachable.
    async fn ping(&self) -> Result<(), QueueError>;
}
