//! In-process queue with SQS-like delivery semantics.
//!
//! Messages become invisible for the visibility timeout when received and
//! reappear if not acknowledged in time. Each delivery gets a fresh receipt
//! handle and an `ApproximateReceiveCount` attribute. Receive and acknowledge
//! failures can be injected to exercise the consumer's error paths.

use super::{QueueClient, QueueError, ReceiveRequest};
use crate::event::RawMessage;
use crate::publish::{EventPublisher, PublishError, PublishRequest};
use async_trait::async_trait;
use std::collections::HashMap;
use std::sync::{Mutex, MutexGuard};
use std::time::Duration;
use tokio::sync::Notify;
use tokio::time::Instant;

#[derive(Debug)]
struct Stored {
    id: String,
    body: String,
    attributes: HashMap<String, String>,
    receive_count: u32,
    current_handle: Option<String>,
    invisible_until: Option<Instant>,
}

#[derive(Debug, Default)]
struct State {
    messages: Vec<Stored>,
    next_id: u64,
    receive_calls: usize,
    failing_receives: u32,
    failing_acknowledges: bool,
    acknowledged: Vec<String>,
    unreachable: bool,
}

#[derive(Debug, Default)]
pub struct MemoryQueue {
    state: Mutex<State>,
    arrivals: Notify,
}

impl MemoryQueue {
    pub fn new() -> Self {
        Self::default()
    }

    /// Enqueue a message body, returning its ID.
    pub fn push(&self, body: impl Into<String>) -> String {
        self.push_with_attributes(body, HashMap::new())
    }

    pub fn push_with_attributes(
        &self,
        body: impl Into<String>,
        attributes: HashMap<String, String>,
    ) -> String {
        let id = {
            let mut state = self.lock();
            state.next_id += 1;
            let id = format!("msg-{}", state.next_id);
            state.messages.push(Stored {
                id: id.clone(),
                body: body.into(),
                attributes,
                receive_count: 0,
                current_handle: None,
                invisible_until: None,
            });
            id
        };
        self.arrivals.notify_waiters();
        id
    }

    /// Make the next `count` receive calls fail.
    pub fn fail_receives(&self, count: u32) {
        self.lock().failing_receives = count;
    }

    /// Make every acknowledge fail (or succeed again).
    pub fn fail_acknowledges(&self, failing: bool) {
        self.lock().failing_acknowledges = failing;
    }

    /// Make `ping` fail.
    pub fn set_unreachable(&self, unreachable: bool) {
        self.lock().unreachable = unreachable;
    }

    /// IDs of acknowledged messages, in acknowledge order.
    pub fn acknowledged(&self) -> Vec<String> {
        self.lock().acknowledged.clone()
    }

    pub fn receive_calls(&self) -> usize {
        self.lock().receive_calls
    }

    /// Messages not yet acknowledged, visible or not.
    pub fn pending(&self) -> usize {
        self.lock().messages.len()
    }

    /// Messages currently leased to a consumer.
    pub fn in_flight(&self) -> usize {
        let now = Instant::now();
        self.lock()
            .messages
            .iter()
            .filter(|m| m.invisible_until.is_some_and(|until| until > now))
            .count()
    }

    fn lock(&self) -> MutexGuard<'_, State> {
        self.state
            .lock()
            .unwrap_or_else(|poisoned| poisoned.into_inner())
    }

    fn take_visible(&self, request: &ReceiveRequest) -> Result<Vec<RawMessage>, QueueError> {
        let mut state = self.lock();
        if state.failing_receives > 0 {
            state.failing_receives -= 1;
            return Err(QueueError::Receive("injected receive failure".to_string()));
        }

        let now = Instant::now();
        let lease = Duration::from_secs(request.visibility_timeout_seconds.max(0) as u64);
        let limit = request.max_messages.max(1) as usize;

        let mut batch = Vec::new();
        for stored in state.messages.iter_mut() {
            if batch.len() >= limit {
                break;
            }
            if stored.invisible_until.is_some_and(|until| until > now) {
                continue;
            }

            stored.receive_count += 1;
            stored.invisible_until = Some(now + lease);
            let handle = format!("{}#{}", stored.id, stored.receive_count);
            stored.current_handle = Some(handle.clone());

            let mut message = RawMessage::new(stored.id.clone(), stored.body.clone(), handle);
            message.attributes = stored.attributes.clone();
            message.attributes.insert(
                "ApproximateReceiveCount".to_string(),
                stored.receive_count.to_string(),
            );
            batch.push(message);
        }

        Ok(batch)
    }
}

#[async_trait]
impl QueueClient for MemoryQueue {
    async fn receive(&self, request: &ReceiveRequest) -> Result<Vec<RawMessage>, QueueError> {
        self.lock().receive_calls += 1;
        let deadline =
            Instant::now() + Duration::from_secs(request.wait_time_seconds.max(0) as u64);

        loop {
            // Register interest before looking, so a push in between is not missed
            let arrived = self.arrivals.notified();

            let batch = self.take_visible(request)?;
            if !batch.is_empty() {
                return Ok(batch);
            }

            if Instant::now() >= deadline {
                tokio::task::yield_now().await;
                return Ok(batch);
            }

            tokio::select! {
                _ = arrived => {}
                _ = tokio::time::sleep_until(deadline) => {}
            }
        }
    }

    async fn acknowledge(&self, receipt_handle: &str) -> Result<(), QueueError> {
        let mut state = self.lock();
        if state.failing_acknowledges {
            return Err(QueueError::Acknowledge(
                "injected acknowledge failure".to_string(),
            ));
        }

        let position = state
            .messages
            .iter()
            .position(|m| m.current_handle.as_deref() == Some(receipt_handle));

        match position {
            Some(index) => {
                let stored = state.messages.remove(index);
                state.acknowledged.push(stored.id);
                Ok(())
            }
            None => Err(QueueError::Acknowledge(format!(
                "receipt handle {} is not current",
                receipt_handle
            ))),
        }
    }

    async fn ping(&self) -> Result<(), QueueError> {
        if self.lock().unreachable {
            return Err(QueueError::Unreachable("memory queue marked unreachable".to_string()));
        }
        Ok(())
    }
}

#[async_trait]
impl EventPublisher for MemoryQueue {
    async fn publish(&self, request: &PublishRequest) -> Result<String, PublishError> {
        let envelope = request.to_envelope(uuid::Uuid::new_v4().to_string(), chrono::Utc::now());
        let body = serde_json::to_string(&envelope).map_err(PublishError::Serialization)?;

        let mut attributes = HashMap::new();
        attributes.insert("source".to_string(), request.source.clone());
        attributes.insert("detail-type".to_string(), request.detail_type.clone());
        Ok(self.push_with_attributes(body, attributes))
    }
}
