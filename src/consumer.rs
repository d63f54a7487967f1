//! The consumer engine: one receive loop feeding a pool of workers.
//!
//! # Architecture
//!
//! ```text
//! QueueClient::receive
//!     │
//!     ▼
//! ┌──────────────┐   bounded channel    ┌──────────┐
//! │ ReceiveLoop  │ ───────────────────▶ │ worker 0 │──┐
//! │ (1 task)     │   (capacity =        │ worker 1 │  │ process, report,
//! └──────────────┘    max_messages)     │   ...    │  │ then acknowledge
//!                                       └──────────┘◀─┘
//! ```
//!
//! The channel is the only shared mutable structure. A full channel blocks
//! the receive loop (backpressure) instead of dropping messages. Workers
//! share nothing but the channel and the cancellation token.
//!
//! # Shutdown
//!
//! Cancellation is observed at every wait point: the receive call, the
//! backoff sleep, a blocked push, and a worker waiting for its next message.
//! A worker that is already handling a message finishes it (report, then
//! acknowledge) first. A message is never deleted before its report has
//! completed, so a stuck reporter or a shutdown timeout can only cause a
//! duplicate report, never a lost one. Messages left in the channel or abandoned mid-batch
//! are not acknowledged, so the queue redelivers them after their
//! visibility timeout.

use crate::event::RawMessage;
use crate::processor::{MessageProcessor, ProcessingError, ProcessingOutcome};
use crate::queue::{QueueClient, ReceiveRequest};
use crate::report::Reporter;
use crate::shutdown::ShutdownSignal;
use crate::RECEIVE_BACKOFF;
use std::sync::Arc;
use std::time::Duration;
use thiserror::Error;
use tokio::sync::{mpsc, Mutex};
use tokio::task::{JoinError, JoinHandle};
use tokio_util::sync::CancellationToken;
use tracing::{debug, error, info, warn};

/// Errors surfaced when stopping a consumer.
#[derive(Debug, Error)]
pub enum ConsumerError {
    #[error("workers still running after {0:?} shutdown timeout")]
    ShutdownTimeout(Duration),

    #[error("consumer task failed: {0}")]
    TaskFailed(#[from] JoinError),
}

/// Everything a consumer needs to know, fixed for the lifetime of a run.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ConsumerSettings {
    pub receive: ReceiveRequest,

    /// Number of concurrent workers
    pub workers: usize,

    /// Delete each message after processing
    pub acknowledge: bool,

    /// Pause after a failed receive before polling again
    pub receive_backoff: Duration,
}

impl Default for ConsumerSettings {
    fn default() -> Self {
        Self {
            receive: ReceiveRequest::default(),
            workers: 5,
            acknowledge: true,
            receive_backoff: RECEIVE_BACKOFF,
        }
    }
}

/// Counters kept by the receive loop.
#[derive(Debug, Default, Clone, Copy, PartialEq, Eq)]
pub struct ReceiveStats {
    pub batches: u64,
    pub received: u64,
    pub failures: u64,

    /// Received but never handed to a worker because of shutdown
    pub abandoned: u64,
}

/// What became of a delivery once it had been reported.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Acknowledgement {
    /// Acknowledging is turned off (inspect profile)
    Disabled,
    Deleted,
    /// The delete failed; the queue will redeliver
    Failed,
}

/// Counters kept by each worker, summed on shutdown.
#[derive(Debug, Default, Clone, Copy, PartialEq, Eq)]
pub struct WorkerStats {
    pub processed: u64,
    pub acknowledged: u64,
    pub acknowledge_failures: u64,
    pub unparsable: u64,
    pub schema_mismatches: u64,
}

impl WorkerStats {
    fn record(&mut self, outcome: &ProcessingOutcome, acknowledgement: Acknowledgement) {
        self.processed += 1;
        match acknowledgement {
            Acknowledgement::Deleted => self.acknowledged += 1,
            Acknowledgement::Failed => self.acknowledge_failures += 1,
            Acknowledgement::Disabled => {}
        }
        match outcome.error {
            Some(ProcessingError::Unparsable(_)) => self.unparsable += 1,
            Some(ProcessingError::SchemaMismatch(_)) => self.schema_mismatches += 1,
            None => {}
        }
    }

    fn merge(&mut self, other: &WorkerStats) {
        self.processed += other.processed;
        self.acknowledged += other.acknowledged;
        self.acknowledge_failures += other.acknowledge_failures;
        self.unparsable += other.unparsable;
        self.schema_mismatches += other.schema_mismatches;
    }
}

/// Final statistics of a consumer run.
#[derive(Debug, Default, Clone, Copy, PartialEq, Eq)]
pub struct ConsumerStats {
    pub receive: ReceiveStats,
    pub workers: WorkerStats,
}

/// Polls the queue and feeds the worker channel until cancelled.
pub struct ReceiveLoop {
    queue: Arc<dyn QueueClient>,
    request: ReceiveRequest,
    backoff: Duration,
}

impl ReceiveLoop {
    pub fn new(queue: Arc<dyn QueueClient>, request: ReceiveRequest, backoff: Duration) -> Self {
        Self {
            queue,
            request,
            backoff,
        }
    }

    /// Run until `token` is cancelled or every worker has gone away.
    ///
    /// Receive failures never end the loop: they are logged and retried
    /// after the backoff. Dropping `sender` on return closes the channel.
    pub async fn run(
        self,
        sender: mpsc::Sender<RawMessage>,
        token: CancellationToken,
    ) -> ReceiveStats {
        let mut stats = ReceiveStats::default();

        'poll: loop {
            let result = tokio::select! {
                biased;
                _ = token.cancelled() => break 'poll,
                result = self.queue.receive(&self.request) => result,
            };

            let batch = match result {
                Ok(batch) => batch,
                Err(e) => {
                    stats.failures += 1;
                    warn!(
                        error = %e,
                        backoff_ms = self.backoff.as_millis() as u64,
                        "Error receiving messages, backing off"
                    );
                    tokio::select! {
                        biased;
                        _ = token.cancelled() => break 'poll,
                        _ = tokio::time::sleep(self.backoff) => continue 'poll,
                    }
                }
            };

            if batch.is_empty() {
                continue;
            }

            stats.batches += 1;
            stats.received += batch.len() as u64;
            debug!(count = batch.len(), "Received batch");

            let total = batch.len();
            for (index, message) in batch.into_iter().enumerate() {
                let message_id = message.id.clone();
                let pushed = tokio::select! {
                    biased;
                    _ = token.cancelled() => false,
                    result = sender.send(message) => result.is_ok(),
                };

                if !pushed {
                    let remaining = (total - index) as u64;
                    stats.abandoned += remaining;
                    info!(
                        message_id = %message_id,
                        abandoned = remaining,
                        "Stopping receive loop, leaving remaining messages for redelivery"
                    );
                    break 'poll;
                }
            }
        }

        info!(
            batches = stats.batches,
            received = stats.received,
            failures = stats.failures,
            "Receive loop stopped"
        );
        stats
    }
}

/// One member of the worker pool.
struct Worker {
    id: usize,
    queue: Arc<dyn QueueClient>,
    reporter: Arc<dyn Reporter>,
    processor: Arc<MessageProcessor>,
    acknowledge: bool,
}

impl Worker {
    async fn run(
        self,
        receiver: Arc<Mutex<mpsc::Receiver<RawMessage>>>,
        token: CancellationToken,
    ) -> WorkerStats {
        let mut stats = WorkerStats::default();

        loop {
            let next = async { receiver.lock().await.recv().await };
            let message = tokio::select! {
                biased;
                _ = token.cancelled() => break,
                message = next => match message {
                    Some(message) => message,
                    None => break,
                },
            };

            let (outcome, acknowledgement) = self.handle(message).await;
            stats.record(&outcome, acknowledgement);
        }

        debug!(
            worker_id = self.id,
            processed = stats.processed,
            "Worker stopped"
        );
        stats
    }

    /// Process, report, then acknowledge if enabled.
    ///
    /// Not cancellable: once a message is claimed it is seen through. The
    /// delete only happens after the report has returned.
    async fn handle(&self, message: RawMessage) -> (ProcessingOutcome, Acknowledgement) {
        let outcome = self.processor.process(self.id, &message);
        self.reporter.report(&outcome).await;

        if !self.acknowledge {
            return (outcome, Acknowledgement::Disabled);
        }

        // Malformed bodies are acknowledged too, so they cannot loop forever
        let acknowledgement = match self.queue.acknowledge(&message.receipt_handle).await {
            Ok(()) => {
                debug!(
                    worker_id = self.id,
                    message_id = %message.id,
                    "Deleted message"
                );
                Acknowledgement::Deleted
            }
            Err(e) => {
                error!(
                    worker_id = self.id,
                    message_id = %message.id,
                    error = %e,
                    "Error deleting message, it will be redelivered"
                );
                Acknowledgement::Failed
            }
        };
        (outcome, acknowledgement)
    }
}

/// A configured but not yet running consumer.
pub struct Consumer {
    queue: Arc<dyn QueueClient>,
    reporter: Arc<dyn Reporter>,
    processor: Arc<MessageProcessor>,
    settings: ConsumerSettings,
}

impl Consumer {
    pub fn new(
        queue: Arc<dyn QueueClient>,
        reporter: Arc<dyn Reporter>,
        settings: ConsumerSettings,
    ) -> Self {
        Self {
            queue,
            reporter,
            processor: Arc::new(MessageProcessor::new()),
            settings,
        }
    }

    /// Spawn the workers and the receive loop.
    pub fn start(self, shutdown: &ShutdownSignal) -> RunningConsumer {
        let capacity = self.settings.receive.max_messages.max(1) as usize;
        let (sender, receiver) = mpsc::channel(capacity);
        let receiver = Arc::new(Mutex::new(receiver));

        let workers = (0..self.settings.workers.max(1))
            .map(|id| {
                let worker = Worker {
                    id,
                    queue: self.queue.clone(),
                    reporter: self.reporter.clone(),
                    processor: self.processor.clone(),
                    acknowledge: self.settings.acknowledge,
                };
                tokio::spawn(worker.run(receiver.clone(), shutdown.token()))
            })
            .collect();

        let receive_loop = ReceiveLoop::new(
            self.queue.clone(),
            self.settings.receive,
            self.settings.receive_backoff,
        );
        let receive_loop = tokio::spawn(receive_loop.run(sender, shutdown.token()));

        info!(
            workers = self.settings.workers,
            max_messages = self.settings.receive.max_messages,
            wait_time_seconds = self.settings.receive.wait_time_seconds,
            visibility_timeout_seconds = self.settings.receive.visibility_timeout_seconds,
            acknowledge = self.settings.acknowledge,
            reporter = %self.reporter.name(),
            "Consumer started"
        );

        RunningConsumer {
            receive_loop,
            workers,
            timeout: shutdown.timeout(),
        }
    }

    /// Run until interrupted, then drain and stop.
    pub async fn run(self, shutdown: &ShutdownSignal) -> Result<ConsumerStats, ConsumerError> {
        let running = self.start(shutdown);
        shutdown.wait_for_interrupt().await;
        info!("Shutting down gracefully...");
        running.join().await
    }
}

/// Handles to the tasks of a started consumer.
pub struct RunningConsumer {
    receive_loop: JoinHandle<ReceiveStats>,
    workers: Vec<JoinHandle<WorkerStats>>,
    timeout: Duration,
}

impl RunningConsumer {
    /// Wait for the receive loop and every worker to return.
    ///
    /// Only completes after shutdown has been triggered. Bounded by the
    /// shutdown timeout of the signal the consumer was started with.
    pub async fn join(self) -> Result<ConsumerStats, ConsumerError> {
        let RunningConsumer {
            receive_loop,
            workers,
            timeout,
        } = self;

        let all = async move {
            let receive = receive_loop.await?;
            let mut totals = WorkerStats::default();
            for worker in workers {
                totals.merge(&worker.await?);
            }
            Ok::<_, JoinError>(ConsumerStats {
                receive,
                workers: totals,
            })
        };

        match tokio::time::timeout(timeout, all).await {
            Ok(result) => {
                let stats = result?;
                info!(
                    received = stats.receive.received,
                    processed = stats.workers.processed,
                    acknowledged = stats.workers.acknowledged,
                    acknowledge_failures = stats.workers.acknowledge_failures,
                    unparsable = stats.workers.unparsable,
                    schema_mismatches = stats.workers.schema_mismatches,
                    abandoned = stats.receive.abandoned,
                    "Shutdown complete"
                );
                Ok(stats)
            }
            Err(_) => {
                warn!(
                    timeout_secs = timeout.as_secs(),
                    "Shutdown timeout reached, workers still busy"
                );
                Err(ConsumerError::ShutdownTimeout(timeout))
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::queue::MemoryQueue;
    use crate::report::CaptureReporter;

    fn settings(workers: usize, acknowledge: bool) -> ConsumerSettings {
        ConsumerSettings {
            receive: ReceiveRequest {
                max_messages: 10,
                wait_time_seconds: 1,
                visibility_timeout_seconds: 30,
            },
            workers,
            acknowledge,
            receive_backoff: Duration::from_millis(50),
        }
    }

    async fn wait_until(mut condition: impl FnMut() -> bool) {
        tokio::time::timeout(Duration::from_secs(5), async {
            while !condition() {
                tokio::time::sleep(Duration::from_millis(5)).await;
            }
        })
        .await
        .expect("condition not reached in time");
    }

    #[test]
    fn test_worker_stats_record() {
        let processor = MessageProcessor::new();
        let mut stats = WorkerStats::default();

        let ok = processor.process(0, &RawMessage::new("m1", "{}", "r1"));
        stats.record(&ok, Acknowledgement::Deleted);

        let bad = processor.process(0, &RawMessage::new("m2", "nope", "r2"));
        stats.record(&bad, Acknowledgement::Failed);

        stats.record(&ok, Acknowledgement::Disabled);

        assert_eq!(stats.processed, 3);
        assert_eq!(stats.acknowledged, 1);
        assert_eq!(stats.acknowledge_failures, 1);
        assert_eq!(stats.unparsable, 1);

        let mut total = WorkerStats::default();
        total.merge(&stats);
        total.merge(&stats);
        assert_eq!(total.processed, 6);
    }

    #[tokio::test]
    async fn test_consumer_processes_and_acknowledges() {
        let queue = Arc::new(MemoryQueue::new());
        let reporter = Arc::new(CaptureReporter::new());
        queue.push(r#"{"orderId":"o1","status":"shipped","timestamp":"t"}"#);
        queue.push("not json at all");

        let shutdown = ShutdownSignal::with_timeout(Duration::from_secs(5));
        let running = Consumer::new(queue.clone(), reporter.clone(), settings(2, true)).start(&shutdown);

        wait_until(|| reporter.len() == 2).await;
        shutdown.trigger();
        let stats = running.join().await.unwrap();

        assert_eq!(stats.workers.processed, 2);
        assert_eq!(stats.workers.acknowledged, 2);
        assert_eq!(stats.workers.unparsable, 1);
        assert_eq!(queue.pending(), 0);
        assert_eq!(queue.acknowledged().len(), 2);
    }

    #[tokio::test]
    async fn test_inspect_mode_leaves_messages() {
        let queue = Arc::new(MemoryQueue::new());
        let reporter = Arc::new(CaptureReporter::new());
        queue.push("{}");

        let shutdown = ShutdownSignal::with_timeout(Duration::from_secs(5));
        let running = Consumer::new(queue.clone(), reporter.clone(), settings(1, false)).start(&shutdown);

        wait_until(|| reporter.len() == 1).await;
        shutdown.trigger();
        let stats = running.join().await.unwrap();

        assert_eq!(stats.workers.acknowledged, 0);
        assert_eq!(stats.workers.acknowledge_failures, 0);
        assert!(queue.acknowledged().is_empty());
        assert_eq!(queue.pending(), 1);
    }

    #[tokio::test]
    async fn test_cancelled_receive_loop_returns() {
        let queue: Arc<dyn QueueClient> = Arc::new(MemoryQueue::new());
        let (sender, _receiver) = mpsc::channel(1);
        let token = CancellationToken::new();
        token.cancel();

        let stats = ReceiveLoop::new(queue, ReceiveRequest::default(), RECEIVE_BACKOFF)
            .run(sender, token)
            .await;
        assert_eq!(stats, ReceiveStats::default());
    }
}
