//! # queuetap
//!
//! A concurrent queue subscriber for order and payment events.
//!
//! ## Architecture
//!
//! ```text
//! SQS -> ReceiveLoop -> bounded channel -> Workers -> MessageProcessor -> Reporter
//!                                              └──────── acknowledge ──────▶ SQS
//! ```
//!
//! ## Modules
//!
//! - [`event`]: Raw messages and the typed event shapes
//! - [`classify`]: Shape-based event classification and decoding
//! - [`processor`]: Per-message processing and rendering
//! - [`consumer`]: Receive loop and worker pool
//! - [`shutdown`]: Cancellation and graceful shutdown
//! - [`queue`]: Queue client trait, SQS and in-memory implementations
//! - [`report`]: Reporter trait and built-in reporters
//! - [`config`]: TOML configuration with environment overrides
//! - [`publish`]: Submitting a single event

pub mod classify;
pub mod config;
pub mod consumer;
pub mod event;
pub mod processor;
pub mod publish;
pub mod queue;
pub mod report;
pub mod shutdown;

use std::time::Duration;

// Re-export commonly used types at crate root
pub use classify::{classify, classify_envelope, decode};
pub use consumer::{Consumer, ConsumerSettings};
pub use event::{EventKind, RawMessage, TypedEvent};
pub use processor::{MessageProcessor, ProcessingOutcome};
pub use queue::{QueueClient, QueueError};
pub use report::Reporter;
pub use shutdown::ShutdownSignal;

/// Pause after a failed receive before polling again
pub const RECEIVE_BACKOFF: Duration = Duration::from_secs(5);
