//! Log Reporter - structured logging of processed messages.
//!
//! The [`LogReporter`] emits one `tracing` record per message, with the
//! rendering as the message text and the outcome summary as fields.
//!
//! # Example
//!
//! ```rust,ignore
//! use queuetap::report::LogReporter;
//!
//! let reporter = LogReporter::new();
//! // or with custom prefix
//! let reporter = LogReporter::with_prefix("orders");
//! ```

use super::Reporter;
use crate::processor::ProcessingOutcome;
use async_trait::async_trait;
use tracing::{info, warn};

#[derive(Debug, Clone)]
pub struct LogReporter {
    prefix: String,
}

impl LogReporter {
    pub fn new() -> Self {
        Self {
            prefix: "message".to_string(),
        }
    }

    /// The prefix appears in every record, useful when several consumers
    /// share one log stream.
    pub fn with_prefix(prefix: impl Into<String>) -> Self {
        Self {
            prefix: prefix.into(),
        }
    }
}

impl Default for LogReporter {
    fn default() -> Self {
        Self::new()
    }
}

#[async_trait]
impl Reporter for LogReporter {
    fn name(&self) -> &str {
        "log"
    }

    async fn report(&self, outcome: &ProcessingOutcome) {
        let kind = outcome.kind.map(|k| k.as_str()).unwrap_or("unparsable");

        match &outcome.error {
            None => info!(
                prefix = %self.prefix,
                worker_id = outcome.worker_id,
                message_id = %outcome.message_id,
                kind = kind,
                "[{}] Processed:\n{}",
                self.prefix,
                outcome.rendering
            ),
            Some(error) => warn!(
                prefix = %self.prefix,
                worker_id = outcome.worker_id,
                message_id = %outcome.message_id,
                kind = kind,
                error = %error,
                "[{}] Processed with errors:\n{}",
                self.prefix,
                outcome.rendering
            ),
        }
    }
}
