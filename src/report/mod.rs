//! Reporting of processed messages.
//!
//! A [`Reporter`] receives each [`ProcessingOutcome`] before its worker
//! acknowledges the message, so a delivery is never deleted unreported. It is
//! the only side effect of processing besides the acknowledge itself.
//!
//! ## Built-in Reporters
//!
//! - [`LogReporter`]: structured `tracing` record per message
//! - [`StdoutReporter`]: plain rendering on standard output
//! - [`CaptureReporter`]: keeps outcomes in memory (tests, dry runs)
//!
//! ## Custom Reporters
//!
//! ```rust,ignore
//! use queuetap::report::Reporter;
//! use queuetap::processor::ProcessingOutcome;
//! use async_trait::async_trait;
//!
//! struct Metrics;
//!
//! #[async_trait]
//! impl Reporter for Metrics {
//!     fn name(&self) -> &str {
//!         "metrics"
//!     }
//!
//!     async fn report(&self, outcome: &ProcessingOutcome) {
//!         // count by outcome.kind
//!     }
//! }
//! ```

pub mod log;

use crate::processor::ProcessingOutcome;
use async_trait::async_trait;
use serde::Deserialize;
use std::io::Write;
use std::sync::{Arc, Mutex};
use tracing::warn;

pub use log::LogReporter;

/// Sink for processing outcomes.
///
/// Reporters are shared by all workers and called concurrently.
#[async_trait]
pub trait Reporter: Send + Sync {
    /// Short name used in logs (e.g. "log", "stdout")
    fn name(&self) -> &str;

    async fn report(&self, outcome: &ProcessingOutcome);
}

/// Where renderings go, as selected in configuration.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Deserialize, clap::ValueEnum)]
#[serde(rename_all = "lowercase")]
pub enum OutputMode {
    #[default]
    Log,
    Stdout,
}

impl OutputMode {
    pub fn build_reporter(self) -> Arc<dyn Reporter> {
        match self {
            OutputMode::Log => Arc::new(LogReporter::new()),
            OutputMode::Stdout => Arc::new(StdoutReporter),
        }
    }
}

/// Prints each rendering to standard output.
#[derive(Debug, Clone, Copy, Default)]
pub struct StdoutReporter;

#[async_trait]
impl Reporter for StdoutReporter {
    fn name(&self) -> &str {
        "stdout"
    }

    async fn report(&self, outcome: &ProcessingOutcome) {
        // One locked write per message so concurrent workers don't interleave
        let mut stdout = std::io::stdout().lock();
        if let Err(e) = writeln!(
            stdout,
            "[Worker {}] {}\n",
            outcome.worker_id, outcome.rendering
        ) {
            warn!(message_id = %outcome.message_id, error = %e, "Failed to write rendering to stdout");
        }
    }
}

/// Collects outcomes in memory.
#[derive(Debug, Default)]
pub struct CaptureReporter {
    outcomes: Mutex<Vec<ProcessingOutcome>>,
}

impl CaptureReporter {
    pub fn new() -> Self {
        Self::default()
    }

    /// Snapshot of everything reported so far, in report order
    pub fn outcomes(&self) -> Vec<ProcessingOutcome> {
        self.lock().clone()
    }

    pub fn len(&self) -> usize {
        self.lock().len()
    }

    pub fn is_empty(&self) -> bool {
        self.lock().is_empty()
    }

    fn lock(&self) -> std::sync::MutexGuard<'_, Vec<ProcessingOutcome>> {
        // A panicking reporter call cannot leave the Vec half-written
        self.outcomes
            .lock()
            .unwrap_or_else(|poisoned| poisoned.into_inner())
    }
}

#[async_trait]
impl Reporter for CaptureReporter {
    fn name(&self) -> &str {
        "capture"
    }

    async fn report(&self, outcome: &ProcessingOutcome) {
        self.lock().push(outcome.clone());
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::event::RawMessage;
    use crate::processor::MessageProcessor;

    #[tokio::test]
    async fn test_capture_reporter() {
        let reporter = CaptureReporter::new();
        assert!(reporter.is_empty());

        let outcome = MessageProcessor::new().process(0, &RawMessage::new("m1", "{}", "r1"));
        reporter.report(&outcome).await;
        reporter.report(&outcome).await;

        assert_eq!(reporter.len(), 2);
        assert_eq!(reporter.outcomes()[1].message_id, "m1");
    }

    #[test]
    fn test_output_mode_deserialize() {
        #[derive(Deserialize)]
        struct Wrapper {
            output: OutputMode,
        }

        let parsed: Wrapper = toml::from_str(r#"output = "stdout""#).unwrap();
        assert_eq!(parsed.output, OutputMode::Stdout);
        assert_eq!(OutputMode::default(), OutputMode::Log);
        assert_eq!(OutputMode::Stdout.build_reporter().name(), "stdout");
    }
}
