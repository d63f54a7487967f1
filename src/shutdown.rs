//! Graceful shutdown coordination.
//!
//! [`ShutdownSignal`] owns the cancellation token shared by the receive loop
//! and every worker. It is passed explicitly to each of them, so several
//! independent consumers can live in one process and tests can cancel a
//! consumer without touching process-wide state.
//!
//! # Example
//!
//! ```rust,ignore
//! use queuetap::shutdown::ShutdownSignal;
//!
//! #[tokio::main]
//! async fn main() {
//!     let shutdown = ShutdownSignal::new();
//!     let running = consumer.start(&shutdown);
//!
//!     // Returns on SIGINT/SIGTERM (or a programmatic trigger)
//!     shutdown.wait_for_interrupt().await;
//!
//!     running.join().await?;
//! }
//! ```

use std::time::Duration;
use tokio_util::sync::CancellationToken;
use tracing::{info, warn};

/// Default time allowed for workers to finish after cancellation.
const DEFAULT_SHUTDOWN_TIMEOUT: u64 = 30;

/// A cancellation signal shared by every part of one consumer.
///
/// Cancellation is one-shot and broadcast: once triggered, every clone and
/// every token handed out by [`ShutdownSignal::token`] observes it.
#[derive(Clone, Debug)]
pub struct ShutdownSignal {
    token: CancellationToken,
    timeout: Duration,
}

impl ShutdownSignal {
    /// Create a new shutdown signal with default timeout (30 seconds).
    pub fn new() -> Self {
        Self::with_timeout(Duration::from_secs(DEFAULT_SHUTDOWN_TIMEOUT))
    }

    pub fn with_timeout(timeout: Duration) -> Self {
        Self {
            token: CancellationToken::new(),
            timeout,
        }
    }

    /// How long [`crate::consumer::RunningConsumer::join`] waits for workers.
    pub fn timeout(&self) -> Duration {
        self.timeout
    }

    /// Token for a task that must observe cancellation.
    pub fn token(&self) -> CancellationToken {
        self.token.clone()
    }

    pub fn is_shutdown(&self) -> bool {
        self.token.is_cancelled()
    }

    /// Trigger shutdown manually (for tests or programmatic shutdown).
    pub fn trigger(&self) {
        if !self.token.is_cancelled() {
            info!("Shutdown triggered programmatically");
        }
        self.token.cancel();
    }

    /// Resolves once shutdown has been triggered.
    pub async fn cancelled(&self) {
        self.token.cancelled().await;
    }

    /// Wait for SIGINT/SIGTERM, then cancel.
    ///
    /// Also returns if shutdown is triggered some other way first. If the
    /// signal handlers cannot be installed, shutdown is triggered immediately
    /// rather than running without a way to stop.
    pub async fn wait_for_interrupt(&self) {
        tokio::select! {
            result = interrupt() => {
                if let Err(e) = result {
                    warn!(error = %e, "Failed to install signal handler, shutting down");
                }
            }
            _ = self.token.cancelled() => {}
        }

        self.token.cancel();
    }
}

impl Default for ShutdownSignal {
    fn default() -> Self {
        Self::new()
    }
}

#[cfg(unix)]
async fn interrupt() -> std::io::Result<()> {
    use tokio::signal::unix::{signal, SignalKind};

    let mut terminate = signal(SignalKind::terminate())?;

    tokio::select! {
        result = tokio::signal::ctrl_c() => {
            result?;
            info!("Received Ctrl+C, initiating graceful shutdown...");
        }
        _ = terminate.recv() => {
            info!("Received SIGTERM, initiating graceful shutdown...");
        }
    }
    Ok(())
}

#[cfg(not(unix))]
async fn interrupt() -> std::io::Result<()> {
    tokio::signal::ctrl_c().await?;
    info!("Received Ctrl+C, initiating graceful shutdown...");
    Ok(())
}
