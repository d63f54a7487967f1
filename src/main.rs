//! queuetap - queue subscriber
//!
//! Polls an SQS queue, fans messages out to a worker pool, classifies and
//! renders each event, and (in the `consume` profile) deletes it.
//!
//! ## Configuration
//!
//! `config/queuetap.toml` (or `--config` / `QUEUETAP_CONFIG`), overridden by:
//! - `QUEUE_URL` / `--queue`: queue URL (required)
//! - `--workers`, `--max-messages`, `--wait-time`, `--visibility`
//! - `--profile inspect|consume`, `--acknowledge` / `--no-acknowledge`
//! - `--output log|stdout`
//! - `RUST_LOG`: logging level (default: "info")

use clap::Parser;
use queuetap::config::{Overrides, Profile, QueuetapConfig};
use queuetap::queue::{QueueClient, SqsQueue};
use queuetap::report::OutputMode;
use queuetap::{Consumer, ShutdownSignal};
use std::path::PathBuf;
use std::process::ExitCode;
use std::sync::Arc;
use tracing::{error, info};
use tracing_subscriber::EnvFilter;

#[derive(Debug, Parser)]
#[command(name = "queuetap", version, about = "Subscribe to an SQS queue and render order/payment events")]
struct Cli {
    /// Path to the TOML configuration file
    #[arg(long, env = "QUEUETAP_CONFIG")]
    config: Option<PathBuf>,

    /// SQS queue URL
    #[arg(long = "queue", env = "QUEUE_URL")]
    queue_url: Option<String>,

    /// AWS region
    #[arg(long)]
    region: Option<String>,

    /// Endpoint override for SQS-compatible emulators
    #[arg(long, env = "QUEUETAP_ENDPOINT_URL")]
    endpoint_url: Option<String>,

    /// Maximum number of messages per receive (1-10)
    #[arg(long)]
    max_messages: Option<i32>,

    /// Long polling wait time in seconds (0-20)
    #[arg(long = "wait-time")]
    wait_time: Option<i32>,

    /// Visibility timeout in seconds
    #[arg(long = "visibility")]
    visibility: Option<i32>,

    /// Number of concurrent workers
    #[arg(long)]
    workers: Option<usize>,

    /// Deployment profile: inspect never deletes, consume does
    #[arg(long, value_enum)]
    profile: Option<Profile>,

    /// Delete messages after processing, whatever the profile
    #[arg(long, conflicts_with = "no_acknowledge")]
    acknowledge: bool,

    /// Never delete messages, whatever the profile
    #[arg(long)]
    no_acknowledge: bool,

    /// Where to send message renderings
    #[arg(long, value_enum)]
    output: Option<OutputMode>,
}

impl Cli {
    fn overrides(&self) -> Overrides {
        let acknowledge = match (self.acknowledge, self.no_acknowledge) {
            (true, _) => Some(true),
            (_, true) => Some(false),
            _ => None,
        };

        Overrides {
            queue_url: self.queue_url.clone(),
            region: self.region.clone(),
            endpoint_url: self.endpoint_url.clone(),
            max_messages: self.max_messages,
            wait_time_seconds: self.wait_time,
            visibility_timeout_seconds: self.visibility,
            workers: self.workers,
            profile: self.profile,
            acknowledge,
            output: self.output,
        }
    }
}

#[tokio::main]
async fn main() -> ExitCode {
    dotenvy::dotenv().ok();
    tracing_subscriber::fmt()
        .with_env_filter(EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info")))
        .init();

    let cli = Cli::parse();

    match run(cli).await {
        Ok(()) => ExitCode::SUCCESS,
        Err(e) => {
            error!(error = %e, "queuetap stopped with an error");
            ExitCode::FAILURE
        }
    }
}

async fn run(cli: Cli) -> Result<(), Box<dyn std::error::Error>> {
    let mut config = QueuetapConfig::load(cli.config.as_deref())?;
    config.apply(cli.overrides());
    config.validate()?;

    let queue = SqsQueue::connect(&config.queue).await;
    queue.ping().await?;

    let reporter = config.consumer.output.build_reporter();
    let shutdown = ShutdownSignal::with_timeout(config.consumer.shutdown_timeout());
    let consumer = Consumer::new(Arc::new(queue), reporter, config.consumer.settings());

    info!(
        queue_url = %config.queue.url,
        profile = ?config.consumer.profile,
        "Listening for messages, press Ctrl+C to stop"
    );

    consumer.run(&shutdown).await?;
    Ok(())
}
