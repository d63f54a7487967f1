//! queuetap-publish - submit a single event
//!
//! Puts the event on an EventBridge bus (`--bus`), or wraps it in the same
//! envelope and sends it straight to a queue (`--queue`). `queuetap` then
//! unwraps, classifies and renders it. `--bus` wins when both are given.
//!
//! ```text
//! queuetap-publish --bus orders \
//!     --source myapp.orders --detail-type OrderCreated \
//!     --message '{"orderId":"o1","customerId":"c1","status":"created", ...}'
//! ```

use clap::{ArgGroup, Parser};
use queuetap::publish::{EventBusPublisher, EventPublisher, PublishRequest, DEFAULT_EVENT_BUS};
use queuetap::queue::{QueueSettings, SqsQueue};
use std::process::ExitCode;
use tracing::{error, info};
use tracing_subscriber::EnvFilter;

#[derive(Debug, Parser)]
#[command(
    name = "queuetap-publish",
    version,
    about = "Publish one event to an EventBridge bus or an SQS queue",
    group(ArgGroup::new("target").required(true).multiple(true).args(["bus", "queue_url"]))
)]
struct Cli {
    /// EventBridge event bus name; `--bus` alone uses the default bus
    #[arg(long, num_args = 0..=1, default_missing_value = DEFAULT_EVENT_BUS)]
    bus: Option<String>,

    /// SQS queue URL, for sending without a bus
    #[arg(long = "queue", env = "QUEUE_URL")]
    queue_url: Option<String>,

    /// Event source identifier (e.g. myapp.orders)
    #[arg(long)]
    source: String,

    /// Event detail type (e.g. OrderCreated)
    #[arg(long)]
    detail_type: String,

    /// Event detail payload (JSON; other text is sent as a JSON string)
    #[arg(long)]
    message: String,

    /// Comma-separated list of resource ARNs
    #[arg(long, default_value = "")]
    resources: String,

    /// Trace header to attach
    #[arg(long, default_value = "")]
    trace_header: String,

    /// AWS region
    #[arg(long)]
    region: Option<String>,

    /// Endpoint override for SQS-compatible emulators
    #[arg(long, env = "QUEUETAP_ENDPOINT_URL")]
    endpoint_url: Option<String>,
}

#[tokio::main]
async fn main() -> ExitCode {
    dotenvy::dotenv().ok();
    tracing_subscriber::fmt()
        .with_env_filter(EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info")))
        .init();

    let cli = Cli::parse();

    match publish(cli).await {
        Ok(id) => {
            info!(event_id = %id, "Event sent successfully");
            ExitCode::SUCCESS
        }
        Err(e) => {
            error!(error = %e, "Error sending event");
            ExitCode::FAILURE
        }
    }
}

async fn publish(cli: Cli) -> Result<String, Box<dyn std::error::Error>> {
    let request = PublishRequest::builder()
        .source(cli.source)
        .detail_type(cli.detail_type)
        .detail(cli.message)
        .resources(&cli.resources)
        .trace_header(&cli.trace_header)
        .build()?;

    let publisher: Box<dyn EventPublisher> = match (cli.bus, cli.queue_url) {
        (Some(bus), _) => {
            let bus = EventBusPublisher::connect(
                bus,
                cli.region.as_deref(),
                cli.endpoint_url.as_deref(),
            )
            .await;
            info!(bus = %bus.bus_name(), "Publishing through event bus");
            Box::new(bus)
        }
        (None, Some(queue_url)) => {
            let mut settings = QueueSettings::new(queue_url);
            settings.region = cli.region;
            settings.endpoint_url = cli.endpoint_url;
            info!(queue_url = %settings.url, "Sending directly to queue");
            Box::new(SqsQueue::connect(&settings).await)
        }
        (None, None) => return Err("either --bus or --queue is required".into()),
    };

    Ok(publisher.publish(&request).await?)
}
