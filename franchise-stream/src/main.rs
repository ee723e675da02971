//! franchise-stream - command-line driver
//!
//! Runs one search session against the location server and prints every
//! master-table update to stdout as a JSON line. Logs go to stderr.

use anyhow::{bail, Result};
use clap::Parser;
use franchise_common::config::load_or_default;
use franchise_common::events::{EventBus, SessionEvent};
use franchise_common::models::FranchiseQuery;
use franchise_stream::{CliOverrides, StreamSessionController, StreamSettings};
use std::io::Write;
use std::path::PathBuf;
use tokio::sync::broadcast::error::RecvError;
use tracing::{info, warn};
use tracing_subscriber::layer::SubscriberExt;
use tracing_subscriber::util::SubscriberInitExt;

#[derive(Parser, Debug)]
#[command(name = "franchise-stream")]
#[command(about = "Stream and merge franchise locations from the search server")]
#[command(version)]
struct Args {
    /// Franchise name
    #[arg(long)]
    name: String,

    #[arg(long)]
    city: String,

    #[arg(long)]
    state: String,

    #[arg(long, default_value = "USA")]
    country: String,

    /// Config file (defaults to the platform config directory)
    #[arg(long, value_name = "FILE")]
    config: Option<PathBuf>,

    /// Search server base URL
    #[arg(long)]
    stream_url: Option<String>,

    /// Log level filter when RUST_LOG is unset
    #[arg(long)]
    log_level: Option<String>,
}

#[tokio::main]
async fn main() -> Result<()> {
    let args = Args::parse();
    let (toml_config, config_load) = load_or_default(args.config.as_deref());
    let settings = StreamSettings::resolve(
        &toml_config,
        &CliOverrides {
            stream_url: args.stream_url.clone(),
            log_level: args.log_level.clone(),
        },
    )?;

    tracing_subscriber::registry()
        .with(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| tracing_subscriber::EnvFilter::new(&settings.log_level)),
        )
        .with(tracing_subscriber::fmt::layer().with_writer(std::io::stderr))
        .init();

    info!("Starting franchise-stream v{}", env!("CARGO_PKG_VERSION"));
    config_load.log();
    info!("Search server: {} (from {})", settings.stream_url, settings.stream_url_source);

    let controller = StreamSessionController::from_settings(&settings)?;

    let bus = EventBus::new(256);
    let mut events = bus.subscribe();
    let query = FranchiseQuery::new(args.name, args.city, args.state, args.country);
    let session_id = controller.start_broadcast(query, &bus)?;

    let mut stdout = std::io::stdout();
    loop {
        let event = tokio::select! {
            _ = tokio::signal::ctrl_c() => {
                warn!("Interrupted, cancelling session");
                controller.cancel();
                bail!("Search cancelled");
            }
            event = events.recv() => event,
        };

        let event = match event {
            Ok(event) => event,
            Err(RecvError::Lagged(skipped)) => {
                warn!(skipped = skipped, "Output fell behind, skipped events");
                continue;
            }
            Err(RecvError::Closed) => bail!("Session event channel closed"),
        };
        if event.session_id() != session_id {
            continue;
        }

        match event {
            SessionEvent::TableUpdated { table, .. } => {
                writeln!(stdout, "{}", serde_json::to_string(&table)?)?;
                stdout.flush()?;
            }
            SessionEvent::SourceProgress { state, .. } => {
                info!(
                    source = %state.source,
                    status = ?state.status,
                    count = state.count,
                    "{}",
                    state.message
                );
            }
            SessionEvent::SessionCompleted { .. } => {
                info!(locations = controller.snapshot().len(), "Search complete");
                return Ok(());
            }
            SessionEvent::SessionFailed { message, .. } => {
                bail!("Search failed: {}", message);
            }
        }
    }
}
