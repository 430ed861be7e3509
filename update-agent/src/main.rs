//! Update Agent - Main entry point
//!
//! Runs one update session against the configured install root and, on
//! request, serves the verified feed to the client over the local relay.

use anyhow::{Context, Result};
use clap::Parser;
use std::path::PathBuf;
use std::sync::Arc;
use tokio::sync::broadcast;
use update_agent::{
    config::{Config, SessionMode},
    daemon::shutdown::ShutdownCoordinator,
    sink::ProgressEvent,
    utils, BroadcastSink, LogSink, ProgressSink, UpdateSession,
};

#[derive(Parser, Debug)]
#[command(author, version, about, long_about = None)]
struct Args {
    /// Path to configuration file
    #[arg(short, long, value_name = "FILE")]
    config: Option<PathBuf>,

    /// Log level (trace, debug, info, warn, error)
    #[arg(short, long)]
    log_level: Option<String>,

    /// Check every file even if verification is disabled
    #[arg(long)]
    repair: bool,

    /// Revision of the installed client, checked against the feed
    #[arg(long)]
    client_revision: Option<i64>,

    /// Serve the verified feed on the local relay after updating
    #[arg(long)]
    relay: bool,

    /// Print progress events to stdout as JSON lines
    #[arg(long)]
    json_events: bool,
}

#[tokio::main]
async fn main() -> Result<()> {
    let args = Args::parse();

    // Load configuration
    let mut config = match &args.config {
        Some(path) => Config::from_file(path)
            .with_context(|| format!("loading {}", path.display()))?,
        None => Config::from_env().context("loading configuration from environment")?,
    };
    if args.repair {
        config.install.mode = SessionMode::Repair;
    }

    // Initialize logging
    let log_level = args.log_level.as_deref().unwrap_or(&config.log.level);
    utils::logger::init(log_level)?;

    tracing::info!(
        "Starting update-agent v{} (install root: {})",
        env!("CARGO_PKG_VERSION"),
        config.install.root.display()
    );

    let shutdown = ShutdownCoordinator::new();

    let sink: Arc<dyn ProgressSink> = if args.json_events {
        let events = Arc::new(BroadcastSink::new());
        spawn_event_printer(events.subscribe());
        events
    } else {
        Arc::new(LogSink)
    };

    let mut session = UpdateSession::new(config.clone(), sink)?.with_cancel(shutdown.token());
    if let Some(revision) = args.client_revision {
        session = session.with_client_revision(revision);
    }

    let mut handle = session.spawn();
    let outcome = tokio::select! {
        joined = &mut handle => joined.context("update session task failed")??,
        _ = shutdown.wait_for_signal() => {
            // Let in-flight tasks discard their temporaries
            let _ = tokio::time::timeout(config.shutdown_timeout(), handle).await;
            anyhow::bail!("update cancelled");
        }
    };

    tracing::info!(
        "Installation up to date: {} file(s), {} bytes in {:.1}s",
        outcome.report.files_completed,
        outcome.report.bytes_transferred,
        outcome.report.duration.as_secs_f64()
    );
    if outcome.client_outdated {
        tracing::warn!("Installed client is older than the feed requires");
    }

    if args.relay {
        serve_relay(&outcome, &config, &shutdown).await?;
    }

    Ok(())
}

fn spawn_event_printer(mut events: broadcast::Receiver<ProgressEvent>) {
    tokio::spawn(async move {
        loop {
            match events.recv().await {
                Ok(event) => match serde_json::to_string(&event) {
                    Ok(line) => println!("{line}"),
                    Err(e) => tracing::warn!("Failed to encode progress event: {}", e),
                },
                Err(broadcast::error::RecvError::Lagged(n)) => {
                    tracing::debug!("Dropped {} progress events", n);
                }
                Err(broadcast::error::RecvError::Closed) => break,
            }
        }
    });
}

#[cfg(unix)]
async fn serve_relay(
    outcome: &update_agent::SessionOutcome,
    config: &Config,
    shutdown: &ShutdownCoordinator,
) -> Result<()> {
    let relay = outcome.start_relay(config)?;
    // The launcher reads the channel id from stdout
    println!("{}", relay.channel_id());

    tokio::select! {
        _ = shutdown.wait_for_signal() => {}
        _ = async {
            while !relay.is_finished() {
                tokio::time::sleep(std::time::Duration::from_millis(100)).await;
            }
        } => {}
    }

    relay.stop().await;
    Ok(())
}

#[cfg(not(unix))]
async fn serve_relay(
    _outcome: &update_agent::SessionOutcome,
    _config: &Config,
    _shutdown: &ShutdownCoordinator,
) -> Result<()> {
    anyhow::bail!("the feed relay requires Unix domain sockets")
}
