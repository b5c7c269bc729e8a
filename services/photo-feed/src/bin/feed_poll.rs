//! Reference poller for the feed API.
//!
//! Logs a line whenever the active photo changes and, while one is showing,
//! how long it has left.

use anyhow::{Context, Result};
use chrono::Utc;
use clap::Parser;
use photo_feed::client::{ChangeDetector, FeedPoller};
use std::time::Duration;
use tracing::{info, warn};
use tracing_subscriber::{fmt, prelude::*, EnvFilter};

#[derive(Parser, Clone, Debug)]
#[clap(author, version, about, long_about = None)]
struct Args {
    /// Feed API root
    #[clap(long, default_value = "http://localhost:3001")]
    url: String,

    /// Poll interval in milliseconds
    #[clap(long, default_value = "500")]
    interval_ms: u64,

    /// Request timeout in milliseconds
    #[clap(long, default_value = "2000")]
    timeout_ms: u64,
}

#[tokio::main]
async fn main() -> Result<()> {
    let args = Args::parse();

    tracing_subscriber::registry()
        .with(EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info")))
        .with(fmt::layer().pretty())
        .init();

    let poller = FeedPoller::new(&args.url, Duration::from_millis(args.timeout_ms))
        .context("Failed to build HTTP client")?;
    let mut detector = ChangeDetector::new();
    let mut ticker = tokio::time::interval(Duration::from_millis(args.interval_ms.max(1)));

    info!(url = %poller.url(), interval_ms = args.interval_ms, "Polling feed");

    loop {
        tokio::select! {
            _ = tokio::signal::ctrl_c() => break,
            _ = ticker.tick() => {}
        }

        let item = match poller.fetch().await {
            Ok(item) => item,
            Err(e) => {
                warn!(error = %e, "Poll failed");
                continue;
            }
        };

        if !detector.observe(&item) {
            continue;
        }

        if item.is_empty() {
            info!("waiting for more photos...");
        } else {
            info!(
                id = ?item.id,
                comment = item.comment.as_deref().unwrap_or(""),
                remaining_ms = ?item.remaining_ms(Utc::now().timestamp_millis()),
                photo_bytes = item.photo.as_ref().map_or(0, |p| p.len()),
                "New photo"
            );
        }
    }

    Ok(())
}
