//! # Strand Server
//!
//! Realtime sync gateway for salon queues and bookings.
//!
//! ## Usage
//!
//! ```bash
//! # Run with default settings
//! strand
//!
//! # Run with environment variables
//! STRAND_PORT=8080 STRAND_HOST=0.0.0.0 strand
//! ```
//!
//! Configuration is read from `strand.toml` when present.

mod config;
mod gateway;
mod handlers;
mod metrics;
mod routes;

use anyhow::Result;
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt};

#[tokio::main]
async fn main() -> Result<()> {
    tracing_subscriber::registry()
        .with(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| "strand=debug".into()),
        )
        .with(tracing_subscriber::fmt::layer())
        .init();

    let config = config::Config::load()?;

    tracing::info!("Starting Strand server on {}:{}", config.host, config.port);

    metrics::init_metrics();

    handlers::run_server(config).await?;

    Ok(())
}
