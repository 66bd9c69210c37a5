//! # Rooms
//!
//! Runs a scripted session against the rooms session manager with
//! in-memory collaborators and prints a JSON summary.
//!
//! ## Usage
//!
//! ```bash
//! # Run with default settings
//! rooms
//!
//! # Keep eight rooms open
//! ROOMS_MAX_OPEN=8 rooms
//!
//! # More logging
//! RUST_LOG=rooms=trace,tenvis_rooms_core=trace rooms
//! ```

mod config;
mod metrics;
mod simulation;

use anyhow::{Context, Result};
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt};

#[tokio::main]
async fn main() -> Result<()> {
    tracing_subscriber::registry()
        .with(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| "rooms=debug,tenvis_rooms_core=debug".into()),
        )
        .with(tracing_subscriber::fmt::layer())
        .init();

    let config = config::Config::load()?;
    let manager_config = config.manager_config();

    tracing::info!(
        max_rooms_open = manager_config.max_rooms_open,
        rooms = config.simulation.rooms,
        "Starting rooms simulation"
    );

    metrics::init_metrics();
    if config.metrics.enabled {
        metrics::start_metrics_server(config.metrics.port)?;
    }

    let summary = simulation::run(&config.simulation, manager_config).await?;
    let json = serde_json::to_string_pretty(&summary).context("Failed to encode summary")?;
    println!("{json}");

    Ok(())
}
