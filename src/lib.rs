//! ranguard -- anomaly detection and root-cause attribution for RAN UE telemetry.
//!
//! This crate provides the two-stage detection pipeline (model-based scorer
//! followed by a baseline-driven root-cause engine), the SQLite telemetry
//! store it reads from and writes back to, and a replay utility for seeding
//! recorded UE reports.

pub mod analysis;
pub mod config;
pub mod detect;
pub mod storage;
pub mod telemetry;

use std::sync::Arc;
use std::time::Duration;

use anyhow::{Context, Result};
use tracing::{error, info, warn};

use crate::config::RanConfig;
use crate::detect::engine::DetectionCycle;
use crate::storage::TelemetryStore;

/// Start the detector: open the store, load the model, then run a detection
/// cycle every poll interval until Ctrl-C.
pub async fn serve(config: RanConfig) -> Result<()> {
    config.validate()?;

    info!(path = %config.store.path.display(), "Initializing telemetry store");
    let store = TelemetryStore::open(&config.store)?;
    let cycle = Arc::new(
        DetectionCycle::from_config(&config, store).context("failed to load anomaly model")?,
    );

    let mut interval = tokio::time::interval(Duration::from_millis(config.detection.poll_interval_ms));
    interval.set_missed_tick_behavior(tokio::time::MissedTickBehavior::Delay);

    info!(
        measurement = %config.store.measurement,
        poll_ms = config.detection.poll_interval_ms,
        "Detector started"
    );

    loop {
        tokio::select! {
            _ = interval.tick() => {
                let cycle = Arc::clone(&cycle);
                match tokio::task::spawn_blocking(move || cycle.run_once()).await {
                    Ok(Ok(_)) => {}
                    Ok(Err(e)) => warn!(error = %e, "detection cycle failed, retrying next tick"),
                    Err(e) => error!(error = %e, "detection cycle panicked"),
                }
            }
            _ = tokio::signal::ctrl_c() => {
                info!("Shutting down detector");
                break;
            }
        }
    }

    Ok(())
}
