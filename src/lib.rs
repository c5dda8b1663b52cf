// src/lib.rs
// Public library surface for the binary and integration tests.

pub mod api;
pub mod calibrate;
pub mod config;
pub mod engine;
pub mod error;
pub mod metrics;
pub mod model;
pub mod store;

// ---- Re-exports for stable public API ----
pub use crate::api::{router, AppState};
pub use crate::config::CalibrationConfig;
pub use crate::engine::CalibrationEngine;
pub use crate::error::{CalibrationError, RunFailure, RunStage};
pub use crate::store::{CalibrationStore, InMemoryStore};

use std::sync::Arc;

use axum::Router;
use tracing::info;

/// Build the application router from environment configuration: thresholds
/// from `$CALIBRATION_CONFIG_PATH`, store seed from `$CALIBRATION_SEED_PATH`.
/// Does not install the metrics recorder.
pub fn app() -> anyhow::Result<Router> {
    let config = CalibrationConfig::from_env()?;
    let store = Arc::new(InMemoryStore::from_env()?);
    info!(target: "calibration", ?config, "calibration service configured");
    Ok(router(AppState::new(store, config)))
}
