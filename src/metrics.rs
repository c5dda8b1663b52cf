use anyhow::{Context, Result};
use axum::{routing::get, Router};
use metrics::{describe_counter, describe_gauge, describe_histogram};
use metrics_exporter_prometheus::{PrometheusBuilder, PrometheusHandle};
use once_cell::sync::OnceCell;

pub const RUNS_TOTAL: &str = "calibration_runs_total";
pub const SAMPLES_TOTAL: &str = "calibration_samples_total";
pub const SUGGESTIONS_TOTAL: &str = "calibration_suggestions_total";
pub const RUN_DURATION_MS: &str = "calibration_run_duration_ms";
pub const LAST_RUN_TS: &str = "calibration_last_run_ts";

/// One-time metrics registration (so series show up on /metrics).
pub fn ensure_metrics_described() {
    static ONCE: OnceCell<()> = OnceCell::new();
    ONCE.get_or_init(|| {
        describe_counter!(RUNS_TOTAL, "Calibration runs by outcome.");
        describe_counter!(SAMPLES_TOTAL, "Validation samples consumed by calibration runs.");
        describe_counter!(SUGGESTIONS_TOTAL, "Draft weight suggestions created.");
        describe_histogram!(RUN_DURATION_MS, "Calibration run wall time in milliseconds.");
        describe_gauge!(LAST_RUN_TS, "Unix ts when a calibration run last finished.");
    });
}

pub struct Metrics {
    pub handle: PrometheusHandle,
}

impl Metrics {
    /// Install the global Prometheus recorder. Call once per process.
    pub fn init() -> Result<Self> {
        let handle = PrometheusBuilder::new()
            .install_recorder()
            .context("prometheus: install recorder")?;
        ensure_metrics_described();
        Ok(Self { handle })
    }

    /// Returns a router exposing `/metrics` with the Prometheus exposition format.
    pub fn router(&self) -> Router {
        let handle = self.handle.clone();
        Router::new().route(
            "/metrics",
            get(move || {
                let h = handle.clone();
                async move { h.render() }
            }),
        )
    }
}
