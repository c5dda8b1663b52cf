// src/store/mod.rs
//! Sample store adapter: the engine's only window onto persistence.
//!
//! The engine reads samples and the active weight vector once per run and
//! writes the run shell, its final metrics, its cells and the suggestion.
//! Read-back methods exist for audit views of partial or finished runs.

pub mod memory;

use anyhow::Result;
use uuid::Uuid;

use crate::model::{
    ActiveWeights, CalibrationCell, CalibrationRun, Period, ValidationSample, WeightSuggestion,
};

pub use crate::store::memory::{InMemoryStore, SeedFile};

#[async_trait::async_trait]
pub trait CalibrationStore: Send + Sync {
    /// Samples for a tenant/model version, optionally within a period.
    /// Rows missing either score are never returned.
    async fn fetch_validation_samples(
        &self,
        tenant_id: &str,
        model_version: &str,
        period: &Period,
    ) -> Result<Vec<ValidationSample>>;

    async fn fetch_active_weight_vector(&self, tenant_id: &str) -> Result<Option<ActiveWeights>>;

    async fn persist_calibration_run(&self, run: &CalibrationRun) -> Result<Uuid>;

    /// The single metrics update of a run after aggregation.
    async fn update_calibration_run(&self, run: &CalibrationRun) -> Result<()>;

    async fn persist_cells(&self, run_id: Uuid, cells: &[CalibrationCell]) -> Result<()>;

    async fn persist_weight_suggestion(&self, suggestion: &WeightSuggestion) -> Result<Uuid>;

    async fn fetch_calibration_run(
        &self,
        run_id: Uuid,
    ) -> Result<Option<(CalibrationRun, Vec<CalibrationCell>)>>;

    async fn list_calibration_runs(&self, tenant_id: &str) -> Result<Vec<CalibrationRun>>;

    async fn fetch_weight_suggestion(&self, suggestion_id: Uuid) -> Result<Option<WeightSuggestion>>;
}
