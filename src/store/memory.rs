// src/store/memory.rs
//! In-memory store, optionally seeded from a JSON file.
//!
//! JSON shape:
//! {
//!   "samples": [
//!     { "tenant_id": "acme", "model_version": "v3",
//!       "predicted_score": 82.0, "actual_score": 41.5,
//!       "recorded_at": "2025-06-01T09:00:00Z" }
//!   ],
//!   "weights": [
//!     { "tenant_id": "acme", "version": 4,
//!       "weights": { "engagement": 0.3, "completion": 0.3,
//!                    "feedback_quality": 0.2, "compliance_linkage": 0.2 } }
//!   ]
//! }
//!
//! Per tenant, the highest seeded version is the active one.

use std::collections::HashMap;
use std::fs;
use std::path::{Path, PathBuf};
use std::sync::{Mutex, MutexGuard};

use anyhow::{anyhow, bail, Context, Result};
use serde::Deserialize;
use tracing::{info, warn};
use uuid::Uuid;

use crate::calibrate::buckets::checked;
use crate::model::{
    ActiveWeights, CalibrationCell, CalibrationRun, Period, ValidationRecord, ValidationSample,
    WeightSuggestion, WeightVector,
};
use crate::store::CalibrationStore;

pub const DEFAULT_SEED_PATH: &str = "config/seed.json";
pub const ENV_SEED_PATH: &str = "CALIBRATION_SEED_PATH";

/// Tolerance for the sum-to-one check on activated weight vectors.
const WEIGHT_SUM_TOLERANCE: f64 = 1e-6;

#[derive(Debug, Clone, Default, Deserialize)]
pub struct SeedFile {
    #[serde(default)]
    pub samples: Vec<ValidationRecord>,
    #[serde(default)]
    pub weights: Vec<ActiveWeights>,
}

#[derive(Debug, Default)]
struct Tables {
    samples: Vec<ValidationRecord>,
    /// All versions per tenant; the active one is tracked separately.
    weight_versions: HashMap<String, Vec<ActiveWeights>>,
    active_version: HashMap<String, u32>,
    runs: HashMap<Uuid, CalibrationRun>,
    cells: HashMap<Uuid, Vec<CalibrationCell>>,
    suggestions: HashMap<Uuid, WeightSuggestion>,
}

#[derive(Debug, Default)]
pub struct InMemoryStore {
    inner: Mutex<Tables>,
}

impl InMemoryStore {
    pub fn new() -> Self {
        Self::default()
    }

    /// Seed from `$CALIBRATION_SEED_PATH` or `config/seed.json`; a missing file
    /// yields an empty store.
    pub fn from_env() -> Result<Self> {
        let path = std::env::var(ENV_SEED_PATH)
            .map(PathBuf::from)
            .unwrap_or_else(|_| PathBuf::from(DEFAULT_SEED_PATH));
        if !path.exists() {
            info!(target: "calibration", path = %path.display(), "no seed file; starting empty");
            return Ok(Self::new());
        }
        Self::from_seed_file(&path)
    }

    pub fn from_seed_file(path: &Path) -> Result<Self> {
        let content = fs::read_to_string(path)
            .with_context(|| format!("reading store seed from {}", path.display()))?;
        let seed: SeedFile = serde_json::from_str(&content)
            .with_context(|| format!("parsing store seed at {}", path.display()))?;
        Self::from_seed(seed)
    }

    pub fn from_seed(seed: SeedFile) -> Result<Self> {
        let store = Self::new();
        store.record_samples(seed.samples)?;
        for w in seed.weights {
            store.insert_weight_version(w)?;
        }
        Ok(store)
    }

    fn tables(&self) -> Result<MutexGuard<'_, Tables>> {
        self.inner
            .lock()
            .map_err(|_| anyhow!("in-memory store mutex poisoned"))
    }

    /// Append raw validation rows. Returns the number stored.
    pub fn record_samples(&self, records: Vec<ValidationRecord>) -> Result<usize> {
        let n = records.len();
        self.tables()?.samples.extend(records);
        Ok(n)
    }

    /// Store an explicit version; it becomes active if it is the tenant's newest.
    pub fn insert_weight_version(&self, w: ActiveWeights) -> Result<()> {
        validate_weights(&w.weights)?;
        let mut t = self.tables()?;
        let versions = t.weight_versions.entry(w.tenant_id.clone()).or_default();
        if versions.iter().any(|v| v.version == w.version) {
            bail!(
                "weight version {} already exists for tenant {}",
                w.version,
                w.tenant_id
            );
        }
        versions.push(w.clone());
        let active = t.active_version.entry(w.tenant_id).or_insert(w.version);
        *active = (*active).max(w.version);
        Ok(())
    }

    /// Activate a new weight vector as `max_version + 1` for the tenant.
    pub fn activate_weights(&self, tenant_id: &str, weights: WeightVector) -> Result<ActiveWeights> {
        validate_weights(&weights)?;
        let mut t = self.tables()?;
        let versions = t.weight_versions.entry(tenant_id.to_string()).or_default();
        let latest = versions.iter().map(|v| v.version).max().unwrap_or(0);
        let Some(version) = latest.checked_add(1) else {
            bail!("weight version {latest} for tenant {tenant_id} has no successor");
        };
        let record = ActiveWeights {
            tenant_id: tenant_id.to_string(),
            version,
            weights,
        };
        versions.push(record.clone());
        t.active_version.insert(tenant_id.to_string(), version);
        info!(target: "calibration", tenant = tenant_id, version, "weight vector activated");
        Ok(record)
    }
}

fn validate_weights(w: &WeightVector) -> Result<()> {
    if w.components().iter().any(|x| !x.is_finite() || *x < 0.0) {
        bail!("weights must be finite and non-negative");
    }
    if (w.sum() - 1.0).abs() > WEIGHT_SUM_TOLERANCE {
        bail!("weights must sum to 1.0 (got {})", w.sum());
    }
    Ok(())
}

/// Out-of-range rows are skipped here so that the engine only ever sees
/// in-range scores.
fn usable_sample(rec: &ValidationRecord) -> Option<ValidationSample> {
    let s = rec.sample()?;
    match (
        checked(s.predicted_score, "predicted"),
        checked(s.actual_score, "actual"),
    ) {
        (Ok(_), Ok(_)) => Some(s),
        (Err(e), _) | (_, Err(e)) => {
            warn!(
                target: "calibration",
                tenant = %rec.tenant_id,
                model_version = %rec.model_version,
                error = %e,
                "skipping validation record"
            );
            None
        }
    }
}

#[async_trait::async_trait]
impl CalibrationStore for InMemoryStore {
    async fn fetch_validation_samples(
        &self,
        tenant_id: &str,
        model_version: &str,
        period: &Period,
    ) -> Result<Vec<ValidationSample>> {
        let t = self.tables()?;
        Ok(t.samples
            .iter()
            .filter(|r| r.tenant_id == tenant_id && r.model_version == model_version)
            .filter(|r| period.contains(r.recorded_at))
            .filter_map(usable_sample)
            .collect())
    }

    async fn fetch_active_weight_vector(&self, tenant_id: &str) -> Result<Option<ActiveWeights>> {
        let t = self.tables()?;
        let Some(active) = t.active_version.get(tenant_id) else {
            return Ok(None);
        };
        Ok(t.weight_versions
            .get(tenant_id)
            .and_then(|vs| vs.iter().find(|v| v.version == *active))
            .cloned())
    }

    async fn persist_calibration_run(&self, run: &CalibrationRun) -> Result<Uuid> {
        let mut t = self.tables()?;
        if t.runs.contains_key(&run.id) {
            bail!("calibration run {} already exists", run.id);
        }
        t.runs.insert(run.id, run.clone());
        Ok(run.id)
    }

    async fn update_calibration_run(&self, run: &CalibrationRun) -> Result<()> {
        let mut t = self.tables()?;
        let existing = t
            .runs
            .get_mut(&run.id)
            .ok_or_else(|| anyhow!("calibration run {} not found", run.id))?;
        if existing.completed_at.is_some() {
            bail!("calibration run {} is already finalized", run.id);
        }
        *existing = run.clone();
        Ok(())
    }

    async fn persist_cells(&self, run_id: Uuid, cells: &[CalibrationCell]) -> Result<()> {
        let mut t = self.tables()?;
        if !t.runs.contains_key(&run_id) {
            bail!("calibration run {run_id} not found");
        }
        if t.cells.contains_key(&run_id) {
            bail!("cells for calibration run {run_id} already persisted");
        }
        t.cells.insert(run_id, cells.to_vec());
        Ok(())
    }

    async fn persist_weight_suggestion(&self, suggestion: &WeightSuggestion) -> Result<Uuid> {
        let mut t = self.tables()?;
        if !t.runs.contains_key(&suggestion.calibration_run_id) {
            bail!("calibration run {} not found", suggestion.calibration_run_id);
        }
        t.suggestions.insert(suggestion.id, suggestion.clone());
        Ok(suggestion.id)
    }

    async fn fetch_calibration_run(
        &self,
        run_id: Uuid,
    ) -> Result<Option<(CalibrationRun, Vec<CalibrationCell>)>> {
        let t = self.tables()?;
        Ok(t.runs.get(&run_id).map(|run| {
            let cells = t.cells.get(&run_id).cloned().unwrap_or_default();
            (run.clone(), cells)
        }))
    }

    async fn list_calibration_runs(&self, tenant_id: &str) -> Result<Vec<CalibrationRun>> {
        let t = self.tables()?;
        let mut runs: Vec<CalibrationRun> = t
            .runs
            .values()
            .filter(|r| r.tenant_id == tenant_id)
            .cloned()
            .collect();
        runs.sort_by_key(|r| r.created_at);
        Ok(runs)
    }

    async fn fetch_weight_suggestion(&self, suggestion_id: Uuid) -> Result<Option<WeightSuggestion>> {
        Ok(self.tables()?.suggestions.get(&suggestion_id).cloned())
    }
}
