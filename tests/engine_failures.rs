// tests/engine_failures.rs
//
// Failure paths of a run. A scripted store wraps the in-memory one and fails
// exactly one operation, so we can check the stage, the carried run id, and
// what stays persisted for audit.

use std::sync::Arc;

use anyhow::{anyhow, Result};
use impact_calibration::model::{
    ActiveWeights, CalibrationCell, CalibrationRequest, CalibrationRun, Period, ValidationRecord,
    ValidationSample, WeightSuggestion, WeightVector,
};
use impact_calibration::{
    CalibrationConfig, CalibrationEngine, CalibrationError, CalibrationStore, InMemoryStore,
    RunStage,
};
use uuid::Uuid;

const TENANT: &str = "acme";
const MODEL: &str = "impact-v3";

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum FailAt {
    Nothing,
    PersistRun,
    FetchSamples,
    PersistCells,
    FetchWeights,
    PersistSuggestion,
}

struct ScriptedStore {
    inner: InMemoryStore,
    fail_at: FailAt,
    /// Returned verbatim from `fetch_validation_samples`, bypassing range checks.
    raw_samples: Option<Vec<ValidationSample>>,
}

impl ScriptedStore {
    fn new(fail_at: FailAt) -> Self {
        let inner = InMemoryStore::new();
        inner
            .record_samples(
                [(72.0, 49.0), (71.0, 48.0), (70.0, 46.0)]
                    .into_iter()
                    .map(|(p, a)| ValidationRecord {
                        tenant_id: TENANT.into(),
                        model_version: MODEL.into(),
                        predicted_score: Some(p),
                        actual_score: Some(a),
                        recorded_at: chrono::Utc::now(),
                    })
                    .collect(),
            )
            .expect("record samples");
        inner
            .activate_weights(TENANT, WeightVector::UNIFORM)
            .expect("activate weights");
        Self {
            inner,
            fail_at,
            raw_samples: None,
        }
    }

    fn check(&self, op: FailAt) -> Result<()> {
        if self.fail_at == op {
            Err(anyhow!("scripted failure at {op:?}"))
        } else {
            Ok(())
        }
    }
}

#[async_trait::async_trait]
impl CalibrationStore for ScriptedStore {
    async fn fetch_validation_samples(
        &self,
        tenant_id: &str,
        model_version: &str,
        period: &Period,
    ) -> Result<Vec<ValidationSample>> {
        self.check(FailAt::FetchSamples)?;
        if let Some(raw) = &self.raw_samples {
            return Ok(raw.clone());
        }
        self.inner
            .fetch_validation_samples(tenant_id, model_version, period)
            .await
    }

    async fn fetch_active_weight_vector(&self, tenant_id: &str) -> Result<Option<ActiveWeights>> {
        self.check(FailAt::FetchWeights)?;
        self.inner.fetch_active_weight_vector(tenant_id).await
    }

    async fn persist_calibration_run(&self, run: &CalibrationRun) -> Result<Uuid> {
        self.check(FailAt::PersistRun)?;
        self.inner.persist_calibration_run(run).await
    }

    async fn update_calibration_run(&self, run: &CalibrationRun) -> Result<()> {
        self.inner.update_calibration_run(run).await
    }

    async fn persist_cells(&self, run_id: Uuid, cells: &[CalibrationCell]) -> Result<()> {
        self.check(FailAt::PersistCells)?;
        self.inner.persist_cells(run_id, cells).await
    }

    async fn persist_weight_suggestion(&self, suggestion: &WeightSuggestion) -> Result<Uuid> {
        self.check(FailAt::PersistSuggestion)?;
        self.inner.persist_weight_suggestion(suggestion).await
    }

    async fn fetch_calibration_run(
        &self,
        run_id: Uuid,
    ) -> Result<Option<(CalibrationRun, Vec<CalibrationCell>)>> {
        self.inner.fetch_calibration_run(run_id).await
    }

    async fn list_calibration_runs(&self, tenant_id: &str) -> Result<Vec<CalibrationRun>> {
        self.inner.list_calibration_runs(tenant_id).await
    }

    async fn fetch_weight_suggestion(&self, suggestion_id: Uuid) -> Result<Option<WeightSuggestion>> {
        self.inner.fetch_weight_suggestion(suggestion_id).await
    }
}

fn engine(store: ScriptedStore) -> (Arc<ScriptedStore>, CalibrationEngine) {
    let store = Arc::new(store);
    let engine = CalibrationEngine::new(store.clone(), CalibrationConfig::default());
    (store, engine)
}

#[tokio::test]
async fn scripted_store_without_failures_completes() {
    let (_store, engine) = engine(ScriptedStore::new(FailAt::Nothing));
    let outcome = engine
        .run(CalibrationRequest::new(TENANT, MODEL))
        .await
        .expect("run should succeed");
    assert!(outcome.weight_suggestion().is_some());
}

#[tokio::test]
async fn missing_tenant_fails_before_any_write() {
    let (store, engine) = engine(ScriptedStore::new(FailAt::Nothing));
    let req = CalibrationRequest {
        model_version: Some(MODEL.into()),
        ..Default::default()
    };

    let failure = engine.run(req).await.expect_err("must fail");
    assert!(matches!(failure.error, CalibrationError::MissingField("tenant_id")));
    assert_eq!(failure.stage, RunStage::Requested);
    assert!(failure.run_id.is_none());
    assert!(store.list_calibration_runs(TENANT).await.unwrap().is_empty());
}

#[tokio::test]
async fn blank_model_version_is_missing() {
    let (_store, engine) = engine(ScriptedStore::new(FailAt::Nothing));
    let failure = engine
        .run(CalibrationRequest::new(TENANT, "   "))
        .await
        .expect_err("must fail");
    assert!(matches!(failure.error, CalibrationError::MissingField("model_version")));
    assert_eq!(failure.tenant_id, TENANT);
}

#[tokio::test]
async fn run_shell_write_failure_has_no_run_id() {
    let (_store, engine) = engine(ScriptedStore::new(FailAt::PersistRun));
    let failure = engine
        .run(CalibrationRequest::new(TENANT, MODEL))
        .await
        .expect_err("must fail");
    assert!(matches!(failure.error, CalibrationError::PersistenceFailure(_)));
    assert_eq!(failure.stage, RunStage::Created);
    assert!(failure.run_id.is_none());
}

#[tokio::test]
async fn sample_read_failure_leaves_the_run_shell() {
    let (store, engine) = engine(ScriptedStore::new(FailAt::FetchSamples));
    let failure = engine
        .run(CalibrationRequest::new(TENANT, MODEL))
        .await
        .expect_err("must fail");

    assert!(matches!(failure.error, CalibrationError::UpstreamReadFailure(_)));
    assert_eq!(failure.error.kind(), "upstream_read_failure");
    assert_eq!(failure.stage, RunStage::Created);
    let run_id = failure.run_id.expect("run shell was written");

    let (run, cells) = store
        .fetch_calibration_run(run_id)
        .await
        .unwrap()
        .expect("shell kept for audit");
    assert_eq!(run.sample_size, 0);
    assert!(run.completed_at.is_none());
    assert!(cells.is_empty());
}

#[tokio::test]
async fn out_of_range_score_fails_in_aggregation() {
    let mut scripted = ScriptedStore::new(FailAt::Nothing);
    scripted.raw_samples = Some(vec![
        ValidationSample::new(50.0, 50.0),
        ValidationSample::new(50.0, 120.0),
    ]);
    let (store, engine) = engine(scripted);

    let failure = engine
        .run(CalibrationRequest::new(TENANT, MODEL))
        .await
        .expect_err("must fail");
    assert!(matches!(
        failure.error,
        CalibrationError::InvalidScore { field: "actual", value } if value == 120.0
    ));
    assert_eq!(failure.stage, RunStage::Aggregating);

    let run_id = failure.run_id.expect("run shell was written");
    let (run, _) = store.fetch_calibration_run(run_id).await.unwrap().unwrap();
    assert!(run.avg_gap.is_none());
}

#[tokio::test]
async fn cell_write_failure_keeps_run_metrics() {
    let (store, engine) = engine(ScriptedStore::new(FailAt::PersistCells));
    let failure = engine
        .run(CalibrationRequest::new(TENANT, MODEL))
        .await
        .expect_err("must fail");

    assert!(matches!(failure.error, CalibrationError::PersistenceFailure(_)));
    assert_eq!(failure.stage, RunStage::Summarized);

    let run_id = failure.run_id.expect("run id carried");
    let (run, cells) = store.fetch_calibration_run(run_id).await.unwrap().unwrap();
    assert_eq!(run.sample_size, 3);
    assert!(run.avg_gap.is_some());
    assert!(cells.is_empty());
}

#[tokio::test]
async fn weight_read_failure_leaves_only_the_run_shell() {
    let (store, engine) = engine(ScriptedStore::new(FailAt::FetchWeights));
    let failure = engine
        .run(CalibrationRequest::new(TENANT, MODEL))
        .await
        .expect_err("must fail");

    assert!(matches!(failure.error, CalibrationError::UpstreamReadFailure(_)));
    assert_eq!(failure.stage, RunStage::Created);
    assert_eq!(failure.state(), RunStage::Failed);

    let run_id = failure.run_id.expect("run shell was written");
    let (run, cells) = store.fetch_calibration_run(run_id).await.unwrap().unwrap();
    assert_eq!(run.sample_size, 0);
    assert!(run.avg_gap.is_none());
    assert!(run.completed_at.is_none());
    assert!(cells.is_empty());
}

#[tokio::test]
async fn last_weight_version_cannot_be_succeeded() {
    let scripted = ScriptedStore::new(FailAt::Nothing);
    scripted
        .inner
        .insert_weight_version(ActiveWeights {
            tenant_id: TENANT.into(),
            version: u32::MAX,
            weights: WeightVector::UNIFORM,
        })
        .expect("insert last version");
    let (store, engine) = engine(scripted);

    let failure = engine
        .run(CalibrationRequest::new(TENANT, MODEL))
        .await
        .expect_err("must fail");
    assert!(matches!(
        failure.error,
        CalibrationError::VersionExhausted { version } if version == u32::MAX
    ));
    assert_eq!(failure.error.kind(), "version_exhausted");
    assert_eq!(failure.stage, RunStage::SuggestionDrafted);

    // Metrics and cells stay for audit; no draft is written.
    let run_id = failure.run_id.expect("run id carried");
    let (run, cells) = store.fetch_calibration_run(run_id).await.unwrap().unwrap();
    assert_eq!(run.sample_size, 3);
    assert_eq!(cells.len(), 1);
}

#[tokio::test]
async fn suggestion_write_failure_keeps_cells() {
    let (store, engine) = engine(ScriptedStore::new(FailAt::PersistSuggestion));
    let failure = engine
        .run(CalibrationRequest::new(TENANT, MODEL))
        .await
        .expect_err("must fail");

    assert!(matches!(failure.error, CalibrationError::PersistenceFailure(_)));
    assert_eq!(failure.stage, RunStage::SuggestionDrafted);
    assert!(failure.to_string().contains(TENANT));

    let run_id = failure.run_id.expect("run id carried");
    let (run, cells) = store.fetch_calibration_run(run_id).await.unwrap().unwrap();
    assert!(run.completed_at.is_some());
    assert_eq!(cells.len(), 1);
}
