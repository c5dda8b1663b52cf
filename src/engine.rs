//! # Run Orchestrator
//! Sequences one calibration run end to end:
//! `created → aggregating → summarized → bias_analyzed → suggestion_drafted → persisted`.
//!
//! Samples and the active weight vector are read once, right after the run
//! shell is written. Writes happen in order (run shell, run metrics, cells,
//! suggestion) and are never rolled back: a failure leaves the run row in its
//! last written state for audit. No retries. Two outcomes short-circuit without error: an empty
//! sample set, and a tenant without an active weight vector.

use std::sync::Arc;
use std::time::Instant;

use chrono::Utc;
use metrics::{counter, gauge, histogram};
use tracing::{debug, info, warn};
use uuid::Uuid;

use crate::calibrate::{aggregate, analyze, correct, summarize};
use crate::config::CalibrationConfig;
use crate::error::{CalibrationError, RunFailure, RunStage};
use crate::metrics::{
    ensure_metrics_described, LAST_RUN_TS, RUNS_TOTAL, RUN_DURATION_MS, SAMPLES_TOTAL,
    SUGGESTIONS_TOTAL,
};
use crate::model::{
    CalibrationOutcome, CalibrationRequest, CalibrationRun, EmptyMetrics, SuggestionStatus,
    SuggestionView, WeightSuggestion, NO_ACTIVE_WEIGHTS_MESSAGE, NO_DATA_MESSAGE,
};
use crate::store::CalibrationStore;

pub struct CalibrationEngine {
    store: Arc<dyn CalibrationStore>,
    config: CalibrationConfig,
}

/// Where a run currently is; turns step errors into `RunFailure`s.
struct RunContext {
    stage: RunStage,
    tenant_id: String,
    run_id: Option<Uuid>,
}

impl RunContext {
    fn enter(&mut self, stage: RunStage) {
        self.stage = stage;
        debug!(
            target: "calibration",
            tenant = %self.tenant_id,
            run_id = ?self.run_id,
            stage = %stage,
            "stage"
        );
    }

    fn fail(&self, error: CalibrationError) -> RunFailure {
        RunFailure {
            stage: self.stage,
            tenant_id: self.tenant_id.clone(),
            run_id: self.run_id,
            error,
        }
    }

    fn upstream(&self) -> impl FnOnce(anyhow::Error) -> RunFailure + '_ {
        move |e| self.fail(CalibrationError::UpstreamReadFailure(e))
    }

    fn persistence(&self) -> impl FnOnce(anyhow::Error) -> RunFailure + '_ {
        move |e| self.fail(CalibrationError::PersistenceFailure(e))
    }
}

impl CalibrationEngine {
    pub fn new(store: Arc<dyn CalibrationStore>, config: CalibrationConfig) -> Self {
        Self { store, config }
    }

    pub fn config(&self) -> &CalibrationConfig {
        &self.config
    }

    pub fn store(&self) -> &Arc<dyn CalibrationStore> {
        &self.store
    }

    /// Execute one run for an already-authorized caller.
    pub async fn run(&self, request: CalibrationRequest) -> Result<CalibrationOutcome, RunFailure> {
        ensure_metrics_described();
        let started = Instant::now();

        let result = self.execute(request).await;

        let outcome = match &result {
            Ok(CalibrationOutcome::NoData { .. }) => "no_data",
            Ok(CalibrationOutcome::Completed {
                weight_suggestion: None,
                ..
            }) => "no_weights",
            Ok(CalibrationOutcome::Completed { .. }) => "completed",
            Err(_) => "failed",
        };
        counter!(RUNS_TOTAL, "outcome" => outcome).increment(1);
        histogram!(RUN_DURATION_MS).record(started.elapsed().as_secs_f64() * 1000.0);
        gauge!(LAST_RUN_TS).set(Utc::now().timestamp() as f64);

        if let Err(f) = &result {
            warn!(
                target: "calibration",
                state = %f.state(),
                stage = %f.stage,
                tenant = %f.tenant_id,
                run_id = ?f.run_id,
                kind = f.error.kind(),
                error = %f.error,
                "calibration run failed"
            );
        }
        result
    }

    async fn execute(&self, request: CalibrationRequest) -> Result<CalibrationOutcome, RunFailure> {
        let mut ctx = RunContext {
            stage: RunStage::Requested,
            tenant_id: request.tenant_id.clone().unwrap_or_default(),
            run_id: None,
        };
        let req = request.validate().map_err(|e| ctx.fail(e))?;
        ctx.tenant_id = req.tenant_id.clone();

        // created
        ctx.enter(RunStage::Created);
        let run = CalibrationRun::start(&req);
        let run_id = self
            .store
            .persist_calibration_run(&run)
            .await
            .map_err(ctx.persistence())?;
        ctx.run_id = Some(run_id);

        let samples = self
            .store
            .fetch_validation_samples(&req.tenant_id, &req.model_version, &req.period)
            .await
            .map_err(ctx.upstream())?;
        let active = self
            .store
            .fetch_active_weight_vector(&req.tenant_id)
            .await
            .map_err(ctx.upstream())?;
        counter!(SAMPLES_TOTAL).increment(samples.len() as u64);
        info!(
            target: "calibration",
            tenant = %req.tenant_id,
            model_version = %req.model_version,
            %run_id,
            samples = samples.len(),
            "calibration run started"
        );

        let Some(metrics) = summarize(&samples, &self.config.status) else {
            ctx.enter(RunStage::Persisted);
            info!(target: "calibration", %run_id, "no validation data; empty run recorded");
            return Ok(CalibrationOutcome::NoData {
                calibration_run_id: run_id,
                message: NO_DATA_MESSAGE.to_string(),
                metrics: EmptyMetrics { sample_size: 0 },
            });
        };

        // aggregating
        ctx.enter(RunStage::Aggregating);
        let cells = aggregate(&samples, &self.config.cells).map_err(|e| ctx.fail(e))?;

        // summarized
        ctx.enter(RunStage::Summarized);
        let run = run.with_metrics(&metrics);
        self.store
            .update_calibration_run(&run)
            .await
            .map_err(ctx.persistence())?;
        self.store
            .persist_cells(run_id, &cells)
            .await
            .map_err(ctx.persistence())?;
        info!(
            target: "calibration",
            %run_id,
            cells = cells.len(),
            avg_gap = metrics.avg_gap,
            correlation = metrics.correlation_score,
            status = %metrics.overall_status,
            "run summarized"
        );

        // bias analysis needs the active weights to be worth anything
        ctx.enter(RunStage::BiasAnalyzed);
        let Some(active) = active else {
            ctx.enter(RunStage::Persisted);
            info!(target: "calibration", %run_id, "no active weights; suggestion skipped");
            return Ok(CalibrationOutcome::Completed {
                calibration_run_id: run_id,
                metrics,
                weight_suggestion: None,
                message: Some(NO_ACTIVE_WEIGHTS_MESSAGE.to_string()),
            });
        };
        let report = analyze(&cells, &self.config.bias);
        info!(
            target: "calibration",
            %run_id,
            total_weight = report.total_weight,
            overestimation = report.overestimation_ratio(),
            underestimation = report.underestimation_ratio(),
            "bias analyzed"
        );

        // suggestion_drafted
        ctx.enter(RunStage::SuggestionDrafted);
        let suggested_version = active
            .version
            .checked_add(1)
            .ok_or_else(|| {
                ctx.fail(CalibrationError::VersionExhausted {
                    version: active.version,
                })
            })?;
        let correction = correct(&active.weights, &report, &self.config.weights);
        let suggestion = WeightSuggestion {
            id: Uuid::new_v4(),
            calibration_run_id: run_id,
            tenant_id: req.tenant_id.clone(),
            source_version: active.version,
            suggested_version,
            weights: correction.weights,
            rationale: correction.rationale,
            status: SuggestionStatus::Draft,
            created_at: Utc::now(),
        };
        self.store
            .persist_weight_suggestion(&suggestion)
            .await
            .map_err(ctx.persistence())?;
        counter!(SUGGESTIONS_TOTAL).increment(1);

        ctx.enter(RunStage::Persisted);
        info!(
            target: "calibration",
            %run_id,
            suggestion_id = %suggestion.id,
            source_version = suggestion.source_version,
            suggested_version = suggestion.suggested_version,
            applied = ?correction.applied,
            "weight suggestion drafted"
        );

        Ok(CalibrationOutcome::Completed {
            calibration_run_id: run_id,
            metrics,
            weight_suggestion: Some(SuggestionView::from(&suggestion)),
            message: None,
        })
    }
}
