use std::collections::HashMap;
use std::sync::Arc;

use axum::{
    extract::{rejection::JsonRejection, Path, Query, State},
    http::StatusCode,
    response::{IntoResponse, Response},
    routing::{get, post, put},
    Json, Router,
};
use serde::Serialize;
use serde_json::json;
use tower_http::cors::CorsLayer;
use uuid::Uuid;

use crate::engine::CalibrationEngine;
use crate::error::{CalibrationError, RunFailure, RunStage};
use crate::model::{
    ActiveWeights, CalibrationCell, CalibrationOutcome, CalibrationRequest, CalibrationRun,
    ValidationRecord, WeightSuggestion, WeightVector,
};
use crate::store::{CalibrationStore, InMemoryStore};

/// Shared state. The engine talks to the store through the collaborator trait;
/// admin routes use the concrete store to stand in for the external
/// validation and governance processes.
#[derive(Clone)]
pub struct AppState {
    pub engine: Arc<CalibrationEngine>,
    pub store: Arc<InMemoryStore>,
}

impl AppState {
    pub fn new(store: Arc<InMemoryStore>, config: crate::config::CalibrationConfig) -> Self {
        let engine = CalibrationEngine::new(store.clone() as Arc<dyn CalibrationStore>, config);
        Self {
            engine: Arc::new(engine),
            store,
        }
    }
}

pub fn router(state: AppState) -> Router {
    Router::new()
        .route("/health", get(|| async { "ok" }))
        .route("/calibration/runs", post(trigger_run).get(list_runs))
        .route("/calibration/runs/{id}", get(get_run))
        .route("/calibration/suggestions/{id}", get(get_suggestion))
        .route("/admin/validation-samples", post(admin_record_samples))
        .route("/admin/weights/{tenant_id}", put(admin_activate_weights))
        .layer(CorsLayer::very_permissive())
        .with_state(state)
}

/* ----------------------------
Errors
---------------------------- */

pub enum ApiError {
    Run(RunFailure),
    /// Trigger body that could not be read as a calibration request.
    InvalidTrigger(JsonRejection),
    NotFound(String),
    BadRequest(String),
    Internal(anyhow::Error),
}

impl From<RunFailure> for ApiError {
    fn from(f: RunFailure) -> Self {
        Self::Run(f)
    }
}

impl From<anyhow::Error> for ApiError {
    fn from(e: anyhow::Error) -> Self {
        Self::Internal(e)
    }
}

fn status_for(e: &CalibrationError) -> StatusCode {
    match e {
        CalibrationError::MissingField(_) => StatusCode::BAD_REQUEST,
        CalibrationError::InvalidScore { .. } => StatusCode::UNPROCESSABLE_ENTITY,
        CalibrationError::UpstreamReadFailure(_) => StatusCode::BAD_GATEWAY,
        CalibrationError::PersistenceFailure(_) => StatusCode::INTERNAL_SERVER_ERROR,
        CalibrationError::VersionExhausted { .. } => StatusCode::CONFLICT,
    }
}

impl IntoResponse for ApiError {
    fn into_response(self) -> Response {
        let (status, body) = match self {
            Self::Run(f) => (
                status_for(&f.error),
                json!({
                    "error": f.error.to_string(),
                    "kind": f.error.kind(),
                    "state": f.state(),
                    "stage": f.stage,
                    "tenant_id": f.tenant_id,
                    "run_id": f.run_id,
                }),
            ),
            Self::InvalidTrigger(rejection) => (
                rejection.status(),
                json!({
                    "error": rejection.body_text(),
                    "kind": "invalid_request",
                    "state": RunStage::Failed,
                    "stage": RunStage::Requested,
                    "tenant_id": null,
                    "run_id": null,
                }),
            ),
            Self::NotFound(what) => (
                StatusCode::NOT_FOUND,
                json!({ "error": format!("{what} not found"), "kind": "not_found" }),
            ),
            Self::BadRequest(msg) => (
                StatusCode::BAD_REQUEST,
                json!({ "error": msg, "kind": "bad_request" }),
            ),
            Self::Internal(e) => (
                StatusCode::INTERNAL_SERVER_ERROR,
                json!({ "error": format!("{e:#}"), "kind": "internal" }),
            ),
        };
        (status, Json(body)).into_response()
    }
}

/* ----------------------------
Calibration
---------------------------- */

async fn trigger_run(
    State(state): State<AppState>,
    body: Result<Json<CalibrationRequest>, JsonRejection>,
) -> Result<Json<CalibrationOutcome>, ApiError> {
    let Json(req) = body.map_err(ApiError::InvalidTrigger)?;
    Ok(Json(state.engine.run(req).await?))
}

async fn list_runs(
    State(state): State<AppState>,
    Query(q): Query<HashMap<String, String>>,
) -> Result<Json<Vec<CalibrationRun>>, ApiError> {
    let tenant = q
        .get("tenant_id")
        .map(|s| s.trim())
        .filter(|s| !s.is_empty())
        .ok_or_else(|| ApiError::BadRequest("tenant_id query parameter is required".into()))?;
    Ok(Json(state.store.list_calibration_runs(tenant).await?))
}

#[derive(Serialize)]
struct RunDetail {
    run: CalibrationRun,
    cells: Vec<CalibrationCell>,
}

async fn get_run(
    State(state): State<AppState>,
    Path(id): Path<Uuid>,
) -> Result<Json<RunDetail>, ApiError> {
    let (run, cells) = state
        .store
        .fetch_calibration_run(id)
        .await?
        .ok_or_else(|| ApiError::NotFound(format!("calibration run {id}")))?;
    Ok(Json(RunDetail { run, cells }))
}

async fn get_suggestion(
    State(state): State<AppState>,
    Path(id): Path<Uuid>,
) -> Result<Json<WeightSuggestion>, ApiError> {
    state
        .store
        .fetch_weight_suggestion(id)
        .await?
        .map(Json)
        .ok_or_else(|| ApiError::NotFound(format!("weight suggestion {id}")))
}

/* ----------------------------
Admin (stand-ins for external processes)
---------------------------- */

async fn admin_record_samples(
    State(state): State<AppState>,
    Json(records): Json<Vec<ValidationRecord>>,
) -> Result<Json<serde_json::Value>, ApiError> {
    let stored = state.store.record_samples(records)?;
    Ok(Json(json!({ "stored": stored })))
}

async fn admin_activate_weights(
    State(state): State<AppState>,
    Path(tenant_id): Path<String>,
    Json(weights): Json<WeightVector>,
) -> Result<Json<ActiveWeights>, ApiError> {
    state
        .store
        .activate_weights(&tenant_id, weights)
        .map(Json)
        .map_err(|e| ApiError::BadRequest(format!("{e:#}")))
}
