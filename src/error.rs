//! Error taxonomy for calibration runs.
//!
//! `CalibrationError` is what individual steps raise; the orchestrator wraps the
//! first failure in a `RunFailure` carrying the stage, tenant and run id so the
//! caller can log and alert without digging through the chain.

use std::fmt;

use serde::Serialize;
use thiserror::Error;
use uuid::Uuid;

#[derive(Debug, Error)]
pub enum CalibrationError {
    #[error("missing required field: {0}")]
    MissingField(&'static str),

    #[error("invalid {field} score {value}: must be a finite value within [0, 100]")]
    InvalidScore { field: &'static str, value: f64 },

    #[error("upstream read failed: {0:#}")]
    UpstreamReadFailure(#[source] anyhow::Error),

    #[error("persistence failed: {0:#}")]
    PersistenceFailure(#[source] anyhow::Error),

    #[error("active weight version {version} has no successor version")]
    VersionExhausted { version: u32 },
}

impl CalibrationError {
    /// Stable, machine-readable name used in API error bodies and metrics labels.
    pub fn kind(&self) -> &'static str {
        match self {
            Self::MissingField(_) => "missing_field",
            Self::InvalidScore { .. } => "invalid_score",
            Self::UpstreamReadFailure(_) => "upstream_read_failure",
            Self::PersistenceFailure(_) => "persistence_failure",
            Self::VersionExhausted { .. } => "version_exhausted",
        }
    }
}

/// Orchestrator stages, in execution order.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum RunStage {
    /// Request received, nothing written yet.
    Requested,
    Created,
    Aggregating,
    Summarized,
    BiasAnalyzed,
    SuggestionDrafted,
    Persisted,
    /// Terminal state of any run whose step raised.
    Failed,
}

impl RunStage {
    pub fn as_str(self) -> &'static str {
        match self {
            Self::Requested => "requested",
            Self::Created => "created",
            Self::Aggregating => "aggregating",
            Self::Summarized => "summarized",
            Self::BiasAnalyzed => "bias_analyzed",
            Self::SuggestionDrafted => "suggestion_drafted",
            Self::Persisted => "persisted",
            Self::Failed => "failed",
        }
    }
}

impl fmt::Display for RunStage {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// First failure of a run, with enough context to locate the partial run row.
#[derive(Debug, Error)]
#[error("calibration failed at stage `{stage}` (tenant {tenant_id}, run {}): {error}", run_label(.run_id))]
pub struct RunFailure {
    pub stage: RunStage,
    pub tenant_id: String,
    pub run_id: Option<Uuid>,
    #[source]
    pub error: CalibrationError,
}

impl RunFailure {
    /// Terminal state of the run; `stage` is where it stopped.
    pub fn state(&self) -> RunStage {
        RunStage::Failed
    }
}

fn run_label(run_id: &Option<Uuid>) -> String {
    run_id
        .map(|id| id.to_string())
        .unwrap_or_else(|| "not created".to_string())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn run_failure_message_names_stage_and_tenant() {
        let f = RunFailure {
            stage: RunStage::Aggregating,
            tenant_id: "acme".into(),
            run_id: None,
            error: CalibrationError::InvalidScore {
                field: "predicted",
                value: 120.0,
            },
        };
        let msg = f.to_string();
        assert!(msg.contains("`aggregating`"), "{msg}");
        assert!(msg.contains("acme"), "{msg}");
        assert!(msg.contains("not created"), "{msg}");
        assert_eq!(f.error.kind(), "invalid_score");
        assert_eq!(f.state(), RunStage::Failed);
        assert_eq!(f.state().as_str(), "failed");
    }

    #[test]
    fn upstream_failure_keeps_source_chain() {
        let e = CalibrationError::UpstreamReadFailure(
            anyhow::anyhow!("connection reset").context("fetching samples"),
        );
        let msg = e.to_string();
        assert!(msg.contains("fetching samples"));
        assert!(msg.contains("connection reset"));
    }
}
