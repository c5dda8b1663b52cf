//! model.rs: data shapes shared by the engine, the store and the HTTP layer.
//!
//! Runs, cells and suggestions are write-once records: the engine builds them,
//! hands them to the store and never mutates them afterwards (the single
//! exception is the metrics update of a run once aggregation completes).

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use uuid::Uuid;

use crate::calibrate::buckets::{ActualBucket, PredictedBucket};
use crate::calibrate::cells::GapDirection;
use crate::calibrate::summary::{OverallStatus, RunMetrics};
use crate::error::CalibrationError;

/// One paired observation consumed by the engine.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct ValidationSample {
    pub predicted_score: f64,
    pub actual_score: f64,
}

impl ValidationSample {
    pub fn new(predicted_score: f64, actual_score: f64) -> Self {
        Self {
            predicted_score,
            actual_score,
        }
    }

    /// Absolute difference between prediction and observed behavior.
    pub fn gap(&self) -> f64 {
        (self.predicted_score - self.actual_score).abs()
    }
}

/// Raw validation row as written by the external validation process.
/// Either score may be missing; such rows never reach the engine.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ValidationRecord {
    pub tenant_id: String,
    pub model_version: String,
    #[serde(default)]
    pub predicted_score: Option<f64>,
    #[serde(default)]
    pub actual_score: Option<f64>,
    #[serde(default = "Utc::now")]
    pub recorded_at: DateTime<Utc>,
}

impl ValidationRecord {
    pub fn sample(&self) -> Option<ValidationSample> {
        Some(ValidationSample::new(self.predicted_score?, self.actual_score?))
    }
}

/// Optional time window; both ends inclusive.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct Period {
    pub start: Option<DateTime<Utc>>,
    pub end: Option<DateTime<Utc>>,
}

impl Period {
    pub fn contains(&self, ts: DateTime<Utc>) -> bool {
        self.start.map_or(true, |s| ts >= s) && self.end.map_or(true, |e| ts <= e)
    }

    pub fn is_unbounded(&self) -> bool {
        self.start.is_none() && self.end.is_none()
    }
}

/// Mixture weights of the upstream impact-scoring model.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct WeightVector {
    pub engagement: f64,
    pub completion: f64,
    pub feedback_quality: f64,
    pub compliance_linkage: f64,
}

impl WeightVector {
    pub const UNIFORM: Self = Self {
        engagement: 0.25,
        completion: 0.25,
        feedback_quality: 0.25,
        compliance_linkage: 0.25,
    };

    pub fn new(
        engagement: f64,
        completion: f64,
        feedback_quality: f64,
        compliance_linkage: f64,
    ) -> Self {
        Self {
            engagement,
            completion,
            feedback_quality,
            compliance_linkage,
        }
    }

    pub fn sum(&self) -> f64 {
        self.engagement + self.completion + self.feedback_quality + self.compliance_linkage
    }

    /// Apply `f` to each component.
    pub fn map(self, f: impl Fn(f64) -> f64) -> Self {
        Self {
            engagement: f(self.engagement),
            completion: f(self.completion),
            feedback_quality: f(self.feedback_quality),
            compliance_linkage: f(self.compliance_linkage),
        }
    }

    pub fn components(&self) -> [f64; 4] {
        [
            self.engagement,
            self.completion,
            self.feedback_quality,
            self.compliance_linkage,
        ]
    }
}

/// A versioned weight vector owned by a tenant.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ActiveWeights {
    pub tenant_id: String,
    pub version: u32,
    pub weights: WeightVector,
}

/// Aggregate for one (predicted bucket, actual bucket) pair within a run.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct CalibrationCell {
    pub predicted_bucket: PredictedBucket,
    pub actual_bucket: ActualBucket,
    pub count: usize,
    pub avg_predicted: f64,
    pub avg_actual: f64,
    pub avg_gap: f64,
    pub gap_direction: GapDirection,
    pub is_outlier: bool,
    pub min_predicted: f64,
    pub max_predicted: f64,
    pub min_actual: f64,
    pub max_actual: f64,
}

/// One execution of the engine. Created with `sample_size = 0`, updated once
/// with final metrics.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct CalibrationRun {
    pub id: Uuid,
    pub tenant_id: String,
    pub model_version: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub period_start: Option<DateTime<Utc>>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub period_end: Option<DateTime<Utc>>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub run_label: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub description: Option<String>,
    pub sample_size: usize,
    pub avg_gap: Option<f64>,
    pub max_gap: Option<f64>,
    pub min_gap: Option<f64>,
    pub correlation_score: Option<f64>,
    pub overall_status: Option<OverallStatus>,
    pub created_at: DateTime<Utc>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub completed_at: Option<DateTime<Utc>>,
}

impl CalibrationRun {
    /// Fresh run shell for a validated request.
    pub fn start(req: &ValidatedRequest) -> Self {
        Self {
            id: Uuid::new_v4(),
            tenant_id: req.tenant_id.clone(),
            model_version: req.model_version.clone(),
            period_start: req.period.start,
            period_end: req.period.end,
            run_label: req.run_label.clone(),
            description: req.description.clone(),
            sample_size: 0,
            avg_gap: None,
            max_gap: None,
            min_gap: None,
            correlation_score: None,
            overall_status: None,
            created_at: Utc::now(),
            completed_at: None,
        }
    }

    /// Final metrics, applied exactly once.
    pub fn with_metrics(mut self, m: &RunMetrics) -> Self {
        self.sample_size = m.sample_size;
        self.avg_gap = Some(m.avg_gap);
        self.max_gap = Some(m.max_gap);
        self.min_gap = Some(m.min_gap);
        self.correlation_score = Some(m.correlation_score);
        self.overall_status = Some(m.overall_status);
        self.completed_at = Some(Utc::now());
        self
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum SuggestionStatus {
    Draft,
    Accepted,
    Rejected,
}

/// Proposed next weight vector derived from one run.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct WeightSuggestion {
    pub id: Uuid,
    pub calibration_run_id: Uuid,
    pub tenant_id: String,
    pub source_version: u32,
    pub suggested_version: u32,
    pub weights: WeightVector,
    pub rationale: String,
    pub status: SuggestionStatus,
    pub created_at: DateTime<Utc>,
}

/* ----------------------------
Trigger contract
---------------------------- */

/// Incoming trigger. Required fields are optional here so that their absence
/// surfaces as `MissingField` rather than a deserialization error.
#[derive(Debug, Clone, Default, Deserialize)]
pub struct CalibrationRequest {
    #[serde(default)]
    pub tenant_id: Option<String>,
    #[serde(default)]
    pub model_version: Option<String>,
    #[serde(default)]
    pub period_start: Option<DateTime<Utc>>,
    #[serde(default)]
    pub period_end: Option<DateTime<Utc>>,
    #[serde(default)]
    pub run_label: Option<String>,
    #[serde(default)]
    pub description: Option<String>,
}

impl CalibrationRequest {
    pub fn new(tenant_id: impl Into<String>, model_version: impl Into<String>) -> Self {
        Self {
            tenant_id: Some(tenant_id.into()),
            model_version: Some(model_version.into()),
            ..Default::default()
        }
    }

    /// Blank strings count as missing.
    pub fn validate(self) -> Result<ValidatedRequest, CalibrationError> {
        let tenant_id =
            non_blank(self.tenant_id).ok_or(CalibrationError::MissingField("tenant_id"))?;
        let model_version =
            non_blank(self.model_version).ok_or(CalibrationError::MissingField("model_version"))?;
        Ok(ValidatedRequest {
            tenant_id,
            model_version,
            period: Period {
                start: self.period_start,
                end: self.period_end,
            },
            run_label: self.run_label,
            description: self.description,
        })
    }
}

fn non_blank(v: Option<String>) -> Option<String> {
    v.map(|s| s.trim().to_string()).filter(|s| !s.is_empty())
}

#[derive(Debug, Clone, PartialEq)]
pub struct ValidatedRequest {
    pub tenant_id: String,
    pub model_version: String,
    pub period: Period,
    pub run_label: Option<String>,
    pub description: Option<String>,
}

pub const NO_DATA_MESSAGE: &str = "No validation data available for calibration";
pub const NO_ACTIVE_WEIGHTS_MESSAGE: &str =
    "No active weight configuration found for tenant; weight suggestion skipped";

/// Suggestion as returned to the caller.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct SuggestionView {
    pub id: Uuid,
    pub source_version: u32,
    pub suggested_version: u32,
    pub weights: WeightVector,
    pub rationale: String,
}

impl From<&WeightSuggestion> for SuggestionView {
    fn from(s: &WeightSuggestion) -> Self {
        Self {
            id: s.id,
            source_version: s.source_version,
            suggested_version: s.suggested_version,
            weights: s.weights,
            rationale: s.rationale.clone(),
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
pub struct EmptyMetrics {
    pub sample_size: usize,
}

/// Result of a run as seen by the caller.
#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(untagged)]
pub enum CalibrationOutcome {
    NoData {
        calibration_run_id: Uuid,
        message: String,
        metrics: EmptyMetrics,
    },
    Completed {
        calibration_run_id: Uuid,
        metrics: RunMetrics,
        weight_suggestion: Option<SuggestionView>,
        #[serde(skip_serializing_if = "Option::is_none")]
        message: Option<String>,
    },
}

impl CalibrationOutcome {
    pub fn run_id(&self) -> Uuid {
        match self {
            Self::NoData {
                calibration_run_id, ..
            }
            | Self::Completed {
                calibration_run_id, ..
            } => *calibration_run_id,
        }
    }

    pub fn weight_suggestion(&self) -> Option<&SuggestionView> {
        match self {
            Self::Completed {
                weight_suggestion, ..
            } => weight_suggestion.as_ref(),
            Self::NoData { .. } => None,
        }
    }
}
