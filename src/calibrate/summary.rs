//! Run-level metrics over individual sample gaps (not cell gaps).

use std::fmt;

use serde::{Deserialize, Serialize};

use crate::config::StatusConfig;
use crate::model::ValidationSample;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum OverallStatus {
    Good,
    NeedsTuning,
    Bad,
}

impl OverallStatus {
    /// `good` needs both a small gap and a high correlation score; otherwise a
    /// gap within the tuning band is `needs_tuning`.
    pub fn classify(avg_gap: f64, correlation_score: f64, cfg: &StatusConfig) -> Self {
        if avg_gap <= cfg.good_max_gap && correlation_score >= cfg.good_min_correlation {
            Self::Good
        } else if avg_gap <= cfg.needs_tuning_max_gap {
            Self::NeedsTuning
        } else {
            Self::Bad
        }
    }

    pub fn as_str(self) -> &'static str {
        match self {
            Self::Good => "good",
            Self::NeedsTuning => "needs_tuning",
            Self::Bad => "bad",
        }
    }
}

impl fmt::Display for OverallStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct RunMetrics {
    pub sample_size: usize,
    pub avg_gap: f64,
    pub max_gap: f64,
    pub min_gap: f64,
    pub correlation_score: f64,
    pub overall_status: OverallStatus,
}

/// `correlation_score = max(0, 100 - avg_gap)`.
pub fn correlation_score(avg_gap: f64) -> f64 {
    (100.0 - avg_gap).max(0.0)
}

/// `None` for an empty sample set: that run has no metrics beyond
/// `sample_size = 0`.
pub fn summarize(samples: &[ValidationSample], cfg: &StatusConfig) -> Option<RunMetrics> {
    if samples.is_empty() {
        return None;
    }

    // Sorted so the sum does not depend on sample order.
    let mut gaps: Vec<f64> = samples.iter().map(ValidationSample::gap).collect();
    gaps.sort_by(f64::total_cmp);

    let avg_gap = gaps.iter().sum::<f64>() / gaps.len() as f64;
    let min_gap = gaps[0];
    let max_gap = gaps[gaps.len() - 1];
    let correlation_score = correlation_score(avg_gap);

    Some(RunMetrics {
        sample_size: samples.len(),
        avg_gap,
        max_gap,
        min_gap,
        correlation_score,
        overall_status: OverallStatus::classify(avg_gap, correlation_score, cfg),
    })
}
