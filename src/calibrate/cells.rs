//! Cell aggregator: groups samples by (predicted bucket, actual bucket).
//!
//! The grid is sparse: only observed pairs produce a cell. Cells come out in
//! bucket order, and each cell's scores are sorted before any summation, so the
//! statistics are bit-identical for any permutation of the same sample set.

use std::collections::BTreeMap;

use serde::{Deserialize, Serialize};

use crate::calibrate::buckets::{
    classify_actual, classify_predicted, ActualBucket, PredictedBucket,
};
use crate::config::CellConfig;
use crate::error::CalibrationError;
use crate::model::{CalibrationCell, ValidationSample};

pub type CellKey = (PredictedBucket, ActualBucket);

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum GapDirection {
    Overestimate,
    Underestimate,
    Balanced,
}

impl GapDirection {
    /// `diff` is `avg_predicted - avg_actual` (difference of means, not the
    /// mean of differences).
    pub fn from_difference(diff: f64, tolerance: f64) -> Self {
        if diff > tolerance {
            Self::Overestimate
        } else if diff < -tolerance {
            Self::Underestimate
        } else {
            Self::Balanced
        }
    }
}

/// Classify every sample and build one cell per observed bucket pair.
/// Fails on the first out-of-range score.
pub fn aggregate(
    samples: &[ValidationSample],
    cfg: &CellConfig,
) -> Result<Vec<CalibrationCell>, CalibrationError> {
    let mut groups: BTreeMap<CellKey, Vec<ValidationSample>> = BTreeMap::new();
    for s in samples {
        let key = (
            classify_predicted(s.predicted_score)?,
            classify_actual(s.actual_score)?,
        );
        groups.entry(key).or_default().push(*s);
    }

    Ok(groups
        .into_iter()
        .map(|(key, mut members)| {
            members.sort_by(|a, b| {
                a.predicted_score
                    .total_cmp(&b.predicted_score)
                    .then(a.actual_score.total_cmp(&b.actual_score))
            });
            build_cell(key, &members, cfg)
        })
        .collect())
}

fn build_cell(
    (predicted_bucket, actual_bucket): CellKey,
    members: &[ValidationSample],
    cfg: &CellConfig,
) -> CalibrationCell {
    let n = members.len() as f64;
    let avg_predicted = members.iter().map(|s| s.predicted_score).sum::<f64>() / n;
    let avg_actual = members.iter().map(|s| s.actual_score).sum::<f64>() / n;
    let avg_gap = members.iter().map(ValidationSample::gap).sum::<f64>() / n;

    let (min_predicted, max_predicted) = min_max(members.iter().map(|s| s.predicted_score));
    let (min_actual, max_actual) = min_max(members.iter().map(|s| s.actual_score));

    CalibrationCell {
        predicted_bucket,
        actual_bucket,
        count: members.len(),
        avg_predicted,
        avg_actual,
        avg_gap,
        gap_direction: GapDirection::from_difference(
            avg_predicted - avg_actual,
            cfg.direction_tolerance,
        ),
        is_outlier: members.len() < cfg.outlier_min_count || avg_gap > cfg.outlier_max_avg_gap,
        min_predicted,
        max_predicted,
        min_actual,
        max_actual,
    }
}

fn min_max(values: impl Iterator<Item = f64>) -> (f64, f64) {
    values.fold((f64::INFINITY, f64::NEG_INFINITY), |(lo, hi), v| {
        (lo.min(v), hi.max(v))
    })
}
