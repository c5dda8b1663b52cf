//! Bucket classifier: continuous 0–100 scores → discrete risk/behavior buckets.
//!
//! Boundaries are closed-above and evaluated from the most favorable threshold
//! downward, so `score >= threshold` of the first matching row wins. Scores
//! outside [0, 100] (or non-finite) are rejected, never clamped.

use std::fmt;

use serde::{Deserialize, Serialize};

use crate::error::CalibrationError;

pub const SCORE_MIN: f64 = 0.0;
pub const SCORE_MAX: f64 = 100.0;

/// Model output bucket, ordered from highest confidence (very low risk) down.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum PredictedBucket {
    VeryLowRisk,
    LowRisk,
    MediumRisk,
    HighRisk,
}

/// Observed behavior bucket, ordered from best to worst.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ActualBucket {
    VeryGoodBehavior,
    GoodBehavior,
    AverageBehavior,
    PoorBehavior,
    VeryPoorBehavior,
}

const PREDICTED_THRESHOLDS: [(f64, PredictedBucket); 3] = [
    (85.0, PredictedBucket::VeryLowRisk),
    (70.0, PredictedBucket::LowRisk),
    (40.0, PredictedBucket::MediumRisk),
];

const ACTUAL_THRESHOLDS: [(f64, ActualBucket); 4] = [
    (85.0, ActualBucket::VeryGoodBehavior),
    (70.0, ActualBucket::GoodBehavior),
    (50.0, ActualBucket::AverageBehavior),
    (30.0, ActualBucket::PoorBehavior),
];

pub fn classify_predicted(score: f64) -> Result<PredictedBucket, CalibrationError> {
    let score = checked(score, "predicted")?;
    Ok(first_at_or_above(score, &PREDICTED_THRESHOLDS).unwrap_or(PredictedBucket::HighRisk))
}

pub fn classify_actual(score: f64) -> Result<ActualBucket, CalibrationError> {
    let score = checked(score, "actual")?;
    Ok(first_at_or_above(score, &ACTUAL_THRESHOLDS).unwrap_or(ActualBucket::VeryPoorBehavior))
}

/// Reject anything outside the closed score range.
pub fn checked(score: f64, field: &'static str) -> Result<f64, CalibrationError> {
    if score.is_finite() && (SCORE_MIN..=SCORE_MAX).contains(&score) {
        Ok(score)
    } else {
        Err(CalibrationError::InvalidScore {
            field,
            value: score,
        })
    }
}

fn first_at_or_above<B: Copy>(score: f64, table: &[(f64, B)]) -> Option<B> {
    table
        .iter()
        .find(|(threshold, _)| score >= *threshold)
        .map(|(_, bucket)| *bucket)
}

impl PredictedBucket {
    pub const ALL: [Self; 4] = [
        Self::VeryLowRisk,
        Self::LowRisk,
        Self::MediumRisk,
        Self::HighRisk,
    ];

    pub fn as_str(self) -> &'static str {
        match self {
            Self::VeryLowRisk => "very_low_risk",
            Self::LowRisk => "low_risk",
            Self::MediumRisk => "medium_risk",
            Self::HighRisk => "high_risk",
        }
    }
}

impl ActualBucket {
    pub const ALL: [Self; 5] = [
        Self::VeryGoodBehavior,
        Self::GoodBehavior,
        Self::AverageBehavior,
        Self::PoorBehavior,
        Self::VeryPoorBehavior,
    ];

    pub fn as_str(self) -> &'static str {
        match self {
            Self::VeryGoodBehavior => "very_good_behavior",
            Self::GoodBehavior => "good_behavior",
            Self::AverageBehavior => "average_behavior",
            Self::PoorBehavior => "poor_behavior",
            Self::VeryPoorBehavior => "very_poor_behavior",
        }
    }
}

impl fmt::Display for PredictedBucket {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl fmt::Display for ActualBucket {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}
