// src/calibrate/mod.rs
//! Calibration pipeline primitives. Everything in here is pure: no I/O, no
//! clocks, no shared state.
//!
//! Order: buckets → cells → summary → bias → corrector.

pub mod bias;
pub mod buckets;
pub mod cells;
pub mod corrector;
pub mod summary;

pub use crate::calibrate::bias::{
    analyze, BiasPattern, BiasReport, BiasRule, BiasSignal, BIAS_RULES,
};
pub use crate::calibrate::buckets::{
    classify_actual, classify_predicted, ActualBucket, PredictedBucket,
};
pub use crate::calibrate::cells::{aggregate, GapDirection};
pub use crate::calibrate::corrector::{correct, Correction, WeightNudge, NO_BIAS_RATIONALE};
pub use crate::calibrate::summary::{summarize, OverallStatus, RunMetrics};
