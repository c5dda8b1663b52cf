// src/config.rs
//! Calibration thresholds loaded from TOML.
//!
//! Every field has a default, so an empty file (or no file at all) yields the
//! stock heuristic. Bucket boundaries are not configurable.
//!
//! ```toml
//! [cells]
//! outlier_min_count = 3
//! outlier_max_avg_gap = 25.0
//! direction_tolerance = 5.0
//!
//! [status]
//! good_max_gap = 10.0
//! good_min_correlation = 75.0
//! needs_tuning_max_gap = 20.0
//!
//! [bias]
//! significance_ratio = 0.2
//!
//! [weights]
//! min_weight = 0.10
//! max_weight = 0.50
//! ```

use anyhow::{bail, Context, Result};
use serde::Deserialize;
use std::fs;
use std::path::{Path, PathBuf};
use tracing::info;

pub const DEFAULT_CALIBRATION_CONFIG_PATH: &str = "config/calibration.toml";
pub const ENV_CALIBRATION_CONFIG_PATH: &str = "CALIBRATION_CONFIG_PATH";

#[derive(Debug, Clone, Default, PartialEq, Deserialize)]
#[serde(default, deny_unknown_fields)]
pub struct CalibrationConfig {
    pub cells: CellConfig,
    pub status: StatusConfig,
    pub bias: BiasConfig,
    pub weights: WeightBounds,
}

#[derive(Debug, Clone, PartialEq, Deserialize)]
#[serde(default, deny_unknown_fields)]
pub struct CellConfig {
    /// Cells with fewer samples than this are outliers.
    pub outlier_min_count: usize,
    /// Cells whose mean per-sample gap exceeds this are outliers.
    pub outlier_max_avg_gap: f64,
    /// `avg_predicted - avg_actual` beyond ±this is a directional gap.
    pub direction_tolerance: f64,
}

impl Default for CellConfig {
    fn default() -> Self {
        Self {
            outlier_min_count: 3,
            outlier_max_avg_gap: 25.0,
            direction_tolerance: 5.0,
        }
    }
}

#[derive(Debug, Clone, PartialEq, Deserialize)]
#[serde(default, deny_unknown_fields)]
pub struct StatusConfig {
    pub good_max_gap: f64,
    pub good_min_correlation: f64,
    pub needs_tuning_max_gap: f64,
}

impl Default for StatusConfig {
    fn default() -> Self {
        Self {
            good_max_gap: 10.0,
            good_min_correlation: 75.0,
            needs_tuning_max_gap: 20.0,
        }
    }
}

#[derive(Debug, Clone, PartialEq, Deserialize)]
#[serde(default, deny_unknown_fields)]
pub struct BiasConfig {
    /// A pattern ratio strictly above this is significant.
    pub significance_ratio: f64,
}

impl Default for BiasConfig {
    fn default() -> Self {
        Self {
            significance_ratio: 0.2,
        }
    }
}

#[derive(Debug, Clone, PartialEq, Deserialize)]
#[serde(default, deny_unknown_fields)]
pub struct WeightBounds {
    pub min_weight: f64,
    pub max_weight: f64,
}

impl Default for WeightBounds {
    fn default() -> Self {
        Self {
            min_weight: 0.10,
            max_weight: 0.50,
        }
    }
}

impl CalibrationConfig {
    /// Load from `$CALIBRATION_CONFIG_PATH` or `config/calibration.toml`.
    /// A missing file means defaults; a malformed one is an error.
    pub fn from_env() -> Result<Self> {
        let path = std::env::var(ENV_CALIBRATION_CONFIG_PATH)
            .map(PathBuf::from)
            .unwrap_or_else(|_| PathBuf::from(DEFAULT_CALIBRATION_CONFIG_PATH));
        if !path.exists() {
            info!(
                target: "calibration",
                path = %path.display(),
                "calibration config not found; using defaults"
            );
            return Ok(Self::default());
        }
        Self::from_path(&path)
    }

    pub fn from_path(path: &Path) -> Result<Self> {
        let content = fs::read_to_string(path)
            .with_context(|| format!("reading calibration config from {}", path.display()))?;
        Self::from_toml_str(&content)
            .with_context(|| format!("parsing calibration config at {}", path.display()))
    }

    pub fn from_toml_str(s: &str) -> Result<Self> {
        let cfg: Self = toml::from_str(s)?;
        cfg.validate()?;
        Ok(cfg)
    }

    pub fn validate(&self) -> Result<()> {
        let finite = [
            self.cells.outlier_max_avg_gap,
            self.cells.direction_tolerance,
            self.status.good_max_gap,
            self.status.good_min_correlation,
            self.status.needs_tuning_max_gap,
            self.bias.significance_ratio,
            self.weights.min_weight,
            self.weights.max_weight,
        ];
        if finite.iter().any(|v| !v.is_finite() || *v < 0.0) {
            bail!("calibration thresholds must be finite and non-negative");
        }
        if self.status.good_max_gap > self.status.needs_tuning_max_gap {
            bail!("status.good_max_gap must not exceed status.needs_tuning_max_gap");
        }
        let WeightBounds {
            min_weight,
            max_weight,
        } = self.weights;
        if min_weight > max_weight {
            bail!("weights.min_weight ({min_weight}) exceeds weights.max_weight ({max_weight})");
        }
        // Four components must be able to sum to 1 inside the bounds.
        if min_weight * 4.0 > 1.0 || max_weight * 4.0 < 1.0 {
            bail!("weight bounds [{min_weight}, {max_weight}] cannot hold four weights summing to 1");
        }
        Ok(())
    }
}
