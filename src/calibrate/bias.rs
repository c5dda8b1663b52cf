//! Bias analyzer.
//!
//! Bias patterns are a declarative table of `(pattern, predicted buckets,
//! actual buckets, nudge, rationale)` rows. Each pattern's ratio is the
//! sample-count-weighted share of non-outlier cells it matches; a ratio
//! strictly above `bias.significance_ratio` is significant. New patterns are
//! new rows, the scan itself does not change.

use std::fmt;

use serde::Serialize;

use crate::calibrate::buckets::{ActualBucket, PredictedBucket};
use crate::calibrate::corrector::WeightNudge;
use crate::config::BiasConfig;
use crate::model::CalibrationCell;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum BiasPattern {
    /// Model says low risk, people behave poorly.
    OverestimationLowRisk,
    /// Model says high risk, people behave well.
    UnderestimationHighRisk,
}

impl BiasPattern {
    pub fn as_str(self) -> &'static str {
        match self {
            Self::OverestimationLowRisk => "overestimation_low_risk",
            Self::UnderestimationHighRisk => "underestimation_high_risk",
        }
    }
}

impl fmt::Display for BiasPattern {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

#[derive(Debug, Clone, PartialEq)]
pub struct BiasRule {
    pub pattern: BiasPattern,
    pub predicted: &'static [PredictedBucket],
    pub actual: &'static [ActualBucket],
    pub nudge: WeightNudge,
    pub rationale: &'static str,
}

impl BiasRule {
    pub fn matches(&self, cell: &CalibrationCell) -> bool {
        self.predicted.contains(&cell.predicted_bucket) && self.actual.contains(&cell.actual_bucket)
    }
}

/// Applied in this order when significant.
pub const BIAS_RULES: &[BiasRule] = &[
    BiasRule {
        pattern: BiasPattern::OverestimationLowRisk,
        predicted: &[PredictedBucket::VeryLowRisk, PredictedBucket::LowRisk],
        actual: &[ActualBucket::PoorBehavior, ActualBucket::VeryPoorBehavior],
        nudge: WeightNudge {
            engagement: -0.03,
            completion: -0.02,
            feedback_quality: 0.0,
            compliance_linkage: 0.05,
        },
        rationale: "Overestimation in low-risk segments. Increasing compliance weight.",
    },
    BiasRule {
        pattern: BiasPattern::UnderestimationHighRisk,
        predicted: &[PredictedBucket::HighRisk, PredictedBucket::MediumRisk],
        actual: &[ActualBucket::GoodBehavior, ActualBucket::VeryGoodBehavior],
        nudge: WeightNudge {
            engagement: 0.01,
            completion: 0.0,
            feedback_quality: 0.02,
            compliance_linkage: -0.03,
        },
        rationale: "Underestimation in high-risk segments. Decreasing compliance weight.",
    },
];

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct BiasSignal {
    pub pattern: BiasPattern,
    /// Sum of counts of matching non-outlier cells.
    pub weighted_count: usize,
    pub ratio: f64,
    pub significant: bool,
}

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct BiasReport {
    /// Sum of counts of all non-outlier cells.
    pub total_weight: usize,
    /// One signal per rule, in rule order.
    pub signals: Vec<BiasSignal>,
}

impl BiasReport {
    pub fn signal(&self, pattern: BiasPattern) -> Option<&BiasSignal> {
        self.signals.iter().find(|s| s.pattern == pattern)
    }

    pub fn ratio(&self, pattern: BiasPattern) -> f64 {
        self.signal(pattern).map_or(0.0, |s| s.ratio)
    }

    pub fn is_significant(&self, pattern: BiasPattern) -> bool {
        self.signal(pattern).is_some_and(|s| s.significant)
    }

    pub fn overestimation_ratio(&self) -> f64 {
        self.ratio(BiasPattern::OverestimationLowRisk)
    }

    pub fn underestimation_ratio(&self) -> f64 {
        self.ratio(BiasPattern::UnderestimationHighRisk)
    }

    pub fn any_significant(&self) -> bool {
        self.signals.iter().any(|s| s.significant)
    }
}

/// Strict `>`: a ratio equal to the threshold is not significant.
pub fn is_significant(ratio: f64, threshold: f64) -> bool {
    ratio > threshold
}

pub fn analyze(cells: &[CalibrationCell], cfg: &BiasConfig) -> BiasReport {
    analyze_with_rules(cells, BIAS_RULES, cfg)
}

pub fn analyze_with_rules(
    cells: &[CalibrationCell],
    rules: &[BiasRule],
    cfg: &BiasConfig,
) -> BiasReport {
    let weighted: Vec<&CalibrationCell> = cells.iter().filter(|c| !c.is_outlier).collect();
    let total_weight: usize = weighted.iter().map(|c| c.count).sum();

    let signals = rules
        .iter()
        .map(|rule| {
            let weighted_count: usize = weighted
                .iter()
                .filter(|c| rule.matches(c))
                .map(|c| c.count)
                .sum();
            let ratio = if total_weight == 0 {
                0.0
            } else {
                weighted_count as f64 / total_weight as f64
            };
            BiasSignal {
                pattern: rule.pattern,
                weighted_count,
                ratio,
                significant: total_weight > 0 && is_significant(ratio, cfg.significance_ratio),
            }
        })
        .collect();

    BiasReport {
        total_weight,
        signals,
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::calibrate::cells::GapDirection;

    fn cell(p: PredictedBucket, a: ActualBucket, count: usize, outlier: bool) -> CalibrationCell {
        CalibrationCell {
            predicted_bucket: p,
            actual_bucket: a,
            count,
            avg_predicted: 0.0,
            avg_actual: 0.0,
            avg_gap: 0.0,
            gap_direction: GapDirection::Balanced,
            is_outlier: outlier,
            min_predicted: 0.0,
            max_predicted: 0.0,
            min_actual: 0.0,
            max_actual: 0.0,
        }
    }

    #[test]
    fn significance_is_strictly_greater() {
        assert!(!is_significant(0.2, 0.2));
        assert!(is_significant(0.2001, 0.2));
    }

    #[test]
    fn ratio_of_exactly_one_fifth_is_not_significant() {
        use ActualBucket::*;
        use PredictedBucket::*;
        let cells = vec![
            cell(LowRisk, PoorBehavior, 10, false),
            cell(MediumRisk, AverageBehavior, 40, false),
        ];
        let r = analyze(&cells, &BiasConfig::default());
        assert_eq!(r.total_weight, 50);
        assert_eq!(r.overestimation_ratio(), 0.2);
        assert!(!r.is_significant(BiasPattern::OverestimationLowRisk));
        assert!(!r.any_significant());
    }

    #[test]
    fn outliers_carry_no_weight() {
        use ActualBucket::*;
        use PredictedBucket::*;
        let cells = vec![
            cell(VeryLowRisk, VeryPoorBehavior, 30, false),
            cell(HighRisk, VeryGoodBehavior, 500, true),
            cell(MediumRisk, AverageBehavior, 70, false),
        ];
        let r = analyze(&cells, &BiasConfig::default());
        assert_eq!(r.total_weight, 100);
        assert!((r.overestimation_ratio() - 0.3).abs() < 1e-12);
        assert_eq!(r.underestimation_ratio(), 0.0);
        assert!(r.is_significant(BiasPattern::OverestimationLowRisk));
        assert!(!r.is_significant(BiasPattern::UnderestimationHighRisk));
    }

    #[test]
    fn both_patterns_can_fire() {
        use ActualBucket::*;
        use PredictedBucket::*;
        let cells = vec![
            cell(LowRisk, VeryPoorBehavior, 5, false),
            cell(MediumRisk, GoodBehavior, 5, false),
            cell(MediumRisk, AverageBehavior, 5, false),
        ];
        let r = analyze(&cells, &BiasConfig::default());
        assert!(r.is_significant(BiasPattern::OverestimationLowRisk));
        assert!(r.is_significant(BiasPattern::UnderestimationHighRisk));
        assert_eq!(r.signals.len(), BIAS_RULES.len());
    }

    #[test]
    fn zero_total_weight_is_quiet() {
        use ActualBucket::*;
        use PredictedBucket::*;
        let r = analyze(&[], &BiasConfig::default());
        assert_eq!(r.total_weight, 0);
        assert_eq!(r.overestimation_ratio(), 0.0);
        assert!(!r.any_significant());

        let all_outliers = vec![cell(VeryLowRisk, VeryPoorBehavior, 2, true)];
        let r = analyze(&all_outliers, &BiasConfig::default());
        assert_eq!(r.total_weight, 0);
        assert!(!r.any_significant());
    }

    #[test]
    fn medium_risk_with_poor_behavior_matches_nothing() {
        use ActualBucket::*;
        use PredictedBucket::*;
        let c = cell(MediumRisk, PoorBehavior, 3, false);
        assert!(BIAS_RULES.iter().all(|r| !r.matches(&c)));
    }
}
