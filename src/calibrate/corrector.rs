//! Weight corrector: bias signals → proposed weight vector.
//!
//! Significant patterns apply their additive nudge, in rule order, to a working
//! copy of the active weights. Post-processing is always
//! normalize → clamp each weight → normalize. The second normalization can push
//! a weight slightly outside the clamp bounds; that is the expected output and
//! must not be collapsed into a single clamped normalization.

use serde::{Deserialize, Serialize};

use crate::calibrate::bias::{BiasPattern, BiasReport, BiasRule, BIAS_RULES};
use crate::config::WeightBounds;
use crate::model::WeightVector;

pub const NO_BIAS_RATIONALE: &str = "No significant bias detected. Weights are well-calibrated.";

/// Additive per-component delta.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct WeightNudge {
    pub engagement: f64,
    pub completion: f64,
    pub feedback_quality: f64,
    pub compliance_linkage: f64,
}

impl WeightNudge {
    pub fn apply(&self, w: WeightVector) -> WeightVector {
        WeightVector {
            engagement: w.engagement + self.engagement,
            completion: w.completion + self.completion,
            feedback_quality: w.feedback_quality + self.feedback_quality,
            compliance_linkage: w.compliance_linkage + self.compliance_linkage,
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct Correction {
    pub weights: WeightVector,
    pub rationale: String,
    /// Patterns whose nudge was applied, in application order.
    pub applied: Vec<BiasPattern>,
}

pub fn correct(current: &WeightVector, report: &BiasReport, bounds: &WeightBounds) -> Correction {
    correct_with_rules(current, report, BIAS_RULES, bounds)
}

pub fn correct_with_rules(
    current: &WeightVector,
    report: &BiasReport,
    rules: &[BiasRule],
    bounds: &WeightBounds,
) -> Correction {
    let mut working = *current;
    let mut reasons = Vec::new();
    let mut applied = Vec::new();

    for rule in rules.iter().filter(|r| report.is_significant(r.pattern)) {
        working = rule.nudge.apply(working);
        reasons.push(rule.rationale);
        applied.push(rule.pattern);
    }

    let rationale = if reasons.is_empty() {
        NO_BIAS_RATIONALE.to_string()
    } else {
        reasons.join(" ")
    };

    Correction {
        weights: finalize(working, bounds),
        rationale,
        applied,
    }
}

/// normalize → clamp → normalize.
pub fn finalize(w: WeightVector, bounds: &WeightBounds) -> WeightVector {
    let clamped = normalize(w).map(|x| x.clamp(bounds.min_weight, bounds.max_weight));
    normalize(clamped)
}

/// Scale to sum 1. A degenerate vector (non-positive or non-finite sum, or any
/// non-finite component) becomes uniform.
pub fn normalize(w: WeightVector) -> WeightVector {
    let sum = w.sum();
    if !sum.is_finite() || sum <= f64::EPSILON || w.components().iter().any(|x| !x.is_finite()) {
        return WeightVector::UNIFORM;
    }
    w.map(|x| x / sum)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::calibrate::bias::BiasSignal;

    fn report(over: bool, under: bool) -> BiasReport {
        let sig = |pattern, significant: bool| BiasSignal {
            pattern,
            weighted_count: if significant { 10 } else { 0 },
            ratio: if significant { 0.5 } else { 0.0 },
            significant,
        };
        BiasReport {
            total_weight: 20,
            signals: vec![
                sig(BiasPattern::OverestimationLowRisk, over),
                sig(BiasPattern::UnderestimationHighRisk, under),
            ],
        }
    }

    fn close(a: f64, b: f64) -> bool {
        (a - b).abs() < 1e-9
    }

    #[test]
    fn no_bias_keeps_weights_and_uses_fixed_rationale() {
        let w = WeightVector::new(0.3, 0.3, 0.2, 0.2);
        let c = correct(&w, &report(false, false), &WeightBounds::default());
        assert_eq!(c.rationale, NO_BIAS_RATIONALE);
        assert!(c.applied.is_empty());
        for (got, want) in c.weights.components().iter().zip(w.components()) {
            assert!(close(*got, want));
        }
    }

    #[test]
    fn overestimation_raises_compliance() {
        let w = WeightVector::new(0.3, 0.3, 0.2, 0.2);
        let c = correct(&w, &report(true, false), &WeightBounds::default());
        // nudged: 0.27, 0.28, 0.20, 0.25 (sum 1.0), all inside bounds
        assert!(close(c.weights.engagement, 0.27));
        assert!(close(c.weights.completion, 0.28));
        assert!(close(c.weights.feedback_quality, 0.20));
        assert!(close(c.weights.compliance_linkage, 0.25));
        assert_eq!(
            c.rationale,
            "Overestimation in low-risk segments. Increasing compliance weight."
        );
    }

    #[test]
    fn both_patterns_apply_in_order() {
        let w = WeightVector::UNIFORM;
        let c = correct(&w, &report(true, true), &WeightBounds::default());
        assert_eq!(
            c.applied,
            vec![
                BiasPattern::OverestimationLowRisk,
                BiasPattern::UnderestimationHighRisk
            ]
        );
        assert!(c.rationale.starts_with("Overestimation"));
        assert!(c.rationale.ends_with("Decreasing compliance weight."));
        // net: engagement -0.02, completion -0.02, feedback +0.02, compliance +0.02
        assert!(close(c.weights.engagement, 0.23));
        assert!(close(c.weights.completion, 0.23));
        assert!(close(c.weights.feedback_quality, 0.27));
        assert!(close(c.weights.compliance_linkage, 0.27));
    }

    #[test]
    fn two_pass_order_is_preserved() {
        // normalize → [0.7, 0.1, 0.1, 0.1]; clamp → [0.5, 0.1, 0.1, 0.1];
        // normalize → [0.5/0.8, 0.125, 0.125, 0.125]
        let w = WeightVector::new(7.0, 1.0, 1.0, 1.0);
        let out = finalize(w, &WeightBounds::default());
        assert!(close(out.engagement, 0.625));
        assert!(close(out.completion, 0.125));
        assert!(close(out.sum(), 1.0));
        // The final value drifts above max_weight.
        assert!(out.engagement > 0.5);
    }

    #[test]
    fn degenerate_inputs_still_yield_valid_vector() {
        let b = WeightBounds::default();
        for w in [
            WeightVector::new(0.0, 0.0, 0.0, 0.0),
            WeightVector::new(-1.0, -1.0, -1.0, -1.0),
            WeightVector::new(f64::NAN, 0.2, 0.2, 0.2),
            WeightVector::new(f64::INFINITY, 0.2, 0.2, 0.2),
        ] {
            let out = finalize(w, &b);
            assert!(close(out.sum(), 1.0), "{w:?} -> {out:?}");
            assert!(out.components().iter().all(|x| *x >= 0.0));
        }
    }

    #[test]
    fn output_always_sums_to_one_and_is_non_negative() {
        use rand::Rng;
        let mut rng = rand::rng();
        let b = WeightBounds::default();
        for _ in 0..2_000 {
            let w = WeightVector::new(
                rng.random_range(0.0..1.0),
                rng.random_range(0.0..1.0),
                rng.random_range(0.0..1.0),
                rng.random_range(0.0..1.0),
            );
            let flags = (rng.random_bool(0.5), rng.random_bool(0.5));
            let c = correct(&w, &report(flags.0, flags.1), &b);
            assert!(close(c.weights.sum(), 1.0), "{w:?} -> {:?}", c.weights);
            assert!(c.weights.components().iter().all(|x| *x >= 0.0));
        }
    }
}
