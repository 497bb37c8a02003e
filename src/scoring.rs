//! Hybrid risk scoring
//!
//! Ensembles the rule score and the model outputs into a single risk
//! score, then buckets it into a priority. Unavailable submodels drop out
//! of the ensemble and the remaining weights renormalize to sum to one,
//! so a degraded model set still yields a full-range score.

use serde::{Deserialize, Serialize};

use crate::core::{ModelScores, Priority};
use crate::rules::RuleOutcome;

/// Ensemble weights. The canonical calibration is
/// 0.30 rules / 0.25 anomaly / 0.30 failure / 0.15 next-window.
#[derive(Debug, Clone, Copy, Serialize, Deserialize)]
pub struct ScoreWeights {
    pub rule: f64,
    pub anomaly: f64,
    pub failure: f64,
    pub next_window: f64,
}

impl Default for ScoreWeights {
    fn default() -> Self {
        Self {
            rule: 0.30,
            anomaly: 0.25,
            failure: 0.30,
            next_window: 0.15,
        }
    }
}

/// Priority thresholds, closed on the low side: a risk score exactly at a
/// band boundary takes the higher priority.
#[derive(Debug, Clone, Copy, Serialize, Deserialize)]
pub struct PriorityBands {
    pub critical: f64,
    pub high: f64,
    pub medium: f64,
}

impl Default for PriorityBands {
    fn default() -> Self {
        Self {
            critical: 0.75,
            high: 0.55,
            medium: 0.35,
        }
    }
}

impl PriorityBands {
    pub fn bucket(&self, risk_score: f64) -> Priority {
        if risk_score >= self.critical {
            Priority::Critical
        } else if risk_score >= self.high {
            Priority::High
        } else if risk_score >= self.medium {
            Priority::Medium
        } else {
            Priority::Low
        }
    }
}

/// Result of the scoring pass
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct RiskAssessment {
    pub risk_score: f64,
    pub priority: Priority,
    pub is_anomaly: bool,
}

/// Weighted ensemble over rules and model scores
#[derive(Debug, Clone, Default)]
pub struct HybridScorer {
    weights: ScoreWeights,
    bands: PriorityBands,
}

impl HybridScorer {
    pub fn new(weights: ScoreWeights, bands: PriorityBands) -> Self {
        Self { weights, bands }
    }

    /// Combine the rule outcome with the model scores. Terms whose
    /// submodel is unavailable are omitted and the remaining weights are
    /// renormalized; the rule term is always present, so with every
    /// submodel down the risk score reduces to the rule score.
    pub fn score(&self, rules: &RuleOutcome, models: &ModelScores) -> RiskAssessment {
        let mut weighted = self.weights.rule * rules.rule_score;
        let mut weight_sum = self.weights.rule;

        if let Some(anomaly) = models.anomaly_score {
            weighted += self.weights.anomaly * anomaly;
            weight_sum += self.weights.anomaly;
        }
        if let Some(failure) = models.failure_probability {
            weighted += self.weights.failure * failure;
            weight_sum += self.weights.failure;
        }
        if let Some(next) = models.next_window_failure_probability {
            weighted += self.weights.next_window * next;
            weight_sum += self.weights.next_window;
        }

        let risk_score = (weighted / weight_sum).clamp(0.0, 1.0);
        let priority = self.bands.bucket(risk_score);
        let is_anomaly = priority >= Priority::Medium || rules.fired();

        RiskAssessment {
            risk_score,
            priority,
            is_anomaly,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::core::RuleAlert;

    fn rules(score: f64, alerts: Vec<RuleAlert>) -> RuleOutcome {
        RuleOutcome {
            alerts,
            rule_score: score,
        }
    }

    fn full_scores(anomaly: f64, failure: f64, next: f64) -> ModelScores {
        ModelScores {
            anomaly_score: Some(anomaly),
            failure_probability: Some(failure),
            cluster_id: Some(0),
            cluster_distance: Some(0.2),
            next_window_failure_probability: Some(next),
            unavailable: Vec::new(),
        }
    }

    #[test]
    fn test_canonical_weighting() {
        let scorer = HybridScorer::default();
        let assessment = scorer.score(&rules(0.4, vec![RuleAlert::ErrorBurst]), &full_scores(0.8, 0.9, 0.6));
        let expected = 0.30 * 0.4 + 0.25 * 0.8 + 0.30 * 0.9 + 0.15 * 0.6;
        assert!((assessment.risk_score - expected).abs() < 1e-12);
    }

    #[test]
    fn test_band_boundaries_are_inclusive() {
        let bands = PriorityBands::default();
        assert_eq!(bands.bucket(0.75), Priority::Critical);
        assert_eq!(bands.bucket(0.55), Priority::High);
        assert_eq!(bands.bucket(0.35), Priority::Medium);
        assert_eq!(bands.bucket(0.349_999), Priority::Low);
        assert_eq!(bands.bucket(0.74), Priority::High);
    }

    #[test]
    fn test_all_models_down_reduces_to_rule_score() {
        let scorer = HybridScorer::default();
        let assessment = scorer.score(&rules(0.6, vec![RuleAlert::RateSpike]), &ModelScores::default());
        assert!((assessment.risk_score - 0.6).abs() < 1e-12);
        assert_eq!(assessment.priority, Priority::High);
    }

    #[test]
    fn test_partial_renormalization() {
        // Anomaly term missing: weights renormalize over 0.30 + 0.30 + 0.15
        let scorer = HybridScorer::default();
        let models = ModelScores {
            anomaly_score: None,
            failure_probability: Some(1.0),
            next_window_failure_probability: Some(1.0),
            ..ModelScores::default()
        };
        let assessment = scorer.score(&rules(0.0, Vec::new()), &models);
        let expected = (0.30 * 1.0 + 0.15 * 1.0) / (0.30 + 0.30 + 0.15);
        assert!((assessment.risk_score - expected).abs() < 1e-12);
    }

    #[test]
    fn test_is_anomaly_from_priority_or_alerts() {
        let scorer = HybridScorer::default();

        // Medium priority without alerts
        let assessment = scorer.score(&rules(0.0, Vec::new()), &full_scores(0.9, 0.5, 0.5));
        assert!(assessment.priority >= Priority::Medium);
        assert!(assessment.is_anomaly);

        // An alert without reaching Medium
        let assessment = scorer.score(&rules(0.2, vec![RuleAlert::LargePayload]), &full_scores(0.1, 0.05, 0.05));
        assert_eq!(assessment.priority, Priority::Low);
        assert!(assessment.is_anomaly);

        // Neither
        let assessment = scorer.score(&rules(0.0, Vec::new()), &full_scores(0.1, 0.05, 0.05));
        assert!(!assessment.is_anomaly);
    }

    #[test]
    fn test_deterministic() {
        let scorer = HybridScorer::default();
        let a = scorer.score(&rules(0.4, vec![RuleAlert::ErrorBurst]), &full_scores(0.7, 0.8, 0.5));
        let b = scorer.score(&rules(0.4, vec![RuleAlert::ErrorBurst]), &full_scores(0.7, 0.8, 0.5));
        assert_eq!(a, b);
    }
}
