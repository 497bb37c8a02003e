//! Root cause classification
//!
//! Maps a scored window to one primary root cause tag plus the full set
//! of contributing conditions. Pure function of the feature vector and
//! model scores.

use serde::{Deserialize, Serialize};

use crate::core::{Condition, ModelScores, RootCause};
use crate::features::FeatureVector;

/// Thresholds for the diagnostic conditions
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct RootCauseConfig {
    /// Mean latency above which a latency bottleneck is suspected
    pub latency_ms: f64,
    /// Error rate a latency bottleneck must stay under
    pub latency_max_error_rate: f64,
    /// Error rate at which the backend counts as unstable
    pub error_rate: f64,
    /// Baseline requests per second; a surge is twice this
    pub baseline_rate: f64,
    /// Parameter repetition above which abuse is suspected
    pub abuse_repetition: f64,
    /// Cluster id trained to capture bot-like behavior
    pub bot_cluster: u8,
}

impl Default for RootCauseConfig {
    fn default() -> Self {
        Self {
            latency_ms: 800.0,
            latency_max_error_rate: 0.3,
            error_rate: 0.3,
            baseline_rate: 5.0,
            abuse_repetition: 0.7,
            bot_cluster: 2,
        }
    }
}

/// Classification result
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct RootCauseResult {
    pub root_cause: RootCause,
    pub contributing_conditions: Vec<Condition>,
    pub confidence: f64,
}

/// Rule-ordered root cause classifier
#[derive(Debug, Clone, Default)]
pub struct RootCauseClassifier {
    config: RootCauseConfig,
}

impl RootCauseClassifier {
    pub fn new(config: RootCauseConfig) -> Self {
        Self { config }
    }

    /// Evaluate the four conditions in order and derive the primary tag:
    /// exactly one condition names its own cause, two or more co-occurring
    /// conditions collapse to SYSTEM_OVERLOAD, none is NONE.
    pub fn classify(&self, features: &FeatureVector, models: &ModelScores) -> RootCauseResult {
        let c = &self.config;
        let mut conditions = Vec::new();

        if features.avg_response_time > c.latency_ms
            && features.error_rate < c.latency_max_error_rate
        {
            conditions.push(Condition::LatencyBottleneck);
        }
        if features.error_rate >= c.error_rate {
            conditions.push(Condition::BackendInstability);
        }
        if features.request_rate >= 2.0 * c.baseline_rate {
            conditions.push(Condition::TrafficSurge);
        }
        let bot_cluster = models.cluster_id == Some(c.bot_cluster);
        if features.repeated_parameter_ratio > c.abuse_repetition || bot_cluster {
            conditions.push(Condition::AbuseOrBot);
        }

        let (root_cause, confidence) = match conditions.as_slice() {
            [] => (RootCause::None, 0.0),
            [single] => single_cause(*single),
            [_, _] => (RootCause::SystemOverload, 0.90),
            _ => (RootCause::SystemOverload, 0.95),
        };

        RootCauseResult {
            root_cause,
            contributing_conditions: conditions,
            confidence,
        }
    }
}

/// Primary tag and fixed confidence for a sole condition
fn single_cause(condition: Condition) -> (RootCause, f64) {
    match condition {
        Condition::LatencyBottleneck => (RootCause::LatencyBottleneck, 0.88),
        Condition::BackendInstability => (RootCause::BackendInstability, 0.92),
        Condition::TrafficSurge => (RootCause::TrafficSurge, 0.89),
        Condition::AbuseOrBot => (RootCause::AbuseOrBot, 0.91),
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn quiet() -> FeatureVector {
        FeatureVector {
            request_rate: 5.0,
            unique_endpoints: 1.0,
            method_ratio: 0.5,
            avg_payload_size: 300.0,
            error_rate: 0.1,
            repeated_parameter_ratio: 0.2,
            user_agent_entropy: 1.5,
            avg_response_time: 150.0,
            max_response_time: 280.0,
        }
    }

    fn scores(cluster: u8) -> ModelScores {
        ModelScores {
            cluster_id: Some(cluster),
            cluster_distance: Some(0.3),
            ..ModelScores::default()
        }
    }

    #[test]
    fn test_no_conditions_is_none() {
        let result = RootCauseClassifier::default().classify(&quiet(), &scores(0));
        assert_eq!(result.root_cause, RootCause::None);
        assert!(result.contributing_conditions.is_empty());
        assert_eq!(result.confidence, 0.0);
    }

    #[test]
    fn test_latency_bottleneck() {
        let f = FeatureVector { avg_response_time: 950.0, ..quiet() };
        let result = RootCauseClassifier::default().classify(&f, &scores(0));
        assert_eq!(result.root_cause, RootCause::LatencyBottleneck);
        assert_eq!(result.contributing_conditions, vec![Condition::LatencyBottleneck]);
        assert_eq!(result.confidence, 0.88);
    }

    #[test]
    fn test_high_errors_mask_latency_rule() {
        // Slow and failing is instability, not a latency bottleneck
        let f = FeatureVector {
            avg_response_time: 950.0,
            error_rate: 0.5,
            ..quiet()
        };
        let result = RootCauseClassifier::default().classify(&f, &scores(0));
        assert_eq!(result.root_cause, RootCause::BackendInstability);
        assert_eq!(result.confidence, 0.92);
    }

    #[test]
    fn test_error_threshold_is_inclusive() {
        let f = FeatureVector { error_rate: 0.3, ..quiet() };
        let result = RootCauseClassifier::default().classify(&f, &scores(0));
        assert_eq!(result.root_cause, RootCause::BackendInstability);
    }

    #[test]
    fn test_traffic_surge_at_twice_baseline() {
        let f = FeatureVector { request_rate: 10.0, ..quiet() };
        let result = RootCauseClassifier::default().classify(&f, &scores(0));
        assert_eq!(result.root_cause, RootCause::TrafficSurge);

        let f = FeatureVector { request_rate: 9.9, ..quiet() };
        let result = RootCauseClassifier::default().classify(&f, &scores(0));
        assert_eq!(result.root_cause, RootCause::None);
    }

    #[test]
    fn test_abuse_from_repetition_or_cluster() {
        let f = FeatureVector { repeated_parameter_ratio: 0.8, ..quiet() };
        let result = RootCauseClassifier::default().classify(&f, &scores(0));
        assert_eq!(result.root_cause, RootCause::AbuseOrBot);
        assert_eq!(result.confidence, 0.91);

        // Bot cluster alone is enough
        let result = RootCauseClassifier::default().classify(&quiet(), &scores(2));
        assert_eq!(result.root_cause, RootCause::AbuseOrBot);
    }

    #[test]
    fn test_two_conditions_collapse_to_overload() {
        let f = FeatureVector {
            error_rate: 0.4,
            request_rate: 12.0,
            ..quiet()
        };
        let result = RootCauseClassifier::default().classify(&f, &scores(0));
        assert_eq!(result.root_cause, RootCause::SystemOverload);
        assert_eq!(
            result.contributing_conditions,
            vec![Condition::BackendInstability, Condition::TrafficSurge]
        );
        assert_eq!(result.confidence, 0.90);
    }

    #[test]
    fn test_three_conditions_raise_confidence() {
        let f = FeatureVector {
            error_rate: 0.4,
            request_rate: 12.0,
            repeated_parameter_ratio: 0.9,
            ..quiet()
        };
        let result = RootCauseClassifier::default().classify(&f, &scores(0));
        assert_eq!(result.root_cause, RootCause::SystemOverload);
        assert_eq!(result.contributing_conditions.len(), 3);
        assert_eq!(result.confidence, 0.95);
    }

    #[test]
    fn test_pure() {
        let f = FeatureVector { error_rate: 0.4, ..quiet() };
        let classifier = RootCauseClassifier::default();
        assert_eq!(classifier.classify(&f, &scores(1)), classifier.classify(&f, &scores(1)));
    }
}
