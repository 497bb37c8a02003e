//! Deterministic rule engine
//!
//! Threshold checks over the feature vector producing categorical alerts
//! and a scalar rule score. Order independent and pure; the thresholds are
//! the system's calibrated defaults and all of them are tunable.

use serde::{Deserialize, Serialize};

use crate::core::RuleAlert;
use crate::features::FeatureVector;

/// Tunable rule thresholds
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct RuleThresholds {
    /// Requests per second above which RATE_SPIKE fires
    pub rate_spike: f64,
    /// Error fraction above which ERROR_BURST fires
    pub error_burst: f64,
    /// User-agent entropy below which BOT_PATTERN may fire
    pub bot_entropy: f64,
    /// Parameter repetition above which BOT_PATTERN may fire
    pub bot_repetition: f64,
    /// Mean payload bytes above which LARGE_PAYLOAD fires
    pub large_payload: f64,
    /// Distinct routes above which ENDPOINT_SCAN fires
    pub endpoint_scan: f64,
}

impl Default for RuleThresholds {
    fn default() -> Self {
        Self {
            rate_spike: 15.0,
            error_burst: 0.5,
            bot_entropy: 0.5,
            bot_repetition: 0.5,
            large_payload: 5000.0,
            endpoint_scan: 8.0,
        }
    }
}

/// Result of one rule pass
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct RuleOutcome {
    pub alerts: Vec<RuleAlert>,
    /// min(1, 0.2 per fired alert)
    pub rule_score: f64,
}

impl RuleOutcome {
    pub fn fired(&self) -> bool {
        !self.alerts.is_empty()
    }
}

/// Deterministic threshold checks over a feature vector
#[derive(Debug, Clone, Default)]
pub struct RuleEngine {
    thresholds: RuleThresholds,
}

impl RuleEngine {
    pub fn new(thresholds: RuleThresholds) -> Self {
        Self { thresholds }
    }

    pub fn evaluate(&self, features: &FeatureVector) -> RuleOutcome {
        let t = &self.thresholds;
        let mut alerts = Vec::new();

        if features.request_rate > t.rate_spike {
            alerts.push(RuleAlert::RateSpike);
        }
        if features.error_rate > t.error_burst {
            alerts.push(RuleAlert::ErrorBurst);
        }
        if features.user_agent_entropy < t.bot_entropy
            && features.repeated_parameter_ratio > t.bot_repetition
        {
            alerts.push(RuleAlert::BotPattern);
        }
        if features.avg_payload_size > t.large_payload {
            alerts.push(RuleAlert::LargePayload);
        }
        if features.unique_endpoints > t.endpoint_scan {
            alerts.push(RuleAlert::EndpointScan);
        }

        let rule_score = (0.2 * alerts.len() as f64).min(1.0);
        RuleOutcome { alerts, rule_score }
    }
}
