//! Detection records
//!
//! The headline result type produced once per sealed window, together with
//! the enums shared across the scoring pipeline: priority buckets, rule
//! alerts, root causes and model score summaries.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use super::observation::Mode;
use crate::features::FeatureVector;

/// Bucketed risk level for a detection
#[derive(
    Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize, Default,
)]
#[serde(rename_all = "UPPERCASE")]
#[repr(u8)]
pub enum Priority {
    #[default]
    Low = 0,
    Medium = 1,
    High = 2,
    Critical = 3,
}

impl Priority {
    pub fn as_str(&self) -> &'static str {
        match self {
            Priority::Low => "LOW",
            Priority::Medium => "MEDIUM",
            Priority::High => "HIGH",
            Priority::Critical => "CRITICAL",
        }
    }

    /// Sort rank with CRITICAL first
    pub fn rank(&self) -> u8 {
        3 - *self as u8
    }
}

impl std::fmt::Display for Priority {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Categorical alerts raised by the deterministic rule engine
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum RuleAlert {
    RateSpike,
    ErrorBurst,
    BotPattern,
    LargePayload,
    EndpointScan,
}

impl RuleAlert {
    pub fn as_str(&self) -> &'static str {
        match self {
            RuleAlert::RateSpike => "RATE_SPIKE",
            RuleAlert::ErrorBurst => "ERROR_BURST",
            RuleAlert::BotPattern => "BOT_PATTERN",
            RuleAlert::LargePayload => "LARGE_PAYLOAD",
            RuleAlert::EndpointScan => "ENDPOINT_SCAN",
        }
    }
}

/// A diagnostic condition observed in a scored window. All matching
/// conditions are recorded on the detection; the primary root cause is
/// derived from them.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Condition {
    LatencyBottleneck,
    BackendInstability,
    TrafficSurge,
    AbuseOrBot,
}

impl Condition {
    pub fn as_str(&self) -> &'static str {
        match self {
            Condition::LatencyBottleneck => "latency_bottleneck",
            Condition::BackendInstability => "backend_instability",
            Condition::TrafficSurge => "traffic_surge",
            Condition::AbuseOrBot => "abuse_or_bot",
        }
    }
}

/// Primary root cause tag for a detection
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize, Default)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum RootCause {
    LatencyBottleneck,
    BackendInstability,
    TrafficSurge,
    AbuseOrBot,
    SystemOverload,
    #[default]
    None,
}

impl RootCause {
    pub fn as_str(&self) -> &'static str {
        match self {
            RootCause::LatencyBottleneck => "LATENCY_BOTTLENECK",
            RootCause::BackendInstability => "BACKEND_INSTABILITY",
            RootCause::TrafficSurge => "TRAFFIC_SURGE",
            RootCause::AbuseOrBot => "ABUSE_OR_BOT",
            RootCause::SystemOverload => "SYSTEM_OVERLOAD",
            RootCause::None => "NONE",
        }
    }
}

impl std::fmt::Display for RootCause {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

/// The statistical submodels feeding the hybrid scorer
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum SubModel {
    IsolationForest,
    FailureClassifier,
    Clustering,
    NextWindowPredictor,
}

impl SubModel {
    pub fn as_str(&self) -> &'static str {
        match self {
            SubModel::IsolationForest => "isolation_forest",
            SubModel::FailureClassifier => "failure_classifier",
            SubModel::Clustering => "clustering",
            SubModel::NextWindowPredictor => "next_window_predictor",
        }
    }
}

/// Scores produced by the model holder for one window. A field is `None`
/// exactly when its submodel is listed in `unavailable`; the scorer treats
/// missing terms as weight to redistribute.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize, Default)]
pub struct ModelScores {
    #[serde(skip_serializing_if = "Option::is_none")]
    pub anomaly_score: Option<f64>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub failure_probability: Option<f64>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub cluster_id: Option<u8>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub cluster_distance: Option<f64>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub next_window_failure_probability: Option<f64>,
    /// Submodels that were missing, rejected or abandoned on deadline
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub unavailable: Vec<SubModel>,
}

impl ModelScores {
    pub fn is_unavailable(&self, model: SubModel) -> bool {
        self.unavailable.contains(&model)
    }
}

/// One remediation item from the resolution catalogue
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Resolution {
    pub category: String,
    pub action: String,
    pub detail: String,
    pub priority: Priority,
}

impl Resolution {
    pub fn new(category: &str, action: &str, detail: &str, priority: Priority) -> Self {
        Self {
            category: category.to_string(),
            action: action.to_string(),
            detail: detail.to_string(),
            priority,
        }
    }
}

/// The scored, classified and remediated result of exactly one window.
/// Immutable once produced; stored in the journal and on disk, and pushed
/// to every bus subscriber.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Detection {
    /// Process-wide monotonic id
    pub id: u64,
    /// Wall-clock time the detection was produced
    pub timestamp: DateTime<Utc>,
    pub mode: Mode,
    pub source: String,
    pub window_id: u64,
    pub features: FeatureVector,
    pub rule_alerts: Vec<RuleAlert>,
    pub model_scores: ModelScores,
    pub risk_score: f64,
    pub priority: Priority,
    pub is_anomaly: bool,
    pub root_cause: RootCause,
    pub contributing_conditions: Vec<Condition>,
    pub root_cause_confidence: f64,
    pub resolutions: Vec<Resolution>,
    /// Milliseconds spent scoring the window
    pub detection_latency_ms: f64,

    // Simulation-only fields
    #[serde(skip_serializing_if = "Option::is_none")]
    pub injected_label: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub emergency_rank: Option<u64>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub is_correctly_detected: Option<bool>,
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_priority_ordering() {
        assert!(Priority::Critical > Priority::High);
        assert!(Priority::High > Priority::Medium);
        assert!(Priority::Medium > Priority::Low);
    }

    #[test]
    fn test_priority_rank_sorts_critical_first() {
        let mut items = vec![Priority::Low, Priority::Critical, Priority::Medium];
        items.sort_by_key(|p| p.rank());
        assert_eq!(items, vec![Priority::Critical, Priority::Medium, Priority::Low]);
    }

    #[test]
    fn test_enum_wire_names() {
        assert_eq!(
            serde_json::to_string(&RuleAlert::RateSpike).unwrap(),
            "\"RATE_SPIKE\""
        );
        assert_eq!(
            serde_json::to_string(&RootCause::AbuseOrBot).unwrap(),
            "\"ABUSE_OR_BOT\""
        );
        assert_eq!(
            serde_json::to_string(&Condition::TrafficSurge).unwrap(),
            "\"traffic_surge\""
        );
        assert_eq!(serde_json::to_string(&Priority::High).unwrap(), "\"HIGH\"");
    }

    #[test]
    fn test_detection_serde_roundtrip() {
        let detection = Detection {
            id: 7,
            timestamp: Utc::now(),
            mode: Mode::Sim,
            source: "/sim/login".to_string(),
            window_id: 3,
            features: FeatureVector::default(),
            rule_alerts: vec![RuleAlert::ErrorBurst],
            model_scores: ModelScores {
                anomaly_score: Some(0.7),
                failure_probability: Some(0.9),
                cluster_id: Some(1),
                cluster_distance: Some(0.4),
                next_window_failure_probability: Some(0.6),
                unavailable: Vec::new(),
            },
            risk_score: 0.66,
            priority: Priority::High,
            is_anomaly: true,
            root_cause: RootCause::BackendInstability,
            contributing_conditions: vec![Condition::BackendInstability],
            root_cause_confidence: 0.9,
            resolutions: vec![Resolution::new(
                "Debugging",
                "Inspect error traces",
                "Review application logs to identify failing code paths",
                Priority::Critical,
            )],
            detection_latency_ms: 1.2,
            injected_label: Some("ERROR_BURST".to_string()),
            emergency_rank: Some(1),
            is_correctly_detected: Some(true),
        };

        let json = serde_json::to_string(&detection).unwrap();
        let parsed: Detection = serde_json::from_str(&json).unwrap();
        assert_eq!(parsed, detection);
    }

    #[test]
    fn test_sim_fields_omitted_for_live() {
        let detection = Detection {
            id: 1,
            timestamp: Utc::now(),
            mode: Mode::Live,
            source: "/login".to_string(),
            window_id: 1,
            features: FeatureVector::default(),
            rule_alerts: Vec::new(),
            model_scores: ModelScores::default(),
            risk_score: 0.1,
            priority: Priority::Low,
            is_anomaly: false,
            root_cause: RootCause::None,
            contributing_conditions: Vec::new(),
            root_cause_confidence: 0.0,
            resolutions: Vec::new(),
            detection_latency_ms: 0.4,
            injected_label: None,
            emergency_rank: None,
            is_correctly_detected: None,
        };

        let json = serde_json::to_string(&detection).unwrap();
        assert!(!json.contains("injected_label"));
        assert!(!json.contains("emergency_rank"));
    }
}
