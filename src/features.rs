//! Behavioral feature extraction
//!
//! Computes the nine-dimensional feature vector from a sealed window.
//! Pure: the same window always yields the same vector, and extraction
//! never fails. Payloads and latencies are clipped to finite non-negative
//! values before aggregation.

use std::collections::HashMap;

use serde::{Deserialize, Serialize};

use crate::core::window::Window;
use crate::core::HttpMethod;

/// Number of behavioral features
pub const FEATURE_COUNT: usize = 9;

/// Feature names in vector order. The model artifacts are trained against
/// this exact layout.
pub const FEATURE_NAMES: [&str; FEATURE_COUNT] = [
    "request_rate",
    "unique_endpoints",
    "method_ratio",
    "avg_payload_size",
    "error_rate",
    "repeated_parameter_ratio",
    "user_agent_entropy",
    "avg_response_time",
    "max_response_time",
];

/// Nine behavioral features computed over one window
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize, Default)]
pub struct FeatureVector {
    /// Observations per second over the window duration
    pub request_rate: f64,
    /// Count of distinct routes
    pub unique_endpoints: f64,
    /// Fraction of GET requests
    pub method_ratio: f64,
    /// Mean request payload bytes
    pub avg_payload_size: f64,
    /// Fraction of observations with status >= 400
    pub error_rate: f64,
    /// Fraction of parameter occurrences whose (name, value) repeats
    pub repeated_parameter_ratio: f64,
    /// Shannon entropy (base 2) of the user-agent distribution
    pub user_agent_entropy: f64,
    /// Mean latency in milliseconds
    pub avg_response_time: f64,
    /// Peak latency in milliseconds
    pub max_response_time: f64,
}

impl FeatureVector {
    /// The vector in stable artifact order
    pub fn as_array(&self) -> [f64; FEATURE_COUNT] {
        [
            self.request_rate,
            self.unique_endpoints,
            self.method_ratio,
            self.avg_payload_size,
            self.error_rate,
            self.repeated_parameter_ratio,
            self.user_agent_entropy,
            self.avg_response_time,
            self.max_response_time,
        ]
    }

    /// Extract features from a sealed window
    pub fn extract(window: &Window) -> Self {
        let n = window.len();
        if n == 0 {
            return Self::default();
        }
        let nf = n as f64;

        let request_rate = nf / window.duration_secs();

        let mut routes: Vec<&str> = window
            .observations
            .iter()
            .map(|o| o.route.as_str())
            .collect();
        routes.sort_unstable();
        routes.dedup();
        let unique_endpoints = routes.len() as f64;

        let get_count = window
            .observations
            .iter()
            .filter(|o| o.method == HttpMethod::Get)
            .count();
        let method_ratio = get_count as f64 / nf;

        let avg_payload_size = window
            .observations
            .iter()
            .map(|o| clip(o.payload_bytes as f64))
            .sum::<f64>()
            / nf;

        let error_count = window.observations.iter().filter(|o| o.is_error()).count();
        let error_rate = error_count as f64 / nf;

        let repeated_parameter_ratio = parameter_repetition(window);
        let user_agent_entropy = shannon_entropy(
            window
                .observations
                .iter()
                .map(|o| o.user_agent.as_str()),
        );

        let latencies: Vec<f64> = window
            .observations
            .iter()
            .map(|o| clip(o.latency_ms))
            .collect();
        let avg_response_time = latencies.iter().sum::<f64>() / nf;
        let max_response_time = latencies.iter().cloned().fold(0.0, f64::max);

        Self {
            request_rate,
            unique_endpoints,
            method_ratio,
            avg_payload_size,
            error_rate,
            repeated_parameter_ratio,
            user_agent_entropy,
            avg_response_time,
            max_response_time,
        }
    }
}

/// Clip to a finite non-negative value
fn clip(v: f64) -> f64 {
    if v.is_finite() {
        v.max(0.0)
    } else {
        0.0
    }
}

/// Of all (name, value) parameter occurrences in the window, the fraction
/// belonging to a pair that occurs more than once. Empty windows of
/// parameters yield 0.
fn parameter_repetition(window: &Window) -> f64 {
    let mut counts: HashMap<(&str, &str), u32> = HashMap::new();
    let mut total = 0u32;

    for obs in &window.observations {
        for (name, value) in &obs.params {
            *counts.entry((name.as_str(), value.as_str())).or_insert(0) += 1;
            total += 1;
        }
    }

    if total == 0 {
        return 0.0;
    }

    let repeated: u32 = counts.values().filter(|&&c| c > 1).sum();
    repeated as f64 / total as f64
}

/// Shannon entropy in bits of the empirical distribution of string values.
/// A single distinct symbol has entropy 0.
fn shannon_entropy<'a>(values: impl Iterator<Item = &'a str>) -> f64 {
    let mut counts: HashMap<&str, u32> = HashMap::new();
    let mut total = 0u32;
    for value in values {
        *counts.entry(value).or_insert(0) += 1;
        total += 1;
    }

    if total == 0 {
        return 0.0;
    }

    let total = total as f64;
    counts
        .values()
        .map(|&c| {
            let p = c as f64 / total;
            -p * p.log2()
        })
        .sum()
}
