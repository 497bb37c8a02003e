//! Request observations
//!
//! One observation per HTTP request as seen by the detector, plus the
//! ingress filter that decides which observations enter the aggregation
//! pipeline.

use std::collections::HashSet;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

/// Traffic mode. Every observation, window, detection and persisted row
/// carries exactly one mode; the two pipelines never mix.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum Mode {
    /// Real traffic from the instrumented web tier
    #[serde(rename = "LIVE")]
    Live,
    /// Synthetic traffic from the simulation engine
    #[serde(rename = "SIM")]
    Sim,
}

impl Mode {
    pub fn as_str(&self) -> &'static str {
        match self {
            Mode::Live => "LIVE",
            Mode::Sim => "SIM",
        }
    }
}

impl std::fmt::Display for Mode {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

impl std::str::FromStr for Mode {
    type Err = ();

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "LIVE" | "live" => Ok(Mode::Live),
            "SIM" | "sim" => Ok(Mode::Sim),
            _ => Err(()),
        }
    }
}

/// HTTP method, reduced to the variants the detector distinguishes
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "UPPERCASE")]
pub enum HttpMethod {
    Get,
    Post,
    Put,
    Delete,
    Patch,
    Head,
    Options,
    Other,
}

impl HttpMethod {
    pub fn as_str(&self) -> &'static str {
        match self {
            HttpMethod::Get => "GET",
            HttpMethod::Post => "POST",
            HttpMethod::Put => "PUT",
            HttpMethod::Delete => "DELETE",
            HttpMethod::Patch => "PATCH",
            HttpMethod::Head => "HEAD",
            HttpMethod::Options => "OPTIONS",
            HttpMethod::Other => "OTHER",
        }
    }

    /// CORS pre-flight requests are never tracked
    pub fn is_preflight(&self) -> bool {
        matches!(self, HttpMethod::Options)
    }
}

impl From<&str> for HttpMethod {
    fn from(s: &str) -> Self {
        match s.to_ascii_uppercase().as_str() {
            "GET" => HttpMethod::Get,
            "POST" => HttpMethod::Post,
            "PUT" => HttpMethod::Put,
            "DELETE" => HttpMethod::Delete,
            "PATCH" => HttpMethod::Patch,
            "HEAD" => HttpMethod::Head,
            "OPTIONS" => HttpMethod::Options,
            _ => HttpMethod::Other,
        }
    }
}

impl std::fmt::Display for HttpMethod {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

/// A single HTTP request observation. Immutable once created; produced by
/// the instrumented web tier (LIVE) or the simulation engine (SIM).
///
/// Carries both a wall-clock timestamp for reporting and a monotonic
/// microsecond stamp used for window duration math, so clock jumps never
/// distort the request rate.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Observation {
    /// Wall-clock time the request was observed
    pub timestamp: DateTime<Utc>,
    /// Monotonic microseconds supplied by the producer
    pub monotonic_us: u64,
    /// Traffic mode
    pub mode: Mode,
    /// Traffic source key (the route in LIVE, the virtual route in SIM)
    pub source: String,
    /// Request route
    pub route: String,
    /// HTTP method
    pub method: HttpMethod,
    /// Response status code
    pub status: u16,
    /// Request latency in milliseconds
    pub latency_ms: f64,
    /// Request payload size in bytes
    pub payload_bytes: u64,
    /// User-agent string
    pub user_agent: String,
    /// Request parameter (name, value) pairs. Retained only until feature
    /// extraction; persistence stores the count.
    pub params: Vec<(String, String)>,
    /// Ground-truth label attached by the simulation engine; absent in LIVE
    pub injected_label: Option<String>,
}

impl Observation {
    /// Create an observation for the given mode and route. The source key
    /// defaults to the route.
    pub fn new(mode: Mode, route: &str, method: HttpMethod, status: u16) -> Self {
        Self {
            timestamp: Utc::now(),
            monotonic_us: 0,
            mode,
            source: route.to_string(),
            route: route.to_string(),
            method,
            status,
            latency_ms: 0.0,
            payload_bytes: 0,
            user_agent: String::new(),
            params: Vec::new(),
            injected_label: None,
        }
    }

    pub fn with_latency(mut self, latency_ms: f64) -> Self {
        self.latency_ms = latency_ms;
        self
    }

    pub fn with_payload(mut self, bytes: u64) -> Self {
        self.payload_bytes = bytes;
        self
    }

    pub fn with_user_agent(mut self, ua: &str) -> Self {
        self.user_agent = ua.to_string();
        self
    }

    pub fn with_params(mut self, params: Vec<(String, String)>) -> Self {
        self.params = params;
        self
    }

    pub fn with_monotonic_us(mut self, us: u64) -> Self {
        self.monotonic_us = us;
        self
    }

    pub fn with_label(mut self, label: &str) -> Self {
        self.injected_label = Some(label.to_string());
        self
    }

    /// Whether the response counts as an error
    pub fn is_error(&self) -> bool {
        self.status >= 400
    }
}

/// Microseconds since the process-wide monotonic epoch. Producers that do
/// not supply their own monotonic stamp (the live tier) use this; the
/// simulation engine synthesizes its own spacing instead.
pub fn monotonic_now_us() -> u64 {
    use std::sync::OnceLock;
    use std::time::Instant;

    static EPOCH: OnceLock<Instant> = OnceLock::new();
    EPOCH.get_or_init(Instant::now).elapsed().as_micros() as u64
}

/// Result of classifying an observation at ingress
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum FilterDecision {
    /// Enters the window aggregator
    Tracked,
    /// Dropped before aggregation
    Ignored,
}

/// Ingress filter. Only first-class business routes enter the LIVE pipeline
/// and only the virtual routes emitted by the simulation engine enter the
/// SIM pipeline; everything else (status pages, docs, metrics, unknown
/// routes) is ignored.
#[derive(Debug, Clone)]
pub struct ObservationFilter {
    live_routes: HashSet<String>,
    sim_routes: HashSet<String>,
}

impl ObservationFilter {
    pub fn new(live_routes: &[String], sim_routes: &[String]) -> Self {
        Self {
            live_routes: live_routes.iter().cloned().collect(),
            sim_routes: sim_routes.iter().cloned().collect(),
        }
    }

    /// Classify an observation. Pure and constant time; unknown routes are
    /// simply ignored, never an error.
    pub fn classify(&self, obs: &Observation) -> FilterDecision {
        if obs.method.is_preflight() {
            return FilterDecision::Ignored;
        }

        let tracked = match obs.mode {
            Mode::Live => self.live_routes.contains(&obs.route),
            Mode::Sim => self.sim_routes.contains(&obs.route),
        };

        if tracked {
            FilterDecision::Tracked
        } else {
            FilterDecision::Ignored
        }
    }

    pub fn tracked_routes(&self, mode: Mode) -> &HashSet<String> {
        match mode {
            Mode::Live => &self.live_routes,
            Mode::Sim => &self.sim_routes,
        }
    }
}
