//! Synthetic traffic generation
//!
//! Produces labeled observations for one virtual source with one anomaly
//! pattern. Each pattern shapes status codes, latencies, payloads,
//! parameters and inter-arrival spacing so the resulting windows land in
//! the feature regions the pattern names. Status codes follow a fixed
//! cycle so a window's error rate is a property of the pattern, not of
//! the dice; everything cosmetic stays random.
//!
//! The generator owns its RNG and a virtual monotonic clock; emitted
//! observations carry synthetic inter-arrival spacing so the request rate
//! a window sees is independent of how fast the driver loop runs.

use rand::rngs::StdRng;
use rand::{Rng, SeedableRng};
use serde::{Deserialize, Serialize};

use crate::core::{HttpMethod, Mode, Observation};

/// Injectable anomaly patterns
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum AnomalyPattern {
    Normal,
    RateSpike,
    PayloadAbuse,
    ErrorBurst,
    ParamRepetition,
    EndpointFlood,
    Mixed,
}

impl AnomalyPattern {
    pub fn as_str(&self) -> &'static str {
        match self {
            AnomalyPattern::Normal => "NORMAL",
            AnomalyPattern::RateSpike => "RATE_SPIKE",
            AnomalyPattern::PayloadAbuse => "PAYLOAD_ABUSE",
            AnomalyPattern::ErrorBurst => "ERROR_BURST",
            AnomalyPattern::ParamRepetition => "PARAM_REPETITION",
            AnomalyPattern::EndpointFlood => "ENDPOINT_FLOOD",
            AnomalyPattern::Mixed => "MIXED",
        }
    }

    /// Emission count multiplier for flood-style patterns
    pub fn amplification(&self) -> u32 {
        match self {
            AnomalyPattern::RateSpike => 5,
            AnomalyPattern::EndpointFlood => 10,
            _ => 1,
        }
    }

    /// The five concrete anomaly patterns MIXED samples from
    pub const ANOMALOUS: [AnomalyPattern; 5] = [
        AnomalyPattern::RateSpike,
        AnomalyPattern::PayloadAbuse,
        AnomalyPattern::ErrorBurst,
        AnomalyPattern::ParamRepetition,
        AnomalyPattern::EndpointFlood,
    ];
}

impl std::str::FromStr for AnomalyPattern {
    type Err = ();

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.to_ascii_uppercase().as_str() {
            "NORMAL" => Ok(AnomalyPattern::Normal),
            "RATE_SPIKE" => Ok(AnomalyPattern::RateSpike),
            "PAYLOAD_ABUSE" => Ok(AnomalyPattern::PayloadAbuse),
            "ERROR_BURST" => Ok(AnomalyPattern::ErrorBurst),
            "PARAM_REPETITION" => Ok(AnomalyPattern::ParamRepetition),
            "ENDPOINT_FLOOD" => Ok(AnomalyPattern::EndpointFlood),
            "MIXED" => Ok(AnomalyPattern::Mixed),
            _ => Err(()),
        }
    }
}

impl std::fmt::Display for AnomalyPattern {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

const NORMAL_AGENTS: [&str; 5] = [
    "Mozilla/5.0 (Windows NT 10.0; Win64; x64)",
    "Mozilla/5.0 (Macintosh; Intel Mac OS X 10_15_7)",
    "Mozilla/5.0 (X11; Linux x86_64)",
    "PostmanRuntime/7.32.0",
    "curl/8.5.0",
];

/// Virtual routes that accept form posts
const POST_ROUTES: [&str; 3] = ["/sim/login", "/sim/payment", "/sim/signup"];

/// Synthetic observation generator for one simulation run
pub struct TrafficGenerator {
    rng: StdRng,
    /// Virtual monotonic clock in microseconds
    cursor_us: u64,
    /// Emission counter across the run
    seq: u64,
}

impl TrafficGenerator {
    /// Seeded construction keeps scenario runs reproducible; `None` seeds
    /// from the OS.
    pub fn new(seed: Option<u64>) -> Self {
        let rng = match seed {
            Some(seed) => StdRng::seed_from_u64(seed),
            None => StdRng::from_os_rng(),
        };
        Self {
            rng,
            cursor_us: 1,
            seq: 0,
        }
    }

    /// Generate one batch for the target source. `count` is the requested
    /// batch size before pattern amplification.
    pub fn generate_batch(
        &mut self,
        source: &str,
        pattern: AnomalyPattern,
        count: u32,
    ) -> Vec<Observation> {
        let total = count.saturating_mul(pattern.amplification());
        let mut batch = Vec::with_capacity(total as usize);
        for _ in 0..total {
            batch.push(self.emit(source, pattern));
        }
        batch
    }

    /// Emit one observation. MIXED resolves to a concrete anomaly per
    /// emission and labels with what was actually injected.
    pub fn emit(&mut self, source: &str, pattern: AnomalyPattern) -> Observation {
        let concrete = match pattern {
            AnomalyPattern::Mixed => {
                AnomalyPattern::ANOMALOUS[self.rng.random_range(0..AnomalyPattern::ANOMALOUS.len())]
            }
            other => other,
        };

        let i = self.seq;
        self.seq += 1;

        let obs = match concrete {
            AnomalyPattern::Normal => self.emit_normal(source, i),
            AnomalyPattern::RateSpike => self.emit_rate_spike(source, i),
            AnomalyPattern::PayloadAbuse => self.emit_payload_abuse(source, i),
            AnomalyPattern::ErrorBurst => self.emit_error_burst(source, i),
            AnomalyPattern::ParamRepetition => self.emit_param_repetition(source, i),
            AnomalyPattern::EndpointFlood => self.emit_endpoint_flood(source, i),
            AnomalyPattern::Mixed => unreachable!("mixed resolves above"),
        };

        obs.with_label(concrete.as_str())
    }

    fn advance(&mut self, min_us: u64, max_us: u64) -> u64 {
        self.cursor_us += self.rng.random_range(min_us..=max_us);
        self.cursor_us
    }

    fn method_for(source: &str) -> HttpMethod {
        if POST_ROUTES.contains(&source) {
            HttpMethod::Post
        } else {
            HttpMethod::Get
        }
    }

    /// Clean baseline: mostly 2xx, moderate latency, diverse agents,
    /// unique parameters, a few requests per second.
    fn emit_normal(&mut self, source: &str, i: u64) -> Observation {
        let status = match i % 10 {
            8 => 201,
            9 => 404,
            _ => 200,
        };
        let ts = self.advance(120_000, 250_000);
        let ua = NORMAL_AGENTS[self.rng.random_range(0..NORMAL_AGENTS.len())];

        Observation::new(Mode::Sim, source, Self::method_for(source), status)
            .with_monotonic_us(ts)
            .with_latency(self.rng.random_range(50.0..300.0))
            .with_payload(self.rng.random_range(100..500))
            .with_user_agent(ua)
            .with_params(vec![
                ("id".to_string(), format!("user_{i}")),
                ("session".to_string(), format!("sess_{}", self.rng.random_range(1000..9999))),
            ])
    }

    /// Flood of tiny ultra-fast requests with scattered 503s
    fn emit_rate_spike(&mut self, source: &str, i: u64) -> Observation {
        let status = if i % 5 == 0 { 503 } else { 200 };
        let ts = self.advance(2_000, 15_000);
        let ua = NORMAL_AGENTS[self.rng.random_range(0..NORMAL_AGENTS.len())];

        Observation::new(Mode::Sim, source, HttpMethod::Post, status)
            .with_monotonic_us(ts)
            .with_latency(self.rng.random_range(1.0..20.0))
            .with_payload(self.rng.random_range(20..100))
            .with_user_agent(ua)
            .with_params(vec![
                ("burst".to_string(), "true".to_string()),
                ("id".to_string(), format!("req_{i}")),
            ])
    }

    /// Oversized uploads; slow because of the transfer size
    fn emit_payload_abuse(&mut self, source: &str, i: u64) -> Observation {
        let status = if i % 5 == 2 { 413 } else { 200 };
        let ts = self.advance(150_000, 300_000);
        let ua = NORMAL_AGENTS[self.rng.random_range(0..NORMAL_AGENTS.len())];

        Observation::new(Mode::Sim, source, HttpMethod::Post, status)
            .with_monotonic_us(ts)
            .with_latency(self.rng.random_range(900.0..1800.0))
            .with_payload(self.rng.random_range(10_000..50_000))
            .with_user_agent(ua)
            .with_params(vec![
                ("upload".to_string(), format!("chunk_{i}")),
                ("bulk".to_string(), "true".to_string()),
            ])
    }

    /// Probing traffic where most responses fail
    fn emit_error_burst(&mut self, source: &str, i: u64) -> Observation {
        let status = if i % 10 < 8 {
            [500, 503, 404, 502][(i % 4) as usize]
        } else {
            200
        };
        let methods = [HttpMethod::Get, HttpMethod::Post, HttpMethod::Put, HttpMethod::Delete];
        let ts = self.advance(120_000, 250_000);
        let ua = NORMAL_AGENTS[self.rng.random_range(0..NORMAL_AGENTS.len())];

        Observation::new(Mode::Sim, source, methods[(i % 4) as usize], status)
            .with_monotonic_us(ts)
            .with_latency(self.rng.random_range(20.0..100.0))
            .with_payload(self.rng.random_range(0..100))
            .with_user_agent(ua)
            .with_params(vec![("probe".to_string(), format!("scan_{i}"))])
    }

    /// Bot traffic: one agent, the same parameter set every time
    fn emit_param_repetition(&mut self, source: &str, _i: u64) -> Observation {
        let ts = self.advance(120_000, 220_000);

        Observation::new(Mode::Sim, source, HttpMethod::Post, 200)
            .with_monotonic_us(ts)
            .with_latency(self.rng.random_range(50.0..150.0))
            .with_payload(self.rng.random_range(100..300))
            .with_user_agent("bot/1.0")
            .with_params(vec![
                ("user_id".to_string(), "12345".to_string()),
                ("token".to_string(), "abc123".to_string()),
                ("action".to_string(), "login".to_string()),
            ])
    }

    /// Rapid hammering of a single route, rate limiter pushing back
    fn emit_endpoint_flood(&mut self, source: &str, i: u64) -> Observation {
        let status = if i % 5 == 1 { 429 } else { 200 };
        let ts = self.advance(1_000, 10_000);
        let ua = NORMAL_AGENTS[self.rng.random_range(0..NORMAL_AGENTS.len())];

        Observation::new(Mode::Sim, source, HttpMethod::Post, status)
            .with_monotonic_us(ts)
            .with_latency(self.rng.random_range(1.0..15.0))
            .with_payload(self.rng.random_range(30..150))
            .with_user_agent(ua)
            .with_params(vec![
                ("flood".to_string(), "true".to_string()),
                ("seq".to_string(), format!("{i}")),
            ])
    }
}
