//! Configuration
//!
//! TOML file plus environment overrides for every tunable the detector
//! exposes: window size, rule thresholds, ensemble weights, priority
//! bands, tracked routes, history capacity, queue depths, the scoring
//! deadline and model artifact paths.

use std::collections::HashMap;
use std::path::{Path, PathBuf};

use anyhow::{Context, Result};
use serde::{Deserialize, Serialize};

use crate::models::ModelPathsConfig;
use crate::root_cause::RootCauseConfig;
use crate::rules::RuleThresholds;
use crate::scoring::{PriorityBands, ScoreWeights};
use crate::simulation::SimulationConfig;

/// HTTP control plane settings
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ServerConfig {
    pub bind: String,
    pub port: u16,
}

impl Default for ServerConfig {
    fn default() -> Self {
        Self {
            bind: "0.0.0.0".to_string(),
            port: 8080,
        }
    }
}

/// Storage settings
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct DatabaseConfig {
    /// SQLite path; ":memory:" keeps everything in process
    pub path: String,
    /// Observation staging buffer depth (overflow drops oldest)
    pub observation_buffer: usize,
    /// Writer flush interval in milliseconds
    pub flush_interval_ms: u64,
}

impl Default for DatabaseConfig {
    fn default() -> Self {
        Self {
            path: "apiwatch.db".to_string(),
            observation_buffer: 4096,
            flush_interval_ms: 500,
        }
    }
}

/// Scoring block: ensemble weights and priority bands
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct ScoringConfig {
    #[serde(default)]
    pub weights: ScoreWeights,
    #[serde(default)]
    pub bands: PriorityBands,
}

/// Main configuration structure
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Config {
    #[serde(default)]
    pub server: ServerConfig,

    /// Observations per window
    #[serde(default = "default_window_size")]
    pub window_size: usize,

    /// Routes tracked in LIVE mode
    #[serde(default = "default_live_routes")]
    pub live_tracked_routes: Vec<String>,

    #[serde(default)]
    pub rules: RuleThresholds,

    #[serde(default)]
    pub scoring: ScoringConfig,

    #[serde(default)]
    pub root_cause: RootCauseConfig,

    #[serde(default)]
    pub simulation: SimulationConfig,

    /// Simulation journal capacity
    #[serde(default = "default_history_capacity")]
    pub history_capacity: usize,

    /// Per-subscriber event queue depth
    #[serde(default = "default_queue_depth")]
    pub subscriber_queue_depth: usize,

    /// Soft deadline for scoring one window
    #[serde(default = "default_scoring_deadline_ms")]
    pub scoring_deadline_ms: u64,

    #[serde(default)]
    pub models: ModelPathsConfig,

    #[serde(default)]
    pub database: DatabaseConfig,
}

fn default_window_size() -> usize {
    10
}

fn default_history_capacity() -> usize {
    1000
}

fn default_queue_depth() -> usize {
    256
}

fn default_scoring_deadline_ms() -> u64 {
    500
}

fn default_live_routes() -> Vec<String> {
    ["/login", "/signup", "/search", "/profile", "/payment", "/logout"]
        .iter()
        .map(|s| s.to_string())
        .collect()
}

impl Default for Config {
    fn default() -> Self {
        Self {
            server: ServerConfig::default(),
            window_size: default_window_size(),
            live_tracked_routes: default_live_routes(),
            rules: RuleThresholds::default(),
            scoring: ScoringConfig::default(),
            root_cause: RootCauseConfig::default(),
            simulation: SimulationConfig::default(),
            history_capacity: default_history_capacity(),
            subscriber_queue_depth: default_queue_depth(),
            scoring_deadline_ms: default_scoring_deadline_ms(),
            models: ModelPathsConfig::default(),
            database: DatabaseConfig::default(),
        }
    }
}

impl Config {
    /// Load configuration from file
    pub fn load<P: AsRef<Path>>(path: P) -> Result<Self> {
        let content = std::fs::read_to_string(&path)
            .with_context(|| format!("failed to read config file {}", path.as_ref().display()))?;
        let mut config: Config = toml::from_str(&content)
            .with_context(|| format!("failed to parse config file {}", path.as_ref().display()))?;
        config.apply_env();
        Ok(config)
    }

    /// Load from the default locations or fall back to defaults; the
    /// environment always has the last word.
    pub fn load_or_default() -> Result<Self> {
        let paths = [
            PathBuf::from("/etc/apiwatch/config.toml"),
            dirs_next::config_dir()
                .map(|p| p.join("apiwatch/config.toml"))
                .unwrap_or_default(),
            PathBuf::from("config.toml"),
        ];

        for path in &paths {
            if path.exists() {
                return Self::load(path);
            }
        }

        let mut config = Self::default();
        config.apply_env();
        Ok(config)
    }

    /// Save configuration to file
    pub fn save<P: AsRef<Path>>(&self, path: P) -> Result<()> {
        let content = toml::to_string_pretty(self)?;
        std::fs::write(&path, content)?;
        Ok(())
    }

    /// Apply the documented environment overrides
    pub fn apply_env(&mut self) {
        let env: HashMap<String, String> = std::env::vars().collect();
        self.apply_env_map(&env);
    }

    fn apply_env_map(&mut self, env: &HashMap<String, String>) {
        if let Some(v) = env.get("WINDOW_SIZE").and_then(|v| v.parse().ok()) {
            self.window_size = v;
        }
        if let Some(v) = env.get("HISTORY_CAPACITY").and_then(|v| v.parse().ok()) {
            self.history_capacity = v;
        }
        if let Some(v) = env.get("SUBSCRIBER_QUEUE_DEPTH").and_then(|v| v.parse().ok()) {
            self.subscriber_queue_depth = v;
        }
        if let Some(v) = env.get("SCORING_DEADLINE_MS").and_then(|v| v.parse().ok()) {
            self.scoring_deadline_ms = v;
        }
        if let Some(v) = env.get("LIVE_TRACKED_ROUTES") {
            self.live_tracked_routes = split_routes(v);
        }
        if let Some(v) = env.get("SIM_VIRTUAL_ROUTES") {
            self.simulation.virtual_routes = split_routes(v);
        }
        if let Some(v) = env.get("APIWATCH_PORT").and_then(|v| v.parse().ok()) {
            self.server.port = v;
        }
        if let Some(v) = env.get("APIWATCH_DB") {
            self.database.path = v.clone();
        }
        // Comma-separated numeric blocks, in the documented order
        if let Some([rate, error, entropy, repetition, payload, scan]) =
            env.get("RULE_THRESHOLDS").and_then(parse_floats::<6>)
        {
            self.rules.rate_spike = rate;
            self.rules.error_burst = error;
            self.rules.bot_entropy = entropy;
            self.rules.bot_repetition = repetition;
            self.rules.large_payload = payload;
            self.rules.endpoint_scan = scan;
        }
        if let Some([rule, anomaly, failure, next]) =
            env.get("SCORE_WEIGHTS").and_then(parse_floats::<4>)
        {
            self.scoring.weights.rule = rule;
            self.scoring.weights.anomaly = anomaly;
            self.scoring.weights.failure = failure;
            self.scoring.weights.next_window = next;
        }
        if let Some([critical, high, medium]) =
            env.get("PRIORITY_BANDS").and_then(parse_floats::<3>)
        {
            self.scoring.bands.critical = critical;
            self.scoring.bands.high = high;
            self.scoring.bands.medium = medium;
        }
    }
}

fn parse_floats<const N: usize>(value: &String) -> Option<[f64; N]> {
    let parts: Vec<f64> = value
        .split(',')
        .map(|s| s.trim().parse::<f64>())
        .collect::<Result<_, _>>()
        .ok()?;
    parts.try_into().ok()
}

fn split_routes(value: &str) -> Vec<String> {
    value
        .split(',')
        .map(|s| s.trim().to_string())
        .filter(|s| !s.is_empty())
        .collect()
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_defaults() {
        let config = Config::default();
        assert_eq!(config.window_size, 10);
        assert_eq!(config.history_capacity, 1000);
        assert_eq!(config.subscriber_queue_depth, 256);
        assert_eq!(config.scoring_deadline_ms, 500);
        assert_eq!(config.live_tracked_routes.len(), 6);
        assert_eq!(config.simulation.virtual_routes.len(), 5);
    }

    #[test]
    fn test_toml_roundtrip() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("config.toml");

        let mut config = Config::default();
        config.window_size = 20;
        config.rules.rate_spike = 30.0;
        config.save(&path).unwrap();

        let loaded = Config::load(&path).unwrap();
        assert_eq!(loaded.window_size, 20);
        assert_eq!(loaded.rules.rate_spike, 30.0);
    }

    #[test]
    fn test_partial_toml_fills_defaults() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("config.toml");
        std::fs::write(&path, "window_size = 5\n").unwrap();

        let config = Config::load(&path).unwrap();
        assert_eq!(config.window_size, 5);
        assert_eq!(config.history_capacity, 1000);
        assert!((config.scoring.weights.failure - 0.30).abs() < 1e-12);
    }

    #[test]
    fn test_env_overrides() {
        let mut config = Config::default();
        let mut env = HashMap::new();
        env.insert("WINDOW_SIZE".to_string(), "15".to_string());
        env.insert("HISTORY_CAPACITY".to_string(), "50".to_string());
        env.insert("LIVE_TRACKED_ROUTES".to_string(), "/a, /b ,/c".to_string());
        config.apply_env_map(&env);

        assert_eq!(config.window_size, 15);
        assert_eq!(config.history_capacity, 50);
        assert_eq!(config.live_tracked_routes, vec!["/a", "/b", "/c"]);
    }

    #[test]
    fn test_numeric_block_overrides() {
        let mut config = Config::default();
        let mut env = HashMap::new();
        env.insert("SCORE_WEIGHTS".to_string(), "0.4,0.2,0.3,0.1".to_string());
        env.insert("PRIORITY_BANDS".to_string(), "0.8, 0.6, 0.4".to_string());
        config.apply_env_map(&env);

        assert_eq!(config.scoring.weights.rule, 0.4);
        assert_eq!(config.scoring.bands.critical, 0.8);

        // A malformed block is ignored wholesale
        let mut env = HashMap::new();
        env.insert("SCORE_WEIGHTS".to_string(), "0.4,oops".to_string());
        config.apply_env_map(&env);
        assert_eq!(config.scoring.weights.rule, 0.4);
    }
}
