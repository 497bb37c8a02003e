//! Simulation engine
//!
//! Drives labeled synthetic traffic at exactly one virtual source with
//! exactly one anomaly pattern, at a controlled rate, for a bounded
//! duration. Emitted observations flow through the same ingress as live
//! traffic but always carry SIM mode, so the LIVE pipeline never moves.
//!
//! Lifecycle: Idle -> Scheduled -> Running -> Stopping -> Idle. A second
//! start while a run is active is rejected; stop on an idle engine is
//! rejected but leaves state untouched. Natural expiry of the duration
//! takes the same Stopping path as an explicit stop.

pub mod generator;

use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;
use std::time::Duration;

use chrono::{DateTime, Utc};
use parking_lot::Mutex;
use serde::{Deserialize, Serialize};
use tokio::sync::{mpsc, watch};
use tracing::{debug, info, warn};

use crate::core::Observation;

pub use generator::{AnomalyPattern, TrafficGenerator};

/// Control-plane failures for the simulation engine
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum SimulationError {
    #[error("InvalidTarget")]
    InvalidTarget,
    #[error("InvalidPattern")]
    InvalidPattern,
    #[error("AlreadyActive")]
    AlreadyActive,
    #[error("NotActive")]
    NotActive,
}

impl SimulationError {
    /// Error kind for the wire format
    pub fn kind(&self) -> &'static str {
        match self {
            SimulationError::InvalidTarget => "InvalidTarget",
            SimulationError::InvalidPattern => "InvalidPattern",
            SimulationError::AlreadyActive => "AlreadyActive",
            SimulationError::NotActive => "NotActive",
        }
    }
}

/// Engine lifecycle state
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "lowercase")]
pub enum SimState {
    Idle,
    Scheduled,
    Running,
    Stopping,
}

/// Engine configuration
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct SimulationConfig {
    /// The virtual routes the engine may target
    pub virtual_routes: Vec<String>,
    /// Target emissions per second
    pub target_rps: u32,
    /// Fixed RNG seed for reproducible runs
    #[serde(default)]
    pub seed: Option<u64>,
}

impl Default for SimulationConfig {
    fn default() -> Self {
        Self {
            virtual_routes: vec![
                "/sim/login".to_string(),
                "/sim/search".to_string(),
                "/sim/profile".to_string(),
                "/sim/payment".to_string(),
                "/sim/signup".to_string(),
            ],
            target_rps: 200,
            seed: None,
        }
    }
}

/// Parameters of one validated run
#[derive(Debug, Clone, Serialize)]
pub struct RunSpec {
    pub virtual_source: String,
    pub pattern: AnomalyPattern,
    pub duration_s: u64,
    pub batch_size: u32,
}

/// Status snapshot for the control API
#[derive(Debug, Clone, Serialize)]
pub struct SimEngineStatus {
    pub state: SimState,
    pub active: bool,
    pub injected_target: Option<String>,
    pub pattern: Option<AnomalyPattern>,
    pub total_emitted: u64,
    pub started_at: Option<DateTime<Utc>>,
}

struct ActiveRun {
    spec: RunSpec,
    started_at: DateTime<Utc>,
    stop_tx: watch::Sender<bool>,
}

/// Owns the generator, the rate control and the run lifecycle. Emitted
/// observations go out through the sink channel the engine was built
/// with; the orchestrator consumes the other end.
pub struct SimulationEngine {
    config: SimulationConfig,
    sink: mpsc::Sender<Observation>,
    state: Arc<Mutex<SimState>>,
    run: Mutex<Option<ActiveRun>>,
    total_emitted: Arc<AtomicU64>,
}

impl SimulationEngine {
    pub fn new(config: SimulationConfig, sink: mpsc::Sender<Observation>) -> Self {
        Self {
            config,
            sink,
            state: Arc::new(Mutex::new(SimState::Idle)),
            run: Mutex::new(None),
            total_emitted: Arc::new(AtomicU64::new(0)),
        }
    }

    pub fn config(&self) -> &SimulationConfig {
        &self.config
    }

    pub fn state(&self) -> SimState {
        *self.state.lock()
    }

    pub fn is_active(&self) -> bool {
        matches!(self.state(), SimState::Scheduled | SimState::Running)
    }

    pub fn total_emitted(&self) -> u64 {
        self.total_emitted.load(Ordering::Relaxed)
    }

    pub fn status(&self) -> SimEngineStatus {
        let state = self.state();
        let active = matches!(state, SimState::Scheduled | SimState::Running);
        let run = self.run.lock();
        SimEngineStatus {
            state,
            active,
            injected_target: run.as_ref().map(|r| r.spec.virtual_source.clone()),
            pattern: run.as_ref().map(|r| r.spec.pattern),
            total_emitted: self.total_emitted(),
            started_at: run.as_ref().map(|r| r.started_at),
        }
    }

    /// Validate and launch a run. The driver task emits batches sized to
    /// hit the configured target rate and terminates on duration expiry
    /// or an explicit stop; emissions in flight complete, partial
    /// observations are never emitted.
    pub fn start(
        &self,
        virtual_source: &str,
        pattern: &str,
        duration_s: u64,
        batch_size: u32,
    ) -> Result<RunSpec, SimulationError> {
        if !self.config.virtual_routes.iter().any(|r| r == virtual_source) {
            return Err(SimulationError::InvalidTarget);
        }
        let pattern: AnomalyPattern = pattern
            .parse()
            .map_err(|_| SimulationError::InvalidPattern)?;

        {
            let mut state = self.state.lock();
            if *state != SimState::Idle {
                return Err(SimulationError::AlreadyActive);
            }
            *state = SimState::Scheduled;
        }

        let spec = RunSpec {
            virtual_source: virtual_source.to_string(),
            pattern,
            duration_s: duration_s.max(1),
            batch_size: batch_size.max(1),
        };

        let (stop_tx, stop_rx) = watch::channel(false);
        *self.run.lock() = Some(ActiveRun {
            spec: spec.clone(),
            started_at: Utc::now(),
            stop_tx,
        });

        info!(
            target = %spec.virtual_source,
            pattern = %spec.pattern,
            duration_s = spec.duration_s,
            batch_size = spec.batch_size,
            "simulation scheduled"
        );

        self.spawn_driver(spec.clone(), stop_rx);
        Ok(spec)
    }

    /// Stop an active run. Fails with NotActive on an idle engine but
    /// never perturbs state.
    pub fn stop(&self) -> Result<(), SimulationError> {
        let state = self.state();
        if !matches!(state, SimState::Scheduled | SimState::Running) {
            return Err(SimulationError::NotActive);
        }

        *self.state.lock() = SimState::Stopping;
        if let Some(run) = self.run.lock().as_ref() {
            let _ = run.stop_tx.send(true);
        }
        info!("simulation stopping");
        Ok(())
    }

    /// Reset emission counters; rejected while a run is active
    pub fn clear(&self) -> Result<(), SimulationError> {
        if self.is_active() {
            return Err(SimulationError::AlreadyActive);
        }
        self.total_emitted.store(0, Ordering::Relaxed);
        *self.run.lock() = None;
        Ok(())
    }

    fn spawn_driver(&self, spec: RunSpec, mut stop_rx: watch::Receiver<bool>) {
        let sink = self.sink.clone();
        let seed = self.config.seed;
        let target_rps = self.config.target_rps.max(1);
        let state = self.state.clone();
        let emitted = self.total_emitted.clone();

        tokio::spawn(async move {
            let mut generator = TrafficGenerator::new(seed);

            // One batch per tick, the tick period sized so batch_size
            // emissions per tick hit the target rate.
            let tick = Duration::from_secs_f64(spec.batch_size as f64 / target_rps as f64)
                .max(Duration::from_millis(10));
            // First batch goes out one full tick after launch, so a run
            // stopped immediately has emitted nothing.
            let mut interval = tokio::time::interval_at(tokio::time::Instant::now() + tick, tick);
            let deadline = tokio::time::Instant::now() + Duration::from_secs(spec.duration_s);

            {
                let mut s = state.lock();
                if *s == SimState::Scheduled {
                    *s = SimState::Running;
                }
            }
            debug!(tick_ms = tick.as_millis() as u64, "simulation driver running");

            loop {
                tokio::select! {
                    _ = interval.tick() => {
                        let batch = generator.generate_batch(
                            &spec.virtual_source,
                            spec.pattern,
                            spec.batch_size,
                        );
                        for obs in batch {
                            if sink.send(obs).await.is_err() {
                                warn!("simulation sink closed, aborting run");
                                *state.lock() = SimState::Idle;
                                return;
                            }
                            emitted.fetch_add(1, Ordering::Relaxed);
                        }
                        if tokio::time::Instant::now() >= deadline {
                            break;
                        }
                    }
                    changed = stop_rx.changed() => {
                        if changed.is_err() || *stop_rx.borrow() {
                            break;
                        }
                    }
                }
            }

            // Emissions in flight completed above, so nothing partial
            // exists. Explicit stops already surfaced Stopping; natural
            // expiry passes through it here.
            *state.lock() = SimState::Stopping;
            *state.lock() = SimState::Idle;
            info!("simulation run finished");
        });
    }
}
