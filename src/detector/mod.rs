//! Detector orchestrator
//!
//! Owns the end-to-end flow: ingress filtering, window aggregation,
//! scoring, classification, remediation lookup, journaling, persistence
//! and fan-out. Also owns the per-mode counters and the mode lifecycle,
//! which is what makes the LIVE/SIM isolation invariant checkable in one
//! place.
//!
//! # Concurrency
//!
//! `observe` touches only the per-stream window lock. Each (mode,
//! source) stream owns a scoring lane: a FIFO channel drained by one
//! task, fed in seal order, so detection window ids stay strictly
//! increasing per stream while different sources score in parallel up to
//! the worker pool size. Scoring carries a soft deadline: submodel calls
//! that would start past it are abandoned and marked unavailable, and
//! the ensemble renormalizes over what remains.

use std::collections::HashMap;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;
use std::time::{Duration, Instant};

use chrono::Utc;
use parking_lot::{Mutex, RwLock};
use serde::Serialize;
use tokio::sync::mpsc;
use tracing::{debug, error, info};

use crate::bus::EventBus;
use crate::config::Config;
use crate::core::observation::monotonic_now_us;
use crate::core::{
    Detection, FilterDecision, Mode, ModelScores, Observation, ObservationFilter, SubModel,
    Window, WindowAggregator,
};
use crate::features::FeatureVector;
use crate::history::{AccuracySnapshot, HistoryStore, SourceStats};
use crate::models::ModelSet;
use crate::resolution::ResolutionCatalog;
use crate::root_cause::RootCauseClassifier;
use crate::rules::RuleEngine;
use crate::scoring::HybridScorer;
use crate::simulation::{
    RunSpec, SimEngineStatus, SimulationEngine, SimulationError,
};
use crate::storage::{BatchedWriter, BatchedWriterConfig, BatchedWriterHandle, Database};

/// Rolling sample size for the live response-time average
const ROLLING_SAMPLE: usize = 100;

/// Per-mode counters. SIM activity never touches the LIVE instance and
/// vice versa; both live side by side so the isolation is visible here.
#[derive(Default)]
struct ModeState {
    total_requests: AtomicU64,
    ignored: AtomicU64,
    anomalies: AtomicU64,
    error_count: AtomicU64,
    per_source: Mutex<HashMap<String, u64>>,
    response_times: Mutex<std::collections::VecDeque<f64>>,
}

impl ModeState {
    fn record(&self, obs: &Observation) {
        self.total_requests.fetch_add(1, Ordering::Relaxed);
        if obs.is_error() {
            self.error_count.fetch_add(1, Ordering::Relaxed);
        }
        *self.per_source.lock().entry(obs.source.clone()).or_insert(0) += 1;

        let mut times = self.response_times.lock();
        times.push_back(obs.latency_ms);
        if times.len() > ROLLING_SAMPLE {
            times.pop_front();
        }
    }

    fn avg_response_time(&self) -> f64 {
        let times = self.response_times.lock();
        if times.is_empty() {
            return 0.0;
        }
        times.iter().sum::<f64>() / times.len() as f64
    }

    fn reset(&self) {
        self.total_requests.store(0, Ordering::Relaxed);
        self.ignored.store(0, Ordering::Relaxed);
        self.anomalies.store(0, Ordering::Relaxed);
        self.error_count.store(0, Ordering::Relaxed);
        self.per_source.lock().clear();
        self.response_times.lock().clear();
    }
}

/// LIVE statistics payload
#[derive(Debug, Clone, Serialize)]
pub struct LiveStats {
    pub mode: &'static str,
    pub total_requests: u64,
    pub current_window_count: usize,
    pub windows_processed: u64,
    pub status: &'static str,
    pub per_source_counts: HashMap<String, u64>,
    pub avg_response_time_ms: f64,
    pub error_count: u64,
}

/// SIM statistics payload
#[derive(Debug, Clone, Serialize)]
pub struct SimStats {
    pub mode: &'static str,
    pub active: bool,
    pub injected_target: Option<String>,
    pub pattern: Option<String>,
    pub total_requests: u64,
    pub windows_processed: u64,
    pub anomalies_detected: u64,
    pub accuracy: AccuracySnapshot,
    pub current_window_count: usize,
    pub priority_distribution: HashMap<String, u64>,
    pub per_source: HashMap<String, SourceStats>,
}

/// Final snapshot returned by a simulation stop
#[derive(Debug, Clone, Serialize)]
pub struct SimFinalStats {
    pub total_requests: u64,
    pub total_emitted: u64,
    pub windows_processed: u64,
    pub anomalies_detected: u64,
    pub accuracy: AccuracySnapshot,
}

/// The detection pipeline orchestrator
pub struct Detector {
    filter: ObservationFilter,
    aggregator: WindowAggregator,
    models: ModelSet,
    rules: RuleEngine,
    scorer: HybridScorer,
    classifier: RootCauseClassifier,
    catalog: ResolutionCatalog,
    history: HistoryStore,
    bus: EventBus,
    simulation: SimulationEngine,
    db: Option<Database>,
    writer: Option<BatchedWriterHandle>,

    live: ModeState,
    sim: ModeState,
    detection_seq: AtomicU64,
    scoring_deadline: Duration,
    lanes: RwLock<HashMap<(Mode, String), mpsc::UnboundedSender<Window>>>,
    /// Bounds concurrent scoring to roughly the core count
    scoring_slots: Arc<tokio::sync::Semaphore>,
}

impl Detector {
    /// Build the pipeline and spawn its background tasks (simulation
    /// consumer and, when a database is given, the batched writer).
    /// Requires a running tokio runtime.
    pub fn new(config: &Config, models: ModelSet, db: Option<Database>) -> Arc<Self> {
        let writer = db.as_ref().map(|db| {
            BatchedWriter::start(
                db.clone(),
                BatchedWriterConfig {
                    observation_buffer: config.database.observation_buffer,
                    flush_interval: Duration::from_millis(config.database.flush_interval_ms),
                },
            )
        });

        let (sim_tx, sim_rx) = mpsc::channel::<Observation>(8192);
        let simulation = SimulationEngine::new(config.simulation.clone(), sim_tx);

        let detector = Arc::new(Self {
            filter: ObservationFilter::new(
                &config.live_tracked_routes,
                &config.simulation.virtual_routes,
            ),
            aggregator: WindowAggregator::new(config.window_size),
            models,
            rules: RuleEngine::new(config.rules.clone()),
            scorer: HybridScorer::new(config.scoring.weights, config.scoring.bands),
            classifier: RootCauseClassifier::new(config.root_cause.clone()),
            catalog: ResolutionCatalog,
            history: HistoryStore::new(config.history_capacity),
            bus: EventBus::new(config.subscriber_queue_depth),
            simulation,
            db,
            writer,
            live: ModeState::default(),
            sim: ModeState::default(),
            detection_seq: AtomicU64::new(0),
            scoring_deadline: Duration::from_millis(config.scoring_deadline_ms.max(1)),
            lanes: RwLock::new(HashMap::new()),
            scoring_slots: Arc::new(tokio::sync::Semaphore::new(num_cpus::get().max(1))),
        });

        // Consume simulator emissions through the same ingress as live
        // traffic; only the mode differs.
        let consumer = detector.clone();
        tokio::spawn(async move {
            let mut rx = sim_rx;
            while let Some(obs) = rx.recv().await {
                consumer.observe(obs);
            }
            debug!("simulation ingress closed");
        });

        detector
    }

    /// Ingest one observation: filter, count, stage for persistence, and
    /// aggregate. Seals and schedules a scoring task when the stream's
    /// window fills. Never blocks beyond the per-stream window lock.
    pub fn observe(self: &Arc<Self>, mut obs: Observation) {
        if obs.monotonic_us == 0 {
            obs.monotonic_us = monotonic_now_us();
        }

        let state = self.mode_state(obs.mode);
        if self.filter.classify(&obs) == FilterDecision::Ignored {
            state.ignored.fetch_add(1, Ordering::Relaxed);
            return;
        }

        state.record(&obs);
        if let Some(writer) = &self.writer {
            writer.record_observation(obs.clone());
        }

        if let Some(window) = self.aggregator.push(obs) {
            // Sends preserve seal order; the lane worker scores them one
            // at a time, so window ids stay ordered per stream.
            let _ = self.lane(window.mode, &window.source).send(window);
        }
    }

    /// Score one sealed window end to end and emit the detection
    fn score_window(self: &Arc<Self>, window: Window) {
        if window.len() != self.aggregator.window_size() {
            error!(
                window_id = window.id,
                source = %window.source,
                len = window.len(),
                "sealed window has the wrong size, dropping"
            );
            return;
        }

        let start = Instant::now();
        let features = FeatureVector::extract(&window);
        let rule_outcome = self.rules.evaluate(&features);

        let mut unavailable: Vec<SubModel> = Vec::new();
        let anomaly_score = self.submodel(start, SubModel::IsolationForest, &mut unavailable, || {
            self.models.predict_if(&features)
        });
        let failure_probability =
            self.submodel(start, SubModel::FailureClassifier, &mut unavailable, || {
                self.models.predict_failure(&features)
            });
        let cluster = self.submodel(start, SubModel::Clustering, &mut unavailable, || {
            self.models.assign_cluster(&features)
        });
        let next_window_failure_probability =
            self.submodel(start, SubModel::NextWindowPredictor, &mut unavailable, || {
                self.models.predict_next_failure(&features)
            });

        let model_scores = ModelScores {
            anomaly_score,
            failure_probability,
            cluster_id: cluster.map(|(id, _)| id),
            cluster_distance: cluster.map(|(_, dist)| dist),
            next_window_failure_probability,
            unavailable,
        };

        let assessment = self.scorer.score(&rule_outcome, &model_scores);
        let root_cause = self.classifier.classify(&features, &model_scores);
        let resolutions = self
            .catalog
            .generate(root_cause.root_cause, &root_cause.contributing_conditions);

        let injected_label = match window.mode {
            Mode::Sim => majority_label(&window),
            Mode::Live => None,
        };

        let mut detection = Detection {
            id: self.detection_seq.fetch_add(1, Ordering::Relaxed) + 1,
            timestamp: Utc::now(),
            mode: window.mode,
            source: window.source.clone(),
            window_id: window.id,
            features,
            rule_alerts: rule_outcome.alerts.clone(),
            model_scores,
            risk_score: assessment.risk_score,
            priority: assessment.priority,
            is_anomaly: assessment.is_anomaly,
            root_cause: root_cause.root_cause,
            contributing_conditions: root_cause.contributing_conditions,
            root_cause_confidence: root_cause.confidence,
            resolutions,
            detection_latency_ms: start.elapsed().as_secs_f64() * 1000.0,
            injected_label,
            emergency_rank: None,
            is_correctly_detected: None,
        };

        if assessment.is_anomaly {
            self.mode_state(window.mode)
                .anomalies
                .fetch_add(1, Ordering::Relaxed);
        }

        // The simulation journal assigns rank and correctness; the copy
        // that is persisted and broadcast carries them too.
        if window.mode == Mode::Sim {
            detection = self.history.append(detection);
        }

        debug!(
            mode = %detection.mode,
            source = %detection.source,
            window_id = detection.window_id,
            risk = detection.risk_score,
            priority = %detection.priority,
            root_cause = %detection.root_cause,
            "window scored"
        );

        if let Some(writer) = &self.writer {
            writer.record_detection(detection.clone());
        }
        self.bus.publish(Arc::new(detection));
    }

    /// Run one submodel call under the scoring deadline. A call that
    /// would start past the deadline, or a submodel that is not loaded,
    /// lands in the unavailable list.
    fn submodel<T>(
        &self,
        start: Instant,
        which: SubModel,
        unavailable: &mut Vec<SubModel>,
        call: impl FnOnce() -> Option<T>,
    ) -> Option<T> {
        if start.elapsed() >= self.scoring_deadline {
            debug!(model = which.as_str(), "scoring deadline hit, abandoning submodel");
            unavailable.push(which);
            return None;
        }
        match call() {
            Some(value) => Some(value),
            None => {
                unavailable.push(which);
                None
            }
        }
    }

    fn mode_state(&self, mode: Mode) -> &ModeState {
        match mode {
            Mode::Live => &self.live,
            Mode::Sim => &self.sim,
        }
    }

    /// The scoring lane for one stream, spawning its worker on first use
    fn lane(self: &Arc<Self>, mode: Mode, source: &str) -> mpsc::UnboundedSender<Window> {
        let key = (mode, source.to_string());
        if let Some(tx) = self.lanes.read().get(&key) {
            return tx.clone();
        }

        let mut lanes = self.lanes.write();
        if let Some(tx) = lanes.get(&key) {
            return tx.clone();
        }

        let (tx, mut rx) = mpsc::unbounded_channel::<Window>();
        let detector = self.clone();
        tokio::spawn(async move {
            while let Some(window) = rx.recv().await {
                let Ok(_slot) = detector.scoring_slots.acquire().await else {
                    break;
                };
                detector.score_window(window);
            }
        });
        lanes.insert(key, tx.clone());
        tx
    }

    // --- mode control -----------------------------------------------------

    /// Forwarded to the simulation engine; LIVE is always on
    pub fn start_simulation(
        &self,
        virtual_source: &str,
        pattern: &str,
        duration_s: u64,
        batch_size: u32,
    ) -> Result<RunSpec, SimulationError> {
        self.simulation
            .start(virtual_source, pattern, duration_s, batch_size)
    }

    /// Stop the active run and return the final SIM snapshot
    pub fn stop_simulation(&self) -> Result<SimFinalStats, SimulationError> {
        self.simulation.stop()?;
        Ok(SimFinalStats {
            total_requests: self.sim.total_requests.load(Ordering::Relaxed),
            total_emitted: self.simulation.total_emitted(),
            windows_processed: self.aggregator.sealed_total(Mode::Sim),
            anomalies_detected: self.sim.anomalies.load(Ordering::Relaxed),
            accuracy: self.history.accuracy(),
        })
    }

    /// Drop the simulation journal, counters and open SIM windows.
    /// Rejected while a run is active; LIVE state is never touched.
    pub fn clear_simulation(&self) -> Result<(), SimulationError> {
        self.simulation.clear()?;
        self.history.clear();
        self.aggregator.clear_sim();
        self.sim.reset();
        info!("simulation state cleared");
        Ok(())
    }

    // --- accessors --------------------------------------------------------

    pub fn bus(&self) -> &EventBus {
        &self.bus
    }

    pub fn history(&self) -> &HistoryStore {
        &self.history
    }

    pub fn models(&self) -> &ModelSet {
        &self.models
    }

    pub fn simulation_status(&self) -> SimEngineStatus {
        self.simulation.status()
    }

    pub fn writer_metrics(&self) -> Option<crate::storage::writer::WriterMetrics> {
        self.writer.as_ref().map(|w| w.metrics())
    }

    /// Authoritative newest-first detection list for one mode. Reads the
    /// database when one is attached (persisted rows include everything
    /// flushed so far), otherwise serves the in-memory journal for SIM.
    pub fn list_detections(&self, mode: Mode, limit: u32) -> Vec<Detection> {
        if let Some(writer) = &self.writer {
            writer.flush();
        }
        if let Some(db) = &self.db {
            match db.list_detections(mode, limit) {
                Ok(detections) => return detections,
                Err(e) => error!(error = %e, "detection read failed"),
            }
        }
        match mode {
            Mode::Sim => self.history.recent(limit as usize),
            Mode::Live => Vec::new(),
        }
    }

    pub fn live_stats(&self) -> LiveStats {
        let total = self.live.total_requests.load(Ordering::Relaxed);
        LiveStats {
            mode: "LIVE",
            total_requests: total,
            current_window_count: self.aggregator.open_total(Mode::Live),
            windows_processed: self.aggregator.sealed_total(Mode::Live),
            status: if total > 0 { "active" } else { "idle" },
            per_source_counts: self.live.per_source.lock().clone(),
            avg_response_time_ms: self.live.avg_response_time(),
            error_count: self.live.error_count.load(Ordering::Relaxed),
        }
    }

    pub fn sim_stats(&self) -> SimStats {
        let status = self.simulation.status();
        let priority_distribution = self
            .history
            .priority_distribution()
            .into_iter()
            .map(|(priority, count)| (priority.as_str().to_string(), count))
            .collect();

        SimStats {
            mode: "SIM",
            active: status.active,
            injected_target: status.injected_target,
            pattern: status.pattern.map(|p| p.as_str().to_string()),
            total_requests: self.sim.total_requests.load(Ordering::Relaxed),
            windows_processed: self.aggregator.sealed_total(Mode::Sim),
            anomalies_detected: self.sim.anomalies.load(Ordering::Relaxed),
            accuracy: self.history.accuracy(),
            current_window_count: self.aggregator.open_total(Mode::Sim),
            priority_distribution,
            per_source: self.history.source_stats(),
        }
    }
}

/// Ground-truth label for a SIM window: the most frequent injected label
/// among its observations (MIXED runs blend patterns within a window).
fn majority_label(window: &Window) -> Option<String> {
    let mut counts: HashMap<&str, u32> = HashMap::new();
    for obs in &window.observations {
        if let Some(label) = obs.injected_label.as_deref() {
            *counts.entry(label).or_insert(0) += 1;
        }
    }
    counts
        .into_iter()
        .max_by_key(|(_, count)| *count)
        .map(|(label, _)| label.to_string())
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::core::HttpMethod;
    use crate::simulation::TrafficGenerator;
    use std::time::Duration;

    fn test_config() -> Config {
        let mut config = Config::default();
        config.simulation.seed = Some(17);
        config
    }

    fn detector() -> Arc<Detector> {
        Detector::new(&test_config(), ModelSet::calibrated(), None)
    }

    fn live_obs(route: &str, i: u64) -> Observation {
        Observation::new(Mode::Live, route, HttpMethod::Post, 200)
            .with_monotonic_us((i + 1) * 150_000)
            .with_latency(120.0)
            .with_user_agent("Mozilla/5.0")
    }

    async fn wait_for<F: Fn() -> bool>(cond: F) {
        tokio::time::timeout(Duration::from_secs(5), async {
            while !cond() {
                tokio::time::sleep(Duration::from_millis(10)).await;
            }
        })
        .await
        .expect("condition holds within deadline");
    }

    #[tokio::test]
    async fn test_tracked_observations_count_per_mode() {
        let detector = detector();

        detector.observe(live_obs("/login", 1));
        detector.observe(live_obs("/metrics", 2)); // not tracked

        let stats = detector.live_stats();
        assert_eq!(stats.total_requests, 1);
        assert_eq!(stats.status, "active");
        assert_eq!(stats.per_source_counts.get("/login"), Some(&1));
        assert_eq!(detector.sim_stats().total_requests, 0);
    }

    #[tokio::test]
    async fn test_window_seal_produces_one_detection() {
        let detector = detector();
        let mut sub = detector.bus().subscribe();

        for i in 0..10 {
            detector.observe(live_obs("/login", i));
        }

        let detection = tokio::time::timeout(Duration::from_secs(5), sub.recv())
            .await
            .expect("detection published");
        assert_eq!(detection.mode, Mode::Live);
        assert_eq!(detection.source, "/login");
        assert_eq!(detection.window_id, 1);
        assert!(detection.injected_label.is_none());
    }

    #[tokio::test]
    async fn test_per_source_window_ids_strictly_increase() {
        let detector = detector();
        let mut sub = detector.bus().subscribe();

        for i in 0..50 {
            detector.observe(live_obs("/login", i));
        }

        let mut last = 0;
        for _ in 0..5 {
            let detection = tokio::time::timeout(Duration::from_secs(5), sub.recv())
                .await
                .expect("detection published");
            assert!(detection.window_id > last);
            last = detection.window_id;
        }
    }

    #[tokio::test]
    async fn test_simulated_error_burst_detected() {
        let detector = detector();
        let mut generator = TrafficGenerator::new(Some(5));

        for obs in generator.generate_batch("/sim/payment", crate::simulation::AnomalyPattern::ErrorBurst, 20) {
            detector.observe(obs);
        }

        wait_for(|| detector.history().len() == 2).await;

        let top = detector.history().top_emergencies(2);
        for detection in &top {
            assert!(detection.is_anomaly);
            assert!(detection
                .rule_alerts
                .contains(&crate::core::RuleAlert::ErrorBurst));
            assert_eq!(detection.root_cause, crate::core::RootCause::BackendInstability);
            assert!(detection.priority >= crate::core::Priority::High);
            assert_eq!(detection.is_correctly_detected, Some(true));
        }

        let stats = detector.sim_stats();
        assert_eq!(stats.accuracy.total, 2);
        assert_eq!(stats.accuracy.correct, 2);
        assert_eq!(stats.anomalies_detected, 2);
    }

    #[tokio::test]
    async fn test_sim_activity_never_touches_live() {
        let detector = detector();
        let mut generator = TrafficGenerator::new(Some(9));

        for obs in generator.generate_batch("/sim/login", crate::simulation::AnomalyPattern::RateSpike, 20) {
            detector.observe(obs);
        }
        wait_for(|| detector.sim_stats().windows_processed == 10).await;

        let live = detector.live_stats();
        assert_eq!(live.total_requests, 0);
        assert_eq!(live.windows_processed, 0);
        assert_eq!(live.status, "idle");

        detector.observe(live_obs("/search", 1));
        assert_eq!(detector.live_stats().total_requests, 1);
    }

    #[tokio::test]
    async fn test_degraded_models_renormalize() {
        let config = test_config();
        let detector = Detector::new(
            &config,
            ModelSet::calibrated().without(SubModel::IsolationForest),
            None,
        );
        let mut sub = detector.bus().subscribe();

        for i in 0..10 {
            detector.observe(live_obs("/login", i));
        }

        let detection = tokio::time::timeout(Duration::from_secs(5), sub.recv())
            .await
            .expect("detection published");
        assert!(detection.model_scores.anomaly_score.is_none());
        assert!(detection
            .model_scores
            .unavailable
            .contains(&SubModel::IsolationForest));
        assert!(detection.model_scores.failure_probability.is_some());
        assert!((0.0..=1.0).contains(&detection.risk_score));
    }

    #[tokio::test]
    async fn test_clear_simulation_resets_sim_only() {
        let detector = detector();
        let mut generator = TrafficGenerator::new(Some(2));

        for obs in generator.generate_batch("/sim/login", crate::simulation::AnomalyPattern::Normal, 10) {
            detector.observe(obs);
        }
        detector.observe(live_obs("/login", 1));
        wait_for(|| detector.history().len() == 1).await;

        detector.clear_simulation().unwrap();

        let sim = detector.sim_stats();
        assert_eq!(sim.total_requests, 0);
        assert_eq!(sim.accuracy.total, 0);
        assert!(detector.history().top_emergencies(5).is_empty());
        assert_eq!(detector.live_stats().total_requests, 1);
    }

    #[tokio::test]
    async fn test_majority_label() {
        let mut generator = TrafficGenerator::new(Some(4));
        let agg = WindowAggregator::new(10);
        let mut window = None;
        for obs in generator.generate_batch("/sim/login", crate::simulation::AnomalyPattern::ParamRepetition, 10) {
            window = agg.push(obs);
        }
        assert_eq!(
            majority_label(&window.unwrap()),
            Some("PARAM_REPETITION".to_string())
        );
    }
}
