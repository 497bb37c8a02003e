//! Batched non-blocking writer
//!
//! Keeps database I/O off the scoring path. Observation writes are
//! best-effort: they stage into a bounded buffer that drops its oldest
//! entry on overflow. Detection writes are never dropped; they queue
//! unbounded and each insert is idempotent on (mode, source, window_id).
//! A write failure is logged and counted, never propagated.

use std::collections::VecDeque;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;
use std::time::Duration;

use parking_lot::Mutex;
use tokio::sync::mpsc;
use tracing::{debug, error, info};

use crate::core::{Detection, Observation};

use super::Database;

/// Writer tuning knobs
#[derive(Debug, Clone)]
pub struct BatchedWriterConfig {
    /// Observation staging buffer depth; overflow drops the oldest entry
    pub observation_buffer: usize,
    /// Time between flushes
    pub flush_interval: Duration,
}

impl Default for BatchedWriterConfig {
    fn default() -> Self {
        Self {
            observation_buffer: 4096,
            flush_interval: Duration::from_millis(500),
        }
    }
}

enum WriterMessage {
    Detection(Detection),
    Flush,
    Shutdown,
}

/// Counters exposed as metrics
#[derive(Debug, Clone, Default, serde::Serialize)]
pub struct WriterMetrics {
    pub observations_written: u64,
    pub observations_dropped: u64,
    pub detections_written: u64,
    pub write_failures: u64,
    pub flushes: u64,
}

/// Cloneable handle producers use to enqueue writes. Nothing here ever
/// blocks the caller.
#[derive(Clone)]
pub struct BatchedWriterHandle {
    tx: mpsc::UnboundedSender<WriterMessage>,
    observations: Arc<Mutex<VecDeque<Observation>>>,
    buffer_depth: usize,
    observations_dropped: Arc<AtomicU64>,
    metrics: Arc<Mutex<WriterMetrics>>,
}

impl BatchedWriterHandle {
    /// Stage an observation write. On a full buffer the oldest staged
    /// observation is discarded and counted.
    pub fn record_observation(&self, obs: Observation) {
        let mut buffer = self.observations.lock();
        if buffer.len() >= self.buffer_depth {
            buffer.pop_front();
            self.observations_dropped.fetch_add(1, Ordering::Relaxed);
        }
        buffer.push_back(obs);
    }

    /// Queue a detection write; detections are never dropped
    pub fn record_detection(&self, detection: Detection) {
        let _ = self.tx.send(WriterMessage::Detection(detection));
    }

    /// Request an immediate flush
    pub fn flush(&self) {
        let _ = self.tx.send(WriterMessage::Flush);
    }

    /// Flush remaining data and stop the writer task
    pub fn shutdown(&self) {
        let _ = self.tx.send(WriterMessage::Shutdown);
    }

    pub fn metrics(&self) -> WriterMetrics {
        let mut metrics = self.metrics.lock().clone();
        metrics.observations_dropped = self.observations_dropped.load(Ordering::Relaxed);
        metrics
    }
}

/// The writer task. Owns the database connection usage; everything
/// reaches it through the handle.
pub struct BatchedWriter {
    db: Database,
    config: BatchedWriterConfig,
    observations: Arc<Mutex<VecDeque<Observation>>>,
    metrics: Arc<Mutex<WriterMetrics>>,
}

impl BatchedWriter {
    /// Spawn the writer task and return its handle
    pub fn start(db: Database, config: BatchedWriterConfig) -> BatchedWriterHandle {
        let (tx, rx) = mpsc::unbounded_channel();
        let observations = Arc::new(Mutex::new(VecDeque::with_capacity(
            config.observation_buffer.min(4096),
        )));
        let metrics = Arc::new(Mutex::new(WriterMetrics::default()));

        let handle = BatchedWriterHandle {
            tx,
            observations: observations.clone(),
            buffer_depth: config.observation_buffer.max(1),
            observations_dropped: Arc::new(AtomicU64::new(0)),
            metrics: metrics.clone(),
        };

        let writer = Self {
            db,
            config,
            observations,
            metrics,
        };
        tokio::spawn(async move { writer.run(rx).await });

        handle
    }

    async fn run(self, mut rx: mpsc::UnboundedReceiver<WriterMessage>) {
        let mut interval = tokio::time::interval(self.config.flush_interval);
        let mut pending_detections: Vec<Detection> = Vec::new();

        loop {
            tokio::select! {
                msg = rx.recv() => match msg {
                    Some(WriterMessage::Detection(detection)) => {
                        pending_detections.push(detection);
                    }
                    Some(WriterMessage::Flush) => {
                        self.flush(&mut pending_detections);
                    }
                    Some(WriterMessage::Shutdown) | None => {
                        info!("batched writer shutting down, flushing remaining rows");
                        self.flush(&mut pending_detections);
                        break;
                    }
                },
                _ = interval.tick() => {
                    self.flush(&mut pending_detections);
                }
            }
        }
    }

    fn flush(&self, pending_detections: &mut Vec<Detection>) {
        let staged: Vec<Observation> = {
            let mut buffer = self.observations.lock();
            buffer.drain(..).collect()
        };

        if staged.is_empty() && pending_detections.is_empty() {
            return;
        }

        let mut written_obs = 0u64;
        let mut written_det = 0u64;
        let mut failures = 0u64;

        for obs in &staged {
            match self.db.insert_observation(obs) {
                Ok(()) => written_obs += 1,
                Err(e) => {
                    failures += 1;
                    error!(error = %e, "observation write failed");
                }
            }
        }

        for detection in pending_detections.drain(..) {
            match self.db.insert_detection(&detection) {
                Ok(_) => written_det += 1,
                Err(e) => {
                    failures += 1;
                    error!(error = %e, "detection write failed");
                }
            }
        }

        let mut metrics = self.metrics.lock();
        metrics.observations_written += written_obs;
        metrics.detections_written += written_det;
        metrics.write_failures += failures;
        metrics.flushes += 1;
        debug!(
            observations = written_obs,
            detections = written_det,
            "writer flushed"
        );
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::core::{HttpMethod, Mode, ModelScores, Priority, RootCause};
    use crate::features::FeatureVector;
    use chrono::Utc;

    fn obs(i: u64) -> Observation {
        Observation::new(Mode::Live, "/login", HttpMethod::Get, 200).with_monotonic_us(i)
    }

    fn detection(window_id: u64) -> Detection {
        Detection {
            id: window_id,
            timestamp: Utc::now(),
            mode: Mode::Live,
            source: "/login".to_string(),
            window_id,
            features: FeatureVector::default(),
            rule_alerts: Vec::new(),
            model_scores: ModelScores::default(),
            risk_score: 0.2,
            priority: Priority::Low,
            is_anomaly: false,
            root_cause: RootCause::None,
            contributing_conditions: Vec::new(),
            root_cause_confidence: 0.0,
            resolutions: Vec::new(),
            detection_latency_ms: 0.2,
            injected_label: None,
            emergency_rank: None,
            is_correctly_detected: None,
        }
    }

    #[tokio::test]
    async fn test_writes_reach_database() {
        let db = Database::open_in_memory().unwrap();
        let handle = BatchedWriter::start(
            db.clone(),
            BatchedWriterConfig {
                flush_interval: Duration::from_millis(20),
                ..BatchedWriterConfig::default()
            },
        );

        for i in 0..5 {
            handle.record_observation(obs(i));
        }
        handle.record_detection(detection(1));
        handle.flush();

        tokio::time::timeout(Duration::from_secs(5), async {
            loop {
                if db.count_observations(Mode::Live).unwrap() == 5
                    && db.count_detections(Mode::Live).unwrap() == 1
                {
                    break;
                }
                tokio::time::sleep(Duration::from_millis(10)).await;
            }
        })
        .await
        .expect("writer flushes rows");

        let metrics = handle.metrics();
        assert_eq!(metrics.observations_written, 5);
        assert_eq!(metrics.detections_written, 1);
        assert_eq!(metrics.write_failures, 0);
    }

    #[tokio::test]
    async fn test_observation_overflow_drops_oldest() {
        let db = Database::open_in_memory().unwrap();
        let handle = BatchedWriter::start(
            db.clone(),
            BatchedWriterConfig {
                observation_buffer: 3,
                // Effectively never flush on its own during this test
                flush_interval: Duration::from_secs(3600),
            },
        );

        for i in 0..5 {
            handle.record_observation(obs(i));
        }
        assert_eq!(handle.metrics().observations_dropped, 2);

        handle.flush();
        tokio::time::timeout(Duration::from_secs(5), async {
            while db.count_observations(Mode::Live).unwrap() < 3 {
                tokio::time::sleep(Duration::from_millis(10)).await;
            }
        })
        .await
        .expect("survivors flushed");

        // Only the newest three observations survived
        assert_eq!(db.count_observations(Mode::Live).unwrap(), 3);
    }

    #[tokio::test]
    async fn test_duplicate_detection_not_written_twice() {
        let db = Database::open_in_memory().unwrap();
        let handle = BatchedWriter::start(db.clone(), BatchedWriterConfig::default());

        handle.record_detection(detection(7));
        handle.record_detection(detection(7));
        handle.flush();

        tokio::time::timeout(Duration::from_secs(5), async {
            while db.count_detections(Mode::Live).unwrap() == 0 {
                tokio::time::sleep(Duration::from_millis(10)).await;
            }
        })
        .await
        .expect("detection lands");

        assert_eq!(db.count_detections(Mode::Live).unwrap(), 1);
    }
}
