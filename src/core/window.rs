//! Window aggregation
//!
//! Groups tracked observations into fixed-size tumbling windows, one
//! independent stream per (mode, source). A window seals when it reaches
//! the configured size and a fresh window begins with the next
//! observation. Window ids are strictly increasing per stream.

use std::collections::HashMap;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;

use chrono::{DateTime, Utc};
use parking_lot::{Mutex, RwLock};
use serde::{Deserialize, Serialize};

use super::observation::{Mode, Observation};

/// Default number of observations per window
pub const DEFAULT_WINDOW_SIZE: usize = 10;

/// A sealed window: exactly `window_size` consecutive observations for one
/// (mode, source) stream. Only the aggregator constructs these, so a
/// `Window` in hand always holds a full set.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Window {
    /// Traffic mode of the stream
    pub mode: Mode,
    /// Source key of the stream
    pub source: String,
    /// Monotonic id within the (mode, source) stream, starting at 1
    pub id: u64,
    /// Wall-clock time of the first observation
    pub opened_at: DateTime<Utc>,
    /// Wall-clock time of the last observation
    pub closed_at: DateTime<Utc>,
    /// The observations, in arrival order
    pub observations: Vec<Observation>,
}

impl Window {
    pub fn len(&self) -> usize {
        self.observations.len()
    }

    pub fn is_empty(&self) -> bool {
        self.observations.is_empty()
    }

    /// Window duration in seconds from the monotonic stamps, floored at
    /// 100ms so a burst arriving in one instant still yields a finite rate.
    pub fn duration_secs(&self) -> f64 {
        let first = self.observations.first().map(|o| o.monotonic_us).unwrap_or(0);
        let last = self.observations.last().map(|o| o.monotonic_us).unwrap_or(0);
        ((last.saturating_sub(first)) as f64 / 1_000_000.0).max(0.1)
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Hash)]
struct StreamKey {
    mode: Mode,
    source: String,
}

/// Mutable state for one (mode, source) stream
#[derive(Debug, Default)]
struct StreamState {
    open: Vec<Observation>,
    sealed_count: u64,
}

/// Telemetry snapshot for one stream
#[derive(Debug, Clone, Copy, Default, Serialize)]
pub struct StreamSnapshot {
    /// Observations sitting in the open window
    pub open_count: usize,
    /// Windows sealed so far
    pub sealed_total: u64,
}

/// Per (mode, source) tumbling window aggregator.
///
/// Concurrency: the stream map is behind an RwLock that is only
/// write-locked when a new stream appears; each push serializes on its own
/// stream mutex, so producers for different sources never contend.
/// In-memory only; a restart discards open windows, which is observable
/// only as a brief gap in detections, never as mis-scoring.
pub struct WindowAggregator {
    window_size: usize,
    streams: RwLock<HashMap<StreamKey, Arc<Mutex<StreamState>>>>,
    sealed_live: AtomicU64,
    sealed_sim: AtomicU64,
}

impl WindowAggregator {
    pub fn new(window_size: usize) -> Self {
        Self {
            window_size: window_size.max(1),
            streams: RwLock::new(HashMap::new()),
            sealed_live: AtomicU64::new(0),
            sealed_sim: AtomicU64::new(0),
        }
    }

    pub fn window_size(&self) -> usize {
        self.window_size
    }

    fn stream(&self, key: StreamKey) -> Arc<Mutex<StreamState>> {
        if let Some(state) = self.streams.read().get(&key) {
            return state.clone();
        }
        self.streams
            .write()
            .entry(key)
            .or_insert_with(|| Arc::new(Mutex::new(StreamState::default())))
            .clone()
    }

    /// Append an observation to its stream. Returns the sealed window when
    /// this observation is the one that fills it. Cannot fail.
    pub fn push(&self, obs: Observation) -> Option<Window> {
        let key = StreamKey {
            mode: obs.mode,
            source: obs.source.clone(),
        };
        let stream = self.stream(key);
        let mut state = stream.lock();

        state.open.push(obs);
        if state.open.len() < self.window_size {
            return None;
        }

        state.sealed_count += 1;
        let observations = std::mem::take(&mut state.open);
        let sealed_count = state.sealed_count;
        drop(state);

        let first = &observations[0];
        let last = &observations[observations.len() - 1];
        let window = Window {
            mode: first.mode,
            source: first.source.clone(),
            id: sealed_count,
            opened_at: first.timestamp,
            closed_at: last.timestamp,
            observations,
        };

        match window.mode {
            Mode::Live => self.sealed_live.fetch_add(1, Ordering::Relaxed),
            Mode::Sim => self.sealed_sim.fetch_add(1, Ordering::Relaxed),
        };

        Some(window)
    }

    /// Telemetry for one stream
    pub fn snapshot(&self, mode: Mode, source: &str) -> StreamSnapshot {
        let key = StreamKey {
            mode,
            source: source.to_string(),
        };
        match self.streams.read().get(&key) {
            Some(stream) => {
                let state = stream.lock();
                StreamSnapshot {
                    open_count: state.open.len(),
                    sealed_total: state.sealed_count,
                }
            }
            None => StreamSnapshot::default(),
        }
    }

    /// Total windows sealed for a mode
    pub fn sealed_total(&self, mode: Mode) -> u64 {
        match mode {
            Mode::Live => self.sealed_live.load(Ordering::Relaxed),
            Mode::Sim => self.sealed_sim.load(Ordering::Relaxed),
        }
    }

    /// Observations currently held in open windows for a mode
    pub fn open_total(&self, mode: Mode) -> usize {
        self.streams
            .read()
            .iter()
            .filter(|(key, _)| key.mode == mode)
            .map(|(_, stream)| stream.lock().open.len())
            .sum()
    }

    /// Drop all SIM streams, discarding partially filled windows. LIVE
    /// streams are untouched.
    pub fn clear_sim(&self) {
        self.streams.write().retain(|key, _| key.mode == Mode::Live);
        self.sealed_sim.store(0, Ordering::Relaxed);
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::core::observation::HttpMethod;

    fn obs(mode: Mode, source: &str, i: u64) -> Observation {
        Observation::new(mode, source, HttpMethod::Get, 200)
            .with_monotonic_us(i * 100_000)
            .with_latency(120.0)
    }

    #[test]
    fn test_window_seals_at_size() {
        let agg = WindowAggregator::new(10);

        for i in 0..9 {
            assert!(agg.push(obs(Mode::Live, "/login", i)).is_none());
        }
        let window = agg.push(obs(Mode::Live, "/login", 9)).expect("tenth seals");

        assert_eq!(window.id, 1);
        assert_eq!(window.len(), 10);
        assert_eq!(window.mode, Mode::Live);
        assert_eq!(window.source, "/login");
    }

    #[test]
    fn test_window_ids_strictly_increase() {
        let agg = WindowAggregator::new(5);
        let mut ids = Vec::new();

        for i in 0..20 {
            if let Some(w) = agg.push(obs(Mode::Sim, "/sim/login", i)) {
                ids.push(w.id);
            }
        }

        assert_eq!(ids, vec![1, 2, 3, 4]);
    }

    #[test]
    fn test_streams_are_independent() {
        let agg = WindowAggregator::new(10);

        for i in 0..9 {
            agg.push(obs(Mode::Live, "/login", i));
            agg.push(obs(Mode::Live, "/search", i));
        }
        // Filling one stream seals only that stream
        let window = agg.push(obs(Mode::Live, "/login", 9)).unwrap();
        assert_eq!(window.source, "/login");
        assert_eq!(agg.snapshot(Mode::Live, "/search").open_count, 9);
    }

    #[test]
    fn test_modes_do_not_share_streams() {
        let agg = WindowAggregator::new(10);

        for i in 0..9 {
            agg.push(obs(Mode::Sim, "/sim/login", i));
        }
        // Same source key in LIVE is a different stream
        assert!(agg.push(obs(Mode::Live, "/sim/login", 0)).is_none());
        assert_eq!(agg.snapshot(Mode::Sim, "/sim/login").open_count, 9);
        assert_eq!(agg.snapshot(Mode::Live, "/sim/login").open_count, 1);
    }

    #[test]
    fn test_no_observation_spans_two_windows() {
        let agg = WindowAggregator::new(3);
        let mut total = 0usize;

        for i in 0..9 {
            if let Some(w) = agg.push(obs(Mode::Live, "/login", i)) {
                total += w.len();
            }
        }

        assert_eq!(total, 9);
        assert_eq!(agg.snapshot(Mode::Live, "/login").open_count, 0);
    }

    #[test]
    fn test_duration_floor() {
        let agg = WindowAggregator::new(2);
        agg.push(obs(Mode::Live, "/login", 0).with_monotonic_us(5));
        let w = agg.push(obs(Mode::Live, "/login", 0).with_monotonic_us(10)).unwrap();
        assert!((w.duration_secs() - 0.1).abs() < f64::EPSILON);
    }

    #[test]
    fn test_clear_sim_keeps_live() {
        let agg = WindowAggregator::new(10);
        agg.push(obs(Mode::Sim, "/sim/login", 0));
        agg.push(obs(Mode::Live, "/login", 0));

        agg.clear_sim();

        assert_eq!(agg.snapshot(Mode::Sim, "/sim/login").open_count, 0);
        assert_eq!(agg.snapshot(Mode::Live, "/login").open_count, 1);
    }
}
