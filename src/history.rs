//! Detection history and emergency ranking
//!
//! Bounded in-memory journal of the most recent simulation detections.
//! Every append re-ranks the journal by risk (ties broken newest first)
//! and updates the accuracy counters derived from the injected label
//! versus what the pipeline detected. The counters always describe
//! exactly the detections currently in the ring.

use std::collections::HashMap;
use std::collections::VecDeque;

use parking_lot::Mutex;
use serde::Serialize;

use crate::core::{Detection, Priority, RootCause};

/// Default journal capacity
pub const DEFAULT_HISTORY_CAPACITY: usize = 1000;

/// Which accuracy bucket a journal entry falls into. Every entry lands in
/// exactly one.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum AccuracyBucket {
    Correct,
    FalsePositive,
    FalseNegative,
    /// Anomaly detected but attributed to the wrong root cause
    Miscategorized,
}

/// Accuracy counters over the current journal
#[derive(Debug, Clone, Copy, Default, PartialEq, Serialize)]
pub struct AccuracySnapshot {
    pub total: u64,
    pub correct: u64,
    pub false_positives: u64,
    pub false_negatives: u64,
    /// Fraction correct, 0 when the journal is empty
    pub accuracy: f64,
}

/// Per virtual source counters
#[derive(Debug, Clone, Default, Serialize)]
pub struct SourceStats {
    pub total: u64,
    pub anomalies: u64,
    pub correct: u64,
    pub by_label: HashMap<String, u64>,
}

#[derive(Default)]
struct Inner {
    ring: VecDeque<Detection>,
    correct: u64,
    false_positives: u64,
    false_negatives: u64,
    miscategorized: u64,
    source_stats: HashMap<String, SourceStats>,
}

/// Bounded ring of simulation detections with recomputed emergency ranks
pub struct HistoryStore {
    capacity: usize,
    inner: Mutex<Inner>,
}

impl HistoryStore {
    pub fn new(capacity: usize) -> Self {
        Self {
            capacity: capacity.max(1),
            inner: Mutex::new(Inner::default()),
        }
    }

    /// Append a detection: evict the oldest entry if full, re-rank, and
    /// update accuracy and per-source counters. Returns the stored copy
    /// with its rank and correctness fields set.
    pub fn append(&self, mut detection: Detection) -> Detection {
        let correct = is_correct(&detection);
        detection.is_correctly_detected = Some(correct);

        let mut inner = self.inner.lock();

        if inner.ring.len() == self.capacity {
            if let Some(evicted) = inner.ring.pop_front() {
                let bucket = bucket_of(&evicted);
                match bucket {
                    AccuracyBucket::Correct => inner.correct -= 1,
                    AccuracyBucket::FalsePositive => inner.false_positives -= 1,
                    AccuracyBucket::FalseNegative => inner.false_negatives -= 1,
                    AccuracyBucket::Miscategorized => inner.miscategorized -= 1,
                }
            }
        }

        match bucket_of(&detection) {
            AccuracyBucket::Correct => inner.correct += 1,
            AccuracyBucket::FalsePositive => inner.false_positives += 1,
            AccuracyBucket::FalseNegative => inner.false_negatives += 1,
            AccuracyBucket::Miscategorized => inner.miscategorized += 1,
        }

        let stats = inner
            .source_stats
            .entry(detection.source.clone())
            .or_default();
        stats.total += 1;
        if detection.is_anomaly {
            stats.anomalies += 1;
        }
        if correct {
            stats.correct += 1;
        }
        if let Some(label) = &detection.injected_label {
            *stats.by_label.entry(label.clone()).or_insert(0) += 1;
        }

        let id = detection.id;
        inner.ring.push_back(detection);
        recompute_ranks(&mut inner.ring);

        inner
            .ring
            .iter()
            .find(|d| d.id == id)
            .cloned()
            .expect("appended detection is in the ring")
    }

    /// Top-n entries by emergency rank (rank 1 first)
    pub fn top_emergencies(&self, n: usize) -> Vec<Detection> {
        let inner = self.inner.lock();
        let mut entries: Vec<Detection> = inner.ring.iter().cloned().collect();
        entries.sort_by_key(|d| d.emergency_rank.unwrap_or(u64::MAX));
        entries.truncate(n);
        entries
    }

    /// Newest-first slice of the journal
    pub fn recent(&self, n: usize) -> Vec<Detection> {
        let inner = self.inner.lock();
        inner.ring.iter().rev().take(n).cloned().collect()
    }

    pub fn accuracy(&self) -> AccuracySnapshot {
        let inner = self.inner.lock();
        let total = inner.ring.len() as u64;
        AccuracySnapshot {
            total,
            correct: inner.correct,
            false_positives: inner.false_positives,
            false_negatives: inner.false_negatives,
            accuracy: if total > 0 {
                inner.correct as f64 / total as f64
            } else {
                0.0
            },
        }
    }

    /// Count of journal entries per priority bucket
    pub fn priority_distribution(&self) -> HashMap<Priority, u64> {
        let inner = self.inner.lock();
        let mut distribution = HashMap::new();
        for detection in &inner.ring {
            *distribution.entry(detection.priority).or_insert(0) += 1;
        }
        distribution
    }

    pub fn source_stats(&self) -> HashMap<String, SourceStats> {
        self.inner.lock().source_stats.clone()
    }

    pub fn len(&self) -> usize {
        self.inner.lock().ring.len()
    }

    pub fn is_empty(&self) -> bool {
        self.inner.lock().ring.is_empty()
    }

    /// Drop the ring and zero every counter
    pub fn clear(&self) {
        *self.inner.lock() = Inner::default();
    }
}

/// Rank by risk score descending, newest first on ties. Ranks are
/// 1-based; rank 1 is the top emergency.
fn recompute_ranks(ring: &mut VecDeque<Detection>) {
    let mut order: Vec<usize> = (0..ring.len()).collect();
    order.sort_by(|&a, &b| {
        let da = &ring[a];
        let db = &ring[b];
        db.risk_score
            .partial_cmp(&da.risk_score)
            .unwrap_or(std::cmp::Ordering::Equal)
            .then_with(|| db.timestamp.cmp(&da.timestamp))
            .then_with(|| db.id.cmp(&da.id))
    });

    for (rank, idx) in order.into_iter().enumerate() {
        ring[idx].emergency_rank = Some(rank as u64 + 1);
    }
}

/// Detection correctness against the injected ground truth: clean traffic
/// must stay quiet, injected anomalies must be flagged with a root cause
/// that maps back to the injected pattern.
fn is_correct(detection: &Detection) -> bool {
    let Some(label) = detection.injected_label.as_deref() else {
        return false;
    };

    if label == "NORMAL" {
        return !detection.is_anomaly;
    }

    detection.is_anomaly && label_matches_cause(label, detection.root_cause)
}

fn label_matches_cause(label: &str, cause: RootCause) -> bool {
    match label {
        "RATE_SPIKE" => cause == RootCause::TrafficSurge,
        "ERROR_BURST" => cause == RootCause::BackendInstability,
        "PAYLOAD_ABUSE" => {
            matches!(cause, RootCause::LatencyBottleneck | RootCause::SystemOverload)
        }
        "PARAM_REPETITION" => cause == RootCause::AbuseOrBot,
        "ENDPOINT_FLOOD" => {
            matches!(cause, RootCause::TrafficSurge | RootCause::AbuseOrBot)
        }
        _ => false,
    }
}

fn bucket_of(detection: &Detection) -> AccuracyBucket {
    let label = detection.injected_label.as_deref().unwrap_or("");
    let correct = detection.is_correctly_detected.unwrap_or(false);

    if correct {
        AccuracyBucket::Correct
    } else if label == "NORMAL" {
        AccuracyBucket::FalsePositive
    } else if !detection.is_anomaly {
        AccuracyBucket::FalseNegative
    } else {
        AccuracyBucket::Miscategorized
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::core::{Mode, ModelScores};
    use crate::features::FeatureVector;
    use chrono::{TimeDelta, Utc};

    fn detection(id: u64, risk: f64, label: &str, anomaly: bool, cause: RootCause) -> Detection {
        Detection {
            id,
            timestamp: Utc::now() + TimeDelta::milliseconds(id as i64),
            mode: Mode::Sim,
            source: "/sim/login".to_string(),
            window_id: id,
            features: FeatureVector::default(),
            rule_alerts: Vec::new(),
            model_scores: ModelScores::default(),
            risk_score: risk,
            priority: Priority::Low,
            is_anomaly: anomaly,
            root_cause: cause,
            contributing_conditions: Vec::new(),
            root_cause_confidence: 0.0,
            resolutions: Vec::new(),
            detection_latency_ms: 0.1,
            injected_label: Some(label.to_string()),
            emergency_rank: None,
            is_correctly_detected: None,
        }
    }

    #[test]
    fn test_ranking_by_risk_then_recency() {
        let store = HistoryStore::new(10);
        store.append(detection(1, 0.5, "NORMAL", false, RootCause::None));
        store.append(detection(2, 0.9, "ERROR_BURST", true, RootCause::BackendInstability));
        store.append(detection(3, 0.5, "NORMAL", false, RootCause::None));

        let top = store.top_emergencies(3);
        assert_eq!(top[0].id, 2);
        assert_eq!(top[0].emergency_rank, Some(1));
        // Tie at 0.5: the newer detection (id 3) outranks the older
        assert_eq!(top[1].id, 3);
        assert_eq!(top[2].id, 1);
        assert_eq!(top[2].emergency_rank, Some(3));
    }

    #[test]
    fn test_ranking_invariant_after_every_append() {
        let store = HistoryStore::new(50);
        for i in 0..30 {
            store.append(detection(
                i,
                (i % 7) as f64 / 7.0,
                "NORMAL",
                false,
                RootCause::None,
            ));
            let entries = store.top_emergencies(50);
            for pair in entries.windows(2) {
                let (a, b) = (&pair[0], &pair[1]);
                assert!(
                    a.risk_score > b.risk_score
                        || (a.risk_score == b.risk_score && a.timestamp >= b.timestamp)
                );
            }
        }
    }

    #[test]
    fn test_eviction_keeps_counters_consistent() {
        let store = HistoryStore::new(3);
        // Three false positives
        for i in 0..3 {
            store.append(detection(i, 0.6, "NORMAL", true, RootCause::TrafficSurge));
        }
        assert_eq!(store.accuracy().false_positives, 3);

        // Pushing a correct entry evicts one false positive
        store.append(detection(10, 0.9, "ERROR_BURST", true, RootCause::BackendInstability));
        let acc = store.accuracy();
        assert_eq!(acc.total, 3);
        assert_eq!(acc.false_positives, 2);
        assert_eq!(acc.correct, 1);
    }

    #[test]
    fn test_accuracy_rules() {
        let store = HistoryStore::new(10);

        // Quiet normal window: correct
        store.append(detection(1, 0.1, "NORMAL", false, RootCause::None));
        // Flagged normal window: false positive
        store.append(detection(2, 0.6, "NORMAL", true, RootCause::TrafficSurge));
        // Missed anomaly: false negative
        store.append(detection(3, 0.2, "ERROR_BURST", false, RootCause::None));
        // Detected with matching root cause: correct
        store.append(detection(4, 0.8, "RATE_SPIKE", true, RootCause::TrafficSurge));
        // Detected with the wrong root cause: neither fp nor fn
        store.append(detection(5, 0.8, "RATE_SPIKE", true, RootCause::BackendInstability));

        let acc = store.accuracy();
        assert_eq!(acc.total, 5);
        assert_eq!(acc.correct, 2);
        assert_eq!(acc.false_positives, 1);
        assert_eq!(acc.false_negatives, 1);
        assert!((acc.accuracy - 0.4).abs() < 1e-12);
    }

    #[test]
    fn test_label_cause_mapping() {
        assert!(label_matches_cause("PAYLOAD_ABUSE", RootCause::LatencyBottleneck));
        assert!(label_matches_cause("PAYLOAD_ABUSE", RootCause::SystemOverload));
        assert!(label_matches_cause("ENDPOINT_FLOOD", RootCause::TrafficSurge));
        assert!(label_matches_cause("ENDPOINT_FLOOD", RootCause::AbuseOrBot));
        assert!(!label_matches_cause("RATE_SPIKE", RootCause::AbuseOrBot));
        assert!(!label_matches_cause("PARAM_REPETITION", RootCause::TrafficSurge));
    }

    #[test]
    fn test_per_source_stats() {
        let store = HistoryStore::new(10);
        store.append(detection(1, 0.8, "ERROR_BURST", true, RootCause::BackendInstability));
        store.append(detection(2, 0.1, "NORMAL", false, RootCause::None));

        let stats = store.source_stats();
        let login = stats.get("/sim/login").unwrap();
        assert_eq!(login.total, 2);
        assert_eq!(login.anomalies, 1);
        assert_eq!(login.correct, 2);
        assert_eq!(login.by_label.get("ERROR_BURST"), Some(&1));
    }

    #[test]
    fn test_clear_resets_everything() {
        let store = HistoryStore::new(10);
        store.append(detection(1, 0.8, "ERROR_BURST", true, RootCause::BackendInstability));
        store.clear();

        assert!(store.is_empty());
        assert_eq!(store.accuracy(), AccuracySnapshot::default());
        assert!(store.top_emergencies(5).is_empty());
        assert!(store.source_stats().is_empty());
    }

    #[test]
    fn test_priority_distribution() {
        let store = HistoryStore::new(10);
        let mut d = detection(1, 0.8, "ERROR_BURST", true, RootCause::BackendInstability);
        d.priority = Priority::High;
        store.append(d);
        let mut d = detection(2, 0.1, "NORMAL", false, RootCause::None);
        d.priority = Priority::Low;
        store.append(d);

        let dist = store.priority_distribution();
        assert_eq!(dist.get(&Priority::High), Some(&1));
        assert_eq!(dist.get(&Priority::Low), Some(&1));
    }
}
