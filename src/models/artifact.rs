//! Serialized scoring artifacts
//!
//! The four statistical models and their paired scalers are trained
//! offline and shipped as JSON artifacts. This module defines the artifact
//! format, the loaders, and the calibrated default set used when no
//! artifact paths are configured.
//!
//! Every artifact carries a format version and the feature layout it was
//! trained against; a mismatch on either rejects the artifact.

use std::path::Path;

use anyhow::{bail, Context, Result};
use serde::{Deserialize, Serialize};

use crate::features::{FEATURE_COUNT, FEATURE_NAMES};

/// Artifact format version accepted by this build
pub const ARTIFACT_VERSION: u32 = 2;

/// Standard scaler: per-feature mean and standard deviation
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Scaler {
    pub mean: Vec<f64>,
    pub std: Vec<f64>,
}

impl Scaler {
    pub fn transform(&self, x: &[f64; FEATURE_COUNT]) -> [f64; FEATURE_COUNT] {
        let mut out = [0.0; FEATURE_COUNT];
        for i in 0..FEATURE_COUNT {
            let std = self.std[i].max(1e-9);
            out[i] = (x[i] - self.mean[i]) / std;
        }
        out
    }

    fn validate(&self) -> Result<()> {
        if self.mean.len() != FEATURE_COUNT || self.std.len() != FEATURE_COUNT {
            bail!(
                "scaler shape mismatch: got {}/{} values, expected {}",
                self.mean.len(),
                self.std.len(),
                FEATURE_COUNT
            );
        }
        Ok(())
    }
}

/// Logistic regression over scaled features. Used for both the failure
/// classifier and the next-window failure predictor.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct LogisticModel {
    pub weights: Vec<f64>,
    pub intercept: f64,
}

impl LogisticModel {
    pub fn predict_proba(&self, scaled: &[f64; FEATURE_COUNT]) -> f64 {
        let logit: f64 = self
            .weights
            .iter()
            .zip(scaled.iter())
            .map(|(w, x)| w * x)
            .sum::<f64>()
            + self.intercept;
        1.0 / (1.0 + (-logit).exp())
    }

    fn validate(&self) -> Result<()> {
        if self.weights.len() != FEATURE_COUNT {
            bail!(
                "logistic model has {} weights, expected {}",
                self.weights.len(),
                FEATURE_COUNT
            );
        }
        Ok(())
    }
}

/// K-means behavior clustering over scaled features
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct KMeansModel {
    pub centroids: Vec<Vec<f64>>,
}

impl KMeansModel {
    /// Nearest centroid id and its normalized distance in [0, 1)
    pub fn assign(&self, scaled: &[f64; FEATURE_COUNT]) -> (u8, f64) {
        let mut best = (0usize, f64::INFINITY);
        for (id, centroid) in self.centroids.iter().enumerate() {
            let dist: f64 = centroid
                .iter()
                .zip(scaled.iter())
                .map(|(c, x)| (c - x) * (c - x))
                .sum::<f64>()
                .sqrt();
            if dist < best.1 {
                best = (id, dist);
            }
        }
        (best.0 as u8, best.1 / (1.0 + best.1))
    }

    fn validate(&self) -> Result<()> {
        if self.centroids.is_empty() {
            bail!("k-means artifact has no centroids");
        }
        for centroid in &self.centroids {
            if centroid.len() != FEATURE_COUNT {
                bail!(
                    "k-means centroid has {} dims, expected {}",
                    centroid.len(),
                    FEATURE_COUNT
                );
            }
        }
        Ok(())
    }
}

/// One node of an isolation tree. Internal nodes split on a scaled
/// feature; leaves record how many training samples landed there.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(tag = "kind", rename_all = "snake_case")]
pub enum IsoNode {
    Split {
        feature: usize,
        threshold: f64,
        left: usize,
        right: usize,
    },
    Leaf {
        size: u32,
    },
}

/// A single isolation tree stored as a node arena with the root at 0
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct IsoTree {
    pub nodes: Vec<IsoNode>,
}

impl IsoTree {
    /// Path length from root to the leaf holding `x`, including the
    /// average-depth adjustment for unsplit leaf populations.
    fn path_length(&self, x: &[f64; FEATURE_COUNT]) -> f64 {
        let mut idx = 0usize;
        let mut depth = 0.0;
        loop {
            match &self.nodes[idx] {
                IsoNode::Leaf { size } => {
                    return depth + average_path_length(*size);
                }
                IsoNode::Split {
                    feature,
                    threshold,
                    left,
                    right,
                } => {
                    depth += 1.0;
                    idx = if x[*feature] < *threshold { *left } else { *right };
                }
            }
        }
    }

    fn validate(&self) -> Result<()> {
        for node in &self.nodes {
            if let IsoNode::Split {
                feature,
                left,
                right,
                ..
            } = node
            {
                if *feature >= FEATURE_COUNT {
                    bail!("isolation tree splits on feature {feature}, expected < {FEATURE_COUNT}");
                }
                if *left >= self.nodes.len() || *right >= self.nodes.len() {
                    bail!("isolation tree child index out of range");
                }
            }
        }
        Ok(())
    }
}

/// Isolation forest with score calibration. The raw score
/// 2^(-E[path] / c(sample_size)) is already order preserving; the
/// offset/scale pair maps it onto [0, 1] for the ensemble.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct IsolationForest {
    pub trees: Vec<IsoTree>,
    pub sample_size: u32,
    pub score_offset: f64,
    pub score_scale: f64,
}

impl IsolationForest {
    /// Anomaly score in [0, 1]; higher is more anomalous
    pub fn score(&self, scaled: &[f64; FEATURE_COUNT]) -> f64 {
        if self.trees.is_empty() {
            return 0.0;
        }
        let avg_path: f64 = self
            .trees
            .iter()
            .map(|t| t.path_length(scaled))
            .sum::<f64>()
            / self.trees.len() as f64;

        let raw = 2f64.powf(-avg_path / average_path_length(self.sample_size));
        ((raw - self.score_offset) * self.score_scale).clamp(0.0, 1.0)
    }

    fn validate(&self) -> Result<()> {
        if self.trees.is_empty() {
            bail!("isolation forest artifact has no trees");
        }
        for tree in &self.trees {
            tree.validate()?;
        }
        Ok(())
    }
}

/// Average unsuccessful-search path length in a binary search tree over
/// `n` items, the standard isolation forest normalizer.
fn average_path_length(n: u32) -> f64 {
    match n {
        0 | 1 => 0.0,
        2 => 1.0,
        n => {
            let n = n as f64;
            let harmonic = (n - 1.0).ln() + 0.577_215_664_9;
            2.0 * harmonic - 2.0 * (n - 1.0) / n
        }
    }
}

/// The model payload inside an artifact file
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(tag = "kind", rename_all = "snake_case")]
pub enum ModelPayload {
    IsolationForest(IsolationForest),
    Logistic(LogisticModel),
    KMeans(KMeansModel),
    Scaler(Scaler),
}

/// On-disk artifact envelope
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Artifact {
    pub version: u32,
    pub feature_names: Vec<String>,
    #[serde(flatten)]
    pub payload: ModelPayload,
}

impl Artifact {
    /// Load and validate an artifact file. Any version, shape or layout
    /// mismatch is an error; callers degrade the affected submodel.
    pub fn load(path: &Path) -> Result<Self> {
        let raw = std::fs::read_to_string(path)
            .with_context(|| format!("failed to read artifact {}", path.display()))?;
        let artifact: Artifact = serde_json::from_str(&raw)
            .with_context(|| format!("failed to parse artifact {}", path.display()))?;

        if artifact.version != ARTIFACT_VERSION {
            bail!(
                "artifact {} has version {}, expected {}",
                path.display(),
                artifact.version,
                ARTIFACT_VERSION
            );
        }
        if artifact.feature_names != FEATURE_NAMES {
            bail!("artifact {} was trained on a different feature layout", path.display());
        }
        match &artifact.payload {
            ModelPayload::IsolationForest(m) => m.validate()?,
            ModelPayload::Logistic(m) => m.validate()?,
            ModelPayload::KMeans(m) => m.validate()?,
            ModelPayload::Scaler(s) => s.validate()?,
        }
        Ok(artifact)
    }
}

// ---------------------------------------------------------------------------
// Calibrated defaults
// ---------------------------------------------------------------------------

/// Scaler fitted on the baseline traffic profile
pub fn default_scaler() -> Scaler {
    Scaler {
        mean: vec![7.0, 2.0, 0.5, 800.0, 0.05, 0.3, 1.5, 200.0, 400.0],
        std: vec![5.0, 1.5, 0.3, 1500.0, 0.1, 0.25, 0.8, 200.0, 500.0],
    }
}

/// Failure classifier calibrated against the training corpus
pub fn default_failure_classifier() -> LogisticModel {
    LogisticModel {
        weights: vec![0.55, 0.15, 0.0, 0.5, 2.1, 0.6, -0.35, 0.9, 0.45],
        intercept: -2.4,
    }
}

/// Next-window failure predictor; leans harder on latency trend
pub fn default_next_window_predictor() -> LogisticModel {
    LogisticModel {
        weights: vec![0.6, 0.1, 0.0, 0.4, 1.8, 0.5, -0.3, 1.0, 0.7],
        intercept: -2.6,
    }
}

/// Behavior clusters: 0 = normal, 1 = heavy traffic, 2 = bot-like
pub fn default_kmeans() -> KMeansModel {
    KMeansModel {
        centroids: vec![
            vec![0.0, -0.5, 0.0, -0.3, 0.5, -0.4, 0.3, -0.1, -0.1],
            vec![8.0, -0.3, 0.1, -0.3, 1.5, 0.3, 0.4, -0.8, -0.5],
            vec![0.0, -0.5, -1.0, -0.4, 0.0, 2.6, -1.8, -0.4, -0.4],
        ],
    }
}

/// Calibrated isolation forest. Each tree isolates one family of extremes
/// quickly while baseline traffic bottoms out in a large leaf.
pub fn default_isolation_forest() -> IsolationForest {
    use IsoNode::{Leaf, Split};

    let trees = vec![
        // error rate, then request rate, payload, latency
        IsoTree {
            nodes: vec![
                Split { feature: 4, threshold: 2.2, left: 1, right: 2 },
                Split { feature: 0, threshold: 2.5, left: 3, right: 4 },
                Leaf { size: 1 },
                Split { feature: 3, threshold: 2.5, left: 5, right: 6 },
                Leaf { size: 1 },
                Split { feature: 7, threshold: 2.5, left: 7, right: 8 },
                Leaf { size: 1 },
                Leaf { size: 120 },
                Leaf { size: 1 },
            ],
        },
        // request rate, repetition, entropy, peak latency
        IsoTree {
            nodes: vec![
                Split { feature: 0, threshold: 2.0, left: 1, right: 2 },
                Split { feature: 5, threshold: 2.0, left: 3, right: 4 },
                Leaf { size: 1 },
                Split { feature: 6, threshold: -1.2, left: 5, right: 6 },
                Leaf { size: 1 },
                Leaf { size: 2 },
                Split { feature: 8, threshold: 2.5, left: 7, right: 8 },
                Leaf { size: 119 },
                Leaf { size: 1 },
            ],
        },
        // latency, error rate, payload
        IsoTree {
            nodes: vec![
                Split { feature: 7, threshold: 2.5, left: 1, right: 2 },
                Split { feature: 4, threshold: 1.8, left: 3, right: 4 },
                Leaf { size: 1 },
                Split { feature: 3, threshold: 3.0, left: 5, right: 6 },
                Leaf { size: 2 },
                Leaf { size: 121 },
                Leaf { size: 1 },
            ],
        },
        // repetition, request rate, error rate
        IsoTree {
            nodes: vec![
                Split { feature: 5, threshold: 2.2, left: 1, right: 2 },
                Split { feature: 0, threshold: 3.0, left: 3, right: 4 },
                Leaf { size: 1 },
                Split { feature: 4, threshold: 2.2, left: 5, right: 6 },
                Leaf { size: 1 },
                Leaf { size: 122 },
                Leaf { size: 1 },
            ],
        },
    ];

    IsolationForest {
        trees,
        sample_size: 128,
        score_offset: 0.35,
        score_scale: 2.5,
    }
}
