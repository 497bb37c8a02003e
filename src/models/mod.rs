//! Model holder
//!
//! Loads the scoring artifacts once at startup and serves read-only
//! inference for the lifetime of the process. A missing or rejected
//! artifact leaves its submodel `Unavailable`; the scorer redistributes
//! the weight instead of failing the pipeline. Hot reload is out of scope.

pub mod artifact;

use std::path::PathBuf;
use std::sync::atomic::{AtomicU64, Ordering};
use std::time::Instant;

use serde::{Deserialize, Serialize};
use tracing::{info, warn};

use crate::core::SubModel;
use crate::features::{FeatureVector, FEATURE_COUNT};

use artifact::{
    Artifact, IsolationForest, KMeansModel, LogisticModel, ModelPayload, Scaler,
};

/// A loaded submodel or an explicit hole where one failed to load
pub enum ModelHandle<T> {
    Ready { scaler: Scaler, model: T },
    Unavailable,
}

impl<T> ModelHandle<T> {
    pub fn is_ready(&self) -> bool {
        matches!(self, ModelHandle::Ready { .. })
    }
}

/// Paths to one model artifact and its paired scaler
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ArtifactPair {
    pub model: PathBuf,
    pub scaler: PathBuf,
}

/// Artifact locations for the four submodels. A `None` entry falls back
/// to the calibrated defaults shipped with the crate (or to Unavailable
/// when defaults are disabled).
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct ModelPathsConfig {
    #[serde(default)]
    pub isolation_forest: Option<ArtifactPair>,
    #[serde(default)]
    pub failure_classifier: Option<ArtifactPair>,
    #[serde(default)]
    pub clustering: Option<ArtifactPair>,
    #[serde(default)]
    pub next_window_predictor: Option<ArtifactPair>,
    /// Use the calibrated default artifacts for unconfigured submodels
    #[serde(default = "default_true")]
    pub use_calibrated_defaults: bool,
}

fn default_true() -> bool {
    true
}

/// Loaded-state summary for status reporting
#[derive(Debug, Clone, Serialize)]
pub struct ModelStatus {
    pub isolation_forest: bool,
    pub failure_classifier: bool,
    pub clustering: bool,
    pub next_window_predictor: bool,
    pub inference_count: u64,
    pub avg_inference_latency_us: f64,
}

/// Immutable holder for the four submodels and their scalers
pub struct ModelSet {
    isolation_forest: ModelHandle<IsolationForest>,
    failure_classifier: ModelHandle<LogisticModel>,
    clustering: ModelHandle<KMeansModel>,
    next_window_predictor: ModelHandle<LogisticModel>,

    inference_count: AtomicU64,
    latency_sum_us: AtomicU64,
}

impl ModelSet {
    /// Load artifacts per configuration. Per-artifact failures degrade to
    /// Unavailable with a warning; startup never fails on model problems.
    pub fn from_config(config: &ModelPathsConfig) -> Self {
        let defaults = config.use_calibrated_defaults;

        let isolation_forest = load_pair(
            SubModel::IsolationForest,
            &config.isolation_forest,
            defaults.then(|| (artifact::default_scaler(), artifact::default_isolation_forest())),
            |payload| match payload {
                ModelPayload::IsolationForest(m) => Some(m),
                _ => None,
            },
        );
        let failure_classifier = load_pair(
            SubModel::FailureClassifier,
            &config.failure_classifier,
            defaults.then(|| (artifact::default_scaler(), artifact::default_failure_classifier())),
            |payload| match payload {
                ModelPayload::Logistic(m) => Some(m),
                _ => None,
            },
        );
        let clustering = load_pair(
            SubModel::Clustering,
            &config.clustering,
            defaults.then(|| (artifact::default_scaler(), artifact::default_kmeans())),
            |payload| match payload {
                ModelPayload::KMeans(m) => Some(m),
                _ => None,
            },
        );
        let next_window_predictor = load_pair(
            SubModel::NextWindowPredictor,
            &config.next_window_predictor,
            defaults.then(|| (artifact::default_scaler(), artifact::default_next_window_predictor())),
            |payload| match payload {
                ModelPayload::Logistic(m) => Some(m),
                _ => None,
            },
        );

        Self {
            isolation_forest,
            failure_classifier,
            clustering,
            next_window_predictor,
            inference_count: AtomicU64::new(0),
            latency_sum_us: AtomicU64::new(0),
        }
    }

    /// The calibrated default set
    pub fn calibrated() -> Self {
        Self::from_config(&ModelPathsConfig::default())
    }

    /// All submodels unavailable; scoring degrades to rules only
    pub fn empty() -> Self {
        Self::from_config(&ModelPathsConfig {
            use_calibrated_defaults: false,
            ..ModelPathsConfig::default()
        })
    }

    /// Drop one submodel, as when its artifact is removed at startup
    pub fn without(mut self, model: SubModel) -> Self {
        match model {
            SubModel::IsolationForest => self.isolation_forest = ModelHandle::Unavailable,
            SubModel::FailureClassifier => self.failure_classifier = ModelHandle::Unavailable,
            SubModel::Clustering => self.clustering = ModelHandle::Unavailable,
            SubModel::NextWindowPredictor => self.next_window_predictor = ModelHandle::Unavailable,
        }
        self
    }

    pub fn is_available(&self, model: SubModel) -> bool {
        match model {
            SubModel::IsolationForest => self.isolation_forest.is_ready(),
            SubModel::FailureClassifier => self.failure_classifier.is_ready(),
            SubModel::Clustering => self.clustering.is_ready(),
            SubModel::NextWindowPredictor => self.next_window_predictor.is_ready(),
        }
    }

    /// Isolation forest anomaly score in [0, 1]; None when unavailable
    pub fn predict_if(&self, features: &FeatureVector) -> Option<f64> {
        let start = Instant::now();
        let result = match &self.isolation_forest {
            ModelHandle::Ready { scaler, model } => {
                Some(model.score(&scaler.transform(&features.as_array())))
            }
            ModelHandle::Unavailable => None,
        };
        self.record_latency(start);
        result
    }

    /// Failure probability from the classification target
    pub fn predict_failure(&self, features: &FeatureVector) -> Option<f64> {
        let start = Instant::now();
        let result = match &self.failure_classifier {
            ModelHandle::Ready { scaler, model } => {
                Some(model.predict_proba(&scaler.transform(&features.as_array())))
            }
            ModelHandle::Unavailable => None,
        };
        self.record_latency(start);
        result
    }

    /// Behavior cluster id and normalized centroid distance
    pub fn assign_cluster(&self, features: &FeatureVector) -> Option<(u8, f64)> {
        let start = Instant::now();
        let result = match &self.clustering {
            ModelHandle::Ready { scaler, model } => {
                Some(model.assign(&scaler.transform(&features.as_array())))
            }
            ModelHandle::Unavailable => None,
        };
        self.record_latency(start);
        result
    }

    /// Probability the next window fails
    pub fn predict_next_failure(&self, features: &FeatureVector) -> Option<f64> {
        let start = Instant::now();
        let result = match &self.next_window_predictor {
            ModelHandle::Ready { scaler, model } => {
                Some(model.predict_proba(&scaler.transform(&features.as_array())))
            }
            ModelHandle::Unavailable => None,
        };
        self.record_latency(start);
        result
    }

    pub fn status(&self) -> ModelStatus {
        let count = self.inference_count.load(Ordering::Relaxed);
        let sum = self.latency_sum_us.load(Ordering::Relaxed);
        ModelStatus {
            isolation_forest: self.isolation_forest.is_ready(),
            failure_classifier: self.failure_classifier.is_ready(),
            clustering: self.clustering.is_ready(),
            next_window_predictor: self.next_window_predictor.is_ready(),
            inference_count: count,
            avg_inference_latency_us: if count > 0 { sum as f64 / count as f64 } else { 0.0 },
        }
    }

    fn record_latency(&self, start: Instant) {
        self.inference_count.fetch_add(1, Ordering::Relaxed);
        self.latency_sum_us
            .fetch_add(start.elapsed().as_micros() as u64, Ordering::Relaxed);
    }
}

/// Load one (scaler, model) artifact pair, falling back to the provided
/// default and degrading to Unavailable on any load error.
fn load_pair<T>(
    which: SubModel,
    paths: &Option<ArtifactPair>,
    default: Option<(Scaler, T)>,
    extract: impl Fn(ModelPayload) -> Option<T>,
) -> ModelHandle<T> {
    let Some(pair) = paths else {
        return match default {
            Some((scaler, model)) => ModelHandle::Ready { scaler, model },
            None => ModelHandle::Unavailable,
        };
    };

    let loaded = (|| -> anyhow::Result<(Scaler, T)> {
        let scaler = match Artifact::load(&pair.scaler)?.payload {
            ModelPayload::Scaler(s) => s,
            _ => anyhow::bail!("{} is not a scaler artifact", pair.scaler.display()),
        };
        let model = extract(Artifact::load(&pair.model)?.payload)
            .ok_or_else(|| anyhow::anyhow!("{} has the wrong model kind", pair.model.display()))?;
        Ok((scaler, model))
    })();

    match loaded {
        Ok((scaler, model)) => {
            info!(model = which.as_str(), "loaded scoring artifact");
            ModelHandle::Ready { scaler, model }
        }
        Err(e) => {
            warn!(model = which.as_str(), error = %e, "artifact rejected, submodel unavailable");
            ModelHandle::Unavailable
        }
    }
}

// Keep the compiler honest about the feature layout the artifacts assume.
const _: () = assert!(FEATURE_COUNT == 9);
