//! Isolation-forest anomaly scoring with graceful degradation.
//!
//! The scorer wraps an optional [`ModelBundle`]: when no bundle is loaded
//! every prediction is exactly `0.0` and the pipeline runs in rules-only
//! mode. Bundle replacement is atomic from the caller's viewpoint: an
//! in-flight prediction observes either the old or the new bundle, never a
//! torn state.

pub mod bundle;
pub mod forest;
pub mod trainer;

pub use bundle::{ModelBundle, ScoreStats};
pub use forest::IsolationForest;
pub use trainer::{train_and_save, TrainingOptions, TrainingReport, MIN_TRAINING_WINDOWS};

use crate::features::FeatureVector;
use log::{debug, error, info, warn};
use std::path::{Path, PathBuf};
use std::sync::{Arc, RwLock};

/// Steepness of the sigmoid mapping raw decision scores to `[0, 1]`
const SIGMOID_STEEPNESS: f64 = 5.0;

/// Map a decision-function score to a normalized anomaly score.
///
/// The estimator reports positive = inlier, so the sigmoid is inverted:
/// the output grows towards 1 as the raw score goes negative.
pub fn sigmoid_normalize(raw_score: f64) -> f64 {
    (1.0 / (1.0 + (SIGMOID_STEEPNESS * raw_score).exp())).clamp(0.0, 1.0)
}

/// Thread-safe scorer holding the currently published model bundle
pub struct AnomalyScorer {
    bundle: RwLock<Option<Arc<ModelBundle>>>,
    model_path: PathBuf,
}

impl AnomalyScorer {
    /// Create a scorer bound to `model_path` and attempt an initial load.
    ///
    /// A missing or unreadable bundle is not an error: the scorer starts
    /// unloaded and the service runs in rules-only mode.
    pub fn open(model_path: impl Into<PathBuf>) -> Self {
        let scorer = AnomalyScorer {
            bundle: RwLock::new(None),
            model_path: model_path.into(),
        };
        scorer.load();
        scorer
    }

    /// Load the bundle from the remembered path. Returns `true` on success.
    ///
    /// On a missing file the scorer stays as it is (warn only). On a corrupt
    /// file the previously published bundle, if any, is retained.
    pub fn load(&self) -> bool {
        let path = &self.model_path;
        if !path.exists() {
            warn!(
                "Model file not found at {} - running in rules-only mode",
                path.display()
            );
            return false;
        }

        match ModelBundle::load(path) {
            Ok(loaded) => {
                info!(
                    "Model loaded: version={} samples={} threshold={:.4}",
                    loaded.model_version, loaded.training_samples, loaded.threshold
                );
                *self.bundle.write().unwrap() = Some(Arc::new(loaded));
                true
            }
            Err(err) => {
                error!("Failed to load model from {}: {err}", path.display());
                false
            }
        }
    }

    /// Re-load from the original path (after retraining)
    pub fn reload(&self) -> bool {
        self.load()
    }

    /// Whether a bundle is currently published
    pub fn is_loaded(&self) -> bool {
        self.bundle.read().unwrap().is_some()
    }

    /// Clone a handle to the currently published bundle
    pub fn current(&self) -> Option<Arc<ModelBundle>> {
        self.bundle.read().unwrap().clone()
    }

    /// Version of the published bundle, `"none"` when unloaded
    pub fn model_version(&self) -> String {
        self.current()
            .map(|b| b.model_version.clone())
            .unwrap_or_else(|| "none".to_string())
    }

    /// Path the scorer loads from
    pub fn model_path(&self) -> &Path {
        &self.model_path
    }

    /// Normalized anomaly score in `[0, 1]` for one feature vector.
    ///
    /// Higher = more anomalous. Returns exactly `0.0` when no bundle is
    /// loaded (graceful degradation).
    pub fn predict(&self, features: &FeatureVector) -> f64 {
        let Some(bundle) = self.current() else {
            return 0.0;
        };

        let row = features.to_row(&bundle.feature_columns);
        let raw_score = bundle.forest.decision_function(&row);
        let normalized = sigmoid_normalize(raw_score);

        debug!(
            "IF raw={raw_score:.4} normalized={normalized:.4} (threshold={:.4})",
            bundle.threshold
        );
        normalized
    }

    /// Batch prediction over rows already in bundle column order.
    ///
    /// Unloaded scorer yields a zero vector of matching length.
    pub fn predict_batch(&self, rows: &[Vec<f64>]) -> Vec<f64> {
        match self.current() {
            None => vec![0.0; rows.len()],
            Some(bundle) => rows
                .iter()
                .map(|row| sigmoid_normalize(bundle.forest.decision_function(row)))
                .collect(),
        }
    }
}
