//! End-to-end model training: feature matrix → fitted forest → calibrated
//! threshold → atomically persisted bundle.
//!
//! Training is the one path allowed to fail loudly; a failure leaves both
//! the on-disk bundle and the live scorer untouched.

use crate::anomaly::bundle::{ModelBundle, ScoreStats};
use crate::anomaly::forest::{percentile, IsolationForest};
use crate::errors::{Result, SentinelError};
use crate::features::{FeatureVector, FEATURE_COLUMNS};
use chrono::Utc;
use log::info;
use serde::{Deserialize, Serialize};
use std::path::{Path, PathBuf};

/// Minimum feature windows for a meaningful fit
pub const MIN_TRAINING_WINDOWS: usize = 10;

/// RNG seed used for every fit, so retraining on identical data reproduces
/// the same forest
pub const TRAINING_SEED: u64 = 42;

/// Tunable training parameters
#[derive(Debug, Clone)]
pub struct TrainingOptions {
    /// Number of isolation trees
    pub n_estimators: usize,
    /// Expected anomaly fraction in the training data
    pub contamination: f64,
    /// Version string recorded in the bundle
    pub version: String,
}

impl Default for TrainingOptions {
    fn default() -> Self {
        TrainingOptions {
            n_estimators: 200,
            contamination: 0.02,
            version: "v1".to_string(),
        }
    }
}

/// Summary returned to the caller after a successful fit
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct TrainingReport {
    /// Version recorded in the bundle
    pub model_version: String,
    /// Number of feature windows fitted on
    pub training_samples: usize,
    /// Calibrated alert threshold
    pub threshold: f64,
    /// Where the bundle was written
    pub output_path: PathBuf,
}

/// Fit an isolation forest on the training matrix and persist the bundle.
///
/// The threshold is calibrated as the 5th percentile of decision-function
/// scores over the training set. Fewer than [`MIN_TRAINING_WINDOWS`] rows is
/// a fatal error and nothing is written.
pub fn train_and_save(
    samples: &[(String, FeatureVector)],
    output_path: &Path,
    options: &TrainingOptions,
) -> Result<TrainingReport> {
    if samples.len() < MIN_TRAINING_WINDOWS {
        return Err(SentinelError::InsufficientTrainingData {
            windows: samples.len(),
            required: MIN_TRAINING_WINDOWS,
        });
    }

    let feature_columns: Vec<String> = FEATURE_COLUMNS.iter().map(|s| s.to_string()).collect();
    let matrix: Vec<Vec<f64>> = samples
        .iter()
        .map(|(_, features)| features.to_row(&feature_columns))
        .collect();

    info!(
        "Training isolation forest: samples={} features={} trees={} contamination={:.3}",
        matrix.len(),
        feature_columns.len(),
        options.n_estimators,
        options.contamination
    );

    let forest = IsolationForest::fit(
        &matrix,
        options.n_estimators,
        options.contamination,
        TRAINING_SEED,
    );

    let scores: Vec<f64> = matrix.iter().map(|row| forest.decision_function(row)).collect();
    let threshold = percentile(&scores, 5.0);

    let n = scores.len() as f64;
    let mean = scores.iter().sum::<f64>() / n;
    let std = (scores.iter().map(|s| (s - mean).powi(2)).sum::<f64>() / n).sqrt();
    let min = scores.iter().copied().fold(f64::INFINITY, f64::min);
    let max = scores.iter().copied().fold(f64::NEG_INFINITY, f64::max);

    let bundle = ModelBundle {
        forest,
        threshold,
        feature_columns,
        model_version: options.version.clone(),
        training_samples: matrix.len(),
        trained_at: Utc::now(),
        contamination: options.contamination,
        n_estimators: options.n_estimators,
        score_stats: ScoreStats {
            mean,
            std,
            min,
            max,
            p5: threshold,
        },
    };

    bundle.save(output_path)?;
    info!(
        "Model saved to {} (version={}, threshold={:.4})",
        output_path.display(),
        bundle.model_version,
        threshold
    );

    Ok(TrainingReport {
        model_version: bundle.model_version,
        training_samples: bundle.training_samples,
        threshold,
        output_path: output_path.to_path_buf(),
    })
}
