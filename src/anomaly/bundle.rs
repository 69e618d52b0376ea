//! Persisted model artifact: the trained forest plus its calibration and
//! training diagnostics. Replacement on disk is atomic (temp file + rename)
//! so a crashed writer can never leave a torn bundle behind.

use crate::anomaly::forest::IsolationForest;
use crate::errors::{Result, SentinelError};
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::fs;
use std::path::Path;

/// Distribution of decision scores over the training set
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ScoreStats {
    /// Mean decision score
    pub mean: f64,
    /// Standard deviation of decision scores
    pub std: f64,
    /// Minimum decision score
    pub min: f64,
    /// Maximum decision score
    pub max: f64,
    /// 5th percentile (the calibrated alert threshold)
    pub p5: f64,
}

/// The persisted model bundle
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ModelBundle {
    /// Trained estimator
    pub forest: IsolationForest,
    /// Calibrated decision threshold (5th percentile of training scores)
    pub threshold: f64,
    /// Feature column names, in the order the forest expects
    pub feature_columns: Vec<String>,
    /// Opaque version string
    pub model_version: String,
    /// Number of feature windows the forest was fitted on
    pub training_samples: usize,
    /// When training finished
    pub trained_at: DateTime<Utc>,
    /// Contamination used during fitting
    pub contamination: f64,
    /// Number of trees in the forest
    pub n_estimators: usize,
    /// Training score distribution
    pub score_stats: ScoreStats,
}

impl ModelBundle {
    /// Read and deserialize a bundle.
    ///
    /// IO failures (including a missing file) surface as
    /// [`SentinelError::ModelIoError`]; a present-but-corrupt file surfaces
    /// as [`SentinelError::ModelFormatError`].
    pub fn load(path: &Path) -> Result<ModelBundle> {
        let raw = fs::read_to_string(path)?;
        serde_json::from_str(&raw).map_err(|err| SentinelError::ModelFormatError {
            message: err.to_string(),
        })
    }

    /// Serialize and write the bundle atomically.
    ///
    /// The parent directory is created if absent; the bundle is written to a
    /// sibling temp file and renamed into place.
    pub fn save(&self, path: &Path) -> Result<()> {
        if let Some(parent) = path.parent() {
            if !parent.as_os_str().is_empty() {
                fs::create_dir_all(parent)?;
            }
        }

        let file_name = path
            .file_name()
            .map(|n| n.to_string_lossy().into_owned())
            .unwrap_or_else(|| "model".to_string());
        let tmp_path = path.with_file_name(format!("{file_name}.tmp"));

        fs::write(&tmp_path, serde_json::to_vec(self)?)?;
        fs::rename(&tmp_path, path)?;
        Ok(())
    }
}
