//! In-crate isolation forest estimator.
//!
//! A forest of random isolation trees fitted on subsamples of the training
//! matrix. Scoring follows the decision-function convention the fusion
//! layer was calibrated against: `score_samples` is the negated anomaly
//! score in `[-1, 0)`, `decision_function` subtracts the
//! contamination-percentile offset so that positive values mean inlier and
//! negative values mean outlier.

use serde::{Deserialize, Serialize};

const EULER_GAMMA: f64 = 0.577_215_664_901_532_9;

/// Maximum rows drawn per tree
const MAX_SUBSAMPLE: usize = 256;

#[derive(Debug, Clone, Serialize, Deserialize)]
enum TreeNode {
    /// Internal split on one feature
    Split {
        feature: usize,
        threshold: f64,
        left: usize,
        right: usize,
    },
    /// Terminal node holding `size` training rows
    Leaf { size: usize },
}

/// One random isolation tree
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct IsolationTree {
    nodes: Vec<TreeNode>,
    root: usize,
}

impl IsolationTree {
    fn fit(
        rows: &[Vec<f64>],
        indices: Vec<usize>,
        height_limit: usize,
        rng: &mut fastrand::Rng,
    ) -> Self {
        let mut nodes = Vec::new();
        let root = build_node(rows, indices, 0, height_limit, rng, &mut nodes);
        IsolationTree { nodes, root }
    }

    /// Path length from root to the leaf isolating `row`, with the leaf's
    /// unresolved-subtree adjustment added.
    fn path_length(&self, row: &[f64]) -> f64 {
        let mut node = self.root;
        let mut depth = 0.0;
        loop {
            match &self.nodes[node] {
                TreeNode::Leaf { size } => return depth + average_path_length(*size),
                TreeNode::Split {
                    feature,
                    threshold,
                    left,
                    right,
                } => {
                    let value = row.get(*feature).copied().unwrap_or(0.0);
                    node = if value < *threshold { *left } else { *right };
                    depth += 1.0;
                }
            }
        }
    }
}

fn build_node(
    rows: &[Vec<f64>],
    indices: Vec<usize>,
    depth: usize,
    height_limit: usize,
    rng: &mut fastrand::Rng,
    nodes: &mut Vec<TreeNode>,
) -> usize {
    if indices.len() <= 1 || depth >= height_limit {
        nodes.push(TreeNode::Leaf {
            size: indices.len(),
        });
        return nodes.len() - 1;
    }

    // Only features with spread inside this node can separate anything
    let n_features = rows[indices[0]].len();
    let mut candidates = Vec::new();
    for feature in 0..n_features {
        let mut min = f64::INFINITY;
        let mut max = f64::NEG_INFINITY;
        for &i in &indices {
            let v = rows[i][feature];
            min = min.min(v);
            max = max.max(v);
        }
        if max > min {
            candidates.push((feature, min, max));
        }
    }

    if candidates.is_empty() {
        nodes.push(TreeNode::Leaf {
            size: indices.len(),
        });
        return nodes.len() - 1;
    }

    let (feature, min, max) = candidates[rng.usize(..candidates.len())];
    let threshold = min + rng.f64() * (max - min);

    let (left_rows, right_rows): (Vec<usize>, Vec<usize>) = indices
        .into_iter()
        .partition(|&i| rows[i][feature] < threshold);

    // A threshold landing exactly on the minimum leaves one side empty
    if left_rows.is_empty() || right_rows.is_empty() {
        let size = left_rows.len() + right_rows.len();
        nodes.push(TreeNode::Leaf { size });
        return nodes.len() - 1;
    }

    let left = build_node(rows, left_rows, depth + 1, height_limit, rng, nodes);
    let right = build_node(rows, right_rows, depth + 1, height_limit, rng, nodes);
    nodes.push(TreeNode::Split {
        feature,
        threshold,
        left,
        right,
    });
    nodes.len() - 1
}

/// Trained isolation forest
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct IsolationForest {
    trees: Vec<IsolationTree>,
    subsample: usize,
    n_features: usize,
    offset: f64,
}

impl IsolationForest {
    /// Fit `n_estimators` trees on `rows` with a seeded RNG.
    ///
    /// Each tree draws `min(256, n)` rows without replacement and grows to
    /// at most `ceil(log2(subsample))` levels. The decision offset is
    /// calibrated so that roughly `contamination` of the training rows land
    /// below zero.
    pub fn fit(rows: &[Vec<f64>], n_estimators: usize, contamination: f64, seed: u64) -> Self {
        let n = rows.len();
        let subsample = n.min(MAX_SUBSAMPLE);
        let height_limit = ((subsample as f64).log2().ceil() as usize).max(1);
        let mut rng = fastrand::Rng::with_seed(seed);

        let mut trees = Vec::with_capacity(n_estimators);
        for _ in 0..n_estimators {
            let indices = sample_without_replacement(n, subsample, &mut rng);
            trees.push(IsolationTree::fit(rows, indices, height_limit, &mut rng));
        }

        let mut forest = IsolationForest {
            trees,
            subsample,
            n_features: rows.first().map(|r| r.len()).unwrap_or(0),
            offset: 0.0,
        };
        let scores: Vec<f64> = rows.iter().map(|r| forest.score_samples(r)).collect();
        forest.offset = percentile(&scores, contamination * 100.0);
        forest
    }

    /// Number of features the forest was trained on
    pub fn n_features(&self) -> usize {
        self.n_features
    }

    /// Negated anomaly score in `[-1, 0)`: higher (closer to 0) = more normal
    pub fn score_samples(&self, row: &[f64]) -> f64 {
        let mean_path = self
            .trees
            .iter()
            .map(|t| t.path_length(row))
            .sum::<f64>()
            / self.trees.len() as f64;
        let anomaly_score = 2f64.powf(-mean_path / average_path_length(self.subsample));
        -anomaly_score
    }

    /// Offset-adjusted score: positive = inlier, negative = outlier
    pub fn decision_function(&self, row: &[f64]) -> f64 {
        self.score_samples(row) - self.offset
    }
}

/// Expected path length of an unsuccessful BST search over `n` nodes
fn average_path_length(n: usize) -> f64 {
    match n {
        0 | 1 => 0.0,
        2 => 1.0,
        _ => {
            let n = n as f64;
            2.0 * ((n - 1.0).ln() + EULER_GAMMA) - 2.0 * (n - 1.0) / n
        }
    }
}

fn sample_without_replacement(n: usize, k: usize, rng: &mut fastrand::Rng) -> Vec<usize> {
    let mut indices: Vec<usize> = (0..n).collect();
    for i in 0..k {
        let j = i + rng.usize(..n - i);
        indices.swap(i, j);
    }
    indices.truncate(k);
    indices
}

/// Linear-interpolation percentile (`pct` in `[0, 100]`) of `values`
pub(crate) fn percentile(values: &[f64], pct: f64) -> f64 {
    if values.is_empty() {
        return 0.0;
    }
    let mut sorted = values.to_vec();
    sorted.sort_by(|a, b| a.partial_cmp(b).unwrap_or(std::cmp::Ordering::Equal));

    let rank = (pct / 100.0).clamp(0.0, 1.0) * (sorted.len() - 1) as f64;
    let lo = rank.floor() as usize;
    let hi = rank.ceil() as usize;
    if lo == hi {
        sorted[lo]
    } else {
        sorted[lo] + (rank - lo as f64) * (sorted[hi] - sorted[lo])
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    /// Tight cluster around the origin plus a knob to generate outliers
    fn cluster(n: usize, seed: u64) -> Vec<Vec<f64>> {
        let mut rng = fastrand::Rng::with_seed(seed);
        (0..n)
            .map(|_| vec![rng.f64() * 0.1, rng.f64() * 0.1, rng.f64() * 0.1])
            .collect()
    }

    #[test]
    fn test_outlier_scores_below_inliers() {
        let rows = cluster(200, 7);
        let forest = IsolationForest::fit(&rows, 100, 0.02, 42);

        let inlier_score = forest.decision_function(&rows[0]);
        let outlier_score = forest.decision_function(&[50.0, -50.0, 100.0]);
        assert!(
            outlier_score < inlier_score,
            "outlier {outlier_score} should score below inlier {inlier_score}"
        );
        // A far-out point must land below the calibrated offset
        assert!(outlier_score < 0.0);
    }

    #[test]
    fn test_fit_is_deterministic_for_a_seed() {
        let rows = cluster(100, 3);
        let a = IsolationForest::fit(&rows, 50, 0.02, 42);
        let b = IsolationForest::fit(&rows, 50, 0.02, 42);
        let probe = vec![0.05, 0.05, 0.05];
        assert_eq!(a.decision_function(&probe), b.decision_function(&probe));
    }

    #[test]
    fn test_score_samples_range() {
        let rows = cluster(100, 11);
        let forest = IsolationForest::fit(&rows, 50, 0.02, 42);
        for row in &rows {
            let s = forest.score_samples(row);
            assert!(s < 0.0 && s >= -1.0, "score_samples out of range: {s}");
        }
    }

    #[test]
    fn test_serde_round_trip_preserves_scores() {
        let rows = cluster(80, 5);
        let forest = IsolationForest::fit(&rows, 30, 0.02, 42);
        let json = serde_json::to_string(&forest).unwrap();
        let restored: IsolationForest = serde_json::from_str(&json).unwrap();
        let probe = vec![0.02, 0.08, 0.05];
        assert_eq!(
            forest.decision_function(&probe),
            restored.decision_function(&probe)
        );
    }

    #[test]
    fn test_average_path_length() {
        assert_eq!(average_path_length(0), 0.0);
        assert_eq!(average_path_length(1), 0.0);
        assert_eq!(average_path_length(2), 1.0);
        assert!(average_path_length(256) > average_path_length(16));
    }

    #[test]
    fn test_percentile() {
        let values = vec![1.0, 2.0, 3.0, 4.0, 5.0];
        assert_eq!(percentile(&values, 0.0), 1.0);
        assert_eq!(percentile(&values, 50.0), 3.0);
        assert_eq!(percentile(&values, 100.0), 5.0);
        assert_eq!(percentile(&values, 25.0), 2.0);
        // Interpolated rank
        assert!((percentile(&values, 10.0) - 1.4).abs() < 1e-12);
    }

    #[test]
    fn test_constant_data_degenerates_to_leaves() {
        let rows = vec![vec![1.0, 1.0]; 50];
        let forest = IsolationForest::fit(&rows, 20, 0.02, 42);
        // Every row isolates identically; scoring must still be finite
        assert!(forest.decision_function(&rows[0]).is_finite());
    }
}
