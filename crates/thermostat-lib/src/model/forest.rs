//! Bagged regression forest
//!
//! A bootstrap-aggregated ensemble of CART regression trees with a fixed
//! seed, so training on the same data always yields the same model. Trees
//! split on the squared-error criterion; leaves predict the mean label.

use rand::rngs::StdRng;
use rand::{Rng, SeedableRng};
use serde::{Deserialize, Serialize};

/// Number of trees in the ensemble.
pub const DEFAULT_TREES: usize = 100;

/// Seed for reproducible bootstrap sampling.
pub const DEFAULT_SEED: u64 = 42;

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ForestConfig {
    pub n_trees: usize,
    pub max_depth: usize,
    pub min_samples_split: usize,
    pub seed: u64,
}

impl Default for ForestConfig {
    fn default() -> Self {
        Self {
            n_trees: DEFAULT_TREES,
            max_depth: 32,
            min_samples_split: 2,
            seed: DEFAULT_SEED,
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
enum Node {
    Leaf {
        value: f64,
    },
    Split {
        feature: usize,
        threshold: f64,
        left: usize,
        right: usize,
    },
}

/// One CART regression tree, nodes stored in an arena.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct DecisionTree {
    nodes: Vec<Node>,
}

impl DecisionTree {
    fn fit(x: &[Vec<f64>], y: &[f64], indices: &[usize], config: &ForestConfig) -> Self {
        let mut nodes = Vec::new();
        grow(x, y, indices, 0, config, &mut nodes);
        Self { nodes }
    }

    fn predict(&self, row: &[f64]) -> f64 {
        let mut at = 0;
        loop {
            match &self.nodes[at] {
                Node::Leaf { value } => return *value,
                Node::Split {
                    feature,
                    threshold,
                    left,
                    right,
                } => {
                    at = if row[*feature] <= *threshold { *left } else { *right };
                }
            }
        }
    }
}

/// Grow a subtree over `indices`, returning its arena slot.
fn grow(
    x: &[Vec<f64>],
    y: &[f64],
    indices: &[usize],
    depth: usize,
    config: &ForestConfig,
    nodes: &mut Vec<Node>,
) -> usize {
    let mean = mean_of(y, indices);

    if depth >= config.max_depth || indices.len() < config.min_samples_split {
        nodes.push(Node::Leaf { value: mean });
        return nodes.len() - 1;
    }

    match best_split(x, y, indices) {
        None => {
            nodes.push(Node::Leaf { value: mean });
            nodes.len() - 1
        }
        Some(split) => {
            let slot = nodes.len();
            nodes.push(Node::Leaf { value: mean });
            let left = grow(x, y, &split.left, depth + 1, config, nodes);
            let right = grow(x, y, &split.right, depth + 1, config, nodes);
            nodes[slot] = Node::Split {
                feature: split.feature,
                threshold: split.threshold,
                left,
                right,
            };
            slot
        }
    }
}

struct BestSplit {
    feature: usize,
    threshold: f64,
    left: Vec<usize>,
    right: Vec<usize>,
}

/// Exhaustive best split over all features, minimizing child SSE.
///
/// Returns `None` when no split improves on the parent (constant labels or
/// constant feature values).
fn best_split(x: &[Vec<f64>], y: &[f64], indices: &[usize]) -> Option<BestSplit> {
    let n_features = x.first().map(|row| row.len()).unwrap_or(0);
    let parent_sse = sse_of(y, indices);
    if parent_sse <= f64::EPSILON {
        return None;
    }

    let mut best: Option<(f64, usize, f64)> = None; // (child sse, feature, threshold)

    for feature in 0..n_features {
        let mut pairs: Vec<(f64, f64)> = indices
            .iter()
            .map(|&i| (x[i][feature], y[i]))
            .collect();
        pairs.sort_by(|a, b| a.0.partial_cmp(&b.0).unwrap_or(std::cmp::Ordering::Equal));

        let n = pairs.len();
        let total_sum: f64 = pairs.iter().map(|p| p.1).sum();
        let total_sq: f64 = pairs.iter().map(|p| p.1 * p.1).sum();

        let mut left_sum = 0.0;
        let mut left_sq = 0.0;
        for i in 0..n - 1 {
            left_sum += pairs[i].1;
            left_sq += pairs[i].1 * pairs[i].1;
            // No valid threshold between equal feature values.
            if pairs[i].0 == pairs[i + 1].0 {
                continue;
            }

            let n_left = (i + 1) as f64;
            let n_right = (n - i - 1) as f64;
            let right_sum = total_sum - left_sum;
            let right_sq = total_sq - left_sq;
            let child_sse = (left_sq - left_sum * left_sum / n_left)
                + (right_sq - right_sum * right_sum / n_right);

            if child_sse + 1e-12 < parent_sse
                && best.map(|(s, _, _)| child_sse < s).unwrap_or(true)
            {
                let threshold = (pairs[i].0 + pairs[i + 1].0) / 2.0;
                best = Some((child_sse, feature, threshold));
            }
        }
    }

    best.map(|(_, feature, threshold)| {
        let (left, right): (Vec<usize>, Vec<usize>) = indices
            .iter()
            .partition(|&&i| x[i][feature] <= threshold);
        BestSplit {
            feature,
            threshold,
            left,
            right,
        }
    })
}

fn mean_of(y: &[f64], indices: &[usize]) -> f64 {
    if indices.is_empty() {
        return 0.0;
    }
    indices.iter().map(|&i| y[i]).sum::<f64>() / indices.len() as f64
}

fn sse_of(y: &[f64], indices: &[usize]) -> f64 {
    let mean = mean_of(y, indices);
    indices.iter().map(|&i| (y[i] - mean).powi(2)).sum()
}

/// Bootstrap-aggregated regression forest.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct RandomForestRegressor {
    config: ForestConfig,
    trees: Vec<DecisionTree>,
}

impl RandomForestRegressor {
    /// Fit the ensemble. Each tree trains on a bootstrap sample drawn from
    /// an rng seeded deterministically from the base seed and tree index.
    pub fn fit(x: &[Vec<f64>], y: &[f64], config: ForestConfig) -> Self {
        let n = x.len();
        let trees = (0..config.n_trees)
            .map(|t| {
                let mut rng = StdRng::seed_from_u64(config.seed.wrapping_add(t as u64));
                let sample: Vec<usize> = (0..n).map(|_| rng.gen_range(0..n)).collect();
                DecisionTree::fit(x, y, &sample, &config)
            })
            .collect();
        Self { config, trees }
    }

    /// Mean prediction over all trees.
    pub fn predict(&self, row: &[f64]) -> f64 {
        if self.trees.is_empty() {
            return 0.0;
        }
        self.trees.iter().map(|t| t.predict(row)).sum::<f64>() / self.trees.len() as f64
    }

    pub fn n_trees(&self) -> usize {
        self.trees.len()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn linear_data(n: usize) -> (Vec<Vec<f64>>, Vec<f64>) {
        let x: Vec<Vec<f64>> = (0..n).map(|i| vec![i as f64]).collect();
        let y: Vec<f64> = (0..n).map(|i| 2.0 * i as f64 + 5.0).collect();
        (x, y)
    }

    #[test]
    fn test_fits_linear_relationship() {
        let (x, y) = linear_data(20);
        let forest = RandomForestRegressor::fit(&x, &y, ForestConfig::default());

        // Interpolated point: neighbors are y=25 and y=27.
        let predicted = forest.predict(&[10.5]);
        assert!(
            (predicted - 26.0).abs() < 2.0,
            "predicted {} for x=10.5",
            predicted
        );
    }

    #[test]
    fn test_training_is_deterministic() {
        let (x, y) = linear_data(25);
        let a = RandomForestRegressor::fit(&x, &y, ForestConfig::default());
        let b = RandomForestRegressor::fit(&x, &y, ForestConfig::default());

        for probe in [0.0, 7.3, 12.9, 24.0] {
            assert_eq!(a.predict(&[probe]), b.predict(&[probe]));
        }
    }

    #[test]
    fn test_constant_labels_predict_constant() {
        let x: Vec<Vec<f64>> = (0..20).map(|i| vec![i as f64, (i * 3) as f64]).collect();
        let y = vec![21.0; 20];
        let forest = RandomForestRegressor::fit(&x, &y, ForestConfig::default());
        assert!((forest.predict(&[4.0, 12.0]) - 21.0).abs() < 1e-9);
    }

    #[test]
    fn test_constant_feature_makes_leaf() {
        let x: Vec<Vec<f64>> = (0..10).map(|_| vec![1.0]).collect();
        let y: Vec<f64> = (0..10).map(|i| i as f64).collect();
        let indices: Vec<usize> = (0..10).collect();
        assert!(best_split(&x, &y, &indices).is_none());
    }

    #[test]
    fn test_tree_count() {
        let (x, y) = linear_data(20);
        let forest = RandomForestRegressor::fit(&x, &y, ForestConfig::default());
        assert_eq!(forest.n_trees(), DEFAULT_TREES);
    }
}
