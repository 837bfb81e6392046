//! Random regression forest.
//!
//! Trees are stored as flat node arrays. Each tree is grown on a bootstrap
//! sample with variance-reduction splits over a random subset of features, and
//! the forest prediction is the mean of its trees.

use crate::errors::ModelError;
use rand::rngs::StdRng;
use rand::{Rng, SeedableRng};
use rayon::prelude::*;
use serde::Serialize;

/// Split feature value marking a leaf.
const LEAF: i32 = -2;

#[derive(Debug, Clone, Copy, PartialEq, Serialize)]
pub struct ForestParams {
    pub n_trees: usize,
    /// Fraction of features considered at each split.
    pub max_features: f64,
    pub min_samples_leaf: usize,
    pub min_samples_split: usize,
    pub max_depth: Option<usize>,
}

impl ForestParams {
    fn features_per_split(&self, n_features: usize) -> usize {
        ((self.max_features * n_features as f64).round() as usize).clamp(1, n_features.max(1))
    }
}

#[derive(Debug, Clone, PartialEq)]
pub struct TreeNode {
    /// Feature index to split on (`-2` for leaves).
    pub feature: i32,
    /// Samples with `x[feature] <= threshold` go left.
    pub threshold: f64,
    pub left_child: i32,
    pub right_child: i32,
    /// Mean target of the samples that reached this node.
    pub value: f64,
}

impl TreeNode {
    fn leaf(value: f64) -> Self {
        Self {
            feature: LEAF,
            threshold: 0.0,
            left_child: -1,
            right_child: -1,
            value,
        }
    }

    pub const fn is_leaf(&self) -> bool {
        self.feature < 0
    }
}

struct Split {
    feature: usize,
    threshold: f64,
}

#[derive(Debug, Clone)]
pub struct RegressionTree {
    nodes: Vec<TreeNode>,
}

impl RegressionTree {
    /// Grows a tree on `rows` (indices into `x`/`y`, repeats allowed).
    pub fn fit(
        x: &[Vec<f64>],
        y: &[f64],
        rows: &[usize],
        params: &ForestParams,
        rng: &mut StdRng,
    ) -> Self {
        let mut tree = Self { nodes: Vec::new() };
        let mut rows = rows.to_vec();
        if !rows.is_empty() {
            tree.grow(x, y, &mut rows, 0, params, rng);
        }
        tree
    }

    fn grow(
        &mut self,
        x: &[Vec<f64>],
        y: &[f64],
        rows: &mut [usize],
        depth: usize,
        params: &ForestParams,
        rng: &mut StdRng,
    ) -> usize {
        let id = self.nodes.len();
        let mean = rows.iter().map(|&r| y[r]).sum::<f64>() / rows.len() as f64;
        self.nodes.push(TreeNode::leaf(mean));

        let min_leaf = params.min_samples_leaf.max(1);
        if params.max_depth.is_some_and(|d| depth >= d)
            || rows.len() < params.min_samples_split.max(2)
            || rows.len() < 2 * min_leaf
        {
            return id;
        }
        let Some(split) = best_split(x, y, rows, params, rng) else {
            return id;
        };

        let mut mid = 0;
        for k in 0..rows.len() {
            if x[rows[k]][split.feature] <= split.threshold {
                rows.swap(k, mid);
                mid += 1;
            }
        }
        let (left_rows, right_rows) = rows.split_at_mut(mid);
        let left = self.grow(x, y, left_rows, depth + 1, params, rng);
        let right = self.grow(x, y, right_rows, depth + 1, params, rng);

        self.nodes[id] = TreeNode {
            feature: split.feature as i32,
            threshold: split.threshold,
            left_child: left as i32,
            right_child: right as i32,
            value: mean,
        };
        id
    }

    pub fn predict(&self, features: &[f64]) -> f64 {
        let mut idx = 0usize;
        loop {
            let Some(node) = self.nodes.get(idx) else { return 0.0 };
            if node.is_leaf() {
                return node.value;
            }
            let value = features.get(node.feature as usize).copied().unwrap_or(0.0);
            idx = if value <= node.threshold {
                node.left_child as usize
            } else {
                node.right_child as usize
            };
        }
    }

    pub fn n_nodes(&self) -> usize {
        self.nodes.len()
    }

    pub fn n_leaves(&self) -> usize {
        self.nodes.iter().filter(|n| n.is_leaf()).count()
    }

    pub fn depth(&self) -> usize {
        fn walk(nodes: &[TreeNode], idx: usize) -> usize {
            let node = &nodes[idx];
            if node.is_leaf() {
                0
            } else {
                let left = walk(nodes, node.left_child as usize);
                let right = walk(nodes, node.right_child as usize);
                1 + left.max(right)
            }
        }
        if self.nodes.is_empty() {
            0
        } else {
            walk(&self.nodes, 0)
        }
    }
}

/// Lowest summed squared error over a random feature subset. `None` when no split
/// reduces it while honouring the minimum leaf size.
fn best_split(
    x: &[Vec<f64>],
    y: &[f64],
    rows: &[usize],
    params: &ForestParams,
    rng: &mut StdRng,
) -> Option<Split> {
    let n_features = x[rows[0]].len();
    let mtry = params.features_per_split(n_features);
    let min_leaf = params.min_samples_leaf.max(1);
    let n = rows.len();

    let total: f64 = rows.iter().map(|&r| y[r]).sum();
    let total_sq: f64 = rows.iter().map(|&r| y[r] * y[r]).sum();
    let parent_sse = total_sq - total * total / n as f64;

    let mut best: Option<(f64, Split)> = None;
    let mut order = rows.to_vec();
    for feature in rand::seq::index::sample(rng, n_features, mtry).iter() {
        order.sort_by(|a, b| x[*a][feature].total_cmp(&x[*b][feature]));
        let (mut left_sum, mut left_sq) = (0.0, 0.0);
        for i in 1..n {
            let prev = order[i - 1];
            left_sum += y[prev];
            left_sq += y[prev] * y[prev];
            if i < min_leaf || n - i < min_leaf {
                continue;
            }
            let (lo, hi) = (x[prev][feature], x[order[i]][feature]);
            if lo >= hi {
                continue;
            }
            let right_sum = total - left_sum;
            let right_sq = total_sq - left_sq;
            let sse = (left_sq - left_sum * left_sum / i as f64)
                + (right_sq - right_sum * right_sum / (n - i) as f64);
            if best.as_ref().map_or(true, |(b, _)| sse < *b) {
                best = Some((
                    sse,
                    Split {
                        feature,
                        threshold: lo + (hi - lo) / 2.0,
                    },
                ));
            }
        }
    }

    best.filter(|(sse, _)| parent_sse - sse > 1e-12 * parent_sse.abs().max(1.0))
        .map(|(_, split)| split)
}

#[derive(Debug, Clone)]
pub struct RegressionForest {
    trees: Vec<RegressionTree>,
    n_features: usize,
    pub params: ForestParams,
}

impl RegressionForest {
    /// Fits `params.n_trees` trees in parallel; tree `t` draws from `seed + t`.
    pub fn fit(
        x: &[Vec<f64>],
        y: &[f64],
        params: ForestParams,
        seed: u64,
    ) -> Result<Self, ModelError> {
        if x.is_empty() || x.len() != y.len() {
            return Err(ModelError::EmptyView {
                view: "forest training set".to_string(),
            });
        }
        if params.n_trees == 0 || !(params.max_features > 0.0 && params.max_features <= 1.0) {
            return Err(ModelError::InvalidConfig(format!(
                "n_trees must be positive and max_features in (0, 1], got {} and {}",
                params.n_trees, params.max_features
            )));
        }
        let n_features = x[0].len();
        if let Some(row) = x.iter().find(|row| row.len() != n_features) {
            return Err(ModelError::FeatureMismatch {
                expected: n_features,
                found: row.len(),
            });
        }

        let n = x.len();
        let trees = (0..params.n_trees)
            .into_par_iter()
            .map(|t| {
                let mut rng = StdRng::seed_from_u64(seed.wrapping_add(t as u64));
                let bootstrap: Vec<usize> = (0..n).map(|_| rng.gen_range(0..n)).collect();
                RegressionTree::fit(x, y, &bootstrap, &params, &mut rng)
            })
            .collect();

        Ok(Self {
            trees,
            n_features,
            params,
        })
    }

    pub fn predict(&self, features: &[f64]) -> Result<f64, ModelError> {
        if features.len() != self.n_features {
            return Err(ModelError::FeatureMismatch {
                expected: self.n_features,
                found: features.len(),
            });
        }
        let sum: f64 = self.trees.iter().map(|t| t.predict(features)).sum();
        Ok(sum / self.trees.len() as f64)
    }

    pub fn n_trees(&self) -> usize {
        self.trees.len()
    }

    pub fn n_features(&self) -> usize {
        self.n_features
    }
}
