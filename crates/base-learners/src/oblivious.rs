//! Oblivious-tree boosting.
//!
//! Every level of a tree applies the same (feature, border) test to all of its
//! nodes, so a depth-d tree is d comparisons plus a lookup into 2^d leaves.
//! The shared split is the one with the largest gain summed over the current
//! leaves.

use ensemble_core::ObliviousParams;
use rand::rngs::StdRng;
use rand::{Rng, SeedableRng};
use serde::{Deserialize, Serialize};

use crate::boosting::{
    base_score, bin_of, leaf_weight, quantile_borders, split_gain, validate_training_set,
    FitError, GradientState,
};

#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct ObliviousSplit {
    pub feature: usize,
    pub border: f64,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ObliviousTree {
    splits: Vec<ObliviousSplit>,
    leaves: Vec<f64>,
}

impl ObliviousTree {
    fn leaf_index(&self, row: &[f64]) -> usize {
        self.splits.iter().fold(0usize, |idx, split| {
            (idx << 1) | usize::from(row[split.feature] > split.border)
        })
    }

    pub fn predict(&self, row: &[f64]) -> f64 {
        self.leaves[self.leaf_index(row)]
    }

    pub fn depth(&self) -> usize {
        self.splits.len()
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ObliviousBoosting {
    base_score: f64,
    n_features: usize,
    trees: Vec<ObliviousTree>,
}

impl ObliviousBoosting {
    pub fn fit(params: &ObliviousParams, rows: &[Vec<f64>], labels: &[bool], seed: u64) -> Result<Self, FitError> {
        let n_features = validate_training_set(rows, labels)?;
        if params.border_count > u16::MAX as usize {
            return Err(FitError::TooManyBorders(params.border_count));
        }
        let mut rng = StdRng::seed_from_u64(seed);

        // borders and per-row border bins, fixed for the whole ensemble
        let mut borders = Vec::with_capacity(n_features);
        let mut bins: Vec<Vec<u16>> = Vec::with_capacity(n_features);
        for f in 0..n_features {
            let mut column: Vec<f64> = rows.iter().map(|r| r[f]).collect();
            let feature_borders = quantile_borders(&mut column, params.border_count);
            bins.push(rows.iter().map(|r| bin_of(&feature_borders, r[f]) as u16).collect());
            borders.push(feature_borders);
        }

        let base = base_score(labels);
        let mut state = GradientState::new(rows.len(), base);
        let mut trees = Vec::with_capacity(params.n_estimators);

        for _ in 0..params.n_estimators {
            state.refresh(labels);
            let mut sampled: Vec<usize> = (0..rows.len())
                .filter(|_| rng.gen::<f64>() < params.subsample)
                .collect();
            if sampled.len() < 2 {
                sampled = (0..rows.len()).collect();
            }

            let tree = grow_oblivious(params, &borders, &bins, &sampled, &state.grad, &state.hess);
            for (score, row) in state.scores.iter_mut().zip(rows) {
                *score += tree.predict(row);
            }
            trees.push(tree);
        }

        Ok(Self {
            base_score: base,
            n_features,
            trees,
        })
    }

    pub fn raw_score(&self, row: &[f64]) -> f64 {
        self.base_score + self.trees.iter().map(|t| t.predict(row)).sum::<f64>()
    }

    pub fn n_features(&self) -> usize {
        self.n_features
    }

    pub fn n_trees(&self) -> usize {
        self.trees.len()
    }
}

fn grow_oblivious(
    params: &ObliviousParams,
    borders: &[Vec<f64>],
    bins: &[Vec<u16>],
    sampled: &[usize],
    grad: &[f64],
    hess: &[f64],
) -> ObliviousTree {
    let mut leaf_of = vec![0usize; sampled.len()];
    let mut splits: Vec<ObliviousSplit> = Vec::with_capacity(params.depth);

    for level in 0..params.depth {
        let n_leaves = 1usize << level;
        let mut best: Option<(ObliviousSplit, usize, f64)> = None;

        for (feature, feature_borders) in borders.iter().enumerate() {
            if feature_borders.is_empty() {
                continue;
            }
            let n_bins = feature_borders.len() + 1;
            // per (leaf, bin) gradient and hessian sums
            let mut g_hist = vec![0.0; n_leaves * n_bins];
            let mut h_hist = vec![0.0; n_leaves * n_bins];
            for (pos, &i) in sampled.iter().enumerate() {
                let cell = leaf_of[pos] * n_bins + bins[feature][i] as usize;
                g_hist[cell] += grad[i];
                h_hist[cell] += hess[i];
            }

            let totals: Vec<(f64, f64)> = (0..n_leaves)
                .map(|leaf| {
                    let cells = leaf * n_bins..(leaf + 1) * n_bins;
                    (g_hist[cells.clone()].iter().sum::<f64>(), h_hist[cells].iter().sum::<f64>())
                })
                .collect();
            let mut left: Vec<(f64, f64)> = vec![(0.0, 0.0); n_leaves];

            for b in 0..feature_borders.len() {
                let mut gain = 0.0;
                for leaf in 0..n_leaves {
                    let cell = leaf * n_bins + b;
                    left[leaf].0 += g_hist[cell];
                    left[leaf].1 += h_hist[cell];
                    let (gl, hl) = left[leaf];
                    let (g, h) = totals[leaf];
                    gain += split_gain(gl, hl, g - gl, h - hl, params.l2);
                }
                if best.map_or(true, |(_, _, g)| gain > g) {
                    best = Some((
                        ObliviousSplit {
                            feature,
                            border: feature_borders[b],
                        },
                        b,
                        gain,
                    ));
                }
            }
        }

        let Some((split, border_bin, gain)) = best else {
            break;
        };
        if gain <= 0.0 {
            break;
        }
        for (pos, &i) in sampled.iter().enumerate() {
            let goes_right = bins[split.feature][i] as usize > border_bin;
            leaf_of[pos] = (leaf_of[pos] << 1) | usize::from(goes_right);
        }
        splits.push(split);
    }

    let n_leaves = 1usize << splits.len();
    let mut g_leaf = vec![0.0; n_leaves];
    let mut h_leaf = vec![0.0; n_leaves];
    for (pos, &i) in sampled.iter().enumerate() {
        g_leaf[leaf_of[pos]] += grad[i];
        h_leaf[leaf_of[pos]] += hess[i];
    }
    let leaves = g_leaf
        .iter()
        .zip(&h_leaf)
        .map(|(&g, &h)| {
            if h > 0.0 {
                leaf_weight(g, h, params.l2) * params.learning_rate
            } else {
                0.0
            }
        })
        .collect();

    ObliviousTree { splits, leaves }
}

#[cfg(test)]
mod tests {
    use super::*;
    use ensemble_core::stats::sigmoid;

    #[test]
    fn test_leaf_index_uses_first_split_as_high_bit() {
        let tree = ObliviousTree {
            splits: vec![
                ObliviousSplit { feature: 0, border: 0.5 },
                ObliviousSplit { feature: 1, border: 0.5 },
            ],
            leaves: vec![0.0, 1.0, 2.0, 3.0],
        };
        assert_eq!(tree.predict(&[0.0, 0.0]), 0.0);
        assert_eq!(tree.predict(&[0.0, 1.0]), 1.0);
        assert_eq!(tree.predict(&[1.0, 0.0]), 2.0);
        assert_eq!(tree.predict(&[1.0, 1.0]), 3.0);
    }

    #[test]
    fn test_learns_two_feature_rule() {
        let rows: Vec<Vec<f64>> = (0..400)
            .map(|i| vec![(i % 20) as f64 / 20.0, (i / 20) as f64 / 20.0, ((i * 7) % 13) as f64])
            .collect();
        let labels: Vec<bool> = rows.iter().map(|r| r[0] + r[1] > 1.0).collect();
        let params = ObliviousParams {
            n_estimators: 60,
            subsample: 1.0,
            ..ObliviousParams::default()
        };
        let model = ObliviousBoosting::fit(&params, &rows, &labels, 3).unwrap();

        assert!(model.trees.iter().all(|t| t.depth() <= params.depth));
        assert!(sigmoid(model.raw_score(&[0.9, 0.9, 1.0])) > 0.8);
        assert!(sigmoid(model.raw_score(&[0.1, 0.1, 1.0])) < 0.2);
    }

    #[test]
    fn test_rejects_border_count_beyond_bin_range() {
        let rows: Vec<Vec<f64>> = (0..20).map(|i| vec![i as f64]).collect();
        let labels: Vec<bool> = (0..20).map(|i| i % 2 == 0).collect();
        let params = ObliviousParams {
            border_count: 100_000,
            ..ObliviousParams::default()
        };
        assert!(matches!(
            ObliviousBoosting::fit(&params, &rows, &labels, 1),
            Err(FitError::TooManyBorders(100_000))
        ));
    }
}
