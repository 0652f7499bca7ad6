//! Histogram-binned gradient boosting.
//!
//! Each feature is quantised into at most `max_bins` quantile bins fit on the
//! training rows. Split search accumulates gradient/hessian histograms per
//! bin, so candidate thresholds are limited to bin borders.

use ensemble_core::HistogramParams;
use serde::{Deserialize, Serialize};

use crate::boosting::{
    base_score, bin_of, quantile_borders, split_gain, validate_training_set, FitError,
    GradientState,
};
use crate::tree::{grow_tree, Growth, RegressionTree, SplitCandidate, SplitFinder};

/// Per-feature bin borders plus the binned training matrix (feature-major).
struct BinnedMatrix {
    borders: Vec<Vec<f64>>,
    bins: Vec<Vec<u16>>,
}

impl BinnedMatrix {
    fn fit(rows: &[Vec<f64>], n_features: usize, max_bins: usize) -> Self {
        let mut borders = Vec::with_capacity(n_features);
        let mut bins = Vec::with_capacity(n_features);
        for f in 0..n_features {
            let mut column: Vec<f64> = rows.iter().map(|r| r[f]).collect();
            let feature_borders = quantile_borders(&mut column, max_bins - 1);
            bins.push(
                rows.iter()
                    .map(|r| bin_of(&feature_borders, r[f]) as u16)
                    .collect(),
            );
            borders.push(feature_borders);
        }
        Self { borders, bins }
    }
}

struct HistogramFinder<'a> {
    matrix: &'a BinnedMatrix,
    min_samples_leaf: usize,
    l2: f64,
}

impl SplitFinder for HistogramFinder<'_> {
    fn best_split(&self, node_rows: &[usize], grad: &[f64], hess: &[f64]) -> Option<SplitCandidate> {
        if node_rows.len() < 2 * self.min_samples_leaf.max(1) {
            return None;
        }
        let g_total: f64 = node_rows.iter().map(|&i| grad[i]).sum();
        let h_total: f64 = node_rows.iter().map(|&i| hess[i]).sum();

        let mut best: Option<SplitCandidate> = None;
        for (feature, borders) in self.matrix.borders.iter().enumerate() {
            if borders.is_empty() {
                continue;
            }
            let n_bins = borders.len() + 1;
            let mut g_hist = vec![0.0; n_bins];
            let mut h_hist = vec![0.0; n_bins];
            let mut c_hist = vec![0usize; n_bins];
            let column = &self.matrix.bins[feature];
            for &i in node_rows {
                let b = column[i] as usize;
                g_hist[b] += grad[i];
                h_hist[b] += hess[i];
                c_hist[b] += 1;
            }

            let (mut gl, mut hl, mut cl) = (0.0, 0.0, 0usize);
            for b in 0..borders.len() {
                gl += g_hist[b];
                hl += h_hist[b];
                cl += c_hist[b];
                let cr = node_rows.len() - cl;
                if cl < self.min_samples_leaf || cr < self.min_samples_leaf || cl == 0 || cr == 0 {
                    continue;
                }
                let gain = split_gain(gl, hl, g_total - gl, h_total - hl, self.l2);
                if best.map_or(true, |s| gain > s.gain) {
                    best = Some(SplitCandidate {
                        feature,
                        threshold: borders[b],
                        gain,
                    });
                }
            }
        }
        best
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct HistGradientBoosting {
    base_score: f64,
    n_features: usize,
    trees: Vec<RegressionTree>,
}

impl HistGradientBoosting {
    pub fn fit(params: &HistogramParams, rows: &[Vec<f64>], labels: &[bool]) -> Result<Self, FitError> {
        let n_features = validate_training_set(rows, labels)?;
        let matrix = BinnedMatrix::fit(rows, n_features, params.max_bins);
        let finder = HistogramFinder {
            matrix: &matrix,
            min_samples_leaf: params.min_samples_leaf,
            l2: params.l2,
        };
        let growth = Growth {
            max_depth: params.max_depth,
            l2: params.l2,
            learning_rate: params.learning_rate,
        };

        let base = base_score(labels);
        let mut state = GradientState::new(rows.len(), base);
        let mut trees = Vec::with_capacity(params.n_estimators);

        for _ in 0..params.n_estimators {
            state.refresh(labels);
            let tree = grow_tree(&finder, rows, (0..rows.len()).collect(), &state.grad, &state.hess, &growth);
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
