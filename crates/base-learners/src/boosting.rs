//! Logistic-loss plumbing shared by the three boosters.

use ensemble_core::stats::{logit, sigmoid};
use thiserror::Error;

/// Hessians are floored here so leaf denominators never vanish.
const MIN_HESSIAN: f64 = 1e-16;

#[derive(Error, Debug, Clone, PartialEq)]
pub enum FitError {
    #[error("training set is empty")]
    EmptyTrainingSet,

    #[error("training labels contain a single class")]
    SingleClass,

    #[error("row {row} has {found} features, expected {expected}")]
    ShapeMismatch {
        row: usize,
        expected: usize,
        found: usize,
    },

    #[error("row {row} contains a non-finite feature value")]
    NonFinite { row: usize },

    #[error("model expects {expected} features, got {found}")]
    PredictShape { expected: usize, found: usize },

    #[error("{0} borders exceed the bin index range")]
    TooManyBorders(usize),
}

/// Check the training matrix and return its width.
pub(crate) fn validate_training_set(rows: &[Vec<f64>], labels: &[bool]) -> Result<usize, FitError> {
    if rows.is_empty() || rows.len() != labels.len() {
        return Err(FitError::EmptyTrainingSet);
    }
    let n_features = rows[0].len();
    for (row, values) in rows.iter().enumerate() {
        if values.len() != n_features {
            return Err(FitError::ShapeMismatch {
                row,
                expected: n_features,
                found: values.len(),
            });
        }
        if values.iter().any(|v| !v.is_finite()) {
            return Err(FitError::NonFinite { row });
        }
    }
    let positives = labels.iter().filter(|&&l| l).count();
    if positives == 0 || positives == labels.len() {
        return Err(FitError::SingleClass);
    }
    Ok(n_features)
}

/// Log-odds of the training base rate, the starting score of every booster.
pub(crate) fn base_score(labels: &[bool]) -> f64 {
    let positives = labels.iter().filter(|&&l| l).count() as f64;
    logit(positives / labels.len() as f64)
}

/// Raw scores plus first/second order gradients of the logistic loss.
pub(crate) struct GradientState {
    pub scores: Vec<f64>,
    pub grad: Vec<f64>,
    pub hess: Vec<f64>,
}

impl GradientState {
    pub fn new(n: usize, base_score: f64) -> Self {
        Self {
            scores: vec![base_score; n],
            grad: vec![0.0; n],
            hess: vec![0.0; n],
        }
    }

    pub fn refresh(&mut self, labels: &[bool]) {
        for i in 0..self.scores.len() {
            let p = sigmoid(self.scores[i]);
            let y = if labels[i] { 1.0 } else { 0.0 };
            self.grad[i] = p - y;
            self.hess[i] = (p * (1.0 - p)).max(MIN_HESSIAN);
        }
    }
}

/// Newton step for a leaf: `-G / (H + λ)`.
pub(crate) fn leaf_weight(g: f64, h: f64, l2: f64) -> f64 {
    -g / (h + l2)
}

pub(crate) fn leaf_score(g: f64, h: f64, l2: f64) -> f64 {
    g * g / (h + l2)
}

/// Loss reduction of splitting a node into (left, right).
pub(crate) fn split_gain(gl: f64, hl: f64, gr: f64, hr: f64, l2: f64) -> f64 {
    0.5 * (leaf_score(gl, hl, l2) + leaf_score(gr, hr, l2) - leaf_score(gl + gr, hl + hr, l2))
}

/// Ascending, de-duplicated split borders for one feature column.
///
/// With at most `max_borders + 1` distinct values every midpoint between
/// neighbours becomes a border; otherwise borders sit at evenly spaced
/// quantiles. A value `x` lies left of border `b` when `x <= b`.
pub(crate) fn quantile_borders(values: &mut Vec<f64>, max_borders: usize) -> Vec<f64> {
    values.sort_by(f64::total_cmp);
    values.dedup();
    if values.len() < 2 || max_borders == 0 {
        return Vec::new();
    }

    if values.len() <= max_borders + 1 {
        return values.windows(2).map(|w| 0.5 * (w[0] + w[1])).collect();
    }

    let mut borders: Vec<f64> = (1..=max_borders)
        .map(|b| {
            let pos = b * (values.len() - 1) / (max_borders + 1);
            0.5 * (values[pos] + values[pos + 1])
        })
        .collect();
    borders.dedup();
    borders
}

/// Index of the first border at or above `x`; `borders.len()` when `x`
/// exceeds every border.
pub(crate) fn bin_of(borders: &[f64], x: f64) -> usize {
    borders.partition_point(|&b| b < x)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_borders_separate_distinct_values() {
        let mut values = vec![3.0, 1.0, 2.0, 2.0, 1.0];
        let borders = quantile_borders(&mut values, 8);
        assert_eq!(borders, vec![1.5, 2.5]);
        assert_eq!(bin_of(&borders, 1.0), 0);
        assert_eq!(bin_of(&borders, 2.0), 1);
        assert_eq!(bin_of(&borders, 3.0), 2);
    }

    #[test]
    fn test_quantile_borders_are_capped_and_sorted() {
        let mut values: Vec<f64> = (0..1000).map(|i| i as f64).collect();
        let borders = quantile_borders(&mut values, 15);
        assert!(borders.len() <= 15);
        assert!(borders.windows(2).all(|w| w[0] < w[1]));
    }

    #[test]
    fn test_single_class_is_rejected() {
        let rows = vec![vec![1.0], vec![2.0]];
        assert_eq!(validate_training_set(&rows, &[true, true]), Err(FitError::SingleClass));
        assert_eq!(validate_training_set(&rows, &[true, false]), Ok(1));
    }

    #[test]
    fn test_split_gain_is_zero_for_identical_children() {
        assert!(split_gain(1.0, 2.0, 1.0, 2.0, 0.0).abs() < 1e-12);
        assert!(split_gain(-3.0, 2.0, 3.0, 2.0, 1.0) > 0.0);
    }
}
