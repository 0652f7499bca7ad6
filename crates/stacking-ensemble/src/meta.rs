//! Meta-learner: L2-regularised logistic regression over the calibrated
//! base-learner probabilities and the standardised regime features, fit by
//! iteratively reweighted least squares.

use ensemble_core::stats::{logit, mean, sigmoid, std_dev};
use ensemble_core::{EnsembleError, EnsembleResult, MetaParams};
use nalgebra::{DMatrix, DVector};
use serde::{Deserialize, Serialize};

/// Weight floor of the IRLS working response
const MIN_WEIGHT: f64 = 1e-10;

/// Smallest ridge kept on the non-intercept diagonal
const MIN_RIDGE: f64 = 1e-6;

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct MetaModel {
    intercept: f64,
    /// One coefficient per calibrated learner probability, in learner order
    learner_weights: [f64; 3],
    regime_weights: Vec<f64>,
    regime_means: Vec<f64>,
    regime_stds: Vec<f64>,
    iterations: usize,
}

impl MetaModel {
    /// Fit on calibrated probabilities (`[hist, exact, oblivious]` per row),
    /// the raw regime vector of each row and the labels.
    pub fn fit(
        calibrated: &[[f64; 3]],
        regime: &[Vec<f64>],
        labels: &[bool],
        params: &MetaParams,
    ) -> EnsembleResult<Self> {
        let n = labels.len();
        if n == 0 {
            return Err(EnsembleError::MetaFit("no OOF rows".to_string()));
        }
        if calibrated.len() != n || regime.len() != n {
            return Err(EnsembleError::MetaFit(format!(
                "input lengths differ: {} calibrated, {} regime, {} labels",
                calibrated.len(),
                regime.len(),
                n
            )));
        }
        let positives = labels.iter().filter(|&&l| l).count();
        if positives == 0 || positives == n {
            return Err(EnsembleError::MetaFit("OOF labels contain a single class".to_string()));
        }

        let n_regime = regime[0].len();
        if let Some(row) = regime.iter().position(|r| r.len() != n_regime) {
            return Err(EnsembleError::MetaFit(format!("regime row {} has the wrong width", row)));
        }
        if let Some(row) = (0..n).position(|i| {
            calibrated[i].iter().any(|v| !v.is_finite()) || regime[i].iter().any(|v| !v.is_finite())
        }) {
            return Err(EnsembleError::MetaFit(format!("non-finite input in OOF row {}", row)));
        }

        let mut regime_means = Vec::with_capacity(n_regime);
        let mut regime_stds = Vec::with_capacity(n_regime);
        for j in 0..n_regime {
            let column: Vec<f64> = regime.iter().map(|r| r[j]).collect();
            let sd = std_dev(&column);
            regime_means.push(mean(&column));
            // constant columns pass through centred
            regime_stds.push(if sd > 0.0 { sd } else { 1.0 });
        }

        let width = 1 + 3 + n_regime;
        let design = DMatrix::from_fn(n, width, |i, j| match j {
            0 => 1.0,
            1..=3 => calibrated[i][j - 1],
            _ => (regime[i][j - 4] - regime_means[j - 4]) / regime_stds[j - 4],
        });
        let y = DVector::from_iterator(n, labels.iter().map(|&l| if l { 1.0 } else { 0.0 }));

        // constant columns (degenerate calibrators, flat regimes) need a ridge
        let mut penalty = DMatrix::<f64>::identity(width, width) * params.l2.max(MIN_RIDGE);
        penalty[(0, 0)] = 0.0;

        let mut beta = DVector::<f64>::zeros(width);
        beta[0] = logit(positives as f64 / n as f64);

        let mut converged = false;
        let mut iterations = 0;
        for iter in 0..params.max_iter {
            iterations = iter + 1;
            let eta = &design * &beta;
            let p = eta.map(sigmoid);
            let w = p.map(|pi| (pi * (1.0 - pi)).max(MIN_WEIGHT));

            // Newton step: (X'WX + L) delta = X'(y - p) - L beta
            let xtw = DMatrix::from_fn(width, n, |j, i| design[(i, j)] * w[i]);
            let hessian = &xtw * &design + &penalty;
            let gradient = design.transpose() * (&y - &p) - &penalty * &beta;

            let delta = hessian
                .cholesky()
                .map(|c| c.solve(&gradient))
                .ok_or_else(|| EnsembleError::MetaFit("singular IRLS system".to_string()))?;

            // halve the step until the penalised loss stops increasing
            let current = penalised_loss(&design, &y, &beta, &penalty);
            let mut step = 1.0;
            let mut candidate = &beta + &delta;
            let mut candidate_loss = penalised_loss(&design, &y, &candidate, &penalty);
            while candidate_loss > current {
                step *= 0.5;
                if step < 1e-6 {
                    break;
                }
                candidate = &beta + &delta * step;
                candidate_loss = penalised_loss(&design, &y, &candidate, &penalty);
            }
            if candidate_loss > current {
                // no descent along the Newton direction: keep beta
                tracing::debug!("IRLS step halving exhausted at iteration {}", iterations);
                converged = true;
                break;
            }
            beta = candidate;

            if beta.iter().any(|b| !b.is_finite()) {
                return Err(EnsembleError::MetaFit("coefficients diverged".to_string()));
            }
            if delta.amax() * step < params.tolerance {
                converged = true;
                break;
            }
        }
        if !converged {
            return Err(EnsembleError::MetaFit(format!(
                "IRLS did not converge in {} iterations",
                params.max_iter
            )));
        }

        tracing::info!(
            "Meta-learner converged in {} iterations: intercept={:.4} learners=[{:.4}, {:.4}, {:.4}]",
            iterations,
            beta[0],
            beta[1],
            beta[2],
            beta[3]
        );

        Ok(Self {
            intercept: beta[0],
            learner_weights: [beta[1], beta[2], beta[3]],
            regime_weights: beta.iter().skip(4).copied().collect(),
            regime_means,
            regime_stds,
            iterations,
        })
    }

    /// Meta probability of one row.
    pub fn predict_one(&self, calibrated: &[f64; 3], regime: &[f64]) -> f64 {
        let mut z = self.intercept;
        for (w, x) in self.learner_weights.iter().zip(calibrated) {
            z += w * x;
        }
        for (j, x) in regime.iter().enumerate() {
            z += self.regime_weights[j] * (x - self.regime_means[j]) / self.regime_stds[j];
        }
        sigmoid(z)
    }

    pub fn predict(&self, calibrated: &[[f64; 3]], regime: &[Vec<f64>]) -> EnsembleResult<Vec<f64>> {
        if calibrated.len() != regime.len() {
            return Err(EnsembleError::InvalidData(format!(
                "{} calibrated rows but {} regime rows",
                calibrated.len(),
                regime.len()
            )));
        }
        calibrated
            .iter()
            .zip(regime)
            .map(|(c, r)| {
                if r.len() != self.regime_weights.len() {
                    return Err(EnsembleError::InvalidData(format!(
                        "meta model expects {} regime features, got {}",
                        self.regime_weights.len(),
                        r.len()
                    )));
                }
                Ok(self.predict_one(c, r))
            })
            .collect()
    }

    pub fn intercept(&self) -> f64 {
        self.intercept
    }

    pub fn learner_weights(&self) -> &[f64; 3] {
        &self.learner_weights
    }

    pub fn regime_weights(&self) -> &[f64] {
        &self.regime_weights
    }

    pub fn n_regime(&self) -> usize {
        self.regime_weights.len()
    }

    /// Whether the model takes exactly `n` regime features.
    pub fn has_regime_width(&self, n: usize) -> bool {
        self.regime_weights.len() == n && self.regime_means.len() == n && self.regime_stds.len() == n
    }

    pub fn iterations(&self) -> usize {
        self.iterations
    }
}

fn penalised_loss(design: &DMatrix<f64>, y: &DVector<f64>, beta: &DVector<f64>, penalty: &DMatrix<f64>) -> f64 {
    let eta = design * beta;
    let nll: f64 = eta
        .iter()
        .zip(y.iter())
        .map(|(&z, &t)| {
            let softplus = if z > 0.0 { z + (-z).exp().ln_1p() } else { z.exp().ln_1p() };
            softplus - t * z
        })
        .sum();
    nll + 0.5 * beta.dot(&(penalty * beta))
}

#[cfg(test)]
mod tests {
    use super::*;

    fn noisy(i: usize) -> f64 {
        ((i * 7919) % 1000) as f64 / 1000.0
    }

    fn synthetic(n: usize) -> (Vec<[f64; 3]>, Vec<Vec<f64>>, Vec<bool>) {
        let labels: Vec<bool> = (0..n).map(|i| noisy(i) < 0.4).collect();
        let calibrated = labels
            .iter()
            .enumerate()
            .map(|(i, &y)| {
                let informative = if y { 0.7 } else { 0.3 } + 0.1 * (noisy(i + 13) - 0.5);
                [informative, 0.5 + 0.2 * (noisy(i + 29) - 0.5), informative * 0.5 + 0.25]
            })
            .collect();
        let regime = (0..n).map(|i| vec![100.0 + 10.0 * noisy(i + 101)]).collect();
        (calibrated, regime, labels)
    }

    #[test]
    fn test_meta_learns_informative_learner() {
        let (calibrated, regime, labels) = synthetic(800);
        let model = MetaModel::fit(&calibrated, &regime, &labels, &MetaParams::default()).unwrap();

        assert!(model.learner_weights()[0] > 0.0);
        let preds = model.predict(&calibrated, &regime).unwrap();
        let correct = preds.iter().zip(&labels).filter(|(&p, &y)| (p >= 0.5) == y).count();
        assert!(correct as f64 / labels.len() as f64 > 0.9);
    }

    #[test]
    fn test_meta_is_deterministic() {
        let (calibrated, regime, labels) = synthetic(300);
        let a = MetaModel::fit(&calibrated, &regime, &labels, &MetaParams::default()).unwrap();
        let b = MetaModel::fit(&calibrated, &regime, &labels, &MetaParams::default()).unwrap();
        assert_eq!(a, b);
    }

    #[test]
    fn test_meta_rejects_single_class_and_nan() {
        let (calibrated, regime, _) = synthetic(50);
        let all_true = vec![true; 50];
        assert!(matches!(
            MetaModel::fit(&calibrated, &regime, &all_true, &MetaParams::default()),
            Err(EnsembleError::MetaFit(_))
        ));

        let (mut calibrated, regime, labels) = synthetic(50);
        calibrated[10][1] = f64::NAN;
        assert!(matches!(
            MetaModel::fit(&calibrated, &regime, &labels, &MetaParams::default()),
            Err(EnsembleError::MetaFit(_))
        ));
    }

    #[test]
    fn test_meta_fits_constant_columns() {
        let (mut calibrated, _, labels) = synthetic(400);
        for row in calibrated.iter_mut() {
            // a degenerate calibrator emits its base rate everywhere
            row[2] = 0.4;
        }
        let regime = vec![vec![3.0]; 400];

        for l2 in [0.0, 1.0] {
            let params = MetaParams {
                l2,
                ..MetaParams::default()
            };
            let model = MetaModel::fit(&calibrated, &regime, &labels, &params).unwrap();
            assert!(model.learner_weights().iter().all(|w| w.is_finite()));
            assert!(model.regime_weights()[0].abs() < 1e-6);
            let preds = model.predict(&calibrated, &regime).unwrap();
            assert!(preds.iter().all(|p| (0.0..=1.0).contains(p)));
        }
    }

    #[test]
    fn test_meta_fit_beats_intercept_only_start() {
        let (calibrated, _, labels) = synthetic(300);
        let regime = vec![Vec::new(); 300];
        let params = MetaParams::default();
        let model = MetaModel::fit(&calibrated, &regime, &labels, &params).unwrap();

        let design = DMatrix::from_fn(300, 4, |i, j| if j == 0 { 1.0 } else { calibrated[i][j - 1] });
        let y = DVector::from_iterator(300, labels.iter().map(|&l| if l { 1.0 } else { 0.0 }));
        let mut penalty = DMatrix::<f64>::identity(4, 4) * params.l2;
        penalty[(0, 0)] = 0.0;

        let positives = labels.iter().filter(|&&l| l).count() as f64;
        let mut start = DVector::<f64>::zeros(4);
        start[0] = logit(positives / 300.0);
        let w = model.learner_weights();
        let fitted = DVector::from_vec(vec![model.intercept(), w[0], w[1], w[2]]);

        assert!(penalised_loss(&design, &y, &fitted, &penalty) <= penalised_loss(&design, &y, &start, &penalty));
    }

    #[test]
    fn test_meta_without_regime_features() {
        let (calibrated, _, labels) = synthetic(200);
        let regime = vec![Vec::new(); 200];
        let model = MetaModel::fit(&calibrated, &regime, &labels, &MetaParams::default()).unwrap();
        assert_eq!(model.n_regime(), 0);
        let p = model.predict_one(&calibrated[0], &[]);
        assert!((0.0..=1.0).contains(&p));
    }
}
