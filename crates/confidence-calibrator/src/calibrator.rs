//! Confidence Calibration
//!
//! Platt scaling of raw base-learner probabilities into calibrated
//! probabilities, plus the reliability statistics of the fitted map.

use ensemble_core::stats::{brier_score, sigmoid};
use serde::{Deserialize, Serialize};
use thiserror::Error;

/// Newton iterations before giving up on convergence
const MAX_ITERATIONS: usize = 100;
/// Ridge added to the Hessian diagonal to keep the 2x2 solve well posed
const HESSIAN_RIDGE: f64 = 1e-12;
const MIN_STEP: f64 = 1e-10;
const RELIABILITY_BINS: usize = 10;

#[derive(Error, Debug, Clone, PartialEq)]
pub enum CalibrationError {
    #[error("no predictions to calibrate")]
    Empty,

    #[error("predictions and outcomes differ in length ({predictions} vs {outcomes})")]
    LengthMismatch { predictions: usize, outcomes: usize },

    #[error("outcomes contain a single class")]
    SingleClass,

    #[error("prediction {index} is not finite")]
    NonFinite { index: usize },
}

/// Statistics about the calibration model
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct CalibrationStats {
    /// Expected Calibration Error (lower is better)
    pub ece: f64,
    /// Maximum Calibration Error
    pub mce: f64,
    /// Brier score (mean squared error of probabilities)
    pub brier_score: f64,
    /// Number of predictions used for calibration
    pub sample_size: usize,
    /// Reliability diagram bins
    pub reliability_bins: Vec<ReliabilityBin>,
}

/// A bin in the reliability diagram
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ReliabilityBin {
    /// Average predicted probability in this bin
    pub avg_predicted: f64,
    /// Actual fraction of positives in this bin
    pub actual_positive_rate: f64,
    /// Number of samples in this bin
    pub count: usize,
}

/// Monotone logistic map `p = sigmoid(a * raw + b)` with `a >= 0`.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct PlattCalibrator {
    a: f64,
    b: f64,
    /// True when the fitted slope came out negative and the map was replaced
    /// by the constant base-rate model
    degenerate: bool,
    stats: CalibrationStats,
}

impl PlattCalibrator {
    /// Fit on raw probabilities and their binary outcomes.
    pub fn fit(predictions: &[f64], outcomes: &[bool]) -> Result<Self, CalibrationError> {
        if predictions.is_empty() {
            return Err(CalibrationError::Empty);
        }
        if predictions.len() != outcomes.len() {
            return Err(CalibrationError::LengthMismatch {
                predictions: predictions.len(),
                outcomes: outcomes.len(),
            });
        }
        if let Some(index) = predictions.iter().position(|p| !p.is_finite()) {
            return Err(CalibrationError::NonFinite { index });
        }
        let n_pos = outcomes.iter().filter(|&&o| o).count();
        let n_neg = outcomes.len() - n_pos;
        if n_pos == 0 || n_neg == 0 {
            return Err(CalibrationError::SingleClass);
        }

        // Platt's smoothed targets
        let hi = (n_pos as f64 + 1.0) / (n_pos as f64 + 2.0);
        let lo = 1.0 / (n_neg as f64 + 2.0);
        let targets: Vec<f64> = outcomes.iter().map(|&o| if o { hi } else { lo }).collect();

        let prior = (n_pos as f64 + 1.0) / (n_neg as f64 + 1.0);
        let (a, b) = newton_fit(predictions, &targets, 0.0, prior.ln());

        let (a, b, degenerate) = if a >= 0.0 {
            (a, b, false)
        } else {
            tracing::warn!("Platt slope {:.4} is negative; falling back to the base rate", a);
            let rate = n_pos as f64 / outcomes.len() as f64;
            (0.0, (rate / (1.0 - rate)).ln(), true)
        };

        let mut calibrator = Self {
            a,
            b,
            degenerate,
            stats: CalibrationStats {
                ece: 0.0,
                mce: 0.0,
                brier_score: 0.0,
                sample_size: 0,
                reliability_bins: Vec::new(),
            },
        };
        let calibrated = calibrator.calibrate_all(predictions);
        calibrator.stats = calculate_stats(&calibrated, outcomes);
        Ok(calibrator)
    }

    /// Calibrate a single raw probability
    pub fn calibrate(&self, raw: f64) -> f64 {
        sigmoid(self.a * raw + self.b)
    }

    pub fn calibrate_all(&self, raw: &[f64]) -> Vec<f64> {
        raw.iter().map(|&p| self.calibrate(p)).collect()
    }

    pub fn slope(&self) -> f64 {
        self.a
    }

    pub fn intercept(&self) -> f64 {
        self.b
    }

    pub fn is_degenerate(&self) -> bool {
        self.degenerate
    }

    /// Get calibration statistics
    pub fn stats(&self) -> &CalibrationStats {
        &self.stats
    }
}

/// Minimise the cross-entropy of `sigmoid(a*x + b)` against `targets` with
/// Newton steps and backtracking.
fn newton_fit(x: &[f64], targets: &[f64], a0: f64, b0: f64) -> (f64, f64) {
    let objective = |a: f64, b: f64| -> f64 {
        x.iter()
            .zip(targets)
            .map(|(&xi, &t)| {
                let z = a * xi + b;
                // log(1 + e^z) - t*z, written stably
                let softplus = if z > 0.0 { z + (-z).exp().ln_1p() } else { z.exp().ln_1p() };
                softplus - t * z
            })
            .sum()
    };

    let (mut a, mut b) = (a0, b0);
    let mut current = objective(a, b);
    for _ in 0..MAX_ITERATIONS {
        let (mut ga, mut gb) = (0.0, 0.0);
        let (mut haa, mut hab, mut hbb) = (HESSIAN_RIDGE, 0.0, HESSIAN_RIDGE);
        for (&xi, &t) in x.iter().zip(targets) {
            let p = sigmoid(a * xi + b);
            let d = p - t;
            let w = p * (1.0 - p);
            ga += d * xi;
            gb += d;
            haa += w * xi * xi;
            hab += w * xi;
            hbb += w;
        }
        if ga.abs() < 1e-9 && gb.abs() < 1e-9 {
            break;
        }

        let det = haa * hbb - hab * hab;
        if det.abs() < f64::MIN_POSITIVE {
            break;
        }
        let da = -(hbb * ga - hab * gb) / det;
        let db = -(haa * gb - hab * ga) / det;

        let mut step = 1.0;
        let mut improved = false;
        while step >= MIN_STEP {
            let candidate = objective(a + step * da, b + step * db);
            if candidate < current + 1e-4 * step * (ga * da + gb * db) {
                a += step * da;
                b += step * db;
                current = candidate;
                improved = true;
                break;
            }
            step *= 0.5;
        }
        if !improved {
            break;
        }
    }
    (a, b)
}

/// Reliability statistics of calibrated probabilities against outcomes.
pub fn calculate_stats(calibrated: &[f64], outcomes: &[bool]) -> CalibrationStats {
    let mut bins: Vec<Vec<(f64, bool)>> = vec![Vec::new(); RELIABILITY_BINS];
    for (&pred, &outcome) in calibrated.iter().zip(outcomes) {
        let bin_idx = ((pred * RELIABILITY_BINS as f64) as usize).min(RELIABILITY_BINS - 1);
        bins[bin_idx].push((pred, outcome));
    }

    let mut reliability_bins = Vec::new();
    let mut ece = 0.0;
    let mut mce: f64 = 0.0;
    let n = calibrated.len() as f64;

    for bin in &bins {
        if bin.is_empty() {
            continue;
        }
        let avg_predicted: f64 = bin.iter().map(|(p, _)| p).sum::<f64>() / bin.len() as f64;
        let actual_positive_rate = bin.iter().filter(|(_, o)| *o).count() as f64 / bin.len() as f64;
        let calibration_error = (avg_predicted - actual_positive_rate).abs();

        ece += calibration_error * bin.len() as f64 / n;
        mce = mce.max(calibration_error);

        reliability_bins.push(ReliabilityBin {
            avg_predicted,
            actual_positive_rate,
            count: bin.len(),
        });
    }

    CalibrationStats {
        ece,
        mce,
        brier_score: brier_score(calibrated, outcomes),
        sample_size: calibrated.len(),
        reliability_bins,
    }
}
