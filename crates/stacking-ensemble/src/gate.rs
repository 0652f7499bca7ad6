//! Confidence gating: how accurate and how frequent the "positive" decision
//! is when it is only taken above a meta-probability threshold.

use ensemble_core::{EnsembleError, EnsembleResult};
use serde::{Deserialize, Serialize};
use statrs::distribution::{ContinuousCDF, Normal};

/// Two-sided confidence level of the accuracy interval
const CONFIDENCE_LEVEL: f64 = 0.95;

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct GatingEntry {
    pub threshold: f64,
    /// Fraction of gated samples whose label is positive; `None` when no
    /// sample reaches the threshold
    pub accuracy: Option<f64>,
    /// Gated samples over all OOF samples
    pub coverage: f64,
    pub signal_count: usize,
    /// Wilson score interval on `accuracy`
    pub accuracy_ci: Option<(f64, f64)>,
}

/// Gating entries in increasing threshold order.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct GatingTable {
    entries: Vec<GatingEntry>,
}

impl GatingTable {
    pub fn entries(&self) -> &[GatingEntry] {
        &self.entries
    }

    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }

    pub fn get(&self, threshold: f64) -> Option<&GatingEntry> {
        self.entries.iter().find(|e| e.threshold == threshold)
    }
}

pub struct ConfidenceGate {
    thresholds: Vec<f64>,
    /// Standard normal quantile of the accuracy interval
    z: f64,
}

impl ConfidenceGate {
    pub fn new(thresholds: &[f64]) -> EnsembleResult<Self> {
        if thresholds.is_empty() {
            return Err(EnsembleError::InvalidConfig("no gating thresholds".to_string()));
        }
        if thresholds.iter().any(|&t| !(t > 0.0 && t < 1.0)) {
            return Err(EnsembleError::InvalidConfig(
                "gating thresholds must lie in (0, 1)".to_string(),
            ));
        }
        if thresholds.windows(2).any(|w| w[1] <= w[0]) {
            return Err(EnsembleError::InvalidConfig(
                "gating thresholds must be strictly ascending".to_string(),
            ));
        }
        let z = Normal::new(0.0, 1.0)
            .map_err(|e| EnsembleError::InvalidConfig(e.to_string()))?
            .inverse_cdf(1.0 - (1.0 - CONFIDENCE_LEVEL) / 2.0);
        Ok(Self {
            thresholds: thresholds.to_vec(),
            z,
        })
    }

    /// Evaluate every threshold against the meta probabilities and labels.
    pub fn evaluate(&self, meta_probs: &[f64], labels: &[bool]) -> EnsembleResult<GatingTable> {
        if meta_probs.len() != labels.len() {
            return Err(EnsembleError::InvalidData(format!(
                "{} meta probabilities but {} labels",
                meta_probs.len(),
                labels.len()
            )));
        }
        if meta_probs.is_empty() {
            return Err(EnsembleError::InsufficientData("no OOF samples to gate".to_string()));
        }

        let total = meta_probs.len() as f64;
        let entries = self
            .thresholds
            .iter()
            .map(|&threshold| {
                let (signal_count, hits) = meta_probs
                    .iter()
                    .zip(labels)
                    .filter(|(&p, _)| p >= threshold)
                    .fold((0usize, 0usize), |(n, k), (_, &y)| (n + 1, k + usize::from(y)));

                let accuracy = (signal_count > 0).then(|| hits as f64 / signal_count as f64);
                let accuracy_ci = (signal_count > 0).then(|| wilson_interval(hits, signal_count, self.z));

                tracing::debug!(
                    "tau={:.2}: signals={} coverage={:.4} accuracy={:?}",
                    threshold,
                    signal_count,
                    signal_count as f64 / total,
                    accuracy
                );

                GatingEntry {
                    threshold,
                    accuracy,
                    coverage: signal_count as f64 / total,
                    signal_count,
                    accuracy_ci,
                }
            })
            .collect();

        Ok(GatingTable { entries })
    }
}

/// Wilson score interval for `successes` out of `n` trials at quantile `z`.
pub fn wilson_interval(successes: usize, n: usize, z: f64) -> (f64, f64) {
    if n == 0 {
        return (0.0, 1.0);
    }
    let n = n as f64;
    let p = successes as f64 / n;
    let denominator = 1.0 + z * z / n;
    let center = (p + z * z / (2.0 * n)) / denominator;
    let margin = (z / denominator) * ((p * (1.0 - p) / n) + z * z / (4.0 * n * n)).sqrt();
    ((center - margin).max(0.0), (center + margin).min(1.0))
}
