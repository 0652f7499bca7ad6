//! Base Learner Bank
//!
//! Three gradient-boosted tree classifiers with different inductive biases:
//! histogram-binned depth-wise trees, exact greedy trees with row/column
//! subsampling, and oblivious (symmetric) trees. A fold trains all three
//! concurrently on the same rows.

mod boosting;
pub mod exact;
pub mod histogram;
pub mod oblivious;
pub mod tree;

use ensemble_core::stats::sigmoid;
use ensemble_core::{EnsembleError, EnsembleResult, FoldLabel, LearnerKind, LearnerParams, PerLearner};
use serde::{Deserialize, Serialize};

pub use boosting::FitError;
pub use exact::ExactGradientBoosting;
pub use histogram::HistGradientBoosting;
pub use oblivious::ObliviousBoosting;

/// A trained base learner of any of the three kinds.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "kind", content = "model")]
pub enum BaseLearner {
    Histogram(HistGradientBoosting),
    Exact(ExactGradientBoosting),
    Oblivious(ObliviousBoosting),
}

impl BaseLearner {
    pub fn kind(&self) -> LearnerKind {
        match self {
            BaseLearner::Histogram(_) => LearnerKind::Histogram,
            BaseLearner::Exact(_) => LearnerKind::Exact,
            BaseLearner::Oblivious(_) => LearnerKind::Oblivious,
        }
    }

    pub fn n_features(&self) -> usize {
        match self {
            BaseLearner::Histogram(m) => m.n_features(),
            BaseLearner::Exact(m) => m.n_features(),
            BaseLearner::Oblivious(m) => m.n_features(),
        }
    }

    fn raw_score(&self, row: &[f64]) -> f64 {
        match self {
            BaseLearner::Histogram(m) => m.raw_score(row),
            BaseLearner::Exact(m) => m.raw_score(row),
            BaseLearner::Oblivious(m) => m.raw_score(row),
        }
    }

    /// Positive-class probability for each row.
    pub fn predict_proba(&self, rows: &[Vec<f64>]) -> Result<Vec<f64>, FitError> {
        let expected = self.n_features();
        rows.iter()
            .map(|row| {
                if row.len() != expected {
                    return Err(FitError::PredictShape {
                        expected,
                        found: row.len(),
                    });
                }
                Ok(sigmoid(self.raw_score(row)))
            })
            .collect()
    }
}

/// Seed for one learner on one fold, independent of thread scheduling.
pub fn learner_seed(run_seed: u64, fold: FoldLabel, kind: LearnerKind) -> u64 {
    let fold_salt = match fold {
        FoldLabel::Fold(k) => k as u64 + 1,
        FoldLabel::OofColumn => 0,
        FoldLabel::Deployment => u64::MAX,
    };
    run_seed
        .wrapping_mul(0x9E37_79B9_7F4A_7C15)
        .wrapping_add(fold_salt.wrapping_mul(0xBF58_476D_1CE4_E5B9))
        .wrapping_add(kind.index() as u64)
}

pub fn train_learner(
    kind: LearnerKind,
    params: &LearnerParams,
    rows: &[Vec<f64>],
    labels: &[bool],
    seed: u64,
) -> Result<BaseLearner, FitError> {
    match kind {
        LearnerKind::Histogram => {
            HistGradientBoosting::fit(&params.histogram, rows, labels).map(BaseLearner::Histogram)
        }
        LearnerKind::Exact => {
            ExactGradientBoosting::fit(&params.exact, rows, labels, seed).map(BaseLearner::Exact)
        }
        LearnerKind::Oblivious => {
            ObliviousBoosting::fit(&params.oblivious, rows, labels, seed).map(BaseLearner::Oblivious)
        }
    }
}

/// Train all three learners on the same rows, concurrently.
///
/// Any single failure becomes a `BaseLearnerTraining` error tagged with the
/// learner and `fold`.
pub fn train_bank(
    params: &LearnerParams,
    rows: &[Vec<f64>],
    labels: &[bool],
    run_seed: u64,
    fold: FoldLabel,
) -> EnsembleResult<PerLearner<BaseLearner>> {
    let fit = |kind: LearnerKind| {
        let seed = learner_seed(run_seed, fold, kind);
        let result = train_learner(kind, params, rows, labels, seed);
        match &result {
            Ok(_) => tracing::debug!("Trained {} on fold {} ({} rows)", kind, fold, rows.len()),
            Err(e) => tracing::error!("Training {} on fold {} failed: {}", kind, fold, e),
        }
        result.map_err(|e| EnsembleError::learner_failed(kind, fold, e.to_string()))
    };

    let (histogram, (exact, oblivious)) = rayon::join(
        || fit(LearnerKind::Histogram),
        || rayon::join(|| fit(LearnerKind::Exact), || fit(LearnerKind::Oblivious)),
    );

    Ok(PerLearner {
        histogram: histogram?,
        exact: exact?,
        oblivious: oblivious?,
    })
}

/// Predict `rows` with every learner of the bank, rejecting non-finite output.
pub fn predict_bank(
    bank: &PerLearner<BaseLearner>,
    rows: &[Vec<f64>],
    fold: FoldLabel,
) -> EnsembleResult<PerLearner<Vec<f64>>> {
    bank.try_map(|kind, model| {
        let probs = model
            .predict_proba(rows)
            .map_err(|e| EnsembleError::learner_failed(kind, fold, e.to_string()))?;
        if let Some(pos) = probs.iter().position(|p| !p.is_finite()) {
            return Err(EnsembleError::learner_failed(
                kind,
                fold,
                format!("non-finite probability for validation row {}", pos),
            ));
        }
        Ok(probs)
    })
}
