use thiserror::Error;

use crate::LearnerKind;

#[derive(Error, Debug)]
pub enum EnsembleError {
    #[error("Insufficient data: {0}")]
    InsufficientData(String),

    #[error("Base learner '{learner}' failed on fold {fold}: {reason}")]
    BaseLearnerTraining {
        learner: LearnerKind,
        /// Fold index, or the later stage where the failure surfaced.
        fold: FoldLabel,
        reason: String,
    },

    #[error("Incomplete OOF table: {missing} missing, {duplicated} written more than once, {unexpected} outside validation ranges")]
    IncompleteOof {
        missing: usize,
        duplicated: usize,
        unexpected: usize,
    },

    #[error("Calibration fit failed for '{learner}': {reason}")]
    CalibrationFit { learner: LearnerKind, reason: String },

    #[error("Meta-learner fit failed: {0}")]
    MetaFit(String),

    #[error("Invalid configuration: {0}")]
    InvalidConfig(String),

    #[error("Invalid data: {0}")]
    InvalidData(String),

    #[error("Artifact storage error: {0}")]
    Storage(String),

    #[error("Serialization error: {0}")]
    Serialization(#[from] serde_json::Error),

    #[error("Artifact checksum mismatch: expected {expected}, found {found}")]
    IntegrityMismatch { expected: String, found: String },
}

impl From<std::io::Error> for EnsembleError {
    fn from(err: std::io::Error) -> Self {
        EnsembleError::Storage(err.to_string())
    }
}

/// Where a base learner failure happened.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum FoldLabel {
    Fold(usize),
    OofColumn,
    Deployment,
}

impl std::fmt::Display for FoldLabel {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            FoldLabel::Fold(k) => write!(f, "{}", k),
            FoldLabel::OofColumn => write!(f, "<oof column>"),
            FoldLabel::Deployment => write!(f, "<deployment refit>"),
        }
    }
}

impl EnsembleError {
    pub fn learner_failed(learner: LearnerKind, fold: FoldLabel, reason: impl Into<String>) -> Self {
        EnsembleError::BaseLearnerTraining {
            learner,
            fold,
            reason: reason.into(),
        }
    }
}

pub type EnsembleResult<T> = Result<T, EnsembleError>;
