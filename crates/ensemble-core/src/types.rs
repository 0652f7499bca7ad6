use std::collections::HashSet;
use std::ops::Range;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use crate::{EnsembleError, EnsembleResult};

/// The three structurally different base learners of the ensemble.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum LearnerKind {
    /// Histogram-binned depth-wise gradient boosting
    Histogram,
    /// Exact greedy gradient boosting with subsampling
    Exact,
    /// Oblivious (symmetric) tree boosting
    Oblivious,
}

impl LearnerKind {
    pub const ALL: [LearnerKind; 3] = [
        LearnerKind::Histogram,
        LearnerKind::Exact,
        LearnerKind::Oblivious,
    ];

    /// Stable short name used in column labels and metadata
    pub fn name(&self) -> &'static str {
        match self {
            LearnerKind::Histogram => "hist_gbm",
            LearnerKind::Exact => "exact_gbm",
            LearnerKind::Oblivious => "oblivious_gbm",
        }
    }

    /// Position of the learner inside a `PerLearner` triple
    pub fn index(&self) -> usize {
        match self {
            LearnerKind::Histogram => 0,
            LearnerKind::Exact => 1,
            LearnerKind::Oblivious => 2,
        }
    }
}

impl std::fmt::Display for LearnerKind {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.name())
    }
}

/// Exactly one value per base learner.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct PerLearner<T> {
    pub histogram: T,
    pub exact: T,
    pub oblivious: T,
}

impl<T> PerLearner<T> {
    pub fn from_fn(mut f: impl FnMut(LearnerKind) -> T) -> Self {
        Self {
            histogram: f(LearnerKind::Histogram),
            exact: f(LearnerKind::Exact),
            oblivious: f(LearnerKind::Oblivious),
        }
    }

    pub fn try_from_fn<E>(mut f: impl FnMut(LearnerKind) -> Result<T, E>) -> Result<Self, E> {
        Ok(Self {
            histogram: f(LearnerKind::Histogram)?,
            exact: f(LearnerKind::Exact)?,
            oblivious: f(LearnerKind::Oblivious)?,
        })
    }

    pub fn get(&self, kind: LearnerKind) -> &T {
        match kind {
            LearnerKind::Histogram => &self.histogram,
            LearnerKind::Exact => &self.exact,
            LearnerKind::Oblivious => &self.oblivious,
        }
    }

    pub fn get_mut(&mut self, kind: LearnerKind) -> &mut T {
        match kind {
            LearnerKind::Histogram => &mut self.histogram,
            LearnerKind::Exact => &mut self.exact,
            LearnerKind::Oblivious => &mut self.oblivious,
        }
    }

    pub fn map<U>(&self, mut f: impl FnMut(LearnerKind, &T) -> U) -> PerLearner<U> {
        PerLearner {
            histogram: f(LearnerKind::Histogram, &self.histogram),
            exact: f(LearnerKind::Exact, &self.exact),
            oblivious: f(LearnerKind::Oblivious, &self.oblivious),
        }
    }

    pub fn try_map<U, E>(
        &self,
        mut f: impl FnMut(LearnerKind, &T) -> Result<U, E>,
    ) -> Result<PerLearner<U>, E> {
        Ok(PerLearner {
            histogram: f(LearnerKind::Histogram, &self.histogram)?,
            exact: f(LearnerKind::Exact, &self.exact)?,
            oblivious: f(LearnerKind::Oblivious, &self.oblivious)?,
        })
    }

    pub fn iter(&self) -> impl Iterator<Item = (LearnerKind, &T)> {
        [
            (LearnerKind::Histogram, &self.histogram),
            (LearnerKind::Exact, &self.exact),
            (LearnerKind::Oblivious, &self.oblivious),
        ]
        .into_iter()
    }
}

/// Time-ordered feature/label table handed over by the feature source.
///
/// Rows are stored in timestamp order and are never reordered; row `i` is
/// sample index `i` everywhere downstream.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct FeatureTable {
    timestamps: Vec<DateTime<Utc>>,
    feature_names: Vec<String>,
    rows: Vec<Vec<f64>>,
    labels: Vec<bool>,
}

impl FeatureTable {
    pub fn new(
        timestamps: Vec<DateTime<Utc>>,
        feature_names: Vec<String>,
        rows: Vec<Vec<f64>>,
        labels: Vec<bool>,
    ) -> EnsembleResult<Self> {
        if feature_names.is_empty() {
            return Err(EnsembleError::InvalidData("No feature columns".to_string()));
        }
        let mut seen = HashSet::new();
        for name in &feature_names {
            if !seen.insert(name.as_str()) {
                return Err(EnsembleError::InvalidData(format!(
                    "Duplicate feature column '{}'",
                    name
                )));
            }
        }
        if rows.len() != labels.len() || rows.len() != timestamps.len() {
            return Err(EnsembleError::InvalidData(format!(
                "Row count mismatch: {} rows, {} labels, {} timestamps",
                rows.len(),
                labels.len(),
                timestamps.len()
            )));
        }
        for (i, row) in rows.iter().enumerate() {
            if row.len() != feature_names.len() {
                return Err(EnsembleError::InvalidData(format!(
                    "Row {} has {} values, expected {}",
                    i,
                    row.len(),
                    feature_names.len()
                )));
            }
            if let Some(j) = row.iter().position(|v| !v.is_finite()) {
                return Err(EnsembleError::InvalidData(format!(
                    "Non-finite value in row {} column '{}'",
                    i, feature_names[j]
                )));
            }
        }
        if let Some(i) = timestamps.windows(2).position(|w| w[1] < w[0]) {
            return Err(EnsembleError::InvalidData(format!(
                "Timestamps out of order at row {}",
                i + 1
            )));
        }

        Ok(Self {
            timestamps,
            feature_names,
            rows,
            labels,
        })
    }

    pub fn len(&self) -> usize {
        self.rows.len()
    }

    pub fn is_empty(&self) -> bool {
        self.rows.is_empty()
    }

    pub fn n_features(&self) -> usize {
        self.feature_names.len()
    }

    pub fn feature_names(&self) -> &[String] {
        &self.feature_names
    }

    pub fn timestamps(&self) -> &[DateTime<Utc>] {
        &self.timestamps
    }

    pub fn rows(&self, range: Range<usize>) -> &[Vec<f64>] {
        &self.rows[range]
    }

    pub fn labels(&self, range: Range<usize>) -> &[bool] {
        &self.labels[range]
    }

    pub fn row(&self, index: usize) -> &[f64] {
        &self.rows[index]
    }

    pub fn label(&self, index: usize) -> bool {
        self.labels[index]
    }

    pub fn column_index(&self, name: &str) -> Option<usize> {
        self.feature_names.iter().position(|n| n == name)
    }

    /// Resolve column names to indices, failing on the first unknown name.
    pub fn resolve_columns(&self, names: &[String]) -> EnsembleResult<Vec<usize>> {
        names
            .iter()
            .map(|name| {
                self.column_index(name).ok_or_else(|| {
                    EnsembleError::InvalidConfig(format!("Unknown feature column '{}'", name))
                })
            })
            .collect()
    }

    /// Fraction of positive labels in `range`
    pub fn positive_rate(&self, range: Range<usize>) -> f64 {
        let labels = &self.labels[range];
        if labels.is_empty() {
            return 0.0;
        }
        labels.iter().filter(|&&l| l).count() as f64 / labels.len() as f64
    }
}
