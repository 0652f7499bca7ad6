use ensemble_core::{EnsembleError, EnsembleResult, FoldLabel, LearnerKind, PerLearner};
use serde::{Deserialize, Serialize};

use crate::FoldSchedule;

/// Out-of-fold observation for one sample.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct OofRecord {
    pub label: bool,
    /// Raw positive-class probability from each base learner
    pub raw: PerLearner<f64>,
    pub regime: Vec<f64>,
}

/// Pre-sized, index-addressable OOF accumulator.
///
/// Every sample index the schedule validates on must be written exactly once
/// before [`finalize`](OofTable::finalize) lets anything read the table.
#[derive(Debug, Clone)]
pub struct OofTable {
    n_regime: usize,
    labels: Vec<bool>,
    raw: PerLearner<Vec<f64>>,
    regime: Vec<Vec<f64>>,
    /// Per-index write counter (the completeness bitmap)
    writes: Vec<u32>,
    expected: Vec<bool>,
}

impl OofTable {
    pub fn for_schedule(schedule: &FoldSchedule, n_regime: usize) -> Self {
        let n = schedule.n_samples();
        Self {
            n_regime,
            labels: vec![false; n],
            raw: PerLearner::from_fn(|_| vec![f64::NAN; n]),
            regime: vec![Vec::new(); n],
            writes: vec![0; n],
            expected: schedule.expected_coverage(),
        }
    }

    /// Record the OOF observation for `index`. A second write to the same
    /// index is counted and reported by `finalize`.
    pub fn write(&mut self, index: usize, record: OofRecord) -> EnsembleResult<()> {
        if index >= self.writes.len() {
            return Err(EnsembleError::InvalidData(format!(
                "OOF index {} out of range (table size {})",
                index,
                self.writes.len()
            )));
        }
        if record.regime.len() != self.n_regime {
            return Err(EnsembleError::InvalidData(format!(
                "OOF index {} has {} regime values, expected {}",
                index,
                record.regime.len(),
                self.n_regime
            )));
        }

        self.writes[index] = self.writes[index].saturating_add(1);
        self.labels[index] = record.label;
        for kind in LearnerKind::ALL {
            self.raw.get_mut(kind)[index] = *record.raw.get(kind);
        }
        self.regime[index] = record.regime;
        Ok(())
    }

    /// Number of indices written at least once
    pub fn populated(&self) -> usize {
        self.writes.iter().filter(|&&w| w > 0).count()
    }

    /// Hard barrier between fold training and the global fits.
    ///
    /// Fails with `IncompleteOof` unless every expected index was written
    /// exactly once and nothing else was written, then with
    /// `BaseLearnerTraining` if any learner column holds a non-finite value.
    pub fn finalize(self) -> EnsembleResult<FinalizedOof> {
        let mut missing = 0;
        let mut duplicated = 0;
        let mut unexpected = 0;
        for (&count, &expected) in self.writes.iter().zip(&self.expected) {
            match (expected, count) {
                (true, 0) => missing += 1,
                (true, 1) => {}
                (true, _) => duplicated += 1,
                (false, 0) => {}
                (false, _) => unexpected += 1,
            }
        }
        if missing + duplicated + unexpected > 0 {
            tracing::error!(
                "OOF completeness check failed: missing={} duplicated={} unexpected={}",
                missing,
                duplicated,
                unexpected
            );
            return Err(EnsembleError::IncompleteOof {
                missing,
                duplicated,
                unexpected,
            });
        }

        let sample_indices: Vec<usize> = self
            .expected
            .iter()
            .enumerate()
            .filter_map(|(i, &e)| e.then_some(i))
            .collect();

        let raw = self.raw.map(|_, column| {
            sample_indices.iter().map(|&i| column[i]).collect::<Vec<f64>>()
        });
        for (kind, column) in raw.iter() {
            let bad = column.iter().filter(|p| !p.is_finite()).count();
            if bad > 0 {
                return Err(EnsembleError::learner_failed(
                    kind,
                    FoldLabel::OofColumn,
                    format!("{} of {} OOF predictions are non-finite", bad, column.len()),
                ));
            }
        }

        let labels = sample_indices.iter().map(|&i| self.labels[i]).collect();
        let mut regime_by_index = self.regime;
        let regime = sample_indices
            .iter()
            .map(|&i| std::mem::take(&mut regime_by_index[i]))
            .collect();

        tracing::info!("OOF table finalized with {} samples", sample_indices.len());

        Ok(FinalizedOof {
            sample_indices,
            labels,
            raw,
            regime,
        })
    }
}

/// A complete OOF table, compacted to the validated samples in time order.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct FinalizedOof {
    sample_indices: Vec<usize>,
    labels: Vec<bool>,
    raw: PerLearner<Vec<f64>>,
    regime: Vec<Vec<f64>>,
}

impl FinalizedOof {
    pub fn len(&self) -> usize {
        self.labels.len()
    }

    pub fn is_empty(&self) -> bool {
        self.labels.is_empty()
    }

    /// Original sample index of each OOF row
    pub fn sample_indices(&self) -> &[usize] {
        &self.sample_indices
    }

    pub fn labels(&self) -> &[bool] {
        &self.labels
    }

    pub fn raw(&self, kind: LearnerKind) -> &[f64] {
        self.raw.get(kind)
    }

    pub fn raw_columns(&self) -> &PerLearner<Vec<f64>> {
        &self.raw
    }

    pub fn regime(&self) -> &[Vec<f64>] {
        &self.regime
    }

    pub fn record(&self, row: usize) -> OofRecord {
        OofRecord {
            label: self.labels[row],
            raw: self.raw.map(|_, column| column[row]),
            regime: self.regime[row].clone(),
        }
    }

    pub fn positive_count(&self) -> usize {
        self.labels.iter().filter(|&&l| l).count()
    }
}
