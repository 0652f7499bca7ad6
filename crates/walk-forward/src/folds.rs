use std::ops::Range;

use ensemble_core::{EnsembleError, EnsembleResult};
use serde::{Deserialize, Serialize};

/// One walk-forward split.
///
/// Training always starts at sample 0 (expanding window); the validation
/// range starts `embargo` samples after the training range ends.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Fold {
    /// Position among the retained folds (0-based)
    pub index: usize,
    pub train: Range<usize>,
    pub embargo: usize,
    pub validation: Range<usize>,
}

impl Fold {
    pub fn train_len(&self) -> usize {
        self.train.len()
    }

    pub fn validation_len(&self) -> usize {
        self.validation.len()
    }

    /// Distance between the end of training and the start of validation
    pub fn gap(&self) -> usize {
        self.validation.start - self.train.end
    }

    /// `max(train) + embargo < min(validation)`
    pub fn satisfies_embargo(&self) -> bool {
        !self.train.is_empty()
            && !self.validation.is_empty()
            && (self.train.end - 1) + self.embargo < self.validation.start
    }
}

/// The immutable set of folds for one training run.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct FoldSchedule {
    n_samples: usize,
    embargo: usize,
    folds: Vec<Fold>,
}

impl FoldSchedule {
    /// Split `n_samples` ordered samples into at most `n_folds` folds.
    ///
    /// Fold `k` trains on `[0, (k+1)·N/(K+1))` and validates on
    /// `[train_end + E, (k+2)·N/(K+1))`, clipped to N. Folds whose training
    /// or validation range comes out empty are dropped.
    pub fn new(n_samples: usize, n_folds: usize, embargo: usize) -> EnsembleResult<Self> {
        if n_folds == 0 {
            return Err(EnsembleError::InvalidConfig("n_folds must be at least 1".to_string()));
        }

        let segments = n_folds + 1;
        let mut folds = Vec::with_capacity(n_folds);

        for k in 0..n_folds {
            let train_end = (k + 1) * n_samples / segments;
            let validation_start = train_end + embargo;
            let validation_end = ((k + 2) * n_samples / segments).min(n_samples);

            if train_end == 0 || validation_start >= validation_end {
                tracing::debug!(
                    "Dropping fold {}: train_end={} validation=[{}, {})",
                    k,
                    train_end,
                    validation_start,
                    validation_end
                );
                continue;
            }

            folds.push(Fold {
                index: folds.len(),
                train: 0..train_end,
                embargo,
                validation: validation_start..validation_end,
            });
        }

        if folds.is_empty() {
            return Err(EnsembleError::InsufficientData(format!(
                "{} samples cannot form any fold with K={} and embargo={}",
                n_samples, n_folds, embargo
            )));
        }

        let schedule = Self {
            n_samples,
            embargo,
            folds,
        };
        schedule.validate()?;

        tracing::info!(
            "Scheduled {} of {} folds over {} samples (embargo={}, oof_samples={})",
            schedule.folds.len(),
            n_folds,
            n_samples,
            embargo,
            schedule.oof_len()
        );

        Ok(schedule)
    }

    /// Check every structural invariant of the schedule. Learner work must
    /// not start unless this passes.
    pub fn validate(&self) -> EnsembleResult<()> {
        let mut previous_end = 0usize;
        for fold in &self.folds {
            if !fold.satisfies_embargo() {
                return Err(EnsembleError::InvalidData(format!(
                    "Fold {} violates the embargo: train={:?} embargo={} validation={:?}",
                    fold.index, fold.train, fold.embargo, fold.validation
                )));
            }
            if fold.validation.end > self.n_samples {
                return Err(EnsembleError::InvalidData(format!(
                    "Fold {} validation range {:?} exceeds {} samples",
                    fold.index, fold.validation, self.n_samples
                )));
            }
            if fold.validation.start < previous_end {
                return Err(EnsembleError::InvalidData(format!(
                    "Fold {} validation range {:?} overlaps the previous fold",
                    fold.index, fold.validation
                )));
            }
            previous_end = fold.validation.end;
        }
        Ok(())
    }

    pub fn folds(&self) -> &[Fold] {
        &self.folds
    }

    pub fn len(&self) -> usize {
        self.folds.len()
    }

    pub fn is_empty(&self) -> bool {
        self.folds.is_empty()
    }

    pub fn n_samples(&self) -> usize {
        self.n_samples
    }

    pub fn embargo(&self) -> usize {
        self.embargo
    }

    pub fn last(&self) -> &Fold {
        // A schedule is never constructed without at least one fold.
        &self.folds[self.folds.len() - 1]
    }

    /// Mask of sample indices that some fold validates on
    pub fn expected_coverage(&self) -> Vec<bool> {
        let mut mask = vec![false; self.n_samples];
        for fold in &self.folds {
            for slot in &mut mask[fold.validation.clone()] {
                *slot = true;
            }
        }
        mask
    }

    /// Number of samples that receive an out-of-fold prediction
    pub fn oof_len(&self) -> usize {
        self.folds.iter().map(Fold::validation_len).sum()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_ten_thousand_samples_five_folds() {
        let schedule = FoldSchedule::new(10_000, 5, 30).unwrap();

        assert_eq!(schedule.len(), 5);
        for fold in schedule.folds() {
            assert!(fold.gap() >= 30);
            assert!(fold.satisfies_embargo());
        }
        assert_eq!(schedule.folds()[0].train, 0..1666);
        assert_eq!(schedule.folds()[0].validation, 1696..3333);
        assert_eq!(schedule.last().validation.end, 10_000);
    }

    #[test]
    fn test_inverted_validation_folds_are_dropped() {
        // segment width is 20, so an embargo of 25 swallows every validation window
        let err = FoldSchedule::new(100, 4, 25).unwrap_err();
        assert!(matches!(err, EnsembleError::InsufficientData(_)));

        // width 25 with embargo 20 leaves 5 validation samples per fold
        let schedule = FoldSchedule::new(100, 3, 20).unwrap();
        assert_eq!(schedule.len(), 3);
        assert!(schedule.folds().iter().all(|f| f.validation_len() == 5));
    }

    #[test]
    fn test_too_few_samples() {
        assert!(matches!(
            FoldSchedule::new(3, 5, 2),
            Err(EnsembleError::InsufficientData(_))
        ));
        assert!(matches!(
            FoldSchedule::new(0, 1, 0),
            Err(EnsembleError::InsufficientData(_))
        ));
    }

    #[test]
    fn test_expected_coverage_matches_validation_ranges() {
        let schedule = FoldSchedule::new(120, 3, 5).unwrap();
        let mask = schedule.expected_coverage();

        assert_eq!(mask.iter().filter(|&&m| m).count(), schedule.oof_len());
        // the first fold's training prefix never gets an OOF prediction
        assert!(mask[..schedule.folds()[0].train.end].iter().all(|&m| !m));
        for fold in schedule.folds() {
            assert!(mask[fold.validation.clone()].iter().all(|&m| m));
            assert!(mask[fold.train.end..fold.validation.start].iter().all(|&m| !m));
        }
    }

    #[test]
    fn test_validate_catches_tampered_fold() {
        let mut schedule = FoldSchedule::new(1_000, 4, 10).unwrap();
        schedule.folds[1].validation.start = schedule.folds[1].train.end;
        assert!(schedule.validate().is_err());
    }
}
