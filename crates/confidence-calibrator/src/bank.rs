use ensemble_core::{EnsembleError, EnsembleResult, LearnerKind, PerLearner};
use serde::{Deserialize, Serialize};
use walk_forward::FinalizedOof;

use crate::{CalibrationStats, PlattCalibrator};

/// One fitted calibrator per base learner.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct CalibratorBank {
    calibrators: PerLearner<PlattCalibrator>,
}

impl CalibratorBank {
    /// Fit every learner's calibrator on its complete OOF column.
    pub fn fit(oof: &FinalizedOof) -> EnsembleResult<Self> {
        let calibrators = PerLearner::try_from_fn(|kind| {
            let calibrator = PlattCalibrator::fit(oof.raw(kind), oof.labels()).map_err(|e| {
                EnsembleError::CalibrationFit {
                    learner: kind,
                    reason: e.to_string(),
                }
            })?;
            tracing::info!(
                "Calibrated {}: a={:.4} b={:.4} ECE={:.4} Brier={:.4}",
                kind,
                calibrator.slope(),
                calibrator.intercept(),
                calibrator.stats().ece,
                calibrator.stats().brier_score
            );
            Ok::<_, EnsembleError>(calibrator)
        })?;
        Ok(Self { calibrators })
    }

    pub fn get(&self, kind: LearnerKind) -> &PlattCalibrator {
        self.calibrators.get(kind)
    }

    pub fn calibrators(&self) -> &PerLearner<PlattCalibrator> {
        &self.calibrators
    }

    pub fn stats(&self) -> PerLearner<CalibrationStats> {
        self.calibrators.map(|_, c| c.stats().clone())
    }

    /// Calibrate one raw probability per learner.
    pub fn calibrate(&self, raw: &PerLearner<f64>) -> PerLearner<f64> {
        self.calibrators.map(|kind, c| c.calibrate(*raw.get(kind)))
    }

    /// Copy of the OOF table with the three calibrated columns attached.
    pub fn apply(&self, oof: &FinalizedOof) -> CalibratedOof {
        CalibratedOof {
            oof: oof.clone(),
            calibrated: self.calibrators.map(|kind, c| c.calibrate_all(oof.raw(kind))),
        }
    }
}

/// OOF table plus calibrated probabilities, the meta-learner's input.
#[derive(Debug, Clone, PartialEq)]
pub struct CalibratedOof {
    oof: FinalizedOof,
    calibrated: PerLearner<Vec<f64>>,
}

impl CalibratedOof {
    pub fn len(&self) -> usize {
        self.oof.len()
    }

    pub fn is_empty(&self) -> bool {
        self.oof.is_empty()
    }

    pub fn oof(&self) -> &FinalizedOof {
        &self.oof
    }

    pub fn labels(&self) -> &[bool] {
        self.oof.labels()
    }

    pub fn regime(&self) -> &[Vec<f64>] {
        self.oof.regime()
    }

    pub fn calibrated(&self, kind: LearnerKind) -> &[f64] {
        self.calibrated.get(kind)
    }

    /// Calibrated probabilities of one row in learner order
    pub fn calibrated_row(&self, row: usize) -> [f64; 3] {
        [
            self.calibrated.histogram[row],
            self.calibrated.exact[row],
            self.calibrated.oblivious[row],
        ]
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use walk_forward::{FoldSchedule, OofRecord, OofTable};

    fn finalized(raw_fn: impl Fn(usize) -> PerLearner<f64>) -> FinalizedOof {
        let schedule = FoldSchedule::new(300, 2, 0).unwrap();
        let mut table = OofTable::for_schedule(&schedule, 0);
        for fold in schedule.folds() {
            for i in fold.validation.clone() {
                table
                    .write(
                        i,
                        OofRecord {
                            label: i % 3 == 0,
                            raw: raw_fn(i),
                            regime: Vec::new(),
                        },
                    )
                    .unwrap();
            }
        }
        table.finalize().unwrap()
    }

    #[test]
    fn test_bank_calibrates_every_column() {
        let oof = finalized(|i| {
            let signal = if i % 3 == 0 { 0.8 } else { 0.3 };
            PerLearner {
                histogram: signal,
                exact: signal * 0.5,
                oblivious: 1.0 - (i % 7) as f64 / 7.0,
            }
        });
        let bank = CalibratorBank::fit(&oof).unwrap();
        let calibrated = bank.apply(&oof);

        assert_eq!(calibrated.len(), oof.len());
        for kind in LearnerKind::ALL {
            assert_eq!(calibrated.calibrated(kind).len(), oof.len());
            assert!(calibrated.calibrated(kind).iter().all(|p| (0.0..=1.0).contains(p)));
        }
        // the original raw columns are untouched
        assert_eq!(calibrated.oof().raw(LearnerKind::Exact), oof.raw(LearnerKind::Exact));
        assert_eq!(bank.stats().histogram.sample_size, oof.len());
    }

    #[test]
    fn test_single_class_oof_fails() {
        let schedule = FoldSchedule::new(100, 1, 0).unwrap();
        let mut table = OofTable::for_schedule(&schedule, 0);
        for i in schedule.folds()[0].validation.clone() {
            table
                .write(
                    i,
                    OofRecord {
                        label: true,
                        raw: PerLearner::from_fn(|_| 0.6),
                        regime: Vec::new(),
                    },
                )
                .unwrap();
        }
        let oof = table.finalize().unwrap();
        let err = CalibratorBank::fit(&oof).unwrap_err();
        assert!(matches!(
            err,
            EnsembleError::CalibrationFit {
                learner: LearnerKind::Histogram,
                ..
            }
        ));
    }
}
