//! End-to-end training run: folds, OOF collection, calibration, stacking,
//! gating and packaging.

use base_learners::{predict_bank, train_bank, BaseLearner};
use chrono::Utc;
use confidence_calibrator::CalibratorBank;
use ensemble_core::{
    DeploymentRefit, EnsembleError, EnsembleResult, FeatureTable, FoldLabel, PerLearner,
    TrainingConfig,
};
use rayon::prelude::*;
use walk_forward::{Fold, FoldSchedule, OofRecord, OofTable};

use crate::artifact::{
    ArtifactId, FoldReport, ModelArtifact, ProbabilityMetrics, RegimeFeature, RunMetadata,
};
use crate::gate::ConfidenceGate;
use crate::meta::MetaModel;

/// What one fold hands back to the OOF table.
struct FoldOutput {
    fold: Fold,
    learners: PerLearner<BaseLearner>,
    predictions: PerLearner<Vec<f64>>,
    report: FoldReport,
}

pub struct EnsembleTrainer {
    config: TrainingConfig,
}

impl EnsembleTrainer {
    pub fn new(config: TrainingConfig) -> EnsembleResult<Self> {
        config.validate()?;
        Ok(Self { config })
    }

    pub fn config(&self) -> &TrainingConfig {
        &self.config
    }

    /// Train a complete artifact for `table`, labelled with `version`.
    ///
    /// Either every stage succeeds and a full artifact is returned, or the
    /// first failure is returned and nothing is produced.
    pub fn train(&self, table: &FeatureTable, version: u32) -> EnsembleResult<ModelArtifact> {
        let config = &self.config;
        let id = ArtifactId::new(config.entity.clone(), config.horizon, version);
        tracing::info!(
            "Training {} on {} samples x {} features",
            id,
            table.len(),
            table.n_features()
        );

        let schedule = FoldSchedule::new(table.len(), config.n_folds, config.embargo)?;
        schedule.validate()?;

        let regime_columns = table.resolve_columns(&config.regime_features)?;
        let gate = ConfidenceGate::new(&config.thresholds)?;

        let mut outputs: Vec<FoldOutput> = schedule
            .folds()
            .par_iter()
            .map(|fold| self.run_fold(table, fold))
            .collect::<EnsembleResult<Vec<_>>>()?;
        tracing::info!("Trained {} folds", outputs.len());

        let mut oof_table = OofTable::for_schedule(&schedule, regime_columns.len());
        for output in &outputs {
            for (pos, index) in output.fold.validation.clone().enumerate() {
                let row = table.row(index);
                oof_table.write(
                    index,
                    OofRecord {
                        label: table.label(index),
                        raw: output.predictions.map(|_, column| column[pos]),
                        regime: regime_columns.iter().map(|&c| row[c]).collect(),
                    },
                )?;
            }
        }
        let oof = oof_table.finalize()?;

        let calibrators = CalibratorBank::fit(&oof)?;
        let calibrated = calibrators.apply(&oof);
        let stacked: Vec<[f64; 3]> = (0..calibrated.len()).map(|i| calibrated.calibrated_row(i)).collect();

        let meta = MetaModel::fit(&stacked, oof.regime(), oof.labels(), &config.meta)?;
        let meta_probs = meta.predict(&stacked, oof.regime())?;
        let meta_oof = ProbabilityMetrics::compute(&meta_probs, oof.labels());
        tracing::info!(
            "Meta OOF: log_loss={:.4} brier={:.4} auc={:?}",
            meta_oof.log_loss,
            meta_oof.brier_score,
            meta_oof.auc
        );

        let gating = gate.evaluate(&meta_probs, oof.labels())?;
        let folds: Vec<FoldReport> = outputs.iter().map(|o| o.report.clone()).collect();

        let (learners, deployment_rows) = match config.refit {
            DeploymentRefit::LastFold => {
                let last = outputs.pop().ok_or_else(|| {
                    EnsembleError::InsufficientData("no fold produced deployable learners".to_string())
                })?;
                (last.learners, last.fold.train)
            }
            DeploymentRefit::FullData => {
                let all = 0..table.len();
                tracing::info!("Refitting deployment learners on all {} rows", table.len());
                let learners = train_bank(
                    &config.learners,
                    table.rows(all.clone()),
                    table.labels(all.clone()),
                    config.seed,
                    FoldLabel::Deployment,
                )?;
                (learners, all)
            }
        };

        let metadata = RunMetadata {
            trained_at: Utc::now(),
            n_samples: table.len(),
            n_features: table.n_features(),
            n_oof: oof.len(),
            oof_positive_rate: oof.positive_count() as f64 / oof.len() as f64,
            embargo: config.embargo,
            n_folds_requested: config.n_folds,
            seed: config.seed,
            refit: config.refit,
            deployment_rows,
            folds,
            raw_oof: PerLearner::from_fn(|kind| ProbabilityMetrics::compute(oof.raw(kind), oof.labels())),
            calibration: calibrators.stats(),
            meta_oof,
        };

        let regime_features = config
            .regime_features
            .iter()
            .zip(&regime_columns)
            .map(|(name, &column)| RegimeFeature {
                name: name.clone(),
                column,
            })
            .collect();

        let artifact = ModelArtifact::new(
            id,
            table.feature_names().to_vec(),
            regime_features,
            learners,
            calibrators,
            meta,
            gating,
            metadata,
        );
        tracing::info!("Packaged {}", artifact.name());
        Ok(artifact)
    }

    fn run_fold(&self, table: &FeatureTable, fold: &Fold) -> EnsembleResult<FoldOutput> {
        let label = FoldLabel::Fold(fold.index);
        tracing::debug!(
            "Fold {}: train={:?} embargo={} validation={:?}",
            fold.index,
            fold.train,
            fold.embargo,
            fold.validation
        );

        let learners = train_bank(
            &self.config.learners,
            table.rows(fold.train.clone()),
            table.labels(fold.train.clone()),
            self.config.seed,
            label,
        )?;
        let predictions = predict_bank(&learners, table.rows(fold.validation.clone()), label)?;
        let report = fold_report(table, fold, &predictions);

        Ok(FoldOutput {
            fold: fold.clone(),
            learners,
            predictions,
            report,
        })
    }
}

fn fold_report(table: &FeatureTable, fold: &Fold, predictions: &PerLearner<Vec<f64>>) -> FoldReport {
    let labels = table.labels(fold.validation.clone());
    FoldReport {
        index: fold.index,
        train: fold.train.clone(),
        validation: fold.validation.clone(),
        train_positive_rate: table.positive_rate(fold.train.clone()),
        metrics: predictions.map(|_, column| ProbabilityMetrics::compute(column, labels)),
    }
}
