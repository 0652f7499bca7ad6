//! The deployable ensemble artifact and its run metadata.

use std::ops::Range;

use base_learners::{predict_bank, BaseLearner};
use chrono::{DateTime, Utc};
use confidence_calibrator::{CalibrationStats, CalibratorBank};
use ensemble_core::{DeploymentRefit, EnsembleError, EnsembleResult, FoldLabel, LearnerKind, PerLearner};
use serde::{Deserialize, Serialize};
use sha2::{Digest, Sha256};

use crate::gate::GatingTable;
use crate::meta::MetaModel;

/// Addresses one published artifact: `{entity}/h{horizon}_ensemble_v{version}`.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct ArtifactId {
    pub entity: String,
    pub horizon: u32,
    pub version: u32,
}

impl ArtifactId {
    pub fn new(entity: impl Into<String>, horizon: u32, version: u32) -> Self {
        Self {
            entity: entity.into(),
            horizon,
            version,
        }
    }

    /// File stem inside the entity directory
    pub fn stem(&self) -> String {
        format!("h{}_ensemble_v{}", self.horizon, self.version)
    }
}

impl std::fmt::Display for ArtifactId {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}/{}", self.entity, self.stem())
    }
}

/// A regime feature and the input column it is read from.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct RegimeFeature {
    pub name: String,
    pub column: usize,
}

/// Out-of-sample quality of one probability column.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ProbabilityMetrics {
    pub log_loss: f64,
    pub brier_score: f64,
    pub accuracy: f64,
    /// `None` when the evaluated labels hold a single class
    pub auc: Option<f64>,
}

impl ProbabilityMetrics {
    pub fn compute(probs: &[f64], labels: &[bool]) -> Self {
        use ensemble_core::stats;
        Self {
            log_loss: stats::log_loss(probs, labels),
            brier_score: stats::brier_score(probs, labels),
            accuracy: stats::accuracy(probs, labels),
            auc: stats::roc_auc(probs, labels),
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct FoldReport {
    pub index: usize,
    pub train: Range<usize>,
    pub validation: Range<usize>,
    pub train_positive_rate: f64,
    /// Validation-range quality of each learner's raw probabilities
    pub metrics: PerLearner<ProbabilityMetrics>,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct RunMetadata {
    pub trained_at: DateTime<Utc>,
    pub n_samples: usize,
    pub n_features: usize,
    pub n_oof: usize,
    pub oof_positive_rate: f64,
    pub embargo: usize,
    pub n_folds_requested: usize,
    pub seed: u64,
    pub refit: DeploymentRefit,
    /// Rows the deployed base learners were trained on
    pub deployment_rows: Range<usize>,
    pub folds: Vec<FoldReport>,
    pub raw_oof: PerLearner<ProbabilityMetrics>,
    pub calibration: PerLearner<CalibrationStats>,
    pub meta_oof: ProbabilityMetrics,
}

impl RunMetadata {
    pub fn n_folds(&self) -> usize {
        self.folds.len()
    }
}

/// Everything needed to score new feature rows, produced once per run and
/// never modified afterwards.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ModelArtifact {
    id: ArtifactId,
    feature_names: Vec<String>,
    regime_features: Vec<RegimeFeature>,
    learners: PerLearner<BaseLearner>,
    calibrators: CalibratorBank,
    meta: MetaModel,
    gating: GatingTable,
    metadata: RunMetadata,
}

impl ModelArtifact {
    #[allow(clippy::too_many_arguments)]
    pub(crate) fn new(
        id: ArtifactId,
        feature_names: Vec<String>,
        regime_features: Vec<RegimeFeature>,
        learners: PerLearner<BaseLearner>,
        calibrators: CalibratorBank,
        meta: MetaModel,
        gating: GatingTable,
        metadata: RunMetadata,
    ) -> Self {
        Self {
            id,
            feature_names,
            regime_features,
            learners,
            calibrators,
            meta,
            gating,
            metadata,
        }
    }

    pub fn id(&self) -> &ArtifactId {
        &self.id
    }

    pub fn name(&self) -> String {
        self.id.to_string()
    }

    pub fn feature_names(&self) -> &[String] {
        &self.feature_names
    }

    pub fn regime_features(&self) -> &[RegimeFeature] {
        &self.regime_features
    }

    pub fn regime_feature_names(&self) -> Vec<String> {
        self.regime_features.iter().map(|r| r.name.clone()).collect()
    }

    pub fn learners(&self) -> &PerLearner<BaseLearner> {
        &self.learners
    }

    pub fn calibrators(&self) -> &CalibratorBank {
        &self.calibrators
    }

    pub fn meta(&self) -> &MetaModel {
        &self.meta
    }

    pub fn gating_table(&self) -> &GatingTable {
        &self.gating
    }

    pub fn metadata(&self) -> &RunMetadata {
        &self.metadata
    }

    /// Score feature rows (in `feature_names` order): base learners, then
    /// calibration, then the meta-learner.
    pub fn predict_proba(&self, rows: &[Vec<f64>]) -> EnsembleResult<Vec<f64>> {
        if let Some((i, row)) = rows
            .iter()
            .enumerate()
            .find(|(_, r)| r.len() != self.feature_names.len())
        {
            return Err(EnsembleError::InvalidData(format!(
                "row {} has {} features, artifact expects {}",
                i,
                row.len(),
                self.feature_names.len()
            )));
        }
        if let Some(i) = rows.iter().position(|r| r.iter().any(|v| !v.is_finite())) {
            return Err(EnsembleError::InvalidData(format!("row {} contains a non-finite value", i)));
        }

        let raw = predict_bank(&self.learners, rows, FoldLabel::Deployment)?;
        Ok(rows
            .iter()
            .enumerate()
            .map(|(i, row)| {
                let calibrated = self.calibrators.calibrate(&raw.map(|_, column| column[i]));
                let regime: Vec<f64> = self.regime_features.iter().map(|r| row[r.column]).collect();
                self.meta.predict_one(
                    &[calibrated.histogram, calibrated.exact, calibrated.oblivious],
                    &regime,
                )
            })
            .collect())
    }

    pub fn to_json(&self) -> EnsembleResult<Vec<u8>> {
        Ok(serde_json::to_vec(self)?)
    }

    /// Decode an artifact and check that its parts agree on shapes.
    pub fn from_json(bytes: &[u8]) -> EnsembleResult<Self> {
        let artifact: Self = serde_json::from_slice(bytes)?;
        artifact.check_shapes()?;
        Ok(artifact)
    }

    fn check_shapes(&self) -> EnsembleResult<()> {
        let width = self.feature_names.len();
        for kind in LearnerKind::ALL {
            let found = self.learners.get(kind).n_features();
            if found != width {
                return Err(EnsembleError::InvalidData(format!(
                    "{} learner expects {} features, artifact lists {}",
                    kind, found, width
                )));
            }
        }
        if let Some(r) = self.regime_features.iter().find(|r| r.column >= width) {
            return Err(EnsembleError::InvalidData(format!(
                "regime feature '{}' reads column {} of {}",
                r.name, r.column, width
            )));
        }
        if !self.meta.has_regime_width(self.regime_features.len()) {
            return Err(EnsembleError::InvalidData(format!(
                "meta model does not take the artifact's {} regime features",
                self.regime_features.len()
            )));
        }
        Ok(())
    }
}

/// Hex SHA-256 of serialized artifact bytes.
pub fn checksum(bytes: &[u8]) -> String {
    hex::encode(Sha256::digest(bytes))
}

/// Sidecar metadata published next to every artifact.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ArtifactRecord {
    pub id: ArtifactId,
    pub name: String,
    pub checksum: String,
    pub size_bytes: u64,
    pub published_at: DateTime<Utc>,
    pub feature_names: Vec<String>,
    pub regime_feature_names: Vec<String>,
    pub gating: GatingTable,
    pub metadata: RunMetadata,
}

impl ArtifactRecord {
    pub fn describe(artifact: &ModelArtifact, bytes: &[u8]) -> Self {
        Self {
            id: artifact.id().clone(),
            name: artifact.name(),
            checksum: checksum(bytes),
            size_bytes: bytes.len() as u64,
            published_at: Utc::now(),
            feature_names: artifact.feature_names().to_vec(),
            regime_feature_names: artifact.regime_feature_names(),
            gating: artifact.gating_table().clone(),
            metadata: artifact.metadata().clone(),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_artifact_id_naming() {
        let id = ArtifactId::new("SPY", 5, 3);
        assert_eq!(id.to_string(), "SPY/h5_ensemble_v3");
        assert_eq!(id.stem(), "h5_ensemble_v3");
    }

    #[test]
    fn test_checksum_is_sha256_hex() {
        assert_eq!(
            checksum(b"abc"),
            "ba7816bf8f01cfea414140de5dae2223b00361a396177a9cb410ff61f20015ad"
        );
    }
}
