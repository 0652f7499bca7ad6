use std::path::PathBuf;

use serde::{Deserialize, Serialize};

use crate::{EnsembleError, EnsembleResult};

/// Hyperparameters for the histogram-binned booster
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct HistogramParams {
    pub n_estimators: usize,
    pub learning_rate: f64,
    pub max_depth: usize,
    /// Maximum number of quantile bins per feature (at most 256)
    pub max_bins: usize,
    pub min_samples_leaf: usize,
    /// L2 penalty on leaf values
    pub l2: f64,
}

impl Default for HistogramParams {
    fn default() -> Self {
        Self {
            n_estimators: 100,
            learning_rate: 0.1,
            max_depth: 4,
            max_bins: 64,
            min_samples_leaf: 20,
            l2: 1.0,
        }
    }
}

/// Hyperparameters for the exact greedy booster
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ExactParams {
    pub n_estimators: usize,
    pub learning_rate: f64,
    pub max_depth: usize,
    /// Minimum hessian sum required in each child
    pub min_child_weight: f64,
    /// Minimum loss reduction required to split (gamma)
    pub min_split_gain: f64,
    pub l2: f64,
    /// Fraction of training rows drawn per tree
    pub subsample: f64,
    /// Fraction of feature columns drawn per tree
    pub colsample: f64,
}

impl Default for ExactParams {
    fn default() -> Self {
        Self {
            n_estimators: 100,
            learning_rate: 0.05,
            max_depth: 3,
            min_child_weight: 1.0,
            min_split_gain: 0.0,
            l2: 5.0,
            subsample: 0.8,
            colsample: 0.8,
        }
    }
}

/// Hyperparameters for the oblivious-tree booster
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ObliviousParams {
    pub n_estimators: usize,
    pub learning_rate: f64,
    /// Depth of every symmetric tree (2^depth leaves)
    pub depth: usize,
    /// Number of quantile borders considered per feature
    pub border_count: usize,
    pub l2: f64,
    pub subsample: f64,
}

impl Default for ObliviousParams {
    fn default() -> Self {
        Self {
            n_estimators: 100,
            learning_rate: 0.1,
            depth: 4,
            border_count: 32,
            l2: 3.0,
            subsample: 0.8,
        }
    }
}

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct LearnerParams {
    pub histogram: HistogramParams,
    pub exact: ExactParams,
    pub oblivious: ObliviousParams,
}

/// Meta-learner (stacking logistic regression) settings
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct MetaParams {
    /// L2 penalty on non-intercept coefficients
    pub l2: f64,
    pub max_iter: usize,
    pub tolerance: f64,
}

impl Default for MetaParams {
    fn default() -> Self {
        Self {
            l2: 1.0,
            max_iter: 100,
            tolerance: 1e-8,
        }
    }
}

/// Which training rows the deployed base learners see
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum DeploymentRefit {
    /// Reuse the learners trained on the last fold's training split
    LastFold,
    /// Retrain the learners on every row of the table
    FullData,
}

impl std::str::FromStr for DeploymentRefit {
    type Err = EnsembleError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.to_ascii_lowercase().as_str() {
            "last_fold" | "lastfold" => Ok(DeploymentRefit::LastFold),
            "full_data" | "fulldata" => Ok(DeploymentRefit::FullData),
            other => Err(EnsembleError::InvalidConfig(format!(
                "Unknown deployment refit mode '{}'",
                other
            ))),
        }
    }
}

/// Run parameters for one ensemble training run.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct TrainingConfig {
    /// Entity the model is trained for (ticker, pair, ...)
    pub entity: String,
    /// Prediction horizon in bars
    pub horizon: u32,
    /// Number of walk-forward folds (K)
    pub n_folds: usize,
    /// Gap in samples between a fold's training and validation ranges (E)
    pub embargo: usize,
    /// Longest look-back window used by any feature column
    pub max_feature_lookback: usize,
    /// Ascending confidence-gate thresholds
    pub thresholds: Vec<f64>,
    /// Feature columns passed to the meta-learner alongside the calibrated probabilities
    pub regime_features: Vec<String>,
    pub seed: u64,
    pub learners: LearnerParams,
    pub meta: MetaParams,
    pub refit: DeploymentRefit,
    /// Root directory of the artifact store
    pub artifact_root: PathBuf,
}

impl Default for TrainingConfig {
    fn default() -> Self {
        Self {
            entity: "SPY".to_string(),
            horizon: 1,
            n_folds: 5,
            embargo: 30,
            max_feature_lookback: 20,
            thresholds: default_thresholds(),
            regime_features: Vec::new(),
            seed: 42,
            learners: LearnerParams::default(),
            meta: MetaParams::default(),
            refit: DeploymentRefit::LastFold,
            artifact_root: PathBuf::from("./models/ensembles"),
        }
    }
}

/// 0.55, 0.60, ..., 0.85
pub fn default_thresholds() -> Vec<f64> {
    (11..=17).map(|i| i as f64 * 0.05).collect()
}

impl TrainingConfig {
    pub fn validate(&self) -> EnsembleResult<()> {
        if self.entity.trim().is_empty() {
            return Err(EnsembleError::InvalidConfig("entity must not be empty".to_string()));
        }
        if self.n_folds == 0 {
            return Err(EnsembleError::InvalidConfig("n_folds must be at least 1".to_string()));
        }
        if self.embargo < self.max_feature_lookback {
            return Err(EnsembleError::InvalidConfig(format!(
                "embargo ({}) must cover the longest feature look-back ({})",
                self.embargo, self.max_feature_lookback
            )));
        }
        if self.thresholds.is_empty() {
            return Err(EnsembleError::InvalidConfig("at least one gate threshold is required".to_string()));
        }
        if self.thresholds.iter().any(|t| !(*t > 0.0 && *t < 1.0)) {
            return Err(EnsembleError::InvalidConfig(
                "gate thresholds must lie strictly between 0 and 1".to_string(),
            ));
        }
        if self.thresholds.windows(2).any(|w| w[1] <= w[0]) {
            return Err(EnsembleError::InvalidConfig(
                "gate thresholds must be strictly ascending".to_string(),
            ));
        }

        let h = &self.learners.histogram;
        if h.n_estimators == 0 || h.max_depth == 0 || h.max_bins < 2 || h.max_bins > 256 {
            return Err(EnsembleError::InvalidConfig(
                "histogram learner needs n_estimators >= 1, max_depth >= 1, 2 <= max_bins <= 256".to_string(),
            ));
        }
        let e = &self.learners.exact;
        if e.n_estimators == 0 || e.max_depth == 0 || !in_unit(e.subsample) || !in_unit(e.colsample) {
            return Err(EnsembleError::InvalidConfig(
                "exact learner needs n_estimators >= 1, max_depth >= 1, subsample/colsample in (0, 1]".to_string(),
            ));
        }
        let o = &self.learners.oblivious;
        if o.n_estimators == 0 || o.depth == 0 || o.depth > 10 || o.border_count == 0
            || o.border_count > 256
            || !in_unit(o.subsample)
        {
            return Err(EnsembleError::InvalidConfig(
                "oblivious learner needs n_estimators >= 1, 1 <= depth <= 10, 1 <= border_count <= 256, subsample in (0, 1]".to_string(),
            ));
        }
        for (name, lr, l2) in [
            ("histogram", h.learning_rate, h.l2),
            ("exact", e.learning_rate, e.l2),
            ("oblivious", o.learning_rate, o.l2),
        ] {
            if !(lr > 0.0) || !(l2 >= 0.0) {
                return Err(EnsembleError::InvalidConfig(format!(
                    "{} learner needs learning_rate > 0 and l2 >= 0",
                    name
                )));
            }
        }
        // a constant stacked column leaves the unpenalised IRLS system singular
        if !(self.meta.l2 > 0.0) || self.meta.max_iter == 0 || !(self.meta.tolerance > 0.0) {
            return Err(EnsembleError::InvalidConfig(
                "meta learner needs l2 > 0, max_iter >= 1 and tolerance > 0".to_string(),
            ));
        }
        Ok(())
    }

    /// Build a config from `ENSEMBLE_*` environment variables (a `.env` file is
    /// honoured). Unset variables keep their default.
    pub fn from_env() -> EnsembleResult<Self> {
        dotenvy::dotenv().ok();
        Self::from_lookup(|key| std::env::var(key).ok())
    }

    /// Same as [`from_env`](Self::from_env) with an explicit variable source.
    pub fn from_lookup(lookup: impl Fn(&str) -> Option<String>) -> EnsembleResult<Self> {
        let mut config = Self::default();

        if let Some(v) = lookup("ENSEMBLE_ENTITY") {
            config.entity = v;
        }
        if let Some(v) = lookup("ENSEMBLE_HORIZON") {
            config.horizon = parse_var("ENSEMBLE_HORIZON", &v)?;
        }
        if let Some(v) = lookup("ENSEMBLE_FOLDS") {
            config.n_folds = parse_var("ENSEMBLE_FOLDS", &v)?;
        }
        if let Some(v) = lookup("ENSEMBLE_EMBARGO") {
            config.embargo = parse_var("ENSEMBLE_EMBARGO", &v)?;
        }
        if let Some(v) = lookup("ENSEMBLE_MAX_LOOKBACK") {
            config.max_feature_lookback = parse_var("ENSEMBLE_MAX_LOOKBACK", &v)?;
        }
        if let Some(v) = lookup("ENSEMBLE_THRESHOLDS") {
            config.thresholds = split_list(&v)
                .map(|t| parse_var("ENSEMBLE_THRESHOLDS", t))
                .collect::<EnsembleResult<Vec<f64>>>()?;
        }
        if let Some(v) = lookup("ENSEMBLE_REGIME_FEATURES") {
            config.regime_features = split_list(&v).map(str::to_string).collect();
        }
        if let Some(v) = lookup("ENSEMBLE_SEED") {
            config.seed = parse_var("ENSEMBLE_SEED", &v)?;
        }
        if let Some(v) = lookup("ENSEMBLE_REFIT") {
            config.refit = v.parse()?;
        }
        if let Some(v) = lookup("ENSEMBLE_ARTIFACT_ROOT") {
            config.artifact_root = PathBuf::from(v);
        }

        config.validate()?;
        tracing::debug!(
            "Loaded training config: entity={} horizon={} folds={} embargo={}",
            config.entity,
            config.horizon,
            config.n_folds,
            config.embargo
        );
        Ok(config)
    }
}

fn in_unit(v: f64) -> bool {
    v > 0.0 && v <= 1.0
}

fn split_list(v: &str) -> impl Iterator<Item = &str> {
    v.split(',').map(str::trim).filter(|s| !s.is_empty())
}

fn parse_var<T: std::str::FromStr>(key: &str, value: &str) -> EnsembleResult<T> {
    value
        .trim()
        .parse()
        .map_err(|_| EnsembleError::InvalidConfig(format!("{} has invalid value '{}'", key, value)))
}
