//! Stacking Ensemble
//!
//! Turns a time-ordered feature table into one deployable artifact:
//! walk-forward folds train the base learners, their out-of-fold predictions
//! are calibrated and stacked by a logistic meta-learner, and a confidence
//! gate reports accuracy and coverage per decision threshold.
//!
//! ```ignore
//! let trainer = EnsembleTrainer::new(TrainingConfig::from_env()?)?;
//! let store = ArtifactStore::new(&trainer.config().artifact_root);
//! let version = store.next_version(&trainer.config().entity, trainer.config().horizon)?;
//! let artifact = trainer.train(&table, version)?;
//! store.publish(&artifact)?;
//! ```

pub mod artifact;
pub mod gate;
pub mod meta;
pub mod pipeline;
pub mod registry;
pub mod store;

pub use artifact::{
    checksum, ArtifactId, ArtifactRecord, FoldReport, ModelArtifact, ProbabilityMetrics,
    RegimeFeature, RunMetadata,
};
pub use gate::{wilson_interval, ConfidenceGate, GatingEntry, GatingTable};
pub use meta::MetaModel;
pub use pipeline::EnsembleTrainer;
pub use registry::{ArtifactRegistry, RegistryEntry};
pub use store::ArtifactStore;
