//! Walk-forward fold scheduling and out-of-fold prediction collection.
//!
//! The scheduler carves a time-ordered sample range into expanding training
//! windows, each followed by an embargo gap and a validation window. The OOF
//! table collects every validation prediction exactly once and is the only
//! bridge between per-fold training and the global calibration/stacking fits.

pub mod folds;
pub mod oof;

pub use folds::{Fold, FoldSchedule};
pub use oof::{FinalizedOof, OofRecord, OofTable};
