//! Confidence Calibrator Module
//!
//! Maps each base learner's raw out-of-fold probabilities onto calibrated
//! probabilities with a monotone Platt fit, and reports how reliable the
//! calibrated outputs are (ECE, MCE, Brier, reliability diagram).

pub mod bank;
pub mod calibrator;

pub use bank::{CalibratedOof, CalibratorBank};
pub use calibrator::{
    calculate_stats, CalibrationError, CalibrationStats, PlattCalibrator, ReliabilityBin,
};
