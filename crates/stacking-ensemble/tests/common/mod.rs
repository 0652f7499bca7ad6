#![allow(dead_code)]

use chrono::{TimeZone, Utc};
use ensemble_core::{FeatureTable, TrainingConfig};
use tracing_subscriber::EnvFilter;

pub fn init_tracing() {
    let _ = tracing_subscriber::fmt()
        .with_env_filter(EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("warn")))
        .with_test_writer()
        .try_init();
}

/// Daily bars with one informative feature, one distractor and a regime column.
pub fn synthetic_table(n: usize) -> FeatureTable {
    let start = Utc.with_ymd_and_hms(2020, 1, 1, 0, 0, 0).unwrap();
    let timestamps = (0..n).map(|i| start + chrono::Duration::days(i as i64)).collect();

    let rows: Vec<Vec<f64>> = (0..n)
        .map(|i| {
            let momentum = (i as f64 * 0.618_033_988_75).fract();
            let noise = ((i * 7919) % 1009) as f64 / 1009.0;
            let volatility = 0.1 + 0.05 * ((i as f64) / 50.0).sin();
            vec![momentum, noise, volatility]
        })
        .collect();
    let labels = rows
        .iter()
        .enumerate()
        .map(|(i, r)| {
            let flip = (i * 31) % 10 == 0;
            (r[0] > 0.45) != flip
        })
        .collect();

    FeatureTable::new(
        timestamps,
        vec!["momentum".to_string(), "noise".to_string(), "volatility".to_string()],
        rows,
        labels,
    )
    .unwrap()
}

/// Eight thresholds: 0.50, 0.55, ..., 0.85
pub fn eight_thresholds() -> Vec<f64> {
    (10..=17).map(|i| i as f64 * 0.05).collect()
}

pub fn fast_config() -> TrainingConfig {
    let mut config = TrainingConfig {
        entity: "SPY".to_string(),
        horizon: 5,
        n_folds: 4,
        embargo: 10,
        max_feature_lookback: 5,
        thresholds: eight_thresholds(),
        regime_features: vec!["volatility".to_string()],
        seed: 42,
        ..TrainingConfig::default()
    };
    config.learners.histogram.n_estimators = 20;
    config.learners.histogram.min_samples_leaf = 10;
    config.learners.exact.n_estimators = 20;
    config.learners.oblivious.n_estimators = 20;
    config
}
