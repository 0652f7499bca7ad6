use stacking_ensemble::ConfidenceGate;

#[test]
fn test_tau_sweep_has_strictly_decreasing_coverage() {
    // synthetic OOF meta probabilities spread over (0, 1)
    let probs: Vec<f64> = (0..2000).map(|i| (i as f64 + 0.5) / 2000.0).collect();
    let labels: Vec<bool> = probs
        .iter()
        .enumerate()
        .map(|(i, &p)| ((i * 7919) % 1000) as f64 / 1000.0 < p)
        .collect();
    let thresholds: Vec<f64> = (10..=17).map(|i| i as f64 * 0.05).collect();

    let table = ConfidenceGate::new(&thresholds).unwrap().evaluate(&probs, &labels).unwrap();
    assert_eq!(table.len(), 8);
    for pair in table.entries().windows(2) {
        assert!(pair[1].coverage < pair[0].coverage);
        assert!(pair[1].signal_count < pair[0].signal_count);
    }
    // better-calibrated buckets are more accurate at higher thresholds
    let first = table.entries()[0].accuracy.unwrap();
    let last = table.entries()[7].accuracy.unwrap();
    assert!(last > first);
    for entry in table.entries() {
        let (lo, hi) = entry.accuracy_ci.unwrap();
        assert!(lo <= entry.accuracy.unwrap() && entry.accuracy.unwrap() <= hi);
    }
}

#[test]
fn test_gating_reports_empty_bucket_without_accuracy() {
    let probs = vec![0.2, 0.3, 0.55];
    let labels = vec![false, true, true];
    let table = ConfidenceGate::new(&[0.5, 0.9]).unwrap().evaluate(&probs, &labels).unwrap();
    assert_eq!(table.entries()[0].signal_count, 1);
    assert_eq!(table.entries()[1].accuracy, None);
    assert_eq!(table.entries()[1].coverage, 0.0);
}
