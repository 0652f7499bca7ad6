//! Numeric helpers shared by the learners, calibrators and reports.

/// Probabilities are clipped to `[PROB_EPS, 1 - PROB_EPS]` before taking logs.
pub const PROB_EPS: f64 = 1e-15;

/// Compute the mean of a data slice.
pub fn mean(data: &[f64]) -> f64 {
    if data.is_empty() {
        return 0.0;
    }
    data.iter().sum::<f64>() / data.len() as f64
}

/// Compute population standard deviation.
pub fn std_dev(data: &[f64]) -> f64 {
    if data.len() < 2 {
        return 0.0;
    }
    let m = mean(data);
    let variance = data.iter().map(|x| (x - m).powi(2)).sum::<f64>() / data.len() as f64;
    variance.sqrt()
}

pub fn sigmoid(x: f64) -> f64 {
    if x >= 0.0 {
        1.0 / (1.0 + (-x).exp())
    } else {
        let e = x.exp();
        e / (1.0 + e)
    }
}

pub fn logit(p: f64) -> f64 {
    let p = p.clamp(PROB_EPS, 1.0 - PROB_EPS);
    (p / (1.0 - p)).ln()
}

/// Mean binary cross-entropy.
pub fn log_loss(probs: &[f64], labels: &[bool]) -> f64 {
    if probs.is_empty() {
        return 0.0;
    }
    probs
        .iter()
        .zip(labels)
        .map(|(&p, &y)| {
            let p = p.clamp(PROB_EPS, 1.0 - PROB_EPS);
            if y {
                -p.ln()
            } else {
                -(1.0 - p).ln()
            }
        })
        .sum::<f64>()
        / probs.len() as f64
}

/// Mean squared error of probabilities.
pub fn brier_score(probs: &[f64], labels: &[bool]) -> f64 {
    if probs.is_empty() {
        return 0.0;
    }
    probs
        .iter()
        .zip(labels)
        .map(|(&p, &y)| {
            let y = if y { 1.0 } else { 0.0 };
            (p - y).powi(2)
        })
        .sum::<f64>()
        / probs.len() as f64
}

/// Accuracy of the `p >= 0.5` decision.
pub fn accuracy(probs: &[f64], labels: &[bool]) -> f64 {
    if probs.is_empty() {
        return 0.0;
    }
    let correct = probs
        .iter()
        .zip(labels)
        .filter(|(&p, &y)| (p >= 0.5) == y)
        .count();
    correct as f64 / probs.len() as f64
}

/// Area under the ROC curve via the rank-sum statistic, ties averaged.
/// Returns `None` when only one class is present.
pub fn roc_auc(probs: &[f64], labels: &[bool]) -> Option<f64> {
    let n_pos = labels.iter().filter(|&&l| l).count();
    let n_neg = labels.len() - n_pos;
    if n_pos == 0 || n_neg == 0 {
        return None;
    }

    let mut order: Vec<usize> = (0..probs.len()).collect();
    order.sort_by(|&a, &b| probs[a].total_cmp(&probs[b]));

    let mut rank_sum_pos = 0.0;
    let mut i = 0;
    while i < order.len() {
        let mut j = i;
        while j + 1 < order.len() && probs[order[j + 1]] == probs[order[i]] {
            j += 1;
        }
        // 1-based average rank for the tie group [i, j]
        let avg_rank = (i + j) as f64 / 2.0 + 1.0;
        for &idx in &order[i..=j] {
            if labels[idx] {
                rank_sum_pos += avg_rank;
            }
        }
        i = j + 1;
    }

    let n_pos_f = n_pos as f64;
    Some((rank_sum_pos - n_pos_f * (n_pos_f + 1.0) / 2.0) / (n_pos_f * n_neg as f64))
}

#[cfg(test)]
mod tests {
    use super::*;
    use approx::assert_relative_eq;

    #[test]
    fn test_sigmoid_logit_inverse() {
        for p in [0.01, 0.25, 0.5, 0.75, 0.99] {
            assert_relative_eq!(sigmoid(logit(p)), p, epsilon = 1e-12);
        }
        assert!(sigmoid(-800.0) >= 0.0);
        assert!(sigmoid(800.0) <= 1.0);
    }

    #[test]
    fn test_roc_auc_perfect_and_random() {
        let labels = [false, false, true, true];
        assert_relative_eq!(roc_auc(&[0.1, 0.2, 0.8, 0.9], &labels).unwrap(), 1.0);
        assert_relative_eq!(roc_auc(&[0.5, 0.5, 0.5, 0.5], &labels).unwrap(), 0.5);
        assert!(roc_auc(&[0.1, 0.2], &[true, true]).is_none());
    }

    #[test]
    fn test_log_loss_and_brier() {
        let labels = [true, false];
        assert_relative_eq!(brier_score(&[1.0, 0.0], &labels), 0.0);
        assert_relative_eq!(log_loss(&[0.5, 0.5], &labels), std::f64::consts::LN_2, epsilon = 1e-12);
        assert_relative_eq!(accuracy(&[0.7, 0.6], &labels), 0.5);
    }
}
