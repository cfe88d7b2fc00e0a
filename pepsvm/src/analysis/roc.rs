use std::cmp::Ordering;

use tracing::info;

/// ROC curve points (FPR, TPR) sweeping the threshold from the highest
/// score down. `scored` pairs a classifier score with whether the peptide
/// is a positive.
pub fn calculate_roc(scored: &[(f64, bool)]) -> (Vec<f64>, Vec<f64>) {
    let positive_count = scored.iter().filter(|(_, positive)| *positive).count();
    let negative_count = scored.len() - positive_count;

    if positive_count == 0 || negative_count == 0 {
        info!("Warning: All instances are in one class. ROC curve will be degenerate.");
        return (vec![0.0, 1.0], vec![0.0, 1.0]);
    }

    let mut paired: Vec<(f64, bool)> = scored.to_vec();
    paired.sort_by(|a, b| b.0.partial_cmp(&a.0).unwrap_or(Ordering::Equal));

    let mut tpr_values = vec![0.0];
    let mut fpr_values = vec![0.0];

    let mut tp = 0;
    let mut fp = 0;

    for &(_, is_positive) in &paired {
        if is_positive {
            tp += 1;
        } else {
            fp += 1;
        }

        tpr_values.push(tp as f64 / positive_count as f64);
        fpr_values.push(fp as f64 / negative_count as f64);
    }

    (fpr_values, tpr_values)
}

/// Area under the ROC curve by the trapezoidal rule.
pub fn calculate_auc(fpr: &[f64], tpr: &[f64]) -> f64 {
    if fpr.len() != tpr.len() || fpr.len() < 2 {
        return 0.0;
    }

    let mut auc = 0.0;
    for i in 1..fpr.len() {
        let width = fpr[i] - fpr[i - 1];
        let height = (tpr[i] + tpr[i - 1]) / 2.0;
        auc += width * height;
    }

    auc
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn perfect_separation() {
        let scored = vec![(2.0, true), (1.5, true), (-1.0, false), (-2.0, false)];
        let (fpr, tpr) = calculate_roc(&scored);
        assert_eq!(fpr.len(), 5);
        assert_eq!(calculate_auc(&fpr, &tpr), 1.0);
    }

    #[test]
    fn inverted_separation() {
        let scored = vec![(-2.0, true), (2.0, false)];
        let (fpr, tpr) = calculate_roc(&scored);
        assert_eq!(calculate_auc(&fpr, &tpr), 0.0);
    }

    #[test]
    fn single_class_is_degenerate() {
        let (fpr, tpr) = calculate_roc(&[(1.0, true), (0.5, true)]);
        assert_eq!(calculate_auc(&fpr, &tpr), 0.5);
    }
}
