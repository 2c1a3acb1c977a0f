//! Classification metrics for search feedback
//!
//! Balanced accuracy is the optimization target reported to the search
//! scheduler; its complement is the per-round evaluation feedback during
//! fitting.

use ndarray::Array1;

/// Mean per-class recall.
///
/// Classes are the distinct labels present in `y_true`. Returns `NaN` when
/// `y_true` is empty or lengths differ — callers treat a non-finite result
/// as a degenerate evaluation.
pub fn balanced_accuracy(y_true: &Array1<f64>, y_pred: &Array1<f64>) -> f64 {
    if y_true.is_empty() || y_true.len() != y_pred.len() {
        return f64::NAN;
    }

    let mut classes: Vec<i64> = y_true.iter().map(|&v| v.round() as i64).collect();
    classes.sort_unstable();
    classes.dedup();

    let mut recall_sum = 0.0;
    for &class in &classes {
        let mut total = 0usize;
        let mut hit = 0usize;
        for (t, p) in y_true.iter().zip(y_pred.iter()) {
            if t.round() as i64 == class {
                total += 1;
                if p.round() as i64 == class {
                    hit += 1;
                }
            }
        }
        recall_sum += hit as f64 / total as f64;
    }
    recall_sum / classes.len() as f64
}

/// `1 - balanced_accuracy`, the feedback metric reported while fitting.
pub fn balanced_error(y_true: &Array1<f64>, y_pred: &Array1<f64>) -> f64 {
    1.0 - balanced_accuracy(y_true, y_pred)
}

#[cfg(test)]
mod tests {
    use super::*;
    use ndarray::array;

    #[test]
    fn test_perfect_predictions() {
        let y = array![0.0, 0.0, 1.0, 1.0];
        assert_eq!(balanced_accuracy(&y, &y), 1.0);
    }

    #[test]
    fn test_balanced_accuracy_weighs_classes_equally() {
        // 8 negatives all correct, 2 positives all wrong:
        // plain accuracy 0.8, balanced accuracy 0.5
        let y_true = array![0.0, 0.0, 0.0, 0.0, 0.0, 0.0, 0.0, 0.0, 1.0, 1.0];
        let y_pred = array![0.0, 0.0, 0.0, 0.0, 0.0, 0.0, 0.0, 0.0, 0.0, 0.0];
        assert!((balanced_accuracy(&y_true, &y_pred) - 0.5).abs() < 1e-12);
    }

    #[test]
    fn test_multiclass() {
        let y_true = array![0.0, 1.0, 2.0, 0.0, 1.0, 2.0];
        let y_pred = array![0.0, 1.0, 2.0, 0.0, 2.0, 2.0];
        // recalls: 1.0, 0.5, 1.0
        assert!((balanced_accuracy(&y_true, &y_pred) - 2.5 / 3.0).abs() < 1e-12);
    }

    #[test]
    fn test_empty_is_nan() {
        let empty = Array1::<f64>::zeros(0);
        assert!(balanced_accuracy(&empty, &empty).is_nan());
    }

    #[test]
    fn test_balanced_error_complement() {
        let y_true = array![0.0, 1.0];
        let y_pred = array![0.0, 0.0];
        assert!((balanced_error(&y_true, &y_pred) - 0.5).abs() < 1e-12);
    }
}
