//! Search workers
//!
//! A worker owns one dataset's splits, trains a model family from a
//! sampled configuration under an advisory budget, and reports a
//! standardized loss record back to the search scheduler. Workers hold no
//! shared mutable state; concurrent trials each construct their own
//! instance.

pub mod gradient_boosting;
pub mod tabnet;

pub use gradient_boosting::{GbmParams, GradientBoostingWorker};
pub use tabnet::{TabNetParams, TabNetWorker};

use ndarray::{concatenate, Array1, Array2, Axis};
use serde::{Deserialize, Serialize};
use tracing::warn;

use crate::error::{AutomlError, Result};
use crate::space::RawConfig;

/// Train/validation/test partitions owned by one worker instance
#[derive(Debug, Clone)]
pub struct DataSplits {
    pub x_train: Array2<f64>,
    pub y_train: Array1<f64>,
    pub x_val: Array2<f64>,
    pub y_val: Array1<f64>,
    pub x_test: Array2<f64>,
    pub y_test: Array1<f64>,
}

impl DataSplits {
    pub fn n_features(&self) -> usize {
        self.x_train.ncols()
    }

    /// Distinct labels present in the training split.
    pub fn n_classes(&self) -> usize {
        let mut classes: Vec<i64> = self.y_train.iter().map(|&v| v.round() as i64).collect();
        classes.sort_unstable();
        classes.dedup();
        classes.len()
    }

    /// Train and validation splits stacked, for the final refit.
    pub fn merged_train_val(&self) -> Result<(Array2<f64>, Array1<f64>)> {
        let x = concatenate(Axis(0), &[self.x_train.view(), self.x_val.view()])
            .map_err(|e| AutomlError::DataError(e.to_string()))?;
        let y = concatenate(Axis(0), &[self.y_train.view(), self.y_val.view()])
            .map_err(|e| AutomlError::DataError(e.to_string()))?;
        Ok((x, y))
    }
}

/// Prediction decision rule, fixed once at worker construction
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum Objective {
    /// Threshold the positive-class probability at 0.5
    Binary,
    /// Arg-max over class probabilities, never thresholded
    MultiClass { n_classes: usize },
}

impl Objective {
    /// Turn class probabilities (one row per sample) into labels.
    pub fn decide(&self, proba: &Array2<f64>) -> Array1<f64> {
        match self {
            Objective::Binary => proba
                .column(1)
                .iter()
                .map(|&p| if p > 0.5 { 1.0 } else { 0.0 })
                .collect(),
            Objective::MultiClass { .. } => proba
                .axis_iter(Axis(0))
                .map(|row| {
                    row.iter()
                        .enumerate()
                        .max_by(|a, b| a.1.partial_cmp(b.1).unwrap_or(std::cmp::Ordering::Equal))
                        .map(|(k, _)| k as f64)
                        .unwrap_or(0.0)
                })
                .collect(),
        }
    }
}

/// Accuracy record attached to a trial result
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct EvalInfo {
    pub train_accuracy: f64,
    pub val_accuracy: f64,
    pub test_accuracy: f64,
}

/// Result of one `compute` call, handed back to the scheduler
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct WorkerResult {
    /// `1 - validation balanced accuracy`, in `[0, 1]`
    pub loss: f64,
    pub info: EvalInfo,
}

/// Result of the final retraining on train + validation
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct RefitResult {
    pub train_accuracy: f64,
    pub test_accuracy: f64,
}

/// One search-worker family
pub trait SearchWorker {
    /// Train under the sampled configuration and advisory budget; report
    /// the scheduler loss.
    fn compute(&self, config: &RawConfig, budget: f64) -> Result<WorkerResult>;

    /// Retrain the winning configuration on train + validation.
    fn refit(&self, config: &RawConfig) -> Result<RefitResult>;
}

/// Scheduler loss from a validation accuracy, substituting the worst case
/// when the evaluation is degenerate. The substitution is deliberate
/// behavior, not a hidden default.
pub(crate) fn loss_from_accuracy(val_accuracy: f64) -> f64 {
    if !val_accuracy.is_finite() {
        warn!(
            val_accuracy,
            "degenerate validation accuracy, substituting worst-case loss"
        );
        return 1.0;
    }
    1.0 - val_accuracy
}

/// Accuracy with the degenerate case substituted by zero (used by refit).
pub(crate) fn guard_accuracy(accuracy: f64) -> f64 {
    if !accuracy.is_finite() {
        warn!(accuracy, "degenerate accuracy, substituting zero");
        return 0.0;
    }
    accuracy
}
