//! Attentive tabular network trainer
//!
//! A compact TabNet-style classifier: sequential decision steps, each with
//! a learned feature mask relaxed by `gamma` across steps and a ReLU
//! decision block of width `n_d`, a sparsity penalty on the masks, and
//! ghost batch normalization over virtual batches. Reproducibility is
//! scoped to the instance through an explicit seed in the configuration.

use ndarray::{Array1, Array2, Axis};
use rand::prelude::SliceRandom;
use rand::{Rng, SeedableRng};
use rand_xoshiro::Xoshiro256PlusPlus;
use serde::{Deserialize, Serialize};

use crate::error::{AutomlError, Result};
use crate::training::metrics::balanced_error;

const NORM_EPS: f64 = 1e-5;

/// TabNet configuration
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct TabNetConfig {
    pub input_dim: usize,
    pub output_dim: usize,
    /// Decision-block width per step
    pub n_d: usize,
    /// Attention width per step
    pub n_a: usize,
    /// Number of decision steps
    pub n_steps: usize,
    /// Relaxation factor for feature reuse across steps
    pub gamma: f64,
    /// Sparsity regularization on the feature masks
    pub lambda_sparse: f64,
    /// Running-statistics momentum for ghost batch normalization
    pub momentum: f64,
    pub batch_size: usize,
    /// Ghost batch normalization chunk size
    pub virtual_batch_size: usize,
    pub learning_rate: f64,
    /// Multiplicative step-LR decay factor
    pub decay_rate: f64,
    /// Optimizer steps between decays
    pub decay_iterations: usize,
    pub seed: u64,
}

impl Default for TabNetConfig {
    fn default() -> Self {
        Self {
            input_dim: 0,
            output_dim: 0,
            n_d: 8,
            n_a: 8,
            n_steps: 3,
            gamma: 1.3,
            lambda_sparse: 1e-3,
            momentum: 0.02,
            batch_size: 1024,
            virtual_batch_size: 128,
            learning_rate: 0.02,
            decay_rate: 0.9,
            decay_iterations: 2000,
            seed: 11,
        }
    }
}

/// One decision step: feature-mask logits plus a two-layer decision block
#[derive(Debug, Clone)]
struct DecisionStep {
    mask_logits: Array1<f64>,
    /// features x n_d
    w_in: Array2<f64>,
    /// n_d x classes
    w_out: Array2<f64>,
}

/// TabNet-style classifier
#[derive(Debug, Clone)]
pub struct TabNetClassifier {
    config: TabNetConfig,
    steps: Vec<DecisionStep>,
    bias: Array1<f64>,
    running_mean: Array1<f64>,
    running_var: Array1<f64>,
    is_fitted: bool,
}

impl TabNetClassifier {
    pub fn new(config: TabNetConfig) -> Result<Self> {
        if config.input_dim == 0 || config.output_dim < 2 {
            return Err(AutomlError::invalid(
                "tabnet",
                format!("{}x{}", config.input_dim, config.output_dim),
                "input_dim must be positive and output_dim at least 2",
            ));
        }
        if config.n_steps == 0 || config.n_d == 0 {
            return Err(AutomlError::invalid(
                "nsteps",
                config.n_steps,
                "decision steps and their width must be positive",
            ));
        }
        let mut rng = Xoshiro256PlusPlus::seed_from_u64(config.seed);
        let (d, c) = (config.input_dim, config.output_dim);
        let steps = (0..config.n_steps)
            .map(|_| DecisionStep {
                mask_logits: Array1::zeros(d),
                w_in: Array2::from_shape_fn((d, config.n_d), |_| rng.gen::<f64>() * 0.2 - 0.1),
                w_out: Array2::from_shape_fn((config.n_d, c), |_| {
                    rng.gen::<f64>() * 0.2 - 0.1
                }),
            })
            .collect();
        Ok(Self {
            steps,
            bias: Array1::zeros(c),
            running_mean: Array1::zeros(d),
            running_var: Array1::ones(d),
            config,
            is_fitted: false,
        })
    }

    pub fn config(&self) -> &TabNetConfig {
        &self.config
    }

    pub fn is_fitted(&self) -> bool {
        self.is_fitted
    }

    /// Per-step feature masks after the gamma relaxation.
    fn feature_masks(&self) -> Vec<Array1<f64>> {
        let d = self.config.input_dim;
        let mut prior = Array1::from_elem(d, 1.0);
        let mut masks = Vec::with_capacity(self.config.n_steps);
        for step in &self.steps {
            let max = step
                .mask_logits
                .iter()
                .cloned()
                .fold(f64::NEG_INFINITY, f64::max);
            let mut mask: Array1<f64> =
                step.mask_logits.iter().map(|&l| (l - max).exp()).collect();
            mask *= &prior;
            let sum = mask.sum();
            if sum > 0.0 {
                mask /= sum;
            }
            for j in 0..d {
                prior[j] = (prior[j] * (self.config.gamma - mask[j])).max(NORM_EPS);
            }
            masks.push(mask);
        }
        masks
    }

    fn logits(&self, x_norm: &Array2<f64>, masks: &[Array1<f64>]) -> Array2<f64> {
        let n = x_norm.nrows();
        let c = self.config.output_dim;
        let mut logits = Array2::from_shape_fn((n, c), |(_, k)| self.bias[k]);
        for (mask, step) in masks.iter().zip(&self.steps) {
            let masked = x_norm * &mask.clone().insert_axis(Axis(0));
            let hidden = masked.dot(&step.w_in).mapv(|v| v.max(0.0));
            logits = logits + hidden.dot(&step.w_out);
        }
        logits
    }

    fn softmax_rows(logits: &Array2<f64>) -> Array2<f64> {
        let mut probs = logits.clone();
        for mut row in probs.axis_iter_mut(Axis(0)) {
            let max = row.iter().cloned().fold(f64::NEG_INFINITY, f64::max);
            row.mapv_inplace(|l| (l - max).exp());
            let sum = row.sum();
            if sum > 0.0 {
                row.mapv_inplace(|p| p / sum);
            }
        }
        probs
    }

    /// Normalize a training batch in virtual-batch chunks, updating the
    /// running statistics.
    fn ghost_normalize(&mut self, batch: &Array2<f64>) -> Array2<f64> {
        let mut normalized = batch.clone();
        let vb = self.config.virtual_batch_size.max(1);
        let d = self.config.input_dim;
        let n = batch.nrows();
        let mut start = 0;
        while start < n {
            let end = (start + vb).min(n);
            let chunk_len = (end - start) as f64;
            for j in 0..d {
                let mut mean = 0.0;
                for i in start..end {
                    mean += batch[[i, j]];
                }
                mean /= chunk_len;
                let mut var = 0.0;
                for i in start..end {
                    var += (batch[[i, j]] - mean).powi(2);
                }
                var /= chunk_len;
                for i in start..end {
                    normalized[[i, j]] = (batch[[i, j]] - mean) / (var + NORM_EPS).sqrt();
                }
                let m = self.config.momentum;
                self.running_mean[j] = (1.0 - m) * self.running_mean[j] + m * mean;
                self.running_var[j] = (1.0 - m) * self.running_var[j] + m * var;
            }
            start = end;
        }
        normalized
    }

    fn normalize_with_running(&self, x: &Array2<f64>) -> Array2<f64> {
        let mut normalized = x.clone();
        for j in 0..self.config.input_dim {
            let mean = self.running_mean[j];
            let std = (self.running_var[j] + NORM_EPS).sqrt();
            for i in 0..x.nrows() {
                normalized[[i, j]] = (x[[i, j]] - mean) / std;
            }
        }
        normalized
    }

    /// Fit for up to `max_epochs`, reporting the training balanced error
    /// after each epoch.
    pub fn fit(
        &mut self,
        x: &Array2<f64>,
        y: &Array1<f64>,
        max_epochs: usize,
        on_epoch: &mut dyn FnMut(usize, f64),
    ) -> Result<()> {
        let n = x.nrows();
        if n == 0 || n != y.len() {
            return Err(AutomlError::DataError(format!(
                "feature matrix has {} rows but {} labels",
                n,
                y.len()
            )));
        }
        let d = self.config.input_dim;
        let c = self.config.output_dim;
        if x.ncols() != d {
            return Err(AutomlError::DataError(format!(
                "expected {} features, got {}",
                d,
                x.ncols()
            )));
        }
        for &label in y.iter() {
            let class = label.round() as i64;
            if class < 0 || class >= c as i64 {
                return Err(AutomlError::DataError(format!(
                    "label {} outside {} declared classes",
                    label, c
                )));
            }
        }

        let mut rng = Xoshiro256PlusPlus::seed_from_u64(self.config.seed);
        let mut lr = self.config.learning_rate;
        let mut optimizer_steps = 0usize;
        let mut order: Vec<usize> = (0..n).collect();

        for epoch in 0..max_epochs {
            order.shuffle(&mut rng);
            for batch_rows in order.chunks(self.config.batch_size.max(1)) {
                let batch = x.select(Axis(0), batch_rows);
                let x_norm = self.ghost_normalize(&batch);
                let masks = self.feature_masks();

                // forward pass, keeping the per-step activations
                let mut logits =
                    Array2::from_shape_fn((batch_rows.len(), c), |(_, k)| self.bias[k]);
                let mut step_inputs = Vec::with_capacity(self.steps.len());
                let mut step_hidden = Vec::with_capacity(self.steps.len());
                for (mask, step) in masks.iter().zip(&self.steps) {
                    let masked = &x_norm * &mask.clone().insert_axis(Axis(0));
                    let hidden = masked.dot(&step.w_in).mapv(|v| v.max(0.0));
                    logits = logits + hidden.dot(&step.w_out);
                    step_inputs.push(masked);
                    step_hidden.push(hidden);
                }
                let probs = Self::softmax_rows(&logits);

                // cross-entropy gradient w.r.t. logits
                let b = batch_rows.len() as f64;
                let mut grad = probs;
                for (i, &row) in batch_rows.iter().enumerate() {
                    let class = y[row].round() as usize;
                    grad[[i, class]] -= 1.0;
                }
                grad /= b;

                for (s, mask) in masks.iter().enumerate() {
                    let hidden = &step_hidden[s];
                    let masked = &step_inputs[s];

                    let dw_out = hidden.t().dot(&grad);
                    let mut dpre = grad.dot(&self.steps[s].w_out.t());
                    dpre.zip_mut_with(hidden, |g, &h| {
                        if h <= 0.0 {
                            *g = 0.0;
                        }
                    });
                    let dw_in = masked.t().dot(&dpre);
                    let dmasked = dpre.dot(&self.steps[s].w_in.t());

                    // mask gradient: sum the masked-input gradient against
                    // the raw normalized features, add the sparsity term,
                    // then chain through the softmax jacobian
                    let mut g_mask = Array1::zeros(d);
                    for j in 0..d {
                        let mut acc = 0.0;
                        for i in 0..x_norm.nrows() {
                            acc += x_norm[[i, j]] * dmasked[[i, j]];
                        }
                        g_mask[j] =
                            acc + self.config.lambda_sparse * ((mask[j] + NORM_EPS).ln() + 1.0);
                    }
                    let dot = g_mask
                        .iter()
                        .zip(mask.iter())
                        .map(|(g, m)| g * m)
                        .sum::<f64>();

                    let step = &mut self.steps[s];
                    step.w_out = &step.w_out - &(dw_out * lr);
                    step.w_in = &step.w_in - &(dw_in * lr);
                    for j in 0..d {
                        let da = mask[j] * (g_mask[j] - dot);
                        step.mask_logits[j] -= lr * da;
                    }
                }

                let grad_bias = grad.sum_axis(Axis(0));
                self.bias = &self.bias - &(grad_bias * lr);

                optimizer_steps += 1;
                if self.config.decay_iterations > 0
                    && optimizer_steps % self.config.decay_iterations == 0
                {
                    lr *= self.config.decay_rate;
                }
            }

            self.is_fitted = true;
            let preds = self.predict(x)?;
            on_epoch(epoch, balanced_error(y, &preds));
        }

        self.is_fitted = true;
        Ok(())
    }

    /// Class probabilities, one row per sample.
    pub fn predict_proba(&self, x: &Array2<f64>) -> Result<Array2<f64>> {
        if !self.is_fitted {
            return Err(AutomlError::TrainingError("tabnet is not fitted".into()));
        }
        let x_norm = self.normalize_with_running(x);
        let masks = self.feature_masks();
        Ok(Self::softmax_rows(&self.logits(&x_norm, &masks)))
    }

    /// Arg-max class labels.
    pub fn predict(&self, x: &Array2<f64>) -> Result<Array1<f64>> {
        let probs = self.predict_proba(x)?;
        Ok(probs
            .axis_iter(Axis(0))
            .map(|row| {
                row.iter()
                    .enumerate()
                    .max_by(|a, b| a.1.partial_cmp(b.1).unwrap_or(std::cmp::Ordering::Equal))
                    .map(|(k, _)| k as f64)
                    .unwrap_or(0.0)
            })
            .collect())
    }

    /// Aggregate attention-based feature importance.
    pub fn feature_importance(&self) -> Array1<f64> {
        let masks = self.feature_masks();
        let mut importance = Array1::zeros(self.config.input_dim);
        for mask in &masks {
            importance = importance + mask;
        }
        let sum = importance.sum();
        if sum > 0.0 {
            importance /= sum;
        }
        importance
    }
}
