//! Native gradient booster for search workers
//!
//! Depth-capped regression trees fit to logit-space residuals, with the
//! regularization knobs the search space tunes: shrinkage, L1/L2 leaf
//! regularization, minimum split gain, row/column subsampling, leaf-value
//! clamping and dart-style tree dropout. Binary training uses logistic
//! residuals; multi-class training boosts one tree per class per round
//! under a softmax link.

use ndarray::{Array1, Array2, ArrayView1, Axis};
use rand::prelude::SliceRandom;
use rand::{Rng, SeedableRng};
use rand_xoshiro::Xoshiro256PlusPlus;
use rayon::prelude::*;
use serde::{Deserialize, Serialize};

use super::metrics::balanced_error;
use crate::error::{AutomlError, Result};

/// Row count above which residuals are computed in parallel
const PARALLEL_THRESHOLD: usize = 10_000;

/// Link function / task family of the booster
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum BoostObjective {
    /// Binary classification with a logistic link
    Logistic,
    /// Multi-class classification with a softmax link
    Softmax { n_classes: usize },
}

/// Tree-construction flavor
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub enum BoosterKind {
    GbTree,
    /// Drop existing trees with probability `rate_drop` when computing the
    /// residual targets of a new round
    Dart { rate_drop: f64 },
}

/// Booster configuration
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct BoosterConfig {
    pub objective: BoostObjective,
    /// Number of boosting rounds
    pub num_rounds: usize,
    /// Learning rate (shrinkage)
    pub eta: f64,
    /// L2 leaf regularization
    pub reg_lambda: f64,
    /// L1 leaf regularization
    pub reg_alpha: f64,
    /// Minimum gain required to split
    pub gamma: f64,
    pub max_depth: usize,
    /// Clamp on absolute leaf values; zero disables
    pub max_delta_step: f64,
    /// Minimum number of samples on each side of a split
    pub min_child_weight: f64,
    /// Row fraction per round
    pub subsample: f64,
    /// Column fraction per tree
    pub colsample_bytree: f64,
    /// Column fraction resampled at each depth level
    pub colsample_bylevel: f64,
    /// Column fraction resampled at each split
    pub colsample_bynode: f64,
    pub booster: BoosterKind,
    pub seed: u64,
}

impl Default for BoosterConfig {
    fn default() -> Self {
        Self {
            objective: BoostObjective::Logistic,
            num_rounds: 100,
            eta: 0.3,
            reg_lambda: 1.0,
            reg_alpha: 0.0,
            gamma: 0.0,
            max_depth: 6,
            max_delta_step: 0.0,
            min_child_weight: 1.0,
            subsample: 1.0,
            colsample_bytree: 1.0,
            colsample_bylevel: 1.0,
            colsample_bynode: 1.0,
            booster: BoosterKind::GbTree,
            seed: 11,
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
enum TreeNode {
    Leaf {
        value: f64,
    },
    Split {
        feature: usize,
        threshold: f64,
        left: Box<TreeNode>,
        right: Box<TreeNode>,
    },
}

/// A single regression tree fit to residual targets
#[derive(Debug, Clone, Serialize, Deserialize)]
struct RegressionTree {
    root: TreeNode,
}

struct TreeParams {
    max_depth: usize,
    min_child_weight: f64,
    gamma: f64,
    reg_lambda: f64,
    reg_alpha: f64,
    max_delta_step: f64,
    colsample_split: f64,
}

impl RegressionTree {
    fn fit(
        x: &Array2<f64>,
        targets: &Array1<f64>,
        rows: &[usize],
        cols: &[usize],
        params: &TreeParams,
        rng: &mut Xoshiro256PlusPlus,
    ) -> Self {
        let root = Self::build(x, targets, rows.to_vec(), cols, params, 0, rng);
        Self { root }
    }

    fn build(
        x: &Array2<f64>,
        targets: &Array1<f64>,
        rows: Vec<usize>,
        cols: &[usize],
        params: &TreeParams,
        depth: usize,
        rng: &mut Xoshiro256PlusPlus,
    ) -> TreeNode {
        if depth >= params.max_depth || rows.len() < 2 {
            return TreeNode::Leaf {
                value: Self::leaf_value(targets, &rows, params),
            };
        }

        let candidates = Self::candidate_cols(cols, params.colsample_split, rng);
        match Self::best_split(x, targets, &rows, &candidates, params) {
            Some((feature, threshold)) => {
                let (left_rows, right_rows): (Vec<usize>, Vec<usize>) = rows
                    .into_iter()
                    .partition(|&r| x[[r, feature]] <= threshold);
                let left = Self::build(x, targets, left_rows, cols, params, depth + 1, rng);
                let right = Self::build(x, targets, right_rows, cols, params, depth + 1, rng);
                TreeNode::Split {
                    feature,
                    threshold,
                    left: Box::new(left),
                    right: Box::new(right),
                }
            }
            None => TreeNode::Leaf {
                value: Self::leaf_value(targets, &rows, params),
            },
        }
    }

    fn candidate_cols(cols: &[usize], fraction: f64, rng: &mut Xoshiro256PlusPlus) -> Vec<usize> {
        if fraction >= 1.0 {
            return cols.to_vec();
        }
        let keep = ((cols.len() as f64) * fraction).ceil().max(1.0) as usize;
        let mut sampled = cols.to_vec();
        sampled.shuffle(rng);
        sampled.truncate(keep);
        sampled
    }

    /// Best variance-reduction split over the candidate columns, or `None`
    /// when no split clears the gain and child-weight thresholds.
    fn best_split(
        x: &Array2<f64>,
        targets: &Array1<f64>,
        rows: &[usize],
        candidates: &[usize],
        params: &TreeParams,
    ) -> Option<(usize, f64)> {
        let total_sum: f64 = rows.iter().map(|&r| targets[r]).sum();
        let n = rows.len() as f64;
        let parent_score = total_sum * total_sum / n;

        let mut best: Option<(usize, f64, f64)> = None;
        for &col in candidates {
            let mut ordered: Vec<(f64, f64)> =
                rows.iter().map(|&r| (x[[r, col]], targets[r])).collect();
            ordered.sort_by(|a, b| a.0.partial_cmp(&b.0).unwrap_or(std::cmp::Ordering::Equal));

            let mut left_sum = 0.0;
            for i in 0..ordered.len() - 1 {
                left_sum += ordered[i].1;
                // can't split between identical feature values
                if ordered[i].0 == ordered[i + 1].0 {
                    continue;
                }
                let n_left = (i + 1) as f64;
                let n_right = n - n_left;
                if n_left < params.min_child_weight || n_right < params.min_child_weight {
                    continue;
                }
                let right_sum = total_sum - left_sum;
                let gain =
                    left_sum * left_sum / n_left + right_sum * right_sum / n_right - parent_score;
                if gain > params.gamma && best.map(|(_, _, g)| gain > g).unwrap_or(true) {
                    let threshold = (ordered[i].0 + ordered[i + 1].0) / 2.0;
                    best = Some((col, threshold, gain));
                }
            }
        }
        best.map(|(feature, threshold, _)| (feature, threshold))
    }

    fn leaf_value(targets: &Array1<f64>, rows: &[usize], params: &TreeParams) -> f64 {
        if rows.is_empty() {
            return 0.0;
        }
        let sum: f64 = rows.iter().map(|&r| targets[r]).sum();
        // L1 soft-threshold on the numerator, L2 shrink on the denominator
        let numerator = if sum > params.reg_alpha {
            sum - params.reg_alpha
        } else if sum < -params.reg_alpha {
            sum + params.reg_alpha
        } else {
            0.0
        };
        let mut value = numerator / (rows.len() as f64 + params.reg_lambda);
        if params.max_delta_step > 0.0 {
            value = value.clamp(-params.max_delta_step, params.max_delta_step);
        }
        value
    }

    fn predict_row(&self, row: ArrayView1<f64>) -> f64 {
        let mut node = &self.root;
        loop {
            match node {
                TreeNode::Leaf { value } => return *value,
                TreeNode::Split {
                    feature,
                    threshold,
                    left,
                    right,
                } => {
                    node = if row[*feature] <= *threshold {
                        left
                    } else {
                        right
                    };
                }
            }
        }
    }

    fn predict(&self, x: &Array2<f64>) -> Array1<f64> {
        Array1::from_iter(x.axis_iter(Axis(0)).map(|row| self.predict_row(row)))
    }
}

/// One boosting round: a weighted tree per output class
#[derive(Debug, Clone, Serialize, Deserialize)]
struct BoostRound {
    trees: Vec<(RegressionTree, f64)>,
}

/// Gradient-boosted classifier driven by a worker configuration
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct GradientBooster {
    config: BoosterConfig,
    rounds: Vec<BoostRound>,
    base_score: Vec<f64>,
}

impl GradientBooster {
    pub fn new(config: BoosterConfig) -> Self {
        Self {
            config,
            rounds: Vec::new(),
            base_score: Vec::new(),
        }
    }

    pub fn config(&self) -> &BoosterConfig {
        &self.config
    }

    fn n_outputs(&self) -> usize {
        match self.config.objective {
            BoostObjective::Logistic => 1,
            BoostObjective::Softmax { n_classes } => n_classes,
        }
    }

    /// Fit without evaluation feedback.
    pub fn fit(&mut self, x: &Array2<f64>, y: &Array1<f64>) -> Result<()> {
        self.fit_with_eval(x, y, None, &mut |_, _, _| {})
    }

    /// Fit, reporting the balanced error on the training data (and the
    /// evaluation split, when given) after every round.
    pub fn fit_with_eval(
        &mut self,
        x: &Array2<f64>,
        y: &Array1<f64>,
        eval: Option<(&Array2<f64>, &Array1<f64>)>,
        on_round: &mut dyn FnMut(usize, f64, Option<f64>),
    ) -> Result<()> {
        let n_samples = x.nrows();
        if n_samples == 0 || n_samples != y.len() {
            return Err(AutomlError::DataError(format!(
                "feature matrix has {} rows but {} labels",
                n_samples,
                y.len()
            )));
        }
        let n_features = x.ncols();
        let n_outputs = self.n_outputs();
        let mut rng = Xoshiro256PlusPlus::seed_from_u64(self.config.seed);

        let targets = self.one_hot(y)?;
        self.base_score = self.initial_scores(&targets);
        self.rounds = Vec::with_capacity(self.config.num_rounds);

        // logits maintained incrementally across rounds
        let mut logits =
            Array2::from_shape_fn((n_samples, n_outputs), |(_, k)| self.base_score[k]);
        let mut eval_logits = eval.map(|(xe, _)| {
            Array2::from_shape_fn((xe.nrows(), n_outputs), |(_, k)| self.base_score[k])
        });

        let tree_params = TreeParams {
            max_depth: self.config.max_depth,
            min_child_weight: self.config.min_child_weight,
            gamma: self.config.gamma,
            reg_lambda: self.config.reg_lambda,
            reg_alpha: self.config.reg_alpha,
            max_delta_step: self.config.max_delta_step,
            colsample_split: self.config.colsample_bylevel * self.config.colsample_bynode,
        };

        for round in 0..self.config.num_rounds {
            let (round_logits, new_weight) = self.dart_adjusted(&logits, x, &mut rng);
            let probs = self.probabilities_from(&round_logits);

            let row_sample = subsample_indices(n_samples, self.config.subsample, &mut rng);
            let mut trees = Vec::with_capacity(n_outputs);
            for k in 0..n_outputs {
                let residuals: Array1<f64> = if n_samples > PARALLEL_THRESHOLD {
                    let res: Vec<f64> = (0..n_samples)
                        .into_par_iter()
                        .map(|i| targets[[i, k]] - probs[[i, k]])
                        .collect();
                    Array1::from_vec(res)
                } else {
                    (0..n_samples)
                        .map(|i| targets[[i, k]] - probs[[i, k]])
                        .collect()
                };
                let cols = subsample_indices(n_features, self.config.colsample_bytree, &mut rng);
                let tree =
                    RegressionTree::fit(x, &residuals, &row_sample, &cols, &tree_params, &mut rng);

                let update = tree.predict(x);
                for i in 0..n_samples {
                    logits[[i, k]] += new_weight * update[i];
                }
                if let (Some(eval_logits), Some((xe, _))) = (eval_logits.as_mut(), eval) {
                    let eval_update = tree.predict(xe);
                    for i in 0..xe.nrows() {
                        eval_logits[[i, k]] += new_weight * eval_update[i];
                    }
                }
                trees.push((tree, new_weight));
            }
            self.rounds.push(BoostRound { trees });

            let train_error = balanced_error(y, &self.labels_from(&logits));
            let eval_error = match (eval_logits.as_ref(), eval) {
                (Some(el), Some((_, ye))) => Some(balanced_error(ye, &self.labels_from(el))),
                _ => None,
            };
            on_round(round, train_error, eval_error);
        }

        Ok(())
    }

    /// Class probabilities, one row per sample.
    ///
    /// Binary boosters return two columns so the caller's decision rule is
    /// uniform across objectives.
    pub fn predict_proba(&self, x: &Array2<f64>) -> Result<Array2<f64>> {
        if self.base_score.is_empty() {
            return Err(AutomlError::TrainingError("booster is not fitted".into()));
        }
        let n = x.nrows();
        let n_outputs = self.n_outputs();
        let mut logits = Array2::from_shape_fn((n, n_outputs), |(_, k)| self.base_score[k]);
        for round in &self.rounds {
            for (k, (tree, weight)) in round.trees.iter().enumerate() {
                let update = tree.predict(x);
                for i in 0..n {
                    logits[[i, k]] += weight * update[i];
                }
            }
        }
        let probs = self.probabilities_from(&logits);
        match self.config.objective {
            BoostObjective::Logistic => {
                let mut out = Array2::zeros((n, 2));
                for i in 0..n {
                    out[[i, 1]] = probs[[i, 0]];
                    out[[i, 0]] = 1.0 - probs[[i, 0]];
                }
                Ok(out)
            }
            BoostObjective::Softmax { .. } => Ok(probs),
        }
    }

    fn one_hot(&self, y: &Array1<f64>) -> Result<Array2<f64>> {
        let n_outputs = self.n_outputs();
        let mut targets = Array2::zeros((y.len(), n_outputs));
        for (i, &label) in y.iter().enumerate() {
            match self.config.objective {
                BoostObjective::Logistic => {
                    targets[[i, 0]] = if label > 0.5 { 1.0 } else { 0.0 };
                }
                BoostObjective::Softmax { n_classes } => {
                    let class = label.round() as i64;
                    if class < 0 || class >= n_classes as i64 {
                        return Err(AutomlError::DataError(format!(
                            "label {} outside {} declared classes",
                            label, n_classes
                        )));
                    }
                    targets[[i, class as usize]] = 1.0;
                }
            }
        }
        Ok(targets)
    }

    fn initial_scores(&self, targets: &Array2<f64>) -> Vec<f64> {
        let n = targets.nrows() as f64;
        (0..targets.ncols())
            .map(|k| {
                let p = (targets.column(k).sum() / n).clamp(1e-10, 1.0 - 1e-10);
                match self.config.objective {
                    BoostObjective::Logistic => (p / (1.0 - p)).ln(),
                    BoostObjective::Softmax { .. } => p.ln(),
                }
            })
            .collect()
    }

    /// Logits with dart tree dropout applied, plus the weight for trees
    /// fitted this round.
    fn dart_adjusted(
        &self,
        logits: &Array2<f64>,
        x: &Array2<f64>,
        rng: &mut Xoshiro256PlusPlus,
    ) -> (Array2<f64>, f64) {
        match self.config.booster {
            BoosterKind::GbTree => (logits.clone(), self.config.eta),
            BoosterKind::Dart { rate_drop } => {
                let dropped: Vec<usize> = (0..self.rounds.len())
                    .filter(|_| rng.gen_bool(rate_drop.clamp(0.0, 1.0)))
                    .collect();
                let mut adjusted = logits.clone();
                for &r in &dropped {
                    for (k, (tree, weight)) in self.rounds[r].trees.iter().enumerate() {
                        let update = tree.predict(x);
                        for i in 0..x.nrows() {
                            adjusted[[i, k]] -= weight * update[i];
                        }
                    }
                }
                (adjusted, self.config.eta / (dropped.len() as f64 + 1.0))
            }
        }
    }

    fn probabilities_from(&self, logits: &Array2<f64>) -> Array2<f64> {
        match self.config.objective {
            BoostObjective::Logistic => logits.mapv(|l| 1.0 / (1.0 + (-l).exp())),
            BoostObjective::Softmax { .. } => {
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
        }
    }

    fn labels_from(&self, logits: &Array2<f64>) -> Array1<f64> {
        match self.config.objective {
            BoostObjective::Logistic => logits
                .column(0)
                .iter()
                .map(|&l| if l > 0.0 { 1.0 } else { 0.0 })
                .collect(),
            BoostObjective::Softmax { .. } => logits
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

fn subsample_indices(n: usize, fraction: f64, rng: &mut Xoshiro256PlusPlus) -> Vec<usize> {
    if fraction >= 1.0 {
        return (0..n).collect();
    }
    let keep = ((n as f64) * fraction).ceil().max(1.0) as usize;
    let mut indices: Vec<usize> = (0..n).collect();
    indices.shuffle(rng);
    indices.truncate(keep);
    indices.sort_unstable();
    indices
}
