//! Gradient-boosting search worker

use tracing::debug;

use super::{
    guard_accuracy, loss_from_accuracy, DataSplits, EvalInfo, Objective, RefitResult,
    SearchWorker, WorkerResult,
};
use crate::error::{AutomlError, Result};
use crate::space::{require_float, require_int, ConstraintSpace, Hyperparameter, RawConfig};
use crate::space::{Condition, ParamValue};
use crate::training::gradient_boosting::{
    BoostObjective, BoosterConfig, BoosterKind, GradientBooster,
};
use crate::training::metrics::balanced_accuracy;

/// Base parameters shared by every trial of one worker instance
#[derive(Debug, Clone, PartialEq)]
pub struct GbmParams {
    /// `binary:logistic` or `multi:softmax`
    pub objective: String,
    /// Class count, required for the multi-class objective
    pub num_class: Option<usize>,
    pub seed: u64,
    pub n_threads: usize,
}

/// Search worker training the native gradient booster
#[derive(Debug, Clone)]
pub struct GradientBoostingWorker {
    params: GbmParams,
    splits: DataSplits,
    objective: Objective,
}

impl GradientBoostingWorker {
    pub fn new(params: GbmParams, splits: DataSplits) -> Result<Self> {
        let objective = match params.objective.as_str() {
            "binary:logistic" => Objective::Binary,
            "multi:softmax" => {
                let n_classes = params.num_class.ok_or_else(|| {
                    AutomlError::invalid(
                        "num_class",
                        "<missing>",
                        "multi:softmax needs a class count",
                    )
                })?;
                Objective::MultiClass { n_classes }
            }
            other => return Err(AutomlError::unsupported("objective", other)),
        };
        Ok(Self {
            params,
            splits,
            objective,
        })
    }

    pub fn objective(&self) -> Objective {
        self.objective
    }

    /// Family-specific base parameter set.
    pub fn default_parameters(nr_classes: usize, seed: u64, n_threads: usize) -> GbmParams {
        if nr_classes == 2 {
            GbmParams {
                objective: "binary:logistic".into(),
                num_class: None,
                seed,
                n_threads,
            }
        } else {
            GbmParams {
                objective: "multi:softmax".into(),
                num_class: Some(nr_classes),
                seed,
                n_threads,
            }
        }
    }

    /// The booster hyperparameter space.
    pub fn default_space(seed: u64) -> Result<ConstraintSpace> {
        let space = ConstraintSpace::new()
            .add(Hyperparameter::log_float("eta", 1e-3, 1.0))?
            .add(Hyperparameter::log_float("lambda", 1e-10, 1.0))?
            .add(Hyperparameter::log_float("alpha", 1e-10, 1.0))?
            .add(Hyperparameter::int("num_round", 1, 1000))?
            .add(Hyperparameter::categorical(
                "booster",
                vec!["gbtree".into(), "dart".into()],
            ))?
            .add(
                Hyperparameter::float("rate_drop", 1e-10, 1.0 - 1e-10).with_default(0.5),
            )?
            .add_condition(Condition::equals("rate_drop", "booster", "dart"))?
            .add(Hyperparameter::log_float("gamma", 0.1, 1.0))?
            .add(Hyperparameter::float("colsample_bylevel", 0.1, 1.0))?
            .add(Hyperparameter::float("colsample_bynode", 0.1, 1.0))?
            .add(Hyperparameter::float("colsample_bytree", 0.5, 1.0))?
            .add(Hyperparameter::int("max_depth", 1, 20))?
            .add(Hyperparameter::int("max_delta_step", 0, 10))?
            .add(Hyperparameter::log_float("min_child_weight", 0.1, 20.0))?
            .add(Hyperparameter::float("subsample", 0.01, 1.0))?;
        Ok(space.with_seed(seed))
    }

    /// Merge the sampled configuration over the base parameters into a
    /// booster configuration. `num_round` is pulled out as the round count.
    fn booster_config(&self, config: &RawConfig) -> Result<BoosterConfig> {
        let objective = match self.objective {
            Objective::Binary => BoostObjective::Logistic,
            Objective::MultiClass { n_classes } => BoostObjective::Softmax { n_classes },
        };
        let mut cfg = BoosterConfig {
            objective,
            num_rounds: require_int(config, "num_round")? as usize,
            seed: self.params.seed,
            ..Default::default()
        };
        cfg.eta = float_or(config, "eta", cfg.eta)?;
        cfg.reg_lambda = float_or(config, "lambda", cfg.reg_lambda)?;
        cfg.reg_alpha = float_or(config, "alpha", cfg.reg_alpha)?;
        cfg.gamma = float_or(config, "gamma", cfg.gamma)?;
        cfg.max_depth = int_or(config, "max_depth", cfg.max_depth as i64)? as usize;
        cfg.max_delta_step = float_or(config, "max_delta_step", cfg.max_delta_step)?;
        cfg.min_child_weight = float_or(config, "min_child_weight", cfg.min_child_weight)?;
        cfg.subsample = float_or(config, "subsample", cfg.subsample)?;
        cfg.colsample_bytree = float_or(config, "colsample_bytree", cfg.colsample_bytree)?;
        cfg.colsample_bylevel = float_or(config, "colsample_bylevel", cfg.colsample_bylevel)?;
        cfg.colsample_bynode = float_or(config, "colsample_bynode", cfg.colsample_bynode)?;
        cfg.booster = match config.get("booster") {
            None => BoosterKind::GbTree,
            Some(ParamValue::Str(kind)) => match kind.as_str() {
                "gbtree" => BoosterKind::GbTree,
                "dart" => BoosterKind::Dart {
                    rate_drop: require_float(config, "rate_drop")?,
                },
                other => return Err(AutomlError::unsupported("booster", other)),
            },
            Some(other) => return Err(AutomlError::unsupported("booster", other)),
        };
        Ok(cfg)
    }
}

impl SearchWorker for GradientBoostingWorker {
    fn compute(&self, config: &RawConfig, budget: f64) -> Result<WorkerResult> {
        debug!(budget, "gradient boosting trial starting");
        let cfg = self.booster_config(config)?;
        let mut booster = GradientBooster::new(cfg);
        booster.fit_with_eval(
            &self.splits.x_train,
            &self.splits.y_train,
            Some((&self.splits.x_val, &self.splits.y_val)),
            &mut |round, train_error, val_error| {
                debug!(round, train_error, ?val_error, "boosting round");
            },
        )?;

        let train_preds = self.objective.decide(&booster.predict_proba(&self.splits.x_train)?);
        let val_preds = self.objective.decide(&booster.predict_proba(&self.splits.x_val)?);
        let test_preds = self.objective.decide(&booster.predict_proba(&self.splits.x_test)?);

        let train_accuracy = balanced_accuracy(&self.splits.y_train, &train_preds);
        let val_accuracy = balanced_accuracy(&self.splits.y_val, &val_preds);
        let test_accuracy = balanced_accuracy(&self.splits.y_test, &test_preds);

        Ok(WorkerResult {
            loss: loss_from_accuracy(val_accuracy),
            info: EvalInfo {
                train_accuracy,
                val_accuracy,
                test_accuracy,
            },
        })
    }

    fn refit(&self, config: &RawConfig) -> Result<RefitResult> {
        let cfg = self.booster_config(config)?;
        let (x, y) = self.splits.merged_train_val()?;
        let mut booster = GradientBooster::new(cfg);
        booster.fit_with_eval(
            &x,
            &y,
            Some((&self.splits.x_test, &self.splits.y_test)),
            &mut |round, train_error, test_error| {
                debug!(round, train_error, ?test_error, "refit boosting round");
            },
        )?;

        let train_preds = self.objective.decide(&booster.predict_proba(&x)?);
        let test_preds = self.objective.decide(&booster.predict_proba(&self.splits.x_test)?);

        Ok(RefitResult {
            train_accuracy: balanced_accuracy(&y, &train_preds),
            test_accuracy: guard_accuracy(balanced_accuracy(
                &self.splits.y_test,
                &test_preds,
            )),
        })
    }
}

fn float_or(config: &RawConfig, name: &str, default: f64) -> Result<f64> {
    match config.get(name) {
        Some(value) => value
            .as_float()
            .ok_or_else(|| AutomlError::unsupported(name, value)),
        None => Ok(default),
    }
}

fn int_or(config: &RawConfig, name: &str, default: i64) -> Result<i64> {
    match config.get(name) {
        Some(ParamValue::Int(v)) => Ok(*v),
        Some(other) => Err(AutomlError::unsupported(name, other)),
        None => Ok(default),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use ndarray::{Array1, Array2, Axis};

    fn splits() -> DataSplits {
        let make = |n: usize, offset: usize| {
            let x = Array2::from_shape_fn((n, 2), |(i, j)| {
                ((i + offset) % 40) as f64 * 0.5 + j as f64
            });
            let y: Array1<f64> = x
                .axis_iter(Axis(0))
                .map(|row| if row[0] > 10.0 { 1.0 } else { 0.0 })
                .collect();
            (x, y)
        };
        let (x_train, y_train) = make(80, 0);
        let (x_val, y_val) = make(40, 3);
        let (x_test, y_test) = make(40, 7);
        DataSplits {
            x_train,
            y_train,
            x_val,
            y_val,
            x_test,
            y_test,
        }
    }

    fn trial_config() -> RawConfig {
        let mut config = RawConfig::new();
        config.insert("num_round".into(), ParamValue::Int(20));
        config.insert("eta".into(), ParamValue::Float(0.3));
        config.insert("max_depth".into(), ParamValue::Int(3));
        config.insert("booster".into(), "gbtree".into());
        config
    }

    #[test]
    fn test_compute_loss_in_unit_interval() {
        let params = GradientBoostingWorker::default_parameters(2, 11, 1);
        let worker = GradientBoostingWorker::new(params, splits()).unwrap();
        let result = worker.compute(&trial_config(), 20.0).unwrap();
        assert!((0.0..=1.0).contains(&result.loss), "loss {}", result.loss);
        assert!(result.info.val_accuracy > 0.9);
        assert!((result.loss - (1.0 - result.info.val_accuracy)).abs() < 1e-12);
    }

    #[test]
    fn test_refit_trains_on_merged_splits() {
        let params = GradientBoostingWorker::default_parameters(2, 11, 1);
        let worker = GradientBoostingWorker::new(params, splits()).unwrap();
        let result = worker.refit(&trial_config()).unwrap();
        assert!(result.train_accuracy > 0.9);
        assert!((0.0..=1.0).contains(&result.test_accuracy));
    }

    #[test]
    fn test_binary_objective_selected_from_parameters() {
        let params = GradientBoostingWorker::default_parameters(2, 11, 1);
        let worker = GradientBoostingWorker::new(params, splits()).unwrap();
        assert_eq!(worker.objective(), Objective::Binary);

        let params = GradientBoostingWorker::default_parameters(4, 11, 1);
        let worker = GradientBoostingWorker::new(params, splits()).unwrap();
        assert_eq!(worker.objective(), Objective::MultiClass { n_classes: 4 });
    }

    #[test]
    fn test_unknown_objective_rejected() {
        let params = GbmParams {
            objective: "rank:pairwise".into(),
            num_class: None,
            seed: 11,
            n_threads: 1,
        };
        assert!(GradientBoostingWorker::new(params, splits()).is_err());
    }

    #[test]
    fn test_default_space_samples_valid_configs() {
        let space = GradientBoostingWorker::default_space(11).unwrap();
        let mut rng = space.sampler();
        for _ in 0..50 {
            let config = space.sample(&mut rng).unwrap();
            space.validate(&config).unwrap();
            let dart = config.get("booster") == Some(&ParamValue::Str("dart".into()));
            assert_eq!(dart, config.contains_key("rate_drop"));
        }
    }

    #[test]
    fn test_dart_config_requires_rate_drop() {
        let params = GradientBoostingWorker::default_parameters(2, 11, 1);
        let worker = GradientBoostingWorker::new(params, splits()).unwrap();
        let mut config = trial_config();
        config.insert("booster".into(), "dart".into());
        assert!(worker.compute(&config, 20.0).is_err());
        config.insert("rate_drop".into(), ParamValue::Float(0.2));
        assert!(worker.compute(&config, 20.0).is_ok());
    }

    #[test]
    fn test_missing_num_round_rejected() {
        let params = GradientBoostingWorker::default_parameters(2, 11, 1);
        let worker = GradientBoostingWorker::new(params, splits()).unwrap();
        let mut config = trial_config();
        config.remove("num_round");
        assert!(worker.compute(&config, 20.0).is_err());
    }
}
