//! Tabular attentive-network search worker

use tracing::debug;

use super::{
    guard_accuracy, loss_from_accuracy, DataSplits, EvalInfo, Objective, RefitResult,
    SearchWorker, WorkerResult,
};
use crate::architectures::tabnet::{TabNetClassifier, TabNetConfig};
use crate::error::{AutomlError, Result};
use crate::space::{
    require_float, require_int, Condition, ConstraintSpace, Hyperparameter, ParamValue, RawConfig,
};
use crate::training::metrics::balanced_accuracy;

/// Fixed training-epoch cap; the scheduler budget stays advisory
const MAX_EPOCHS: usize = 200;

/// Batch size to its conditional virtual-batch-size hyperparameter and
/// that parameter's legal values. Consulted identically by the space
/// declaration and the trainer configuration; an unmapped batch size is a
/// fatal configuration error.
const VIRTUAL_BATCH_TABLE: [(i64, &str, &[i64]); 8] = [
    (32768, "vbatch_size1", &[256, 512, 1024, 2048, 4096]),
    (16384, "vbatch_size2", &[256, 512, 1024, 2048, 4096]),
    (8192, "vbatch_size3", &[256, 512, 1024, 2048, 4096]),
    (4096, "vbatch_size4", &[256, 512, 1024, 2048]),
    (2048, "vbatch_size5", &[256, 512, 1024]),
    (1024, "vbatch_size6", &[256, 512]),
    (512, "vbatch_size7", &[256]),
    (256, "vbatch_size8", &[256]),
];

/// Base parameters shared by every trial of one worker instance
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct TabNetParams {
    pub seed: u64,
}

/// Search worker training the attentive tabular network
#[derive(Debug, Clone)]
pub struct TabNetWorker {
    params: TabNetParams,
    splits: DataSplits,
    objective: Objective,
}

impl TabNetWorker {
    /// The decision rule is fixed here, from the classes the training
    /// split declares, and reused by `compute` and `refit` alike.
    pub fn new(params: TabNetParams, splits: DataSplits) -> Result<Self> {
        let n_classes = splits.n_classes();
        if n_classes < 2 {
            return Err(AutomlError::DataError(format!(
                "training split declares {} classes, need at least 2",
                n_classes
            )));
        }
        let objective = if n_classes == 2 {
            Objective::Binary
        } else {
            Objective::MultiClass { n_classes }
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
    pub fn default_parameters(seed: u64) -> TabNetParams {
        TabNetParams { seed }
    }

    /// The tabular-network hyperparameter space, including one conditional
    /// virtual-batch-size parameter per legal batch size.
    pub fn default_space(seed: u64) -> Result<ConstraintSpace> {
        let int_choices = |values: &[i64]| -> Vec<ParamValue> {
            values.iter().map(|&v| ParamValue::Int(v)).collect()
        };
        let float_choices = |values: &[f64]| -> Vec<ParamValue> {
            values.iter().map(|&v| ParamValue::Float(v)).collect()
        };

        let mut space = ConstraintSpace::new()
            .add(Hyperparameter::categorical(
                "na",
                int_choices(&[8, 16, 24, 32, 64, 128]),
            ))?
            .add(Hyperparameter::categorical(
                "learning_rate",
                float_choices(&[0.005, 0.01, 0.02, 0.025]),
            ))?
            .add(Hyperparameter::categorical(
                "gamma",
                float_choices(&[1.0, 1.2, 1.5, 2.0]),
            ))?
            .add(Hyperparameter::categorical(
                "nsteps",
                int_choices(&[3, 4, 5, 6, 7, 8, 9, 10]),
            ))?
            .add(Hyperparameter::categorical(
                "lambda_sparse",
                float_choices(&[0.0, 1e-6, 1e-4, 1e-3, 1e-2, 1e-1]),
            ))?
            .add(Hyperparameter::categorical(
                "batch_size",
                int_choices(&[256, 512, 1024, 2048, 4096, 8192, 16384, 32768]),
            ))?;

        for (batch_size, name, choices) in VIRTUAL_BATCH_TABLE {
            let param = if choices.len() == 1 {
                Hyperparameter::constant(name, choices[0])
            } else {
                Hyperparameter::categorical(name, int_choices(choices))
            };
            space = space
                .add(param)?
                .add_condition(Condition::equals(name, "batch_size", batch_size))?;
        }

        space = space
            .add(Hyperparameter::categorical(
                "decay_rate",
                float_choices(&[0.4, 0.8, 0.9, 0.95]),
            ))?
            .add(Hyperparameter::categorical(
                "decay_iterations",
                int_choices(&[500, 2000, 8000, 10000, 20000]),
            ))?
            .add(Hyperparameter::categorical(
                "mb",
                float_choices(&[0.6, 0.7, 0.8, 0.9, 0.95, 0.98]),
            ))?;

        Ok(space.with_seed(seed))
    }

    /// Resolve the virtual batch size for the sampled batch size.
    fn virtual_batch_size(config: &RawConfig) -> Result<usize> {
        let batch_size = require_int(config, "batch_size")?;
        let (_, name, _) = VIRTUAL_BATCH_TABLE
            .iter()
            .find(|(size, _, _)| *size == batch_size)
            .ok_or_else(|| AutomlError::unsupported("batch_size", batch_size))?;
        Ok(require_int(config, name)? as usize)
    }

    fn tabnet_config(&self, config: &RawConfig) -> Result<TabNetConfig> {
        let n_classes = match self.objective {
            Objective::Binary => 2,
            Objective::MultiClass { n_classes } => n_classes,
        };
        let na = require_int(config, "na")? as usize;
        Ok(TabNetConfig {
            input_dim: self.splits.n_features(),
            output_dim: n_classes,
            n_d: na,
            n_a: na,
            n_steps: require_int(config, "nsteps")? as usize,
            gamma: require_float(config, "gamma")?,
            lambda_sparse: require_float(config, "lambda_sparse")?,
            momentum: require_float(config, "mb")?,
            batch_size: require_int(config, "batch_size")? as usize,
            virtual_batch_size: Self::virtual_batch_size(config)?,
            learning_rate: require_float(config, "learning_rate")?,
            decay_rate: require_float(config, "decay_rate")?,
            decay_iterations: require_int(config, "decay_iterations")? as usize,
            seed: self.params.seed,
        })
    }
}

impl SearchWorker for TabNetWorker {
    fn compute(&self, config: &RawConfig, budget: f64) -> Result<WorkerResult> {
        debug!(budget, "tabnet trial starting");
        let cfg = self.tabnet_config(config)?;
        let mut model = TabNetClassifier::new(cfg)?;
        model.fit(
            &self.splits.x_train,
            &self.splits.y_train,
            MAX_EPOCHS,
            &mut |epoch, train_error| {
                debug!(epoch, train_error, "tabnet epoch");
            },
        )?;

        let train_preds = self.objective.decide(&model.predict_proba(&self.splits.x_train)?);
        let val_preds = self.objective.decide(&model.predict_proba(&self.splits.x_val)?);
        let test_preds = self.objective.decide(&model.predict_proba(&self.splits.x_test)?);

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
        let cfg = self.tabnet_config(config)?;
        let (x, y) = self.splits.merged_train_val()?;
        let mut model = TabNetClassifier::new(cfg)?;
        model.fit(&x, &y, MAX_EPOCHS, &mut |epoch, train_error| {
            debug!(epoch, train_error, "tabnet refit epoch");
        })?;

        let train_preds = self.objective.decide(&model.predict_proba(&x)?);
        let test_preds = self.objective.decide(&model.predict_proba(&self.splits.x_test)?);

        Ok(RefitResult {
            train_accuracy: balanced_accuracy(&y, &train_preds),
            test_accuracy: guard_accuracy(balanced_accuracy(
                &self.splits.y_test,
                &test_preds,
            )),
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use ndarray::{Array1, Array2};

    fn splits() -> DataSplits {
        let make = |n: usize, offset: usize| {
            let x = Array2::from_shape_fn((n, 3), |(i, j)| {
                if j == 0 {
                    ((i + offset) % 40) as f64 * 0.5
                } else {
                    ((i * 3 + j + offset) % 10) as f64 / 10.0
                }
            });
            let y: Array1<f64> = x
                .column(0)
                .iter()
                .map(|&v| if v > 10.0 { 1.0 } else { 0.0 })
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
        config.insert("na".into(), ParamValue::Int(8));
        config.insert("learning_rate".into(), ParamValue::Float(0.02));
        config.insert("gamma".into(), ParamValue::Float(1.3));
        config.insert("nsteps".into(), ParamValue::Int(3));
        config.insert("lambda_sparse".into(), ParamValue::Float(1e-4));
        config.insert("batch_size".into(), ParamValue::Int(256));
        config.insert("vbatch_size8".into(), ParamValue::Int(256));
        config.insert("decay_rate".into(), ParamValue::Float(0.9));
        config.insert("decay_iterations".into(), ParamValue::Int(2000));
        config.insert("mb".into(), ParamValue::Float(0.9));
        config
    }

    #[test]
    fn test_compute_loss_in_unit_interval() {
        let worker =
            TabNetWorker::new(TabNetWorker::default_parameters(11), splits()).unwrap();
        let result = worker.compute(&trial_config(), 50.0).unwrap();
        assert!((0.0..=1.0).contains(&result.loss), "loss {}", result.loss);
        assert!(result.info.train_accuracy.is_finite());
        assert!((result.loss - (1.0 - result.info.val_accuracy)).abs() < 1e-12);
    }

    #[test]
    fn test_refit_reports_train_and_test() {
        let worker =
            TabNetWorker::new(TabNetWorker::default_parameters(11), splits()).unwrap();
        let result = worker.refit(&trial_config()).unwrap();
        assert!((0.0..=1.0).contains(&result.train_accuracy));
        assert!((0.0..=1.0).contains(&result.test_accuracy));
    }

    #[test]
    fn test_binary_objective_inferred() {
        let worker =
            TabNetWorker::new(TabNetWorker::default_parameters(11), splits()).unwrap();
        assert_eq!(worker.objective(), Objective::Binary);
    }

    #[test]
    fn test_unmapped_batch_size_is_fatal() {
        let worker =
            TabNetWorker::new(TabNetWorker::default_parameters(11), splits()).unwrap();
        let mut config = trial_config();
        config.insert("batch_size".into(), ParamValue::Int(123));
        let err = worker.compute(&config, 50.0).unwrap_err();
        assert!(matches!(err, AutomlError::UnsupportedValue { .. }));
    }

    #[test]
    fn test_default_space_ties_vbatch_to_batch_size() {
        let space = TabNetWorker::default_space(11).unwrap();
        let mut rng = space.sampler();
        for _ in 0..100 {
            let config = space.sample(&mut rng).unwrap();
            space.validate(&config).unwrap();
            let batch_size = require_int(&config, "batch_size").unwrap();
            let vbatch = TabNetWorker::virtual_batch_size(&config).unwrap();
            assert!(vbatch as i64 <= batch_size);
            // exactly one virtual-batch parameter is active
            let active = config
                .keys()
                .filter(|k| k.starts_with("vbatch_size"))
                .count();
            assert_eq!(active, 1);
        }
    }
}
