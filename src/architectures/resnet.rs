//! Shaped residual network build plan
//!
//! Parses an expanded shaped configuration into the typed per-layer plan
//! consumed by a network builder: one width per residual group (plus the
//! stem group 0), one dropout rate per group from group 1 on, and the
//! regularization switches.

use serde::{Deserialize, Serialize};
use std::str::FromStr;

use crate::error::{AutomlError, Result};
use crate::shapes::expand_shaped_config;
use crate::space::{optional_bool, require_bool, require_float, require_int, require_str, RawConfig};

/// Supported hidden-layer activations
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Activation {
    Sigmoid,
    Tanh,
    Relu,
}

impl FromStr for Activation {
    type Err = AutomlError;

    fn from_str(s: &str) -> Result<Self> {
        match s {
            "sigmoid" => Ok(Activation::Sigmoid),
            "tanh" => Ok(Activation::Tanh),
            "relu" => Ok(Activation::Relu),
            other => Err(AutomlError::unsupported("activation", other)),
        }
    }
}

/// Fully resolved build parameters for a shaped residual network.
///
/// The network computation itself lives behind the builder consuming this
/// plan; this type only guarantees the per-layer parameterization is
/// complete and internally consistent.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ResNetBuildPlan {
    pub in_features: usize,
    pub out_features: usize,
    pub num_groups: usize,
    pub blocks_per_group: usize,
    /// Widths for groups `0 ..= num_groups`
    pub group_units: Vec<usize>,
    /// Dropout rates for groups `1 ..= num_groups`; empty when dropout is off
    pub group_dropout: Vec<f64>,
    pub activation: Activation,
    pub use_batch_normalization: bool,
    pub use_skip_connection: bool,
    pub use_shake_shake: bool,
    pub use_shake_drop: bool,
    pub max_shake_drop_probability: Option<f64>,
}

impl ResNetBuildPlan {
    /// Expand and parse a sampled configuration into a build plan.
    pub fn from_config(
        config: &RawConfig,
        in_features: usize,
        out_features: usize,
    ) -> Result<Self> {
        let expanded = expand_shaped_config(config, in_features, out_features)?;

        let num_groups = require_int(&expanded, "num_groups")?;
        if num_groups < 1 {
            return Err(AutomlError::invalid(
                "num_groups",
                num_groups,
                "a shaped network needs at least one group",
            ));
        }
        let num_groups = num_groups as usize;
        let blocks_per_group = require_int(&expanded, "blocks_per_group")? as usize;
        let activation: Activation = require_str(&expanded, "activation")?.parse()?;

        let group_units = (0..=num_groups)
            .map(|i| Ok(require_int(&expanded, &format!("num_units_{}", i))? as usize))
            .collect::<Result<Vec<_>>>()?;

        let use_dropout = optional_bool(&expanded, "use_dropout", false)?;
        let group_dropout = if use_dropout {
            (1..=num_groups)
                .map(|i| require_float(&expanded, &format!("dropout_{}", i)))
                .collect::<Result<Vec<_>>>()?
        } else {
            Vec::new()
        };

        let use_shake_drop = require_bool(&expanded, "use_shake_drop")?;
        let max_shake_drop_probability = if use_shake_drop {
            Some(require_float(&expanded, "max_shake_drop_probability")?)
        } else {
            None
        };

        Ok(Self {
            in_features,
            out_features,
            num_groups,
            blocks_per_group,
            group_units,
            group_dropout,
            activation,
            use_batch_normalization: require_bool(&expanded, "use_batch_normalization")?,
            use_skip_connection: require_bool(&expanded, "use_skip_connection")?,
            use_shake_shake: require_bool(&expanded, "use_shake_shake")?,
            use_shake_drop,
            max_shake_drop_probability,
        })
    }

    /// Rough weight count of the network this plan describes.
    pub fn num_parameters(&self) -> usize {
        let mut params = self.in_features * self.group_units[0] + self.group_units[0];
        for g in 1..=self.num_groups {
            let (prev, units) = (self.group_units[g - 1], self.group_units[g]);
            params += self.blocks_per_group * (prev * units + units);
            if self.use_batch_normalization {
                params += 2 * units;
            }
        }
        let last = *self.group_units.last().unwrap_or(&0);
        params += last * self.out_features + self.out_features;
        params
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::space::ParamValue;

    fn full_config() -> RawConfig {
        let mut config = RawConfig::new();
        config.insert("resnet_shape".into(), "brick".into());
        config.insert("max_units".into(), ParamValue::Int(32));
        config.insert("num_groups".into(), ParamValue::Int(3));
        config.insert("blocks_per_group".into(), ParamValue::Int(2));
        config.insert("activation".into(), "relu".into());
        config.insert("use_dropout".into(), ParamValue::Bool(true));
        config.insert("dropout_shape".into(), "funnel".into());
        config.insert("max_dropout".into(), ParamValue::Float(0.6));
        config.insert("use_batch_normalization".into(), ParamValue::Bool(true));
        config.insert("use_skip_connection".into(), ParamValue::Bool(true));
        config.insert("use_shake_shake".into(), ParamValue::Bool(false));
        config.insert("use_shake_drop".into(), ParamValue::Bool(true));
        config.insert(
            "max_shake_drop_probability".into(),
            ParamValue::Float(0.5),
        );
        config
    }

    #[test]
    fn test_plan_from_config() {
        let plan = ResNetBuildPlan::from_config(&full_config(), 10, 2).unwrap();
        assert_eq!(plan.num_groups, 3);
        assert_eq!(plan.group_units, vec![32, 32, 32, 32]);
        assert_eq!(plan.group_dropout.len(), 3);
        assert_eq!(plan.activation, Activation::Relu);
        assert_eq!(plan.max_shake_drop_probability, Some(0.5));
    }

    #[test]
    fn test_dropout_indexing_offset() {
        let plan = ResNetBuildPlan::from_config(&full_config(), 10, 2).unwrap();
        // funnel dropout profile: rates shrink with depth
        for w in plan.group_dropout.windows(2) {
            assert!(w[1] <= w[0]);
        }
        assert!(plan.group_dropout[0] <= 0.6);
    }

    #[test]
    fn test_degenerate_depth_rejected() {
        let mut config = full_config();
        config.insert("num_groups".into(), ParamValue::Int(0));
        assert!(ResNetBuildPlan::from_config(&config, 10, 2).is_err());
    }

    #[test]
    fn test_shake_drop_requires_probability() {
        let mut config = full_config();
        config.remove("max_shake_drop_probability");
        assert!(ResNetBuildPlan::from_config(&config, 10, 2).is_err());
    }

    #[test]
    fn test_no_dropout_plan_is_empty() {
        let mut config = full_config();
        config.insert("use_dropout".into(), ParamValue::Bool(false));
        config.remove("dropout_shape");
        config.remove("max_dropout");
        let plan = ResNetBuildPlan::from_config(&config, 10, 2).unwrap();
        assert!(plan.group_dropout.is_empty());
    }

    #[test]
    fn test_num_parameters_positive() {
        let plan = ResNetBuildPlan::from_config(&full_config(), 10, 2).unwrap();
        assert!(plan.num_parameters() > 10 * 32);
    }
}
