//! Search space for shaped residual networks
//!
//! Declares the architecture-selection hyperparameters and the validity
//! constraints among them: shake-shake and shake-drop are alternative
//! regularizers and may never both be enabled, and neither works without
//! skip connections.

use serde::{Deserialize, Serialize};
use tracing::debug;

use super::{Condition, ConstraintSpace, ForbiddenClause, Hyperparameter, ParamValue};
use crate::error::{AutomlError, Result};
use crate::shapes::ShapeFamily;

/// Allowed values of a boolean architecture switch: an ordered,
/// deduplicated, non-empty set. The type replaces the loose
/// list-of-list conventions of older config layers — nesting is not
/// representable and an empty set is rejected at construction.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct SwitchChoices(Vec<bool>);

impl SwitchChoices {
    /// Both values allowed; the switch is genuinely sampled.
    pub fn sampled() -> Self {
        Self(vec![true, false])
    }

    /// The switch is pinned to a single value.
    pub fn fixed(value: bool) -> Self {
        Self(vec![value])
    }

    /// Explicit choice set. Duplicates collapse; empty input is an error.
    pub fn new(name: &str, choices: &[bool]) -> Result<Self> {
        let mut values = Vec::new();
        for &choice in choices {
            if !values.contains(&choice) {
                values.push(choice);
            }
        }
        if values.is_empty() {
            return Err(AutomlError::invalid(
                name,
                "<empty>",
                "switch needs at least one allowed value",
            ));
        }
        Ok(Self(values))
    }

    pub fn contains(&self, value: bool) -> bool {
        self.0.contains(&value)
    }

    /// True when both values are allowed (the switch is sampled, not fixed).
    pub fn is_sampled(&self) -> bool {
        self.0.len() > 1
    }

    pub fn values(&self) -> Vec<ParamValue> {
        self.0.iter().map(|&b| ParamValue::Bool(b)).collect()
    }
}

impl Default for SwitchChoices {
    fn default() -> Self {
        Self::sampled()
    }
}

/// Builder for the shaped-ResNet hyperparameter space.
///
/// Defaults reproduce the full search domain; `with_*` methods narrow or
/// pin individual hyperparameters for ablation runs.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ShapedResNetSpace {
    num_groups: (i64, i64),
    blocks_per_group: (i64, i64),
    max_units: (i64, i64),
    max_units_log: bool,
    activation: Vec<String>,
    max_shake_drop_probability: (f64, f64),
    max_dropout: (f64, f64),
    resnet_shape: Vec<ShapeFamily>,
    dropout_shape: Vec<ShapeFamily>,
    use_dropout: SwitchChoices,
    use_shake_shake: SwitchChoices,
    use_batch_normalization: SwitchChoices,
    use_shake_drop: SwitchChoices,
    use_skip_connection: SwitchChoices,
}

impl Default for ShapedResNetSpace {
    fn default() -> Self {
        Self {
            num_groups: (1, 9),
            blocks_per_group: (1, 4),
            max_units: (10, 1024),
            max_units_log: true,
            activation: vec!["sigmoid".into(), "tanh".into(), "relu".into()],
            max_shake_drop_probability: (0.0, 1.0),
            max_dropout: (0.0, 0.8),
            resnet_shape: ShapeFamily::ALL.to_vec(),
            dropout_shape: ShapeFamily::ALL.to_vec(),
            use_dropout: SwitchChoices::sampled(),
            use_shake_shake: SwitchChoices::sampled(),
            use_batch_normalization: SwitchChoices::sampled(),
            use_shake_drop: SwitchChoices::sampled(),
            use_skip_connection: SwitchChoices::sampled(),
        }
    }
}

impl ShapedResNetSpace {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with_num_groups(mut self, low: i64, high: i64) -> Self {
        self.num_groups = (low, high);
        self
    }

    pub fn with_blocks_per_group(mut self, low: i64, high: i64) -> Self {
        self.blocks_per_group = (low, high);
        self
    }

    pub fn with_max_units(mut self, low: i64, high: i64, log_scale: bool) -> Self {
        self.max_units = (low, high);
        self.max_units_log = log_scale;
        self
    }

    pub fn with_activation(mut self, choices: Vec<String>) -> Self {
        self.activation = choices;
        self
    }

    pub fn with_max_shake_drop_probability(mut self, low: f64, high: f64) -> Self {
        self.max_shake_drop_probability = (low, high);
        self
    }

    pub fn with_max_dropout(mut self, low: f64, high: f64) -> Self {
        self.max_dropout = (low, high);
        self
    }

    pub fn with_resnet_shape(mut self, families: Vec<ShapeFamily>) -> Self {
        self.resnet_shape = families;
        self
    }

    pub fn with_dropout_shape(mut self, families: Vec<ShapeFamily>) -> Self {
        self.dropout_shape = families;
        self
    }

    pub fn with_use_dropout(mut self, choices: SwitchChoices) -> Self {
        self.use_dropout = choices;
        self
    }

    pub fn with_use_shake_shake(mut self, choices: SwitchChoices) -> Self {
        self.use_shake_shake = choices;
        self
    }

    pub fn with_use_batch_normalization(mut self, choices: SwitchChoices) -> Self {
        self.use_batch_normalization = choices;
        self
    }

    pub fn with_use_shake_drop(mut self, choices: SwitchChoices) -> Self {
        self.use_shake_drop = choices;
        self
    }

    pub fn with_use_skip_connection(mut self, choices: SwitchChoices) -> Self {
        self.use_skip_connection = choices;
        self
    }

    /// Assemble the constraint space.
    ///
    /// Fails fast with [`AutomlError::ConfigConflict`] when shake-shake can
    /// be enabled while shake-drop is unconditionally on (or vice versa);
    /// no partial space is returned. Building is idempotent for identical
    /// inputs and carries no other side effects.
    pub fn build(self) -> Result<ConstraintSpace> {
        // skip connections default on unless `true` is entirely absent;
        // the shake switches default on only when they are unconditionally on
        let default_skip_connection = self.use_skip_connection.contains(true);
        let default_shake_shake = !self.use_shake_shake.contains(false);
        let default_shake_drop = !self.use_shake_drop.contains(false);

        debug!(
            skip_connection = ?self.use_skip_connection,
            shake_shake = ?self.use_shake_shake,
            shake_drop = ?self.use_shake_drop,
            "building shaped resnet space"
        );

        if (self.use_shake_shake.contains(true) && !self.use_shake_drop.contains(false))
            || (self.use_shake_drop.contains(true) && !self.use_shake_shake.contains(false))
        {
            return Err(AutomlError::ConfigConflict(
                "shake-shake and shake-drop cannot both be enabled; \
                 if one may be true the other must at least allow false"
                    .into(),
            ));
        }

        let mut space = ConstraintSpace::new()
            .add(Hyperparameter::int(
                "num_groups",
                self.num_groups.0,
                self.num_groups.1,
            ))?
            .add(Hyperparameter::int(
                "blocks_per_group",
                self.blocks_per_group.0,
                self.blocks_per_group.1,
            ))?
            .add(Hyperparameter::categorical(
                "activation",
                self.activation.iter().map(|s| s.as_str().into()).collect(),
            ))?
            .add(Hyperparameter::categorical(
                "use_dropout",
                self.use_dropout.values(),
            ))?
            .add(
                Hyperparameter::categorical("use_shake_shake", self.use_shake_shake.values())
                    .with_default(default_shake_shake),
            )?
            .add(Hyperparameter::categorical(
                "use_batch_normalization",
                self.use_batch_normalization.values(),
            ))?
            .add(
                Hyperparameter::categorical(
                    "use_skip_connection",
                    self.use_skip_connection.values(),
                )
                .with_default(default_skip_connection),
            )?
            .add(
                Hyperparameter::categorical("use_shake_drop", self.use_shake_drop.values())
                    .with_default(default_shake_drop),
            )?;

        // each clause only exists when both of its legs are expressible
        if self.use_shake_shake.contains(true) && self.use_skip_connection.contains(false) {
            space = space.add_forbidden(ForbiddenClause::conjunction(vec![
                ("use_shake_shake", true.into()),
                ("use_skip_connection", false.into()),
            ]))?;
        }
        if self.use_shake_drop.contains(true) && self.use_skip_connection.contains(false) {
            space = space.add_forbidden(ForbiddenClause::conjunction(vec![
                ("use_shake_drop", true.into()),
                ("use_skip_connection", false.into()),
            ]))?;
        }
        if self.use_shake_shake.contains(true) && self.use_shake_drop.contains(true) {
            space = space.add_forbidden(ForbiddenClause::conjunction(vec![
                ("use_shake_shake", true.into()),
                ("use_shake_drop", true.into()),
            ]))?;
        }

        if self.use_shake_drop.contains(true) {
            space = space
                .add(Hyperparameter::float(
                    "max_shake_drop_probability",
                    self.max_shake_drop_probability.0,
                    self.max_shake_drop_probability.1,
                ))?
                .add_condition(Condition::equals(
                    "max_shake_drop_probability",
                    "use_shake_drop",
                    true,
                ))?;
        }

        space = space
            .add(Hyperparameter::categorical(
                "resnet_shape",
                self.resnet_shape.iter().map(|f| f.as_str().into()).collect(),
            ))?
            .add(if self.max_units_log {
                Hyperparameter::log_int("max_units", self.max_units.0, self.max_units.1)
            } else {
                Hyperparameter::int("max_units", self.max_units.0, self.max_units.1)
            })?;

        // dropout hyperparameters exist whenever dropout can be enabled;
        // the activation edge is only meaningful when the switch is sampled
        if self.use_dropout.contains(true) {
            space = space
                .add(Hyperparameter::categorical(
                    "dropout_shape",
                    self.dropout_shape.iter().map(|f| f.as_str().into()).collect(),
                ))?
                .add(Hyperparameter::float(
                    "max_dropout",
                    self.max_dropout.0,
                    self.max_dropout.1,
                ))?;
            if self.use_dropout.is_sampled() {
                space = space
                    .add_condition(Condition::equals("dropout_shape", "use_dropout", true))?
                    .add_condition(Condition::equals("max_dropout", "use_dropout", true))?;
            }
        }

        Ok(space)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::space::{require_bool, require_int};

    #[test]
    fn test_default_space_builds() {
        let space = ShapedResNetSpace::default().build().unwrap();
        assert!(space.param("num_groups").is_some());
        assert!(space.param("resnet_shape").is_some());
        assert!(space.param("max_units").is_some());
        assert!(space.param("dropout_shape").is_some());
        // all three clauses are expressible under the default switches
        assert_eq!(space.forbidden_clauses().len(), 3);
    }

    #[test]
    fn test_both_shakes_unconditional_conflict() {
        let result = ShapedResNetSpace::default()
            .with_use_shake_shake(SwitchChoices::fixed(true))
            .with_use_shake_drop(SwitchChoices::fixed(true))
            .build();
        assert!(matches!(result, Err(AutomlError::ConfigConflict(_))));
    }

    #[test]
    fn test_shake_shake_against_pinned_shake_drop_conflict() {
        // shake-drop unconditionally on while shake-shake may still be true
        let result = ShapedResNetSpace::default()
            .with_use_shake_drop(SwitchChoices::fixed(true))
            .build();
        assert!(matches!(result, Err(AutomlError::ConfigConflict(_))));
    }

    #[test]
    fn test_mutual_exclusion_clause_present() {
        let space = ShapedResNetSpace::default().build().unwrap();
        let clause = space
            .forbidden_clauses()
            .iter()
            .find(|c| {
                c.terms.contains(&("use_shake_shake".into(), true.into()))
                    && c.terms.contains(&("use_shake_drop".into(), true.into()))
            })
            .expect("mutual exclusion clause missing");
        assert_eq!(clause.terms.len(), 2);
    }

    #[test]
    fn test_skip_connection_clause_present() {
        let space = ShapedResNetSpace::default().build().unwrap();
        assert!(space.forbidden_clauses().iter().any(|c| {
            c.terms.contains(&("use_shake_shake".into(), true.into()))
                && c.terms.contains(&("use_skip_connection".into(), false.into()))
        }));
    }

    #[test]
    fn test_forced_skip_connection_drops_clauses() {
        let space = ShapedResNetSpace::default()
            .with_use_skip_connection(SwitchChoices::fixed(true))
            .build()
            .unwrap();
        // only the mutual-exclusion clause remains
        assert_eq!(space.forbidden_clauses().len(), 1);
    }

    #[test]
    fn test_shake_drop_probability_conditional() {
        let space = ShapedResNetSpace::default().build().unwrap();
        assert!(space.param("max_shake_drop_probability").is_some());
        assert!(space
            .conditions()
            .iter()
            .any(|c| c.child == "max_shake_drop_probability" && c.parent == "use_shake_drop"));

        let without = ShapedResNetSpace::default()
            .with_use_shake_drop(SwitchChoices::fixed(false))
            .build()
            .unwrap();
        assert!(without.param("max_shake_drop_probability").is_none());
    }

    #[test]
    fn test_dropout_fixed_on_is_unconditional() {
        let space = ShapedResNetSpace::default()
            .with_use_dropout(SwitchChoices::fixed(true))
            .build()
            .unwrap();
        assert!(space.param("dropout_shape").is_some());
        assert!(!space.conditions().iter().any(|c| c.child == "dropout_shape"));
    }

    #[test]
    fn test_dropout_fixed_off_has_no_dropout_params() {
        let space = ShapedResNetSpace::default()
            .with_use_dropout(SwitchChoices::fixed(false))
            .build()
            .unwrap();
        assert!(space.param("dropout_shape").is_none());
        assert!(space.param("max_dropout").is_none());
    }

    #[test]
    fn test_sampled_points_respect_constraints() {
        let space = ShapedResNetSpace::default().build().unwrap().with_seed(42);
        let mut rng = space.sampler();
        for _ in 0..200 {
            let config = space.sample(&mut rng).unwrap();
            space.validate(&config).unwrap();

            let shake_shake = require_bool(&config, "use_shake_shake").unwrap();
            let shake_drop = require_bool(&config, "use_shake_drop").unwrap();
            let skip = require_bool(&config, "use_skip_connection").unwrap();
            assert!(!(shake_shake && shake_drop));
            assert!(!(shake_shake && !skip));
            assert!(!(shake_drop && !skip));

            let groups = require_int(&config, "num_groups").unwrap();
            assert!((1..=9).contains(&groups));

            assert_eq!(
                shake_drop,
                config.contains_key("max_shake_drop_probability")
            );
            let dropout = require_bool(&config, "use_dropout").unwrap();
            assert_eq!(dropout, config.contains_key("dropout_shape"));
            assert_eq!(dropout, config.contains_key("max_dropout"));
        }
    }

    #[test]
    fn test_switch_choices_reject_empty() {
        assert!(SwitchChoices::new("use_dropout", &[]).is_err());
        let deduped = SwitchChoices::new("use_dropout", &[true, true, false]).unwrap();
        assert!(deduped.is_sampled());
    }

    #[test]
    fn test_build_idempotent() {
        let a = ShapedResNetSpace::default().build().unwrap();
        let b = ShapedResNetSpace::default().build().unwrap();
        assert_eq!(a.param_names(), b.param_names());
        assert_eq!(a.forbidden_clauses(), b.forbidden_clauses());
        assert_eq!(a.conditions(), b.conditions());
    }
}
