//! Constraint space for hyperparameter search
//!
//! Declares hyperparameters with domains, equality-activation conditions
//! (a child parameter is only sampled while its parent holds a specific
//! value) and forbidden conjunctions (combinations that must never appear
//! in a sampled point). Spaces are immutable once built and safe to share
//! across concurrent trials.

mod shaped_resnet;

pub use shaped_resnet::{ShapedResNetSpace, SwitchChoices};

use rand::{Rng, SeedableRng};
use rand_xoshiro::Xoshiro256PlusPlus;
use serde::{Deserialize, Serialize};
use std::collections::HashMap;
use std::fmt;

use crate::error::{AutomlError, Result};

/// How many whole-space redraws `sample` attempts before giving up when
/// every draw lands on a forbidden combination.
const MAX_SAMPLE_ATTEMPTS: usize = 100;

/// A sampled hyperparameter value
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub enum ParamValue {
    Float(f64),
    Int(i64),
    Str(String),
    Bool(bool),
}

impl ParamValue {
    pub fn as_float(&self) -> Option<f64> {
        match self {
            ParamValue::Float(v) => Some(*v),
            ParamValue::Int(v) => Some(*v as f64),
            _ => None,
        }
    }

    pub fn as_int(&self) -> Option<i64> {
        match self {
            ParamValue::Int(v) => Some(*v),
            _ => None,
        }
    }

    pub fn as_str(&self) -> Option<&str> {
        match self {
            ParamValue::Str(v) => Some(v),
            _ => None,
        }
    }

    pub fn as_bool(&self) -> Option<bool> {
        match self {
            ParamValue::Bool(v) => Some(*v),
            _ => None,
        }
    }
}

impl fmt::Display for ParamValue {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            ParamValue::Float(v) => write!(f, "{}", v),
            ParamValue::Int(v) => write!(f, "{}", v),
            ParamValue::Str(v) => f.write_str(v),
            ParamValue::Bool(v) => write!(f, "{}", v),
        }
    }
}

impl From<f64> for ParamValue {
    fn from(v: f64) -> Self {
        ParamValue::Float(v)
    }
}

impl From<i64> for ParamValue {
    fn from(v: i64) -> Self {
        ParamValue::Int(v)
    }
}

impl From<bool> for ParamValue {
    fn from(v: bool) -> Self {
        ParamValue::Bool(v)
    }
}

impl From<&str> for ParamValue {
    fn from(v: &str) -> Self {
        ParamValue::Str(v.to_string())
    }
}

impl From<String> for ParamValue {
    fn from(v: String) -> Self {
        ParamValue::Str(v)
    }
}

/// A raw configuration: hyperparameter name to sampled value
pub type RawConfig = HashMap<String, ParamValue>;

/// Fetch a required integer entry from a raw configuration.
pub fn require_int(config: &RawConfig, name: &str) -> Result<i64> {
    match config.get(name) {
        Some(ParamValue::Int(v)) => Ok(*v),
        Some(other) => Err(AutomlError::unsupported(name, other)),
        None => Err(AutomlError::invalid(name, "<missing>", "required hyperparameter")),
    }
}

/// Fetch a required numeric entry, accepting integers as floats.
pub fn require_float(config: &RawConfig, name: &str) -> Result<f64> {
    match config.get(name) {
        Some(v) => v
            .as_float()
            .ok_or_else(|| AutomlError::unsupported(name, v)),
        None => Err(AutomlError::invalid(name, "<missing>", "required hyperparameter")),
    }
}

/// Fetch a required string entry.
pub fn require_str<'a>(config: &'a RawConfig, name: &str) -> Result<&'a str> {
    match config.get(name) {
        Some(ParamValue::Str(v)) => Ok(v),
        Some(other) => Err(AutomlError::unsupported(name, other)),
        None => Err(AutomlError::invalid(name, "<missing>", "required hyperparameter")),
    }
}

/// Fetch a required boolean entry.
pub fn require_bool(config: &RawConfig, name: &str) -> Result<bool> {
    match config.get(name) {
        Some(ParamValue::Bool(v)) => Ok(*v),
        Some(other) => Err(AutomlError::unsupported(name, other)),
        None => Err(AutomlError::invalid(name, "<missing>", "required hyperparameter")),
    }
}

/// Fetch an optional boolean entry, defaulting when absent.
pub fn optional_bool(config: &RawConfig, name: &str, default: bool) -> Result<bool> {
    match config.get(name) {
        Some(ParamValue::Bool(v)) => Ok(*v),
        Some(other) => Err(AutomlError::unsupported(name, other)),
        None => Ok(default),
    }
}

/// Domain of a single hyperparameter
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub enum Domain {
    Float { low: f64, high: f64, log_scale: bool },
    Int { low: i64, high: i64, log_scale: bool },
    Categorical { choices: Vec<ParamValue> },
    Constant(ParamValue),
}

impl Domain {
    /// Whether `value` is a member of this domain.
    pub fn contains(&self, value: &ParamValue) -> bool {
        match self {
            Domain::Float { low, high, .. } => value
                .as_float()
                .map(|v| v >= *low && v <= *high)
                .unwrap_or(false),
            Domain::Int { low, high, .. } => value
                .as_int()
                .map(|v| v >= *low && v <= *high)
                .unwrap_or(false),
            Domain::Categorical { choices } => choices.contains(value),
            Domain::Constant(c) => c == value,
        }
    }
}

/// A declared hyperparameter
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Hyperparameter {
    pub name: String,
    pub domain: Domain,
    pub default: Option<ParamValue>,
}

impl Hyperparameter {
    /// Uniform float parameter
    pub fn float(name: impl Into<String>, low: f64, high: f64) -> Self {
        Self {
            name: name.into(),
            domain: Domain::Float {
                low,
                high,
                log_scale: false,
            },
            default: None,
        }
    }

    /// Log-uniform float parameter
    pub fn log_float(name: impl Into<String>, low: f64, high: f64) -> Self {
        Self {
            name: name.into(),
            domain: Domain::Float {
                low,
                high,
                log_scale: true,
            },
            default: None,
        }
    }

    /// Uniform integer parameter
    pub fn int(name: impl Into<String>, low: i64, high: i64) -> Self {
        Self {
            name: name.into(),
            domain: Domain::Int {
                low,
                high,
                log_scale: false,
            },
            default: None,
        }
    }

    /// Log-uniform integer parameter
    pub fn log_int(name: impl Into<String>, low: i64, high: i64) -> Self {
        Self {
            name: name.into(),
            domain: Domain::Int {
                low,
                high,
                log_scale: true,
            },
            default: None,
        }
    }

    /// Categorical parameter over explicit values
    pub fn categorical(name: impl Into<String>, choices: Vec<ParamValue>) -> Self {
        Self {
            name: name.into(),
            domain: Domain::Categorical { choices },
            default: None,
        }
    }

    /// Constant parameter
    pub fn constant(name: impl Into<String>, value: impl Into<ParamValue>) -> Self {
        Self {
            name: name.into(),
            domain: Domain::Constant(value.into()),
            default: None,
        }
    }

    /// Set an explicit default value
    pub fn with_default(mut self, value: impl Into<ParamValue>) -> Self {
        self.default = Some(value.into());
        self
    }

    /// Sample a value from this parameter's domain.
    pub fn sample(&self, rng: &mut impl Rng) -> ParamValue {
        match &self.domain {
            Domain::Float {
                low,
                high,
                log_scale,
            } => {
                let v = if *log_scale {
                    let (lo, hi) = (low.ln(), high.ln());
                    (rng.gen::<f64>() * (hi - lo) + lo).exp()
                } else {
                    rng.gen::<f64>() * (high - low) + low
                };
                ParamValue::Float(v)
            }
            Domain::Int {
                low,
                high,
                log_scale,
            } => {
                let v = if *log_scale {
                    let (lo, hi) = ((*low as f64).ln(), (*high as f64).ln());
                    let drawn = (rng.gen::<f64>() * (hi - lo) + lo).exp().round() as i64;
                    drawn.clamp(*low, *high)
                } else {
                    rng.gen_range(*low..=*high)
                };
                ParamValue::Int(v)
            }
            Domain::Categorical { choices } => {
                let idx = rng.gen_range(0..choices.len());
                choices[idx].clone()
            }
            Domain::Constant(value) => value.clone(),
        }
    }
}

/// Equality-activation edge: `child` is only sampled while `parent == value`.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Condition {
    pub child: String,
    pub parent: String,
    pub value: ParamValue,
}

impl Condition {
    pub fn equals(
        child: impl Into<String>,
        parent: impl Into<String>,
        value: impl Into<ParamValue>,
    ) -> Self {
        Self {
            child: child.into(),
            parent: parent.into(),
            value: value.into(),
        }
    }
}

/// Conjunction of equalities that must never simultaneously hold.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ForbiddenClause {
    pub terms: Vec<(String, ParamValue)>,
}

impl ForbiddenClause {
    pub fn conjunction(terms: Vec<(&str, ParamValue)>) -> Self {
        Self {
            terms: terms
                .into_iter()
                .map(|(name, value)| (name.to_string(), value))
                .collect(),
        }
    }

    /// Whether every term of the clause holds in `config`.
    pub fn holds(&self, config: &RawConfig) -> bool {
        !self.terms.is_empty()
            && self
                .terms
                .iter()
                .all(|(name, value)| config.get(name) == Some(value))
    }
}

/// An immutable set of hyperparameters with activation conditions and
/// forbidden combinations.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ConstraintSpace {
    params: Vec<Hyperparameter>,
    conditions: Vec<Condition>,
    forbidden: Vec<ForbiddenClause>,
    seed: Option<u64>,
}

impl ConstraintSpace {
    pub fn new() -> Self {
        Self {
            params: Vec::new(),
            conditions: Vec::new(),
            forbidden: Vec::new(),
            seed: None,
        }
    }

    /// Record the seed the space was built with (used by [`Self::sampler`]).
    pub fn with_seed(mut self, seed: u64) -> Self {
        self.seed = Some(seed);
        self
    }

    /// Declare a hyperparameter. Duplicate names are rejected.
    pub fn add(mut self, param: Hyperparameter) -> Result<Self> {
        if self.params.iter().any(|p| p.name == param.name) {
            return Err(AutomlError::invalid(
                param.name,
                "<duplicate>",
                "hyperparameter already declared",
            ));
        }
        if let Domain::Categorical { choices } = &param.domain {
            if choices.is_empty() {
                return Err(AutomlError::invalid(
                    param.name,
                    "<empty>",
                    "categorical domain needs at least one choice",
                ));
            }
        }
        self.params.push(param);
        Ok(self)
    }

    /// Add an activation condition. The parent must already be declared so
    /// that sampling in declaration order sees it first.
    pub fn add_condition(mut self, condition: Condition) -> Result<Self> {
        let parent_pos = self
            .params
            .iter()
            .position(|p| p.name == condition.parent)
            .ok_or_else(|| {
                AutomlError::invalid(&condition.parent, "<unknown>", "condition parent not declared")
            })?;
        let child_pos = self
            .params
            .iter()
            .position(|p| p.name == condition.child)
            .ok_or_else(|| {
                AutomlError::invalid(&condition.child, "<unknown>", "condition child not declared")
            })?;
        if child_pos <= parent_pos {
            return Err(AutomlError::invalid(
                &condition.child,
                "<order>",
                "condition child must be declared after its parent",
            ));
        }
        self.conditions.push(condition);
        Ok(self)
    }

    /// Add a forbidden conjunction over declared hyperparameters.
    pub fn add_forbidden(mut self, clause: ForbiddenClause) -> Result<Self> {
        for (name, _) in &clause.terms {
            if !self.params.iter().any(|p| &p.name == name) {
                return Err(AutomlError::invalid(
                    name,
                    "<unknown>",
                    "forbidden clause references an undeclared hyperparameter",
                ));
            }
        }
        self.forbidden.push(clause);
        Ok(self)
    }

    pub fn param(&self, name: &str) -> Option<&Hyperparameter> {
        self.params.iter().find(|p| p.name == name)
    }

    pub fn params(&self) -> &[Hyperparameter] {
        &self.params
    }

    pub fn conditions(&self) -> &[Condition] {
        &self.conditions
    }

    pub fn forbidden_clauses(&self) -> &[ForbiddenClause] {
        &self.forbidden
    }

    pub fn len(&self) -> usize {
        self.params.len()
    }

    pub fn is_empty(&self) -> bool {
        self.params.is_empty()
    }

    pub fn param_names(&self) -> Vec<&str> {
        self.params.iter().map(|p| p.name.as_str()).collect()
    }

    pub fn seed(&self) -> Option<u64> {
        self.seed
    }

    /// RNG seeded with the space's recorded seed (zero when unset).
    pub fn sampler(&self) -> Xoshiro256PlusPlus {
        Xoshiro256PlusPlus::seed_from_u64(self.seed.unwrap_or(0))
    }

    /// Whether `name` is active under the parent values present in `config`.
    /// A parameter with no conditions is always active.
    pub fn is_active(&self, name: &str, config: &RawConfig) -> bool {
        self.conditions
            .iter()
            .filter(|c| c.child == name)
            .all(|c| config.get(&c.parent) == Some(&c.value))
    }

    /// Validate a configuration against the space: every active parameter
    /// present and in-domain, no inactive parameter present, no undeclared
    /// key, and no forbidden clause satisfied.
    pub fn validate(&self, config: &RawConfig) -> Result<()> {
        for key in config.keys() {
            if self.param(key).is_none() {
                return Err(AutomlError::invalid(
                    key,
                    "<undeclared>",
                    "configuration key not in space",
                ));
            }
        }
        for param in &self.params {
            let active = self.is_active(&param.name, config);
            match (active, config.get(&param.name)) {
                (true, Some(value)) => {
                    if !param.domain.contains(value) {
                        return Err(AutomlError::invalid(
                            &param.name,
                            value,
                            "value outside declared domain",
                        ));
                    }
                }
                (true, None) => {
                    return Err(AutomlError::invalid(
                        &param.name,
                        "<missing>",
                        "active hyperparameter absent from configuration",
                    ));
                }
                (false, Some(value)) => {
                    return Err(AutomlError::invalid(
                        &param.name,
                        value,
                        "inactive hyperparameter present in configuration",
                    ));
                }
                (false, None) => {}
            }
        }
        for clause in &self.forbidden {
            if clause.holds(config) {
                let desc: Vec<String> = clause
                    .terms
                    .iter()
                    .map(|(n, v)| format!("{}={}", n, v))
                    .collect();
                return Err(AutomlError::invalid(
                    desc.join(" & "),
                    "<forbidden>",
                    "configuration satisfies a forbidden clause",
                ));
            }
        }
        Ok(())
    }

    /// Draw a valid configuration. Parameters are sampled in declaration
    /// order so parents precede their conditional children; draws landing
    /// on a forbidden combination are rejected and redrawn.
    pub fn sample(&self, rng: &mut impl Rng) -> Result<RawConfig> {
        for _ in 0..MAX_SAMPLE_ATTEMPTS {
            let mut config = RawConfig::with_capacity(self.params.len());
            for param in &self.params {
                if self.is_active(&param.name, &config) {
                    config.insert(param.name.clone(), param.sample(rng));
                }
            }
            if !self.forbidden.iter().any(|clause| clause.holds(&config)) {
                return Ok(config);
            }
        }
        Err(AutomlError::SamplingError(format!(
            "no valid configuration found after {} attempts",
            MAX_SAMPLE_ATTEMPTS
        )))
    }
}

impl Default for ConstraintSpace {
    fn default() -> Self {
        Self::new()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn toy_space() -> ConstraintSpace {
        ConstraintSpace::new()
            .add(Hyperparameter::categorical(
                "booster",
                vec!["gbtree".into(), "dart".into()],
            ))
            .unwrap()
            .add(Hyperparameter::float("rate_drop", 0.0, 1.0))
            .unwrap()
            .add_condition(Condition::equals("rate_drop", "booster", "dart"))
            .unwrap()
    }

    #[test]
    fn test_duplicate_parameter_rejected() {
        let result = ConstraintSpace::new()
            .add(Hyperparameter::int("n", 1, 9))
            .unwrap()
            .add(Hyperparameter::int("n", 1, 4));
        assert!(result.is_err());
    }

    #[test]
    fn test_condition_requires_declared_parent() {
        let result = ConstraintSpace::new()
            .add(Hyperparameter::float("child", 0.0, 1.0))
            .unwrap()
            .add_condition(Condition::equals("child", "ghost", true));
        assert!(result.is_err());
    }

    #[test]
    fn test_conditional_child_present_only_with_parent_value() {
        let space = toy_space();
        let mut rng = space.sampler();
        for _ in 0..50 {
            let config = space.sample(&mut rng).unwrap();
            let booster = require_str(&config, "booster").unwrap().to_string();
            assert_eq!(booster == "dart", config.contains_key("rate_drop"));
            space.validate(&config).unwrap();
        }
    }

    #[test]
    fn test_forbidden_clause_never_sampled() {
        let space = ConstraintSpace::new()
            .add(Hyperparameter::categorical(
                "a",
                vec![true.into(), false.into()],
            ))
            .unwrap()
            .add(Hyperparameter::categorical(
                "b",
                vec![true.into(), false.into()],
            ))
            .unwrap()
            .add_forbidden(ForbiddenClause::conjunction(vec![
                ("a", true.into()),
                ("b", true.into()),
            ]))
            .unwrap();

        let mut rng = space.sampler();
        for _ in 0..200 {
            let config = space.sample(&mut rng).unwrap();
            let a = require_bool(&config, "a").unwrap();
            let b = require_bool(&config, "b").unwrap();
            assert!(!(a && b));
        }
    }

    #[test]
    fn test_sampling_exhaustion() {
        // the only expressible point is forbidden
        let space = ConstraintSpace::new()
            .add(Hyperparameter::constant("a", true))
            .unwrap()
            .add_forbidden(ForbiddenClause::conjunction(vec![("a", true.into())]))
            .unwrap();
        let mut rng = space.sampler();
        assert!(matches!(
            space.sample(&mut rng),
            Err(AutomlError::SamplingError(_))
        ));
    }

    #[test]
    fn test_validate_rejects_out_of_domain() {
        let space = ConstraintSpace::new()
            .add(Hyperparameter::int("num_groups", 1, 9))
            .unwrap();
        let mut config = RawConfig::new();
        config.insert("num_groups".into(), ParamValue::Int(42));
        assert!(space.validate(&config).is_err());
    }

    #[test]
    fn test_validate_rejects_inactive_present() {
        let space = toy_space();
        let mut config = RawConfig::new();
        config.insert("booster".into(), "gbtree".into());
        config.insert("rate_drop".into(), ParamValue::Float(0.5));
        assert!(space.validate(&config).is_err());
    }

    #[test]
    fn test_seeded_sampling_deterministic() {
        let space = toy_space().with_seed(11);
        let mut rng_a = space.sampler();
        let mut rng_b = space.sampler();
        for _ in 0..20 {
            assert_eq!(
                space.sample(&mut rng_a).unwrap(),
                space.sample(&mut rng_b).unwrap()
            );
        }
    }

    #[test]
    fn test_log_sampling_in_bounds() {
        let space = ConstraintSpace::new()
            .add(Hyperparameter::log_float("eta", 1e-3, 1.0))
            .unwrap()
            .add(Hyperparameter::log_int("max_units", 10, 1024))
            .unwrap();
        let mut rng = space.sampler();
        for _ in 0..100 {
            let config = space.sample(&mut rng).unwrap();
            let eta = require_float(&config, "eta").unwrap();
            let units = require_int(&config, "max_units").unwrap();
            assert!((1e-3..=1.0).contains(&eta));
            assert!((10..=1024).contains(&units));
        }
    }
}
