//! Shaped-architecture AutoML core
//!
//! This crate provides the configuration machinery of an AutoML system for
//! tabular data:
//! - Shaped architecture generation: a small set of shape hyperparameters
//!   is expanded deterministically into per-layer widths and dropout rates
//! - Constraint spaces: hyperparameter declarations with conditional
//!   activation edges and forbidden combinations, so only valid
//!   architectures are ever sampled
//! - Search workers: per-family trainers that turn a sampled configuration
//!   and a budget into a loss record for a bandit-based search scheduler
//!
//! # Modules
//!
//! - [`shapes`] - Shape profiles and compact-config expansion
//! - [`space`] - Constraint spaces (domains, conditions, forbidden clauses)
//! - [`architectures`] - Shaped-ResNet build plan, tabular attentive network
//! - [`training`] - Native gradient booster and balanced-accuracy metrics
//! - [`workers`] - Gradient-boosting and tabular-network search workers

// Core error handling
pub mod error;

// Shape generation and expansion
pub mod shapes;

// Hyperparameter constraint spaces
pub mod space;

// Architectures and trainers
pub mod architectures;
pub mod training;

// Search workers
pub mod workers;

pub use error::{AutomlError, Result};

/// Re-export commonly used types
pub mod prelude {
    // Error handling
    pub use crate::error::{AutomlError, Result};

    // Shapes
    pub use crate::shapes::{expand_shaped_config, shaped_magnitudes, ShapeFamily, ShapeSpec};

    // Constraint spaces
    pub use crate::space::{
        Condition, ConstraintSpace, Domain, ForbiddenClause, Hyperparameter, ParamValue,
        RawConfig, ShapedResNetSpace, SwitchChoices,
    };

    // Architectures
    pub use crate::architectures::{Activation, ResNetBuildPlan, TabNetClassifier, TabNetConfig};

    // Training
    pub use crate::training::{
        balanced_accuracy, balanced_error, BoostObjective, BoosterConfig, BoosterKind,
        GradientBooster,
    };

    // Workers
    pub use crate::workers::{
        DataSplits, EvalInfo, GbmParams, GradientBoostingWorker, Objective, RefitResult,
        SearchWorker, TabNetParams, TabNetWorker, WorkerResult,
    };
}
