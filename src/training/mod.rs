//! Model training collaborators for the search workers
//!
//! Provides the native gradient booster the tree-family worker trains and
//! the balanced-accuracy metrics both workers report with.

pub mod gradient_boosting;
pub mod metrics;

pub use gradient_boosting::{BoostObjective, BoosterConfig, BoosterKind, GradientBooster};
pub use metrics::{balanced_accuracy, balanced_error};
