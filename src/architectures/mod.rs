//! Model architectures
//!
//! The shaped-ResNet build plan consumed by an external network builder,
//! and the attentive tabular network trained by the tabular search worker.

pub mod resnet;
pub mod tabnet;

pub use resnet::{Activation, ResNetBuildPlan};
pub use tabnet::{TabNetClassifier, TabNetConfig};
