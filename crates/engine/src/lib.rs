//! Test lifecycle controller and the operations facade collaborators call.

pub mod engine;
pub mod lifecycle;

pub use engine::ExperimentEngine;
pub use lifecycle::{GoalConfig, TestConfig, VariantConfig};
