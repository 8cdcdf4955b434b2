//! Bandit optimizer: recomputes traffic-allocation weights from running
//! reward statistics for multi-armed-bandit tests.

pub mod optimizer;

pub use optimizer::{BanditOptimizer, BanditPolicy};
