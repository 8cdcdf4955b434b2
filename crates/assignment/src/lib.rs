//! Assignment engine: deterministic, idempotent (test, user) to variant
//! mapping honoring traffic allocation and audience targeting.

pub mod bucketing;
pub mod engine;
pub mod targeting;

pub use engine::AssignmentEngine;
