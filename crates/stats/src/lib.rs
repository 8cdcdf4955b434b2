//! Statistical analyzer: frequentist, Bayesian, and bootstrap inference
//! over accumulated counter snapshots, with alpha-spending boundaries for
//! sequential tests.

pub mod analyzer;
pub mod bayesian;
pub mod bootstrap;
pub mod frequentist;
pub mod sequential;

pub use analyzer::Analyzer;
pub use bootstrap::CancelToken;
