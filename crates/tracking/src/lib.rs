//! Event tracker: append-only exposure, conversion, and metric recording
//! against existing assignments.

pub mod tracker;

pub use tracker::EventTracker;
