//! Bootstrap resampling: empirical percentile intervals over per-user
//! outcomes, for non-normal distributions and small-to-moderate samples.

use rand::Rng;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;

use split_core::{SplitError, SplitResult};

/// Cooperative cancellation handle shared with the caller. A cancelled
/// analysis discards all partial state and returns `Cancelled`.
#[derive(Debug, Clone, Default)]
pub struct CancelToken {
    flag: Arc<AtomicBool>,
}

impl CancelToken {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn cancel(&self) {
        self.flag.store(true, Ordering::Relaxed);
    }

    pub fn is_cancelled(&self) -> bool {
        self.flag.load(Ordering::Relaxed)
    }
}

#[derive(Debug, Clone, Copy)]
pub struct BootstrapOutcome {
    /// Percentile interval on the mean difference (variant minus control).
    pub interval_lower: f64,
    pub interval_upper: f64,
    /// Observed mean difference, variant minus control.
    pub difference: f64,
    pub iterations: u32,
}

/// Resample both arms' per-user outcomes with replacement and build the
/// empirical distribution of the mean difference. The cancel token is
/// checked every `cancel_check_interval` iterations.
pub fn bootstrap_difference(
    control: &[f64],
    variant: &[f64],
    iterations: u32,
    confidence_level: f64,
    cancel: &CancelToken,
    cancel_check_interval: u32,
    rng: &mut impl Rng,
) -> SplitResult<BootstrapOutcome> {
    if control.is_empty() || variant.is_empty() {
        return Err(SplitError::InsufficientData(
            "bootstrap requires outcomes in both arms".to_string(),
        ));
    }

    let observed = mean(variant) - mean(control);
    let check_every = cancel_check_interval.max(1);

    let mut diffs = Vec::with_capacity(iterations as usize);
    for i in 0..iterations {
        if i % check_every == 0 && cancel.is_cancelled() {
            return Err(SplitError::Cancelled);
        }
        let c = resampled_mean(control, rng);
        let v = resampled_mean(variant, rng);
        diffs.push(v - c);
    }
    diffs.sort_by(|a, b| a.partial_cmp(b).expect("resampled means are finite"));

    let alpha = 1.0 - confidence_level;
    let lower_idx = ((alpha / 2.0) * iterations as f64) as usize;
    let upper_idx = (((1.0 - alpha / 2.0) * iterations as f64) as usize).min(diffs.len() - 1);

    Ok(BootstrapOutcome {
        interval_lower: diffs[lower_idx],
        interval_upper: diffs[upper_idx],
        difference: observed,
        iterations,
    })
}

fn mean(values: &[f64]) -> f64 {
    values.iter().sum::<f64>() / values.len() as f64
}

fn resampled_mean(values: &[f64], rng: &mut impl Rng) -> f64 {
    let n = values.len();
    let mut sum = 0.0;
    for _ in 0..n {
        sum += values[rng.gen_range(0..n)];
    }
    sum / n as f64
}
