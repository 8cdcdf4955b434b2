//! Bayesian comparisons: Beta-Binomial posteriors for binary goals with
//! Monte Carlo probability-to-beat-control, Normal-Normal closed form for
//! continuous goals.

use rand::Rng;
use rand_distr::{Beta, Distribution};
use statrs::distribution::{ContinuousCDF, Normal};

use split_core::{SplitError, SplitResult};

#[derive(Debug, Clone, Copy)]
pub struct BayesianOutcome {
    /// Posterior probability the variant beats control.
    pub prob_beats_control: f64,
    /// Credible interval on the posterior difference (variant minus control).
    pub credible_lower: f64,
    pub credible_upper: f64,
    /// Posterior mean difference, variant minus control.
    pub difference: f64,
}

/// Beta(1 + successes, 1 + failures) posterior comparison. Draws paired
/// samples from both posteriors and reports the fraction where the variant
/// wins plus a percentile credible interval on the difference.
pub fn beta_binomial(
    control_successes: u64,
    control_trials: u64,
    variant_successes: u64,
    variant_trials: u64,
    confidence_level: f64,
    draws: u32,
    rng: &mut impl Rng,
) -> SplitResult<BayesianOutcome> {
    if control_trials == 0 || variant_trials == 0 {
        return Err(SplitError::InsufficientData(
            "Beta-Binomial comparison requires trials in both arms".to_string(),
        ));
    }

    let control = posterior(control_successes, control_trials)?;
    let variant = posterior(variant_successes, variant_trials)?;

    let mut diffs = Vec::with_capacity(draws as usize);
    let mut wins = 0u32;
    for _ in 0..draws {
        let c = control.sample(rng);
        let v = variant.sample(rng);
        if v > c {
            wins += 1;
        }
        diffs.push(v - c);
    }
    diffs.sort_by(|a, b| a.partial_cmp(b).expect("posterior draws are finite"));

    let alpha = 1.0 - confidence_level;
    let lower_idx = ((alpha / 2.0) * draws as f64) as usize;
    let upper_idx = (((1.0 - alpha / 2.0) * draws as f64) as usize).min(diffs.len() - 1);

    let mean_diff = diffs.iter().sum::<f64>() / diffs.len() as f64;

    Ok(BayesianOutcome {
        prob_beats_control: wins as f64 / draws as f64,
        credible_lower: diffs[lower_idx],
        credible_upper: diffs[upper_idx],
        difference: mean_diff,
    })
}

/// Normal-Normal closed form for continuous goals. The posterior of each
/// mean is approximated as Normal(sample mean, variance / n); the win
/// probability is the normal CDF of the standardized difference.
pub fn normal_normal(
    control_mean: f64,
    control_var: f64,
    control_n: u64,
    variant_mean: f64,
    variant_var: f64,
    variant_n: u64,
    confidence_level: f64,
) -> SplitResult<BayesianOutcome> {
    if control_n < 2 || variant_n < 2 {
        return Err(SplitError::InsufficientData(
            "Normal-Normal comparison requires at least two observations per arm".to_string(),
        ));
    }

    let diff = variant_mean - control_mean;
    let se_sq = control_var / control_n as f64 + variant_var / variant_n as f64;

    if se_sq == 0.0 {
        return Ok(BayesianOutcome {
            prob_beats_control: 0.5,
            credible_lower: diff,
            credible_upper: diff,
            difference: diff,
        });
    }
    let se = se_sq.sqrt();

    let normal = Normal::new(0.0, 1.0).expect("unit normal is valid");
    let prob = normal.cdf(diff / se);
    let z_crit = normal.inverse_cdf(0.5 + confidence_level / 2.0);

    Ok(BayesianOutcome {
        prob_beats_control: prob,
        credible_lower: diff - z_crit * se,
        credible_upper: diff + z_crit * se,
        difference: diff,
    })
}

fn posterior(successes: u64, trials: u64) -> SplitResult<Beta<f64>> {
    let alpha = 1.0 + successes as f64;
    let beta = 1.0 + (trials - successes.min(trials)) as f64;
    Beta::new(alpha, beta)
        .map_err(|e| SplitError::InsufficientData(format!("degenerate Beta posterior: {e}")))
}

#[cfg(test)]
mod tests {
    use super::*;
    use rand::SeedableRng;

    fn rng() -> rand::rngs::StdRng {
        rand::rngs::StdRng::seed_from_u64(7)
    }

    #[test]
    fn test_strong_variant_has_high_win_probability() {
        let out = beta_binomial(100, 1000, 150, 1000, 0.95, 10_000, &mut rng()).unwrap();
        assert!(out.prob_beats_control > 0.95, "p={}", out.prob_beats_control);
        assert!(out.difference > 0.0);
    }

    #[test]
    fn test_even_arms_hover_near_half() {
        let out = beta_binomial(100, 1000, 100, 1000, 0.95, 10_000, &mut rng()).unwrap();
        assert!(
            (out.prob_beats_control - 0.5).abs() < 0.05,
            "p={}",
            out.prob_beats_control
        );
    }

    #[test]
    fn test_credible_interval_brackets_difference() {
        let out = beta_binomial(100, 1000, 150, 1000, 0.95, 10_000, &mut rng()).unwrap();
        assert!(out.credible_lower <= out.difference);
        assert!(out.difference <= out.credible_upper);
    }

    #[test]
    fn test_zero_trials_rejected() {
        let err = beta_binomial(0, 0, 10, 100, 0.95, 1000, &mut rng()).unwrap_err();
        assert!(matches!(err, SplitError::InsufficientData(_)));
    }

    #[test]
    fn test_normal_normal_separated_means() {
        let out = normal_normal(10.0, 4.0, 500, 11.0, 4.0, 500, 0.95).unwrap();
        assert!(out.prob_beats_control > 0.99);
        assert!(out.credible_lower > 0.0);
    }

    #[test]
    fn test_normal_normal_identical_arms() {
        let out = normal_normal(10.0, 4.0, 500, 10.0, 4.0, 500, 0.95).unwrap();
        assert!((out.prob_beats_control - 0.5).abs() < 1e-9);
    }
}
