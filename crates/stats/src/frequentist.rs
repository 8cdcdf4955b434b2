//! Frequentist comparisons: two-proportion z-test for binary goals,
//! Welch's t-test for continuous goals.

use statrs::distribution::{ContinuousCDF, Normal, StudentsT};

use split_core::{SplitError, SplitResult};

/// Outcome of one variant-vs-control comparison.
#[derive(Debug, Clone, Copy)]
pub struct FrequentistOutcome {
    pub statistic: f64,
    pub p_value: f64,
    /// Confidence interval on the raw difference (variant minus control).
    pub ci_lower: f64,
    pub ci_upper: f64,
    /// Raw difference, variant minus control.
    pub difference: f64,
}

/// Two-proportion z-test via the normal approximation to the binomial.
/// The statistic uses the pooled proportion; the confidence interval uses
/// the unpooled standard error.
pub fn two_proportion_z(
    control_successes: u64,
    control_trials: u64,
    variant_successes: u64,
    variant_trials: u64,
    confidence_level: f64,
) -> SplitResult<FrequentistOutcome> {
    if control_trials == 0 || variant_trials == 0 {
        return Err(SplitError::InsufficientData(
            "two-proportion test requires trials in both arms".to_string(),
        ));
    }

    let n1 = control_trials as f64;
    let n2 = variant_trials as f64;
    let p1 = control_successes as f64 / n1;
    let p2 = variant_successes as f64 / n2;
    let diff = p2 - p1;

    let pooled = (control_successes + variant_successes) as f64 / (n1 + n2);
    let se_pooled = (pooled * (1.0 - pooled) * (1.0 / n1 + 1.0 / n2)).sqrt();

    let normal = Normal::new(0.0, 1.0).expect("unit normal is valid");

    // Degenerate arms (all conversions or none in both) carry no signal.
    if se_pooled == 0.0 {
        return Ok(FrequentistOutcome {
            statistic: 0.0,
            p_value: 1.0,
            ci_lower: diff,
            ci_upper: diff,
            difference: diff,
        });
    }

    let z = diff / se_pooled;
    let p_value = 2.0 * (1.0 - normal.cdf(z.abs()));

    let se_unpooled = (p1 * (1.0 - p1) / n1 + p2 * (1.0 - p2) / n2).sqrt();
    let z_crit = normal.inverse_cdf(0.5 + confidence_level / 2.0);

    Ok(FrequentistOutcome {
        statistic: z,
        p_value,
        ci_lower: diff - z_crit * se_unpooled,
        ci_upper: diff + z_crit * se_unpooled,
        difference: diff,
    })
}

/// Welch's t-test (unequal variances) on running aggregates, with
/// Welch-Satterthwaite degrees of freedom.
pub fn welch_t(
    control_mean: f64,
    control_var: f64,
    control_n: u64,
    variant_mean: f64,
    variant_var: f64,
    variant_n: u64,
    confidence_level: f64,
) -> SplitResult<FrequentistOutcome> {
    if control_n < 2 || variant_n < 2 {
        return Err(SplitError::InsufficientData(
            "Welch's t-test requires at least two observations per arm".to_string(),
        ));
    }

    let n1 = control_n as f64;
    let n2 = variant_n as f64;
    let diff = variant_mean - control_mean;

    let se_sq = control_var / n1 + variant_var / n2;
    if se_sq == 0.0 {
        return Ok(FrequentistOutcome {
            statistic: 0.0,
            p_value: 1.0,
            ci_lower: diff,
            ci_upper: diff,
            difference: diff,
        });
    }
    let se = se_sq.sqrt();
    let t = diff / se;

    let df = se_sq * se_sq
        / ((control_var / n1).powi(2) / (n1 - 1.0) + (variant_var / n2).powi(2) / (n2 - 1.0));

    let t_dist = StudentsT::new(0.0, 1.0, df)
        .map_err(|e| SplitError::InsufficientData(format!("degenerate t distribution: {e}")))?;

    let p_value = 2.0 * (1.0 - t_dist.cdf(t.abs()));
    let t_crit = t_dist.inverse_cdf(0.5 + confidence_level / 2.0);

    Ok(FrequentistOutcome {
        statistic: t,
        p_value,
        ci_lower: diff - t_crit * se,
        ci_upper: diff + t_crit * se,
        difference: diff,
    })
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_clear_proportion_difference_is_significant() {
        // 10% vs 15% at n=1000 per arm.
        let out = two_proportion_z(100, 1000, 150, 1000, 0.95).unwrap();
        assert!(out.p_value < 0.05, "p={}", out.p_value);
        assert!(out.statistic > 0.0);
        assert!(out.ci_lower > 0.0);
    }

    #[test]
    fn test_small_sample_noise_is_not_significant() {
        // 10% vs 12% at n=100 per arm.
        let out = two_proportion_z(10, 100, 12, 100, 0.95).unwrap();
        assert!(out.p_value > 0.05, "p={}", out.p_value);
    }

    #[test]
    fn test_identical_arms_p_value_is_one() {
        let out = two_proportion_z(50, 500, 50, 500, 0.95).unwrap();
        assert!((out.p_value - 1.0).abs() < 1e-9);
        assert_eq!(out.statistic, 0.0);
    }

    #[test]
    fn test_zero_trials_is_insufficient_data() {
        let err = two_proportion_z(0, 0, 10, 100, 0.95).unwrap_err();
        assert!(matches!(err, SplitError::InsufficientData(_)));
    }

    #[test]
    fn test_degenerate_all_converted_arms() {
        let out = two_proportion_z(100, 100, 100, 100, 0.95).unwrap();
        assert!((out.p_value - 1.0).abs() < 1e-9);
    }

    #[test]
    fn test_welch_distinguishes_separated_means() {
        let out = welch_t(10.0, 4.0, 200, 11.0, 4.0, 200, 0.95).unwrap();
        assert!(out.p_value < 0.05, "p={}", out.p_value);
        assert!(out.difference > 0.0);
    }

    #[test]
    fn test_welch_equal_means_not_significant() {
        let out = welch_t(10.0, 4.0, 200, 10.05, 4.0, 200, 0.95).unwrap();
        assert!(out.p_value > 0.05, "p={}", out.p_value);
    }

    #[test]
    fn test_welch_requires_two_observations() {
        let err = welch_t(10.0, 4.0, 1, 11.0, 4.0, 200, 0.95).unwrap_err();
        assert!(matches!(err, SplitError::InsufficientData(_)));
    }

    #[test]
    fn test_ci_contains_true_difference() {
        let out = two_proportion_z(100, 1000, 150, 1000, 0.95).unwrap();
        assert!(out.ci_lower <= 0.05 && 0.05 <= out.ci_upper);
    }
}
