//! Alpha-spending boundaries for sequential tests. Repeated interim looks
//! inflate the false-positive rate unless each look pays a stricter
//! threshold; the O'Brien-Fleming schedule spends almost nothing early and
//! relaxes toward the nominal alpha at the final look.

use statrs::distribution::{ContinuousCDF, Normal};

/// Z-scale boundary for interim look `look` of `max_looks`:
/// `z_crit(alpha) * sqrt(max_looks / look)`. Looks past the planned maximum
/// keep the final boundary.
pub fn obrien_fleming_boundary(alpha: f64, look: u32, max_looks: u32) -> f64 {
    let normal = Normal::new(0.0, 1.0).expect("unit normal is valid");
    let z_final = normal.inverse_cdf(1.0 - alpha / 2.0);

    let look = look.max(1).min(max_looks.max(1));
    z_final * (max_looks.max(1) as f64 / look as f64).sqrt()
}

/// The two-sided p-value threshold equivalent to the boundary at this look.
pub fn adjusted_alpha(alpha: f64, look: u32, max_looks: u32) -> f64 {
    let normal = Normal::new(0.0, 1.0).expect("unit normal is valid");
    let boundary = obrien_fleming_boundary(alpha, look, max_looks);
    2.0 * (1.0 - normal.cdf(boundary))
}
