//! Weighted Power Mean over calibrated per-source scores.
//!
//! `M_p = (Σ w·x^p / Σ w)^(1/p)`; `p → 0` is the geometric mean,
//! `p = 1` the arithmetic mean, large `p` approaches the max.

/// Guard for `ln(0)` and for `0^p` with negative `p`.
pub const WPM_EPSILON: f64 = 1e-9;

/// `|p|` below this is treated as the geometric-mean limit.
const GEOMETRIC_P: f64 = 1e-6;

/// Weighted power mean of `(x, w)` terms, `x` expected in `[0,1]`.
///
/// Terms with non-positive or non-finite weight are ignored; no usable
/// terms (or `Σw == 0`) yields `0.0`. Non-finite `x` counts as `0.0`.
pub fn weighted_power_mean(terms: &[(f64, f64)], p: f64) -> f64 {
    let usable = terms
        .iter()
        .filter(|(_, w)| w.is_finite() && *w > 0.0)
        .map(|&(x, w)| (if x.is_finite() { x.clamp(0.0, 1.0) } else { 0.0 }, w));

    let mut sum_w = 0.0;
    let mut acc = 0.0;

    if p.abs() < GEOMETRIC_P {
        for (x, w) in usable {
            sum_w += w;
            acc += w * x.max(WPM_EPSILON).ln();
        }
        if sum_w <= 0.0 {
            return 0.0;
        }
        return finite_unit((acc / sum_w).exp());
    }

    for (x, w) in usable {
        let x = if p < 0.0 { x.max(WPM_EPSILON) } else { x };
        sum_w += w;
        acc += w * x.powf(p);
    }
    if sum_w <= 0.0 {
        return 0.0;
    }
    finite_unit((acc / sum_w).powf(1.0 / p))
}

fn finite_unit(x: f64) -> f64 {
    if x.is_finite() {
        x.clamp(0.0, 1.0)
    } else {
        0.0
    }
}
