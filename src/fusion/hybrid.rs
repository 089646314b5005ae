//! Convex blend of the calibrated power mean and the rank-based RRF score.

/// `alpha · wpm + (1 − alpha) · rrf_norm`, with `rrf_norm` from
/// [`rrf_normalized`](super::rrf::rrf_normalized). `alpha` is clamped to `[0,1]`.
pub fn blend(wpm: f64, rrf_norm: f64, alpha: f64) -> f64 {
    let alpha = if alpha.is_finite() {
        alpha.clamp(0.0, 1.0)
    } else {
        0.0
    };
    alpha * wpm + (1.0 - alpha) * rrf_norm
}
