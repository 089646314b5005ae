//! Weighted Reciprocal Rank Fusion: `score = Σ w_source / (k + rank)`.
//!
//! Only ranks matter, so scores from different sources never need to be
//! comparable. Larger `k` flattens the advantage of top positions.

/// Contribution of one candidate at 1-based `rank` in a source of weight `w`.
pub fn rrf_contribution(weight: f64, k: u32, rank: usize) -> f64 {
    weight / (f64::from(k) + rank as f64)
}

/// Rescale a summed RRF score onto `[0,1]`: `rrf·k / total_weight`, where
/// `total_weight` is the summed weight of every source in the request. A
/// candidate ranked first everywhere maps to `k / (k + 1)`.
pub fn rrf_normalized(rrf: f64, k: u32, total_weight: f64) -> f64 {
    let scaled = rrf * f64::from(k);
    let scaled = if total_weight > 0.0 && total_weight.is_finite() {
        scaled / total_weight
    } else {
        scaled
    };
    scaled.clamp(0.0, 1.0)
}
