// src/delta.rs
//! Post-fusion recency/novelty adjustment.
//!
//! - `recency = exp(-λ · age_days)`
//! - `novelty = 1 - min(0.5, dup_penalty)`
//! - `adjusted = score · (0.7 + 0.3 · (0.5·recency + 0.5·novelty))`, clamped to `[0,1]`
//!
//! Missing metadata counts as `0`, which leaves the score unchanged.
//! Near-duplicate penalties come from `strsim::normalized_levenshtein`.

use chrono::{DateTime, Utc};
use std::collections::HashMap;
use strsim::normalized_levenshtein;

use crate::config::DeltaSection;
use crate::types::{finite_or_zero, sort_desc_stable, DocMeta, MetaMap, RankedDoc};

pub const DEFAULT_LAMBDA_PER_DAY: f64 = 0.03;
pub const DEFAULT_DUPLICATE_SIMILARITY: f64 = 0.90;

const BASE_SHARE: f64 = 0.7;
const DELTA_SHARE: f64 = 0.3;
const MAX_DUP_PENALTY: f64 = 0.5;

#[derive(Debug, Clone, Copy, PartialEq)]
pub struct DeltaProjection {
    enabled: bool,
    lambda_per_day: f64,
}

impl Default for DeltaProjection {
    fn default() -> Self {
        Self::new(DEFAULT_LAMBDA_PER_DAY)
    }
}

impl DeltaProjection {
    pub fn new(lambda_per_day: f64) -> Self {
        let lambda_per_day = if lambda_per_day.is_finite() && lambda_per_day >= 0.0 {
            lambda_per_day
        } else {
            DEFAULT_LAMBDA_PER_DAY
        };
        Self {
            enabled: true,
            lambda_per_day,
        }
    }

    /// Projection that passes scores through untouched.
    pub fn disabled() -> Self {
        Self {
            enabled: false,
            ..Self::default()
        }
    }

    pub fn from_config(cfg: &DeltaSection) -> Self {
        Self {
            enabled: cfg.enabled,
            ..Self::new(cfg.lambda_per_day)
        }
    }

    pub fn is_enabled(&self) -> bool {
        self.enabled
    }

    /// Multiplier in `[0.7, 1.0]` for one candidate.
    pub fn multiplier(&self, meta: &DocMeta) -> f64 {
        let age = meta.age_days.map(finite_or_zero).unwrap_or(0.0).max(0.0);
        let dup = meta.dup_penalty.map(finite_or_zero).unwrap_or(0.0).max(0.0);

        let recency = (-self.lambda_per_day * age).exp();
        let novelty = 1.0 - dup.min(MAX_DUP_PENALTY);
        let delta = 0.5 * recency + 0.5 * novelty;
        BASE_SHARE + DELTA_SHARE * delta
    }

    pub fn adjust(&self, score: f64, meta: &DocMeta) -> f64 {
        (finite_or_zero(score) * self.multiplier(meta)).clamp(0.0, 1.0)
    }

    /// Adjust every candidate and re-sort (stable, so ties keep fused order).
    pub fn apply(&self, mut docs: Vec<RankedDoc>, meta: &MetaMap) -> Vec<RankedDoc> {
        if !self.enabled {
            return docs;
        }
        let neutral = DocMeta::default();
        for d in docs.iter_mut() {
            d.score = self.adjust(d.score, meta.get(&d.id).unwrap_or(&neutral));
        }
        sort_desc_stable(&mut docs);
        docs
    }
}

/// Fractional days from `published` to `now`; future timestamps give `0`.
pub fn age_days_between(published: DateTime<Utc>, now: DateTime<Utc>) -> f64 {
    let secs = (now - published).num_seconds();
    (secs.max(0) as f64) / 86_400.0
}

/// Near-duplicate penalties over `(id, text)` pairs in rank order.
///
/// A candidate whose text is at least `threshold` similar (case-insensitive)
/// to an earlier one gets its best similarity as penalty; the earliest copy
/// is never penalized.
pub fn duplicate_penalties<I, S>(items: &[(I, S)], threshold: f64) -> HashMap<String, f64>
where
    I: AsRef<str>,
    S: AsRef<str>,
{
    let lowered: Vec<String> = items.iter().map(|(_, t)| t.as_ref().to_lowercase()).collect();
    let mut out = HashMap::new();

    for (i, (id, _)) in items.iter().enumerate().skip(1) {
        let best = lowered[..i]
            .iter()
            .map(|earlier| normalized_levenshtein(earlier, &lowered[i]))
            .fold(0.0_f64, f64::max);
        if best >= threshold {
            out.insert(id.as_ref().to_string(), best);
        }
    }
    out
}

/// Merge duplicate penalties into a metadata map, keeping existing ages.
pub fn merge_penalties(meta: &mut MetaMap, penalties: HashMap<String, f64>) {
    for (id, p) in penalties {
        meta.entry(id).or_default().dup_penalty = Some(p);
    }
}
