// src/types.rs
//! Request-scoped data model shared by calibration, fusion, and reranking.
//!
//! Everything here is plain data. Per-request values (`RankingParams`,
//! `RerankParams`, `Budget`) are immutable once built and are passed
//! explicitly through the call chain.

use serde::{Deserialize, Serialize};
use std::collections::HashMap;
use std::sync::Arc;
use std::time::Duration;
use tokio::time::Instant;

use crate::config::FusionConfig;
use crate::weights::SourceWeights;

pub const DEFAULT_RRF_K: u32 = 60;
pub const DEFAULT_WINDOW_SIZE: usize = 50;

/// One candidate as returned by a retrieval source.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct SourceDoc {
    pub id: String,
    /// Source-native score; scale differs per source.
    #[serde(default, rename = "rawScore", alias = "raw_score")]
    pub raw_score: Option<f64>,
}

impl SourceDoc {
    pub fn new(id: impl Into<String>) -> Self {
        Self {
            id: id.into(),
            raw_score: None,
        }
    }

    pub fn scored(id: impl Into<String>, raw_score: f64) -> Self {
        Self {
            id: id.into(),
            raw_score: Some(raw_score),
        }
    }
}

/// Ranked output of one retrieval source. `docs[0]` is rank 1.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct SourceBundle {
    #[serde(rename = "type")]
    pub source_type: String,
    #[serde(default)]
    pub docs: Vec<SourceDoc>,
}

impl SourceBundle {
    pub fn new(source_type: impl Into<String>, docs: Vec<SourceDoc>) -> Self {
        Self {
            source_type: source_type.into(),
            docs,
        }
    }

    /// Bundle from bare ids, in rank order.
    pub fn from_ids<I, S>(source_type: impl Into<String>, ids: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        Self::new(source_type, ids.into_iter().map(SourceDoc::new).collect())
    }
}

/// Fused output row. Callers may rely on `id` and `score` only.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct RankedDoc {
    pub id: String,
    pub score: f64,
}

impl RankedDoc {
    pub fn new(id: impl Into<String>, score: f64) -> Self {
        Self {
            id: id.into(),
            score,
        }
    }
}

/// Per-request fusion parameters.
#[derive(Debug, Clone)]
pub struct RankingParams {
    pub rrf_k: u32,
    pub window_size: usize,
    weights: Arc<SourceWeights>,
}

impl RankingParams {
    pub fn new(rrf_k: u32, window_size: usize, weights: Arc<SourceWeights>) -> Self {
        Self {
            rrf_k: rrf_k.max(1),
            window_size: window_size.max(1),
            weights,
        }
    }

    /// Params with uniform weight 1.0 for every source type.
    pub fn uniform(rrf_k: u32, window_size: usize) -> Self {
        Self::new(rrf_k, window_size, Arc::new(SourceWeights::default()))
    }

    /// Params with explicit `(type, weight)` pairs; unknown types get 1.0.
    pub fn with_weights<'a, I>(rrf_k: u32, window_size: usize, pairs: I) -> Self
    where
        I: IntoIterator<Item = (&'a str, f64)>,
    {
        Self::new(rrf_k, window_size, Arc::new(SourceWeights::from_pairs(pairs)))
    }

    pub fn from_config(cfg: &FusionConfig) -> Self {
        Self::new(
            cfg.fusion.rrf_k,
            cfg.fusion.window_size,
            Arc::new(cfg.weights.clone()),
        )
    }

    /// Base weight for a source type, always finite and `>= 0`.
    pub fn weight_of(&self, source_type: &str) -> f64 {
        self.weights.weight_for(source_type)
    }

    /// Alias-resolved canonical name of a source type.
    pub fn canonical(&self, source_type: &str) -> String {
        self.weights.canonical(source_type)
    }

    pub fn weights(&self) -> &SourceWeights {
        &self.weights
    }
}

impl Default for RankingParams {
    fn default() -> Self {
        Self::uniform(DEFAULT_RRF_K, DEFAULT_WINDOW_SIZE)
    }
}

/// Wall-clock budget of one inbound request.
#[derive(Debug, Clone, Copy)]
pub struct Budget {
    deadline: Instant,
}

impl Budget {
    pub fn until(deadline: Instant) -> Self {
        Self { deadline }
    }

    pub fn from_now(timeout: Duration) -> Self {
        Self {
            deadline: Instant::now() + timeout,
        }
    }

    pub fn from_millis(ms: u64) -> Self {
        Self::from_now(Duration::from_millis(ms))
    }

    pub fn deadline(&self) -> Instant {
        self.deadline
    }

    /// `max(0, deadline - now)`.
    pub fn remaining(&self) -> Duration {
        self.deadline.saturating_duration_since(Instant::now())
    }

    pub fn remaining_ms(&self) -> u64 {
        u64::try_from(self.remaining().as_millis()).unwrap_or(u64::MAX)
    }

    pub fn expired(&self) -> bool {
        self.remaining().is_zero()
    }
}

/// Parameters for the optional expensive rerank stage.
#[derive(Debug, Clone)]
pub struct RerankParams {
    pub query: String,
    /// Number of results wanted; `0` keeps every candidate.
    pub target_count: usize,
    pub budget: Budget,
}

impl RerankParams {
    pub fn new(query: impl Into<String>, target_count: usize, budget: Budget) -> Self {
        Self {
            query: query.into(),
            target_count,
            budget,
        }
    }
}

/// Optional per-candidate metadata consumed by delta projection.
#[derive(Debug, Clone, Copy, Default, PartialEq, Serialize, Deserialize)]
pub struct DocMeta {
    #[serde(default)]
    pub age_days: Option<f64>,
    #[serde(default)]
    pub dup_penalty: Option<f64>,
}

pub type MetaMap = HashMap<String, DocMeta>;

/// Replace NaN/±inf with `0.0`.
pub(crate) fn finite_or_zero(x: f64) -> f64 {
    if x.is_finite() {
        x
    } else {
        0.0
    }
}

/// Stable descending sort by score. Equal scores keep their input order,
/// which callers arrange to be first-seen order.
pub(crate) fn sort_desc_stable(docs: &mut [RankedDoc]) {
    docs.sort_by(|a, b| b.score.total_cmp(&a.score));
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn params_clamp_k_and_window() {
        let p = RankingParams::uniform(0, 0);
        assert_eq!(p.rrf_k, 1);
        assert_eq!(p.window_size, 1);
    }

    #[test]
    fn sort_keeps_first_seen_on_ties() {
        let mut docs = vec![
            RankedDoc::new("a", 0.5),
            RankedDoc::new("b", 0.9),
            RankedDoc::new("c", 0.5),
        ];
        sort_desc_stable(&mut docs);
        let ids: Vec<_> = docs.iter().map(|d| d.id.as_str()).collect();
        assert_eq!(ids, ["b", "a", "c"]);
    }

    #[test]
    fn bundle_json_shape() {
        let b: SourceBundle = serde_json::from_str(
            r#"{"type":"web","docs":[{"id":"A","rawScore":3.5},{"id":"B"}]}"#,
        )
        .unwrap();
        assert_eq!(b.source_type, "web");
        assert_eq!(b.docs[0].raw_score, Some(3.5));
        assert_eq!(b.docs[1].raw_score, None);
    }

    #[tokio::test]
    async fn budget_remaining_saturates_at_zero() {
        let b = Budget::until(Instant::now() - Duration::from_millis(5));
        assert_eq!(b.remaining(), Duration::ZERO);
        assert!(b.expired());
        assert_eq!(b.remaining_ms(), 0);
    }
}
