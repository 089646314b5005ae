// src/rerank.rs
//! Optional expensive second stage over the fused top-N.
//!
//! - [`PairScorer`]: scores one `(query, candidate)` pair (a cross-encoder in
//!   production, [`LexicalOverlapScorer`] in the demo binary).
//! - [`CrossEncoderReranker`]: scores candidates one by one under the request
//!   budget and sorts by score, then by original position.
//! - [`GuardedReranker`]: single-flight + concurrency guard around any
//!   [`Reranker`]; every denial or failure degrades to [`limit_stable`].

use async_trait::async_trait;
use std::collections::{HashMap, HashSet};
use std::convert::Infallible;
use std::sync::Arc;
use std::time::Duration;
use tracing::{debug, warn};

use crate::config::FusionConfig;
use crate::error::RerankError;
use crate::guard::ConcurrencyGuard;
use crate::single_flight::SingleFlight;
use crate::telemetry::{anon_hash, digest_parts};
use crate::types::{finite_or_zero, RankedDoc, RerankParams};

pub const DEFAULT_MIN_PER_ITEM_MS: u64 = 30;

#[async_trait]
pub trait Reranker: Send + Sync {
    async fn rerank(
        &self,
        candidates: &[RankedDoc],
        params: &RerankParams,
    ) -> anyhow::Result<Vec<RankedDoc>>;

    fn name(&self) -> &'static str {
        "reranker"
    }
}

#[async_trait]
pub trait PairScorer: Send + Sync {
    async fn score_pair(&self, query: &str, doc_id: &str) -> anyhow::Result<f64>;
}

/// `top_n == 0` means "keep all".
pub fn normalize_top_n(top_n: usize, len: usize) -> usize {
    if top_n == 0 {
        len
    } else {
        top_n.min(len)
    }
}

/// Cheap fallback: the first `top_n` candidates in their current order.
pub fn limit_stable(docs: &[RankedDoc], top_n: usize) -> Vec<RankedDoc> {
    docs[..normalize_top_n(top_n, docs.len())].to_vec()
}

pub struct CrossEncoderReranker<S> {
    scorer: S,
    min_per_item: Duration,
}

impl<S: PairScorer> CrossEncoderReranker<S> {
    pub fn new(scorer: S) -> Self {
        Self::with_min_per_item(scorer, DEFAULT_MIN_PER_ITEM_MS)
    }

    /// Budget that must remain before each pair is scored.
    pub fn with_min_per_item(scorer: S, min_per_item_ms: u64) -> Self {
        Self {
            scorer,
            min_per_item: Duration::from_millis(min_per_item_ms),
        }
    }
}

#[async_trait]
impl<S: PairScorer> Reranker for CrossEncoderReranker<S> {
    async fn rerank(
        &self,
        candidates: &[RankedDoc],
        params: &RerankParams,
    ) -> anyhow::Result<Vec<RankedDoc>> {
        let total = candidates.len();
        let mut scored: Vec<(usize, RankedDoc)> = Vec::with_capacity(total);

        for (pos, doc) in candidates.iter().enumerate() {
            if params.budget.remaining() < self.min_per_item {
                return Err(RerankError::BudgetExhausted { scored: pos, total }.into());
            }
            let score = match self.scorer.score_pair(&params.query, &doc.id).await {
                Ok(s) => finite_or_zero(s),
                Err(e) => {
                    debug!(target: "rankfuse::rerank", doc = %doc.id, error = %e, "pair scoring failed");
                    0.0
                }
            };
            scored.push((pos, RankedDoc::new(doc.id.clone(), score)));
        }

        scored.sort_by(|(pa, a), (pb, b)| b.score.total_cmp(&a.score).then(pa.cmp(pb)));
        scored.truncate(normalize_top_n(params.target_count, total));
        Ok(scored.into_iter().map(|(_, d)| d).collect())
    }

    fn name(&self) -> &'static str {
        "cross_encoder"
    }
}

/// Token-overlap stand-in for a cross-encoder: the share of query tokens
/// present in the candidate's text (or its id when no text is known).
#[derive(Debug, Clone, Default)]
pub struct LexicalOverlapScorer {
    texts: HashMap<String, String>,
}

impl LexicalOverlapScorer {
    pub fn new(texts: HashMap<String, String>) -> Self {
        Self { texts }
    }
}

fn tokens(s: &str) -> HashSet<String> {
    s.split(|c: char| !c.is_alphanumeric())
        .filter(|t| !t.is_empty())
        .map(str::to_lowercase)
        .collect()
}

#[async_trait]
impl PairScorer for LexicalOverlapScorer {
    async fn score_pair(&self, query: &str, doc_id: &str) -> anyhow::Result<f64> {
        let q = tokens(query);
        if q.is_empty() {
            return Ok(0.0);
        }
        let text = self.texts.get(doc_id).map(String::as_str).unwrap_or(doc_id);
        let d = tokens(text);
        Ok(q.intersection(&d).count() as f64 / q.len() as f64)
    }
}

/// Lowercase, trim, and collapse internal whitespace.
pub fn normalize_query(q: &str) -> String {
    q.split_whitespace()
        .map(str::to_lowercase)
        .collect::<Vec<_>>()
        .join(" ")
}

/// Deterministic single-flight key for a rerank request.
pub fn dedup_key(query: &str, target_count: usize, candidates: &[RankedDoc]) -> String {
    let q = normalize_query(query);
    let target = target_count.to_string();
    let parts = [q.as_str(), target.as_str()]
        .into_iter()
        .chain(candidates.iter().map(|d| d.id.as_str()));
    format!("rerank:{}", digest_parts(parts))
}

/// Hold a reranker's output to the stage contract: only input ids, each once,
/// finite scores, at most `target_count` rows.
fn conform(out: Vec<RankedDoc>, candidates: &[RankedDoc], target_count: usize) -> Vec<RankedDoc> {
    let known: HashSet<&str> = candidates.iter().map(|d| d.id.as_str()).collect();
    let mut seen: HashSet<String> = HashSet::with_capacity(out.len());
    let before = out.len();
    let mut kept: Vec<RankedDoc> = out
        .into_iter()
        .filter(|d| known.contains(d.id.as_str()) && seen.insert(d.id.clone()))
        .map(|d| RankedDoc::new(d.id, finite_or_zero(d.score)))
        .collect();
    kept.truncate(normalize_top_n(target_count, candidates.len()));
    if kept.len() < before {
        debug!(target: "rankfuse::rerank", before, after = kept.len(), "reranker output trimmed");
    }
    kept
}

/// Guarded, de-duplicated entry point for the rerank stage.
pub struct GuardedReranker {
    inner: Arc<dyn Reranker>,
    guard: ConcurrencyGuard,
    flights: SingleFlight<Vec<RankedDoc>>,
}

impl std::fmt::Debug for GuardedReranker {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("GuardedReranker")
            .field("inner", &self.inner.name())
            .field("guard", &self.guard)
            .field("flights", &self.flights)
            .finish()
    }
}

impl GuardedReranker {
    pub fn new(
        inner: Arc<dyn Reranker>,
        guard: ConcurrencyGuard,
        flights: SingleFlight<Vec<RankedDoc>>,
    ) -> Self {
        Self {
            inner,
            guard,
            flights,
        }
    }

    pub fn from_config(inner: Arc<dyn Reranker>, cfg: &FusionConfig) -> Self {
        Self::new(
            inner,
            ConcurrencyGuard::from_config(&cfg.guard),
            SingleFlight::from_config(&cfg.single_flight),
        )
    }

    pub fn guard(&self) -> &ConcurrencyGuard {
        &self.guard
    }

    /// Never fails: budget shortfall, saturation, reranker errors and waits
    /// that time out all yield `limit_stable(top_n, target_count)`.
    pub async fn rerank(&self, top_n: &[RankedDoc], params: &RerankParams) -> Vec<RankedDoc> {
        if top_n.is_empty() {
            return Vec::new();
        }

        let key = dedup_key(&params.query, params.target_count, top_n);
        let inner = Arc::clone(&self.inner);
        let guard = self.guard.clone();
        let candidates = top_n.to_vec();
        let task_params = params.clone();

        let task = move || async move {
            let remaining = task_params.budget.remaining();
            let out = guard
                .run_with_budget(
                    remaining,
                    || inner.rerank(&candidates, &task_params),
                    || limit_stable(&candidates, task_params.target_count),
                )
                .await;
            Ok::<_, Infallible>(conform(out, &candidates, task_params.target_count))
        };

        let wait = self.flights.wait_timeout().min(params.budget.remaining());
        match self.flights.run_with_timeout(&key, wait, task).await {
            Ok(out) => {
                debug!(
                    target: "rankfuse::rerank",
                    query = %anon_hash(&params.query),
                    candidates = top_n.len(),
                    returned = out.len(),
                    "rerank done"
                );
                out
            }
            Err(e) => {
                warn!(target: "rankfuse::rerank", query = %anon_hash(&params.query), error = %e, "rerank fell back");
                limit_stable(top_n, params.target_count)
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::types::Budget;

    struct Fixed(HashMap<&'static str, f64>);

    #[async_trait]
    impl PairScorer for Fixed {
        async fn score_pair(&self, _query: &str, doc_id: &str) -> anyhow::Result<f64> {
            self.0
                .get(doc_id)
                .copied()
                .ok_or_else(|| anyhow::anyhow!("no score for {doc_id}"))
        }
    }

    fn docs(ids: &[&str]) -> Vec<RankedDoc> {
        ids.iter().map(|id| RankedDoc::new(*id, 0.1)).collect()
    }

    #[test]
    fn limit_stable_zero_keeps_all() {
        let d = docs(&["a", "b", "c"]);
        assert_eq!(limit_stable(&d, 0).len(), 3);
        assert_eq!(limit_stable(&d, 2).len(), 2);
        assert_eq!(limit_stable(&d, 9).len(), 3);
        assert!(limit_stable(&[], 4).is_empty());
    }

    #[test]
    fn dedup_key_normalizes_query() {
        let d = docs(&["a", "b"]);
        assert_eq!(
            dedup_key("  Rate   Hike ", 5, &d),
            dedup_key("rate hike", 5, &d)
        );
        assert_ne!(dedup_key("rate hike", 5, &d), dedup_key("rate hike", 4, &d));
        assert_ne!(
            dedup_key("rate hike", 5, &d),
            dedup_key("rate hike", 5, &docs(&["b", "a"]))
        );
        assert!(dedup_key("q", 1, &d).starts_with("rerank:"));
    }

    #[tokio::test]
    async fn cross_encoder_sorts_and_breaks_ties_by_position() {
        let scorer = Fixed(HashMap::from([("a", 0.2), ("b", 0.9), ("c", 0.2)]));
        let r = CrossEncoderReranker::with_min_per_item(scorer, 0);
        let params = RerankParams::new("q", 0, Budget::from_millis(5_000));
        let out = r.rerank(&docs(&["a", "b", "c"]), &params).await.unwrap();
        let ids: Vec<_> = out.iter().map(|d| d.id.as_str()).collect();
        assert_eq!(ids, ["b", "a", "c"]);
    }

    #[tokio::test]
    async fn failing_pair_scores_zero() {
        let scorer = Fixed(HashMap::from([("a", 0.4)]));
        let r = CrossEncoderReranker::with_min_per_item(scorer, 0);
        let params = RerankParams::new("q", 1, Budget::from_millis(5_000));
        let out = r.rerank(&docs(&["x", "a"]), &params).await.unwrap();
        assert_eq!(out, vec![RankedDoc::new("a", 0.4)]);
    }

    #[tokio::test]
    async fn exhausted_budget_is_an_error() {
        let r = CrossEncoderReranker::new(Fixed(HashMap::new()));
        let params = RerankParams::new("q", 1, Budget::from_millis(0));
        let err = r.rerank(&docs(&["a"]), &params).await.unwrap_err();
        assert_eq!(
            err.downcast_ref::<RerankError>(),
            Some(&RerankError::BudgetExhausted { scored: 0, total: 1 })
        );
    }

    #[tokio::test]
    async fn lexical_overlap_uses_text() {
        let s = LexicalOverlapScorer::new(HashMap::from([(
            "d1".to_string(),
            "Fed holds rates steady".to_string(),
        )]));
        assert_eq!(s.score_pair("fed rates", "d1").await.unwrap(), 1.0);
        assert_eq!(s.score_pair("fed rates", "unknown").await.unwrap(), 0.0);
        assert_eq!(s.score_pair("   ", "d1").await.unwrap(), 0.0);
    }

    #[tokio::test]
    async fn guarded_falls_back_on_low_budget() {
        let inner = Arc::new(CrossEncoderReranker::with_min_per_item(
            Fixed(HashMap::from([("b", 1.0)])),
            0,
        ));
        let g = GuardedReranker::new(
            inner,
            ConcurrencyGuard::new(1, 10, 120),
            SingleFlight::new(2, 1_000),
        );
        let d = docs(&["a", "b", "c"]);

        let low = RerankParams::new("q", 2, Budget::from_millis(50));
        assert_eq!(g.rerank(&d, &low).await, limit_stable(&d, 2));

        let ok = RerankParams::new("q", 2, Budget::from_millis(5_000));
        let out = g.rerank(&d, &ok).await;
        assert_eq!(out[0].id, "b");
    }

    /// Ignores the target count and invents ids.
    struct Sloppy;

    #[async_trait]
    impl Reranker for Sloppy {
        async fn rerank(
            &self,
            candidates: &[RankedDoc],
            _params: &RerankParams,
        ) -> anyhow::Result<Vec<RankedDoc>> {
            let mut out: Vec<_> = candidates.iter().rev().cloned().collect();
            out.push(RankedDoc::new("ghost", f64::NAN));
            out.push(RankedDoc::new("c", f64::INFINITY));
            Ok(out)
        }
    }

    #[tokio::test]
    async fn guarded_output_keeps_stage_contract() {
        let g = GuardedReranker::new(
            Arc::new(Sloppy),
            ConcurrencyGuard::new(1, 10, 0),
            SingleFlight::new(2, 1_000),
        );
        let d = vec![
            RankedDoc::new("a", 0.3),
            RankedDoc::new("b", f64::NAN),
            RankedDoc::new("c", 0.1),
        ];

        let out = g.rerank(&d, &RerankParams::new("q", 2, Budget::from_millis(5_000))).await;
        assert_eq!(out, vec![RankedDoc::new("c", 0.1), RankedDoc::new("b", 0.0)]);

        let all = g.rerank(&d, &RerankParams::new("q", 0, Budget::from_millis(5_000))).await;
        let ids: Vec<_> = all.iter().map(|d| d.id.as_str()).collect();
        assert_eq!(ids, ["c", "b", "a"]);
        assert!(all.iter().all(|d| d.score.is_finite()));
    }
}
