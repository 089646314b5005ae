// tests/pipeline_e2e.rs
//
// End-to-end: calibrate → fuse → delta → window → guarded rerank.

use async_trait::async_trait;
use once_cell::sync::Lazy;
use std::collections::HashMap;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Arc;
use std::time::Duration;

use rankfuse::calibrate::MinMaxCalibrator;
use rankfuse::rerank::{limit_stable, normalize_top_n, LexicalOverlapScorer};
use rankfuse::{
    Budget, CrossEncoderReranker, DocMeta, FusionConfig, MetaMap, RankedDoc, RankingPipeline,
    ReadinessState, Reranker, RerankParams, SourceBundle, SourceDoc,
};

static BUNDLES: Lazy<Vec<SourceBundle>> = Lazy::new(|| {
    vec![
        SourceBundle::new(
            "bm25",
            vec![
                SourceDoc::scored("fed-minutes", 14.2),
                SourceDoc::scored("oil-report", 9.8),
                SourceDoc::scored("fed-rates", 7.1),
            ],
        ),
        SourceBundle::new(
            "embedding",
            vec![
                SourceDoc::scored("fed-rates", 0.91),
                SourceDoc::scored("fed-minutes", 0.88),
                SourceDoc::scored("jobs-data", 0.52),
            ],
        ),
    ]
});

fn texts() -> HashMap<String, String> {
    HashMap::from([
        ("fed-minutes".to_string(), "Fed minutes show split on rates".to_string()),
        ("fed-rates".to_string(), "Fed holds rates steady".to_string()),
        ("oil-report".to_string(), "Oil inventories climb".to_string()),
        ("jobs-data".to_string(), "Payrolls beat estimates".to_string()),
    ])
}

/// Counts executions and returns candidates reversed.
struct Reverse(AtomicUsize);

#[async_trait]
impl Reranker for Reverse {
    async fn rerank(
        &self,
        candidates: &[RankedDoc],
        params: &RerankParams,
    ) -> anyhow::Result<Vec<RankedDoc>> {
        self.0.fetch_add(1, Ordering::SeqCst);
        tokio::time::sleep(Duration::from_millis(50)).await;
        let mut out: Vec<_> = candidates.iter().rev().cloned().collect();
        out.truncate(normalize_top_n(params.target_count, candidates.len()));
        Ok(out)
    }
}

/// Returns every candidate reversed plus rows nobody asked for.
struct Padded;

#[async_trait]
impl Reranker for Padded {
    async fn rerank(
        &self,
        candidates: &[RankedDoc],
        _params: &RerankParams,
    ) -> anyhow::Result<Vec<RankedDoc>> {
        let mut out: Vec<_> = candidates
            .iter()
            .rev()
            .map(|d| RankedDoc::new(d.id.clone(), f64::NAN))
            .collect();
        out.push(RankedDoc::new("ghost", 9.0));
        Ok(out)
    }
}

#[tokio::test]
async fn full_pipeline_ranks_and_reranks() {
    let cfg = FusionConfig::default();
    let reranker = Arc::new(CrossEncoderReranker::with_min_per_item(
        LexicalOverlapScorer::new(texts()),
        0,
    ));
    let pipeline =
        RankingPipeline::new(cfg, Arc::new(MinMaxCalibrator::new()), None).with_reranker(reranker);

    let fused = pipeline.fuse(&BUNDLES, &pipeline.params(), &MetaMap::new());
    assert_eq!(fused.len(), 4);
    assert!(fused.iter().all(|d| (0.0..=1.0).contains(&d.score)));

    let params = RerankParams::new("fed rates", 2, Budget::from_millis(2_000));
    let out = pipeline.rerank(&fused, &params).await;
    assert_eq!(out.len(), 2);
    // both tokens appear in each of the "fed" documents
    let ids: Vec<_> = out.iter().map(|d| d.id.as_str()).collect();
    assert!(ids.contains(&"fed-rates") && ids.contains(&"fed-minutes"));
}

#[tokio::test]
async fn stale_candidate_is_pushed_down() {
    let pipeline = RankingPipeline::new(
        FusionConfig::default(),
        Arc::new(MinMaxCalibrator::new()),
        None,
    );
    let bundles = [SourceBundle::from_ids("web", ["old", "new"])];
    let mut meta = MetaMap::new();
    meta.insert(
        "old".into(),
        DocMeta {
            age_days: Some(400.0),
            dup_penalty: Some(0.5),
        },
    );
    let out = pipeline.fuse(&bundles, &pipeline.params(), &meta);
    assert_eq!(out[0].id, "new");
}

#[tokio::test]
async fn stale_duplicate_loses_even_when_agreed_on_everywhere() {
    let pipeline = RankingPipeline::new(
        FusionConfig::default(),
        Arc::new(MinMaxCalibrator::new()),
        None,
    );
    let bundles = [
        SourceBundle::from_ids("web", ["X", "Y"]),
        SourceBundle::from_ids("bm25", ["X", "Y"]),
        SourceBundle::from_ids("news", ["X", "Y"]),
    ];
    let mut meta = MetaMap::new();
    meta.insert(
        "X".into(),
        DocMeta {
            age_days: Some(365.0),
            dup_penalty: Some(0.5),
        },
    );
    let out = pipeline.fuse(&bundles, &pipeline.params(), &meta);
    let ids: Vec<_> = out.iter().map(|d| d.id.as_str()).collect();
    assert_eq!(ids, ["Y", "X"]);
    assert!(out[0].score < 1.0);
    assert!(out[1].score < out[0].score);
}

#[tokio::test]
async fn sloppy_reranker_is_held_to_target_count() {
    let pipeline = RankingPipeline::new(
        FusionConfig::default(),
        Arc::new(MinMaxCalibrator::new()),
        None,
    )
    .with_reranker(Arc::new(Padded));
    let fused = pipeline.fuse(&BUNDLES, &pipeline.params(), &MetaMap::new());

    let params = RerankParams::new("fed", 2, Budget::from_millis(2_000));
    let out = pipeline.rerank(&fused, &params).await;
    assert_eq!(out.len(), 2);
    assert!(out.iter().all(|d| d.score.is_finite()));
    assert!(out.iter().all(|d| fused.iter().any(|f| f.id == d.id)));
    assert_eq!(out[0].id, fused[fused.len() - 1].id);
}

#[tokio::test]
async fn readiness_changes_source_balance() {
    let state = Arc::new(ReadinessState::new(384));
    let pipeline = RankingPipeline::new(
        toml_config("[fusion]\nstrategy = \"rrf\""),
        Arc::new(MinMaxCalibrator::new()),
        Some(state.clone()),
    );
    let bundles = [
        SourceBundle::from_ids("web", ["w"]),
        SourceBundle::from_ids("vector", ["v"]),
    ];
    let params = pipeline.params();

    assert_eq!(pipeline.fuse(&bundles, &params, &MetaMap::new())[0].id, "w");
    state.record(250);
    assert_eq!(pipeline.fuse(&bundles, &params, &MetaMap::new())[0].id, "v");
}

#[tokio::test]
async fn expired_budget_falls_back_to_fused_order() {
    let inner = Arc::new(Reverse(AtomicUsize::new(0)));
    let pipeline = RankingPipeline::new(
        FusionConfig::default(),
        Arc::new(MinMaxCalibrator::new()),
        None,
    )
    .with_reranker(inner.clone());

    let fused = pipeline.fuse(&BUNDLES, &pipeline.params(), &MetaMap::new());
    let params = RerankParams::new("fed", 3, Budget::from_millis(10));
    let out = pipeline.rerank(&fused, &params).await;

    assert_eq!(out, limit_stable(&fused, 3));
    assert_eq!(inner.0.load(Ordering::SeqCst), 0);
}

#[tokio::test(flavor = "multi_thread", worker_threads = 4)]
async fn identical_concurrent_reranks_execute_once() {
    let inner = Arc::new(Reverse(AtomicUsize::new(0)));
    let pipeline = Arc::new(
        RankingPipeline::new(
            FusionConfig::default(),
            Arc::new(MinMaxCalibrator::new()),
            None,
        )
        .with_reranker(inner.clone()),
    );
    let fused = pipeline.fuse(&BUNDLES, &pipeline.params(), &MetaMap::new());

    let handles: Vec<_> = (0..6)
        .map(|i| {
            let pipeline = pipeline.clone();
            let fused = fused.clone();
            // same logical query, different surface form
            let query = if i % 2 == 0 { "Fed  Rates" } else { " fed rates " };
            tokio::spawn(async move {
                let params = RerankParams::new(query, 0, Budget::from_millis(2_000));
                pipeline.rerank(&fused, &params).await
            })
        })
        .collect();

    let mut outs = Vec::new();
    for h in handles {
        outs.push(h.await.unwrap());
    }
    assert_eq!(inner.0.load(Ordering::SeqCst), 1);
    let reversed: Vec<_> = fused.iter().rev().cloned().collect();
    assert!(outs.iter().all(|o| o == &reversed));
}

fn toml_config(s: &str) -> FusionConfig {
    FusionConfig::from_toml_str(s).unwrap()
}
