//! rankfuse demo: fuse a JSON ranking request and print the result.
//!
//! Usage: `rankfuse [request.json]` (reads stdin when no path is given), or
//! `rankfuse --lines` to rank one request per stdin line while picking up
//! edits to the config file between requests.
//!
//! Request shape:
//! ```json
//! {
//!   "query": "fed rate decision",
//!   "bundles": [{"type": "web", "docs": [{"id": "A", "rawScore": 1.2}]}],
//!   "texts": {"A": "Fed holds rates"},
//!   "meta": {"A": {"age_days": 2.0}},
//!   "target_count": 5,
//!   "budget_ms": 500
//! }
//! ```

use anyhow::Context;
use serde::Deserialize;
use std::collections::{HashMap, HashSet};
use std::io::{BufRead, Read};
use std::sync::Arc;

use rankfuse::delta::{duplicate_penalties, merge_penalties};
use rankfuse::metrics::install_prometheus;
use rankfuse::rerank::LexicalOverlapScorer;
use rankfuse::telemetry::{anon_hash, init_tracing};
use rankfuse::{
    Budget, CrossEncoderReranker, FusionConfig, HotReloadConfig, MetaMap, RankedDoc,
    RankingPipeline, RerankParams, SoftClampCalibrator, SourceBundle,
};

const DEFAULT_BUDGET_MS: u64 = 500;
const ENV_PRINT_METRICS: &str = "RANKFUSE_PRINT_METRICS";
const LINES_FLAG: &str = "--lines";

#[derive(Debug, Deserialize)]
struct RankRequest {
    #[serde(default)]
    query: String,
    #[serde(default)]
    bundles: Vec<SourceBundle>,
    /// Candidate text by id; feeds the lexical scorer and duplicate detection.
    #[serde(default)]
    texts: HashMap<String, String>,
    #[serde(default)]
    meta: MetaMap,
    #[serde(default)]
    target_count: usize,
    #[serde(default)]
    budget_ms: Option<u64>,
}

fn read_request() -> anyhow::Result<RankRequest> {
    let raw = match std::env::args().nth(1) {
        Some(path) => std::fs::read_to_string(&path)
            .with_context(|| format!("reading request {path}"))?,
        None => {
            let mut buf = String::new();
            std::io::stdin()
                .read_to_string(&mut buf)
                .context("reading request from stdin")?;
            buf
        }
    };
    serde_json::from_str(&raw).context("parsing ranking request")
}

async fn rank(cfg: FusionConfig, req: RankRequest) -> Vec<RankedDoc> {
    let budget = Budget::from_millis(req.budget_ms.unwrap_or(DEFAULT_BUDGET_MS));

    let calibrator = Arc::new(SoftClampCalibrator::from_config(&cfg.calibration));
    let reranker = Arc::new(CrossEncoderReranker::with_min_per_item(
        LexicalOverlapScorer::new(req.texts.clone()),
        cfg.guard.min_per_item_ms,
    ));
    let similarity = cfg.delta.duplicate_similarity;
    let pipeline = RankingPipeline::new(cfg, calibrator, None).with_reranker(reranker);

    // First-seen candidate order across bundles, one entry per id.
    let mut meta = req.meta;
    let mut seen = HashSet::new();
    let order: Vec<(&str, &str)> = req
        .bundles
        .iter()
        .flat_map(|b| b.docs.iter())
        .filter(|&d| seen.insert(d.id.as_str()))
        .filter_map(|d| req.texts.get(&d.id).map(|t| (d.id.as_str(), t.as_str())))
        .collect();
    merge_penalties(&mut meta, duplicate_penalties(&order, similarity));

    tracing::info!(
        target: "rankfuse::fusion",
        query = %anon_hash(&req.query),
        bundles = req.bundles.len(),
        "ranking request"
    );

    let params = RerankParams::new(req.query, req.target_count, budget);
    pipeline.rank(&req.bundles, &meta, &params).await
}

/// One JSON request per stdin line, one JSON result per stdout line. The
/// config file is re-checked before every request.
async fn serve_lines() -> anyhow::Result<()> {
    let hot = HotReloadConfig::new(None);
    tracing::info!(target: "rankfuse::config", path = %hot.path().display(), "serving line-delimited requests");

    for line in std::io::stdin().lock().lines() {
        let line = line.context("reading request line")?;
        if line.trim().is_empty() {
            continue;
        }
        match serde_json::from_str::<RankRequest>(&line) {
            Ok(req) => {
                let ranked = rank(hot.current(), req).await;
                println!("{}", serde_json::to_string(&ranked)?);
            }
            Err(e) => {
                tracing::warn!(target: "rankfuse::fusion", error = %e, "skipping malformed request");
                println!("{}", serde_json::json!({ "error": e.to_string() }));
            }
        }
    }
    Ok(())
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    // Load .env in local/dev; no-op when absent.
    let _ = dotenvy::dotenv();
    init_tracing();

    let metrics = if std::env::var(ENV_PRINT_METRICS).ok().as_deref() == Some("1") {
        Some(install_prometheus()?)
    } else {
        None
    };

    if std::env::args().nth(1).as_deref() == Some(LINES_FLAG) {
        serve_lines().await?;
    } else {
        let ranked = rank(FusionConfig::from_env(), read_request()?).await;
        println!("{}", serde_json::to_string_pretty(&ranked)?);
    }

    if let Some(handle) = metrics {
        eprintln!("{}", handle.render());
    }
    Ok(())
}
