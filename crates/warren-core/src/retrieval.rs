//! Staged retrieval with vector, text-fallback, and emergency strategies.
//!
//! [`retrieve`] never returns an error. Each stage that fails is recorded as
//! a warning on the [`RetrievalOutcome`] and the next stage takes over:
//!
//! 1. **Vector**: embed the query and run cosine similarity search over
//!    vectors from the same model and dimensionality.
//! 2. **Text**: full-text search, run when the vector stage failed, was
//!    skipped (no embedder), or returned fewer than `min_results` candidates.
//! 3. **Merge**: min-max normalize each stage, combine with
//!    `score = (1 - α) × text + α × vector`, keep the best chunk per item
//!    (MAX), hydrate, re-filter, sort by score desc, updated_at desc, id asc.
//! 4. **Emergency**: when nothing survived, list the newest content that
//!    matches the filter, with no query at all.
//! 5. **Canned**: when even the listing fails, return no items; the
//!    assembler substitutes the built-in compliance baseline.
//!
//! Every store and embedder call is retried up to `max_attempts` times with
//! linear backoff.

use std::collections::HashMap;
use std::future::Future;
use std::time::Duration;

use anyhow::Result;
use serde::{Deserialize, Serialize};
use tracing::{debug, warn};

use crate::embedding::EmbeddingProvider;
use crate::models::ContentItem;
use crate::store::{Candidate, ContentStore, SearchFilter};

/// Retrieval tuning parameters, decoupled from application config.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct RetrievalParams {
    /// Weight for vector vs text when both stages contribute.
    pub hybrid_alpha: f64,
    /// Candidates fetched per stage.
    pub candidate_k: usize,
    /// Items returned.
    pub final_limit: usize,
    /// Fewer vector candidates than this triggers the text stage.
    pub min_results: usize,
    /// Merged items scoring below this are discarded.
    pub min_score: f64,
    /// Attempts per store or embedder call (at least 1).
    pub max_attempts: u32,
    /// Delay before retry `n` is `retry_backoff_ms × n`.
    pub retry_backoff_ms: u64,
}

impl Default for RetrievalParams {
    fn default() -> Self {
        Self {
            hybrid_alpha: 0.6,
            candidate_k: 40,
            final_limit: 8,
            min_results: 3,
            min_score: 0.0,
            max_attempts: 2,
            retry_backoff_ms: 200,
        }
    }
}

/// Inputs for one retrieval.
#[derive(Debug, Clone)]
pub struct RetrievalRequest<'a> {
    pub query: &'a str,
    pub filter: SearchFilter,
    pub params: RetrievalParams,
}

/// Which stage produced the items of an outcome.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum RetrievalStrategy {
    /// Vector and text candidates were merged.
    Hybrid,
    Vector,
    Text,
    /// Newest matching content, no query relevance.
    Emergency,
    /// Nothing could be retrieved.
    Canned,
}

impl RetrievalStrategy {
    pub fn as_str(self) -> &'static str {
        match self {
            RetrievalStrategy::Hybrid => "hybrid",
            RetrievalStrategy::Vector => "vector",
            RetrievalStrategy::Text => "text",
            RetrievalStrategy::Emergency => "emergency",
            RetrievalStrategy::Canned => "canned",
        }
    }

    /// Whether the items were ranked against the query.
    pub fn is_query_ranked(self) -> bool {
        matches!(
            self,
            RetrievalStrategy::Hybrid | RetrievalStrategy::Vector | RetrievalStrategy::Text
        )
    }
}

/// A hydrated content item with its retrieval score.
#[derive(Debug, Clone, Serialize)]
pub struct RetrievedItem {
    pub item: ContentItem,
    /// Merged score in `[0.0, 1.0]`; `0.0` for emergency results.
    pub score: f64,
    /// Best-matching chunk text, or the body head for emergency results.
    pub snippet: String,
}

/// Result of [`retrieve`].
#[derive(Debug, Clone, Serialize)]
pub struct RetrievalOutcome {
    pub strategy: RetrievalStrategy,
    pub items: Vec<RetrievedItem>,
    /// Subsystem failures encountered along the way.
    pub warnings: Vec<String>,
    pub vector_candidates: usize,
    pub text_candidates: usize,
}

impl RetrievalOutcome {
    fn canned(warnings: Vec<String>, vector_candidates: usize, text_candidates: usize) -> Self {
        Self {
            strategy: RetrievalStrategy::Canned,
            items: Vec::new(),
            warnings,
            vector_candidates,
            text_candidates,
        }
    }
}

/// Run `op` up to `max_attempts` times, sleeping `backoff_ms × n` before retry `n`.
pub async fn with_retry<T, F, Fut>(
    label: &str,
    max_attempts: u32,
    backoff_ms: u64,
    mut op: F,
) -> Result<T>
where
    F: FnMut() -> Fut,
    Fut: Future<Output = Result<T>>,
{
    let attempts = max_attempts.max(1);
    let mut attempt = 1;
    loop {
        match op().await {
            Ok(v) => return Ok(v),
            Err(e) if attempt < attempts => {
                debug!(stage = label, attempt, error = %e, "retrying");
                tokio::time::sleep(Duration::from_millis(backoff_ms * attempt as u64)).await;
                attempt += 1;
            }
            Err(e) => return Err(e.context(format!("{} failed after {} attempt(s)", label, attempts))),
        }
    }
}

/// Retrieve content for `req`, degrading through the stages described in
/// the module docs.
///
/// # Arguments
///
/// * `store` - Content backend used for every stage.
/// * `embedder` - Query embedder. `None` skips the vector stage.
/// * `req` - Query text, filter and tuning parameters.
///
/// # Errors
///
/// Never fails. Stage failures are logged and reported in
/// [`RetrievalOutcome::warnings`], and the next stage takes over.
pub async fn retrieve<S>(
    store: &S,
    embedder: Option<&dyn EmbeddingProvider>,
    req: &RetrievalRequest<'_>,
) -> RetrievalOutcome
where
    S: ContentStore + ?Sized,
{
    let p = &req.params;
    let mut warnings = Vec::new();
    let query = req.query.trim();

    let mut vector_candidates: Vec<Candidate> = Vec::new();
    let mut text_candidates: Vec<Candidate> = Vec::new();

    if query.is_empty() {
        warnings.push("empty query: skipping ranked search".to_string());
    } else {
        match embedder {
            Some(embedder) => {
                let embedded = with_retry("embedding", p.max_attempts, p.retry_backoff_ms, || {
                    embedder.embed_query(query)
                })
                .await;
                match embedded {
                    Ok(qv) => {
                        let model = embedder.model_name();
                        let searched = with_retry("vector search", p.max_attempts, p.retry_backoff_ms, || {
                            store.vector_search(&qv, model, &req.filter, p.candidate_k)
                        })
                        .await;
                        match searched {
                            Ok(c) => vector_candidates = c,
                            Err(e) => {
                                warn!(error = %e, "vector search unavailable");
                                warnings.push(format!("{:#}", e));
                            }
                        }
                    }
                    Err(e) => {
                        warn!(error = %e, "query embedding unavailable");
                        warnings.push(format!("{:#}", e));
                    }
                }
            }
            None => debug!("no embedder configured, skipping vector stage"),
        }

        if vector_candidates.len() < p.min_results {
            let searched = with_retry("text search", p.max_attempts, p.retry_backoff_ms, || {
                store.text_search(query, &req.filter, p.candidate_k)
            })
            .await;
            match searched {
                Ok(c) => text_candidates = c,
                Err(e) => {
                    warn!(error = %e, "text search unavailable");
                    warnings.push(format!("{:#}", e));
                }
            }
        }
    }

    let vec_count = vector_candidates.len();
    let text_count = text_candidates.len();
    debug!(vector = vec_count, text = text_count, "retrieval candidates");

    if vec_count > 0 || text_count > 0 {
        let strategy = match (vec_count > 0, text_count > 0) {
            (true, true) => RetrievalStrategy::Hybrid,
            (true, false) => RetrievalStrategy::Vector,
            _ => RetrievalStrategy::Text,
        };
        let alpha = match strategy {
            RetrievalStrategy::Vector => 1.0,
            RetrievalStrategy::Text => 0.0,
            _ => p.hybrid_alpha,
        };

        let merged = merge_candidates(&text_candidates, &vector_candidates, alpha);
        let mut items = Vec::new();
        for (content_id, score, snippet) in merged {
            if score < p.min_score {
                continue;
            }
            match store.get_content(&content_id).await {
                Ok(Some(item)) if req.filter.matches(&item) => items.push(RetrievedItem {
                    item,
                    score,
                    snippet,
                }),
                Ok(_) => {}
                Err(e) => {
                    warn!(content_id = %content_id, error = %e, "failed to load content item");
                    warnings.push(format!("failed to load content {}: {:#}", content_id, e));
                }
            }
        }

        if !items.is_empty() {
            sort_items(&mut items);
            items.truncate(p.final_limit);
            return RetrievalOutcome {
                strategy,
                items,
                warnings,
                vector_candidates: vec_count,
                text_candidates: text_count,
            };
        }
    }

    let listed = with_retry("emergency listing", p.max_attempts, p.retry_backoff_ms, || {
        store.list_content(&req.filter, p.final_limit)
    })
    .await;

    match listed {
        Ok(list) if !list.is_empty() => {
            warn!(count = list.len(), "using emergency content listing");
            let items = list
                .into_iter()
                .map(|item| RetrievedItem {
                    snippet: item.body.chars().take(240).collect(),
                    item,
                    score: 0.0,
                })
                .collect();
            RetrievalOutcome {
                strategy: RetrievalStrategy::Emergency,
                items,
                warnings,
                vector_candidates: vec_count,
                text_candidates: text_count,
            }
        }
        Ok(_) => {
            warnings.push("no content available for emergency listing".to_string());
            RetrievalOutcome::canned(warnings, vec_count, text_count)
        }
        Err(e) => {
            warn!(error = %e, "emergency listing unavailable");
            warnings.push(format!("{:#}", e));
            RetrievalOutcome::canned(warnings, vec_count, text_count)
        }
    }
}

/// Min-max normalize raw scores to `[0.0, 1.0]`. Equal scores map to `1.0`.
pub fn normalize_scores(candidates: &[Candidate]) -> Vec<(&Candidate, f64)> {
    if candidates.is_empty() {
        return Vec::new();
    }

    let (lo, hi) = candidates.iter().fold((f64::INFINITY, f64::NEG_INFINITY), |(lo, hi), c| {
        (lo.min(c.raw_score), hi.max(c.raw_score))
    });

    candidates
        .iter()
        .map(|c| {
            let norm = if (hi - lo).abs() < f64::EPSILON {
                1.0
            } else {
                (c.raw_score - lo) / (hi - lo)
            };
            (c, norm)
        })
        .collect()
}

/// Merge both candidate sets into `(content_id, score, snippet)` triples,
/// one per content item, keeping the best chunk.
fn merge_candidates(
    text: &[Candidate],
    vector: &[Candidate],
    alpha: f64,
) -> Vec<(String, f64, String)> {
    let text_map: HashMap<&str, f64> = normalize_scores(text)
        .into_iter()
        .map(|(c, s)| (c.chunk_id.as_str(), s))
        .collect();
    let vec_map: HashMap<&str, f64> = normalize_scores(vector)
        .into_iter()
        .map(|(c, s)| (c.chunk_id.as_str(), s))
        .collect();

    let mut chunks: HashMap<&str, &Candidate> = HashMap::new();
    for c in vector.iter().chain(text.iter()) {
        chunks.entry(c.chunk_id.as_str()).or_insert(c);
    }

    let mut best: HashMap<&str, (f64, &str)> = HashMap::new();
    for (chunk_id, cand) in chunks {
        let t = text_map.get(chunk_id).copied().unwrap_or(0.0);
        let v = vec_map.get(chunk_id).copied().unwrap_or(0.0);
        let score = (1.0 - alpha) * t + alpha * v;
        let entry = best
            .entry(cand.content_id.as_str())
            .or_insert((score, cand.snippet.as_str()));
        if score > entry.0 {
            *entry = (score, cand.snippet.as_str());
        }
    }

    best.into_iter()
        .map(|(id, (score, snippet))| (id.to_string(), score, snippet.to_string()))
        .collect()
}

fn sort_items(items: &mut [RetrievedItem]) {
    items.sort_by(|a, b| {
        b.score
            .partial_cmp(&a.score)
            .unwrap_or(std::cmp::Ordering::Equal)
            .then(b.item.updated_at.cmp(&a.item.updated_at))
            .then_with(|| a.item.id.cmp(&b.item.id))
    });
}
