//! Content ingestion and embedding backfill.
//!
//! [`ingest_items`] normalizes incoming items, upserts them, re-chunks their
//! bodies, and embeds the new chunks inline when a provider is configured.
//! An embedding failure is not fatal: the chunks are stored without vectors
//! and [`embed_pending`] picks them up later. A provider response whose
//! vectors do not match the provider's declared `dims()` counts as a failure
//! and is never stored.

use std::path::Path;

use anyhow::{bail, Context, Result};
use serde::Serialize;
use tracing::{info, warn};
use uuid::Uuid;

use warren_core::chunk::chunk_text;
use warren_core::embedding::EmbeddingProvider;
use warren_core::models::{content_hash, ContentItem};
use warren_core::store::ContentStore;

#[derive(Debug, Default, Clone, Serialize)]
pub struct IngestReport {
    pub ids: Vec<String>,
    pub items: usize,
    pub chunks: usize,
    pub embedded: usize,
    pub skipped: usize,
    pub warnings: Vec<String>,
}

#[derive(Debug, Default, Clone, Serialize)]
pub struct EmbedReport {
    pub pending: usize,
    pub embedded: usize,
    pub failed: usize,
}

/// Fill in ids, timestamps and the content hash; reject empty items.
pub fn normalize(mut item: ContentItem, now: i64) -> Result<ContentItem> {
    item.title = item.title.trim().to_string();
    if item.title.is_empty() {
        bail!("content title must not be empty");
    }
    if item.body.trim().is_empty() {
        bail!("content body must not be empty ({})", item.title);
    }
    if item.id.trim().is_empty() {
        item.id = Uuid::new_v4().to_string();
    }
    if item.created_at == 0 {
        item.created_at = now;
    }
    if item.updated_at == 0 {
        item.updated_at = now;
    }
    if item.pinned && !item.kind.is_compliance_critical() {
        warn!(id = %item.id, kind = %item.kind, "pinned ignored for non-compliance content");
        item.pinned = false;
    }
    item.audience = item
        .audience
        .map(|a| a.trim().to_string())
        .filter(|a| !a.is_empty());
    item.content_hash = content_hash(&item.body);
    Ok(item)
}

/// Load a JSON array of content items from `path`.
pub fn load_items(path: &Path) -> Result<Vec<ContentItem>> {
    let text = std::fs::read_to_string(path)
        .with_context(|| format!("Failed to read content file: {}", path.display()))?;
    serde_json::from_str(&text)
        .with_context(|| format!("Failed to parse content file: {}", path.display()))
}

/// Check that a provider returned one `dims()`-long vector per input.
fn checked_vectors(
    embedder: &dyn EmbeddingProvider,
    inputs: usize,
    vectors: Vec<Vec<f32>>,
) -> Result<Vec<Vec<f32>>> {
    if vectors.len() != inputs {
        bail!(
            "{}: expected {} vectors, got {}",
            embedder.model_name(),
            inputs,
            vectors.len()
        );
    }
    if let Some(bad) = vectors.iter().find(|v| v.len() != embedder.dims()) {
        bail!(
            "{}: expected {} dimensions, got {}",
            embedder.model_name(),
            embedder.dims(),
            bad.len()
        );
    }
    Ok(vectors)
}

/// Store `items`, chunking at `chunk_max_tokens` and embedding when possible.
///
/// # Arguments
///
/// * `store` - Destination for items, chunks and vectors.
/// * `embedder` - Provider for inline embedding. `None` leaves every chunk
///   pending.
/// * `items` - Raw items. Invalid ones are skipped with a warning.
/// * `chunk_max_tokens` - Upper bound on chunk size.
///
/// # Errors
///
/// Returns an error only when the store rejects a write. Validation and
/// embedding problems are reported in [`IngestReport::warnings`].
pub async fn ingest_items<S>(
    store: &S,
    embedder: Option<&dyn EmbeddingProvider>,
    items: Vec<ContentItem>,
    chunk_max_tokens: usize,
) -> Result<IngestReport>
where
    S: ContentStore + ?Sized,
{
    let now = chrono::Utc::now().timestamp();
    let mut report = IngestReport::default();

    for raw in items {
        let item = match normalize(raw, now) {
            Ok(item) => item,
            Err(e) => {
                warn!(error = %e, "skipping content item");
                report.warnings.push(e.to_string());
                report.skipped += 1;
                continue;
            }
        };

        store
            .upsert_content(&item)
            .await
            .with_context(|| format!("Failed to store content {}", item.id))?;

        let chunks = chunk_text(&item.id, &item.body, chunk_max_tokens);
        store
            .replace_chunks(&item.id, &chunks)
            .await
            .with_context(|| format!("Failed to store chunks for {}", item.id))?;
        report.chunks += chunks.len();

        if let Some(embedder) = embedder {
            let texts: Vec<String> = chunks.iter().map(|c| c.text.clone()).collect();
            let embedded = embedder
                .embed(&texts)
                .await
                .and_then(|v| checked_vectors(embedder, texts.len(), v));
            match embedded {
                Ok(vectors) => {
                    for (chunk, vector) in chunks.iter().zip(vectors.iter()) {
                        store
                            .upsert_embedding(
                                &chunk.id,
                                &item.id,
                                vector,
                                embedder.model_name(),
                                embedder.dims(),
                                &chunk.hash,
                            )
                            .await?;
                        report.embedded += 1;
                    }
                }
                Err(e) => {
                    let msg = format!("embedding failed for {}: {:#}", item.id, e);
                    warn!("{}", msg);
                    report.warnings.push(msg);
                }
            }
        }

        report.ids.push(item.id.clone());
        report.items += 1;
    }

    info!(
        items = report.items,
        chunks = report.chunks,
        embedded = report.embedded,
        skipped = report.skipped,
        "ingest complete"
    );
    Ok(report)
}

/// Embed chunks that have no vector for the provider's model, or whose text
/// changed since they were embedded.
///
/// # Arguments
///
/// * `store` - Store holding the chunks.
/// * `embedder` - Provider whose model the vectors are tagged with.
/// * `limit` - Maximum chunks to embed. `None` embeds every pending chunk.
/// * `batch_size` - Chunks per provider request (at least 1).
///
/// # Errors
///
/// Returns an error when the store cannot be read or written. A failed or
/// malformed provider batch is counted in [`EmbedReport::failed`] instead.
pub async fn embed_pending<S>(
    store: &S,
    embedder: &dyn EmbeddingProvider,
    limit: Option<usize>,
    batch_size: usize,
) -> Result<EmbedReport>
where
    S: ContentStore + ?Sized,
{
    let pending = store.pending_chunks(embedder.model_name(), limit).await?;
    let mut report = EmbedReport {
        pending: pending.len(),
        ..EmbedReport::default()
    };

    for batch in pending.chunks(batch_size.max(1)) {
        let texts: Vec<String> = batch.iter().map(|p| p.text.clone()).collect();
        let embedded = embedder
            .embed(&texts)
            .await
            .and_then(|v| checked_vectors(embedder, texts.len(), v));
        match embedded {
            Ok(vectors) => {
                for (p, vector) in batch.iter().zip(vectors.iter()) {
                    store
                        .upsert_embedding(
                            &p.chunk_id,
                            &p.content_id,
                            vector,
                            embedder.model_name(),
                            embedder.dims(),
                            &p.hash,
                        )
                        .await?;
                    report.embedded += 1;
                }
            }
            Err(e) => {
                warn!(error = %format!("{:#}", e), size = batch.len(), "embedding batch failed");
                report.failed += batch.len();
            }
        }
    }

    info!(
        pending = report.pending,
        embedded = report.embedded,
        failed = report.failed,
        "embed pending complete"
    );
    Ok(report)
}
