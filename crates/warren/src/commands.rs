//! CLI command implementations. Each prints a human-readable summary to
//! stdout; warnings go to stderr.
//!
//! Only `generate` builds a completion client, so the other commands run
//! without LLM credentials.

use std::path::Path;

use anyhow::{bail, Result};

use warren_core::models::ContentKind;

use crate::config::Config;
use crate::embedding::create_provider;
use crate::ingest::{embed_pending, ingest_items, load_items};
use crate::sqlite_store::SqliteStore;
use crate::warren::{GenerationRequest, Warren};

/// `warren ingest <file>`
pub async fn run_ingest(config: &Config, file: &Path) -> Result<()> {
    let items = load_items(file)?;
    let warren = Warren::for_retrieval(config).await?;
    let report = ingest_items(
        warren.content_store().as_ref(),
        warren.embedder(),
        items,
        config.chunking.max_tokens,
    )
    .await?;

    println!("ingest {}", file.display());
    println!("  items: {}", report.items);
    println!("  chunks: {}", report.chunks);
    println!("  embedded: {}", report.embedded);
    println!("  skipped: {}", report.skipped);
    for w in &report.warnings {
        eprintln!("Warning: {}", w);
    }
    Ok(())
}

/// `warren embed pending`
pub async fn run_embed_pending(
    config: &Config,
    limit: Option<usize>,
    batch_size: Option<usize>,
) -> Result<()> {
    let Some(provider) = create_provider(&config.embedding)? else {
        bail!("Embedding provider is disabled. Set [embedding] provider in config.");
    };
    let store = SqliteStore::open(config).await?;
    let report = embed_pending(
        &store,
        provider.as_ref(),
        limit,
        batch_size.unwrap_or(config.embedding.batch_size),
    )
    .await?;

    println!("embed pending");
    if report.pending == 0 {
        println!("  all chunks up to date");
        return Ok(());
    }
    println!("  total pending: {}", report.pending);
    println!("  embedded: {}", report.embedded);
    println!("  failed: {}", report.failed);
    Ok(())
}

/// `warren search <query>`
pub async fn run_search(
    config: &Config,
    query: &str,
    kind: Option<ContentKind>,
    audience: Option<String>,
    limit: Option<usize>,
) -> Result<()> {
    if query.trim().is_empty() {
        bail!("query must not be empty");
    }
    let warren = Warren::for_retrieval(config).await?;
    let outcome = warren
        .search(query, audience.as_deref(), kind.map(|k| vec![k]), limit)
        .await;

    for w in &outcome.warnings {
        eprintln!("Warning: {}", w);
    }
    println!(
        "Search: strategy={}, candidates: {} text + {} vector",
        outcome.strategy.as_str(),
        outcome.text_candidates,
        outcome.vector_candidates
    );
    println!();

    if outcome.items.is_empty() {
        println!("No results.");
        return Ok(());
    }

    for (i, hit) in outcome.items.iter().enumerate() {
        println!(
            "{}. [{:.2}] {} / {}",
            i + 1,
            hit.score,
            hit.item.kind,
            hit.item.title
        );
        if let Some(ref audience) = hit.item.audience {
            println!("    audience: {}", audience);
        }
        println!("    excerpt: \"{}\"", hit.snippet.replace('\n', " ").trim());
        println!("    id: {}", hit.item.id);
        println!();
    }
    Ok(())
}

/// `warren assemble <query> --session <id>`: print the packed prompt
/// without calling the model.
pub async fn run_assemble(
    config: &Config,
    session_id: &str,
    query: &str,
    audience: Option<String>,
    kind: Option<ContentKind>,
) -> Result<()> {
    let warren = Warren::for_retrieval(config).await?;
    let prepared = match warren
        .prepare(session_id, query, audience.as_deref(), kind)
        .await
    {
        Ok(p) => p,
        Err((e, _)) => bail!(e),
    };
    let report = &prepared.context.report;

    for w in &report.warnings {
        eprintln!("Warning: {}", w);
    }
    println!("--- Report ---");
    println!("strategy:      {}", report.strategy.as_str());
    println!("total tokens:  {}", report.total_tokens);
    if report.overflow_tokens > 0 {
        println!("overflow:      {}", report.overflow_tokens);
    }
    if report.used_compliance_baseline {
        println!("compliance:    built-in baseline");
    }
    for s in &report.sections {
        println!(
            "  {:<11} {:>5}/{:<5} included={} truncated={} dropped={}",
            s.name, s.used_tokens, s.budget_tokens, s.included, s.truncated, s.dropped
        );
    }
    println!();
    println!("--- System ---");
    println!("{}", prepared.payload.system);
    println!();
    println!("--- Messages ({}) ---", prepared.payload.messages.len());
    for m in &prepared.payload.messages {
        println!("[{}] {}", m.role, m.content);
    }
    Ok(())
}

/// `warren generate <prompt> --session <id>`
pub async fn run_generate(
    config: &Config,
    session_id: &str,
    prompt: &str,
    audience: Option<String>,
    kind: Option<ContentKind>,
) -> Result<()> {
    if prompt.trim().is_empty() {
        bail!("prompt must not be empty");
    }
    let warren = Warren::from_config(config).await?;
    let resp = warren
        .generate(&GenerationRequest {
            session_id: session_id.to_string(),
            prompt: prompt.to_string(),
            audience,
            content_kind_hint: kind,
        })
        .await;

    for w in &resp.report.warnings {
        eprintln!("Warning: {}", w);
    }
    println!("{}", resp.content);
    println!();
    if resp.fallback {
        println!("(fallback response: the model was unavailable)");
    }
    if resp.needs_review {
        println!("Needs compliance review:");
        for f in &resp.flags {
            println!("  - \"{}\" at {}: {}", f.term, f.offset, f.reason);
        }
    }
    Ok(())
}
