//! In-memory [`ContentStore`] and [`SessionStore`] for tests and demos.
//!
//! Everything lives in `HashMap`s and `Vec`s behind `std::sync::RwLock`.
//! Vector search is brute-force cosine similarity over vectors from the
//! querying model; text search counts the distinct query terms each chunk
//! contains.

use std::collections::HashMap;
use std::sync::{RwLock, RwLockReadGuard, RwLockWriteGuard};

use anyhow::{anyhow, Result};
use async_trait::async_trait;

use crate::chunk::chunk_text;
use crate::embedding::cosine_similarity;
use crate::models::{Chunk, ContentItem, ConversationTurn, SessionDocument};
use crate::tokens::query_terms;

use super::{Candidate, ContentStore, PendingChunk, SearchFilter, SessionStore};

const SNIPPET_CHARS: usize = 240;

struct StoredVector {
    chunk_id: String,
    content_id: String,
    vector: Vec<f32>,
    model: String,
    content_hash: String,
}

/// In-memory store implementing both store traits.
#[derive(Default)]
pub struct InMemoryStore {
    items: RwLock<HashMap<String, ContentItem>>,
    chunks: RwLock<Vec<Chunk>>,
    vectors: RwLock<Vec<StoredVector>>,
    documents: RwLock<Vec<SessionDocument>>,
    turns: RwLock<Vec<ConversationTurn>>,
}

fn read<T>(lock: &RwLock<T>) -> Result<RwLockReadGuard<'_, T>> {
    lock.read().map_err(|_| anyhow!("in-memory store lock poisoned"))
}

fn write<T>(lock: &RwLock<T>) -> Result<RwLockWriteGuard<'_, T>> {
    lock.write().map_err(|_| anyhow!("in-memory store lock poisoned"))
}

fn snippet(text: &str) -> String {
    text.chars().take(SNIPPET_CHARS).collect()
}

impl InMemoryStore {
    pub fn new() -> Self {
        Self::default()
    }

    /// Upsert `item` and index its body as chunks, without vectors.
    pub async fn add_item(&self, item: ContentItem) -> Result<()> {
        let id = self.upsert_content(&item).await?;
        let chunks = chunk_text(&id, &item.body, 700);
        self.replace_chunks(&id, &chunks).await
    }

    /// Like [`add_item`](Self::add_item), storing `vector` for every chunk
    /// as produced by `model`.
    pub async fn add_embedded_item(
        &self,
        item: ContentItem,
        model: &str,
        vector: Vec<f32>,
    ) -> Result<()> {
        let id = self.upsert_content(&item).await?;
        let chunks = chunk_text(&id, &item.body, 700);
        self.replace_chunks(&id, &chunks).await?;
        for c in &chunks {
            self.upsert_embedding(&c.id, &id, &vector, model, vector.len(), &c.hash)
                .await?;
        }
        Ok(())
    }

    fn allowed(&self, content_id: &str, filter: &SearchFilter) -> Result<bool> {
        let items = read(&self.items)?;
        Ok(items
            .get(content_id)
            .map(|item| filter.matches(item))
            .unwrap_or(false))
    }
}

fn rank(mut candidates: Vec<Candidate>, limit: usize) -> Vec<Candidate> {
    candidates.sort_by(|a, b| {
        b.raw_score
            .partial_cmp(&a.raw_score)
            .unwrap_or(std::cmp::Ordering::Equal)
            .then_with(|| a.chunk_id.cmp(&b.chunk_id))
    });
    candidates.truncate(limit);
    candidates
}

#[async_trait]
impl ContentStore for InMemoryStore {
    async fn upsert_content(&self, item: &ContentItem) -> Result<String> {
        write(&self.items)?.insert(item.id.clone(), item.clone());
        Ok(item.id.clone())
    }

    async fn replace_chunks(&self, content_id: &str, chunks: &[Chunk]) -> Result<()> {
        {
            let mut stored = write(&self.chunks)?;
            stored.retain(|c| c.content_id != content_id);
            stored.extend(chunks.iter().cloned());
        }
        write(&self.vectors)?.retain(|v| v.content_id != content_id);
        Ok(())
    }

    async fn upsert_embedding(
        &self,
        chunk_id: &str,
        content_id: &str,
        vector: &[f32],
        model: &str,
        _dims: usize,
        content_hash: &str,
    ) -> Result<()> {
        let mut vecs = write(&self.vectors)?;
        vecs.retain(|v| v.chunk_id != chunk_id);
        vecs.push(StoredVector {
            chunk_id: chunk_id.to_string(),
            content_id: content_id.to_string(),
            vector: vector.to_vec(),
            model: model.to_string(),
            content_hash: content_hash.to_string(),
        });
        Ok(())
    }

    async fn get_content(&self, id: &str) -> Result<Option<ContentItem>> {
        Ok(read(&self.items)?.get(id).cloned())
    }

    async fn vector_search(
        &self,
        query_vec: &[f32],
        model: &str,
        filter: &SearchFilter,
        limit: usize,
    ) -> Result<Vec<Candidate>> {
        let vecs = read(&self.vectors)?;
        let chunks = read(&self.chunks)?;
        let mut candidates = Vec::new();
        for sv in vecs.iter() {
            if sv.model != model || sv.vector.len() != query_vec.len() {
                continue;
            }
            if !self.allowed(&sv.content_id, filter)? {
                continue;
            }
            let text = chunks
                .iter()
                .find(|c| c.id == sv.chunk_id)
                .map(|c| snippet(&c.text))
                .unwrap_or_default();
            candidates.push(Candidate {
                chunk_id: sv.chunk_id.clone(),
                content_id: sv.content_id.clone(),
                raw_score: cosine_similarity(query_vec, &sv.vector) as f64,
                snippet: text,
            });
        }
        Ok(rank(candidates, limit))
    }

    async fn text_search(
        &self,
        query: &str,
        filter: &SearchFilter,
        limit: usize,
    ) -> Result<Vec<Candidate>> {
        let terms = query_terms(query);
        if terms.is_empty() {
            return Ok(Vec::new());
        }
        let chunks = read(&self.chunks)?;
        let mut candidates = Vec::new();
        for c in chunks.iter() {
            let lower = c.text.to_lowercase();
            let matches = terms.iter().filter(|t| lower.contains(t.as_str())).count();
            if matches == 0 || !self.allowed(&c.content_id, filter)? {
                continue;
            }
            candidates.push(Candidate {
                chunk_id: c.id.clone(),
                content_id: c.content_id.clone(),
                raw_score: matches as f64,
                snippet: snippet(&c.text),
            });
        }
        Ok(rank(candidates, limit))
    }

    async fn list_content(&self, filter: &SearchFilter, limit: usize) -> Result<Vec<ContentItem>> {
        let items = read(&self.items)?;
        let mut out: Vec<ContentItem> = items.values().filter(|i| filter.matches(i)).cloned().collect();
        out.sort_by(|a, b| b.updated_at.cmp(&a.updated_at).then_with(|| a.id.cmp(&b.id)));
        out.truncate(limit);
        Ok(out)
    }

    async fn pending_chunks(&self, model: &str, limit: Option<usize>) -> Result<Vec<PendingChunk>> {
        let chunks = read(&self.chunks)?;
        let vecs = read(&self.vectors)?;
        Ok(chunks
            .iter()
            .filter(|c| {
                !vecs
                    .iter()
                    .any(|v| v.chunk_id == c.id && v.model == model && v.content_hash == c.hash)
            })
            .take(limit.unwrap_or(usize::MAX))
            .map(|c| PendingChunk {
                chunk_id: c.id.clone(),
                content_id: c.content_id.clone(),
                text: c.text.clone(),
                hash: c.hash.clone(),
            })
            .collect())
    }
}

#[async_trait]
impl SessionStore for InMemoryStore {
    async fn session_documents(&self, session_id: &str) -> Result<Vec<SessionDocument>> {
        let docs = read(&self.documents)?;
        let mut out: Vec<SessionDocument> = docs
            .iter()
            .filter(|d| d.session_id == session_id)
            .cloned()
            .collect();
        out.sort_by(|a, b| b.created_at.cmp(&a.created_at));
        Ok(out)
    }

    async fn add_session_document(&self, doc: &SessionDocument) -> Result<String> {
        write(&self.documents)?.push(doc.clone());
        Ok(doc.id.clone())
    }

    async fn conversation_history(
        &self,
        session_id: &str,
        limit: usize,
    ) -> Result<Vec<ConversationTurn>> {
        let turns = read(&self.turns)?;
        let session: Vec<&ConversationTurn> =
            turns.iter().filter(|t| t.session_id == session_id).collect();
        let skip = session.len().saturating_sub(limit);
        Ok(session.into_iter().skip(skip).cloned().collect())
    }

    async fn append_turn(&self, turn: &ConversationTurn) -> Result<()> {
        write(&self.turns)?.push(turn.clone());
        Ok(())
    }
}
