//! Storage abstraction for the Warren pipeline.
//!
//! The assembler reads from two collaborators owned by the surrounding
//! platform:
//!
//! - [`ContentStore`]: compliance rules, approved marketing examples,
//!   disclosures and reference material, with their chunk embeddings.
//! - [`SessionStore`]: per-session uploaded documents and conversation
//!   history.
//!
//! Both are async traits so the same pipeline runs against SQLite in the
//! application and against [`memory::InMemoryStore`] in tests.

pub mod memory;

use anyhow::Result;
use async_trait::async_trait;
use serde::{Deserialize, Serialize};

use crate::models::{Chunk, ContentItem, ContentKind, ContentStatus, ConversationTurn, SessionDocument};

/// A candidate chunk returned from text or vector search.
#[derive(Debug, Clone)]
pub struct Candidate {
    pub chunk_id: String,
    pub content_id: String,
    /// Raw score from the backend (negated BM25 rank, term overlap, or cosine).
    pub raw_score: f64,
    pub snippet: String,
}

/// A chunk whose embedding is missing or stale.
#[derive(Debug, Clone)]
pub struct PendingChunk {
    pub chunk_id: String,
    pub content_id: String,
    pub text: String,
    pub hash: String,
}

/// Restricts which content items a query may return.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct SearchFilter {
    /// Only these kinds. `None` means any kind.
    #[serde(default)]
    pub kinds: Option<Vec<ContentKind>>,
    /// Only items in [`ContentStatus::Approved`].
    #[serde(default)]
    pub approved_only: bool,
    /// Only items for this audience, plus items without an audience.
    #[serde(default)]
    pub audience: Option<String>,
    /// Only pinned items.
    #[serde(default)]
    pub pinned_only: bool,
}

impl SearchFilter {
    pub fn approved() -> Self {
        Self {
            approved_only: true,
            ..Self::default()
        }
    }

    pub fn with_kinds(mut self, kinds: &[ContentKind]) -> Self {
        self.kinds = Some(kinds.to_vec());
        self
    }

    pub fn with_audience(mut self, audience: Option<String>) -> Self {
        self.audience = audience;
        self
    }

    /// Filter selecting every pinned, approved compliance-critical item.
    pub fn pinned_compliance() -> Self {
        Self {
            kinds: Some(vec![ContentKind::ComplianceRule, ContentKind::Disclosure]),
            approved_only: true,
            audience: None,
            pinned_only: true,
        }
    }

    /// Whether `item` satisfies every constraint of this filter.
    pub fn matches(&self, item: &ContentItem) -> bool {
        if let Some(kinds) = &self.kinds {
            if !kinds.contains(&item.kind) {
                return false;
            }
        }
        if self.approved_only && item.status != ContentStatus::Approved {
            return false;
        }
        if self.pinned_only && !item.pinned {
            return false;
        }
        if let (Some(want), Some(have)) = (&self.audience, &item.audience) {
            if !want.eq_ignore_ascii_case(have) {
                return false;
            }
        }
        true
    }
}

/// Content item storage and search.
///
/// | Method | Purpose |
/// |--------|---------|
/// | [`upsert_content`](ContentStore::upsert_content) | Insert or update an item |
/// | [`replace_chunks`](ContentStore::replace_chunks) | Replace all chunks for an item |
/// | [`upsert_embedding`](ContentStore::upsert_embedding) | Store a chunk vector |
/// | [`get_content`](ContentStore::get_content) | Fetch one item |
/// | [`vector_search`](ContentStore::vector_search) | Cosine similarity search |
/// | [`text_search`](ContentStore::text_search) | Full-text search |
/// | [`list_content`](ContentStore::list_content) | Newest-first listing, no query |
/// | [`pending_chunks`](ContentStore::pending_chunks) | Chunks needing embeddings |
#[async_trait]
pub trait ContentStore: Send + Sync {
    /// Insert or update an item by id. Returns the id.
    async fn upsert_content(&self, item: &ContentItem) -> Result<String>;

    /// Replace all chunks for an item. Vectors of the old chunks are dropped.
    async fn replace_chunks(&self, content_id: &str, chunks: &[Chunk]) -> Result<()>;

    /// Store or update the embedding vector for a chunk, tagged with the
    /// model that produced it.
    async fn upsert_embedding(
        &self,
        chunk_id: &str,
        content_id: &str,
        vector: &[f32],
        model: &str,
        dims: usize,
        content_hash: &str,
    ) -> Result<()>;

    async fn get_content(&self, id: &str) -> Result<Option<ContentItem>>;

    /// Cosine search over vectors produced by `model` with the same length as
    /// `query_vec`. Vectors from any other model or dimensionality are never
    /// scored.
    async fn vector_search(
        &self,
        query_vec: &[f32],
        model: &str,
        filter: &SearchFilter,
        limit: usize,
    ) -> Result<Vec<Candidate>>;

    async fn text_search(
        &self,
        query: &str,
        filter: &SearchFilter,
        limit: usize,
    ) -> Result<Vec<Candidate>>;

    /// Items matching `filter`, newest `updated_at` first.
    async fn list_content(&self, filter: &SearchFilter, limit: usize) -> Result<Vec<ContentItem>>;

    /// Chunks without an embedding for `model`, or whose text changed since.
    /// `None` returns every such chunk.
    async fn pending_chunks(&self, model: &str, limit: Option<usize>) -> Result<Vec<PendingChunk>>;
}

/// Conversation and session-document storage.
#[async_trait]
pub trait SessionStore: Send + Sync {
    /// All documents attached to a session, newest first.
    async fn session_documents(&self, session_id: &str) -> Result<Vec<SessionDocument>>;

    async fn add_session_document(&self, doc: &SessionDocument) -> Result<String>;

    /// The last `limit` turns of a session, in chronological order.
    async fn conversation_history(
        &self,
        session_id: &str,
        limit: usize,
    ) -> Result<Vec<ConversationTurn>>;

    async fn append_turn(&self, turn: &ConversationTurn) -> Result<()>;
}
