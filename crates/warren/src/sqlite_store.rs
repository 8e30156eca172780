//! SQLite-backed [`ContentStore`] and [`SessionStore`].
//!
//! Text search runs on the `chunks_fts` FTS5 index; vector search is a
//! brute-force cosine scan over the `chunk_vectors` written by the querying
//! model. Search filters become `WHERE` conditions on the joined
//! `content_items` row, so `LIMIT` applies to rows that already qualify.

use anyhow::{Context, Result};
use async_trait::async_trait;
use sqlx::sqlite::SqliteRow;
use sqlx::{Row, SqlitePool};

use warren_core::embedding::{blob_to_vec, cosine_similarity, vec_to_blob};
use warren_core::models::{Chunk, ContentItem, ContentStatus, ConversationTurn, SessionDocument};
use warren_core::store::{Candidate, ContentStore, PendingChunk, SearchFilter, SessionStore};
use warren_core::tokens::query_terms;

use crate::config::Config;

const ITEM_COLUMNS: &str = "ci.id, ci.kind, ci.status, ci.title, ci.body, ci.audience, \
    ci.tags_json, ci.pinned, ci.source_url, ci.created_at, ci.updated_at, ci.content_hash";

pub struct SqliteStore {
    pool: SqlitePool,
}

impl SqliteStore {
    pub fn new(pool: SqlitePool) -> Self {
        Self { pool }
    }

    /// Connect to the configured database and bring its schema up to date.
    ///
    /// # Errors
    ///
    /// Returns an error if the database cannot be opened or migrated.
    pub async fn open(config: &Config) -> Result<Self> {
        let pool = crate::db::connect(config).await?;
        crate::migrate::migrate(&pool).await?;
        Ok(Self::new(pool))
    }

    pub fn pool(&self) -> &SqlitePool {
        &self.pool
    }
}

fn item_from_row(row: &SqliteRow) -> Result<ContentItem> {
    let kind: String = row.get("kind");
    let status: String = row.get("status");
    let tags_json: String = row.get("tags_json");
    let pinned: i64 = row.get("pinned");

    Ok(ContentItem {
        id: row.get("id"),
        kind: kind.parse()?,
        status: status.parse()?,
        title: row.get("title"),
        body: row.get("body"),
        audience: row.get("audience"),
        tags: serde_json::from_str(&tags_json).unwrap_or_default(),
        pinned: pinned != 0,
        source_url: row.get("source_url"),
        created_at: row.get("created_at"),
        updated_at: row.get("updated_at"),
        content_hash: row.get("content_hash"),
    })
}

fn passes(filter: &SearchFilter, row: &SqliteRow) -> Result<bool> {
    Ok(filter.matches(&item_from_row(row)?))
}

/// `WHERE` conditions on `ci` equivalent to [`SearchFilter::matches`].
struct FilterSql {
    clause: String,
    binds: Vec<String>,
}

impl FilterSql {
    fn new(filter: &SearchFilter) -> Self {
        let mut conds = Vec::new();
        let mut binds = Vec::new();
        if let Some(kinds) = &filter.kinds {
            if kinds.is_empty() {
                conds.push("0".to_string());
            } else {
                let marks = vec!["?"; kinds.len()].join(", ");
                conds.push(format!("ci.kind IN ({})", marks));
                binds.extend(kinds.iter().map(|k| k.as_str().to_string()));
            }
        }
        if filter.approved_only {
            conds.push("ci.status = ?".to_string());
            binds.push(ContentStatus::Approved.as_str().to_string());
        }
        if filter.pinned_only {
            conds.push("ci.pinned = 1".to_string());
        }
        if let Some(audience) = &filter.audience {
            conds.push("(ci.audience IS NULL OR lower(ci.audience) = lower(?))".to_string());
            binds.push(audience.clone());
        }
        let clause = if conds.is_empty() {
            "1".to_string()
        } else {
            conds.join(" AND ")
        };
        Self { clause, binds }
    }
}

/// SQLite binds `LIMIT` as a signed integer.
fn sql_limit(limit: usize) -> i64 {
    i64::try_from(limit).unwrap_or(i64::MAX)
}

/// Quote each term so user punctuation cannot form FTS5 syntax.
fn fts_query(query: &str) -> Option<String> {
    let terms = query_terms(query);
    if terms.is_empty() {
        return None;
    }
    Some(
        terms
            .iter()
            .map(|t| format!("\"{}\"", t))
            .collect::<Vec<_>>()
            .join(" OR "),
    )
}

#[async_trait]
impl ContentStore for SqliteStore {
    async fn upsert_content(&self, item: &ContentItem) -> Result<String> {
        let tags_json = serde_json::to_string(&item.tags)?;
        sqlx::query(
            r#"
            INSERT INTO content_items (id, kind, status, title, body, audience, tags_json,
                                       pinned, source_url, created_at, updated_at, content_hash)
            VALUES (?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?)
            ON CONFLICT(id) DO UPDATE SET
                kind = excluded.kind,
                status = excluded.status,
                title = excluded.title,
                body = excluded.body,
                audience = excluded.audience,
                tags_json = excluded.tags_json,
                pinned = excluded.pinned,
                source_url = excluded.source_url,
                updated_at = excluded.updated_at,
                content_hash = excluded.content_hash
            "#,
        )
        .bind(&item.id)
        .bind(item.kind.as_str())
        .bind(item.status.as_str())
        .bind(&item.title)
        .bind(&item.body)
        .bind(&item.audience)
        .bind(&tags_json)
        .bind(item.pinned as i64)
        .bind(&item.source_url)
        .bind(item.created_at)
        .bind(item.updated_at)
        .bind(&item.content_hash)
        .execute(&self.pool)
        .await?;

        Ok(item.id.clone())
    }

    async fn replace_chunks(&self, content_id: &str, chunks: &[Chunk]) -> Result<()> {
        let mut tx = self.pool.begin().await?;

        sqlx::query(
            "DELETE FROM chunk_vectors WHERE chunk_id IN (SELECT id FROM chunks WHERE content_id = ?)",
        )
        .bind(content_id)
        .execute(&mut *tx)
        .await?;

        sqlx::query(
            "DELETE FROM embeddings WHERE chunk_id IN (SELECT id FROM chunks WHERE content_id = ?)",
        )
        .bind(content_id)
        .execute(&mut *tx)
        .await?;

        sqlx::query("DELETE FROM chunks_fts WHERE content_id = ?")
            .bind(content_id)
            .execute(&mut *tx)
            .await?;

        sqlx::query("DELETE FROM chunks WHERE content_id = ?")
            .bind(content_id)
            .execute(&mut *tx)
            .await?;

        for chunk in chunks {
            sqlx::query(
                "INSERT INTO chunks (id, content_id, chunk_index, text, hash) VALUES (?, ?, ?, ?, ?)",
            )
            .bind(&chunk.id)
            .bind(&chunk.content_id)
            .bind(chunk.chunk_index)
            .bind(&chunk.text)
            .bind(&chunk.hash)
            .execute(&mut *tx)
            .await?;

            sqlx::query("INSERT INTO chunks_fts (chunk_id, content_id, text) VALUES (?, ?, ?)")
                .bind(&chunk.id)
                .bind(&chunk.content_id)
                .bind(&chunk.text)
                .execute(&mut *tx)
                .await?;
        }

        tx.commit().await?;
        Ok(())
    }

    async fn upsert_embedding(
        &self,
        chunk_id: &str,
        content_id: &str,
        vector: &[f32],
        model: &str,
        dims: usize,
        content_hash: &str,
    ) -> Result<()> {
        let now = chrono::Utc::now().timestamp();
        let mut tx = self.pool.begin().await?;

        sqlx::query(
            r#"
            INSERT INTO embeddings (chunk_id, model, dims, created_at, hash)
            VALUES (?, ?, ?, ?, ?)
            ON CONFLICT(chunk_id) DO UPDATE SET
                model = excluded.model,
                dims = excluded.dims,
                created_at = excluded.created_at,
                hash = excluded.hash
            "#,
        )
        .bind(chunk_id)
        .bind(model)
        .bind(dims as i64)
        .bind(now)
        .bind(content_hash)
        .execute(&mut *tx)
        .await?;

        sqlx::query(
            r#"
            INSERT INTO chunk_vectors (chunk_id, content_id, embedding)
            VALUES (?, ?, ?)
            ON CONFLICT(chunk_id) DO UPDATE SET
                content_id = excluded.content_id,
                embedding = excluded.embedding
            "#,
        )
        .bind(chunk_id)
        .bind(content_id)
        .bind(vec_to_blob(vector))
        .execute(&mut *tx)
        .await?;

        tx.commit().await?;
        Ok(())
    }

    async fn get_content(&self, id: &str) -> Result<Option<ContentItem>> {
        let row = sqlx::query(&format!(
            "SELECT {} FROM content_items ci WHERE ci.id = ?",
            ITEM_COLUMNS
        ))
        .bind(id)
        .fetch_optional(&self.pool)
        .await?;

        row.as_ref().map(item_from_row).transpose()
    }

    async fn vector_search(
        &self,
        query_vec: &[f32],
        model: &str,
        filter: &SearchFilter,
        limit: usize,
    ) -> Result<Vec<Candidate>> {
        let where_sql = FilterSql::new(filter);
        let sql = format!(
            r#"
            SELECT cv.chunk_id, cv.embedding,
                   COALESCE(substr(c.text, 1, 240), '') AS snippet,
                   {}
            FROM chunk_vectors cv
            JOIN embeddings e ON e.chunk_id = cv.chunk_id
            JOIN chunks c ON c.id = cv.chunk_id
            JOIN content_items ci ON ci.id = cv.content_id
            WHERE e.model = ? AND e.dims = ? AND e.hash = c.hash AND {}
            "#,
            ITEM_COLUMNS, where_sql.clause
        );
        let mut q = sqlx::query(&sql).bind(model).bind(query_vec.len() as i64);
        for b in &where_sql.binds {
            q = q.bind(b.as_str());
        }
        let rows = q.fetch_all(&self.pool).await?;

        let mut candidates = Vec::new();
        for row in &rows {
            if !passes(filter, row)? {
                continue;
            }
            let blob: Vec<u8> = row.get("embedding");
            let vector = blob_to_vec(&blob);
            if vector.len() != query_vec.len() {
                continue;
            }
            candidates.push(Candidate {
                chunk_id: row.get("chunk_id"),
                content_id: row.get("id"),
                raw_score: cosine_similarity(query_vec, &vector) as f64,
                snippet: row.get("snippet"),
            });
        }

        candidates.sort_by(|a, b| {
            b.raw_score
                .partial_cmp(&a.raw_score)
                .unwrap_or(std::cmp::Ordering::Equal)
                .then_with(|| a.chunk_id.cmp(&b.chunk_id))
        });
        candidates.truncate(limit);

        Ok(candidates)
    }

    async fn text_search(
        &self,
        query: &str,
        filter: &SearchFilter,
        limit: usize,
    ) -> Result<Vec<Candidate>> {
        let Some(match_expr) = fts_query(query) else {
            return Ok(Vec::new());
        };

        let where_sql = FilterSql::new(filter);
        let sql = format!(
            r#"
            SELECT chunks_fts.chunk_id, chunks_fts.rank AS rank,
                   snippet(chunks_fts, 2, '>>>', '<<<', '...', 48) AS snippet,
                   {}
            FROM chunks_fts
            JOIN content_items ci ON ci.id = chunks_fts.content_id
            WHERE chunks_fts MATCH ? AND {}
            ORDER BY chunks_fts.rank
            LIMIT ?
            "#,
            ITEM_COLUMNS, where_sql.clause
        );
        let mut q = sqlx::query(&sql).bind(&match_expr);
        for b in &where_sql.binds {
            q = q.bind(b.as_str());
        }
        let rows = q
            .bind(sql_limit(limit))
            .fetch_all(&self.pool)
            .await
            .with_context(|| format!("full-text search failed for {:?}", match_expr))?;

        let mut candidates = Vec::new();
        for row in &rows {
            if !passes(filter, row)? {
                continue;
            }
            let rank: f64 = row.get("rank");
            candidates.push(Candidate {
                chunk_id: row.get("chunk_id"),
                content_id: row.get("id"),
                raw_score: -rank,
                snippet: row.get("snippet"),
            });
        }

        Ok(candidates)
    }

    async fn list_content(&self, filter: &SearchFilter, limit: usize) -> Result<Vec<ContentItem>> {
        let where_sql = FilterSql::new(filter);
        let sql = format!(
            "SELECT {} FROM content_items ci WHERE {} ORDER BY ci.updated_at DESC, ci.id ASC LIMIT ?",
            ITEM_COLUMNS, where_sql.clause
        );
        let mut q = sqlx::query(&sql);
        for b in &where_sql.binds {
            q = q.bind(b.as_str());
        }
        let rows = q.bind(sql_limit(limit)).fetch_all(&self.pool).await?;

        let mut items = Vec::new();
        for row in &rows {
            let item = item_from_row(row)?;
            if filter.matches(&item) {
                items.push(item);
            }
        }
        Ok(items)
    }

    async fn pending_chunks(&self, model: &str, limit: Option<usize>) -> Result<Vec<PendingChunk>> {
        let mut sql = String::from(
            r#"
            SELECT c.id, c.content_id, c.text, c.hash
            FROM chunks c
            LEFT JOIN embeddings e ON e.chunk_id = c.id
            WHERE e.chunk_id IS NULL OR e.model != ? OR e.hash != c.hash
            ORDER BY c.content_id, c.chunk_index
            "#,
        );
        if limit.is_some() {
            sql.push_str(" LIMIT ?");
        }
        let mut q = sqlx::query(&sql).bind(model);
        if let Some(limit) = limit {
            q = q.bind(sql_limit(limit));
        }
        let rows = q.fetch_all(&self.pool).await?;

        Ok(rows
            .iter()
            .map(|row| PendingChunk {
                chunk_id: row.get("id"),
                content_id: row.get("content_id"),
                text: row.get("text"),
                hash: row.get("hash"),
            })
            .collect())
    }
}

#[async_trait]
impl SessionStore for SqliteStore {
    async fn session_documents(&self, session_id: &str) -> Result<Vec<SessionDocument>> {
        let rows = sqlx::query(
            r#"
            SELECT id, session_id, title, body, created_at
            FROM session_documents
            WHERE session_id = ?
            ORDER BY created_at DESC, rowid DESC
            "#,
        )
        .bind(session_id)
        .fetch_all(&self.pool)
        .await?;

        Ok(rows
            .iter()
            .map(|row| SessionDocument {
                id: row.get("id"),
                session_id: row.get("session_id"),
                title: row.get("title"),
                body: row.get("body"),
                created_at: row.get("created_at"),
            })
            .collect())
    }

    async fn add_session_document(&self, doc: &SessionDocument) -> Result<String> {
        sqlx::query(
            "INSERT INTO session_documents (id, session_id, title, body, created_at) VALUES (?, ?, ?, ?, ?)",
        )
        .bind(&doc.id)
        .bind(&doc.session_id)
        .bind(&doc.title)
        .bind(&doc.body)
        .bind(doc.created_at)
        .execute(&self.pool)
        .await?;

        Ok(doc.id.clone())
    }

    async fn conversation_history(
        &self,
        session_id: &str,
        limit: usize,
    ) -> Result<Vec<ConversationTurn>> {
        let rows = sqlx::query(
            r#"
            SELECT id, session_id, role, content, created_at FROM (
                SELECT rowid AS seq, id, session_id, role, content, created_at
                FROM conversation_turns
                WHERE session_id = ?
                ORDER BY created_at DESC, rowid DESC
                LIMIT ?
            )
            ORDER BY created_at ASC, seq ASC
            "#,
        )
        .bind(session_id)
        .bind(limit as i64)
        .fetch_all(&self.pool)
        .await?;

        rows.iter()
            .map(|row| {
                let role: String = row.get("role");
                Ok(ConversationTurn {
                    id: row.get("id"),
                    session_id: row.get("session_id"),
                    role: role.parse()?,
                    content: row.get("content"),
                    created_at: row.get("created_at"),
                })
            })
            .collect()
    }

    async fn append_turn(&self, turn: &ConversationTurn) -> Result<()> {
        sqlx::query(
            "INSERT INTO conversation_turns (id, session_id, role, content, created_at) VALUES (?, ?, ?, ?, ?)",
        )
        .bind(&turn.id)
        .bind(&turn.session_id)
        .bind(turn.role.as_str())
        .bind(&turn.content)
        .bind(turn.created_at)
        .execute(&self.pool)
        .await?;
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::migrate::migrate;
    use tempfile::TempDir;
    use warren_core::chunk::chunk_text;
    use warren_core::embedding::EmbeddingProvider;
    use warren_core::models::{ContentKind, Role};
    use warren_core::retrieval::{retrieve, RetrievalParams, RetrievalRequest, RetrievalStrategy};

    async fn store() -> (TempDir, SqliteStore) {
        let tmp = TempDir::new().unwrap();
        let pool = crate::db::connect_path(&tmp.path().join("warren.sqlite"))
            .await
            .unwrap();
        migrate(&pool).await.unwrap();
        (tmp, SqliteStore::new(pool))
    }

    fn item(id: &str, kind: ContentKind, body: &str, updated_at: i64) -> ContentItem {
        ContentItem {
            id: id.into(),
            kind,
            status: ContentStatus::Approved,
            title: format!("Title {}", id),
            body: body.into(),
            audience: None,
            tags: vec!["retirement".into()],
            pinned: false,
            source_url: None,
            created_at: updated_at,
            updated_at,
            content_hash: warren_core::models::content_hash(body),
        }
    }

    async fn add(store: &SqliteStore, item: &ContentItem) {
        store.upsert_content(item).await.unwrap();
        let chunks = chunk_text(&item.id, &item.body, 700);
        store.replace_chunks(&item.id, &chunks).await.unwrap();
    }

    async fn add_embedded(store: &SqliteStore, item: &ContentItem, model: &str, vector: Vec<f32>) {
        add(store, item).await;
        let chunks = chunk_text(&item.id, &item.body, 700);
        for c in &chunks {
            store
                .upsert_embedding(&c.id, &item.id, &vector, model, vector.len(), &c.hash)
                .await
                .unwrap();
        }
    }

    #[tokio::test]
    async fn test_content_roundtrip_and_upsert() {
        let (_tmp, store) = store().await;
        let mut it = item("a", ContentKind::Disclosure, "Investing involves risk.", 1);
        it.audience = Some("retirees".into());
        it.pinned = true;
        store.upsert_content(&it).await.unwrap();
        assert_eq!(store.get_content("a").await.unwrap(), Some(it.clone()));

        it.status = ContentStatus::Rejected;
        it.updated_at = 5;
        store.upsert_content(&it).await.unwrap();
        let got = store.get_content("a").await.unwrap().unwrap();
        assert_eq!(got.status, ContentStatus::Rejected);
        assert_eq!(got.updated_at, 5);
        assert!(store.get_content("missing").await.unwrap().is_none());
    }

    #[tokio::test]
    async fn test_text_search_with_punctuation_and_filter() {
        let (_tmp, store) = store().await;
        add(&store, &item("ex", ContentKind::MarketingExample, "Roth conversion newsletter copy", 1)).await;
        add(&store, &item("rule", ContentKind::ComplianceRule, "Roth conversion claims need balance", 1)).await;

        let all = store
            .text_search("roth \"conversion\" -(", &SearchFilter::default(), 10)
            .await
            .unwrap();
        assert_eq!(all.len(), 2);

        let filter = SearchFilter::approved().with_kinds(&[ContentKind::ComplianceRule]);
        let rules = store.text_search("roth", &filter, 10).await.unwrap();
        assert_eq!(rules.len(), 1);
        assert_eq!(rules[0].content_id, "rule");

        let none = store
            .text_search("?!", &SearchFilter::default(), 10)
            .await
            .unwrap();
        assert!(none.is_empty());
    }

    #[tokio::test]
    async fn test_vector_search_orders_by_similarity() {
        let (_tmp, store) = store().await;
        add_embedded(&store, &item("near", ContentKind::Reference, "near", 1), "m1", vec![1.0, 0.1]).await;
        add_embedded(&store, &item("far", ContentKind::Reference, "far", 1), "m1", vec![0.0, 1.0]).await;

        let hits = store
            .vector_search(&[1.0, 0.0], "m1", &SearchFilter::default(), 1)
            .await
            .unwrap();
        assert_eq!(hits.len(), 1);
        assert_eq!(hits[0].content_id, "near");
    }

    #[tokio::test]
    async fn test_pending_chunks_cleared_by_upsert_embedding() {
        let (_tmp, store) = store().await;
        let it = item("a", ContentKind::Reference, "some text", 1);
        add(&store, &it).await;

        let pending = store.pending_chunks("m1", Some(100)).await.unwrap();
        assert_eq!(pending.len(), 1);
        let p = &pending[0];
        store
            .upsert_embedding(&p.chunk_id, &p.content_id, &[0.5, 0.5], "m1", 2, &p.hash)
            .await
            .unwrap();

        assert!(store.pending_chunks("m1", Some(100)).await.unwrap().is_empty());
        assert_eq!(store.pending_chunks("m2", None).await.unwrap().len(), 1);
        let hits = store
            .vector_search(&[1.0, 1.0], "m1", &SearchFilter::default(), 5)
            .await
            .unwrap();
        assert_eq!(hits.len(), 1);
    }

    #[tokio::test]
    async fn test_text_search_filters_before_limit() {
        let (_tmp, store) = store().await;
        for i in 0..50 {
            let mut draft = item(
                &format!("draft-{:02}", i),
                ContentKind::MarketingExample,
                "roth roth roth conversion",
                1,
            );
            draft.status = ContentStatus::Draft;
            add(&store, &draft).await;
        }
        add(
            &store,
            &item(
                "approved",
                ContentKind::MarketingExample,
                "Ask us whether a Roth conversion fits your tax picture, considering the \
                 taxes due now, your expected bracket later, and your estate plans.",
                1,
            ),
        )
        .await;

        let hits = store
            .text_search("roth", &SearchFilter::approved(), 10)
            .await
            .unwrap();
        assert_eq!(hits.len(), 1);
        assert_eq!(hits[0].content_id, "approved");

        let any = store
            .text_search("roth", &SearchFilter::default(), 10)
            .await
            .unwrap();
        assert_eq!(any.len(), 10);
    }

    #[tokio::test]
    async fn test_audience_and_pinned_filters_run_in_sql() {
        let (_tmp, store) = store().await;
        let mut retirees = item("retirees", ContentKind::Disclosure, "Income is not guaranteed", 1);
        retirees.audience = Some("Retirees".into());
        retirees.pinned = true;
        let mut young = item("young", ContentKind::Disclosure, "Income is not guaranteed", 1);
        young.audience = Some("millennials".into());
        young.pinned = true;
        let general = item("general", ContentKind::Disclosure, "Income is not guaranteed", 1);
        for it in [&retirees, &young, &general] {
            add(&store, it).await;
        }

        let filter = SearchFilter::approved().with_audience(Some("retirees".into()));
        let mut ids: Vec<String> = store
            .text_search("income", &filter, 10)
            .await
            .unwrap()
            .into_iter()
            .map(|c| c.content_id)
            .collect();
        ids.sort();
        assert_eq!(ids, vec!["general", "retirees"]);

        let pinned = store
            .list_content(&SearchFilter::pinned_compliance().with_audience(Some("RETIREES".into())), 10)
            .await
            .unwrap();
        let ids: Vec<&str> = pinned.iter().map(|i| i.id.as_str()).collect();
        assert_eq!(ids, vec!["retirees"]);

        let no_kinds = SearchFilter::default().with_kinds(&[]);
        assert!(store.list_content(&no_kinds, 10).await.unwrap().is_empty());
    }

    #[tokio::test]
    async fn test_vector_search_skips_other_models_and_dims() {
        let (_tmp, store) = store().await;
        add_embedded(&store, &item("legacy", ContentKind::Reference, "legacy", 1), "m0", vec![1.0, 0.0, 0.0]).await;
        add_embedded(&store, &item("wide", ContentKind::Reference, "wide", 1), "m1", vec![1.0, 0.0, 0.0]).await;
        add_embedded(&store, &item("cur", ContentKind::Reference, "cur", 1), "m1", vec![1.0, 0.0]).await;

        let hits = store
            .vector_search(&[1.0, 0.0], "m1", &SearchFilter::default(), 10)
            .await
            .unwrap();
        let ids: Vec<&str> = hits.iter().map(|h| h.content_id.as_str()).collect();
        assert_eq!(ids, vec!["cur"]);

        let none = store
            .vector_search(&[1.0, 0.0], "m2", &SearchFilter::default(), 10)
            .await
            .unwrap();
        assert!(none.is_empty());
    }

    #[tokio::test]
    async fn test_vector_search_applies_filter_in_sql() {
        let (_tmp, store) = store().await;
        let mut draft = item("draft", ContentKind::MarketingExample, "draft", 1);
        draft.status = ContentStatus::Draft;
        add_embedded(&store, &draft, "m1", vec![1.0, 0.0]).await;
        add_embedded(&store, &item("rule", ContentKind::ComplianceRule, "rule", 1), "m1", vec![1.0, 0.0]).await;
        add_embedded(&store, &item("ex", ContentKind::MarketingExample, "ex", 1), "m1", vec![0.0, 1.0]).await;

        let filter = SearchFilter::approved().with_kinds(&[ContentKind::MarketingExample]);
        let hits = store.vector_search(&[1.0, 0.0], "m1", &filter, 10).await.unwrap();
        let ids: Vec<&str> = hits.iter().map(|h| h.content_id.as_str()).collect();
        assert_eq!(ids, vec!["ex"]);
    }

    #[tokio::test]
    async fn test_pending_chunks_without_limit_returns_all() {
        let (_tmp, store) = store().await;
        for id in ["a", "b", "c"] {
            add(&store, &item(id, ContentKind::Reference, "text", 1)).await;
        }
        assert_eq!(store.pending_chunks("m1", None).await.unwrap().len(), 3);
        assert_eq!(store.pending_chunks("m1", Some(2)).await.unwrap().len(), 2);
        assert_eq!(store.pending_chunks("m1", Some(usize::MAX)).await.unwrap().len(), 3);
    }

    struct AxisEmbedder;

    #[async_trait]
    impl EmbeddingProvider for AxisEmbedder {
        fn model_name(&self) -> &str {
            "axis"
        }
        fn dims(&self) -> usize {
            2
        }
        async fn embed(&self, texts: &[String]) -> Result<Vec<Vec<f32>>> {
            Ok(texts
                .iter()
                .map(|t| if t.contains("retire") { vec![1.0, 0.0] } else { vec![0.0, 1.0] })
                .collect())
        }
    }

    fn retrieval_request(query: &str) -> RetrievalRequest<'_> {
        RetrievalRequest {
            query,
            filter: SearchFilter::approved(),
            params: RetrievalParams {
                min_results: 5,
                retry_backoff_ms: 0,
                ..RetrievalParams::default()
            },
        }
    }

    #[tokio::test]
    async fn test_hybrid_retrieval_over_sqlite() {
        let (_tmp, store) = store().await;
        add_embedded(&store, &item("retire", ContentKind::MarketingExample, "Retire early with a Roth IRA", 1), "axis", vec![1.0, 0.0]).await;
        add_embedded(&store, &item("college", ContentKind::MarketingExample, "Saving for college with a 529 plan", 2), "axis", vec![0.0, 1.0]).await;

        let out = retrieve(&store, Some(&AxisEmbedder), &retrieval_request("college 529")).await;
        assert_eq!(out.strategy, RetrievalStrategy::Hybrid);
        assert_eq!(out.vector_candidates, 2);
        assert_eq!(out.text_candidates, 1);
        assert_eq!(out.items[0].item.id, "college");
        assert!(out.warnings.is_empty());
    }

    #[tokio::test]
    async fn test_stale_model_vectors_fall_back_to_text() {
        let (_tmp, store) = store().await;
        add_embedded(&store, &item("retire", ContentKind::MarketingExample, "Retire early with a Roth IRA", 1), "old-3d", vec![0.0, 0.0, 1.0]).await;
        add_embedded(&store, &item("college", ContentKind::MarketingExample, "Saving for college with a 529 plan", 2), "old-3d", vec![0.0, 0.0, 1.0]).await;

        let out = retrieve(&store, Some(&AxisEmbedder), &retrieval_request("college 529")).await;
        assert_eq!(out.vector_candidates, 0);
        assert_eq!(out.strategy, RetrievalStrategy::Text);
        let ids: Vec<&str> = out.items.iter().map(|i| i.item.id.as_str()).collect();
        assert_eq!(ids, vec!["college"]);
        assert!(out.items[0].score > 0.0);
    }

    #[tokio::test]
    async fn test_list_content_filters_and_orders() {
        let (_tmp, store) = store().await;
        for (id, ts) in [("old", 1), ("new", 3), ("mid", 2)] {
            store
                .upsert_content(&item(id, ContentKind::MarketingExample, "x", ts))
                .await
                .unwrap();
        }
        let mut draft = item("draft", ContentKind::MarketingExample, "x", 9);
        draft.status = ContentStatus::Draft;
        store.upsert_content(&draft).await.unwrap();

        let listed = store.list_content(&SearchFilter::approved(), 2).await.unwrap();
        let ids: Vec<&str> = listed.iter().map(|i| i.id.as_str()).collect();
        assert_eq!(ids, vec!["new", "mid"]);
    }

    #[tokio::test]
    async fn test_history_returns_last_turns_in_order() {
        let (_tmp, store) = store().await;
        for i in 0..5 {
            let mut t = ConversationTurn::new("s1", Role::User, format!("m{}", i));
            t.created_at = 100;
            store.append_turn(&t).await.unwrap();
        }
        store
            .append_turn(&ConversationTurn::new("other", Role::User, "x"))
            .await
            .unwrap();

        let turns = store.conversation_history("s1", 3).await.unwrap();
        let contents: Vec<&str> = turns.iter().map(|t| t.content.as_str()).collect();
        assert_eq!(contents, vec!["m2", "m3", "m4"]);
    }

    #[tokio::test]
    async fn test_session_documents_newest_first() {
        let (_tmp, store) = store().await;
        for (id, ts) in [("d1", 1), ("d2", 2)] {
            store
                .add_session_document(&SessionDocument {
                    id: id.into(),
                    session_id: "s".into(),
                    title: id.into(),
                    body: "b".into(),
                    created_at: ts,
                })
                .await
                .unwrap();
        }
        let docs = store.session_documents("s").await.unwrap();
        assert_eq!(docs[0].id, "d2");
        assert!(store.session_documents("none").await.unwrap().is_empty());
    }
}
