//! Idempotent schema creation.
//!
//! Every statement uses `IF NOT EXISTS` (FTS5 virtual tables are checked
//! against `sqlite_master` first), so `warren init` can run any number of
//! times against the same database.

use anyhow::Result;
use sqlx::SqlitePool;
use tracing::info;

use crate::config::Config;
use crate::db;

const TABLES: &[&str] = &[
    r#"
    CREATE TABLE IF NOT EXISTS content_items (
        id TEXT PRIMARY KEY,
        kind TEXT NOT NULL,
        status TEXT NOT NULL DEFAULT 'draft',
        title TEXT NOT NULL,
        body TEXT NOT NULL,
        audience TEXT,
        tags_json TEXT NOT NULL DEFAULT '[]',
        pinned INTEGER NOT NULL DEFAULT 0,
        source_url TEXT,
        created_at INTEGER NOT NULL,
        updated_at INTEGER NOT NULL,
        content_hash TEXT NOT NULL
    )
    "#,
    r#"
    CREATE TABLE IF NOT EXISTS chunks (
        id TEXT PRIMARY KEY,
        content_id TEXT NOT NULL,
        chunk_index INTEGER NOT NULL,
        text TEXT NOT NULL,
        hash TEXT NOT NULL,
        UNIQUE(content_id, chunk_index),
        FOREIGN KEY (content_id) REFERENCES content_items(id)
    )
    "#,
    r#"
    CREATE TABLE IF NOT EXISTS embeddings (
        chunk_id TEXT PRIMARY KEY,
        model TEXT NOT NULL,
        dims INTEGER NOT NULL,
        created_at INTEGER NOT NULL,
        hash TEXT NOT NULL
    )
    "#,
    r#"
    CREATE TABLE IF NOT EXISTS chunk_vectors (
        chunk_id TEXT PRIMARY KEY,
        content_id TEXT NOT NULL,
        embedding BLOB NOT NULL
    )
    "#,
    r#"
    CREATE TABLE IF NOT EXISTS session_documents (
        id TEXT PRIMARY KEY,
        session_id TEXT NOT NULL,
        title TEXT NOT NULL,
        body TEXT NOT NULL,
        created_at INTEGER NOT NULL
    )
    "#,
    r#"
    CREATE TABLE IF NOT EXISTS conversation_turns (
        id TEXT PRIMARY KEY,
        session_id TEXT NOT NULL,
        role TEXT NOT NULL,
        content TEXT NOT NULL,
        created_at INTEGER NOT NULL
    )
    "#,
];

const INDEXES: &[&str] = &[
    "CREATE INDEX IF NOT EXISTS idx_chunks_content_id ON chunks(content_id)",
    "CREATE INDEX IF NOT EXISTS idx_content_kind_status ON content_items(kind, status)",
    "CREATE INDEX IF NOT EXISTS idx_content_updated_at ON content_items(updated_at DESC)",
    "CREATE INDEX IF NOT EXISTS idx_session_documents_session ON session_documents(session_id, created_at)",
    "CREATE INDEX IF NOT EXISTS idx_turns_session ON conversation_turns(session_id, created_at)",
];

/// Connect to the configured database and create the schema.
pub async fn run_migrations(config: &Config) -> Result<()> {
    let pool = db::connect(config).await?;
    migrate(&pool).await?;
    pool.close().await;
    info!(path = %config.db.path.display(), "database initialized");
    Ok(())
}

/// Create all tables, the FTS5 index, and secondary indexes.
pub async fn migrate(pool: &SqlitePool) -> Result<()> {
    for ddl in TABLES {
        sqlx::query(ddl).execute(pool).await?;
    }

    let fts_exists: bool = sqlx::query_scalar(
        "SELECT COUNT(*) > 0 FROM sqlite_master WHERE type='table' AND name='chunks_fts'",
    )
    .fetch_one(pool)
    .await?;

    if !fts_exists {
        sqlx::query(
            r#"
            CREATE VIRTUAL TABLE chunks_fts USING fts5(
                chunk_id UNINDEXED,
                content_id UNINDEXED,
                text
            )
            "#,
        )
        .execute(pool)
        .await?;
    }

    for ddl in INDEXES {
        sqlx::query(ddl).execute(pool).await?;
    }

    Ok(())
}
