//! # Warren
//!
//! **A compliance-aware marketing content assistant for financial advisors.**
//!
//! Warren drafts newsletters, social posts, and client emails grounded in a
//! firm's approved marketing examples and SEC / FINRA compliance rules. Its
//! pipeline keeps working when parts of it fail: retrieval degrades from
//! vector search to text search to an emergency listing, and generation
//! falls back to a canned response rather than erroring.
//!
//! ## Architecture
//!
//! ```text
//! ┌──────────┐   ┌─────────────┐   ┌──────────┐
//! │ Content  │──▶│ Chunk+Embed │──▶│  SQLite  │
//! │  (JSON)  │   │  (ingest)   │   │ FTS5+Vec │
//! └──────────┘   └─────────────┘   └────┬─────┘
//!                                       │
//!                          ┌────────────┴──┐
//!                          ▼               ▼
//!                   ┌────────────┐   ┌──────────┐
//!                   │ retrieval  │──▶│ assemble │──▶ LLM ──▶ screen
//!                   └────────────┘   └──────────┘
//! ```
//!
//! The retrieval, packing, and screening logic lives in `warren-core`; this
//! crate supplies SQLite persistence, HTTP providers, the service, the HTTP
//! API, and the CLI.
//!
//! ## Modules
//!
//! | Module | Purpose |
//! |--------|---------|
//! | [`config`] | TOML configuration parsing, validation, logging setup |
//! | [`db`] | SQLite connection pool with WAL mode |
//! | [`migrate`] | Database schema migrations (idempotent) |
//! | [`sqlite_store`] | `ContentStore` / `SessionStore` over SQLite |
//! | [`http`] | Outbound JSON POST with retry and backoff |
//! | [`embedding`] | OpenAI and Ollama embedding providers |
//! | [`llm`] | Anthropic and OpenAI completion clients |
//! | [`ingest`] | Content ingestion and embedding backfill |
//! | [`warren`] | The generation service |
//! | [`server`] | HTTP API (Axum) with CORS |
//! | [`commands`] | CLI command implementations |
//!
//! ## Configuration
//!
//! Warren is configured via a TOML file (default: `config/warren.toml`).
//! See [`config`] for all options and [`config::load_config`] for
//! validation rules.

pub mod commands;
pub mod config;
pub mod db;
pub mod embedding;
pub mod http;
pub mod ingest;
pub mod llm;
pub mod migrate;
pub mod server;
pub mod sqlite_store;
pub mod warren;

pub use warren::{GenerationRequest, GenerationResponse, Warren};
pub use warren_core::store;
