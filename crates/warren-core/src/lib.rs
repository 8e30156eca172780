//! # Warren Core
//!
//! Runtime-agnostic logic for Warren, the compliance-aware marketing
//! assistant: data models, chunking, the store abstraction, staged
//! retrieval, token-bounded context assembly, and compliance screening.
//!
//! This crate performs no database, filesystem, or network I/O. Storage and
//! provider backends implement the traits defined here and live in the
//! `warren` application crate.
//!
//! # Modules
//!
//! | Module | Purpose |
//! |--------|---------|
//! | [`models`] | Content items, chunks, session documents, conversation turns |
//! | [`chunk`] | Paragraph-boundary text chunker |
//! | [`tokens`] | Token estimate and budget-aware truncation |
//! | [`store`] | `ContentStore` / `SessionStore` traits and an in-memory store |
//! | [`embedding`] | `EmbeddingProvider` trait and vector math |
//! | [`retrieval`] | Vector, text, emergency, and canned retrieval stages |
//! | [`assembler`] | Compliance-first prompt packing under a token budget |
//! | [`prompt`] | Provider-neutral prompt payload |
//! | [`compliance`] | Prohibited-claim screening of generated drafts |

pub mod assembler;
pub mod chunk;
pub mod compliance;
pub mod embedding;
pub mod models;
pub mod prompt;
pub mod retrieval;
pub mod store;
pub mod tokens;
