//! # ChatVat
//!
//! A self-refreshing knowledge service: it ingests web pages, JSON APIs
//! and local documents into a deduplicated knowledge base of embedded
//! chunks, and answers questions by retrieving the most relevant chunks
//! and handing them to a completion model.
//!
//! ## Architecture
//!
//! ```text
//! ┌──────────────┐   ┌─────────────────────┐   ┌───────────┐
//! │   Sources    │──▶│ Refresh orchestrator │──▶│  SQLite   │
//! │ web/json/file│   │ chunk+fingerprint+emb│   │ knowledge │
//! └──────────────┘   └─────────────────────┘   └─────┬─────┘
//!                                                    │ (concurrent reads)
//!                          ┌─────────────────────────┤
//!                          ▼                         ▼
//!                    ┌──────────┐              ┌──────────┐
//!                    │   CLI    │              │   HTTP   │
//!                    │(chatvat) │              │ /chat    │
//!                    └──────────┘              └──────────┘
//! ```
//!
//! Runtime-agnostic pieces (models, fingerprinting, chunking, ranking,
//! retrieval, prompt composition) live in the `chatvat-core` crate.
//!
//! ## Modules
//!
//! | Module | Purpose |
//! |--------|---------|
//! | [`config`] | JSON/TOML configuration and validation |
//! | [`fetch`] | Source fetchers (web, JSON API, local file) |
//! | [`extract`] | PDF and DOCX text extraction |
//! | [`embedding`] | Embedding providers |
//! | [`completion`] | Chat completion providers |
//! | [`sqlite_store`] | Persistent knowledge store |
//! | [`refresh`] | Refresh orchestrator |
//! | [`chat`] | Query path with per-request timeout |
//! | [`server`] | HTTP server |
//! | [`db`] / [`migrate`] | Database connection and schema |

pub mod app;
pub mod chat;
pub mod completion;
pub mod config;
pub mod db;
pub mod embedding;
pub mod extract;
pub mod fetch;
pub mod migrate;
pub mod refresh;
pub mod retry;
pub mod server;
pub mod sqlite_store;
