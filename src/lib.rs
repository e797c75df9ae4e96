//! # ragline
//!
//! Retrieval for a document-chat assistant: hybrid BM25 + semantic
//! ranking over each user's documents, folder-aware query intents, an
//! audit log of every ranking decision and optional cross-document
//! contradiction detection.
//!
//! The algorithms live in [`ragline_core`]; this crate stores documents
//! in SQLite, talks to OpenAI for embeddings and completions, and wires
//! everything into a [`retrieval::RetrievalService`] and the `ragline` CLI.
//!
//! ## Modules
//!
//! | Module | Purpose |
//! |--------|---------|
//! | [`config`] | TOML configuration parsing |
//! | [`db`] | Database connection |
//! | [`migrate`] | Schema migrations |
//! | [`sqlite_store`] | SQLite collaborators for the core traits |
//! | [`embedding`] | Embedding providers |
//! | [`llm`] | Chat-completion provider |
//! | [`ingest`] | Directory ingestion |
//! | [`contradiction`] | Timed contradiction detection |
//! | [`retrieval`] | The retrieval pipeline |
//! | [`search`] | `search`, `intent` and `logs` commands |
//! | [`stats`] | Per-user statistics |

pub mod config;
pub mod contradiction;
pub mod db;
pub mod embedding;
pub mod ingest;
pub mod llm;
pub mod migrate;
pub mod retrieval;
pub mod search;
pub mod sqlite_store;
pub mod stats;
