//! # ragline core
//!
//! Retrieval and ranking logic for the ragline chat assistant: the
//! tokenizer, an in-memory BM25 index, the query intent parser, hybrid
//! score fusion with document-diversity selection, chunk relevance
//! logging and LLM-backed contradiction detection.
//!
//! Storage, embedding and completion backends are reached through the
//! async traits in [`store`], [`embedding`] and [`llm`]. This crate
//! contains no tokio runtime, sqlx, or filesystem I/O; the `ragline`
//! app crate wires concrete implementations in.

pub mod bm25;
pub mod chunk;
pub mod contradiction;
pub mod embedding;
pub mod fusion;
pub mod intent;
pub mod llm;
pub mod models;
pub mod relevance;
pub mod store;
pub mod tokenize;
