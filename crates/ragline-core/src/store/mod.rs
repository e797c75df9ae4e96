//! Collaborator interfaces consumed by the retrieval core.
//!
//! The core never talks to a database or vector service directly. It
//! goes through these traits, which the application implements over
//! SQLite (`ragline::sqlite_store`) and this crate implements in memory
//! ([`memory::InMemoryStore`]) for tests.
//!
//! | Trait | Purpose |
//! |-------|---------|
//! | [`SemanticSearch`] | Embedding-similarity candidates for a query vector |
//! | [`DocumentSource`] | Full documents, folder membership, corpus chunks |
//! | [`RelevanceSink`] | Batched persistence of relevance-log records |
//!
//! Implementations must be `Send + Sync` to work with async runtimes.

pub mod memory;

use anyhow::Result;
use async_trait::async_trait;
use thiserror::Error;

use crate::models::{Chunk, FullDocument, RetrievedChunk};
use crate::relevance::ChunkRelevanceRecord;

/// Inputs for one semantic search call.
#[derive(Debug, Clone)]
pub struct SemanticQuery<'a> {
    /// Pre-computed query embedding.
    pub embedding: &'a [f32],
    /// Ranking scope, e.g. the owning user.
    pub scope: &'a str,
    /// Maximum candidates to return.
    pub limit: usize,
    /// Candidates below this similarity are dropped.
    pub min_similarity: f64,
    /// Only consider chunks of these documents.
    pub document_ids: Option<&'a [String]>,
}

/// Semantic (vector) search provider.
///
/// Returns candidates ordered by similarity, best first. Scores are
/// opaque to the core and normalised during fusion.
#[async_trait]
pub trait SemanticSearch: Send + Sync {
    async fn search(&self, query: &SemanticQuery<'_>) -> Result<Vec<RetrievedChunk>>;
}

/// Document content and corpus provider.
#[async_trait]
pub trait DocumentSource: Send + Sync {
    /// Fetch a whole document by ID.
    async fn get_document(&self, id: &str) -> Result<Option<FullDocument>>;

    /// IDs of `scope`'s documents inside `folder` (case-insensitive name match).
    async fn documents_in_folder(&self, scope: &str, folder: &str) -> Result<Vec<String>>;

    /// Every chunk owned by `scope`, used to rebuild the lexical index.
    async fn corpus(&self, scope: &str) -> Result<Vec<Chunk>>;
}

/// Failure modes of a [`RelevanceSink`].
#[derive(Debug, Error)]
pub enum SinkError {
    /// The storage target (table, collection) does not exist.
    #[error("relevance log storage is not defined: {0}")]
    MissingStorage(String),
    #[error(transparent)]
    Other(#[from] anyhow::Error),
}

/// Persistence for relevance-log records.
#[async_trait]
pub trait RelevanceSink: Send + Sync {
    /// Insert all records in one batch. Records whose `id` already exists
    /// are skipped.
    async fn insert_batch(&self, records: &[ChunkRelevanceRecord]) -> Result<(), SinkError>;

    /// The most recent records for `user_id`, newest first.
    async fn recent(&self, user_id: &str, limit: usize)
        -> Result<Vec<ChunkRelevanceRecord>, SinkError>;
}
