//! Audit log of ranking decisions.
//!
//! Every retrieval produces one [`ChunkRelevanceLogEntry`]: the full
//! ranked candidate list plus the subset handed downstream. The
//! [`RelevanceLogger`] expands it into one [`ChunkRelevanceRecord`] per
//! candidate and writes them as a single batch.
//!
//! Logging is strictly best-effort. [`RelevanceLogger::log`] returns `()`
//! and swallows every failure:
//!
//! - [`SinkError::MissingStorage`] → `warn!` (log table not created yet)
//! - [`SinkError::Other`] → `error!`

use std::collections::HashSet;
use std::sync::Arc;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use sha2::{Digest, Sha256};
use tracing::{debug, error, warn};

use crate::intent::QueryIntent;
use crate::models::RetrievedChunk;
use crate::store::{RelevanceSink, SinkError};

/// Default row count for [`RelevanceLogger::recent_logs`].
pub const DEFAULT_RECENT_LIMIT: usize = 100;

/// One retrieval's ranking outcome. Immutable once built.
#[derive(Debug, Clone)]
pub struct ChunkRelevanceLogEntry {
    pub user_id: String,
    pub conversation_id: Option<String>,
    pub query: String,
    pub intent: QueryIntent,
    /// Ranked candidates, best first.
    pub chunks: Vec<RetrievedChunk>,
    /// Subset of `chunks` passed to answer composition.
    pub selected_chunks: Vec<RetrievedChunk>,
    pub timestamp: DateTime<Utc>,
}

/// A persisted per-chunk log row.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ChunkRelevanceRecord {
    /// SHA-256 of user, conversation, query, chunk and timestamp; the
    /// conflict key for idempotent inserts.
    pub id: String,
    pub user_id: String,
    pub conversation_id: Option<String>,
    pub query: String,
    pub intent: QueryIntent,
    pub chunk_id: String,
    pub document_id: String,
    pub score: f64,
    pub page_number: Option<u32>,
    /// 0-based position in the ranked list.
    pub rank_index: usize,
    pub selected: bool,
    pub created_at: DateTime<Utc>,
}

/// Expand an entry into one record per ranked chunk.
pub fn build_records(entry: &ChunkRelevanceLogEntry) -> Vec<ChunkRelevanceRecord> {
    let selected: HashSet<&str> = entry
        .selected_chunks
        .iter()
        .map(|c| c.chunk_id.as_str())
        .collect();

    entry
        .chunks
        .iter()
        .enumerate()
        .map(|(rank_index, chunk)| ChunkRelevanceRecord {
            id: record_id(entry, &chunk.chunk_id),
            user_id: entry.user_id.clone(),
            conversation_id: entry.conversation_id.clone(),
            query: entry.query.clone(),
            intent: entry.intent,
            chunk_id: chunk.chunk_id.clone(),
            document_id: chunk.document_id.clone(),
            score: chunk.score,
            page_number: chunk.page_number,
            rank_index,
            selected: selected.contains(chunk.chunk_id.as_str()),
            created_at: entry.timestamp,
        })
        .collect()
}

fn record_id(entry: &ChunkRelevanceLogEntry, chunk_id: &str) -> String {
    let mut hasher = Sha256::new();
    hasher.update(entry.user_id.as_bytes());
    hasher.update([0u8]);
    hasher.update(entry.conversation_id.as_deref().unwrap_or("").as_bytes());
    hasher.update([0u8]);
    hasher.update(entry.query.as_bytes());
    hasher.update([0u8]);
    hasher.update(chunk_id.as_bytes());
    hasher.update([0u8]);
    hasher.update(entry.timestamp.timestamp_micros().to_le_bytes());
    format!("{:x}", hasher.finalize())
}

/// Writes relevance logs without ever failing the caller.
#[derive(Clone)]
pub struct RelevanceLogger {
    sink: Arc<dyn RelevanceSink>,
}

impl RelevanceLogger {
    pub fn new(sink: Arc<dyn RelevanceSink>) -> Self {
        Self { sink }
    }

    /// Persist `entry` as a batch of per-chunk records.
    ///
    /// Returns immediately for an empty candidate list.
    pub async fn log(&self, entry: &ChunkRelevanceLogEntry) {
        if entry.chunks.is_empty() {
            return;
        }

        let records = build_records(entry);
        match self.sink.insert_batch(&records).await {
            Ok(()) => debug!(
                user_id = %entry.user_id,
                records = records.len(),
                selected = entry.selected_chunks.len(),
                "relevance log written"
            ),
            Err(SinkError::MissingStorage(storage)) => warn!(
                storage = %storage,
                "relevance log storage missing; skipping"
            ),
            Err(SinkError::Other(e)) => error!(
                user_id = %entry.user_id,
                error = %e,
                "failed to write relevance log"
            ),
        }
    }

    /// Recent records for a user; empty on any failure.
    pub async fn recent_logs(&self, user_id: &str, limit: usize) -> Vec<ChunkRelevanceRecord> {
        match self.sink.recent(user_id, limit).await {
            Ok(rows) => rows,
            Err(e) => {
                warn!(user_id, error = %e, "could not read relevance logs");
                Vec::new()
            }
        }
    }
}
