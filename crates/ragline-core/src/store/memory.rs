//! In-memory collaborator implementation used by tests and small deployments.
//!
//! Uses `HashMap` and `Vec` behind `std::sync::RwLock` for thread safety.
//! Semantic search is brute-force cosine similarity over all stored
//! vectors of the requested scope.

use std::collections::{HashMap, HashSet};
use std::sync::RwLock;

use anyhow::Result;
use async_trait::async_trait;

use crate::embedding::cosine_similarity;
use crate::models::{Chunk, Document, FullDocument, RetrievedChunk};
use crate::relevance::ChunkRelevanceRecord;

use super::{DocumentSource, RelevanceSink, SemanticQuery, SemanticSearch, SinkError};

struct StoredVector {
    chunk_id: String,
    document_id: String,
    page_number: Option<u32>,
    vector: Vec<f32>,
}

/// In-memory store implementing every collaborator trait.
pub struct InMemoryStore {
    docs: RwLock<HashMap<String, Document>>,
    chunks: RwLock<Vec<Chunk>>,
    vectors: RwLock<Vec<StoredVector>>,
    relevance: RwLock<Vec<ChunkRelevanceRecord>>,
}

impl InMemoryStore {
    pub fn new() -> Self {
        Self {
            docs: RwLock::new(HashMap::new()),
            chunks: RwLock::new(Vec::new()),
            vectors: RwLock::new(Vec::new()),
            relevance: RwLock::new(Vec::new()),
        }
    }

    /// Insert or replace a document.
    pub fn upsert_document(&self, doc: Document) {
        let mut docs = self.docs.write().unwrap_or_else(|e| e.into_inner());
        docs.insert(doc.id.clone(), doc);
    }

    /// Replace all chunks of `doc_id`, optionally with one vector per chunk.
    pub fn replace_chunks(&self, doc_id: &str, chunks: &[Chunk], vectors: Option<&[Vec<f32>]>) {
        {
            let mut stored = self.chunks.write().unwrap_or_else(|e| e.into_inner());
            stored.retain(|c| c.document_id != doc_id);
            stored.extend(chunks.iter().cloned());
        }
        let mut stored_vecs = self.vectors.write().unwrap_or_else(|e| e.into_inner());
        stored_vecs.retain(|sv| sv.document_id != doc_id);
        if let Some(vecs) = vectors {
            for (c, v) in chunks.iter().zip(vecs) {
                stored_vecs.push(StoredVector {
                    chunk_id: c.id.clone(),
                    document_id: doc_id.to_string(),
                    page_number: c.page_number,
                    vector: v.clone(),
                });
            }
        }
    }

    /// Number of relevance records held.
    pub fn relevance_len(&self) -> usize {
        self.relevance.read().unwrap_or_else(|e| e.into_inner()).len()
    }

    fn owner_of(&self, doc_id: &str) -> Option<String> {
        let docs = self.docs.read().unwrap_or_else(|e| e.into_inner());
        docs.get(doc_id).map(|d| d.user_id.clone())
    }
}

impl Default for InMemoryStore {
    fn default() -> Self {
        Self::new()
    }
}

#[async_trait]
impl SemanticSearch for InMemoryStore {
    async fn search(&self, query: &SemanticQuery<'_>) -> Result<Vec<RetrievedChunk>> {
        let allowed: Option<HashSet<&str>> = query
            .document_ids
            .map(|ids| ids.iter().map(String::as_str).collect());

        let vecs = self.vectors.read().unwrap_or_else(|e| e.into_inner());
        let mut candidates: Vec<RetrievedChunk> = vecs
            .iter()
            .filter(|sv| {
                allowed
                    .as_ref()
                    .map_or(true, |set| set.contains(sv.document_id.as_str()))
            })
            .filter(|sv| self.owner_of(&sv.document_id).as_deref() == Some(query.scope))
            .filter_map(|sv| {
                let sim = cosine_similarity(query.embedding, &sv.vector);
                (sim >= query.min_similarity).then(|| RetrievedChunk {
                    chunk_id: sv.chunk_id.clone(),
                    document_id: sv.document_id.clone(),
                    score: sim,
                    page_number: sv.page_number,
                })
            })
            .collect();
        candidates.sort_by(|a, b| {
            b.score
                .partial_cmp(&a.score)
                .unwrap_or(std::cmp::Ordering::Equal)
        });
        candidates.truncate(query.limit);
        Ok(candidates)
    }
}

#[async_trait]
impl DocumentSource for InMemoryStore {
    async fn get_document(&self, id: &str) -> Result<Option<FullDocument>> {
        let docs = self.docs.read().unwrap_or_else(|e| e.into_inner());
        Ok(docs.get(id).map(Document::to_full))
    }

    async fn documents_in_folder(&self, scope: &str, folder: &str) -> Result<Vec<String>> {
        let docs = self.docs.read().unwrap_or_else(|e| e.into_inner());
        let mut ids: Vec<String> = docs
            .values()
            .filter(|d| d.user_id == scope)
            .filter(|d| {
                d.folder
                    .as_deref()
                    .is_some_and(|f| f.eq_ignore_ascii_case(folder))
            })
            .map(|d| d.id.clone())
            .collect();
        ids.sort();
        Ok(ids)
    }

    async fn corpus(&self, scope: &str) -> Result<Vec<Chunk>> {
        let owned: HashSet<String> = {
            let docs = self.docs.read().unwrap_or_else(|e| e.into_inner());
            docs.values()
                .filter(|d| d.user_id == scope)
                .map(|d| d.id.clone())
                .collect()
        };
        let chunks = self.chunks.read().unwrap_or_else(|e| e.into_inner());
        Ok(chunks
            .iter()
            .filter(|c| owned.contains(&c.document_id))
            .cloned()
            .collect())
    }
}

#[async_trait]
impl RelevanceSink for InMemoryStore {
    async fn insert_batch(&self, records: &[ChunkRelevanceRecord]) -> Result<(), SinkError> {
        let mut stored = self.relevance.write().unwrap_or_else(|e| e.into_inner());
        let mut seen: HashSet<String> = stored.iter().map(|r| r.id.clone()).collect();
        for r in records {
            if seen.insert(r.id.clone()) {
                stored.push(r.clone());
            }
        }
        Ok(())
    }

    async fn recent(
        &self,
        user_id: &str,
        limit: usize,
    ) -> Result<Vec<ChunkRelevanceRecord>, SinkError> {
        let stored = self.relevance.read().unwrap_or_else(|e| e.into_inner());
        let mut rows: Vec<ChunkRelevanceRecord> = stored
            .iter()
            .filter(|r| r.user_id == user_id)
            .cloned()
            .collect();
        rows.sort_by(|a, b| {
            b.created_at
                .cmp(&a.created_at)
                .then(a.rank_index.cmp(&b.rank_index))
        });
        rows.truncate(limit);
        Ok(rows)
    }
}
