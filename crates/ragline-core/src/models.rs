//! Core data types shared by the ranking, fusion, logging and
//! contradiction modules.
//!
//! | Type | Produced by | Consumed by |
//! |------|-------------|-------------|
//! | [`IndexInput`] | caller / [`DocumentSource::corpus`](crate::store::DocumentSource::corpus) | [`LexicalIndex::build`](crate::bm25::LexicalIndex::build) |
//! | [`LexicalHit`] | [`LexicalIndex::search`](crate::bm25::LexicalIndex::search) | [`fuse`](crate::fusion::fuse) |
//! | [`RetrievedChunk`] | semantic provider, [`fuse`](crate::fusion::fuse) | selection, relevance logging |
//! | [`FullDocument`] | [`DocumentSource`](crate::store::DocumentSource) | contradiction detection |

use serde::{Deserialize, Serialize};

/// A unit of text handed to the lexical index: `{id, content}`.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct IndexInput {
    pub id: String,
    pub content: String,
}

impl IndexInput {
    pub fn new(id: impl Into<String>, content: impl Into<String>) -> Self {
        Self {
            id: id.into(),
            content: content.into(),
        }
    }
}

/// One lexical search result.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct LexicalHit {
    pub id: String,
    pub score: f64,
}

/// A candidate chunk produced by either ranking source.
///
/// `score` is source-specific until it has passed through fusion.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct RetrievedChunk {
    pub chunk_id: String,
    pub document_id: String,
    pub score: f64,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub page_number: Option<u32>,
}

impl RetrievedChunk {
    pub fn new(chunk_id: impl Into<String>, document_id: impl Into<String>, score: f64) -> Self {
        Self {
            chunk_id: chunk_id.into(),
            document_id: document_id.into(),
            score,
            page_number: None,
        }
    }
}

/// A stored chunk of a document, the unit both ranking sources operate on.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Chunk {
    /// Chunk UUID.
    pub id: String,
    /// Parent document ID.
    pub document_id: String,
    /// Zero-based position within the document.
    pub chunk_index: i64,
    /// Page the chunk was extracted from, when the source format has pages.
    pub page_number: Option<u32>,
    pub text: String,
    /// SHA-256 hex digest of `text`.
    pub hash: String,
}

impl Chunk {
    pub fn to_index_input(&self) -> IndexInput {
        IndexInput::new(self.id.clone(), self.text.clone())
    }
}

/// A whole document as seen by the contradiction detector.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct FullDocument {
    pub filename: String,
    pub content: String,
}

/// A user document with its ownership and folder placement.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Document {
    pub id: String,
    /// Owning user; the ranking scope.
    pub user_id: String,
    /// Folder the document was uploaded into, if any.
    pub folder: Option<String>,
    pub filename: String,
    pub content: String,
    /// Unix timestamp (seconds).
    pub updated_at: i64,
    /// SHA-256 of the content, used to skip unchanged re-ingestion.
    pub dedup_hash: String,
}

impl Document {
    pub fn to_full(&self) -> FullDocument {
        FullDocument {
            filename: self.filename.clone(),
            content: self.content.clone(),
        }
    }
}
