//! In-memory BM25 ranking over a single user's corpus.
//!
//! A [`LexicalIndex`] is an immutable snapshot built in one pass from a
//! list of `{id, content}` inputs. There is no incremental update: a
//! rebuild produces a new snapshot. [`SharedIndex`] holds the current
//! snapshot behind an `Arc` and swaps it atomically, so queries running
//! against the old snapshot are never blocked by a rebuild.
//!
//! # Scoring
//!
//! For each query term with `tf > 0` in a document and `df > 0` in the
//! corpus:
//!
//! ```text
//! idf   = ln((N - df + 0.5) / (df + 0.5) + 1)
//! tfc   = tf·(k1+1) / (tf + k1·(1 - b + b·dl/avgdl))
//! score += idf · tfc
//! ```
//!
//! with `k1 = 1.5`, `b = 0.75`. Documents scoring `<= 0` are dropped.

use std::collections::HashMap;
use std::sync::{Arc, RwLock};

use serde::Serialize;
use tracing::{debug, info, warn};

use crate::models::{IndexInput, LexicalHit};
use crate::tokenize::tokenize;

/// Term-frequency saturation.
pub const K1: f64 = 1.5;
/// Length normalisation.
pub const B: f64 = 0.75;

/// Default result count for [`LexicalIndex::search`] callers.
pub const DEFAULT_TOP_K: usize = 10;

/// A document as held by the index, with its token sequence.
#[derive(Debug, Clone)]
pub struct CorpusDocument {
    pub id: String,
    pub content: String,
    pub tokens: Vec<String>,
    term_frequency: HashMap<String, usize>,
}

impl CorpusDocument {
    fn new(input: &IndexInput) -> Self {
        let tokens = tokenize(&input.content);
        let mut term_frequency: HashMap<String, usize> = HashMap::new();
        for t in &tokens {
            *term_frequency.entry(t.clone()).or_default() += 1;
        }
        Self {
            id: input.id.clone(),
            content: input.content.clone(),
            tokens,
            term_frequency,
        }
    }

    pub fn len(&self) -> usize {
        self.tokens.len()
    }

    pub fn is_empty(&self) -> bool {
        self.tokens.is_empty()
    }

    pub fn term_frequency(&self, term: &str) -> usize {
        self.term_frequency.get(term).copied().unwrap_or(0)
    }
}

/// Read-only summary of an index snapshot.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct IndexStats {
    pub total_documents: usize,
    pub unique_terms: usize,
    pub average_doc_length: f64,
}

/// Immutable BM25 index snapshot.
#[derive(Debug, Clone, Default)]
pub struct LexicalIndex {
    /// Documents in insertion order; ties in ranking keep this order.
    documents: Vec<CorpusDocument>,
    positions: HashMap<String, usize>,
    document_frequency: HashMap<String, usize>,
    average_doc_length: f64,
}

impl LexicalIndex {
    /// The cleared state: no documents, no vocabulary.
    pub fn empty() -> Self {
        Self::default()
    }

    /// Build a snapshot from scratch.
    ///
    /// A repeated `id` replaces the earlier content but keeps the earlier
    /// position in enumeration order.
    pub fn build(inputs: &[IndexInput]) -> Self {
        let mut documents: Vec<CorpusDocument> = Vec::with_capacity(inputs.len());
        let mut positions: HashMap<String, usize> = HashMap::with_capacity(inputs.len());

        for input in inputs {
            let doc = CorpusDocument::new(input);
            match positions.get(&doc.id) {
                Some(&pos) => documents[pos] = doc,
                None => {
                    positions.insert(doc.id.clone(), documents.len());
                    documents.push(doc);
                }
            }
        }

        let mut document_frequency: HashMap<String, usize> = HashMap::new();
        let mut total_len = 0usize;
        for doc in &documents {
            total_len += doc.len();
            for term in doc.term_frequency.keys() {
                *document_frequency.entry(term.clone()).or_default() += 1;
            }
        }

        let average_doc_length = if documents.is_empty() {
            0.0
        } else {
            total_len as f64 / documents.len() as f64
        };

        info!(
            documents = documents.len(),
            average_doc_length,
            vocabulary = document_frequency.len(),
            "lexical index built"
        );

        Self {
            documents,
            positions,
            document_frequency,
            average_doc_length,
        }
    }

    pub fn len(&self) -> usize {
        self.documents.len()
    }

    pub fn is_empty(&self) -> bool {
        self.documents.is_empty()
    }

    pub fn get(&self, id: &str) -> Option<&CorpusDocument> {
        self.positions.get(id).map(|&pos| &self.documents[pos])
    }

    /// Number of documents containing `term`.
    pub fn document_frequency(&self, term: &str) -> usize {
        self.document_frequency.get(term).copied().unwrap_or(0)
    }

    pub fn average_doc_length(&self) -> f64 {
        self.average_doc_length
    }

    /// Inverse document frequency for a term with the given `df`.
    pub fn idf(&self, df: usize) -> f64 {
        let n = self.documents.len() as f64;
        let df = df as f64;
        ((n - df + 0.5) / (df + 0.5) + 1.0).ln()
    }

    /// Score every document against `query` and return the best `top_k`.
    ///
    /// Out-of-vocabulary query terms contribute nothing. Returns an empty
    /// list when the query has no usable terms or the index is empty.
    pub fn search(&self, query: &str, top_k: usize) -> Vec<LexicalHit> {
        let terms = tokenize(query);
        if terms.is_empty() {
            warn!(query, "query produced no index terms");
            return Vec::new();
        }
        if self.documents.is_empty() {
            warn!("search against an empty lexical index");
            return Vec::new();
        }

        let mut hits: Vec<LexicalHit> = self
            .documents
            .iter()
            .filter_map(|doc| {
                let score = self.score(doc, &terms);
                (score > 0.0).then(|| LexicalHit {
                    id: doc.id.clone(),
                    score,
                })
            })
            .collect();

        // Stable: equal scores keep insertion order.
        hits.sort_by(|a, b| {
            b.score
                .partial_cmp(&a.score)
                .unwrap_or(std::cmp::Ordering::Equal)
        });
        hits.truncate(top_k);

        debug!(terms = terms.len(), hits = hits.len(), "lexical search");
        hits
    }

    fn score(&self, doc: &CorpusDocument, terms: &[String]) -> f64 {
        let doc_len = doc.len() as f64;
        let mut score = 0.0;
        for term in terms {
            let tf = doc.term_frequency(term);
            let df = self.document_frequency(term);
            if tf == 0 || df == 0 {
                continue;
            }
            let tf = tf as f64;
            let norm = 1.0 - B + B * (doc_len / self.average_doc_length);
            let tf_component = (tf * (K1 + 1.0)) / (tf + K1 * norm);
            score += self.idf(df) * tf_component;
        }
        score
    }

    pub fn stats(&self) -> IndexStats {
        IndexStats {
            total_documents: self.documents.len(),
            unique_terms: self.document_frequency.len(),
            average_doc_length: self.average_doc_length,
        }
    }
}

/// The swappable index reference held by the retrieval service.
///
/// Rebuilds construct a new [`LexicalIndex`] without holding the lock and
/// then replace the `Arc`; searches clone the current `Arc` and score
/// outside the lock.
#[derive(Debug, Default)]
pub struct SharedIndex {
    current: RwLock<Arc<LexicalIndex>>,
}

impl SharedIndex {
    pub fn new() -> Self {
        Self::default()
    }

    /// Replace the whole index with one built from `inputs`.
    pub fn index_documents(&self, inputs: &[IndexInput]) {
        let fresh = Arc::new(LexicalIndex::build(inputs));
        self.swap(fresh);
    }

    /// Reset to the empty-index state.
    pub fn clear(&self) {
        self.swap(Arc::new(LexicalIndex::empty()));
    }

    /// The snapshot queries currently run against.
    pub fn snapshot(&self) -> Arc<LexicalIndex> {
        self.current
            .read()
            .unwrap_or_else(|poisoned| poisoned.into_inner())
            .clone()
    }

    pub fn search(&self, query: &str, top_k: usize) -> Vec<LexicalHit> {
        self.snapshot().search(query, top_k)
    }

    pub fn stats(&self) -> IndexStats {
        self.snapshot().stats()
    }

    fn swap(&self, next: Arc<LexicalIndex>) {
        let mut guard = self
            .current
            .write()
            .unwrap_or_else(|poisoned| poisoned.into_inner());
        *guard = next;
    }
}
