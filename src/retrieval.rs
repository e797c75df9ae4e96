//! The retrieval pipeline.
//!
//! ```text
//! query ─▶ intent ─▶ scope ─┬─▶ lexical (BM25, blocking pool) ─┐
//!                           └─▶ embed ─▶ semantic search ──────┴─▶ fuse ─▶ rerank ─▶ select
//!                                                                                     │
//!                            relevance log (spawned) ◀────────────────────────────────┤
//!                            contradiction detection (timed) ◀────────────────────────┘
//! ```
//!
//! One lexical index is kept per user and built lazily from the user's
//! stored chunks. If one ranking source fails the pipeline continues on
//! the other; only both failing, or an invalid budget, is an error.

use std::collections::{HashMap, HashSet};
use std::sync::{Arc, RwLock};

use anyhow::{anyhow, Context, Result};
use chrono::Utc;
use serde::Serialize;
use tokio::task::JoinHandle;
use tracing::{debug, info, warn};

use ragline_core::bm25::{IndexStats, LexicalIndex};
use ragline_core::contradiction::{should_detect, ContradictionResult, QueryComplexity};
use ragline_core::embedding::Embedder;
use ragline_core::fusion::{
    fuse, select, ChunkDirectory, ChunkLocation, FusedChunk, PassthroughReranker, Reranker,
};
use ragline_core::intent::{IntentParser, ParsedQuery, RetrievalScope};
use ragline_core::models::{FullDocument, IndexInput, LexicalHit, RetrievedChunk};
use ragline_core::relevance::{ChunkRelevanceLogEntry, RelevanceLogger};
use ragline_core::store::{DocumentSource, RelevanceSink, SemanticQuery, SemanticSearch};

use crate::config::{Config, RetrievalConfig};
use crate::contradiction::ContradictionDetector;
use crate::embedding::create_embedder;
use crate::llm::create_completion_provider;
use crate::sqlite_store::SqliteStore;

/// One incoming question.
#[derive(Debug, Clone)]
pub struct RetrievalRequest {
    pub user_id: String,
    pub query: String,
    pub conversation_id: Option<String>,
    pub complexity: QueryComplexity,
    /// Overrides `retrieval.default_max_chunks`.
    pub max_chunks: Option<usize>,
    /// Overrides `retrieval.default_max_docs`.
    pub max_docs: Option<usize>,
}

impl RetrievalRequest {
    pub fn new(user_id: impl Into<String>, query: impl Into<String>) -> Self {
        Self {
            user_id: user_id.into(),
            query: query.into(),
            conversation_id: None,
            complexity: QueryComplexity::Medium,
            max_chunks: None,
            max_docs: None,
        }
    }
}

#[derive(Debug, Serialize)]
pub struct RetrievalOutcome {
    pub parsed: ParsedQuery,
    pub scope: RetrievalScope,
    /// Every fused candidate, best first.
    pub ranked: Vec<FusedChunk>,
    /// The context handed to answer composition.
    pub selected: Vec<RetrievedChunk>,
    /// Document ids of a folder listing; empty for ranked queries.
    pub folder_documents: Vec<String>,
    pub contradictions: ContradictionResult,
    /// The spawned relevance-log write. Dropping it leaves the write
    /// running; short-lived callers await it before exiting.
    #[serde(skip)]
    pub relevance_log: Option<JoinHandle<()>>,
}

impl RetrievalOutcome {
    fn unranked(parsed: ParsedQuery, scope: RetrievalScope, folder_documents: Vec<String>) -> Self {
        Self {
            parsed,
            scope,
            ranked: Vec::new(),
            selected: Vec::new(),
            folder_documents,
            contradictions: ContradictionResult::none(),
            relevance_log: None,
        }
    }
}

/// Data sources the service ranks over and logs into.
#[derive(Clone)]
pub struct Collaborators {
    pub documents: Arc<dyn DocumentSource>,
    pub semantic: Arc<dyn SemanticSearch>,
    pub sink: Arc<dyn RelevanceSink>,
}

impl Collaborators {
    pub fn sqlite(store: SqliteStore) -> Self {
        let store = Arc::new(store);
        Self {
            documents: store.clone(),
            semantic: store.clone(),
            sink: store,
        }
    }
}

/// A user's lexical index and the chunk-to-document map for its ids,
/// built and replaced as one value.
#[derive(Default)]
struct UserSnapshot {
    index: LexicalIndex,
    directory: ChunkDirectory,
}

#[derive(Default)]
struct UserIndex {
    current: RwLock<Arc<UserSnapshot>>,
}

impl UserIndex {
    fn snapshot(&self) -> Arc<UserSnapshot> {
        self.current
            .read()
            .unwrap_or_else(|poisoned| poisoned.into_inner())
            .clone()
    }

    fn rebuild(&self, inputs: &[IndexInput], directory: ChunkDirectory) -> IndexStats {
        let fresh = Arc::new(UserSnapshot {
            index: LexicalIndex::build(inputs),
            directory,
        });
        let stats = fresh.index.stats();
        *self
            .current
            .write()
            .unwrap_or_else(|poisoned| poisoned.into_inner()) = fresh;
        stats
    }
}

pub struct RetrievalService {
    config: RetrievalConfig,
    sources: Collaborators,
    embedder: Option<Arc<dyn Embedder>>,
    logger: RelevanceLogger,
    detector: Option<ContradictionDetector>,
    reranker: Arc<dyn Reranker>,
    parser: IntentParser,
    indexes: RwLock<HashMap<String, Arc<UserIndex>>>,
}

impl RetrievalService {
    /// Vector search is switched off when no embedder is given; having no
    /// ranking source left is an error.
    pub fn new(
        mut config: RetrievalConfig,
        sources: Collaborators,
        embedder: Option<Arc<dyn Embedder>>,
    ) -> Result<Self> {
        if config.use_vector_search && embedder.is_none() {
            warn!("vector search is enabled without an embedding provider; ranking lexically only");
            config.use_vector_search = false;
        }
        if !config.use_bm25 && !config.use_vector_search {
            anyhow::bail!("no ranking source configured: enable use_bm25 or an embedding provider");
        }

        Ok(Self {
            config,
            logger: RelevanceLogger::new(sources.sink.clone()),
            sources,
            embedder,
            detector: None,
            reranker: Arc::new(PassthroughReranker),
            parser: IntentParser::new()?,
            indexes: RwLock::new(HashMap::new()),
        })
    }

    /// Wire the service from configuration over a SQLite store.
    pub fn from_config(config: &Config, store: SqliteStore) -> Result<Self> {
        let embedder = create_embedder(&config.embedding)?;
        let mut service = Self::new(
            config.retrieval.clone(),
            Collaborators::sqlite(store),
            embedder,
        )?;
        if let Some(provider) = create_completion_provider(&config.llm)? {
            service = service.with_detector(ContradictionDetector::from_config(provider, &config.llm));
        }
        Ok(service)
    }

    pub fn with_detector(mut self, detector: ContradictionDetector) -> Self {
        self.detector = Some(detector);
        self
    }

    pub fn with_reranker(mut self, reranker: Arc<dyn Reranker>) -> Self {
        self.reranker = reranker;
        self
    }

    pub fn parser(&self) -> &IntentParser {
        &self.parser
    }

    pub fn logger(&self) -> &RelevanceLogger {
        &self.logger
    }

    fn user_index(&self, user_id: &str) -> Option<Arc<UserIndex>> {
        self.indexes
            .read()
            .unwrap_or_else(|poisoned| poisoned.into_inner())
            .get(user_id)
            .cloned()
    }

    /// Rebuild `user_id`'s lexical index from their stored chunks.
    ///
    /// Queries already running keep using the previous snapshot.
    pub async fn rebuild_index(&self, user_id: &str) -> Result<IndexStats> {
        let chunks = self
            .sources
            .documents
            .corpus(user_id)
            .await
            .with_context(|| format!("loading corpus for {}", user_id))?;

        let inputs: Vec<IndexInput> = chunks.iter().map(|c| c.to_index_input()).collect();
        let directory: ChunkDirectory = chunks
            .into_iter()
            .map(|c| {
                let location = ChunkLocation {
                    document_id: c.document_id,
                    page_number: c.page_number,
                };
                (c.id, location)
            })
            .collect();

        let entry = {
            let mut map = self
                .indexes
                .write()
                .unwrap_or_else(|poisoned| poisoned.into_inner());
            map.entry(user_id.to_string()).or_default().clone()
        };

        let stats =
            tokio::task::spawn_blocking(move || entry.rebuild(&inputs, directory)).await?;
        info!(user_id, documents = stats.total_documents, "lexical index ready");
        Ok(stats)
    }

    /// Stats of the user's current index, building it if needed.
    pub async fn index_stats(&self, user_id: &str) -> Result<IndexStats> {
        match self.user_index(user_id) {
            Some(entry) => Ok(entry.snapshot().index.stats()),
            None => self.rebuild_index(user_id).await,
        }
    }

    async fn ensure_index(&self, user_id: &str) -> Result<Arc<UserIndex>> {
        if let Some(entry) = self.user_index(user_id) {
            return Ok(entry);
        }
        self.rebuild_index(user_id).await?;
        self.user_index(user_id)
            .ok_or_else(|| anyhow!("lexical index for {} vanished after rebuild", user_id))
    }

    async fn lexical_candidates(
        &self,
        user_id: &str,
        query: &str,
        filter: Option<&HashSet<String>>,
    ) -> Result<(Vec<LexicalHit>, Arc<UserSnapshot>)> {
        let snapshot = self.ensure_index(user_id).await?.snapshot();
        let top_k = self.config.lexical_top_k;
        // A folder filter is applied after scoring, so score everything.
        let wanted = if filter.is_some() { snapshot.index.len() } else { top_k };

        let scoring = snapshot.clone();
        let query = query.to_string();
        let mut hits =
            tokio::task::spawn_blocking(move || scoring.index.search(&query, wanted)).await?;

        if let Some(allowed) = filter {
            hits.retain(|hit| {
                snapshot
                    .directory
                    .get(&hit.id)
                    .is_some_and(|loc| allowed.contains(&loc.document_id))
            });
            hits.truncate(top_k);
        }
        Ok((hits, snapshot))
    }

    async fn semantic_candidates(
        &self,
        user_id: &str,
        query: &str,
        filter: Option<&[String]>,
    ) -> Result<Vec<RetrievedChunk>> {
        let embedder = self
            .embedder
            .as_ref()
            .ok_or_else(|| anyhow!("semantic search needs an embedding provider"))?;

        let vectors = embedder.embed(&[query.to_string()]).await?;
        let embedding = vectors
            .into_iter()
            .next()
            .ok_or_else(|| anyhow!("embedding provider returned no vector"))?;

        self.sources
            .semantic
            .search(&SemanticQuery {
                embedding: &embedding,
                scope: user_id,
                limit: self.config.vector_limit,
                min_similarity: self.config.min_similarity,
                document_ids: filter,
            })
            .await
    }

    /// Run the full pipeline for one request.
    pub async fn retrieve(&self, request: &RetrievalRequest) -> Result<RetrievalOutcome> {
        let selection = self
            .config
            .selection_params(request.max_chunks, request.max_docs);
        if selection.max_chunks == 0 || selection.max_docs == 0 {
            anyhow::bail!("max_chunks and max_docs must be >= 1");
        }

        let parsed = self.parser.parse(&request.query);
        let scope = parsed.scope();
        debug!(intent = %parsed.intent, ?scope, "query classified");

        let folder_docs = match scope.folder() {
            Some(folder) => Some(
                self.sources
                    .documents
                    .documents_in_folder(&request.user_id, folder)
                    .await?,
            ),
            None => None,
        };

        if let RetrievalScope::FolderListing { .. } = scope {
            return Ok(RetrievalOutcome::unranked(
                parsed,
                scope,
                folder_docs.unwrap_or_default(),
            ));
        }
        if folder_docs.as_ref().is_some_and(|ids| ids.is_empty()) {
            info!(folder = ?scope.folder(), "folder has no documents; nothing to rank");
            return Ok(RetrievalOutcome::unranked(parsed, scope, Vec::new()));
        }

        let ranking_query = scope.ranking_query(&request.query).to_string();
        let filter_set: Option<HashSet<String>> =
            folder_docs.as_ref().map(|ids| ids.iter().cloned().collect());

        let use_bm25 = self.config.use_bm25;
        let use_vectors = self.config.use_vector_search;
        let lexical = async {
            if use_bm25 {
                Some(
                    self.lexical_candidates(&request.user_id, &ranking_query, filter_set.as_ref())
                        .await,
                )
            } else {
                None
            }
        };
        let semantic = async {
            if use_vectors {
                Some(
                    self.semantic_candidates(&request.user_id, &ranking_query, folder_docs.as_deref())
                        .await,
                )
            } else {
                None
            }
        };
        let (lexical, semantic) = tokio::join!(lexical, semantic);

        let mut params = self.config.fusion_params();
        let (hits, lexical_snapshot) = match lexical {
            Some(Ok(found)) => found,
            Some(Err(e)) => {
                warn!(error = %e, "lexical ranking failed; continuing without it");
                params.use_bm25 = false;
                (Vec::new(), Arc::default())
            }
            None => (Vec::new(), Arc::default()),
        };
        let semantic = match semantic {
            Some(Ok(found)) => found,
            Some(Err(e)) => {
                warn!(error = %e, "semantic ranking failed; continuing without it");
                params.use_vector_search = false;
                Vec::new()
            }
            None => Vec::new(),
        };
        if !params.use_bm25 && !params.use_vector_search {
            anyhow::bail!("no ranking source available for this query");
        }

        let mut ranked = fuse(&hits, &lexical_snapshot.directory, &semantic, &params)?;
        if self.config.use_reranking {
            ranked = self.reranker.rerank(&ranking_query, ranked);
        }
        let selected = select(&ranked, selection)?;
        debug!(
            lexical = hits.len(),
            semantic = semantic.len(),
            ranked = ranked.len(),
            selected = selected.len(),
            "candidates fused"
        );

        let relevance_log = self.spawn_relevance_log(request, &parsed, &ranked, &selected);
        let contradictions = self.detect_contradictions(request, &selected).await;

        Ok(RetrievalOutcome {
            parsed,
            scope,
            ranked,
            selected,
            folder_documents: Vec::new(),
            contradictions,
            relevance_log,
        })
    }

    fn spawn_relevance_log(
        &self,
        request: &RetrievalRequest,
        parsed: &ParsedQuery,
        ranked: &[FusedChunk],
        selected: &[RetrievedChunk],
    ) -> Option<JoinHandle<()>> {
        if ranked.is_empty() {
            return None;
        }
        let entry = ChunkRelevanceLogEntry {
            user_id: request.user_id.clone(),
            conversation_id: request.conversation_id.clone(),
            query: request.query.clone(),
            intent: parsed.intent,
            chunks: ranked.iter().map(|f| f.chunk.clone()).collect(),
            selected_chunks: selected.to_vec(),
            timestamp: Utc::now(),
        };
        let logger = self.logger.clone();
        Some(tokio::spawn(async move { logger.log(&entry).await }))
    }

    async fn detect_contradictions(
        &self,
        request: &RetrievalRequest,
        selected: &[RetrievedChunk],
    ) -> ContradictionResult {
        let Some(detector) = &self.detector else {
            return ContradictionResult::none();
        };

        let mut seen = HashSet::new();
        let doc_ids: Vec<&str> = selected
            .iter()
            .map(|c| c.document_id.as_str())
            .filter(|id| seen.insert(*id))
            .collect();
        if !should_detect(request.complexity, doc_ids.len()) {
            return ContradictionResult::none();
        }

        let mut documents: Vec<FullDocument> = Vec::with_capacity(doc_ids.len());
        for id in doc_ids {
            match self.sources.documents.get_document(id).await {
                Ok(Some(doc)) => documents.push(doc),
                Ok(None) => warn!(document_id = id, "selected document no longer exists"),
                Err(e) => warn!(document_id = id, error = %e, "could not load document"),
            }
        }
        detector.detect(&documents, &request.query).await
    }
}
