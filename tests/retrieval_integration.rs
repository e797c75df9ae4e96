//! Retrieval service against a real SQLite database with scripted
//! embedding and completion providers.

use std::path::Path;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Arc;
use std::time::Duration;

use anyhow::{bail, Result};
use async_trait::async_trait;
use tempfile::TempDir;

use ragline::config::{
    ChunkingConfig, Config, DbConfig, EmbeddingConfig, LlmConfig, RetrievalConfig,
};
use ragline::contradiction::ContradictionDetector;
use ragline::ingest::ingest_directory;
use ragline::retrieval::{Collaborators, RetrievalRequest, RetrievalService};
use ragline::sqlite_store::SqliteStore;
use ragline::{db, migrate};
use ragline_core::contradiction::{ContradictionResult, OverallSeverity, QueryComplexity};
use ragline_core::embedding::Embedder;
use ragline_core::intent::QueryIntent;
use ragline_core::llm::CompletionProvider;
use ragline_core::models::FullDocument;
use ragline_core::store::DocumentSource;

const VOCABULARY: &[&str] = &["revenue", "invoice", "cargo", "docker"];

/// Counts vocabulary words; the last component keeps vectors non-zero.
struct KeywordEmbedder;

#[async_trait]
impl Embedder for KeywordEmbedder {
    fn model_name(&self) -> &str {
        "keyword-test"
    }

    fn dims(&self) -> usize {
        VOCABULARY.len() + 1
    }

    async fn embed(&self, texts: &[String]) -> Result<Vec<Vec<f32>>> {
        Ok(texts
            .iter()
            .map(|text| {
                let lower = text.to_lowercase();
                let mut v: Vec<f32> = VOCABULARY
                    .iter()
                    .map(|word| lower.matches(word).count() as f32)
                    .collect();
                v.push(0.1);
                v
            })
            .collect())
    }
}

struct BrokenEmbedder;

#[async_trait]
impl Embedder for BrokenEmbedder {
    fn model_name(&self) -> &str {
        "broken"
    }

    fn dims(&self) -> usize {
        4
    }

    async fn embed(&self, _texts: &[String]) -> Result<Vec<Vec<f32>>> {
        bail!("embedding service unavailable")
    }
}

struct ScriptedProvider {
    reply: String,
    delay: Duration,
    calls: AtomicUsize,
}

impl ScriptedProvider {
    fn new(reply: &str) -> Self {
        Self {
            reply: reply.to_string(),
            delay: Duration::ZERO,
            calls: AtomicUsize::new(0),
        }
    }

    fn slow(reply: &str, delay: Duration) -> Self {
        Self {
            delay,
            ..Self::new(reply)
        }
    }
}

#[async_trait]
impl CompletionProvider for ScriptedProvider {
    async fn complete(&self, prompt: &str, _model: &str) -> Result<String> {
        self.calls.fetch_add(1, Ordering::SeqCst);
        assert!(prompt.contains("q1.md") && prompt.contains("q2.md"));
        tokio::time::sleep(self.delay).await;
        Ok(self.reply.clone())
    }
}

#[derive(Default)]
struct FailingProvider {
    calls: AtomicUsize,
}

#[async_trait]
impl CompletionProvider for FailingProvider {
    async fn complete(&self, _prompt: &str, _model: &str) -> Result<String> {
        self.calls.fetch_add(1, Ordering::SeqCst);
        bail!("completion service returned 503")
    }
}

fn quarterly_documents() -> Vec<FullDocument> {
    vec![
        FullDocument {
            filename: "q1.md".to_string(),
            content: "Invoices are due within thirty days.".to_string(),
        },
        FullDocument {
            filename: "q2.md".to_string(),
            content: "Invoices are due within sixty days.".to_string(),
        },
    ]
}

const CONFLICT_REPLY: &str = r#"Here is the analysis:
{"hasContradictions": true,
 "contradictions": [{"documents": ["q1.md", "q2.md"],
                     "conflictingClaims": ["due within thirty days", "due within sixty days"],
                     "severity": "high",
                     "explanation": "Payment terms differ."}],
 "overallSeverity": "high"}"#;

fn write_corpus(root: &Path) {
    std::fs::create_dir_all(root.join("Reports")).unwrap();
    std::fs::create_dir_all(root.join("Notes")).unwrap();
    std::fs::write(
        root.join("alpha.md"),
        "Rust programming with cargo and crates.",
    )
    .unwrap();
    std::fs::write(
        root.join("Reports/q1.md"),
        "Quarterly revenue grew. Invoices are due within thirty days.",
    )
    .unwrap();
    std::fs::write(
        root.join("Reports/q2.md"),
        "Quarterly revenue declined. Invoices are due within sixty days.",
    )
    .unwrap();
    std::fs::write(
        root.join("Notes/deploy.txt"),
        "Docker and Kubernetes run the staging cluster.",
    )
    .unwrap();
}

fn test_config(tmp: &TempDir, use_bm25: bool, use_vector_search: bool) -> Config {
    Config {
        db: DbConfig {
            path: tmp.path().join("data/ragline.sqlite"),
        },
        chunking: ChunkingConfig::default(),
        retrieval: RetrievalConfig {
            use_bm25,
            use_vector_search,
            ..RetrievalConfig::default()
        },
        embedding: EmbeddingConfig::default(),
        llm: LlmConfig::default(),
    }
}

async fn setup(config: &Config, tmp: &TempDir) -> SqliteStore {
    let pool = db::connect(config).await.unwrap();
    migrate::apply(&pool).await.unwrap();
    let store = SqliteStore::new(pool);

    let files = tmp.path().join("files");
    write_corpus(&files);
    ingest_directory(config, &store, Some(&KeywordEmbedder as &dyn Embedder), &files, "alice")
        .await
        .unwrap();
    store
}

fn service(config: &Config, store: &SqliteStore, embedder: Option<Arc<dyn Embedder>>) -> RetrievalService {
    RetrievalService::new(
        config.retrieval.clone(),
        Collaborators::sqlite(store.clone()),
        embedder,
    )
    .unwrap()
}

async fn document_id(store: &SqliteStore, folder: Option<&str>, filename: &str) -> String {
    store
        .find_document("alice", folder, filename)
        .await
        .unwrap()
        .unwrap()
        .id
}

#[tokio::test]
async fn test_ingest_then_reingest_is_unchanged() {
    let tmp = TempDir::new().unwrap();
    let config = test_config(&tmp, true, true);
    let store = setup(&config, &tmp).await;

    let again = ingest_directory(
        &config,
        &store,
        Some(&KeywordEmbedder as &dyn Embedder),
        &tmp.path().join("files"),
        "alice",
    )
    .await
    .unwrap();
    assert_eq!(again.files_found, 4);
    assert_eq!(again.unchanged, 4);
    assert_eq!(again.upserted, 0);
    assert_eq!(again.embeddings_written, 0);

    assert_eq!(store.corpus("alice").await.unwrap().len(), 4);
}

#[tokio::test]
async fn test_hybrid_retrieval_logs_every_candidate() {
    let tmp = TempDir::new().unwrap();
    let config = test_config(&tmp, true, true);
    let store = setup(&config, &tmp).await;
    let service = service(&config, &store, Some(Arc::new(KeywordEmbedder)));

    let mut request = RetrievalRequest::new("alice", "quarterly revenue");
    request.conversation_id = Some("conv-1".to_string());
    let mut outcome = service.retrieve(&request).await.unwrap();

    assert_eq!(outcome.parsed.intent, QueryIntent::GeneralSearch);
    assert!(!outcome.selected.is_empty());
    let q1 = document_id(&store, Some("Reports"), "q1.md").await;
    let q2 = document_id(&store, Some("Reports"), "q2.md").await;
    assert!([q1, q2].contains(&outcome.selected[0].document_id));
    for pair in outcome.ranked.windows(2) {
        assert!(pair[0].chunk.score >= pair[1].chunk.score);
    }

    outcome.relevance_log.take().unwrap().await.unwrap();

    let rows = service.logger().recent_logs("alice", 100).await;
    assert_eq!(rows.len(), outcome.ranked.len());
    assert_eq!(
        rows.iter().filter(|r| r.selected).count(),
        outcome.selected.len()
    );
    assert!(rows.iter().all(|r| r.query == "quarterly revenue"));
    assert!(rows
        .iter()
        .all(|r| r.conversation_id.as_deref() == Some("conv-1")));

    let mut ranks: Vec<usize> = rows.iter().map(|r| r.rank_index).collect();
    ranks.sort_unstable();
    assert_eq!(ranks, (0..outcome.ranked.len()).collect::<Vec<_>>());
}

#[tokio::test]
async fn test_missing_log_table_is_tolerated() {
    let tmp = TempDir::new().unwrap();
    let config = test_config(&tmp, true, false);
    let store = setup(&config, &tmp).await;
    sqlx::query("DROP TABLE chunk_relevance_logs")
        .execute(store.pool())
        .await
        .unwrap();
    let service = service(&config, &store, None);

    let mut outcome = service
        .retrieve(&RetrievalRequest::new("alice", "cargo crates"))
        .await
        .unwrap();
    assert_eq!(outcome.selected.len(), 1);

    outcome.relevance_log.take().unwrap().await.unwrap();
    assert!(service.logger().recent_logs("alice", 10).await.is_empty());
}

#[tokio::test]
async fn test_folder_listing_is_not_ranked() {
    let tmp = TempDir::new().unwrap();
    let config = test_config(&tmp, true, false);
    let store = setup(&config, &tmp).await;
    let service = service(&config, &store, None);

    let outcome = service
        .retrieve(&RetrievalRequest::new("alice", "what's in the reports folder?"))
        .await
        .unwrap();

    assert_eq!(outcome.parsed.intent, QueryIntent::FolderList);
    assert_eq!(outcome.folder_documents.len(), 2);
    assert!(outcome.ranked.is_empty());
    assert!(outcome.selected.is_empty());
    assert!(outcome.relevance_log.is_none());
}

#[tokio::test]
async fn test_folder_search_stays_in_folder() {
    let tmp = TempDir::new().unwrap();
    let config = test_config(&tmp, true, true);
    let store = setup(&config, &tmp).await;
    let service = service(&config, &store, Some(Arc::new(KeywordEmbedder)));

    let outcome = service
        .retrieve(&RetrievalRequest::new("alice", "find invoices in folder Reports"))
        .await
        .unwrap();
    assert_eq!(outcome.parsed.intent, QueryIntent::FolderSearch);
    assert_eq!(outcome.parsed.search_term.as_deref(), Some("invoices"));

    let in_folder = store.documents_in_folder("alice", "Reports").await.unwrap();
    assert!(!outcome.selected.is_empty());
    assert!(outcome
        .ranked
        .iter()
        .all(|c| in_folder.contains(&c.chunk.document_id)));
}

#[tokio::test]
async fn test_unknown_folder_ranks_nothing() {
    let tmp = TempDir::new().unwrap();
    let config = test_config(&tmp, true, false);
    let store = setup(&config, &tmp).await;
    let service = service(&config, &store, None);

    let outcome = service
        .retrieve(&RetrievalRequest::new("alice", "find revenue in folder Archive"))
        .await
        .unwrap();
    assert!(outcome.ranked.is_empty());
    assert!(outcome.selected.is_empty());
}

#[tokio::test]
async fn test_semantic_failure_falls_back_to_lexical() {
    let tmp = TempDir::new().unwrap();
    let config = test_config(&tmp, true, true);
    let store = setup(&config, &tmp).await;
    let service = service(&config, &store, Some(Arc::new(BrokenEmbedder)));

    let outcome = service
        .retrieve(&RetrievalRequest::new("alice", "cargo crates"))
        .await
        .unwrap();

    let alpha = document_id(&store, None, "alpha.md").await;
    assert_eq!(outcome.selected.len(), 1);
    assert_eq!(outcome.selected[0].document_id, alpha);
}

#[tokio::test]
async fn test_all_sources_failing_is_an_error() {
    let tmp = TempDir::new().unwrap();
    let config = test_config(&tmp, false, true);
    let store = setup(&config, &tmp).await;
    let service = service(&config, &store, Some(Arc::new(BrokenEmbedder)));

    let result = service
        .retrieve(&RetrievalRequest::new("alice", "cargo crates"))
        .await;
    assert!(result.is_err());
}

#[tokio::test]
async fn test_zero_budget_is_rejected() {
    let tmp = TempDir::new().unwrap();
    let config = test_config(&tmp, true, false);
    let store = setup(&config, &tmp).await;
    let service = service(&config, &store, None);

    let mut request = RetrievalRequest::new("alice", "revenue");
    request.max_chunks = Some(0);
    assert!(service.retrieve(&request).await.is_err());
}

#[tokio::test]
async fn test_contradictions_reported_for_complex_queries() {
    let tmp = TempDir::new().unwrap();
    let config = test_config(&tmp, true, false);
    let store = setup(&config, &tmp).await;
    let provider = Arc::new(ScriptedProvider::new(CONFLICT_REPLY));
    let service = service(&config, &store, None).with_detector(ContradictionDetector::new(
        provider.clone(),
        "test-model",
        Duration::from_secs(5),
    ));

    let mut request = RetrievalRequest::new("alice", "when are invoices due");
    request.complexity = QueryComplexity::Complex;
    let outcome = service.retrieve(&request).await.unwrap();

    assert_eq!(provider.calls.load(Ordering::SeqCst), 1);
    assert!(outcome.contradictions.has_contradictions);
    assert_eq!(outcome.contradictions.overall_severity, OverallSeverity::High);
    assert_eq!(
        outcome.contradictions.contradictions[0].documents,
        vec!["q1.md".to_string(), "q2.md".to_string()]
    );
}

#[tokio::test]
async fn test_medium_complexity_with_two_documents_skips_detection() {
    let tmp = TempDir::new().unwrap();
    let config = test_config(&tmp, true, false);
    let store = setup(&config, &tmp).await;
    let provider = Arc::new(ScriptedProvider::new(CONFLICT_REPLY));
    let service = service(&config, &store, None).with_detector(ContradictionDetector::new(
        provider.clone(),
        "test-model",
        Duration::from_secs(5),
    ));

    let outcome = service
        .retrieve(&RetrievalRequest::new("alice", "when are invoices due"))
        .await
        .unwrap();

    assert_eq!(provider.calls.load(Ordering::SeqCst), 0);
    assert_eq!(outcome.contradictions, ContradictionResult::none());
}

#[tokio::test]
async fn test_slow_detection_times_out() {
    let tmp = TempDir::new().unwrap();
    let config = test_config(&tmp, true, false);
    let store = setup(&config, &tmp).await;
    let provider = Arc::new(ScriptedProvider::slow(CONFLICT_REPLY, Duration::from_secs(10)));
    let service = service(&config, &store, None).with_detector(ContradictionDetector::new(
        provider.clone(),
        "test-model",
        Duration::from_millis(50),
    ));

    let mut request = RetrievalRequest::new("alice", "when are invoices due");
    request.complexity = QueryComplexity::Complex;
    let outcome = service.retrieve(&request).await.unwrap();

    assert_eq!(provider.calls.load(Ordering::SeqCst), 1);
    assert_eq!(outcome.contradictions, ContradictionResult::none());
    assert!(!outcome.selected.is_empty());
}

#[tokio::test]
async fn test_rebuild_index_sees_new_documents() {
    let tmp = TempDir::new().unwrap();
    let config = test_config(&tmp, true, false);
    let store = setup(&config, &tmp).await;
    let service = service(&config, &store, None);

    assert_eq!(service.index_stats("alice").await.unwrap().total_documents, 4);

    let files = tmp.path().join("files");
    std::fs::write(files.join("extra.md"), "Zeppelin maintenance schedule.").unwrap();
    ingest_directory(&config, &store, None, &files, "alice")
        .await
        .unwrap();

    let stale = service
        .retrieve(&RetrievalRequest::new("alice", "zeppelin"))
        .await
        .unwrap();
    assert!(stale.selected.is_empty());

    assert_eq!(service.rebuild_index("alice").await.unwrap().total_documents, 5);
    let fresh = service
        .retrieve(&RetrievalRequest::new("alice", "zeppelin"))
        .await
        .unwrap();
    assert_eq!(fresh.selected.len(), 1);
}

#[tokio::test]
async fn test_single_document_skips_provider() {
    let provider = Arc::new(ScriptedProvider::new(CONFLICT_REPLY));
    let detector = ContradictionDetector::new(provider.clone(), "test-model", Duration::from_secs(5));

    let mut documents = quarterly_documents();
    documents.truncate(1);
    let result = detector.detect(&documents, "when are invoices due").await;

    assert_eq!(result, ContradictionResult::none());
    assert_eq!(provider.calls.load(Ordering::SeqCst), 0);
}

#[tokio::test]
async fn test_provider_error_yields_no_contradictions() {
    let provider = Arc::new(FailingProvider::default());
    let detector = ContradictionDetector::new(provider.clone(), "test-model", Duration::from_secs(5));

    let result = detector
        .detect(&quarterly_documents(), "when are invoices due")
        .await;

    assert_eq!(result, ContradictionResult::none());
    assert_eq!(provider.calls.load(Ordering::SeqCst), 1);
}

#[tokio::test]
async fn test_vector_search_without_embedder_ranks_lexically() {
    let tmp = TempDir::new().unwrap();
    let config = test_config(&tmp, true, true);
    let store = setup(&config, &tmp).await;
    let service = service(&config, &store, None);

    let outcome = service
        .retrieve(&RetrievalRequest::new("alice", "cargo crates"))
        .await
        .unwrap();

    let alpha = document_id(&store, None, "alpha.md").await;
    assert_eq!(outcome.selected.len(), 1);
    assert_eq!(outcome.selected[0].document_id, alpha);
}

#[tokio::test]
async fn test_no_ranking_source_is_rejected_at_startup() {
    let tmp = TempDir::new().unwrap();
    let config = test_config(&tmp, false, true);
    let store = setup(&config, &tmp).await;

    let built = RetrievalService::new(
        config.retrieval.clone(),
        Collaborators::sqlite(store.clone()),
        None,
    );
    assert!(built.is_err());
}

#[tokio::test]
async fn test_same_filename_in_nested_folder_is_a_separate_document() {
    let tmp = TempDir::new().unwrap();
    let config = test_config(&tmp, true, false);
    let store = setup(&config, &tmp).await;

    let files = tmp.path().join("files");
    std::fs::create_dir_all(files.join("Reports/2024")).unwrap();
    std::fs::write(
        files.join("Reports/2024/q2.md"),
        "Archived second quarter figures.",
    )
    .unwrap();

    let report = ingest_directory(&config, &store, None, &files, "alice")
        .await
        .unwrap();
    assert_eq!(report.files_found, 5);
    assert_eq!(report.upserted, 1);
    assert_eq!(report.unchanged, 4);

    let top = document_id(&store, Some("Reports"), "q2.md").await;
    let nested = document_id(&store, Some("Reports"), "2024/q2.md").await;
    assert_ne!(top, nested);

    let again = ingest_directory(&config, &store, None, &files, "alice")
        .await
        .unwrap();
    assert_eq!(again.unchanged, 5);
    assert_eq!(again.upserted, 0);
}

#[tokio::test]
async fn test_filenames_are_scoped_to_owner() {
    let tmp = TempDir::new().unwrap();
    let config = test_config(&tmp, true, false);
    let store = setup(&config, &tmp).await;

    let ids = vec![
        document_id(&store, Some("Reports"), "q1.md").await,
        document_id(&store, Some("Reports"), "q2.md").await,
    ];

    let owned = store.filenames("alice", &ids).await.unwrap();
    assert_eq!(
        owned.iter().map(|(_, name)| name.as_str()).collect::<Vec<_>>(),
        vec!["q1.md", "q2.md"]
    );
    assert!(store.filenames("bob", &ids).await.unwrap().is_empty());
}
