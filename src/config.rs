//! TOML configuration.
//!
//! Every section except `[db]` has defaults. Vector search is on by
//! default and needs an `[embedding]` provider, so a minimal lexical-only
//! file is:
//!
//! ```toml
//! [db]
//! path = "./data/ragline.sqlite"
//!
//! [retrieval]
//! use_bm25 = true
//! use_vector_search = false
//! ```
//!
//! See `config/ragline.example.toml` for every setting.

use anyhow::{Context, Result};
use serde::Deserialize;
use std::path::{Path, PathBuf};

use ragline_core::fusion::{FusionParams, SelectionParams};

#[derive(Debug, Deserialize, Clone)]
pub struct Config {
    pub db: DbConfig,
    #[serde(default)]
    pub chunking: ChunkingConfig,
    #[serde(default)]
    pub retrieval: RetrievalConfig,
    #[serde(default)]
    pub embedding: EmbeddingConfig,
    #[serde(default)]
    pub llm: LlmConfig,
}

#[derive(Debug, Deserialize, Clone)]
pub struct DbConfig {
    pub path: PathBuf,
}

#[derive(Debug, Deserialize, Clone)]
pub struct ChunkingConfig {
    #[serde(default = "default_max_tokens")]
    pub max_tokens: usize,
}

impl Default for ChunkingConfig {
    fn default() -> Self {
        Self {
            max_tokens: default_max_tokens(),
        }
    }
}

fn default_max_tokens() -> usize {
    700
}

/// Ranking sources, fusion weight and the context budget.
#[derive(Debug, Deserialize, Clone)]
pub struct RetrievalConfig {
    #[serde(default = "default_max_chunks")]
    pub default_max_chunks: usize,
    #[serde(default = "default_max_docs")]
    pub default_max_docs: usize,
    #[serde(default = "default_true")]
    pub use_vector_search: bool,
    #[serde(default)]
    pub use_bm25: bool,
    #[serde(default)]
    pub use_reranking: bool,
    #[serde(default = "default_hybrid_alpha")]
    pub hybrid_alpha: f64,
    /// Lexical candidates taken into fusion.
    #[serde(default = "default_candidates")]
    pub lexical_top_k: usize,
    /// Semantic candidates requested from the vector store.
    #[serde(default = "default_candidates")]
    pub vector_limit: usize,
    #[serde(default)]
    pub min_similarity: f64,
}

impl Default for RetrievalConfig {
    fn default() -> Self {
        Self {
            default_max_chunks: default_max_chunks(),
            default_max_docs: default_max_docs(),
            use_vector_search: true,
            use_bm25: false,
            use_reranking: false,
            hybrid_alpha: default_hybrid_alpha(),
            lexical_top_k: default_candidates(),
            vector_limit: default_candidates(),
            min_similarity: 0.0,
        }
    }
}

impl RetrievalConfig {
    pub fn fusion_params(&self) -> FusionParams {
        FusionParams {
            use_bm25: self.use_bm25,
            use_vector_search: self.use_vector_search,
            hybrid_alpha: self.hybrid_alpha,
        }
    }

    /// The configured budget, with per-request overrides applied.
    pub fn selection_params(
        &self,
        max_chunks: Option<usize>,
        max_docs: Option<usize>,
    ) -> SelectionParams {
        SelectionParams {
            max_chunks: max_chunks.unwrap_or(self.default_max_chunks),
            max_docs: max_docs.unwrap_or(self.default_max_docs),
        }
    }
}

fn default_max_chunks() -> usize {
    8
}
fn default_max_docs() -> usize {
    5
}
fn default_true() -> bool {
    true
}
fn default_hybrid_alpha() -> f64 {
    0.6
}
fn default_candidates() -> usize {
    50
}

#[derive(Debug, Deserialize, Clone)]
pub struct EmbeddingConfig {
    #[serde(default = "default_provider")]
    pub provider: String,
    #[serde(default)]
    pub model: Option<String>,
    #[serde(default)]
    pub dims: Option<usize>,
    #[serde(default = "default_batch_size")]
    pub batch_size: usize,
    #[serde(default = "default_max_retries")]
    pub max_retries: u32,
    #[serde(default = "default_embedding_timeout")]
    pub timeout_secs: u64,
}

impl Default for EmbeddingConfig {
    fn default() -> Self {
        Self {
            provider: default_provider(),
            model: None,
            dims: None,
            batch_size: default_batch_size(),
            max_retries: default_max_retries(),
            timeout_secs: default_embedding_timeout(),
        }
    }
}

impl EmbeddingConfig {
    pub fn is_enabled(&self) -> bool {
        self.provider != "disabled"
    }
}

fn default_provider() -> String {
    "disabled".to_string()
}
fn default_batch_size() -> usize {
    64
}
fn default_max_retries() -> u32 {
    5
}
fn default_embedding_timeout() -> u64 {
    30
}

/// Chat-completion model used for contradiction detection.
#[derive(Debug, Deserialize, Clone)]
pub struct LlmConfig {
    #[serde(default = "default_provider")]
    pub provider: String,
    #[serde(default = "default_llm_model")]
    pub model: String,
    #[serde(default = "default_llm_timeout")]
    pub timeout_secs: u64,
}

impl Default for LlmConfig {
    fn default() -> Self {
        Self {
            provider: default_provider(),
            model: default_llm_model(),
            timeout_secs: default_llm_timeout(),
        }
    }
}

impl LlmConfig {
    pub fn is_enabled(&self) -> bool {
        self.provider != "disabled"
    }
}

fn default_llm_model() -> String {
    "gpt-4o-mini".to_string()
}
fn default_llm_timeout() -> u64 {
    20
}

pub fn load_config(path: &Path) -> Result<Config> {
    let content = std::fs::read_to_string(path)
        .with_context(|| format!("Failed to read config file: {}", path.display()))?;

    let config: Config = toml::from_str(&content).with_context(|| "Failed to parse config file")?;
    validate(&config)?;
    Ok(config)
}

pub fn validate(config: &Config) -> Result<()> {
    if config.chunking.max_tokens == 0 {
        anyhow::bail!("chunking.max_tokens must be > 0");
    }

    let retrieval = &config.retrieval;
    if retrieval.default_max_chunks < 1 {
        anyhow::bail!("retrieval.default_max_chunks must be >= 1");
    }
    if retrieval.default_max_docs < 1 {
        anyhow::bail!("retrieval.default_max_docs must be >= 1");
    }
    if !(0.0..=1.0).contains(&retrieval.hybrid_alpha) {
        anyhow::bail!("retrieval.hybrid_alpha must be in [0.0, 1.0]");
    }
    if !retrieval.use_bm25 && !retrieval.use_vector_search {
        anyhow::bail!("at least one of retrieval.use_bm25 or retrieval.use_vector_search must be true");
    }
    if retrieval.use_vector_search && !config.embedding.is_enabled() {
        anyhow::bail!(
            "retrieval.use_vector_search needs an [embedding] provider; set one or disable vector search"
        );
    }

    if config.embedding.is_enabled() {
        if config.embedding.dims.is_none() || config.embedding.dims == Some(0) {
            anyhow::bail!(
                "embedding.dims must be > 0 when provider is '{}'",
                config.embedding.provider
            );
        }
        if config.embedding.model.is_none() {
            anyhow::bail!(
                "embedding.model must be specified when provider is '{}'",
                config.embedding.provider
            );
        }
    }

    match config.embedding.provider.as_str() {
        "disabled" | "openai" => {}
        other => anyhow::bail!(
            "Unknown embedding provider: '{}'. Must be disabled or openai.",
            other
        ),
    }
    match config.llm.provider.as_str() {
        "disabled" | "openai" => {}
        other => anyhow::bail!("Unknown llm provider: '{}'. Must be disabled or openai.", other),
    }

    Ok(())
}
