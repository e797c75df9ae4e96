//! Directory ingestion: files → documents → chunks (+ vectors) → SQLite.
//!
//! Files directly under the root have no folder; files in a subdirectory
//! belong to the folder named by the first path component and are named by
//! the rest of their path (`Reports/2024/q2.md` is `2024/q2.md` in
//! `Reports`). Documents whose content hash is unchanged are skipped.
//! Embedding failures are not fatal: the chunks are stored without vectors.

use std::path::{Path, PathBuf};

use anyhow::{bail, Context, Result};
use sha2::{Digest, Sha256};
use tracing::{debug, info, warn};
use uuid::Uuid;
use walkdir::WalkDir;

use ragline_core::chunk::chunk_text;
use ragline_core::embedding::Embedder;
use ragline_core::models::Document;

use crate::config::Config;
use crate::db;
use crate::embedding::{create_embedder, embed_texts};
use crate::sqlite_store::{ChunkEmbeddings, SqliteStore};

const EXTENSIONS: &[&str] = &["md", "txt"];

#[derive(Debug, Default, Clone, PartialEq, Eq)]
pub struct IngestSummary {
    pub files_found: usize,
    pub upserted: usize,
    pub unchanged: usize,
    pub chunks_written: usize,
    pub embeddings_written: usize,
}

pub async fn run_ingest(config: &Config, root: &Path, user_id: &str) -> Result<()> {
    let pool = db::connect(config).await?;
    let store = SqliteStore::new(pool.clone());
    let embedder = create_embedder(&config.embedding)?;

    let summary = ingest_directory(config, &store, embedder.as_deref(), root, user_id).await?;

    println!("ingest {}", root.display());
    println!("  files found: {}", summary.files_found);
    println!("  upserted documents: {}", summary.upserted);
    println!("  unchanged: {}", summary.unchanged);
    println!("  chunks written: {}", summary.chunks_written);
    if embedder.is_some() {
        println!("  embeddings written: {}", summary.embeddings_written);
    }
    println!("ok");

    pool.close().await;
    Ok(())
}

pub async fn ingest_directory(
    config: &Config,
    store: &SqliteStore,
    embedder: Option<&dyn Embedder>,
    root: &Path,
    user_id: &str,
) -> Result<IngestSummary> {
    if !root.is_dir() {
        bail!("{} is not a directory", root.display());
    }

    let files = scan(root)?;
    let mut summary = IngestSummary {
        files_found: files.len(),
        ..Default::default()
    };

    for file in &files {
        let content = match std::fs::read_to_string(&file.path) {
            Ok(c) => c,
            Err(e) => {
                warn!(path = %file.path.display(), error = %e, "skipping unreadable file");
                continue;
            }
        };
        let dedup_hash = format!("{:x}", Sha256::digest(content.as_bytes()));

        let existing = store
            .find_document(user_id, file.folder.as_deref(), &file.filename)
            .await?;
        if existing.as_ref().is_some_and(|d| d.dedup_hash == dedup_hash) {
            debug!(filename = %file.filename, "unchanged");
            summary.unchanged += 1;
            continue;
        }

        let doc = Document {
            id: existing.map_or_else(|| Uuid::new_v4().to_string(), |d| d.id),
            user_id: user_id.to_string(),
            folder: file.folder.clone(),
            filename: file.filename.clone(),
            content,
            updated_at: file.modified,
            dedup_hash,
        };
        let doc_id = store.upsert_document(&doc).await?;
        let chunks = chunk_text(&doc_id, &doc.content, config.chunking.max_tokens);

        let vectors = match embedder {
            Some(embedder) => {
                let texts: Vec<String> = chunks.iter().map(|c| c.text.clone()).collect();
                match embed_texts(embedder, &texts, config.embedding.batch_size).await {
                    Ok(v) => Some(v),
                    Err(e) => {
                        warn!(filename = %doc.filename, error = %e, "embedding failed; storing chunks without vectors");
                        None
                    }
                }
            }
            None => None,
        };

        let embeddings = match (embedder, vectors.as_deref()) {
            (Some(embedder), Some(vectors)) => Some(ChunkEmbeddings {
                model: embedder.model_name(),
                vectors,
            }),
            _ => None,
        };
        let embedded = embeddings.as_ref().map_or(0, |e| e.vectors.len());
        store.replace_chunks(&doc_id, &chunks, embeddings).await?;

        summary.upserted += 1;
        summary.chunks_written += chunks.len();
        summary.embeddings_written += embedded;
    }

    info!(
        user_id,
        files = summary.files_found,
        upserted = summary.upserted,
        unchanged = summary.unchanged,
        "ingest finished"
    );
    Ok(summary)
}

struct SourceFile {
    path: PathBuf,
    folder: Option<String>,
    filename: String,
    modified: i64,
}

fn scan(root: &Path) -> Result<Vec<SourceFile>> {
    let mut files = Vec::new();

    for entry in WalkDir::new(root).sort_by_file_name() {
        let entry = entry.with_context(|| format!("walking {}", root.display()))?;
        if !entry.file_type().is_file() {
            continue;
        }
        let path = entry.path();
        let supported = path
            .extension()
            .and_then(|e| e.to_str())
            .is_some_and(|e| EXTENSIONS.contains(&e.to_ascii_lowercase().as_str()));
        if !supported {
            continue;
        }

        let relative = path.strip_prefix(root).unwrap_or(path);
        let components: Vec<String> = relative
            .components()
            .map(|c| c.as_os_str().to_string_lossy().into_owned())
            .collect();
        // Root files have no folder; deeper files keep their path below it.
        let (folder, filename) = match components.as_slice() {
            [] => continue,
            [name] => (None, name.clone()),
            [folder, rest @ ..] => (Some(folder.clone()), rest.join("/")),
        };

        let modified = entry
            .metadata()
            .ok()
            .and_then(|m| m.modified().ok())
            .and_then(|t| t.duration_since(std::time::UNIX_EPOCH).ok())
            .map_or(0, |d| d.as_secs() as i64);

        files.push(SourceFile {
            path: path.to_path_buf(),
            folder,
            filename,
            modified,
        });
    }

    Ok(files)
}
