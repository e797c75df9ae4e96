//! Per-user index overview for `ragline stats`.

use anyhow::Result;
use sqlx::SqlitePool;

use ragline_core::bm25::{IndexStats, LexicalIndex};
use ragline_core::models::IndexInput;
use ragline_core::store::DocumentSource;

use crate::config::Config;
use crate::db;
use crate::sqlite_store::SqliteStore;

#[derive(Debug, Clone, PartialEq)]
pub struct UserStats {
    pub documents: i64,
    pub chunks: i64,
    pub embedded: i64,
    /// `None` when the log table does not exist.
    pub relevance_rows: Option<i64>,
    pub index: IndexStats,
}

pub async fn collect(store: &SqliteStore, user_id: &str) -> Result<UserStats> {
    let pool = store.pool();

    let documents = count(pool, "SELECT COUNT(*) FROM documents WHERE user_id = ?", user_id).await?;
    let chunks = count(
        pool,
        "SELECT COUNT(*) FROM chunks c JOIN documents d ON d.id = c.document_id WHERE d.user_id = ?",
        user_id,
    )
    .await?;
    let embedded = count(
        pool,
        "SELECT COUNT(*) FROM chunk_vectors cv JOIN documents d ON d.id = cv.document_id WHERE d.user_id = ?",
        user_id,
    )
    .await?;
    let relevance_rows = count(
        pool,
        "SELECT COUNT(*) FROM chunk_relevance_logs WHERE user_id = ?",
        user_id,
    )
    .await
    .ok();

    let inputs: Vec<IndexInput> = store
        .corpus(user_id)
        .await?
        .iter()
        .map(|c| c.to_index_input())
        .collect();
    let index = tokio::task::spawn_blocking(move || LexicalIndex::build(&inputs).stats()).await?;

    Ok(UserStats {
        documents,
        chunks,
        embedded,
        relevance_rows,
        index,
    })
}

async fn count(pool: &SqlitePool, sql: &str, user_id: &str) -> Result<i64> {
    Ok(sqlx::query_scalar(sql).bind(user_id).fetch_one(pool).await?)
}

pub async fn run_stats(config: &Config, user_id: &str) -> Result<()> {
    let pool = db::connect(config).await?;
    let store = SqliteStore::new(pool.clone());
    let stats = collect(&store, user_id).await?;

    let db_size = std::fs::metadata(&config.db.path)
        .map(|m| m.len())
        .unwrap_or(0);

    println!("ragline stats for {}", user_id);
    println!();
    println!("  Database:    {}", config.db.path.display());
    println!("  Size:        {}", format_bytes(db_size));
    println!();
    println!("  Documents:   {}", stats.documents);
    println!("  Chunks:      {}", stats.chunks);
    println!(
        "  Embedded:    {} / {} ({}%)",
        stats.embedded,
        stats.chunks,
        if stats.chunks > 0 {
            (stats.embedded * 100) / stats.chunks
        } else {
            0
        }
    );
    match stats.relevance_rows {
        Some(rows) => println!("  Log rows:    {}", rows),
        None => println!("  Log rows:    n/a (table missing)"),
    }
    println!();
    println!("  Lexical index:");
    println!("    documents:     {}", stats.index.total_documents);
    println!("    unique terms:  {}", stats.index.unique_terms);
    println!("    avg length:    {:.1}", stats.index.average_doc_length);
    println!();

    pool.close().await;
    Ok(())
}

fn format_bytes(bytes: u64) -> String {
    const KB: f64 = 1024.0;
    let b = bytes as f64;
    if b < KB {
        format!("{} B", bytes)
    } else if b < KB * KB {
        format!("{:.1} KB", b / KB)
    } else if b < KB * KB * KB {
        format!("{:.1} MB", b / (KB * KB))
    } else {
        format!("{:.2} GB", b / (KB * KB * KB))
    }
}
