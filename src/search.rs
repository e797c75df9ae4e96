//! `ragline search`, `ragline intent` and `ragline logs`.

use std::collections::HashMap;
use std::sync::Arc;

use anyhow::Result;
use tracing::warn;

use ragline_core::contradiction::format_for_user;
use ragline_core::intent::{IntentParser, RetrievalScope};
use ragline_core::relevance::RelevanceLogger;

use crate::config::Config;
use crate::db;
use crate::retrieval::{RetrievalRequest, RetrievalService};
use crate::sqlite_store::SqliteStore;

pub async fn run_search(config: &Config, request: &RetrievalRequest) -> Result<()> {
    let pool = db::connect(config).await?;
    let store = SqliteStore::new(pool.clone());
    let service = RetrievalService::from_config(config, store.clone())?;

    let mut outcome = service.retrieve(request).await?;
    println!("intent: {}", outcome.parsed.intent);

    if let RetrievalScope::FolderListing { folder } = &outcome.scope {
        let docs = store.filenames(&request.user_id, &outcome.folder_documents).await?;
        println!("folder {}: {} document(s)", folder, docs.len());
        for (id, name) in docs {
            println!("  {}  {}", name, id);
        }
    } else if outcome.selected.is_empty() {
        println!("No results.");
    } else {
        let doc_ids: Vec<String> = outcome
            .selected
            .iter()
            .map(|c| c.document_id.clone())
            .collect();
        let names: HashMap<String, String> = store
            .filenames(&request.user_id, &doc_ids)
            .await?
            .into_iter()
            .collect();

        println!(
            "selected {} of {} candidate(s)",
            outcome.selected.len(),
            outcome.ranked.len()
        );
        for (i, chunk) in outcome.selected.iter().enumerate() {
            let name = names
                .get(&chunk.document_id)
                .map(String::as_str)
                .unwrap_or(chunk.document_id.as_str());
            let page = chunk
                .page_number
                .map(|p| format!(" p.{}", p))
                .unwrap_or_default();
            println!(
                "{}. [{:.4}] {}{}  chunk {}",
                i + 1,
                chunk.score,
                name,
                page,
                chunk.chunk_id
            );
        }
    }

    let report = format_for_user(&outcome.contradictions);
    if !report.is_empty() {
        println!();
        println!("{}", report);
    }

    // The process exits right after; let the log write land first.
    if let Some(handle) = outcome.relevance_log.take() {
        if let Err(e) = handle.await {
            warn!(error = %e, "relevance log task failed");
        }
    }

    pool.close().await;
    Ok(())
}

pub fn run_intent(query: &str) -> Result<()> {
    let parser = IntentParser::new()?;
    let parsed = parser.parse(query);
    println!("{}", serde_json::to_string_pretty(&parsed)?);
    Ok(())
}

pub async fn run_logs(config: &Config, user_id: &str, limit: usize) -> Result<()> {
    let pool = db::connect(config).await?;
    let logger = RelevanceLogger::new(Arc::new(SqliteStore::new(pool.clone())));
    let rows = logger.recent_logs(user_id, limit).await;

    if rows.is_empty() {
        println!("No relevance logs for {}.", user_id);
    } else {
        println!(
            "{:<20} {:>4} {:>3} {:>8}  {:<15} QUERY",
            "WHEN", "RANK", "SEL", "SCORE", "INTENT"
        );
        for r in &rows {
            println!(
                "{:<20} {:>4} {:>3} {:>8.4}  {:<15} {}",
                r.created_at.format("%Y-%m-%d %H:%M:%S").to_string(),
                r.rank_index,
                if r.selected { "*" } else { "" },
                r.score,
                r.intent.as_str(),
                r.query
            );
        }
    }

    pool.close().await;
    Ok(())
}
