//! SQLite-backed collaborators.
//!
//! [`SqliteStore`] implements the three core collaborator traits over the
//! schema created by [`crate::migrate`]:
//!
//! - [`SemanticSearch`]: brute-force cosine over `chunk_vectors` joined to
//!   the owning user's documents
//! - [`DocumentSource`]: `documents` and `chunks`
//! - [`RelevanceSink`]: `chunk_relevance_logs`, skip-on-conflict by `id`

use std::collections::HashSet;

use anyhow::Result;
use async_trait::async_trait;
use chrono::{DateTime, Utc};
use sqlx::sqlite::SqliteRow;
use sqlx::{Row, SqlitePool};

use ragline_core::embedding::{bytes_to_vector, cosine_similarity, vector_to_bytes};
use ragline_core::intent::QueryIntent;
use ragline_core::models::{Chunk, Document, FullDocument, RetrievedChunk};
use ragline_core::relevance::ChunkRelevanceRecord;
use ragline_core::store::{DocumentSource, RelevanceSink, SemanticQuery, SemanticSearch, SinkError};

const RELEVANCE_TABLE: &str = "chunk_relevance_logs";

/// Vectors to store alongside a document's chunks, one per chunk.
pub struct ChunkEmbeddings<'a> {
    pub model: &'a str,
    pub vectors: &'a [Vec<f32>],
}

/// Existing row for a `(user, folder, filename)` triple.
#[derive(Debug, Clone, PartialEq)]
pub struct StoredDocument {
    pub id: String,
    pub dedup_hash: String,
}

#[derive(Clone)]
pub struct SqliteStore {
    pool: SqlitePool,
}

impl SqliteStore {
    pub fn new(pool: SqlitePool) -> Self {
        Self { pool }
    }

    pub fn pool(&self) -> &SqlitePool {
        &self.pool
    }

    pub async fn find_document(
        &self,
        user_id: &str,
        folder: Option<&str>,
        filename: &str,
    ) -> Result<Option<StoredDocument>> {
        let row = sqlx::query(
            "SELECT id, dedup_hash FROM documents WHERE user_id = ? AND folder = ? AND filename = ?",
        )
        .bind(user_id)
        .bind(folder.unwrap_or(""))
        .bind(filename)
        .fetch_optional(&self.pool)
        .await?;

        row.map(|r| -> Result<StoredDocument> {
            Ok(StoredDocument {
                id: r.try_get("id")?,
                dedup_hash: r.try_get("dedup_hash")?,
            })
        })
        .transpose()
    }

    /// Insert or update by `(user_id, folder, filename)`; returns the stored id.
    pub async fn upsert_document(&self, doc: &Document) -> Result<String> {
        let id = match self
            .find_document(&doc.user_id, doc.folder.as_deref(), &doc.filename)
            .await?
        {
            Some(existing) => existing.id,
            None => doc.id.clone(),
        };

        sqlx::query(
            r#"
            INSERT INTO documents (id, user_id, folder, filename, content, updated_at, dedup_hash)
            VALUES (?, ?, ?, ?, ?, ?, ?)
            ON CONFLICT(user_id, folder, filename) DO UPDATE SET
                content = excluded.content,
                updated_at = excluded.updated_at,
                dedup_hash = excluded.dedup_hash
            "#,
        )
        .bind(&id)
        .bind(&doc.user_id)
        .bind(doc.folder.as_deref().unwrap_or(""))
        .bind(&doc.filename)
        .bind(&doc.content)
        .bind(doc.updated_at)
        .bind(&doc.dedup_hash)
        .execute(&self.pool)
        .await?;

        Ok(id)
    }

    /// Replace every chunk (and vector) of `doc_id` in one transaction.
    pub async fn replace_chunks(
        &self,
        doc_id: &str,
        chunks: &[Chunk],
        embeddings: Option<ChunkEmbeddings<'_>>,
    ) -> Result<()> {
        let mut tx = self.pool.begin().await?;

        sqlx::query("DELETE FROM chunk_vectors WHERE document_id = ?")
            .bind(doc_id)
            .execute(&mut *tx)
            .await?;
        sqlx::query("DELETE FROM chunks WHERE document_id = ?")
            .bind(doc_id)
            .execute(&mut *tx)
            .await?;

        for (i, chunk) in chunks.iter().enumerate() {
            sqlx::query(
                r#"
                INSERT INTO chunks (id, document_id, chunk_index, page_number, text, hash)
                VALUES (?, ?, ?, ?, ?, ?)
                "#,
            )
            .bind(&chunk.id)
            .bind(doc_id)
            .bind(chunk.chunk_index)
            .bind(chunk.page_number.map(i64::from))
            .bind(&chunk.text)
            .bind(&chunk.hash)
            .execute(&mut *tx)
            .await?;

            let Some(emb) = &embeddings else { continue };
            if let Some(vector) = emb.vectors.get(i) {
                sqlx::query(
                    r#"
                    INSERT INTO chunk_vectors (chunk_id, document_id, model, dims, embedding)
                    VALUES (?, ?, ?, ?, ?)
                    "#,
                )
                .bind(&chunk.id)
                .bind(doc_id)
                .bind(emb.model)
                .bind(vector.len() as i64)
                .bind(vector_to_bytes(vector))
                .execute(&mut *tx)
                .await?;
            }
        }

        tx.commit().await?;
        Ok(())
    }

    /// `(id, filename)` of `user_id`'s documents among `ids`, in the given order.
    pub async fn filenames(&self, user_id: &str, ids: &[String]) -> Result<Vec<(String, String)>> {
        let mut out = Vec::with_capacity(ids.len());
        for id in ids {
            let name: Option<String> =
                sqlx::query_scalar("SELECT filename FROM documents WHERE id = ? AND user_id = ?")
                    .bind(id)
                    .bind(user_id)
                    .fetch_optional(&self.pool)
                    .await?;
            if let Some(name) = name {
                out.push((id.clone(), name));
            }
        }
        Ok(out)
    }
}

fn page_number(row: &SqliteRow) -> Result<Option<u32>, sqlx::Error> {
    let raw: Option<i64> = row.try_get("page_number")?;
    Ok(raw.and_then(|p| u32::try_from(p).ok()))
}

#[async_trait]
impl SemanticSearch for SqliteStore {
    async fn search(&self, query: &SemanticQuery<'_>) -> Result<Vec<RetrievedChunk>> {
        let rows = sqlx::query(
            r#"
            SELECT cv.chunk_id, cv.document_id, cv.embedding, c.page_number
            FROM chunk_vectors cv
            JOIN chunks c ON c.id = cv.chunk_id
            JOIN documents d ON d.id = cv.document_id
            WHERE d.user_id = ?
            "#,
        )
        .bind(query.scope)
        .fetch_all(&self.pool)
        .await?;

        let allowed: Option<HashSet<&str>> = query
            .document_ids
            .map(|ids| ids.iter().map(String::as_str).collect());

        let mut candidates = Vec::new();
        for row in &rows {
            let document_id: String = row.try_get("document_id")?;
            if let Some(set) = &allowed {
                if !set.contains(document_id.as_str()) {
                    continue;
                }
            }
            let blob: Vec<u8> = row.try_get("embedding")?;
            let similarity = cosine_similarity(query.embedding, &bytes_to_vector(&blob));
            if similarity < query.min_similarity {
                continue;
            }
            candidates.push(RetrievedChunk {
                chunk_id: row.try_get("chunk_id")?,
                document_id,
                score: similarity,
                page_number: page_number(row)?,
            });
        }

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
impl DocumentSource for SqliteStore {
    async fn get_document(&self, id: &str) -> Result<Option<FullDocument>> {
        let row = sqlx::query("SELECT filename, content FROM documents WHERE id = ?")
            .bind(id)
            .fetch_optional(&self.pool)
            .await?;

        row.map(|r| -> Result<FullDocument> {
            Ok(FullDocument {
                filename: r.try_get("filename")?,
                content: r.try_get("content")?,
            })
        })
        .transpose()
    }

    async fn documents_in_folder(&self, scope: &str, folder: &str) -> Result<Vec<String>> {
        let ids: Vec<String> = sqlx::query_scalar(
            "SELECT id FROM documents WHERE user_id = ? AND folder <> '' AND lower(folder) = lower(?) ORDER BY id",
        )
        .bind(scope)
        .bind(folder)
        .fetch_all(&self.pool)
        .await?;
        Ok(ids)
    }

    async fn corpus(&self, scope: &str) -> Result<Vec<Chunk>> {
        let rows = sqlx::query(
            r#"
            SELECT c.id, c.document_id, c.chunk_index, c.page_number, c.text, c.hash
            FROM chunks c
            JOIN documents d ON d.id = c.document_id
            WHERE d.user_id = ?
            ORDER BY c.document_id, c.chunk_index
            "#,
        )
        .bind(scope)
        .fetch_all(&self.pool)
        .await?;

        rows.iter()
            .map(|row| -> Result<Chunk> {
                Ok(Chunk {
                    id: row.try_get("id")?,
                    document_id: row.try_get("document_id")?,
                    chunk_index: row.try_get("chunk_index")?,
                    page_number: page_number(row)?,
                    text: row.try_get("text")?,
                    hash: row.try_get("hash")?,
                })
            })
            .collect()
    }
}

/// Distinguish a missing log table from every other failure.
fn sink_error(err: sqlx::Error) -> SinkError {
    let missing = err
        .as_database_error()
        .is_some_and(|db| db.message().contains("no such table"));
    if missing {
        SinkError::MissingStorage(RELEVANCE_TABLE.to_string())
    } else {
        SinkError::Other(err.into())
    }
}

fn decode_record(row: &SqliteRow) -> Result<ChunkRelevanceRecord, sqlx::Error> {
    let intent: String = row.try_get("intent")?;
    let rank_index: i64 = row.try_get("rank_index")?;
    let created_at: i64 = row.try_get("created_at")?;

    Ok(ChunkRelevanceRecord {
        id: row.try_get("id")?,
        user_id: row.try_get("user_id")?,
        conversation_id: row.try_get("conversation_id")?,
        query: row.try_get("query")?,
        intent: QueryIntent::parse_str(&intent).unwrap_or(QueryIntent::GeneralSearch),
        chunk_id: row.try_get("chunk_id")?,
        document_id: row.try_get("document_id")?,
        score: row.try_get("score")?,
        page_number: page_number(row)?,
        rank_index: usize::try_from(rank_index).unwrap_or(0),
        selected: row.try_get("selected")?,
        created_at: from_micros(created_at),
    })
}

fn from_micros(micros: i64) -> DateTime<Utc> {
    let nanos = (micros.rem_euclid(1_000_000) * 1_000) as u32;
    DateTime::from_timestamp(micros.div_euclid(1_000_000), nanos).unwrap_or_default()
}

#[async_trait]
impl RelevanceSink for SqliteStore {
    async fn insert_batch(&self, records: &[ChunkRelevanceRecord]) -> Result<(), SinkError> {
        let mut tx = self.pool.begin().await.map_err(sink_error)?;

        for r in records {
            sqlx::query(
                r#"
                INSERT INTO chunk_relevance_logs
                    (id, user_id, conversation_id, query, intent, chunk_id, document_id,
                     score, page_number, rank_index, selected, created_at)
                VALUES (?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?)
                ON CONFLICT(id) DO NOTHING
                "#,
            )
            .bind(&r.id)
            .bind(&r.user_id)
            .bind(&r.conversation_id)
            .bind(&r.query)
            .bind(r.intent.as_str())
            .bind(&r.chunk_id)
            .bind(&r.document_id)
            .bind(r.score)
            .bind(r.page_number.map(i64::from))
            .bind(r.rank_index as i64)
            .bind(r.selected)
            .bind(r.created_at.timestamp_micros())
            .execute(&mut *tx)
            .await
            .map_err(sink_error)?;
        }

        tx.commit().await.map_err(sink_error)?;
        Ok(())
    }

    async fn recent(
        &self,
        user_id: &str,
        limit: usize,
    ) -> Result<Vec<ChunkRelevanceRecord>, SinkError> {
        let rows = sqlx::query(
            r#"
            SELECT * FROM chunk_relevance_logs
            WHERE user_id = ?
            ORDER BY created_at DESC, rank_index ASC
            LIMIT ?
            "#,
        )
        .bind(user_id)
        .bind(limit as i64)
        .fetch_all(&self.pool)
        .await
        .map_err(sink_error)?;

        rows.iter()
            .map(decode_record)
            .collect::<Result<Vec<_>, _>>()
            .map_err(sink_error)
    }
}
