//! Hybrid fusion of lexical and semantic candidates, and context-budget
//! selection.
//!
//! # Fusion
//!
//! 1. Deduplicate each source by `chunk_id` (first occurrence wins).
//! 2. Normalise each source independently to `[0, 1]` (min-max).
//! 3. Chunks in both sources: `score = (1 - α) × lexical + α × semantic`.
//!    Chunks in one source: that source's normalised score.
//! 4. Sort by score (desc), semantic rank (asc, absent last), lexical rank (asc).
//!
//! With only one source enabled the other is ignored and the enabled
//! list passes through deduplicated with its raw scores.
//!
//! # Selection
//!
//! [`select`] walks the ranked list in order, keeping chunks until
//! `max_chunks` are taken, and skipping chunks whose document would push
//! the number of distinct documents above `max_docs`.

use std::collections::{HashMap, HashSet};

use anyhow::{bail, Result};
use serde::Serialize;

use crate::models::{LexicalHit, RetrievedChunk};

/// Which sources participate and how they are weighted.
#[derive(Debug, Clone)]
pub struct FusionParams {
    pub use_bm25: bool,
    pub use_vector_search: bool,
    /// Weight of the semantic score when both sources are on.
    pub hybrid_alpha: f64,
}

impl Default for FusionParams {
    fn default() -> Self {
        Self {
            use_bm25: false,
            use_vector_search: true,
            hybrid_alpha: 0.6,
        }
    }
}

/// Context budget.
#[derive(Debug, Clone, Copy)]
pub struct SelectionParams {
    pub max_chunks: usize,
    pub max_docs: usize,
}

/// Where a lexical hit lives, for hits the semantic source did not see.
#[derive(Debug, Clone, PartialEq)]
pub struct ChunkLocation {
    pub document_id: String,
    pub page_number: Option<u32>,
}

/// Maps lexical index ids to their owning document.
///
/// Ids missing from the directory are treated as whole documents.
pub type ChunkDirectory = HashMap<String, ChunkLocation>;

/// Per-source contribution to a fused score.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct ScoreBreakdown {
    /// Normalised lexical score (`None` if absent from lexical candidates).
    pub lexical: Option<f64>,
    /// Normalised semantic score (`None` if absent from semantic candidates).
    pub semantic: Option<f64>,
    pub lexical_rank: Option<usize>,
    pub semantic_rank: Option<usize>,
}

/// A ranked candidate; `chunk.score` holds the fused score.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct FusedChunk {
    pub chunk: RetrievedChunk,
    pub breakdown: ScoreBreakdown,
}

/// Merge lexical and semantic candidates into one ranked list, unique by
/// `chunk_id`.
pub fn fuse(
    lexical: &[LexicalHit],
    directory: &ChunkDirectory,
    semantic: &[RetrievedChunk],
    params: &FusionParams,
) -> Result<Vec<FusedChunk>> {
    if !(0.0..=1.0).contains(&params.hybrid_alpha) {
        bail!("hybrid_alpha must be in [0.0, 1.0], got {}", params.hybrid_alpha);
    }

    let lexical = lexical_chunks(lexical, directory);

    match (params.use_bm25, params.use_vector_search) {
        (false, false) => bail!("fusion needs at least one of use_bm25 or use_vector_search"),
        (false, true) => Ok(pass_through(semantic, Source::Semantic)),
        (true, false) => Ok(pass_through(&lexical, Source::Lexical)),
        (true, true) => Ok(merge(&lexical, semantic, params.hybrid_alpha)),
    }
}

#[derive(Clone, Copy)]
enum Source {
    Lexical,
    Semantic,
}

fn lexical_chunks(hits: &[LexicalHit], directory: &ChunkDirectory) -> Vec<RetrievedChunk> {
    hits.iter()
        .map(|hit| match directory.get(&hit.id) {
            Some(loc) => RetrievedChunk {
                chunk_id: hit.id.clone(),
                document_id: loc.document_id.clone(),
                score: hit.score,
                page_number: loc.page_number,
            },
            None => RetrievedChunk::new(hit.id.clone(), hit.id.clone(), hit.score),
        })
        .collect()
}

/// Keep the first occurrence of each `chunk_id`, preserving order.
pub fn dedup_by_chunk(chunks: &[RetrievedChunk]) -> Vec<RetrievedChunk> {
    let mut seen: HashSet<&str> = HashSet::new();
    chunks
        .iter()
        .filter(|c| seen.insert(c.chunk_id.as_str()))
        .cloned()
        .collect()
}

fn pass_through(chunks: &[RetrievedChunk], source: Source) -> Vec<FusedChunk> {
    let unique = dedup_by_chunk(chunks);
    let normalized = normalize_scores(&unique);
    unique
        .iter()
        .zip(normalized)
        .enumerate()
        .map(|(rank, (chunk, norm))| {
            let breakdown = match source {
                Source::Lexical => ScoreBreakdown {
                    lexical: Some(norm),
                    semantic: None,
                    lexical_rank: Some(rank),
                    semantic_rank: None,
                },
                Source::Semantic => ScoreBreakdown {
                    lexical: None,
                    semantic: Some(norm),
                    lexical_rank: None,
                    semantic_rank: Some(rank),
                },
            };
            FusedChunk {
                chunk: chunk.clone(),
                breakdown,
            }
        })
        .collect()
}

fn merge(lexical: &[RetrievedChunk], semantic: &[RetrievedChunk], alpha: f64) -> Vec<FusedChunk> {
    let lexical = dedup_by_chunk(lexical);
    let semantic = dedup_by_chunk(semantic);
    let norm_lex = normalize_scores(&lexical);
    let norm_sem = normalize_scores(&semantic);

    let lex_map: HashMap<&str, (usize, f64)> = lexical
        .iter()
        .zip(&norm_lex)
        .enumerate()
        .map(|(rank, (c, s))| (c.chunk_id.as_str(), (rank, *s)))
        .collect();
    let sem_map: HashMap<&str, (usize, f64)> = semantic
        .iter()
        .zip(&norm_sem)
        .enumerate()
        .map(|(rank, (c, s))| (c.chunk_id.as_str(), (rank, *s)))
        .collect();

    // Semantic entries carry the provider's page numbers, so they win.
    let mut order: Vec<&RetrievedChunk> = semantic.iter().collect();
    order.extend(
        lexical
            .iter()
            .filter(|c| !sem_map.contains_key(c.chunk_id.as_str())),
    );

    let mut fused: Vec<FusedChunk> = order
        .into_iter()
        .map(|c| {
            let lex = lex_map.get(c.chunk_id.as_str()).copied();
            let sem = sem_map.get(c.chunk_id.as_str()).copied();
            let score = match (lex, sem) {
                (Some((_, k)), Some((_, v))) => (1.0 - alpha) * k + alpha * v,
                (Some((_, k)), None) => k,
                (None, Some((_, v))) => v,
                (None, None) => 0.0,
            };
            FusedChunk {
                chunk: RetrievedChunk {
                    score,
                    ..c.clone()
                },
                breakdown: ScoreBreakdown {
                    lexical: lex.map(|(_, s)| s),
                    semantic: sem.map(|(_, s)| s),
                    lexical_rank: lex.map(|(r, _)| r),
                    semantic_rank: sem.map(|(r, _)| r),
                },
            }
        })
        .collect();

    fused.sort_by(|a, b| {
        b.chunk
            .score
            .partial_cmp(&a.chunk.score)
            .unwrap_or(std::cmp::Ordering::Equal)
            .then_with(|| rank_key(a.breakdown.semantic_rank).cmp(&rank_key(b.breakdown.semantic_rank)))
            .then_with(|| rank_key(a.breakdown.lexical_rank).cmp(&rank_key(b.breakdown.lexical_rank)))
    });

    fused
}

fn rank_key(rank: Option<usize>) -> usize {
    rank.unwrap_or(usize::MAX)
}

/// Min-max normalise raw scores to `[0.0, 1.0]`.
///
/// If all scores are equal, they are normalised to `1.0`.
pub fn normalize_scores(chunks: &[RetrievedChunk]) -> Vec<f64> {
    if chunks.is_empty() {
        return Vec::new();
    }

    let s_min = chunks.iter().map(|c| c.score).fold(f64::INFINITY, f64::min);
    let s_max = chunks
        .iter()
        .map(|c| c.score)
        .fold(f64::NEG_INFINITY, f64::max);

    chunks
        .iter()
        .map(|c| {
            if (s_max - s_min).abs() < f64::EPSILON {
                1.0
            } else {
                (c.score - s_min) / (s_max - s_min)
            }
        })
        .collect()
}

/// Take the best chunks within the context budget.
///
/// Order among kept chunks follows `ranked`.
pub fn select(ranked: &[FusedChunk], params: SelectionParams) -> Result<Vec<RetrievedChunk>> {
    if params.max_chunks == 0 {
        bail!("max_chunks must be >= 1");
    }
    if params.max_docs == 0 {
        bail!("max_docs must be >= 1");
    }

    let mut docs: HashSet<&str> = HashSet::new();
    let mut selected = Vec::with_capacity(params.max_chunks.min(ranked.len()));

    for fc in ranked {
        if selected.len() == params.max_chunks {
            break;
        }
        let doc = fc.chunk.document_id.as_str();
        if !docs.contains(doc) {
            if docs.len() == params.max_docs {
                continue;
            }
            docs.insert(doc);
        }
        selected.push(fc.chunk.clone());
    }

    Ok(selected)
}

/// Reordering hook applied after fusion when reranking is enabled.
pub trait Reranker: Send + Sync {
    fn rerank(&self, query: &str, candidates: Vec<FusedChunk>) -> Vec<FusedChunk>;
}

/// Leaves the fused order untouched.
#[derive(Debug, Default, Clone, Copy)]
pub struct PassthroughReranker;

impl Reranker for PassthroughReranker {
    fn rerank(&self, _query: &str, candidates: Vec<FusedChunk>) -> Vec<FusedChunk> {
        candidates
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn hit(id: &str, score: f64) -> LexicalHit {
        LexicalHit {
            id: id.to_string(),
            score,
        }
    }

    fn chunk(id: &str, doc: &str, score: f64) -> RetrievedChunk {
        RetrievedChunk::new(id, doc, score)
    }

    fn hybrid(alpha: f64) -> FusionParams {
        FusionParams {
            use_bm25: true,
            use_vector_search: true,
            hybrid_alpha: alpha,
        }
    }

    fn ids(fused: &[FusedChunk]) -> Vec<&str> {
        fused.iter().map(|f| f.chunk.chunk_id.as_str()).collect()
    }

    fn directory(entries: &[(&str, &str)]) -> ChunkDirectory {
        entries
            .iter()
            .map(|(id, doc)| {
                (
                    id.to_string(),
                    ChunkLocation {
                        document_id: doc.to_string(),
                        page_number: None,
                    },
                )
            })
            .collect()
    }

    #[test]
    fn test_normalize_empty() {
        assert!(normalize_scores(&[]).is_empty());
    }

    #[test]
    fn test_normalize_range() {
        let cs = vec![chunk("c1", "d1", 10.0), chunk("c2", "d2", 5.0), chunk("c3", "d3", 0.0)];
        let n = normalize_scores(&cs);
        assert!((n[0] - 1.0).abs() < 1e-9);
        assert!((n[1] - 0.5).abs() < 1e-9);
        assert!(n[2].abs() < 1e-9);
    }

    #[test]
    fn test_normalize_all_equal() {
        let cs = vec![chunk("c1", "d1", 3.0), chunk("c2", "d2", 3.0)];
        assert!(normalize_scores(&cs).iter().all(|s| (*s - 1.0).abs() < 1e-9));
    }

    #[test]
    fn test_default_passes_semantic_through() {
        let semantic = vec![
            chunk("c1", "d1", 0.9),
            chunk("c2", "d1", 0.8),
            chunk("c1", "d1", 0.7),
        ];
        let fused = fuse(&[hit("x", 5.0)], &ChunkDirectory::new(), &semantic, &FusionParams::default())
            .unwrap();
        assert_eq!(ids(&fused), vec!["c1", "c2"]);
        assert_eq!(fused[0].chunk.score, 0.9);
        assert_eq!(fused[1].chunk.score, 0.8);
    }

    #[test]
    fn test_lexical_only() {
        let params = FusionParams {
            use_bm25: true,
            use_vector_search: false,
            hybrid_alpha: 0.6,
        };
        let dir = directory(&[("c1", "d9")]);
        let fused = fuse(&[hit("c1", 2.0), hit("c2", 1.0)], &dir, &[chunk("s", "d", 1.0)], &params)
            .unwrap();
        assert_eq!(ids(&fused), vec!["c1", "c2"]);
        assert_eq!(fused[0].chunk.document_id, "d9");
        // Unknown ids are their own document.
        assert_eq!(fused[1].chunk.document_id, "c2");
        assert_eq!(fused[0].chunk.score, 2.0);
    }

    #[test]
    fn test_both_disabled_is_error() {
        let params = FusionParams {
            use_bm25: false,
            use_vector_search: false,
            hybrid_alpha: 0.5,
        };
        assert!(fuse(&[], &ChunkDirectory::new(), &[], &params).is_err());
    }

    #[test]
    fn test_alpha_out_of_range_is_error() {
        assert!(fuse(&[], &ChunkDirectory::new(), &[], &hybrid(1.5)).is_err());
    }

    #[test]
    fn test_shared_chunk_merged_once() {
        let dir = directory(&[("c1", "d1"), ("c2", "d2")]);
        let lexical = vec![hit("c1", 8.0), hit("c2", 2.0)];
        let semantic = vec![chunk("c1", "d1", 0.4), chunk("c3", "d3", 0.9), chunk("c4", "d4", 0.1)];
        let fused = fuse(&lexical, &dir, &semantic, &hybrid(0.5)).unwrap();

        assert_eq!(fused.iter().filter(|f| f.chunk.chunk_id == "c1").count(), 1);
        assert_eq!(fused.len(), 4);

        let c1 = fused.iter().find(|f| f.chunk.chunk_id == "c1").unwrap();
        // lexical norm 1.0, semantic norm (0.4-0.1)/0.8 = 0.375
        assert!((c1.chunk.score - (0.5 * 1.0 + 0.5 * 0.375)).abs() < 1e-9);
        assert_eq!(c1.breakdown.lexical_rank, Some(0));
        assert_eq!(c1.breakdown.semantic_rank, Some(0));
    }

    #[test]
    fn test_single_source_keeps_normalized_score() {
        let dir = directory(&[("c1", "d1"), ("c2", "d2")]);
        let lexical = vec![hit("c1", 8.0), hit("c2", 2.0)];
        let semantic = vec![chunk("c3", "d3", 0.9), chunk("c4", "d4", 0.1)];
        let fused = fuse(&lexical, &dir, &semantic, &hybrid(0.6)).unwrap();
        let score = |id: &str| fused.iter().find(|f| f.chunk.chunk_id == id).unwrap().chunk.score;
        assert_eq!(score("c1"), 1.0);
        assert_eq!(score("c2"), 0.0);
        assert_eq!(score("c3"), 1.0);
        assert_eq!(score("c4"), 0.0);
    }

    #[test]
    fn test_ties_follow_semantic_rank_then_lexical() {
        let dir = directory(&[("l1", "d1")]);
        let lexical = vec![hit("l1", 3.0)];
        let semantic = vec![chunk("s1", "d2", 0.5), chunk("s2", "d3", 0.5)];
        let fused = fuse(&lexical, &dir, &semantic, &hybrid(0.6)).unwrap();
        // All three normalise to 1.0.
        assert_eq!(ids(&fused), vec!["s1", "s2", "l1"]);
    }

    #[test]
    fn test_sorted_non_increasing() {
        let dir = ChunkDirectory::new();
        let lexical = vec![hit("a", 9.0), hit("b", 4.0), hit("c", 1.0)];
        let semantic = vec![chunk("c", "c", 0.95), chunk("d", "d", 0.5), chunk("a", "a", 0.2)];
        let fused = fuse(&lexical, &dir, &semantic, &hybrid(0.7)).unwrap();
        for pair in fused.windows(2) {
            assert!(pair[0].chunk.score >= pair[1].chunk.score);
        }
    }

    fn ranked(entries: &[(&str, &str, f64)]) -> Vec<FusedChunk> {
        entries
            .iter()
            .enumerate()
            .map(|(i, (id, doc, score))| FusedChunk {
                chunk: chunk(id, doc, *score),
                breakdown: ScoreBreakdown {
                    lexical: None,
                    semantic: Some(*score),
                    lexical_rank: None,
                    semantic_rank: Some(i),
                },
            })
            .collect()
    }

    #[test]
    fn test_select_max_chunks() {
        let list = ranked(&[("a", "d1", 0.9), ("b", "d2", 0.8), ("c", "d3", 0.7)]);
        let sel = select(&list, SelectionParams { max_chunks: 2, max_docs: 5 }).unwrap();
        assert_eq!(sel.len(), 2);
        assert_eq!(sel[0].chunk_id, "a");
        assert_eq!(sel[1].chunk_id, "b");
    }

    #[test]
    fn test_select_skips_new_documents_over_cap() {
        let list = ranked(&[
            ("a", "d1", 0.9),
            ("b", "d2", 0.8),
            ("c", "d3", 0.7),
            ("d", "d1", 0.6),
            ("e", "d2", 0.5),
        ]);
        let sel = select(&list, SelectionParams { max_chunks: 4, max_docs: 2 }).unwrap();
        let got: Vec<&str> = sel.iter().map(|c| c.chunk_id.as_str()).collect();
        assert_eq!(got, vec!["a", "b", "d", "e"]);
    }

    #[test]
    fn test_select_rejects_zero_budget() {
        let list = ranked(&[("a", "d1", 0.9)]);
        assert!(select(&list, SelectionParams { max_chunks: 0, max_docs: 1 }).is_err());
        assert!(select(&list, SelectionParams { max_chunks: 1, max_docs: 0 }).is_err());
    }

    #[test]
    fn test_select_empty() {
        let sel = select(&[], SelectionParams { max_chunks: 3, max_docs: 3 }).unwrap();
        assert!(sel.is_empty());
    }

    #[test]
    fn test_passthrough_reranker_keeps_order() {
        let list = ranked(&[("a", "d1", 0.9), ("b", "d2", 0.8)]);
        let out = PassthroughReranker.rerank("q", list.clone());
        assert_eq!(out, list);
    }
}
