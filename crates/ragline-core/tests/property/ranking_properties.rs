use std::collections::HashSet;

use proptest::prelude::*;
use ragline_core::bm25::LexicalIndex;
use ragline_core::contradiction::{parse_response, should_detect, QueryComplexity};
use ragline_core::fusion::{fuse, select, ChunkDirectory, FusionParams, SelectionParams};
use ragline_core::models::{IndexInput, LexicalHit, RetrievedChunk};
use ragline_core::tokenize::tokenize;

const WORDS: &[&str] = &[
    "invoice", "payment", "late", "fee", "contract", "renewal", "notice", "tenant", "landlord",
    "deposit", "insurance", "policy", "claim",
];

fn sentence() -> impl Strategy<Value = String> {
    prop::collection::vec(prop::sample::select(WORDS), 1..12).prop_map(|w| w.join(" "))
}

fn corpus() -> impl Strategy<Value = Vec<IndexInput>> {
    prop::collection::vec(sentence(), 1..12).prop_map(|texts| {
        texts
            .into_iter()
            .enumerate()
            .map(|(i, t)| IndexInput::new(format!("d{}", i), t))
            .collect()
    })
}

fn candidates() -> impl Strategy<Value = Vec<(u8, u8, f64)>> {
    prop::collection::vec((0u8..20, 0u8..5, 0.01f64..10.0), 0..25)
}

proptest! {
    #[test]
    fn tokens_are_long_and_alphanumeric(s in ".{0,200}") {
        for t in tokenize(&s) {
            prop_assert!(t.chars().count() > 2, "short token {:?}", t);
            prop_assert!(t.chars().all(char::is_alphanumeric), "bad token {:?}", t);
        }
    }

    #[test]
    fn search_is_sorted_positive_and_bounded(docs in corpus(), query in sentence(), top_k in 1usize..8) {
        let index = LexicalIndex::build(&docs);
        let hits = index.search(&query, top_k);

        prop_assert!(hits.len() <= top_k);
        prop_assert!(hits.iter().all(|h| h.score > 0.0));
        prop_assert!(hits.windows(2).all(|w| w[0].score >= w[1].score));

        let ids: HashSet<&str> = hits.iter().map(|h| h.id.as_str()).collect();
        prop_assert_eq!(ids.len(), hits.len());
        prop_assert!(hits.iter().all(|h| index.get(&h.id).is_some()));
    }

    #[test]
    fn idf_is_never_negative(docs in corpus()) {
        let index = LexicalIndex::build(&docs);
        for df in 0..=index.len() {
            prop_assert!(index.idf(df) >= 0.0);
        }
    }

    #[test]
    fn more_occurrences_score_higher(n in 1usize..6, k in 1usize..6) {
        let a = format!("{} {}", "alpha ".repeat(n), "bravo ".repeat(k));
        let b = format!("{} {}", "alpha ".repeat(n + 1), "bravo ".repeat(k - 1));
        let index = LexicalIndex::build(&[IndexInput::new("a", a), IndexInput::new("b", b)]);

        let hits = index.search("alpha", 10);
        prop_assert_eq!(hits.len(), 2);
        prop_assert_eq!(hits[0].id.as_str(), "b");
        prop_assert!(hits[0].score > hits[1].score);
    }

    #[test]
    fn empty_index_never_matches(query in ".{0,80}") {
        prop_assert!(LexicalIndex::empty().search(&query, 10).is_empty());
    }

    #[test]
    fn fusion_is_unique_and_bounded(
        lexical in candidates(),
        semantic in candidates(),
        alpha in 0.0f64..=1.0,
    ) {
        let hits: Vec<LexicalHit> = lexical
            .iter()
            .map(|(c, _, s)| LexicalHit { id: format!("c{}", c), score: *s })
            .collect();
        let sem: Vec<RetrievedChunk> = semantic
            .iter()
            .map(|(c, d, s)| RetrievedChunk::new(format!("c{}", c), format!("d{}", d), *s))
            .collect();
        let params = FusionParams { use_bm25: true, use_vector_search: true, hybrid_alpha: alpha };

        let fused = fuse(&hits, &ChunkDirectory::new(), &sem, &params).unwrap();

        let ids: HashSet<&str> = fused.iter().map(|f| f.chunk.chunk_id.as_str()).collect();
        prop_assert_eq!(ids.len(), fused.len());
        let expected: HashSet<String> = lexical
            .iter()
            .chain(semantic.iter())
            .map(|(c, _, _)| format!("c{}", c))
            .collect();
        prop_assert_eq!(fused.len(), expected.len());
        prop_assert!(fused.iter().all(|f| (0.0..=1.0 + 1e-9).contains(&f.chunk.score)));
        prop_assert!(fused.windows(2).all(|w| w[0].chunk.score >= w[1].chunk.score));
    }

    #[test]
    fn selection_respects_budget(
        semantic in candidates(),
        max_chunks in 1usize..10,
        max_docs in 1usize..4,
    ) {
        let sem: Vec<RetrievedChunk> = semantic
            .iter()
            .map(|(c, d, s)| RetrievedChunk::new(format!("c{}", c), format!("d{}", d), *s))
            .collect();
        let fused = fuse(&[], &ChunkDirectory::new(), &sem, &FusionParams::default()).unwrap();
        let picked = select(&fused, SelectionParams { max_chunks, max_docs }).unwrap();

        prop_assert!(picked.len() <= max_chunks);
        let docs: HashSet<&str> = picked.iter().map(|c| c.document_id.as_str()).collect();
        prop_assert!(docs.len() <= max_docs);

        // Kept chunks appear in ranked order.
        let order: Vec<&str> = fused.iter().map(|f| f.chunk.chunk_id.as_str()).collect();
        let positions: Vec<usize> = picked
            .iter()
            .filter_map(|c| order.iter().position(|id| *id == c.chunk_id))
            .collect();
        prop_assert_eq!(positions.len(), picked.len());
        prop_assert!(positions.windows(2).all(|w| w[0] < w[1]));
    }

    #[test]
    fn detection_needs_two_documents(count in 0usize..2) {
        for c in [QueryComplexity::Simple, QueryComplexity::Medium, QueryComplexity::Complex] {
            prop_assert!(!should_detect(c, count));
        }
    }

    #[test]
    fn response_decoding_never_panics(s in ".{0,300}") {
        let result = parse_response(&s);
        prop_assert_eq!(result.has_contradictions, !result.contradictions.is_empty());
    }
}
