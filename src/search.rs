//! Linear-scan cosine ranking with per-document diversity caps.
//!
//! Stored vectors are unit length, so cosine similarity is a plain dot
//! product against a unit query. Scoring is read-only and runs on rayon's
//! pool; ranking is a stable sort over corpus order (chunk-id ascending), so
//! equal scores always come back in the same order.

use std::collections::HashMap;

use rayon::prelude::*;
use serde::{Deserialize, Serialize};

use crate::{
    error::Result,
    store::{IndexedChunk, NoteStore},
};

/// Result-count, threshold and diversity settings for one retrieval pass.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct SearchParams {
    /// Maximum number of chunks returned.
    pub k: usize,
    /// Chunks scoring below this are discarded.
    pub min_score: f32,
    /// Maximum number of chunks accepted from any single note.
    pub max_per_document: usize,
}

/// A ranked chunk.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct Retrieved {
    pub chunk_id: String,
    pub note_id: String,
    pub note_title: String,
    pub text: String,
    pub score: f32,
}

/// Scale `v` to unit L2 length in place.
///
/// Returns `false`, leaving `v` untouched, when it is empty, all zeros or
/// contains a non-finite component.
pub fn l2_normalize(v: &mut [f32]) -> bool {
    if v.is_empty() || v.iter().any(|x| !x.is_finite()) {
        return false;
    }
    let norm = v.iter().map(|x| x * x).sum::<f32>().sqrt();
    if norm == 0.0 || !norm.is_finite() {
        return false;
    }
    for x in v.iter_mut() {
        *x /= norm;
    }
    true
}

/// Rank every stored chunk against one unit query vector.
pub fn search_top_k(
    store: &NoteStore,
    query: &[f32],
    params: &SearchParams,
) -> Result<Vec<Retrieved>> {
    let corpus = store.load_corpus()?;
    Ok(top_k_in(&corpus, query, params))
}

/// Rank every stored chunk by its best score across several query vectors.
pub fn search_multiple_queries(
    store: &NoteStore,
    queries: &[Vec<f32>],
    params: &SearchParams,
) -> Result<Vec<Retrieved>> {
    let corpus = store.load_corpus()?;
    Ok(multi_query_in(&corpus, queries, params))
}

/// [`search_top_k`] over a corpus that is already loaded.
pub fn top_k_in(
    corpus: &[IndexedChunk],
    query: &[f32],
    params: &SearchParams,
) -> Vec<Retrieved> {
    rank(corpus, &[query], params)
}

/// [`search_multiple_queries`] over a corpus that is already loaded.
pub fn multi_query_in(
    corpus: &[IndexedChunk],
    queries: &[Vec<f32>],
    params: &SearchParams,
) -> Vec<Retrieved> {
    let queries: Vec<&[f32]> = queries.iter().map(Vec::as_slice).collect();
    rank(corpus, &queries, params)
}

fn rank(
    corpus: &[IndexedChunk],
    queries: &[&[f32]],
    params: &SearchParams,
) -> Vec<Retrieved> {
    if params.k == 0 || params.max_per_document == 0 || queries.is_empty() {
        return Vec::new();
    }

    let mut scored: Vec<(usize, f32)> = corpus
        .par_iter()
        .enumerate()
        .filter_map(|(i, entry)| {
            best_score(&entry.vector, queries)
                .filter(|s| *s >= params.min_score)
                .map(|s| (i, s))
        })
        .collect();

    // `sort_by` is stable: equal scores stay in corpus order.
    scored.sort_by(|a, b| b.1.total_cmp(&a.1));

    let mut per_document: HashMap<&str, usize> = HashMap::new();
    let mut results = Vec::with_capacity(params.k.min(scored.len()));
    for (i, score) in scored {
        let chunk = &corpus[i].chunk;
        let taken = per_document.entry(chunk.note_id.as_str()).or_insert(0);
        if *taken >= params.max_per_document {
            continue;
        }
        *taken += 1;
        results.push(Retrieved {
            chunk_id: chunk.chunk_id.clone(),
            note_id: chunk.note_id.clone(),
            note_title: chunk.note_title.clone(),
            text: chunk.text.clone(),
            score,
        });
        if results.len() == params.k {
            break;
        }
    }
    results
}

/// Maximum finite dot product over the queries sharing the vector's dimension.
fn best_score(vector: &[f32], queries: &[&[f32]]) -> Option<f32> {
    queries
        .iter()
        .filter(|q| q.len() == vector.len())
        .map(|q| dot(vector, q))
        .filter(|s| s.is_finite())
        .max_by(|a, b| a.total_cmp(b))
}

fn dot(a: &[f32], b: &[f32]) -> f32 {
    a.iter().zip(b).map(|(x, y)| x * y).sum()
}

pub fn format_human(results: &[Retrieved]) {
    if results.is_empty() {
        println!("No results found.");
        return;
    }

    for (i, r) in results.iter().enumerate() {
        println!("{:>3}. [{:.3}] {}", i + 1, r.score, r.note_id);
        if !r.note_title.is_empty() {
            println!("     {}", r.note_title);
        }
        println!("     {}", crate::text_util::snippet(&r.text, 160));
    }
    println!("\n{} result(s)", results.len());
}

pub fn format_json(results: &[Retrieved], query: &str) -> Result<()> {
    let value = serde_json::json!({
        "query": query,
        "result_count": results.len(),
        "results": results,
    });
    println!("{}", serde_json::to_string(&value)?);
    Ok(())
}

pub fn format_files(results: &[Retrieved]) {
    let mut seen = std::collections::HashSet::new();
    for r in results {
        if seen.insert(r.note_id.as_str()) {
            println!("{}", r.note_id);
        }
    }
}

#[cfg(test)]
mod tests {
    use std::collections::HashMap;

    use proptest::prelude::*;

    use super::*;
    use crate::store::{Chunk, Vector};

    fn entry(note_id: &str, ordinal: usize, vector: &[f32]) -> IndexedChunk {
        IndexedChunk {
            chunk: Chunk {
                chunk_id: format!("{note_id}#{ordinal}"),
                note_id: note_id.to_string(),
                note_title: note_id.to_uppercase(),
                text: format!("{note_id} chunk {ordinal}"),
                ordinal,
                content_hash: String::new(),
            },
            vector: vector.to_vec(),
        }
    }

    fn params(k: usize, min_score: f32, max_per_document: usize) -> SearchParams {
        SearchParams {
            k,
            min_score,
            max_per_document,
        }
    }

    fn ids(results: &[Retrieved]) -> Vec<&str> {
        results.iter().map(|r| r.chunk_id.as_str()).collect()
    }

    #[test]
    fn results_are_sorted_descending() {
        let corpus = vec![
            entry("a", 0, &[0.6, 0.8]),
            entry("b", 0, &[1.0, 0.0]),
            entry("c", 0, &[0.0, 1.0]),
        ];
        let results = top_k_in(&corpus, &[1.0, 0.0], &params(3, -1.0, 3));

        assert_eq!(ids(&results), vec!["b#0", "a#0", "c#0"]);
        assert!(results.windows(2).all(|w| w[0].score >= w[1].score));
    }

    #[test]
    fn min_score_filters() {
        let corpus = vec![entry("a", 0, &[1.0, 0.0]), entry("b", 0, &[0.0, 1.0])];
        let results = top_k_in(&corpus, &[1.0, 0.0], &params(10, 0.5, 10));
        assert_eq!(ids(&results), vec!["a#0"]);
    }

    #[test]
    fn per_document_cap_forces_diversity() {
        let corpus = vec![
            entry("a", 0, &[1.0, 0.0]),
            entry("a", 1, &[1.0, 0.0]),
            entry("a", 2, &[1.0, 0.0]),
            entry("b", 0, &[0.8, 0.6]),
        ];
        let results = top_k_in(&corpus, &[1.0, 0.0], &params(3, 0.0, 2));

        assert_eq!(ids(&results), vec!["a#0", "a#1", "b#0"]);
    }

    #[test]
    fn stops_at_k() {
        let corpus: Vec<_> =
            (0..10).map(|i| entry(&format!("n{i}"), 0, &[1.0])).collect();
        let results = top_k_in(&corpus, &[1.0], &params(4, 0.0, 1));
        assert_eq!(results.len(), 4);
    }

    #[test]
    fn ties_keep_corpus_order() {
        let corpus = vec![
            entry("a", 0, &[1.0]),
            entry("b", 0, &[1.0]),
            entry("c", 0, &[1.0]),
        ];
        let first = top_k_in(&corpus, &[1.0], &params(3, 0.0, 1));
        let second = top_k_in(&corpus, &[1.0], &params(3, 0.0, 1));
        assert_eq!(ids(&first), vec!["a#0", "b#0", "c#0"]);
        assert_eq!(first, second);
    }

    #[test]
    fn mismatched_dimensions_are_skipped() {
        let corpus = vec![entry("a", 0, &[1.0, 0.0, 0.0]), entry("b", 0, &[1.0, 0.0])];
        let results = top_k_in(&corpus, &[1.0, 0.0], &params(5, -1.0, 5));
        assert_eq!(ids(&results), vec!["b#0"]);
    }

    #[test]
    fn non_finite_scores_are_discarded() {
        let corpus = vec![entry("a", 0, &[f32::NAN, 0.0]), entry("b", 0, &[0.0, 1.0])];
        let results = top_k_in(&corpus, &[1.0, 0.0], &params(5, -1.0, 5));
        assert_eq!(ids(&results), vec!["b#0"]);
    }

    #[test]
    fn multi_query_keeps_maximum_score() {
        // Scores 0.3 against the first query and 0.8 against the second.
        let v = [0.3, 0.8, (1.0f32 - 0.09 - 0.64).sqrt()];
        let corpus = vec![entry("a", 0, &v)];
        let queries = vec![vec![1.0, 0.0, 0.0], vec![0.0, 1.0, 0.0]];

        let results = multi_query_in(&corpus, &queries, &params(5, 0.0, 5));

        assert_eq!(results.len(), 1);
        assert!((results[0].score - 0.8).abs() < 1e-6);
    }

    #[test]
    fn multi_query_reaches_chunks_one_query_misses() {
        let corpus = vec![entry("a", 0, &[1.0, 0.0]), entry("b", 0, &[0.0, 1.0])];
        let single = top_k_in(&corpus, &[1.0, 0.0], &params(5, 0.5, 5));
        let multi = multi_query_in(
            &corpus,
            &[vec![1.0, 0.0], vec![0.0, 1.0]],
            &params(5, 0.5, 5),
        );
        assert_eq!(single.len(), 1);
        assert_eq!(multi.len(), 2);
    }

    #[test]
    fn empty_corpus_or_zero_k_returns_nothing() {
        assert!(top_k_in(&[], &[1.0], &params(5, 0.0, 5)).is_empty());
        let corpus = vec![entry("a", 0, &[1.0])];
        assert!(top_k_in(&corpus, &[1.0], &params(0, 0.0, 5)).is_empty());
        assert!(multi_query_in(&corpus, &[], &params(5, 0.0, 5)).is_empty());
    }

    #[test]
    fn l2_normalize_rejects_degenerate_vectors() {
        let mut v = vec![3.0, 4.0];
        assert!(l2_normalize(&mut v));
        assert_eq!(v, vec![0.6, 0.8]);

        assert!(!l2_normalize(&mut []));
        assert!(!l2_normalize(&mut [0.0, 0.0]));
        assert!(!l2_normalize(&mut [f32::INFINITY, 1.0]));
    }

    #[test]
    fn search_reads_from_store() {
        let tmp = tempfile::tempdir().unwrap();
        let store = NoteStore::open(&tmp.path().join("notes.redb")).unwrap();
        let corpus = vec![entry("a", 0, &[1.0, 0.0]), entry("b", 0, &[0.0, 1.0])];
        let chunks: Vec<_> = corpus.iter().map(|e| e.chunk.clone()).collect();
        store.put_chunks(&chunks).unwrap();
        let vectors: Vec<_> = corpus
            .iter()
            .filter_map(|e| Vector::normalized(e.chunk.chunk_id.clone(), e.vector.clone()))
            .collect();
        store.put_vectors(&vectors).unwrap();

        let results = search_top_k(&store, &[0.0, 1.0], &params(1, 0.0, 1)).unwrap();
        assert_eq!(ids(&results), vec!["b#0"]);

        let results = search_multiple_queries(
            &store,
            &[vec![1.0, 0.0], vec![0.0, 1.0]],
            &params(5, 0.5, 1),
        )
        .unwrap();
        assert_eq!(ids(&results), vec!["a#0", "b#0"]);
    }

    proptest! {
        #[test]
        fn ranked_results_honor_params(
            rows in prop::collection::vec(
                (0usize..4, prop::collection::vec(-1.0f32..1.0, 3)),
                0..40,
            ),
            query in prop::collection::vec(-1.0f32..1.0, 3),
            k in 0usize..12,
            min_score in -1.0f32..1.0,
            max_per_document in 0usize..4,
        ) {
            let mut ordinals = HashMap::new();
            let corpus: Vec<_> = rows
                .iter()
                .map(|(note, vector)| {
                    let note_id = format!("n{note}");
                    let ordinal = ordinals.entry(note_id.clone()).or_insert(0usize);
                    *ordinal += 1;
                    entry(&note_id, *ordinal, vector)
                })
                .collect();
            let params = params(k, min_score, max_per_document);

            for results in [
                top_k_in(&corpus, &query, &params),
                multi_query_in(&corpus, &[query.clone(), vec![1.0, 0.0, 0.0]], &params),
            ] {
                prop_assert!(results.len() <= k);
                prop_assert!(results.windows(2).all(|w| w[0].score >= w[1].score));
                prop_assert!(results.iter().all(|r| r.score >= min_score));

                let mut per_note: HashMap<&str, usize> = HashMap::new();
                for r in &results {
                    *per_note.entry(r.note_id.as_str()).or_default() += 1;
                }
                prop_assert!(per_note.values().all(|n| *n <= max_per_document));
            }
        }
    }
}
