//! Two-pass retrieval and answer assembly.
//!
//! Pass one searches with the question alone. Its hits are summarized for a
//! concept extractor, whose phrases are embedded and searched together with
//! the question in a more permissive second pass. The passes are merged
//! first-seen-wins, re-ranked, truncated and handed to the answer generator.
//!
//! Expansion is best-effort: an extractor error, timeout or empty reply, or
//! a failure embedding the concepts, degrades the query to single-hop.

use std::{collections::HashSet, time::Duration};

use serde::Serialize;

use crate::{
    config::RetrievalConfig,
    error::{Error, Result},
    provider::{
        AnswerGenerator,
        Citation,
        ConceptExtractor,
        ContextChunk,
        EMBEDDING,
        EmbeddingProvider,
        Turn,
        answer_bounded,
        embed_validated,
        extract_validated,
    },
    search::{Retrieved, multi_query_in, top_k_in},
    store::{IndexedChunk, NoteStore},
    text_util::truncate_chars,
};

/// Hits included in the summary sent to the concept extractor.
pub const SUMMARY_HITS: usize = 6;
/// Characters of each hit included in the summary.
pub const SUMMARY_CHARS: usize = 200;

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct Answer {
    pub answer: String,
    pub citations: Vec<Citation>,
    /// Chunks supplied to the generator, in rank order. Not necessarily the
    /// ones it cited.
    pub context_chunk_ids: Vec<String>,
    pub concepts: Vec<String>,
    /// Whether a second pass ran.
    pub expanded: bool,
}

pub struct Orchestrator<'a> {
    store: &'a NoteStore,
    embedder: &'a dyn EmbeddingProvider,
    extractor: &'a dyn ConceptExtractor,
    answerer: &'a dyn AnswerGenerator,
    config: RetrievalConfig,
    timeout: Duration,
}

impl<'a> Orchestrator<'a> {
    pub fn new(
        store: &'a NoteStore,
        embedder: &'a dyn EmbeddingProvider,
        extractor: &'a dyn ConceptExtractor,
        answerer: &'a dyn AnswerGenerator,
        config: RetrievalConfig,
        timeout: Duration,
    ) -> Self {
        Self {
            store,
            embedder,
            extractor,
            answerer,
            config,
            timeout,
        }
    }

    /// Answer with concept expansion.
    pub async fn ask(&self, question: &str, history: &[Turn]) -> Result<Answer> {
        let question = checked(question)?;
        let query = self.embed_query(question).await?;
        let corpus = self.store.load_corpus()?;

        let pass1 = top_k_in(&corpus, &query, &self.config.pass1);
        let (concepts, pass2) = self.expand(question, &query, &pass1, &corpus).await;
        let expanded = pass2.is_some();

        let merged = match pass2 {
            Some(pass2) => merge_passes(pass1, pass2),
            None => pass1,
        };
        let ranked = rerank(merged, self.config.final_top_n);
        tracing::debug!(context = ranked.len(), expanded, "retrieval done");

        self.answer(question, history, ranked, concepts, expanded).await
    }

    /// Answer from one retrieval pass, without concept expansion.
    pub async fn ask_single_hop(
        &self,
        question: &str,
        history: &[Turn],
    ) -> Result<Answer> {
        let question = checked(question)?;
        let query = self.embed_query(question).await?;
        let corpus = self.store.load_corpus()?;
        let hits = top_k_in(&corpus, &query, &self.config.single_hop);
        self.answer(question, history, hits, Vec::new(), false).await
    }

    async fn embed_query(&self, question: &str) -> Result<Vec<f32>> {
        let mut vectors = embed_validated(
            self.embedder,
            &[question.to_string()],
            self.timeout,
        )
        .await?;
        vectors
            .pop()
            .ok_or_else(|| Error::provider(EMBEDDING, "no query vector"))
    }

    /// Concepts and pass-two hits, or `None` when expansion did not run.
    async fn expand(
        &self,
        question: &str,
        query: &[f32],
        pass1: &[Retrieved],
        corpus: &[IndexedChunk],
    ) -> (Vec<String>, Option<Vec<Retrieved>>) {
        let summary = summarize_hits(pass1);
        let concepts = match extract_validated(
            self.extractor,
            question,
            &summary,
            self.config.max_concepts,
            self.timeout,
        )
        .await
        {
            Ok(concepts) => concepts,
            Err(e) => {
                tracing::warn!(error = %e, "concept extraction failed, answering single-hop");
                return (Vec::new(), None);
            }
        };
        if concepts.is_empty() {
            tracing::debug!("no concepts extracted");
            return (concepts, None);
        }

        let concept_vectors =
            match embed_validated(self.embedder, &concepts, self.timeout).await {
                Ok(vectors) => vectors,
                Err(e) => {
                    tracing::warn!(error = %e, "embedding concepts failed, answering single-hop");
                    return (Vec::new(), None);
                }
            };

        let mut queries = Vec::with_capacity(concept_vectors.len() + 1);
        queries.push(query.to_vec());
        queries.extend(concept_vectors);

        let pass2 = multi_query_in(corpus, &queries, &self.config.pass2);
        tracing::debug!(concepts = ?concepts, hits = pass2.len(), "expanded pass");
        (concepts, Some(pass2))
    }

    async fn answer(
        &self,
        question: &str,
        history: &[Turn],
        hits: Vec<Retrieved>,
        concepts: Vec<String>,
        expanded: bool,
    ) -> Result<Answer> {
        let context: Vec<ContextChunk> = hits
            .into_iter()
            .map(|r| ContextChunk {
                chunk_id: r.chunk_id,
                note_id: r.note_id,
                note_title: r.note_title,
                text: r.text,
            })
            .collect();

        let generated = answer_bounded(
            self.answerer,
            question,
            &context,
            history,
            self.timeout,
        )
        .await?;

        Ok(Answer {
            answer: generated.answer,
            citations: generated.citations,
            context_chunk_ids: context.into_iter().map(|c| c.chunk_id).collect(),
            concepts,
            expanded,
        })
    }
}

impl std::fmt::Debug for Orchestrator<'_> {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Orchestrator")
            .field("config", &self.config)
            .field("timeout", &self.timeout)
            .finish_non_exhaustive()
    }
}

fn checked(question: &str) -> Result<&str> {
    let question = question.trim();
    if question.is_empty() {
        return Err(Error::InvalidInput("question is empty".to_string()));
    }
    Ok(question)
}

/// One line per hit: `- {title}: {first 200 chars}`.
pub fn summarize_hits(hits: &[Retrieved]) -> String {
    hits.iter()
        .take(SUMMARY_HITS)
        .map(|h| {
            let excerpt = truncate_chars(&h.text, SUMMARY_CHARS).replace('\n', " ");
            format!("- {}: {}", h.note_title, excerpt)
        })
        .collect::<Vec<_>>()
        .join("\n")
}

/// Pass one, then pass-two hits not already present. An id seen in pass one
/// keeps its pass-one score.
pub fn merge_passes(pass1: Vec<Retrieved>, pass2: Vec<Retrieved>) -> Vec<Retrieved> {
    let mut seen: HashSet<String> =
        pass1.iter().map(|r| r.chunk_id.clone()).collect();
    let mut merged = pass1;
    for r in pass2 {
        if seen.insert(r.chunk_id.clone()) {
            merged.push(r);
        }
    }
    merged
}

/// Stable sort by descending score, then keep the first `top_n`.
pub fn rerank(mut hits: Vec<Retrieved>, top_n: usize) -> Vec<Retrieved> {
    hits.sort_by(|a, b| b.score.total_cmp(&a.score));
    hits.truncate(top_n);
    hits
}
