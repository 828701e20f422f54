//! Contracts for the external collaborators: embedding, concept extraction
//! and answer generation.
//!
//! The core never trusts a provider's response. Everything passes through
//! [`embed_validated`], [`extract_validated`] or [`answer_bounded`], which
//! apply the call timeout and reject malformed output as a provider failure.

use std::{collections::HashSet, future::Future, time::Duration};

use async_trait::async_trait;
use serde::{Deserialize, Serialize};

use crate::{
    error::{Error, Result},
    search::l2_normalize,
};

pub const EMBEDDING: &str = "embedding";
pub const CONCEPTS: &str = "concept";
pub const ANSWER: &str = "answer";

/// Turns texts into dense vectors.
///
/// One vector per input, in input order, all of one dimension. A failure
/// fails the whole batch.
#[async_trait]
pub trait EmbeddingProvider: Send + Sync {
    async fn embed(&self, texts: &[String]) -> Result<Vec<Vec<f32>>>;
}

/// Proposes short search phrases that broaden a question.
#[async_trait]
pub trait ConceptExtractor: Send + Sync {
    async fn extract_concepts(
        &self,
        question: &str,
        summary: &str,
    ) -> Result<Vec<String>>;
}

/// Writes the final answer from retrieved context.
#[async_trait]
pub trait AnswerGenerator: Send + Sync {
    async fn answer(
        &self,
        question: &str,
        context: &[ContextChunk],
        history: &[Turn],
    ) -> Result<GeneratedAnswer>;
}

/// A retrieved chunk as handed to the answer generator.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ContextChunk {
    pub chunk_id: String,
    pub note_id: String,
    pub note_title: String,
    pub text: String,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Role {
    User,
    Assistant,
}

/// One prior exchange in a conversation.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Turn {
    pub role: Role,
    pub content: String,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Citation {
    pub chunk_id: String,
    pub note_id: String,
    pub quote: String,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct GeneratedAnswer {
    pub answer: String,
    pub citations: Vec<Citation>,
}

/// Run a provider call, turning an elapsed deadline into `ProviderTimeout`.
pub async fn with_timeout<T, F>(
    provider: &'static str,
    after: Duration,
    call: F,
) -> Result<T>
where
    F: Future<Output = Result<T>>,
{
    match tokio::time::timeout(after, call).await {
        Ok(result) => result,
        Err(_) => Err(Error::ProviderTimeout { provider, after }),
    }
}

/// Embed `texts` and return unit-length vectors that passed validation.
pub async fn embed_validated(
    provider: &dyn EmbeddingProvider,
    texts: &[String],
    timeout: Duration,
) -> Result<Vec<Vec<f32>>> {
    if texts.is_empty() {
        return Ok(Vec::new());
    }
    let raw = with_timeout(EMBEDDING, timeout, provider.embed(texts)).await?;
    validate_embeddings(texts.len(), raw)
}

/// Check an embedding response and normalize every vector to unit length.
///
/// Rejects a count mismatch, empty vectors, mixed dimensions, non-finite
/// components and zero vectors.
pub fn validate_embeddings(
    expected: usize,
    mut embeddings: Vec<Vec<f32>>,
) -> Result<Vec<Vec<f32>>> {
    if embeddings.len() != expected {
        return Err(Error::provider(
            EMBEDDING,
            format!(
                "expected {expected} vectors, got {}",
                embeddings.len()
            ),
        ));
    }

    let dimension = embeddings.first().map_or(0, Vec::len);
    for (i, v) in embeddings.iter_mut().enumerate() {
        if v.is_empty() {
            return Err(Error::provider(EMBEDDING, format!("vector {i} is empty")));
        }
        if v.len() != dimension {
            return Err(Error::provider(
                EMBEDDING,
                format!(
                    "vector {i} has dimension {}, expected {dimension}",
                    v.len()
                ),
            ));
        }
        if !l2_normalize(v) {
            return Err(Error::provider(
                EMBEDDING,
                format!("vector {i} is zero or not finite"),
            ));
        }
    }
    Ok(embeddings)
}

/// Ask for concepts and sanitize the reply.
///
/// Errors and timeouts are returned; the orchestrator decides to degrade.
pub async fn extract_validated(
    extractor: &dyn ConceptExtractor,
    question: &str,
    summary: &str,
    max_concepts: usize,
    timeout: Duration,
) -> Result<Vec<String>> {
    let raw = with_timeout(
        CONCEPTS,
        timeout,
        extractor.extract_concepts(question, summary),
    )
    .await?;
    Ok(sanitize_concepts(raw, max_concepts))
}

/// Trim phrases, drop empty and case-insensitive duplicates, keep the first
/// `max`.
pub fn sanitize_concepts(raw: Vec<String>, max: usize) -> Vec<String> {
    let mut seen = HashSet::new();
    raw.into_iter()
        .map(|c| c.trim().to_string())
        .filter(|c| !c.is_empty())
        .filter(|c| seen.insert(c.to_lowercase()))
        .take(max)
        .collect()
}

pub async fn answer_bounded(
    generator: &dyn AnswerGenerator,
    question: &str,
    context: &[ContextChunk],
    history: &[Turn],
    timeout: Duration,
) -> Result<GeneratedAnswer> {
    with_timeout(ANSWER, timeout, generator.answer(question, context, history))
        .await
}
