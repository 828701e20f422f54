//! Deterministic in-process providers for unit tests.

use std::sync::{
    Mutex,
    atomic::{AtomicUsize, Ordering},
};

use async_trait::async_trait;

use crate::{
    error::{Error, Result},
    provider::{
        AnswerGenerator,
        ConceptExtractor,
        ContextChunk,
        EmbeddingProvider,
        GeneratedAnswer,
        Turn,
    },
    store::NoteStore,
    text_util::terms,
};

pub fn test_store() -> (tempfile::TempDir, NoteStore) {
    let tmp = tempfile::tempdir().unwrap();
    let store = NoteStore::open(&tmp.path().join("notes.redb")).unwrap();
    (tmp, store)
}

fn length_vector(text: &str) -> Vec<f32> {
    vec![1.0, text.chars().count() as f32]
}

/// Embeds every text as `[1, len]` and counts the work done.
#[derive(Debug, Default)]
pub struct CountingEmbedder {
    calls: AtomicUsize,
    texts: AtomicUsize,
}

impl CountingEmbedder {
    pub fn calls(&self) -> usize {
        self.calls.load(Ordering::SeqCst)
    }

    pub fn texts_embedded(&self) -> usize {
        self.texts.load(Ordering::SeqCst)
    }
}

#[async_trait]
impl EmbeddingProvider for CountingEmbedder {
    async fn embed(&self, texts: &[String]) -> Result<Vec<Vec<f32>>> {
        self.calls.fetch_add(1, Ordering::SeqCst);
        self.texts.fetch_add(texts.len(), Ordering::SeqCst);
        Ok(texts.iter().map(|t| length_vector(t)).collect())
    }
}

/// Fails on the n-th call (1-based), succeeds otherwise.
#[derive(Debug)]
pub struct FlakyEmbedder {
    fail_on: usize,
    calls: AtomicUsize,
}

impl FlakyEmbedder {
    pub fn failing_on(fail_on: usize) -> Self {
        Self {
            fail_on,
            calls: AtomicUsize::new(0),
        }
    }
}

#[async_trait]
impl EmbeddingProvider for FlakyEmbedder {
    async fn embed(&self, texts: &[String]) -> Result<Vec<Vec<f32>>> {
        let call = self.calls.fetch_add(1, Ordering::SeqCst) + 1;
        if call == self.fail_on {
            return Err(Error::provider("embedding", "connection reset"));
        }
        Ok(texts.iter().map(|t| length_vector(t)).collect())
    }
}

/// Maps words onto a handful of topic axes so similarity is predictable.
#[derive(Debug, Default)]
pub struct VocabEmbedder;

const AXES: &[&[&str]] = &[
    &["cell", "cells", "cellular"],
    &["energy", "glucose", "respiration", "mitochondria", "powerhouse", "atp"],
    &["photosynthesis", "light", "sunlight", "chlorophyll"],
    &["plants", "plant", "leaves"],
];

pub fn vocab_vector(text: &str) -> Vec<f32> {
    let mut v = vec![0.0; AXES.len() + 1];
    for term in terms(text) {
        if let Some(axis) = AXES.iter().position(|words| words.contains(&term.as_str())) {
            v[axis] += 1.0;
        }
    }
    if v.iter().all(|x| *x == 0.0) {
        v[AXES.len()] = 1.0;
    }
    v
}

#[async_trait]
impl EmbeddingProvider for VocabEmbedder {
    async fn embed(&self, texts: &[String]) -> Result<Vec<Vec<f32>>> {
        Ok(texts.iter().map(|t| vocab_vector(t)).collect())
    }
}

/// Embeds the first call's texts, fails every later call.
#[derive(Debug, Default)]
pub struct QueryOnlyEmbedder {
    calls: AtomicUsize,
}

#[async_trait]
impl EmbeddingProvider for QueryOnlyEmbedder {
    async fn embed(&self, texts: &[String]) -> Result<Vec<Vec<f32>>> {
        if self.calls.fetch_add(1, Ordering::SeqCst) > 0 {
            return Err(Error::provider("embedding", "quota exceeded"));
        }
        Ok(texts.iter().map(|t| vocab_vector(t)).collect())
    }
}

pub struct FailingEmbedder;

#[async_trait]
impl EmbeddingProvider for FailingEmbedder {
    async fn embed(&self, _texts: &[String]) -> Result<Vec<Vec<f32>>> {
        Err(Error::provider("embedding", "service unavailable"))
    }
}

/// Returns fixed phrases and records the summary it was given.
#[derive(Debug, Default)]
pub struct FixedConcepts {
    pub concepts: Vec<String>,
    pub seen_summary: Mutex<Option<String>>,
}

impl FixedConcepts {
    pub fn new(concepts: &[&str]) -> Self {
        Self {
            concepts: concepts.iter().map(|c| c.to_string()).collect(),
            seen_summary: Mutex::new(None),
        }
    }
}

#[async_trait]
impl ConceptExtractor for FixedConcepts {
    async fn extract_concepts(
        &self,
        _question: &str,
        summary: &str,
    ) -> Result<Vec<String>> {
        *self.seen_summary.lock().unwrap() = Some(summary.to_string());
        Ok(self.concepts.clone())
    }
}

pub struct FailingConcepts;

#[async_trait]
impl ConceptExtractor for FailingConcepts {
    async fn extract_concepts(
        &self,
        _question: &str,
        _summary: &str,
    ) -> Result<Vec<String>> {
        Err(Error::provider("concept", "rate limited"))
    }
}

pub struct HangingConcepts;

#[async_trait]
impl ConceptExtractor for HangingConcepts {
    async fn extract_concepts(
        &self,
        _question: &str,
        _summary: &str,
    ) -> Result<Vec<String>> {
        std::future::pending().await
    }
}

/// Echoes the context it receives so tests can inspect it.
#[derive(Debug, Default)]
pub struct RecordingAnswerer {
    pub seen: Mutex<Vec<ContextChunk>>,
    pub calls: AtomicUsize,
}

#[async_trait]
impl AnswerGenerator for RecordingAnswerer {
    async fn answer(
        &self,
        _question: &str,
        context: &[ContextChunk],
        _history: &[Turn],
    ) -> Result<GeneratedAnswer> {
        self.calls.fetch_add(1, Ordering::SeqCst);
        *self.seen.lock().unwrap() = context.to_vec();
        Ok(GeneratedAnswer {
            answer: format!("{} chunks", context.len()),
            citations: Vec::new(),
        })
    }
}

pub struct FailingAnswerer;

#[async_trait]
impl AnswerGenerator for FailingAnswerer {
    async fn answer(
        &self,
        _question: &str,
        _context: &[ContextChunk],
        _history: &[Turn],
    ) -> Result<GeneratedAnswer> {
        Err(Error::provider("answer", "model overloaded"))
    }
}
