//! Hash-gated incremental indexing.
//!
//! A note is re-chunked only when the SHA-256 of its normalized text differs
//! from the stored one. Chunk ids are content addressed, so an edit touches
//! only the chunks whose text changed: orphans are deleted with their
//! vectors, and only chunks without a vector are sent to the embedder.
//!
//! Document metadata is written last. If embedding fails part-way, the note
//! keeps no metadata, the next upsert sees it as changed, and only the
//! still-missing vectors are embedded.

use std::{
    collections::{HashMap, HashSet},
    time::{Duration, SystemTime, UNIX_EPOCH},
};

use serde::Serialize;

use crate::{
    chunking::{chunk_text, compose, content_hash},
    config::IndexingConfig,
    error::Result,
    ids::ChunkIdAllocator,
    provider::{EmbeddingProvider, embed_validated},
    store::{Chunk, Document, NoteStore, Vector},
};

/// A note as handed to the indexer.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct NoteInput {
    pub note_id: String,
    pub title: String,
    /// Raw body; markup is stripped during normalization.
    pub body: String,
    /// Milliseconds since the Unix epoch.
    pub updated_at: u64,
}

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize)]
pub struct UpsertOutcome {
    /// `false` when the stored hash matched and nothing was written.
    pub changed: bool,
    pub embedded_count: usize,
    pub total_chunks: usize,
    pub removed_count: usize,
}

pub struct Indexer<'a> {
    store: &'a NoteStore,
    embedder: &'a dyn EmbeddingProvider,
    config: IndexingConfig,
    timeout: Duration,
}

impl<'a> Indexer<'a> {
    pub fn new(
        store: &'a NoteStore,
        embedder: &'a dyn EmbeddingProvider,
        config: IndexingConfig,
        timeout: Duration,
    ) -> Self {
        Self {
            store,
            embedder,
            config,
            timeout,
        }
    }

    pub fn store(&self) -> &'a NoteStore {
        self.store
    }

    /// Bring the store in line with `note`, embedding only what is missing.
    pub async fn upsert_document(
        &self,
        note: &NoteInput,
    ) -> Result<UpsertOutcome> {
        let text = compose(&note.title, &note.body);
        let body_hash = content_hash(&text);

        if let Some(existing) = self.store.get_document(&note.note_id)?
            && existing.body_hash == body_hash
        {
            tracing::debug!(note_id = %note.note_id, "unchanged");
            return Ok(UpsertOutcome::default());
        }

        let chunks = self.build_chunks(note, &text)?;

        let fresh: HashSet<&str> =
            chunks.iter().map(|c| c.chunk_id.as_str()).collect();
        let removals: Vec<String> = self
            .store
            .get_chunks_by_document(&note.note_id)?
            .into_iter()
            .map(|c| c.chunk_id)
            .filter(|id| !fresh.contains(id.as_str()))
            .collect();

        tracing::debug!(
            note_id = %note.note_id,
            chunks = chunks.len(),
            removed = removals.len(),
            "chunk diff"
        );
        // Also drops the metadata row: until it is rewritten below the note
        // reads as unindexed.
        self.store
            .replace_note_chunks(&note.note_id, &chunks, &removals)?;

        let live: Vec<String> =
            chunks.iter().map(|c| c.chunk_id.clone()).collect();
        let queued = self.store.missing_vectors(&live)?;
        let embedded_count = self.embed_chunks(&chunks, &queued).await?;

        let now = now_millis();
        self.store.put_document(&Document {
            note_id: note.note_id.clone(),
            title: note.title.clone(),
            body_hash,
            updated_at: note.updated_at,
            last_indexed_at: now,
        })?;

        tracing::info!(
            note_id = %note.note_id,
            embedded = embedded_count,
            total = chunks.len(),
            "indexed"
        );

        Ok(UpsertOutcome {
            changed: true,
            embedded_count,
            total_chunks: chunks.len(),
            removed_count: removals.len(),
        })
    }

    /// Remove a note and everything derived from it. Unknown ids are a no-op.
    pub fn delete_document(&self, note_id: &str) -> Result<usize> {
        self.store.delete_document(note_id)
    }

    fn build_chunks(&self, note: &NoteInput, text: &str) -> Result<Vec<Chunk>> {
        let pieces = chunk_text(
            text,
            self.config.chunking.chunk_size,
            self.config.chunking.overlap,
        )?;

        let mut ids = ChunkIdAllocator::new(&note.note_id);
        Ok(pieces
            .into_iter()
            .enumerate()
            .map(|(ordinal, text)| {
                let hash = content_hash(&text);
                Chunk {
                    chunk_id: ids.allocate(&hash, ordinal),
                    note_id: note.note_id.clone(),
                    note_title: note.title.clone(),
                    text,
                    ordinal,
                    content_hash: hash,
                }
            })
            .collect())
    }

    /// Embed the queued chunks batch by batch, persisting each batch.
    async fn embed_chunks(
        &self,
        chunks: &[Chunk],
        queued: &[String],
    ) -> Result<usize> {
        let by_id: HashMap<&str, &Chunk> =
            chunks.iter().map(|c| (c.chunk_id.as_str(), c)).collect();
        let batch_size = self.config.embed_batch_size.max(1);

        let mut embedded = 0;
        for batch in queued.chunks(batch_size) {
            let texts: Vec<String> = batch
                .iter()
                .filter_map(|id| by_id.get(id.as_str()))
                .map(|c| c.text.clone())
                .collect();
            let vectors =
                embed_validated(self.embedder, &texts, self.timeout).await?;

            let rows: Vec<Vector> = batch
                .iter()
                .zip(vectors)
                .map(|(id, components)| Vector {
                    chunk_id: id.clone(),
                    dimension: components.len() as u32,
                    components,
                })
                .collect();
            embedded += self.store.put_vectors(&rows)?;
        }
        Ok(embedded)
    }
}

impl std::fmt::Debug for Indexer<'_> {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Indexer")
            .field("config", &self.config)
            .field("timeout", &self.timeout)
            .finish_non_exhaustive()
    }
}

pub fn now_millis() -> u64 {
    SystemTime::now()
        .duration_since(UNIX_EPOCH)
        .map(|d| d.as_millis() as u64)
        .unwrap_or(0)
}
