//! Content-addressed note store.
//!
//! One redb file holds every persisted row:
//!
//! - `documents`: note id -> [`Document`] (JSON)
//! - `chunks`: chunk id -> [`Chunk`] (JSON)
//! - `chunks_by_note`: note id -> chunk ids (multimap secondary index)
//! - `vectors`: chunk id -> unit embedding
//!
//! Every logical operation runs in a single transaction spanning the tables it
//! touches, so readers never observe a chunk without its index entry or a
//! vector whose chunk is gone.

use std::{collections::BTreeSet, path::Path};

use redb::{
    Database,
    MultimapTable,
    MultimapTableDefinition,
    ReadableDatabase,
    ReadableMultimapTable,
    ReadableTable,
    Table,
    TableDefinition,
};
use serde::{Deserialize, Serialize};

use crate::error::{Error, Result};

const DOCUMENTS: TableDefinition<&str, &[u8]> =
    TableDefinition::new("documents");
const CHUNKS: TableDefinition<&str, &[u8]> = TableDefinition::new("chunks");
const CHUNKS_BY_NOTE: MultimapTableDefinition<&str, &str> =
    MultimapTableDefinition::new("chunks_by_note");
const VECTORS: TableDefinition<&str, &[u8]> = TableDefinition::new("vectors");

/// Header size: 4 bytes dimension.
const HEADER_SIZE: usize = 4;

type RowTable<'txn> = Table<'txn, &'static str, &'static [u8]>;
type IndexTable<'txn> = MultimapTable<'txn, &'static str, &'static str>;

/// Per-note metadata. Written only after a successful indexing pass.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Document {
    pub note_id: String,
    pub title: String,
    /// SHA-256 of the normalized title and body.
    pub body_hash: String,
    /// Milliseconds since the Unix epoch.
    pub updated_at: u64,
    /// Milliseconds since the Unix epoch.
    pub last_indexed_at: u64,
}

/// A slice of a note's normalized text; the unit of embedding and retrieval.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Chunk {
    pub chunk_id: String,
    pub note_id: String,
    pub note_title: String,
    pub text: String,
    pub ordinal: usize,
    pub content_hash: String,
}

/// A unit-length embedding owned by exactly one chunk.
#[derive(Debug, Clone, PartialEq)]
pub struct Vector {
    pub chunk_id: String,
    pub components: Vec<f32>,
    pub dimension: u32,
}

impl Vector {
    /// Build a vector scaled to unit L2 length.
    ///
    /// Returns `None` for empty, zero or non-finite input.
    ///
    /// # Examples
    ///
    /// ```
    /// use hopnotes::store::Vector;
    ///
    /// let v = Vector::normalized("n#1".into(), vec![3.0, 4.0]).unwrap();
    /// assert_eq!(v.components, vec![0.6, 0.8]);
    /// assert_eq!(v.dimension, 2);
    /// assert!(Vector::normalized("n#2".into(), vec![0.0, 0.0]).is_none());
    /// ```
    pub fn normalized(chunk_id: String, mut components: Vec<f32>) -> Option<Self> {
        if !crate::search::l2_normalize(&mut components) {
            return None;
        }
        let dimension = components.len() as u32;
        Some(Self {
            chunk_id,
            components,
            dimension,
        })
    }
}

/// A chunk joined with its vector, as loaded for a linear scan.
#[derive(Debug, Clone)]
pub struct IndexedChunk {
    pub chunk: Chunk,
    pub vector: Vec<f32>,
}

/// Row counts across the store.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize)]
pub struct StoreStats {
    pub documents: usize,
    pub chunks: usize,
    pub vectors: usize,
}

/// Persistent store for document metadata, chunks and vectors.
pub struct NoteStore {
    db: Database,
}

impl NoteStore {
    /// Open or create a note store at the given path.
    ///
    /// # Examples
    ///
    /// ```
    /// # let tmp = tempfile::tempdir().unwrap();
    /// use hopnotes::NoteStore;
    ///
    /// let store = NoteStore::open(&tmp.path().join("notes.redb")).unwrap();
    /// assert_eq!(store.stats().unwrap().documents, 0);
    /// ```
    pub fn open(path: &Path) -> Result<Self> {
        let db = Database::create(path)?;

        // Ensure all tables exist by opening them in a write transaction.
        let txn = db.begin_write()?;
        txn.open_table(DOCUMENTS)?;
        txn.open_table(CHUNKS)?;
        txn.open_multimap_table(CHUNKS_BY_NOTE)?;
        txn.open_table(VECTORS)?;
        txn.commit()?;

        Ok(Self { db })
    }

    // -- Documents --

    pub fn get_document(&self, note_id: &str) -> Result<Option<Document>> {
        let txn = self.db.begin_read()?;
        let table = txn.open_table(DOCUMENTS)?;
        match table.get(note_id)? {
            Some(guard) => Ok(Some(serde_json::from_slice(guard.value())?)),
            None => Ok(None),
        }
    }

    pub fn put_document(&self, document: &Document) -> Result<()> {
        let bytes = serde_json::to_vec(document)?;
        let txn = self.db.begin_write()?;
        {
            let mut table = txn.open_table(DOCUMENTS)?;
            table.insert(document.note_id.as_str(), bytes.as_slice())?;
        }
        txn.commit()?;
        Ok(())
    }

    /// Return every document row in note-id order.
    pub fn list_documents(&self) -> Result<Vec<Document>> {
        let txn = self.db.begin_read()?;
        let table = txn.open_table(DOCUMENTS)?;
        let mut result = Vec::new();
        for entry in table.iter()? {
            let (_, v) = entry?;
            result.push(serde_json::from_slice(v.value())?);
        }
        Ok(result)
    }

    /// Every note id with metadata or chunks, sorted.
    ///
    /// Includes notes whose first indexing pass never finished.
    pub fn note_ids(&self) -> Result<Vec<String>> {
        let txn = self.db.begin_read()?;
        let documents = txn.open_table(DOCUMENTS)?;
        let index = txn.open_multimap_table(CHUNKS_BY_NOTE)?;

        let mut ids = BTreeSet::new();
        for entry in documents.iter()? {
            let (k, _) = entry?;
            ids.insert(k.value().to_string());
        }
        for entry in index.iter()? {
            let (k, _) = entry?;
            ids.insert(k.value().to_string());
        }
        Ok(ids.into_iter().collect())
    }

    /// Remove a document's metadata, chunks, vectors and index entries in
    /// one transaction. Unknown ids are a no-op.
    ///
    /// Returns the number of chunks removed.
    pub fn delete_document(&self, note_id: &str) -> Result<usize> {
        let txn = self.db.begin_write()?;
        let removed = {
            let mut documents = txn.open_table(DOCUMENTS)?;
            let mut chunks = txn.open_table(CHUNKS)?;
            let mut index = txn.open_multimap_table(CHUNKS_BY_NOTE)?;
            let mut vectors = txn.open_table(VECTORS)?;

            documents.remove(note_id)?;

            let mut chunk_ids = Vec::new();
            for entry in index.remove_all(note_id)? {
                chunk_ids.push(entry?.value().to_string());
            }
            for chunk_id in &chunk_ids {
                chunks.remove(chunk_id.as_str())?;
                vectors.remove(chunk_id.as_str())?;
            }
            chunk_ids.len()
        };
        txn.commit()?;
        Ok(removed)
    }

    // -- Chunks --

    /// Chunks of one note, in ordinal order.
    pub fn get_chunks_by_document(&self, note_id: &str) -> Result<Vec<Chunk>> {
        let txn = self.db.begin_read()?;
        let chunks = txn.open_table(CHUNKS)?;
        let index = txn.open_multimap_table(CHUNKS_BY_NOTE)?;

        let mut result: Vec<Chunk> = Vec::new();
        for entry in index.get(note_id)? {
            let chunk_id = entry?;
            if let Some(guard) = chunks.get(chunk_id.value())? {
                result.push(serde_json::from_slice(guard.value())?);
            }
        }
        result.sort_by_key(|c| c.ordinal);
        Ok(result)
    }

    /// Chunks of several notes, grouped by note in input order.
    pub fn get_chunks_for_documents(
        &self,
        note_ids: &[String],
    ) -> Result<Vec<Chunk>> {
        let mut result = Vec::new();
        for note_id in note_ids {
            result.extend(self.get_chunks_by_document(note_id)?);
        }
        Ok(result)
    }

    /// Every chunk in chunk-id order.
    pub fn get_all_chunks(&self) -> Result<Vec<Chunk>> {
        let txn = self.db.begin_read()?;
        let table = txn.open_table(CHUNKS)?;
        let mut result = Vec::new();
        for entry in table.iter()? {
            let (_, v) = entry?;
            result.push(serde_json::from_slice(v.value())?);
        }
        Ok(result)
    }

    /// Insert or overwrite chunk rows and their index entries.
    pub fn put_chunks(&self, chunks: &[Chunk]) -> Result<()> {
        self.replace_chunks(chunks, &[])
    }

    /// Delete chunks together with their vectors and index entries.
    pub fn delete_chunks(&self, chunk_ids: &[String]) -> Result<()> {
        self.replace_chunks(&[], chunk_ids)
    }

    /// Delete `removals` and upsert `upserts` in one transaction.
    pub fn replace_chunks(
        &self,
        upserts: &[Chunk],
        removals: &[String],
    ) -> Result<()> {
        if upserts.is_empty() && removals.is_empty() {
            return Ok(());
        }
        self.write_chunks(None, upserts, removals)
    }

    /// Like [`replace_chunks`](Self::replace_chunks), but also drops the
    /// metadata row of `note_id` in the same transaction.
    ///
    /// Until the indexer writes fresh metadata the note reads as never
    /// indexed, so an interrupted pass is redone whatever body comes next.
    pub fn replace_note_chunks(
        &self,
        note_id: &str,
        upserts: &[Chunk],
        removals: &[String],
    ) -> Result<()> {
        self.write_chunks(Some(note_id), upserts, removals)
    }

    fn write_chunks(
        &self,
        invalidate: Option<&str>,
        upserts: &[Chunk],
        removals: &[String],
    ) -> Result<()> {
        let encoded: Vec<(&Chunk, Vec<u8>)> = upserts
            .iter()
            .map(|c| Ok((c, serde_json::to_vec(c)?)))
            .collect::<Result<_>>()?;

        let txn = self.db.begin_write()?;
        {
            if let Some(note_id) = invalidate {
                txn.open_table(DOCUMENTS)?.remove(note_id)?;
            }

            let mut chunks = txn.open_table(CHUNKS)?;
            let mut index = txn.open_multimap_table(CHUNKS_BY_NOTE)?;
            let mut vectors = txn.open_table(VECTORS)?;

            for chunk_id in removals {
                remove_chunk(&mut chunks, &mut index, &mut vectors, chunk_id)?;
            }
            for (chunk, bytes) in &encoded {
                chunks.insert(chunk.chunk_id.as_str(), bytes.as_slice())?;
                index.insert(chunk.note_id.as_str(), chunk.chunk_id.as_str())?;
            }
        }
        txn.commit()?;
        Ok(())
    }

    // -- Vectors --

    /// Store vectors for existing chunks in a single transaction.
    ///
    /// Vectors whose chunk no longer exists are skipped so no orphan vector is
    /// ever written. Returns the number stored.
    ///
    /// All vectors in the store share one dimension. A batch of another
    /// width (typically after switching models) is rejected with
    /// `InvalidInput`; `hopnotes rebuild` re-embeds everything.
    pub fn put_vectors(&self, vectors: &[Vector]) -> Result<usize> {
        for v in vectors {
            if v.components.len() != v.dimension as usize {
                return Err(Error::InvalidInput(format!(
                    "vector for {} has {} components but dimension {}",
                    v.chunk_id,
                    v.components.len(),
                    v.dimension
                )));
            }
        }
        let Some(first) = vectors.first() else {
            return Ok(0);
        };
        if let Some(v) = vectors.iter().find(|v| v.dimension != first.dimension) {
            return Err(Error::InvalidInput(format!(
                "batch mixes dimensions {} and {}",
                first.dimension, v.dimension
            )));
        }

        let txn = self.db.begin_write()?;
        let stored = {
            let chunks = txn.open_table(CHUNKS)?;
            let mut table = txn.open_table(VECTORS)?;

            let existing = match table.iter()?.next() {
                Some(entry) => stored_dimension(entry?.1.value()),
                None => None,
            };
            if let Some(existing) = existing
                && existing != first.dimension
            {
                return Err(Error::InvalidInput(format!(
                    "store holds {existing}-dimensional vectors, got {}; run `hopnotes rebuild` after changing models",
                    first.dimension
                )));
            }

            let mut stored = 0;
            for v in vectors {
                if chunks.get(v.chunk_id.as_str())?.is_none() {
                    tracing::debug!(chunk_id = %v.chunk_id, "skipping vector for missing chunk");
                    continue;
                }
                let bytes = encode_vector(&v.components);
                table.insert(v.chunk_id.as_str(), bytes.as_slice())?;
                stored += 1;
            }
            stored
        };
        txn.commit()?;
        Ok(stored)
    }

    pub fn get_vector(&self, chunk_id: &str) -> Result<Option<Vector>> {
        let txn = self.db.begin_read()?;
        let table = txn.open_table(VECTORS)?;
        let Some(guard) = table.get(chunk_id)? else {
            return Ok(None);
        };
        Ok(decode_vector(guard.value()).map(|components| Vector {
            chunk_id: chunk_id.to_string(),
            dimension: components.len() as u32,
            components,
        }))
    }

    /// Every stored vector in chunk-id order.
    pub fn get_all_vectors(&self) -> Result<Vec<Vector>> {
        let txn = self.db.begin_read()?;
        let table = txn.open_table(VECTORS)?;
        let mut result = Vec::new();
        for entry in table.iter()? {
            let (k, v) = entry?;
            if let Some(components) = decode_vector(v.value()) {
                result.push(Vector {
                    chunk_id: k.value().to_string(),
                    dimension: components.len() as u32,
                    components,
                });
            }
        }
        Ok(result)
    }

    /// The subset of `chunk_ids` that have no stored vector, input order kept.
    pub fn missing_vectors(&self, chunk_ids: &[String]) -> Result<Vec<String>> {
        let txn = self.db.begin_read()?;
        let table = txn.open_table(VECTORS)?;
        let mut missing = Vec::new();
        for chunk_id in chunk_ids {
            if table.get(chunk_id.as_str())?.is_none() {
                missing.push(chunk_id.clone());
            }
        }
        Ok(missing)
    }

    /// Load every chunk that has a vector, in chunk-id order.
    pub fn load_corpus(&self) -> Result<Vec<IndexedChunk>> {
        let txn = self.db.begin_read()?;
        let chunks = txn.open_table(CHUNKS)?;
        let vectors = txn.open_table(VECTORS)?;

        let mut corpus = Vec::new();
        for entry in vectors.iter()? {
            let (k, v) = entry?;
            let Some(vector) = decode_vector(v.value()) else {
                continue;
            };
            let Some(row) = chunks.get(k.value())? else {
                continue;
            };
            corpus.push(IndexedChunk {
                chunk: serde_json::from_slice(row.value())?,
                vector,
            });
        }
        Ok(corpus)
    }

    pub fn stats(&self) -> Result<StoreStats> {
        let txn = self.db.begin_read()?;
        Ok(StoreStats {
            documents: txn.open_table(DOCUMENTS)?.iter()?.count(),
            chunks: txn.open_table(CHUNKS)?.iter()?.count(),
            vectors: txn.open_table(VECTORS)?.iter()?.count(),
        })
    }
}

impl std::fmt::Debug for NoteStore {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("NoteStore").finish_non_exhaustive()
    }
}

fn remove_chunk(
    chunks: &mut RowTable<'_>,
    index: &mut IndexTable<'_>,
    vectors: &mut RowTable<'_>,
    chunk_id: &str,
) -> Result<()> {
    let owner = match chunks.remove(chunk_id)? {
        Some(guard) => {
            let row: Chunk = serde_json::from_slice(guard.value())?;
            Some(row.note_id)
        }
        None => None,
    };
    if let Some(note_id) = owner {
        index.remove(note_id.as_str(), chunk_id)?;
    }
    vectors.remove(chunk_id)?;
    Ok(())
}

fn stored_dimension(bytes: &[u8]) -> Option<u32> {
    let header = bytes.get(..HEADER_SIZE)?;
    Some(u32::from_le_bytes(header.try_into().ok()?))
}

/// Binary format: 4 bytes dimension D (u32 LE), then D f32 values.
fn encode_vector(components: &[f32]) -> Vec<u8> {
    let mut bytes =
        Vec::with_capacity(HEADER_SIZE + std::mem::size_of_val(components));
    bytes.extend_from_slice(&(components.len() as u32).to_le_bytes());
    bytes.extend_from_slice(bytemuck::cast_slice(components));
    bytes
}

fn decode_vector(bytes: &[u8]) -> Option<Vec<f32>> {
    if bytes.len() < HEADER_SIZE {
        return None;
    }
    let dimension = u32::from_le_bytes(bytes[0..4].try_into().ok()?) as usize;
    let payload = &bytes[HEADER_SIZE..];
    if payload.len() != dimension * 4 {
        return None;
    }

    // redb gives no alignment guarantee for values.
    match bytemuck::try_cast_slice::<u8, f32>(payload) {
        Ok(values) => Some(values.to_vec()),
        Err(_) => Some(
            payload
                .chunks_exact(4)
                .map(|b| f32::from_ne_bytes([b[0], b[1], b[2], b[3]]))
                .collect(),
        ),
    }
}
