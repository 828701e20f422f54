//! Stable identifiers for notes and chunks.
//!
//! Note ids for files on disk are `"{collection}:{relative_path}"`. Chunk ids
//! are content addressed: `"{note_id}#{hash16}"`, where `hash16` is the first
//! 16 hex characters of the chunk's SHA-256. Two chunks of the same note with
//! identical text get `"-{ordinal}"` appended to every id after the first.

use std::collections::HashSet;

/// Number of hex characters of the content hash kept in a chunk id.
pub const CHUNK_HASH_PREFIX: usize = 16;

/// Build the note id for a file inside a collection.
///
/// # Examples
///
/// ```
/// use hopnotes::ids::note_id_for_path;
///
/// assert_eq!(note_id_for_path("notes", "biology/cells.md"), "notes:biology/cells.md");
/// ```
pub fn note_id_for_path(collection: &str, relative_path: &str) -> String {
    format!("{collection}:{relative_path}")
}

/// Split a file-backed note id back into `(collection, relative_path)`.
pub fn split_note_id(note_id: &str) -> Option<(&str, &str)> {
    note_id.split_once(':')
}

/// Derive the base chunk id from a note id and the chunk's content hash.
///
/// # Examples
///
/// ```
/// use hopnotes::ids::chunk_id;
///
/// let id = chunk_id("notes:a.md", "0123456789abcdef0123");
/// assert_eq!(id, "notes:a.md#0123456789abcdef");
/// ```
pub fn chunk_id(note_id: &str, content_hash: &str) -> String {
    let end = content_hash.len().min(CHUNK_HASH_PREFIX);
    format!("{note_id}#{}", &content_hash[..end])
}

/// Assigns collision-free chunk ids within one note.
///
/// The first chunk with a given content keeps the plain id; later duplicates
/// are suffixed with their ordinal.
#[derive(Debug)]
pub struct ChunkIdAllocator<'a> {
    note_id: &'a str,
    taken: HashSet<String>,
}

impl<'a> ChunkIdAllocator<'a> {
    pub fn new(note_id: &'a str) -> Self {
        Self {
            note_id,
            taken: HashSet::new(),
        }
    }

    pub fn allocate(&mut self, content_hash: &str, ordinal: usize) -> String {
        let base = chunk_id(self.note_id, content_hash);
        let id = if self.taken.contains(&base) {
            format!("{base}-{ordinal}")
        } else {
            base
        };
        self.taken.insert(id.clone());
        id
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::chunking::content_hash;

    #[test]
    fn deterministic() {
        let h = content_hash("Mitochondria are the powerhouse of the cell.");
        assert_eq!(chunk_id("notes:bio.md", &h), chunk_id("notes:bio.md", &h));
    }

    #[test]
    fn different_notes_differ() {
        let h = content_hash("same text");
        assert_ne!(chunk_id("notes:a.md", &h), chunk_id("notes:b.md", &h));
    }

    #[test]
    fn duplicate_content_gets_ordinal_suffix() {
        let h = content_hash("repeated paragraph");
        let mut alloc = ChunkIdAllocator::new("notes:a.md");

        let first = alloc.allocate(&h, 0);
        let other = alloc.allocate(&content_hash("something else"), 1);
        let second = alloc.allocate(&h, 2);

        assert_eq!(first, chunk_id("notes:a.md", &h));
        assert_eq!(second, format!("{first}-2"));
        assert_ne!(other, first);
    }

    #[test]
    fn split_round_trips_path_ids() {
        let id = note_id_for_path("work", "meetings/2024-01-02.md");
        assert_eq!(split_note_id(&id), Some(("work", "meetings/2024-01-02.md")));
    }

    #[test]
    fn short_hash_is_used_whole() {
        assert_eq!(chunk_id("n", "abc"), "n#abc");
    }
}
