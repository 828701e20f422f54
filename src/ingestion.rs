//! Reconciling a collection directory with the store.

use std::{collections::HashSet, path::Path};

use kdam::{BarExt, tqdm};
use serde::Serialize;

use crate::{
    error::{ErrorKind, Result},
    ids::note_id_for_path,
    incremental::{Indexer, NoteInput},
    store::NoteStore,
    walker::{NoteFile, NoteFormat, discover_notes},
};

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize)]
pub struct SyncReport {
    pub scanned: usize,
    pub changed: usize,
    pub unchanged: usize,
    pub embedded: usize,
    pub removed: usize,
    /// Files skipped after a read or provider failure.
    pub failed: usize,
}

/// Index every note file under `root` and drop notes of `collection` that
/// are no longer on disk.
///
/// A file that cannot be read, or whose embedding fails, is logged and
/// counted in `failed`; the sync moves on. Storage errors abort.
pub async fn sync_collection(
    indexer: &Indexer<'_>,
    collection: &str,
    root: &Path,
    show_progress: bool,
) -> Result<SyncReport> {
    let files = discover_notes(root)?;
    let mut report = SyncReport {
        scanned: files.len(),
        ..Default::default()
    };

    let mut pb = tqdm!(
        total = files.len(),
        desc = format!("Syncing {collection}"),
        disable = !show_progress
    );

    let mut present = HashSet::with_capacity(files.len());
    for file in &files {
        let note_id = note_id_for_path(collection, &file.relative_path);
        present.insert(note_id.clone());

        let content = match std::fs::read_to_string(&file.absolute_path) {
            Ok(content) => content,
            Err(e) => {
                tracing::warn!(path = %file.absolute_path.display(), error = %e, "skipping unreadable file");
                report.failed += 1;
                pb.update(1)?;
                continue;
            }
        };

        match indexer.upsert_document(&load_note(note_id, file, &content)).await {
            Ok(outcome) if outcome.changed => {
                report.changed += 1;
                report.embedded += outcome.embedded_count;
            }
            Ok(_) => report.unchanged += 1,
            Err(e) if e.kind() == ErrorKind::ProviderFailure => {
                tracing::warn!(path = %file.relative_path, error = %e, "indexing failed");
                report.failed += 1;
            }
            Err(e) => return Err(e),
        }
        pb.update(1)?;
    }

    let prefix = format!("{collection}:");
    for note_id in indexer.store().note_ids()? {
        if note_id.starts_with(&prefix) && !present.contains(&note_id) {
            tracing::info!(note_id = %note_id, "removing deleted note");
            indexer.delete_document(&note_id)?;
            report.removed += 1;
        }
    }

    Ok(report)
}

/// Delete every note of `collection` from the store.
pub fn purge_collection(store: &NoteStore, collection: &str) -> Result<usize> {
    let prefix = format!("{collection}:");
    let mut removed = 0;
    for note_id in store.note_ids()? {
        if note_id.starts_with(&prefix) {
            store.delete_document(&note_id)?;
            removed += 1;
        }
    }
    Ok(removed)
}

/// Build the indexer input for a file: title per format, body as read.
pub fn load_note(note_id: String, file: &NoteFile, content: &str) -> NoteInput {
    let stem = Path::new(&file.relative_path)
        .file_stem()
        .and_then(|s| s.to_str())
        .unwrap_or("untitled");

    let (title, body) = match file.format {
        NoteFormat::Markdown | NoteFormat::Text => {
            match split_heading(content) {
                Some((title, rest)) => (title.to_string(), rest.to_string()),
                None => (stem.to_string(), content.to_string()),
            }
        }
        NoteFormat::Html => (
            html_title(content).unwrap_or_else(|| stem.to_string()),
            content.to_string(),
        ),
    };

    NoteInput {
        note_id,
        title,
        body,
        updated_at: file.modified_ms,
    }
}

/// The first non-empty `# ` heading and the content without that line.
fn split_heading(content: &str) -> Option<(&str, String)> {
    let mut lines = content.lines();
    let mut before = Vec::new();
    while let Some(line) = lines.next() {
        if let Some(heading) = line.trim().strip_prefix("# ")
            && !heading.trim().is_empty()
        {
            let rest: Vec<&str> = before.into_iter().chain(lines).collect();
            return Some((heading.trim(), rest.join("\n")));
        }
        before.push(line);
    }
    None
}

/// Text of `<title>`, else of the first `<h1>`.
fn html_title(html: &str) -> Option<String> {
    ["title", "h1"].iter().find_map(|tag| {
        let text = crate::chunking::normalize(element_inner(html, tag)?);
        (!text.is_empty()).then_some(text)
    })
}

fn element_inner<'h>(html: &'h str, tag: &str) -> Option<&'h str> {
    let lower = html.to_ascii_lowercase();
    let open = lower.find(&format!("<{tag}"))?;
    let start = open + lower[open..].find('>')? + 1;
    let end = start + lower[start..].find(&format!("</{tag}"))?;
    Some(&html[start..end])
}
