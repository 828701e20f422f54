use std::{
    path::{Component, Path, PathBuf},
    time::SystemTime,
};

use crate::error::Result;

/// How a note file's content is interpreted.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum NoteFormat {
    Markdown,
    Text,
    Html,
}

impl NoteFormat {
    pub fn from_path(path: &Path) -> Option<Self> {
        let ext = path.extension()?.to_str()?.to_ascii_lowercase();
        match ext.as_str() {
            "md" | "markdown" => Some(Self::Markdown),
            "txt" => Some(Self::Text),
            "html" | "htm" => Some(Self::Html),
            _ => None,
        }
    }
}

/// A note file found inside a collection.
#[derive(Debug, Clone)]
pub struct NoteFile {
    /// `/`-separated path relative to the collection root; the second half
    /// of the note id.
    pub relative_path: String,
    pub absolute_path: PathBuf,
    pub format: NoteFormat,
    /// Last modification time in milliseconds since the Unix epoch.
    pub modified_ms: u64,
}

/// Recursively collect note files under `root`, sorted by relative path.
///
/// Hidden files and directories (names starting with `.`) are skipped, as
/// are symlinks to directories inside the root.
pub fn discover_notes(root: &Path) -> Result<Vec<NoteFile>> {
    let canonical_root = root.canonicalize()?;
    let mut notes = Vec::new();
    walk(&canonical_root, &canonical_root, &mut notes)?;
    notes.sort_by(|a, b| a.relative_path.cmp(&b.relative_path));
    Ok(notes)
}

fn walk(root: &Path, dir: &Path, notes: &mut Vec<NoteFile>) -> Result<()> {
    for entry in std::fs::read_dir(dir)? {
        let entry = entry?;
        if entry.file_name().to_string_lossy().starts_with('.') {
            continue;
        }

        let path = entry.path();
        let file_type = entry.file_type()?;

        if file_type.is_dir() {
            walk(root, &path, notes)?;
            continue;
        }

        let target = if file_type.is_symlink() {
            // Broken links are skipped.
            let Ok(resolved) = path.canonicalize() else {
                continue;
            };
            if resolved.is_dir() {
                continue;
            }
            resolved
        } else if file_type.is_file() {
            path.canonicalize()?
        } else {
            continue;
        };

        if let Some(format) = NoteFormat::from_path(&target) {
            notes.push(NoteFile {
                relative_path: relative_string(root, &path),
                modified_ms: modified_ms(&target)?,
                absolute_path: target,
                format,
            });
        }
    }
    Ok(())
}

fn relative_string(root: &Path, path: &Path) -> String {
    path.strip_prefix(root)
        .unwrap_or(path)
        .components()
        .filter_map(|c| match c {
            Component::Normal(part) => Some(part.to_string_lossy()),
            _ => None,
        })
        .collect::<Vec<_>>()
        .join("/")
}

fn modified_ms(path: &Path) -> Result<u64> {
    Ok(std::fs::metadata(path)?
        .modified()
        .unwrap_or(SystemTime::UNIX_EPOCH)
        .duration_since(SystemTime::UNIX_EPOCH)
        .unwrap_or_default()
        .as_millis() as u64)
}

#[cfg(test)]
mod tests {
    use super::*;

    fn paths(notes: &[NoteFile]) -> Vec<&str> {
        notes.iter().map(|n| n.relative_path.as_str()).collect()
    }

    #[test]
    fn discovers_supported_formats() {
        let tmp = tempfile::tempdir().unwrap();
        std::fs::write(tmp.path().join("note.md"), "# Hello").unwrap();
        std::fs::write(tmp.path().join("readme.txt"), "Hello").unwrap();
        std::fs::write(tmp.path().join("clip.html"), "<p>Hi</p>").unwrap();
        std::fs::write(tmp.path().join("image.png"), "binary").unwrap();

        let notes = discover_notes(tmp.path()).unwrap();

        assert_eq!(paths(&notes), vec!["clip.html", "note.md", "readme.txt"]);
        assert_eq!(notes[0].format, NoteFormat::Html);
        assert_eq!(notes[1].format, NoteFormat::Markdown);
        assert_eq!(notes[2].format, NoteFormat::Text);
    }

    #[test]
    fn skips_hidden_entries() {
        let tmp = tempfile::tempdir().unwrap();
        let hidden = tmp.path().join(".obsidian");
        std::fs::create_dir(&hidden).unwrap();
        std::fs::write(hidden.join("workspace.md"), "state").unwrap();
        std::fs::write(tmp.path().join(".draft.md"), "secret").unwrap();
        std::fs::write(tmp.path().join("visible.md"), "hello").unwrap();

        let notes = discover_notes(tmp.path()).unwrap();
        assert_eq!(paths(&notes), vec!["visible.md"]);
    }

    #[test]
    fn nested_paths_use_forward_slashes() {
        let tmp = tempfile::tempdir().unwrap();
        let sub = tmp.path().join("biology").join("cells");
        std::fs::create_dir_all(&sub).unwrap();
        std::fs::write(sub.join("mito.md"), "deep").unwrap();
        std::fs::write(tmp.path().join("top.md"), "top").unwrap();

        let notes = discover_notes(tmp.path()).unwrap();
        assert_eq!(paths(&notes), vec!["biology/cells/mito.md", "top.md"]);
    }

    #[test]
    fn modification_time_is_recorded() {
        let tmp = tempfile::tempdir().unwrap();
        std::fs::write(tmp.path().join("file.md"), "content").unwrap();

        let notes = discover_notes(tmp.path()).unwrap();
        assert!(notes[0].modified_ms > 0);
    }

    #[test]
    fn extension_match_ignores_case() {
        assert_eq!(
            NoteFormat::from_path(Path::new("A.MD")),
            Some(NoteFormat::Markdown)
        );
        assert_eq!(NoteFormat::from_path(Path::new("noext")), None);
    }
}
