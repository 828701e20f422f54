//! Text normalization and chunking for note bodies.
//!
//! Notes arrive either as plain text/markdown or as HTML produced by a
//! rich-text editor. [`normalize`] turns both into readable plain text,
//! [`compose`] builds the indexed form of a note, and [`chunk_text`] splits
//! that form into overlapping windows that are embedded one by one.

use std::fmt::Write;

use sha2::{Digest, Sha256};

use crate::error::{Error, Result};

/// Default chunk size in characters.
pub const DEFAULT_CHUNK_SIZE: usize = 1200;

/// Default overlap between adjacent chunks in characters.
pub const DEFAULT_CHUNK_OVERLAP: usize = 200;

/// Chunking configuration.
///
/// # Examples
///
/// ```
/// use hopnotes::chunking::{ChunkingConfig, DEFAULT_CHUNK_SIZE};
///
/// let config = ChunkingConfig::default();
/// assert_eq!(config.chunk_size, DEFAULT_CHUNK_SIZE);
/// assert!(config.overlap < config.chunk_size);
/// ```
#[derive(Debug, Clone, Copy, PartialEq, Eq, serde::Serialize)]
pub struct ChunkingConfig {
    /// Maximum chunk size in characters.
    pub chunk_size: usize,
    /// Overlap between adjacent chunks in characters.
    pub overlap: usize,
}

impl Default for ChunkingConfig {
    fn default() -> Self {
        Self {
            chunk_size: DEFAULT_CHUNK_SIZE,
            overlap: DEFAULT_CHUNK_OVERLAP,
        }
    }
}

/// Tags whose boundaries become line breaks in the plain-text output.
const BLOCK_TAGS: &[&str] = &[
    "p",
    "div",
    "br",
    "li",
    "ul",
    "ol",
    "h1",
    "h2",
    "h3",
    "h4",
    "h5",
    "h6",
    "tr",
    "blockquote",
    "pre",
    "section",
    "article",
    "hr",
];

/// Tags whose content is dropped entirely.
const SKIPPED_TAGS: &[&str] = &["script", "style", "head"];

/// Strip markup from a note and tidy its whitespace.
///
/// Block-level tags become line breaks, `script`/`style` content is dropped,
/// common entities are decoded, non-breaking spaces become plain spaces and
/// runs of blank lines collapse to a single blank line.
///
/// # Examples
///
/// ```
/// use hopnotes::chunking::normalize;
///
/// let text = normalize("<p>Hello&nbsp;<b>world</b></p><p></p><p></p><p>Bye</p>");
/// assert_eq!(text, "Hello world\n\nBye");
/// ```
pub fn normalize(raw: &str) -> String {
    let stripped = strip_markup(raw);
    tidy_whitespace(&stripped)
}

/// Build the indexed text of a note from its title and body.
///
/// Both parts are normalized; a blank title contributes nothing.
pub fn compose(title: &str, body: &str) -> String {
    let title = normalize(title);
    let body = normalize(body);
    match (title.is_empty(), body.is_empty()) {
        (true, _) => body,
        (false, true) => title,
        (false, false) => format!("{title}\n\n{body}"),
    }
}

/// SHA-256 hex digest of `text`.
///
/// # Examples
///
/// ```
/// use hopnotes::chunking::content_hash;
///
/// assert_eq!(content_hash("abc"), content_hash("abc"));
/// assert_ne!(content_hash("abc"), content_hash("abd"));
/// assert_eq!(content_hash("abc").len(), 64);
/// ```
pub fn content_hash(text: &str) -> String {
    let digest = Sha256::digest(text.as_bytes());
    let mut hex = String::with_capacity(digest.len() * 2);
    for byte in digest {
        // Writing into a String cannot fail.
        let _ = write!(hex, "{byte:02x}");
    }
    hex
}

/// Split text into overlapping, trimmed chunks of at most `max_chars`
/// characters.
///
/// The window walks the trimmed text; after emitting `[start, end)` the next
/// window starts at `end - overlap`, never moving backward and never staying
/// in place. Whitespace-only windows are dropped.
///
/// # Errors
///
/// Returns [`Error::InvalidInput`] when `max_chars` is zero.
///
/// # Examples
///
/// ```
/// use hopnotes::chunking::chunk_text;
///
/// let chunks = chunk_text("Hello, world!", 1000, 0).unwrap();
/// assert_eq!(chunks, vec!["Hello, world!".to_string()]);
///
/// let text = "word ".repeat(500);
/// let chunks = chunk_text(&text, 1000, 200).unwrap();
/// assert!(chunks.len() >= 2);
/// assert!(chunks.iter().all(|c| c.chars().count() <= 1000));
///
/// assert!(chunk_text("   ", 10, 0).unwrap().is_empty());
/// assert!(chunk_text("text", 0, 0).is_err());
/// ```
pub fn chunk_text(
    text: &str,
    max_chars: usize,
    overlap: usize,
) -> Result<Vec<String>> {
    if max_chars == 0 {
        return Err(Error::InvalidInput(
            "chunk size must be greater than zero".to_string(),
        ));
    }

    let text = text.trim();
    if text.is_empty() {
        return Ok(Vec::new());
    }

    // Char index -> byte index, with a sentinel for the end of the text.
    let char_to_byte: Vec<usize> = text
        .char_indices()
        .map(|(byte_idx, _)| byte_idx)
        .chain(std::iter::once(text.len()))
        .collect();
    let char_count = char_to_byte.len() - 1;

    let mut chunks = Vec::new();
    let mut start = 0;

    loop {
        let end = (start + max_chars).min(char_count);
        let window = text[char_to_byte[start]..char_to_byte[end]].trim();
        if !window.is_empty() {
            chunks.push(window.to_string());
        }

        if end >= char_count {
            break;
        }

        let next = end.saturating_sub(overlap);
        start = if next <= start { end } else { next };
    }

    Ok(chunks)
}

fn strip_markup(raw: &str) -> String {
    let mut out = String::with_capacity(raw.len());
    let mut rest = raw;
    let mut skipping: Option<&str> = None;

    while let Some(lt) = rest.find('<') {
        let (before, after) = rest.split_at(lt);
        if skipping.is_none() {
            out.push_str(&decode_entities(before));
        }

        let Some(gt) = after.find('>') else {
            // A lone '<' is text, not markup.
            if skipping.is_none() {
                out.push_str(&decode_entities(after));
            }
            return out;
        };

        let tag = &after[1..gt];
        rest = &after[gt + 1..];

        let closing = tag.starts_with('/');
        let name = tag
            .trim_start_matches('/')
            .split(|c: char| c.is_whitespace() || c == '/')
            .next()
            .unwrap_or("")
            .to_ascii_lowercase();

        if let Some(skipped) = skipping {
            if closing && name == skipped {
                skipping = None;
            }
            continue;
        }

        if !closing
            && let Some(skipped) =
                SKIPPED_TAGS.iter().copied().find(|t| *t == name.as_str())
        {
            skipping = Some(skipped);
            continue;
        }

        if BLOCK_TAGS.contains(&name.as_str()) {
            out.push('\n');
        }
    }

    if skipping.is_none() {
        out.push_str(&decode_entities(rest));
    }
    out
}

fn decode_entities(text: &str) -> String {
    if !text.contains('&') {
        return text.to_string();
    }

    let mut out = String::with_capacity(text.len());
    let mut rest = text;
    while let Some(amp) = rest.find('&') {
        out.push_str(&rest[..amp]);
        let candidate = &rest[amp..];
        match candidate.find(';').filter(|&semi| semi <= 10) {
            Some(semi) => match decode_entity(&candidate[1..semi]) {
                Some(c) => {
                    out.push(c);
                    rest = &candidate[semi + 1..];
                }
                None => {
                    out.push('&');
                    rest = &candidate[1..];
                }
            },
            None => {
                out.push('&');
                rest = &candidate[1..];
            }
        }
    }
    out.push_str(rest);
    out
}

fn decode_entity(name: &str) -> Option<char> {
    match name {
        "nbsp" => Some(' '),
        "amp" => Some('&'),
        "lt" => Some('<'),
        "gt" => Some('>'),
        "quot" => Some('"'),
        "apos" | "#39" => Some('\''),
        _ => {
            let code = if let Some(hex) = name
                .strip_prefix("#x")
                .or_else(|| name.strip_prefix("#X"))
            {
                u32::from_str_radix(hex, 16).ok()?
            } else {
                name.strip_prefix('#')?.parse().ok()?
            };
            char::from_u32(code)
        }
    }
}

fn tidy_whitespace(text: &str) -> String {
    let mut out = String::with_capacity(text.len());
    let mut blank_run = 0;

    for line in text.lines() {
        let line = line.replace('\u{a0}', " ");
        let line = line.trim_end();
        if line.trim().is_empty() {
            blank_run += 1;
            continue;
        }
        if !out.is_empty() {
            out.push('\n');
            if blank_run > 0 {
                out.push('\n');
            }
        }
        blank_run = 0;
        out.push_str(line);
    }

    out.trim().to_string()
}

#[cfg(test)]
mod tests {
    use proptest::prelude::*;

    use super::*;

    #[test]
    fn short_text_single_chunk() {
        let chunks =
            chunk_text("Hello, world!", DEFAULT_CHUNK_SIZE, DEFAULT_CHUNK_OVERLAP)
                .unwrap();
        assert_eq!(chunks, vec!["Hello, world!"]);
    }

    #[test]
    fn empty_and_whitespace_yield_nothing() {
        assert!(chunk_text("", 10, 2).unwrap().is_empty());
        assert!(chunk_text(" \n\t ", 10, 2).unwrap().is_empty());
    }

    #[test]
    fn zero_chunk_size_is_invalid_input() {
        let err = chunk_text("abc", 0, 0).unwrap_err();
        assert!(matches!(err, Error::InvalidInput(_)));
    }

    #[test]
    fn windows_advance_by_size_minus_overlap() {
        let text = "abcdefghijklmnopqrstuvwxyz";
        let chunks = chunk_text(text, 10, 3).unwrap();
        assert_eq!(chunks, vec!["abcdefghij", "hijklmnopq", "opqrstuvwx", "vwxyz"]);
    }

    #[test]
    fn overlap_larger_than_window_still_terminates() {
        let text = "abcdefghij";
        let chunks = chunk_text(text, 4, 10).unwrap();
        assert_eq!(chunks, vec!["abcd", "efgh", "ij"]);
    }

    #[test]
    fn whitespace_window_is_dropped() {
        let text = format!("abcd{}efgh", " ".repeat(8));
        let chunks = chunk_text(&text, 4, 0).unwrap();
        assert_eq!(chunks, vec!["abcd", "efgh"]);
    }

    #[test]
    fn handles_multibyte_chars() {
        let text = "café ☕ naïve 日本語 🎉 ".repeat(50);
        let chunks = chunk_text(&text, 100, 20).unwrap();
        assert!(!chunks.is_empty());
        for chunk in &chunks {
            assert!(chunk.chars().count() <= 100);
        }
    }

    #[test]
    fn normalize_strips_tags_and_entities() {
        let html = "<h1>Title</h1><p>Fish &amp; chips&nbsp;&#8364;5</p>";
        assert_eq!(normalize(html), "Title\n\nFish & chips €5");
    }

    #[test]
    fn normalize_drops_script_and_style() {
        let html = "<style>p { color: red }</style><p>Visible</p><script>alert(1)</script>";
        assert_eq!(normalize(html), "Visible");
    }

    #[test]
    fn normalize_collapses_blank_lines_and_nbsp() {
        let text = "one\u{a0}two\n\n\n\n three  \n\n\nfour";
        assert_eq!(normalize(text), "one two\n\n three\n\nfour");
    }

    #[test]
    fn normalize_keeps_plain_angle_brackets() {
        assert_eq!(normalize("a < b"), "a < b");
        assert_eq!(normalize("AT&T"), "AT&T");
    }

    #[test]
    fn compose_joins_title_and_body() {
        assert_eq!(compose("Title", "<p>Body</p>"), "Title\n\nBody");
        assert_eq!(compose("  ", "Body"), "Body");
        assert_eq!(compose("Title", ""), "Title");
    }

    #[test]
    fn content_hash_is_lowercase_sha256_hex() {
        assert_eq!(
            content_hash("abc"),
            "ba7816bf8f01cfea414140de5dae2223b00361a396177a9cb410ff61f20015ad"
        );
    }

    #[test]
    fn content_hash_changes_with_one_char() {
        let a = content_hash("The quick brown fox");
        let b = content_hash("The quick brown fix");
        assert_ne!(a, b);
        assert_eq!(a, content_hash("The quick brown fox"));
    }

    proptest! {
        #[test]
        fn chunks_respect_size_and_cover_text(
            text in "[a-z]{1,400}",
            max in 1usize..60,
            overlap in 0usize..30,
        ) {
            let chunks = chunk_text(&text, max, overlap).unwrap();
            prop_assert!(!chunks.is_empty());
            for chunk in &chunks {
                prop_assert!(chunk.chars().count() <= max);
            }

            // Without whitespace no trimming happens, so windows line up
            // exactly with the text and consecutive chunks share `overlap`
            // characters whenever the window can advance.
            prop_assert!(text.starts_with(chunks[0].as_str()));
            prop_assert!(text.ends_with(chunks[chunks.len() - 1].as_str()));
            if overlap < max {
                for pair in chunks.windows(2) {
                    let tail: String = pair[0]
                        .chars()
                        .skip(pair[0].chars().count() - overlap)
                        .collect();
                    prop_assert!(pair[1].starts_with(tail.as_str()));
                }
                let step = max - overlap;
                let rebuilt: String = chunks
                    .iter()
                    .enumerate()
                    .map(|(i, c)| {
                        if i + 1 == chunks.len() {
                            c.clone()
                        } else {
                            c.chars().take(step).collect()
                        }
                    })
                    .collect();
                prop_assert_eq!(rebuilt, text);
            }
        }
    }
}
