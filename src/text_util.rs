/// Words too common to carry meaning as a search phrase or a quote match.
pub const STOPWORDS: &[&str] = &[
    "a", "about", "after", "all", "also", "an", "and", "any", "are", "as",
    "at", "be", "because", "been", "but", "by", "can", "could", "did", "do",
    "does", "each", "for", "from", "get", "gets", "had", "has", "have", "how",
    "i", "if", "in", "into", "is", "it", "its", "just", "may", "me", "more",
    "most", "my", "no", "not", "of", "on", "one", "or", "other", "our", "out",
    "over", "so", "some", "such", "than", "that", "the", "their", "them",
    "then", "there", "these", "they", "this", "those", "to", "up", "use",
    "uses", "very", "was", "we", "were", "what", "when", "where", "which",
    "while", "who", "why", "will", "with", "would", "you", "your",
];

pub fn is_stopword(term: &str) -> bool {
    STOPWORDS.contains(&term)
}

/// Lowercased alphanumeric terms of `text`, in order of appearance.
pub fn terms(text: &str) -> Vec<String> {
    text.split(|c: char| !c.is_alphanumeric())
        .filter(|t| !t.is_empty())
        .map(str::to_lowercase)
        .collect()
}

/// Terms of `text` worth matching on: no stopwords, no single characters.
pub fn content_terms(text: &str) -> Vec<String> {
    terms(text)
        .into_iter()
        .filter(|t| t.chars().count() > 1 && !is_stopword(t))
        .collect()
}

/// The first `max_chars` characters of `text`, cut on a char boundary.
pub fn truncate_chars(text: &str, max_chars: usize) -> &str {
    match text.char_indices().nth(max_chars) {
        Some((byte, _)) => &text[..byte],
        None => text,
    }
}

/// Collapse `text` onto one line and cap it at `max_chars`, appending "..."
/// when anything was cut.
pub fn snippet(text: &str, max_chars: usize) -> String {
    let flat = text.split_whitespace().collect::<Vec<_>>().join(" ");
    let cut = truncate_chars(&flat, max_chars);
    if cut.len() < flat.len() {
        format!("{}...", cut.trim_end())
    } else {
        flat
    }
}

/// Split `text` into sentences on `.`, `!`, `?` and line breaks.
///
/// Terminal punctuation stays attached; empty pieces are dropped.
pub fn sentences(text: &str) -> Vec<&str> {
    let mut result = Vec::new();
    let mut start = 0;
    let mut chars = text.char_indices().peekable();

    while let Some((i, c)) = chars.next() {
        let boundary = match c {
            '\n' => Some(i),
            '.' | '!' | '?' => match chars.peek() {
                None => Some(i + c.len_utf8()),
                Some((_, next)) if next.is_whitespace() => {
                    Some(i + c.len_utf8())
                }
                _ => None,
            },
            _ => None,
        };
        if let Some(end) = boundary {
            let piece = text[start..end].trim();
            if !piece.is_empty() {
                result.push(piece);
            }
            start = end;
        }
    }

    let tail = text[start..].trim();
    if !tail.is_empty() {
        result.push(tail);
    }
    result
}
