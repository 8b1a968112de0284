//! Sentence splitting and snippet generation for chunk previews.

/// Default snippet ceiling in characters.
pub const DEFAULT_SNIPPET_CHARS: usize = 300;

const ABBREVIATIONS: &[&str] = &[
    "dr.", "mr.", "mrs.", "ms.", "inc.", "ltd.", "corp.", "co.", "jan.", "feb.", "mar.", "apr.",
    "jun.", "jul.", "aug.", "sep.", "oct.", "nov.", "dec.",
];

/// Splits prose into sentences on `.`, `!` or `?` followed by spaces, keeping common
/// abbreviations (`Mr.`, `Inc.`, month names) inside their sentence.
pub fn split_sentences(text: &str) -> Vec<String> {
    if text.trim().is_empty() {
        return Vec::new();
    }

    let mut sentences = Vec::new();
    let mut current = String::new();
    for part in split_after_terminators(text) {
        let part = part.trim();
        if part.is_empty() {
            continue;
        }
        if !current.is_empty() {
            current.push(' ');
        }
        current.push_str(part);

        let lower = part.to_lowercase();
        let is_abbreviation = ABBREVIATIONS.iter().any(|abbr| lower.ends_with(abbr));
        if !is_abbreviation && part.ends_with(['.', '!', '?']) {
            sentences.push(std::mem::take(&mut current));
        }
    }
    if !current.is_empty() {
        sentences.push(current);
    }
    sentences
}

/// Concatenates leading whole sentences while the result stays within `max_chars`.
pub fn generate_snippet(text: &str, max_chars: usize) -> String {
    let mut snippet = String::new();
    for sentence in split_sentences(text) {
        let needed = if snippet.is_empty() {
            sentence.chars().count()
        } else {
            snippet.chars().count() + 1 + sentence.chars().count()
        };
        if needed > max_chars {
            break;
        }
        if !snippet.is_empty() {
            snippet.push(' ');
        }
        snippet.push_str(&sentence);
    }
    snippet
}

fn split_after_terminators(text: &str) -> Vec<&str> {
    let mut parts = Vec::new();
    let mut start = 0usize;
    let mut prev: Option<char> = None;
    for (idx, ch) in text.char_indices() {
        if ch == ' ' && matches!(prev, Some('.' | '!' | '?')) {
            parts.push(&text[start..idx]);
            start = idx + 1;
        }
        prev = Some(ch);
    }
    parts.push(&text[start..]);
    parts
}
