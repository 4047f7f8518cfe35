//! Text helpers for speech output and outbound messages.

use regex::Regex;
use std::sync::LazyLock;

static MD_LINK: LazyLock<Regex> =
    LazyLock::new(|| Regex::new(r"\[([^\]]*)\]\([^)]*\)").expect("valid markdown link regex"));
static URL: LazyLock<Regex> =
    LazyLock::new(|| Regex::new(r"https?://\S+").expect("valid url regex"));
static MARKUP: LazyLock<Regex> =
    LazyLock::new(|| Regex::new(r"[*_`~>|]").expect("valid markup regex"));

/// Collapses runs of whitespace to single spaces and trims.
pub fn normalize_whitespace(text: &str) -> String {
    text.split_whitespace().collect::<Vec<_>>().join(" ")
}

/// Prepares chat text for synthesis: markdown links keep their label, bare
/// URLs and markup characters are removed.
pub fn sanitize_for_speech(text: &str) -> String {
    let text = MD_LINK.replace_all(text, "$1");
    let text = URL.replace_all(&text, "");
    let text = MARKUP.replace_all(&text, "");
    normalize_whitespace(&text)
}

/// Splits whitespace-normalized text into consecutive `max_chars`
/// character slices. Each slice is trimmed and blank slices are dropped, so
/// a word straddling a boundary is cut mid-word.
pub fn split_chunks(text: &str, max_chars: usize) -> Vec<String> {
    let text = normalize_whitespace(text);
    split_message(&text, max_chars)
        .into_iter()
        .map(|chunk| chunk.trim().to_string())
        .filter(|chunk| !chunk.is_empty())
        .collect()
}

/// Hard-splits `text` every `max_chars` characters. Used for outbound
/// messages, where the platform's length limit is all that matters.
pub fn split_message(text: &str, max_chars: usize) -> Vec<String> {
    if text.is_empty() || max_chars == 0 {
        return Vec::new();
    }
    let chars: Vec<char> = text.chars().collect();
    chars
        .chunks(max_chars)
        .map(|chunk| chunk.iter().collect())
        .collect()
}
