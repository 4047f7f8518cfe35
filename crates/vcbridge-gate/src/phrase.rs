//! Trigger phrase normalization and matching.
//!
//! Matching is done on normalized tokens only: lower-cased, restricted to
//! `[a-z0-9]`, whitespace-separated. A phrase matches when its words appear
//! as a contiguous run of whole tokens. The text around a match is reported
//! as slices of the caller's original string, so buffered speech keeps its
//! casing and punctuation.

use std::ops::Range;

/// Lower-cases `text`, strips every character outside `[a-z0-9 ]` and
/// collapses whitespace.
pub fn normalize(text: &str) -> String {
    text.split_whitespace()
        .filter_map(normalize_token)
        .collect::<Vec<_>>()
        .join(" ")
}

fn normalize_token(token: &str) -> Option<String> {
    let normalized: String = token
        .chars()
        .map(|c| c.to_ascii_lowercase())
        .filter(|c| c.is_ascii_lowercase() || c.is_ascii_digit())
        .collect();
    (!normalized.is_empty()).then_some(normalized)
}

/// How a phrase has to appear in an utterance to count as a match.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum MatchMode {
    /// Anywhere in the utterance, on whole-word boundaries.
    #[default]
    WordBoundary,
    /// The whole normalized utterance must equal the phrase.
    Exact,
}

/// An ordered list of normalized phrases. Earlier entries win.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct PhraseSet {
    phrases: Vec<Phrase>,
}

#[derive(Debug, Clone, PartialEq, Eq)]
struct Phrase {
    text: String,
    words: Vec<String>,
}

impl PhraseSet {
    /// Normalizes each phrase; phrases that normalize to nothing are dropped.
    pub fn new<I, S>(phrases: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: AsRef<str>,
    {
        let phrases = phrases
            .into_iter()
            .map(|p| normalize(p.as_ref()))
            .filter(|p| !p.is_empty())
            .map(|text| Phrase {
                words: text.split(' ').map(str::to_string).collect(),
                text,
            })
            .collect();
        Self { phrases }
    }

    /// Parses a comma-separated list, e.g. `"stop message, end message"`.
    pub fn parse_list(value: &str) -> Self {
        Self::new(value.split(','))
    }

    pub fn is_empty(&self) -> bool {
        self.phrases.is_empty()
    }

    pub fn len(&self) -> usize {
        self.phrases.len()
    }

    pub fn iter(&self) -> impl Iterator<Item = &str> {
        self.phrases.iter().map(|p| p.text.as_str())
    }
}

/// A located trigger phrase.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct PhraseMatch {
    /// The normalized phrase that matched.
    pub phrase: String,
    /// Original text strictly before the match, trimmed.
    pub before: String,
    /// Original text strictly after the match, trimmed.
    pub after: String,
}

/// A whitespace-delimited token of the original text and its normalized form.
struct Token {
    span: Range<usize>,
    normalized: String,
}

fn tokenize(text: &str) -> Vec<Token> {
    let mut tokens = Vec::new();
    let mut start = None;
    for (i, c) in text.char_indices() {
        if c.is_whitespace() {
            if let Some(s) = start.take() {
                push_token(&mut tokens, text, s..i);
            }
        } else if start.is_none() {
            start = Some(i);
        }
    }
    if let Some(s) = start {
        push_token(&mut tokens, text, s..text.len());
    }
    tokens
}

fn push_token(tokens: &mut Vec<Token>, text: &str, span: Range<usize>) {
    if let Some(normalized) = normalize_token(&text[span.clone()]) {
        tokens.push(Token { span, normalized });
    }
}

/// Finds the first phrase of `phrases` (in priority order) present in `text`.
///
/// Returns `None` when nothing matches; that is not an error.
pub fn find_phrase(text: &str, phrases: &PhraseSet, mode: MatchMode) -> Option<PhraseMatch> {
    if phrases.is_empty() {
        return None;
    }
    let tokens = tokenize(text);
    if tokens.is_empty() {
        return None;
    }

    for phrase in &phrases.phrases {
        let n = phrase.words.len();
        if n > tokens.len() {
            continue;
        }
        let matches_at = |i: usize| {
            tokens[i..i + n]
                .iter()
                .zip(&phrase.words)
                .all(|(token, word)| token.normalized == *word)
        };

        let found = match mode {
            MatchMode::Exact => (tokens.len() == n && matches_at(0)).then_some(0),
            MatchMode::WordBoundary => (0..=tokens.len() - n).find(|&i| matches_at(i)),
        };

        if let Some(i) = found {
            let first = &tokens[i];
            let last = &tokens[i + n - 1];
            return Some(PhraseMatch {
                phrase: phrase.text.clone(),
                before: text[..first.span.start].trim().to_string(),
                after: text[last.span.end..].trim().to_string(),
            });
        }
    }
    None
}
