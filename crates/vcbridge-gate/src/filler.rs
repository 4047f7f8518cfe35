//! Vocalized-pause detection.

use regex::Regex;
use std::sync::LazyLock;

static FILLER_TOKEN: LazyLock<Regex> = LazyLock::new(|| {
    Regex::new(r"^(?:m+|hm+|u+h+|u+m+|a+h+|o+h+|e+r+m*|yeah+)$").expect("filler pattern is valid")
});

/// True when every word of `text` is a vocalized pause ("um", "ahh", "hmm").
///
/// Words are compared after lower-casing and dropping everything but ASCII
/// letters. Text without any letters counts as filler.
pub fn is_filler(text: &str) -> bool {
    text.split_whitespace()
        .map(|token| {
            token
                .chars()
                .filter(char::is_ascii_alphabetic)
                .map(|c| c.to_ascii_lowercase())
                .collect::<String>()
        })
        .filter(|token| !token.is_empty())
        .all(|token| FILLER_TOKEN.is_match(&token))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn pauses_are_filler() {
        for text in ["uh um ahh", "Mmm.", "oh, yeahhh", "hmm", "erm", "Ahh... OH"] {
            assert!(is_filler(text), "{text:?} should be filler");
        }
    }

    #[test]
    fn empty_or_symbol_only_is_filler() {
        assert!(is_filler(""));
        assert!(is_filler("  ... 123 "));
    }

    #[test]
    fn real_words_are_not_filler() {
        for text in ["um hello", "yes", "oh no", "stop message", "ham"] {
            assert!(!is_filler(text), "{text:?} should not be filler");
        }
    }
}
