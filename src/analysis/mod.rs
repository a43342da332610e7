//! Text analysis: transliteration, normalization and stemming
//!
//! Fixed step order: transliterate to ASCII, lowercase, split on runs of
//! non-alphabetic characters, drop tokens outside [2, 25] chars, stem.
//! Analysis is total and deterministic; it never fails.

use bumpalo::Bump;
use deunicode::deunicode;
use once_cell::sync::Lazy;
use rust_stemmers::{Algorithm, Stemmer};
use std::borrow::Cow;

const MIN_TOKEN_LEN: usize = 2;
const MAX_TOKEN_LEN: usize = 25;

static DEFAULT_ANALYZER: Lazy<Analyzer> = Lazy::new(Analyzer::default);

/// Text analyzer with a configurable stemming language
pub struct Analyzer {
    stemmer: Stemmer,
}

impl Default for Analyzer {
    fn default() -> Self {
        Self::new(Algorithm::Portuguese)
    }
}

impl Analyzer {
    pub fn new(algorithm: Algorithm) -> Self {
        Self {
            stemmer: Stemmer::create(algorithm),
        }
    }

    /// Analyze text into an ordered sequence of terms.
    pub fn analyze(&self, text: &str) -> Vec<String> {
        deunicode(text)
            .to_lowercase()
            .split(|c: char| !c.is_ascii_alphabetic())
            .filter(|s| (MIN_TOKEN_LEN..=MAX_TOKEN_LEN).contains(&s.len()))
            .map(|s| self.stemmer.stem(s).into_owned())
            .collect()
    }

    /// Analyze text, allocating tokens into a caller-provided arena.
    ///
    /// Used by the pipeline's processor workers, which reset one bump
    /// allocator per document instead of freeing tokens individually.
    pub fn analyze_arena<'a>(&self, text: &str, bump: &'a Bump) -> Vec<&'a str> {
        let ascii = deunicode(text);
        let lower = bump.alloc_str(&ascii.to_lowercase());

        lower
            .split(|c: char| !c.is_ascii_alphabetic())
            .filter(|s| (MIN_TOKEN_LEN..=MAX_TOKEN_LEN).contains(&s.len()))
            .map(|s| match self.stemmer.stem(s) {
                Cow::Borrowed(b) => b,
                Cow::Owned(o) => &*bump.alloc_str(&o),
            })
            .collect()
    }
}

/// Analyze text with the default (Portuguese) analyzer.
pub fn analyze(text: &str) -> Vec<String> {
    DEFAULT_ANALYZER.analyze(text)
}

/// Arena variant of [`analyze`].
pub fn analyze_arena<'a>(text: &str, bump: &'a Bump) -> Vec<&'a str> {
    DEFAULT_ANALYZER.analyze_arena(text, bump)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_transliterate_and_lowercase() {
        let tokens = analyze("A Cão corre RÁPIDO!");
        // "A" is dropped by the length filter; the rest is ASCII-folded,
        // lowercased and stemmed by the Portuguese stemmer.
        assert_eq!(tokens, vec!["cao", "corr", "rap"]);
    }

    #[test]
    fn test_length_filter() {
        let tokens = analyze("a bb ccc");
        assert!(!tokens.contains(&"a".to_string()));
        assert_eq!(tokens.len(), 2);

        let long = "x".repeat(26);
        assert!(analyze(&long).is_empty());
        let max = "x".repeat(25);
        assert_eq!(analyze(&max).len(), 1);
    }

    #[test]
    fn test_splits_on_non_alphabetic() {
        let tokens = analyze("foo123bar, baz-qux");
        assert_eq!(tokens, vec!["foo", "bar", "baz", "qux"]);
    }

    #[test]
    fn test_idempotent_on_stems() {
        let first = analyze("correndo rapidamente pelos campos verdes");
        let second = analyze(&first.join(" "));
        assert_eq!(first, second);
    }

    #[test]
    fn test_arena_matches_owned() {
        let bump = Bump::new();
        let text = "Coração de estudante, há que se cuidar";
        let owned = analyze(text);
        let arena: Vec<String> = analyze_arena(text, &bump)
            .into_iter()
            .map(str::to_string)
            .collect();
        assert_eq!(owned, arena);
    }

    #[test]
    fn test_never_fails_on_garbage() {
        assert!(analyze("").is_empty());
        assert!(analyze("123 456 !!!").is_empty());
        let _ = analyze("\u{0000}\u{FFFD}𠜎");
    }
}
