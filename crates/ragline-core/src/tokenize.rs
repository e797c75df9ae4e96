//! Text normalisation for the lexical index.
//!
//! [`tokenize`] lowercases, strips punctuation, drops short tokens and
//! stop words, then applies a heuristic suffix stripper. The stripper is
//! not a real stemmer: it ignores doubled consonants and irregular forms.

/// Closed list of function words removed before indexing.
pub const STOP_WORDS: &[&str] = &[
    "a", "an", "and", "are", "as", "at", "be", "by", "for", "from", "has", "he", "in", "is", "it",
    "its", "of", "on", "that", "the", "to", "was", "will", "with", "would", "could", "should",
    "this", "these", "those", "i", "you", "we", "they", "them", "their", "what", "which", "who",
    "when", "where", "why", "how",
];

/// Suffixes in stripping priority order.
const SUFFIXES: &[&str] = &["ing", "ed", "es", "s", "ly", "tion", "ment", "ness", "ity"];

/// Shortest token kept, in characters.
const MIN_TOKEN_CHARS: usize = 3;

/// Turn raw text into a sequence of normalised terms.
///
/// ```rust
/// use ragline_core::tokenize::tokenize;
///
/// assert_eq!(tokenize("Dogs and cats are pets!"), vec!["dog", "cat", "pet"]);
/// ```
pub fn tokenize(text: &str) -> Vec<String> {
    let cleaned: String = text
        .to_lowercase()
        .chars()
        .map(|c| {
            if c.is_alphanumeric() || c.is_whitespace() {
                c
            } else {
                ' '
            }
        })
        .collect();

    cleaned
        .split_whitespace()
        .filter(|t| t.chars().count() >= MIN_TOKEN_CHARS)
        .filter(|t| !is_stop_word(t))
        .map(strip_suffix)
        .collect()
}

pub fn is_stop_word(token: &str) -> bool {
    STOP_WORDS.contains(&token)
}

/// Strip the first suffix in priority order whose removal leaves the
/// token longer than `suffix.len() + 2` characters overall.
///
/// Returns the token unchanged when no suffix qualifies.
pub fn strip_suffix(token: &str) -> String {
    let len = token.chars().count();
    for suffix in SUFFIXES {
        if token.ends_with(suffix) && len > suffix.len() + 2 {
            return token[..token.len() - suffix.len()].to_string();
        }
    }
    token.to_string()
}
