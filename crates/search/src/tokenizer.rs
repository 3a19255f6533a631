//! Tokenizer for index text
//!
//! Deliberately small:
//! - Lowercase
//! - Split on non-alphanumeric characters
//! - Drop tokens shorter than 2 characters
//!
//! No stemming or stopwords. Queries and documents go through the same
//! function, so matching stays symmetric.

use rustc_hash::FxHashSet;

/// Minimum token length in characters
pub const MIN_TOKEN_CHARS: usize = 2;

/// Tokenize text into searchable terms
///
/// # Example
///
/// ```
/// use folio_search::tokenizer::tokenize;
///
/// assert_eq!(tokenize("Dune, 2nd Edition"), vec!["dune", "2nd", "edition"]);
/// ```
pub fn tokenize(text: &str) -> Vec<String> {
    text.to_lowercase()
        .split(|c: char| !c.is_alphanumeric())
        .filter(|s| s.chars().count() >= MIN_TOKEN_CHARS)
        .map(String::from)
        .collect()
}

/// Tokenize and deduplicate, keeping first occurrence order
///
/// ```
/// use folio_search::tokenizer::tokenize_unique;
///
/// assert_eq!(tokenize_unique("the Dune the DUNE"), vec!["the", "dune"]);
/// ```
pub fn tokenize_unique(text: &str) -> Vec<String> {
    let mut seen = FxHashSet::default();
    tokenize(text)
        .into_iter()
        .filter(|t| seen.insert(t.clone()))
        .collect()
}
