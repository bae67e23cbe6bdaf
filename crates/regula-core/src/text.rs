//! Text utilities shared by the lexical, semantic and entailment tiers.

use lazy_static::lazy_static;
use regex::Regex;
use std::collections::HashSet;
use std::hash::Hash;

lazy_static! {
    static ref WORD: Regex = Regex::new(r"\b[a-z]{2,}\b").unwrap();

    static ref SENTENCE_BREAK: Regex = Regex::new(r"[.!?]\s+").unwrap();

    static ref STOPWORDS: HashSet<&'static str> = [
        "the", "and", "for", "are", "but", "not", "you", "all", "any", "can", "her", "was",
        "one", "our", "out", "his", "has", "had", "its", "may", "who", "with", "that",
        "this", "from", "they", "been", "have", "were", "said", "each", "which", "their",
        "will", "other", "about", "into", "than", "them", "these", "those", "such", "then",
        "there", "where", "when", "shall", "must", "being", "under", "within", "referred",
        "paragraph", "article", "pursuant", "accordance", "regard", "also", "only", "does",
        "should", "would", "could", "upon", "whether", "either", "both",
    ]
    .into_iter()
    .collect();
}

/// Lower-cased alphabetic words of two or more letters.
pub fn tokenize(text: &str) -> Vec<String> {
    let lower = humanize(text).to_lowercase();
    WORD.find_iter(&lower).map(|m| m.as_str().to_string()).collect()
}

/// Tokens of three or more letters that carry meaning on their own.
pub fn content_terms(text: &str) -> Vec<String> {
    tokenize(text)
        .into_iter()
        .filter(|t| t.len() >= 3 && !STOPWORDS.contains(t.as_str()))
        .collect()
}

/// Crude normalisation so that "authorised", "authorized" and
/// "authorizes" compare equal.
pub fn stem(term: &str) -> String {
    let mut t = term.to_lowercase();
    for (from, to) in [
        ("isation", "ization"),
        ("ising", "izing"),
        ("ised", "ized"),
        ("ises", "izes"),
        ("ise", "ize"),
    ] {
        if t.ends_with(from) {
            t.truncate(t.len() - from.len());
            t.push_str(to);
            break;
        }
    }
    for suffix in ["ations", "ation", "ings", "ing", "ed", "es", "s"] {
        if t.len() > suffix.len() + 3 && t.ends_with(suffix) {
            t.truncate(t.len() - suffix.len());
            break;
        }
    }
    t
}

/// Distinct stemmed content terms.
pub fn stem_set(text: &str) -> HashSet<String> {
    content_terms(text).iter().map(|t| stem(t)).collect()
}

/// Split on sentence-ending punctuation, dropping empty pieces.
pub fn split_sentences(text: &str) -> Vec<String> {
    SENTENCE_BREAK
        .split(text)
        .map(|s| s.trim().trim_end_matches(['.', '!', '?']).trim().to_string())
        .filter(|s| !s.is_empty())
        .collect()
}

/// Turn identifiers such as `not_authorized` or `issuer.type` into words.
pub fn humanize(identifier: &str) -> String {
    identifier.replace(['_', '.'], " ")
}

/// Character n-grams of the lower-cased text.
pub fn char_ngrams(text: &str, n: usize) -> HashSet<String> {
    let chars: Vec<char> = text.to_lowercase().chars().collect();
    if n == 0 || chars.len() < n {
        return HashSet::new();
    }
    chars.windows(n).map(|w| w.iter().collect()).collect()
}

/// Jaccard index of two sets; `0.0` when both are empty.
pub fn jaccard<T: Eq + Hash>(a: &HashSet<T>, b: &HashSet<T>) -> f64 {
    let union = a.union(b).count();
    if union == 0 {
        return 0.0;
    }
    a.intersection(b).count() as f64 / union as f64
}

/// Cosine similarity; `0.0` when either vector is zero or lengths differ.
pub fn cosine(a: &[f32], b: &[f32]) -> f64 {
    if a.len() != b.len() {
        return 0.0;
    }
    let (mut dot, mut na, mut nb) = (0.0f64, 0.0f64, 0.0f64);
    for (x, y) in a.iter().zip(b) {
        let (x, y) = (f64::from(*x), f64::from(*y));
        dot += x * y;
        na += x * x;
        nb += y * y;
    }
    if na == 0.0 || nb == 0.0 {
        return 0.0;
    }
    dot / (na.sqrt() * nb.sqrt())
}

/// Truncate to at most `max` characters, appending an ellipsis when cut.
pub fn excerpt(text: &str, max: usize) -> String {
    let trimmed = text.trim();
    if trimmed.chars().count() <= max {
        return trimmed.to_string();
    }
    let cut: String = trimmed.chars().take(max).collect();
    format!("{}...", cut.trim_end())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_tokenize_splits_identifiers() {
        assert_eq!(tokenize("not_authorized"), vec!["not", "authorized"]);
        assert_eq!(tokenize("A CASP may"), vec!["casp", "may"]);
    }

    #[test]
    fn test_content_terms_drop_stopwords() {
        let terms = content_terms("The issuer shall publish a white paper");
        assert_eq!(terms, vec!["issuer", "publish", "white", "paper"]);
    }

    #[test]
    fn test_stem_folds_spelling_and_inflection() {
        for word in ["authorised", "authorized", "authorises", "authorisation", "authorizing"] {
            assert_eq!(stem(word), "authoriz", "{}", word);
        }
        assert_eq!(stem("tokens"), "token");
        assert_eq!(stem("art"), "art");
    }

    #[test]
    fn test_split_sentences() {
        let sentences = split_sentences("Issuers shall apply. They may offer tokens! Done");
        assert_eq!(sentences, vec!["Issuers shall apply", "They may offer tokens", "Done"]);
    }

    #[test]
    fn test_similarity_helpers() {
        assert_eq!(cosine(&[1.0, 0.0], &[1.0, 0.0]), 1.0);
        assert_eq!(cosine(&[0.0, 0.0], &[1.0, 0.0]), 0.0);
        let a: HashSet<&str> = ["x", "y"].into_iter().collect();
        let b: HashSet<&str> = ["y", "z"].into_iter().collect();
        assert!((jaccard(&a, &b) - 1.0 / 3.0).abs() < 1e-9);
        assert_eq!(char_ngrams("ab", 3).len(), 0);
    }

    #[test]
    fn test_excerpt() {
        assert_eq!(excerpt("short", 10), "short");
        assert_eq!(excerpt("a much longer sentence", 6), "a much...");
    }
}
