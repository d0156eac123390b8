//! Shared text heuristics used by retrieval scoring and prompt assembly.
//!
//! The overlap measures here are lexical, not semantic: they compare token
//! sets, not embeddings, and are deliberately named to keep that distinction
//! visible at call sites.

use std::collections::HashSet;

const STOP_WORDS: &[&str] = &[
    "the", "and", "for", "are", "but", "not", "you", "all", "can", "had", "her", "was", "one",
    "our", "out", "day", "get", "has", "him", "his", "how", "man", "new", "now", "old", "see",
    "two", "way", "who", "did", "its", "let", "put", "say", "she", "too", "use", "that", "with",
    "have", "this", "will", "your", "from", "they", "know", "want", "been", "good", "much", "some",
    "time", "very", "when", "come", "here", "just", "like", "long", "make", "many", "over", "such",
    "take", "than", "them", "well", "were", "what", "does", "about", "into", "there", "their",
    "would", "could", "should", "which", "these", "those", "while", "where", "after", "before",
    "during", "between", "through", "because",
];

/// Lowercased alphanumeric tokens of length >= 3.
pub fn tokenize(text: &str) -> Vec<String> {
    let mut terms = Vec::new();
    for raw in text.split(|c: char| !c.is_alphanumeric()) {
        let term = raw.trim().to_ascii_lowercase();
        if term.len() >= 3 {
            terms.push(term);
        }
    }
    terms
}

/// Stop-word-filtered tokens of length > 3, deduplicated and sorted.
pub fn extract_keywords(text: &str) -> Vec<String> {
    let mut terms: Vec<String> = tokenize(text)
        .into_iter()
        .filter(|term| term.len() > 3 && !STOP_WORDS.contains(&term.as_str()))
        .collect();
    terms.sort();
    terms.dedup();
    terms
}

/// Fraction of `terms` appearing as substrings of `haystack`.
pub fn lexical_overlap_score(terms: &[String], haystack: &str) -> f32 {
    if terms.is_empty() {
        return 0.0;
    }
    let lower = haystack.to_ascii_lowercase();
    let mut matches = 0usize;
    for term in terms {
        if lower.contains(term.as_str()) {
            matches = matches.saturating_add(1);
        }
    }
    (matches as f32) / (terms.len() as f32)
}

/// Jaccard similarity over token sets. This is a lexical overlap measure,
/// distinct from embedding-based similarity.
pub fn content_jaccard_similarity(a: &str, b: &str) -> f32 {
    let set_a: HashSet<String> = tokenize(a).into_iter().collect();
    let set_b: HashSet<String> = tokenize(b).into_iter().collect();

    if set_a.is_empty() && set_b.is_empty() {
        return 1.0;
    }
    if set_a.is_empty() || set_b.is_empty() {
        return 0.0;
    }

    let intersection = set_a.intersection(&set_b).count();
    let union = set_a.union(&set_b).count();
    (intersection as f32) / (union as f32)
}

/// Rough token estimate at four characters per token, rounded up.
pub fn estimate_tokens(text: &str) -> usize {
    text.chars().count().div_ceil(4)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_tokenize_drops_short_tokens() {
        let tokens = tokenize("An ox ran to the BARN quickly");
        assert_eq!(tokens, vec!["ran", "the", "barn", "quickly"]);
    }

    #[test]
    fn test_extract_keywords_filters_stop_words() {
        let keywords = extract_keywords("What would the quarterly report include?");
        assert!(keywords.contains(&"quarterly".to_string()));
        assert!(keywords.contains(&"report".to_string()));
        assert!(!keywords.contains(&"would".to_string()));
        assert!(!keywords.contains(&"what".to_string()));
    }

    #[test]
    fn test_connectives_are_not_keywords() {
        let keywords =
            extract_keywords("the difference between reports filed through the portal during onboarding");
        assert!(!keywords.contains(&"between".to_string()));
        assert!(!keywords.contains(&"through".to_string()));
        assert!(!keywords.contains(&"during".to_string()));
        assert!(keywords.contains(&"reports".to_string()));
        assert!(keywords.contains(&"portal".to_string()));
    }

    #[test]
    fn test_lexical_overlap_score_fraction() {
        let terms = vec!["tokio".to_string(), "runtime".to_string()];
        let score = lexical_overlap_score(&terms, "The Tokio scheduler");
        assert!((score - 0.5).abs() < f32::EPSILON);
    }

    #[test]
    fn test_jaccard_identical_and_disjoint() {
        assert!((content_jaccard_similarity("alpha beta gamma", "alpha beta gamma") - 1.0).abs() < f32::EPSILON);
        assert!(content_jaccard_similarity("alpha beta", "delta epsilon") < f32::EPSILON);
    }

    #[test]
    fn test_estimate_tokens_rounds_up() {
        assert_eq!(estimate_tokens("abcde"), 2);
        assert_eq!(estimate_tokens(""), 0);
    }
}
