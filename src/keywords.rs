//! Keyword extraction - TF-IDF over the member texts of one cluster
//!
//! Each member text is a document. Scores use smoothed IDF
//! (`ln((1 + n) / (1 + df)) + 1`), raw term counts, and per-document L2
//! normalization; a term's final weight is its score summed over documents.

use std::collections::{BTreeMap, HashSet};

use tracing::debug;

/// Returned whenever no usable vocabulary exists.
pub const FALLBACK_KEYWORD: &str = "general";

/// Default number of keywords per cluster.
pub const DEFAULT_TOP_K: usize = 6;

/// English stop words to filter out
const STOP_WORDS: &[&str] = &[
    "a", "an", "the", "and", "or", "but", "in", "on", "at", "to", "for", "of", "with",
    "is", "are", "was", "were", "be", "been", "being", "have", "has", "had", "do", "does",
    "did", "will", "would", "could", "should", "may", "might", "must", "shall", "can",
    "this", "that", "these", "those", "i", "you", "he", "she", "it", "we", "they", "me",
    "him", "her", "us", "them", "my", "your", "his", "its", "our", "their", "what", "which",
    "who", "whom", "when", "where", "why", "how", "all", "each", "every", "both", "few",
    "more", "most", "other", "some", "such", "no", "nor", "not", "only", "own", "same",
    "so", "than", "too", "very", "just", "also", "now", "here", "there", "then", "once",
    "if", "because", "as", "until", "while", "about", "against", "between", "into",
    "through", "during", "before", "after", "above", "below", "from", "up", "down", "out",
    "off", "over", "under", "again", "further", "any", "am", "by", "yours", "ours",
    "myself", "yourself", "himself", "herself", "itself", "ourselves", "themselves",
    "hers", "theirs", "cannot", "else", "ever", "even", "many", "much", "never",
    "often", "per", "rather", "since", "still", "though", "thus", "upon", "via", "whether",
    "whose", "within", "without", "yet", "done", "get", "go", "re", "etc", "one", "two",
];

/// Top `top_k` keywords for a cluster's member texts, best first.
///
/// Never empty: blank input or an all-stop-word vocabulary yields `["general"]`.
pub fn extract_keywords(texts: &[String], top_k: usize) -> Vec<String> {
    let docs: Vec<Vec<String>> = texts
        .iter()
        .filter(|t| !t.trim().is_empty())
        .map(|t| tokenize(t))
        .collect();

    if docs.is_empty() {
        return fallback();
    }

    let stop_set: HashSet<&str> = STOP_WORDS.iter().copied().collect();
    let docs: Vec<Vec<String>> = docs
        .into_iter()
        .map(|tokens| {
            tokens
                .into_iter()
                .filter(|t| !stop_set.contains(t.as_str()))
                .collect()
        })
        .collect();

    // Document frequency; BTreeMap keeps terms in lexical order.
    let mut df: BTreeMap<&str, usize> = BTreeMap::new();
    for tokens in &docs {
        let unique: HashSet<&str> = tokens.iter().map(|t| t.as_str()).collect();
        for term in unique {
            *df.entry(term).or_insert(0) += 1;
        }
    }

    if df.is_empty() {
        debug!(docs = docs.len(), "no vocabulary, using fallback keyword");
        return fallback();
    }

    let n = docs.len() as f64;
    let idf: BTreeMap<&str, f64> = df
        .iter()
        .map(|(&term, &count)| (term, ((1.0 + n) / (1.0 + count as f64)).ln() + 1.0))
        .collect();

    let mut totals: BTreeMap<&str, f64> = BTreeMap::new();
    for tokens in &docs {
        let mut counts: BTreeMap<&str, f64> = BTreeMap::new();
        for t in tokens {
            *counts.entry(t.as_str()).or_insert(0.0) += 1.0;
        }

        let weights: Vec<(&str, f64)> = counts
            .into_iter()
            .map(|(term, tf)| (term, tf * idf.get(term).copied().unwrap_or(1.0)))
            .collect();
        let norm = weights.iter().map(|(_, w)| w * w).sum::<f64>().sqrt();
        if norm == 0.0 {
            continue;
        }
        for (term, w) in weights {
            *totals.entry(term).or_insert(0.0) += w / norm;
        }
    }

    let mut scored: Vec<(&str, f64)> = totals.into_iter().collect();
    // Stable sort over lexical order, so ties stay alphabetical
    scored.sort_by(|a, b| b.1.total_cmp(&a.1));

    scored
        .into_iter()
        .take(top_k.max(1))
        .map(|(term, _)| term.to_string())
        .collect()
}

fn fallback() -> Vec<String> {
    vec![FALLBACK_KEYWORD.to_string()]
}

/// Lowercased word tokens of two or more characters.
fn tokenize(text: &str) -> Vec<String> {
    text.to_lowercase()
        .split(|c: char| !(c.is_alphanumeric() || c == '_'))
        .filter(|s| s.chars().count() >= 2)
        .map(|s| s.to_string())
        .collect()
}

#[cfg(test)]
mod tests {
    use super::*;

    fn texts(items: &[&str]) -> Vec<String> {
        items.iter().map(|s| s.to_string()).collect()
    }

    #[test]
    fn test_empty_input_falls_back() {
        assert_eq!(extract_keywords(&[], 6), vec!["general"]);
        assert_eq!(extract_keywords(&texts(&["  ", "\n"]), 6), vec!["general"]);
    }

    #[test]
    fn test_stop_words_only_falls_back() {
        assert_eq!(extract_keywords(&texts(&["the", "a", "an"]), 6), vec!["general"]);
    }

    #[test]
    fn test_shared_term_ranks_first() {
        let kws = extract_keywords(&texts(&["cat videos are fun", "funny cat clips"]), 6);
        assert_eq!(kws[0], "cat");
        assert!(!kws.contains(&"are".to_string()));
        assert_eq!(kws.len(), 5);
    }

    #[test]
    fn test_ties_are_alphabetical() {
        let kws = extract_keywords(&texts(&["zebra apple mango"]), 3);
        assert_eq!(kws, vec!["apple", "mango", "zebra"]);
    }

    #[test]
    fn test_top_k_limits_output() {
        let kws = extract_keywords(
            &texts(&["rust async tokio runtime", "rust ownership borrow checker lifetimes"]),
            2,
        );
        assert_eq!(kws.len(), 2);
        assert_eq!(kws[0], "rust");
    }

    #[test]
    fn test_tokenize_drops_single_chars_and_punctuation() {
        assert_eq!(tokenize("I'm a DIY-fan!"), vec!["diy", "fan"]);
    }
}
