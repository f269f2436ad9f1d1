//! Shortening and spam filtering for representative examples.

/// Phrases that mark promotional filler rather than content.
const SPAM_PHRASES: &[&str] = &["telegram", "join group", "link in bio", "follow for link"];

/// Default character budget for one example.
pub const DEFAULT_MAX_LEN: usize = 140;

/// Examples kept per cluster label.
pub const MAX_EXAMPLES: usize = 3;

/// First sentence of `text`, cut to `max_len` characters and trimmed.
///
/// Returns an empty string for blank text or text containing a spam phrase.
pub fn clean_example(text: &str, max_len: usize) -> String {
    if text.trim().is_empty() {
        return String::new();
    }

    let lowered = text.to_lowercase();
    if SPAM_PHRASES.iter().any(|p| lowered.contains(p)) {
        return String::new();
    }

    let first = text.split('.').next().unwrap_or("");
    first.chars().take(max_len).collect::<String>().trim().to_string()
}

/// Clean every example in order, drop empties, keep the first [`MAX_EXAMPLES`].
pub fn clean_examples<S: AsRef<str>>(raw: &[S], max_len: usize) -> Vec<String> {
    raw.iter()
        .map(|t| clean_example(t.as_ref(), max_len))
        .filter(|t| !t.is_empty())
        .take(MAX_EXAMPLES)
        .collect()
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_spam_is_removed() {
        assert_eq!(clean_example("Join our telegram group for more! http://x", 140), "");
        assert_eq!(clean_example("Full recipe: LINK IN BIO", 140), "");
    }

    #[test]
    fn test_keeps_first_sentence() {
        assert_eq!(
            clean_example("  Cats knock things over. Then they nap.", 140),
            "Cats knock things over"
        );
    }

    #[test]
    fn test_truncates_by_characters() {
        let text = "é".repeat(200);
        assert_eq!(clean_example(&text, 140).chars().count(), 140);
        assert_eq!(clean_example("abcdef", 3), "abc");
    }

    #[test]
    fn test_blank_and_leading_period() {
        assert_eq!(clean_example("   ", 140), "");
        assert_eq!(clean_example(".hidden rest", 140), "");
    }

    #[test]
    fn test_clean_examples_filters_and_caps() {
        let raw = [
            "one.",
            "follow for link",
            "two",
            "",
            "three. more",
            "four",
        ];
        assert_eq!(clean_examples(&raw, 140), vec!["one", "two", "three"]);
    }
}
