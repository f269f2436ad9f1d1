//! Title and description for a cluster, derived from its keywords.

use crate::keywords::FALLBACK_KEYWORD;

/// `(title, description)` for a keyword list; empty input uses the fallback keyword.
pub fn generate_summary(keywords: &[String]) -> (String, String) {
    let fallback = [FALLBACK_KEYWORD.to_string()];
    let keywords = if keywords.is_empty() { &fallback[..] } else { keywords };

    let title_parts: Vec<&str> = keywords.iter().take(3).map(|k| k.as_str()).collect();
    let title = title_case(&title_parts.join(" / "));

    let desc_parts: Vec<&str> = keywords.iter().take(4).map(|k| k.as_str()).collect();
    let description = format!("Trending videos related to {}.", desc_parts.join(", "));

    (title, description)
}

/// Uppercase the first letter of every alphabetic run, lowercase the rest.
fn title_case(s: &str) -> String {
    let mut out = String::with_capacity(s.len());
    let mut prev_is_letter = false;
    for c in s.chars() {
        if c.is_alphabetic() {
            if prev_is_letter {
                out.extend(c.to_lowercase());
            } else {
                out.extend(c.to_uppercase());
            }
            prev_is_letter = true;
        } else {
            out.push(c);
            prev_is_letter = false;
        }
    }
    out
}
