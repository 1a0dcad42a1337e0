//! Similarity gate for rewritten transcripts.
//!
//! The rewrite model is only allowed to fix grammar and punctuation,
//! so its output must stay lexically close to the original. Closeness
//! is a bigram Sørensen–Dice coefficient over normalized text.

pub const DEFAULT_SIMILARITY_THRESHOLD: f64 = 0.78;

/// Lowercase and strip everything that is not alphanumeric, so
/// punctuation and spacing changes cost nothing.
fn normalize(text: &str) -> String {
    text.chars()
        .filter(|c| c.is_alphanumeric())
        .flat_map(char::to_lowercase)
        .collect()
}

/// Similarity in `[0.0, 1.0]` between the original transcript and the
/// formatted candidate.
///
/// Normalized strings of length ≤ 1 have no bigrams; they are compared
/// by equality instead.
pub fn similarity(original: &str, formatted: &str) -> f64 {
    let a = normalize(original);
    let b = normalize(formatted);

    if a.chars().count() <= 1 || b.chars().count() <= 1 {
        return if a == b { 1.0 } else { 0.0 };
    }

    strsim::sorensen_dice(&a, &b)
}

/// Whether `formatted` preserves enough of `original` to accept.
pub fn validate(original: &str, formatted: &str, threshold: f64) -> bool {
    similarity(original, formatted) >= threshold
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn punctuation_and_spacing_changes_pass() {
        assert!(validate(
            "Open AI makes models",
            "OpenAI makes models.",
            DEFAULT_SIMILARITY_THRESHOLD
        ));
    }

    #[test]
    fn paraphrase_fails() {
        assert!(!validate(
            "Open AI makes models",
            "We should go to the store.",
            DEFAULT_SIMILARITY_THRESHOLD
        ));
    }

    #[test]
    fn degenerate_strings_compare_by_equality() {
        assert_eq!(similarity("A", "a!"), 1.0);
        assert_eq!(similarity("A", "b"), 0.0);
        assert_eq!(similarity("", ""), 1.0);
        assert_eq!(similarity("", "x"), 0.0);
    }

    #[test]
    fn identical_text_is_fully_similar() {
        assert_eq!(similarity("hello world", "hello world"), 1.0);
    }

    #[test]
    fn case_is_ignored() {
        assert_eq!(similarity("HELLO world", "hello WORLD"), 1.0);
    }
}
