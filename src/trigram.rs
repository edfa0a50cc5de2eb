//! Character-trigram similarity, store-agnostic (SPEC_FULL §G).
//!
//! `pg_trgm` is not available to a SQLite-backed store, so this module
//! implements the same notion directly: Dice coefficient over overlapping
//! 3-character windows of each string, padded with leading/trailing spaces
//! the way `pg_trgm` pads its inputs so short strings still produce
//! meaningful trigrams.

use std::collections::HashSet;

fn trigrams(s: &str) -> HashSet<String> {
    let padded = format!("  {} ", s);
    let chars: Vec<char> = padded.chars().collect();
    if chars.len() < 3 {
        return HashSet::new();
    }
    chars
        .windows(3)
        .map(|w| w.iter().collect::<String>())
        .collect()
}

/// Dice coefficient of the two strings' trigram sets, in `[0, 1]`.
/// Returns `0.0` if either input has fewer than 3 characters worth of
/// signal once padded (i.e. both inputs empty).
pub fn similarity(a: &str, b: &str) -> f64 {
    if a.is_empty() || b.is_empty() {
        return 0.0;
    }
    let ta = trigrams(a);
    let tb = trigrams(b);
    if ta.is_empty() || tb.is_empty() {
        return 0.0;
    }
    let intersection = ta.intersection(&tb).count();
    (2.0 * intersection as f64) / (ta.len() + tb.len()) as f64
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn identical_strings_are_fully_similar() {
        assert_eq!(similarity("diabetes", "diabetes"), 1.0);
    }

    #[test]
    fn disjoint_strings_have_zero_similarity() {
        assert_eq!(similarity("abc", "xyz"), 0.0);
    }

    #[test]
    fn similar_strings_score_between_zero_and_one() {
        let s = similarity("diabetes tipo 2", "diabetes tipo dos");
        assert!(s > 0.3 && s < 1.0);
    }

    #[test]
    fn empty_inputs_are_zero() {
        assert_eq!(similarity("", "diabetes"), 0.0);
        assert_eq!(similarity("diabetes", ""), 0.0);
    }

    #[test]
    fn is_symmetric() {
        assert_eq!(similarity("gastritis", "gastroenteritis"), similarity("gastroenteritis", "gastritis"));
    }
}
