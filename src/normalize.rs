//! Accent-folding, tokenization, and stopword-stripping (C1, §4.1).

use regex::Regex;
use std::sync::OnceLock;
use unicode_normalization::UnicodeNormalization;

const STOPWORDS: &[&str] = &[
    "de", "la", "del", "el", "los", "las", "y", "en", "con", "por", "para",
    "al", "un", "una", "unos", "unas", "a", "o", "u", "que", "se", "su",
];

fn token_re() -> &'static Regex {
    static RE: OnceLock<Regex> = OnceLock::new();
    RE.get_or_init(|| Regex::new(r"[a-z0-9.]+").expect("static regex"))
}

/// Lowercase, NFKD-decompose and drop combining marks, extract
/// `[a-z0-9.]+` tokens, collapse whitespace to single spaces.
pub fn normalize(s: &str) -> String {
    let lowered = s.trim().to_lowercase();
    let stripped: String = lowered.nfkd().filter(|c| !is_combining_mark(*c)).collect();
    let tokens: Vec<&str> = token_re().find_iter(&stripped).map(|m| m.as_str()).collect();
    tokens.join(" ")
}

fn is_combining_mark(c: char) -> bool {
    matches!(c as u32, 0x0300..=0x036F | 0x1AB0..=0x1AFF | 0x1DC0..=0x1DFF | 0x20D0..=0x20FF)
}

/// Split an already-normalized string into its whitespace-delimited tokens.
pub fn tokenize_normalized(normalized: &str) -> Vec<&str> {
    normalized.split_whitespace().collect()
}

/// `normalize` plus Spanish stopword removal, with a safety fallback: if
/// stripping stopwords would leave zero tokens, the unfiltered tokens are
/// kept instead (spec §4.1).
pub fn normalize_for_nl(s: &str) -> String {
    let base = normalize(s);
    let tokens = tokenize_normalized(&base);
    let filtered: Vec<&str> = tokens
        .iter()
        .copied()
        .filter(|t| !STOPWORDS.contains(t))
        .collect();
    if filtered.is_empty() {
        tokens.join(" ")
    } else {
        filtered.join(" ")
    }
}

/// Uppercase a query and, if its space-compacted form matches a bare
/// 4-character ICD-10 shape (`E119`), insert the billable-code dot
/// (`E11.9`). Otherwise return the uppercased form unchanged.
pub fn normalize_icd_input(s: &str) -> String {
    let upper = s.trim().to_uppercase();
    let compact: String = upper.chars().filter(|c| !c.is_whitespace()).collect();
    static BARE: OnceLock<Regex> = OnceLock::new();
    let re = BARE.get_or_init(|| Regex::new(r"^[A-Z]\d{3}$").expect("static regex"));
    if re.is_match(&compact) {
        format!("{}.{}", &compact[..3], &compact[3..])
    } else {
        upper
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn strips_accents_and_lowercases() {
        assert_eq!(normalize("Dolor de Cabeza"), "dolor de cabeza");
        assert_eq!(normalize("Náusea e Infección"), "nausea e infeccion");
        assert_eq!(normalize("migraña"), "migrana");
    }

    #[test]
    fn collapses_whitespace() {
        assert_eq!(normalize("  dolor    de   cabeza  "), "dolor de cabeza");
    }

    #[test]
    fn idempotent() {
        for s in ["Dolor de Cabeza", "E11.9", "  ", "migraña crónica"] {
            let once = normalize(s);
            let twice = normalize(&once);
            assert_eq!(once, twice);
        }
    }

    #[test]
    fn removes_stopwords() {
        assert_eq!(normalize_for_nl("dolor de cabeza"), "dolor cabeza");
        assert_eq!(normalize_for_nl("diabetes tipo 2"), "diabetes tipo 2");
    }

    #[test]
    fn stopword_safety_fallback_keeps_unfiltered_tokens() {
        // every token is a stopword -> filtered list would be empty
        assert_eq!(normalize_for_nl("de la del"), "de la del");
    }

    #[test]
    fn icd_input_inserts_dot_for_bare_four_char_codes() {
        assert_eq!(normalize_icd_input("e119"), "E11.9");
        assert_eq!(normalize_icd_input("E 11 9"), "E11.9");
    }

    #[test]
    fn icd_input_leaves_already_dotted_or_short_codes_alone() {
        assert_eq!(normalize_icd_input("e11.9"), "E11.9");
        assert_eq!(normalize_icd_input("e11"), "E11");
    }
}
