//! Code-vs-natural-language classification and intent detection (C2, §4.2).

use regex::Regex;
use std::sync::OnceLock;

use crate::config::IntentKeywords;

fn code_re() -> &'static Regex {
    static RE: OnceLock<Regex> = OnceLock::new();
    RE.get_or_init(|| Regex::new(r"^[A-Za-z]\d{2,4}(\.\d{0,2})?$").expect("static regex"))
}

fn code_prefix_re() -> &'static Regex {
    static RE: OnceLock<Regex> = OnceLock::new();
    RE.get_or_init(|| Regex::new(r"^[A-Za-z]\d").expect("static regex"))
}

/// Space-compact a query (drop all whitespace) — the form the code regex
/// is matched against.
fn compact(q: &str) -> String {
    q.chars().filter(|c| !c.is_whitespace()).collect()
}

/// Is `q` an ICD-10 code fragment rather than natural language? Code
/// queries bypass normalization, intent detection, and similarity scoring.
pub fn is_code_query(q: &str) -> bool {
    let c = compact(q);
    if c.is_empty() {
        return false;
    }
    code_re().is_match(&c) || code_prefix_re().is_match(&c)
}

/// Detect the clinical intent with the most keyword hits in an
/// already-normalized query. Hits count both substring occurrences and
/// whole-token matches; ties are broken by the keyword map's iteration
/// order (the first intent to reach the current best score wins). Returns
/// `None` when no keyword fires.
pub fn detect_intent(normalized_query: &str, keywords: &IntentKeywords) -> Option<String> {
    if normalized_query.is_empty() {
        return None;
    }
    let tokens: Vec<&str> = normalized_query.split_whitespace().collect();
    let mut best: Option<(String, usize)> = None;
    for (intent, kws) in keywords.iter() {
        let hits = kws
            .iter()
            .filter(|kw| {
                normalized_query.contains(kw.as_str()) || tokens.contains(&kw.as_str())
            })
            .count();
        if hits == 0 {
            continue;
        }
        match &best {
            Some((_, best_hits)) if hits <= *best_hits => {}
            _ => best = Some((intent.to_string(), hits)),
        }
    }
    best.map(|(intent, _)| intent)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::IntentKeywords;

    #[test]
    fn recognizes_bare_and_dotted_codes() {
        assert!(is_code_query("E11"));
        assert!(is_code_query("E11.9"));
        assert!(is_code_query("e119"));
        assert!(is_code_query("j18"));
        assert!(is_code_query("E 11 . 9"));
    }

    #[test]
    fn rejects_natural_language() {
        assert!(!is_code_query("dolor de cabeza"));
        assert!(!is_code_query("diabetes tipo 2"));
        assert!(!is_code_query(""));
    }

    #[test]
    fn detects_intent_by_keyword_hits() {
        let kw = IntentKeywords::default();
        assert_eq!(
            detect_intent("neumonia aguda", &kw).as_deref(),
            Some("infection")
        );
        assert_eq!(
            detect_intent("cefalea y migrana", &kw).as_deref(),
            Some("neurological")
        );
    }

    #[test]
    fn returns_none_on_zero_hits() {
        let kw = IntentKeywords::default();
        assert_eq!(detect_intent("xqxq", &kw), None);
        assert_eq!(detect_intent("", &kw), None);
    }

    #[test]
    fn ties_break_by_map_iteration_order() {
        // "neumonia" and "bronquitis" both appear in infection and
        // respiratory; infection is earlier in the fixed map order.
        let kw = IntentKeywords::default();
        assert_eq!(
            detect_intent("neumonia bronquitis", &kw).as_deref(),
            Some("infection")
        );
    }
}
