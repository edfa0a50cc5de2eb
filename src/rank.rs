//! Weighted scoring, anatomical boost, and explanation text (C5, §4.5).

use crate::config::{Config, IntentKeywords};
use crate::model::{Candidate, MatchFeatures, RankedResult};

const ANATOMICAL_BOOST: f64 = 0.15;

struct Scored {
    candidate: Candidate,
    score: f64,
    features: MatchFeatures,
    explanation: String,
}

fn score_candidate(
    candidate: &Candidate,
    config: &Config,
    intent: Option<&str>,
) -> (f64, MatchFeatures, String) {
    let w = &config.weights;
    let tags_lower = candidate.tags.to_lowercase();
    let intent_aligned = intent
        .map(|i| IntentKeywords::tags_mention(&tags_lower, i))
        .unwrap_or(false);
    let tag_matched = !candidate.tags.trim().is_empty();

    let mut score = 0.0;
    let mut parts: Vec<String> = Vec::new();

    if candidate.exact_code_match {
        score += w.exact_match;
        parts.push("exact code".to_string());
    }
    if candidate.prefix_match {
        score += w.prefix_match;
        parts.push("prefix".to_string());
    }
    if candidate.description_match {
        score += w.description_match;
        parts.push("description".to_string());
    }
    if candidate.similarity > 0.0 {
        score += w.similarity * 100.0 * candidate.similarity;
        parts.push(format!("similarity={:.2}", candidate.similarity));
    }
    score += w.priority_boost * candidate.priority;
    if candidate.priority > 0.0 {
        parts.push(format!("priority={:.0}", candidate.priority * 10.0));
    }
    if intent_aligned {
        score += w.intent_bonus;
        parts.push(format!("intent={}", intent.unwrap_or_default()));
    }
    if tag_matched {
        score += w.tag_match;
    }

    let usage_component =
        (candidate.global_frequency.min(config.tuning.usage_frequency_ceiling)) as f64
            * w.usage_frequency;
    let previous_usage_component =
        (candidate.user_frequency.min(config.tuning.user_frequency_ceiling)) as f64
            * w.user_frequency;
    score += usage_component + previous_usage_component;

    if parts.is_empty() {
        parts.push("fuzzy".to_string());
    }

    let features = MatchFeatures {
        exact_code: candidate.exact_code_match,
        prefix_code: candidate.prefix_match,
        description_match: candidate.description_match,
        similarity: candidate.similarity,
        priority: candidate.priority,
        intent_aligned,
        tag_matched,
    };

    (score, features, parts.join(", "))
}

/// Ranks candidates per the weighted model in §4.5, applies the
/// anatomical-ontology boost as a post-scoring re-sort, and returns
/// explainable [`RankedResult`]s sorted `score desc, code asc`.
pub fn rank(
    candidates: Vec<Candidate>,
    config: &Config,
    intent: Option<&str>,
    anatomical_system: Option<&str>,
) -> Vec<RankedResult> {
    let mut scored: Vec<Scored> = candidates
        .into_iter()
        .map(|c| {
            let (score, features, explanation) = score_candidate(&c, config, intent);
            Scored {
                candidate: c,
                score,
                features,
                explanation,
            }
        })
        .collect();

    if let Some(system) = anatomical_system {
        for s in scored.iter_mut() {
            if s.candidate.tags.to_lowercase().contains(&system.to_lowercase()) {
                let boosted_similarity = s.candidate.similarity + ANATOMICAL_BOOST;
                s.score += config.weights.similarity * 100.0 * ANATOMICAL_BOOST;
                s.features.similarity = boosted_similarity;
            }
        }
    }

    scored.sort_by(|a, b| {
        b.score
            .partial_cmp(&a.score)
            .unwrap_or(std::cmp::Ordering::Equal)
            .then_with(|| a.candidate.code.cmp(&b.candidate.code))
    });

    scored
        .into_iter()
        .map(|s| RankedResult {
            code: s.candidate.code.clone(),
            label: s.candidate.description.clone(),
            score: s.score,
            source: s.candidate.source,
            match_features: s.features,
            explanation: s.explanation,
        })
        .collect()
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::model::ResultSource;

    fn base_candidate(code: &str) -> Candidate {
        Candidate {
            code: code.to_string(),
            description: format!("description for {code}"),
            description_normalized: String::new(),
            search_text: String::new(),
            similarity: 0.0,
            priority: 0.0,
            tags: String::new(),
            exact_code_match: false,
            prefix_match: false,
            description_match: false,
            token_hit_count: 0,
            global_frequency: 0,
            user_frequency: 0,
            source: ResultSource::Icd10Extended,
        }
    }

    #[test]
    fn exact_match_outranks_prefix_match() {
        let config = Config::from_env();
        let exact = Candidate {
            exact_code_match: true,
            ..base_candidate("E11")
        };
        let prefix = Candidate {
            prefix_match: true,
            ..base_candidate("E11.9")
        };
        let results = rank(vec![prefix, exact], &config, None, None);
        assert_eq!(results[0].code, "E11");
    }

    #[test]
    fn ties_break_lexicographically_by_code() {
        let config = Config::from_env();
        let a = base_candidate("Z99");
        let b = base_candidate("A01");
        let results = rank(vec![a, b], &config, None, None);
        assert_eq!(results[0].code, "A01");
        assert_eq!(results[1].code, "Z99");
    }

    #[test]
    fn increasing_similarity_never_decreases_score() {
        let config = Config::from_env();
        let low = Candidate {
            similarity: 0.1,
            ..base_candidate("J18.9")
        };
        let high = Candidate {
            similarity: 0.8,
            ..base_candidate("J18.9")
        };
        let (low_score, _, _) = score_candidate(&low, &config, None);
        let (high_score, _, _) = score_candidate(&high, &config, None);
        assert!(high_score >= low_score);
    }

    #[test]
    fn intent_alignment_adds_bonus_and_explanation() {
        let config = Config::from_env();
        let aligned = Candidate {
            tags: "respiratory,infection".to_string(),
            ..base_candidate("J18.9")
        };
        let (score, features, explanation) = score_candidate(&aligned, &config, Some("respiratory"));
        assert!(features.intent_aligned);
        assert!(explanation.contains("intent=respiratory"));
        assert!(score >= config.weights.intent_bonus);
    }

    #[test]
    fn no_firing_rules_falls_back_to_fuzzy_explanation() {
        let config = Config::from_env();
        let plain = base_candidate("Z00");
        let (_, _, explanation) = score_candidate(&plain, &config, None);
        assert_eq!(explanation, "fuzzy");
    }

    #[test]
    fn anatomical_boost_reorders_by_boosted_similarity() {
        let config = Config::from_env();
        let matching = Candidate {
            tags: "respiratory".to_string(),
            similarity: 0.3,
            ..base_candidate("J18.9")
        };
        let non_matching = Candidate {
            similarity: 0.35,
            ..base_candidate("R51")
        };
        let results = rank(
            vec![non_matching, matching],
            &config,
            None,
            Some("respiratory"),
        );
        assert_eq!(results[0].code, "J18.9");
    }
}
