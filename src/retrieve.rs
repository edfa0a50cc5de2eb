//! Multi-attempt candidate retrieval against the store (C4, §4.4).

use crate::config::Config;
use crate::error::StoreError;
use crate::model::{Candidate, IcdExtendedRow, ResultSource};
use crate::normalize;
use crate::store::{ExtendedSearchParams, IcdStore};

const MAX_SCORING_TOKENS: usize = 5;

/// Tokens of length ≥ 4 used for admission/scoring, capped at
/// [`MAX_SCORING_TOKENS`] (§4.4). A trailing token still being typed (no
/// trailing space, and short) is excluded — which the length filter
/// already guarantees, since a short token never qualifies regardless of
/// position. `query_ends_with_space` is kept on the signature for callers
/// that track caller-side typing state even though it does not change
/// which tokens qualify today.
pub fn scoring_tokens(normalized_query: &str, _query_ends_with_space: bool) -> Vec<String> {
    let tokens: Vec<&str> = normalize::tokenize_normalized(normalized_query);
    let mut candidates: Vec<&str> = tokens.into_iter().filter(|t| t.len() >= 4).collect();
    candidates.truncate(MAX_SCORING_TOKENS);
    candidates.into_iter().map(|s| s.to_string()).collect()
}

fn min_hits_for(token_count: usize, relaxed: bool) -> usize {
    if token_count >= 2 {
        if relaxed {
            1
        } else {
            2
        }
    } else {
        1
    }
}

/// Runs one retrieval attempt against the extended store and, on store
/// failure, falls back to the code-only path (§4.4 Failure handling).
pub fn retrieve_once(
    store: &dyn IcdStore,
    config: &Config,
    normalized_query: &str,
    query_is_code: bool,
    tags_filter: Option<Vec<String>>,
    relaxed_min_hits: bool,
    candidate_limit: usize,
) -> Vec<Candidate> {
    let tokens = if query_is_code {
        Vec::new()
    } else {
        scoring_tokens(normalized_query, false)
    };
    let use_similarity = store.supports_trigrams()
        && !query_is_code
        && normalized_query.chars().filter(|c| !c.is_whitespace()).count() >= 3;

    let params = ExtendedSearchParams {
        query: normalized_query.to_string(),
        scoring_tokens: tokens.clone(),
        query_is_code,
        use_similarity,
        similarity_threshold: config.tuning.similarity_threshold,
        min_token_hits: min_hits_for(tokens.len(), relaxed_min_hits),
        tags_filter,
        limit: candidate_limit,
    };

    match store.extended_search(&params) {
        Ok(candidates) => candidates,
        Err(primary_err) => {
            tracing::warn!(error = %primary_err, "primary extended retrieval failed, falling back to code-only search");
            match store.extended_search_code_only(normalized_query, candidate_limit) {
                Ok(candidates) => candidates,
                Err(fallback_err) => {
                    tracing::error!(error = %fallback_err, "code-only fallback also failed");
                    Vec::new()
                }
            }
        }
    }
}

/// Merges candidates that share a `code` across multiple retrieval
/// sources: OR boolean signals, take the max of continuous signals, and
/// never double-count a score (§9 Candidate deduplication).
pub fn merge_candidates(candidates: Vec<Candidate>) -> Vec<Candidate> {
    let mut by_code: Vec<Candidate> = Vec::new();
    for c in candidates {
        if let Some(existing) = by_code.iter_mut().find(|e| e.code == c.code) {
            existing.exact_code_match |= c.exact_code_match;
            existing.prefix_match |= c.prefix_match;
            existing.description_match |= c.description_match;
            existing.similarity = existing.similarity.max(c.similarity);
            existing.priority = existing.priority.max(c.priority);
            existing.token_hit_count = existing.token_hit_count.max(c.token_hit_count);
            existing.global_frequency = existing.global_frequency.max(c.global_frequency);
            existing.user_frequency = existing.user_frequency.max(c.user_frequency);
            if existing.tags.is_empty() {
                existing.tags = c.tags;
            }
            if matches!(c.source, ResultSource::Icd10Extended) {
                existing.source = ResultSource::Icd10Extended;
            }
        } else {
            by_code.push(c);
        }
    }
    by_code
}

/// Augments candidates with usage-frequency counters read from the search
/// log (SPEC_FULL §F.4).
pub fn attach_usage_stats(
    store: &dyn IcdStore,
    candidates: &mut [Candidate],
    user_id: Option<&str>,
) -> Result<(), StoreError> {
    if candidates.is_empty() {
        return Ok(());
    }
    let codes: Vec<String> = candidates.iter().map(|c| c.code.clone()).collect();
    let stats = store.usage_stats(&codes, user_id)?;
    for candidate in candidates.iter_mut() {
        if let Some(s) = stats.get(&candidate.code.to_uppercase()) {
            candidate.global_frequency = s.global_frequency;
            candidate.user_frequency = s.user_frequency;
        }
    }
    Ok(())
}

/// Pulls in curated-dictionary synonym matches and folds them into the
/// candidate pool as preferred codes to retrieve from the extended table
/// (§4.3 `dictionary_synonyms`, §9 Dictionary-priority-weighted merge).
pub fn dictionary_preferred_codes(
    store: &dyn IcdStore,
    normalized_query: &str,
    tokens: &[String],
) -> Vec<String> {
    let exact = store.dictionary_exact(normalized_query).unwrap_or_default();
    if !exact.is_empty() {
        return exact.into_iter().map(|e| e.icd10_code).collect();
    }
    store
        .dictionary_synonyms(normalized_query, tokens, &[], 10)
        .unwrap_or_default()
        .into_iter()
        .map(|e| e.icd10_code)
        .collect()
}

/// Wraps a resolved `icd10_extended` row as a candidate when the code was
/// reached through a side channel (curated dictionary, root expansion)
/// rather than `extended_search`'s own WHERE match.
pub fn extended_row_to_candidate(
    row: IcdExtendedRow,
    exact_code_match: bool,
    prefix_match: bool,
) -> Candidate {
    Candidate {
        code: row.code,
        description: row.description,
        description_normalized: row.description_normalized,
        search_text: row.search_text,
        similarity: 0.0,
        priority: row.priority,
        tags: row.tags,
        exact_code_match,
        prefix_match,
        description_match: !exact_code_match && !prefix_match,
        token_hit_count: 0,
        global_frequency: 0,
        user_frequency: 0,
        source: ResultSource::Icd10Extended,
    }
}

/// Fuses curated-dictionary term matches into the candidate pool: resolves
/// `dictionary_exact`/`dictionary_synonyms` hits to their ICD-10 rows via
/// `codes_by_codes` (§1 "never silently returns empty when candidates
/// exist", §4.3/§4.4; original `search_service.py:48-86`). Without this, a
/// query whose only hit lives in `clinical_dictionary` and not in any
/// extended row's `search_text` would retrieve nothing.
pub fn dictionary_candidates(
    store: &dyn IcdStore,
    normalized_query: &str,
    tokens: &[String],
) -> Vec<Candidate> {
    let codes = dictionary_preferred_codes(store, normalized_query, tokens);
    if codes.is_empty() {
        return Vec::new();
    }
    match store.codes_by_codes(&codes) {
        Ok(rows) => rows
            .into_iter()
            .map(|row| extended_row_to_candidate(row, false, false))
            .collect(),
        Err(e) => {
            tracing::warn!(error = %e, "dictionary-resolved code lookup failed");
            Vec::new()
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::classify::is_code_query;
    use crate::store::sqlite::SqliteStore;

    fn store_with_fixtures() -> SqliteStore {
        let store = SqliteStore::open_in_memory().unwrap();
        store
    }

    #[test]
    fn scoring_tokens_excludes_short_tokens_and_caps_at_five() {
        let tokens = scoring_tokens("dolor cronico intenso muy fuerte persistente adicional", false);
        assert!(tokens.len() <= 5);
        assert!(tokens.iter().all(|t| t.len() >= 4));
    }

    #[test]
    fn min_hits_relaxes_from_two_to_one() {
        assert_eq!(min_hits_for(3, false), 2);
        assert_eq!(min_hits_for(3, true), 1);
        assert_eq!(min_hits_for(1, false), 1);
    }

    #[test]
    fn merge_candidates_ors_booleans_and_maxes_continuous_signals() {
        let a = Candidate {
            code: "E11".into(),
            description: "d".into(),
            description_normalized: "d".into(),
            search_text: "".into(),
            similarity: 0.2,
            priority: 0.6,
            tags: "".into(),
            exact_code_match: true,
            prefix_match: false,
            description_match: false,
            token_hit_count: 1,
            global_frequency: 0,
            user_frequency: 0,
            source: ResultSource::Icd10Extended,
        };
        let b = Candidate {
            similarity: 0.8,
            prefix_match: true,
            token_hit_count: 3,
            ..a.clone()
        };
        let merged = merge_candidates(vec![a, b]);
        assert_eq!(merged.len(), 1);
        assert!(merged[0].exact_code_match);
        assert!(merged[0].prefix_match);
        assert_eq!(merged[0].similarity, 0.8);
        assert_eq!(merged[0].token_hit_count, 3);
    }

    #[test]
    fn retrieve_once_falls_back_to_code_only_on_store_error() {
        let store = store_with_fixtures();
        let config = Config::from_env();
        let is_code = is_code_query("E11");
        let results = retrieve_once(&store, &config, "E11", is_code, None, false, 40);
        assert!(results.is_empty() || results.iter().all(|c| c.code.starts_with('E')));
    }

    #[test]
    fn dictionary_candidates_resolves_terms_absent_from_extended_search_text() {
        let store = SqliteStore::open_in_memory().unwrap();
        store.seed_for_test(
            "INSERT INTO icd10_extended (code, description, description_normalized, search_text, priority, tags) \
             VALUES ('I10', 'Hipertension esencial', 'hipertension esencial', 'hipertension', 'high', 'cardiometabolic'); \
             INSERT INTO clinical_dictionary (term, icd10_code, priority, created_at) \
             VALUES ('hta', 'I10', 9, '2024-01-01T00:00:00Z');",
        );
        let candidates = dictionary_candidates(&store, "hta", &["hta".to_string()]);
        assert!(candidates.iter().any(|c| c.code == "I10"));
    }

    #[test]
    fn dictionary_candidates_is_empty_without_a_dictionary_hit() {
        let store = SqliteStore::open_in_memory().unwrap();
        let candidates = dictionary_candidates(&store, "xqxq", &["xqxq".to_string()]);
        assert!(candidates.is_empty());
    }
}
