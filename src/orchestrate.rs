//! End-to-end pipeline driver: retry plan, limits, post-processing
//! grouping, and structured event emission (C6, §4.6).

use std::time::Instant;

use crate::classify;
use crate::config::Config;
use crate::model::{Candidate, RankedResult, ResultSource, SearchEvent};
use crate::normalize;
use crate::rank;
use crate::retrieve;
use crate::selection::SearchLogWriter;
use crate::store::IcdStore;

/// Drops whitespace and dots, uppercases — the shape code-identity
/// comparisons are made in throughout this module.
fn compact_code(s: &str) -> String {
    s.chars()
        .filter(|c| !c.is_whitespace() && *c != '.')
        .collect::<String>()
        .to_uppercase()
}

/// Clinically curated query-variant expansion (§4.6). Always includes the
/// base normalized query first; deduplicates while preserving order.
fn expand_variants(normalized_query: &str) -> Vec<String> {
    let tokens: Vec<&str> = normalize::tokenize_normalized(normalized_query);
    let mut variants = vec![normalized_query.to_string()];

    let has_dolor = tokens.contains(&"dolor");
    let has_cabe_prefix = tokens.iter().any(|t| t.starts_with("cabe"));
    if has_dolor && has_cabe_prefix {
        // accent-fold the curated variants the same way every other query is
        variants.push(normalize::normalize("cefalea"));
        variants.push(normalize::normalize("migraña"));
    }

    let mut seen = std::collections::HashSet::new();
    variants
        .into_iter()
        .filter(|v| seen.insert(v.clone()))
        .collect()
}

/// Drives one search request end-to-end: NORMALIZE → CLASSIFY → RETRIEVE
/// (with retry plan) → RANK → POSTPROCESS → EMIT.
pub struct SearchOrchestrator<'a> {
    store: &'a dyn IcdStore,
    config: &'a Config,
    log_writer: &'a SearchLogWriter<'a>,
}

impl<'a> SearchOrchestrator<'a> {
    pub fn new(
        store: &'a dyn IcdStore,
        config: &'a Config,
        log_writer: &'a SearchLogWriter<'a>,
    ) -> Self {
        Self {
            store,
            config,
            log_writer,
        }
    }

    /// Executes the full pipeline for one query, returning at most
    /// `limit` ranked results. Never panics; a search-log write failure
    /// is logged and suppressed.
    pub fn search(
        &self,
        query_raw: &str,
        limit: usize,
        user_id: Option<&str>,
        tags_filter: Option<Vec<String>>,
    ) -> Vec<RankedResult> {
        let started = Instant::now();
        let trimmed = query_raw.trim();
        if trimmed.is_empty() {
            self.emit_event(query_raw, "", None, "none", 0, 0, started, None, None);
            return Vec::new();
        }

        let effective_limit = limit.clamp(1, self.config.tuning.max_limit.max(1));
        let candidate_limit = effective_limit * self.config.tuning.candidate_multiplier.max(1);

        let query_is_code = classify::is_code_query(trimmed);
        let (results, source, candidate_count, intent, normalized_query) = if query_is_code {
            let normalized = normalize::normalize_icd_input(trimmed);
            let (candidates, source) =
                self.code_query_candidates(&normalized, tags_filter, candidate_limit);
            let candidate_count = candidates.len();
            let ranked = rank::rank(candidates, self.config, None, None);
            (ranked, source, candidate_count, None, normalized)
        } else {
            self.retrieve_with_retry_plan(trimmed, tags_filter, candidate_limit, user_id)
        };

        let mut results = results;
        results.truncate(effective_limit);
        let results = self.group_parent_children(results, effective_limit);

        let top = results.first();
        self.emit_event(
            query_raw,
            &normalized_query,
            intent.as_deref(),
            source,
            candidate_count,
            results.len(),
            started,
            top.map(|r| r.code.clone()),
            top.map(|r| r.score),
        );

        self.log_writer
            .write_search_event(query_raw, &normalized_query, &normalized_query, user_id, None);

        results
    }

    fn retrieve_with_retry_plan(
        &self,
        trimmed_query: &str,
        tags_filter: Option<Vec<String>>,
        candidate_limit: usize,
        user_id: Option<&str>,
    ) -> (Vec<RankedResult>, &'static str, usize, Option<String>, String) {
        let normalized_query = normalize::normalize_for_nl(trimmed_query);
        let intent = if self.config.flags.enable_intent_detection {
            classify::detect_intent(&normalized_query, &self.config.intent_keywords)
        } else {
            None
        };
        let anatomical_system = self.store.ontology_detect(&normalized_query).ok().flatten();

        let variants = expand_variants(&normalized_query);

        // Curated-dictionary synonyms (e.g. "hta" -> I10) resolved once up
        // front: a term that lives only in `clinical_dictionary`, not in
        // any extended row's `search_text`, must still surface results
        // rather than silently returning empty (§1).
        let scoring_tokens = retrieve::scoring_tokens(&normalized_query, false);
        let dictionary_candidates =
            retrieve::dictionary_candidates(self.store, &normalized_query, &scoring_tokens);

        // Attempt 1..N: base query, then each expanded variant, default min_hits.
        for variant in &variants {
            let mut candidates = retrieve::retrieve_once(
                self.store,
                self.config,
                variant,
                false,
                tags_filter.clone(),
                false,
                candidate_limit,
            );
            if !dictionary_candidates.is_empty() {
                candidates.extend(dictionary_candidates.clone());
            }
            if !candidates.is_empty() {
                candidates = retrieve::merge_candidates(candidates);
                let _ = retrieve::attach_usage_stats(self.store, &mut candidates, user_id);
                let candidate_count = candidates.len();
                let ranked = rank::rank(
                    candidates,
                    self.config,
                    intent.as_deref(),
                    anatomical_system.as_deref(),
                );
                return (
                    ranked,
                    "icd10_extended",
                    candidate_count,
                    intent,
                    normalized_query,
                );
            }
        }

        // Attempt N+1: relax min_hits to 1 on the base query.
        let mut relaxed = retrieve::retrieve_once(
            self.store,
            self.config,
            &normalized_query,
            false,
            tags_filter,
            true,
            candidate_limit,
        );
        if !dictionary_candidates.is_empty() {
            relaxed.extend(dictionary_candidates.clone());
        }
        if !relaxed.is_empty() {
            relaxed = retrieve::merge_candidates(relaxed);
            let _ = retrieve::attach_usage_stats(self.store, &mut relaxed, user_id);
            let candidate_count = relaxed.len();
            let ranked = rank::rank(
                relaxed,
                self.config,
                intent.as_deref(),
                anatomical_system.as_deref(),
            );
            return (
                ranked,
                "icd10_extended",
                candidate_count,
                intent,
                normalized_query,
            );
        }

        (Vec::new(), "none", 0, intent, normalized_query)
    }

    /// Candidate pool for a code query (§4.3/§4.9): primary retrieval
    /// against `icd10_extended`, supplemented with any root children
    /// `extended_search`'s own LIMIT might have cut off, and — when the
    /// extended table has no row for this code at all, or
    /// `use_extended_icd10` is turned off — a fallback to the legacy
    /// `icd10` base table (spec §3: "used as fallback when the extended
    /// row is missing").
    fn code_query_candidates(
        &self,
        normalized: &str,
        tags_filter: Option<Vec<String>>,
        limit: usize,
    ) -> (Vec<Candidate>, &'static str) {
        if !self.config.flags.use_extended_icd10 {
            return (self.base_table_candidates(normalized, limit), "icd10");
        }

        let mut candidates = retrieve::retrieve_once(
            self.store,
            self.config,
            normalized,
            true,
            tags_filter,
            false,
            limit,
        );

        let compact = compact_code(normalized);
        if compact.len() >= 3 {
            match self.store.extended_expand_root(normalized, limit) {
                Ok(children) => {
                    let extra: Vec<Candidate> = children
                        .into_iter()
                        .map(|row| retrieve::extended_row_to_candidate(row, false, true))
                        .collect();
                    if !extra.is_empty() {
                        candidates.extend(extra);
                        candidates = retrieve::merge_candidates(candidates);
                    }
                }
                Err(e) => tracing::warn!(error = %e, "extended_expand_root failed"),
            }
        }

        let extended_row_present = matches!(self.store.extended_lookup(normalized), Ok(Some(_)));
        if !candidates.is_empty() || extended_row_present {
            (candidates, "icd10_extended")
        } else {
            (self.base_table_candidates(normalized, limit), "icd10")
        }
    }

    /// Builds candidates from the legacy `icd10` base table, deriving
    /// `exact_code_match`/`prefix_match` from the compact code shape since
    /// `base_search` itself returns plain rows (§3 base-row fallback).
    fn base_table_candidates(&self, normalized: &str, limit: usize) -> Vec<Candidate> {
        let rows = match self.store.base_search(normalized, limit) {
            Ok(rows) => rows,
            Err(e) => {
                tracing::warn!(error = %e, "base table fallback search failed");
                return Vec::new();
            }
        };
        let compact_query = compact_code(normalized);
        rows.into_iter()
            .map(|row| {
                let compact_row_code = compact_code(&row.code);
                let exact = compact_row_code == compact_query;
                let prefix = !exact && compact_row_code.starts_with(&compact_query);
                Candidate {
                    code: row.code,
                    description: row.description,
                    description_normalized: String::new(),
                    search_text: row.search_terms.unwrap_or_default(),
                    similarity: 0.0,
                    priority: 0.0,
                    tags: String::new(),
                    exact_code_match: exact,
                    prefix_match: prefix,
                    description_match: !exact && !prefix,
                    token_hit_count: 0,
                    global_frequency: 0,
                    user_frequency: 0,
                    source: ResultSource::Icd10,
                }
            })
            .collect()
    }

    /// If the top results contain a 3-character parent code and a child
    /// of the form `XXX.*`, re-order so each parent is immediately
    /// followed by its children in score order, preserving relative order
    /// of unrelated entries, without changing the result count (§4.6).
    fn group_parent_children(
        &self,
        results: Vec<RankedResult>,
        effective_limit: usize,
    ) -> Vec<RankedResult> {
        let has_parent = results.iter().any(|r| r.code.len() == 3);
        let has_child = results.iter().any(|r| r.code.len() > 3 && r.code.contains('.'));
        if !has_parent || !has_child {
            return results;
        }

        let original_len = results.len();
        let mut remaining: Vec<RankedResult> = results;
        let mut grouped: Vec<RankedResult> = Vec::with_capacity(remaining.len());

        while !remaining.is_empty() {
            let next = remaining.remove(0);
            let is_parent = next.code.len() == 3;
            if is_parent {
                let parent_code = next.code.clone();
                grouped.push(next);
                let mut i = 0;
                while i < remaining.len() {
                    if remaining[i].code.starts_with(&parent_code) && remaining[i].code.len() > 3 {
                        grouped.push(remaining.remove(i));
                    } else {
                        i += 1;
                    }
                }
            } else {
                grouped.push(next);
            }
        }

        debug_assert_eq!(grouped.len(), original_len);
        grouped.truncate(effective_limit);
        grouped
    }

    #[allow(clippy::too_many_arguments)]
    fn emit_event(
        &self,
        query_raw: &str,
        normalized_query: &str,
        intent: Option<&str>,
        source: &str,
        candidate_count: usize,
        result_count: usize,
        started: Instant,
        top_code: Option<String>,
        top_score: Option<f64>,
    ) {
        let duration_ms = started.elapsed().as_secs_f64() * 1000.0;
        let event = SearchEvent {
            query_raw: query_raw.to_string(),
            query_normalized: normalized_query.to_string(),
            intent: intent.map(|s| s.to_string()),
            source: source.to_string(),
            candidate_count,
            result_count,
            duration_ms,
            top_code,
            top_score,
        };
        tracing::info!(
            query_raw = %event.query_raw,
            query_normalized = %event.query_normalized,
            intent = ?event.intent,
            source = %event.source,
            candidate_count = event.candidate_count,
            result_count = event.result_count,
            duration_ms = event.duration_ms,
            top_code = ?event.top_code,
            top_score = ?event.top_score,
            "clinical search completed"
        );
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn expand_variants_includes_base_and_headache_synonyms() {
        let variants = expand_variants("dolor cabeza");
        assert!(variants.contains(&"dolor cabeza".to_string()));
        assert!(variants.iter().any(|v| v == "cefalea"));
        assert!(variants.iter().any(|v| v.contains("migra")));
    }

    #[test]
    fn expand_variants_deduplicates_preserving_order() {
        let variants = expand_variants("dolor cabeza cabeza");
        let mut seen = std::collections::HashSet::new();
        for v in &variants {
            assert!(seen.insert(v.clone()), "duplicate variant: {v}");
        }
        assert_eq!(variants[0], "dolor cabeza cabeza");
    }

    #[test]
    fn expand_variants_is_unchanged_for_unrelated_queries() {
        let variants = expand_variants("diabetes tipo 2");
        assert_eq!(variants, vec!["diabetes tipo 2".to_string()]);
    }
}
