//! The narrow read/write interface the rest of the pipeline depends on
//! (C3, §4.3). Grounded in the teacher's `db/repository::Repository<T, F>`
//! trait: one method per operation, no leakage of SQL or connection
//! details across the boundary.

pub mod sqlite;

use std::collections::HashMap;

use crate::error::StoreError;
use crate::model::{
    Candidate, CoverageStats, DictionaryEntry, IcdBaseRow, IcdExtendedRow, NewSelection,
    UsageStats,
};

/// Parameters for [`IcdStore::extended_search`]. Built by the retriever
/// (C4) from a classified, normalized query.
#[derive(Debug, Clone)]
pub struct ExtendedSearchParams {
    /// Normalized natural-language query, or the compact uppercased code
    /// when `query_is_code` is true.
    pub query: String,
    /// Scoring tokens (length ≥ 4, trailing-incomplete-token excluded,
    /// capped at 5) — empty for code queries.
    pub scoring_tokens: Vec<String>,
    pub query_is_code: bool,
    pub use_similarity: bool,
    pub similarity_threshold: f64,
    pub min_token_hits: usize,
    pub tags_filter: Option<Vec<String>>,
    pub limit: usize,
}

/// Read-only (plus append-only log writes) interface over
/// `icd10_extended`, `icd10`, `clinical_dictionary`, `clinical_ontology`,
/// and `search_logs`. Implementations never leak raw rows — every method
/// returns a typed value from [`crate::model`].
pub trait IcdStore: Send + Sync {
    /// Whether this store can compute trigram similarity natively. When
    /// false, candidates from this store always carry `similarity = 0.0`.
    fn supports_trigrams(&self) -> bool;

    fn extended_search(&self, params: &ExtendedSearchParams) -> Result<Vec<Candidate>, StoreError>;

    /// Code-only fallback used when `extended_search` fails (§4.4 Failure
    /// handling): exact-or-prefix on `code` only, no similarity.
    fn extended_search_code_only(
        &self,
        compact_query: &str,
        limit: usize,
    ) -> Result<Vec<Candidate>, StoreError>;

    fn extended_lookup(&self, code: &str) -> Result<Option<IcdExtendedRow>, StoreError>;

    /// Children of a ≥3-character root, ordered `priority desc, code asc`.
    fn extended_expand_root(
        &self,
        root: &str,
        limit: usize,
    ) -> Result<Vec<IcdExtendedRow>, StoreError>;

    fn base_search(&self, query: &str, limit: usize) -> Result<Vec<IcdBaseRow>, StoreError>;

    fn dictionary_exact(&self, normalized_query: &str) -> Result<Vec<DictionaryEntry>, StoreError>;

    fn dictionary_synonyms(
        &self,
        normalized_query: &str,
        tokens: &[String],
        preferred_codes: &[String],
        limit: usize,
    ) -> Result<Vec<DictionaryEntry>, StoreError>;

    fn codes_by_codes(&self, codes: &[String]) -> Result<Vec<IcdExtendedRow>, StoreError>;

    /// First anatomical `system` whose normalized term appears as a
    /// substring of `normalized_query`, if any.
    fn ontology_detect(&self, normalized_query: &str) -> Result<Option<String>, StoreError>;

    fn usage_stats(
        &self,
        codes: &[String],
        user_id: Option<&str>,
    ) -> Result<HashMap<String, UsageStats>, StoreError>;

    fn insert_search_log(
        &self,
        query: &str,
        normalized_query: &str,
        selected_term: &str,
        user_id: Option<&str>,
        session_id: Option<&str>,
        specialty: Option<&str>,
    ) -> Result<(), StoreError>;

    fn insert_selection_log(&self, selection: &NewSelection) -> Result<(), StoreError>;

    fn icd10_exists(&self, code: &str) -> Result<bool, StoreError>;

    fn count_icd10(&self) -> Result<i64, StoreError>;

    fn search_text_coverage(&self) -> Result<CoverageStats, StoreError>;

    /// Does `clinical_dictionary` have the canonical columns
    /// (`id, term, icd10_code, priority, created_at`)?
    fn clinical_dictionary_schema_ok(&self) -> Result<bool, StoreError>;

    fn rebuild_clinical_dictionary_schema(&self) -> Result<(), StoreError>;

    /// Insert a dictionary entry, skipping it entirely if `icd10_code`
    /// does not exist (Bootstrap's seeding contract, §4.9). Idempotent on
    /// the `(term, icd10_code)` unique key. Returns `true` if the entry
    /// was inserted (or already present), `false` if it was skipped
    /// because `icd10_code` does not exist.
    fn seed_dictionary_entry(&self, entry: &DictionaryEntry) -> Result<bool, StoreError>;

    /// Suggestion history: `(selected_term, frequency)` pairs matching
    /// `query`, ordered by frequency desc, for `/search/suggest`.
    fn suggest(&self, query: &str, limit: usize) -> Result<Vec<(String, i64)>, StoreError>;
}
