//! Shared row, candidate, and result types (spec §3).

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

/// Where a [`RankedResult`] was ultimately sourced from.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ResultSource {
    Icd10Extended,
    Icd10,
}

impl ResultSource {
    pub fn as_str(&self) -> &'static str {
        match self {
            ResultSource::Icd10Extended => "icd10_extended",
            ResultSource::Icd10 => "icd10",
        }
    }
}

/// A row from the extended ICD-10 table (`icd10_extended`).
#[derive(Debug, Clone, PartialEq)]
pub struct IcdExtendedRow {
    pub code: String,
    pub description: String,
    pub description_normalized: String,
    pub search_text: String,
    pub priority: f64,
    pub tags: String,
}

/// A row from the legacy/base ICD-10 table (`icd10`), used as a fallback
/// when the extended row is missing.
#[derive(Debug, Clone, PartialEq)]
pub struct IcdBaseRow {
    pub code: String,
    pub description: String,
    pub search_terms: Option<String>,
}

/// A curated Spanish term → ICD-10 code mapping (`clinical_dictionary`).
#[derive(Debug, Clone, PartialEq)]
pub struct DictionaryEntry {
    pub term: String,
    pub icd10_code: String,
    pub priority: i64,
}

/// An anatomical ontology vocabulary entry (`clinical_ontology`).
#[derive(Debug, Clone, PartialEq)]
pub struct OntologyEntry {
    pub term: String,
    pub normalized_term: String,
    pub system: String,
    pub organ: Option<String>,
    pub functional_group: Option<String>,
    pub related_prefix: Option<String>,
    pub weight: f64,
}

/// Per-code usage counters read from the search/selection log.
#[derive(Debug, Clone, Copy, Default, PartialEq)]
pub struct UsageStats {
    pub global_frequency: i64,
    pub user_frequency: i64,
}

/// An append-only search- or selection-log entry (`search_logs`).
#[derive(Debug, Clone, PartialEq)]
pub struct SearchLogEntry {
    pub id: i64,
    pub user_id: Option<String>,
    pub session_id: Option<String>,
    pub query: String,
    pub normalized_query: String,
    pub selected_term: String,
    pub selected_icd: Option<String>,
    pub specialty: Option<String>,
    pub created_at: DateTime<Utc>,
}

/// A candidate row produced by the retriever (C4), carrying the raw
/// signals the ranking engine (C5) needs. Internal to the pipeline —
/// never returned to callers directly.
#[derive(Debug, Clone, PartialEq)]
pub struct Candidate {
    pub code: String,
    pub description: String,
    pub description_normalized: String,
    pub search_text: String,
    pub similarity: f64,
    pub priority: f64,
    pub tags: String,
    pub exact_code_match: bool,
    pub prefix_match: bool,
    pub description_match: bool,
    pub token_hit_count: u32,
    pub global_frequency: i64,
    pub user_frequency: i64,
    pub source: ResultSource,
}

/// The continuous and boolean signals that produced a result's score.
#[derive(Debug, Clone, Copy, Default, PartialEq, Serialize, Deserialize)]
pub struct MatchFeatures {
    pub exact_code: bool,
    pub prefix_code: bool,
    pub description_match: bool,
    pub similarity: f64,
    pub priority: f64,
    pub intent_aligned: bool,
    pub tag_matched: bool,
}

/// A single ranked, explainable ICD-10 search result.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct RankedResult {
    pub code: String,
    pub label: String,
    pub score: f64,
    pub source: ResultSource,
    pub match_features: MatchFeatures,
    pub explanation: String,
}

/// Structured event emitted after every search request (§4.6).
#[derive(Debug, Clone, PartialEq)]
pub struct SearchEvent {
    pub query_raw: String,
    pub query_normalized: String,
    pub intent: Option<String>,
    pub source: String,
    pub candidate_count: usize,
    pub result_count: usize,
    pub duration_ms: f64,
    pub top_code: Option<String>,
    pub top_score: Option<f64>,
}

/// Parameters for an explicit code selection (`POST /icd10/select`, §4.7).
#[derive(Debug, Clone)]
pub struct NewSelection {
    pub original_query: String,
    pub normalized_query: String,
    pub selected_icd: String,
    pub user_id: Option<String>,
    pub session_id: Option<String>,
}

/// Response for a successful explicit selection.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct SelectionResponse {
    pub success: bool,
    pub message: String,
    pub selected_icd: String,
    pub timestamp: DateTime<Utc>,
}

/// `search_text` / `description_normalized` coverage stats used by Bootstrap (C9).
#[derive(Debug, Clone, Copy, Default, PartialEq)]
pub struct CoverageStats {
    pub total: i64,
    pub empty_search_text: i64,
    pub empty_description_normalized: i64,
}

impl CoverageStats {
    pub fn search_text_coverage_ratio(&self) -> f64 {
        if self.total <= 0 {
            return 0.0;
        }
        (self.total - self.empty_search_text) as f64 / self.total as f64
    }
}
