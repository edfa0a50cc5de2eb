//! Crate-wide error taxonomy. One enum per architectural seam, matching
//! spec §7: retrieval failures degrade locally, selection-write failures
//! are surfaced because they represent lost user intent.

use thiserror::Error;

/// Errors surfaced by an [`crate::store::IcdStore`] implementation.
#[derive(Error, Debug)]
pub enum StoreError {
    #[error("sqlite error: {0}")]
    Sqlite(#[from] rusqlite::Error),

    #[error("entity not found: {entity_type} with id {id}")]
    NotFound { entity_type: String, id: String },

    #[error("migration failed at version {version}: {reason}")]
    MigrationFailed { version: i64, reason: String },

    #[error("schema mismatch in {table}: {detail}")]
    SchemaMismatch { table: String, detail: String },
}

/// Internal taxonomy used while a search request is in flight. None of
/// these variants are ever returned from [`crate::orchestrate::SearchOrchestrator::search`] —
/// they degrade to a code-only fallback or an empty result set, and are
/// only used to label what happened for the structured event log.
#[derive(Error, Debug)]
pub enum SearchError {
    #[error("primary retrieval failed: {0}")]
    RetrievalFailure(String),

    #[error("code-only fallback also failed: {0}")]
    FallbackFailure(String),

    #[error("search log write failed: {0}")]
    LogWriteFailure(String),
}

/// Errors surfaced by the explicit-selection write path (§4.7). These
/// *are* returned to the caller: a lost selection is a lost clinical
/// decision, not an advisory signal.
#[derive(Error, Debug)]
pub enum SelectionError {
    #[error("validation failed: {0}")]
    Validation(String),

    #[error("icd10 code not found: {0}")]
    CodeNotFound(String),

    #[error("selection write failed: {0}")]
    WriteFailed(#[from] StoreError),
}

/// Malformed environment values never escape `config::Config::from_env`;
/// this type exists only so the fallback-to-default path has something
/// concrete to log.
#[derive(Error, Debug)]
pub enum ConfigError {
    #[error("invalid value for {key}: {value}")]
    Invalid { key: String, value: String },
}
