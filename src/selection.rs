//! Append-only search/selection log writer (C7, §4.7).

use regex::Regex;
use std::sync::OnceLock;

use crate::error::SelectionError;
use crate::model::{NewSelection, SelectionResponse};
use crate::store::IcdStore;

fn selected_icd_re() -> &'static Regex {
    static RE: OnceLock<Regex> = OnceLock::new();
    RE.get_or_init(|| Regex::new(r"^[A-Z0-9][A-Z0-9\.]{1,9}$").expect("static regex"))
}

/// Writes both origination points of the search log: the implicit
/// per-request search event, and the explicit user-driven code selection.
pub struct SearchLogWriter<'a> {
    store: &'a dyn IcdStore,
    enabled: bool,
}

impl<'a> SearchLogWriter<'a> {
    pub fn new(store: &'a dyn IcdStore, enabled: bool) -> Self {
        Self { store, enabled }
    }

    /// Implicit search event: `selected_icd = null`, `selected_term =
    /// normalized_query`. Must not block or propagate a failure — errors
    /// are logged and swallowed (§4.7, §7 `LogWriteFailure`).
    pub fn write_search_event(
        &self,
        query: &str,
        normalized_query: &str,
        selected_term: &str,
        user_id: Option<&str>,
        session_id: Option<&str>,
    ) {
        if !self.enabled {
            return;
        }
        if let Err(e) =
            self.store
                .insert_search_log(query, normalized_query, selected_term, user_id, session_id, None)
        {
            tracing::warn!(error = %e, "search log write failed, continuing");
        }
    }

    /// Explicit selection write: validated, surfaced to the caller on
    /// failure (§4.7, §7 `SelectionWriteFailure`).
    pub fn write_selection(&self, selection: NewSelection) -> Result<SelectionResponse, SelectionError> {
        if selection.original_query.trim().is_empty() {
            return Err(SelectionError::Validation("original_query must not be empty".into()));
        }
        if selection.normalized_query.trim().is_empty() {
            return Err(SelectionError::Validation("normalized_query must not be empty".into()));
        }
        let selected_icd = selection.selected_icd.trim().to_uppercase();
        if !selected_icd_re().is_match(&selected_icd) {
            return Err(SelectionError::Validation(format!(
                "selected_icd '{selected_icd}' does not match the required code pattern"
            )));
        }

        let exists = self
            .store
            .icd10_exists(&selected_icd)
            .map_err(SelectionError::WriteFailed)?;
        if !exists {
            return Err(SelectionError::CodeNotFound(selected_icd));
        }

        let normalized_selection = NewSelection {
            selected_icd: selected_icd.clone(),
            ..selection
        };
        self.store
            .insert_selection_log(&normalized_selection)
            .map_err(SelectionError::WriteFailed)?;

        Ok(SelectionResponse {
            success: true,
            message: format!("selection recorded for {selected_icd}"),
            selected_icd,
            timestamp: chrono::Utc::now(),
        })
    }
}
