//! Startup validation: ICD-10 population, dictionary schema, search-text
//! coverage (C9, §4.9). Never aborts startup — every failure is logged.

use std::env;

use crate::model::DictionaryEntry;
use crate::store::IcdStore;

const DEFAULT_MIN_COVERAGE: f64 = 0.85;

/// A curated seed entry for `clinical_dictionary`, supplied by the host
/// process (loading itself is out of scope, §1).
#[derive(Debug, Clone)]
pub struct SeedEntry {
    pub term: String,
    pub icd10_code: String,
    pub priority: i64,
}

/// Outcome of one bootstrap pass, for the host to log/expose.
#[derive(Debug, Clone, Default)]
pub struct BootstrapReport {
    pub icd10_loaded: bool,
    pub dictionary_schema_rebuilt: bool,
    pub dictionary_entries_seeded: usize,
    pub dictionary_entries_skipped: usize,
    pub search_text_coverage: f64,
    pub enrichment_needed: bool,
}

fn min_coverage_from_env() -> f64 {
    env::var("ICD10_EXTENDED_MIN_SEARCH_TEXT_COVERAGE")
        .ok()
        .and_then(|v| v.trim().parse::<f64>().ok())
        .unwrap_or(DEFAULT_MIN_COVERAGE)
}

/// Runs bootstrap checks once at process start. Every step is independent
/// and failures are absorbed so one broken check never blocks another.
pub fn bootstrap(store: &dyn IcdStore, seeds: &[SeedEntry]) -> BootstrapReport {
    let mut report = BootstrapReport::default();

    match store.count_icd10() {
        Ok(count) => report.icd10_loaded = count > 0,
        Err(e) => tracing::error!(error = %e, "bootstrap: failed to count icd10 rows"),
    }

    match store.clinical_dictionary_schema_ok() {
        Ok(true) => {}
        Ok(false) => {
            tracing::warn!("bootstrap: clinical_dictionary schema drift detected, rebuilding");
            if let Err(e) = store.rebuild_clinical_dictionary_schema() {
                tracing::error!(error = %e, "bootstrap: failed to rebuild clinical_dictionary schema");
            } else {
                report.dictionary_schema_rebuilt = true;
            }
        }
        Err(e) => tracing::error!(error = %e, "bootstrap: failed to inspect clinical_dictionary schema"),
    }

    for seed in seeds {
        let entry = DictionaryEntry {
            term: seed.term.clone(),
            icd10_code: seed.icd10_code.clone(),
            priority: seed.priority,
        };
        match store.seed_dictionary_entry(&entry) {
            Ok(true) => report.dictionary_entries_seeded += 1,
            Ok(false) => {
                report.dictionary_entries_skipped += 1;
                tracing::warn!(term = %seed.term, code = %seed.icd10_code, "bootstrap: skipping seed entry, icd10 code not present");
            }
            Err(e) => {
                report.dictionary_entries_skipped += 1;
                tracing::error!(error = %e, term = %seed.term, "bootstrap: failed to seed dictionary entry");
            }
        }
    }

    match store.search_text_coverage() {
        Ok(coverage) => {
            let ratio = coverage.search_text_coverage_ratio();
            report.search_text_coverage = ratio;
            let min_coverage = min_coverage_from_env();
            if ratio < min_coverage {
                report.enrichment_needed = true;
                tracing::warn!(
                    coverage = ratio,
                    min_coverage,
                    "bootstrap: icd10_extended search_text coverage below threshold, enrichment needed"
                );
            }
        }
        Err(e) => tracing::error!(error = %e, "bootstrap: failed to compute search_text coverage"),
    }

    report
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::store::sqlite::SqliteStore;

    #[test]
    fn bootstrap_never_panics_on_empty_store() {
        let store = SqliteStore::open_in_memory().unwrap();
        let report = bootstrap(&store, &[]);
        assert!(!report.icd10_loaded);
    }

    #[test]
    fn bootstrap_detects_loaded_icd10_and_seeds_valid_entries() {
        let store = SqliteStore::open_in_memory().unwrap();
        store.seed_for_test(
            "INSERT INTO icd10_extended (code, description, description_normalized, search_text, priority, tags) \
             VALUES ('E11', 'Diabetes mellitus tipo 2', 'diabetes mellitus tipo 2', 'diabetes', 'high', 'cardiometabolic');",
        );
        let seeds = vec![
            SeedEntry { term: "diabetes tipo 2".to_string(), icd10_code: "E11".to_string(), priority: 10 },
            SeedEntry { term: "enfermedad inexistente".to_string(), icd10_code: "Z999".to_string(), priority: 1 },
        ];
        let report = bootstrap(&store, &seeds);
        assert!(report.icd10_loaded);
        assert_eq!(report.dictionary_entries_seeded, 1);
        assert_eq!(report.dictionary_entries_skipped, 1);
    }

    #[test]
    fn bootstrap_flags_low_search_text_coverage() {
        let store = SqliteStore::open_in_memory().unwrap();
        store.seed_for_test(
            "INSERT INTO icd10_extended (code, description, description_normalized, search_text, priority, tags) VALUES
             ('A00', 'Cholera', 'cholera', 'cholera', '', ''),
             ('A01', 'Typhoid', 'typhoid', '', '', ''),
             ('A02', 'Salmonella', 'salmonella', '', '', '');",
        );
        let report = bootstrap(&store, &[]);
        assert!(report.enrichment_needed);
        assert!(report.search_text_coverage < DEFAULT_MIN_COVERAGE);
    }

    #[test]
    fn bootstrap_rebuilds_drifted_dictionary_schema() {
        let store = SqliteStore::open_in_memory().unwrap();
        store.seed_for_test(
            "DROP TABLE clinical_dictionary; CREATE TABLE clinical_dictionary (term_raw TEXT, category TEXT);",
        );
        let report = bootstrap(&store, &[]);
        assert!(report.dictionary_schema_rebuilt);
        assert!(store.clinical_dictionary_schema_ok().unwrap());
    }
}
