//! `rusqlite`-backed [`IcdStore`] implementation: migrations, two
//! registered scalar functions (`trgm_sim`, `priority_to_float`), and the
//! dynamic SQL the retriever's admission predicate needs.

use std::collections::HashMap;
use std::path::Path;
use std::sync::Mutex;

use chrono::Utc;
use rusqlite::functions::FunctionFlags;
use rusqlite::types::ToSql;
use rusqlite::Connection;

use crate::error::StoreError;
use crate::model::{
    Candidate, CoverageStats, DictionaryEntry, IcdBaseRow, IcdExtendedRow, NewSelection,
    ResultSource, UsageStats,
};
use crate::trigram;

use super::{ExtendedSearchParams, IcdStore};

/// Maps the raw `priority` column (numeric string, `"low"/"medium"/"high"`,
/// or empty) onto the `[0.0, 1.0]` contract from spec §3/§9.
pub fn priority_to_float(raw: &str) -> f64 {
    let trimmed = raw.trim();
    match trimmed.to_lowercase().as_str() {
        "" => 0.0,
        "low" => 0.2,
        "medium" => 0.6,
        "high" => 1.0,
        _ => trimmed.parse::<f64>().unwrap_or(0.0),
    }
}

fn register_functions(conn: &Connection) -> Result<(), StoreError> {
    conn.create_scalar_function(
        "trgm_sim",
        2,
        FunctionFlags::SQLITE_UTF8 | FunctionFlags::SQLITE_DETERMINISTIC,
        |ctx| {
            let a: String = ctx.get(0)?;
            let b: String = ctx.get(1)?;
            Ok(trigram::similarity(&a, &b))
        },
    )?;
    conn.create_scalar_function(
        "priority_to_float",
        1,
        FunctionFlags::SQLITE_UTF8 | FunctionFlags::SQLITE_DETERMINISTIC,
        |ctx| {
            let raw: String = ctx.get(0)?;
            Ok(priority_to_float(&raw))
        },
    )?;
    Ok(())
}

fn configure_pragmas(conn: &Connection) -> Result<(), StoreError> {
    conn.execute_batch("PRAGMA journal_mode=WAL; PRAGMA foreign_keys=ON;")?;
    Ok(())
}

fn get_current_version(conn: &Connection) -> i64 {
    conn.query_row("SELECT MAX(version) FROM schema_version", [], |row| {
        row.get::<_, i64>(0)
    })
    .unwrap_or(0)
}

fn run_migrations(conn: &Connection) -> Result<(), StoreError> {
    let current_version = get_current_version(conn);
    let migrations: Vec<(i64, &str)> = vec![(
        1,
        include_str!("../../resources/migrations/001_initial.sql"),
    )];
    for (version, sql) in migrations {
        if version > current_version {
            tracing::info!(version, "running clinical-core schema migration");
            conn.execute_batch(sql)
                .map_err(|e| StoreError::MigrationFailed {
                    version,
                    reason: e.to_string(),
                })?;
        }
    }
    Ok(())
}

/// `IcdStore` implementation backed by a single SQLite connection.
/// Wrapped in a `Mutex` so the store is `Send + Sync`: the pipeline holds
/// one connection per request (§5), so contention is limited to the
/// duration of a single query.
pub struct SqliteStore {
    conn: Mutex<Connection>,
}

impl SqliteStore {
    pub fn open(path: &Path) -> Result<Self, StoreError> {
        let conn = Connection::open(path)?;
        configure_pragmas(&conn)?;
        register_functions(&conn)?;
        run_migrations(&conn)?;
        Ok(Self {
            conn: Mutex::new(conn),
        })
    }

    pub fn open_in_memory() -> Result<Self, StoreError> {
        let conn = Connection::open_in_memory()?;
        configure_pragmas(&conn)?;
        register_functions(&conn)?;
        run_migrations(&conn)?;
        Ok(Self {
            conn: Mutex::new(conn),
        })
    }

    fn conn(&self) -> std::sync::MutexGuard<'_, Connection> {
        self.conn.lock().expect("clinical-core sqlite mutex poisoned")
    }

    /// Test-only fixture loader; real data arrives through the loaders
    /// spec §1 names as out-of-scope external collaborators.
    #[cfg(test)]
    pub(crate) fn seed_for_test(&self, sql: &str) {
        self.conn().execute_batch(sql).expect("test fixture SQL failed");
    }
}

fn compact_code(raw: &str) -> String {
    raw.chars()
        .filter(|c| !c.is_whitespace() && *c != '.')
        .collect::<String>()
        .to_uppercase()
}

fn row_to_candidate(row: &rusqlite::Row<'_>, source: ResultSource) -> rusqlite::Result<Candidate> {
    let priority_raw: String = row.get("priority")?;
    Ok(Candidate {
        code: row.get("code")?,
        description: row.get("description")?,
        description_normalized: row
            .get::<_, Option<String>>("description_normalized")?
            .unwrap_or_default(),
        search_text: row.get::<_, Option<String>>("search_text")?.unwrap_or_default(),
        similarity: row.get("similarity")?,
        priority: priority_to_float(&priority_raw),
        tags: row.get::<_, Option<String>>("tags")?.unwrap_or_default(),
        exact_code_match: row.get::<_, i64>("exact_code_match")? != 0,
        prefix_match: row.get::<_, i64>("prefix_match")? != 0,
        description_match: row.get::<_, i64>("description_match")? != 0,
        token_hit_count: row.get::<_, i64>("token_hit_count")? as u32,
        global_frequency: 0,
        user_frequency: 0,
        source,
    })
}

impl IcdStore for SqliteStore {
    fn supports_trigrams(&self) -> bool {
        true
    }

    fn extended_search(&self, params: &ExtendedSearchParams) -> Result<Vec<Candidate>, StoreError> {
        let conn = self.conn();
        let mut bind: Vec<Box<dyn ToSql>> = Vec::new();

        let (select_signals, where_expr, order_expr) = if params.query_is_code {
            let compact = compact_code(&params.query);
            bind.push(Box::new(compact.clone()));
            bind.push(Box::new(compact));
            let select = "CASE WHEN REPLACE(REPLACE(UPPER(code),'.',''),' ','') = ?1 THEN 1 ELSE 0 END AS exact_code_match, \
                CASE WHEN REPLACE(REPLACE(UPPER(code),'.',''),' ','') LIKE ?2 || '%' THEN 1 ELSE 0 END AS prefix_match, \
                0 AS description_match, 0.0 AS similarity, 0 AS token_hit_count"
                .to_string();
            let where_e = "(exact_code_match = 1 OR prefix_match = 1)".to_string();
            let order_e =
                "(3*exact_code_match + 2*prefix_match + 0.1*priority_to_float(priority)) DESC, code ASC"
                    .to_string();
            (select, where_e, order_e)
        } else {
            let q = params.query.clone();
            bind.push(Box::new(q.clone()));
            bind.push(Box::new(q.clone()));
            let desc_match_idx = bind.len();
            let mut select = format!(
                "0 AS exact_code_match, 0 AS prefix_match, \
                 CASE WHEN (description_normalized LIKE '%' || ?{a} || '%' OR search_text LIKE '%' || ?{b} || '%') THEN 1 ELSE 0 END AS description_match",
                a = desc_match_idx - 1,
                b = desc_match_idx,
            );

            if params.scoring_tokens.is_empty() {
                select.push_str(", 0 AS token_hit_count");
            } else {
                let mut parts = Vec::new();
                for token in &params.scoring_tokens {
                    bind.push(Box::new(token.clone()));
                    let i1 = bind.len();
                    bind.push(Box::new(token.clone()));
                    let i2 = bind.len();
                    parts.push(format!(
                        "(CASE WHEN (search_text LIKE '%' || ?{i1} || '%' OR description_normalized LIKE '%' || ?{i2} || '%') THEN 1 ELSE 0 END)"
                    ));
                }
                select.push_str(&format!(", ({}) AS token_hit_count", parts.join(" + ")));
            }

            if params.use_similarity {
                bind.push(Box::new(q.clone()));
                let s1 = bind.len();
                bind.push(Box::new(q.clone()));
                let s2 = bind.len();
                select.push_str(&format!(
                    ", MAX(trgm_sim(description_normalized, ?{s1}), trgm_sim(search_text, ?{s2})) AS similarity"
                ));
            } else {
                select.push_str(", 0.0 AS similarity");
            }

            let n = params.scoring_tokens.len();
            let threshold = params.similarity_threshold;
            let min_hits = params.min_token_hits;
            let where_e = if n >= 2 {
                format!(
                    "(description_match = 1 OR token_hit_count >= {min_hits} OR (similarity >= {threshold} AND token_hit_count >= {min_hits}))"
                )
            } else {
                format!("(description_match = 1 OR similarity >= {threshold})")
            };
            let order_e = "(3*exact_code_match + 2*prefix_match + 1.5*description_match + 0.8*token_hit_count + similarity + 0.1*priority_to_float(priority)) DESC, code ASC".to_string();
            (select, where_e, order_e)
        };

        let mut tag_clause = String::new();
        if let Some(tags) = &params.tags_filter {
            if !tags.is_empty() {
                let mut parts = Vec::new();
                for tag in tags {
                    bind.push(Box::new(tag.clone()));
                    parts.push(format!("tags LIKE '%' || ?{} || '%'", bind.len()));
                }
                tag_clause = format!(" AND ({})", parts.join(" OR "));
            }
        }

        let limit = params.limit as i64;
        bind.push(Box::new(limit));
        let limit_idx = bind.len();

        let sql = format!(
            "SELECT * FROM (SELECT code, description, description_normalized, search_text, priority, tags, {select_signals} FROM icd10_extended) t \
             WHERE {where_expr}{tag_clause} ORDER BY {order_expr} LIMIT ?{limit_idx}"
        );

        let mut stmt = conn.prepare(&sql)?;
        let param_refs: Vec<&dyn ToSql> = bind.iter().map(|b| b.as_ref()).collect();
        let rows = stmt.query_map(param_refs.as_slice(), |row| {
            row_to_candidate(row, ResultSource::Icd10Extended)
        })?;
        let mut out = Vec::new();
        for row in rows {
            out.push(row?);
        }
        Ok(out)
    }

    fn extended_search_code_only(
        &self,
        compact_query: &str,
        limit: usize,
    ) -> Result<Vec<Candidate>, StoreError> {
        let conn = self.conn();
        let compact = compact_code(compact_query);
        let sql = "SELECT * FROM ( \
            SELECT code, description, description_normalized, search_text, priority, tags, \
              CASE WHEN REPLACE(REPLACE(UPPER(code),'.',''),' ','') = ?1 THEN 1 ELSE 0 END AS exact_code_match, \
              CASE WHEN REPLACE(REPLACE(UPPER(code),'.',''),' ','') LIKE ?1 || '%' THEN 1 ELSE 0 END AS prefix_match, \
              0 AS description_match, 0.0 AS similarity, 0 AS token_hit_count \
            FROM icd10_extended) t \
            WHERE exact_code_match = 1 OR prefix_match = 1 \
            ORDER BY exact_code_match DESC, prefix_match DESC, priority_to_float(priority) DESC, code ASC \
            LIMIT ?2";
        let mut stmt = conn.prepare(sql)?;
        let rows = stmt.query_map(
            rusqlite::params![compact, limit as i64],
            |row| row_to_candidate(row, ResultSource::Icd10Extended),
        )?;
        let mut out = Vec::new();
        for row in rows {
            out.push(row?);
        }
        Ok(out)
    }

    fn extended_lookup(&self, code: &str) -> Result<Option<IcdExtendedRow>, StoreError> {
        let conn = self.conn();
        let mut stmt = conn.prepare(
            "SELECT code, description, description_normalized, search_text, priority, tags \
             FROM icd10_extended WHERE UPPER(code) = UPPER(?1)",
        )?;
        let mut rows = stmt.query(rusqlite::params![code])?;
        if let Some(row) = rows.next()? {
            let priority_raw: String = row.get("priority")?;
            Ok(Some(IcdExtendedRow {
                code: row.get("code")?,
                description: row.get("description")?,
                description_normalized: row.get("description_normalized")?,
                search_text: row.get("search_text")?,
                priority: priority_to_float(&priority_raw),
                tags: row.get("tags")?,
            }))
        } else {
            Ok(None)
        }
    }

    fn extended_expand_root(
        &self,
        root: &str,
        limit: usize,
    ) -> Result<Vec<IcdExtendedRow>, StoreError> {
        if root.trim().len() < 3 {
            return Ok(Vec::new());
        }
        let conn = self.conn();
        let mut stmt = conn.prepare(
            "SELECT code, description, description_normalized, search_text, priority, tags \
             FROM icd10_extended \
             WHERE UPPER(code) LIKE UPPER(?1) || '%' AND LENGTH(code) > LENGTH(?1) \
             ORDER BY priority_to_float(priority) DESC, code ASC LIMIT ?2",
        )?;
        let rows = stmt.query_map(rusqlite::params![root, limit as i64], |row| {
            let priority_raw: String = row.get("priority")?;
            Ok(IcdExtendedRow {
                code: row.get("code")?,
                description: row.get("description")?,
                description_normalized: row.get("description_normalized")?,
                search_text: row.get("search_text")?,
                priority: priority_to_float(&priority_raw),
                tags: row.get("tags")?,
            })
        })?;
        let mut out = Vec::new();
        for row in rows {
            out.push(row?);
        }
        Ok(out)
    }

    fn base_search(&self, query: &str, limit: usize) -> Result<Vec<IcdBaseRow>, StoreError> {
        let conn = self.conn();
        let sql = "SELECT * FROM ( \
            SELECT code, description, search_terms, \
              CASE WHEN UPPER(code) = UPPER(?1) THEN 1 ELSE 0 END AS is_exact, \
              CASE WHEN UPPER(code) LIKE UPPER(?1) || '%' THEN 1 ELSE 0 END AS is_prefix, \
              CASE WHEN (UPPER(description) LIKE '%' || UPPER(?1) || '%' \
                      OR UPPER(COALESCE(search_terms, '')) LIKE '%' || UPPER(?1) || '%') \
                   THEN 1 ELSE 0 END AS is_substring \
            FROM icd10) t \
            WHERE is_exact = 1 OR is_prefix = 1 OR is_substring = 1 \
            ORDER BY is_exact DESC, is_prefix DESC, is_substring DESC, code ASC \
            LIMIT ?2";
        let mut stmt = conn.prepare(sql)?;
        let rows = stmt.query_map(rusqlite::params![query, limit as i64], |row| {
            Ok(IcdBaseRow {
                code: row.get("code")?,
                description: row.get("description")?,
                search_terms: row.get("search_terms")?,
            })
        })?;
        let mut out = Vec::new();
        for row in rows {
            out.push(row?);
        }
        Ok(out)
    }

    fn dictionary_exact(&self, normalized_query: &str) -> Result<Vec<DictionaryEntry>, StoreError> {
        let conn = self.conn();
        let mut stmt = conn.prepare(
            "SELECT term, icd10_code, priority FROM clinical_dictionary WHERE term = ?1 ORDER BY priority DESC",
        )?;
        let rows = stmt.query_map(rusqlite::params![normalized_query], |row| {
            Ok(DictionaryEntry {
                term: row.get("term")?,
                icd10_code: row.get("icd10_code")?,
                priority: row.get("priority")?,
            })
        })?;
        let mut out = Vec::new();
        for row in rows {
            out.push(row?);
        }
        Ok(out)
    }

    fn dictionary_synonyms(
        &self,
        normalized_query: &str,
        tokens: &[String],
        preferred_codes: &[String],
        limit: usize,
    ) -> Result<Vec<DictionaryEntry>, StoreError> {
        let conn = self.conn();
        let mut bind: Vec<Box<dyn ToSql>> = Vec::new();
        let mut clauses = Vec::new();

        for token in tokens {
            bind.push(Box::new(token.clone()));
            clauses.push(format!("term LIKE '%' || ?{} || '%'", bind.len()));
        }
        if !preferred_codes.is_empty() {
            let mut in_parts = Vec::new();
            for code in preferred_codes {
                bind.push(Box::new(code.clone()));
                in_parts.push(format!("?{}", bind.len()));
            }
            clauses.push(format!("icd10_code IN ({})", in_parts.join(", ")));
        }
        bind.push(Box::new(normalized_query.to_string()));
        clauses.push(format!("trgm_sim(term, ?{}) > 0.25", bind.len()));

        let limit_i = limit as i64;
        bind.push(Box::new(limit_i));
        let limit_idx = bind.len();

        let sql = format!(
            "SELECT term, icd10_code, priority FROM clinical_dictionary WHERE {} ORDER BY priority DESC LIMIT ?{}",
            clauses.join(" OR "),
            limit_idx
        );
        let mut stmt = conn.prepare(&sql)?;
        let param_refs: Vec<&dyn ToSql> = bind.iter().map(|b| b.as_ref()).collect();
        let rows = stmt.query_map(param_refs.as_slice(), |row| {
            Ok(DictionaryEntry {
                term: row.get("term")?,
                icd10_code: row.get("icd10_code")?,
                priority: row.get("priority")?,
            })
        })?;
        let mut out = Vec::new();
        for row in rows {
            out.push(row?);
        }
        Ok(out)
    }

    fn codes_by_codes(&self, codes: &[String]) -> Result<Vec<IcdExtendedRow>, StoreError> {
        if codes.is_empty() {
            return Ok(Vec::new());
        }
        let conn = self.conn();
        let placeholders: Vec<String> = (1..=codes.len()).map(|i| format!("?{i}")).collect();
        let sql = format!(
            "SELECT code, description, description_normalized, search_text, priority, tags \
             FROM icd10_extended WHERE UPPER(code) IN ({})",
            placeholders.join(", ")
        );
        let mut stmt = conn.prepare(&sql)?;
        let upper_codes: Vec<String> = codes.iter().map(|c| c.to_uppercase()).collect();
        let param_refs: Vec<&dyn ToSql> = upper_codes.iter().map(|c| c as &dyn ToSql).collect();
        let rows = stmt.query_map(param_refs.as_slice(), |row| {
            let priority_raw: String = row.get("priority")?;
            Ok(IcdExtendedRow {
                code: row.get("code")?,
                description: row.get("description")?,
                description_normalized: row.get("description_normalized")?,
                search_text: row.get("search_text")?,
                priority: priority_to_float(&priority_raw),
                tags: row.get("tags")?,
            })
        })?;
        let mut out = Vec::new();
        for row in rows {
            out.push(row?);
        }
        Ok(out)
    }

    fn ontology_detect(&self, normalized_query: &str) -> Result<Option<String>, StoreError> {
        if normalized_query.is_empty() {
            return Ok(None);
        }
        let conn = self.conn();
        let mut stmt = conn.prepare(
            "SELECT system FROM clinical_ontology WHERE ?1 LIKE '%' || normalized_term || '%' \
             AND normalized_term != '' \
             ORDER BY LENGTH(normalized_term) DESC, system ASC LIMIT 1",
        )?;
        let mut rows = stmt.query(rusqlite::params![normalized_query])?;
        if let Some(row) = rows.next()? {
            Ok(Some(row.get("system")?))
        } else {
            Ok(None)
        }
    }

    fn usage_stats(
        &self,
        codes: &[String],
        user_id: Option<&str>,
    ) -> Result<HashMap<String, UsageStats>, StoreError> {
        let mut stats: HashMap<String, UsageStats> = HashMap::new();
        if codes.is_empty() {
            return Ok(stats);
        }
        let conn = self.conn();
        let placeholders: Vec<String> = (1..=codes.len()).map(|i| format!("?{i}")).collect();
        let upper_codes: Vec<String> = codes.iter().map(|c| c.to_uppercase()).collect();

        let global_sql = format!(
            "SELECT UPPER(selected_icd) AS code, COUNT(*) AS freq FROM search_logs \
             WHERE selected_icd IS NOT NULL AND UPPER(selected_icd) IN ({}) GROUP BY UPPER(selected_icd)",
            placeholders.join(", ")
        );
        let mut stmt = conn.prepare(&global_sql)?;
        let param_refs: Vec<&dyn ToSql> = upper_codes.iter().map(|c| c as &dyn ToSql).collect();
        let rows = stmt.query_map(param_refs.as_slice(), |row| {
            Ok((row.get::<_, String>("code")?, row.get::<_, i64>("freq")?))
        })?;
        for row in rows {
            let (code, freq) = row?;
            stats.entry(code).or_default().global_frequency = freq;
        }

        if let Some(uid) = user_id {
            let user_sql = format!(
                "SELECT UPPER(selected_icd) AS code, COUNT(*) AS freq FROM search_logs \
                 WHERE selected_icd IS NOT NULL AND UPPER(selected_icd) IN ({}) AND user_id = ?{} \
                 GROUP BY UPPER(selected_icd)",
                placeholders.join(", "),
                codes.len() + 1
            );
            let mut stmt = conn.prepare(&user_sql)?;
            let mut param_refs: Vec<&dyn ToSql> =
                upper_codes.iter().map(|c| c as &dyn ToSql).collect();
            param_refs.push(&uid);
            let rows = stmt.query_map(param_refs.as_slice(), |row| {
                Ok((row.get::<_, String>("code")?, row.get::<_, i64>("freq")?))
            })?;
            for row in rows {
                let (code, freq) = row?;
                stats.entry(code).or_default().user_frequency = freq;
            }
        }

        for code in &upper_codes {
            stats.entry(code.clone()).or_default();
        }
        Ok(stats)
    }

    fn insert_search_log(
        &self,
        query: &str,
        normalized_query: &str,
        selected_term: &str,
        user_id: Option<&str>,
        session_id: Option<&str>,
        specialty: Option<&str>,
    ) -> Result<(), StoreError> {
        let conn = self.conn();
        conn.execute(
            "INSERT INTO search_logs (user_id, session_id, query, normalized_query, selected_term, selected_icd, specialty, created_at) \
             VALUES (?1, ?2, ?3, ?4, ?5, NULL, ?6, ?7)",
            rusqlite::params![user_id, session_id, query, normalized_query, selected_term, specialty, Utc::now()],
        )?;
        Ok(())
    }

    fn insert_selection_log(&self, selection: &NewSelection) -> Result<(), StoreError> {
        let conn = self.conn();
        conn.execute(
            "INSERT INTO search_logs (user_id, session_id, query, normalized_query, selected_term, selected_icd, specialty, created_at) \
             VALUES (?1, ?2, ?3, ?4, ?4, ?5, NULL, ?6)",
            rusqlite::params![
                selection.user_id,
                selection.session_id,
                selection.original_query,
                selection.normalized_query,
                selection.selected_icd,
                Utc::now(),
            ],
        )?;
        Ok(())
    }

    fn icd10_exists(&self, code: &str) -> Result<bool, StoreError> {
        let conn = self.conn();
        let count: i64 = conn.query_row(
            "SELECT COUNT(*) FROM ( \
               SELECT code FROM icd10_extended WHERE UPPER(code) = UPPER(?1) \
               UNION SELECT code FROM icd10 WHERE UPPER(code) = UPPER(?1) \
             )",
            rusqlite::params![code],
            |row| row.get(0),
        )?;
        Ok(count > 0)
    }

    fn count_icd10(&self) -> Result<i64, StoreError> {
        let conn = self.conn();
        let count: i64 = conn.query_row(
            "SELECT COUNT(*) FROM (SELECT code FROM icd10_extended UNION SELECT code FROM icd10)",
            [],
            |row| row.get(0),
        )?;
        Ok(count)
    }

    fn search_text_coverage(&self) -> Result<CoverageStats, StoreError> {
        let conn = self.conn();
        conn.query_row(
            "SELECT COUNT(*), \
                    SUM(CASE WHEN COALESCE(search_text, '') = '' THEN 1 ELSE 0 END), \
                    SUM(CASE WHEN COALESCE(description_normalized, '') = '' THEN 1 ELSE 0 END) \
             FROM icd10_extended",
            [],
            |row| {
                Ok(CoverageStats {
                    total: row.get(0)?,
                    empty_search_text: row.get::<_, Option<i64>>(1)?.unwrap_or(0),
                    empty_description_normalized: row.get::<_, Option<i64>>(2)?.unwrap_or(0),
                })
            },
        )
        .map_err(StoreError::from)
    }

    fn clinical_dictionary_schema_ok(&self) -> Result<bool, StoreError> {
        let conn = self.conn();
        let mut stmt = conn.prepare("PRAGMA table_info(clinical_dictionary)")?;
        let rows = stmt.query_map([], |row| row.get::<_, String>("name"))?;
        let mut columns: Vec<String> = Vec::new();
        for row in rows {
            columns.push(row?);
        }
        const REQUIRED: [&str; 5] = ["id", "term", "icd10_code", "priority", "created_at"];
        Ok(REQUIRED.iter().all(|c| columns.iter().any(|col| col == c)))
    }

    fn rebuild_clinical_dictionary_schema(&self) -> Result<(), StoreError> {
        let conn = self.conn();
        conn.execute_batch(
            "DROP TABLE IF EXISTS clinical_dictionary; \
             CREATE TABLE clinical_dictionary ( \
               id INTEGER PRIMARY KEY AUTOINCREMENT, \
               term TEXT NOT NULL, \
               icd10_code TEXT NOT NULL, \
               priority INTEGER NOT NULL DEFAULT 0, \
               created_at TEXT NOT NULL, \
               UNIQUE (term, icd10_code) \
             );",
        )?;
        Ok(())
    }

    fn seed_dictionary_entry(&self, entry: &DictionaryEntry) -> Result<bool, StoreError> {
        if !self.icd10_exists(&entry.icd10_code)? {
            return Ok(false);
        }
        let conn = self.conn();
        conn.execute(
            "INSERT OR IGNORE INTO clinical_dictionary (term, icd10_code, priority, created_at) \
             VALUES (?1, ?2, ?3, ?4)",
            rusqlite::params![entry.term, entry.icd10_code, entry.priority, Utc::now()],
        )?;
        Ok(true)
    }

    fn suggest(&self, query: &str, limit: usize) -> Result<Vec<(String, i64)>, StoreError> {
        let conn = self.conn();
        let mut stmt = conn.prepare(
            "SELECT selected_term, COUNT(*) AS frequency FROM search_logs \
             WHERE selected_term LIKE '%' || ?1 || '%' \
             GROUP BY selected_term ORDER BY frequency DESC LIMIT ?2",
        )?;
        let rows = stmt.query_map(rusqlite::params![query, limit as i64], |row| {
            Ok((row.get::<_, String>("selected_term")?, row.get::<_, i64>("frequency")?))
        })?;
        let mut out = Vec::new();
        for row in rows {
            out.push(row?);
        }
        Ok(out)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn seeded_store() -> SqliteStore {
        let store = SqliteStore::open_in_memory().unwrap();
        {
            let conn = store.conn();
            conn.execute_batch(
                "INSERT INTO icd10_extended (code, description, description_normalized, search_text, priority, tags) VALUES
                 ('E11', 'Diabetes mellitus tipo 2', 'diabetes mellitus tipo 2', 'diabetes|dm2|azucar', 'high', 'cardiometabolic,endocrine'),
                 ('E11.9', 'Diabetes mellitus tipo 2 sin complicaciones', 'diabetes mellitus tipo 2 sin complicaciones', 'diabetes|dm2', 'high', 'cardiometabolic'),
                 ('J18.9', 'Neumonia no especificada', 'neumonia no especificada', 'neumonia|pulmonia', 'medium', 'respiratory,infection'),
                 ('G43.9', 'Migrana no especificada', 'migrana no especificada', 'migrana|cefalea', 'medium', 'neurological'),
                 ('R51', 'Cefalea', 'cefalea', 'cefalea|dolor cabeza', 'low', 'neurological');
                 INSERT INTO icd10 (code, description, search_terms) VALUES
                 ('E11', 'Diabetes mellitus tipo 2', 'diabetes');
                 INSERT INTO clinical_dictionary (term, icd10_code, priority, created_at) VALUES
                 ('diabetes tipo 2', 'E11', 10, '2024-01-01T00:00:00Z');
                 INSERT INTO clinical_ontology (term, normalized_term, system, organ, functional_group, related_prefix, weight) VALUES
                 ('pulmon', 'pulmon', 'respiratory', 'pulmon', NULL, 'J', 1.0);",
            )
            .unwrap();
        }
        store
    }

    #[test]
    fn migration_creates_expected_tables() {
        let store = SqliteStore::open_in_memory().unwrap();
        let conn = store.conn();
        let version: i64 = conn
            .query_row("SELECT MAX(version) FROM schema_version", [], |row| row.get(0))
            .unwrap();
        assert_eq!(version, 1);
    }

    #[test]
    fn priority_mapping_matches_contract() {
        assert_eq!(priority_to_float(""), 0.0);
        assert_eq!(priority_to_float("low"), 0.2);
        assert_eq!(priority_to_float("medium"), 0.6);
        assert_eq!(priority_to_float("high"), 1.0);
        assert_eq!(priority_to_float("7"), 7.0);
    }

    #[test]
    fn extended_lookup_finds_exact_code() {
        let store = seeded_store();
        let row = store.extended_lookup("e11.9").unwrap().unwrap();
        assert_eq!(row.code, "E11.9");
        assert_eq!(row.priority, 1.0);
    }

    #[test]
    fn code_query_retrieves_exact_and_prefix_matches() {
        let store = seeded_store();
        let params = ExtendedSearchParams {
            query: "E11".to_string(),
            scoring_tokens: vec![],
            query_is_code: true,
            use_similarity: false,
            similarity_threshold: 0.2,
            min_token_hits: 2,
            tags_filter: None,
            limit: 10,
        };
        let candidates = store.extended_search(&params).unwrap();
        assert!(candidates.iter().any(|c| c.code == "E11" && c.exact_code_match));
        assert!(candidates.iter().any(|c| c.code == "E11.9" && c.prefix_match));
    }

    #[test]
    fn natural_language_query_matches_description() {
        let store = seeded_store();
        let params = ExtendedSearchParams {
            query: "neumonia".to_string(),
            scoring_tokens: vec!["neumonia".to_string()],
            query_is_code: false,
            use_similarity: true,
            similarity_threshold: 0.2,
            min_token_hits: 1,
            tags_filter: None,
            limit: 10,
        };
        let candidates = store.extended_search(&params).unwrap();
        assert!(candidates.iter().any(|c| c.code == "J18.9"));
    }

    #[test]
    fn expand_root_requires_three_char_root_and_strictly_longer_children() {
        let store = seeded_store();
        let children = store.extended_expand_root("E11", 10).unwrap();
        assert!(children.iter().all(|c| c.code.len() > 3));
        assert!(children.iter().any(|c| c.code == "E11.9"));

        let too_short = store.extended_expand_root("E1", 10).unwrap();
        assert!(too_short.is_empty());
    }

    #[test]
    fn dictionary_exact_and_synonyms() {
        let store = seeded_store();
        let exact = store.dictionary_exact("diabetes tipo 2").unwrap();
        assert_eq!(exact.len(), 1);
        assert_eq!(exact[0].icd10_code, "E11");

        let synonyms = store
            .dictionary_synonyms("diabetes", &["diabetes".to_string()], &[], 10)
            .unwrap();
        assert!(!synonyms.is_empty());
    }

    #[test]
    fn ontology_detect_finds_system_by_substring() {
        let store = seeded_store();
        let system = store.ontology_detect("dolor en el pulmon derecho").unwrap();
        assert_eq!(system.as_deref(), Some("respiratory"));
    }

    #[test]
    fn selection_log_round_trips_into_usage_stats() {
        let store = seeded_store();
        let selection = NewSelection {
            original_query: "dm2".to_string(),
            normalized_query: "dm2".to_string(),
            selected_icd: "E11".to_string(),
            user_id: Some("user-1".to_string()),
            session_id: None,
        };
        store.insert_selection_log(&selection).unwrap();
        let stats = store
            .usage_stats(&["E11".to_string()], Some("user-1"))
            .unwrap();
        assert_eq!(stats.get("E11").unwrap().global_frequency, 1);
        assert_eq!(stats.get("E11").unwrap().user_frequency, 1);
    }

    #[test]
    fn icd10_exists_checks_both_tables() {
        let store = seeded_store();
        assert!(store.icd10_exists("E11").unwrap());
        assert!(store.icd10_exists("j18.9").unwrap());
        assert!(!store.icd10_exists("Z99.9").unwrap());
    }

    #[test]
    fn clinical_dictionary_schema_detection_and_rebuild() {
        let store = seeded_store();
        assert!(store.clinical_dictionary_schema_ok().unwrap());
        {
            let conn = store.conn();
            conn.execute_batch("DROP TABLE clinical_dictionary; CREATE TABLE clinical_dictionary (term_raw TEXT, category TEXT);").unwrap();
        }
        assert!(!store.clinical_dictionary_schema_ok().unwrap());
        store.rebuild_clinical_dictionary_schema().unwrap();
        assert!(store.clinical_dictionary_schema_ok().unwrap());
    }

    #[test]
    fn seed_dictionary_entry_skips_missing_codes() {
        let store = seeded_store();
        let bogus = DictionaryEntry {
            term: "enfermedad inexistente".to_string(),
            icd10_code: "Z99.9".to_string(),
            priority: 5,
        };
        store.seed_dictionary_entry(&bogus).unwrap();
        let found = store.dictionary_exact("enfermedad inexistente").unwrap();
        assert!(found.is_empty());
    }

    #[test]
    fn search_text_coverage_reports_totals() {
        let store = seeded_store();
        let coverage = store.search_text_coverage().unwrap();
        assert_eq!(coverage.total, 5);
        assert_eq!(coverage.empty_search_text, 0);
        assert!(coverage.search_text_coverage_ratio() > 0.99);
    }

    #[test]
    fn suggest_groups_by_selected_term() {
        let store = seeded_store();
        store
            .insert_search_log("dm", "dm", "dm2", None, None, None)
            .unwrap();
        store
            .insert_search_log("dm", "dm", "dm2", None, None, None)
            .unwrap();
        let suggestions = store.suggest("dm", 5).unwrap();
        assert_eq!(suggestions[0], ("dm2".to_string(), 2));
    }
}
