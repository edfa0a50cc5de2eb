//! Feature flags, ranking weights, tuning, and the intent keyword map (C8).
//!
//! Mirrors the teacher's habit of grouping related constants into a single
//! module, generalized to spec §4.8's env-driven, single-read-at-startup
//! contract. Parsing never fails outward: a malformed environment value
//! falls back to its documented default and is logged, never propagated.

use std::env;

use tracing::warn;

fn env_bool(name: &str, default: bool) -> bool {
    match env::var(name) {
        Ok(v) => matches!(v.trim().to_lowercase().as_str(), "1" | "true" | "yes" | "on"),
        Err(_) => default,
    }
}

fn env_float(name: &str, default: f64) -> f64 {
    match env::var(name) {
        Ok(v) => v.trim().parse::<f64>().unwrap_or_else(|_| {
            warn!(key = name, value = %v, "invalid float env value, using default");
            default
        }),
        Err(_) => default,
    }
}

fn env_usize(name: &str, default: usize) -> usize {
    match env::var(name) {
        Ok(v) => v.trim().parse::<usize>().unwrap_or_else(|_| {
            warn!(key = name, value = %v, "invalid integer env value, using default");
            default
        }),
        Err(_) => default,
    }
}

/// Runtime feature flags for the search subsystem.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct FeatureFlags {
    pub use_extended_icd10: bool,
    pub enable_intent_detection: bool,
    pub enable_search_logging: bool,
    pub debug_search: bool,
}

impl FeatureFlags {
    fn from_env() -> Self {
        Self {
            use_extended_icd10: env_bool("USE_EXTENDED_ICD10", true),
            enable_intent_detection: env_bool("SEARCH_ENABLE_INTENT_DETECTION", true),
            enable_search_logging: env_bool("SEARCH_ENABLE_LOGGING", true),
            debug_search: env_bool("SEARCH_DEBUG", false),
        }
    }
}

/// Tunable weights used by the ranking engine (§4.5), plus the two
/// usage-frequency terms supplemented from the original scoring engine
/// (SPEC_FULL §F.4).
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct RankingWeights {
    pub similarity: f64,
    pub exact_match: f64,
    pub prefix_match: f64,
    pub description_match: f64,
    pub priority_boost: f64,
    pub intent_bonus: f64,
    pub tag_match: f64,
    /// Additive, monotonic supplement: `min(global_frequency, 200) * usage_frequency`.
    pub usage_frequency: f64,
    /// Additive, monotonic supplement: `min(user_frequency, 100) * user_frequency`.
    pub user_frequency: f64,
}

impl RankingWeights {
    fn from_env() -> Self {
        Self {
            similarity: env_float("RANK_W_SIMILARITY", 0.30),
            exact_match: env_float("RANK_W_EXACT_MATCH", 100.0),
            prefix_match: env_float("RANK_W_PREFIX_MATCH", 50.0),
            description_match: env_float("RANK_W_DESCRIPTION_MATCH", 20.0),
            priority_boost: env_float("RANK_W_PRIORITY_BOOST", 10.0),
            intent_bonus: env_float("RANK_W_INTENT_BONUS", 15.0),
            tag_match: env_float("RANK_W_TAG_MATCH", 5.0),
            usage_frequency: env_float("RANK_W_USAGE_FREQUENCY", 0.15),
            user_frequency: env_float("RANK_W_USER_FREQUENCY", 0.4),
        }
    }
}

/// Operational limits and thresholds.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct SearchTuning {
    pub similarity_threshold: f64,
    pub default_limit: usize,
    pub max_limit: usize,
    pub candidate_multiplier: usize,
    /// Ceiling applied before `weights.usage_frequency` (original: 200).
    pub usage_frequency_ceiling: i64,
    /// Ceiling applied before `weights.user_frequency` (original: 100).
    pub user_frequency_ceiling: i64,
}

impl SearchTuning {
    fn from_env() -> Self {
        Self {
            similarity_threshold: env_float("SEARCH_SIMILARITY_THRESHOLD", 0.20),
            default_limit: env_usize("SEARCH_DEFAULT_LIMIT", 10),
            max_limit: env_usize("SEARCH_MAX_LIMIT", 50),
            candidate_multiplier: env_usize("SEARCH_CANDIDATE_MULTIPLIER", 4),
            usage_frequency_ceiling: 200,
            user_frequency_ceiling: 100,
        }
    }
}

/// Builds the fixed `{intent → keywords}` map (§4.2). Insertion order is
/// significant: intent detection ties are broken by iteration order, so
/// this order must stay stable across calls.
fn build_intent_keywords() -> Vec<(&'static str, Vec<&'static str>)> {
    vec![
        (
            "infection",
            vec![
                "infeccion", "bacteria", "virus", "viral", "bacteriana", "sepsis",
                "neumonia", "bronquitis", "celulitis", "absceso", "meningitis",
                "pielonefritis", "tuberculosis", "hepatitis", "vih", "sida",
                "covid", "influenza", "dengue", "malaria",
            ],
        ),
        (
            "cardiometabolic",
            vec![
                "diabetes", "hipertension", "hiperlipidemia", "obesidad",
                "infarto", "insuficiencia cardiaca", "arritmia", "aterosclerosis",
                "cardiopatia", "angina", "dislipidemia", "sindrome metabolico",
                "fibrilacion", "taquicardia",
            ],
        ),
        (
            "respiratory",
            vec![
                "asma", "epoc", "bronquitis", "neumonia", "disnea", "tos",
                "rinitis", "sinusitis", "faringitis", "laringitis",
                "insuficiencia respiratoria", "embolia pulmonar",
            ],
        ),
        (
            "gastrointestinal",
            vec![
                "gastritis", "colitis", "diarrea", "estrenimiento", "reflujo",
                "ulcera", "hepatitis", "cirrosis", "pancreatitis", "apendicitis",
                "hernia", "colon irritable",
            ],
        ),
        (
            "musculoskeletal",
            vec![
                "artritis", "artrosis", "lumbalgia", "cervicalgia", "fractura",
                "tendinitis", "osteoporosis", "dorsalgia", "esguince", "luxacion",
                "mialgia", "fibromialgia",
            ],
        ),
        (
            "neurological",
            vec![
                "cefalea", "migrana", "epilepsia", "neuropatia", "parkinson",
                "alzheimer", "vertigo", "mareo", "convulsion", "ictus", "acv",
                "esclerosis",
            ],
        ),
        (
            "mental_health",
            vec![
                "ansiedad", "depresion", "insomnio", "estres", "panico",
                "trastorno bipolar", "esquizofrenia", "psicosis",
            ],
        ),
        (
            "oncology",
            vec![
                "cancer", "tumor", "neoplasia", "metastasis", "linfoma",
                "leucemia", "melanoma", "carcinoma", "sarcoma",
            ],
        ),
        (
            "renal",
            vec![
                "insuficiencia renal", "nefritis", "nefrolitiasis", "dialisis",
                "proteinuria", "hematuria", "glomerulonefritis",
            ],
        ),
        (
            "endocrine",
            vec![
                "hipotiroidismo", "hipertiroidismo", "tiroides", "cushing",
                "addison", "acromegalia", "prolactinoma",
            ],
        ),
    ]
}

/// Keyword-based intent detection rules (§4.2). The Spanish keywords here
/// are already accent-stripped since detection runs against normalized
/// text (`normalize::normalize_for_nl`).
#[derive(Debug, Clone)]
pub struct IntentKeywords {
    ordered: Vec<(String, Vec<String>)>,
}

impl IntentKeywords {
    fn new() -> Self {
        let ordered = build_intent_keywords()
            .into_iter()
            .map(|(intent, kws)| {
                (
                    intent.to_string(),
                    kws.into_iter().map(|k| k.to_string()).collect(),
                )
            })
            .collect();
        Self { ordered }
    }

    /// Iterate `(intent, keywords)` in the fixed, deterministic order used
    /// for tie-breaking.
    pub fn iter(&self) -> impl Iterator<Item = (&str, &[String])> {
        self.ordered.iter().map(|(k, v)| (k.as_str(), v.as_slice()))
    }

    /// Flat lookup: does `tags` (a comma/pipe-delimited raw tag string)
    /// contain `intent` as a substring? Used by the ranking engine's
    /// intent-alignment bonus.
    pub fn tags_mention(tags: &str, intent: &str) -> bool {
        tags.to_lowercase().contains(intent)
    }
}

impl Default for IntentKeywords {
    fn default() -> Self {
        Self::new()
    }
}

/// Immutable configuration read once at process start (§4.8).
#[derive(Debug, Clone)]
pub struct Config {
    pub flags: FeatureFlags,
    pub weights: RankingWeights,
    pub tuning: SearchTuning,
    pub intent_keywords: IntentKeywords,
}

impl Config {
    /// Read configuration from the process environment. Never fails: every
    /// malformed value silently reverts to its documented default.
    pub fn from_env() -> Self {
        Self {
            flags: FeatureFlags::from_env(),
            weights: RankingWeights::from_env(),
            tuning: SearchTuning::from_env(),
            intent_keywords: IntentKeywords::new(),
        }
    }
}

impl Default for Config {
    fn default() -> Self {
        Self::from_env()
    }
}
