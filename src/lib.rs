//! Clinical Core: the ICD-10 clinical search and ranking pipeline.
//!
//! Given a short Spanish clinical query or an ICD-10 code fragment, this
//! crate normalizes it, classifies it, retrieves candidates from a
//! pluggable [`store::IcdStore`], ranks them with an explainable weighted
//! model, and returns an ordered list of [`model::RankedResult`]s.
//!
//! HTTP routing, authentication, connection pooling, and bulk data
//! loading are host-process concerns; this crate exposes only the
//! narrow [`orchestrate::SearchOrchestrator`], [`store::IcdStore`] trait,
//! [`selection::SearchLogWriter`], and [`bootstrap::bootstrap`] entry
//! points a host wires together. The host process also owns `tracing`
//! subscriber initialization — this crate only emits events.

pub mod bootstrap;
pub mod classify;
pub mod config;
pub mod error;
pub mod model;
pub mod normalize;
pub mod orchestrate;
pub mod rank;
pub mod retrieve;
pub mod selection;
pub mod store;
pub mod trigram;

pub use config::Config;
pub use error::{ConfigError, SearchError, SelectionError, StoreError};
pub use model::{MatchFeatures, NewSelection, RankedResult, SelectionResponse};
pub use orchestrate::SearchOrchestrator;
pub use selection::SearchLogWriter;
pub use store::sqlite::SqliteStore;
pub use store::IcdStore;
