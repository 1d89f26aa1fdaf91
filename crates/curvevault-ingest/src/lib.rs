//! The ingestion engine: one canonical run path parameterized by
//! `trigger_source` and `force`.

pub mod checks;
pub mod config;
pub mod engine;
pub mod schedule;

pub const CRATE_NAME: &str = "curvevault-ingest";

pub use checks::{check_sheet_dates, guard_decision, resolve_run_date, DateCheckError, GuardDecision};
pub use config::IngestConfig;
pub use engine::{run_once_from_env, IngestEngine, IngestError, IngestRequest};
pub use schedule::build_scheduler;
