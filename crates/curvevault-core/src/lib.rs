//! Core domain model for Curvevault: curve rows, audit runs, trigger sources.

use chrono::{DateTime, NaiveDate, Utc};
use serde::{Deserialize, Serialize};
use uuid::Uuid;

pub const CRATE_NAME: &str = "curvevault-core";

/// Reserved prefix marking a trigger as a scheduled (non-manual) invocation.
pub const SCHEDULED_TRIGGER_PREFIX: &str = "scheduled";

/// Diagnostic reason codes recorded on skipped/error audit runs.
pub mod reason {
    pub const ALREADY_INGESTED_TODAY: &str = "already_ingested_today";
    pub const HISTORY_EXISTS_FOR_DATE: &str = "history_exists_for_date";
    pub const SCHEMA_MISMATCH: &str = "schema_mismatch";
    pub const NO_ROWS_IN_SOURCE: &str = "no_rows_in_source";
    pub const AMBIGUOUS_AS_OF_DATE: &str = "ambiguous_as_of_date";
    pub const DATE_MISMATCH: &str = "date_mismatch";
    pub const SOURCE_FETCH_FAILED: &str = "source_fetch_failed";
    pub const UNHANDLED_EXCEPTION: &str = "unhandled_exception";
}

/// Free-form invocation source. Anything starting with the reserved
/// `scheduled` prefix gets skip-on-duplicate treatment; manual sources
/// always proceed to validation.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(transparent)]
pub struct TriggerSource(pub String);

impl TriggerSource {
    pub fn new(value: impl Into<String>) -> Self {
        Self(value.into())
    }

    pub fn scheduled(channel: &str) -> Self {
        Self(format!("{SCHEDULED_TRIGGER_PREFIX}:{channel}"))
    }

    pub fn manual(channel: &str) -> Self {
        Self(format!("manual:{channel}"))
    }

    pub fn is_scheduled(&self) -> bool {
        self.0.starts_with(SCHEDULED_TRIGGER_PREFIX)
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl std::fmt::Display for TriggerSource {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(&self.0)
    }
}

/// One parsed curve observation for a single as-of date.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct CurveRow {
    pub metal: String,
    pub tenor_months: i32,
    pub price: f64,
    pub real_10yr_yield: Option<f64>,
    pub dollar_index: Option<f64>,
    pub deficit_gdp_flag: Option<bool>,
    pub as_of_date: NaiveDate,
}

/// Current-state projection row, at most one per `(metal, tenor_months)`.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct LatestCurveRow {
    pub metal: String,
    pub tenor_months: i32,
    pub price: f64,
    pub real_10yr_yield: Option<f64>,
    pub dollar_index: Option<f64>,
    pub deficit_gdp_flag: Option<bool>,
    pub as_of_date: NaiveDate,
    pub updated_at: DateTime<Utc>,
}

/// Append-only history entry, one per ingested observation.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct CurveHistoryRow {
    pub id: i64,
    pub metal: String,
    pub tenor_months: i32,
    pub price: f64,
    pub real_10yr_yield: Option<f64>,
    pub dollar_index: Option<f64>,
    pub deficit_gdp_flag: Option<bool>,
    pub as_of_date: NaiveDate,
    pub inserted_at: DateTime<Utc>,
}

/// Terminal outcome class of an ingestion run.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum RunStatus {
    Success,
    Error,
    Skipped,
}

impl RunStatus {
    pub fn as_str(&self) -> &'static str {
        match self {
            RunStatus::Success => "success",
            RunStatus::Error => "error",
            RunStatus::Skipped => "skipped",
        }
    }

    pub fn parse(value: &str) -> Option<Self> {
        match value {
            "success" => Some(RunStatus::Success),
            "error" => Some(RunStatus::Error),
            "skipped" => Some(RunStatus::Skipped),
            _ => None,
        }
    }
}

/// Immutable audit record, written exactly once per invocation attempt.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct IngestRun {
    pub id: Uuid,
    pub run_date: NaiveDate,
    pub trigger_source: TriggerSource,
    pub status: RunStatus,
    pub reason: Option<String>,
    pub row_count: i32,
    pub recorded_at: DateTime<Utc>,
}

impl IngestRun {
    pub fn success(run_date: NaiveDate, trigger_source: TriggerSource, row_count: i32) -> Self {
        Self {
            id: Uuid::new_v4(),
            run_date,
            trigger_source,
            status: RunStatus::Success,
            reason: None,
            row_count,
            recorded_at: Utc::now(),
        }
    }

    pub fn skipped(run_date: NaiveDate, trigger_source: TriggerSource, reason: &str) -> Self {
        Self {
            id: Uuid::new_v4(),
            run_date,
            trigger_source,
            status: RunStatus::Skipped,
            reason: Some(reason.to_string()),
            row_count: 0,
            recorded_at: Utc::now(),
        }
    }

    pub fn error(run_date: NaiveDate, trigger_source: TriggerSource, reason: &str) -> Self {
        Self {
            id: Uuid::new_v4(),
            run_date,
            trigger_source,
            status: RunStatus::Error,
            reason: Some(reason.to_string()),
            row_count: 0,
            recorded_at: Utc::now(),
        }
    }
}

/// Non-error terminal outcomes surfaced to the caller.
#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(tag = "outcome", rename_all = "lowercase")]
pub enum IngestOutcome {
    Success {
        as_of_date: NaiveDate,
        row_count: usize,
        trigger_source: TriggerSource,
    },
    Skipped {
        reason: String,
    },
    /// History already holds rows for the date; the caller may resubmit
    /// with `force=true` after inspecting what is there.
    Conflict {
        as_of_date: NaiveDate,
        existing: Vec<CurveHistoryRow>,
    },
}
