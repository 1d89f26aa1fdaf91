//! Run orchestration: guard, fetch, parse, validate, write, audit.

use std::sync::Arc;
use std::time::Duration;

use anyhow::Context;
use chrono::{NaiveDate, Utc};
use chrono_tz::Tz;
use curvevault_adapters::{
    parse_curve_sheet, HttpSheetSource, ParseError, SheetSource, SourceError,
};
use curvevault_core::{reason, IngestOutcome, IngestRun, TriggerSource};
use curvevault_storage::{
    CurveStore, HttpClientConfig, SheetFetcher, SnapshotArchive, StoreError,
};
use thiserror::Error;

use crate::checks::{check_sheet_dates, guard_decision, resolve_run_date, DateCheckError, GuardDecision};
use crate::config::IngestConfig;

#[derive(Debug, Clone)]
pub struct IngestRequest {
    pub trigger_source: TriggerSource,
    pub force: bool,
}

impl IngestRequest {
    pub fn scheduled(channel: &str) -> Self {
        Self {
            trigger_source: TriggerSource::scheduled(channel),
            force: false,
        }
    }

    pub fn manual(channel: &str, force: bool) -> Self {
        Self {
            trigger_source: TriggerSource::manual(channel),
            force,
        }
    }
}

#[derive(Debug, Error)]
pub enum IngestError {
    #[error("fetching source export: {0}")]
    Fetch(#[from] SourceError),
    #[error(transparent)]
    Parse(#[from] ParseError),
    #[error("no parseable rows in source ({dropped} dropped)")]
    NoRows { dropped: usize },
    #[error(transparent)]
    Date(#[from] DateCheckError),
    #[error("storage failure: {0}")]
    Store(#[from] StoreError),
}

/// One engine instance owns its store handle, source, and archive; every
/// exit path releases them by drop. There is no retry above the HTTP
/// fetch's own bounded backoff: a failed run is terminal for the invocation.
pub struct IngestEngine {
    store: CurveStore,
    source: Arc<dyn SheetSource>,
    archive: SnapshotArchive,
    reference_tz: Tz,
}

impl IngestEngine {
    pub fn new(
        store: CurveStore,
        source: Arc<dyn SheetSource>,
        archive: SnapshotArchive,
        reference_tz: Tz,
    ) -> Self {
        Self {
            store,
            source,
            archive,
            reference_tz,
        }
    }

    pub async fn from_config(config: &IngestConfig) -> anyhow::Result<Self> {
        if config.sheet_export_url.is_empty() {
            anyhow::bail!("SHEET_EXPORT_URL must be set");
        }
        let fetcher = SheetFetcher::new(HttpClientConfig {
            timeout: Duration::from_secs(config.http_timeout_secs),
            user_agent: Some(config.user_agent.clone()),
            ..Default::default()
        })?;
        let source = Arc::new(HttpSheetSource::new(fetcher, config.sheet_export_url.clone()));
        Self::from_config_with_source(config, source).await
    }

    /// Build the engine around a caller-supplied source (local file, fixture)
    /// instead of the configured export URL.
    pub async fn from_config_with_source(
        config: &IngestConfig,
        source: Arc<dyn SheetSource>,
    ) -> anyhow::Result<Self> {
        let reference_tz: Tz = config
            .reference_timezone
            .parse()
            .map_err(|_| anyhow::anyhow!("invalid REFERENCE_TIMEZONE {:?}", config.reference_timezone))?;
        let store = CurveStore::connect(&config.database_url)
            .await
            .context("connecting to database")?;
        let archive = SnapshotArchive::new(config.archive_dir.clone());
        Ok(Self::new(store, source, archive, reference_tz))
    }

    /// Execute one logical run to completion. Every terminal path has
    /// written exactly one audit record by the time this returns.
    pub async fn run(&self, request: IngestRequest) -> Result<IngestOutcome, IngestError> {
        let run_date = resolve_run_date(Utc::now(), self.reference_tz);
        let trigger = request.trigger_source.clone();
        tracing::info!(
            run_date = %run_date,
            trigger = %trigger,
            force = request.force,
            "starting ingestion run"
        );

        let prior = match self.store.latest_success_run(run_date).await {
            Ok(prior) => prior,
            Err(err) => {
                return Err(self
                    .fail(run_date, &trigger, reason::UNHANDLED_EXCEPTION, err.into())
                    .await)
            }
        };
        if guard_decision(prior.as_ref(), &trigger, request.force) == GuardDecision::Skip {
            let run = IngestRun::skipped(run_date, trigger, reason::ALREADY_INGESTED_TODAY);
            self.store.record_run(&run).await?;
            tracing::info!(run_date = %run_date, "already ingested today; skipping scheduled run");
            return Ok(IngestOutcome::Skipped {
                reason: reason::ALREADY_INGESTED_TODAY.to_string(),
            });
        }

        let text = match self.source.fetch_export().await {
            Ok(text) => text,
            Err(err) => {
                return Err(self
                    .fail(run_date, &trigger, reason::SOURCE_FETCH_FAILED, err.into())
                    .await)
            }
        };

        if let Err(err) = self.archive.store_export(run_date, &text).await {
            // Archival is best-effort; the run itself proceeds on live data.
            tracing::warn!(error = %err, "failed to archive fetched export");
        }

        let parsed = match parse_curve_sheet(&text) {
            Ok(parsed) => parsed,
            Err(err) => {
                return Err(self
                    .fail(run_date, &trigger, reason::SCHEMA_MISMATCH, err.into())
                    .await)
            }
        };
        if parsed.dropped_rows > 0 {
            tracing::warn!(
                dropped = parsed.dropped_rows,
                read = parsed.rows_read,
                "dropped malformed rows"
            );
        }
        if parsed.rows.is_empty() {
            let err = IngestError::NoRows {
                dropped: parsed.dropped_rows,
            };
            return Err(self
                .fail(run_date, &trigger, reason::NO_ROWS_IN_SOURCE, err)
                .await);
        }

        let mut rows = parsed.rows;
        let sheet_date = match check_sheet_dates(&mut rows, run_date, request.force) {
            Ok(date) => date,
            Err(err) => {
                let code = match &err {
                    DateCheckError::Ambiguous(_) => reason::AMBIGUOUS_AS_OF_DATE,
                    DateCheckError::Mismatch { .. } => reason::DATE_MISMATCH,
                };
                return Err(self.fail(run_date, &trigger, code, err.into()).await);
            }
        };

        let existing = match self.store.history_for_date(sheet_date).await {
            Ok(existing) => existing,
            Err(err) => {
                return Err(self
                    .fail(run_date, &trigger, reason::UNHANDLED_EXCEPTION, err.into())
                    .await)
            }
        };
        let purge_history = !existing.is_empty();
        if purge_history && !request.force {
            let run = IngestRun::skipped(run_date, trigger, reason::HISTORY_EXISTS_FOR_DATE);
            self.store.record_run(&run).await?;
            tracing::info!(
                as_of_date = %sheet_date,
                existing = existing.len(),
                "history already holds rows for date; resubmit with force to replace"
            );
            return Ok(IngestOutcome::Conflict {
                as_of_date: sheet_date,
                existing,
            });
        }

        let run = IngestRun::success(run_date, trigger.clone(), rows.len() as i32);
        match self
            .store
            .commit_batch(&rows, sheet_date, purge_history, &run)
            .await
        {
            Ok(row_count) => {
                tracing::info!(
                    as_of_date = %sheet_date,
                    row_count,
                    purged_prior = purge_history,
                    "ingestion run committed"
                );
                Ok(IngestOutcome::Success {
                    as_of_date: sheet_date,
                    row_count,
                    trigger_source: trigger,
                })
            }
            Err(err) => {
                Err(self
                    .fail(run_date, &trigger, reason::UNHANDLED_EXCEPTION, err.into())
                    .await)
            }
        }
    }

    /// Record the terminal error in the audit trail (its own unit of work,
    /// after any rollback), then hand the original error back. Best-effort:
    /// a run never goes unrecorded while the store is reachable.
    async fn fail(
        &self,
        run_date: NaiveDate,
        trigger: &TriggerSource,
        code: &str,
        err: IngestError,
    ) -> IngestError {
        tracing::error!(run_date = %run_date, reason = code, error = %err, "ingestion run failed");
        let run = IngestRun::error(run_date, trigger.clone(), code);
        if let Err(audit_err) = self.store.record_run(&run).await {
            tracing::error!(error = %audit_err, "failed to write error audit record");
        }
        err
    }
}

/// Convenience entry point used by the CLI: env config, one run.
pub async fn run_once_from_env(
    trigger_source: TriggerSource,
    force: bool,
) -> anyhow::Result<IngestOutcome> {
    let config = IngestConfig::from_env();
    let engine = IngestEngine::from_config(&config).await?;
    let outcome = engine
        .run(IngestRequest {
            trigger_source,
            force,
        })
        .await?;
    Ok(outcome)
}
