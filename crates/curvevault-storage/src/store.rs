//! Postgres-backed curve store: latest projection, history log, audit runs.
//!
//! The store owns the dual-write contract: `commit_batch` replaces the
//! latest-state rows for a date and appends to history in one transaction,
//! with the success audit record riding inside it. Error/skip audit records
//! go through `record_run` in their own unit of work so a failed data
//! transaction never leaves a run unrecorded.

use chrono::NaiveDate;
use curvevault_core::{
    CurveHistoryRow, CurveRow, IngestRun, LatestCurveRow, RunStatus, TriggerSource,
};
use serde::Serialize;
use sqlx::postgres::{PgPoolOptions, PgRow};
use sqlx::{PgPool, Row};
use thiserror::Error;

pub static MIGRATOR: sqlx::migrate::Migrator = sqlx::migrate!("../../migrations");

#[derive(Debug, Error)]
pub enum StoreError {
    #[error("database error: {0}")]
    Sqlx(#[from] sqlx::Error),
    #[error("running migrations: {0}")]
    Migrate(#[from] sqlx::migrate::MigrateError),
    #[error("audit row {id} has unknown status {status:?}")]
    UnknownStatus { id: uuid::Uuid, status: String },
}

/// Per-metal summary of what the latest projection currently covers.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct MetalCoverage {
    pub metal: String,
    pub row_count: i64,
    pub min_tenor_months: i32,
    pub max_tenor_months: i32,
    pub as_of_date: NaiveDate,
    pub last_updated_at: chrono::DateTime<chrono::Utc>,
}

#[derive(Clone)]
pub struct CurveStore {
    pool: PgPool,
}

impl CurveStore {
    pub fn new(pool: PgPool) -> Self {
        Self { pool }
    }

    pub async fn connect(database_url: &str) -> Result<Self, StoreError> {
        let pool = PgPoolOptions::new()
            .max_connections(5)
            .connect(database_url)
            .await?;
        Ok(Self { pool })
    }

    pub fn pool(&self) -> &PgPool {
        &self.pool
    }

    pub async fn migrate(&self) -> Result<(), StoreError> {
        MIGRATOR.run(&self.pool).await?;
        Ok(())
    }

    /// Duplicate-guard lookup: the newest `success` audit record for a run date.
    pub async fn latest_success_run(
        &self,
        run_date: NaiveDate,
    ) -> Result<Option<IngestRun>, StoreError> {
        let row = sqlx::query(
            r#"
            SELECT id, run_date, trigger_source, status, reason, row_count, recorded_at
              FROM ingest_runs
             WHERE run_date = $1
               AND status = 'success'
             ORDER BY recorded_at DESC
             LIMIT 1
            "#,
        )
        .bind(run_date)
        .fetch_optional(&self.pool)
        .await?;

        row.map(|r| ingest_run_from(&r)).transpose()
    }

    /// History-conflict lookup: every history entry already stored for a date.
    pub async fn history_for_date(
        &self,
        as_of_date: NaiveDate,
    ) -> Result<Vec<CurveHistoryRow>, StoreError> {
        let rows = sqlx::query(
            r#"
            SELECT id, metal, tenor_months, price, real_10yr_yield, dollar_index,
                   deficit_gdp_flag, as_of_date, inserted_at
              FROM curve_history
             WHERE as_of_date = $1
             ORDER BY metal, tenor_months
            "#,
        )
        .bind(as_of_date)
        .fetch_all(&self.pool)
        .await?;

        rows.iter().map(history_row_from).collect()
    }

    /// Transactional writer: one all-or-nothing unit of work per run.
    ///
    /// Purges prior history for the date when forcing, replaces the latest
    /// projection for the date, appends the batch to history, and records
    /// the success audit row, all inside the same transaction.
    pub async fn commit_batch(
        &self,
        rows: &[CurveRow],
        as_of_date: NaiveDate,
        purge_history: bool,
        run: &IngestRun,
    ) -> Result<usize, StoreError> {
        let mut tx = self.pool.begin().await?;

        if purge_history {
            sqlx::query("DELETE FROM curve_history WHERE as_of_date = $1")
                .bind(as_of_date)
                .execute(&mut *tx)
                .await?;
        }

        // Clear the date's latest rows first so stale tenors from a prior
        // partial run cannot linger past the replace.
        sqlx::query("DELETE FROM latest_curve WHERE as_of_date = $1")
            .bind(as_of_date)
            .execute(&mut *tx)
            .await?;

        for row in rows {
            sqlx::query(
                r#"
                INSERT INTO latest_curve
                    (metal, tenor_months, price, real_10yr_yield, dollar_index,
                     deficit_gdp_flag, as_of_date, updated_at)
                VALUES ($1, $2, $3, $4, $5, $6, $7, NOW())
                ON CONFLICT (metal, tenor_months) DO UPDATE SET
                    price = EXCLUDED.price,
                    real_10yr_yield = EXCLUDED.real_10yr_yield,
                    dollar_index = EXCLUDED.dollar_index,
                    deficit_gdp_flag = EXCLUDED.deficit_gdp_flag,
                    as_of_date = EXCLUDED.as_of_date,
                    updated_at = NOW()
                "#,
            )
            .bind(&row.metal)
            .bind(row.tenor_months)
            .bind(row.price)
            .bind(row.real_10yr_yield)
            .bind(row.dollar_index)
            .bind(row.deficit_gdp_flag)
            .bind(row.as_of_date)
            .execute(&mut *tx)
            .await?;

            sqlx::query(
                r#"
                INSERT INTO curve_history
                    (metal, tenor_months, price, real_10yr_yield, dollar_index,
                     deficit_gdp_flag, as_of_date, inserted_at)
                VALUES ($1, $2, $3, $4, $5, $6, $7, NOW())
                "#,
            )
            .bind(&row.metal)
            .bind(row.tenor_months)
            .bind(row.price)
            .bind(row.real_10yr_yield)
            .bind(row.dollar_index)
            .bind(row.deficit_gdp_flag)
            .bind(row.as_of_date)
            .execute(&mut *tx)
            .await?;
        }

        insert_run(&mut *tx, run).await?;
        tx.commit().await?;

        Ok(rows.len())
    }

    /// Audit write outside any data transaction (error/skip paths).
    pub async fn record_run(&self, run: &IngestRun) -> Result<(), StoreError> {
        insert_run(&self.pool, run).await?;
        Ok(())
    }

    pub async fn recent_runs(&self, limit: i64) -> Result<Vec<IngestRun>, StoreError> {
        let rows = sqlx::query(
            r#"
            SELECT id, run_date, trigger_source, status, reason, row_count, recorded_at
              FROM ingest_runs
             ORDER BY recorded_at DESC
             LIMIT $1
            "#,
        )
        .bind(limit)
        .fetch_all(&self.pool)
        .await?;

        rows.iter().map(ingest_run_from).collect()
    }

    pub async fn latest_rows(&self) -> Result<Vec<LatestCurveRow>, StoreError> {
        let rows = sqlx::query(
            r#"
            SELECT metal, tenor_months, price, real_10yr_yield, dollar_index,
                   deficit_gdp_flag, as_of_date, updated_at
              FROM latest_curve
             ORDER BY metal, tenor_months
            "#,
        )
        .fetch_all(&self.pool)
        .await?;

        rows.iter().map(latest_row_from).collect()
    }

    /// Coverage summary for the status surface, optionally pinned to a date.
    pub async fn latest_coverage(
        &self,
        date: Option<NaiveDate>,
    ) -> Result<Vec<MetalCoverage>, StoreError> {
        let rows = sqlx::query(
            r#"
            SELECT metal,
                   COUNT(*) AS row_count,
                   MIN(tenor_months) AS min_tenor_months,
                   MAX(tenor_months) AS max_tenor_months,
                   MAX(as_of_date) AS as_of_date,
                   MAX(updated_at) AS last_updated_at
              FROM latest_curve
             WHERE $1::date IS NULL OR as_of_date = $1
             GROUP BY metal
             ORDER BY metal
            "#,
        )
        .bind(date)
        .fetch_all(&self.pool)
        .await?;

        let mut out = Vec::with_capacity(rows.len());
        for row in &rows {
            out.push(MetalCoverage {
                metal: row.try_get("metal")?,
                row_count: row.try_get("row_count")?,
                min_tenor_months: row.try_get("min_tenor_months")?,
                max_tenor_months: row.try_get("max_tenor_months")?,
                as_of_date: row.try_get("as_of_date")?,
                last_updated_at: row.try_get("last_updated_at")?,
            });
        }
        Ok(out)
    }
}

async fn insert_run<'e, E>(executor: E, run: &IngestRun) -> Result<(), sqlx::Error>
where
    E: sqlx::PgExecutor<'e>,
{
    sqlx::query(
        r#"
        INSERT INTO ingest_runs
            (id, run_date, trigger_source, status, reason, row_count, recorded_at)
        VALUES ($1, $2, $3, $4, $5, $6, $7)
        "#,
    )
    .bind(run.id)
    .bind(run.run_date)
    .bind(run.trigger_source.as_str())
    .bind(run.status.as_str())
    .bind(&run.reason)
    .bind(run.row_count)
    .bind(run.recorded_at)
    .execute(executor)
    .await?;
    Ok(())
}

fn ingest_run_from(row: &PgRow) -> Result<IngestRun, StoreError> {
    let id: uuid::Uuid = row.try_get("id")?;
    let status: String = row.try_get("status")?;
    let status = RunStatus::parse(&status).ok_or(StoreError::UnknownStatus { id, status })?;
    Ok(IngestRun {
        id,
        run_date: row.try_get("run_date")?,
        trigger_source: TriggerSource::new(row.try_get::<String, _>("trigger_source")?),
        status,
        reason: row.try_get("reason")?,
        row_count: row.try_get("row_count")?,
        recorded_at: row.try_get("recorded_at")?,
    })
}

fn history_row_from(row: &PgRow) -> Result<CurveHistoryRow, StoreError> {
    Ok(CurveHistoryRow {
        id: row.try_get("id")?,
        metal: row.try_get("metal")?,
        tenor_months: row.try_get("tenor_months")?,
        price: row.try_get("price")?,
        real_10yr_yield: row.try_get("real_10yr_yield")?,
        dollar_index: row.try_get("dollar_index")?,
        deficit_gdp_flag: row.try_get("deficit_gdp_flag")?,
        as_of_date: row.try_get("as_of_date")?,
        inserted_at: row.try_get("inserted_at")?,
    })
}

fn latest_row_from(row: &PgRow) -> Result<LatestCurveRow, StoreError> {
    Ok(LatestCurveRow {
        metal: row.try_get("metal")?,
        tenor_months: row.try_get("tenor_months")?,
        price: row.try_get("price")?,
        real_10yr_yield: row.try_get("real_10yr_yield")?,
        dollar_index: row.try_get("dollar_index")?,
        deficit_gdp_flag: row.try_get("deficit_gdp_flag")?,
        as_of_date: row.try_get("as_of_date")?,
        updated_at: row.try_get("updated_at")?,
    })
}
