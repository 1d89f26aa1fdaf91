//! Pure decision logic: run-date resolution, duplicate guard, date checks.
//!
//! Everything here is side-effect free so the skip/abort rules can be tested
//! without a database.

use chrono::{DateTime, NaiveDate, Utc};
use chrono_tz::Tz;
use curvevault_core::{CurveRow, IngestRun, RunStatus, TriggerSource};
use thiserror::Error;

/// Project "now" into the reference timezone and take its calendar date.
/// This is the expected as-of date for the run and the audit-log query key,
/// independent of the server's local timezone.
pub fn resolve_run_date(now: DateTime<Utc>, tz: Tz) -> NaiveDate {
    now.with_timezone(&tz).date_naive()
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum GuardDecision {
    Proceed,
    Skip,
}

/// Skip-on-duplicate rule: a scheduled trigger that already succeeded today
/// is suppressed; manual triggers and forced runs always proceed.
pub fn guard_decision(
    prior: Option<&IngestRun>,
    trigger_source: &TriggerSource,
    force: bool,
) -> GuardDecision {
    if force || !trigger_source.is_scheduled() {
        return GuardDecision::Proceed;
    }
    match prior {
        Some(run) if run.status == RunStatus::Success => GuardDecision::Skip,
        _ => GuardDecision::Proceed,
    }
}

#[derive(Debug, Error, PartialEq, Eq)]
pub enum DateCheckError {
    #[error("expected exactly one as-of date, found {0:?}")]
    Ambiguous(Vec<NaiveDate>),
    #[error("sheet as-of date {sheet} does not match expected run date {expected}")]
    Mismatch { sheet: NaiveDate, expected: NaiveDate },
}

/// Validate that all rows share one as-of date matching the expected run
/// date. When forcing, the sheet's dates are overwritten with the expected
/// date and both checks are bypassed: force asserts that today's numbers are
/// authoritative regardless of what the source file claims.
pub fn check_sheet_dates(
    rows: &mut [CurveRow],
    expected: NaiveDate,
    force: bool,
) -> Result<NaiveDate, DateCheckError> {
    if force {
        for row in rows.iter_mut() {
            row.as_of_date = expected;
        }
        return Ok(expected);
    }

    let mut distinct: Vec<NaiveDate> = rows.iter().map(|r| r.as_of_date).collect();
    distinct.sort_unstable();
    distinct.dedup();

    match distinct.as_slice() {
        [single] => {
            if *single == expected {
                Ok(*single)
            } else {
                Err(DateCheckError::Mismatch {
                    sheet: *single,
                    expected,
                })
            }
        }
        _ => Err(DateCheckError::Ambiguous(distinct)),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::TimeZone;

    fn row(metal: &str, tenor: i32, date: NaiveDate) -> CurveRow {
        CurveRow {
            metal: metal.to_string(),
            tenor_months: tenor,
            price: 2100.0,
            real_10yr_yield: Some(1.9),
            dollar_index: Some(104.2),
            deficit_gdp_flag: Some(true),
            as_of_date: date,
        }
    }

    fn date(y: i32, m: u32, d: u32) -> NaiveDate {
        NaiveDate::from_ymd_opt(y, m, d).unwrap()
    }

    #[test]
    fn run_date_follows_the_reference_zone_not_utc() {
        let tz: Tz = "America/New_York".parse().unwrap();
        // 03:00 UTC is still the previous evening in New York.
        let late_evening = Utc.with_ymd_and_hms(2024, 3, 2, 3, 0, 0).single().unwrap();
        assert_eq!(resolve_run_date(late_evening, tz), date(2024, 3, 1));

        let midday = Utc.with_ymd_and_hms(2024, 3, 2, 15, 0, 0).single().unwrap();
        assert_eq!(resolve_run_date(midday, tz), date(2024, 3, 2));
    }

    #[test]
    fn scheduled_duplicate_success_is_skipped() {
        let prior = IngestRun::success(date(2024, 3, 1), TriggerSource::scheduled("cron"), 10);
        assert_eq!(
            guard_decision(Some(&prior), &TriggerSource::scheduled("cron"), false),
            GuardDecision::Skip
        );
    }

    #[test]
    fn manual_and_forced_runs_always_proceed() {
        let prior = IngestRun::success(date(2024, 3, 1), TriggerSource::scheduled("cron"), 10);
        assert_eq!(
            guard_decision(Some(&prior), &TriggerSource::manual("web"), false),
            GuardDecision::Proceed
        );
        assert_eq!(
            guard_decision(Some(&prior), &TriggerSource::scheduled("cron"), true),
            GuardDecision::Proceed
        );
    }

    #[test]
    fn no_prior_success_proceeds() {
        assert_eq!(
            guard_decision(None, &TriggerSource::scheduled("cron"), false),
            GuardDecision::Proceed
        );
        let prior = IngestRun::error(
            date(2024, 3, 1),
            TriggerSource::scheduled("cron"),
            curvevault_core::reason::DATE_MISMATCH,
        );
        assert_eq!(
            guard_decision(Some(&prior), &TriggerSource::scheduled("cron"), false),
            GuardDecision::Proceed
        );
    }

    #[test]
    fn single_matching_date_passes() {
        let mut rows = vec![row("gold", 12, date(2024, 3, 1)), row("silver", 6, date(2024, 3, 1))];
        assert_eq!(
            check_sheet_dates(&mut rows, date(2024, 3, 1), false),
            Ok(date(2024, 3, 1))
        );
    }

    #[test]
    fn multiple_dates_are_ambiguous() {
        let mut rows = vec![row("gold", 12, date(2024, 3, 1)), row("silver", 6, date(2024, 3, 2))];
        assert_eq!(
            check_sheet_dates(&mut rows, date(2024, 3, 1), false),
            Err(DateCheckError::Ambiguous(vec![date(2024, 3, 1), date(2024, 3, 2)]))
        );
    }

    #[test]
    fn empty_batch_is_ambiguous() {
        let mut rows: Vec<CurveRow> = vec![];
        assert_eq!(
            check_sheet_dates(&mut rows, date(2024, 3, 1), false),
            Err(DateCheckError::Ambiguous(vec![]))
        );
    }

    #[test]
    fn stale_date_is_a_mismatch() {
        let mut rows = vec![row("gold", 12, date(2024, 1, 1))];
        assert_eq!(
            check_sheet_dates(&mut rows, date(2024, 1, 2), false),
            Err(DateCheckError::Mismatch {
                sheet: date(2024, 1, 1),
                expected: date(2024, 1, 2),
            })
        );
    }

    #[test]
    fn force_overwrites_every_row_date() {
        let mut rows = vec![row("gold", 12, date(2024, 1, 1)), row("silver", 6, date(2024, 2, 1))];
        assert_eq!(
            check_sheet_dates(&mut rows, date(2024, 3, 1), true),
            Ok(date(2024, 3, 1))
        );
        assert!(rows.iter().all(|r| r.as_of_date == date(2024, 3, 1)));
    }
}
