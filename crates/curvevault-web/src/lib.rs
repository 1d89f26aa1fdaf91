//! Read-only status surface over the curve store.
//!
//! Reporting only: ingestion is triggered from the CLI or the scheduler,
//! never through this router.

use std::sync::Arc;

use async_trait::async_trait;
use axum::{
    extract::{Query, State},
    http::StatusCode,
    response::{IntoResponse, Response},
    routing::get,
    Json, Router,
};
use chrono::NaiveDate;
use curvevault_core::{IngestRun, LatestCurveRow};
use curvevault_storage::{CurveStore, MetalCoverage};
use serde::{Deserialize, Serialize};
use tokio::net::TcpListener;

pub const CRATE_NAME: &str = "curvevault-web";

/// Query seam for the handlers; the store implements it in production and
/// tests substitute a stub.
#[async_trait]
pub trait StatusBackend: Send + Sync {
    async fn coverage(&self, date: Option<NaiveDate>) -> anyhow::Result<Vec<MetalCoverage>>;
    async fn recent_runs(&self, limit: i64) -> anyhow::Result<Vec<IngestRun>>;
    async fn latest_rows(&self) -> anyhow::Result<Vec<LatestCurveRow>>;
}

#[async_trait]
impl StatusBackend for CurveStore {
    async fn coverage(&self, date: Option<NaiveDate>) -> anyhow::Result<Vec<MetalCoverage>> {
        Ok(self.latest_coverage(date).await?)
    }

    async fn recent_runs(&self, limit: i64) -> anyhow::Result<Vec<IngestRun>> {
        Ok(CurveStore::recent_runs(self, limit).await?)
    }

    async fn latest_rows(&self) -> anyhow::Result<Vec<LatestCurveRow>> {
        Ok(CurveStore::latest_rows(self).await?)
    }
}

#[derive(Clone)]
pub struct AppState {
    backend: Arc<dyn StatusBackend>,
}

impl AppState {
    pub fn new(backend: Arc<dyn StatusBackend>) -> Self {
        Self { backend }
    }
}

pub fn app(state: AppState) -> Router {
    Router::new()
        .route("/status", get(status_handler))
        .route("/runs", get(runs_handler))
        .route("/curve/latest", get(latest_handler))
        .with_state(state)
}

pub async fn serve_from_env(backend: Arc<dyn StatusBackend>) -> anyhow::Result<()> {
    let port: u16 = std::env::var("CURVEVAULT_WEB_PORT")
        .ok()
        .and_then(|v| v.parse().ok())
        .unwrap_or(8000);
    let listener = TcpListener::bind(("0.0.0.0", port)).await?;
    axum::serve(listener, app(AppState::new(backend))).await?;
    Ok(())
}

#[derive(Debug, Deserialize, Default)]
struct StatusQuery {
    date: Option<NaiveDate>,
}

#[derive(Debug, Serialize)]
struct StatusResponse {
    date_filter: Option<NaiveDate>,
    coverage: Vec<MetalCoverage>,
    last_run: Option<IngestRun>,
}

async fn status_handler(
    State(state): State<AppState>,
    Query(query): Query<StatusQuery>,
) -> Response {
    let coverage = match state.backend.coverage(query.date).await {
        Ok(coverage) => coverage,
        Err(err) => return server_error(err),
    };
    let last_run = match state.backend.recent_runs(1).await {
        Ok(mut runs) => runs.pop(),
        Err(err) => return server_error(err),
    };
    Json(StatusResponse {
        date_filter: query.date,
        coverage,
        last_run,
    })
    .into_response()
}

#[derive(Debug, Deserialize, Default)]
struct RunsQuery {
    limit: Option<i64>,
}

async fn runs_handler(State(state): State<AppState>, Query(query): Query<RunsQuery>) -> Response {
    let limit = query.limit.unwrap_or(50).clamp(1, 200);
    match state.backend.recent_runs(limit).await {
        Ok(runs) => Json(runs).into_response(),
        Err(err) => server_error(err),
    }
}

async fn latest_handler(State(state): State<AppState>) -> Response {
    match state.backend.latest_rows().await {
        Ok(rows) => Json(rows).into_response(),
        Err(err) => server_error(err),
    }
}

fn server_error(err: anyhow::Error) -> Response {
    (
        StatusCode::INTERNAL_SERVER_ERROR,
        Json(serde_json::json!({ "error": err.to_string() })),
    )
        .into_response()
}

#[cfg(test)]
mod tests {
    use super::*;
    use axum::body::Body;
    use chrono::{TimeZone, Utc};
    use curvevault_core::{RunStatus, TriggerSource};
    use http_body_util::BodyExt;
    use tower::ServiceExt;
    use uuid::Uuid;

    struct StubBackend;

    fn date(y: i32, m: u32, d: u32) -> NaiveDate {
        NaiveDate::from_ymd_opt(y, m, d).unwrap()
    }

    #[async_trait]
    impl StatusBackend for StubBackend {
        async fn coverage(&self, date: Option<NaiveDate>) -> anyhow::Result<Vec<MetalCoverage>> {
            let as_of_date = date.unwrap_or_else(|| self::date(2024, 3, 1));
            Ok(vec![MetalCoverage {
                metal: "gold".to_string(),
                row_count: 8,
                min_tenor_months: 1,
                max_tenor_months: 60,
                as_of_date,
                last_updated_at: Utc.with_ymd_and_hms(2024, 3, 1, 22, 40, 0).single().unwrap(),
            }])
        }

        async fn recent_runs(&self, limit: i64) -> anyhow::Result<Vec<IngestRun>> {
            let run = IngestRun {
                id: Uuid::new_v4(),
                run_date: date(2024, 3, 1),
                trigger_source: TriggerSource::scheduled("cron"),
                status: RunStatus::Success,
                reason: None,
                row_count: 8,
                recorded_at: Utc.with_ymd_and_hms(2024, 3, 1, 22, 40, 0).single().unwrap(),
            };
            Ok(std::iter::repeat_with(|| run.clone())
                .take(limit.min(3) as usize)
                .collect())
        }

        async fn latest_rows(&self) -> anyhow::Result<Vec<LatestCurveRow>> {
            Ok(vec![LatestCurveRow {
                metal: "gold".to_string(),
                tenor_months: 12,
                price: 2100.0,
                real_10yr_yield: Some(1.9),
                dollar_index: Some(104.2),
                deficit_gdp_flag: Some(true),
                as_of_date: date(2024, 3, 1),
                updated_at: Utc.with_ymd_and_hms(2024, 3, 1, 22, 40, 0).single().unwrap(),
            }])
        }
    }

    fn test_app() -> Router {
        app(AppState::new(Arc::new(StubBackend)))
    }

    async fn body_text(resp: Response) -> String {
        let bytes = resp.into_body().collect().await.unwrap().to_bytes();
        String::from_utf8(bytes.to_vec()).unwrap()
    }

    #[tokio::test]
    async fn status_reports_coverage_and_last_run() {
        let resp = test_app()
            .oneshot(
                axum::http::Request::builder()
                    .uri("/status")
                    .body(Body::empty())
                    .unwrap(),
            )
            .await
            .unwrap();
        assert_eq!(resp.status(), StatusCode::OK);
        let text = body_text(resp).await;
        assert!(text.contains("\"gold\""));
        assert!(text.contains("\"last_run\""));
    }

    #[tokio::test]
    async fn status_accepts_a_date_override() {
        let resp = test_app()
            .oneshot(
                axum::http::Request::builder()
                    .uri("/status?date=2024-02-15")
                    .body(Body::empty())
                    .unwrap(),
            )
            .await
            .unwrap();
        assert_eq!(resp.status(), StatusCode::OK);
        let text = body_text(resp).await;
        assert!(text.contains("2024-02-15"));
    }

    #[tokio::test]
    async fn runs_respects_the_limit_parameter() {
        let resp = test_app()
            .oneshot(
                axum::http::Request::builder()
                    .uri("/runs?limit=1")
                    .body(Body::empty())
                    .unwrap(),
            )
            .await
            .unwrap();
        assert_eq!(resp.status(), StatusCode::OK);
        let text = body_text(resp).await;
        let runs: serde_json::Value = serde_json::from_str(&text).unwrap();
        assert_eq!(runs.as_array().unwrap().len(), 1);
    }

    #[tokio::test]
    async fn latest_serves_projection_rows() {
        let resp = test_app()
            .oneshot(
                axum::http::Request::builder()
                    .uri("/curve/latest")
                    .body(Body::empty())
                    .unwrap(),
            )
            .await
            .unwrap();
        assert_eq!(resp.status(), StatusCode::OK);
        let text = body_text(resp).await;
        assert!(text.contains("\"tenor_months\":12"));
    }
}
