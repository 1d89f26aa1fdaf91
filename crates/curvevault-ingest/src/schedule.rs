//! Cron wiring for scheduled ingestion runs.

use std::sync::Arc;

use anyhow::{Context, Result};
use tokio_cron_scheduler::{Job, JobScheduler};

use crate::engine::{IngestEngine, IngestRequest};

/// Build a scheduler firing the engine on the configured cron expression
/// with a `scheduled:cron` trigger, so the duplicate guard applies.
pub async fn build_scheduler(engine: Arc<IngestEngine>, cron: &str) -> Result<JobScheduler> {
    let sched = JobScheduler::new().await.context("creating scheduler")?;
    let job_engine = engine.clone();
    let job = Job::new_async(cron, move |_uuid, _lock| {
        let engine = job_engine.clone();
        Box::pin(async move {
            match engine.run(IngestRequest::scheduled("cron")).await {
                Ok(outcome) => tracing::info!(?outcome, "scheduled ingestion finished"),
                Err(err) => tracing::error!(error = %err, "scheduled ingestion failed"),
            }
        })
    })
    .with_context(|| format!("creating scheduler job for cron {cron}"))?;
    sched.add(job).await.context("adding scheduler job")?;
    Ok(sched)
}
