use std::path::PathBuf;
use std::sync::Arc;

use anyhow::Result;
use chrono::NaiveDate;
use clap::{Parser, Subcommand};
use curvevault_adapters::FileSheetSource;
use curvevault_core::TriggerSource;
use curvevault_ingest::{build_scheduler, IngestConfig, IngestEngine, IngestRequest};
use curvevault_storage::CurveStore;
use tracing_subscriber::EnvFilter;

#[derive(Debug, Parser)]
#[command(name = "curvevault-cli")]
#[command(about = "Commodity curve ingestion service")]
struct Cli {
    #[command(subcommand)]
    command: Commands,
}

#[derive(Debug, Subcommand)]
enum Commands {
    /// Run one ingestion now.
    Ingest {
        /// Trigger source recorded in the audit trail.
        #[arg(long, default_value = "manual:cli")]
        trigger: String,
        /// Bypass the date ambiguity/mismatch and history conflict checks.
        #[arg(long)]
        force: bool,
        /// Ingest a local CSV export instead of fetching the configured URL.
        #[arg(long)]
        file: Option<PathBuf>,
    },
    /// Apply database migrations.
    Migrate,
    /// Summarize latest coverage and recent runs.
    Status {
        #[arg(long)]
        date: Option<NaiveDate>,
    },
    /// Serve the read-only status API.
    Serve,
    /// Run the cron scheduler until interrupted.
    Schedule,
}

#[tokio::main]
async fn main() -> Result<()> {
    tracing_subscriber::fmt()
        .with_env_filter(
            EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info")),
        )
        .init();

    let cli = Cli::parse();
    let config = IngestConfig::from_env();

    match cli.command {
        Commands::Ingest {
            trigger,
            force,
            file,
        } => {
            let outcome = match file {
                Some(path) => {
                    let engine = IngestEngine::from_config_with_source(
                        &config,
                        Arc::new(FileSheetSource::new(path)),
                    )
                    .await?;
                    engine
                        .run(IngestRequest {
                            trigger_source: TriggerSource::new(trigger),
                            force,
                        })
                        .await?
                }
                None => {
                    curvevault_ingest::run_once_from_env(TriggerSource::new(trigger), force)
                        .await?
                }
            };
            println!("{}", serde_json::to_string_pretty(&outcome)?);
        }
        Commands::Migrate => {
            let store = CurveStore::connect(&config.database_url).await?;
            store.migrate().await?;
            println!("migrations applied");
        }
        Commands::Status { date } => {
            let store = CurveStore::connect(&config.database_url).await?;
            let coverage = store.latest_coverage(date).await?;
            if coverage.is_empty() {
                println!("latest projection is empty");
            }
            for c in &coverage {
                println!(
                    "{}: {} tenors ({}-{}m) as of {} (updated {})",
                    c.metal,
                    c.row_count,
                    c.min_tenor_months,
                    c.max_tenor_months,
                    c.as_of_date,
                    c.last_updated_at
                );
            }
            for run in store.recent_runs(10).await? {
                println!(
                    "run {} {} trigger={} status={} reason={} rows={}",
                    run.run_date,
                    run.recorded_at,
                    run.trigger_source,
                    run.status.as_str(),
                    run.reason.as_deref().unwrap_or("-"),
                    run.row_count
                );
            }
        }
        Commands::Serve => {
            let store = CurveStore::connect(&config.database_url).await?;
            curvevault_web::serve_from_env(Arc::new(store)).await?;
        }
        Commands::Schedule => {
            let engine = Arc::new(IngestEngine::from_config(&config).await?);
            let mut sched = build_scheduler(engine, &config.ingest_cron).await?;
            sched.start().await?;
            println!("scheduler running with cron {:?}; ctrl-c to stop", config.ingest_cron);
            tokio::signal::ctrl_c().await?;
            sched.shutdown().await?;
        }
    }

    Ok(())
}
