//! CDS Engine - Main entry point

use std::sync::Arc;

use anyhow::{Context, Result};
use cds_common::logging::{init_logging, LogConfig};
use clap::{Parser, Subcommand};
use tokio::signal;
use tokio_cron_scheduler::{Job, JobScheduler};
use tracing::info;

use cds_engine::cds::{CdsScheduler, CycleOptions, SyncExecutor, TracingStatsChannel};
use cds_engine::config::EngineConfig;
use cds_engine::db::{self, PgSyncStore};
use cds_engine::services::{HttpQueryService, HttpRowService, SqlFilterCompiler};

#[derive(Parser, Debug)]
#[command(name = "cds-engine")]
#[command(about = "Synchronizes common datasets into destination tables", long_about = None)]
#[command(version)]
struct Cli {
    #[command(subcommand)]
    command: Command,
}

#[derive(Subcommand, Debug)]
enum Command {
    /// Run sync cycles on the configured schedule until interrupted
    Serve,

    /// Run a single sync cycle and exit
    RunOnce {
        /// Sync regardless of the sync window and the source version
        #[arg(long)]
        force: bool,

        /// Only sync this dataset
        #[arg(long)]
        dataset_id: Option<i64>,
    },
}

#[tokio::main]
async fn main() -> Result<()> {
    let cli = Cli::parse();

    // Environment variables take precedence over these defaults
    let log_config = LogConfig::builder()
        .log_file_prefix("cds-engine")
        .filter_directives("cds_engine=info,cds_stats=info,sqlx=warn")
        .build()
        .apply_env()?;
    let _log_guard = init_logging(&log_config)?;

    let config = EngineConfig::load()?;
    info!(
        row_service = %config.row_service.base_url,
        query_service = %config.query_service.base_url,
        workers = config.scheduler.workers,
        "Configuration loaded"
    );

    let pool = db::create_pool(&config.database).await?;
    if config.scheduler.run_migrations {
        db::run_migrations(&pool).await?;
    }

    let scheduler = Arc::new(build_scheduler(&config, pool)?);

    match cli.command {
        Command::Serve => serve(scheduler).await,
        Command::RunOnce { force, dataset_id } => {
            let summary = scheduler
                .run_cycle(CycleOptions { force, dataset_id })
                .await?;
            info!(
                synced = summary.synced,
                failed = summary.failed,
                "Single cycle complete"
            );
            Ok(())
        }
    }
}

fn build_scheduler(config: &EngineConfig, pool: sqlx::PgPool) -> Result<CdsScheduler> {
    let rows = Arc::new(
        HttpRowService::new(&config.row_service).context("Failed to build row service client")?,
    );
    let query = Arc::new(
        HttpQueryService::new(&config.query_service)
            .context("Failed to build query service client")?,
    );

    let executor = SyncExecutor::new(
        rows.clone(),
        query.clone(),
        Arc::new(TracingStatsChannel),
        config.limits,
    )
    .with_lang(config.scheduler.lang.clone())
    .with_operator(config.scheduler.operator.clone());

    Ok(CdsScheduler::new(
        Arc::new(PgSyncStore::new(pool)),
        rows,
        query,
        Arc::new(SqlFilterCompiler::new()),
        executor,
        config.scheduler.clone(),
        config.limits,
    ))
}

async fn serve(scheduler: Arc<CdsScheduler>) -> Result<()> {
    if !scheduler.config().enabled {
        info!("Scheduler is disabled (CDS_SCHEDULER_ENABLED=false), nothing to do");
        return Ok(());
    }

    let schedule = scheduler.config().schedule.clone();
    let mut jobs = JobScheduler::new().await.context("creating scheduler")?;

    let job = Job::new_async(schedule.as_str(), move |_uuid, _lock| {
        let scheduler = Arc::clone(&scheduler);
        Box::pin(async move {
            scheduler.tick().await;
        })
    })
    .with_context(|| format!("creating sync job for cron {}", schedule))?;

    jobs.add(job).await.context("adding sync job")?;
    jobs.start().await.context("starting scheduler")?;
    info!(schedule = %schedule, "Sync scheduler started");

    shutdown_signal().await;

    jobs.shutdown().await.context("stopping scheduler")?;
    info!("Sync scheduler shut down");

    Ok(())
}

async fn shutdown_signal() {
    let ctrl_c = async {
        if let Err(e) = signal::ctrl_c().await {
            tracing::error!("Failed to install Ctrl+C handler: {}", e);
        }
    };

    #[cfg(unix)]
    let terminate = async {
        match signal::unix::signal(signal::unix::SignalKind::terminate()) {
            Ok(mut signal) => {
                signal.recv().await;
            }
            Err(e) => {
                tracing::error!("Failed to install SIGTERM handler: {}", e);
            }
        }
    };

    #[cfg(not(unix))]
    let terminate = std::future::pending::<()>();

    tokio::select! {
        _ = ctrl_c => {
            info!("Received Ctrl+C, shutting down");
        },
        _ = terminate => {
            info!("Received terminate signal, shutting down");
        },
    }
}
