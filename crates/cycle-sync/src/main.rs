//! Photocycle sync worker - Main entry point

use std::process;
use std::sync::Arc;

use anyhow::{Context, Result};
use clap::{Parser, Subcommand};
use cycle_common::logging::{init_logging, LogConfig, LogLevel};
use tokio::signal;
use tokio::task::JoinHandle;
use tokio_util::sync::CancellationToken;
use tracing::{error, info};

use cycle_sync::api::HttpClientFactory;
use cycle_sync::config::Config;
use cycle_sync::db::{create_pool, migrate};
use cycle_sync::ingest::{
    BatchPersister, IngestionJob, NetprintJob, PgStore, PollScheduler, RetryPolicy,
};

#[derive(Parser)]
#[command(name = "cycle-sync", version, about = "Photocycle package sync worker")]
struct Cli {
    /// Log at debug level
    #[arg(short, long, global = true)]
    verbose: bool,

    #[command(subcommand)]
    command: Command,
}

#[derive(Subcommand)]
enum Command {
    /// Run the enabled sync jobs until interrupted
    Run,
    /// Run one ingestion cycle and print its counters
    Once,
    /// Run one netprint sync and print its counters
    Netprint {
        /// Hours to look back before the last sync (overrides NETPRINT_OFFSET_HOURS)
        #[arg(long)]
        offset_hours: Option<i64>,
    },
    /// Apply database migrations
    Migrate,
}

#[tokio::main]
async fn main() {
    let cli = Cli::parse();

    let log_config = LogConfig::builder()
        .level(if cli.verbose { LogLevel::Debug } else { LogLevel::Info })
        .log_file_prefix("cycle-sync")
        .filter_directives("cycle_sync=debug,sqlx=warn,reqwest=info")
        .build();

    // Environment takes precedence
    let log_config = log_config.clone().merge_env().unwrap_or(log_config);

    if let Err(e) = init_logging(&log_config) {
        eprintln!("Failed to initialise logging: {}", e);
    }

    if let Err(e) = execute(&cli).await {
        error!(error = %e, "Command failed");
        eprintln!("Error: {:#}", e);
        process::exit(1);
    }
}

async fn execute(cli: &Cli) -> Result<()> {
    let config = Config::load().context("Failed to load configuration")?;
    let pool = create_pool(&config.database)
        .await
        .context("Failed to connect to the database")?;
    info!("Database connection pool established");

    if let Command::Migrate = cli.command {
        migrate(&pool).await.context("Failed to run migrations")?;
        return Ok(());
    }

    let store = Arc::new(PgStore::new(
        pool,
        BatchPersister::new(config.sync.max_params_per_statement),
    ));
    let clients =
        Arc::new(HttpClientFactory::new(&config.api).context("Failed to build the HTTP client")?);
    let policy = RetryPolicy::new(config.sync.max_attempts);

    match cli.command {
        Command::Once => {
            let mut job = IngestionJob::new(store, clients, policy);
            job.load_mappings().await?;
            let stats = job.run_cycle(&CancellationToken::new()).await?;
            println!("{}", serde_json::to_string_pretty(&stats)?);
        },
        Command::Netprint { offset_hours } => {
            let netprint = config.netprint.clone().with_offset_hours(offset_hours);
            let mut job = NetprintJob::new(store, clients, netprint);
            job.resolve_source().await?;
            let stats = job.sync(&CancellationToken::new()).await?;
            println!("{}", serde_json::to_string_pretty(&stats)?);
        },
        Command::Run => {
            let cancel = CancellationToken::new();
            let mut handles = Vec::new();

            if config.sync.enabled {
                let job = IngestionJob::new(store.clone(), clients.clone(), policy);
                let scheduler = PollScheduler::new(config.sync.interval()).with_job(job);
                handles.push(spawn_scheduler(scheduler, cancel.clone()));
                info!(
                    interval_minutes = config.sync.interval_minutes,
                    "Package ingestion started"
                );
            } else {
                info!("Package ingestion is disabled (SYNC_FILL_BOXES_ENABLED=false)");
            }

            if config.netprint.enabled {
                let job = NetprintJob::new(store.clone(), clients.clone(), config.netprint.clone());
                let scheduler = PollScheduler::new(config.netprint.interval()).with_job(job);
                handles.push(spawn_scheduler(scheduler, cancel.clone()));
                info!(
                    source = config.netprint.source,
                    interval_minutes = config.netprint.interval_minutes,
                    "Netprint sync started"
                );
            } else {
                info!("Netprint sync is disabled (NETPRINT_ENABLED=false)");
            }

            if handles.is_empty() {
                anyhow::bail!("No sync job is enabled");
            }

            tokio::spawn(shutdown_signal(cancel.clone()));

            let mut failed = false;
            for handle in handles {
                match handle.await {
                    Ok(Ok(())) => {},
                    Ok(Err(e)) => {
                        error!(error = %e, "Scheduler stopped with error");
                        failed = true;
                    },
                    Err(e) => {
                        error!(error = %e, "Scheduler task panicked");
                        failed = true;
                        cancel.cancel();
                    },
                }
            }
            if failed {
                anyhow::bail!("Sync worker stopped after a scheduler failure");
            }
            info!("Sync worker shut down gracefully");
        },
        Command::Migrate => {},
    }

    Ok(())
}

/// Run `scheduler` in its own task; a scheduler that fails to start stops
/// the others as well.
fn spawn_scheduler(
    scheduler: PollScheduler,
    cancel: CancellationToken,
) -> JoinHandle<cycle_sync::Result<()>> {
    tokio::spawn(async move {
        let result = scheduler.run(cancel.clone()).await;
        if result.is_err() {
            cancel.cancel();
        }
        result
    })
}

/// Cancel `cancel` on Ctrl+C or SIGTERM.
async fn shutdown_signal(cancel: CancellationToken) {
    let ctrl_c = async {
        if let Err(e) = signal::ctrl_c().await {
            error!("Failed to install Ctrl+C handler: {}", e);
            std::future::pending::<()>().await;
        }
    };

    #[cfg(unix)]
    let terminate = async {
        match signal::unix::signal(signal::unix::SignalKind::terminate()) {
            Ok(mut signal) => {
                signal.recv().await;
            },
            Err(e) => {
                error!("Failed to install SIGTERM handler: {}", e);
                std::future::pending::<()>().await;
            },
        }
    };

    #[cfg(not(unix))]
    let terminate = std::future::pending::<()>();

    tokio::select! {
        _ = ctrl_c => info!("Received Ctrl+C, starting graceful shutdown"),
        _ = terminate => info!("Received terminate signal, starting graceful shutdown"),
        _ = cancel.cancelled() => return,
    }

    cancel.cancel();
}
