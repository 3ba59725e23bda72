use std::sync::{Arc, Mutex};

use anyhow::{bail, Context};
use chrono::Utc;
use clap::Parser;
use cronkeeper_core::CronkeeperConfig;
use cronkeeper_scheduler::{
    Activation, Cadence, RunInstance, RunStatus, ScheduleFilter, ScheduleManager, ScheduleReason,
    TickEngine,
};
use tracing::{info, warn};
use tracing_subscriber::{fmt, layer::SubscriberExt, util::SubscriberInitExt, EnvFilter};

mod cli;

use cli::{Cli, Commands};

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    let cli = Cli::parse();

    // explicit --config > CRONKEEPER_CONFIG env > ~/.cronkeeper/cronkeeper.toml
    let config_path = cli
        .config
        .clone()
        .or_else(|| std::env::var("CRONKEEPER_CONFIG").ok());
    let loaded = CronkeeperConfig::load(config_path.as_deref());
    let config = match &loaded {
        Ok(config) => config.clone(),
        Err(_) => CronkeeperConfig::default(),
    };

    init_tracing(config.scheduler.log_file.as_deref())?;
    if let Err(e) = loaded {
        warn!("Config load failed ({}), using defaults", e);
    }

    let db_path = &config.database.path;
    ensure_parent_dir(db_path);
    info!(path = %db_path, "opening SQLite database");
    let db = rusqlite::Connection::open(db_path)?;
    db.execute_batch("PRAGMA journal_mode=WAL; PRAGMA busy_timeout=5000;")?;

    let manager = ScheduleManager::open(db, &config)?;
    let now = Utc::now();

    match cli.command {
        Commands::Tick => {
            let report = manager.tick(now)?;
            println!(
                "generate: {}",
                if report.generate.skipped {
                    "not due".to_string()
                } else {
                    format!(
                        "{} created for {} jobs, {} duplicates removed",
                        report.generate.created,
                        report.generate.jobs_considered,
                        report.generate.purge.removed
                    )
                }
            );
            println!(
                "sweep: {} overdue, {} skipped",
                report.sweep.overdue, report.sweep.skipped
            );
            println!(
                "cleanup: {}",
                if report.cleanup.skipped {
                    "not due".to_string()
                } else {
                    format!(
                        "{} expired, {} over cap",
                        report.cleanup.expired, report.cleanup.over_cap
                    )
                }
            );
        }
        Commands::Daemon { every } => {
            let every = every.unwrap_or(config.scheduler.tick_interval_secs);
            let engine = TickEngine::new(Arc::new(manager), every);
            let (shutdown_tx, shutdown_rx) = tokio::sync::watch::channel(false);
            let task = tokio::spawn(engine.run(shutdown_rx));

            tokio::signal::ctrl_c()
                .await
                .context("listening for Ctrl-C")?;
            info!("shutdown requested");
            let _ = shutdown_tx.send(true);
            task.await?;
        }
        Commands::Generate => {
            let report = manager.generate(now)?;
            if report.skipped {
                println!("generation not due yet");
            } else {
                println!(
                    "{} runs created, {} duplicates removed",
                    report.created, report.purge.removed
                );
            }
        }
        Commands::Sweep { busy } => {
            let report = manager.sweep(now)?;
            println!(
                "{} overdue, {} kept, {} skipped, {} lost",
                report.overdue, report.kept, report.skipped, report.lost
            );
            if busy {
                println!("{} skipped behind running jobs", manager.skip_busy(now)?);
            }
        }
        Commands::Cleanup => {
            let report = manager.cleanup(now)?;
            if report.skipped {
                println!("cleanup not due yet");
            } else {
                println!(
                    "{} expired, {} over cap",
                    report.expired, report.over_cap
                );
            }
        }
        Commands::Flush { job } => {
            let removed = manager.flush(job.as_deref(), now)?;
            println!("{removed} pending runs flushed");
        }
        Commands::DeleteAll { yes } => {
            if !yes {
                bail!("refusing to delete every run without --yes");
            }
            println!("{} runs deleted", manager.delete_all()?);
        }
        Commands::Activate { code, reason } => {
            let reason = reason
                .as_deref()
                .map(str::parse::<ScheduleReason>)
                .transpose()?;
            match manager.activate_always(&code, reason, now)? {
                Activation::Created(run) => print_runs(&[run])?,
                Activation::AlreadyRunning => println!("{code} is already running"),
            }
        }
        Commands::Cadence => match manager.measure_interval()? {
            Cadence::Insufficient { samples } => {
                println!("not enough invocations recorded yet ({samples})")
            }
            measured => println!("{}", serde_json::to_string_pretty(&measured)?),
        },
        Commands::List { status, job, limit } => {
            let mut filter = ScheduleFilter::new().limit(limit);
            if let Some(status) = status {
                filter = filter.status(status.parse::<RunStatus>()?);
            }
            if let Some(job) = job {
                filter = filter.job_code(job);
            }
            print_runs(&manager.store().list(&filter)?)?;
        }
        Commands::Pending { only, except } => {
            print_runs(&manager.pending_due(now, &only, &except)?)?;
        }
    }
    Ok(())
}

fn print_runs(runs: &[RunInstance]) -> anyhow::Result<()> {
    println!("{}", serde_json::to_string_pretty(runs)?);
    Ok(())
}

/// Stderr logging filtered by RUST_LOG, plus an optional plain-text copy
/// appended to `log_file`.
fn init_tracing(log_file: Option<&str>) -> anyhow::Result<()> {
    let env_filter =
        EnvFilter::try_from_default_env().unwrap_or_else(|_| "cronkeeper=info".into());

    let file_layer = match log_file {
        Some(path) => {
            ensure_parent_dir(path);
            let file = std::fs::OpenOptions::new()
                .create(true)
                .append(true)
                .open(path)
                .with_context(|| format!("opening log file {path}"))?;
            Some(
                fmt::layer()
                    .with_writer(Mutex::new(file))
                    .with_ansi(false),
            )
        }
        None => None,
    };

    tracing_subscriber::registry()
        .with(env_filter)
        .with(fmt::layer().with_writer(std::io::stderr))
        .with(file_layer)
        .init();
    Ok(())
}

/// Ensure the parent directory for a file path exists.
fn ensure_parent_dir(path: &str) {
    if let Some(parent) = std::path::Path::new(path).parent() {
        let _ = std::fs::create_dir_all(parent);
    }
}
