//! shiftagg - per-shift production metrics for factory lines
//!
//! Folds raw line events (units produced, defects, stop heartbeats) into one
//! bucket per production date, shift, and line.
//!
//! ## Usage
//!
//! ```bash
//! # Create the database
//! shiftagg init-db
//!
//! # Append events from a JSON-lines file (or stdin)
//! shiftagg ingest events.jsonl
//!
//! # Aggregate every 10 seconds until Ctrl-C
//! shiftagg run
//!
//! # Aggregate once and print the report
//! shiftagg once
//!
//! # Today's KPIs as JSON
//! shiftagg kpi
//! ```

use std::fs::File;
use std::future::Future;
use std::io::{BufRead, BufReader};
use std::path::PathBuf;
use std::process::ExitCode;
use std::sync::Arc;

use anyhow::Context;
use chrono::NaiveDate;
use clap::{Parser, Subcommand};
use shiftagg_config::Config;
use shiftagg_core::{LogGuard, ShiftaggError, Verbosity, init_logging};
use shiftagg_engine::{
    AggregationEngine, BucketQuery, EngineError, Scheduler, ShiftDatabase, ShiftResolver,
    ingest_batch,
};
use tracing::{error, info};

/// Incremental shift aggregation for factory line events
#[derive(Parser, Debug)]
#[command(name = "shiftagg")]
#[command(author, version, about, long_about = None)]
struct Cli {
    /// Increase log detail (-v debug, -vv per-event engine tracing)
    #[arg(short, long, action = clap::ArgAction::Count, global = true)]
    verbose: u8,

    /// Directory for log files (defaults to ~/.shiftagg/logs/)
    #[arg(long, global = true)]
    log_dir: Option<PathBuf>,

    /// Configuration file (defaults to ~/.shiftagg/config.yaml)
    #[arg(long, global = true)]
    config: Option<PathBuf>,

    /// Database file (overrides the configuration)
    #[arg(long, global = true)]
    db: Option<PathBuf>,

    #[command(subcommand)]
    command: Command,
}

#[derive(Subcommand, Debug)]
enum Command {
    /// Create the database and apply migrations
    InitDb,

    /// Run aggregation passes on an interval until Ctrl-C
    Run {
        /// Seconds between passes (overrides the configuration)
        #[arg(long, value_parser = clap::value_parser!(u64).range(1..))]
        interval: Option<u64>,
    },

    /// Run a single aggregation pass and print its report
    Once,

    /// Append JSON-lines events from a file, or stdin when omitted
    Ingest {
        /// Input file
        file: Option<PathBuf>,
    },

    /// Print shift KPIs for a production date as JSON
    Kpi {
        /// Production date (YYYY-MM-DD), defaults to the current one
        #[arg(long)]
        date: Option<NaiveDate>,
    },
}

fn main() -> ExitCode {
    let cli = Cli::parse();

    let config = match load_config(&cli) {
        Ok(config) => config,
        Err(e) => {
            eprintln!("Configuration error: {}", e);
            if let Some(hint) = e.guidance() {
                eprintln!("Hint: {}", hint);
            }
            return ExitCode::from(1);
        }
    };

    let _guard = match setup_logging(&cli, &config) {
        Ok(guard) => guard,
        Err(e) => {
            eprintln!("Failed to initialize logging: {}", e);
            return ExitCode::from(1);
        }
    };

    match run_command(cli.command, config) {
        Ok(()) => ExitCode::SUCCESS,
        Err(e) => {
            error!("shiftagg error: {:#}", e);
            match e.downcast_ref::<EngineError>() {
                Some(engine_err) => eprintln!("{}", engine_err.friendly_message()),
                None => eprintln!("Error: {:#}", e),
            }
            ExitCode::from(1)
        }
    }
}

/// Load the configuration file and apply CLI overrides.
fn load_config(cli: &Cli) -> shiftagg_core::Result<Config> {
    let mut config = Config::load(cli.config.as_deref())?;

    if let Some(db) = &cli.db {
        config = config.with_database_path(db.clone());
    }
    if let Command::Run {
        interval: Some(secs),
    } = &cli.command
    {
        config = config.with_interval_secs(*secs);
    }

    config.validate()?;
    Ok(config)
}

/// Set up logging based on CLI arguments and configuration.
fn setup_logging(cli: &Cli, config: &Config) -> shiftagg_core::Result<LogGuard> {
    let log_dir = cli.log_dir.clone().or_else(|| config.log_dir.clone());
    init_logging(log_dir, Verbosity::from(cli.verbose))
}

fn open_database(config: &Config) -> anyhow::Result<Arc<ShiftDatabase>> {
    let path = config.database_path()?;
    let db = ShiftDatabase::open(&path)
        .with_context(|| format!("opening database {}", path.display()))?;
    info!(path = %path.display(), "Opened database");
    Ok(Arc::new(db))
}

fn resolver(config: &Config) -> Result<ShiftResolver, ShiftaggError> {
    Ok(ShiftResolver::new(config.plant_zone()?, config.shift))
}

/// Resolve when `signal` fires. If the signal cannot be installed, never
/// resolve: the scheduler keeps running until the process is killed.
async fn shutdown_on<F>(signal: F)
where
    F: Future<Output = std::io::Result<()>>,
{
    if let Err(e) = signal.await {
        error!(error = %e, "Failed to listen for Ctrl-C, running until killed");
        std::future::pending::<()>().await;
    }
}

fn run_command(command: Command, config: Config) -> anyhow::Result<()> {
    match command {
        Command::InitDb => {
            let db = open_database(&config)?;
            println!(
                "Database ready at {} (schema v{})",
                config.database_path()?.display(),
                db.schema_version()?
            );
        }
        Command::Run { .. } => {
            let db = open_database(&config)?;
            let engine = Arc::new(AggregationEngine::new(db, resolver(&config)?));
            let scheduler = Scheduler::new(engine, config.interval());

            let runtime = tokio::runtime::Builder::new_multi_thread()
                .enable_all()
                .build()
                .context("starting async runtime")?;
            runtime.block_on(scheduler.run_until(shutdown_on(tokio::signal::ctrl_c())))?;
            info!("shiftagg stopped");
        }
        Command::Once => {
            let db = open_database(&config)?;
            let report = AggregationEngine::new(db, resolver(&config)?).run_pass()?;
            println!("{}", serde_json::to_string_pretty(&report)?);
        }
        Command::Ingest { file } => {
            let db = open_database(&config)?;
            let reader: Box<dyn BufRead> = match &file {
                Some(path) => Box::new(BufReader::new(
                    File::open(path).with_context(|| format!("opening {}", path.display()))?,
                )),
                None => Box::new(BufReader::new(std::io::stdin().lock())),
            };
            let count = ingest_batch(&db, reader)?;
            println!("Ingested {} events", count);
        }
        Command::Kpi { date } => {
            let db = open_database(&config)?;
            let query = BucketQuery::new(&db, resolver(&config)?);
            let date = date.unwrap_or_else(|| query.today_date());
            let summaries = query.summaries_for_date(date)?;
            println!("{}", serde_json::to_string_pretty(&summaries)?);
        }
    }

    Ok(())
}
