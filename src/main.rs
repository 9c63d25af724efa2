//! candlecast - next-candle forecaster
//!
//! Trains the forecasting model, decides when to retrain, predicts historical
//! windows and keeps the futures table reconciled against realized candles.
//! Every subcommand prints its result as JSON on stdout.
//!
//! # Usage
//! ```sh
//! candlecast import candles.json
//! candlecast train --days 30
//! candlecast series --start 2026-01-01T00:00:00Z --end 2026-01-02T00:00:00Z
//! candlecast run
//! ```

use anyhow::{Context, Result};
use candlecast::application::system::ForecastSystem;
use candlecast::config::Config;
use candlecast::domain::forecasting::TRAIN_JOB;
use candlecast::infrastructure::candle_file::read_candles;
use chrono::{DateTime, Utc};
use clap::{Parser, Subcommand};
use serde::Serialize;
use serde_json::json;
use std::path::PathBuf;
use tracing::{Level, error, info};
use tracing_subscriber::prelude::*;

#[derive(Parser)]
#[command(author, version, about = "Next-candle OHLC forecaster", long_about = None)]
struct Cli {
    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Train a new model bundle
    Train {
        /// Trailing days of history to train on (1-90)
        #[arg(short, long)]
        days: Option<u32>,

        /// Recency decay of sample weights, in (0, 1]
        #[arg(long)]
        decay: Option<f64>,
    },
    /// Train only when the retrain policy asks for it
    TrainAuto {
        #[arg(short, long)]
        days: Option<u32>,
    },
    /// Reconcile predictions for the given RFC 3339 times
    Reconcile {
        #[arg(required = true)]
        times: Vec<DateTime<Utc>>,
    },
    /// Reconcile every candle of the trailing window
    FuturesUpdate {
        #[arg(long)]
        hours: Option<u32>,
    },
    /// List stored futures records
    Futures {
        #[arg(long, requires = "end")]
        start: Option<DateTime<Utc>>,

        #[arg(long, requires = "start")]
        end: Option<DateTime<Utc>>,

        /// Only the newest N records
        #[arg(short, long)]
        limit: Option<usize>,
    },
    /// Predict every candle of a historical window
    Series {
        #[arg(long, requires = "end")]
        start: Option<DateTime<Utc>>,

        #[arg(long, requires = "start")]
        end: Option<DateTime<Utc>>,
    },
    /// Retrain decision, last training run and rolling error
    Status,
    /// Load candles from a JSON array or CSV file into the history
    Import { path: PathBuf },
    /// Run the scheduler until Ctrl+C
    Run,
}

fn print_json<T: Serialize>(value: &T) -> Result<()> {
    println!("{}", serde_json::to_string_pretty(value)?);
    Ok(())
}

fn range(
    start: Option<DateTime<Utc>>,
    end: Option<DateTime<Utc>>,
) -> Option<(DateTime<Utc>, DateTime<Utc>)> {
    start.zip(end)
}

#[tokio::main]
async fn main() -> Result<()> {
    dotenvy::dotenv().ok();

    // Logs go to stderr so stdout stays valid JSON
    let stderr_layer = tracing_subscriber::fmt::layer()
        .with_target(false)
        .with_writer(std::io::stderr);

    tracing_subscriber::registry()
        .with(tracing_subscriber::EnvFilter::from_default_env().add_directive(Level::INFO.into()))
        .with(stderr_layer)
        .init();

    let cli = Cli::parse();

    let config = Config::from_env().context("Failed to load configuration")?;
    let system = ForecastSystem::build(config).await?;

    match cli.command {
        Commands::Train { days, decay } => {
            let outcome = system.train(days, decay).await;
            print_json(&outcome)?;
            if !outcome.is_ok() {
                anyhow::bail!("Training failed: {}", outcome.message);
            }
        }
        Commands::TrainAuto { days } => {
            let outcome = system.auto_trainer.run(days).await?;
            print_json(&outcome)?;
        }
        Commands::Reconcile { times } => {
            let outcome = system.reconciler.reconcile(&times).await;
            print_json(&outcome)?;
        }
        Commands::FuturesUpdate { hours } => {
            let hours = hours.unwrap_or(system.config.service.futures_update_hours);
            let outcome = system.reconciler.update_recent(hours).await;
            print_json(&outcome)?;
        }
        Commands::Futures { start, end, limit } => {
            let points = system.reconciler.list(range(start, end), limit).await?;
            print_json(&points)?;
        }
        Commands::Series { start, end } => {
            let outcome = system.predictor.predict_series(range(start, end)).await;
            print_json(&outcome)?;
        }
        Commands::Status => {
            let decision = system.auto_trainer.decide_at(Utc::now()).await?;
            let last_run = system.persistence.job_log_repository.latest(TRAIN_JOB).await?;
            let rolling_n = system.auto_trainer.policy().rolling_n;
            let rolling_mape = system.reconciler.rolling_mape(rolling_n).await?;
            print_json(&json!({
                "decision": decision,
                "last_run": last_run,
                "futures_rolling_mape": rolling_mape,
                "futures_rolling_n": rolling_n,
                "policy": system.auto_trainer.policy(),
            }))?;
        }
        Commands::Import { path } => {
            let candles = read_candles(&path)?;
            let written = system.import_candles(&candles).await?;
            print_json(&json!({ "read": candles.len(), "written": written }))?;
        }
        Commands::Run => {
            info!(
                "candlecast {} starting scheduler. Press Ctrl+C to shutdown.",
                env!("CARGO_PKG_VERSION")
            );
            let scheduler = system.scheduler();
            scheduler
                .run(async {
                    match tokio::signal::ctrl_c().await {
                        Ok(()) => info!("Shutdown signal received."),
                        Err(e) => error!("Unable to listen for shutdown signal: {}", e),
                    }
                })
                .await;
            info!("Exiting.");
        }
    }

    Ok(())
}
