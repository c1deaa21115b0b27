use chrono::NaiveDate;
use clap::{Parser, Subcommand};
use daytrade_engine::{
    commands::{backtest, fetch_market_data, list_models},
    context::AppContext,
};
use log::info;
use std::path::PathBuf;

const DEFAULT_MARKET_DATA_FILE: &str = "data/market-data.bin";

#[derive(Parser)]
#[command(name = "daytrade-engine")]
#[command(about = "Daily screen, select and intraday-trade equities backtester")]
struct Cli {
    /// Settings file loaded before reading the environment (defaults to ./.env when present)
    #[arg(long = "env-file", value_name = "PATH", global = true)]
    env_file: Option<PathBuf>,
    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Run a backtest and write the JSON report
    Backtest {
        /// Screener name (see list-models)
        #[arg(long, default_value = "technical_momentum")]
        screener: String,
        /// Signal policy name (see list-models)
        #[arg(long, default_value = "ma_crossover")]
        policy: String,
        /// Screener parameter override, key=value (repeatable)
        #[arg(long = "screener-param", value_name = "KEY=VALUE")]
        screener_params: Vec<String>,
        /// Signal policy parameter override, key=value (repeatable)
        #[arg(long = "policy-param", value_name = "KEY=VALUE")]
        policy_params: Vec<String>,
        /// First simulated day (falls back to BACKTEST_START_DATE)
        #[arg(long)]
        start: Option<NaiveDate>,
        /// Last simulated day (falls back to BACKTEST_END_DATE)
        #[arg(long)]
        end: Option<NaiveDate>,
        /// Comma separated universe; defaults to the built-in liquid-equity list
        #[arg(long, value_delimiter = ',')]
        symbols: Vec<String>,
        /// Number of top-scoring candidates traded per day
        #[arg(long = "top-n", default_value_t = 5)]
        top_n: usize,
        /// Minimum screening score
        #[arg(long = "min-score", default_value_t = 50.0)]
        min_score: f64,
        /// Accept signals regardless of confidence
        #[arg(long)]
        force: bool,
        /// Market data snapshot to replay instead of calling Alpaca
        #[arg(long = "data-file", value_name = "PATH")]
        data_file: Option<PathBuf>,
        /// Report destination; printed to stdout when omitted
        #[arg(short, long, value_name = "PATH")]
        output: Option<PathBuf>,
        /// Draw a terminal progress bar instead of logging progress events
        #[arg(long)]
        progress_bar: bool,
    },
    /// Download daily and minute bars from Alpaca into a snapshot file
    FetchMarketData {
        #[arg(long)]
        start: NaiveDate,
        #[arg(long)]
        end: NaiveDate,
        /// Comma separated universe; defaults to the built-in liquid-equity list
        #[arg(long, value_delimiter = ',')]
        symbols: Vec<String>,
        /// Destination file for the snapshot
        #[arg(short, long = "output", value_name = "PATH")]
        output: Option<PathBuf>,
    },
    /// List available screeners and signal policies
    ListModels,
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    let cli = Cli::parse();
    let Cli { env_file, command } = cli;

    let app_context = AppContext::initialize(env_file.as_deref())?;
    env_logger::Builder::from_env(env_logger::Env::default().default_filter_or("info")).init();

    info!("Starting daytrade engine. Backtest results are not a prediction of live performance.");

    match command {
        Commands::Backtest {
            screener,
            policy,
            screener_params,
            policy_params,
            start,
            end,
            symbols,
            top_n,
            min_score,
            force,
            data_file,
            output,
            progress_bar,
        } => {
            let options = backtest::BacktestOptions {
                screener,
                policy,
                screener_params,
                policy_params,
                start_date: start,
                end_date: end,
                symbols,
                top_n,
                min_score,
                force_execution: force,
                data_file,
                output,
                show_progress: progress_bar,
            };
            backtest::run(&app_context, options).await?;
        }
        Commands::FetchMarketData {
            start,
            end,
            symbols,
            output,
        } => {
            let output_path = output.unwrap_or_else(|| PathBuf::from(DEFAULT_MARKET_DATA_FILE));
            fetch_market_data::run(&app_context, &symbols, start, end, &output_path).await?;
        }
        Commands::ListModels => list_models::run(),
    }

    Ok(())
}
