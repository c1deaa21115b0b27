use crate::config::require_setting_date;
use crate::context::AppContext;
use crate::models::BacktestReport;
use crate::param_utils::{format_params, parse_param_pairs};
use crate::progress::{IndicatifSink, LogSink, ProgressSink};
use crate::scheduler::{DayScheduler, RunRequest};
use crate::screener::{ManualScreener, Screener, ScreenerKind};
use crate::strategy::SignalPolicyKind;
use crate::universe::resolve_universe;
use anyhow::{Context, Result};
use chrono::NaiveDate;
use log::info;
use std::fs;
use std::io::BufWriter;
use std::path::{Path, PathBuf};

#[derive(Debug, Clone)]
pub struct BacktestOptions {
    pub screener: String,
    pub policy: String,
    pub screener_params: Vec<String>,
    pub policy_params: Vec<String>,
    pub start_date: Option<NaiveDate>,
    pub end_date: Option<NaiveDate>,
    pub symbols: Vec<String>,
    pub top_n: usize,
    pub min_score: f64,
    pub force_execution: bool,
    pub data_file: Option<PathBuf>,
    pub output: Option<PathBuf>,
    pub show_progress: bool,
}

pub async fn run(app: &AppContext, options: BacktestOptions) -> Result<BacktestReport> {
    let config = app.backtest_config()?;
    let start_date = match options.start_date {
        Some(date) => date,
        None => require_setting_date(app.settings(), "BACKTEST_START_DATE")?,
    };
    let end_date = match options.end_date {
        Some(date) => date,
        None => require_setting_date(app.settings(), "BACKTEST_END_DATE")?,
    };

    let universe = resolve_universe(&options.symbols);
    let screener_kind: ScreenerKind = options.screener.parse()?;
    let policy_kind: SignalPolicyKind = options.policy.parse()?;
    let screener_params = parse_param_pairs(&options.screener_params)?;
    let policy_params = parse_param_pairs(&options.policy_params)?;
    info!(
        "Screener {} ({}), signal policy {} ({})",
        screener_kind,
        format_params(&screener_params),
        policy_kind,
        format_params(&policy_params)
    );

    let screener: Box<dyn Screener> = match screener_kind {
        ScreenerKind::Manual => Box::new(ManualScreener::new(universe.clone())),
        kind => kind.build(screener_params),
    };
    let mut policy = policy_kind.build(policy_params);

    let gateway = app.market_data_gateway(options.data_file.as_deref())?;
    let request = RunRequest {
        start_date,
        end_date,
        universe,
        top_n: options.top_n,
        min_score: options.min_score,
        force_execution: options.force_execution,
    };

    info!(
        "Backtesting {} + {} from {} to {} (top {}, min score {})",
        screener_kind, policy_kind, start_date, end_date, request.top_n, request.min_score
    );

    let sink: Box<dyn ProgressSink> = if options.show_progress {
        Box::new(IndicatifSink::new())
    } else {
        Box::new(LogSink)
    };
    let scheduler = DayScheduler::new(&config, gateway.as_ref());
    let report = scheduler
        .run(screener.as_ref(), policy.as_mut(), &request, sink.as_ref())
        .await?;

    info!(
        "{}: {} closed trades, win rate {:.1}%, profit factor {:.2}, return {:.2}%, final equity ${:.2}",
        report.strategy,
        report.performance.total_trades,
        report.performance.win_rate * 100.0,
        report.performance.profit_factor,
        report.performance.total_return_pct,
        report.final_equity
    );

    if let Some(output) = options.output.as_deref() {
        write_report(&report, output)?;
        info!("Backtest report written to {}", output.display());
    } else {
        println!(
            "{}",
            serde_json::to_string_pretty(&report).context("failed to serialize report")?
        );
    }

    Ok(report)
}

pub fn write_report(report: &BacktestReport, path: &Path) -> Result<()> {
    if let Some(parent) = path.parent() {
        if !parent.as_os_str().is_empty() {
            fs::create_dir_all(parent)
                .with_context(|| format!("failed to create {}", parent.display()))?;
        }
    }
    let file = fs::File::create(path)
        .with_context(|| format!("failed to create report file {}", path.display()))?;
    serde_json::to_writer_pretty(BufWriter::new(file), report)
        .with_context(|| format!("failed to write report to {}", path.display()))?;
    Ok(())
}
