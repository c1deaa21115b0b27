use crate::allocation::AllocationPlanner;
use crate::config::BacktestConfig;
use crate::executor::{ExecutionEvent, IntradayExecutor, SymbolSession};
use crate::ledger::CapitalLedger;
use crate::market_data::{calendar_days_for_sessions, CachedGateway, MarketDataGateway};
use crate::models::*;
use crate::performance::ResultsAggregator;
use crate::progress::{DayStep, ProgressReporter, ProgressSink};
use crate::risk::DailyLossGuard;
use crate::screener::{rank_candidates, Screener};
use crate::strategy::SignalPolicy;
use anyhow::{anyhow, Result};
use chrono::{DateTime, Days, NaiveDate, NaiveTime, TimeZone, Utc};
use chrono_tz::Tz;
use log::{info, warn};
use std::collections::BTreeSet;
use uuid::Uuid;

/// Parameters of one backtest run. `top_n`, `min_score` and the date range are caller
/// preconditions and are not validated.
#[derive(Debug, Clone)]
pub struct RunRequest {
    pub start_date: NaiveDate,
    pub end_date: NaiveDate,
    pub universe: Vec<String>,
    pub top_n: usize,
    pub min_score: f64,
    pub force_execution: bool,
}

/// Drives the daily screen, select, allocate and trade loop over a date range.
///
/// All run state (ledger, risk guard, trade log, records, fetch cache) is created inside `run`, so
/// one scheduler can serve several sequential runs without them sharing anything.
pub struct DayScheduler<'a> {
    config: &'a BacktestConfig,
    gateway: &'a dyn MarketDataGateway,
}

impl<'a> DayScheduler<'a> {
    pub fn new(config: &'a BacktestConfig, gateway: &'a dyn MarketDataGateway) -> Self {
        Self { config, gateway }
    }

    pub async fn run(
        &self,
        screener: &dyn Screener,
        policy: &mut dyn SignalPolicy,
        request: &RunRequest,
        progress: &dyn ProgressSink,
    ) -> Result<BacktestReport> {
        let config = self.config;
        let dates = calendar_days(request.start_date, request.end_date);
        let mut reporter = ProgressReporter::new(
            progress,
            config.progress_start_pct,
            config.progress_end_pct,
            dates.len(),
        );
        let strategy_label = format!("{} + {}", screener.name(), policy.name());

        info!(
            "Starting backtest {} from {} to {} over {} symbols",
            strategy_label,
            request.start_date,
            request.end_date,
            request.universe.len()
        );
        reporter
            .emit(
                0,
                "Starting backtest",
                Some(format!(
                    "{} | {} to {} | {} symbols",
                    strategy_label,
                    request.start_date,
                    request.end_date,
                    request.universe.len()
                )),
            )
            .await;

        let cache = CachedGateway::new(self.gateway);
        let lookback_days = (dates.len() as u32)
            .saturating_add(calendar_days_for_sessions(config.screening_lookback_days));
        reporter
            .emit(
                config.progress_start_pct / 2,
                "Fetching daily bars",
                Some(format!("{} calendar days of history", lookback_days)),
            )
            .await;
        let daily_bars = cache
            .daily_bars(&request.universe, request.end_date, lookback_days)
            .await;

        let mut ledger = CapitalLedger::new(config.initial_capital, config.settlement_days);
        let mut risk = DailyLossGuard::new(config.max_daily_loss);
        let planner = AllocationPlanner::new(config.daily_allocation_pct);
        let executor = IntradayExecutor::new(config);

        let mut trades: Vec<Trade> = Vec::new();
        let mut daily_records: Vec<DailyCapitalRecord> = Vec::new();

        for (day_index, &date) in dates.iter().enumerate() {
            risk.start_day(date);
            let buying_power = ledger.get_available_buying_power(date);
            reporter
                .day_event(
                    day_index,
                    DayStep::Settle,
                    format!("{}: buying power ${:.2}", date, buying_power),
                    None,
                )
                .await;

            let window = screening_window(
                &daily_bars,
                date,
                &config.market_timezone,
                config.screening_lookback_days as usize,
            );
            let mut candidates = match screener.screen(&window, request.min_score) {
                Ok(candidates) => candidates,
                Err(err) => {
                    warn!("Screening failed on {}, skipping day: {:#}", date, err);
                    reporter
                        .day_event(
                            day_index,
                            DayStep::Screen,
                            format!("{}: screening failed, skipping day", date),
                            Some(format!("{:#}", err)),
                        )
                        .await;
                    continue;
                }
            };
            rank_candidates(&mut candidates, request.min_score);
            let screened_count = candidates.len();
            reporter
                .day_event(
                    day_index,
                    DayStep::Screen,
                    format!(
                        "{}: {} of {} symbols passed screening",
                        date,
                        screened_count,
                        window.len()
                    ),
                    None,
                )
                .await;

            candidates.truncate(request.top_n);
            if candidates.is_empty() {
                info!("No candidates on {}, skipping day", date);
                reporter
                    .day_event(
                        day_index,
                        DayStep::Select,
                        format!("{}: no candidates, skipping day", date),
                        None,
                    )
                    .await;
                continue;
            }

            let selected_symbols: Vec<String> =
                candidates.iter().map(|c| c.symbol.clone()).collect();
            reporter
                .day_event(
                    day_index,
                    DayStep::Select,
                    format!("{}: selected {}", date, selected_symbols.join(", ")),
                    Some(
                        candidates
                            .iter()
                            .map(|c| format!("{} {:.1}", c.symbol, c.score))
                            .collect::<Vec<_>>()
                            .join(", "),
                    ),
                )
                .await;

            let allocation = planner.allocate(buying_power, candidates.len());
            reporter
                .day_event(
                    day_index,
                    DayStep::Allocate,
                    format!(
                        "{}: allocating ${:.2} (${:.2} per symbol)",
                        date, allocation.daily_allocation, allocation.per_stock_allocation
                    ),
                    None,
                )
                .await;

            let (session_open, session_close) = session_bounds(date, config)?;
            let minute_bars = cache
                .minute_bars(&selected_symbols, session_open, session_close)
                .await;

            let mut day_trades = 0usize;
            let mut day_pnl = 0.0;
            let mut open_positions: Vec<Position> = Vec::new();

            for candidate in &candidates {
                let bars = minute_bars
                    .get(&candidate.symbol)
                    .map(Vec::as_slice)
                    .unwrap_or(&[]);
                if bars.is_empty() {
                    info!("No intraday data for {} on {}", candidate.symbol, date);
                    reporter
                        .day_event(
                            day_index,
                            DayStep::FetchIntraday,
                            format!("{}: skipping {}", date, candidate.symbol),
                            Some("no intraday data".to_string()),
                        )
                        .await;
                    continue;
                }

                let outcome = executor.simulate(
                    &mut ledger,
                    &mut risk,
                    policy,
                    SymbolSession {
                        symbol: &candidate.symbol,
                        session_date: date,
                        bars,
                        allocation_usd: allocation.per_stock_allocation,
                        candidate,
                        force_execution: request.force_execution,
                    },
                );

                for event in &outcome.events {
                    let (message, detail) = describe_event(event);
                    reporter
                        .day_event(day_index, DayStep::Execute, message, detail)
                        .await;
                }

                day_trades += outcome.trades.len();
                day_pnl += outcome.realized_pnl;
                open_positions.extend(outcome.open_positions);
                trades.extend(outcome.trades);
            }

            let settled_cash = ledger.settled_cash();
            let unsettled_cash = ledger.unsettled_total();
            let position_value: f64 = open_positions.iter().map(Position::market_value).sum();
            let record = DailyCapitalRecord {
                date,
                settled_cash,
                unsettled_cash,
                position_value,
                total_equity: settled_cash + unsettled_cash + position_value,
                trade_count: day_trades,
                open_positions: open_positions.len(),
                screened_count,
                selected_symbols,
                day_pnl,
            };
            reporter
                .day_event(
                    day_index,
                    DayStep::Record,
                    format!(
                        "{}: equity ${:.2} ({} trades, day P&L ${:.2})",
                        date, record.total_equity, record.trade_count, record.day_pnl
                    ),
                    None,
                )
                .await;
            daily_records.push(record);
        }

        reporter
            .emit(config.progress_end_pct, "Aggregating results", None)
            .await;

        let performance =
            ResultsAggregator::summarize(&trades, &daily_records, config.initial_capital);
        let unique_symbols_traded = trades
            .iter()
            .map(|trade| trade.symbol.as_str())
            .collect::<BTreeSet<_>>()
            .len();

        info!(
            "Backtest {} finished: {} closed trades, return {:.2}%, final equity ${:.2}",
            strategy_label,
            performance.total_trades,
            performance.total_return_pct,
            performance.final_equity
        );
        reporter
            .emit(
                100,
                "Backtest complete",
                Some(format!(
                    "{} closed trades, {:.2}% return",
                    performance.total_trades, performance.total_return_pct
                )),
            )
            .await;

        Ok(BacktestReport {
            id: Uuid::new_v4().to_string(),
            strategy: strategy_label,
            start_date: request.start_date,
            end_date: request.end_date,
            initial_capital: config.initial_capital,
            final_equity: performance.final_equity,
            daily_allocation_pct: config.daily_allocation_pct,
            settlement_days: config.settlement_days,
            performance,
            trades,
            unique_symbols_traded,
            sessions: daily_records.len(),
            daily_records,
            created_at: Utc::now(),
        })
    }
}

/// Every calendar day from `start` to `end` inclusive; empty when `end < start`.
pub fn calendar_days(start: NaiveDate, end: NaiveDate) -> Vec<NaiveDate> {
    let mut days = Vec::new();
    let mut current = start;
    while current <= end {
        days.push(current);
        match current.checked_add_days(Days::new(1)) {
            Some(next) => current = next,
            None => break,
        }
    }
    days
}

/// Daily history visible to the screener on `date`: symbols with a bar dated `date`, each
/// carrying up to `lookback` bars dated strictly before it.
pub fn screening_window(
    daily_bars: &BarsBySymbol,
    date: NaiveDate,
    timezone: &Tz,
    lookback: usize,
) -> BarsBySymbol {
    let local_date = |bar: &Bar| bar.timestamp.with_timezone(timezone).date_naive();
    daily_bars
        .iter()
        .filter(|(_, bars)| bars.iter().any(|bar| local_date(bar) == date))
        .filter_map(|(symbol, bars)| {
            let history: Vec<Bar> = bars
                .iter()
                .filter(|bar| local_date(bar) < date)
                .cloned()
                .collect();
            if history.is_empty() {
                return None;
            }
            let start = history.len().saturating_sub(lookback.max(1));
            Some((symbol.clone(), history[start..].to_vec()))
        })
        .collect()
}

/// Market open and close on `date` in UTC.
pub fn session_bounds(
    date: NaiveDate,
    config: &BacktestConfig,
) -> Result<(DateTime<Utc>, DateTime<Utc>)> {
    let to_utc = |time: NaiveTime| {
        config
            .market_timezone
            .from_local_datetime(&date.and_time(time))
            .earliest()
            .map(|local| local.with_timezone(&Utc))
            .ok_or_else(|| {
                anyhow!(
                    "{} {} does not exist in {}",
                    date,
                    time,
                    config.market_timezone
                )
            })
    };
    Ok((to_utc(config.market_open)?, to_utc(config.market_close)?))
}

fn describe_event(event: &ExecutionEvent) -> (String, Option<String>) {
    match event {
        ExecutionEvent::Fill(trade) => {
            let detail = match trade.pnl {
                Some(pnl) => format!("{} | P&L ${:.2}", trade.reason, pnl),
                None => trade.reason.clone(),
            };
            (
                format!(
                    "{} {:.4} {} @ ${:.2}",
                    trade.action.as_str().to_uppercase(),
                    trade.shares,
                    trade.symbol,
                    trade.price
                ),
                Some(detail),
            )
        }
        ExecutionEvent::BuyRejected {
            symbol,
            timestamp,
            reason,
            cost,
            settled_cash,
        } => (
            format!("Rejected {} buy at {}: {}", symbol, timestamp, reason),
            Some(format!(
                "cost ${:.2}, settled cash ${:.2}",
                cost, settled_cash
            )),
        ),
        ExecutionEvent::BarSkipped {
            symbol,
            timestamp,
            error,
        } => (
            format!("Skipped {} bar at {}", symbol, timestamp),
            Some(error.clone()),
        ),
    }
}
