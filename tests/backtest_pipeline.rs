use anyhow::{anyhow, Result};
use chrono::{DateTime, Duration, NaiveDate, TimeZone, Utc};
use chrono_tz::Tz;
use daytrade_engine::config::BacktestConfig;
use daytrade_engine::error::ModelLookupError;
use daytrade_engine::executor::{
    ExecutionEvent, IntradayExecutor, RejectReason, SymbolSession, END_OF_DAY_CLOSE, STOP_LOSS,
    TAKE_PROFIT,
};
use daytrade_engine::ledger::CapitalLedger;
use daytrade_engine::market_data::{MarketSnapshot, SnapshotGateway};
use daytrade_engine::models::*;
use daytrade_engine::performance::PROFIT_FACTOR_SENTINEL;
use daytrade_engine::progress::{ChannelSink, ProgressStatus, ProgressStatusSnapshot, ProgressSink};
use daytrade_engine::risk::DailyLossGuard;
use daytrade_engine::scheduler::{DayScheduler, RunRequest};
use daytrade_engine::screener::{create_screener, ManualScreener, Screener};
use daytrade_engine::strategy::{create_signal_policy, SignalPolicy};
use std::collections::HashMap;
use std::sync::{Mutex, Once};

static INIT: Once = Once::new();

fn init_logging() {
    INIT.call_once(|| {
        let _ = env_logger::builder().is_test(true).try_init();
    });
}

const SESSION_DAY: u32 = 8;

fn day(d: u32) -> NaiveDate {
    NaiveDate::from_ymd_opt(2024, 7, d).unwrap()
}

/// 09:30 New York in July.
fn session_open(date: NaiveDate) -> DateTime<Utc> {
    Utc.from_utc_datetime(&date.and_hms_opt(13, 30, 0).unwrap())
}

fn bar(symbol: &str, timestamp: DateTime<Utc>, close: f64, volume: i64) -> Bar {
    Bar {
        symbol: symbol.to_string(),
        timestamp,
        open: close,
        high: close,
        low: close,
        close,
        volume,
    }
}

/// One rising daily bar per calendar day from April 1st through `last`.
fn daily_history(symbol: &str, last: NaiveDate) -> Vec<Bar> {
    let mut bars = Vec::new();
    let mut date = NaiveDate::from_ymd_opt(2024, 4, 1).unwrap();
    let mut close = 90.0;
    while date <= last {
        bars.push(bar(
            symbol,
            Utc.from_utc_datetime(&date.and_hms_opt(21, 0, 0).unwrap()),
            close,
            1_000_000,
        ));
        close += 0.25;
        date = date.succ_opt().unwrap();
    }
    bars
}

fn session_bars(symbol: &str, date: NaiveDate, closes: &[f64]) -> Vec<Bar> {
    closes
        .iter()
        .enumerate()
        .map(|(i, close)| {
            bar(
                symbol,
                session_open(date) + Duration::minutes(i as i64),
                *close,
                10_000,
            )
        })
        .collect()
}

/// Buys at the bar's close on bar `buy_at` of each symbol-day.
#[derive(Clone)]
struct ScriptedPolicy {
    buy_at: usize,
    confidence: f64,
    stop_loss: Option<f64>,
    take_profit: Option<f64>,
    fail_at: Option<usize>,
    exit_at_or_above: Option<f64>,
}

impl ScriptedPolicy {
    fn buy_at(index: usize) -> Self {
        Self {
            buy_at: index,
            confidence: 0.8,
            stop_loss: None,
            take_profit: None,
            fail_at: None,
            exit_at_or_above: None,
        }
    }
}

impl SignalPolicy for ScriptedPolicy {
    fn name(&self) -> &str {
        "scripted"
    }

    fn generate_signal(
        &mut self,
        _symbol: &str,
        bars_so_far: &[Bar],
        _context: &ScreenedCandidate,
    ) -> Result<Option<TradeSignal>> {
        let index = bars_so_far.len() - 1;
        if self.fail_at == Some(index) {
            return Err(anyhow!("scripted failure at bar {}", index));
        }
        if index != self.buy_at {
            return Ok(None);
        }
        let last = &bars_so_far[index];
        Ok(Some(TradeSignal {
            action: SignalAction::Buy,
            price: last.close,
            confidence: self.confidence,
            reason: "Scripted entry".to_string(),
            stop_loss: self.stop_loss,
            take_profit: self.take_profit,
        }))
    }

    fn should_exit(
        &self,
        _position: &Position,
        bar: &Bar,
        _local_time: DateTime<Tz>,
    ) -> Result<Option<String>> {
        Ok(self
            .exit_at_or_above
            .filter(|level| bar.close >= *level)
            .map(|_| "Model exit".to_string()))
    }
}

struct FailingScreener;

impl Screener for FailingScreener {
    fn name(&self) -> &str {
        "failing"
    }

    fn screen(&self, _daily_bars: &BarsBySymbol, _min_score: f64) -> Result<Vec<ScreenedCandidate>> {
        Err(anyhow!("screening data feed corrupted"))
    }
}

fn symbols(list: &[&str]) -> Vec<String> {
    list.iter().map(|s| s.to_string()).collect()
}

fn request(universe: &[&str], start: NaiveDate, end: NaiveDate, top_n: usize) -> RunRequest {
    RunRequest {
        start_date: start,
        end_date: end,
        universe: symbols(universe),
        top_n,
        min_score: 50.0,
        force_execution: false,
    }
}

async fn run_with_status(
    config: &BacktestConfig,
    snapshot: MarketSnapshot,
    screener: &dyn Screener,
    policy: &mut dyn SignalPolicy,
    request: &RunRequest,
) -> (BacktestReport, ProgressStatusSnapshot) {
    init_logging();
    let gateway = SnapshotGateway::new(snapshot);
    let status = ProgressStatus::new();
    let report = DayScheduler::new(config, &gateway)
        .run(screener, policy, request, &status)
        .await
        .expect("backtest run failed");
    (report, status.snapshot())
}

fn buys(report: &BacktestReport) -> Vec<&Trade> {
    report.trades.iter().filter(|t| !t.is_sell()).collect()
}

fn sells(report: &BacktestReport) -> Vec<&Trade> {
    report.trades.iter().filter(|t| t.is_sell()).collect()
}

fn has_message(status: &ProgressStatusSnapshot, needle: &str) -> bool {
    status
        .history
        .iter()
        .any(|update| update.message.contains(needle))
}

#[tokio::test]
async fn take_profit_round_trip_settles_after_delay() {
    let session = day(SESSION_DAY);
    let mut snapshot = MarketSnapshot::new();
    snapshot.insert_daily(daily_history("AAA", day(SESSION_DAY + 2)));
    snapshot.insert_minute(session_bars(
        "AAA",
        session,
        &[100.0, 100.0, 100.0, 101.0, 102.5, 103.0],
    ));

    let mut policy = ScriptedPolicy {
        stop_loss: Some(98.0),
        take_profit: Some(102.0),
        ..ScriptedPolicy::buy_at(2)
    };
    let config = BacktestConfig::default();
    let (report, status) = run_with_status(
        &config,
        snapshot,
        &ManualScreener::new(symbols(&["AAA"])),
        &mut policy,
        &request(&["AAA"], session, day(SESSION_DAY + 2), 1),
    )
    .await;

    assert_eq!(buys(&report).len(), 1);
    let sold = sells(&report);
    assert_eq!(sold.len(), 1);
    assert_eq!(sold[0].reason, TAKE_PROFIT);
    assert_eq!(sold[0].price, 102.5);
    assert!((sold[0].pnl.unwrap() - 25.0).abs() < 1e-9);
    assert!((sold[0].pnl_pct.unwrap() - 0.025).abs() < 1e-9);

    // Proceeds are pending on the sale day and the day after, usable from T+2.
    let records = &report.daily_records;
    assert_eq!(records.len(), 3);
    assert_eq!(records[0].date, session);
    assert!((records[0].settled_cash - 9_000.0).abs() < 1e-9);
    assert!((records[0].unsettled_cash - 1_025.0).abs() < 1e-9);
    assert!((records[1].settled_cash - 9_000.0).abs() < 1e-9);
    assert!((records[1].unsettled_cash - 1_025.0).abs() < 1e-9);
    assert!((records[2].settled_cash - 10_025.0).abs() < 1e-9);
    assert_eq!(records[2].unsettled_cash, 0.0);
    for record in records {
        assert!((record.total_equity - 10_025.0).abs() < 1e-9);
        assert_eq!(record.position_value, 0.0);
        assert_eq!(record.open_positions, 0);
    }
    assert_eq!(records[0].trade_count, 2);
    assert_eq!(records[1].trade_count, 0);
    assert!(has_message(&status, "skipping AAA"));

    assert_eq!(report.performance.total_trades, 1);
    assert_eq!(report.performance.winning_trades, 1);
    assert_eq!(report.performance.profit_factor, PROFIT_FACTOR_SENTINEL);
    assert!((report.performance.total_return_pct - 0.25).abs() < 1e-9);
    assert_eq!(report.unique_symbols_traded, 1);
    assert_eq!(report.sessions, 3);
    assert_eq!(report.strategy, "manual + scripted");
}

#[tokio::test]
async fn allocation_splits_across_selected_candidates() {
    let session = day(SESSION_DAY);
    let mut snapshot = MarketSnapshot::new();
    for symbol in ["AAA", "BBB"] {
        snapshot.insert_daily(daily_history(symbol, session));
        snapshot.insert_minute(session_bars(symbol, session, &[100.0, 100.0, 100.0]));
    }

    let config = BacktestConfig::default();
    let (report, _) = run_with_status(
        &config,
        snapshot,
        &ManualScreener::new(symbols(&["AAA", "BBB"])),
        &mut ScriptedPolicy::buy_at(0),
        &request(&["AAA", "BBB"], session, session, 2),
    )
    .await;

    let bought = buys(&report);
    assert_eq!(bought.len(), 2);
    for trade in bought {
        assert!((trade.notional() - 500.0).abs() < 1e-9);
    }
    assert_eq!(report.daily_records[0].selected_symbols, vec!["AAA", "BBB"]);
    assert_eq!(report.daily_records[0].screened_count, 2);
}

#[tokio::test]
async fn allocation_divides_by_qualifying_candidates_not_top_n() {
    let session = day(SESSION_DAY);
    let mut snapshot = MarketSnapshot::new();
    snapshot.insert_daily(daily_history("AAA", session));
    snapshot.insert_minute(session_bars("AAA", session, &[100.0, 100.0, 100.0]));

    let config = BacktestConfig::default();
    let (report, _) = run_with_status(
        &config,
        snapshot,
        &ManualScreener::new(symbols(&["AAA", "BBB", "CCC"])),
        &mut ScriptedPolicy::buy_at(0),
        &request(&["AAA", "BBB", "CCC"], session, session, 3),
    )
    .await;

    let bought = buys(&report);
    assert_eq!(bought.len(), 1);
    assert!((bought[0].notional() - 1_000.0).abs() < 1e-9);
}

#[test]
fn buy_above_settled_cash_is_rejected() {
    init_logging();
    let config = BacktestConfig::default();
    let executor = IntradayExecutor::new(&config);
    let mut ledger = CapitalLedger::new(300.0, 2);
    let mut risk = DailyLossGuard::disabled();
    let mut policy = ScriptedPolicy::buy_at(0);
    let bars = session_bars("AAA", day(SESSION_DAY), &[100.0, 100.0, 100.0]);
    let candidate = ScreenedCandidate {
        symbol: "AAA".to_string(),
        score: 100.0,
        price: 100.0,
        volume: 1_000_000,
        reason: "test".to_string(),
        metadata: HashMap::new(),
    };

    let outcome = executor.simulate(
        &mut ledger,
        &mut risk,
        &mut policy,
        SymbolSession {
            symbol: "AAA",
            session_date: day(SESSION_DAY),
            bars: &bars,
            allocation_usd: 500.0,
            candidate: &candidate,
            force_execution: false,
        },
    );

    assert!(outcome.trades.is_empty());
    assert!(outcome.open_positions.is_empty());
    assert_eq!(ledger.settled_cash(), 300.0);
    assert!(ledger.pending().is_empty());
    assert!(matches!(
        outcome.events.as_slice(),
        [ExecutionEvent::BuyRejected {
            reason: RejectReason::InsufficientSettledCash,
            ..
        }]
    ));
}

#[tokio::test]
async fn zero_candidate_day_is_skipped_without_record() {
    let session = day(SESSION_DAY);
    let mut snapshot = MarketSnapshot::new();
    snapshot.insert_daily(daily_history("AAA", session));
    snapshot.insert_minute(session_bars("AAA", session, &[100.0, 100.0]));

    let config = BacktestConfig::default();
    let mut run = request(&["AAA"], session, session, 1);
    run.min_score = 150.0;
    let (report, status) = run_with_status(
        &config,
        snapshot,
        &ManualScreener::new(symbols(&["AAA"])),
        &mut ScriptedPolicy::buy_at(0),
        &run,
    )
    .await;

    assert!(report.trades.is_empty());
    assert!(report.daily_records.is_empty());
    assert_eq!(report.final_equity, 10_000.0);
    assert_eq!(report.performance.profit_factor, 0.0);
    assert!(has_message(&status, "no candidates"));
}

#[tokio::test]
async fn days_without_sessions_yield_no_candidates() {
    let session = day(SESSION_DAY);
    let mut snapshot = MarketSnapshot::new();
    snapshot.insert_daily(daily_history("AAA", session));
    snapshot.insert_minute(session_bars("AAA", session, &[100.0, 100.0]));

    let config = BacktestConfig::default();
    let (report, _) = run_with_status(
        &config,
        snapshot,
        &ManualScreener::new(symbols(&["AAA"])),
        &mut ScriptedPolicy::buy_at(0),
        &request(&["AAA"], session, day(SESSION_DAY + 3), 1),
    )
    .await;

    assert_eq!(report.daily_records.len(), 1);
    assert_eq!(report.daily_records[0].date, session);
}

#[tokio::test]
async fn screening_failure_skips_the_day() {
    let session = day(SESSION_DAY);
    let mut snapshot = MarketSnapshot::new();
    snapshot.insert_daily(daily_history("AAA", session));

    let config = BacktestConfig::default();
    let (report, status) = run_with_status(
        &config,
        snapshot,
        &FailingScreener,
        &mut ScriptedPolicy::buy_at(0),
        &request(&["AAA"], session, session, 1),
    )
    .await;

    assert!(report.daily_records.is_empty());
    let failure = status
        .history
        .iter()
        .find(|update| update.message.contains("screening failed"))
        .expect("screening failure was not reported");
    assert!(failure
        .detail
        .as_deref()
        .unwrap_or_default()
        .contains("corrupted"));
}

#[tokio::test]
async fn open_position_is_closed_at_last_bar() {
    let session = day(SESSION_DAY);
    let mut snapshot = MarketSnapshot::new();
    snapshot.insert_daily(daily_history("AAA", session));
    let bars = session_bars("AAA", session, &[100.0, 100.0, 100.5, 101.0]);
    let last_timestamp = bars[3].timestamp;
    snapshot.insert_minute(bars);

    let config = BacktestConfig::default();
    let (report, _) = run_with_status(
        &config,
        snapshot,
        &ManualScreener::new(symbols(&["AAA"])),
        &mut ScriptedPolicy::buy_at(0),
        &request(&["AAA"], session, session, 1),
    )
    .await;

    let sold = sells(&report);
    assert_eq!(sold.len(), 1);
    assert_eq!(sold[0].reason, END_OF_DAY_CLOSE);
    assert_eq!(sold[0].price, 101.0);
    assert_eq!(sold[0].timestamp, last_timestamp);
    assert_eq!(report.daily_records[0].open_positions, 0);
}

#[tokio::test]
async fn model_exit_reason_is_recorded() {
    let session = day(SESSION_DAY);
    let mut snapshot = MarketSnapshot::new();
    snapshot.insert_daily(daily_history("AAA", session));
    snapshot.insert_minute(session_bars("AAA", session, &[100.0, 100.4, 100.6, 101.0]));

    let mut policy = ScriptedPolicy {
        exit_at_or_above: Some(100.5),
        ..ScriptedPolicy::buy_at(0)
    };
    let config = BacktestConfig::default();
    let (report, _) = run_with_status(
        &config,
        snapshot,
        &ManualScreener::new(symbols(&["AAA"])),
        &mut policy,
        &request(&["AAA"], session, session, 1),
    )
    .await;

    let sold = sells(&report);
    assert_eq!(sold.len(), 1);
    assert_eq!(sold[0].reason, "Model exit");
    assert_eq!(sold[0].price, 100.6);
}

#[tokio::test]
async fn stop_loss_beats_model_exit() {
    let session = day(SESSION_DAY);
    let mut snapshot = MarketSnapshot::new();
    snapshot.insert_daily(daily_history("AAA", session));
    snapshot.insert_minute(session_bars("AAA", session, &[100.0, 97.0, 97.0]));

    let mut policy = ScriptedPolicy {
        exit_at_or_above: Some(0.0),
        ..ScriptedPolicy::buy_at(0)
    };
    let config = BacktestConfig::default();
    let (report, _) = run_with_status(
        &config,
        snapshot,
        &ManualScreener::new(symbols(&["AAA"])),
        &mut policy,
        &request(&["AAA"], session, session, 1),
    )
    .await;

    let sold = sells(&report);
    assert_eq!(sold.len(), 1);
    assert_eq!(sold[0].reason, STOP_LOSS);
    assert!(sold[0].pnl.unwrap() < 0.0);
    assert_eq!(report.performance.losing_trades, 1);
}

#[tokio::test]
async fn failing_bar_is_skipped_and_run_continues() {
    let session = day(SESSION_DAY);
    let mut snapshot = MarketSnapshot::new();
    snapshot.insert_daily(daily_history("AAA", session));
    snapshot.insert_minute(session_bars("AAA", session, &[100.0, 100.0, 100.0, 100.0]));

    let mut policy = ScriptedPolicy {
        fail_at: Some(1),
        ..ScriptedPolicy::buy_at(2)
    };
    let config = BacktestConfig::default();
    let (report, status) = run_with_status(
        &config,
        snapshot,
        &ManualScreener::new(symbols(&["AAA"])),
        &mut policy,
        &request(&["AAA"], session, session, 1),
    )
    .await;

    assert_eq!(buys(&report).len(), 1);
    assert_eq!(sells(&report).len(), 1);
    assert!(has_message(&status, "Skipped AAA bar"));
}

#[tokio::test]
async fn daily_loss_limit_blocks_later_entries() {
    let session = day(SESSION_DAY);
    let mut snapshot = MarketSnapshot::new();
    snapshot.insert_daily(daily_history("AAA", session));
    snapshot.insert_daily(daily_history("BBB", session));
    snapshot.insert_minute(session_bars("AAA", session, &[100.0, 97.0]));
    snapshot.insert_minute(session_bars("BBB", session, &[100.0, 100.0]));

    let config = BacktestConfig {
        max_daily_loss: Some(10.0),
        ..BacktestConfig::default()
    };
    let (report, status) = run_with_status(
        &config,
        snapshot,
        &ManualScreener::new(symbols(&["AAA", "BBB"])),
        &mut ScriptedPolicy::buy_at(0),
        &request(&["AAA", "BBB"], session, session, 2),
    )
    .await;

    assert!(report.trades.iter().all(|trade| trade.symbol == "AAA"));
    assert_eq!(report.trades.len(), 2);
    assert!(has_message(&status, "Rejected BBB buy"));
}

#[tokio::test]
async fn progress_is_monotonic_and_completes() {
    let session = day(SESSION_DAY);
    let mut snapshot = MarketSnapshot::new();
    snapshot.insert_daily(daily_history("AAA", day(SESSION_DAY + 1)));
    snapshot.insert_minute(session_bars("AAA", session, &[100.0, 101.0, 102.0]));

    let config = BacktestConfig::default();
    let (_, status) = run_with_status(
        &config,
        snapshot,
        &ManualScreener::new(symbols(&["AAA"])),
        &mut ScriptedPolicy::buy_at(0),
        &request(&["AAA"], day(SESSION_DAY - 1), day(SESSION_DAY + 1), 1),
    )
    .await;

    let percents: Vec<u8> = status.history.iter().map(|update| update.percent).collect();
    assert!(percents.windows(2).all(|pair| pair[0] <= pair[1]));
    assert_eq!(status.percent, 100);
    assert_eq!(status.phase, "Backtest complete");
    assert!(has_message(&status, "BUY"));
}

#[tokio::test]
async fn channel_sink_delivers_every_event_in_order() {
    init_logging();
    let session = day(SESSION_DAY);
    let mut snapshot = MarketSnapshot::new();
    snapshot.insert_daily(daily_history("AAA", session));
    snapshot.insert_minute(session_bars("AAA", session, &[100.0, 101.0, 102.0]));
    let gateway = SnapshotGateway::new(snapshot);
    let config = BacktestConfig::default();

    let (sink, mut receiver) = ChannelSink::channel(1);
    let consumer = tokio::spawn(async move {
        let mut received = Vec::new();
        while let Some(update) = receiver.recv().await {
            received.push(update);
        }
        received
    });

    let sink: Box<dyn ProgressSink> = Box::new(sink);
    DayScheduler::new(&config, &gateway)
        .run(
            &ManualScreener::new(symbols(&["AAA"])),
            &mut ScriptedPolicy::buy_at(0),
            &request(&["AAA"], session, session, 1),
            sink.as_ref(),
        )
        .await
        .unwrap();
    drop(sink);

    let received = consumer.await.unwrap();
    assert!(received.len() > 5);
    assert!(received.windows(2).all(|pair| pair[0].percent <= pair[1].percent));
    assert_eq!(received.last().unwrap().percent, 100);
}

#[tokio::test]
async fn sequential_runs_do_not_share_state() {
    init_logging();
    let session = day(SESSION_DAY);
    let mut snapshot = MarketSnapshot::new();
    snapshot.insert_daily(daily_history("AAA", session));
    snapshot.insert_minute(session_bars("AAA", session, &[100.0, 101.0, 105.0]));
    let gateway = SnapshotGateway::new(snapshot);
    let config = BacktestConfig::default();
    let scheduler = DayScheduler::new(&config, &gateway);
    let screener = ManualScreener::new(symbols(&["AAA"]));
    let run = request(&["AAA"], session, session, 1);

    let first = scheduler
        .run(&screener, &mut ScriptedPolicy::buy_at(0), &run, &ProgressStatus::new())
        .await
        .unwrap();
    let second = scheduler
        .run(&screener, &mut ScriptedPolicy::buy_at(0), &run, &ProgressStatus::new())
        .await
        .unwrap();

    assert_eq!(first.trades.len(), second.trades.len());
    assert_eq!(first.final_equity, second.final_equity);
    assert_ne!(first.id, second.id);
}

#[test]
fn unknown_model_names_fail_fast() {
    let err = create_screener("fundamentals", HashMap::new())
        .err()
        .expect("unknown screener accepted");
    assert!(matches!(
        err.downcast_ref::<ModelLookupError>(),
        Some(ModelLookupError::UnknownScreener { .. })
    ));
    assert!(err.to_string().contains("technical_momentum"));

    let err = create_signal_policy("martingale", HashMap::new())
        .err()
        .expect("unknown signal policy accepted");
    assert!(matches!(
        err.downcast_ref::<ModelLookupError>(),
        Some(ModelLookupError::UnknownSignalPolicy { .. })
    ));
}

#[tokio::test]
async fn bundled_models_never_carry_positions_overnight() {
    let first = day(SESSION_DAY);
    let last = day(SESSION_DAY + 2);
    let mut snapshot = MarketSnapshot::new();
    for (offset, symbol) in ["AAA", "BBB", "CCC"].iter().enumerate() {
        snapshot.insert_daily(daily_history(symbol, last));
        let mut date = first;
        while date <= last {
            // Dip then rally with a volume surge so the crossover fires at least sometimes.
            let closes: Vec<f64> = (0..120)
                .map(|i| {
                    let i = i as f64;
                    let base = 100.0 + offset as f64;
                    if i < 40.0 {
                        base - i * 0.05
                    } else {
                        base - 2.0 + (i - 40.0) * 0.08
                    }
                })
                .collect();
            let mut bars = session_bars(symbol, date, &closes);
            for bar in bars.iter_mut().skip(40) {
                bar.volume = 60_000;
            }
            snapshot.insert_minute(bars);
            date = date.succ_opt().unwrap();
        }
    }

    let screener = create_screener("trend_strength", HashMap::new()).unwrap();
    let mut policy = create_signal_policy("ma_crossover", HashMap::new()).unwrap();
    let config = BacktestConfig::default();
    let mut run = request(&["AAA", "BBB", "CCC"], first, last, 2);
    run.min_score = 0.0;
    run.force_execution = true;
    let (report, _) =
        run_with_status(&config, snapshot, screener.as_ref(), policy.as_mut(), &run).await;

    for record in &report.daily_records {
        assert_eq!(record.open_positions, 0);
        assert_eq!(record.position_value, 0.0);
        assert!(record.settled_cash >= 0.0);
    }
    for symbol in ["AAA", "BBB", "CCC"] {
        let actions: Vec<TradeAction> = report
            .trades
            .iter()
            .filter(|trade| trade.symbol == symbol)
            .map(|trade| trade.action)
            .collect();
        assert_eq!(actions.len() % 2, 0);
        for pair in actions.chunks(2) {
            assert_eq!(pair, [TradeAction::Buy, TradeAction::Sell]);
        }
    }
}

/// Passes through to `inner`, remembering how many daily bars each symbol carried.
struct RecordingScreener {
    inner: Box<dyn Screener>,
    history_lengths: Mutex<Vec<usize>>,
}

impl Screener for RecordingScreener {
    fn name(&self) -> &str {
        self.inner.name()
    }

    fn screen(&self, daily_bars: &BarsBySymbol, min_score: f64) -> Result<Vec<ScreenedCandidate>> {
        if let Ok(mut lengths) = self.history_lengths.lock() {
            lengths.extend(daily_bars.values().map(Vec::len));
        }
        self.inner.screen(daily_bars, min_score)
    }
}

/// Weekday-only daily bars rising 1% a session with growing volume, ending on `last`.
fn weekday_history(symbol: &str, first: NaiveDate, last: NaiveDate) -> Vec<Bar> {
    use chrono::{Datelike, Weekday};
    let mut bars = Vec::new();
    let mut date = first;
    let mut close = 50.0;
    while date <= last {
        if !matches!(date.weekday(), Weekday::Sat | Weekday::Sun) {
            bars.push(bar(
                symbol,
                Utc.from_utc_datetime(&date.and_hms_opt(21, 0, 0).unwrap()),
                close,
                1_000_000 + bars.len() as i64 * 1_000,
            ));
            close *= 1.01;
        }
        date = date.succ_opt().unwrap();
    }
    bars
}

#[tokio::test]
async fn scoring_screener_sees_full_lookback_on_first_day() {
    // Monday, with well over the default 60 sessions of weekday history behind it.
    let session = day(SESSION_DAY);
    let mut snapshot = MarketSnapshot::new();
    snapshot.insert_daily(weekday_history(
        "TRND",
        NaiveDate::from_ymd_opt(2024, 1, 2).unwrap(),
        session,
    ));
    snapshot.insert_minute(session_bars("TRND", session, &[100.0, 101.0, 102.0]));

    let screener = RecordingScreener {
        inner: create_screener("trend_strength", HashMap::new()).unwrap(),
        history_lengths: Mutex::new(Vec::new()),
    };
    let config = BacktestConfig::default();
    let mut run = request(&["TRND"], session, session, 1);
    run.min_score = 0.0;
    let (report, status) = run_with_status(
        &config,
        snapshot,
        &screener,
        &mut ScriptedPolicy::buy_at(0),
        &run,
    )
    .await;

    assert_eq!(
        *screener.history_lengths.lock().unwrap(),
        vec![config.screening_lookback_days as usize]
    );
    assert!(status
        .history
        .iter()
        .any(|update| update.message == format!("{}: 1 of 1 symbols passed screening", session)));
    assert_eq!(report.sessions, 1);
    assert_eq!(report.strategy, "trend_strength + scripted");
    assert_eq!(buys(&report).len(), 1);
    assert_eq!(sells(&report).len(), 1);
}
