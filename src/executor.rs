use crate::config::BacktestConfig;
use crate::ledger::CapitalLedger;
use crate::models::*;
use crate::risk::DailyLossGuard;
use crate::strategy::SignalPolicy;
use crate::strategy_utils::meets_confidence_threshold;
use anyhow::{anyhow, Result};
use chrono::{DateTime, NaiveDate, Utc};
use log::{debug, info, warn};
use std::fmt;
use uuid::Uuid;

pub const END_OF_DAY_CLOSE: &str = "End of day close";
pub const STOP_LOSS: &str = "Stop loss";
pub const TAKE_PROFIT: &str = "Take profit";

/// Inputs for one symbol on one simulated day.
pub struct SymbolSession<'a> {
    pub symbol: &'a str,
    pub session_date: NaiveDate,
    pub bars: &'a [Bar],
    pub allocation_usd: f64,
    pub candidate: &'a ScreenedCandidate,
    pub force_execution: bool,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum RejectReason {
    InsufficientSettledCash,
    DailyLossHalt,
    EmptyAllocation,
}

impl fmt::Display for RejectReason {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            RejectReason::InsufficientSettledCash => f.write_str("insufficient settled cash"),
            RejectReason::DailyLossHalt => f.write_str("daily loss limit reached"),
            RejectReason::EmptyAllocation => f.write_str("no allocation available"),
        }
    }
}

/// Observable outcome of one bar, in bar order.
#[derive(Debug, Clone)]
pub enum ExecutionEvent {
    Fill(Trade),
    BuyRejected {
        symbol: String,
        timestamp: DateTime<Utc>,
        reason: RejectReason,
        cost: f64,
        settled_cash: f64,
    },
    BarSkipped {
        symbol: String,
        timestamp: DateTime<Utc>,
        error: String,
    },
}

#[derive(Debug, Clone, Default)]
pub struct SimulationOutcome {
    pub trades: Vec<Trade>,
    pub events: Vec<ExecutionEvent>,
    pub realized_pnl: f64,
    /// Positions still open after the session; the forced close keeps this at zero.
    pub open_positions: Vec<Position>,
}

impl SimulationOutcome {
    fn record_fill(&mut self, trade: Trade) {
        if let Some(pnl) = trade.pnl {
            self.realized_pnl += pnl;
        }
        self.events.push(ExecutionEvent::Fill(trade.clone()));
        self.trades.push(trade);
    }
}

enum EntryDecision {
    Enter { position: Position, reason: String },
    Rejected { reason: RejectReason, cost: f64 },
}

/// Per-symbol FLAT -> OPEN -> FLAT state machine over one day of minute bars.
pub struct IntradayExecutor<'a> {
    config: &'a BacktestConfig,
}

impl<'a> IntradayExecutor<'a> {
    pub fn new(config: &'a BacktestConfig) -> Self {
        Self { config }
    }

    /// Runs one symbol-day. An error evaluating a bar skips only that bar. Any position still
    /// open after the final bar is closed at the last bar with a usable close.
    pub fn simulate(
        &self,
        ledger: &mut CapitalLedger,
        risk: &mut DailyLossGuard,
        policy: &mut dyn SignalPolicy,
        session: SymbolSession<'_>,
    ) -> SimulationOutcome {
        let mut outcome = SimulationOutcome::default();
        let mut position: Option<Position> = None;
        let mut last_valid: Option<&Bar> = None;

        for (index, bar) in session.bars.iter().enumerate() {
            let step = self.evaluate_bar(
                ledger,
                risk,
                policy,
                &session,
                &session.bars[..=index],
                &mut position,
                &mut outcome,
            );
            if validate_bar(bar).is_ok() {
                last_valid = Some(bar);
            }
            match step {
                Ok(()) => {}
                Err(err) => {
                    warn!(
                        "Skipping {} bar at {}: {:#}",
                        session.symbol, bar.timestamp, err
                    );
                    outcome.events.push(ExecutionEvent::BarSkipped {
                        symbol: session.symbol.to_string(),
                        timestamp: bar.timestamp,
                        error: format!("{:#}", err),
                    });
                }
            }
        }

        if let Some(open) = position.take() {
            match last_valid {
                Some(bar) => {
                    let trade = self.close_position(
                        ledger,
                        risk,
                        &open,
                        bar.close,
                        bar.timestamp,
                        END_OF_DAY_CLOSE,
                        session.session_date,
                    );
                    outcome.record_fill(trade);
                }
                None => {
                    // Entries only happen on clean bars, so this should not occur.
                    warn!(
                        "No valid bar to close {} position; leaving it open",
                        session.symbol
                    );
                    outcome.open_positions.push(open);
                }
            }
        }

        outcome
    }

    #[allow(clippy::too_many_arguments)]
    fn evaluate_bar(
        &self,
        ledger: &mut CapitalLedger,
        risk: &mut DailyLossGuard,
        policy: &mut dyn SignalPolicy,
        session: &SymbolSession<'_>,
        bars_so_far: &[Bar],
        position: &mut Option<Position>,
        outcome: &mut SimulationOutcome,
    ) -> Result<()> {
        let bar = bars_so_far
            .last()
            .ok_or_else(|| anyhow!("empty bar window"))?;
        validate_bar(bar)?;

        match position {
            Some(open) => {
                if let Some(reason) = self.exit_reason(open, bar, policy)? {
                    let trade = self.close_position(
                        ledger,
                        risk,
                        open,
                        bar.close,
                        bar.timestamp,
                        &reason,
                        session.session_date,
                    );
                    outcome.record_fill(trade);
                    *position = None;
                }
            }
            None => match self.evaluate_entry(ledger, risk, policy, session, bars_so_far, bar)? {
                Some(EntryDecision::Enter {
                    position: opened,
                    reason,
                }) => {
                    outcome.record_fill(Trade {
                        id: Uuid::new_v4().to_string(),
                        symbol: opened.symbol.clone(),
                        action: TradeAction::Buy,
                        shares: opened.shares,
                        price: opened.entry_price,
                        timestamp: opened.entry_time,
                        reason,
                        pnl: None,
                        pnl_pct: None,
                    });
                    *position = Some(opened);
                }
                Some(EntryDecision::Rejected { reason, cost }) => {
                    info!(
                        "Rejected {} buy at {} ({}): cost {:.2}, settled cash {:.2}",
                        session.symbol,
                        bar.timestamp,
                        reason,
                        cost,
                        ledger.settled_cash()
                    );
                    outcome.events.push(ExecutionEvent::BuyRejected {
                        symbol: session.symbol.to_string(),
                        timestamp: bar.timestamp,
                        reason,
                        cost,
                        settled_cash: ledger.settled_cash(),
                    });
                }
                None => {}
            },
        }

        Ok(())
    }

    fn evaluate_entry(
        &self,
        ledger: &mut CapitalLedger,
        risk: &DailyLossGuard,
        policy: &mut dyn SignalPolicy,
        session: &SymbolSession<'_>,
        bars_so_far: &[Bar],
        bar: &Bar,
    ) -> Result<Option<EntryDecision>> {
        let Some(signal) = policy.generate_signal(session.symbol, bars_so_far, session.candidate)?
        else {
            return Ok(None);
        };
        if signal.action != SignalAction::Buy {
            return Ok(None);
        }
        if !(signal.price.is_finite() && signal.price > 0.0) {
            return Err(anyhow!("signal price {} is not a positive number", signal.price));
        }
        if !signal.confidence.is_finite() {
            return Err(anyhow!("signal confidence {} is not finite", signal.confidence));
        }

        let threshold = self.config.confidence_threshold(session.force_execution);
        if !meets_confidence_threshold(signal.confidence, threshold) {
            debug!(
                "{} buy signal below confidence threshold ({:.2} < {:.2})",
                session.symbol, signal.confidence, threshold
            );
            return Ok(None);
        }

        let shares = session.allocation_usd / signal.price;
        let cost = shares * signal.price;
        if !risk.allows_entry() {
            return Ok(Some(EntryDecision::Rejected {
                reason: RejectReason::DailyLossHalt,
                cost,
            }));
        }
        if !(shares.is_finite() && shares > 0.0) {
            return Ok(Some(EntryDecision::Rejected {
                reason: RejectReason::EmptyAllocation,
                cost,
            }));
        }
        if !ledger.can_afford(cost) {
            return Ok(Some(EntryDecision::Rejected {
                reason: RejectReason::InsufficientSettledCash,
                cost,
            }));
        }

        ledger.debit(cost);

        let stop_loss = signal
            .stop_loss
            .filter(|value| value.is_finite() && *value > 0.0)
            .unwrap_or(signal.price * (1.0 - self.config.default_stop_loss_pct));
        let take_profit = signal
            .take_profit
            .filter(|value| value.is_finite() && *value > 0.0)
            .unwrap_or(signal.price * (1.0 + self.config.default_take_profit_pct));

        debug!(
            "Opened {} {:.4} shares at {:.2} ({}; stop {:.2}, target {:.2})",
            session.symbol, shares, signal.price, signal.reason, stop_loss, take_profit
        );

        Ok(Some(EntryDecision::Enter {
            position: Position {
                symbol: session.symbol.to_string(),
                shares,
                entry_price: signal.price,
                entry_time: bar.timestamp,
                stop_loss,
                take_profit,
                current_price: bar.close,
            },
            reason: signal.reason,
        }))
    }

    fn exit_reason(
        &self,
        position: &mut Position,
        bar: &Bar,
        policy: &mut dyn SignalPolicy,
    ) -> Result<Option<String>> {
        position.current_price = bar.close;

        if bar.close <= position.stop_loss {
            return Ok(Some(STOP_LOSS.to_string()));
        }
        if bar.close >= position.take_profit {
            return Ok(Some(TAKE_PROFIT.to_string()));
        }

        let local_time = bar.timestamp.with_timezone(&self.config.market_timezone);
        policy.should_exit(position, bar, local_time)
    }

    #[allow(clippy::too_many_arguments)]
    fn close_position(
        &self,
        ledger: &mut CapitalLedger,
        risk: &mut DailyLossGuard,
        position: &Position,
        exit_price: f64,
        timestamp: DateTime<Utc>,
        reason: &str,
        session_date: NaiveDate,
    ) -> Trade {
        let proceeds = position.shares * exit_price;
        let pnl = (exit_price - position.entry_price) * position.shares;
        let pnl_pct = exit_price / position.entry_price - 1.0;

        let settlement_date = ledger.settlement_date_for(session_date);
        ledger.credit_pending(proceeds, settlement_date);
        risk.record_realized(pnl);

        debug!(
            "Closed {} at {:.2} ({}): pnl {:.2}, proceeds settle {}",
            position.symbol, exit_price, reason, pnl, settlement_date
        );

        Trade {
            id: Uuid::new_v4().to_string(),
            symbol: position.symbol.clone(),
            action: TradeAction::Sell,
            shares: position.shares,
            price: exit_price,
            timestamp,
            reason: reason.to_string(),
            pnl: Some(pnl),
            pnl_pct: Some(pnl_pct),
        }
    }
}

fn validate_bar(bar: &Bar) -> Result<()> {
    if !(bar.close.is_finite() && bar.close > 0.0) {
        return Err(anyhow!("bar close {} is not a positive number", bar.close));
    }
    Ok(())
}
