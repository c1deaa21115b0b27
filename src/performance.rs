use crate::models::*;
use statrs::statistics::Statistics;

/// Finite stand-in for an unbounded profit factor (wins with no losses).
pub const PROFIT_FACTOR_SENTINEL: f64 = 999.0;

pub struct ResultsAggregator;

struct DrawdownInfo {
    max_drawdown: f64,
    max_drawdown_pct: f64,
}

impl ResultsAggregator {
    /// Reduces the trade log and daily records into summary statistics. Only sells count as
    /// closed trades.
    pub fn summarize(
        trades: &[Trade],
        daily_records: &[DailyCapitalRecord],
        initial_capital: f64,
    ) -> PerformanceSummary {
        let closed: Vec<f64> = trades
            .iter()
            .filter(|trade| trade.is_sell())
            .map(|trade| trade.pnl.unwrap_or(0.0))
            .collect();

        let wins: Vec<f64> = closed.iter().copied().filter(|pnl| *pnl > 0.0).collect();
        let losses: Vec<f64> = closed.iter().copied().filter(|pnl| *pnl < 0.0).collect();
        let breakeven_trades = closed.len() - wins.len() - losses.len();

        let win_rate = if closed.is_empty() {
            0.0
        } else {
            wins.len() as f64 / closed.len() as f64
        };

        let gross_profit: f64 = wins.iter().sum();
        let gross_loss: f64 = losses.iter().map(|pnl| pnl.abs()).sum();
        let profit_factor = Self::profit_factor(gross_profit, gross_loss);

        let final_equity = daily_records
            .last()
            .map(|record| record.total_equity)
            .unwrap_or(initial_capital);
        let total_return_pct = if initial_capital > 0.0 {
            (final_equity / initial_capital - 1.0) * 100.0
        } else {
            0.0
        };

        let equity_curve: Vec<f64> = std::iter::once(initial_capital)
            .chain(daily_records.iter().map(|record| record.total_equity))
            .collect();
        let drawdown = Self::calculate_max_drawdown(&equity_curve);

        PerformanceSummary {
            total_trades: closed.len(),
            winning_trades: wins.len(),
            losing_trades: losses.len(),
            breakeven_trades,
            win_rate,
            avg_win: Self::average(&wins),
            avg_loss: Self::average(&losses),
            profit_factor,
            final_equity,
            total_return_pct,
            max_drawdown: drawdown.max_drawdown,
            max_drawdown_pct: drawdown.max_drawdown_pct,
            sharpe_ratio: Self::calculate_sharpe_ratio(&equity_curve),
        }
    }

    pub fn profit_factor(gross_profit: f64, gross_loss: f64) -> f64 {
        if gross_loss > 0.0 {
            gross_profit / gross_loss
        } else if gross_profit > 0.0 {
            PROFIT_FACTOR_SENTINEL
        } else {
            0.0
        }
    }

    fn average(values: &[f64]) -> f64 {
        let finite: Vec<f64> = values.iter().copied().filter(|v| v.is_finite()).collect();
        if finite.is_empty() {
            0.0
        } else {
            finite.iter().mean()
        }
    }

    pub fn calculate_sharpe_ratio(equity_curve: &[f64]) -> f64 {
        if equity_curve.len() < 3 {
            return 0.0;
        }

        let returns: Vec<f64> = equity_curve
            .windows(2)
            .map(|window| {
                if window[0] > 0.0 {
                    (window[1] - window[0]) / window[0]
                } else {
                    0.0
                }
            })
            .collect();

        let mean_return = returns.iter().mean();
        let std_dev = returns.iter().std_dev();

        if !std_dev.is_finite() || std_dev == 0.0 {
            return 0.0;
        }

        // Annualized over 252 sessions against a 2% risk-free rate
        let annualized_return = mean_return * 252.0;
        let annualized_volatility = std_dev * (252.0_f64).sqrt();
        let risk_free_rate = 0.02;

        (annualized_return - risk_free_rate) / annualized_volatility
    }

    fn calculate_max_drawdown(equity_curve: &[f64]) -> DrawdownInfo {
        let mut max_drawdown = 0.0;
        let mut max_drawdown_pct = 0.0;
        let Some(&first) = equity_curve.first() else {
            return DrawdownInfo {
                max_drawdown,
                max_drawdown_pct,
            };
        };

        let mut peak_value = first;
        for &value in equity_curve {
            if value > peak_value {
                peak_value = value;
                continue;
            }
            let drawdown = peak_value - value;
            let drawdown_pct = if peak_value > 0.0 {
                (drawdown / peak_value) * 100.0
            } else {
                0.0
            };
            if drawdown > max_drawdown {
                max_drawdown = drawdown;
            }
            if drawdown_pct > max_drawdown_pct {
                max_drawdown_pct = drawdown_pct;
            }
        }

        DrawdownInfo {
            max_drawdown,
            max_drawdown_pct,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::{NaiveDate, TimeZone, Utc};

    fn sell(pnl: f64) -> Trade {
        Trade {
            id: "t".to_string(),
            symbol: "AAA".to_string(),
            action: TradeAction::Sell,
            shares: 1.0,
            price: 10.0,
            timestamp: Utc.with_ymd_and_hms(2024, 1, 2, 15, 0, 0).unwrap(),
            reason: "test".to_string(),
            pnl: Some(pnl),
            pnl_pct: Some(pnl / 10.0),
        }
    }

    fn buy() -> Trade {
        Trade {
            action: TradeAction::Buy,
            pnl: None,
            pnl_pct: None,
            ..sell(0.0)
        }
    }

    fn record(day: u32, equity: f64) -> DailyCapitalRecord {
        DailyCapitalRecord {
            date: NaiveDate::from_ymd_opt(2024, 1, day).unwrap(),
            settled_cash: equity,
            unsettled_cash: 0.0,
            position_value: 0.0,
            total_equity: equity,
            trade_count: 0,
            open_positions: 0,
            screened_count: 0,
            selected_symbols: Vec::new(),
            day_pnl: 0.0,
        }
    }

    #[test]
    fn counts_only_sells() {
        let trades = vec![buy(), sell(30.0), buy(), sell(-10.0), buy(), sell(0.0)];
        let summary = ResultsAggregator::summarize(&trades, &[], 1_000.0);
        assert_eq!(summary.total_trades, 3);
        assert_eq!(summary.winning_trades, 1);
        assert_eq!(summary.losing_trades, 1);
        assert_eq!(summary.breakeven_trades, 1);
        assert!((summary.win_rate - 1.0 / 3.0).abs() < 1e-12);
        assert!((summary.avg_win - 30.0).abs() < 1e-12);
        assert!((summary.avg_loss + 10.0).abs() < 1e-12);
        assert!((summary.profit_factor - 3.0).abs() < 1e-12);
    }

    #[test]
    fn profit_factor_degenerate_cases() {
        let only_wins = ResultsAggregator::summarize(&[sell(5.0)], &[], 100.0);
        assert_eq!(only_wins.profit_factor, PROFIT_FACTOR_SENTINEL);
        assert!(only_wins.profit_factor.is_finite());

        let nothing = ResultsAggregator::summarize(&[], &[], 100.0);
        assert_eq!(nothing.profit_factor, 0.0);
        assert_eq!(nothing.win_rate, 0.0);
        assert_eq!(nothing.final_equity, 100.0);
        assert_eq!(nothing.total_return_pct, 0.0);

        let breakeven_only = ResultsAggregator::summarize(&[sell(0.0)], &[], 100.0);
        assert_eq!(breakeven_only.profit_factor, 0.0);
    }

    #[test]
    fn final_equity_and_drawdown_follow_daily_records() {
        let records = vec![record(2, 1_100.0), record(3, 990.0), record(4, 1_050.0)];
        let summary = ResultsAggregator::summarize(&[], &records, 1_000.0);
        assert_eq!(summary.final_equity, 1_050.0);
        assert!((summary.total_return_pct - 5.0).abs() < 1e-9);
        assert!((summary.max_drawdown - 110.0).abs() < 1e-9);
        assert!((summary.max_drawdown_pct - 10.0).abs() < 1e-9);
        assert!(summary.sharpe_ratio.is_finite());
    }

    #[test]
    fn zero_initial_capital_does_not_divide_by_zero() {
        let summary = ResultsAggregator::summarize(&[], &[record(2, 0.0)], 0.0);
        assert_eq!(summary.total_return_pct, 0.0);
        assert_eq!(summary.sharpe_ratio, 0.0);
    }
}
