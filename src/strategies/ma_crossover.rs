use crate::indicators::{closes, mean_of_last, volumes};
use crate::models::*;
use crate::param_utils::{get_param_f64, get_param_minute_of_day, get_param_pct, get_param_period};
use crate::strategy_utils::{buy_signal, safe_ratio};
use anyhow::Result;
use chrono::DateTime;
use chrono_tz::Tz;
use std::collections::HashMap;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum CrossState {
    Bullish,
    Bearish,
}

/// Fast/slow moving-average crossover confirmed by a volume surge on the crossing bar.
pub struct MovingAverageCrossover {
    fast_period: usize,
    slow_period: usize,
    volume_threshold: f64,
    stop_loss_pct: f64,
    take_profit_pct: f64,
    exit_minute_of_day: usize,
    // One buy per bullish leg per symbol; a bearish cross re-arms the signal.
    last_state: HashMap<String, CrossState>,
}

impl MovingAverageCrossover {
    pub fn new(parameters: HashMap<String, f64>) -> Self {
        let fast_period = get_param_period(&parameters, "fastPeriod", 5, 1);
        let slow_period = get_param_period(&parameters, "slowPeriod", 20, fast_period + 1);
        Self {
            fast_period,
            slow_period,
            volume_threshold: get_param_f64(&parameters, "volumeThreshold", 1.5),
            stop_loss_pct: get_param_pct(&parameters, "stopLossPct", 0.02, 1.0),
            take_profit_pct: get_param_pct(&parameters, "takeProfitPct", 0.04, 10.0),
            exit_minute_of_day: get_param_minute_of_day(&parameters, "exitMinuteOfDay", 15 * 60 + 40),
            last_state: HashMap::new(),
        }
    }
}

impl super::SignalPolicy for MovingAverageCrossover {
    fn name(&self) -> &str {
        "ma_crossover"
    }

    fn generate_signal(
        &mut self,
        symbol: &str,
        bars_so_far: &[Bar],
        _context: &ScreenedCandidate,
    ) -> Result<Option<TradeSignal>> {
        if bars_so_far.len() < self.slow_period {
            return Ok(None);
        }

        let closes = closes(bars_so_far);
        let volumes = volumes(bars_so_far);
        let (Some(fast_ma), Some(slow_ma), Some(avg_volume)) = (
            mean_of_last(&closes, self.fast_period),
            mean_of_last(&closes, self.slow_period),
            mean_of_last(&volumes, 20),
        ) else {
            return Ok(None);
        };
        let current_price = closes[closes.len() - 1];
        let volume_ratio = safe_ratio(volumes[volumes.len() - 1], avg_volume);

        if fast_ma > slow_ma && self.last_state.get(symbol) != Some(&CrossState::Bullish) {
            if volume_ratio > self.volume_threshold {
                self.last_state
                    .insert(symbol.to_string(), CrossState::Bullish);
                let confidence =
                    (0.6 + (volume_ratio - self.volume_threshold) * 0.1).min(0.9);
                let mut signal = buy_signal(
                    current_price,
                    confidence,
                    format!("Bullish crossover with {:.1}x volume", volume_ratio),
                );
                signal.stop_loss = Some(current_price * (1.0 - self.stop_loss_pct));
                signal.take_profit = Some(current_price * (1.0 + self.take_profit_pct));
                return Ok(Some(signal));
            }
        } else if fast_ma < slow_ma {
            self.last_state
                .insert(symbol.to_string(), CrossState::Bearish);
        }

        Ok(None)
    }

    fn should_exit(
        &self,
        _position: &Position,
        _bar: &Bar,
        local_time: DateTime<Tz>,
    ) -> Result<Option<String>> {
        if super::past_exit_time(&local_time, self.exit_minute_of_day) {
            return Ok(Some("End of day".to_string()));
        }
        Ok(None)
    }
}
