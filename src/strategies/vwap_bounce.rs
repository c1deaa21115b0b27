use crate::indicators::{mean_of_last, session_vwap, volumes};
use crate::models::*;
use crate::param_utils::{get_param_f64, get_param_minute_of_day, get_param_pct};
use crate::strategy_utils::{buy_signal, safe_ratio};
use anyhow::{anyhow, Result};
use chrono::DateTime;
use chrono_tz::Tz;
use std::collections::HashMap;

const MIN_BARS: usize = 30;
const TOUCH_LOOKBACK: usize = 5;

/// Buys a bounce off session VWAP when recent volume surges above the earlier baseline.
pub struct VwapBounce {
    vwap_threshold: f64,
    volume_surge: f64,
    take_profit_pct: f64,
    exit_minute_of_day: usize,
}

impl VwapBounce {
    pub fn new(parameters: HashMap<String, f64>) -> Self {
        Self {
            vwap_threshold: get_param_f64(&parameters, "vwapThreshold", 0.002),
            volume_surge: get_param_f64(&parameters, "volumeSurge", 1.5),
            take_profit_pct: get_param_pct(&parameters, "takeProfitPct", 0.025, 10.0),
            exit_minute_of_day: get_param_minute_of_day(&parameters, "exitMinuteOfDay", 15 * 60 + 40),
        }
    }
}

impl super::SignalPolicy for VwapBounce {
    fn name(&self) -> &str {
        "vwap_bounce"
    }

    fn generate_signal(
        &mut self,
        _symbol: &str,
        bars_so_far: &[Bar],
        _context: &ScreenedCandidate,
    ) -> Result<Option<TradeSignal>> {
        if bars_so_far.len() < MIN_BARS {
            return Ok(None);
        }

        let vwap = session_vwap(bars_so_far).ok_or_else(|| anyhow!("VWAP unavailable"))?;
        if !(vwap.is_finite() && vwap > 0.0) {
            return Err(anyhow!("Degenerate VWAP {}", vwap));
        }

        let recent = &bars_so_far[bars_so_far.len() - TOUCH_LOOKBACK..];
        let touched_vwap = recent
            .iter()
            .any(|bar| ((bar.low - vwap) / vwap).abs() < self.vwap_threshold);
        if !touched_vwap {
            return Ok(None);
        }

        let current_price = bars_so_far[bars_so_far.len() - 1].close;
        if current_price <= vwap * 1.001 {
            return Ok(None);
        }

        let volumes = volumes(bars_so_far);
        let split = volumes.len() - TOUCH_LOOKBACK;
        let baseline = mean_of_last(&volumes[..split], 15).unwrap_or(0.0);
        let recent_volume = mean_of_last(&volumes[split..], TOUCH_LOOKBACK).unwrap_or(0.0);
        let vol_ratio = safe_ratio(recent_volume, baseline);
        if vol_ratio <= self.volume_surge {
            return Ok(None);
        }

        let confidence = (0.65 + (vol_ratio - self.volume_surge) * 0.1).min(0.85);
        let mut signal = buy_signal(
            current_price,
            confidence,
            format!("VWAP bounce at ${:.2} with {:.1}x volume", vwap, vol_ratio),
        );
        signal.stop_loss = Some(vwap * 0.995);
        signal.take_profit = Some(current_price * (1.0 + self.take_profit_pct));
        Ok(Some(signal))
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
