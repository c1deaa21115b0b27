use crate::indicators::{closes, mean_of_last, volumes};
use crate::models::*;
use crate::param_utils::{get_param_f64, get_param_minute_of_day, get_param_pct};
use crate::strategy_utils::{buy_signal, safe_ratio};
use anyhow::Result;
use chrono::DateTime;
use chrono_tz::Tz;
use log::debug;
use std::collections::HashMap;

const MIN_BARS: usize = 30;

type Detector = fn(&[Bar]) -> Option<TradeSignal>;

/// Checked in order; the first pattern at or above `minConfidence` becomes the signal.
/// Only long-side patterns are detected.
const DETECTORS: [(&str, Detector); 6] = [
    ("bull_flag", bull_flag),
    ("inverse_head_shoulders", inverse_head_shoulders),
    ("double_bottom", double_bottom),
    ("triangle_breakout", triangle_breakout),
    ("cup_handle", cup_handle),
    ("bullish_engulfing", bullish_engulfing),
];

/// Buys breakouts out of classic intraday chart patterns.
pub struct PatternRecognition {
    min_confidence: f64,
    stop_loss_pct: f64,
    take_profit_pct: f64,
    exit_minute_of_day: usize,
}

impl PatternRecognition {
    pub fn new(parameters: HashMap<String, f64>) -> Self {
        Self {
            min_confidence: get_param_f64(&parameters, "minConfidence", 0.7),
            stop_loss_pct: get_param_pct(&parameters, "stopLossPct", 0.02, 1.0),
            take_profit_pct: get_param_pct(&parameters, "takeProfitPct", 0.035, 10.0),
            exit_minute_of_day: get_param_minute_of_day(&parameters, "exitMinuteOfDay", 15 * 60 + 40),
        }
    }
}

impl super::SignalPolicy for PatternRecognition {
    fn name(&self) -> &str {
        "pattern_recognition"
    }

    fn generate_signal(
        &mut self,
        symbol: &str,
        bars_so_far: &[Bar],
        _context: &ScreenedCandidate,
    ) -> Result<Option<TradeSignal>> {
        if bars_so_far.len() < MIN_BARS {
            return Ok(None);
        }
        for (pattern, detect) in DETECTORS {
            if let Some(signal) = detect(bars_so_far) {
                if signal.confidence >= self.min_confidence {
                    debug!("{} matched {} at {:.2}", symbol, pattern, signal.price);
                    return Ok(Some(signal));
                }
            }
        }
        Ok(None)
    }

    fn should_exit(
        &self,
        position: &Position,
        bar: &Bar,
        local_time: DateTime<Tz>,
    ) -> Result<Option<String>> {
        let change = safe_ratio(bar.close - position.entry_price, position.entry_price);
        if change <= -self.stop_loss_pct {
            return Ok(Some("Stop loss".to_string()));
        }
        if change >= self.take_profit_pct {
            return Ok(Some("Take profit".to_string()));
        }
        if super::past_exit_time(&local_time, self.exit_minute_of_day) {
            return Ok(Some("End of day".to_string()));
        }
        Ok(None)
    }
}

fn highest_high(bars: &[Bar]) -> f64 {
    bars.iter().map(|bar| bar.high).fold(f64::MIN, f64::max)
}

fn lowest_low(bars: &[Bar]) -> f64 {
    bars.iter().map(|bar| bar.low).fold(f64::MAX, f64::min)
}

/// Indices from 10 up to `len - tail` whose low undercuts the lows five bars either side.
fn swing_lows(bars: &[Bar], tail: usize) -> Vec<usize> {
    (10..bars.len().saturating_sub(tail))
        .filter(|&i| bars[i].low < bars[i - 5].low && bars[i].low < bars[i + 5].low)
        .collect()
}

/// A 3%+ pole, a tight 15-bar flag, then a close above the flag on rising volume.
fn bull_flag(bars: &[Bar]) -> Option<TradeSignal> {
    let n = bars.len();
    if n < 40 {
        return None;
    }
    let closes = closes(bars);
    let pole = safe_ratio(closes[n - 20] - closes[n - 30], closes[n - 30]);
    if pole < 0.03 {
        return None;
    }

    let flag = &closes[n - 16..n - 1];
    let flag_high = flag.iter().copied().fold(f64::MIN, f64::max);
    let flag_low = flag.iter().copied().fold(f64::MAX, f64::min);
    if safe_ratio(flag_high - flag_low, mean_of_last(flag, flag.len())?) > 0.015 {
        return None;
    }

    let current_price = closes[n - 1];
    if current_price <= flag_high * 1.005 {
        return None;
    }

    let volumes = volumes(bars);
    let volume_surge = safe_ratio(
        mean_of_last(&volumes[n - 5..], 5)?,
        mean_of_last(&volumes[n - 20..n - 5], 15)?,
    );
    if volume_surge <= 1.3 {
        return None;
    }

    let mut signal = buy_signal(
        current_price,
        (0.7 + (volume_surge - 1.3) * 0.1).min(0.9),
        format!(
            "Bull flag breakout {:.1}% with {:.1}x volume",
            pole * 100.0,
            volume_surge
        ),
    );
    signal.stop_loss = Some(flag_high * 0.995);
    signal.take_profit = Some(current_price * 1.04);
    Some(signal)
}

fn inverse_head_shoulders(bars: &[Bar]) -> Option<TradeSignal> {
    let n = bars.len();
    if n < 50 {
        return None;
    }
    let troughs = swing_lows(bars, 10);
    let [.., left, head, right] = troughs.as_slice() else {
        return None;
    };
    let (left_low, head_low, right_low) = (bars[*left].low, bars[*head].low, bars[*right].low);
    if head_low >= left_low * 0.98 || head_low >= right_low * 0.98 {
        return None;
    }
    if safe_ratio((left_low - right_low).abs(), left_low) >= 0.03 {
        return None;
    }

    let neckline = bars[*left..*right]
        .iter()
        .map(|bar| bar.close)
        .fold(f64::MIN, f64::max);
    let current_price = bars[n - 1].close;
    if current_price <= neckline * 1.002 {
        return None;
    }

    let mut signal = buy_signal(
        current_price,
        0.80,
        format!("Inverse H&S breakout at neckline ${:.2}", neckline),
    );
    signal.stop_loss = Some(neckline * 0.99);
    signal.take_profit = Some(current_price * 1.04);
    Some(signal)
}

/// Two swing lows within 1% of each other, then a close above the high between them.
fn double_bottom(bars: &[Bar]) -> Option<TradeSignal> {
    let n = bars.len();
    if n < 40 {
        return None;
    }
    let troughs = swing_lows(bars, 5);
    let [.., first, second] = troughs.as_slice() else {
        return None;
    };
    let first_low = bars[*first].low;
    if safe_ratio((first_low - bars[*second].low).abs(), first_low) >= 0.01 {
        return None;
    }

    let peak = highest_high(&bars[*first..*second]);
    let current_price = bars[n - 1].close;
    if !(peak > 0.0 && current_price > peak * 1.002) {
        return None;
    }

    let mut signal = buy_signal(
        current_price,
        0.75,
        format!("Double bottom breakout at ${:.2}", first_low),
    );
    signal.stop_loss = Some(peak * 0.99);
    signal.take_profit = Some(current_price * 1.04);
    Some(signal)
}

/// Range over the previous 20 bars compressing by at least a fifth, then an upside break on volume.
fn triangle_breakout(bars: &[Bar]) -> Option<TradeSignal> {
    let n = bars.len();
    if n < 30 {
        return None;
    }
    let recent = &bars[n - 21..n - 1];
    let range_start = highest_high(&recent[..10]) - lowest_low(&recent[..10]);
    let range_end = highest_high(&recent[10..]) - lowest_low(&recent[10..]);
    if range_end >= range_start * 0.8 {
        return None;
    }

    let volumes = volumes(bars);
    let vol_ratio = safe_ratio(volumes[n - 1], mean_of_last(&volumes[n - 20..n - 5], 15)?);
    let upper_bound = highest_high(recent);
    let current_price = bars[n - 1].close;
    if current_price <= upper_bound * 1.005 || vol_ratio <= 1.5 {
        return None;
    }

    let mut signal = buy_signal(
        current_price,
        0.78,
        format!("Triangle breakout with {:.1}x volume", vol_ratio),
    );
    signal.stop_loss = Some(upper_bound * 0.99);
    signal.take_profit = Some(current_price * 1.03);
    Some(signal)
}

fn cup_handle(bars: &[Bar]) -> Option<TradeSignal> {
    let n = bars.len();
    if n < 50 {
        return None;
    }
    let closes = closes(bars);
    let cup_start = closes[n - 50];
    let cup_low = closes[n - 50..n - 10].iter().copied().fold(f64::MAX, f64::min);
    let cup_recovery = closes[n - 10];

    let cup_depth = safe_ratio(cup_start - cup_low, cup_start);
    if !(cup_depth > 0.10 && cup_depth < 0.35) {
        return None;
    }
    if safe_ratio((cup_recovery - cup_start).abs(), cup_start) > 0.05 {
        return None;
    }

    let handle_low = closes[n - 10..].iter().copied().fold(f64::MAX, f64::min);
    let handle_pullback = safe_ratio(cup_recovery - handle_low, cup_recovery);
    if !(handle_pullback > 0.03 && handle_pullback < 0.15) {
        return None;
    }

    let breakout_level = highest_high(&bars[n - 50..n - 1]);
    let current_price = closes[n - 1];
    if current_price <= breakout_level * 1.005 {
        return None;
    }

    let mut signal = buy_signal(
        current_price,
        0.82,
        format!("Cup & handle breakout, depth {:.1}%", cup_depth * 100.0),
    );
    signal.stop_loss = Some(handle_low * 0.995);
    signal.take_profit = Some(current_price * 1.05);
    Some(signal)
}

/// A green bar whose body swallows the previous red body on 1.5x the recent volume.
fn bullish_engulfing(bars: &[Bar]) -> Option<TradeSignal> {
    let n = bars.len();
    if n < 10 {
        return None;
    }
    let (prev, curr) = (&bars[n - 2], &bars[n - 1]);
    let engulfs = prev.close < prev.open
        && curr.close > curr.open
        && curr.open <= prev.close
        && curr.close >= prev.open;
    if !engulfs {
        return None;
    }

    let volumes = volumes(bars);
    if volumes[n - 1] <= mean_of_last(&volumes[n - 10..n - 1], 9)? * 1.5 {
        return None;
    }

    let mut signal = buy_signal(curr.close, 0.72, "Bullish engulfing with volume");
    signal.stop_loss = Some(prev.close.min(curr.open) * 0.995);
    signal.take_profit = Some(curr.close * 1.03);
    Some(signal)
}
