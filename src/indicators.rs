use crate::models::Bar;

/// Mean of the trailing `period` values (or of all values when fewer are available).
pub fn mean_of_last(values: &[f64], period: usize) -> Option<f64> {
    if values.is_empty() || period == 0 {
        return None;
    }
    let start = values.len().saturating_sub(period);
    let window = &values[start..];
    Some(window.iter().sum::<f64>() / window.len() as f64)
}

/// Simple-average RSI over the trailing `period` price changes. Returns 50 when there is not
/// enough history.
pub fn latest_rsi(prices: &[f64], period: usize) -> f64 {
    if period == 0 || prices.len() < period + 1 {
        return 50.0;
    }
    let tail = &prices[prices.len() - period - 1..];
    let mut gains = 0.0;
    let mut losses = 0.0;
    for pair in tail.windows(2) {
        let delta = pair[1] - pair[0];
        if delta > 0.0 {
            gains += delta;
        } else {
            losses += -delta;
        }
    }
    match (gains > 0.0, losses > 0.0) {
        (false, false) => 50.0,
        (true, false) => 100.0,
        (false, true) => 0.0,
        // Equal divisors cancel, so the sums stand in for the averages.
        (true, true) => 100.0 - 100.0 / (1.0 + gains / losses),
    }
}

/// Volume-weighted average of the typical price across all bars. Falls back to the mean
/// typical price when the bars carry no volume.
pub fn session_vwap(bars: &[Bar]) -> Option<f64> {
    if bars.is_empty() {
        return None;
    }
    let mut cumulative_pv = 0.0;
    let mut cumulative_volume = 0.0;
    let mut typical_sum = 0.0;
    for bar in bars {
        let typical_price = (bar.high + bar.low + bar.close) / 3.0;
        let volume = bar.volume.max(0) as f64;
        cumulative_pv += typical_price * volume;
        cumulative_volume += volume;
        typical_sum += typical_price;
    }
    if cumulative_volume > 0.0 {
        Some(cumulative_pv / cumulative_volume)
    } else {
        Some(typical_sum / bars.len() as f64)
    }
}

/// Mean of the trailing `period` true ranges. The first bar only seeds the previous close.
pub fn average_true_range(bars: &[Bar], period: usize) -> Option<f64> {
    if period == 0 || bars.len() < period.max(2) {
        return None;
    }
    let true_ranges: Vec<f64> = bars
        .windows(2)
        .map(|pair| {
            let (prev_close, bar) = (pair[0].close, &pair[1]);
            (bar.high - bar.low)
                .max((bar.high - prev_close).abs())
                .max((bar.low - prev_close).abs())
        })
        .collect();
    mean_of_last(&true_ranges, period)
}

pub fn closes(bars: &[Bar]) -> Vec<f64> {
    bars.iter().map(|bar| bar.close).collect()
}

pub fn volumes(bars: &[Bar]) -> Vec<f64> {
    bars.iter().map(|bar| bar.volume as f64).collect()
}
