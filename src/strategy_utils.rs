use crate::models::{SignalAction, TradeSignal};

/// Create a buy signal at `price` with the given confidence
pub fn buy_signal(price: f64, confidence: f64, reason: impl Into<String>) -> TradeSignal {
    TradeSignal {
        action: SignalAction::Buy,
        price,
        confidence: confidence.clamp(0.0, 1.0),
        reason: reason.into(),
        stop_loss: None,
        take_profit: None,
    }
}

/// Check if confidence meets the minimum threshold
pub fn meets_confidence_threshold(confidence: f64, min_confidence: f64) -> bool {
    confidence >= min_confidence - 1e-6
}

/// Ratio of `value` to `baseline`, or 0 when the baseline is not positive.
pub fn safe_ratio(value: f64, baseline: f64) -> f64 {
    if baseline > 0.0 && value.is_finite() {
        value / baseline
    } else {
        0.0
    }
}
