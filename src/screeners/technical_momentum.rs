use crate::indicators::{closes, latest_rsi, mean_of_last, volumes};
use crate::models::*;
use crate::param_utils::get_param_f64;
use crate::strategy_utils::safe_ratio;
use anyhow::Result;
use serde_json::json;
use std::collections::HashMap;

const MIN_HISTORY: usize = 20;

/// Scores RSI zone, volume surge, three-day momentum and position against the 20-day SMA,
/// 25 points each.
pub struct TechnicalMomentumScreener {
    rsi_min: f64,
    rsi_max: f64,
    volume_min: f64,
    momentum_threshold: f64,
}

impl TechnicalMomentumScreener {
    pub fn new(parameters: HashMap<String, f64>) -> Self {
        Self {
            rsi_min: get_param_f64(&parameters, "rsiMin", 40.0),
            rsi_max: get_param_f64(&parameters, "rsiMax", 70.0),
            volume_min: get_param_f64(&parameters, "volumeMin", 1.5),
            momentum_threshold: get_param_f64(&parameters, "momentumThreshold", 0.02),
        }
    }

    fn score_symbol(&self, symbol: &str, bars: &[Bar]) -> Option<ScreenedCandidate> {
        if bars.len() < MIN_HISTORY {
            return None;
        }
        let closes = closes(bars);
        let volumes = volumes(bars);
        let n = closes.len();
        let current_price = closes[n - 1];

        let rsi = latest_rsi(&closes, 14);
        let volume_ratio = safe_ratio(volumes[n - 1], mean_of_last(&volumes, 20)?);
        let momentum = if n >= 4 {
            safe_ratio(closes[n - 1] - closes[n - 4], closes[n - 4])
        } else {
            0.0
        };
        let sma_20 = mean_of_last(&closes, 20)?;
        let above_sma = current_price > sma_20;

        let mut score = 0.0;
        let mut reasons = Vec::new();

        if rsi > self.rsi_min && rsi < self.rsi_max {
            score += 25.0;
            reasons.push(format!("RSI {:.1} optimal", rsi));
        } else if rsi < self.rsi_min {
            score += 15.0;
            reasons.push(format!("RSI {:.1} oversold", rsi));
        }

        if volume_ratio > self.volume_min * 1.5 {
            score += 25.0;
            reasons.push(format!("Volume surge {:.1}x", volume_ratio));
        } else if volume_ratio > self.volume_min {
            score += 15.0;
            reasons.push(format!("Volume {:.1}x", volume_ratio));
        }

        if momentum > self.momentum_threshold {
            score += 25.0;
            reasons.push(format!("Strong momentum +{:.1}%", momentum * 100.0));
        } else if momentum > 0.0 {
            score += 10.0;
            reasons.push("Positive momentum".to_string());
        }

        if above_sma {
            score += 25.0;
            reasons.push(format!(
                "{:.1}% above SMA",
                safe_ratio(current_price - sma_20, sma_20) * 100.0
            ));
        }

        let metadata = HashMap::from([
            ("rsi".to_string(), json!(rsi)),
            ("volume_ratio".to_string(), json!(volume_ratio)),
            ("momentum".to_string(), json!(momentum)),
            ("above_sma".to_string(), json!(above_sma)),
        ]);
        super::candidate_from_last_bar(symbol, bars, score, reasons, metadata)
    }
}

impl super::Screener for TechnicalMomentumScreener {
    fn name(&self) -> &str {
        "technical_momentum"
    }

    fn screen(&self, daily_bars: &BarsBySymbol, min_score: f64) -> Result<Vec<ScreenedCandidate>> {
        let mut results: Vec<ScreenedCandidate> = daily_bars
            .iter()
            .filter_map(|(symbol, bars)| self.score_symbol(symbol, bars))
            .collect();
        super::rank_candidates(&mut results, min_score);
        Ok(results)
    }
}
