use crate::indicators::{closes, mean_of_last, volumes};
use crate::models::*;
use crate::param_utils::{get_param_f64, get_param_period};
use crate::strategy_utils::safe_ratio;
use anyhow::Result;
use serde_json::json;
use std::collections::HashMap;

const MIN_HISTORY: usize = 50;

pub struct TrendStrengthScreener {
    min_trend_days: usize,
    min_ma_separation: f64,
}

impl TrendStrengthScreener {
    pub fn new(parameters: HashMap<String, f64>) -> Self {
        Self {
            min_trend_days: get_param_period(&parameters, "minTrendDays", 3, 1),
            min_ma_separation: get_param_f64(&parameters, "minMaSeparation", 0.02),
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

        let sma_20 = mean_of_last(&closes, 20)?;
        let sma_50 = mean_of_last(&closes, 50)?;
        let bullish_alignment = sma_20 > sma_50;
        let ma_separation = safe_ratio(sma_20 - sma_50, sma_50);

        // Consecutive up closes, looking back at most nine sessions.
        let up_days = closes[n.saturating_sub(10)..]
            .windows(2)
            .rev()
            .take_while(|pair| pair[1] > pair[0])
            .count();

        let above_all_mas = current_price > sma_20 && sma_20 > sma_50;

        let vol_recent = mean_of_last(&volumes, 5)?;
        let vol_older = mean_of_last(&volumes[..n - 5], 15)?;
        let volume_trending = vol_older > 0.0 && vol_recent > vol_older;

        let mut score = 0.0;
        let mut reasons = Vec::new();

        if bullish_alignment {
            score += 20.0;
            reasons.push("Bullish MA alignment".to_string());
        }

        if up_days >= 5 {
            score += 15.0;
            reasons.push(format!("{} consecutive up days", up_days));
        } else if up_days >= self.min_trend_days {
            score += 10.0;
            reasons.push(format!("{} up days", up_days));
        }

        if ma_separation > self.min_ma_separation {
            score += 20.0;
            reasons.push(format!("Strong MA separation {:.1}%", ma_separation * 100.0));
        } else if ma_separation > 0.0 {
            score += 10.0;
        }

        if above_all_mas {
            score += 15.0;
            reasons.push("Price above all MAs".to_string());
        }

        if volume_trending {
            score += 10.0;
            reasons.push("Volume trending up".to_string());
        }

        if bullish_alignment && above_all_mas && up_days >= 5 {
            score += 20.0;
            reasons.push("Perfect trend setup".to_string());
        }

        let metadata = HashMap::from([
            ("bullish_alignment".to_string(), json!(bullish_alignment)),
            ("consecutive_up_days".to_string(), json!(up_days)),
            ("ma_separation".to_string(), json!(ma_separation)),
            ("above_all_mas".to_string(), json!(above_all_mas)),
        ]);
        super::candidate_from_last_bar(symbol, bars, score, reasons, metadata)
    }
}

impl super::Screener for TrendStrengthScreener {
    fn name(&self) -> &str {
        "trend_strength"
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
