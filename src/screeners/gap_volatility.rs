use crate::indicators::{average_true_range, mean_of_last, volumes};
use crate::models::*;
use crate::param_utils::get_param_f64;
use crate::strategy_utils::safe_ratio;
use anyhow::Result;
use serde_json::json;
use std::collections::HashMap;

const MIN_HISTORY: usize = 20;
const ATR_PERIOD: usize = 14;
const LARGE_GAP: f64 = 0.05;

/// Opening gaps of the latest session, scored with ATR band, volume surge and whether the
/// session followed through in the gap's direction. Symbols gapping less than `minGap` are
/// dropped whatever their score.
pub struct GapVolatilityScreener {
    min_gap: f64,
    min_atr_pct: f64,
    max_atr_pct: f64,
}

impl GapVolatilityScreener {
    pub fn new(parameters: HashMap<String, f64>) -> Self {
        Self {
            min_gap: get_param_f64(&parameters, "minGap", 0.02),
            min_atr_pct: get_param_f64(&parameters, "minAtrPct", 2.0),
            max_atr_pct: get_param_f64(&parameters, "maxAtrPct", 8.0),
        }
    }

    fn score_symbol(&self, symbol: &str, bars: &[Bar]) -> Option<ScreenedCandidate> {
        if bars.len() < MIN_HISTORY {
            return None;
        }
        let current = &bars[bars.len() - 1];
        let previous = &bars[bars.len() - 2];

        let gap = safe_ratio(current.open - previous.close, previous.close);
        if gap.abs() < self.min_gap {
            return None;
        }

        let atr = average_true_range(bars, ATR_PERIOD).unwrap_or(0.0);
        let atr_pct = safe_ratio(atr, current.close) * 100.0;

        let volumes = volumes(bars);
        let volume_ratio = safe_ratio(volumes[volumes.len() - 1], mean_of_last(&volumes, 20)?);

        let intraday_move = safe_ratio(current.close - current.open, current.open);
        let follow_through = (gap > 0.0 && intraday_move > 0.0) || (gap < 0.0 && intraday_move < 0.0);

        let mut score = 0.0;
        let mut reasons = Vec::new();

        if gap.abs() > LARGE_GAP {
            score += 35.0;
            reasons.push(format!("Large gap {:.1}%", gap * 100.0));
        } else if gap.abs() > self.min_gap {
            score += 20.0;
            reasons.push(format!("Gap {:.1}%", gap * 100.0));
        }

        if atr_pct > self.min_atr_pct && atr_pct < self.max_atr_pct {
            score += 25.0;
            reasons.push(format!("Ideal ATR {:.1}%", atr_pct));
        } else if atr_pct >= self.max_atr_pct {
            score += 10.0;
            reasons.push(format!("High volatility {:.1}%", atr_pct));
        }

        if volume_ratio > 2.0 {
            score += 20.0;
            reasons.push(format!("Volume surge {:.1}x", volume_ratio));
        } else if volume_ratio > 1.5 {
            score += 10.0;
        }

        if follow_through {
            score += 20.0;
            reasons.push(format!("Gap follow-through {:.1}%", intraday_move * 100.0));
        }

        let metadata = HashMap::from([
            ("gap".to_string(), json!(gap)),
            ("atr_pct".to_string(), json!(atr_pct)),
            ("volume_ratio".to_string(), json!(volume_ratio)),
            ("follow_through".to_string(), json!(follow_through)),
        ]);
        super::candidate_from_last_bar(symbol, bars, score, reasons, metadata)
    }
}

impl super::Screener for GapVolatilityScreener {
    fn name(&self) -> &str {
        "gap_volatility"
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

#[cfg(test)]
mod tests {
    use super::*;
    use crate::screener::Screener;
    use chrono::{Duration, TimeZone, Utc};

    fn daily_bar(symbol: &str, i: usize, open: f64, high: f64, low: f64, close: f64, volume: i64) -> Bar {
        Bar {
            symbol: symbol.to_string(),
            timestamp: Utc.with_ymd_and_hms(2024, 1, 1, 21, 0, 0).unwrap() + Duration::days(i as i64),
            open,
            high,
            low,
            close,
            volume,
        }
    }

    /// 24 quiet sessions around 100 with a 4-point range.
    fn quiet_history(symbol: &str) -> Vec<Bar> {
        (0..24)
            .map(|i| daily_bar(symbol, i, 100.0, 102.0, 98.0, 100.0, 1_000))
            .collect()
    }

    #[test]
    fn gap_up_with_follow_through_scores_full_marks() {
        let screener = GapVolatilityScreener::new(HashMap::new());
        let mut gapper = quiet_history("GAP");
        gapper.push(daily_bar("GAP", 24, 106.0, 109.0, 105.0, 108.0, 3_000));
        let mut map = BarsBySymbol::new();
        map.insert("GAP".to_string(), gapper);
        map.insert("FLAT".to_string(), quiet_history("FLAT"));

        let results = screener.screen(&map, 0.0).unwrap();
        assert_eq!(results.len(), 1);
        let candidate = &results[0];
        assert_eq!(candidate.symbol, "GAP");
        // 35 gap + 25 ATR band + 20 volume + 20 follow-through.
        assert!((candidate.score - 100.0).abs() < 1e-9);
        assert!((candidate.metadata["gap"].as_f64().unwrap() - 0.06).abs() < 1e-9);
        assert_eq!(candidate.metadata["follow_through"], json!(true));
        assert!((candidate.price - 108.0).abs() < 1e-9);
    }

    #[test]
    fn small_gap_that_fades_scores_low() {
        let screener = GapVolatilityScreener::new(HashMap::new());
        let mut fader = quiet_history("FADE");
        fader.push(daily_bar("FADE", 24, 103.0, 103.5, 100.5, 101.0, 1_000));
        let mut map = BarsBySymbol::new();
        map.insert("FADE".to_string(), fader);

        let results = screener.screen(&map, 0.0).unwrap();
        assert_eq!(results.len(), 1);
        // Gap 3% (20) plus ATR band (25); no volume surge, no follow-through.
        assert!((results[0].score - 45.0).abs() < 1e-9);
        assert!(screener.screen(&map, 50.0).unwrap().is_empty());
    }
}
