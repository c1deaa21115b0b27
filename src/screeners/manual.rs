use crate::models::*;
use anyhow::Result;
use std::collections::HashMap;

pub const MANUAL_SCORE: f64 = 100.0;

/// Passes through a fixed symbol list. Every listed symbol trading that day scores 100, in list
/// order. With no list, every symbol in the daily map is returned.
#[derive(Debug, Clone, Default)]
pub struct ManualScreener {
    symbols: Vec<String>,
}

impl ManualScreener {
    pub fn new(symbols: Vec<String>) -> Self {
        Self { symbols }
    }
}

impl super::Screener for ManualScreener {
    fn name(&self) -> &str {
        "manual"
    }

    fn screen(&self, daily_bars: &BarsBySymbol, min_score: f64) -> Result<Vec<ScreenedCandidate>> {
        if MANUAL_SCORE < min_score {
            return Ok(Vec::new());
        }

        let ordered: Vec<&String> = if self.symbols.is_empty() {
            daily_bars.keys().collect()
        } else {
            self.symbols.iter().collect()
        };

        Ok(ordered
            .into_iter()
            .filter_map(|symbol| {
                let bars = daily_bars.get(symbol)?;
                super::candidate_from_last_bar(
                    symbol,
                    bars,
                    MANUAL_SCORE,
                    vec!["Manual selection".to_string()],
                    HashMap::new(),
                )
            })
            .collect())
    }
}
