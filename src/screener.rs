use crate::error::ModelLookupError;
use crate::models::*;
use anyhow::Result;
use std::collections::HashMap;
use std::fmt;
use std::str::FromStr;

/// Ranks symbols from their daily history.
///
/// The map handed to `screen` holds, for every symbol trading on the simulated day, the daily bars
/// strictly before that day. Implementations return candidates scoring at least `min_score`.
pub trait Screener: Send + Sync {
    fn name(&self) -> &str;

    fn screen(&self, daily_bars: &BarsBySymbol, min_score: f64) -> Result<Vec<ScreenedCandidate>>;
}

#[path = "screeners/technical_momentum.rs"]
pub mod technical_momentum;

pub use technical_momentum::TechnicalMomentumScreener;

#[path = "screeners/trend_strength.rs"]
pub mod trend_strength;

pub use trend_strength::TrendStrengthScreener;

#[path = "screeners/gap_volatility.rs"]
pub mod gap_volatility;

pub use gap_volatility::GapVolatilityScreener;

#[path = "screeners/manual.rs"]
pub mod manual;

pub use manual::ManualScreener;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ScreenerKind {
    TechnicalMomentum,
    GapVolatility,
    TrendStrength,
    Manual,
}

impl ScreenerKind {
    pub const ALL: [ScreenerKind; 4] = [
        ScreenerKind::TechnicalMomentum,
        ScreenerKind::GapVolatility,
        ScreenerKind::TrendStrength,
        ScreenerKind::Manual,
    ];

    pub fn as_str(&self) -> &'static str {
        match self {
            ScreenerKind::TechnicalMomentum => "technical_momentum",
            ScreenerKind::GapVolatility => "gap_volatility",
            ScreenerKind::TrendStrength => "trend_strength",
            ScreenerKind::Manual => "manual",
        }
    }

    pub fn available_names() -> String {
        Self::ALL
            .iter()
            .map(|kind| kind.as_str())
            .collect::<Vec<_>>()
            .join(", ")
    }

    pub fn build(&self, parameters: HashMap<String, f64>) -> Box<dyn Screener> {
        match self {
            ScreenerKind::TechnicalMomentum => Box::new(TechnicalMomentumScreener::new(parameters)),
            ScreenerKind::GapVolatility => Box::new(GapVolatilityScreener::new(parameters)),
            ScreenerKind::TrendStrength => Box::new(TrendStrengthScreener::new(parameters)),
            ScreenerKind::Manual => Box::new(ManualScreener::default()),
        }
    }
}

impl fmt::Display for ScreenerKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for ScreenerKind {
    type Err = ModelLookupError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        Self::ALL
            .iter()
            .copied()
            .find(|kind| kind.as_str() == s.trim().to_lowercase())
            .ok_or_else(|| ModelLookupError::UnknownScreener {
                name: s.to_string(),
                available: Self::available_names(),
            })
    }
}

pub fn create_screener(name: &str, parameters: HashMap<String, f64>) -> Result<Box<dyn Screener>> {
    let kind: ScreenerKind = name.parse()?;
    Ok(kind.build(parameters))
}

/// Descending by score; equal scores keep the order the screener produced them in.
pub fn rank_candidates(candidates: &mut Vec<ScreenedCandidate>, min_score: f64) {
    candidates.retain(|candidate| candidate.score.is_finite() && candidate.score >= min_score);
    candidates.sort_by(|a, b| b.score.total_cmp(&a.score));
}

pub(crate) fn candidate_from_last_bar(
    symbol: &str,
    bars: &[Bar],
    score: f64,
    reasons: Vec<String>,
    metadata: HashMap<String, serde_json::Value>,
) -> Option<ScreenedCandidate> {
    let bar = bars.last()?;
    Some(ScreenedCandidate {
        symbol: symbol.to_string(),
        score,
        price: bar.close,
        volume: bar.volume,
        reason: reasons.join(" | "),
        metadata,
    })
}
