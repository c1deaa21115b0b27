use crate::error::ModelLookupError;
use crate::models::*;
use anyhow::Result;
use chrono::DateTime;
use chrono_tz::Tz;
use std::collections::HashMap;
use std::fmt;
use std::str::FromStr;

/// Intraday entry/exit policy driven bar by bar by the executor.
///
/// `generate_signal` sees every bar of the session up to and including the current one.
/// `should_exit` is only consulted after the executor's own stop/target checks, and receives the
/// bar time in the market's local timezone. Returning `Err` from either method skips that bar.
pub trait SignalPolicy: Send {
    fn name(&self) -> &str;

    fn generate_signal(
        &mut self,
        symbol: &str,
        bars_so_far: &[Bar],
        context: &ScreenedCandidate,
    ) -> Result<Option<TradeSignal>>;

    fn should_exit(
        &self,
        position: &Position,
        bar: &Bar,
        local_time: DateTime<Tz>,
    ) -> Result<Option<String>>;
}

#[path = "strategies/ma_crossover.rs"]
pub mod ma_crossover;

pub use ma_crossover::MovingAverageCrossover;

#[path = "strategies/vwap_bounce.rs"]
pub mod vwap_bounce;

pub use vwap_bounce::VwapBounce;

#[path = "strategies/pattern_recognition.rs"]
pub mod pattern_recognition;

pub use pattern_recognition::PatternRecognition;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SignalPolicyKind {
    MaCrossover,
    VwapBounce,
    PatternRecognition,
}

impl SignalPolicyKind {
    pub const ALL: [SignalPolicyKind; 3] = [
        SignalPolicyKind::MaCrossover,
        SignalPolicyKind::VwapBounce,
        SignalPolicyKind::PatternRecognition,
    ];

    pub fn as_str(&self) -> &'static str {
        match self {
            SignalPolicyKind::MaCrossover => "ma_crossover",
            SignalPolicyKind::VwapBounce => "vwap_bounce",
            SignalPolicyKind::PatternRecognition => "pattern_recognition",
        }
    }

    pub fn available_names() -> String {
        Self::ALL
            .iter()
            .map(|kind| kind.as_str())
            .collect::<Vec<_>>()
            .join(", ")
    }

    pub fn build(&self, parameters: HashMap<String, f64>) -> Box<dyn SignalPolicy + Send + Sync> {
        match self {
            SignalPolicyKind::MaCrossover => Box::new(MovingAverageCrossover::new(parameters)),
            SignalPolicyKind::VwapBounce => Box::new(VwapBounce::new(parameters)),
            SignalPolicyKind::PatternRecognition => Box::new(PatternRecognition::new(parameters)),
        }
    }
}

impl fmt::Display for SignalPolicyKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for SignalPolicyKind {
    type Err = ModelLookupError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.trim().to_lowercase().as_str() {
            "ma_crossover" => Ok(SignalPolicyKind::MaCrossover),
            "vwap_bounce" | "vwap_mean_reversion" => Ok(SignalPolicyKind::VwapBounce),
            "pattern_recognition" | "momentum_breakout" => Ok(SignalPolicyKind::PatternRecognition),
            _ => Err(ModelLookupError::UnknownSignalPolicy {
                name: s.to_string(),
                available: Self::available_names(),
            }),
        }
    }
}

pub fn create_signal_policy(
    name: &str,
    parameters: HashMap<String, f64>,
) -> Result<Box<dyn SignalPolicy + Send + Sync>> {
    let kind: SignalPolicyKind = name.parse()?;
    Ok(kind.build(parameters))
}

/// True once `local_time` reaches `exit_minute_of_day` (minutes after local midnight).
pub(crate) fn past_exit_time(local_time: &DateTime<Tz>, exit_minute_of_day: usize) -> bool {
    use chrono::Timelike;
    let minute_of_day = local_time.hour() as usize * 60 + local_time.minute() as usize;
    minute_of_day >= exit_minute_of_day
}
