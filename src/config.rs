use anyhow::{anyhow, Result};
use chrono::{NaiveDate, NaiveTime};
use chrono_tz::Tz;
use std::collections::HashMap;

pub const DEFAULT_INITIAL_CAPITAL: f64 = 10_000.0;
pub const DEFAULT_DAILY_ALLOCATION_PCT: f64 = 0.10;
pub const DEFAULT_SETTLEMENT_DAYS: u32 = 2;
pub const DEFAULT_MIN_CONFIDENCE: f64 = 0.6;

/// Backtest configuration shared by the scheduler and the intraday executor.
#[derive(Debug, Clone)]
pub struct BacktestConfig {
    // Capital
    pub initial_capital: f64,
    pub daily_allocation_pct: f64,
    pub settlement_days: u32,

    // Entry / exit
    pub min_confidence: f64,
    pub default_stop_loss_pct: f64,
    pub default_take_profit_pct: f64,
    pub max_daily_loss: Option<f64>,

    // Screening
    /// Daily bars (trading sessions) the screener sees before each simulated day.
    pub screening_lookback_days: u32,

    // Session window, expressed in the market's local time
    pub market_timezone: Tz,
    pub market_open: NaiveTime,
    pub market_close: NaiveTime,

    // Progress range covered by the daily loop
    pub progress_start_pct: u8,
    pub progress_end_pct: u8,
}

impl Default for BacktestConfig {
    fn default() -> Self {
        Self {
            initial_capital: DEFAULT_INITIAL_CAPITAL,
            daily_allocation_pct: DEFAULT_DAILY_ALLOCATION_PCT,
            settlement_days: DEFAULT_SETTLEMENT_DAYS,
            min_confidence: DEFAULT_MIN_CONFIDENCE,
            default_stop_loss_pct: 0.02,
            default_take_profit_pct: 0.04,
            max_daily_loss: None,
            screening_lookback_days: 60,
            market_timezone: chrono_tz::America::New_York,
            market_open: NaiveTime::from_hms_opt(9, 30, 0).unwrap_or(NaiveTime::MIN),
            market_close: NaiveTime::from_hms_opt(16, 0, 0).unwrap_or(NaiveTime::MIN),
            progress_start_pct: 10,
            progress_end_pct: 90,
        }
    }
}

impl BacktestConfig {
    /// Builds a config from upper-case settings keys; absent keys keep their defaults.
    pub fn from_settings_map(settings: &HashMap<String, String>) -> Result<Self> {
        let defaults = Self::default();

        let initial_capital = optional_setting_f64(settings, "BACKTEST_INITIAL_CAPITAL", Some(0.0), None)?
            .unwrap_or(defaults.initial_capital);
        let daily_allocation_pct =
            optional_setting_f64(settings, "DAILY_ALLOCATION_PCT", Some(0.0), Some(1.0))?
                .unwrap_or(defaults.daily_allocation_pct);
        let settlement_days = optional_setting_usize(settings, "SETTLEMENT_DAYS", 0)?
            .map(|value| value as u32)
            .unwrap_or(defaults.settlement_days);
        let min_confidence =
            optional_setting_f64(settings, "MIN_SIGNAL_CONFIDENCE", Some(0.0), Some(1.0))?
                .unwrap_or(defaults.min_confidence);
        let default_stop_loss_pct =
            optional_setting_f64(settings, "DEFAULT_STOP_LOSS_PCT", Some(0.0), Some(1.0))?
                .unwrap_or(defaults.default_stop_loss_pct);
        let default_take_profit_pct =
            optional_setting_f64(settings, "DEFAULT_TAKE_PROFIT_PCT", Some(0.0), None)?
                .unwrap_or(defaults.default_take_profit_pct);
        let max_daily_loss = optional_setting_f64(settings, "MAX_DAILY_LOSS", Some(0.0), None)?
            .filter(|value| *value > 0.0);
        let screening_lookback_days = optional_setting_usize(settings, "SCREENING_LOOKBACK_DAYS", 1)?
            .map(|value| value as u32)
            .unwrap_or(defaults.screening_lookback_days);

        let market_timezone = match optional_setting(settings, "MARKET_TIMEZONE") {
            Some(raw) => raw.parse::<Tz>().map_err(|_| {
                anyhow!(
                    "Setting MARKET_TIMEZONE must be an IANA time zone (value: {})",
                    raw
                )
            })?,
            None => defaults.market_timezone,
        };
        let market_open =
            optional_setting_time(settings, "MARKET_OPEN")?.unwrap_or(defaults.market_open);
        let market_close =
            optional_setting_time(settings, "MARKET_CLOSE")?.unwrap_or(defaults.market_close);
        if market_close <= market_open {
            return Err(anyhow!(
                "MARKET_CLOSE ({}) must be after MARKET_OPEN ({})",
                market_close,
                market_open
            ));
        }

        let progress_start_pct = optional_setting_usize(settings, "PROGRESS_START_PCT", 0)?
            .map(|value| value.min(100) as u8)
            .unwrap_or(defaults.progress_start_pct);
        let progress_end_pct = optional_setting_usize(settings, "PROGRESS_END_PCT", 0)?
            .map(|value| value.min(100) as u8)
            .unwrap_or(defaults.progress_end_pct);
        if progress_end_pct < progress_start_pct {
            return Err(anyhow!(
                "PROGRESS_END_PCT ({}) must be >= PROGRESS_START_PCT ({})",
                progress_end_pct,
                progress_start_pct
            ));
        }

        Ok(Self {
            initial_capital,
            daily_allocation_pct,
            settlement_days,
            min_confidence,
            default_stop_loss_pct,
            default_take_profit_pct,
            max_daily_loss,
            screening_lookback_days,
            market_timezone,
            market_open,
            market_close,
            progress_start_pct,
            progress_end_pct,
        })
    }

    /// Confidence a buy signal must reach; forced runs accept any signal.
    pub fn confidence_threshold(&self, force_execution: bool) -> f64 {
        if force_execution {
            0.0
        } else {
            self.min_confidence
        }
    }
}

fn optional_setting<'a>(settings: &'a HashMap<String, String>, key: &str) -> Option<&'a str> {
    settings
        .get(key)
        .map(|value| value.trim())
        .filter(|value| !value.is_empty())
}

pub fn require_setting_date(settings: &HashMap<String, String>, key: &str) -> Result<NaiveDate> {
    let raw =
        optional_setting(settings, key).ok_or_else(|| anyhow!("Missing required setting {}", key))?;
    NaiveDate::parse_from_str(raw, "%Y-%m-%d").map_err(|_| {
        anyhow!(
            "Setting {} must be a date in YYYY-MM-DD format (value: {})",
            key,
            raw
        )
    })
}

fn optional_setting_f64(
    settings: &HashMap<String, String>,
    key: &str,
    min: Option<f64>,
    max: Option<f64>,
) -> Result<Option<f64>> {
    let Some(raw) = optional_setting(settings, key) else {
        return Ok(None);
    };
    let value = raw
        .parse::<f64>()
        .map_err(|_| anyhow!("Setting {} must be a number (value: {})", key, raw))?;
    if !value.is_finite() {
        return Err(anyhow!("Setting {} must be finite (value: {})", key, raw));
    }
    if let Some(min_value) = min {
        if value < min_value {
            return Err(anyhow!(
                "Setting {} must be >= {} (value: {})",
                key,
                min_value,
                raw
            ));
        }
    }
    if let Some(max_value) = max {
        if value > max_value {
            return Err(anyhow!(
                "Setting {} must be <= {} (value: {})",
                key,
                max_value,
                raw
            ));
        }
    }
    Ok(Some(value))
}

fn optional_setting_usize(
    settings: &HashMap<String, String>,
    key: &str,
    min: usize,
) -> Result<Option<usize>> {
    let Some(value) = optional_setting_f64(settings, key, None, None)? else {
        return Ok(None);
    };
    if value.fract() != 0.0 {
        return Err(anyhow!(
            "Setting {} must be an integer (value: {})",
            key,
            value
        ));
    }
    if value < min as f64 {
        return Err(anyhow!(
            "Setting {} must be >= {} (value: {})",
            key,
            min,
            value
        ));
    }
    Ok(Some(value as usize))
}

fn optional_setting_time(settings: &HashMap<String, String>, key: &str) -> Result<Option<NaiveTime>> {
    let Some(raw) = optional_setting(settings, key) else {
        return Ok(None);
    };
    NaiveTime::parse_from_str(raw, "%H:%M")
        .or_else(|_| NaiveTime::parse_from_str(raw, "%H:%M:%S"))
        .map(Some)
        .map_err(|_| anyhow!("Setting {} must be a time in HH:MM format (value: {})", key, raw))
}
