use anyhow::{anyhow, Result};
use std::collections::HashMap;

const MINUTES_PER_DAY: usize = 24 * 60;

/// Model parameter as f64; missing or non-finite values use `default`.
pub fn get_param_f64(params: &HashMap<String, f64>, key: &str, default: f64) -> f64 {
    params
        .get(key)
        .copied()
        .filter(|v| v.is_finite())
        .unwrap_or(default)
}

/// Fractional percentage (0.02 = 2%) limited to `0..=max`.
pub fn get_param_pct(params: &HashMap<String, f64>, key: &str, default: f64, max: f64) -> f64 {
    get_param_f64(params, key, default).clamp(0.0, max)
}

/// Lookback length in bars, never below `min`.
pub fn get_param_period(
    params: &HashMap<String, f64>,
    key: &str,
    default: usize,
    min: usize,
) -> usize {
    params
        .get(key)
        .copied()
        .filter(|v| v.is_finite())
        .map(|v| v.round().max(min as f64) as usize)
        .unwrap_or(default)
        .max(min)
}

/// Minutes after local midnight, capped to the last minute of the day.
pub fn get_param_minute_of_day(params: &HashMap<String, f64>, key: &str, default: usize) -> usize {
    get_param_period(params, key, default, 0).min(MINUTES_PER_DAY - 1)
}

/// Parses `key=value` pairs from the command line into a numeric parameter map.
pub fn parse_param_pairs(pairs: &[String]) -> Result<HashMap<String, f64>> {
    let mut params = HashMap::new();
    for pair in pairs {
        let (key, value) = pair
            .split_once('=')
            .ok_or_else(|| anyhow!("Parameter '{}' must be in key=value form", pair))?;
        let key = key.trim();
        if key.is_empty() {
            return Err(anyhow!("Parameter '{}' has an empty key", pair));
        }
        let parsed = value
            .trim()
            .parse::<f64>()
            .ok()
            .filter(|v| v.is_finite())
            .ok_or_else(|| anyhow!("Parameter {} must be a finite number (value: {})", key, value))?;
        params.insert(key.to_string(), parsed);
    }
    Ok(params)
}

/// Stable `key=value, ...` rendering for logs.
pub fn format_params(params: &HashMap<String, f64>) -> String {
    if params.is_empty() {
        return "defaults".to_string();
    }
    let mut entries: Vec<(&String, &f64)> = params.iter().collect();
    entries.sort_by(|a, b| a.0.cmp(b.0));
    entries
        .into_iter()
        .map(|(key, value)| format!("{}={}", key, value))
        .collect::<Vec<_>>()
        .join(", ")
}
