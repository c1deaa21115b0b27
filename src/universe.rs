use std::collections::HashSet;

/// Liquid large-cap names screened when no universe is supplied.
pub const DEFAULT_UNIVERSE: &[&str] = &[
    "AAPL", "MSFT", "GOOGL", "AMZN", "TSLA", "META", "NVDA", "AMD", "NFLX", "INTC", "BA", "DIS",
    "JPM", "BAC", "WMT", "V", "MA", "PYPL", "CRM", "ORCL", "ADBE", "QCOM", "CSCO", "PFE", "KO",
    "PEP", "XOM", "CVX", "UNH", "HD", "COST", "SBUX", "NKE", "UBER", "SHOP", "SQ", "SPY", "QQQ",
    "IWM", "SOFI",
];

pub fn default_universe() -> Vec<String> {
    DEFAULT_UNIVERSE.iter().map(|symbol| symbol.to_string()).collect()
}

/// Normalizes a ticker string by trimming whitespace and uppercasing.
pub fn normalize_symbol(value: &str) -> Option<String> {
    let normalized = value.trim().to_uppercase();
    if normalized.is_empty() {
        None
    } else {
        Some(normalized)
    }
}

/// Normalizes and de-duplicates `symbols` keeping first-seen order. Entries may themselves be
/// comma separated. Falls back to the default universe when nothing usable remains.
pub fn resolve_universe(symbols: &[String]) -> Vec<String> {
    let mut seen = HashSet::new();
    let resolved: Vec<String> = symbols
        .iter()
        .flat_map(|entry| entry.split(','))
        .filter_map(normalize_symbol)
        .filter(|symbol| seen.insert(symbol.clone()))
        .collect();

    if resolved.is_empty() {
        default_universe()
    } else {
        resolved
    }
}
