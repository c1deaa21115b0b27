use crate::models::{Bar, BarsBySymbol};
use anyhow::{anyhow, Context, Result};
use chrono::{DateTime, Days, NaiveDate, Utc};
use futures::future::{BoxFuture, FutureExt};
use log::{debug, info};
use serde::{Deserialize, Serialize};
use std::collections::HashMap;
use std::fs::{self, File};
use std::io::{BufReader, BufWriter, Write};
use std::path::Path;
use std::sync::Mutex;

const MARKET_DATA_SNAPSHOT_VERSION: u32 = 1;
/// Margin for exchange holidays on top of weekends.
const HOLIDAY_SLACK_DAYS: u32 = 10;

/// Source of daily and minute bars.
///
/// Every requested symbol is present in the returned map. Symbols that are unknown or whose fetch
/// failed map to an empty sequence, which the engine treats as "skip"; gateways never fail a whole
/// request.
pub trait MarketDataGateway: Send + Sync {
    /// Daily bars dated within `lookback_days` calendar days up to and including `end`.
    fn daily_bars<'a>(
        &'a self,
        symbols: &'a [String],
        end: NaiveDate,
        lookback_days: u32,
    ) -> BoxFuture<'a, BarsBySymbol>;

    /// Minute bars with `start <= timestamp < end`.
    fn minute_bars<'a>(
        &'a self,
        symbols: &'a [String],
        start: DateTime<Utc>,
        end: DateTime<Utc>,
    ) -> BoxFuture<'a, BarsBySymbol>;
}

/// Sorts every sequence by timestamp and adds empty entries for symbols the source did not return.
pub fn complete_bar_map(symbols: &[String], mut bars: BarsBySymbol) -> BarsBySymbol {
    for symbol in symbols {
        bars.entry(symbol.clone()).or_default();
    }
    for series in bars.values_mut() {
        series.sort_by(|a, b| a.timestamp.cmp(&b.timestamp));
    }
    bars
}

pub fn lookback_start(end: NaiveDate, lookback_days: u32) -> NaiveDate {
    end.checked_sub_days(Days::new(u64::from(lookback_days)))
        .unwrap_or(NaiveDate::MIN)
}

/// Calendar days that span at least `sessions` trading sessions.
pub fn calendar_days_for_sessions(sessions: u32) -> u32 {
    sessions
        .saturating_mul(7)
        .div_ceil(5)
        .saturating_add(HOLIDAY_SLACK_DAYS)
}

fn symbol_set_key(symbols: &[String]) -> Vec<String> {
    let mut key = symbols.to_vec();
    key.sort();
    key.dedup();
    key
}

type DailyKey = (Vec<String>, NaiveDate, u32);
type MinuteKey = (Vec<String>, DateTime<Utc>, DateTime<Utc>);

/// Memoises gateway responses by (symbol set, date range). Lives for one run only.
pub struct CachedGateway<'a> {
    inner: &'a dyn MarketDataGateway,
    daily: Mutex<HashMap<DailyKey, BarsBySymbol>>,
    minute: Mutex<HashMap<MinuteKey, BarsBySymbol>>,
    misses: Mutex<usize>,
}

impl<'a> CachedGateway<'a> {
    pub fn new(inner: &'a dyn MarketDataGateway) -> Self {
        Self {
            inner,
            daily: Mutex::new(HashMap::new()),
            minute: Mutex::new(HashMap::new()),
            misses: Mutex::new(0),
        }
    }

    /// Number of requests that reached the wrapped gateway.
    pub fn upstream_requests(&self) -> usize {
        self.misses.lock().map(|count| *count).unwrap_or(0)
    }

    fn record_miss(&self) {
        if let Ok(mut count) = self.misses.lock() {
            *count += 1;
        }
    }

    pub async fn daily_bars(
        &self,
        symbols: &[String],
        end: NaiveDate,
        lookback_days: u32,
    ) -> BarsBySymbol {
        let key = (symbol_set_key(symbols), end, lookback_days);
        if let Some(hit) = self.daily.lock().ok().and_then(|cache| cache.get(&key).cloned()) {
            debug!("Daily bar cache hit for {} symbols", key.0.len());
            return hit;
        }

        self.record_miss();
        let bars = complete_bar_map(
            symbols,
            self.inner.daily_bars(symbols, end, lookback_days).await,
        );
        if let Ok(mut cache) = self.daily.lock() {
            cache.insert(key, bars.clone());
        }
        bars
    }

    pub async fn minute_bars(
        &self,
        symbols: &[String],
        start: DateTime<Utc>,
        end: DateTime<Utc>,
    ) -> BarsBySymbol {
        let key = (symbol_set_key(symbols), start, end);
        if let Some(hit) = self.minute.lock().ok().and_then(|cache| cache.get(&key).cloned()) {
            debug!("Minute bar cache hit for {} symbols", key.0.len());
            return hit;
        }

        self.record_miss();
        let bars = complete_bar_map(symbols, self.inner.minute_bars(symbols, start, end).await);
        if let Ok(mut cache) = self.minute.lock() {
            cache.insert(key, bars.clone());
        }
        bars
    }
}

/// Daily and minute bars held in memory, persisted as a versioned bincode file.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct MarketSnapshot {
    pub daily: BarsBySymbol,
    pub minute: BarsBySymbol,
}

#[derive(Serialize, Deserialize)]
struct MarketSnapshotFile {
    version: u32,
    generated_at: DateTime<Utc>,
    snapshot: MarketSnapshot,
}

impl MarketSnapshot {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn insert_daily(&mut self, bars: Vec<Bar>) {
        insert_bars(&mut self.daily, bars);
    }

    pub fn insert_minute(&mut self, bars: Vec<Bar>) {
        insert_bars(&mut self.minute, bars);
    }

    pub fn symbols(&self) -> Vec<String> {
        let mut symbols: Vec<String> = self
            .daily
            .keys()
            .chain(self.minute.keys())
            .cloned()
            .collect();
        symbols.sort();
        symbols.dedup();
        symbols
    }

    pub fn load_from_file<P: AsRef<Path>>(path: P) -> Result<Self> {
        let path = path.as_ref();
        let file = File::open(path).with_context(|| {
            format!("Failed to open market data snapshot at {}", path.display())
        })?;
        let reader = BufReader::new(file);
        let stored: MarketSnapshotFile =
            bincode::deserialize_from(reader).context("Snapshot decode failed")?;

        if stored.version != MARKET_DATA_SNAPSHOT_VERSION {
            return Err(anyhow!(
                "Market data snapshot version mismatch (found {}, expected {})",
                stored.version,
                MARKET_DATA_SNAPSHOT_VERSION
            ));
        }

        info!(
            "Loaded market data snapshot from {} ({} daily symbols, {} minute symbols, generated {})",
            path.display(),
            stored.snapshot.daily.len(),
            stored.snapshot.minute.len(),
            stored.generated_at
        );
        Ok(stored.snapshot)
    }

    pub fn save_to_file<P: AsRef<Path>>(&self, path: P) -> Result<()> {
        let path = path.as_ref();
        if let Some(parent) = path.parent() {
            if !parent.as_os_str().is_empty() {
                fs::create_dir_all(parent).with_context(|| {
                    format!("Failed to create snapshot directory {}", parent.display())
                })?;
            }
        }

        let file = File::create(path).with_context(|| {
            format!(
                "Unable to create market data snapshot at {}",
                path.display()
            )
        })?;
        let mut writer = BufWriter::new(file);
        let stored = MarketSnapshotFile {
            version: MARKET_DATA_SNAPSHOT_VERSION,
            generated_at: Utc::now(),
            snapshot: self.clone(),
        };
        bincode::serialize_into(&mut writer, &stored)
            .context("Failed to serialize market data snapshot")?;
        writer
            .flush()
            .context("Failed to flush market data snapshot to disk")?;
        Ok(())
    }
}

fn insert_bars(target: &mut BarsBySymbol, bars: Vec<Bar>) {
    for bar in bars {
        target.entry(bar.symbol.clone()).or_default().push(bar);
    }
    for series in target.values_mut() {
        series.sort_by(|a, b| a.timestamp.cmp(&b.timestamp));
        series.dedup_by(|a, b| a.timestamp == b.timestamp);
    }
}

/// Serves bars from a `MarketSnapshot`.
pub struct SnapshotGateway {
    snapshot: MarketSnapshot,
}

impl SnapshotGateway {
    pub fn new(snapshot: MarketSnapshot) -> Self {
        Self { snapshot }
    }

    pub fn from_file<P: AsRef<Path>>(path: P) -> Result<Self> {
        Ok(Self::new(MarketSnapshot::load_from_file(path)?))
    }

    pub fn snapshot(&self) -> &MarketSnapshot {
        &self.snapshot
    }
}

impl MarketDataGateway for SnapshotGateway {
    fn daily_bars<'a>(
        &'a self,
        symbols: &'a [String],
        end: NaiveDate,
        lookback_days: u32,
    ) -> BoxFuture<'a, BarsBySymbol> {
        let start = lookback_start(end, lookback_days);
        let bars = symbols
            .iter()
            .map(|symbol| {
                let series = self
                    .snapshot
                    .daily
                    .get(symbol)
                    .map(|bars| {
                        bars.iter()
                            .filter(|bar| {
                                let date = bar.timestamp.date_naive();
                                date >= start && date <= end
                            })
                            .cloned()
                            .collect()
                    })
                    .unwrap_or_default();
                (symbol.clone(), series)
            })
            .collect();
        futures::future::ready(complete_bar_map(symbols, bars)).boxed()
    }

    fn minute_bars<'a>(
        &'a self,
        symbols: &'a [String],
        start: DateTime<Utc>,
        end: DateTime<Utc>,
    ) -> BoxFuture<'a, BarsBySymbol> {
        let bars = symbols
            .iter()
            .map(|symbol| {
                let series = self
                    .snapshot
                    .minute
                    .get(symbol)
                    .map(|bars| {
                        bars.iter()
                            .filter(|bar| bar.timestamp >= start && bar.timestamp < end)
                            .cloned()
                            .collect()
                    })
                    .unwrap_or_default();
                (symbol.clone(), series)
            })
            .collect();
        futures::future::ready(complete_bar_map(symbols, bars)).boxed()
    }
}
