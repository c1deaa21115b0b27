use crate::market_data::{complete_bar_map, lookback_start, MarketDataGateway};
use crate::models::{Bar, BarsBySymbol};
use crate::retry::retry_request;
use anyhow::{anyhow, Context, Result};
use chrono::{DateTime, Days, NaiveDate, Utc};
use futures::future::{BoxFuture, FutureExt};
use log::{debug, warn};
use reqwest::header::{HeaderMap, HeaderValue};
use reqwest::Client;
use serde::de::DeserializeOwned;
use serde::Deserialize;
use std::collections::HashMap;
use std::time::Duration;
use tokio::time::sleep;

const DEFAULT_DATA_URL: &str = "https://data.alpaca.markets";
const DEFAULT_FEED: &str = "iex";
const PAGE_LIMIT: &str = "10000";
const MAX_PAGES: usize = 500;
const SYMBOLS_PER_REQUEST: usize = 50;
const REQUEST_DELAY: Duration = Duration::from_millis(350);

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum BarTimeframe {
    Day,
    Minute,
}

impl BarTimeframe {
    fn as_query(&self) -> &'static str {
        match self {
            BarTimeframe::Day => "1Day",
            BarTimeframe::Minute => "1Min",
        }
    }
}

/// Client for the Alpaca historical stock bars API.
pub struct AlpacaDataClient {
    http: Client,
    base_url: String,
    headers: HeaderMap,
    feed: String,
}

impl AlpacaDataClient {
    pub fn new(api_key: &str, api_secret: &str, base_url: &str, feed: &str) -> Result<Self> {
        let mut headers = HeaderMap::new();
        headers.insert(
            "APCA-API-KEY-ID",
            HeaderValue::from_str(api_key).context("invalid Alpaca API key")?,
        );
        headers.insert(
            "APCA-API-SECRET-KEY",
            HeaderValue::from_str(api_secret).context("invalid Alpaca API secret")?,
        );

        let http = Client::builder()
            .timeout(Duration::from_secs(30))
            .build()
            .context("failed to build HTTP client")?;

        Ok(Self {
            http,
            base_url: base_url.trim_end_matches('/').to_string(),
            headers,
            feed: feed.to_string(),
        })
    }

    /// Reads `ALPACA_API_KEY`, `ALPACA_API_SECRET`, `ALPACA_DATA_URL` and `ALPACA_FEED`.
    pub fn from_settings(settings: &HashMap<String, String>) -> Result<Self> {
        let read = |key: &str| {
            settings
                .get(key)
                .map(|value| value.trim())
                .filter(|value| !value.is_empty())
        };
        let api_key = read("ALPACA_API_KEY")
            .ok_or_else(|| anyhow!("Missing required setting ALPACA_API_KEY"))?;
        let api_secret = read("ALPACA_API_SECRET")
            .ok_or_else(|| anyhow!("Missing required setting ALPACA_API_SECRET"))?;
        let base_url = read("ALPACA_DATA_URL").unwrap_or(DEFAULT_DATA_URL);
        let feed = read("ALPACA_FEED").unwrap_or(DEFAULT_FEED);
        Self::new(api_key, api_secret, base_url, feed)
    }

    /// Fetches every page of bars for `symbols`, in chunks, between `start` and `end`.
    pub async fn fetch_bars(
        &self,
        symbols: &[String],
        timeframe: BarTimeframe,
        start: DateTime<Utc>,
        end: DateTime<Utc>,
    ) -> Result<BarsBySymbol> {
        let mut result = BarsBySymbol::new();
        for chunk in symbols.chunks(SYMBOLS_PER_REQUEST) {
            let joined = chunk.join(",");
            let mut page_token: Option<String> = None;
            let mut pages = 0;

            loop {
                pages += 1;
                if pages > MAX_PAGES {
                    warn!(
                        "Stopping bar pagination for {} after {} pages",
                        joined, MAX_PAGES
                    );
                    break;
                }

                let page: BarsPage = retry_request!(
                    format!("{} bars for {}", timeframe.as_query(), joined),
                    self.fetch_page(&joined, timeframe, start, end, page_token.as_deref())
                )?;

                for (symbol, raw_bars) in page.bars.unwrap_or_default() {
                    let series = result.entry(symbol.clone()).or_default();
                    series.extend(raw_bars.into_iter().filter_map(|raw| raw.into_bar(&symbol)));
                }

                match page.next_page_token {
                    Some(token) if !token.is_empty() => page_token = Some(token),
                    _ => break,
                }
            }
        }

        debug!(
            "Fetched {} bars for {} symbols",
            timeframe.as_query(),
            result.len()
        );
        Ok(complete_bar_map(symbols, result))
    }

    async fn fetch_page(
        &self,
        symbols: &str,
        timeframe: BarTimeframe,
        start: DateTime<Utc>,
        end: DateTime<Utc>,
        page_token: Option<&str>,
    ) -> Result<BarsPage> {
        let start = start.to_rfc3339();
        let end = end.to_rfc3339();
        let mut query = vec![
            ("symbols", symbols),
            ("timeframe", timeframe.as_query()),
            ("start", start.as_str()),
            ("end", end.as_str()),
            ("limit", PAGE_LIMIT),
            ("adjustment", "raw"),
            ("feed", self.feed.as_str()),
        ];
        if let Some(token) = page_token {
            query.push(("page_token", token));
        }
        self.get_with_query("/v2/stocks/bars", &query).await
    }

    async fn get_with_query<T: DeserializeOwned>(
        &self,
        path: &str,
        query: &[(&str, &str)],
    ) -> Result<T> {
        sleep(REQUEST_DELAY).await;
        let url = format!("{}{}", self.base_url, path);
        let response = self
            .http
            .get(url)
            .headers(self.headers.clone())
            .query(query)
            .send()
            .await
            .with_context(|| format!("GET {}{} with query failed", self.base_url, path))?
            .error_for_status()
            .with_context(|| format!("GET {}{} returned error", self.base_url, path))?;
        let value = response
            .json::<T>()
            .await
            .context("failed to parse Alpaca response")?;
        Ok(value)
    }
}

impl MarketDataGateway for AlpacaDataClient {
    fn daily_bars<'a>(
        &'a self,
        symbols: &'a [String],
        end: NaiveDate,
        lookback_days: u32,
    ) -> BoxFuture<'a, BarsBySymbol> {
        async move {
            let start = lookback_start(end, lookback_days).and_time(chrono::NaiveTime::MIN).and_utc();
            let end = end
                .checked_add_days(Days::new(1))
                .unwrap_or(end)
                .and_time(chrono::NaiveTime::MIN)
                .and_utc();
            match self.fetch_bars(symbols, BarTimeframe::Day, start, end).await {
                Ok(bars) => bars,
                Err(err) => {
                    warn!("Daily bar fetch failed, continuing without data: {:#}", err);
                    complete_bar_map(symbols, BarsBySymbol::new())
                }
            }
        }
        .boxed()
    }

    fn minute_bars<'a>(
        &'a self,
        symbols: &'a [String],
        start: DateTime<Utc>,
        end: DateTime<Utc>,
    ) -> BoxFuture<'a, BarsBySymbol> {
        async move {
            match self.fetch_bars(symbols, BarTimeframe::Minute, start, end).await {
                Ok(mut bars) => {
                    for series in bars.values_mut() {
                        series.retain(|bar| bar.timestamp < end);
                    }
                    bars
                }
                Err(err) => {
                    warn!("Minute bar fetch failed, continuing without data: {:#}", err);
                    complete_bar_map(symbols, BarsBySymbol::new())
                }
            }
        }
        .boxed()
    }
}

#[derive(Debug, Deserialize)]
struct BarsPage {
    bars: Option<HashMap<String, Vec<AlpacaBar>>>,
    next_page_token: Option<String>,
}

#[derive(Debug, Deserialize)]
struct AlpacaBar {
    t: String,
    o: f64,
    h: f64,
    l: f64,
    c: f64,
    v: f64,
}

impl AlpacaBar {
    fn into_bar(self, symbol: &str) -> Option<Bar> {
        let timestamp = DateTime::parse_from_rfc3339(&self.t)
            .ok()?
            .with_timezone(&Utc);
        Some(Bar {
            symbol: symbol.to_string(),
            timestamp,
            open: self.o,
            high: self.h,
            low: self.l,
            close: self.c,
            volume: self.v.max(0.0).round() as i64,
        })
    }
}
