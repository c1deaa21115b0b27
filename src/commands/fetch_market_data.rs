use crate::alpaca::BarTimeframe;
use crate::context::AppContext;
use crate::market_data::{calendar_days_for_sessions, lookback_start, MarketSnapshot};
use crate::universe::resolve_universe;
use anyhow::{anyhow, Result};
use chrono::{Days, NaiveDate, NaiveTime};
use log::info;
use std::path::Path;

/// Downloads daily bars (with screening lookback) and minute bars for `start..=end` from Alpaca
/// and writes them as a snapshot file usable with `backtest --data-file`.
pub async fn run(
    app: &AppContext,
    symbols: &[String],
    start_date: NaiveDate,
    end_date: NaiveDate,
    output_path: &Path,
) -> Result<()> {
    if end_date < start_date {
        return Err(anyhow!(
            "End date {} is before start date {}",
            end_date,
            start_date
        ));
    }

    let config = app.backtest_config()?;
    let client = app.alpaca_client()?;
    let universe = resolve_universe(symbols);
    info!(
        "Fetching market data for {} symbols from {} to {}",
        universe.len(),
        start_date,
        end_date
    );

    let daily_start = lookback_start(
        start_date,
        calendar_days_for_sessions(config.screening_lookback_days),
    )
        .and_time(NaiveTime::MIN)
        .and_utc();
    let range_start = start_date.and_time(NaiveTime::MIN).and_utc();
    let range_end = end_date
        .checked_add_days(Days::new(1))
        .unwrap_or(end_date)
        .and_time(NaiveTime::MIN)
        .and_utc();

    let mut snapshot = MarketSnapshot::new();

    let daily = client
        .fetch_bars(&universe, BarTimeframe::Day, daily_start, range_end)
        .await?;
    snapshot.insert_daily(daily.into_values().flatten().collect());
    info!("Fetched daily bars for {} symbols", snapshot.daily.len());

    let minute = client
        .fetch_bars(&universe, BarTimeframe::Minute, range_start, range_end)
        .await?;
    snapshot.insert_minute(minute.into_values().flatten().collect());
    info!("Fetched minute bars for {} symbols", snapshot.minute.len());

    snapshot.save_to_file(output_path)?;
    info!(
        "Market data snapshot successfully written to {}",
        output_path.display()
    );

    Ok(())
}
