use crate::alpaca::AlpacaDataClient;
use crate::config::BacktestConfig;
use crate::market_data::{MarketDataGateway, SnapshotGateway};
use anyhow::{Context, Result};
use log::{debug, info, warn};
use std::collections::HashMap;
use std::env;
use std::path::Path;

/// Process-level settings shared by the CLI commands.
#[derive(Clone, Debug, Default)]
pub struct AppContext {
    settings: HashMap<String, String>,
}

impl AppContext {
    /// Loads `env_file` (or `.env` from the working directory when absent) and snapshots the
    /// process environment. A missing default `.env` is not an error.
    pub fn initialize(env_file: Option<&Path>) -> Result<Self> {
        match env_file {
            Some(path) => {
                dotenvy::from_path(path)
                    .with_context(|| format!("failed to load settings from {}", path.display()))?;
                info!("Loaded settings from {}", path.display());
            }
            None => match dotenvy::dotenv() {
                Ok(path) => debug!("Loaded settings from {}", path.display()),
                Err(err) if err.not_found() => {}
                Err(err) => warn!("Ignoring unreadable .env file: {}", err),
            },
        }

        Ok(Self::from_settings(env::vars().collect()))
    }

    pub fn from_settings(settings: HashMap<String, String>) -> Self {
        Self { settings }
    }

    pub fn settings(&self) -> &HashMap<String, String> {
        &self.settings
    }

    pub fn backtest_config(&self) -> Result<BacktestConfig> {
        BacktestConfig::from_settings_map(&self.settings)
    }

    pub fn alpaca_client(&self) -> Result<AlpacaDataClient> {
        AlpacaDataClient::from_settings(&self.settings)
    }

    /// Snapshot file when given, otherwise the Alpaca bars API.
    pub fn market_data_gateway(&self, data_file: Option<&Path>) -> Result<Box<dyn MarketDataGateway>> {
        match data_file {
            Some(path) => {
                info!("Using market data snapshot {}", path.display());
                Ok(Box::new(SnapshotGateway::from_file(path)?))
            }
            None => {
                info!("Using Alpaca market data API");
                Ok(Box::new(self.alpaca_client()?))
            }
        }
    }
}
