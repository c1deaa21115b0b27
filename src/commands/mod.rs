pub mod backtest;
pub mod fetch_market_data;
pub mod list_models;
