pub mod allocation;
pub mod alpaca;
pub mod commands;
pub mod config;
pub mod context;
pub mod error;
pub mod executor;
pub mod indicators;
pub mod ledger;
pub mod market_data;
pub mod models;
pub mod param_utils;
pub mod performance;
pub mod progress;
mod retry;
pub mod risk;
pub mod scheduler;
pub mod screener;
pub mod strategy;
pub mod strategy_utils;
pub mod universe;
