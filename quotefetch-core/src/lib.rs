//! quotefetch core: fetch market data per instrument and persist one file each.
//!
//! This crate contains:
//! - Table providers (Yahoo Finance history, Eastmoney futures deal detail)
//! - Code lists and market configs
//! - The collision-free output writer (CSV / XLSX / Parquet)
//! - Single-attempt fetch policy and the sequential run loop
//! - Per-market logging context

pub mod codes;
pub mod config;
pub mod data;
pub mod fetch;
pub mod logging;
pub mod output;
pub mod pipeline;

pub use config::{load_market_configs, ConfigError, MarketConfig, RunSettings};
pub use fetch::{fetch_with_retry, RetryPolicy};
pub use logging::MarketLog;
pub use output::{unique_path, SaveFormat, TableWriter, WriteError};
pub use pipeline::{
    market_dir, run_market, run_markets, Interrupt, MarketJob, MarketRun, MarketSummary,
    Providers, RunContext, RunSummary,
};
