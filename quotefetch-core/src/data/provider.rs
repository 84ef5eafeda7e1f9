//! Data provider trait and structured error types.
//!
//! The TableProvider trait abstracts over remote sources (Yahoo Finance
//! history, Eastmoney futures deal detail) so the run loop can treat each
//! one as an opaque per-instrument fetch, and tests can substitute mocks.

use super::table::Table;
use serde::{Deserialize, Serialize};
use std::path::Path;
use std::time::Duration;
use thiserror::Error;

/// Structured error types for data operations.
///
/// These are displayable as-is in both log files and console output.
#[derive(Debug, Error)]
pub enum DataError {
    #[error("network unreachable: {0}")]
    NetworkUnreachable(String),

    #[error("rate limited by provider (retry after {retry_after_secs}s)")]
    RateLimited { retry_after_secs: u64 },

    #[error("response format changed: {0}")]
    ResponseFormatChanged(String),

    #[error("authentication required: {0}")]
    AuthenticationRequired(String),

    #[error("symbol not found: {symbol}")]
    SymbolNotFound { symbol: String },

    #[error("{symbol}: no data found, symbol may be delisted")]
    NoData { symbol: String },

    #[error("hard stop: data provider has blocked requests (circuit breaker tripped)")]
    CircuitBreakerTripped,

    #[error("request not supported by {provider}: {request}")]
    UnsupportedRequest { provider: String, request: String },

    #[error("validation error: {0}")]
    ValidationError(String),

    #[error("data error: {0}")]
    Other(String),
}

/// Provider-specific fetch parameters.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum FetchRequest {
    /// OHLCV history over a provider period (`1d`, `5d`, `1mo`, `max`, ...)
    /// at a bar interval (`1m`, `1h`, `1d`, ...).
    History { period: String, interval: String },

    /// Latest trading day's trade ticks, capped at `max_count` records.
    DealDetail { max_count: u64 },
}

impl std::fmt::Display for FetchRequest {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            FetchRequest::History { period, interval } => {
                write!(f, "history(period={period}, interval={interval})")
            }
            FetchRequest::DealDetail { max_count } => write!(f, "deal_detail(max_count={max_count})"),
        }
    }
}

/// HTTP client settings shared by the providers.
#[derive(Debug, Clone)]
pub struct HttpOptions {
    pub user_agent: String,
    pub timeout: Duration,
}

impl Default for HttpOptions {
    fn default() -> Self {
        Self {
            user_agent: DEFAULT_USER_AGENT.to_string(),
            timeout: Duration::from_secs(30),
        }
    }
}

impl HttpOptions {
    pub fn build_client(&self) -> Result<reqwest::blocking::Client, DataError> {
        reqwest::blocking::Client::builder()
            .timeout(self.timeout)
            .user_agent(self.user_agent.as_str())
            .build()
            .map_err(|e| DataError::Other(format!("failed to build HTTP client: {e}")))
    }
}

/// Both providers reject requests without a browser-like User-Agent.
pub const DEFAULT_USER_AGENT: &str = "Mozilla/5.0 (Windows NT 10.0; Win64; x64) \
     AppleWebKit/537.36 (KHTML, like Gecko) Chrome/114.0.0.0 Safari/537.36";

/// Where the data came from.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum DataSource {
    Yahoo,
    EastmoneyDeals,
}

/// Trait for remote table providers.
///
/// Implementations handle the specifics of one source. Persistence sits
/// above this trait; providers never touch the filesystem.
pub trait TableProvider: Send + Sync {
    /// Human-readable name of this provider.
    fn name(&self) -> &str;

    /// Fetch one instrument. An `Ok` table may be empty; callers decide
    /// what an empty result means.
    fn fetch(&self, code: &str, request: &FetchRequest) -> Result<Table, DataError>;

    /// Check if the provider is currently available (not rate-limited, not blocked).
    fn is_available(&self) -> bool;
}

/// Progress callback for multi-instrument runs.
pub trait FetchProgress {
    /// Called when starting to fetch a code.
    fn on_start(&self, code: &str, index: usize, total: usize);

    /// Called when a code is either saved or skipped.
    fn on_complete(&self, code: &str, index: usize, total: usize, saved: Option<&Path>);

    /// Called when a market's list is done.
    fn on_batch_complete(&self, market: &str, saved: usize, failed: usize, total: usize);

    /// Called when a market cannot start (missing code list, unwritable directory).
    fn on_market_skipped(&self, market: &str, reason: &str);
}

/// Simple progress reporter that prints to stdout.
pub struct StdoutProgress;

impl FetchProgress for StdoutProgress {
    fn on_start(&self, code: &str, index: usize, total: usize) {
        println!("[{}/{}] Fetching {code}...", index + 1, total);
    }

    fn on_complete(&self, code: &str, _index: usize, _total: usize, saved: Option<&Path>) {
        match saved {
            Some(path) => println!("  OK: {code} -> {}", path.display()),
            None => println!("  SKIP: {code}"),
        }
    }

    fn on_batch_complete(&self, market: &str, saved: usize, failed: usize, total: usize) {
        println!("\n{market}: {saved}/{total} saved, {failed} failed");
    }

    fn on_market_skipped(&self, market: &str, reason: &str) {
        println!("Skipping market {market}: {reason}");
    }
}

/// Progress reporter that prints nothing.
pub struct SilentProgress;

impl FetchProgress for SilentProgress {
    fn on_start(&self, _code: &str, _index: usize, _total: usize) {}
    fn on_complete(&self, _code: &str, _index: usize, _total: usize, _saved: Option<&Path>) {}
    fn on_batch_complete(&self, _market: &str, _saved: usize, _failed: usize, _total: usize) {}
    fn on_market_skipped(&self, _market: &str, _reason: &str) {}
}
