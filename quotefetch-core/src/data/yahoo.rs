//! Yahoo Finance history provider.
//!
//! Fetches OHLCV bars from Yahoo's v8 chart API for any period/interval
//! pair the chart endpoint accepts, including dividend and split events.
//! Yahoo has no official API and is subject to unannounced format changes;
//! every parse failure surfaces as `ResponseFormatChanged`.

use super::circuit_breaker::CircuitBreaker;
use super::provider::{DataError, FetchRequest, HttpOptions, TableProvider};
use super::table::{Column, Table};
use chrono::{DateTime, FixedOffset, NaiveDate, Offset, Utc};
use serde::Deserialize;
use std::collections::HashMap;
use std::sync::Arc;

const CHART_BASE_URL: &str = "https://query2.finance.yahoo.com/v8/finance/chart";

/// Yahoo Finance v8 chart API response.
#[derive(Debug, Deserialize)]
struct ChartResponse {
    chart: ChartResult,
}

#[derive(Debug, Deserialize)]
struct ChartResult {
    result: Option<Vec<ChartData>>,
    error: Option<ChartError>,
}

#[derive(Debug, Deserialize)]
struct ChartError {
    code: String,
    description: String,
}

#[derive(Debug, Deserialize)]
struct ChartData {
    meta: Option<ChartMeta>,
    timestamp: Option<Vec<i64>>,
    indicators: Indicators,
    events: Option<Events>,
}

#[derive(Debug, Deserialize)]
struct ChartMeta {
    gmtoffset: Option<i32>,
}

#[derive(Debug, Deserialize)]
struct Indicators {
    quote: Vec<QuoteData>,
}

#[derive(Debug, Default, Deserialize)]
struct QuoteData {
    #[serde(default)]
    open: Vec<Option<f64>>,
    #[serde(default)]
    high: Vec<Option<f64>>,
    #[serde(default)]
    low: Vec<Option<f64>>,
    #[serde(default)]
    close: Vec<Option<f64>>,
    #[serde(default)]
    volume: Vec<Option<i64>>,
}

#[derive(Debug, Deserialize)]
struct Events {
    dividends: Option<HashMap<String, DividendEvent>>,
    splits: Option<HashMap<String, SplitEvent>>,
}

#[derive(Debug, Deserialize)]
struct DividendEvent {
    amount: f64,
    date: i64,
}

#[derive(Debug, Deserialize)]
struct SplitEvent {
    date: i64,
    numerator: f64,
    denominator: f64,
}

pub const HISTORY_COLUMNS: [&str; 7] = [
    "Open",
    "High",
    "Low",
    "Close",
    "Volume",
    "Dividends",
    "Stock Splits",
];

/// Yahoo Finance history provider.
pub struct YahooProvider {
    client: reqwest::blocking::Client,
    circuit_breaker: Arc<CircuitBreaker>,
}

impl YahooProvider {
    pub fn new(circuit_breaker: Arc<CircuitBreaker>, http: &HttpOptions) -> Result<Self, DataError> {
        Ok(Self {
            client: http.build_client()?,
            circuit_breaker,
        })
    }

    /// Build the chart API URL.
    ///
    /// `period=max` is clamped for intraday intervals, which Yahoo only
    /// serves for a bounded lookback window.
    fn chart_url(symbol: &str, period: &str, interval: &str, now_ts: i64) -> String {
        let window = match intraday_lookback_days(interval) {
            Some(days) if period == "max" => {
                let start_ts = now_ts - days * 86_400;
                format!("period1={start_ts}&period2={now_ts}")
            }
            _ => format!("range={period}"),
        };
        format!(
            "{CHART_BASE_URL}/{symbol}?{window}&interval={interval}\
             &includePrePost=false&events=div%2Csplits"
        )
    }

    fn request(&self, symbol: &str, period: &str, interval: &str) -> Result<Table, DataError> {
        if !self.circuit_breaker.is_allowed() {
            return Err(DataError::CircuitBreakerTripped);
        }

        let url = Self::chart_url(symbol, period, interval, Utc::now().timestamp());
        let resp = self.client.get(&url).send().map_err(|e| {
            if e.is_timeout() {
                DataError::NetworkUnreachable(format!("timed out fetching {symbol}: {e}"))
            } else {
                DataError::NetworkUnreachable(e.to_string())
            }
        })?;

        let status = resp.status();
        if status == reqwest::StatusCode::FORBIDDEN {
            self.circuit_breaker.trip();
            return Err(DataError::CircuitBreakerTripped);
        }
        if status == reqwest::StatusCode::TOO_MANY_REQUESTS {
            self.circuit_breaker.record_failure();
            let retry_after = resp
                .headers()
                .get("retry-after")
                .and_then(|v| v.to_str().ok())
                .and_then(|v| v.parse::<u64>().ok())
                .unwrap_or(60);
            return Err(DataError::RateLimited {
                retry_after_secs: retry_after,
            });
        }
        if status == reqwest::StatusCode::UNAUTHORIZED {
            return Err(DataError::AuthenticationRequired(
                "Yahoo Finance requires authentication".into(),
            ));
        }
        if status.is_server_error() {
            self.circuit_breaker.record_failure();
            return Err(DataError::Other(format!("HTTP {status} for {symbol}")));
        }

        // 404 bodies still carry a chart.error object.
        let chart: ChartResponse = resp.json().map_err(|e| {
            DataError::ResponseFormatChanged(format!(
                "failed to parse response for {symbol} (HTTP {status}): {e}"
            ))
        })?;

        let table = parse_response(symbol, interval, chart)?;
        self.circuit_breaker.record_success();
        Ok(table)
    }
}

impl TableProvider for YahooProvider {
    fn name(&self) -> &str {
        "yahoo_finance"
    }

    fn fetch(&self, code: &str, request: &FetchRequest) -> Result<Table, DataError> {
        match request {
            FetchRequest::History { period, interval } => self.request(code, period, interval),
            other => Err(DataError::UnsupportedRequest {
                provider: self.name().to_string(),
                request: other.to_string(),
            }),
        }
    }

    fn is_available(&self) -> bool {
        self.circuit_breaker.is_allowed()
    }
}

fn intraday_lookback_days(interval: &str) -> Option<i64> {
    match interval {
        "1m" => Some(7),
        "2m" | "5m" | "15m" | "30m" | "90m" => Some(60),
        "60m" | "1h" => Some(730),
        _ => None,
    }
}

fn is_daily_or_coarser(interval: &str) -> bool {
    interval.ends_with('d') || interval.ends_with("wk") || interval.ends_with("mo")
}

/// Render a bar timestamp in the exchange offset.
///
/// Daily and coarser bars are floored to local midnight. Yahoo reports the
/// current gmtoffset only, so historical DST shifts are not reconstructed.
fn render_timestamp(ts: i64, offset: FixedOffset, daily: bool) -> Result<(String, NaiveDate), DataError> {
    let local = DateTime::from_timestamp(ts, 0)
        .ok_or_else(|| DataError::ResponseFormatChanged(format!("invalid timestamp: {ts}")))?
        .with_timezone(&offset);
    let date = local.date_naive();
    let text = if daily {
        format!("{} 00:00:00{}", local.format("%Y-%m-%d"), local.format("%:z"))
    } else {
        local.format("%Y-%m-%d %H:%M:%S%:z").to_string()
    };
    Ok((text, date))
}

fn event_dates<T>(
    events: Option<HashMap<String, T>>,
    offset: FixedOffset,
    value: impl Fn(&T) -> (i64, f64),
) -> HashMap<NaiveDate, f64> {
    events
        .unwrap_or_default()
        .values()
        .filter_map(|e| {
            let (ts, v) = value(e);
            DateTime::from_timestamp(ts, 0).map(|dt| (dt.with_timezone(&offset).date_naive(), v))
        })
        .collect()
}

/// Parse the chart API response into a history table.
///
/// A result with no timestamps is returned as an empty table, not an error.
fn parse_response(symbol: &str, interval: &str, resp: ChartResponse) -> Result<Table, DataError> {
    let daily = is_daily_or_coarser(interval);
    let index_name = if daily { "Date" } else { "Datetime" };

    let result = match (resp.chart.result, resp.chart.error) {
        (Some(result), _) => result,
        (None, Some(err)) if err.code == "Not Found" => {
            return Err(DataError::SymbolNotFound {
                symbol: symbol.to_string(),
            })
        }
        (None, Some(err)) => {
            return Err(DataError::Other(format!("{}: {}", err.code, err.description)))
        }
        (None, None) => {
            return Err(DataError::ResponseFormatChanged(
                "empty result with no error".into(),
            ))
        }
    };

    let data = result
        .into_iter()
        .next()
        .ok_or_else(|| DataError::ResponseFormatChanged("result array is empty".into()))?;

    let mut headers = vec![index_name];
    headers.extend(HISTORY_COLUMNS);
    let Some(timestamps) = data.timestamp else {
        return Ok(Table::empty(&headers));
    };

    let offset = data
        .meta
        .and_then(|m| m.gmtoffset)
        .and_then(FixedOffset::east_opt)
        .unwrap_or_else(|| Utc.fix());

    let quote = data.indicators.quote.into_iter().next().unwrap_or_default();
    let (mut dividends, mut splits) = match data.events {
        Some(events) => (
            event_dates(events.dividends, offset, |d| (d.date, d.amount)),
            event_dates(events.splits, offset, |s| {
                let ratio = if s.denominator == 0.0 {
                    0.0
                } else {
                    s.numerator / s.denominator
                };
                (s.date, ratio)
            }),
        ),
        None => (HashMap::new(), HashMap::new()),
    };

    let n = timestamps.len();
    let mut index = Vec::with_capacity(n);
    let mut open = Vec::with_capacity(n);
    let mut high = Vec::with_capacity(n);
    let mut low = Vec::with_capacity(n);
    let mut close = Vec::with_capacity(n);
    let mut volume = Vec::with_capacity(n);
    let mut dividend_col = Vec::with_capacity(n);
    let mut split_col = Vec::with_capacity(n);

    for (i, &ts) in timestamps.iter().enumerate() {
        let o = quote.open.get(i).copied().flatten();
        let h = quote.high.get(i).copied().flatten();
        let l = quote.low.get(i).copied().flatten();
        let c = quote.close.get(i).copied().flatten();
        let v = quote.volume.get(i).copied().flatten();

        // Skip rows where all OHLCV are null (halts, holidays)
        if o.is_none() && h.is_none() && l.is_none() && c.is_none() && v.is_none() {
            continue;
        }

        let (text, date) = render_timestamp(ts, offset, daily)?;
        index.push(text);
        open.push(o);
        high.push(h);
        low.push(l);
        close.push(c);
        volume.push(v);
        // Events attach to the first bar of their local date.
        dividend_col.push(Some(dividends.remove(&date).unwrap_or(0.0)));
        split_col.push(Some(splits.remove(&date).unwrap_or(0.0)));
    }

    Table::new(vec![
        Column::text(index_name, index),
        Column::float("Open", open),
        Column::float("High", high),
        Column::float("Low", low),
        Column::float("Close", close),
        Column::integer("Volume", volume),
        Column::float("Dividends", dividend_col),
        Column::float("Stock Splits", split_col),
    ])
}
