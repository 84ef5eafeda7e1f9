//! Eastmoney futures deal-detail provider.
//!
//! Fetches the latest trading day's trade ticks for a futures quote id
//! (`{market}.{code}`, e.g. `115.ZCM`) from the push2 details endpoint.
//! Each tick arrives as a comma-joined string: time, price, volume,
//! order count, direction.

use super::circuit_breaker::CircuitBreaker;
use super::provider::{DataError, FetchRequest, HttpOptions, TableProvider};
use super::table::{Column, Table};
use serde::Deserialize;
use std::sync::Arc;

const DETAILS_URL: &str = "https://push2.eastmoney.com/api/qt/stock/details/get";

pub const DEAL_COLUMNS: [&str; 7] = [
    "code",
    "time",
    "pre_close",
    "price",
    "volume",
    "orders",
    "direction",
];

#[derive(Debug, Deserialize)]
struct DetailsResponse {
    data: Option<DetailsData>,
}

#[derive(Debug, Deserialize)]
struct DetailsData {
    code: String,
    #[serde(rename = "prePrice")]
    pre_price: Option<f64>,
    #[serde(default)]
    details: Vec<String>,
}

pub struct EastmoneyDealProvider {
    client: reqwest::blocking::Client,
    circuit_breaker: Arc<CircuitBreaker>,
}

impl EastmoneyDealProvider {
    pub fn new(circuit_breaker: Arc<CircuitBreaker>, http: &HttpOptions) -> Result<Self, DataError> {
        Ok(Self {
            client: http.build_client()?,
            circuit_breaker,
        })
    }

    fn details_url(quote_id: &str, max_count: u64) -> String {
        format!(
            "{DETAILS_URL}?secid={quote_id}&fields1=f1,f2,f3,f4\
             &fields2=f51,f52,f53,f54,f55&pos=-{max_count}"
        )
    }

    fn request(&self, quote_id: &str, max_count: u64) -> Result<Table, DataError> {
        if !self.circuit_breaker.is_allowed() {
            return Err(DataError::CircuitBreakerTripped);
        }

        let resp = self
            .client
            .get(Self::details_url(quote_id, max_count))
            .send()
            .map_err(|e| DataError::NetworkUnreachable(e.to_string()))?;

        let status = resp.status();
        if status == reqwest::StatusCode::FORBIDDEN {
            self.circuit_breaker.trip();
            return Err(DataError::CircuitBreakerTripped);
        }
        if status == reqwest::StatusCode::TOO_MANY_REQUESTS || status.is_server_error() {
            self.circuit_breaker.record_failure();
            return Err(DataError::Other(format!("HTTP {status} for {quote_id}")));
        }
        if !status.is_success() {
            return Err(DataError::Other(format!("HTTP {status} for {quote_id}")));
        }

        let body: DetailsResponse = resp.json().map_err(|e| {
            DataError::ResponseFormatChanged(format!("failed to parse details for {quote_id}: {e}"))
        })?;
        let table = parse_details(body)?;
        self.circuit_breaker.record_success();
        Ok(table)
    }
}

impl TableProvider for EastmoneyDealProvider {
    fn name(&self) -> &str {
        "eastmoney_deals"
    }

    fn fetch(&self, code: &str, request: &FetchRequest) -> Result<Table, DataError> {
        match request {
            FetchRequest::DealDetail { max_count } => self.request(code, *max_count),
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

/// Unknown quote ids come back with `data: null`; that is an empty table.
fn parse_details(body: DetailsResponse) -> Result<Table, DataError> {
    let Some(data) = body.data else {
        return Ok(Table::empty(&DEAL_COLUMNS));
    };

    let n = data.details.len();
    let mut time = Vec::with_capacity(n);
    let mut price = Vec::with_capacity(n);
    let mut volume = Vec::with_capacity(n);
    let mut orders = Vec::with_capacity(n);
    let mut direction = Vec::with_capacity(n);

    for line in &data.details {
        let mut fields = line.split(',');
        let Some(t) = fields.next().filter(|t| !t.is_empty()) else {
            return Err(DataError::ResponseFormatChanged(format!(
                "malformed deal line: {line:?}"
            )));
        };
        time.push(t.to_string());
        price.push(fields.next().and_then(|v| v.parse::<f64>().ok()));
        volume.push(fields.next().and_then(|v| v.parse::<i64>().ok()));
        orders.push(fields.next().and_then(|v| v.parse::<i64>().ok()));
        direction.push(fields.next().and_then(|v| v.parse::<i64>().ok()));
    }

    Table::new(vec![
        Column::text("code", vec![data.code; n]),
        Column::text("time", time),
        Column::float("pre_close", vec![data.pre_price; n]),
        Column::float("price", price),
        Column::integer("volume", volume),
        Column::integer("orders", orders),
        Column::integer("direction", direction),
    ])
}
