//! Per-instrument fetch with a fixed attempt budget.
//!
//! The default budget is a single attempt. An empty table counts as a
//! failed attempt, exactly like a provider error.

use crate::data::{DataError, FetchRequest, Table, TableProvider};
use std::thread;
use std::time::Duration;
use tracing::error;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct RetryPolicy {
    attempts: u32,
    delay: Duration,
}

impl Default for RetryPolicy {
    fn default() -> Self {
        Self {
            attempts: 1,
            delay: Duration::ZERO,
        }
    }
}

impl RetryPolicy {
    /// At least one attempt is always made.
    pub fn new(attempts: u32) -> Self {
        Self {
            attempts: attempts.max(1),
            delay: Duration::ZERO,
        }
    }

    pub fn with_delay(mut self, delay: Duration) -> Self {
        self.delay = delay;
        self
    }

    pub fn attempts(&self) -> u32 {
        self.attempts
    }
}

/// One fetch attempt, with empty results folded into `DataError::NoData`.
pub fn fetch_once(
    provider: &dyn TableProvider,
    code: &str,
    request: &FetchRequest,
) -> Result<Table, DataError> {
    let table = provider.fetch(code, request)?;
    if table.is_empty() {
        return Err(DataError::NoData {
            symbol: code.to_string(),
        });
    }
    Ok(table)
}

/// Fetch `code`, logging every failed attempt. `None` means "no data":
/// the caller skips writing for this instrument.
pub fn fetch_with_retry(
    provider: &dyn TableProvider,
    code: &str,
    request: &FetchRequest,
    policy: &RetryPolicy,
) -> Option<Table> {
    for attempt in 1..=policy.attempts {
        if attempt > 1 && !policy.delay.is_zero() {
            thread::sleep(policy.delay);
        }
        match fetch_once(provider, code, request) {
            Ok(table) => return Some(table),
            Err(e) => {
                error!("failed to fetch {code} (attempt {attempt}): {e}");
            }
        }
    }
    None
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::data::Column;
    use std::sync::Mutex;

    /// Returns queued results in order; records every call.
    struct ScriptedProvider {
        results: Mutex<Vec<Result<Table, DataError>>>,
        calls: Mutex<Vec<String>>,
    }

    impl ScriptedProvider {
        fn new(mut results: Vec<Result<Table, DataError>>) -> Self {
            results.reverse();
            Self {
                results: Mutex::new(results),
                calls: Mutex::new(Vec::new()),
            }
        }

        fn call_count(&self) -> usize {
            self.calls.lock().unwrap().len()
        }
    }

    impl TableProvider for ScriptedProvider {
        fn name(&self) -> &str {
            "scripted"
        }

        fn fetch(&self, code: &str, _request: &FetchRequest) -> Result<Table, DataError> {
            self.calls.lock().unwrap().push(code.to_string());
            self.results
                .lock()
                .unwrap()
                .pop()
                .unwrap_or_else(|| Err(DataError::Other("script exhausted".into())))
        }

        fn is_available(&self) -> bool {
            true
        }
    }

    fn one_row() -> Table {
        Table::new(vec![Column::float("Close", vec![Some(1.0)])]).unwrap()
    }

    fn request() -> FetchRequest {
        FetchRequest::History {
            period: "1d".into(),
            interval: "1m".into(),
        }
    }

    #[test]
    fn default_policy_is_single_attempt() {
        assert_eq!(RetryPolicy::default().attempts(), 1);
        assert_eq!(RetryPolicy::new(0).attempts(), 1);
    }

    #[test]
    fn success_returns_table() {
        let p = ScriptedProvider::new(vec![Ok(one_row())]);
        let t = fetch_with_retry(&p, "AAPL", &request(), &RetryPolicy::default());
        assert_eq!(t.unwrap().row_count(), 1);
        assert_eq!(p.call_count(), 1);
    }

    #[test]
    fn error_is_not_retried_by_default() {
        let p = ScriptedProvider::new(vec![
            Err(DataError::NetworkUnreachable("down".into())),
            Ok(one_row()),
        ]);
        assert!(fetch_with_retry(&p, "AAPL", &request(), &RetryPolicy::default()).is_none());
        assert_eq!(p.call_count(), 1);
    }

    #[test]
    fn empty_table_treated_like_error() {
        let p = ScriptedProvider::new(vec![Ok(Table::empty(&["Close"]))]);
        assert!(matches!(
            fetch_once(&p, "GONE", &request()),
            Err(DataError::NoData { .. })
        ));

        let p = ScriptedProvider::new(vec![Ok(Table::empty(&["Close"]))]);
        assert!(fetch_with_retry(&p, "GONE", &request(), &RetryPolicy::default()).is_none());
    }

    #[test]
    fn larger_budget_retries_until_success() {
        let p = ScriptedProvider::new(vec![
            Ok(Table::empty(&["Close"])),
            Err(DataError::RateLimited {
                retry_after_secs: 1,
            }),
            Ok(one_row()),
        ]);
        let t = fetch_with_retry(&p, "AAPL", &request(), &RetryPolicy::new(3));
        assert!(t.is_some());
        assert_eq!(p.call_count(), 3);
    }
}
