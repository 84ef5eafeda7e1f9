//! Per-market logging context.
//!
//! Each market gets its own subscriber: a file sink at INFO and a console
//! sink at WARN (overridable with `QUOTEFETCH_LOG`). The subscriber is
//! installed only for the duration of [`MarketLog::in_scope`], never as the
//! process-wide default, so markets cannot leak handlers into each other.

use crate::output::{ensure_dir, unique_path, WriteError};
use chrono::NaiveDate;
use std::fmt;
use std::fs::OpenOptions;
use std::path::{Path, PathBuf};
use std::sync::Arc;
use tracing::{Dispatch, Event, Subscriber};
use tracing_subscriber::filter::{EnvFilter, LevelFilter};
use tracing_subscriber::fmt::format::Writer;
use tracing_subscriber::fmt::{FmtContext, FormatEvent, FormatFields};
use tracing_subscriber::prelude::*;
use tracing_subscriber::registry::{LookupSpan, Registry};

const CONSOLE_ENV: &str = "QUOTEFETCH_LOG";

/// `{timestamp} - {LEVEL} - {message}`
struct LineFormat;

impl<S, N> FormatEvent<S, N> for LineFormat
where
    S: Subscriber + for<'a> LookupSpan<'a>,
    N: for<'a> FormatFields<'a> + 'static,
{
    fn format_event(
        &self,
        ctx: &FmtContext<'_, S, N>,
        mut writer: Writer<'_>,
        event: &Event<'_>,
    ) -> fmt::Result {
        let now = chrono::Local::now().format("%Y-%m-%d %H:%M:%S,%3f");
        write!(writer, "{now} - {} - ", event.metadata().level())?;
        ctx.field_format().format_fields(writer.by_ref(), event)?;
        writeln!(writer)
    }
}

/// An explicitly constructed logging context, passed down to the run loop.
pub struct MarketLog {
    dispatch: Dispatch,
    path: PathBuf,
}

impl MarketLog {
    /// `{dir}/{market}_{date}_log.txt`, appended to across runs on the same day.
    pub fn for_market(
        dir: &Path,
        market: &str,
        date: NaiveDate,
        console: bool,
    ) -> Result<Self, WriteError> {
        let path = dir.join(format!("{market}_{}_log.txt", date.format("%Y-%m-%d")));
        Self::open(path, console)
    }

    /// `{dir}/{date}_log.txt`, or the next free `_NN` variant.
    pub fn for_run(dir: &Path, date: NaiveDate, console: bool) -> Result<Self, WriteError> {
        ensure_dir(dir)?;
        let path = unique_path(&dir.join(format!("{}_log.txt", date.format("%Y-%m-%d"))));
        Self::open(path, console)
    }

    fn open(path: PathBuf, console: bool) -> Result<Self, WriteError> {
        if let Some(parent) = path.parent() {
            ensure_dir(parent)?;
        }
        let file = OpenOptions::new()
            .create(true)
            .append(true)
            .open(&path)
            .map_err(|source| WriteError::Io {
                path: path.clone(),
                source,
            })?;

        let file_layer = tracing_subscriber::fmt::layer()
            .with_writer(Arc::new(file))
            .with_ansi(false)
            .event_format(LineFormat)
            .with_filter(LevelFilter::INFO);

        let console_layer = console.then(|| {
            let filter = EnvFilter::try_from_env(CONSOLE_ENV)
                .unwrap_or_else(|_| EnvFilter::new("warn"));
            tracing_subscriber::fmt::layer()
                .with_writer(std::io::stderr)
                .event_format(LineFormat)
                .with_filter(filter)
        });

        let subscriber = Registry::default().with(file_layer).with(console_layer);
        Ok(Self {
            dispatch: Dispatch::new(subscriber),
            path,
        })
    }

    pub fn path(&self) -> &Path {
        &self.path
    }

    /// Run `f` with this context as the current thread's subscriber.
    pub fn in_scope<T>(&self, f: impl FnOnce() -> T) -> T {
        tracing::dispatcher::with_default(&self.dispatch, f)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn date() -> NaiveDate {
        NaiveDate::from_ymd_opt(2024, 6, 18).unwrap()
    }

    #[test]
    fn market_log_name_and_format() {
        let dir = tempfile::tempdir().unwrap();
        let log = MarketLog::for_market(dir.path(), "us", date(), false).unwrap();
        assert_eq!(log.path(), dir.path().join("us_2024-06-18_log.txt"));

        log.in_scope(|| {
            tracing::info!("data directory: x");
            tracing::debug!("not recorded");
        });

        let text = std::fs::read_to_string(log.path()).unwrap();
        let lines: Vec<&str> = text.lines().collect();
        assert_eq!(lines.len(), 1);
        assert!(lines[0].ends_with(" - INFO - data directory: x"), "{}", lines[0]);
    }

    #[test]
    fn market_log_appends() {
        let dir = tempfile::tempdir().unwrap();
        for msg in ["first", "second"] {
            let log = MarketLog::for_market(dir.path(), "hk", date(), false).unwrap();
            log.in_scope(|| tracing::warn!("{msg}"));
        }
        let text = std::fs::read_to_string(dir.path().join("hk_2024-06-18_log.txt")).unwrap();
        assert_eq!(text.lines().count(), 2);
    }

    #[test]
    fn run_log_never_reuses_a_name() {
        let dir = tempfile::tempdir().unwrap();
        let first = MarketLog::for_run(dir.path(), date(), false).unwrap();
        first.in_scope(|| tracing::info!("one"));
        let second = MarketLog::for_run(dir.path(), date(), false).unwrap();
        assert_eq!(first.path(), dir.path().join("2024-06-18_log.txt"));
        assert_eq!(second.path(), dir.path().join("2024-06-18_log_01.txt"));
    }

    #[test]
    fn scope_does_not_leak() {
        let dir = tempfile::tempdir().unwrap();
        let log = MarketLog::for_market(dir.path(), "us", date(), false).unwrap();
        tracing::info!("outside");
        log.in_scope(|| tracing::info!("inside"));
        tracing::info!("outside again");
        let text = std::fs::read_to_string(log.path()).unwrap();
        assert_eq!(text.lines().count(), 1);
        assert!(text.contains("inside"));
    }
}
