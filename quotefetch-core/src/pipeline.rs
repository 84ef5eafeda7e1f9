//! Fetch-and-persist loop: coordinates per-code fetches, writes, and
//! progress reporting, one market at a time.
//!
//! Everything is sequential: one fetch then one write per code, in list
//! order, with a fixed pause between markets. An interrupt stops the loop
//! at the next code boundary.

use crate::codes::{read_codes, resolve_code_file};
use crate::config::{MarketConfig, RunSettings};
use crate::data::{DataSource, FetchProgress, FetchRequest, TableProvider};
use crate::fetch::{fetch_with_retry, RetryPolicy};
use crate::logging::MarketLog;
use crate::output::{ensure_dir, TableWriter};
use chrono::NaiveDate;
use std::path::{Path, PathBuf};
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::time::{Duration, Instant};
use tracing::{error, info, warn};

/// Cooperative stop flag, set from a signal handler.
#[derive(Debug, Clone, Default)]
pub struct Interrupt(Arc<AtomicBool>);

impl Interrupt {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn trigger(&self) {
        self.0.store(true, Ordering::SeqCst);
    }

    pub fn is_triggered(&self) -> bool {
        self.0.load(Ordering::SeqCst)
    }

    /// Sleep for `duration` unless interrupted first. Returns `false` on interrupt.
    pub fn sleep(&self, duration: Duration) -> bool {
        let deadline = Instant::now() + duration;
        loop {
            if self.is_triggered() {
                return false;
            }
            let now = Instant::now();
            if now >= deadline {
                return true;
            }
            std::thread::sleep((deadline - now).min(Duration::from_millis(100)));
        }
    }
}

/// `{data_root}/{market}/{interval}/{YYYY-MM-DD}`
pub fn market_dir(data_root: &Path, market: &str, interval: &str, date: NaiveDate) -> PathBuf {
    data_root
        .join(market)
        .join(interval)
        .join(date.format("%Y-%m-%d").to_string())
}

/// Shared per-run knobs.
pub struct RunContext<'a> {
    pub retry: RetryPolicy,
    pub progress: &'a dyn FetchProgress,
    pub interrupt: &'a Interrupt,
}

/// One market's worth of work.
pub struct MarketJob<'a> {
    pub market: &'a str,
    pub codes: &'a [String],
    pub request: &'a FetchRequest,
    pub writer: &'a TableWriter,
}

/// Outcome of one market.
#[derive(Debug, Clone, Default)]
pub struct MarketSummary {
    pub market: String,
    /// Number of codes a fetch was attempted for.
    pub attempted: usize,
    pub saved_paths: Vec<PathBuf>,
    pub failed: Vec<String>,
    pub interrupted: bool,
}

impl MarketSummary {
    pub fn saved(&self) -> usize {
        self.saved_paths.len()
    }

    pub fn all_succeeded(&self) -> bool {
        self.failed.is_empty() && !self.interrupted
    }
}

/// Outcome of a multi-market run.
#[derive(Debug, Default)]
pub struct RunSummary {
    pub markets: Vec<MarketSummary>,
    /// Markets that never started, with the reason.
    pub skipped: Vec<(String, String)>,
    pub interrupted: bool,
}

impl RunSummary {
    pub fn all_succeeded(&self) -> bool {
        !self.interrupted && self.skipped.is_empty() && self.markets.iter().all(|m| m.all_succeeded())
    }

    pub fn failed_codes(&self) -> impl Iterator<Item = (&str, &str)> {
        self.markets
            .iter()
            .flat_map(|m| m.failed.iter().map(move |c| (m.market.as_str(), c.as_str())))
    }
}

/// Fetch and write every code of one market, in order.
///
/// Failures (provider error, empty result, write error) are logged and the
/// code is skipped; they never abort the loop.
pub fn run_market(
    provider: &dyn TableProvider,
    job: &MarketJob<'_>,
    ctx: &RunContext<'_>,
) -> MarketSummary {
    let total = job.codes.len();
    let mut summary = MarketSummary {
        market: job.market.to_string(),
        ..Default::default()
    };

    let mut provider_blocked = false;

    info!(
        "data directory: {} ({})",
        job.writer.directory().display(),
        job.writer.save_format()
    );

    for (i, code) in job.codes.iter().enumerate() {
        if ctx.interrupt.is_triggered() {
            warn!("data fetch interrupted");
            summary.interrupted = true;
            break;
        }

        ctx.progress.on_start(code, i, total);
        summary.attempted += 1;

        let saved = match fetch_with_retry(provider, code, job.request, &ctx.retry) {
            Some(table) => match job.writer.write(code, &table) {
                Ok(path) => {
                    info!("{code} saved to {}", path.display());
                    Some(path)
                }
                Err(e) => {
                    error!("failed to write {code}: {e}");
                    None
                }
            },
            None => {
                error!("no data retrieved for {code}");
                None
            }
        };

        ctx.progress.on_complete(code, i, total, saved.as_deref());
        match saved {
            Some(path) => summary.saved_paths.push(path),
            None => summary.failed.push(code.clone()),
        }

        if !provider_blocked && !provider.is_available() {
            warn!("{} is refusing requests, remaining codes will fail fast", provider.name());
            provider_blocked = true;
        }
    }

    // A stop requested during the final fetch is only visible here.
    if ctx.interrupt.is_triggered() && !summary.interrupted {
        warn!("data fetch interrupted");
        summary.interrupted = true;
    }

    ctx.progress
        .on_batch_complete(job.market, summary.saved(), summary.failed.len(), total);
    summary
}

/// Providers by source. Each market config names the one it uses.
pub struct Providers {
    yahoo: Box<dyn TableProvider>,
    eastmoney_deals: Box<dyn TableProvider>,
}

impl Providers {
    pub fn new(yahoo: Box<dyn TableProvider>, eastmoney_deals: Box<dyn TableProvider>) -> Self {
        Self {
            yahoo,
            eastmoney_deals,
        }
    }

    pub fn get(&self, source: DataSource) -> &dyn TableProvider {
        match source {
            DataSource::Yahoo => self.yahoo.as_ref(),
            DataSource::EastmoneyDeals => self.eastmoney_deals.as_ref(),
        }
    }
}

/// Everything `run_markets` needs besides the markets themselves.
pub struct MarketRun<'a> {
    pub settings: &'a RunSettings,
    pub date: NaiveDate,
    /// Mirror WARN and above to stderr.
    pub console: bool,
}

/// Run every market config in order (callers pass them sorted by `id`).
///
/// A market whose code list or output directory is unavailable is skipped
/// and reported, never fatal.
pub fn run_markets(
    markets: &[MarketConfig],
    providers: &Providers,
    run: &MarketRun<'_>,
    ctx: &RunContext<'_>,
) -> RunSummary {
    let mut summary = RunSummary::default();

    for (idx, market) in markets.iter().enumerate() {
        if ctx.interrupt.is_triggered() {
            summary.interrupted = true;
            break;
        }

        let codes = match resolve_code_file(&market.file_name, &run.settings.code_dirs)
            .and_then(|path| read_codes(&path))
        {
            Ok(codes) => codes,
            Err(e) => {
                error!("skipping market {}: {e}", market.market);
                ctx.progress.on_market_skipped(&market.market, &e.to_string());
                summary.skipped.push((market.market.clone(), e.to_string()));
                continue;
            }
        };

        let dir = market_dir(
            &run.settings.data_root,
            &market.market,
            market.output_label(),
            run.date,
        );
        let log = match ensure_dir(&dir)
            .and_then(|()| MarketLog::for_market(&dir, &market.market, run.date, run.console))
        {
            Ok(log) => log,
            Err(e) => {
                error!("skipping market {}: {e}", market.market);
                ctx.progress.on_market_skipped(&market.market, &e.to_string());
                summary.skipped.push((market.market.clone(), e.to_string()));
                continue;
            }
        };

        let writer = TableWriter::new(&dir).format(market.save_format);
        let request = market.request();
        let job = MarketJob {
            market: &market.market,
            codes: &codes,
            request: &request,
            writer: &writer,
        };

        let result = log.in_scope(|| run_market(providers.get(market.source), &job, ctx));
        let interrupted = result.interrupted;
        summary.markets.push(result);
        if interrupted {
            summary.interrupted = true;
            break;
        }

        let is_last = idx + 1 == markets.len();
        if !is_last && !ctx.interrupt.sleep(run.settings.market_delay()) {
            log.in_scope(|| warn!("data fetch interrupted"));
            summary.interrupted = true;
            break;
        }
    }

    summary
}
