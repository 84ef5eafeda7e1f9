//! quotefetch CLI: fetch per-instrument market data and save one file each.
//!
//! Commands:
//! - `markets`: run every market of a JSON config file, in `id` order
//! - `history`: Yahoo Finance history for one code list
//! - `deals`: Eastmoney futures deal detail for one code list

use anyhow::{Context, Result};
use chrono::NaiveDate;
use clap::{Parser, Subcommand};
use quotefetch_core::codes::{read_codes, resolve_code_file};
use quotefetch_core::config::DEALS_LABEL;
use quotefetch_core::data::{
    CircuitBreaker, EastmoneyDealProvider, FetchRequest, StdoutProgress, TableProvider,
    YahooProvider,
};
use quotefetch_core::{
    load_market_configs, market_dir, run_market, run_markets, Interrupt, MarketJob, MarketLog,
    MarketRun, Providers, RunContext, RunSettings, RunSummary, SaveFormat,
    TableWriter,
};
use std::path::{Path, PathBuf};
use std::sync::Arc;

/// Conventional exit status for a run stopped by SIGINT.
const EXIT_INTERRUPTED: i32 = 130;

#[derive(Parser)]
#[command(
    name = "quotefetch",
    about = "quotefetch: download market data, one file per instrument"
)]
struct Cli {
    /// TOML settings file (data root, code-list dirs, delays, timeouts).
    #[arg(long, global = true)]
    settings: Option<PathBuf>,

    /// Output root. Overrides the settings file.
    #[arg(long, global = true)]
    data_root: Option<PathBuf>,

    /// Do not mirror warnings and errors to stderr.
    #[arg(long, global = true, default_value_t = false)]
    quiet: bool,

    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Fetch every market listed in a JSON config file.
    Markets {
        /// JSON array of market configs.
        #[arg(long, default_value = "markets.json")]
        config: PathBuf,
    },
    /// Fetch Yahoo Finance history for every code in a list.
    History {
        /// Code list, one symbol per line.
        #[arg(long, default_value = "test.txt")]
        codes: String,

        /// Market name, used for the output directory.
        #[arg(long, default_value = "us")]
        market: String,

        /// Bar interval (1m, 5m, 1h, 1d, ...).
        #[arg(long, default_value = "1m")]
        interval: String,

        /// Lookback period (1d, 5d, 1mo, 1y, max, ...).
        #[arg(long, default_value = "max")]
        period: String,

        /// Output format: csv, xlsx, or parquet.
        #[arg(long, default_value_t = SaveFormat::Csv)]
        format: SaveFormat,
    },
    /// Fetch the latest trading day's deal detail for every futures code in a list.
    Deals {
        /// Code list, one `{market}.{symbol}` quote id per line.
        #[arg(long, default_value = "futures.txt")]
        codes: String,

        /// Market name, used for the output directory and log file.
        #[arg(long, default_value = "futures")]
        market: String,

        /// Maximum number of deal records per code.
        #[arg(long, default_value_t = 1_000_000)]
        max_count: u64,

        /// Output format: csv, xlsx, or parquet.
        #[arg(long, default_value_t = SaveFormat::Xlsx)]
        format: SaveFormat,
    },
}

fn main() -> Result<()> {
    let cli = Cli::parse();

    let settings = load_settings(cli.settings.as_deref(), cli.data_root)?;
    let interrupt = Interrupt::new();
    install_interrupt_handler(&interrupt)?;

    let today = chrono::Local::now().date_naive();
    let console = !cli.quiet;
    let progress = StdoutProgress;
    let ctx = RunContext {
        retry: settings.retry_policy(),
        progress: &progress,
        interrupt: &interrupt,
    };

    let summary = match cli.command {
        Commands::Markets { config } => run_markets_cmd(&config, &settings, today, console, &ctx)?,
        Commands::History {
            codes,
            market,
            interval,
            period,
            format,
        } => {
            let provider = YahooProvider::new(
                Arc::new(CircuitBreaker::default_provider()),
                &settings.http_options(),
            )?;
            let single = SingleList {
                codes_file: &codes,
                market: &market,
                dir: market_dir(&settings.data_root, &market, &interval, today),
                log: LogName::PerRun,
                request: FetchRequest::History { period, interval },
                format,
            };
            run_single_list(&provider, &single, &settings, today, console, &ctx)?
        }
        Commands::Deals {
            codes,
            market,
            max_count,
            format,
        } => {
            let provider = EastmoneyDealProvider::new(
                Arc::new(CircuitBreaker::default_provider()),
                &settings.http_options(),
            )?;
            let single = SingleList {
                codes_file: &codes,
                market: &market,
                dir: market_dir(&settings.data_root, &market, DEALS_LABEL, today),
                log: LogName::PerMarket,
                request: FetchRequest::DealDetail { max_count },
                format,
            };
            run_single_list(&provider, &single, &settings, today, console, &ctx)?
        }
    };

    report_failures(&summary);

    if summary.interrupted {
        eprintln!("Interrupted.");
        std::process::exit(EXIT_INTERRUPTED);
    }
    if !summary.all_succeeded() {
        std::process::exit(1);
    }

    Ok(())
}

fn load_settings(path: Option<&Path>, data_root: Option<PathBuf>) -> Result<RunSettings> {
    let mut settings = match path {
        Some(path) => RunSettings::from_file(path)
            .with_context(|| format!("failed to load settings from {}", path.display()))?,
        None => RunSettings::default(),
    };
    if let Some(root) = data_root {
        settings.data_root = root;
    }
    Ok(settings)
}

fn install_interrupt_handler(interrupt: &Interrupt) -> Result<()> {
    let flag = interrupt.clone();
    ctrlc::set_handler(move || {
        eprintln!("Stopping after the current instrument...");
        flag.trigger();
    })
    .context("failed to install Ctrl-C handler")
}

fn run_markets_cmd(
    config: &Path,
    settings: &RunSettings,
    date: NaiveDate,
    console: bool,
    ctx: &RunContext<'_>,
) -> Result<RunSummary> {
    let markets = load_market_configs(config)
        .with_context(|| format!("failed to load market configs from {}", config.display()))?;

    let http = settings.http_options();
    let yahoo = YahooProvider::new(Arc::new(CircuitBreaker::default_provider()), &http)?;
    let deals = EastmoneyDealProvider::new(Arc::new(CircuitBreaker::default_provider()), &http)?;
    let providers = Providers::new(Box::new(yahoo), Box::new(deals));

    let run = MarketRun {
        settings,
        date,
        console,
    };
    Ok(run_markets(&markets, &providers, &run, ctx))
}

enum LogName {
    /// `{date}_log.txt`, fresh file per run.
    PerRun,
    /// `{market}_{date}_log.txt`, appended.
    PerMarket,
}

/// One code list fetched into one directory.
struct SingleList<'a> {
    codes_file: &'a str,
    market: &'a str,
    dir: PathBuf,
    log: LogName,
    request: FetchRequest,
    format: SaveFormat,
}

/// A missing code list aborts: there is nothing else to run.
fn run_single_list(
    provider: &dyn TableProvider,
    single: &SingleList<'_>,
    settings: &RunSettings,
    date: NaiveDate,
    console: bool,
    ctx: &RunContext<'_>,
) -> Result<RunSummary> {
    let path = resolve_code_file(single.codes_file, &settings.code_dirs)?;
    let codes = read_codes(&path)?;

    let log = match single.log {
        LogName::PerRun => MarketLog::for_run(&single.dir, date, console)?,
        LogName::PerMarket => MarketLog::for_market(&single.dir, single.market, date, console)?,
    };

    let writer = TableWriter::new(&single.dir).format(single.format);
    let job = MarketJob {
        market: single.market,
        codes: &codes,
        request: &single.request,
        writer: &writer,
    };
    let result = log.in_scope(|| run_market(provider, &job, ctx));

    Ok(RunSummary {
        interrupted: result.interrupted,
        markets: vec![result],
        skipped: Vec::new(),
    })
}

fn report_failures(summary: &RunSummary) {
    for (market, code) in summary.failed_codes() {
        eprintln!("No data saved for {market}/{code}");
    }
}
