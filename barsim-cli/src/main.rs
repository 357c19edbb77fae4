//! barsim CLI: run configured backtests and produce bar files.
//!
//! Commands:
//! - `run`: execute a backtest from a TOML config and save artifacts
//! - `generate`: write synthetic bars for one instrument as CSV
//! - `show`: summarize a saved artifact directory

use anyhow::{bail, Context, Result};
use barsim_core::domain::Instrument;
use barsim_runner::data_loader::{generate_synthetic_bars, write_bars_csv};
use barsim_runner::export::{load_artifacts, save_artifacts};
use barsim_runner::{run_from_config, BacktestConfig, BacktestResult};
use chrono::NaiveDate;
use clap::{Parser, Subcommand};
use log::LevelFilter;
use rust_decimal::Decimal;
use std::path::{Path, PathBuf};

#[derive(Parser)]
#[command(name = "barsim", about = "Event-driven bar backtester")]
struct Cli {
    /// More log output (-v info, -vv debug, -vvv trace). RUST_LOG still applies.
    #[arg(short, long, action = clap::ArgAction::Count, global = true)]
    verbose: u8,

    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Execute a backtest from a TOML config file.
    Run {
        /// Path to a TOML config file.
        #[arg(long)]
        config: PathBuf,

        /// Output directory for artifacts.
        #[arg(long, default_value = "results")]
        output_dir: PathBuf,

        /// Print the summary only; write nothing.
        #[arg(long, default_value_t = false)]
        dry_run: bool,
    },
    /// Write a synthetic random-walk bar file for one instrument.
    Generate {
        /// Instrument symbol, also used as the file name.
        instrument: String,

        /// First day (YYYY-MM-DD).
        #[arg(long)]
        start: String,

        /// Last day (YYYY-MM-DD).
        #[arg(long)]
        end: String,

        #[arg(long, default_value_t = 0)]
        seed: u64,

        /// Directory to write `<INSTRUMENT>.csv` into.
        #[arg(long, default_value = "data")]
        out: PathBuf,
    },
    /// Summarize a saved run directory.
    Show {
        /// Directory containing manifest.json.
        dir: PathBuf,

        /// Print the full run report as JSON instead of a summary.
        #[arg(long, default_value_t = false)]
        json: bool,
    },
}

fn init_logging(verbose: u8) {
    let level = match verbose {
        0 => LevelFilter::Warn,
        1 => LevelFilter::Info,
        2 => LevelFilter::Debug,
        _ => LevelFilter::Trace,
    };
    env_logger::Builder::new()
        .filter_level(level)
        .parse_default_env()
        .format_timestamp_millis()
        .init();
}

fn main() -> Result<()> {
    let cli = Cli::parse();
    init_logging(cli.verbose);

    match cli.command {
        Commands::Run {
            config,
            output_dir,
            dry_run,
        } => run_cmd(&config, &output_dir, dry_run),
        Commands::Generate {
            instrument,
            start,
            end,
            seed,
            out,
        } => generate_cmd(&instrument, &start, &end, seed, &out),
        Commands::Show { dir, json } => {
            let result = load_artifacts(&dir)?;
            if json {
                println!("{}", serde_json::to_string_pretty(&result.report)?);
            } else {
                print_summary(&result);
            }
            Ok(())
        }
    }
}

fn run_cmd(config_path: &Path, output_dir: &Path, dry_run: bool) -> Result<()> {
    let config = BacktestConfig::from_file(config_path)
        .with_context(|| format!("failed to load config {}", config_path.display()))?;
    let result = run_from_config(&config).context("backtest failed")?;
    print_summary(&result);

    if !dry_run {
        let dir = save_artifacts(&result, output_dir)?;
        println!("Artifacts: {}", dir.display());
    }
    Ok(())
}

fn parse_date(raw: &str) -> Result<NaiveDate> {
    NaiveDate::parse_from_str(raw, "%Y-%m-%d")
        .with_context(|| format!("invalid date '{raw}' (expected YYYY-MM-DD)"))
}

fn generate_cmd(instrument: &str, start: &str, end: &str, seed: u64, out: &Path) -> Result<()> {
    let start = parse_date(start)?;
    let end = parse_date(end)?;
    if start > end {
        bail!("--start {start} is after --end {end}");
    }

    let instrument = Instrument::from(instrument);
    let bars = generate_synthetic_bars(&instrument, start, end, seed);
    std::fs::create_dir_all(out)
        .with_context(|| format!("failed to create {}", out.display()))?;
    let path = out.join(format!("{}.csv", instrument.as_str()));
    write_bars_csv(&path, &bars).with_context(|| format!("failed to write {}", path.display()))?;
    println!("Wrote {} bars to {}", bars.len(), path.display());
    Ok(())
}

fn print_summary(result: &BacktestResult) {
    let r = &result.report;
    println!("Run {} ({})", result.short_id(), r.strategy);
    if result.has_synthetic {
        println!("  Data:             SYNTHETIC");
    }
    println!(
        "  Rounds:           {}{}",
        r.rounds,
        if r.stopped_early { " (stopped early)" } else { "" }
    );
    println!("  Fills:            {}", r.trade_count());
    println!("  Initial equity:   {:.2}", r.initial_equity);
    println!("  Final equity:     {:.2}", r.final_equity);
    println!("  Total return:     {:.2}%", r.total_return * Decimal::ONE_HUNDRED);
    println!("  Max drawdown:     {:.2}%", r.max_drawdown * Decimal::ONE_HUNDRED);
    println!("  Realized P&L:     {:.2}", r.realized_pnl);
    println!("  Unrealized P&L:   {:.2}", r.unrealized_pnl);
    println!("  Commission:       {:.2}", r.total_commission);
    println!("  Digest:           {}", result.digest);
}
