//! Bar providers for the runner: CSV files on disk and seeded synthetic data.
//!
//! CSV layout is one file per instrument, `<dir>/<INSTRUMENT>.csv`, with the
//! header `timestamp,open,high,low,close,volume,adj_close`. Timestamps may be
//! RFC 3339, `YYYY-MM-DD HH:MM:SS` (UTC) or a bare `YYYY-MM-DD` date.
//! `adj_close` is optional and defaults to `close`.

use std::path::{Path, PathBuf};

use barsim_core::domain::{Bar, Instrument, Timestamp};
use barsim_core::feed::{BarStream, DataError, DataProvider, DateRange};
use barsim_core::{BarFeed, FeedError};
use chrono::{DateTime, Datelike, Duration, NaiveDate, NaiveDateTime, TimeZone, Utc, Weekday};
use rust_decimal::Decimal;
use serde::{Deserialize, Serialize};

use crate::config::{day_start, DataConfig, DataSource};

/// One CSV row.
#[derive(Debug, Clone, Serialize, Deserialize)]
struct BarRecord {
    timestamp: String,
    open: Decimal,
    high: Decimal,
    low: Decimal,
    close: Decimal,
    volume: u64,
    #[serde(default)]
    adj_close: Option<Decimal>,
}

pub fn parse_timestamp(raw: &str) -> Option<Timestamp> {
    let raw = raw.trim();
    if let Ok(ts) = DateTime::parse_from_rfc3339(raw) {
        return Some(ts.with_timezone(&Utc));
    }
    if let Ok(naive) = NaiveDateTime::parse_from_str(raw, "%Y-%m-%d %H:%M:%S") {
        return Some(Utc.from_utc_datetime(&naive));
    }
    NaiveDate::parse_from_str(raw, "%Y-%m-%d").ok().map(day_start)
}

// ─── CSV ────────────────────────────────────────────────────────────

/// Reads `<dir>/<INSTRUMENT>.csv`.
#[derive(Debug, Clone)]
pub struct CsvProvider {
    dir: PathBuf,
}

impl CsvProvider {
    pub fn new(dir: impl Into<PathBuf>) -> Self {
        Self { dir: dir.into() }
    }

    pub fn path_for(&self, instrument: &Instrument) -> PathBuf {
        self.dir.join(format!("{}.csv", instrument.as_str()))
    }
}

impl DataProvider for CsvProvider {
    fn name(&self) -> &str {
        "csv"
    }

    fn fetch(&self, instrument: &Instrument, range: DateRange) -> Result<BarStream, DataError> {
        let path = self.path_for(instrument);
        let reader = csv::ReaderBuilder::new()
            .trim(csv::Trim::All)
            .from_path(&path)
            .map_err(|e| match e.kind() {
                csv::ErrorKind::Io(io) if io.kind() == std::io::ErrorKind::NotFound => {
                    DataError::InstrumentNotFound {
                        instrument: instrument.clone(),
                    }
                }
                _ => DataError::Other(format!("{}: {e}", path.display())),
            })?;
        log::debug!("reading {} from {}", instrument, path.display());

        let instrument = instrument.clone();
        let rows = reader
            .into_deserialize::<BarRecord>()
            .enumerate()
            .map(move |(i, row)| {
                let record = i as u64 + 1;
                let row = row.map_err(|e| DataError::Parse {
                    record,
                    message: e.to_string(),
                })?;
                let timestamp = parse_timestamp(&row.timestamp).ok_or_else(|| DataError::Parse {
                    record,
                    message: format!("unrecognized timestamp '{}'", row.timestamp),
                })?;
                Ok(Bar {
                    instrument: instrument.clone(),
                    timestamp,
                    open: row.open,
                    high: row.high,
                    low: row.low,
                    close: row.close,
                    volume: row.volume,
                    adj_close: row.adj_close.unwrap_or(row.close),
                })
            })
            .filter(move |bar: &Result<Bar, DataError>| match bar {
                Ok(bar) => range.contains(bar.timestamp),
                Err(_) => true,
            });
        Ok(Box::new(rows))
    }
}

/// Write bars in the layout `CsvProvider` reads.
pub fn write_bars_csv(path: &Path, bars: &[Bar]) -> Result<(), csv::Error> {
    let mut wtr = csv::Writer::from_path(path)?;
    for bar in bars {
        wtr.serialize(BarRecord {
            timestamp: bar.timestamp.to_rfc3339(),
            open: bar.open,
            high: bar.high,
            low: bar.low,
            close: bar.close,
            volume: bar.volume,
            adj_close: Some(bar.adj_close),
        })?;
    }
    wtr.flush()?;
    Ok(())
}

// ─── Synthetic ──────────────────────────────────────────────────────

/// Deterministic random walk per instrument. Clearly fake; results built on
/// it are tagged synthetic.
#[derive(Debug, Clone, Copy)]
pub struct SyntheticProvider {
    seed: u64,
}

impl SyntheticProvider {
    pub fn new(seed: u64) -> Self {
        Self { seed }
    }
}

impl DataProvider for SyntheticProvider {
    fn name(&self) -> &str {
        "synthetic"
    }

    fn fetch(&self, instrument: &Instrument, range: DateRange) -> Result<BarStream, DataError> {
        let (Some(start), Some(end)) = (range.start, range.end) else {
            return Err(DataError::Other(
                "synthetic data needs a bounded date range".into(),
            ));
        };
        let bars = generate_synthetic_bars(instrument, start.date_naive(), end.date_naive(), self.seed);
        Ok(Box::new(
            bars.into_iter()
                .filter(move |b| range.contains(b.timestamp))
                .map(Ok),
        ))
    }
}

/// Weekday bars from `start` to `end` inclusive, starting at 100.
///
/// The RNG is seeded from the instrument and `seed`, so every instrument
/// gets its own reproducible path.
pub fn generate_synthetic_bars(
    instrument: &Instrument,
    start: NaiveDate,
    end: NaiveDate,
    seed: u64,
) -> Vec<Bar> {
    use rand::rngs::StdRng;
    use rand::{Rng, SeedableRng};

    let mut hasher = blake3::Hasher::new();
    hasher.update(instrument.as_str().as_bytes());
    hasher.update(&seed.to_le_bytes());
    let mut rng = StdRng::from_seed(*hasher.finalize().as_bytes());

    let mut bars = Vec::new();
    let mut price = Decimal::from(100);
    let mut current = start;

    while current <= end {
        if matches!(current.weekday(), Weekday::Sat | Weekday::Sun) {
            current += Duration::days(1);
            continue;
        }

        // Returns and wicks in basis points.
        let daily_bps: i64 = rng.gen_range(-300..=300);
        let up_bps: i64 = rng.gen_range(0..=100);
        let down_bps: i64 = rng.gen_range(0..=100);

        let open = price;
        let close = bps_move(open, daily_bps).max(Decimal::new(1, 2));
        let high = bps_move(open.max(close), up_bps);
        let low = bps_move(open.min(close), -down_bps).max(Decimal::new(1, 2));
        let volume = rng.gen_range(500_000..5_000_000u64);

        bars.push(Bar {
            instrument: instrument.clone(),
            timestamp: day_start(current),
            open,
            high,
            low,
            close,
            volume,
            adj_close: close,
        });

        price = close;
        current += Duration::days(1);
    }

    bars
}

fn bps_move(price: Decimal, bps: i64) -> Decimal {
    (price * (Decimal::ONE + Decimal::new(bps, 4))).round_dp(2)
}

// ─── Feed construction ──────────────────────────────────────────────

/// Build the feed described by `data`.
pub fn build_feed(data: &DataConfig) -> Result<BarFeed, FeedError> {
    let range = data.range();
    match &data.source {
        DataSource::Csv { dir } => {
            BarFeed::from_provider(&CsvProvider::new(dir), &data.instruments, range)
        }
        DataSource::Synthetic { seed } => {
            log::warn!("using synthetic data (seed {seed}); results are not market data");
            BarFeed::from_provider(&SyntheticProvider::new(*seed), &data.instruments, range)
        }
    }
}
