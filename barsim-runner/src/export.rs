//! Result export: JSON manifest plus CSV fill tape and equity curve.
//!
//! Persisted manifests carry a `schema_version`; newer versions are rejected
//! on load.

use std::path::{Path, PathBuf};

use anyhow::{bail, Context, Result};
use barsim_core::domain::Fill;
use barsim_core::EquityCurve;

use crate::runner::{BacktestResult, SCHEMA_VERSION};

// ─── JSON ───────────────────────────────────────────────────────────

pub fn export_json(result: &BacktestResult) -> Result<String> {
    serde_json::to_string_pretty(result).context("failed to serialize BacktestResult to JSON")
}

/// Deserialize a `BacktestResult`, rejecting unknown schema versions.
pub fn import_json(json: &str) -> Result<BacktestResult> {
    let result: BacktestResult =
        serde_json::from_str(json).context("failed to deserialize BacktestResult from JSON")?;
    if result.schema_version > SCHEMA_VERSION {
        bail!(
            "unsupported schema version {} (max supported: {})",
            result.schema_version,
            SCHEMA_VERSION
        );
    }
    Ok(result)
}

// ─── CSV ────────────────────────────────────────────────────────────

/// Columns: order_id, timestamp, instrument, side, quantity, price,
/// commission, cash_delta
pub fn export_fills_csv(fills: &[Fill]) -> Result<String> {
    let mut wtr = csv::Writer::from_writer(vec![]);
    wtr.write_record([
        "order_id",
        "timestamp",
        "instrument",
        "side",
        "quantity",
        "price",
        "commission",
        "cash_delta",
    ])?;
    for f in fills {
        wtr.write_record([
            &f.order_id.to_string(),
            &f.timestamp.to_rfc3339(),
            f.instrument.as_str(),
            &f.side.to_string(),
            &f.quantity.to_string(),
            &f.price.to_string(),
            &f.commission.to_string(),
            &f.cash_delta().to_string(),
        ])?;
    }
    let data = wtr.into_inner().context("failed to flush CSV writer")?;
    String::from_utf8(data).context("CSV output is not valid UTF-8")
}

pub fn export_equity_csv(curve: &EquityCurve) -> Result<String> {
    let mut wtr = csv::Writer::from_writer(vec![]);
    wtr.write_record(["timestamp", "cash", "equity"])?;
    for p in curve.points() {
        wtr.write_record([
            &p.timestamp.to_rfc3339(),
            &p.cash.round_dp(2).to_string(),
            &p.equity.round_dp(2).to_string(),
        ])?;
    }
    let data = wtr.into_inner().context("failed to flush CSV writer")?;
    String::from_utf8(data).context("CSV output is not valid UTF-8")
}

// ─── Artifact bundle ────────────────────────────────────────────────

/// Write `manifest.json`, `fills.csv` and `equity.csv` into
/// `{output_dir}/{strategy}_{run id prefix}/` and return that directory.
pub fn save_artifacts(result: &BacktestResult, output_dir: &Path) -> Result<PathBuf> {
    let run_dir = output_dir.join(format!(
        "{}_{}",
        result.config.strategy.name(),
        result.short_id()
    ));
    std::fs::create_dir_all(&run_dir)
        .with_context(|| format!("failed to create artifact dir: {}", run_dir.display()))?;

    std::fs::write(run_dir.join("manifest.json"), export_json(result)?)
        .context("failed to write manifest.json")?;
    std::fs::write(run_dir.join("fills.csv"), export_fills_csv(&result.report.fills)?)
        .context("failed to write fills.csv")?;
    std::fs::write(
        run_dir.join("equity.csv"),
        export_equity_csv(&result.report.equity_curve)?,
    )
    .context("failed to write equity.csv")?;

    log::info!("artifacts written to {}", run_dir.display());
    Ok(run_dir)
}

pub fn load_artifacts(dir: &Path) -> Result<BacktestResult> {
    let manifest_path = dir.join("manifest.json");
    let json = std::fs::read_to_string(&manifest_path)
        .with_context(|| format!("failed to read {}", manifest_path.display()))?;
    import_json(&json)
}
