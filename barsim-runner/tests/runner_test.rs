//! End-to-end runner tests: configured runs, determinism and artifacts.

use barsim_core::domain::Instrument;
use barsim_runner::data_loader::{generate_synthetic_bars, write_bars_csv};
use barsim_runner::export::{
    export_equity_csv, export_fills_csv, export_json, import_json, load_artifacts, save_artifacts,
};
use barsim_runner::{run_from_config, BacktestConfig, RunnerError};
use chrono::NaiveDate;
use proptest::prelude::*;

fn synthetic_config(seed: u64) -> BacktestConfig {
    BacktestConfig::from_toml_str(&format!(
        r#"
        [data]
        instruments = ["SPY", "QQQ"]
        start = "2023-01-02"
        end = "2023-06-30"
        source = {{ type = "synthetic", seed = {seed} }}

        [strategy]
        type = "sma_crossover"
        fast = 5
        slow = 20
        quantity = 50

        [broker]
        initial_cash = 100000
        commission = {{ model = "fixed_per_trade", amount = 1 }}
        "#
    ))
    .unwrap()
}

fn csv_config(dir: &std::path::Path) -> BacktestConfig {
    BacktestConfig::from_toml_str(&format!(
        r#"
        [data]
        instruments = ["SPY"]
        source = {{ type = "csv", dir = "{}" }}

        [strategy]
        type = "buy_and_hold"
        quantity = 10
        "#,
        dir.display().to_string().replace('\\', "/")
    ))
    .unwrap()
}

#[test]
fn synthetic_run_produces_a_tagged_result() {
    let result = run_from_config(&synthetic_config(11)).unwrap();
    assert!(result.has_synthetic);
    assert_eq!(result.schema_version, barsim_runner::SCHEMA_VERSION);
    assert_eq!(result.report.strategy, "sma_crossover");
    assert!(result.report.rounds > 100);
    assert_eq!(
        result.report.equity_curve.len() as u64,
        result.report.rounds
    );
    assert_eq!(result.digest, result.report.digest().unwrap());
}

#[test]
fn reruns_are_bit_identical() {
    let a = run_from_config(&synthetic_config(5)).unwrap();
    let b = run_from_config(&synthetic_config(5)).unwrap();
    assert_eq!(a.run_id, b.run_id);
    assert_eq!(a.digest, b.digest);
    assert_eq!(a, b);

    let c = run_from_config(&synthetic_config(6)).unwrap();
    assert_ne!(a.run_id, c.run_id);
}

#[test]
fn csv_run_buys_and_holds() {
    let dir = tempfile::tempdir().unwrap();
    let spy = Instrument::from("SPY");
    let start = NaiveDate::from_ymd_opt(2024, 1, 1).unwrap();
    let end = NaiveDate::from_ymd_opt(2024, 2, 29).unwrap();
    let bars = generate_synthetic_bars(&spy, start, end, 9);
    write_bars_csv(&dir.path().join("SPY.csv"), &bars).unwrap();

    let result = run_from_config(&csv_config(dir.path())).unwrap();
    assert!(!result.has_synthetic);
    assert_eq!(result.report.rounds as usize, bars.len());
    assert_eq!(result.report.fills.len(), 1);
    // Entered on the first bar, filled at the second bar's open.
    assert_eq!(result.report.fills[0].price, bars[1].open);
    assert_eq!(result.report.positions[0].quantity, 10);
}

#[test]
fn missing_csv_is_a_data_error() {
    let dir = tempfile::tempdir().unwrap();
    let err = run_from_config(&csv_config(dir.path())).unwrap_err();
    assert!(matches!(err, RunnerError::Feed(_)), "{err}");
}

#[test]
fn artifacts_round_trip() {
    let result = run_from_config(&synthetic_config(3)).unwrap();
    let out = tempfile::tempdir().unwrap();
    let run_dir = save_artifacts(&result, out.path()).unwrap();

    assert!(run_dir
        .file_name()
        .unwrap()
        .to_string_lossy()
        .starts_with("sma_crossover_"));
    assert!(run_dir.join("fills.csv").exists());
    assert!(run_dir.join("equity.csv").exists());

    let loaded = load_artifacts(&run_dir).unwrap();
    assert_eq!(loaded, result);
}

#[test]
fn csv_exports_have_one_row_per_record() {
    let result = run_from_config(&synthetic_config(3)).unwrap();
    let fills = export_fills_csv(&result.report.fills).unwrap();
    assert_eq!(fills.lines().count(), result.report.fills.len() + 1);
    assert!(fills.starts_with("order_id,timestamp,instrument,side"));

    let equity = export_equity_csv(&result.report.equity_curve).unwrap();
    assert_eq!(
        equity.lines().count(),
        result.report.equity_curve.len() + 1
    );
}

#[test]
fn future_schema_is_rejected() {
    let mut result = run_from_config(&synthetic_config(1)).unwrap();
    result.schema_version = barsim_runner::SCHEMA_VERSION + 1;
    let json = export_json(&result).unwrap();
    let err = import_json(&json).unwrap_err();
    assert!(err.to_string().contains("unsupported schema version"));
}

proptest! {
    #![proptest_config(ProptestConfig::with_cases(32))]

    #[test]
    fn synthetic_bars_are_always_sane(seed in any::<u64>(), days in 1..400_i64) {
        let start = NaiveDate::from_ymd_opt(2020, 1, 1).unwrap();
        let end = start + chrono::Duration::days(days);
        let bars = generate_synthetic_bars(&Instrument::from("XYZ"), start, end, seed);
        for pair in bars.windows(2) {
            prop_assert!(pair[0].timestamp < pair[1].timestamp);
            prop_assert_eq!(pair[1].open, pair[0].close);
        }
        for bar in &bars {
            prop_assert!(bar.validate().is_ok());
        }
    }
}

#[test]
fn bundled_config_runs() {
    let config =
        BacktestConfig::from_toml_str(include_str!("../../configs/sma_crossover.toml")).unwrap();
    let result = run_from_config(&config).unwrap();
    assert!(result.report.final_cash >= rust_decimal::Decimal::ZERO);
    assert!(!result.report.fills.is_empty());
}
