//! Criterion benchmarks for barsim hot paths.
//!
//! Benchmarks:
//! 1. Dispatch loop (feeds + broker + strategy per round)
//! 2. Broker bar processing with a deep book of resting orders

use criterion::{black_box, criterion_group, criterion_main, BenchmarkId, Criterion};
use rust_decimal::Decimal;

use barsim_core::domain::{Bar, Bars, Instrument, OrderRequest, OrderSide, Timestamp};
use barsim_core::{run_backtest, BarFeed, EngineConfig, Strategy, StrategyContext};
use chrono::{Duration, TimeZone, Utc};

// ── Helpers ──────────────────────────────────────────────────────────

fn ts(i: usize) -> Timestamp {
    Utc.with_ymd_and_hms(2020, 1, 2, 0, 0, 0).unwrap() + Duration::days(i as i64)
}

fn make_bars(symbol: &str, n: usize) -> Vec<Bar> {
    (0..n)
        .map(|i| {
            let close = Decimal::from(100) + Decimal::new((i % 40) as i64 - 20, 1);
            Bar::new(
                Instrument::from(symbol),
                ts(i),
                close - Decimal::new(3, 1),
                close + Decimal::new(15, 1),
                close - Decimal::new(15, 1),
                close,
                1_000_000,
                close,
            )
            .unwrap()
        })
        .collect()
}

fn make_feeds(symbols: usize, bars: usize) -> Vec<BarFeed> {
    (0..symbols)
        .map(|s| {
            let symbol = format!("SYM{s}");
            let mut feed = BarFeed::new(symbol.as_str());
            feed.add_bars(Instrument::from(symbol.as_str()), make_bars(&symbol, bars))
                .unwrap();
            feed
        })
        .collect()
}

/// Trades every instrument in and out on a fixed cadence.
struct Churn {
    round: usize,
}

impl Strategy for Churn {
    fn on_bars(&mut self, ctx: &mut StrategyContext<'_>, bars: &Bars) {
        for bar in bars {
            let held = ctx.shares(&bar.instrument);
            if held == 0 && self.round % 5 == 0 {
                let _ = ctx.market_order(bar.instrument.clone(), 10);
            } else if held > 0 && self.round % 5 == 3 {
                let _ = ctx.limit_order(bar.instrument.clone(), -held, bar.close);
            }
        }
        self.round += 1;
    }
}

/// Keeps a ladder of far-away limit orders resting on the book.
struct Ladder {
    depth: usize,
    placed: bool,
}

impl Strategy for Ladder {
    fn on_bars(&mut self, ctx: &mut StrategyContext<'_>, bars: &Bars) {
        if self.placed {
            return;
        }
        for bar in bars {
            for i in 0..self.depth {
                let price = Decimal::from(10 + i as i64 % 20);
                let _ = ctx.submit_order(OrderRequest::limit(
                    bar.instrument.clone(),
                    OrderSide::Buy,
                    1,
                    price,
                ));
            }
        }
        self.placed = true;
    }
}

// ── 1. Dispatch loop ─────────────────────────────────────────────────

fn bench_dispatch_loop(c: &mut Criterion) {
    let mut group = c.benchmark_group("dispatch_loop");
    for &bars in &[252usize, 1260] {
        group.bench_with_input(BenchmarkId::new("1_symbol", bars), &bars, |b, &n| {
            b.iter(|| {
                let outcome =
                    run_backtest(&EngineConfig::default(), make_feeds(1, n), Churn { round: 0 })
                        .unwrap();
                black_box(outcome.report.rounds)
            })
        });
    }
    group.bench_function("10_symbols_1260_bars", |b| {
        b.iter(|| {
            let outcome =
                run_backtest(&EngineConfig::default(), make_feeds(10, 1260), Churn { round: 0 })
                    .unwrap();
            black_box(outcome.report.fills.len())
        })
    });
    group.finish();
}

// ── 2. Resting order book ────────────────────────────────────────────

fn bench_resting_orders(c: &mut Criterion) {
    let mut group = c.benchmark_group("resting_orders");
    for &depth in &[10usize, 100] {
        group.bench_with_input(BenchmarkId::from_parameter(depth), &depth, |b, &d| {
            b.iter(|| {
                let outcome = run_backtest(
                    &EngineConfig::default(),
                    make_feeds(2, 252),
                    Ladder {
                        depth: d,
                        placed: false,
                    },
                )
                .unwrap();
                black_box(outcome.report.orders.len())
            })
        });
    }
    group.finish();
}

criterion_group!(benches, bench_dispatch_loop, bench_resting_orders);
criterion_main!(benches);
