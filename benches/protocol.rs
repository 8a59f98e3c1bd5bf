//! Criterion benchmarks for the Pump 33 protocol layer.
//!
//! Measures the per-command overhead the driver adds on top of the serial
//! line: number formatting, reply parsing, and a full round trip against the
//! simulated pump.
//!
//! Run with: cargo bench --bench protocol

use criterion::{black_box, criterion_group, criterion_main, Criterion};
use pump33::protocol::{format_significant, parse_number, parse_state, SIGNIFICANT_DIGITS};
use pump33::simulator::SimulatedPump;
use pump33::Pump33;

fn formatting(c: &mut Criterion) {
    let mut group = c.benchmark_group("format_significant");
    for (name, value) in [("integer", 5000.0), ("fraction", 12.345678), ("tiny", 1.2e-6)] {
        group.bench_function(name, |b| {
            b.iter(|| format_significant(black_box(value), SIGNIFICANT_DIGITS))
        });
    }
    group.finish();
}

fn parsing(c: &mut Criterion) {
    c.bench_function("parse_number", |b| {
        b.iter(|| parse_number(black_box("\r\n5000.0\r\n1:"), "rate"))
    });
    c.bench_function("parse_state", |b| {
        b.iter(|| parse_state(black_box("\r\n5000.0\r\n1>")))
    });
}

fn round_trip(c: &mut Criterion) {
    let pump = SimulatedPump::new();
    let mut driver = Pump33::new(pump.clone());
    // The simulator logs every frame; clear it so the log does not grow
    c.bench_function("simulated_set_rate", |b| {
        b.iter(|| {
            let result = driver.set_rate(black_box(250.0));
            pump.clear_commands();
            result
        })
    });
    c.bench_function("simulated_status", |b| {
        b.iter(|| {
            let result = driver.status();
            pump.clear_commands();
            result
        })
    });
}

criterion_group!(benches, formatting, parsing, round_trip);
criterion_main!(benches);
