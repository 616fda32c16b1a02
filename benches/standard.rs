// Copyright 2022 Twitter, Inc.
// Licensed under the Apache License, Version 2.0
// http://www.apache.org/licenses/LICENSE-2.0

use criterion::BenchmarkId;
use criterion::Throughput;
use criterion::{criterion_group, criterion_main, Criterion};
use range_histogram::Histogram;

fn record_u16(c: &mut Criterion) {
    let max = 1_000_000u64;
    let mut group = c.benchmark_group("Histogram/u16/record");

    for precision in 1..=5 {
        let mut histogram: Histogram<u16> = Histogram::new(1, max, precision).unwrap();
        group.throughput(Throughput::Elements(1));
        group.bench_function(BenchmarkId::new("min/precision", precision), |b| {
            b.iter(|| histogram.record(1))
        });
        group.bench_function(BenchmarkId::new("max/precision", precision), |b| {
            b.iter(|| histogram.record(max))
        });
    }
}

fn record_u64(c: &mut Criterion) {
    let max = 3_600_000_000u64;
    let mut group = c.benchmark_group("Histogram/u64/record");

    for precision in 1..=5 {
        let mut histogram: Histogram<u64> = Histogram::new(1, max, precision).unwrap();
        group.throughput(Throughput::Elements(1));
        group.bench_function(BenchmarkId::new("min/precision", precision), |b| {
            b.iter(|| histogram.record(1))
        });
        group.bench_function(BenchmarkId::new("max/precision", precision), |b| {
            b.iter(|| histogram.record(max))
        });
    }
}

fn add_u64(c: &mut Criterion) {
    let max = 3_600_000_000u64;
    let mut group = c.benchmark_group("Histogram/u64/add");

    for precision in 1..=5 {
        let mut alpha: Histogram<u64> = Histogram::new(1, max, precision).unwrap();
        let bravo: Histogram<u64> = Histogram::new(1, max, precision).unwrap();
        group.bench_function(BenchmarkId::new("same_geometry/precision", precision), |b| {
            b.iter(|| alpha.add(&bravo))
        });
    }

    for precision in 1..5 {
        let mut alpha: Histogram<u64> = Histogram::new(1, max, precision + 1).unwrap();
        let bravo: Histogram<u64> = Histogram::new(1, max, precision).unwrap();
        group.bench_function(BenchmarkId::new("different_geometry/precision", precision + 1), |b| {
            b.iter(|| alpha.add(&bravo))
        });
    }
}

fn value_at_percentile(c: &mut Criterion) {
    let max = 3_600_000_000u64;
    let mut histogram: Histogram<u64> = Histogram::new(1, max, 3).unwrap();
    for v in 1..=10_000u64 {
        histogram.record(v * 37).unwrap();
    }

    let mut group = c.benchmark_group("Histogram/u64/value_at_percentile");
    group.bench_function("p99.99", |b| b.iter(|| histogram.value_at_percentile(99.99)));
}

criterion_group!(benches, record_u16, record_u64, add_u64, value_at_percentile);
criterion_main!(benches);
