//! Stream drain benchmarks
//!
//! Bounded loads of 1 / 1K / 1M events pushed firehose-style through the
//! hot publisher into a blackhole, plus bare target construction cost.
//!
//! Run: cargo bench --bench bench_streams

use criterion::{criterion_group, criterion_main, BenchmarkId, Criterion, Throughput};
use std::sync::Arc;
use std::time::Duration;

use spate::{
    build_target, Blackhole, CompletionGate, DispatchTarget, FnSink, HarnessConfig, HotStream,
    LoadShape, PacedSink, TargetKind,
};

const SIZES: [u64; 3] = [1, 1_000, 1_000_000];

fn hot_config() -> HarnessConfig {
    HarnessConfig::new(256).unwrap().with_kind(TargetKind::HotStream)
}

/// Firehose drain: unbounded demand, all events pushed then awaited.
fn bench_firehose(c: &mut Criterion) {
    let mut group = c.benchmark_group("Firehose");
    group.sample_size(10);

    let blackhole = Arc::new(Blackhole::new());
    for size in SIZES {
        group.throughput(Throughput::Elements(size));
        group.bench_with_input(BenchmarkId::from_parameter(size), &size, |b, &size| {
            let shape = LoadShape::Counting { count: size };
            b.iter(|| {
                let gate = Arc::new(CompletionGate::new(1));
                let hole = blackhole.clone();
                let sink = Arc::new(FnSink::new(
                    move |event| hole.consume(event.payload()),
                    gate.clone(),
                ));
                let mut stream = HotStream::new(&hot_config()).unwrap();
                stream.attach_sink(sink).unwrap();
                stream.start().unwrap();
                shape.drive(&mut stream).unwrap();
                gate.await_signaled(Duration::from_secs(60)).unwrap();
                stream.close().unwrap();
            });
        });
    }
    group.finish();
}

/// Paced drain: bounded demand window, one credit refilled per item.
fn bench_paced(c: &mut Criterion) {
    let mut group = c.benchmark_group("Paced");
    group.sample_size(10);

    for size in [1u64, 1_000] {
        group.throughput(Throughput::Elements(size));
        group.bench_with_input(BenchmarkId::from_parameter(size), &size, |b, &size| {
            let shape = LoadShape::Counting { count: size };
            b.iter(|| {
                let gate = Arc::new(CompletionGate::new(1));
                let sink = Arc::new(PacedSink::new(128, gate.clone()));
                let mut stream = HotStream::new(&hot_config()).unwrap();
                stream.attach_sink(sink.clone()).unwrap();
                stream.start().unwrap();
                shape.drive(&mut stream).unwrap();
                gate.await_signaled(Duration::from_secs(60)).unwrap();
                stream.close().unwrap();
                sink.count()
            });
        });
    }
    group.finish();
}

/// Bare construction cost of each target kind.
fn bench_create(c: &mut Criterion) {
    let mut group = c.benchmark_group("Create");

    for kind in [TargetKind::Ring, TargetKind::HotStream, TargetKind::AsyncPool] {
        let config = HarnessConfig::new(256).unwrap().with_kind(kind);
        group.bench_function(BenchmarkId::new("build", format!("{kind:?}")), |b| {
            b.iter(|| build_target(&config).unwrap());
        });
    }
    group.finish();
}

criterion_group!(benches, bench_firehose, bench_paced, bench_create);
criterion_main!(benches);
