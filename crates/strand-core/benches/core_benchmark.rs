//! Benchmark tests for strand-core operations
//!
//! Run with: cargo bench -p strand-core

use criterion::{black_box, criterion_group, criterion_main, BenchmarkId, Criterion};
use std::time::Duration;

use strand_core::metrics::{percentile, MetricsCollector, MetricsWindow, WINDOW_CEILING};
use strand_core::types::*;

// ============================================================================
// Helpers
// ============================================================================

/// Jittery 30fps intervals
fn intervals(count: usize) -> Vec<i64> {
    (0..count).map(|i| 33 + (i as i64 * 7) % 5 - 2).collect()
}

// ============================================================================
// Percentile Benchmarks
// ============================================================================

fn bench_percentile(c: &mut Criterion) {
    let mut group = c.benchmark_group("Percentile Selection");

    for &count in &[60, 500, 1000] {
        let samples = intervals(count);
        group.bench_with_input(BenchmarkId::new("p50_p95", count), &samples, |b, samples| {
            b.iter(|| {
                black_box(percentile(samples, 50.0));
                black_box(percentile(samples, 95.0));
            });
        });
    }

    group.finish();
}

// ============================================================================
// Frame Path Benchmarks
// ============================================================================

fn bench_frame_path(c: &mut Criterion) {
    let mut group = c.benchmark_group("Frame Path");

    group.bench_function("window_push_with_trim", |b| {
        b.iter(|| {
            let mut window = MetricsWindow::new();
            for i in 0..(WINDOW_CEILING as i64 * 2) {
                window.push(FrameSample { interval_ms: i });
            }
            black_box(window.len())
        });
    });

    for &frames in &[60, 600, 3000] {
        group.bench_with_input(BenchmarkId::new("on_frame", frames), &frames, |b, &frames| {
            b.iter(|| {
                let mut metrics = MetricsCollector::default();
                metrics.reset();
                for i in 0..frames {
                    metrics.on_frame(Some(Duration::from_millis(i * 33)));
                }
                black_box(metrics.last_percentiles())
            });
        });
    }

    group.finish();
}

// ============================================================================
// Classification Benchmarks
// ============================================================================

fn bench_classification(c: &mut Criterion) {
    let mut group = c.benchmark_group("Stream Classification");

    group.bench_function("plain", |b| {
        b.iter(|| {
            black_box(StreamDescriptor::from_capability(Capability::new("video/x-h264")))
        });
    });

    group.bench_function("protected", |b| {
        b.iter(|| {
            black_box(StreamDescriptor::from_capability(Capability::protected(
                "application/x-cenc",
                "audio/mpeg",
            )))
        });
    });

    group.finish();
}

criterion_group!(
    metrics_benches,
    bench_percentile,
    bench_frame_path,
);

criterion_group!(
    type_benches,
    bench_classification,
);

criterion_main!(
    metrics_benches,
    type_benches,
);
