//! Privacy filter throughput benchmark.
//!
//! Measures filter_metadata latency on flat and nested metadata using Criterion.

use criterion::{black_box, criterion_group, criterion_main, BenchmarkId, Criterion};
use kiosk_core::audit::privacy::filter_metadata;
use serde_json::{json, Value};

fn nested(depth: usize) -> Value {
    let mut value = json!({
        "originalName": "secret.pdf",
        "customerPhone": "9876543210",
        "size": 1024,
        "pageCount": 5,
    });
    for level in 0..depth {
        value = json!({
            "level": level,
            "fileInfo": value,
            "files": [{"fileName": "a.pdf", "mimeType": "application/pdf"}, "+91 98765 43210"],
        });
    }
    value
}

fn bench_filter_depth(c: &mut Criterion) {
    let mut group = c.benchmark_group("filter_metadata");
    for &depth in &[0usize, 2, 8, 32] {
        let input = nested(depth);
        group.bench_with_input(BenchmarkId::from_parameter(depth), &input, |b, v| {
            b.iter(|| filter_metadata(black_box(v.clone())));
        });
    }
    group.finish();
}

fn bench_filter_wide(c: &mut Criterion) {
    let mut map = serde_json::Map::new();
    for i in 0..256 {
        map.insert(format!("field{i}"), json!(i));
        map.insert(format!("customerName{i}"), json!("Priya"));
    }
    let input = Value::Object(map);
    c.bench_function("filter_metadata_wide", |b| {
        b.iter(|| filter_metadata(black_box(input.clone())));
    });
}

criterion_group!(benches, bench_filter_depth, bench_filter_wide);
criterion_main!(benches);
