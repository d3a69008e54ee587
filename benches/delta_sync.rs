//! Ingest and merge throughput benchmarks

use criterion::{black_box, criterion_group, criterion_main, Criterion};
use lakegate::buffer::DeltaBuffer;
use lakegate::clock::{Hlc, HlcClock};
use lakegate::delta::lww;
use lakegate::types::delta::{ColumnDelta, DeltaOp, RowDelta};
use serde_json::Value;

fn delta(row: u64, client: &str, hlc: u64) -> RowDelta {
    RowDelta::new(
        DeltaOp::Update,
        "tasks",
        format!("row-{row}"),
        client,
        vec![
            ColumnDelta {
                column: "title".into(),
                value: Value::String(format!("title-{hlc}")),
            },
            ColumnDelta {
                column: "priority".into(),
                value: Value::Number((hlc % 10).into()),
            },
        ],
        Hlc::from_u64(hlc << 16),
    )
}

fn bench_hlc_now(c: &mut Criterion) {
    let clock = HlcClock::new();
    c.bench_function("hlc_now", |b| {
        b.iter(|| black_box(clock.now()));
    });
}

fn bench_lww_resolve(c: &mut Criterion) {
    let a = delta(1, "client-a", 100);
    let b_side = delta(1, "client-b", 200);
    c.bench_function("lww_resolve", |b| {
        b.iter(|| lww::resolve(black_box(&a), black_box(&b_side)).unwrap());
    });
}

fn bench_buffer_ingest(c: &mut Criterion) {
    c.bench_function("buffer_ingest_1k_distinct_rows", |b| {
        b.iter(|| {
            let mut buffer = DeltaBuffer::new();
            for i in 0..1_000u64 {
                buffer.apply(delta(i, "client-a", i + 1), 0).unwrap();
            }
            black_box(buffer.len())
        });
    });

    c.bench_function("buffer_ingest_1k_same_row_merges", |b| {
        b.iter(|| {
            let mut buffer = DeltaBuffer::new();
            for i in 0..1_000u64 {
                buffer.apply(delta(0, "client-a", i + 1), 0).unwrap();
            }
            black_box(buffer.len())
        });
    });
}

fn bench_buffer_scan(c: &mut Criterion) {
    let mut buffer = DeltaBuffer::new();
    for i in 0..10_000u64 {
        buffer.apply(delta(i, "client-a", i + 1), 0).unwrap();
    }
    c.bench_function("buffer_scan_page_of_100", |b| {
        b.iter(|| {
            let (page, _) = buffer.scan_since(black_box(Hlc::from_u64(5_000 << 16)), 100);
            black_box(page.len())
        });
    });
}

criterion_group!(
    benches,
    bench_hlc_now,
    bench_lww_resolve,
    bench_buffer_ingest,
    bench_buffer_scan
);
criterion_main!(benches);
