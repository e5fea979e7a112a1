//! Incomplete-read driver benchmarks.

use criterion::{black_box, criterion_group, criterion_main, BenchmarkId, Criterion, Throughput};
use tessera::{Doubling, IncompleteDriver, Query, QueryStatus};
use tessera_testkit::{init_tracing, scenarios, TestArray};

const CELLS: i32 = 2_000;

/// Benchmark reads that start from undersized buffers and grow them.
fn bench_grow_from(c: &mut Criterion) {
    init_tracing();
    let fixture = scenarios::counted(CELLS);
    let mut group = c.benchmark_group("grow_from");
    group.throughput(Throughput::Elements(CELLS as u64));

    for initial in [1usize, 16, 256].iter() {
        group.bench_with_input(BenchmarkId::from_parameter(initial), initial, |b, &initial| {
            b.iter(|| {
                let query = fixture.read_query();
                query.set_data_buffer("a", vec![0i32; initial]).unwrap();
                let summary = IncompleteDriver::new(&query).run(|batch| {
                    black_box(batch);
                    Ok(())
                });
                black_box(summary.unwrap());
            });
        });
    }
    group.finish();
}

/// Benchmark a read that fits in one round, as the baseline.
fn bench_single_shot(c: &mut Criterion) {
    let fixture = scenarios::counted(CELLS);
    c.bench_function("single_shot", |b| {
        b.iter(|| {
            let query = fixture.read_query();
            query.set_data_buffer("a", vec![0i32; CELLS as usize]).unwrap();
            assert_eq!(query.submit().unwrap(), QueryStatus::Completed);
            black_box(query.results().unwrap());
        });
    });
}

/// Benchmark variable-length reads grouped into tiles.
fn bench_var_tiles(c: &mut Criterion) {
    let mut group = c.benchmark_group("var_tiles");

    for capacity in [1u64, 8, 64].iter() {
        let fixture = TestArray::var_sized(Some(*capacity));
        let cells: Vec<_> = (1..=500).map(|row| (row, vec![row; (row % 7 + 1) as usize], Some(row))).collect();
        fixture.write_var(&cells);

        group.bench_with_input(BenchmarkId::from_parameter(capacity), capacity, |b, _| {
            b.iter(|| {
                let query: Query = fixture.read_query();
                query.set_data_buffer("a1", vec![0i32; 4]).unwrap();
                query.set_offsets_buffer("a1", vec![0u64; 1]).unwrap();
                let summary = IncompleteDriver::with_policy(&query, Doubling).run(|_| Ok(()));
                black_box(summary.unwrap());
            });
        });
    }
    group.finish();
}

criterion_group!(benches, bench_grow_from, bench_single_shot, bench_var_tiles);

criterion_main!(benches);
