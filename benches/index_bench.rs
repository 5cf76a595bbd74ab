//! Benchmarks for key generation, query decomposition and split scans
//!
//! Run with: cargo bench

use chrono::{TimeZone, Utc};
use criterion::{black_box, criterion_group, criterion_main, Criterion, Throughput};
use gridkey::index::{
    ByteArrayRange, CompoundIndexStrategy, DimensionalityType, IndexStrategy, NumericIndexStrategy,
    RoundRobinKeyIndexStrategy, DEFAULT_MAX_DUPLICATES,
};
use gridkey::numeric::BasicNumericDataset;
use gridkey::query::{Constraints, QueryPlanner, TemporalConstraints, TemporalRange};
use gridkey::scan::{IndexWriter, InputSplit, RangeLocationPair, RangeRecordReader, SqliteStore};
use std::sync::Arc;
use tempfile::tempdir;

fn spatial_temporal() -> IndexStrategy {
    let sfc = DimensionalityType::SpatialTemporalYear
        .create_strategy(20, DEFAULT_MAX_DUPLICATES)
        .unwrap();
    CompoundIndexStrategy::new(RoundRobinKeyIndexStrategy::new(4).unwrap(), sfc).into()
}

fn create_test_points(count: usize) -> Vec<BasicNumericDataset> {
    let base = Utc.with_ymd_and_hms(2006, 1, 1, 0, 0, 0).unwrap().timestamp_millis() as f64;
    (0..count)
        .map(|i| {
            let lon = -180.0 + (i as f64 * 0.37) % 360.0;
            let lat = -90.0 + (i as f64 * 0.11) % 180.0;
            BasicNumericDataset::point(&[lon, lat, base + i as f64 * 60_000.0])
        })
        .collect()
}

fn bench_insertion_ids(c: &mut Criterion) {
    let mut group = c.benchmark_group("insertion_ids");
    let strategy = spatial_temporal();

    for size in [100, 1000] {
        let points = create_test_points(size);
        group.throughput(Throughput::Elements(size as u64));

        group.bench_function(format!("points_{}", size), |b| {
            b.iter(|| {
                for point in &points {
                    black_box(strategy.insertion_ids(black_box(point)).unwrap());
                }
            })
        });
    }

    group.finish();
}

fn bench_query_ranges(c: &mut Criterion) {
    let mut group = c.benchmark_group("query_ranges");
    let strategy = spatial_temporal();

    let start = Utc.with_ymd_and_hms(2005, 12, 15, 0, 0, 0).unwrap();
    let end = Utc.with_ymd_and_hms(2006, 1, 15, 0, 0, 0).unwrap();
    let time = TemporalConstraints::new()
        .with(TemporalRange::new(start, end).unwrap())
        .to_constraints();

    for (name, bbox) in [
        ("city", (-77.2, 38.8, -76.9, 39.0)),
        ("country", (-125.0, 24.0, -66.0, 49.0)),
        ("antimeridian", (170.0, -50.0, -170.0, -30.0)),
    ] {
        let constraints = Constraints::from_bbox(bbox.0, bbox.1, bbox.2, bbox.3)
            .unwrap()
            .merge(&time);

        for budget in [64, 1024] {
            let planner = QueryPlanner::new(budget);
            group.bench_function(format!("{}_{}", name, budget), |b| {
                b.iter(|| planner.plan(&strategy, black_box(&constraints), &[]).unwrap())
            });
        }
    }

    group.finish();
}

fn bench_split_scan(c: &mut Criterion) {
    let mut group = c.benchmark_group("split_scan");
    let dir = tempdir().unwrap();
    let store = Arc::new(SqliteStore::open(dir.path()).unwrap());
    let strategy = Arc::new(spatial_temporal());
    let writer = IndexWriter::new(store.clone(), Arc::clone(&strategy));

    let points = create_test_points(5000);
    for (i, point) in points.iter().enumerate() {
        writer
            .write(b"bench", format!("p{}", i).as_bytes(), point, b"value")
            .unwrap();
    }

    let mut split = InputSplit::new("bench");
    // One range per partition prefix
    for prefix in strategy.natural_split_points() {
        split.add(
            writer.index_id(),
            RangeLocationPair::new(ByteArrayRange::prefix(prefix), "bench", 1250.0),
        );
    }

    group.throughput(Throughput::Elements(points.len() as u64));
    group.bench_function("read_all_partitions", |b| {
        b.iter(|| {
            let mut reader = RangeRecordReader::open(store.as_ref(), &split, &[]).unwrap();
            let mut count = 0u64;
            while reader.next_key_value().unwrap() {
                count += 1;
                black_box(reader.progress());
            }
            reader.close().unwrap();
            count
        })
    });

    group.finish();
}

criterion_group!(benches, bench_insertion_ids, bench_query_ranges, bench_split_scan);
criterion_main!(benches);
