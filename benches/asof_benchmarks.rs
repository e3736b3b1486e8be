use criterion::{BenchmarkId, Criterion, Throughput, black_box, criterion_group, criterion_main};
use tempra::{Config, Result, SyncPolicy, Tempra, Timestamp, WriteOptions};

fn seeded_db(entities: u64, versions_per_entity: u64) -> Tempra {
    let config = Config::default().with_sync_policy(SyncPolicy::Never);
    let mut db = Tempra::memory_with_config(config).unwrap();
    for e in 0..entities {
        for v in 1..=versions_per_entity {
            db.put(
                format!("entity:{e:06}"),
                b"payload",
                Some(WriteOptions::at(v * 10)),
            )
            .unwrap();
        }
    }
    db
}

fn bench_point_reads(c: &mut Criterion) {
    let mut group = c.benchmark_group("point_reads");

    for depth in [1u64, 100, 1_000].iter() {
        group.bench_with_input(BenchmarkId::new("get_as_of", depth), depth, |b, &depth| {
            let db = seeded_db(100, depth);
            let mid = Timestamp::from_nanos(depth * 5);
            b.iter(|| black_box(db.get_as_of("entity:000050", mid).unwrap()));
        });
    }

    group.finish();
}

fn bench_scan_deep_histories(c: &mut Criterion) {
    let mut group = c.benchmark_group("scan_deep_histories");

    // The jump makes scan cost track entity count, not total versions.
    for depth in [1u64, 100, 1_000].iter() {
        let db = seeded_db(1_000, *depth);
        group.throughput(Throughput::Elements(1_000));

        group.bench_with_input(
            BenchmarkId::new("above_all_history", depth),
            depth,
            |b, &depth| {
                let horizon = Timestamp::from_nanos(depth * 10 + 1);
                b.iter(|| {
                    let n = db
                        .scan_as_of(horizon)
                        .unwrap()
                        .collect::<Result<Vec<_>>>()
                        .unwrap()
                        .len();
                    black_box(n)
                });
            },
        );

        group.bench_with_input(
            BenchmarkId::new("mid_history", depth),
            depth,
            |b, &depth| {
                let horizon = Timestamp::from_nanos(depth * 5);
                b.iter(|| {
                    let n = db
                        .scan_as_of(horizon)
                        .unwrap()
                        .collect::<Result<Vec<_>>>()
                        .unwrap()
                        .len();
                    black_box(n)
                });
            },
        );
    }

    group.finish();
}

fn bench_writes(c: &mut Criterion) {
    let mut group = c.benchmark_group("writes");

    group.bench_function("put_assigned_timestamp", |b| {
        let config = Config::default().with_sync_policy(SyncPolicy::Never);
        let mut db = Tempra::memory_with_config(config).unwrap();
        let mut counter = 0u64;
        b.iter(|| {
            let key = format!("key:{}", counter % 1_000);
            counter += 1;
            db.put(&key, b"payload", None).unwrap()
        });
    });

    for batch_size in [10usize, 100].iter() {
        group.throughput(Throughput::Elements(*batch_size as u64));
        group.bench_with_input(
            BenchmarkId::new("atomic_batch", batch_size),
            batch_size,
            |b, &n| {
                let config = Config::default().with_sync_policy(SyncPolicy::Never);
                let mut db = Tempra::memory_with_config(config).unwrap();
                b.iter(|| {
                    db.atomic(|batch| {
                        for i in 0..n {
                            batch.put(format!("key:{i}"), b"payload", None);
                        }
                        Ok(())
                    })
                    .unwrap();
                });
            },
        );
    }

    group.finish();
}

criterion_group!(
    benches,
    bench_point_reads,
    bench_scan_deep_histories,
    bench_writes
);
criterion_main!(benches);
