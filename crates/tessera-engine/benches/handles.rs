use criterion::{black_box, criterion_group, criterion_main, BenchmarkId, Criterion};
use tessera_engine::universal::HandleTable;
use tessera_engine::{EngineConfig, Mode, Runtime};
use tessera_sdk::{Context, ObjectRef};

fn bench_table(c: &mut Criterion) {
    let mut group = c.benchmark_group("handle_table");

    group.bench_function("alloc_close", |b| {
        let mut table = HandleTable::new();
        let obj = ObjectRef::new(0i64);
        b.iter(|| {
            let h = table.alloc(obj.clone()).unwrap();
            table.close(black_box(h)).unwrap()
        });
    });

    for live in [16usize, 1024] {
        group.bench_with_input(BenchmarkId::new("churn", live), &live, |b, &live| {
            let mut table = HandleTable::new();
            let obj = ObjectRef::new(0i64);
            let mut open: Vec<_> = (0..live).map(|_| table.alloc(obj.clone()).unwrap()).collect();
            let mut i = 0;
            b.iter(|| {
                let slot = i % live;
                table.close(open[slot]).unwrap();
                open[slot] = table.alloc(obj.clone()).unwrap();
                i += 1;
            });
        });
    }

    group.finish();
}

fn bench_contexts(c: &mut Criterion) {
    let mut group = c.benchmark_group("long_roundtrip");
    let config = EngineConfig {
        check_handles: false,
        ..EngineConfig::default()
    };
    let runtime = Runtime::new(config);

    for mode in Mode::ALL {
        let ctx = runtime.context(mode).unwrap();
        group.bench_function(mode.as_str(), |b| {
            b.iter(|| {
                let h = ctx.long_from_i64(black_box(42)).unwrap();
                let v = ctx.long_as_i64(h).unwrap();
                ctx.close(h);
                v
            });
        });
    }

    group.finish();
}

criterion_group!(benches, bench_table, bench_contexts);
criterion_main!(benches);
