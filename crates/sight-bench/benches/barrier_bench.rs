//! Barrier-policy eviction overhead under steady allocation churn (spec
//! §4.6, C6), mirroring the teacher's per-subsystem overhead benches.

use std::sync::Arc;

use criterion::{black_box, criterion_group, criterion_main, Criterion};
use sight_memory::{BarrierDump, BufferManager};

fn bench_barrier_allocation_pressure(c: &mut Criterion) {
    let dir = tempfile::tempdir().unwrap();
    let manager = BufferManager::new(dir.path());
    let policy = Arc::new(BarrierDump::new());
    policy.set("barrier", "16 MiB").unwrap();
    manager.set_policy(policy);

    c.bench_function("barrier_register_under_pressure", |b| {
        b.iter(|| {
            let handle = manager.register_buffer(1024 * 1024).unwrap();
            black_box(manager.info(handle));
            manager.unregister(handle).unwrap();
        });
    });
}

criterion_group!(benches, bench_barrier_allocation_pressure);
criterion_main!(benches);
