use criterion::{black_box, criterion_group, criterion_main, BenchmarkId, Criterion, Throughput};
use svcexec_core::{Executor, Task};
use svcexec_runtime::{ExecutorConfig, FixedExecutor, SynchronousExecutor, ThreadAccounting};

use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Arc;
use std::time::Duration;

const BATCH: usize = 1_000;

/// Submit `BATCH` trivial tasks and wait for all of them to run
fn run_batch(exec: &dyn Executor) {
    let done = Arc::new(AtomicUsize::new(0));
    for i in 0..BATCH {
        let done = done.clone();
        exec.schedule(Task::from_fn(move || {
            black_box(i);
            done.fetch_add(1, Ordering::Release);
        }))
        .unwrap();
    }
    while done.load(Ordering::Acquire) < BATCH {
        std::thread::yield_now();
    }
}

fn bench_fixed(c: &mut Criterion) {
    let mut group = c.benchmark_group("fixed");
    group.throughput(Throughput::Elements(BATCH as u64));

    for threads in [1usize, 4, 8] {
        let config = ExecutorConfig::new().pool_threads(threads);
        let exec = FixedExecutor::new(&config, Arc::new(ThreadAccounting::new()));
        exec.start().unwrap();
        group.bench_with_input(BenchmarkId::new("schedule", threads), &exec, |b, exec| {
            b.iter(|| run_batch(exec));
        });
        exec.shutdown(Duration::from_secs(5));
    }

    group.finish();
}

fn bench_synchronous(c: &mut Criterion) {
    let mut group = c.benchmark_group("synchronous");
    group.throughput(Throughput::Elements(BATCH as u64));
    group.sample_size(10);

    let exec = SynchronousExecutor::new(&ExecutorConfig::new(), Arc::new(ThreadAccounting::new()));
    exec.start().unwrap();
    group.bench_function("schedule", |b| {
        b.iter(|| run_batch(&exec));
    });
    exec.shutdown(Duration::from_secs(5));

    group.finish();
}

criterion_group!(benches, bench_fixed, bench_synchronous);
criterion_main!(benches);
