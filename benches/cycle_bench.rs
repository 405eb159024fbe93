#![allow(clippy::unwrap_used, clippy::expect_used, clippy::cast_possible_truncation)]
//! Full submit+collect cycles on the thread executor

use criterion::{criterion_group, criterion_main, BenchmarkId, Criterion, Throughput};
use std::time::Duration;
use taskbench::config::{ExecutorConfig, ExecutorKind};
use taskbench::executor;
use taskbench::task::TaskRuntime;

/// No-op cycle throughput for growing task counts
fn bench_noop_cycle(c: &mut Criterion) {
    let mut group = c.benchmark_group("noop_cycle");
    let rt = tokio::runtime::Runtime::new().unwrap();

    let executor = rt.block_on(async {
        let config = ExecutorConfig::builder()
            .kind(ExecutorKind::Thread)
            .worker_count(4)
            .build()
            .unwrap();
        executor::build(config).await.unwrap()
    });

    for count in [10usize, 100, 1000] {
        group.throughput(Throughput::Elements(count as u64));
        let executor = &executor;
        group.bench_with_input(BenchmarkId::from_parameter(count), &count, |b, &count| {
            b.to_async(&rt).iter(move || async move {
                taskbench::run_cycle(executor, TaskRuntime::InProcess, Duration::ZERO, count)
                    .await
            });
        });
    }
    group.finish();

    rt.block_on(executor.teardown()).unwrap();
}

/// Worker scaling for short sleeps
fn bench_worker_scaling(c: &mut Criterion) {
    let mut group = c.benchmark_group("worker_scaling");
    group.sample_size(10);
    let rt = tokio::runtime::Runtime::new().unwrap();

    for workers in [1usize, 4, 16] {
        let executor = rt.block_on(async {
            let config = ExecutorConfig::builder()
                .kind(ExecutorKind::Thread)
                .worker_count(workers)
                .build()
                .unwrap();
            executor::build(config).await.unwrap()
        });

        let handle = &executor;
        group.bench_with_input(BenchmarkId::from_parameter(workers), &workers, |b, _| {
            b.to_async(&rt).iter(move || async move {
                taskbench::run_cycle(
                    handle,
                    TaskRuntime::InProcess,
                    Duration::from_millis(5),
                    16,
                )
                .await
            });
        });

        rt.block_on(executor.teardown()).unwrap();
    }
    group.finish();
}

criterion_group!(benches, bench_noop_cycle, bench_worker_scaling);
criterion_main!(benches);
