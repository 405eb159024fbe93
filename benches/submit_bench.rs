#![allow(clippy::unwrap_used, clippy::expect_used, clippy::cast_possible_truncation)]
//! Submission overhead, with and without monitoring

use criterion::{black_box, criterion_group, criterion_main, BenchmarkId, Criterion, Throughput};
use std::time::Duration;
use taskbench::config::{ExecutorConfig, ExecutorKind};
use taskbench::task::TaskRuntime;
use taskbench::{collect, executor, submit};

fn bench_submit(c: &mut Criterion) {
    let mut group = c.benchmark_group("submit");
    let rt = tokio::runtime::Runtime::new().unwrap();
    let hub = rt.block_on(tokio::net::UdpSocket::bind("127.0.0.1:0")).unwrap();
    let hub_address = hub.local_addr().unwrap().to_string();

    for monitoring in [false, true] {
        let executor = rt.block_on(async {
            let config = ExecutorConfig::builder()
                .kind(ExecutorKind::Thread)
                .worker_count(4)
                .monitoring(monitoring)
                .monitor_address(hub_address.clone())
                .build()
                .unwrap();
            executor::build(config).await.unwrap()
        });

        let count = 500usize;
        let handle = &executor;
        group.throughput(Throughput::Elements(count as u64));
        group.bench_with_input(
            BenchmarkId::new("monitoring", monitoring),
            &count,
            |b, &count| {
                b.to_async(&rt).iter(move || async move {
                    let handles = submit(
                        handle,
                        TaskRuntime::InProcess,
                        black_box(Duration::ZERO),
                        count,
                    );
                    collect(handles).await
                });
            },
        );

        rt.block_on(executor.teardown()).unwrap();
    }
    group.finish();
}

criterion_group!(benches, bench_submit);
criterion_main!(benches);
