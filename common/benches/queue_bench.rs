// Benchmarks for the lock-free SPSC queue
//
// Tests:
// - Push/pop throughput on the producer and consumer sides
// - Batched operation throughput
// - Cross-thread hand-off throughput

use criterion::{black_box, criterion_group, criterion_main, BenchmarkId, Criterion, Throughput};
use matchbook_common::lf_queue::LFQueue;

/// Benchmark single push/pop operations
fn bench_push_pop_single(c: &mut Criterion) {
    let mut group = c.benchmark_group("queue_single_ops");
    group.throughput(Throughput::Elements(1));

    group.bench_function("push", |b| {
        let queue: LFQueue<u64, 1024> = LFQueue::new();
        let mut counter = 0u64;
        b.iter(|| {
            let _ = queue.push(black_box(counter));
            counter = counter.wrapping_add(1);
            // Pop to make room for the next iteration
            let _ = queue.pop();
        });
    });

    group.bench_function("pop", |b| {
        let queue: LFQueue<u64, 1024> = LFQueue::new();
        let _ = queue.push(42);
        b.iter(|| {
            let item = queue.pop();
            black_box(item);
            let _ = queue.push(42);
        });
    });

    group.finish();
}

/// Benchmark throughput with varying batch sizes
fn bench_queue_throughput(c: &mut Criterion) {
    let mut group = c.benchmark_group("queue_throughput");

    for batch_size in [16, 64, 256, 1024].iter() {
        group.throughput(Throughput::Elements(*batch_size as u64));

        group.bench_with_input(
            BenchmarkId::new("push_pop_batch", batch_size),
            batch_size,
            |b, &size| {
                let queue: LFQueue<u64, 4096> = LFQueue::new();
                b.iter(|| {
                    for i in 0..size {
                        let _ = queue.push(black_box(i as u64));
                    }
                    for _ in 0..size {
                        black_box(queue.pop());
                    }
                });
            },
        );
    }

    group.finish();
}

/// Benchmark the queue under a real producer/consumer thread pair
fn bench_cross_thread(c: &mut Criterion) {
    use std::sync::Arc;

    let mut group = c.benchmark_group("queue_cross_thread");
    const ITEMS: u64 = 100_000;
    group.throughput(Throughput::Elements(ITEMS));
    group.sample_size(10);

    group.bench_function("spsc_handoff_100k", |b| {
        b.iter(|| {
            let queue: Arc<LFQueue<u64, 4096>> = Arc::from(LFQueue::new_boxed());

            let producer = {
                let queue = Arc::clone(&queue);
                std::thread::spawn(move || {
                    let mut next = 0u64;
                    while next < ITEMS {
                        if queue.push(next).is_ok() {
                            next += 1;
                        } else {
                            std::hint::spin_loop();
                        }
                    }
                })
            };

            let mut popped = 0u64;
            while popped < ITEMS {
                if let Some(item) = queue.pop() {
                    black_box(item);
                    popped += 1;
                } else {
                    std::hint::spin_loop();
                }
            }

            producer.join().unwrap();
        });
    });

    group.finish();
}

criterion_group!(
    benches,
    bench_push_pop_single,
    bench_queue_throughput,
    bench_cross_thread
);
criterion_main!(benches);
