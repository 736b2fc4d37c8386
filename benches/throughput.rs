//! Throughput benchmark using criterion.
//!
//! Measures end-to-end task throughput: each iteration launches a system,
//! fans out a batch of tiny tasks from the kernel entry, waits for the
//! batch, and shuts down.

use criterion::{BenchmarkId, Criterion, Throughput, criterion_group, criterion_main};
use fibersched::{TaskDesc, TaskSystemDesc, WaitCounter, launch, run, wait_for};

const TASK_COUNT: usize = 100_000;

fn desc(threads: usize) -> TaskSystemDesc {
    TaskSystemDesc {
        thread_count: threads,
        fiber_count: 64,
        fiber_stack_byte_count: 256 * 1024,
        // Room for the whole batch so the kernel never sleeps on queue
        // space while it is the only runnable context.
        queue_size: TASK_COUNT,
        queue_immediate_size: 64,
        pin_threads: false,
    }
}

fn bench_fan_out(c: &mut Criterion) {
    let threads = std::thread::available_parallelism()
        .map(|count| count.get())
        .unwrap_or(4);

    let mut group = c.benchmark_group("throughput");
    group.throughput(Throughput::Elements(TASK_COUNT as u64));
    group.sample_size(10); // each iteration launches a whole system

    let mut thread_counts = vec![1, 2, threads];
    thread_counts.sort_unstable();
    thread_counts.dedup();

    for thread_count in thread_counts {
        group.bench_function(BenchmarkId::new("fan_out", thread_count), |b| {
            b.iter(|| {
                launch(&desc(thread_count), || {
                    let counter = WaitCounter::new();
                    let tasks = (0..TASK_COUNT).map(|_| {
                        TaskDesc::new(|| {
                            std::hint::black_box(1 + 1);
                        })
                    });
                    run(tasks, Some(&counter));
                    wait_for(&counter);
                })
                .expect("launch");
            })
        });
    }

    group.finish();
}

criterion_group!(benches, bench_fan_out);
criterion_main!(benches);
