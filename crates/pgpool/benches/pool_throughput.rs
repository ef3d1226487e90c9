// Pool throughput benchmarks.
//
// Measures raw acquire/release overhead with the in-memory driver
// (no I/O, instant open/rollback/close).

use std::hint::black_box;
use std::sync::Arc;
use std::thread;

use criterion::{Criterion, criterion_group, criterion_main};
use pgpool::testing::MockFactory;
use pgpool::{ConnectOptions, Pool, PoolConfig, TransactionStatus};

fn pool(max_size: usize) -> Pool<MockFactory> {
    Pool::new(
        MockFactory::new(),
        ConnectOptions::new("bench"),
        PoolConfig::new(max_size, max_size).with_max_lifetime_secs(0),
    )
    .expect("failed to create pool")
}

fn single_thread_throughput(c: &mut Criterion) {
    let pool = pool(4);

    c.bench_function("single_thread_acquire_release", |b| {
        b.iter(|| {
            let conn = pool.acquire().unwrap();
            pool.release(black_box(conn)).unwrap();
        });
    });
}

fn rollback_on_release(c: &mut Criterion) {
    let pool = pool(4);

    c.bench_function("acquire_release_with_rollback", |b| {
        b.iter(|| {
            let conn = pool.acquire().unwrap();
            conn.probe().set_status(TransactionStatus::InTransaction);
            pool.release(conn).unwrap();
        });
    });
}

fn contended_throughput(c: &mut Criterion) {
    // Small pool to create contention.
    let pool = Arc::new(pool(4));

    c.bench_function("contended_acquire_release_4slots_4threads", |b| {
        b.iter(|| {
            let handles: Vec<_> = (0..4)
                .map(|_| {
                    let pool = Arc::clone(&pool);
                    thread::spawn(move || {
                        for _ in 0..64 {
                            if let Ok(conn) = pool.acquire() {
                                pool.release(conn).unwrap();
                            }
                        }
                    })
                })
                .collect();
            for handle in handles {
                handle.join().unwrap();
            }
        });
    });
}

criterion_group!(
    benches,
    single_thread_throughput,
    rollback_on_release,
    contended_throughput,
);
criterion_main!(benches);
