use hazrc::*;

use criterion::{black_box, criterion_group, criterion_main, BenchmarkId, Criterion};
use std::sync::{Arc, Barrier};
use std::time::Instant;

macro_rules! contention_bench {
    ($name:ident, $cell:ident, $iter:block) => {
        pub fn $name(c: &mut Criterion) {
            let mut group = c.benchmark_group(stringify!($name));
            for nthreads in [1, 2, 4, 8] {
                group.bench_with_input(
                    BenchmarkId::from_parameter(nthreads),
                    &nthreads,
                    |b, &nthreads| {
                        b.iter_custom(|niters| {
                            let $cell = Arc::new(AtomicRcPtr::new(RcPtr::new(0usize)));
                            let barrier = Arc::new(Barrier::new(nthreads + 1));
                            let threads: Vec<_> = (0..nthreads)
                                .map(|_tid| {
                                    let barrier = Arc::clone(&barrier);
                                    let $cell = Arc::clone(&$cell);
                                    std::thread::spawn(move || {
                                        barrier.wait();
                                        barrier.wait();
                                        for _ in 0..(niters / nthreads as u64) {
                                            $iter
                                        }
                                    })
                                })
                                .collect();
                            barrier.wait();
                            let start = Instant::now();
                            barrier.wait();
                            for thread in threads {
                                thread.join().unwrap();
                            }
                            Registry::global().eager_reclaim();
                            start.elapsed()
                        })
                    },
                );
            }
        }
    };
}

contention_bench!(concurrent_load, cell, {
    black_box(cell.load());
});
contention_bench!(concurrent_swap, cell, {
    black_box(cell.swap(RcPtr::new(1usize)));
});
contention_bench!(concurrent_handle_clone, cell, {
    let h = cell.load();
    black_box(h.clone());
});

criterion_group!(benches, concurrent_load, concurrent_swap, concurrent_handle_clone);
criterion_main!(benches);
