use criterion::{criterion_group, criterion_main, Criterion};
use fine_reactive::{create_memo, create_root, create_signal};

fn narrow_down(c: &mut Criterion) {
    c.bench_function("narrow_down", |b| {
        b.iter(|| {
            let (_, owner) = create_root(|| {
                let reads = (0..1000)
                    .map(|n| create_signal(n).0)
                    .collect::<Vec<_>>();
                let memo = create_memo(move |_| reads.iter().map(|r| r.read()).sum::<i32>());
                assert_eq!(memo.read(), 499500);
            });
            owner.dispose();
        });
    });
}

criterion_group!(narrow, narrow_down);
criterion_main!(narrow);
