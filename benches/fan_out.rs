use criterion::{criterion_group, criterion_main, Criterion};
use fine_reactive::{create_memo, create_root, create_signal};

fn fan_out(c: &mut Criterion) {
    c.bench_function("fan_out", |b| {
        b.iter(|| {
            let (_, owner) = create_root(|| {
                let (signal, set_signal) = create_signal(0);
                let memos = (0..1000)
                    .map(|_| create_memo(move |_| signal.read()))
                    .collect::<Vec<_>>();
                assert_eq!(memos.iter().map(|m| m.read()).sum::<i32>(), 0);
                set_signal.write(1);
                assert_eq!(memos.iter().map(|m| m.read()).sum::<i32>(), 1000);
            });
            owner.dispose();
        });
    });
}

criterion_group!(fan, fan_out);
criterion_main!(fan);
