use criterion::{criterion_group, criterion_main, Criterion};
use fine_reactive::{create_memo, create_root, create_signal, Memo};

fn deep_update(c: &mut Criterion) {
    c.bench_function("deep_update", |b| {
        b.iter(|| {
            let (_, owner) = create_root(|| {
                let (signal, set_signal) = create_signal(0);
                let mut memos = Vec::<Memo<i32>>::new();
                for i in 0..1000usize {
                    let prev = memos.get(i.saturating_sub(1)).copied();
                    if let Some(prev) = prev {
                        memos.push(create_memo(move |_| prev.read() + 1));
                    } else {
                        memos.push(create_memo(move |_| signal.read() + 1));
                    }
                }
                set_signal.write(1);
                assert_eq!(memos[999].read(), 1001);
            });
            owner.dispose();
        });
    });
}

criterion_group!(deep, deep_update);
criterion_main!(deep);
