//! Properties that must hold regardless of graph shape: disposal symmetry,
//! loading monotonicity while a future is in flight, and untracked reads.

use std::cell::RefCell;
use std::rc::Rc;

use fine_reactive::{
    create_effect, create_memo_try, create_root, create_signal, flush_sync, untrack, ComputeResult,
};

#[test]
fn disposed_effect_does_not_rerun_after_its_owner_is_disposed() {
    let (_, root) = create_root(|| {
        let (s, set_s) = create_signal(0);
        let run_count = Rc::new(RefCell::new(0));

        let (_, child) = create_root(|| {
            let run_count = Rc::clone(&run_count);
            create_effect(move |_: Option<&()>| {
                let _ = s.read();
                *run_count.borrow_mut() += 1;
            });
        });
        assert_eq!(*run_count.borrow(), 1);

        set_s.write(1);
        flush_sync();
        assert_eq!(*run_count.borrow(), 2);

        child.dispose();
        set_s.write(2);
        flush_sync();
        // The effect's cell was unlinked from s's observers on disposal, so
        // writing s again must not resurrect it.
        assert_eq!(*run_count.borrow(), 2);

        // s itself is untouched by the child scope's disposal.
        assert_eq!(s.read(), 2);
        set_s.write(3);
        assert_eq!(s.read(), 3);
    });
    root.dispose();
}

#[test]
fn loading_is_monotonic_while_a_future_stays_pending() {
    let _ = fine_reactive::init_futures_executor();
    let (_, owner) = create_root(|| {
        let m = create_memo_try(|_| ComputeResult::<i32>::Pending(Box::pin(std::future::pending())));
        assert!(m.loading());
        // No write happened between these two reads; both must agree.
        assert!(m.loading());
    });
    owner.dispose();
}

#[test]
fn untrack_suppresses_dependency_recording() {
    let (runs, owner) = create_root(|| {
        let (tracked, set_tracked) = create_signal(0);
        let (ignored, set_ignored) = create_signal(0);
        let runs = Rc::new(RefCell::new(0));
        {
            let runs = Rc::clone(&runs);
            create_effect(move |_: Option<&()>| {
                let _ = tracked.read();
                let _ = untrack(|| ignored.read());
                *runs.borrow_mut() += 1;
            });
        }
        assert_eq!(*runs.borrow(), 1);

        set_ignored.write(1);
        flush_sync();
        assert_eq!(*runs.borrow(), 1); // untracked read created no dependency

        set_tracked.write(1);
        flush_sync();
        assert_eq!(*runs.borrow(), 2);

        runs
    });
    owner.dispose();
    assert_eq!(*runs.borrow(), 2);
}
