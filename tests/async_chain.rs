//! S3/S4 — asynchronous computations: the loading channel reflects an
//! in-flight future, and a stale future's resolution is ignored once a
//! newer one has superseded it (the `pending_epoch` identity check).
//!
//! Requires the `tokio-scheduler` feature, for `init_tokio` and a real
//! `LocalSet` to drive pending computations; compiled out otherwise.
#![cfg(feature = "tokio-scheduler")]

use std::cell::RefCell;
use std::rc::Rc;

use fine_reactive::{create_effect, create_memo_try, create_root, flush_sync, init_tokio, ComputeResult};
use tokio::sync::oneshot;

#[tokio::test(flavor = "current_thread")]
async fn loading_reflects_in_flight_future_and_clears_on_settle() {
    let local = tokio::task::LocalSet::new();
    local
        .run_until(async {
            let _ = init_tokio();

            let ((m, set_s), owner) = create_root(|| {
                let (s, set_s) = fine_reactive::create_signal(1);
                let m = create_memo_try(move |_| {
                    if s.read() == 1 {
                        // Never observed to resolve in this scenario; s
                        // flips to 2 before it matters.
                        ComputeResult::Pending(Box::pin(std::future::pending()))
                    } else {
                        ComputeResult::Ready(2)
                    }
                });
                (m, set_s)
            });

            // Initial read: s == 1, so m is loading.
            assert!(m.loading());

            set_s.write(2);
            fine_reactive::flush_sync();
            assert_eq!(m.read(), 2);
            assert!(!m.loading());

            owner.dispose();
        })
        .await;
}

/// An effect that subscribes *only* through `loading()` — never `read()` —
/// still has to rerun once the in-flight future settles. The effect's
/// tracked source is the loading channel, not `m` itself, so this exercises
/// the channel's own pull-validation forcing its origin's recompute.
#[tokio::test(flavor = "current_thread")]
async fn effect_observing_only_loading_reruns_when_it_settles() {
    let local = tokio::task::LocalSet::new();
    local
        .run_until(async {
            let _ = init_tokio();

            let (seen, owner) = create_root(|| {
                let (s, set_s) = fine_reactive::create_signal(1);
                let m = create_memo_try(move |_| {
                    if s.read() == 1 {
                        ComputeResult::Pending(Box::pin(std::future::pending()))
                    } else {
                        ComputeResult::Ready(2)
                    }
                });

                let seen = Rc::new(RefCell::new(Vec::new()));
                {
                    let seen = Rc::clone(&seen);
                    create_effect(move |_: Option<&()>| {
                        seen.borrow_mut().push(m.loading());
                    });
                }
                assert_eq!(*seen.borrow(), vec![true]);

                set_s.write(2);
                flush_sync();

                seen
            });
            assert_eq!(*seen.borrow(), vec![true, false]);

            owner.dispose();
        })
        .await;
}

#[tokio::test(flavor = "current_thread")]
async fn stale_future_resolution_does_not_clear_loading() {
    let local = tokio::task::LocalSet::new();
    local
        .run_until(async {
            let _ = init_tokio();

            let p1_tx: Rc<RefCell<Option<oneshot::Sender<i32>>>> = Rc::new(RefCell::new(None));

            let (m, owner) = create_root(|| {
                let (switch, set_switch) = fine_reactive::create_signal(true);
                let p1_tx = Rc::clone(&p1_tx);
                let m = create_memo_try(move |_| {
                    if switch.read() {
                        let (tx, rx) = oneshot::channel::<i32>();
                        *p1_tx.borrow_mut() = Some(tx);
                        ComputeResult::Pending(Box::pin(async move { rx.await.unwrap_or(1) }))
                    } else {
                        ComputeResult::Pending(Box::pin(std::future::pending()))
                    }
                });
                // Force the first (P1) compute to run and stash its sender.
                assert!(m.loading());
                set_switch.write(false);
                // Force the second (never-resolving P2) compute to run,
                // superseding P1.
                assert!(m.loading());
                m
            });

            let stale_tx = p1_tx.borrow_mut().take().expect("P1 sender was captured");
            let _ = stale_tx.send(1);
            // Let the spawned continuation for the now-stale P1 future run.
            tokio::task::yield_now().await;
            tokio::task::yield_now().await;

            // The currently active future is P2, which never resolves, so m
            // must still be loading despite P1 having just resolved.
            assert!(m.loading());

            owner.dispose();
        })
        .await;
}
