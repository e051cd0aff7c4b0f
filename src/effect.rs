//! Effects: the only cells eagerly rerun by the engine itself (§4.5 C5).
//!
//! ```
//! use fine_reactive::*;
//!
//! create_root(|| {
//!     let (count, set_count) = create_signal(0);
//!     let log = std::rc::Rc::new(std::cell::RefCell::new(Vec::new()));
//!     {
//!         let log = std::rc::Rc::clone(&log);
//!         create_effect(move |_: Option<&()>| log.borrow_mut().push(count.read()));
//!     }
//!     set_count.write(1);
//!     flush_sync();
//!     assert_eq!(*log.borrow(), vec![0, 1]);
//! });
//! ```
//!
//! An effect created inside another effect's compute is torn down and
//! recreated every time the outer effect reruns (§3 invariant 6, tested by
//! the nested-effect-recreation scenario in `tests/`); its `on_dispose`
//! cleanups fire exactly once per teardown, in reverse registration order.

use std::cell::RefCell;
use std::rc::Rc;

use crate::cell::{internal_create_computed, CellOptions, Equality};
use crate::node::ComputeResult;
use crate::runtime::with_runtime;

/// `create_effect(fn)` (§6): the common case, a side-effecting closure run
/// eagerly and reactively. Like the reference crate, the closure receives
/// the value it returned last time (`None` on the first run) so it can
/// double as a reducer; most effects just ignore the argument.
///
/// For an effect whose body needs `wait()`/pending-future short-circuiting,
/// use [`create_effect_try`].
pub fn create_effect<T, F>(mut f: F)
where
    T: PartialEq + Clone + 'static,
    F: FnMut(Option<&T>) -> T + 'static,
{
    create_effect_try(move |prev| ComputeResult::Ready(f(prev)))
}

/// The general form: `compute` returns a [`ComputeResult`] directly.
pub fn create_effect_try<T, F>(f: F)
where
    T: PartialEq + Clone + 'static,
    F: Fn(Option<&T>) -> ComputeResult<T> + 'static,
{
    let cell = internal_create_computed(
        f,
        CellOptions {
            equals: Equality::Never,
            name: None,
        },
        true,
    );
    // Effects run eagerly: unlike a memo (lazily pulled by its first
    // reader), nothing "reads" an effect, so the initial run has to be
    // driven here rather than left for `updateIfNecessary` to discover on
    // some future read (§2 "Effects are the only cells eagerly rerun").
    let _ = with_runtime(|rt| rt.update_if_necessary(cell.id));
}

/// Defers the effect flush until `f` returns, coalescing any number of
/// writes made inside `f` into (at most) one rerun per affected effect
/// (§4.6 ADDED `batch`). Reentrant: nested `batch` calls only flush once
/// the outermost one exits. Flushes even if `f` panics, via the same
/// save/restore-on-drop discipline as [`crate::owner::OwnerGuard`].
pub fn batch<R>(f: impl FnOnce() -> R) -> R {
    struct BatchGuard;
    impl BatchGuard {
        fn enter() -> Self {
            with_runtime(|rt| rt.begin_batch());
            BatchGuard
        }
    }
    impl Drop for BatchGuard {
        fn drop(&mut self) {
            with_runtime(|rt| rt.end_batch());
        }
    }

    let _guard = BatchGuard::enter();
    f()
}

/// Drains the effect queue synchronously, ancestor-first (§4.5). A no-op
/// while a flush triggered by the scheduler is already running.
pub fn flush_sync() {
    with_runtime(|rt| rt.flush_sync());
}

/// Abstracts over "run this after the current synchronous work" (§4.5
/// ADDED, §9 "cooperative microtask") so the propagation engine doesn't
/// hard-code a single executor. [`dispatch_flush`] calls the globally
/// configured scheduler, if any, falling back to an immediate synchronous
/// flush (appropriate for tests and simple CLI hosts).
pub trait EffectScheduler {
    fn schedule(&self, flush: Box<dyn FnOnce()>);
}

/// The default scheduler: runs the flush immediately, inline.
pub struct SyncScheduler;

impl EffectScheduler for SyncScheduler {
    fn schedule(&self, flush: Box<dyn FnOnce()>) {
        flush();
    }
}

thread_local! {
    static SCHEDULER: RefCell<Option<Rc<dyn EffectScheduler>>> = const { RefCell::new(None) };
}

/// Installs a global [`EffectScheduler`], used by every subsequent flush
/// trigger on this thread. Leaving this unset is equivalent to installing
/// [`SyncScheduler`].
pub fn set_scheduler(scheduler: impl EffectScheduler + 'static) {
    SCHEDULER.with(|s| *s.borrow_mut() = Some(Rc::new(scheduler)));
}

pub(crate) fn dispatch_flush() {
    let scheduler = SCHEDULER.with(|s| s.borrow().clone());
    match scheduler {
        Some(s) => s.schedule(Box::new(flush_sync)),
        None => flush_sync(),
    }
}

/// Schedules the flush as a `tokio::task::spawn_local` task on the current
/// `LocalSet`, rather than running it inline — exercised by integration
/// tests that want to observe effects settling only after an `.await`,
/// matching how a real UI host defers work to the next microtask instead
/// of running it on the writer's call stack.
#[cfg(feature = "tokio-scheduler")]
pub struct TokioScheduler;

#[cfg(feature = "tokio-scheduler")]
impl EffectScheduler for TokioScheduler {
    fn schedule(&self, flush: Box<dyn FnOnce()>) {
        tokio::task::spawn_local(async move { flush() });
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::owner::{create_root, on_dispose};
    use crate::signal::create_signal;
    use std::cell::RefCell;
    use std::rc::Rc;

    #[test]
    fn nested_effect_recreated_on_outer_rerun() {
        let (_, owner) = create_root(|| {
            let (x, set_x) = create_signal(0);
            let (y, set_y) = create_signal(0);
            let inner_runs = Rc::new(RefCell::new(0));
            let disposals = Rc::new(RefCell::new(0));

            {
                let inner_runs = Rc::clone(&inner_runs);
                let disposals = Rc::clone(&disposals);
                create_effect(move |_: Option<&()>| {
                    let _ = x.read();
                    let inner_runs = Rc::clone(&inner_runs);
                    let disposals = Rc::clone(&disposals);
                    on_dispose(move || *disposals.borrow_mut() += 1);
                    create_effect(move |_: Option<&()>| {
                        let _ = y.read();
                        *inner_runs.borrow_mut() += 1;
                    });
                });
            }

            assert_eq!(*inner_runs.borrow(), 1);
            assert_eq!(*disposals.borrow(), 0);

            set_y.write(1);
            flush_sync();
            assert_eq!(*inner_runs.borrow(), 2);
            assert_eq!(*disposals.borrow(), 0);

            set_x.write(1);
            flush_sync();
            assert_eq!(*disposals.borrow(), 1);
            assert_eq!(*inner_runs.borrow(), 3);

            (inner_runs, disposals)
        });
        owner.dispose();
    }

    #[test]
    fn batch_coalesces_multiple_writes_into_one_run() {
        let (runs, _owner) = create_root(|| {
            let (x, set_x) = create_signal(0);
            let (y, set_y) = create_signal(0);
            let runs = Rc::new(RefCell::new(0));
            {
                let runs = Rc::clone(&runs);
                create_effect(move |_: Option<&()>| {
                    let _ = x.read() + y.read();
                    *runs.borrow_mut() += 1;
                });
            }
            batch(|| {
                set_x.write(1);
                set_y.write(1);
            });
            flush_sync();
            runs
        });
        assert_eq!(*runs.borrow(), 2); // initial run + one coalesced rerun
    }
}
