//! Derived, memoized cells (§3, §4.3). A memo's `compute` reruns only when
//! [`Runtime::update_if_necessary`](crate::runtime) finds a dirty source,
//! and its own observers are notified only when the result changes —
//! exactly the "only renotify on change" half of the propagation engine
//! that a plain derived closure (re-evaluated on every read of its inputs)
//! doesn't get for free.
//!
//! ```
//! use fine_reactive::*;
//!
//! create_root(|| {
//!     let (value, set_value) = create_signal(2);
//!     let doubled = create_memo(move |_| value.read() * 2);
//!     assert_eq!(doubled.read(), 4);
//!     set_value.write(3);
//!     assert_eq!(doubled.read(), 6);
//! });
//! ```

use crate::cell::{internal_create_computed, Cell, CellOptions, Equality};
use crate::error::ReactiveError;
use crate::node::ComputeResult;

/// A read-only view over a derived cell. Unlike [`crate::signal::ReadCell`],
/// there is no corresponding write half: a memo's value channel is owned
/// entirely by its `compute`.
pub struct Memo<T> {
    inner: Cell<T>,
}

impl<T> Clone for Memo<T> {
    fn clone(&self) -> Self {
        *self
    }
}
impl<T> Copy for Memo<T> {}

impl<T: Clone + 'static> Memo<T> {
    pub fn read(&self) -> T {
        self.inner.read()
    }

    pub fn try_read(&self) -> Result<T, ReactiveError> {
        self.inner.try_read()
    }

    pub fn wait(&self) -> Result<T, crate::cell::NotReady> {
        self.inner.wait()
    }

    pub fn loading(&self) -> bool {
        self.inner.loading()
    }

    pub fn error(&self) -> bool {
        self.inner.error()
    }
}

/// `create_memo(compute)` (§6): the common case, a pure synchronous
/// derivation. For a memo whose compute needs to short-circuit on a
/// loading source (`wait()`) or return a pending future, use
/// [`create_memo_try`].
pub fn create_memo<T, F>(f: F) -> Memo<T>
where
    T: PartialEq + Clone + 'static,
    F: Fn(Option<&T>) -> T + 'static,
{
    create_memo_try(move |prev| ComputeResult::Ready(f(prev)))
}

/// As [`create_memo`], with an explicit equality predicate.
pub fn create_memo_with_equals<T, F>(f: F, equals: Equality<T>) -> Memo<T>
where
    T: PartialEq + Clone + 'static,
    F: Fn(Option<&T>) -> T + 'static,
{
    create_memo_try_with_options(move |prev| ComputeResult::Ready(f(prev)), CellOptions { equals, name: None })
}

/// The general form: `compute` returns a [`ComputeResult`] directly, so it
/// can use `wait()` (returning `NotReady`), return a pending future
/// (`Pending`), or raise (`Err`) — the full generality §4.2/§4.3 describe
/// for any derived cell, not just the common synchronous case.
pub fn create_memo_try<T, F>(f: F) -> Memo<T>
where
    T: PartialEq + Clone + 'static,
    F: Fn(Option<&T>) -> ComputeResult<T> + 'static,
{
    create_memo_try_with_options(f, CellOptions::default())
}

pub fn create_memo_try_with_options<T, F>(f: F, opts: CellOptions<T>) -> Memo<T>
where
    T: PartialEq + Clone + 'static,
    F: Fn(Option<&T>) -> ComputeResult<T> + 'static,
{
    Memo {
        inner: internal_create_computed(f, opts, false),
    }
}

#[cfg(feature = "nightly")]
impl<T: Clone + 'static> FnOnce<()> for Memo<T> {
    type Output = T;
    extern "rust-call" fn call_once(self, _args: ()) -> T {
        self.read()
    }
}
#[cfg(feature = "nightly")]
impl<T: Clone + 'static> FnMut<()> for Memo<T> {
    extern "rust-call" fn call_mut(&mut self, _args: ()) -> T {
        self.read()
    }
}
#[cfg(feature = "nightly")]
impl<T: Clone + 'static> Fn<()> for Memo<T> {
    extern "rust-call" fn call(&self, _args: ()) -> T {
        self.read()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::effect::{create_effect, flush_sync};
    use crate::owner::create_root;
    use crate::signal::create_signal;
    use std::cell::RefCell;
    use std::rc::Rc;

    #[test]
    fn diamond_memo_runs_effect_once_per_change() {
        let (runs, _owner) = create_root(|| {
            let (x, set_x) = create_signal(10);
            let (y, set_y) = create_signal(10);
            let a = create_memo(move |_| x.read() + y.read());
            let b = create_memo(move |_| a.read());
            let seen = Rc::new(RefCell::new(Vec::new()));
            {
                let seen = Rc::clone(&seen);
                create_effect(move |_: Option<&()>| {
                    seen.borrow_mut().push(b.read());
                });
            }

            set_x.write(20);
            flush_sync();
            set_y.write(20);
            flush_sync();
            set_x.write(20);
            set_y.write(20);
            flush_sync();

            seen.borrow().clone()
        });
        assert_eq!(runs, vec![20, 30, 40]);
    }

    #[test]
    fn memo_only_reruns_when_source_changes() {
        let (eval_count, _owner) = create_root(|| {
            let (x, set_x) = create_signal(1);
            let count = Rc::new(RefCell::new(0));
            let m = {
                let count = Rc::clone(&count);
                create_memo(move |_| {
                    *count.borrow_mut() += 1;
                    x.read() * 2
                })
            };
            assert_eq!(m.read(), 2);
            assert_eq!(m.read(), 2);
            set_x.write(1); // equals(1,1) -> no change
            assert_eq!(m.read(), 2);
            set_x.write(5);
            assert_eq!(m.read(), 10);
            count
        });
        assert_eq!(*eval_count.borrow(), 2);
    }
}
