//! Leaf signals: the plain read/write cells at the bottom of the graph,
//! split into a read half and a write half for ergonomics (§6 ADDED —
//! layered directly on [`Cell<T>`], not a separate kind of node).
//!
//! ```
//! use fine_reactive::*;
//!
//! create_root(|| {
//!     let (count, set_count) = create_signal(0);
//!     assert_eq!(count.read(), 0);
//!     set_count.write(1);
//!     assert_eq!(count.read(), 1);
//!     set_count.update(|n| *n += 1);
//!     assert_eq!(count.read(), 2);
//! });
//! ```

use std::marker::PhantomData;

use crate::cell::{Cell, CellOptions, Equality};
use crate::error::ReactiveError;
use crate::node::ComputeResult;

/// The read half of a signal, returned by [`create_signal`]. Exposes every
/// `Cell` read variant (§4.2) but not `write`.
pub struct ReadCell<T> {
    inner: Cell<T>,
}

impl<T> Clone for ReadCell<T> {
    fn clone(&self) -> Self {
        *self
    }
}
impl<T> Copy for ReadCell<T> {}

impl<T: Clone + 'static> ReadCell<T> {
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

    /// Reads the current value without registering a dependency (§4.2
    /// `untrack`, specialized to a single read).
    pub fn read_untracked(&self) -> T {
        crate::owner::untrack(|| self.inner.read())
    }
}

/// The write half of a signal, returned by [`create_signal`]. Exposes
/// `write`/`update` but none of the read variants — a consumer holding only
/// a `WriteCell` can't accidentally create a dependency on its own signal.
pub struct WriteCell<T> {
    inner: Cell<T>,
}

impl<T> Clone for WriteCell<T> {
    fn clone(&self) -> Self {
        *self
    }
}
impl<T> Copy for WriteCell<T> {}

impl<T: 'static> WriteCell<T> {
    pub fn write(&self, value: T) {
        self.inner.write(value)
    }

    pub fn try_write(&self, value: T) -> Result<(), ReactiveError> {
        self.inner.try_write(value)
    }

    pub fn update(&self, f: impl FnOnce(&mut T)) {
        self.inner.update(f)
    }
}

/// `create_signal(initial)` (§6 ADDED): creates a leaf cell and splits it
/// into a read half and a write half.
pub fn create_signal<T: PartialEq + Clone + 'static>(initial: T) -> (ReadCell<T>, WriteCell<T>) {
    let cell = crate::cell::create_cell(Some(initial), None::<fn(Option<&T>) -> ComputeResult<T>>, CellOptions::default());
    (ReadCell { inner: cell }, WriteCell { inner: cell })
}

/// As [`create_signal`], but with an explicit equality predicate or
/// `Equality::Never` ("always notify", §3).
pub fn create_signal_with_equals<T: PartialEq + Clone + 'static>(
    initial: T,
    equals: Equality<T>,
) -> (ReadCell<T>, WriteCell<T>) {
    let cell = crate::cell::create_cell(
        Some(initial),
        None::<fn(Option<&T>) -> ComputeResult<T>>,
        CellOptions {
            equals,
            name: None,
        },
    );
    (ReadCell { inner: cell }, WriteCell { inner: cell })
}

/// A signal that hasn't been split: carries both read and write
/// capability in one `Copy` handle, mirroring the reference crate's
/// `RwSignal`. Most code should prefer [`create_signal`]'s split pair —
/// `RwSignal` exists for cases (struct fields, loops) where carrying one
/// handle instead of two is more convenient.
pub struct RwSignal<T> {
    inner: Cell<T>,
    _ty: PhantomData<T>,
}

impl<T> Clone for RwSignal<T> {
    fn clone(&self) -> Self {
        *self
    }
}
impl<T> Copy for RwSignal<T> {}

impl<T: Clone + 'static> RwSignal<T> {
    pub fn read(&self) -> T {
        self.inner.read()
    }

    pub fn try_read(&self) -> Result<T, ReactiveError> {
        self.inner.try_read()
    }

    pub fn loading(&self) -> bool {
        self.inner.loading()
    }

    pub fn error(&self) -> bool {
        self.inner.error()
    }
}

impl<T: 'static> RwSignal<T> {
    pub fn write(&self, value: T) {
        self.inner.write(value)
    }

    pub fn update(&self, f: impl FnOnce(&mut T)) {
        self.inner.update(f)
    }
}

impl<T: PartialEq + Clone + 'static> RwSignal<T> {
    /// Splits this handle back into independent read/write halves, e.g. to
    /// hand the write half to a setter callback without also granting read
    /// access.
    pub fn split(&self) -> (ReadCell<T>, WriteCell<T>) {
        (ReadCell { inner: self.inner }, WriteCell { inner: self.inner })
    }
}

pub fn create_rw_signal<T: PartialEq + Clone + 'static>(initial: T) -> RwSignal<T> {
    let cell = crate::cell::create_cell(Some(initial), None::<fn(Option<&T>) -> ComputeResult<T>>, CellOptions::default());
    RwSignal {
        inner: cell,
        _ty: PhantomData,
    }
}

#[cfg(feature = "nightly")]
mod fn_traits {
    use super::*;

    impl<T: Clone + 'static> FnOnce<()> for ReadCell<T> {
        type Output = T;
        extern "rust-call" fn call_once(self, _args: ()) -> T {
            self.read()
        }
    }
    impl<T: Clone + 'static> FnMut<()> for ReadCell<T> {
        extern "rust-call" fn call_mut(&mut self, _args: ()) -> T {
            self.read()
        }
    }
    impl<T: Clone + 'static> Fn<()> for ReadCell<T> {
        extern "rust-call" fn call(&self, _args: ()) -> T {
            self.read()
        }
    }

    impl<T: Clone + 'static> FnOnce<()> for RwSignal<T> {
        type Output = T;
        extern "rust-call" fn call_once(self, _args: ()) -> T {
            self.read()
        }
    }
    impl<T: Clone + 'static> FnMut<()> for RwSignal<T> {
        extern "rust-call" fn call_mut(&mut self, _args: ()) -> T {
            self.read()
        }
    }
    impl<T: Clone + 'static> Fn<()> for RwSignal<T> {
        extern "rust-call" fn call(&self, _args: ()) -> T {
            self.read()
        }
    }

    impl<T: 'static> FnOnce<(T,)> for WriteCell<T> {
        type Output = ();
        extern "rust-call" fn call_once(self, args: (T,)) {
            self.write(args.0)
        }
    }
    impl<T: 'static> FnMut<(T,)> for WriteCell<T> {
        extern "rust-call" fn call_mut(&mut self, args: (T,)) {
            self.write(args.0)
        }
    }
    impl<T: 'static> Fn<(T,)> for WriteCell<T> {
        extern "rust-call" fn call(&self, args: (T,)) {
            self.write(args.0)
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::owner::create_root;

    #[test]
    fn split_signal_reads_and_writes() {
        let ((), _owner) = create_root(|| {
            let (r, w) = create_signal(0);
            assert_eq!(r.read(), 0);
            w.write(5);
            assert_eq!(r.read(), 5);
            w.update(|n| *n *= 2);
            assert_eq!(r.read(), 10);
        });
    }

    #[test]
    fn equals_skip_suppresses_notification() {
        let (triggered, _owner) = create_root(|| {
            let (s, set_s) = create_signal_with_equals(1, Equality::Custom(std::rc::Rc::new(|p: &i32, n: &i32| (p + 1) == *n)));
            let seen = std::rc::Rc::new(std::cell::RefCell::new(Vec::new()));
            {
                let seen = std::rc::Rc::clone(&seen);
                crate::effect::create_effect(move |_: Option<&()>| {
                    seen.borrow_mut().push(s.read());
                });
            }
            set_s.write(11);
            crate::effect::flush_sync();
            set_s.write(12);
            crate::effect::flush_sync();
            set_s.write(13);
            crate::effect::flush_sync();
            seen.borrow().clone()
        });
        assert_eq!(triggered, vec![1, 11, 13]);
    }
}
