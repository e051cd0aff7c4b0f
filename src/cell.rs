//! The uniform reactive node handle (§3 `Cell`) and its low-level
//! constructor. [`crate::signal`], [`crate::memo`] and [`crate::effect`]
//! are thin, typed sugar layered on top of what's here.

use std::marker::PhantomData;
use std::rc::Rc;

use crate::error::ReactiveError;
use crate::node::{self, ComputeResult, Computation, ErasedEquals, NodeId};
use crate::runtime::with_runtime;

/// The internal sentinel raised by [`Cell::wait`] on a loading source
/// (§4.2, §7 `NotReady`). Never escapes a `compute` closure: a caller that
/// gets `Err(NotReady)` is expected to return [`ComputeResult::NotReady`]
/// from its own compute, which the engine absorbs, keeping the previous
/// value (§4.3).
#[derive(Debug, Clone, Copy)]
pub struct NotReady;

/// How a newly created cell decides whether a fresh value counts as a
/// change (§3 `equals`). `Default` uses `PartialEq`; `Never` always
/// notifies, mirroring the reference crate's `equals: false` escape hatch.
pub enum Equality<T> {
    Default,
    Custom(Rc<dyn Fn(&T, &T) -> bool>),
    Never,
}

impl<T> Clone for Equality<T> {
    fn clone(&self) -> Self {
        match self {
            Equality::Default => Equality::Default,
            Equality::Custom(f) => Equality::Custom(Rc::clone(f)),
            Equality::Never => Equality::Never,
        }
    }
}

impl<T> Default for Equality<T> {
    fn default() -> Self {
        Equality::Default
    }
}

/// Options accepted by [`create_cell`] (§6 `opts`).
pub struct CellOptions<T> {
    pub equals: Equality<T>,
    pub name: Option<&'static str>,
}

impl<T> Default for CellOptions<T> {
    fn default() -> Self {
        Self {
            equals: Equality::Default,
            name: None,
        }
    }
}

fn resolve_equals<T: PartialEq + 'static>(equality: &Equality<T>) -> ErasedEquals {
    match equality {
        Equality::Default => node::equals_by::<T>(),
        Equality::Never => node::never_equals(),
        Equality::Custom(f) => {
            let f = Rc::clone(f);
            Rc::new(move |a: &dyn std::any::Any, b: &dyn std::any::Any| {
                match (a.downcast_ref::<Option<T>>(), b.downcast_ref::<Option<T>>()) {
                    (Some(Some(a)), Some(Some(b))) => f(a, b),
                    (Some(None), Some(None)) => true,
                    _ => false,
                }
            })
        }
    }
}

fn resolve_typed_equals<T: PartialEq + 'static>(equality: &Equality<T>) -> Rc<dyn Fn(&T, &T) -> bool> {
    match equality {
        Equality::Default => Rc::new(|a: &T, b: &T| a == b),
        Equality::Never => Rc::new(|_: &T, _: &T| false),
        Equality::Custom(f) => Rc::clone(f),
    }
}

/// A handle into the reactive graph (§3). `Cell<T>` is the single node type
/// underlying leaf signals, memos and effects; [`crate::signal::ReadCell`]/
/// [`crate::signal::WriteCell`]/[`crate::memo::Memo`] are typed views over
/// one that restrict which operations are exposed.
///
/// Cheap to copy: a `Cell<T>` is just a key into the thread-local runtime's
/// node arena (§5), not the value itself.
pub struct Cell<T> {
    pub(crate) id: NodeId,
    pub(crate) _ty: PhantomData<fn() -> T>,
}

impl<T> Cell<T> {
    pub(crate) fn from_id(id: NodeId) -> Self {
        Self {
            id,
            _ty: PhantomData,
        }
    }
}

impl<T> Clone for Cell<T> {
    fn clone(&self) -> Self {
        *self
    }
}
impl<T> Copy for Cell<T> {}

impl<T> std::fmt::Debug for Cell<T> {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Cell").field("id", &self.id).finish()
    }
}

impl<T> PartialEq for Cell<T> {
    fn eq(&self, other: &Self) -> bool {
        self.id == other.id
    }
}
impl<T> Eq for Cell<T> {}

impl<T: Clone + 'static> Cell<T> {
    /// `read()` (§4.2): validates, records a dependency on the enclosing
    /// compute (if any), and returns the current value — or propagates
    /// disposal/error as a `Result` rather than panicking.
    pub fn try_read(&self) -> Result<T, ReactiveError> {
        with_runtime(|rt| {
            rt.update_if_necessary(self.id)?;
            rt.track(self.id);
            if rt.is_error(self.id) {
                let err = rt.stored_error(self.id).expect("ERROR flag set without a payload");
                return Err(ReactiveError::Compute(err));
            }
            rt.clone_value::<T>(self.id).ok_or(ReactiveError::Disposed)
        })
    }

    /// As [`Cell::try_read`], but panics (with the stored error, if any) on
    /// failure — the idiomatic stand-in for the reference crate's "`read()`
    /// throws" behavior (§7).
    pub fn read(&self) -> T {
        match self.try_read() {
            Ok(v) => v,
            Err(ReactiveError::Compute(e)) => std::panic::panic_any(e),
            Err(e) => panic!("{e}"),
        }
    }

    /// `wait()` (§4.2): like `read`, but returns `Err(NotReady)` instead of
    /// a value while `self` is loading. Intended to be called from inside a
    /// `compute` closure and matched on directly:
    ///
    /// ```ignore
    /// let v = match source.wait() {
    ///     Ok(v) => v,
    ///     Err(_) => return ComputeResult::NotReady,
    /// };
    /// ```
    pub fn wait(&self) -> Result<T, NotReady> {
        with_runtime(|rt| {
            if rt.update_if_necessary(self.id).is_err() {
                panic!("{}", ReactiveError::Disposed);
            }
            rt.track(self.id);
            if rt.is_loading(self.id) {
                return Err(NotReady);
            }
            if rt.is_error(self.id) {
                let err = rt.stored_error(self.id).expect("ERROR flag set without a payload");
                std::panic::panic_any(err)
            }
            rt.clone_value::<T>(self.id).ok_or(NotReady)
        })
    }

    /// Registers a dependency on the loading channel (§4.4) and returns
    /// whether `self` is currently loading, without touching the value
    /// channel at all.
    pub fn loading(&self) -> bool {
        with_runtime(|rt| {
            let _ = rt.update_if_necessary(self.id);
            let ln = rt.ensure_loading_node(self.id);
            rt.track(ln);
            rt.is_loading(self.id)
        })
    }

    /// Registers a dependency on the error channel (§4.4) and returns
    /// whether `self`'s last compute raised, without throwing.
    pub fn error(&self) -> bool {
        with_runtime(|rt| {
            let _ = rt.update_if_necessary(self.id);
            let en = rt.ensure_error_node(self.id);
            rt.track(en);
            rt.is_error(self.id)
        })
    }
}

impl<T: 'static> Cell<T> {
    /// `write(v)` (§4.3). Only meaningful on leaf cells; writing to a
    /// derived/effect cell directly is undefined per §4.6 and is not
    /// prevented here, only not re-exposed by [`crate::memo::Memo`].
    pub fn try_write(&self, value: T) -> Result<(), ReactiveError> {
        with_runtime(|rt| rt.write_leaf(self.id, Box::new(Some(value))))
    }

    pub fn write(&self, value: T) {
        self.try_write(value).unwrap_or_else(|e| panic!("{e}"));
    }

    /// Mutates the current value in place via `f`, then unconditionally
    /// notifies observers (there's no previous copy left to run `equals`
    /// against once the caller holds a live `&mut T`).
    pub fn update(&self, f: impl FnOnce(&mut T)) {
        let _ = with_runtime(|rt| rt.update_leaf(self.id, f));
    }
}

/// `create_cell(initial, compute?, opts?)` (§6): the low-level constructor
/// behind every typed cell in this crate. `initial` seeds a leaf cell (no
/// `compute`); `compute` makes it a derived cell, lazily evaluated on first
/// read (created `DIRTY`, §3 "Lifecycle"). Exactly one of `initial`/
/// `compute` should be `Some`.
pub fn create_cell<T, F>(initial: Option<T>, compute: Option<F>, opts: CellOptions<T>) -> Cell<T>
where
    T: PartialEq + Clone + 'static,
    F: Fn(Option<&T>) -> ComputeResult<T> + 'static,
{
    let equals = resolve_equals(&opts.equals);
    match compute {
        Some(f) => {
            let typed_equals = resolve_typed_equals(&opts.equals);
            let computation: Rc<dyn node::AnyComputation> =
                Rc::new(Computation::new(f, typed_equals, false));
            let id = with_runtime(|rt| rt.insert_computed(computation, equals, false, opts.name));
            Cell::from_id(id)
        }
        None => {
            let value = initial.expect("create_cell: a leaf cell needs an initial value");
            let id = with_runtime(|rt| rt.insert_leaf(Box::new(Some(value)), equals, opts.name));
            Cell::from_id(id)
        }
    }
}

/// Shared by [`crate::memo::create_memo_try`] and
/// [`crate::effect::create_effect_try`]: builds a derived/effect node from
/// a typed compute closure without going through the public `create_cell`
/// (which only ever builds non-effect nodes — `§6` treats `create_effect`
/// as its own entry point with ancestor-first flushing, not a flavor of
/// `create_cell`).
pub(crate) fn internal_create_computed<T, F>(
    compute: F,
    opts: CellOptions<T>,
    effect: bool,
) -> Cell<T>
where
    T: PartialEq + Clone + 'static,
    F: Fn(Option<&T>) -> ComputeResult<T> + 'static,
{
    let equals = resolve_equals(&opts.equals);
    let typed_equals = resolve_typed_equals(&opts.equals);
    let computation: Rc<dyn node::AnyComputation> =
        Rc::new(Computation::new(compute, typed_equals, effect));
    let id = with_runtime(|rt| rt.insert_computed(computation, equals, effect, opts.name));
    Cell::from_id(id)
}
