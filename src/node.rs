use std::any::Any;
use std::cell::RefCell;
use std::fmt;
use std::rc::Rc;

use slotmap::new_key_type;

use crate::owner::OwnerId;

new_key_type! {
    /// A key into the reactive graph's node arena. Distinct from [`OwnerId`] by
    /// construction, so a stale key from one arena can never alias a live slot
    /// in the other.
    pub struct NodeId;
}

/// A boxed future that resolves to `T`. Never `Send`: the whole runtime is
/// thread-confined (see module docs on [`crate::runtime`]).
pub type PinnedFuture<T> = std::pin::Pin<Box<dyn std::future::Future<Output = T>>>;

#[derive(Copy, Clone, Debug, PartialEq, Eq)]
pub(crate) enum NodeState {
    Clean,
    Check,
    Dirty,
}

/// `stateFlags` from the data model: independent booleans layered on top of
/// `NodeState`, tracking the loading/error projections (§3, §4.4).
#[derive(Copy, Clone, Debug, Default)]
pub(crate) struct NodeFlags {
    pub error: bool,
    pub waiting: bool,
    pub r#async: bool,
}

impl NodeFlags {
    pub fn is_loading(&self) -> bool {
        self.r#async || self.waiting
    }
}

/// Result of running a node's `compute`. Distinct from a bare `T` return so
/// that async computations, the `NotReady` sentinel (§4.2), and user-raised
/// errors can all be expressed without panics.
pub enum ComputeResult<T> {
    Ready(T),
    Pending(PinnedFuture<T>),
    NotReady,
    Err(Rc<dyn std::error::Error>),
}

/// What happened when a node's compute was (re)run. Consumed by
/// [`crate::runtime::Runtime::update`].
pub(crate) enum RunOutcome {
    Settled { changed: bool, errored: bool },
    Pending,
    NotReady,
}

/// Type-erased compute attached to a derived or effect node. Implemented
/// generically by [`Computation`] below; the runtime only ever sees this
/// trait object, never the concrete `T`.
pub(crate) trait AnyComputation {
    fn run(&self, node: NodeId, value: &Rc<RefCell<dyn Any>>) -> RunOutcome;
    fn is_effect(&self) -> bool;
}

/// Erased equality check used by [`crate::runtime::Runtime::write_leaf`] and
/// the loading/error channels: compares two `&dyn Any`, each known (by
/// construction) to downcast to `Option<T>` for the same concrete `T`. A
/// never-equals cell always returns `false`, i.e. "always notify".
pub(crate) type ErasedEquals = Rc<dyn Fn(&dyn Any, &dyn Any) -> bool>;

pub(crate) fn equals_by<T: PartialEq + 'static>() -> ErasedEquals {
    Rc::new(|a: &dyn Any, b: &dyn Any| {
        match (a.downcast_ref::<Option<T>>(), b.downcast_ref::<Option<T>>()) {
            (Some(a), Some(b)) => a == b,
            _ => false,
        }
    })
}

pub(crate) fn never_equals() -> ErasedEquals {
    Rc::new(|_, _| false)
}

pub(crate) struct ReactiveNode {
    /// `Option<T>`, erased. `None` only before a compute's first run.
    pub value: Rc<RefCell<dyn Any>>,
    pub equals: ErasedEquals,
    pub state: NodeState,
    pub flags: NodeFlags,
    pub kind: NodeKind,
    /// The cell's own side channels (§4.4), allocated on first subscription.
    pub loading_node: Option<NodeId>,
    pub error_node: Option<NodeId>,
    /// Stored error payload when `flags.error` is set (§7). The typed value
    /// slot is left untouched so the last-good value survives recovery.
    pub error: Option<Rc<dyn std::error::Error>>,
    /// Incremented every time a new future supersedes a previous one, so a
    /// resolving stale future can recognize it's stale (§4.3 `pendingFuture`).
    pub pending_epoch: u64,
    /// The owner this node's lifetime is tied to, so disposing the owner can
    /// find and tear down the node.
    pub owner: Option<OwnerId>,
    /// A derived/effect node's own private owner, parenting whatever cells
    /// and cleanups its compute creates. Soft-reset (not recreated) before
    /// each rerun. `None` for leaves and channels.
    pub compute_scope: Option<OwnerId>,
    pub name: Option<&'static str>,
}

pub(crate) enum NodeKind {
    /// A plain signal: no compute, written directly.
    Leaf,
    /// A derived cell (memo-like): recomputed lazily on pull-validation.
    Derived(Rc<dyn AnyComputation>),
    /// An effect: eagerly enqueued on dirty, no observers of its own.
    Effect(Rc<dyn AnyComputation>),
    /// A `loadingNode`/`errorNode` side channel (§4.4): a leaf of `bool`
    /// with no compute of its own, carrying the `NodeId` of the cell it
    /// projects. Pull-validating a channel first pull-validates its origin
    /// (§4.4/§4.3), so a consumer that only ever reads `loading()`/`error()`
    /// still forces the recompute that can flip the projected bit.
    Channel(NodeId),
}

impl fmt::Debug for ReactiveNode {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("ReactiveNode")
            .field("state", &self.state)
            .field("name", &self.name)
            .finish()
    }
}

/// The concrete, generic compute behind a derived/effect node. Holds the
/// user closure and the node's equality predicate; implements
/// [`AnyComputation`] by downcasting the erased value slot back to
/// `Option<T>` for the duration of the call.
pub(crate) struct Computation<T, F> {
    pub f: F,
    pub equals: Rc<dyn Fn(&T, &T) -> bool>,
    pub effect: bool,
    _ty: std::marker::PhantomData<T>,
}

impl<T, F> Computation<T, F> {
    pub fn new(f: F, equals: Rc<dyn Fn(&T, &T) -> bool>, effect: bool) -> Self {
        Self {
            f,
            equals,
            effect,
            _ty: std::marker::PhantomData,
        }
    }
}

impl<T, F> AnyComputation for Computation<T, F>
where
    T: 'static,
    F: Fn(Option<&T>) -> ComputeResult<T> + 'static,
{
    fn run(&self, node: NodeId, value: &Rc<RefCell<dyn Any>>) -> RunOutcome {
        let outcome = {
            let borrowed = value.borrow();
            let prev = borrowed
                .downcast_ref::<Option<T>>()
                .expect("cell value type mismatch")
                .as_ref();
            (self.f)(prev)
        };

        match outcome {
            ComputeResult::Ready(new_val) => {
                let mut borrowed = value.borrow_mut();
                let slot = borrowed.downcast_mut::<Option<T>>().unwrap();
                let changed = match slot.as_ref() {
                    Some(old) => !(self.equals)(old, &new_val),
                    None => true,
                };
                *slot = Some(new_val);
                RunOutcome::Settled {
                    changed,
                    errored: false,
                }
            }
            ComputeResult::Err(e) => {
                #[cfg(feature = "tracing")]
                tracing::debug!(error = %e, "compute raised an error");
                if self.effect {
                    crate::runtime::with_runtime(|rt| rt.handle_error(node, e));
                } else {
                    crate::runtime::with_runtime(|rt| rt.set_error(node, Some(e)));
                }
                RunOutcome::Settled {
                    changed: true,
                    errored: true,
                }
            }
            ComputeResult::NotReady => RunOutcome::NotReady,
            ComputeResult::Pending(fut) => {
                let epoch = crate::runtime::with_runtime(|rt| rt.begin_async(node));
                let value = Rc::clone(value);
                let equals = Rc::clone(&self.equals);
                crate::executor::spawn_local(Box::pin(async move {
                    let resolved = fut.await;
                    crate::runtime::with_runtime(|rt| {
                        rt.complete_async(
                            node,
                            epoch,
                            Box::new(move |slot: &mut dyn Any| {
                                let slot = slot
                                    .downcast_mut::<Option<T>>()
                                    .expect("cell value type mismatch");
                                let changed = match slot.as_ref() {
                                    Some(old) => !equals(old, &resolved),
                                    None => true,
                                };
                                *slot = Some(resolved);
                                changed
                            }),
                        )
                    });
                }));
                RunOutcome::Pending
            }
        }
    }

    fn is_effect(&self) -> bool {
        self.effect
    }
}
