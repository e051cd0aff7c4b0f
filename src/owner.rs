use std::any::{Any, TypeId};
use std::cell::{Cell, RefCell};
use std::rc::Rc;

use rustc_hash::FxHashMap;
use slotmap::new_key_type;

use crate::node::NodeId;
use crate::runtime::with_runtime;

new_key_type! {
    /// A key into the owner arena (§4.1). Never interchangeable with a
    /// [`NodeId`] — the owner tree is a separate structure from the
    /// reactive graph, used only for lifetime and context containment.
    pub struct OwnerId;
}

pub(crate) struct OwnerNode {
    pub parent: Option<OwnerId>,
    pub children: Vec<OwnerId>,
    /// Registered via `on_dispose`; run in reverse order on disposal.
    pub cleanups: Vec<Box<dyn FnOnce()>>,
    pub contexts: RefCell<FxHashMap<TypeId, Rc<dyn Any>>>,
    /// Nodes whose lifetime is tied to this owner, disposed alongside it.
    pub owned_nodes: Vec<NodeId>,
    /// Set when this owner is a derived/effect node's private compute scope
    /// (the owner that node's nested cells are children of). Used to find
    /// the ancestor-effect chain for flush ordering (§4.5).
    pub originating_node: Option<NodeId>,
}

impl OwnerNode {
    fn new(parent: Option<OwnerId>) -> Self {
        Self {
            parent,
            children: Vec::new(),
            cleanups: Vec::new(),
            contexts: RefCell::new(FxHashMap::default()),
            owned_nodes: Vec::new(),
            originating_node: None,
        }
    }
}

thread_local! {
    static CURRENT_OWNER: Cell<Option<OwnerId>> = const { Cell::new(None) };
}

pub(crate) fn current_owner() -> Option<OwnerId> {
    CURRENT_OWNER.with(|o| o.get())
}

pub(crate) fn set_current_owner(owner: Option<OwnerId>) -> Option<OwnerId> {
    CURRENT_OWNER.with(|o| o.replace(owner))
}

/// RAII guard that restores the previous current-owner on drop, even on
/// unwinding — the idiomatic replacement for the reference crate's
/// save/restore-on-exit discipline (§9 "ambient implicit state").
pub(crate) struct OwnerGuard(Option<OwnerId>);

impl OwnerGuard {
    pub(crate) fn enter(new: Option<OwnerId>) -> Self {
        OwnerGuard(set_current_owner(new))
    }
}

impl Drop for OwnerGuard {
    fn drop(&mut self) {
        set_current_owner(self.0);
    }
}

/// A detached owner handle returned by [`create_root`]. Dropping it does
/// *not* dispose the owner — call [`Owner::dispose`] explicitly, mirroring
/// the reference crate's `ScopeDisposer`.
#[derive(Copy, Clone, Debug, PartialEq, Eq)]
pub struct Owner(pub(crate) OwnerId);

impl Owner {
    /// Creates a new owner as a child of the current owner (or detached, if
    /// there is none).
    pub(crate) fn new_child() -> Owner {
        let parent = current_owner();
        let id = with_runtime(|rt| rt.owners.borrow_mut().insert(OwnerNode::new(parent)));
        if let Some(parent) = parent {
            with_runtime(|rt| rt.owners.borrow_mut()[parent].children.push(id));
        }
        Owner(id)
    }

    /// Disposes this owner: children first (depth-first), then this
    /// owner's own cleanups in reverse registration order, then detaches
    /// its owned nodes from the reactive graph.
    pub fn dispose(self) {
        with_runtime(|rt| rt.dispose_owner(self.0));
    }
}

/// Creates the private compute scope for a derived/effect node: a child
/// owner of `parent`, tagged with `origin` so the effect-flush ancestor
/// walk (§4.5) can map an owner back to the node that created it.
pub(crate) fn new_compute_scope(parent: Option<OwnerId>, origin: NodeId) -> OwnerId {
    with_runtime(|rt| {
        let mut node = OwnerNode::new(parent);
        node.originating_node = Some(origin);
        let id = rt.owners.borrow_mut().insert(node);
        if let Some(parent) = parent {
            if let Some(p) = rt.owners.borrow_mut().get_mut(parent) {
                p.children.push(id);
            }
        }
        id
    })
}

/// Creates a fresh, detached owner and runs `f` with it current, returning
/// whatever `f` returns alongside a handle that can later dispose the
/// whole subtree (§6 `createRoot`).
pub fn create_root<T>(f: impl FnOnce() -> T) -> (T, Owner) {
    let owner = Owner::new_child();
    let guard = OwnerGuard::enter(Some(owner.0));
    let value = f();
    drop(guard);
    (value, owner)
}

/// Runs `f` with `owner` set as the current owner, restoring the previous
/// owner afterward even if `f` panics (§6 `withOwner`).
pub fn with_owner<T>(owner: Owner, f: impl FnOnce() -> T) -> T {
    let _guard = OwnerGuard::enter(Some(owner.0));
    f()
}

/// Registers `cb` to run when the current owner is disposed. Fails
/// silently (per spec) when there is no current owner.
pub fn on_dispose(cb: impl FnOnce() + 'static) {
    let Some(owner) = current_owner() else {
        #[cfg(feature = "tracing")]
        tracing::debug!("on_dispose called outside any owner; ignored");
        return;
    };
    with_runtime(|rt| {
        rt.owners.borrow_mut()[owner].cleanups.push(Box::new(cb));
    });
}

/// Runs `f` with the current dependency-tracking observer cleared (the
/// owner is retained), so reads inside `f` are not recorded as dependencies
/// of the enclosing compute (§4.2 ADDED).
pub fn untrack<T>(f: impl FnOnce() -> T) -> T {
    with_runtime(|rt| rt.untrack(f))
}

/// Provides a context value of type `T` to the current owner and all of its
/// descendants (§4.1 ADDED).
#[track_caller]
pub fn provide_context<T: 'static>(value: T) {
    let Some(owner) = current_owner() else {
        #[cfg(feature = "tracing")]
        tracing::warn!(
            at = %std::panic::Location::caller(),
            "provide_context called outside the reactive system"
        );
        return;
    };
    with_runtime(|rt| {
        rt.owners.borrow_mut()[owner]
            .contexts
            .borrow_mut()
            .insert(TypeId::of::<T>(), Rc::new(value) as Rc<dyn Any>);
    });
}

/// Walks the owner chain from the current owner upward, returning the
/// nearest provided value of type `T`, if any (§4.1 `lookup`).
pub fn use_context<T: Clone + 'static>() -> Option<T> {
    let owner = current_owner()?;
    with_runtime(|rt| rt.lookup::<T>(owner))
}

pub fn expect_context<T: Clone + 'static>() -> T {
    use_context().unwrap_or_else(|| {
        panic!(
            "context of type {} to be present",
            std::any::type_name::<T>()
        )
    })
}

/// An error handler installed via [`catch_error`], looked up the same way
/// as any other context value (§4.1 `handleError`).
#[derive(Clone)]
pub(crate) struct ErrorHandler(pub Rc<dyn Fn(Rc<dyn std::error::Error>)>);

/// Installs `handler` in a fresh child owner and runs `f` within it; errors
/// raised by effects created inside `f` are routed to `handler` (§6
/// `catchError`, §4.1 `handleError`).
pub fn catch_error<T>(
    f: impl FnOnce() -> T,
    handler: impl Fn(Rc<dyn std::error::Error>) + 'static,
) -> T {
    let (value, _owner) = create_root(|| {
        provide_context(ErrorHandler(Rc::new(handler)));
        f()
    });
    value
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn lifo_disposal_order() {
        let order = Rc::new(RefCell::new(Vec::new()));
        let (_, owner) = create_root(|| {
            let order = Rc::clone(&order);
            on_dispose({
                let order = Rc::clone(&order);
                move || order.borrow_mut().push('a')
            });
            on_dispose({
                let order = Rc::clone(&order);
                move || order.borrow_mut().push('b')
            });
            on_dispose(move || order.borrow_mut().push('c'));
        });
        owner.dispose();
        assert_eq!(*order.borrow(), vec!['c', 'b', 'a']);
    }

    #[test]
    fn context_inherits_to_descendants() {
        #[derive(Clone)]
        struct Value(i32);

        let (found, _owner) = create_root(|| {
            provide_context(Value(42));
            let (inner, _inner_owner) = create_root(|| use_context::<Value>().map(|v| v.0));
            inner
        });
        assert_eq!(found, Some(42));
    }
}
