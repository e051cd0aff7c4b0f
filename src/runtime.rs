//! The propagation engine (§2 C3) and the node/owner arenas it operates on.
//!
//! There is exactly one [`Runtime`] per thread, created lazily and never
//! shared across threads — the whole reactive graph is `!Send`/`!Sync` by
//! construction (§5), mirroring the reference crate's `thread_local!`-scoped
//! `Runtime`. Unlike the reference crate there is no `RuntimeId` indirection:
//! this core has no SSR/multi-runtime requirement, so the simpler single
//! thread-local slot is used directly.

use std::any::{Any, TypeId};
use std::cell::{Cell, RefCell};
use std::rc::Rc;

use slotmap::{SecondaryMap, SlotMap};

use crate::error::ReactiveError;
use crate::node::{ErasedEquals, NodeId, NodeKind, NodeState, ReactiveNode, RunOutcome};
use crate::owner::{self, ErrorHandler, OwnerId, OwnerNode};

impl NodeState {
    fn rank(self) -> u8 {
        match self {
            NodeState::Clean => 0,
            NodeState::Check => 1,
            NodeState::Dirty => 2,
        }
    }
}

pub(crate) struct Runtime {
    pub(crate) nodes: RefCell<SlotMap<NodeId, ReactiveNode>>,
    pub(crate) owners: RefCell<SlotMap<OwnerId, OwnerNode>>,
    sources: RefCell<SecondaryMap<NodeId, Vec<NodeId>>>,
    observers: RefCell<SecondaryMap<NodeId, Vec<NodeId>>>,
    /// The node currently being (re)computed, i.e. the dependency-tracking
    /// target for any `read()` that happens during its compute.
    observer: Cell<Option<NodeId>>,
    /// Scratch used by the prefix-reuse algorithm (§4.2, §9). `None` means
    /// "no mismatch encountered yet"; `new_sources_index` always advances.
    new_sources: RefCell<Option<Vec<NodeId>>>,
    new_sources_index: Cell<usize>,
    new_loading: Cell<bool>,
    pending_effects: RefCell<Vec<NodeId>>,
    batching: Cell<u32>,
    flushing: Cell<bool>,
}

impl Runtime {
    fn new() -> Self {
        Self {
            nodes: RefCell::new(SlotMap::with_key()),
            owners: RefCell::new(SlotMap::with_key()),
            sources: RefCell::new(SecondaryMap::new()),
            observers: RefCell::new(SecondaryMap::new()),
            observer: Cell::new(None),
            new_sources: RefCell::new(None),
            new_sources_index: Cell::new(0),
            new_loading: Cell::new(false),
            pending_effects: RefCell::new(Vec::new()),
            batching: Cell::new(0),
            flushing: Cell::new(false),
        }
    }
}

thread_local! {
    static RUNTIME: Runtime = Runtime::new();
}

/// Runs `f` with a reference to the thread's runtime.
pub(crate) fn with_runtime<T>(f: impl FnOnce(&Runtime) -> T) -> T {
    RUNTIME.with(f)
}

impl Runtime {
    // -- node creation -----------------------------------------------------

    pub(crate) fn insert_leaf(
        &self,
        initial: Box<dyn Any>,
        equals: ErasedEquals,
        name: Option<&'static str>,
    ) -> NodeId {
        let owner = owner::current_owner();
        let node = ReactiveNode {
            value: Rc::new(RefCell::new(initial)),
            equals,
            state: NodeState::Clean,
            flags: Default::default(),
            kind: NodeKind::Leaf,
            loading_node: None,
            error_node: None,
            error: None,
            pending_epoch: 0,
            owner,
            compute_scope: None,
            name,
        };
        let id = self.nodes.borrow_mut().insert(node);
        self.register_in_owner(id, owner);
        id
    }

    pub(crate) fn insert_computed(
        &self,
        compute: Rc<dyn crate::node::AnyComputation>,
        equals: ErasedEquals,
        effect: bool,
        name: Option<&'static str>,
    ) -> NodeId {
        let owner = owner::current_owner();
        let id = self.nodes.borrow_mut().insert(ReactiveNode {
            value: Rc::new(RefCell::new(Option::<()>::None)),
            equals,
            state: NodeState::Dirty,
            flags: Default::default(),
            kind: if effect {
                NodeKind::Effect(compute)
            } else {
                NodeKind::Derived(compute)
            },
            loading_node: None,
            error_node: None,
            error: None,
            pending_epoch: 0,
            owner,
            compute_scope: None,
            name,
        });
        let scope = owner::new_compute_scope(owner, id);
        if let Some(n) = self.nodes.borrow_mut().get_mut(id) {
            n.compute_scope = Some(scope);
        }
        self.register_in_owner(id, owner);
        id
    }

    /// Leaf `Option<()>` placeholder above is immediately overwritten by the
    /// erased `Option<T>` box the caller actually wants; done this way so
    /// `insert_computed` doesn't need to be generic.
    pub(crate) fn set_initial_value_slot(&self, node: NodeId, value: Box<dyn Any>) {
        if let Some(n) = self.nodes.borrow().get(node) {
            *n.value.borrow_mut() = value;
        }
    }

    fn register_in_owner(&self, node: NodeId, owner: Option<OwnerId>) {
        if let Some(owner) = owner {
            if let Some(o) = self.owners.borrow_mut().get_mut(owner) {
                o.owned_nodes.push(node);
            }
        }
    }

    // -- dependency tracking -------------------------------------------------

    pub(crate) fn current_observer(&self) -> Option<NodeId> {
        self.observer.get()
    }

    pub(crate) fn untrack<T>(&self, f: impl FnOnce() -> T) -> T {
        let saved = self.observer.replace(None);
        let result = f();
        self.observer.set(saved);
        result
    }

    /// Records that the currently-running compute read `source`, using the
    /// prefix-reuse optimization (§4.2, §9): while the observer's existing
    /// `sources[new_sources_index]` still equals `source`, just advance the
    /// index; only on the first mismatch does a fresh vector get allocated.
    pub(crate) fn track(&self, source: NodeId) {
        let Some(observer) = self.observer.get() else {
            return;
        };
        if observer == source {
            #[cfg(feature = "tracing")]
            tracing::warn!("a cell read itself during its own compute; ignoring");
            return;
        }

        if self.new_sources.borrow().is_none() {
            let idx = self.new_sources_index.get();
            let reuse = self
                .sources
                .borrow()
                .get(observer)
                .and_then(|s| s.get(idx))
                .is_some_and(|&existing| existing == source);
            if reuse {
                self.new_sources_index.set(idx + 1);
                if self.new_loading_from(source) {
                    self.new_loading.set(true);
                }
                return;
            }
            let prefix = self
                .sources
                .borrow()
                .get(observer)
                .map(|s| s[..idx].to_vec())
                .unwrap_or_default();
            *self.new_sources.borrow_mut() = Some(prefix);
        }

        let mut new_sources = self.new_sources.borrow_mut();
        let list = new_sources.as_mut().unwrap();
        if list.last() != Some(&source) {
            list.push(source);
        }
        drop(new_sources);
        if self.new_loading_from(source) {
            self.new_loading.set(true);
        }
    }

    fn new_loading_from(&self, source: NodeId) -> bool {
        self.is_loading(source)
    }

    // -- read-side validation ------------------------------------------------

    pub(crate) fn is_loading(&self, node: NodeId) -> bool {
        self.nodes
            .borrow()
            .get(node)
            .map(|n| n.flags.is_loading())
            .unwrap_or(false)
    }

    pub(crate) fn is_error(&self, node: NodeId) -> bool {
        self.nodes
            .borrow()
            .get(node)
            .map(|n| n.flags.error)
            .unwrap_or(false)
    }

    pub(crate) fn stored_error(&self, node: NodeId) -> Option<Rc<dyn std::error::Error>> {
        self.nodes.borrow().get(node).and_then(|n| n.error.clone())
    }

    /// Pull-validation (§4.3 `updateIfNecessary`). Returns whether the node
    /// is currently loading.
    pub(crate) fn update_if_necessary(&self, node: NodeId) -> Result<bool, ReactiveError> {
        let (state, channel_origin) = {
            let nodes = self.nodes.borrow();
            let n = nodes.get(node).ok_or(ReactiveError::Disposed)?;
            let origin = match &n.kind {
                NodeKind::Channel(origin) => Some(*origin),
                _ => None,
            };
            (n.state, origin)
        };
        // A loading/error channel has no sources of its own to walk — its
        // value is only ever written as a side effect of its origin's own
        // pull-validation (`on_loading_transition`/`write_channel`). A
        // consumer that subscribes only through `loading()`/`error()` and
        // never reads the origin directly would otherwise never force that
        // recompute, so pull the origin here before doing anything else
        // (§4.4).
        if let Some(origin) = channel_origin {
            let _ = self.update_if_necessary(origin);
        }
        match state {
            NodeState::Clean => Ok(self.is_loading(node)),
            NodeState::Check => {
                let sources = self
                    .sources
                    .borrow()
                    .get(node)
                    .cloned()
                    .unwrap_or_default();
                let mut any_loading = false;
                for src in sources {
                    any_loading |= self.update_if_necessary(src)?;
                    let promoted = self
                        .nodes
                        .borrow()
                        .get(node)
                        .map(|n| n.state == NodeState::Dirty)
                        .unwrap_or(false);
                    if promoted {
                        break;
                    }
                }
                let still_dirty = self
                    .nodes
                    .borrow()
                    .get(node)
                    .map(|n| n.state == NodeState::Dirty)
                    .unwrap_or(false);
                if still_dirty {
                    self.update(node)?;
                } else {
                    self.set_waiting(node, any_loading);
                    if let Some(n) = self.nodes.borrow_mut().get_mut(node) {
                        n.state = NodeState::Clean;
                    }
                }
                Ok(self.is_loading(node))
            }
            NodeState::Dirty => {
                self.update(node)?;
                Ok(self.is_loading(node))
            }
        }
    }

    /// Rerun (§4.3 `update`): disposes the node's previous compute-scope
    /// children, reruns its compute with fresh prefix-reuse scratch, then
    /// splices the resulting source list and propagates value/loading/error
    /// changes.
    pub(crate) fn update(&self, node: NodeId) -> Result<(), ReactiveError> {
        let (compute, compute_scope) = {
            let nodes = self.nodes.borrow();
            let n = nodes.get(node).ok_or(ReactiveError::Disposed)?;
            let compute = match &n.kind {
                NodeKind::Derived(c) | NodeKind::Effect(c) => Some(Rc::clone(c)),
                NodeKind::Leaf | NodeKind::Channel(_) => None,
            };
            (compute, n.compute_scope)
        };

        let Some(compute) = compute else {
            if let Some(n) = self.nodes.borrow_mut().get_mut(node) {
                n.state = NodeState::Clean;
            }
            return Ok(());
        };

        if let Some(scope) = compute_scope {
            self.reset_owner_for_rerun(scope);
        }

        let saved_sources = self.new_sources.replace(None);
        let saved_index = self.new_sources_index.replace(0);
        let saved_loading = self.new_loading.replace(false);
        let saved_observer = self.observer.replace(Some(node));
        let owner_guard = owner::OwnerGuard::enter(compute_scope);

        let value_cell = Rc::clone(&self.nodes.borrow()[node].value);
        let outcome = compute.run(node, &value_cell);

        drop(owner_guard);
        self.observer.set(saved_observer);
        let new_sources = self.new_sources.replace(saved_sources);
        let new_index = self.new_sources_index.replace(saved_index);
        let new_loading = self.new_loading.replace(saved_loading);

        match outcome {
            RunOutcome::NotReady => {
                if let Some(n) = self.nodes.borrow_mut().get_mut(node) {
                    n.state = NodeState::Clean;
                }
                Ok(())
            }
            RunOutcome::Pending => {
                self.splice_sources(node, new_sources, new_index);
                self.set_waiting(node, new_loading);
                if let Some(n) = self.nodes.borrow_mut().get_mut(node) {
                    n.state = NodeState::Clean;
                }
                Ok(())
            }
            RunOutcome::Settled { changed, errored } => {
                self.splice_sources(node, new_sources, new_index);
                self.settle_loading_flags(node, false, new_loading);
                if !errored {
                    self.clear_error(node);
                }
                if let Some(n) = self.nodes.borrow_mut().get_mut(node) {
                    n.state = NodeState::Clean;
                }
                if changed {
                    self.notify_observers_dirty(node);
                }
                Ok(())
            }
        }
    }

    fn splice_sources(&self, node: NodeId, new_sources: Option<Vec<NodeId>>, new_index: usize) {
        match new_sources {
            Some(new_list) => {
                let old_tail: Vec<NodeId> = self
                    .sources
                    .borrow()
                    .get(node)
                    .and_then(|old| old.get(new_index..))
                    .map(|s| s.to_vec())
                    .unwrap_or_default();
                let added: Vec<NodeId> = new_list
                    .get(new_index..)
                    .map(|s| s.to_vec())
                    .unwrap_or_default();
                for dropped in &old_tail {
                    if !added.contains(dropped) {
                        self.remove_observer(*dropped, node);
                    }
                }
                for added_src in &added {
                    self.add_observer(*added_src, node);
                }
                self.sources.borrow_mut().insert(node, new_list);
            }
            None => {
                let dropped = {
                    let mut sources_map = self.sources.borrow_mut();
                    match sources_map.get_mut(node) {
                        Some(list) if list.len() > new_index => Some(list.split_off(new_index)),
                        _ => None,
                    }
                };
                if let Some(dropped) = dropped {
                    for d in dropped {
                        self.remove_observer(d, node);
                    }
                }
            }
        }
    }

    fn add_observer(&self, source: NodeId, observer: NodeId) {
        self.observers
            .borrow_mut()
            .entry(source)
            .unwrap()
            .or_default()
            .push(observer);
    }

    fn remove_observer(&self, source: NodeId, observer: NodeId) {
        let mut observers = self.observers.borrow_mut();
        if let Some(list) = observers.get_mut(source) {
            if let Some(pos) = list.iter().position(|&o| o == observer) {
                list.swap_remove(pos);
            }
        }
    }

    fn remove_source(&self, observer: NodeId, source: NodeId) {
        let mut sources = self.sources.borrow_mut();
        if let Some(list) = sources.get_mut(observer) {
            if let Some(pos) = list.iter().position(|&s| s == source) {
                list.swap_remove(pos);
            }
        }
    }

    // -- push-marking ---------------------------------------------------------

    /// Push-mark (§4.3 `notify`). No compute is evaluated here.
    pub(crate) fn notify(&self, node: NodeId, state: NodeState) {
        let (should_propagate, became_effect_dirty) = {
            let mut nodes = self.nodes.borrow_mut();
            let Some(n) = nodes.get_mut(node) else {
                return;
            };
            if n.state.rank() >= state.rank() {
                return;
            }
            let was_clean = n.state == NodeState::Clean;
            n.state = state;
            let is_effect = matches!(n.kind, NodeKind::Effect(_));
            (true, is_effect && was_clean)
        };
        if became_effect_dirty {
            self.pending_effects.borrow_mut().push(node);
            self.schedule_flush();
        }
        if !should_propagate {
            return;
        }
        let observers = self.observers.borrow().get(node).cloned().unwrap_or_default();
        for obs in observers {
            self.notify(obs, NodeState::Check);
        }
        let (loading_node, error_node) = {
            let nodes = self.nodes.borrow();
            nodes
                .get(node)
                .map(|n| (n.loading_node, n.error_node))
                .unwrap_or((None, None))
        };
        if let Some(ln) = loading_node {
            self.notify(ln, NodeState::Check);
        }
        if let Some(en) = error_node {
            self.notify(en, NodeState::Check);
        }
    }

    fn notify_observers_dirty(&self, node: NodeId) {
        let observers = self.observers.borrow().get(node).cloned().unwrap_or_default();
        for obs in observers {
            self.notify(obs, NodeState::Dirty);
        }
    }

    fn schedule_flush(&self) {
        if self.batching.get() > 0 {
            return;
        }
        crate::effect::dispatch_flush();
    }

    // -- generic value commit (shared by leaf writes and channel writes) -----

    /// Compares `new_value` (an `Option<T>`, erased) against the node's
    /// current stored `Option<T>` using its equality predicate, replaces it,
    /// and reports whether it changed.
    fn commit_erased(
        &self,
        _node: NodeId,
        value_rc: &Rc<RefCell<dyn Any>>,
        equals: &ErasedEquals,
        new_value: Box<dyn Any>,
    ) -> bool {
        let mut slot = value_rc.borrow_mut();
        let are_equal = equals(slot.as_ref(), new_value.as_ref());
        if !are_equal {
            *slot = new_value;
        }
        !are_equal
    }

    /// Writing inside a compute is undefined (§4.6): in debug builds, warn
    /// when the node currently being computed writes to itself rather than
    /// silently permitting a glitch. Release builds skip the check entirely.
    #[cfg(debug_assertions)]
    fn warn_if_write_during_own_compute(&self, node: NodeId) {
        if self.observer.get() == Some(node) {
            #[cfg(feature = "tracing")]
            tracing::warn!(
                ?node,
                "cell written to from inside its own compute; this is undefined behavior"
            );
            #[cfg(not(feature = "tracing"))]
            let _ = node;
        }
    }

    #[cfg(not(debug_assertions))]
    fn warn_if_write_during_own_compute(&self, _node: NodeId) {}

    /// Writes a plain value into a leaf or channel node, performing the
    /// equals check and (on change) notifying observers. This is the path
    /// used both by `Cell::write` and by the loading/error channel setters.
    pub(crate) fn write_leaf(&self, node: NodeId, value: Box<dyn Any>) -> Result<(), ReactiveError> {
        if !self.nodes.borrow().contains_key(node) {
            return Err(ReactiveError::Disposed);
        }
        self.warn_if_write_during_own_compute(node);
        let (value_rc, equals) = {
            let nodes = self.nodes.borrow();
            let n = &nodes[node];
            (Rc::clone(&n.value), Rc::clone(&n.equals))
        };
        let changed = self.commit_erased(node, &value_rc, &equals, value);
        self.clear_error(node);
        if let Some(n) = self.nodes.borrow_mut().get_mut(node) {
            n.pending_epoch += 1; // supersede any stale future written earlier
            n.flags.r#async = false;
        }
        if changed {
            self.notify_observers_dirty(node);
        }
        Ok(())
    }

    /// Clones the current value out of a node's erased value slot. Returns
    /// `None` if the node is gone or has never produced a value yet (a
    /// derived cell that hasn't completed its first run).
    pub(crate) fn clone_value<T: Clone + 'static>(&self, node: NodeId) -> Option<T> {
        let value_rc = self.nodes.borrow().get(node).map(|n| Rc::clone(&n.value))?;
        let guard = value_rc.borrow();
        guard.downcast_ref::<Option<T>>().cloned().flatten()
    }

    /// Shared tail of any direct mutation of a leaf's value slot: clears a
    /// stale error, supersedes any in-flight future, and dirties observers.
    /// Factored out of [`Runtime::write_leaf`] so in-place mutation (used by
    /// `Cell::update`) gets the same bookkeeping as a full `write`.
    fn commit_leaf_mutation(&self, node: NodeId) {
        self.clear_error(node);
        if let Some(n) = self.nodes.borrow_mut().get_mut(node) {
            n.pending_epoch += 1;
            n.flags.r#async = false;
        }
        self.notify_observers_dirty(node);
    }

    /// Mutates a leaf's value in place and unconditionally notifies
    /// observers — there is no prior value to run `equals` against once the
    /// caller already holds a `&mut T`, so (unlike `write_leaf`) every call
    /// is treated as a change.
    pub(crate) fn update_leaf<T: 'static>(
        &self,
        node: NodeId,
        f: impl FnOnce(&mut T),
    ) -> Result<(), ReactiveError> {
        self.warn_if_write_during_own_compute(node);
        let value_rc = {
            let nodes = self.nodes.borrow();
            let n = nodes.get(node).ok_or(ReactiveError::Disposed)?;
            Rc::clone(&n.value)
        };
        {
            let mut guard = value_rc.borrow_mut();
            let slot = guard
                .downcast_mut::<Option<T>>()
                .expect("cell value type mismatch");
            match slot.as_mut() {
                Some(v) => f(v),
                None => return Err(ReactiveError::Disposed),
            }
        }
        self.commit_leaf_mutation(node);
        Ok(())
    }

    fn write_channel(&self, node: NodeId, value: bool) {
        let Some((value_rc, equals)) = self
            .nodes
            .borrow()
            .get(node)
            .map(|n| (Rc::clone(&n.value), Rc::clone(&n.equals)))
        else {
            return;
        };
        let changed = self.commit_erased(node, &value_rc, &equals, Box::new(Some(value)));
        if changed {
            self.notify_observers_dirty(node);
        }
    }

    // -- loading / error channels (§4.4) --------------------------------------

    pub(crate) fn ensure_loading_node(&self, origin: NodeId) -> NodeId {
        if let Some(id) = self.nodes.borrow().get(origin).and_then(|n| n.loading_node) {
            return id;
        }
        let loading = self.is_loading(origin);
        let id = self.insert_channel(origin, loading);
        if let Some(n) = self.nodes.borrow_mut().get_mut(origin) {
            n.loading_node = Some(id);
        }
        id
    }

    pub(crate) fn ensure_error_node(&self, origin: NodeId) -> NodeId {
        if let Some(id) = self.nodes.borrow().get(origin).and_then(|n| n.error_node) {
            return id;
        }
        let errored = self.is_error(origin);
        let id = self.insert_channel(origin, errored);
        if let Some(n) = self.nodes.borrow_mut().get_mut(origin) {
            n.error_node = Some(id);
        }
        id
    }

    fn insert_channel(&self, origin: NodeId, initial: bool) -> NodeId {
        self.nodes.borrow_mut().insert(ReactiveNode {
            value: Rc::new(RefCell::new(Some(initial))),
            equals: crate::node::equals_by::<bool>(),
            state: NodeState::Clean,
            flags: Default::default(),
            kind: NodeKind::Channel(origin),
            loading_node: None,
            error_node: None,
            error: None,
            pending_epoch: 0,
            owner: None,
            compute_scope: None,
            name: None,
        })
    }

    fn set_waiting(&self, node: NodeId, waiting: bool) {
        let Some((prev_async, prev_waiting)) = self
            .nodes
            .borrow()
            .get(node)
            .map(|n| (n.flags.r#async, n.flags.waiting))
        else {
            return;
        };
        let was_loading = prev_async || prev_waiting;
        if let Some(n) = self.nodes.borrow_mut().get_mut(node) {
            n.flags.waiting = waiting;
        }
        let now_loading = prev_async || waiting;
        if was_loading != now_loading {
            self.on_loading_transition(node, now_loading);
        }
    }

    /// Updates `ASYNC` and `WAITING` together and fires the loading
    /// transition at most once off the combined before/after state. A rerun
    /// that settles a previously-pending compute changes both flags in the
    /// same call; comparing them one at a time (as plain [`Self::set_waiting`]
    /// does) lets the still-stale `async` flag mask the very transition this
    /// is meant to catch.
    fn settle_loading_flags(&self, node: NodeId, new_async: bool, new_waiting: bool) {
        let Some(was_loading) = self.nodes.borrow().get(node).map(|n| n.flags.is_loading()) else {
            return;
        };
        if let Some(n) = self.nodes.borrow_mut().get_mut(node) {
            n.flags.r#async = new_async;
            n.flags.waiting = new_waiting;
        }
        let now_loading = new_async || new_waiting;
        if was_loading != now_loading {
            self.on_loading_transition(node, now_loading);
        }
    }

    fn on_loading_transition(&self, node: NodeId, now_loading: bool) {
        if let Some(ln) = self.nodes.borrow().get(node).and_then(|n| n.loading_node) {
            self.write_channel(ln, now_loading);
        }
        let observers = self.observers.borrow().get(node).cloned().unwrap_or_default();
        for obs in observers {
            if now_loading {
                self.set_waiting(obs, true);
            } else {
                self.notify(obs, NodeState::Check);
            }
        }
    }

    pub(crate) fn begin_async(&self, node: NodeId) -> u64 {
        let Some(was_loading) = self
            .nodes
            .borrow()
            .get(node)
            .map(|n| n.flags.is_loading())
        else {
            return 0;
        };
        let epoch = {
            let mut nodes = self.nodes.borrow_mut();
            let n = &mut nodes[node];
            n.pending_epoch += 1;
            n.flags.r#async = true;
            n.pending_epoch
        };
        if !was_loading {
            self.on_loading_transition(node, true);
        }
        epoch
    }

    pub(crate) fn complete_async(
        &self,
        node: NodeId,
        epoch: u64,
        apply: Box<dyn FnOnce(&mut dyn Any) -> bool>,
    ) {
        let value_rc = {
            let nodes = self.nodes.borrow();
            match nodes.get(node) {
                Some(n) if n.pending_epoch == epoch => Rc::clone(&n.value),
                _ => {
                    #[cfg(feature = "tracing")]
                    tracing::trace!("ignoring stale future resolution");
                    return;
                }
            }
        };
        let changed = apply(&mut *value_rc.borrow_mut());
        let waiting = self.nodes.borrow().get(node).map(|n| n.flags.waiting).unwrap_or(false);
        if let Some(n) = self.nodes.borrow_mut().get_mut(node) {
            n.flags.r#async = false;
        }
        self.clear_error(node);
        if !waiting {
            self.on_loading_transition(node, false);
        }
        if changed {
            self.notify_observers_dirty(node);
        }
    }

    pub(crate) fn set_error(&self, node: NodeId, error: Option<Rc<dyn std::error::Error>>) {
        let Some(was_error) = self.nodes.borrow().get(node).map(|n| n.flags.error) else {
            return;
        };
        let is_error = error.is_some();
        if let Some(n) = self.nodes.borrow_mut().get_mut(node) {
            n.flags.error = is_error;
            n.error = error;
        }
        if was_error != is_error {
            if let Some(en) = self.nodes.borrow().get(node).and_then(|n| n.error_node) {
                self.write_channel(en, is_error);
            }
        }
    }

    fn clear_error(&self, node: NodeId) {
        if self.nodes.borrow().get(node).map(|n| n.flags.error).unwrap_or(false) {
            self.set_error(node, None);
        }
    }

    pub(crate) fn handle_error(&self, node: NodeId, err: Rc<dyn std::error::Error>) {
        let owner = self.nodes.borrow().get(node).and_then(|n| n.owner);
        match owner.and_then(|o| self.lookup::<ErrorHandler>(o)) {
            Some(handler) => (handler.0)(err),
            None => {
                #[cfg(feature = "tracing")]
                tracing::warn!(error = %err, "unhandled effect error reached the top of the owner chain");
                panic!("unhandled reactive effect error: {err}");
            }
        }
    }

    pub(crate) fn lookup<T: Clone + 'static>(&self, owner: OwnerId) -> Option<T> {
        let mut current = Some(owner);
        while let Some(o) = current {
            let owners = self.owners.borrow();
            let node = owners.get(o)?;
            if let Some(v) = node.contexts.borrow().get(&TypeId::of::<T>()) {
                if let Some(v) = v.downcast_ref::<T>() {
                    return Some(v.clone());
                }
            }
            current = node.parent;
        }
        None
    }

    // -- effect queue (§4.5) --------------------------------------------------

    pub(crate) fn begin_batch(&self) {
        self.batching.set(self.batching.get() + 1);
    }

    pub(crate) fn end_batch(&self) {
        let n = self.batching.get().saturating_sub(1);
        self.batching.set(n);
        if n == 0 {
            self.flush_sync();
        }
    }

    /// Ancestor-first flush. Re-entrancy-safe: a nested call while already
    /// flushing is a no-op, and re-entrant enqueues (effects that write
    /// signals) are picked up by the outer loop's next iteration.
    pub(crate) fn flush_sync(&self) {
        if self.flushing.get() {
            return;
        }
        self.flushing.set(true);
        loop {
            let batch: Vec<NodeId> = self.pending_effects.borrow_mut().drain(..).collect();
            if batch.is_empty() {
                break;
            }
            for effect in batch {
                if !self.nodes.borrow().contains_key(effect) {
                    continue;
                }
                if self.nodes.borrow()[effect].state == NodeState::Clean {
                    continue;
                }
                for ancestor in self.ancestor_chain(effect) {
                    if self.nodes.borrow().contains_key(ancestor) {
                        let _ = self.update_if_necessary(ancestor);
                    }
                }
                if self.nodes.borrow().contains_key(effect)
                    && self.nodes.borrow()[effect].state != NodeState::Clean
                {
                    let _ = self.update_if_necessary(effect);
                }
            }
        }
        self.flushing.set(false);
    }

    /// Walks the owner chain from `node`'s enclosing owner upward, collecting
    /// every not-yet-clean ancestor effect, oldest first (§4.5).
    fn ancestor_chain(&self, node: NodeId) -> Vec<NodeId> {
        let mut chain = Vec::new();
        let mut current_owner = self.nodes.borrow().get(node).and_then(|n| n.owner);
        while let Some(owner) = current_owner {
            let (originating, parent_owner) = {
                let owners = self.owners.borrow();
                match owners.get(owner) {
                    Some(o) => (o.originating_node, o.parent),
                    None => break,
                }
            };
            if let Some(origin) = originating {
                let is_dirty_effect = self
                    .nodes
                    .borrow()
                    .get(origin)
                    .map(|n| matches!(n.kind, NodeKind::Effect(_)) && n.state != NodeState::Clean)
                    .unwrap_or(false);
                if is_dirty_effect {
                    chain.push(origin);
                }
            }
            current_owner = parent_owner;
        }
        chain.reverse();
        chain
    }

    // -- disposal --------------------------------------------------------------

    /// Soft reset used before rerunning a derived/effect node's compute:
    /// disposes the scope's children and runs its cleanups, but keeps the
    /// owner slot itself alive for the next run.
    fn reset_owner_for_rerun(&self, owner: OwnerId) {
        let (children, cleanups, owned_nodes) = {
            let mut owners = self.owners.borrow_mut();
            let Some(o) = owners.get_mut(owner) else {
                return;
            };
            (
                std::mem::take(&mut o.children),
                std::mem::take(&mut o.cleanups),
                std::mem::take(&mut o.owned_nodes),
            )
        };
        for child in children {
            self.dispose_owner_recursive(child);
        }
        for cleanup in cleanups.into_iter().rev() {
            cleanup();
        }
        for n in owned_nodes {
            self.dispose_node(n);
        }
    }

    fn dispose_owner_recursive(&self, owner: OwnerId) {
        self.reset_owner_for_rerun(owner);
        self.owners.borrow_mut().remove(owner);
    }

    pub(crate) fn dispose_owner(&self, owner: OwnerId) {
        let parent = self.owners.borrow().get(owner).and_then(|o| o.parent);
        self.dispose_owner_recursive(owner);
        if let Some(parent) = parent {
            if let Some(p) = self.owners.borrow_mut().get_mut(parent) {
                p.children.retain(|&c| c != owner);
            }
        }
    }

    /// Tears down a single node: unlinks it from its sources' and observers'
    /// back-edges (disposal symmetry, §8), disposes its private compute
    /// scope and side channels, and removes it from the arena.
    pub(crate) fn dispose_node(&self, node: NodeId) {
        let removed = {
            let mut nodes = self.nodes.borrow_mut();
            let Some(n) = nodes.get_mut(node) else {
                return;
            };
            let compute_scope = n.compute_scope.take();
            let loading_node = n.loading_node.take();
            let error_node = n.error_node.take();
            (compute_scope, loading_node, error_node)
        };
        let (compute_scope, loading_node, error_node) = removed;

        let sources = self.sources.borrow_mut().remove(node).unwrap_or_default();
        let observers = self.observers.borrow_mut().remove(node).unwrap_or_default();
        for src in sources {
            self.remove_observer(src, node);
        }
        for obs in observers {
            self.remove_source(obs, node);
        }
        if let Some(scope) = compute_scope {
            self.dispose_owner_recursive(scope);
        }
        if let Some(ln) = loading_node {
            self.dispose_node(ln);
        }
        if let Some(en) = error_node {
            self.dispose_node(en);
        }
        self.nodes.borrow_mut().remove(node);
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::cell::{create_cell, CellOptions};
    use crate::owner::create_root;
    use crate::signal::create_signal;

    /// The prefix-reuse optimization (§4.2, §9): rerunning a compute that
    /// reads the same sources in the same order must not reallocate the
    /// `sources` backing vector.
    #[test]
    fn stable_dependencies_do_not_reallocate_sources() {
        let (_, owner) = create_root(|| {
            let (x, set_x) = create_signal(1);
            let m = create_cell(
                None,
                Some(move |_: Option<&i32>| crate::node::ComputeResult::Ready(x.read() + 1)),
                CellOptions::default(),
            );
            assert_eq!(m.read(), 2);
            let ptr_before =
                with_runtime(|rt| rt.sources.borrow().get(m.id).map(|s| s.as_ptr()));

            set_x.write(2);
            assert_eq!(m.read(), 3);
            let ptr_after =
                with_runtime(|rt| rt.sources.borrow().get(m.id).map(|s| s.as_ptr()));

            assert_eq!(ptr_before, ptr_after);
        });
        owner.dispose();
    }
}
