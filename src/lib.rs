#![cfg_attr(feature = "nightly", feature(fn_traits, unboxed_closures))]

//! A fine-grained reactive runtime: an acyclic graph of reactive cells
//! (leaf values, derived computations, effects) that stays consistent
//! under arbitrary writes while recomputing only what a write actually
//! invalidated.
//!
//! ## Fine-grained reactivity
//!
//! Reading any cell always yields a value consistent with every write that
//! precedes the read. Writes never recompute anything eagerly; instead a
//! write *push-marks* its transitive observers, and a later read
//! *pull-validates* — walking marked sources and rerunning only the ones
//! whose own sources actually changed. This is the same split the
//! reference crate uses: cheap marking on write, real work deferred to
//! read.
//!
//! ### Signals
//! 1. [create_signal] returns a ([ReadCell], [WriteCell]) pair — the split
//!    read/write halves of a leaf cell.
//! 2. [create_rw_signal] returns a single [RwSignal] handle carrying both
//!    capabilities, for cases where splitting is inconvenient (struct
//!    fields, loops).
//! 3. [create_memo] derives a memoized [Memo] from other cells; its
//!    compute reruns only when a source actually changed, and it renotifies
//!    its own observers only when its *result* changed.
//! 4. [create_cell] is the low-level constructor behind all of the above —
//!    reach for it directly only when you need an async/`wait()`-aware
//!    compute that the `create_memo`/`create_effect` sugar doesn't cover.
//!
//! ### Effects
//! [create_effect] runs a closure immediately, tracks whatever cells it
//! read, and reruns it — through [flush_sync] — whenever one of them
//! changes. Effects are the only cells the engine reruns on its own;
//! reading a memo never forces anything beyond that one memo's sources.
//!
//! ### Example
//! ```
//! use fine_reactive::*;
//!
//! create_root(|| {
//!     let (count, set_count) = create_signal(0);
//!
//!     assert_eq!(count.read(), 0);
//!     set_count.write(1);
//!     set_count.update(|n| *n += 1);
//!
//!     let doubled = create_memo(move |_| count.read() * 2);
//!     assert_eq!(doubled.read(), 4);
//!
//!     create_effect(move |_: Option<&()>| {
//!         println!("count = {}", count.read());
//!     });
//! });
//! ```
//!
//! ## Crate layout
//!
//! - [node] and [owner]: the data model (§3) — the erased `ReactiveNode`
//!   and the lifetime-scoped owner tree, kept as a separate arena from the
//!   reactive graph itself.
//! - [runtime]: the propagation engine (§4.3) — push-marking, pull
//!   validation, rerun, and the loading/error auxiliary channels (§4.4),
//!   all as methods on the single thread-local `Runtime`.
//! - [cell]: the typed, public `Cell<T>` handle layered over a `NodeId`.
//! - [signal], [memo], [effect]: the three user-facing cell flavors.
//! - [executor]: an executor-agnostic way to drive the futures a cell's
//!   compute may return.
//! - [error]: the `thiserror`-derived error type for the engine's own
//!   fallible operations (disposal races, reentrant borrows).

mod cell;
mod effect;
mod error;
mod executor;
mod memo;
mod node;
mod owner;
mod runtime;
mod signal;

pub use cell::{create_cell, Cell, CellOptions, Equality, NotReady};
pub use effect::{
    batch, create_effect, create_effect_try, flush_sync, set_scheduler, EffectScheduler,
    SyncScheduler,
};
pub use error::ReactiveError;
pub use executor::{init_futures_executor, run_until_stalled, tick, ExecutorError};
pub use memo::{
    create_memo, create_memo_try, create_memo_try_with_options, create_memo_with_equals, Memo,
};
pub use node::ComputeResult;
pub use owner::{
    catch_error, create_root, expect_context, on_dispose, provide_context, untrack, use_context,
    with_owner, Owner,
};
pub use signal::{
    create_rw_signal, create_signal, create_signal_with_equals, ReadCell, RwSignal, WriteCell,
};

#[cfg(feature = "tokio-scheduler")]
pub use effect::TokioScheduler;

#[cfg(feature = "tokio-scheduler")]
pub use executor::init_tokio;

/// Logs a structural engine event (a stale future discarded, an unhandled
/// effect error, a disposed-cell read) at `debug`/`warn` level, gated
/// behind the `tracing` feature exactly like the reference crate gates its
/// own instrumentation behind `debug_assertions`/`feature = "ssr"`. A no-op
/// expression when the feature is off, so release builds pay nothing.
#[doc(hidden)]
#[macro_export]
macro_rules! debug_warn {
    ($($x:tt)*) => {
        cfg_if::cfg_if! {
            if #[cfg(feature = "tracing")] {
                tracing::warn!($($x)*)
            } else {
                {}
            }
        }
    };
}
