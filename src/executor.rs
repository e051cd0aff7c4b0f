//! An executor-agnostic way to spawn the continuations that drive pending
//! async computations to completion (§5 "asynchronous resolution").
//!
//! The core never assumes any particular async runtime is present. A single
//! global spawn function is configured once, by whichever binary or test
//! embeds this crate, via one of the `init_*` functions below.

use std::cell::{Cell, RefCell};
use std::future::Future;
use std::pin::Pin;
use std::sync::OnceLock;

use thiserror::Error;

/// A future spawned onto the local (non-`Send`) executor.
pub type PinnedLocalFuture = Pin<Box<dyn Future<Output = ()>>>;

type SpawnLocalFn = fn(PinnedLocalFuture);

static SPAWN_LOCAL: OnceLock<SpawnLocalFn> = OnceLock::new();

thread_local! {
    static FALLBACK_WARNED: Cell<bool> = const { Cell::new(false) };
}

/// Raised by the `init_*` functions if a global executor was already set.
#[derive(Debug, Error)]
pub enum ExecutorError {
    /// `init_tokio`/`init_futures_executor` was called more than once.
    #[error("a global executor has already been set")]
    AlreadySet,
}

/// Spawns `fut`, driving it with whichever executor was configured via
/// `init_tokio`/`init_futures_executor`.
///
/// If no executor has been configured, falls back to polling the future
/// eagerly with [`futures::executor::block_on`] the first time it's woken,
/// which is enough to make single-threaded unit tests work without any
/// setup at all; production code should call one of the `init_*` functions.
pub(crate) fn spawn_local(fut: PinnedLocalFuture) {
    match SPAWN_LOCAL.get() {
        Some(spawn) => spawn(fut),
        None => {
            FALLBACK_WARNED.with(|w| {
                if !w.get() {
                    #[cfg(feature = "tracing")]
                    tracing::warn!(
                        "no executor configured; blocking the current thread to drive a pending computation. \
                         Call executor::init_tokio() or executor::init_futures_executor() at startup."
                    );
                    w.set(true);
                }
            });
            futures::executor::block_on(fut);
        }
    }
}

/// Configures `tokio::task::spawn_local` as the global executor.
///
/// The calling code remains responsible for running the pending futures
/// inside a `tokio::task::LocalSet`. Requires the `tokio-scheduler` feature.
#[cfg(feature = "tokio-scheduler")]
pub fn init_tokio() -> Result<(), ExecutorError> {
    SPAWN_LOCAL
        .set(|fut| {
            tokio::task::spawn_local(fut);
        })
        .map_err(|_| ExecutorError::AlreadySet)
}

thread_local! {
    static LOCAL_POOL: RefCell<futures::executor::LocalPool> =
        RefCell::new(futures::executor::LocalPool::new());
}

/// Configures a `futures`-crate `LocalPool` as the global executor. The pool
/// itself lives in a thread-local, so spawned continuations survive until
/// something drives the pool; call [`tick`] (or [`run_until_stalled`]) after
/// writing a future-returning cell to make them actually progress.
pub fn init_futures_executor() -> Result<(), ExecutorError> {
    use futures::task::LocalSpawnExt;

    SPAWN_LOCAL
        .set(|fut| {
            LOCAL_POOL.with(|pool| {
                let _ = pool.borrow().spawner().spawn_local(fut);
            });
        })
        .map_err(|_| ExecutorError::AlreadySet)
}

/// Runs every spawned continuation on the [`init_futures_executor`] pool
/// until none of them can make further progress without an external wakeup.
/// A no-op if `init_futures_executor` was never called (or `init_tokio` was
/// used instead), since nothing was ever spawned onto this thread's pool.
pub fn run_until_stalled() {
    LOCAL_POOL.with(|pool| pool.borrow_mut().run_until_stalled());
}

/// Polls the [`init_futures_executor`] pool once, advancing whichever
/// continuation is ready to make progress. Prefer [`run_until_stalled`]
/// unless you specifically need single-step control.
pub fn tick() {
    LOCAL_POOL.with(|pool| pool.borrow_mut().run_until_stalled());
}
