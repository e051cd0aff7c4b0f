//! Error types surfaced at the public API boundary (§7).
//!
//! `ReactiveError` covers the engine's own infrastructure failures — the
//! ones a perfectly ordinary caller can hit just by racing a disposal, and
//! that must therefore be a `Result`, not a panic. A *user* compute raising
//! is a different concept (§7 `ComputeError`): the engine latches the
//! payload onto the cell rather than returning it from `try_read`, so it
//! resurfaces on every subsequent read until a successful write clears it —
//! `ReactiveError::Compute` is how `try_read` reports that latched payload
//! back out the one time the caller asks for it explicitly.

use std::rc::Rc;

use thiserror::Error;

/// Errors returned by the fallible operations on a [`crate::cell::Cell`]
/// handle.
#[derive(Debug, Error, Clone)]
pub enum ReactiveError {
    /// The cell (or the owner scope containing it) has already been
    /// disposed (§7 `ReadOfDisposed`).
    #[error("read of a disposed cell")]
    Disposed,

    /// The runtime's value slot was already mutably borrowed, e.g. a
    /// compute tried to read the very cell it's currently writing.
    #[error("cell was already borrowed (likely a reentrant read/write)")]
    BorrowConflict,

    /// The cell's last compute raised (§7 `ComputeError`). Carries the
    /// original error object, not a stringified copy, so callers can
    /// `downcast_ref` it back to its concrete type.
    #[error("cell compute raised: {0}")]
    Compute(Rc<dyn std::error::Error>),
}
