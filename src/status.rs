//! The status a key can hold in the scheduler's map (`# 3` "Status",
//! `# 4.3`), and the error type a failed execution settles into.
//!
//! This enum is the concrete analogue of the teacher's `QueryState`
//! (`src/derived/slot.rs`): `NotComputed` -> [`Status::Missing`],
//! `InProgress { waiting, .. }` -> [`Status::Waiting`], `Memoized(memo)`
//! -> [`Status::Loaded`]/[`Status::Ready`]. The split between `Loaded`
//! and `Ready` that the teacher doesn't need (its memo is always either
//! trusted or not) exists here because `# 4.5` distinguishes "a record
//! restored from the journal, not yet checked this run" (`Loaded`) from
//! "confirmed current as of this run" (`Ready`) -- `check` is precisely
//! the transition from the former to the latter.

use crate::error::BuildError;
use crate::ops::Ops;
use crate::result::Record;
use crate::waiting::Pending;
use std::sync::Arc;

/// The lifecycle state of a single interned key within one database
/// instance (`# 3`).
pub enum Status<O: Ops> {
    /// Never built, and not the journal's record of a prior run either.
    Missing,
    /// Restored from the journal at startup; not yet revalidated this
    /// run. `# 4.5`'s `reduce` is what decides whether a `Loaded` record
    /// can become `Ready` directly (via `check`) or must be rebuilt.
    Loaded(Record),
    /// A build (or a validity check) is in flight. Carries the prior
    /// record, if any, so a dependent that only needs to know the
    /// record's shape does not have to wait for rebuilds it turns out
    /// are unnecessary, and the [`Pending`] continuations registered by
    /// other callers currently blocked on this key.
    Waiting(Pending<O>, Option<Record>),
    /// Confirmed current as of this run's step, either because it was
    /// just rebuilt or because `check` found every dependency unchanged.
    Ready(Record),
    /// The rule's last execution (in this run) failed.
    Error(Arc<BuildError>),
}

impl<O: Ops> Status<O> {
    pub fn is_terminal(&self) -> bool {
        matches!(self, Status::Ready(_) | Status::Error(_))
    }

    pub fn record(&self) -> Option<&Record> {
        match self {
            Status::Loaded(r) | Status::Ready(r) => Some(r),
            Status::Waiting(_, prior) => prior.as_ref(),
            Status::Missing | Status::Error(_) => None,
        }
    }
}
