//! The `stored`/`execute` collaborator contract (`# 6`) and the
//! `Assume` policy (`# 6`) that lets a caller shortcut the normal
//! validity check for one build.
//!
//! `Ops` stands in for "the outside world": the scheduler in
//! `scheduler.rs` is generic over `O: Ops` the same way an incremental
//! runtime is generic over its database/query-group trait, so the
//! scheduler core never has to know the concrete rule set a particular
//! build uses.

use crate::error::BuildError;
use crate::intern::Id;
use crate::key::{Key, Value};
use crate::step::Trace;
use std::error::Error as StdError;
use std::sync::Arc;

/// What a rule execution produced (`# 6`): the value itself and any
/// diagnostic traces it chose to emit. Dependency groups are not part of
/// this: they are recorded automatically, one group per [`BuildHandle::build`]
/// call the rule makes, rather than threaded back by hand.
pub struct Produced {
    pub value: Value,
    pub traces: Vec<Trace>,
}

/// What `execute` uses to recurse into the scheduler for the values of
/// other keys (`# 4.5`: "`execute`... may itself call `build` to obtain
/// dependency handles"). Each call to [`BuildHandle::build`] forms one
/// dependency group, in the order the rule makes the calls -- everything
/// read before the first call forms group 0, everything between the
/// first and second forms group 1, and so on.
pub trait BuildHandle: Send + Sync {
    /// Recursively builds `keys`, blocking until every one of them has
    /// settled, and returns their values in the same order.
    fn build(&self, keys: &[Key]) -> Result<Vec<Value>, Arc<BuildError>>;
}

/// The two collaborator operations every key's rule is built from (`#
/// 6`). A single `Ops` implementation is shared by every key the
/// database manages; it dispatches on the key's tag internally (or,
/// more commonly, is itself a thin adapter over a rule registry keyed
/// by tag).
pub trait Ops: Send + Sync + 'static {
    /// Reads the key's current value from outside this process's
    /// bookkeeping (e.g. hashing a file on disk). Returns `None` if the
    /// key has no externally observable value yet (`# 4.5`'s `Missing`
    /// path always calls `execute`, never `stored`, so `None` here only
    /// matters for a `Loaded` key whose backing artifact has since
    /// disappeared).
    fn stored(&self, key: &Key) -> Option<Value>;

    /// Builds `key` from scratch, using `handle` to obtain any
    /// dependency values it needs along the way.
    fn execute(
        &self,
        handle: &dyn BuildHandle,
        id: Id,
        key: &Key,
    ) -> Result<Produced, Box<dyn StdError + Send + Sync>>;

    /// The `# 4.9` "Special" predicate: keys for which `checkValid`
    /// should never compare the recorded value against `stored` (e.g. a
    /// key whose rule is intentionally non-deterministic or probes
    /// something `stored` cannot see). Defaults to `false` for every key.
    fn always_rebuilds(&self, key: &Key) -> bool {
        let _ = key;
        false
    }
}

/// Per-build override of the normal validity check (`# 6`). Applies
/// only to keys explicitly named in a `build` call, not transitively to
/// their dependencies -- `check`'s own recursive walk always reduces
/// dependencies under [`Assume::Normal`].
#[derive(Copy, Clone, Debug, Default, PartialEq, Eq)]
pub enum Assume {
    /// Treat a `Loaded` record as stale without consulting `stored` or
    /// dependencies at all -- dispatches straight to `run`, as if the
    /// key were `Missing`.
    AssumeDirty,
    /// Accept a `Loaded` record as current without calling `stored` or
    /// checking dependencies, as long as a record exists at all.
    AssumeSkip,
    /// Dispatches straight to `run` without calling `stored` or checking
    /// dependencies up front (unlike the default path); the pool task
    /// then calls `stored` once and, if it returns a value, adopts it as
    /// the current value without calling `execute` at all -- regardless
    /// of whether it matches the previously recorded value. Only when
    /// `stored` returns nothing does `execute` run.
    AssumeClean,
    /// No override: run the normal `reduce`/`check` decision (`# 4.5`):
    /// compare `stored` against the recorded value, running `execute`
    /// on a mismatch and walking dependency groups via `check` on a
    /// match.
    #[default]
    Normal,
}
