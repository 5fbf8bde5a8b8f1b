//! The per-key build record (`# 3` "Result"): everything the scheduler
//! keeps about the last successful execution of a key, and everything
//! the journal persists for it.
//!
//! Mirrors the familiar memoization-record shape (see `DESIGN.md`): a
//! produced value, a "last verified at" step, a "value last changed at"
//! step, and a dependency list walked to decide whether the memo is
//! still current. `depends` groups dependencies into ordered batches
//! rather than a flat list, because `# 4.5`'s `check` walks dependency
//! groups one at a time so a later group is only considered once every
//! key in an earlier group is confirmed unchanged.

use crate::intern::Id;
use crate::key::Value;
use crate::step::{Duration, Step, Trace};
use serde::{Deserialize, Serialize};
use smallvec::SmallVec;

/// A batch of dependency ids discovered at once during a single
/// rule execution (`# 3` "depends", `# 4.5`). Inline-stores up to four
/// ids before spilling to the heap, matching the small, usually-single-
/// digit group sizes rules tend to declare.
pub type DependencyGroup = SmallVec<[Id; 4]>;

/// Everything retained about the last successful build of a key.
#[derive(Clone, Debug, Serialize, Deserialize)]
pub struct Record {
    pub value: Value,
    /// The step at which `execute` last actually ran for this key.
    /// `check` finding every dependency unchanged reuses the record
    /// as-is and leaves `built` at whatever step that run produced it.
    pub built: Step,
    /// The step at which `value` last actually differed from its
    /// predecessor. Always `<= built` (`# 4.5`'s "unchanged-if-equal"
    /// rule: a rerun that reproduces the same value preserves
    /// `changed`, it does not bump it).
    pub changed: Step,
    pub depends: Vec<DependencyGroup>,
    pub execution: Duration,
    pub traces: Vec<Trace>,
}

impl Record {
    pub fn new(
        value: Value,
        built: Step,
        changed: Step,
        depends: Vec<DependencyGroup>,
        execution: Duration,
        traces: Vec<Trace>,
    ) -> Self {
        debug_assert!(changed <= built, "changed step must not exceed built step");
        Record {
            value,
            built,
            changed,
            depends,
            execution,
            traces,
        }
    }
}
