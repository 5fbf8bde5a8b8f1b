//! The global step counter and per-key execution traces (`# 3` "Step",
//! "Trace", "Duration").
//!
//! A `Step` is the database's logical clock: it advances once per
//! top-level `build` call, never inside one (see `DESIGN.md` for the
//! revision-counter design this is modeled on), using
//! `crossbeam_utils::atomic::AtomicCell` for lock-free reads of the
//! counter from any thread.

use crate::key::{Key, Payload};
use crossbeam_utils::atomic::AtomicCell;
use serde::{Deserialize, Serialize};
use std::fmt;

/// A point in the database's logical clock. Steps only compare for
/// ordering against each other; they carry no wall-clock meaning.
#[derive(Copy, Clone, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
pub struct Step(u32);

impl Step {
    pub const ZERO: Step = Step(0);

    fn next(self) -> Step {
        Step(self.0 + 1)
    }

    pub fn as_u32(self) -> u32 {
        self.0
    }

    /// Constructs a `Step` from a raw counter value. Used by journal
    /// replay (the persisted `StepCount` payload) and by tests.
    pub fn from_u32(n: u32) -> Step {
        Step(n)
    }
}

impl fmt::Debug for Step {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "Step({})", self.0)
    }
}

/// Lock-free holder for the database's current step, incremented once
/// per top-level `build` call (`# 4.5`).
pub struct AtomicStep(AtomicCell<Step>);

impl AtomicStep {
    pub fn starting_at(step: Step) -> Self {
        AtomicStep(AtomicCell::new(step))
    }

    pub fn load(&self) -> Step {
        self.0.load()
    }

    /// Advances the clock by one and returns the new value. Only ever
    /// called at the top of `build`, never while a build is mid-flight,
    /// so a simple load/store under the scheduler's single lock (not a
    /// CAS loop) is sufficient.
    pub fn advance(&self) -> Step {
        let next = self.0.load().next();
        self.0.store(next);
        next
    }
}

impl Default for AtomicStep {
    fn default() -> Self {
        AtomicStep::starting_at(Step::ZERO)
    }
}

/// The payload carried by the distinguished key under which the current
/// `Step` is itself journaled (`# 3`, `# 4.2`), so the next process to
/// open the same journal can resume the clock instead of restarting it
/// at zero. Treated as an ordinary key/value pair everywhere except the
/// JSON dump, which filters it out (`# 4.10`).
#[derive(Debug, Serialize, Deserialize)]
pub struct StepCount(pub u32);

impl Payload for StepCount {
    const TAG: &'static str = "kiln::step";
}

/// The distinguished key the current step is persisted under. Always
/// the same key, by construction (`StepCount`'s tag is unique and its
/// payload is ignored for identity purposes, only the tag matters since
/// there is only ever one step counter per database).
pub fn step_key() -> Key {
    Key::of(&StepCount(0))
}

/// Wall-clock-ish duration of a single rule execution, in fractional
/// seconds (`# 3` "Duration"). Stored as `f64` rather than
/// `std::time::Duration` because it round-trips through the journal and
/// the JSON dump without caring about nanosecond precision.
pub type Duration = f64;

/// A message emitted by a rule while it runs (`# 3` "Trace"),
/// timestamped relative to the start of that rule's execution so traces
/// remain meaningful even if the wall clock the process runs under is
/// unavailable (e.g. replayed from the journal on a different machine).
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct Trace {
    pub message: String,
    pub start: Duration,
    pub end: Duration,
}

impl Trace {
    pub fn new(message: impl Into<String>, start: Duration, end: Duration) -> Self {
        Trace {
            message: message.into(),
            start,
            end,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn advance_is_monotonic() {
        let s = AtomicStep::default();
        assert_eq!(s.load(), Step::ZERO);
        assert_eq!(s.advance(), Step(1));
        assert_eq!(s.advance(), Step(2));
        assert_eq!(s.load(), Step(2));
    }

    #[test]
    fn ordering() {
        assert!(Step::ZERO < Step(1));
    }
}
