//! The call stack and cycle check (`# 4.6`): the chain of keys currently
//! being built along one recursive `execute` path, and the check that
//! catches a key depending on itself before it ever reaches the pool.
//!
//! Other cycle-detection designs key an `InProgress` state by the
//! querying thread's runtime id, walked to build a reported chain when a
//! cycle is found (see `DESIGN.md`). The shape kept here is the "chain
//! of keys, checked by id membership" idea, not thread-identity-based
//! detection, since this crate's stack is a plain value threaded through
//! recursive calls rather than looked up from the running thread.

use crate::intern::Id;
use crate::key::Key;
use rustc_hash::FxHashSet;
use std::sync::Arc;

#[derive(Clone)]
struct Frame {
    id: Id,
    key: Key,
}

/// The ordered chain of keys currently being built on one recursive
/// `execute` path (`# 4.6` "Stack"). Cheap to extend: `push` shares the
/// unchanged prefix via `Arc` rather than copying it, since sibling
/// dependency groups within the same `check` often push from the same
/// parent stack.
#[derive(Clone)]
pub struct Stack {
    frames: Arc<Vec<Frame>>,
    ids: Arc<FxHashSet<Id>>,
}

impl Stack {
    /// The empty stack, used for a top-level `build` call that isn't
    /// itself nested inside another key's `execute`.
    pub fn new() -> Self {
        Stack {
            frames: Arc::new(Vec::new()),
            ids: Arc::new(FxHashSet::default()),
        }
    }

    /// Pushes `(id, key)` onto the stack, returning the extended stack.
    /// Does not mutate `self`: callers keep their own copy of the
    /// pre-push stack for sibling calls.
    pub fn push(&self, id: Id, key: Key) -> Stack {
        let mut frames = (*self.frames).clone();
        frames.push(Frame { id, key });
        let mut ids = (*self.ids).clone();
        ids.insert(id);
        Stack {
            frames: Arc::new(frames),
            ids: Arc::new(ids),
        }
    }

    /// `checkStack` (`# 4.5` step 2, `# 4.6`): the first id among
    /// `candidates` that is already on this stack, if any.
    pub fn check(&self, candidates: &[Id]) -> Option<Id> {
        candidates.iter().copied().find(|id| self.ids.contains(id))
    }

    /// `topStack` (`# 4.6`): the display form of the key at the top of
    /// the stack, or `"<unknown>"` if the stack is empty.
    pub fn top_display(&self, witness: &crate::key::Witness) -> String {
        match self.frames.last() {
            Some(frame) => witness.display_key(&frame.key),
            None => "<unknown>".to_string(),
        }
    }

    /// The chain of keys on this stack, outermost first, for a recursion
    /// error's display (`SPEC_FULL.md` D).
    pub fn chain_display(&self, witness: &crate::key::Witness) -> Vec<String> {
        self.frames
            .iter()
            .map(|frame| witness.display_key(&frame.key))
            .collect()
    }
}

impl Default for Stack {
    fn default() -> Self {
        Stack::new()
    }
}
