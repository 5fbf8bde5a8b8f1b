//! The intern table: a purely additive `Key <-> Id` bijection (`# 4.1`).
//!
//! Some incremental-computation interners additionally support garbage
//! collection (a freelist of ids whose keys are no longer referenced by
//! any live revision). This table never frees an id once assigned: `#
//! 4.1` is explicit that within a single process run, ids are permanent
//! (see `DESIGN.md` for why the freelist/GC machinery doesn't apply
//! here); what's kept is the forward/backward map shape and the "intern
//! returns the existing id if present" contract.

use crate::key::Key;
use rustc_hash::FxHashMap;
use serde::{Deserialize, Serialize};
use std::fmt;

/// A dense, process-local identifier standing in for a [`Key`] (`# 3`
/// "Id"). Ids are assigned in intern order starting at zero and are
/// never reused, so they can index directly into `Vec`-backed tables.
#[derive(Copy, Clone, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
pub struct Id(u32);

impl Id {
    pub fn index(self) -> usize {
        self.0 as usize
    }

    /// Constructs an `Id` from a raw index. Used by journal replay, which
    /// re-derives each key's id by re-interning in file order rather than
    /// trusting the raw id written to disk outright -- though that raw id
    /// (`journal::Recovered::persisted_id`) is kept around just long
    /// enough to remap old dependency ids onto the freshly re-interned
    /// ones -- and by tests that need an `Id` without a real
    /// `InternTable`.
    pub fn from_index(n: u32) -> Id {
        Id(n)
    }
}

impl fmt::Debug for Id {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "Id({})", self.0)
    }
}

/// The forward (`Key -> Id`) and backward (`Id -> Key`) intern maps.
pub struct InternTable {
    forward: FxHashMap<Key, Id>,
    backward: Vec<Key>,
}

impl InternTable {
    pub fn new() -> Self {
        InternTable {
            forward: FxHashMap::default(),
            backward: Vec::new(),
        }
    }

    /// Interns `key`, returning its `Id`. If `key` was already interned
    /// this returns the existing id; the table never grows for a key it
    /// has already seen.
    pub fn intern(&mut self, key: Key) -> Id {
        if let Some(&id) = self.forward.get(&key) {
            return id;
        }
        let id = Id(self.backward.len() as u32);
        self.backward.push(key.clone());
        self.forward.insert(key, id);
        id
    }

    /// Looks up the id already assigned to `key`, without assigning a
    /// new one.
    pub fn lookup(&self, key: &Key) -> Option<Id> {
        self.forward.get(key).copied()
    }

    /// The key an id was interned from. Panics if `id` was never
    /// produced by this table -- an internal invariant violation, not a
    /// reportable error, since ids never cross database instances.
    pub fn key(&self, id: Id) -> &Key {
        &self.backward[id.index()]
    }

    pub fn len(&self) -> usize {
        self.backward.len()
    }

    pub fn is_empty(&self) -> bool {
        self.backward.is_empty()
    }

    pub fn ids(&self) -> impl Iterator<Item = Id> + '_ {
        (0..self.backward.len()).map(|i| Id(i as u32))
    }
}

impl Default for InternTable {
    fn default() -> Self {
        InternTable::new()
    }
}
