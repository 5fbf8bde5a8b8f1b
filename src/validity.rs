//! `checkValid` (`# 4.9`): an out-of-band audit that every `Ready` key's
//! recorded value still matches what `stored` reports right now,
//! without mutating the database or dispatching any rebuild.
//!
//! An in-memory-only incremental database has no equivalent lint pass:
//! it trusts its own revision counters completely and never persists
//! across process restarts, so there is nothing external to drift out
//! from under it (see `DESIGN.md`). This module exists purely because `#
//! 4.9` asks for a way to catch the on-disk world drifting out from
//! under a database that hasn't been told to rebuild (e.g. a stored
//! artifact edited by a tool outside this process's `execute` calls).

use crate::error::BuildError;
use crate::ops::Ops;
use crate::scheduler::{Database, Inner};
use crate::status::Status;

/// Walks every key currently `Ready` (`# 4.9`: only confirmed-current
/// keys are worth auditing; `Loaded`/`Waiting`/`Missing`/`Error` keys
/// have nothing yet to compare against) and compares its recorded value
/// against `stored`, skipping any key [`Ops::always_rebuilds`] marks as
/// exempt. Returns `Ok(())` if every comparison matched, or a single
/// [`BuildError::LintFailure`] listing every mismatch found
/// (`SPEC_FULL.md` D: "up to all", not truncated like `DatabaseCyclic`).
pub fn check_valid<O: Ops>(db: &Database<O>) -> Result<(), BuildError> {
    let inner: parking_lot::MutexGuard<'_, Inner<O>> = db.inner();
    let mut mismatches = Vec::new();
    for (id, status) in inner.iter() {
        let r = match status {
            Status::Ready(r) => r,
            _ => continue,
        };
        let key = inner.key(id);
        if db.ops().always_rebuilds(key) {
            continue;
        }
        let stored = db.ops().stored(key);
        let matches = stored.as_ref().map(|v| *v == r.value).unwrap_or(false);
        if !matches {
            let key_display = db.witness().display_key(key);
            let old_display = db.witness().display_value(&r.value);
            let new_display = match &stored {
                Some(v) => db.witness().display_value(v),
                None => "<missing>".to_string(),
            };
            mismatches.push((key_display, old_display, new_display));
        }
    }
    if mismatches.is_empty() {
        Ok(())
    } else {
        Err(BuildError::lint_failures(&mismatches))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::intern::Id;
    use crate::key::{Key, Payload, Value, Witness};
    use crate::ops::{BuildHandle, Produced};
    use crate::pool::ThreadPool;
    use crate::scheduler::{build, with_database, BuildOptions};
    use crate::ops::Assume;
    use parking_lot::Mutex;
    use serde::{Deserialize, Serialize};
    use std::collections::HashMap;
    use std::error::Error as StdError;
    use std::sync::Arc;
    use tempfile::tempdir;

    #[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
    struct NameKey(String);
    impl Payload for NameKey {
        const TAG: &'static str = "validity::NameKey";
    }

    #[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
    struct Text(String);
    impl Payload for Text {
        const TAG: &'static str = "validity::Text";
    }

    struct MapOps {
        stored: Mutex<HashMap<String, String>>,
        exempt: Mutex<Vec<String>>,
    }

    impl MapOps {
        fn new() -> Self {
            MapOps {
                stored: Mutex::new(HashMap::new()),
                exempt: Mutex::new(Vec::new()),
            }
        }

        fn set_stored(&self, name: &str, value: &str) {
            self.stored.lock().insert(name.to_string(), value.to_string());
        }
    }

    impl Ops for MapOps {
        fn stored(&self, key: &Key) -> Option<Value> {
            let name: NameKey = key.decode::<NameKey>()?;
            self.stored.lock().get(&name.0).map(|v| Value::of(&Text(v.clone())))
        }

        fn execute(
            &self,
            _handle: &dyn BuildHandle,
            _id: Id,
            key: &Key,
        ) -> Result<Produced, Box<dyn StdError + Send + Sync>> {
            let name: NameKey = key.decode::<NameKey>().unwrap();
            let value = self.stored.lock().get(&name.0).cloned().unwrap_or_default();
            Ok(Produced {
                value: Value::of(&Text(value)),
                traces: Vec::new(),
            })
        }

        fn always_rebuilds(&self, key: &Key) -> bool {
            let name: NameKey = match key.decode::<NameKey>() {
                Some(n) => n,
                None => return false,
            };
            self.exempt.lock().contains(&name.0)
        }
    }

    fn name_key(name: &str) -> Key {
        Key::of(&NameKey(name.to_string()))
    }

    #[test]
    fn matching_stored_value_is_valid() {
        let dir = tempdir().unwrap();
        let ops = MapOps::new();
        ops.set_stored("A", "a");
        let options = BuildOptions {
            journal_path: dir.path().join("db.journal"),
            workers: 1,
        };
        let pool: Arc<dyn crate::pool::Pool> = Arc::new(ThreadPool::new(1));
        with_database(options, ops, Witness::new(), pool, |db| {
            build(db, &[name_key("A")], Assume::Normal).unwrap();
            assert!(check_valid(db).is_ok());
        })
        .unwrap();
    }

    #[test]
    fn drifted_stored_value_is_reported() {
        let dir = tempdir().unwrap();
        let ops = MapOps::new();
        ops.set_stored("A", "a");
        let options = BuildOptions {
            journal_path: dir.path().join("db.journal"),
            workers: 1,
        };
        let pool: Arc<dyn crate::pool::Pool> = Arc::new(ThreadPool::new(1));
        with_database(options, ops, Witness::new(), pool, |db| {
            build(db, &[name_key("A")], Assume::Normal).unwrap();
            db.ops().set_stored("A", "a-drifted");
            let err = check_valid(db).unwrap_err();
            assert!(matches!(err, BuildError::LintFailure { .. }));
        })
        .unwrap();
    }

    #[test]
    fn exempt_key_is_never_reported() {
        let dir = tempdir().unwrap();
        let ops = MapOps::new();
        ops.set_stored("A", "a");
        let options = BuildOptions {
            journal_path: dir.path().join("db.journal"),
            workers: 1,
        };
        let pool: Arc<dyn crate::pool::Pool> = Arc::new(ThreadPool::new(1));
        with_database(options, ops, Witness::new(), pool, |db| {
            build(db, &[name_key("A")], Assume::Normal).unwrap();
            db.ops().exempt.lock().push("A".to_string());
            db.ops().set_stored("A", "a-drifted");
            assert!(check_valid(db).is_ok());
        })
        .unwrap();
    }
}
