//! A randomized concurrent stress test (`# 9`'s concurrency guarantees)
//! run against an in-memory [`Ops`] implementation, replacing the
//! teacher's own `query_group`-macro-based stress harness -- there is no
//! macro layer left to stress here, so this drives `build` directly from
//! several threads sharing one [`Database`].

use kilnbuild::{
    build, with_database, Assume, BuildHandle, BuildOptions, Id, Key, Ops, Payload, Pool,
    Produced, ThreadPool, Value, Witness,
};
use rand::Rng;
use serde::{Deserialize, Serialize};
use std::error::Error as StdError;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::{Arc, Mutex};
use std::thread;

const LEAF_COUNT: usize = 10;
const THREADS: usize = 8;
const OPS_PER_THREAD: usize = 100;

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
struct Name(String);
impl Payload for Name {
    const TAG: &'static str = "stress::Name";
}

#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq)]
struct Number(i64);
impl Payload for Number {
    const TAG: &'static str = "stress::Number";
}

fn leaf_name(i: usize) -> String {
    format!("leaf{i}")
}

fn leaf_key(i: usize) -> Key {
    Key::of(&Name(leaf_name(i)))
}

fn combined_key() -> Key {
    Key::of(&Name("combined".to_string()))
}

fn leaf_index(name: &str) -> Option<usize> {
    name.strip_prefix("leaf")?.parse().ok()
}

/// Ten independently-mutable leaves, backed by a shared in-memory table
/// standing in for "ten files on disk", plus a derived `combined` key
/// that sums them in one dependency group. `combined`'s own cache
/// mirrors what a real build would persist for it, so `reduce` takes
/// the `check` path for `combined` instead of always treating it as
/// mismatched.
struct StressOps {
    leaves: Mutex<[i64; LEAF_COUNT]>,
    combined_cache: Mutex<Option<i64>>,
    execute_calls: AtomicUsize,
}

impl StressOps {
    fn new() -> Self {
        StressOps {
            leaves: Mutex::new([0; LEAF_COUNT]),
            combined_cache: Mutex::new(None),
            execute_calls: AtomicUsize::new(0),
        }
    }

    fn set_leaf(&self, i: usize, value: i64) {
        self.leaves.lock().unwrap()[i] = value;
    }

    fn sum_leaves(&self) -> i64 {
        self.leaves.lock().unwrap().iter().sum()
    }
}

impl Ops for StressOps {
    fn stored(&self, key: &Key) -> Option<Value> {
        let name: Name = key.decode::<Name>()?;
        if name.0 == "combined" {
            return self
                .combined_cache
                .lock()
                .unwrap()
                .map(|v| Value::of(&Number(v)));
        }
        let idx = leaf_index(&name.0)?;
        Some(Value::of(&Number(self.leaves.lock().unwrap()[idx])))
    }

    fn execute(
        &self,
        handle: &dyn BuildHandle,
        _id: Id,
        key: &Key,
    ) -> Result<Produced, Box<dyn StdError + Send + Sync>> {
        self.execute_calls.fetch_add(1, Ordering::SeqCst);
        let name: Name = key.decode::<Name>().expect("stress keys are always Name");
        if name.0 == "combined" {
            let keys: Vec<Key> = (0..LEAF_COUNT).map(leaf_key).collect();
            let values = handle
                .build(&keys)
                .map_err(|e| -> Box<dyn StdError + Send + Sync> { e.to_string().into() })?;
            let sum: i64 = values
                .iter()
                .map(|v| v.decode::<Number>().expect("leaf values are Numbers").0)
                .sum();
            *self.combined_cache.lock().unwrap() = Some(sum);
            return Ok(Produced {
                value: Value::of(&Number(sum)),
                traces: Vec::new(),
            });
        }
        let idx = leaf_index(&name.0).expect("unknown leaf key in stress test");
        let value = self.leaves.lock().unwrap()[idx];
        Ok(Produced {
            value: Value::of(&Number(value)),
            traces: Vec::new(),
        })
    }
}

#[derive(Clone, Copy)]
enum StressOp {
    MutateLeaf { index: usize, value: i64 },
    BuildCombined,
    BuildLeaf { index: usize },
}

fn random_op(rng: &mut impl Rng) -> StressOp {
    match rng.gen_range(0..3) {
        0 => StressOp::MutateLeaf {
            index: rng.gen_range(0..LEAF_COUNT),
            value: rng.gen_range(-1000..1000),
        },
        1 => StressOp::BuildCombined,
        _ => StressOp::BuildLeaf {
            index: rng.gen_range(0..LEAF_COUNT),
        },
    }
}

/// Several threads hammer a single shared [`Database`] with randomly
/// interleaved leaf mutations and builds of both the combined key and
/// individual leaves. Every build must either succeed or fail with a
/// genuine cycle/recursion error -- there is none in this graph, so any
/// error at all is a bug -- and once every thread has joined, a final
/// build of `combined` must match the leaves' final values exactly.
#[test]
fn concurrent_mutation_and_build_converges() {
    let dir = tempfile::tempdir().unwrap();
    let options = BuildOptions {
        journal_path: dir.path().join("stress.journal"),
        workers: THREADS,
    };
    let pool: Arc<dyn Pool> = Arc::new(ThreadPool::new(THREADS));
    let mut witness = Witness::new();
    witness.register::<Name>();
    witness.register::<Number>();

    with_database(options, StressOps::new(), witness, pool, |db| {
        let mut handles = Vec::with_capacity(THREADS);
        for t in 0..THREADS {
            let db = db.clone();
            handles.push(thread::spawn(move || {
                let mut rng = rand::thread_rng();
                for _ in 0..OPS_PER_THREAD {
                    match random_op(&mut rng) {
                        StressOp::MutateLeaf { index, value } => {
                            db.ops().set_leaf(index, value);
                        }
                        StressOp::BuildCombined => {
                            build(db, &[combined_key()], Assume::Normal).unwrap_or_else(|e| {
                                panic!("thread {t}: combined build failed: {e}")
                            });
                        }
                        StressOp::BuildLeaf { index } => {
                            build(db, &[leaf_key(index)], Assume::Normal).unwrap_or_else(|e| {
                                panic!("thread {t}: leaf {index} build failed: {e}")
                            });
                        }
                    }
                }
            }));
        }
        for handle in handles {
            handle.join().expect("stress thread panicked");
        }

        let expected = db.ops().sum_leaves();
        let values = build(db, &[combined_key()], Assume::Normal).unwrap();
        assert_eq!(values[0].decode::<Number>(), Some(Number(expected)));
    })
    .unwrap();
}

/// A narrower, deterministic companion to the randomized test above:
/// closing and reopening a database with no intervening writes must
/// leave every key's recorded value unchanged (`# 9`: journal replay is
/// idempotent up to the bumped step).
#[test]
fn reopen_without_writes_preserves_values() {
    let dir = tempfile::tempdir().unwrap();
    let journal_path = dir.path().join("idempotent.journal");

    {
        let options = BuildOptions {
            journal_path: journal_path.clone(),
            workers: 2,
        };
        let pool: Arc<dyn Pool> = Arc::new(ThreadPool::new(2));
        let ops = StressOps::new();
        for i in 0..LEAF_COUNT {
            ops.set_leaf(i, i as i64);
        }
        let mut witness = Witness::new();
        witness.register::<Name>();
        witness.register::<Number>();
        with_database(options, ops, witness, pool, |db| {
            build(db, &[combined_key()], Assume::Normal).unwrap();
        })
        .unwrap();
    }

    let options = BuildOptions {
        journal_path,
        workers: 2,
    };
    let pool: Arc<dyn Pool> = Arc::new(ThreadPool::new(2));
    let ops = StressOps::new();
    for i in 0..LEAF_COUNT {
        ops.set_leaf(i, i as i64);
    }
    // The derived key's external cache matches what the last run left
    // behind, so `reduce` should settle it via `check` without calling
    // `execute` again -- nothing changed, nothing to recompute.
    *ops.combined_cache.lock().unwrap() = Some((0..LEAF_COUNT as i64).sum());
    let mut witness = Witness::new();
    witness.register::<Name>();
    witness.register::<Number>();
    with_database(options, ops, witness, pool, |db| {
        let values = build(db, &[combined_key()], Assume::Normal).unwrap();
        assert_eq!(
            values[0].decode::<Number>(),
            Some(Number((0..LEAF_COUNT as i64).sum()))
        );
        assert_eq!(db.ops().execute_calls.load(Ordering::SeqCst), 0);
    })
    .unwrap();
}
