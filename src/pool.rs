//! The bounded worker pool collaborator (`# 5`, `# 9`): runs rule
//! executions off the scheduler's lock, and exposes the "about to block
//! externally" primitive that lets a caller wait for another key's
//! in-flight build without starving the pool.
//!
//! An `async`/`await`-based runtime would get the equivalent of this
//! from an executor and a `BoxFuture`: callers `.await` a future the
//! runtime schedules around (see `DESIGN.md`). This spec's pool is
//! synchronous-blocking rather than `async`/`await` (`# 5`), so this
//! module is a plain `std::thread` + semaphore pool instead of pulling
//! in an executor.

use parking_lot::{Condvar, Mutex};
use std::cell::Cell;
use std::sync::Arc;
use std::thread;

/// A collaborator able to run work concurrently, bounded to some
/// maximum number of simultaneously-running tasks, with a way for a
/// task to temporarily give up its slot while it blocks on something
/// external to the pool.
pub trait Pool: Send + Sync + 'static {
    /// Schedules `task` to run on the pool. Must never block the calling
    /// thread waiting for a free slot -- the scheduler calls this while
    /// holding its single database lock (`# 4.5`'s `run`), and a spawn
    /// that blocked there could deadlock against a task that needs the
    /// same lock to finish and free a slot.
    fn spawn(&self, task: Box<dyn FnOnce() + Send + 'static>);

    /// Runs `f`, which is expected to block the calling thread (e.g. on
    /// a condvar) waiting for work dispatched elsewhere on this pool to
    /// finish. If the calling thread is itself a pool task, the pool
    /// temporarily admits one extra task for the duration of `f` so that
    /// waiting here cannot deadlock the pool against itself (`# 5`'s "the
    /// blocking primitive must not starve the pool"); if the caller is
    /// not a pool task (e.g. the top-level caller of `build`), `f` simply
    /// runs with no bookkeeping, since no slot is being held in the
    /// first place.
    ///
    /// Takes a plain side-effecting closure rather than one returning a
    /// value: a generic `T` here would make this method, and so the
    /// trait, unusable behind the `Arc<dyn Pool>` the scheduler actually
    /// holds. The scheduler's own call site only ever blocks on a
    /// channel receive and discards the result, so this loses nothing.
    fn block_on(&self, f: Box<dyn FnOnce() + Send>);
}

struct Semaphore {
    state: Mutex<usize>,
    condvar: Condvar,
}

impl Semaphore {
    fn new(permits: usize) -> Self {
        Semaphore {
            state: Mutex::new(permits),
            condvar: Condvar::new(),
        }
    }

    fn acquire(&self) {
        let mut permits = self.state.lock();
        while *permits == 0 {
            self.condvar.wait(&mut permits);
        }
        *permits -= 1;
    }

    fn release(&self) {
        let mut permits = self.state.lock();
        *permits += 1;
        self.condvar.notify_one();
    }
}

thread_local! {
    /// Set for the duration of a task body run by [`ThreadPool::spawn`];
    /// tells [`ThreadPool::block_on`] whether the calling thread is
    /// currently holding one of the pool's permits (and so must give it
    /// up for the duration of the block) or is an outside caller with no
    /// permit to release.
    static HOLDS_PERMIT: Cell<bool> = Cell::new(false);
}

/// The default `Pool`: a fixed number of permits shared by every spawned
/// task. `spawn` always returns immediately -- the permit is acquired
/// *inside* the newly spawned thread, not by the caller -- so dispatching
/// work while holding the scheduler's database lock can never deadlock
/// waiting for a slot. `block_on` gives up the calling thread's permit
/// (if it holds one) before running `f` and reacquires it after, so a
/// blocked dependent never holds a slot hostage.
pub struct ThreadPool {
    sem: Arc<Semaphore>,
}

impl ThreadPool {
    /// Builds a pool that admits at most `workers` tasks at once.
    /// `workers` is clamped to at least 1: a pool with zero admitted
    /// tasks could never make progress.
    pub fn new(workers: usize) -> Self {
        ThreadPool {
            sem: Arc::new(Semaphore::new(workers.max(1))),
        }
    }
}

impl Pool for ThreadPool {
    fn spawn(&self, task: Box<dyn FnOnce() + Send + 'static>) {
        let sem = self.sem.clone();
        thread::spawn(move || {
            sem.acquire();
            HOLDS_PERMIT.with(|h| h.set(true));
            task();
            HOLDS_PERMIT.with(|h| h.set(false));
            sem.release();
        });
    }

    fn block_on(&self, f: Box<dyn FnOnce() + Send>) {
        let held = HOLDS_PERMIT.with(|h| h.get());
        if held {
            self.sem.release();
        }
        f();
        if held {
            self.sem.acquire();
        }
    }
}
