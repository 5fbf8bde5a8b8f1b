//! `afterWaiting` / `runWaiting` / `waitFor` (`# 4.4`): the continuation
//! machinery that lets one caller's `build` block on another key's
//! in-flight execution without the scheduler ever nesting its lock.
//!
//! Other memoization engines track an in-progress query's waiter list
//! as a small inline vector of promises, each parking an OS thread on a
//! condvar, to block a second caller on the first caller's result (see
//! `DESIGN.md`). This crate instead queues a continuation closure that
//! runs later, still holding the scheduler's lock, when the awaited key
//! settles -- so the actual OS-level blocking only happens once, at the
//! top-level `build` call, via the pool's `block_on` primitive (`# 5`).

use crate::intern::Id;
use crate::ops::Ops;
use crate::scheduler::{Database, Inner};
use parking_lot::Mutex;
use std::sync::atomic::{AtomicBool, AtomicUsize, Ordering};
use std::sync::Arc;

/// A continuation to run once the key it's attached to settles. Takes
/// `&mut Inner<O>` because it runs while the scheduler's single lock is
/// already held by the caller that triggered it -- continuations must
/// never try to re-acquire that lock themselves. Takes the database by
/// `&Arc<Database<O>>` rather than `&Database<O>` so a continuation that
/// decides to dispatch a rebuild can clone a `'static` handle onto the
/// pool.
pub type Cont<O> = Box<dyn FnOnce(&Arc<Database<O>>, &mut Inner<O>) + Send>;

/// The set of continuations registered against one in-flight key (`# 3`
/// "Pending"). `afterWaiting` appends to this list; `runWaiting` drains
/// and runs it exactly once, in registration order, when the key
/// resolves.
pub struct Pending<O: Ops> {
    conts: Vec<Cont<O>>,
}

impl<O: Ops> Pending<O> {
    pub fn new() -> Self {
        Pending { conts: Vec::new() }
    }

    /// `afterWaiting`: registers `cont` to run when this key's Waiting
    /// status resolves.
    pub fn after(&mut self, cont: Cont<O>) {
        self.conts.push(cont);
    }

    /// `runWaiting`: fires every registered continuation, in order. Takes
    /// `self` by value since a `Pending` is only ever fired once -- the
    /// status it was attached to has just transitioned away from
    /// `Waiting`.
    pub fn fire(self, db: &Arc<Database<O>>, inner: &mut Inner<O>) {
        for cont in self.conts {
            cont(db, inner);
        }
    }

    pub fn is_empty(&self) -> bool {
        self.conts.is_empty()
    }
}

impl<O: Ops> Default for Pending<O> {
    fn default() -> Self {
        Pending::new()
    }
}

/// `waitFor` (`# 4.4`): registers `on_settle` to run once for every
/// subject in `ids`, or, if a prior subject's call already reported
/// "done", not at all for the remaining subjects. `on_settle` receives
/// whether the subject it fired for was the last of the group to
/// settle, and must return whether the group as a whole should stop
/// being observed (e.g. because a dependency change was already found
/// and a rebuild was already dispatched).
///
/// Each subject's continuation is installed via the `install` callback,
/// which is responsible for attaching it to that subject's `Pending`
/// (wherever that subject's status happens to live).
pub fn wait_for<O, F, I>(ids: &[Id], mut install: I, on_settle: F)
where
    O: Ops + 'static,
    F: FnMut(&Arc<Database<O>>, &mut Inner<O>, Id, bool) -> bool + Send + 'static,
    I: FnMut(Id, Cont<O>),
{
    let remaining = Arc::new(AtomicUsize::new(ids.len()));
    let done = Arc::new(AtomicBool::new(false));
    let on_settle = Arc::new(Mutex::new(on_settle));
    for &id in ids {
        let remaining = remaining.clone();
        let done = done.clone();
        let on_settle = on_settle.clone();
        let cont: Cont<O> = Box::new(move |db, inner| {
            let left = remaining.fetch_sub(1, Ordering::SeqCst) - 1;
            let is_last = left == 0;
            if done.load(Ordering::SeqCst) {
                return;
            }
            let mut on_settle = on_settle.lock();
            if (on_settle)(db, inner, id, is_last) {
                done.store(true, Ordering::SeqCst);
            }
        });
        install(id, cont);
    }
}
