//! The scheduler core (`# 4.5`): `reduce` / `run` / `check`, the status
//! map and its single lock, and the `build` entry point that drives
//! them. This is the 40%-of-the-core piece `# 2` calls out; everything
//! else in this crate (intern table, journal, waiting, stack, topo,
//! progress, validity) is a collaborator this module drives or is
//! driven by.
//!
//! Grounded on the teacher's `Slot::read`/`maybe_changed_since`
//! (`src/derived/slot.rs`), which plays the same three-way role --
//! "not computed yet" dispatches a fresh computation, "computed but
//! unverified" walks `MemoRevisions::inputs` to decide between reuse and
//! recompute, "in progress" joins the existing computation's waiter list
//! -- generalized here from the teacher's single in-process revision
//! counter to the persisted, crash-recoverable `Status`/`Record` pair
//! `# 3`/`# 4.5` specify.

use crate::error::BuildError;
use crate::intern::{Id, InternTable};
use crate::journal::{self, Journal};
use crate::key::{Key, Value, Witness};
use crate::ops::{Assume, BuildHandle, Ops, Produced};
use crate::pool::Pool;
use crate::result::{DependencyGroup, Record};
use crate::stack::Stack;
use crate::status::Status;
use crate::step::{step_key, AtomicStep, Duration, Step, StepCount};
use crate::waiting::{wait_for, Pending};
use log::{debug, trace};
use parking_lot::Mutex;
use rustc_hash::FxHashMap;
use std::io;
use std::path::PathBuf;
use std::sync::mpsc;
use std::sync::Arc;
use std::time::Instant;

/// Configuration surface for [`with_database`] (`SPEC_FULL.md` A.3): the
/// journal location and the pool's worker count. The `Assume` policy
/// (`# 6`) is supplied per `build` call instead of fixed here, since `#
/// 6` describes it as a per-request override.
#[derive(Clone, Debug)]
pub struct BuildOptions {
    pub journal_path: PathBuf,
    pub workers: usize,
}

impl Default for BuildOptions {
    fn default() -> Self {
        BuildOptions {
            journal_path: PathBuf::from("kiln.journal"),
            workers: 4,
        }
    }
}

/// The in-memory map from `Id` to `(Key, Status)` (`# 4.3`), plus the
/// intern table the ids were assigned from. Every field is mutated only
/// while [`Database::inner`]'s lock is held.
pub struct Inner<O: Ops> {
    pub(crate) intern: InternTable,
    statuses: Vec<Status<O>>,
}

impl<O: Ops> Inner<O> {
    /// Interns `key`, extending the status vector with a fresh `Missing`
    /// entry if this is the first time `key` has been seen. Returns
    /// whether the id was freshly assigned.
    fn intern(&mut self, key: Key) -> (Id, bool) {
        let before = self.intern.len();
        let id = self.intern.intern(key);
        let fresh = id.index() == before;
        if fresh {
            self.statuses.push(Status::Missing);
        }
        (id, fresh)
    }

    pub(crate) fn status(&self, id: Id) -> &Status<O> {
        &self.statuses[id.index()]
    }

    fn status_mut(&mut self, id: Id) -> &mut Status<O> {
        &mut self.statuses[id.index()]
    }

    fn take_status(&mut self, id: Id) -> Status<O> {
        std::mem::replace(&mut self.statuses[id.index()], Status::Missing)
    }

    fn set_status(&mut self, id: Id, status: Status<O>) {
        self.statuses[id.index()] = status;
    }

    pub(crate) fn ids(&self) -> impl Iterator<Item = Id> + '_ {
        self.intern.ids()
    }

    pub(crate) fn key(&self, id: Id) -> &Key {
        self.intern.key(id)
    }

    /// Every id paired with its current status, for the progress
    /// aggregator, the JSON dump, and `checkValid`, none of which need
    /// write access to the map.
    pub(crate) fn iter(&self) -> impl Iterator<Item = (Id, &Status<O>)> {
        self.statuses.iter().enumerate().map(|(i, s)| (Id::from_index(i as u32), s))
    }
}

/// The database handle (`# 6`): owns the collaborators (`ops`, `pool`),
/// the logical clock, the live journal file, and the locked status map.
pub struct Database<O: Ops> {
    ops: O,
    pool: Arc<dyn Pool>,
    witness: Witness,
    step: AtomicStep,
    journal: Mutex<Journal>,
    inner: Mutex<Inner<O>>,
}

impl<O: Ops> Database<O> {
    pub fn ops(&self) -> &O {
        &self.ops
    }

    pub fn witness(&self) -> &Witness {
        &self.witness
    }

    /// The current step: constant for the lifetime of this `Database`
    /// (`# 3` "step within a process is constant").
    pub fn step(&self) -> Step {
        self.step.load()
    }

    pub(crate) fn inner(&self) -> parking_lot::MutexGuard<'_, Inner<O>> {
        self.inner.lock()
    }

    /// `progress(db)` (`# 6`, `# 4.8`): a snapshot fold over the status
    /// map's current contents.
    pub fn progress(&self) -> crate::progress::Progress {
        let inner = self.inner();
        crate::progress::fold(self.step(), inner.iter().map(|(_, s)| s))
    }

    /// `checkValid(db)` (`# 6`, `# 4.9`).
    pub fn check_valid(&self) -> Result<(), BuildError> {
        crate::validity::check_valid(self)
    }

    /// `showJSON(db)` (`# 6`, `# 4.10`).
    pub fn show_json(&self) -> Result<serde_json::Value, BuildError> {
        crate::jsondump::show_json(self)
    }
}

/// What a single `reduce` call settled on for one id, before any
/// barrier wait. Never observed outside this module -- callers only
/// ever see the terminal `(Duration, Vec<Id>, Vec<Value>)` a completed
/// `build` returns, or the propagated `Arc<BuildError>`.
enum Outcome {
    Ready(Record),
    Error(Arc<BuildError>),
    Waiting,
}

/// Rewrites every id in `depends` from the writing process's numbering
/// to this process's, via `id_map` (persisted id -> freshly re-interned
/// id). A dependency always settles, and so is journaled, before the
/// record that names it, so by the time this is called for a given
/// entry every id its `depends` references is already a key in
/// `id_map`; an id missing from the map (a torn-tail dependency that
/// never made it to disk) is left as-is rather than panicking, since
/// `# 4.2` already treats a torn tail as a normal crash-recovery case.
fn remap_depends(depends: &mut [DependencyGroup], id_map: &FxHashMap<Id, Id>) {
    for group in depends.iter_mut() {
        for dep in group.iter_mut() {
            if let Some(&mapped) = id_map.get(dep) {
                *dep = mapped;
            }
        }
    }
}

/// `withDatabase` (`# 6`): opens the journal, replays it, bumps and
/// re-journals the step, and hands the caller a live [`Database`].
pub fn with_database<O, F, R>(
    options: BuildOptions,
    ops: O,
    witness: Witness,
    pool: Arc<dyn Pool>,
    body: F,
) -> io::Result<R>
where
    O: Ops,
    F: FnOnce(&Arc<Database<O>>) -> R,
{
    let recovered = journal::replay(&options.journal_path)?;
    let mut intern = InternTable::new();
    let mut statuses: Vec<Status<O>> = Vec::new();
    let skey = step_key();
    let mut loaded_step = Step::ZERO;

    // Each record's `depends` was written under the *writing* process's
    // own intern order, which need not match the file order this loop
    // re-interns keys in (entries are appended in settlement order, not
    // first-mention order -- a dependent always settles, and so is
    // journaled, after its dependencies, but its own id was assigned
    // when *it* was first requested, which can be earlier). Track
    // old-id -> new-id here and remap every recovered `depends` entry
    // before it re-enters the status map, or `check`/`reduce` would walk
    // whatever key now happens to occupy that numeric slot (`# 3`'s "Id
    // ... remapped on load").
    let mut id_map: FxHashMap<Id, Id> = FxHashMap::default();

    for entry in recovered {
        let is_step_key = entry.key == skey;
        let id = intern.intern(entry.key);
        debug_assert_eq!(id.index(), statuses.len(), "journal replay must re-intern in file order");
        id_map.insert(entry.persisted_id, id);
        let status = match entry.record {
            None => Status::Missing,
            Some(mut record) => {
                if is_step_key {
                    if let Some(StepCount(n)) = record.value.decode::<StepCount>() {
                        loaded_step = Step::from_u32(n);
                    }
                }
                remap_depends(&mut record.depends, &id_map);
                Status::Loaded(record)
            }
        };
        statuses.push(status);
    }
    debug!("journal replay recovered {} ids, step {:?}", intern.len(), loaded_step);

    let mut journal_file = Journal::open_append(&options.journal_path)?;
    let atomic_step = AtomicStep::starting_at(loaded_step);
    let current = atomic_step.advance();

    let (step_id, fresh) = {
        let before = intern.len();
        let id = intern.intern(skey.clone());
        (id, id.index() == before)
    };
    if fresh {
        statuses.push(Status::Missing);
    }
    let step_record = Record::new(
        Value::of(&StepCount(current.as_u32())),
        current,
        current,
        Vec::new(),
        0.0,
        Vec::new(),
    );
    statuses[step_id.index()] = Status::Ready(step_record.clone());
    journal_file.record_loaded(step_id, &skey, &step_record)?;
    debug!("database opened at step {current:?}");

    let db = Arc::new(Database {
        ops,
        pool,
        witness,
        step: atomic_step,
        journal: Mutex::new(journal_file),
        inner: Mutex::new(Inner { intern, statuses }),
    });

    Ok(body(&db))
}

/// `build` (`# 4.5`, `# 6`): the top-level entry point for a fresh
/// request (not itself nested inside another key's `execute`).
pub fn build<O: Ops>(
    db: &Arc<Database<O>>,
    keys: &[Key],
    assume: Assume,
) -> Result<Vec<Value>, Arc<BuildError>> {
    build_with_stack(db, &Stack::new(), keys, assume).map(|(_, _, values)| values)
}

/// The recursive form of `build`, threading the caller's [`Stack`]
/// through so a nested `execute`'s own dependency requests can be
/// cycle-checked against every key still on the stack.
fn build_with_stack<O: Ops>(
    db: &Arc<Database<O>>,
    stack: &Stack,
    keys: &[Key],
    assume: Assume,
) -> Result<(Duration, Vec<Id>, Vec<Value>), Arc<BuildError>> {
    let start = Instant::now();
    let mut inner = db.inner.lock();

    let ids: Vec<Id> = keys.iter().map(|k| inner.intern(k.clone()).0).collect();

    if let Some(cyclic) = stack.check(&ids) {
        let key = inner.intern.key(cyclic).clone();
        drop(inner);
        let chain = stack.chain_display(&db.witness);
        return Err(Arc::new(BuildError::recursion(
            db.witness.display_key(&key),
            &chain,
        )));
    }

    let outcomes: Vec<Outcome> = ids
        .iter()
        .map(|&id| reduce(db, &mut inner, stack, id, assume))
        .collect();

    if let Some(e) = outcomes.iter().find_map(|o| match o {
        Outcome::Error(e) => Some(e.clone()),
        _ => None,
    }) {
        return Err(e);
    }

    if outcomes.iter().all(|o| matches!(o, Outcome::Ready(_))) {
        let values = outcomes
            .into_iter()
            .map(|o| match o {
                Outcome::Ready(r) => r.value,
                _ => unreachable!(),
            })
            .collect();
        return Ok((0.0, ids, values));
    }

    let waiting_ids: Vec<Id> = ids
        .iter()
        .zip(&outcomes)
        .filter(|(_, o)| matches!(o, Outcome::Waiting))
        .map(|(&id, _)| id)
        .collect();

    let (tx, rx) = mpsc::channel::<()>();
    let tx = Mutex::new(Some(tx));
    wait_for(
        &waiting_ids,
        |id, cont| match inner.status_mut(id) {
            Status::Waiting(pending, _) => pending.after(cont),
            _ => unreachable!("waitFor installed on a settled id"),
        },
        move |_db, _inner, _id, is_last| {
            if is_last {
                if let Some(tx) = tx.lock().take() {
                    let _ = tx.send(());
                }
            }
            is_last
        },
    );
    drop(inner);

    db.pool.block_on(Box::new(move || {
        let _ = rx.recv();
    }));
    let waited = start.elapsed().as_secs_f64();

    let inner = db.inner.lock();
    let mut values = Vec::with_capacity(ids.len());
    let mut error = None;
    for &id in &ids {
        match inner.status(id) {
            Status::Ready(r) => values.push(r.value.clone()),
            Status::Error(e) => {
                error = Some(e.clone());
                break;
            }
            _ => {
                return Err(Arc::new(BuildError::internal_invariant(format!(
                    "id {id:?} not terminal after its barrier fired"
                ))));
            }
        }
    }
    drop(inner);

    match error {
        Some(e) => Err(e),
        None => Ok((waited, ids, values)),
    }
}

/// `reduce(stack, id)` (`# 4.5`): the single-id decision step. Always
/// called with `inner`'s lock already held.
fn reduce<O: Ops>(
    db: &Arc<Database<O>>,
    inner: &mut Inner<O>,
    stack: &Stack,
    id: Id,
    assume: Assume,
) -> Outcome {
    match inner.take_status(id) {
        Status::Missing => {
            let key = inner.intern.key(id).clone();
            trace!("{key:?}: Missing -> Waiting (run)");
            dispatch_run(db, inner, stack, id, key, None, assume);
            Outcome::Waiting
        }
        Status::Loaded(r) => {
            let key = inner.intern.key(id).clone();
            match assume {
                Assume::AssumeDirty | Assume::AssumeClean => {
                    trace!("{key:?}: Loaded -> Waiting (run, {assume:?})");
                    dispatch_run(db, inner, stack, id, key, Some(r), assume);
                    Outcome::Waiting
                }
                Assume::AssumeSkip => {
                    trace!("{key:?}: Loaded -> Ready (AssumeSkip)");
                    inner.set_status(id, Status::Ready(r.clone()));
                    Outcome::Ready(r)
                }
                Assume::Normal => {
                    let stored = db.ops.stored(&key);
                    let matches = stored.as_ref().map(|v| *v == r.value).unwrap_or(false);
                    if matches {
                        trace!("{key:?}: Loaded, stored matches -> check dependencies");
                        check(db, inner, stack, id, key, r, 0)
                    } else {
                        trace!("{key:?}: Loaded, stored mismatched -> Waiting (run)");
                        dispatch_run(db, inner, stack, id, key, Some(r), assume);
                        Outcome::Waiting
                    }
                }
            }
        }
        Status::Waiting(pending, prior) => {
            inner.set_status(id, Status::Waiting(pending, prior));
            Outcome::Waiting
        }
        Status::Ready(r) => {
            inner.set_status(id, Status::Ready(r.clone()));
            Outcome::Ready(r)
        }
        Status::Error(e) => {
            inner.set_status(id, Status::Error(e.clone()));
            Outcome::Error(e)
        }
    }
}

/// Preserves any continuations already attached to `id`'s current
/// `Waiting` status (if it has one) so a replacement `Waiting` installed
/// by `dispatch_run`/`check` never loses a caller that registered a
/// `waitFor` against the status it is about to overwrite.
fn carry_over_pending<O: Ops>(inner: &mut Inner<O>, id: Id) -> Pending<O> {
    match inner.take_status(id) {
        Status::Waiting(pending, _) => pending,
        other => {
            inner.set_status(id, other);
            Pending::new()
        }
    }
}

/// `run(stack, id, key, prior?)` (`# 4.5`): installs a fresh `Waiting`
/// and posts the actual execution to the pool.
fn dispatch_run<O: Ops>(
    db: &Arc<Database<O>>,
    inner: &mut Inner<O>,
    stack: &Stack,
    id: Id,
    key: Key,
    prior: Option<Record>,
    assume: Assume,
) {
    let pending = carry_over_pending(inner, id);
    inner.set_status(id, Status::Waiting(pending, prior.clone()));

    let db = db.clone();
    let child_stack = stack.push(id, key.clone());
    db.pool.clone().spawn(Box::new(move || {
        run_task(db, child_stack, id, key, prior, assume);
    }));
}

/// The pool task body dispatched by `dispatch_run`, run off the
/// database lock.
fn run_task<O: Ops>(
    db: Arc<Database<O>>,
    stack: Stack,
    id: Id,
    key: Key,
    prior: Option<Record>,
    assume: Assume,
) {
    let outcome: Result<Record, Arc<BuildError>> = (|| {
        if assume == Assume::AssumeClean {
            if let Some(ref p) = prior {
                if let Some(stored_value) = db.ops.stored(&key) {
                    let changed = if stored_value == p.value {
                        p.changed
                    } else {
                        db.step()
                    };
                    return Ok(Record::new(
                        stored_value,
                        db.step(),
                        changed,
                        p.depends.clone(),
                        p.execution,
                        p.traces.clone(),
                    ));
                }
            }
        }

        let handle = Handle::new(db.clone(), stack.clone());
        let start = Instant::now();
        match db.ops.execute(&handle, id, &key) {
            Ok(Produced { value, traces }) => {
                let elapsed = start.elapsed().as_secs_f64();
                let changed = match &prior {
                    Some(p) if p.value == value => p.changed,
                    _ => db.step(),
                };
                Ok(Record::new(
                    value,
                    db.step(),
                    changed,
                    handle.into_groups(),
                    elapsed,
                    traces,
                ))
            }
            Err(e) => Err(Arc::new(BuildError::execution(
                db.witness.display_key(&key),
                e,
            ))),
        }
    })();

    let new_status = match &outcome {
        Ok(r) => Status::Ready(r.clone()),
        Err(e) => Status::Error(e.clone()),
    };

    let mut inner = db.inner.lock();
    let old = inner.take_status(id);
    inner.set_status(id, new_status);
    if let Status::Waiting(pending, _) = old {
        pending.fire(&db, &mut inner);
    }
    drop(inner);

    let mut journal = db.journal.lock();
    let result = match &outcome {
        Ok(r) => journal.record_loaded(id, &key, r),
        Err(_) => journal.record_missing(id, &key),
    };
    if let Err(e) = result {
        debug!("journal write for {key:?} failed: {e}");
    }
}

/// `check(stack, id, key, r, groups)` (`# 4.5`): walks `r`'s dependency
/// groups in order, deciding whether `r` is still valid without
/// re-running `execute`.
fn check<O: Ops>(
    db: &Arc<Database<O>>,
    inner: &mut Inner<O>,
    stack: &Stack,
    id: Id,
    key: Key,
    r: Record,
    group_index: usize,
) -> Outcome {
    if group_index >= r.depends.len() {
        let pending = carry_over_pending(inner, id);
        inner.set_status(id, Status::Ready(r.clone()));
        pending.fire(db, inner);
        return Outcome::Ready(r);
    }

    let group: Vec<Id> = r.depends[group_index].iter().copied().collect();
    let dep_stack = stack.push(id, key.clone());

    let mut error: Option<Arc<BuildError>> = None;
    let mut stale = false;
    let mut waiting_ids: Vec<Id> = Vec::new();
    for dep in group {
        match reduce(db, inner, &dep_stack, dep, Assume::Normal) {
            Outcome::Error(e) => {
                if error.is_none() {
                    error = Some(e);
                }
            }
            Outcome::Ready(dep_r) => {
                if dep_r.changed > r.built {
                    stale = true;
                }
            }
            Outcome::Waiting => waiting_ids.push(dep),
        }
    }

    if error.is_some() || stale {
        dispatch_run(db, inner, stack, id, key, Some(r), Assume::Normal);
        return Outcome::Waiting;
    }

    if waiting_ids.is_empty() {
        return check(db, inner, stack, id, key, r, group_index + 1);
    }

    let pending = carry_over_pending(inner, id);
    inner.set_status(id, Status::Waiting(pending, Some(r.clone())));

    let stack2 = stack.clone();
    let key2 = key.clone();
    let r2 = r;
    wait_for(
        &waiting_ids,
        |dep_id, cont| match inner.status_mut(dep_id) {
            Status::Waiting(pending, _) => pending.after(cont),
            _ => unreachable!("waitFor installed on a settled dependency"),
        },
        move |db3, inner3, dep_id, is_last| {
            let triggers_run = match inner3.status(dep_id) {
                Status::Ready(dr) => dr.changed > r2.built,
                Status::Error(_) => true,
                _ => unreachable!("a dependency's Waiting fired before it settled"),
            };
            if triggers_run {
                dispatch_run(db3, inner3, &stack2, id, key2.clone(), Some(r2.clone()), Assume::Normal);
                return true;
            }
            if is_last {
                check(db3, inner3, &stack2, id, key2.clone(), r2.clone(), group_index + 1);
                return true;
            }
            false
        },
    );

    Outcome::Waiting
}

/// What `Ops::execute` uses to recurse into the scheduler (`# 4.5`,
/// `# 6`). Each call to [`BuildHandle::build`] becomes one dependency
/// group, in call order.
struct Handle<O: Ops> {
    db: Arc<Database<O>>,
    stack: Stack,
    groups: Mutex<Vec<DependencyGroup>>,
}

impl<O: Ops> Handle<O> {
    fn new(db: Arc<Database<O>>, stack: Stack) -> Self {
        Handle {
            db,
            stack,
            groups: Mutex::new(Vec::new()),
        }
    }

    fn into_groups(self) -> Vec<DependencyGroup> {
        self.groups.into_inner()
    }
}

impl<O: Ops> BuildHandle for Handle<O> {
    fn build(&self, keys: &[Key]) -> Result<Vec<Value>, Arc<BuildError>> {
        let (_waited, ids, values) = build_with_stack(&self.db, &self.stack, keys, Assume::Normal)?;
        self.groups.lock().push(ids.into_iter().collect());
        Ok(values)
    }
}
