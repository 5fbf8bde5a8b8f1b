//! The dependency-order topological emitter (`# 4.7`), used both by the
//! JSON dump (`# 4.10`) and by nothing else in this crate -- it is kept
//! generic over `Id` only because that is its sole caller's need, but
//! the algorithm itself is the general "emit nodes only after every
//! dependency has been emitted" one `# 4.7` specifies.
//!
//! Unlike a textbook Kahn's-algorithm pass that tracks a per-node
//! in-degree counter, this follows `# 4.7` literally: each node with
//! outstanding dependencies is registered as "waiting on my first
//! remaining dependency, with the rest parked for later"; emitting a
//! dependency releases everyone waiting on it, and each release either
//! emits the waiter (no dependencies left) or re-registers it under the
//! next one. A cycle leaves some nodes permanently parked in `waiting`,
//! never released, which is exactly the set the error reports.

use crate::intern::Id;
use rustc_hash::{FxHashMap, FxHashSet};
use std::collections::VecDeque;

use crate::error::BuildError;

/// Computes a linear order of every key in `deps` such that each key
/// appears after all ids listed in its own dependency list. `deps` must
/// contain an entry (possibly empty) for every id that should appear in
/// the output, including leaves. `display` renders an id for the cycle
/// error's offender list.
pub fn order<F>(deps: &FxHashMap<Id, Vec<Id>>, display: F) -> Result<Vec<Id>, BuildError>
where
    F: Fn(Id) -> String,
{
    let mut waiting: FxHashMap<Id, Vec<(Id, Vec<Id>)>> = FxHashMap::default();
    let mut queue: VecDeque<Id> = VecDeque::new();

    for (&id, ds) in deps {
        // A dependency can legitimately appear more than once in `ds`
        // (the same id demanded in two separate groups, or twice within
        // one); deduplicate before registering waiters, or the second
        // occurrence would re-park this node under an id already
        // emitted, which then never releases it.
        let mut local_seen: FxHashSet<Id> = FxHashSet::default();
        let deduped: Vec<Id> = ds.iter().copied().filter(|d| local_seen.insert(*d)).collect();
        if deduped.is_empty() {
            queue.push_back(id);
        } else {
            let mut rest = deduped;
            let first = rest.remove(0);
            waiting.entry(first).or_default().push((id, rest));
        }
    }

    let mut emitted = Vec::with_capacity(deps.len());
    let mut seen: FxHashSet<Id> = FxHashSet::default();
    while let Some(id) = queue.pop_front() {
        if !seen.insert(id) {
            continue;
        }
        emitted.push(id);
        if let Some(released) = waiting.remove(&id) {
            for (waiter, mut remaining) in released {
                if remaining.is_empty() {
                    queue.push_back(waiter);
                } else {
                    let next = remaining.remove(0);
                    waiting.entry(next).or_default().push((waiter, remaining));
                }
            }
        }
    }

    if emitted.len() < deps.len() {
        let mut offenders: Vec<Id> = deps
            .keys()
            .copied()
            .filter(|id| !seen.contains(id))
            .collect();
        offenders.sort_by_key(|id| id.index());
        let overflow = offenders.len().saturating_sub(10);
        offenders.truncate(10);
        let names: Vec<String> = offenders.into_iter().map(display).collect();
        return Err(BuildError::cyclic(&names, overflow));
    }

    Ok(emitted)
}

#[cfg(test)]
mod tests {
    use super::*;

    fn id(n: u32) -> Id {
        Id::from_index(n)
    }

    #[test]
    fn linear_chain_orders_dependencies_first() {
        // a depends on b, b depends on c
        let mut deps = FxHashMap::default();
        deps.insert(id(0), vec![id(1)]);
        deps.insert(id(1), vec![id(2)]);
        deps.insert(id(2), vec![]);
        let order = order(&deps, |i| format!("{i:?}")).unwrap();
        let pos = |x: Id| order.iter().position(|&y| y == x).unwrap();
        assert!(pos(id(2)) < pos(id(1)));
        assert!(pos(id(1)) < pos(id(0)));
    }

    #[test]
    fn diamond_orders_each_dependency_before_its_dependents() {
        // a depends on b and c; both depend on d.
        let mut deps = FxHashMap::default();
        deps.insert(id(0), vec![id(1), id(2)]);
        deps.insert(id(1), vec![id(3)]);
        deps.insert(id(2), vec![id(3)]);
        deps.insert(id(3), vec![]);
        let order = order(&deps, |i| format!("{i:?}")).unwrap();
        let pos = |x: Id| order.iter().position(|&y| y == x).unwrap();
        assert!(pos(id(3)) < pos(id(1)));
        assert!(pos(id(3)) < pos(id(2)));
        assert!(pos(id(1)) < pos(id(0)));
        assert!(pos(id(2)) < pos(id(0)));
    }

    #[test]
    fn duplicate_dependency_entries_do_not_cause_a_false_cycle() {
        // `a` lists `b` twice (e.g. demanded in two separate groups).
        let mut deps = FxHashMap::default();
        deps.insert(id(0), vec![id(1), id(1)]);
        deps.insert(id(1), vec![]);
        let order = order(&deps, |i| format!("{i:?}")).unwrap();
        let pos = |x: Id| order.iter().position(|&y| y == x).unwrap();
        assert_eq!(order.len(), 2);
        assert!(pos(id(1)) < pos(id(0)));
    }

    #[test]
    fn cycle_is_reported_with_offenders() {
        let mut deps = FxHashMap::default();
        deps.insert(id(0), vec![id(1)]);
        deps.insert(id(1), vec![id(0)]);
        let err = order(&deps, |i| format!("{i:?}")).unwrap_err();
        let msg = format!("{err}");
        assert!(msg.contains("Id(0)") || msg.contains("Id(1)"));
    }

    #[test]
    fn overflow_count_reported_past_ten_offenders() {
        // 12 keys in one cycle: 0 -> 1 -> ... -> 11 -> 0
        let mut deps = FxHashMap::default();
        for i in 0..12u32 {
            deps.insert(id(i), vec![id((i + 1) % 12)]);
        }
        let err = order(&deps, |i| format!("{i:?}")).unwrap_err();
        let msg = format!("{err}");
        assert!(msg.contains("and 2 more"));
    }
}
