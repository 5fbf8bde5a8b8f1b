//! `showJSON` (`# 4.10`): a textual dump of the database's current
//! results, in dependency order, with ids and steps compacted down to
//! small sequential numbers so the output reads the same across runs
//! regardless of how large the underlying `Id`/`Step` counters have
//! grown.
//!
//! Uses `serde_json` for the wire shape rather than hand-building a
//! string, matching how the pack's closest analogues (e.g.
//! `adamtc007-ob-poc`, `seanchatmangpt-knhk`) render structured output
//! -- this crate's own persisted format is `rmp-serde`, but `# 4.10`
//! asks for "textual", and JSON is the natural choice for a
//! human/tool-facing dump.

use crate::error::BuildError;
use crate::intern::Id;
use crate::ops::Ops;
use crate::result::Record;
use crate::scheduler::Database;
use crate::status::Status;
use crate::step::Step;
use rustc_hash::FxHashMap;
use std::collections::BTreeSet;

/// Produces the `# 4.10` dump as a [`serde_json::Value`] (an array of
/// objects), ready for a caller to serialize however it likes.
pub fn show_json<O: Ops>(db: &Database<O>) -> Result<serde_json::Value, BuildError> {
    let inner = db.inner();
    let step_key = crate::step::step_key();

    let mut surviving: Vec<(Id, Record)> = Vec::new();
    for (id, status) in inner.iter() {
        if inner.key(id) == &step_key {
            continue;
        }
        if let Some(record) = status.record() {
            surviving.push((id, record.clone()));
        }
    }

    let surviving_ids: std::collections::HashSet<Id> = surviving.iter().map(|(id, _)| *id).collect();

    let mut deps: FxHashMap<Id, Vec<Id>> = FxHashMap::default();
    for (id, record) in &surviving {
        let flat: Vec<Id> = record
            .depends
            .iter()
            .flat_map(|group| group.iter().copied())
            .filter(|d| surviving_ids.contains(d))
            .collect();
        deps.insert(*id, flat);
    }

    let order = crate::topo::order(&deps, |id| db.witness().display_key(inner.key(id)))?;

    let compact_index: FxHashMap<Id, usize> =
        order.iter().enumerate().map(|(i, &id)| (id, i)).collect();

    let mut steps: BTreeSet<Step> = BTreeSet::new();
    for (_, record) in &surviving {
        steps.insert(record.built);
        steps.insert(record.changed);
    }
    let rank: FxHashMap<Step, usize> = steps
        .iter()
        .rev()
        .enumerate()
        .map(|(rank, &step)| (step, rank))
        .collect();

    let by_id: FxHashMap<Id, &Record> = surviving.iter().map(|(id, r)| (*id, r)).collect();

    let mut out = Vec::with_capacity(order.len());
    for id in &order {
        let record = by_id[id];
        let depends: Vec<usize> = record
            .depends
            .iter()
            .flat_map(|group| group.iter().copied())
            .filter_map(|d| compact_index.get(&d).copied())
            .collect();
        let mut obj = serde_json::json!({
            "name": db.witness().display_key(inner.key(*id)),
            "built": rank[&record.built],
            "changed": rank[&record.changed],
            "depends": depends,
            "execution": record.execution,
        });
        if !record.traces.is_empty() {
            obj["traces"] = serde_json::json!(record
                .traces
                .iter()
                .map(|t| serde_json::json!({
                    "message": t.message,
                    "start": t.start,
                    "end": t.end,
                }))
                .collect::<Vec<_>>());
        }
        out.push(obj);
    }

    Ok(serde_json::Value::Array(out))
}
