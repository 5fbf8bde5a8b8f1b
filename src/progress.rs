//! The progress aggregator (`# 4.8`): a single fold over the status map
//! producing running counts and accumulated durations, used by a
//! consuming front-end to render a progress bar without it ever walking
//! the status map itself.

use crate::ops::Ops;
use crate::status::Status;
use crate::step::{Duration, Step};

/// How many keys fall into each of `# 4.8`'s four buckets.
#[derive(Copy, Clone, Debug, Default, PartialEq, Eq)]
pub struct ProgressCounts {
    pub built: usize,
    pub skipped: usize,
    pub unknown: usize,
    pub todo: usize,
}

/// Durations accumulated alongside [`ProgressCounts`].
#[derive(Copy, Clone, Debug, Default, PartialEq)]
pub struct ProgressTimes {
    /// Sum of `execution` for every `built` key.
    pub built: Duration,
    /// Sum of `execution` for every `skipped` key.
    pub skipped: Duration,
    /// Sum of `execution` for every `unknown` key (`Loaded` records and,
    /// per the counting decision in `SPEC_FULL.md` D, `Error` keys).
    pub unknown: Duration,
    /// Sum of the prior `execution` for every `todo` key that has a
    /// remembered prior result, used as an estimate of remaining work.
    pub estimated_remaining: Duration,
    /// Count of `todo` keys with no prior result to estimate a duration
    /// from at all (first-ever build of that key).
    pub todo_unknown_duration: usize,
}

/// A snapshot of the status map's progress (`# 6` `progress(db)`).
#[derive(Copy, Clone, Debug, Default, PartialEq)]
pub struct Progress {
    pub counts: ProgressCounts,
    pub times: ProgressTimes,
}

/// Folds every status in the map into a [`Progress`] snapshot, given the
/// database's current step.
pub fn fold<'a, O, I>(current_step: Step, statuses: I) -> Progress
where
    O: Ops + 'a,
    I: IntoIterator<Item = &'a Status<O>>,
{
    let mut progress = Progress::default();
    for status in statuses {
        match status {
            Status::Ready(r) if r.built == current_step => {
                progress.counts.built += 1;
                progress.times.built += r.execution;
            }
            Status::Ready(r) => {
                progress.counts.skipped += 1;
                progress.times.skipped += r.execution;
            }
            Status::Loaded(r) => {
                progress.counts.unknown += 1;
                progress.times.unknown += r.execution;
            }
            Status::Error(_) => {
                // SPEC_FULL.md D: an Error, like a Loaded record, is a key
                // whose current truth value this process never
                // established, so it is counted alongside Loaded.
                progress.counts.unknown += 1;
            }
            Status::Waiting(_, prior) => {
                progress.counts.todo += 1;
                match prior {
                    Some(r) => progress.times.estimated_remaining += r.execution,
                    None => progress.times.todo_unknown_duration += 1,
                }
            }
            Status::Missing => {}
        }
    }
    progress
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::key::{Key, Payload, Value};
    use crate::ops::{BuildHandle, Produced};
    use crate::result::Record;
    use crate::waiting::Pending;
    use serde::{Deserialize, Serialize};
    use std::error::Error as StdError;
    use std::sync::Arc;

    #[derive(Debug, Serialize, Deserialize)]
    struct V(u32);
    impl Payload for V {
        const TAG: &'static str = "progress::V";
    }

    struct NoOps;
    impl Ops for NoOps {
        fn stored(&self, _key: &Key) -> Option<Value> {
            None
        }
        fn execute(
            &self,
            _handle: &dyn BuildHandle,
            _id: crate::intern::Id,
            _key: &Key,
        ) -> Result<Produced, Box<dyn StdError + Send + Sync>> {
            unreachable!()
        }
    }

    fn record(built: u32, execution: Duration) -> Record {
        Record::new(
            Value::of(&V(1)),
            Step::from_u32(built),
            Step::from_u32(built),
            vec![],
            execution,
            vec![],
        )
    }

    #[test]
    fn built_and_skipped_split_on_current_step() {
        let current = Step::from_u32(3);
        let statuses: Vec<Status<NoOps>> = vec![
            Status::Ready(record(3, 1.0)),
            Status::Ready(record(2, 2.0)),
        ];
        let p = fold::<NoOps, _>(current, &statuses);
        assert_eq!(p.counts.built, 1);
        assert_eq!(p.counts.skipped, 1);
        assert_eq!(p.times.built, 1.0);
        assert_eq!(p.times.skipped, 2.0);
    }

    #[test]
    fn loaded_and_error_both_count_unknown() {
        let current = Step::from_u32(1);
        let statuses: Vec<Status<NoOps>> = vec![
            Status::Loaded(record(0, 5.0)),
            Status::Error(Arc::new(crate::error::BuildError::internal_invariant("x"))),
        ];
        let p = fold::<NoOps, _>(current, &statuses);
        assert_eq!(p.counts.unknown, 2);
        assert_eq!(p.times.unknown, 5.0);
    }

    #[test]
    fn waiting_splits_on_prior_presence() {
        let current = Step::from_u32(1);
        let statuses: Vec<Status<NoOps>> = vec![
            Status::Waiting(Pending::new(), Some(record(0, 4.0))),
            Status::Waiting(Pending::new(), None),
        ];
        let p = fold::<NoOps, _>(current, &statuses);
        assert_eq!(p.counts.todo, 2);
        assert_eq!(p.times.estimated_remaining, 4.0);
        assert_eq!(p.times.todo_unknown_duration, 1);
    }
}
