#![warn(rust_2018_idioms)]

//! A crash-safe, concurrent, dependency-directed incremental build
//! database and scheduler.
//!
//! A caller opens a [`Database`](scheduler::Database) over an [`Ops`]
//! implementation (the "stored"/"execute" collaborator contract) and a
//! [`Pool`] (the bounded worker pool), then drives it through [`build`],
//! [`Database::progress`], [`Database::show_json`], and
//! [`Database::check_valid`]. Every key and value is an opaque, tagged
//! [`Key`]/[`Value`] pair, so the database itself never needs to know
//! the concrete Rust types a particular build uses -- only the
//! [`Witness`] registry, consulted purely for display, does.

mod error;
mod intern;
mod journal;
mod jsondump;
mod key;
mod ops;
mod pool;
mod progress;
mod result;
mod scheduler;
mod stack;
mod status;
mod step;
mod topo;
mod validity;
mod waiting;

pub use crate::error::BuildError;
pub use crate::intern::Id;
pub use crate::key::{Key, Payload, Value, Witness};
pub use crate::ops::{Assume, BuildHandle, Ops, Produced};
pub use crate::pool::{Pool, ThreadPool};
pub use crate::progress::{Progress, ProgressCounts, ProgressTimes};
pub use crate::result::{DependencyGroup, Record};
pub use crate::scheduler::{build, with_database, BuildOptions, Database};
pub use crate::step::{Duration, Step, Trace};
