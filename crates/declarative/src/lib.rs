//! # Declarative
//!
//! Declarative reconciliation of RouterOS facilities.
//!
//! A task names a facility and a mode; the planner reads the current
//! records and computes the smallest ordered list of writes that makes the
//! facility match, and the executor applies it.
//!
//! ## Core Concepts
//!
//! - **Task**: a facility path plus a reconciliation [`Mode`]
//! - **Plan**: the writes for one task, with any return values
//! - **Operation**: one primitive write (add, remove, set, move, toggle)
//! - **Executor**: applies plans in order and surfaces partial applies
//!
//! ## Example
//!
//! ```
//! use declarative::{ApplyContext, FacilityTask, Missing, Mode, NoProgress, Task, run_task};
//! use routeros::backend::memory::MemoryBackend;
//! use routeros::{Condition, FacilityPath, FindSpec, Value};
//!
//! let mut backend = MemoryBackend::new().with_items("/ip pool", vec![]);
//! let line = FindSpec::new().with("name", Condition::Literal(Value::str("dhcp")));
//! let mode = Mode::Present { lines: vec![line], ordered: false, position: 1, missing: Missing::Add };
//! let task = Task::Facility(FacilityTask::new(FacilityPath::parse("/ip pool").unwrap(), mode).unwrap());
//!
//! let outcome = run_task(&task, &mut backend, &mut ApplyContext::new(false), &mut NoProgress);
//! assert!(outcome.changed);
//! assert_eq!(backend.records("/ip pool").len(), 1);
//! ```
//!
//! ## Provider Traits
//!
//! - [`ProgressCallback`]: receives task and operation progress
//!
//! File transfers for `put`/`fetch` are passed in through
//! [`ApplyContext`], so the crate does not depend on a particular
//! transport or terminal UI.

pub mod context;
pub mod diff;
pub mod executor;
pub mod extract;
pub mod ordering;
pub mod planner;
pub mod task;
pub mod types;

// Re-export main types at crate root
pub use context::{ApplyContext, NoProgress, ProgressCallback};
pub use diff::{DiffSummary, differing};
pub use executor::{apply, run_task, run_tasks};
pub use planner::plan;
pub use task::{Extraction, FacilityTask, IndexBy, Missing, Mode, Source, Task};
pub use types::{ExecuteSummary, ItemRef, Operation, Plan, TaskError, TaskOutcome};
