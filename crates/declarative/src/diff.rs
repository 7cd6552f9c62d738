//! Diff computation for records and plans

use crate::types::{Operation, Plan};
use routeros::codec;
use routeros::{Assignment, Assignments, Record};

/// The subset of `desired` that differs from `actual`.
///
/// A value differs when the record lacks the key or holds a canonically
/// different value; an unset differs when the record has the key.
pub fn differing(desired: &Assignments, actual: &Record) -> Assignments {
    desired
        .iter()
        .filter(|(key, assignment)| match assignment {
            Assignment::Value(v) => actual.get(key).is_none_or(|a| !codec::values_equal(v, a)),
            Assignment::Unset => actual.get(key).is_some(),
        })
        .map(|(k, a)| (k.clone(), a.clone()))
        .collect()
}

/// Plan summary statistics
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct DiffSummary {
    pub additions: usize,
    pub removals: usize,
    pub modifications: usize,
    pub moves: usize,
    pub toggles: usize,
}

impl DiffSummary {
    /// Create a summary from a plan
    pub fn from_plan(plan: &Plan) -> Self {
        let mut summary = Self::default();
        for op in &plan.ops {
            match op {
                Operation::Add { .. } => summary.additions += 1,
                Operation::Remove { .. } => summary.removals += 1,
                Operation::Set { .. } => summary.modifications += 1,
                Operation::Move { .. } => summary.moves += 1,
                Operation::Enable { .. } | Operation::Disable { .. } => summary.toggles += 1,
            }
        }
        summary
    }

    /// Total number of changes
    pub fn total(&self) -> usize {
        self.additions + self.removals + self.modifications + self.moves + self.toggles
    }

    /// Check if there are any changes
    pub fn has_changes(&self) -> bool {
        self.total() > 0
    }

    /// Merge another summary into this one
    pub fn merge(&mut self, other: &DiffSummary) {
        self.additions += other.additions;
        self.removals += other.removals;
        self.modifications += other.modifications;
        self.moves += other.moves;
        self.toggles += other.toggles;
    }
}
