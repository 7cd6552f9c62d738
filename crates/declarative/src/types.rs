//! Core types for plans and task outcomes

use routeros::{Assignment, Assignments, Error, ErrorKind, FacilityPath, FacilityShape, ItemId};
use serde::{Deserialize, Serialize};
use serde_json::{Map, Value as Json};
use std::fmt;

/// A record referenced by an operation: one that exists, or one added by
/// an earlier operation of the same plan (by operation index).
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub enum ItemRef {
    Existing(ItemId),
    Added(usize),
}

impl fmt::Display for ItemRef {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            ItemRef::Existing(id) => id.fmt(f),
            ItemRef::Added(op) => write!(f, "<new #{op}>"),
        }
    }
}

/// One primitive write
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Operation {
    Add {
        values: Assignments,
        place_before: Option<ItemRef>,
    },
    Remove {
        id: ItemId,
    },
    /// `target` is `None` for singleton facilities
    Set {
        target: Option<ItemId>,
        values: Assignments,
    },
    Move {
        item: ItemRef,
        before: Option<ItemRef>,
    },
    Enable {
        id: ItemId,
    },
    Disable {
        id: ItemId,
    },
}

impl Operation {
    /// Verb used in displays
    pub fn verb(&self) -> &'static str {
        match self {
            Operation::Add { .. } => "add",
            Operation::Remove { .. } => "remove",
            Operation::Set { .. } => "set",
            Operation::Move { .. } => "move",
            Operation::Enable { .. } => "enable",
            Operation::Disable { .. } => "disable",
        }
    }
}

fn write_values(f: &mut fmt::Formatter<'_>, values: &Assignments) -> fmt::Result {
    for (key, assignment) in values {
        match assignment {
            Assignment::Value(v) => write!(f, " {key}={v}")?,
            Assignment::Unset => write!(f, " !{key}")?,
        }
    }
    Ok(())
}

impl fmt::Display for Operation {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.verb())?;
        match self {
            Operation::Add { values, place_before } => {
                write_values(f, values)?;
                if let Some(before) = place_before {
                    write!(f, " place-before={before}")?;
                }
                Ok(())
            }
            Operation::Set { target, values } => {
                if let Some(id) = target {
                    write!(f, " {id}")?;
                }
                write_values(f, values)
            }
            Operation::Move { item, before } => match before {
                Some(before) => write!(f, " {item} destination={before}"),
                None => write!(f, " {item} to end"),
            },
            Operation::Remove { id } | Operation::Enable { id } | Operation::Disable { id } => {
                write!(f, " {id}")
            }
        }
    }
}

/// Operations planned for one facility task
#[derive(Debug, Clone)]
pub struct Plan {
    pub path: FacilityPath,
    pub shape: FacilityShape,
    pub ops: Vec<Operation>,
    /// State differs but no write is planned (`check`)
    pub drift: bool,
    /// Values returned by read-only modes
    pub return_values: Map<String, Json>,
}

impl Plan {
    /// Create an empty plan
    pub fn new(path: FacilityPath, shape: FacilityShape) -> Self {
        Self {
            path,
            shape,
            ops: Vec::new(),
            drift: false,
            return_values: Map::new(),
        }
    }

    /// Whether running the plan changes (or would change) the device
    pub fn is_changed(&self) -> bool {
        self.drift || !self.ops.is_empty()
    }

    /// Whether the plan has no writes
    pub fn is_empty(&self) -> bool {
        self.ops.is_empty()
    }

    /// Append an operation, returning its index
    pub fn push(&mut self, op: Operation) -> usize {
        self.ops.push(op);
        self.ops.len() - 1
    }
}

/// Error part of a task outcome
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct TaskError {
    pub kind: ErrorKind,
    pub message: String,
}

impl From<&Error> for TaskError {
    fn from(err: &Error) -> Self {
        Self {
            kind: err.kind(),
            message: err.to_string(),
        }
    }
}

/// Result of running one task (or a whole task file, merged)
#[derive(Debug, Clone, Default, PartialEq, Serialize)]
pub struct TaskOutcome {
    pub changed: bool,
    pub failed: bool,
    pub return_values: Map<String, Json>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub error: Option<TaskError>,
}

impl TaskOutcome {
    /// Outcome of a task that failed; changed when some writes went through
    pub fn failure(err: &Error) -> Self {
        Self {
            changed: err.applied_writes() > 0,
            failed: true,
            return_values: Map::new(),
            error: Some(err.into()),
        }
    }

    /// Merge a later task's outcome into this one; later return values win
    pub fn merge(&mut self, other: TaskOutcome) {
        self.changed |= other.changed;
        self.failed |= other.failed;
        self.return_values.extend(other.return_values);
        if other.error.is_some() {
            self.error = other.error;
        }
    }
}

/// Summary of outcomes across tasks or devices
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct ExecuteSummary {
    pub changed: usize,
    pub unchanged: usize,
    pub failed: usize,
    /// Tasks not started because the run was cancelled or stopped early
    pub skipped: usize,
}

impl ExecuteSummary {
    /// Check if execution was fully successful (no failures)
    pub fn is_success(&self) -> bool {
        self.failed == 0
    }

    /// Total number of outcomes counted
    pub fn total(&self) -> usize {
        self.changed + self.unchanged + self.failed + self.skipped
    }

    /// Merge another summary into this one
    pub fn merge(&mut self, other: &ExecuteSummary) {
        self.changed += other.changed;
        self.unchanged += other.unchanged;
        self.failed += other.failed;
        self.skipped += other.skipped;
    }

    /// Add an outcome to the summary
    pub fn add_outcome(&mut self, outcome: &TaskOutcome) {
        if outcome.failed {
            self.failed += 1;
        } else if outcome.changed {
            self.changed += 1;
        } else {
            self.unchanged += 1;
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use routeros::Value;

    #[test]
    fn test_operation_display() {
        let mut values = Assignments::new();
        values.insert("address".to_string(), Assignment::Value(Value::str("10.0.0.1/24")));
        values.insert("comment".to_string(), Assignment::Unset);
        let op = Operation::Set {
            target: Some(ItemId::new("*3")),
            values,
        };
        assert_eq!(op.to_string(), "set *3 address=10.0.0.1/24 !comment");

        let op = Operation::Move {
            item: ItemRef::Added(0),
            before: Some(ItemRef::Existing(ItemId::new("*2"))),
        };
        assert_eq!(op.to_string(), "move <new #0> destination=*2");
    }

    #[test]
    fn test_outcome_merge() {
        let mut first = TaskOutcome::default();
        first.return_values.insert("count".to_string(), Json::from(2));

        let mut second = TaskOutcome {
            changed: true,
            ..TaskOutcome::default()
        };
        second.return_values.insert("count".to_string(), Json::from(5));

        first.merge(second);
        assert!(first.changed);
        assert!(!first.failed);
        assert_eq!(first.return_values["count"], Json::from(5));
    }

    #[test]
    fn test_summary_counts() {
        let mut summary = ExecuteSummary::default();
        summary.add_outcome(&TaskOutcome::default());
        summary.add_outcome(&TaskOutcome {
            changed: true,
            ..TaskOutcome::default()
        });
        summary.add_outcome(&TaskOutcome::failure(&Error::not_found("x")));
        assert_eq!(summary.total(), 3);
        assert!(!summary.is_success());
    }
}
