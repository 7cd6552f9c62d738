//! Typed task model.
//!
//! Each reconciliation mode is its own variant carrying exactly the inputs
//! it needs, so conflicting option combinations cannot be represented.
//! File parsing and validation live in the binary; the constructors here
//! check the invariants that hold regardless of input format.

use routeros::predicate::{Condition, DEFAULT_NAME_KEYS};
use routeros::{Assignments, Error, FacilityPath, FacilityShape, FindSpec, Result};
use std::fmt;
use std::path::PathBuf;

/// What a find-based task does when nothing matches.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Missing {
    /// Add the record (`present`)
    Add,
    /// Fail with `NotFound` (`notfound-is-failed`)
    Fail,
    /// Do nothing (`notfound-is-ok`)
    Ignore,
}

/// Where extracted values come from.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Source {
    /// Parameter values (`get`, `get_list`)
    Fields,
    /// Expressions evaluated on the device (`get_expr`, `get_expr_list`)
    Expressions,
}

/// How extracted values are keyed.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum IndexBy {
    /// A parameter name (or expression, for expression sources) per record
    Key(String),
    /// A fixed index, written double-quoted in task files
    Literal(String),
}

impl IndexBy {
    /// Parse the task-file form: a double-quoted string is a literal.
    pub fn parse(raw: &str) -> Self {
        match raw.strip_prefix('"').and_then(|s| s.strip_suffix('"')) {
            Some(literal) => IndexBy::Literal(literal.to_string()),
            None => IndexBy::Key(raw.to_string()),
        }
    }
}

/// A read-only extraction.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Extraction {
    /// Records to read; `None` reads the singleton
    pub find: Option<FindSpec>,
    /// `(alias, field or expression)` pairs
    pub fields: Vec<(String, String)>,
    /// Fields or expressions
    pub source: Source,
    /// One value per match (`*_list`) instead of exactly one record
    pub many: bool,
    /// Keying of the returned values
    pub index_by: Option<IndexBy>,
    /// Drop empty evaluated values
    pub skip_empty: bool,
    /// Fail when no record matches
    pub require_match: bool,
    /// Fail when a requested field is missing from a record
    pub require_fields: bool,
}

/// Reconciliation mode of a facility task.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Mode {
    /// Set differing values on a singleton facility
    Configure {
        /// Values to converge
        values: Assignments,
    },
    /// Make sure records matching each find exist, and update them
    Ensure {
        /// One find per iterate combination
        finds: Vec<FindSpec>,
        /// Values to set on every match, and on added records
        set: Assignments,
        /// 1-based position of the (single) matched record
        position: Option<usize>,
        /// Behaviour when a find matches nothing
        missing: Missing,
    },
    /// Make sure each desired line exists; never removes
    Present {
        /// Desired records
        lines: Vec<FindSpec>,
        /// Whether the lines form an ordered block
        ordered: bool,
        /// 1-based start of the ordered block
        position: usize,
        /// Behaviour when a line has no match
        missing: Missing,
    },
    /// Remove every removable match
    Absent {
        /// Criteria of records to remove
        targets: Vec<FindSpec>,
    },
    /// Enable or disable every match
    Toggle {
        /// Criteria of records to toggle
        targets: Vec<FindSpec>,
        /// `true` for `enabled`
        enable: bool,
    },
    /// Verify existence, and optionally position, without writing
    FindOnly {
        /// Criteria that must each match
        targets: Vec<FindSpec>,
        /// 1-based position expected for the first target; later targets
        /// follow on consecutive positions
        position: Option<usize>,
    },
    /// Count matches
    Count {
        /// Criteria to count
        find: FindSpec,
    },
    /// Reposition one record
    Move {
        /// Criteria of the record
        find: FindSpec,
        /// 1-based destination
        position: usize,
        /// Behaviour when nothing matches
        missing: Missing,
    },
    /// Compare the facility with the desired lines without writing
    Check {
        /// Desired records
        lines: Vec<FindSpec>,
        /// Whether order is compared too
        ordered: bool,
        /// 1-based start of the ordered block
        position: usize,
    },
    /// Rebuild the facility from the desired lines when `Check` fails
    Replace {
        /// Desired records
        lines: Vec<FindSpec>,
        /// Whether order is compared too
        ordered: bool,
        /// 1-based start of the ordered block
        position: usize,
    },
    /// Sync records by key tuple: add, update, remove
    Adjust {
        /// Desired records
        lines: Vec<FindSpec>,
        /// Identity fields
        keys: Vec<String>,
        /// Whether the lines form an ordered block
        ordered: bool,
        /// 1-based start of the ordered block
        position: usize,
    },
    /// Read values without writing
    Extract(Extraction),
}

impl Mode {
    /// The task-file state name of this mode.
    pub fn name(&self) -> &'static str {
        match self {
            Mode::Configure { .. } => "present",
            Mode::Ensure { missing, .. } | Mode::Present { missing, .. } => match missing {
                Missing::Add => "present",
                Missing::Fail => "notfound-is-failed",
                Missing::Ignore => "notfound-is-ok",
            },
            Mode::Absent { .. } => "absent",
            Mode::Toggle { enable: true, .. } => "enabled",
            Mode::Toggle { enable: false, .. } => "disabled",
            Mode::FindOnly { .. } => "find-only",
            Mode::Count { .. } => "count-only",
            Mode::Move { .. } => "move-only",
            Mode::Check { .. } => "check",
            Mode::Replace { .. } => "replace",
            Mode::Adjust { .. } => "adjust",
            Mode::Extract(extraction) => match (extraction.source, extraction.many) {
                (Source::Fields, false) => "get",
                (Source::Fields, true) => "get_list",
                (Source::Expressions, false) => "get_expr",
                (Source::Expressions, true) => "get_expr_list",
            },
        }
    }

    /// Shape the facility is accessed with.
    pub fn shape(&self) -> FacilityShape {
        match self {
            Mode::Configure { .. } => FacilityShape::Singleton,
            Mode::Extract(Extraction { find: None, .. }) => FacilityShape::Singleton,
            Mode::Ensure { position: Some(_), .. }
            | Mode::Move { .. }
            | Mode::FindOnly { position: Some(_), .. }
            | Mode::Present { ordered: true, .. }
            | Mode::Check { ordered: true, .. }
            | Mode::Replace { ordered: true, .. }
            | Mode::Adjust { ordered: true, .. } => FacilityShape::Ordered,
            _ => FacilityShape::Unordered,
        }
    }
}

/// A reconciliation task on one facility.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct FacilityTask {
    /// Facility path
    pub path: FacilityPath,
    /// What to do with it
    pub mode: Mode,
}

fn has_default_identity(spec: &FindSpec) -> bool {
    spec.clauses().iter().any(|(k, _)| DEFAULT_NAME_KEYS.contains(&k.as_str()))
}

fn literal_key(spec: &FindSpec, key: &str) -> bool {
    matches!(spec.get(key), None | Some(Condition::Literal(_) | Condition::NotSet))
}

impl FacilityTask {
    /// Build a task, checking the invariants of its mode.
    pub fn new(path: FacilityPath, mode: Mode) -> Result<Self> {
        let invalid = |msg: String| Err(Error::InvalidTask(format!("{path} [{}]: {msg}", mode.name())));

        match &mode {
            Mode::Configure { values } if values.is_empty() => {
                return invalid("nothing to set".to_string());
            }
            Mode::Ensure { finds, position: Some(_), .. } if finds.len() != 1 => {
                return invalid("position cannot be combined with iterate".to_string());
            }
            Mode::Ensure { finds, .. } if finds.is_empty() => {
                return invalid("find is required".to_string());
            }
            Mode::Present { position: 0, .. }
            | Mode::Check { position: 0, .. }
            | Mode::Replace { position: 0, .. }
            | Mode::Adjust { position: 0, .. }
            | Mode::Move { position: 0, .. }
            | Mode::FindOnly { position: Some(0), .. }
            | Mode::Ensure { position: Some(0), .. } => {
                return invalid("positions start at 1".to_string());
            }
            Mode::Move { missing: Missing::Add, .. } => {
                return invalid("move-only cannot add records".to_string());
            }
            Mode::Absent { targets } if targets.iter().any(has_default_identity) => {
                return invalid("default objects cannot be removed".to_string());
            }
            Mode::Adjust { lines, keys, .. } => {
                if keys.is_empty() {
                    return invalid("keys must not be empty".to_string());
                }
                for (i, line) in lines.iter().enumerate() {
                    if let Some(key) = keys.iter().find(|k| !literal_key(line, k)) {
                        return invalid(format!("line {i}: key {key} must be a plain value"));
                    }
                    if has_default_identity(line) {
                        return invalid(format!("line {i}: default-name lines cannot be adjusted"));
                    }
                }
            }
            Mode::Extract(extraction) => {
                if extraction.fields.is_empty() {
                    return invalid("nothing to get".to_string());
                }
                if extraction.skip_empty && extraction.source != Source::Expressions {
                    return invalid("skip-empty requires get_expr or get_expr_list".to_string());
                }
                if extraction.many && extraction.find.is_none() {
                    return invalid("list extraction requires find".to_string());
                }
            }
            _ => {}
        }

        Ok(Self { path, mode })
    }
}

impl fmt::Display for FacilityTask {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "({}) {}", self.mode.name(), self.path)
    }
}

/// One entry of a task file.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Task {
    /// Reconcile a facility
    Facility(FacilityTask),
    /// Run a raw command; always reported as changed
    Command(String),
    /// Upload a local file when the device copy differs
    Put {
        /// Local file
        src: PathBuf,
        /// Remote path
        dest: String,
    },
    /// Download a device file when it differs from the local copy
    Fetch {
        /// Remote path
        src: String,
        /// Local file
        dest: PathBuf,
    },
}

impl Task {
    /// Facility path of the task, if it has one.
    pub fn path(&self) -> Option<&FacilityPath> {
        match self {
            Task::Facility(task) => Some(&task.path),
            _ => None,
        }
    }

    /// State name used in reports.
    pub fn mode_name(&self) -> &'static str {
        match self {
            Task::Facility(task) => task.mode.name(),
            Task::Command(_) => "cmd",
            Task::Put { .. } => "put",
            Task::Fetch { .. } => "fetch",
        }
    }
}

impl fmt::Display for Task {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Task::Facility(task) => task.fmt(f),
            Task::Command(cmd) => write!(f, "(cmd) {cmd}"),
            Task::Put { src, dest } => write!(f, "(put) {} -> {dest}", src.display()),
            Task::Fetch { src, dest } => write!(f, "(fetch) {src} -> {}", dest.display()),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use routeros::Value;

    fn path() -> FacilityPath {
        FacilityPath::parse("/ip firewall filter").unwrap()
    }

    #[test]
    fn test_index_by_literal() {
        assert_eq!(IndexBy::parse("\"all\""), IndexBy::Literal("all".to_string()));
        assert_eq!(IndexBy::parse("name"), IndexBy::Key("name".to_string()));
    }

    #[test]
    fn test_positions_are_one_based() {
        let mode = Mode::Move {
            find: FindSpec::new(),
            position: 0,
            missing: Missing::Fail,
        };
        let err = FacilityTask::new(path(), mode).unwrap_err();
        assert_eq!(err.kind(), routeros::ErrorKind::InvalidTask);
    }

    #[test]
    fn test_adjust_keys_must_be_plain() {
        let line = FindSpec::new().with("chain", Condition::Matches("^in".to_string()));
        let mode = Mode::Adjust {
            lines: vec![line],
            keys: vec!["chain".to_string()],
            ordered: false,
            position: 1,
        };
        assert!(FacilityTask::new(path(), mode).is_err());
    }

    #[test]
    fn test_absent_rejects_default_names() {
        let target = FindSpec::new().with("default-name", Condition::Literal(Value::str("ether1")));
        let mode = Mode::Absent { targets: vec![target] };
        assert!(FacilityTask::new(path(), mode).is_err());
    }

    #[test]
    fn test_skip_empty_needs_expressions() {
        let mode = Mode::Extract(Extraction {
            find: Some(FindSpec::new()),
            fields: vec![("n".to_string(), "name".to_string())],
            source: Source::Fields,
            many: true,
            index_by: None,
            skip_empty: true,
            require_match: false,
            require_fields: true,
        });
        assert!(FacilityTask::new(path(), mode).is_err());
    }

    #[test]
    fn test_mode_names_and_shapes() {
        let ensure = Mode::Ensure {
            finds: vec![FindSpec::new()],
            set: Assignments::new(),
            position: Some(1),
            missing: Missing::Ignore,
        };
        assert_eq!(ensure.name(), "notfound-is-ok");
        assert_eq!(ensure.shape(), FacilityShape::Ordered);

        let configure = Mode::Configure {
            values: Assignments::new(),
        };
        assert_eq!(configure.shape(), FacilityShape::Singleton);
        assert!(FacilityTask::new(path(), configure).is_err());
    }
}
