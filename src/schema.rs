//! Task file schema
//!
//! A task file is a list of tasks, run in order against each device:
//!
//! ```toml
//! [[task]]
//! path = "/system identity"
//! set = { name = "core-rtr" }
//!
//! [[task]]
//! path = { v6 = "/ip route rule", v7 = "/routing rule" }
//! state = "adjust"
//! keys = ["src-address", "routing-mark", "action", "table"]
//! ordered = [
//!   { src-address = "!", routing-mark = "!", action = "lookup", table = "main" },
//! ]
//!
//! [[task]]
//! path = "/system package"
//! find = { disabled = "!" }
//! get_list = { packages = "version" }
//! index_by = "name"
//! ```
//!
//! JSON files hold the same entries, either under `"task"` or as a bare
//! array. Raw entries are turned into typed [`Task`]s once the device's
//! firmware generation is known.

use anyhow::{Context, Result};
use declarative::{Extraction, FacilityTask, IndexBy, Missing, Mode, Source, Task};
use routeros::predicate::RAW_KEY;
use routeros::{Assignment, Assignments, Condition, FacilityPath, FindSpec, OsGeneration, Value};
use serde::{Deserialize, Serialize};
use serde_json::{Map, Value as Json};
use std::collections::BTreeMap;
use std::path::{Path, PathBuf};
use thiserror::Error;

use crate::config;

/// Parameter mapping as written in a task file
pub type RawMap = Map<String, Json>;

// ============================================================================
// Errors
// ============================================================================

#[derive(Debug, Error)]
pub enum SchemaError {
    #[error("{0}")]
    Invalid(String),

    #[error("{key}: {message}")]
    Value { key: String, message: String },

    #[error(transparent)]
    Task(#[from] routeros::Error),

    #[error("task {label}: {source}")]
    InTask {
        label: String,
        source: Box<SchemaError>,
    },
}

fn invalid<T>(message: impl Into<String>) -> Result<T, SchemaError> {
    Err(SchemaError::Invalid(message.into()))
}

fn bad_value<T>(key: &str, message: impl Into<String>) -> Result<T, SchemaError> {
    Err(SchemaError::Value {
        key: key.to_string(),
        message: message.into(),
    })
}

// ============================================================================
// Raw Schema
// ============================================================================

/// A facility path, optionally different per firmware generation
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(untagged)]
pub enum RawPath {
    Plain(String),
    Tagged {
        #[serde(default)]
        v6: Option<String>,
        #[serde(default)]
        v7: Option<String>,
    },
}

impl RawPath {
    /// The path for a generation; `None` when the task has none for it
    pub fn resolve(&self, os: OsGeneration) -> Option<&str> {
        match (self, os) {
            (RawPath::Plain(path), _) => Some(path),
            (RawPath::Tagged { v6, .. }, OsGeneration::V6) => v6.as_deref(),
            (RawPath::Tagged { v7, .. }, OsGeneration::V7) => v7.as_deref(),
        }
    }
}

/// Requested values: names, or `alias = field` pairs
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(untagged)]
pub enum RawFields {
    Names(Vec<String>),
    Aliased(RawMap),
}

impl RawFields {
    /// `(alias, field)` pairs; an empty or null field means "same as alias"
    fn pairs(&self) -> Result<Vec<(String, String)>, SchemaError> {
        match self {
            RawFields::Names(names) => Ok(names.iter().map(|n| (n.clone(), n.clone())).collect()),
            RawFields::Aliased(map) => map
                .iter()
                .map(|(alias, field)| match field {
                    Json::Null | Json::Bool(true) => Ok((alias.clone(), alias.clone())),
                    Json::String(s) if s.is_empty() => Ok((alias.clone(), alias.clone())),
                    Json::String(s) => Ok((alias.clone(), s.clone())),
                    _ => bad_value(alias, "expected a parameter name or expression"),
                })
                .collect(),
        }
    }
}

/// Local and remote side of a transfer
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct RawTransfer {
    pub src: String,
    pub dest: String,
}

/// One task entry as written
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct RawTask {
    /// Label shown in reports
    #[serde(default)]
    pub name: Option<String>,
    #[serde(default)]
    pub path: Option<RawPath>,
    #[serde(default)]
    pub state: Option<String>,
    /// Run only on this firmware generation
    #[serde(default)]
    pub os: Option<OsGeneration>,
    #[serde(default)]
    pub find: Option<RawMap>,
    #[serde(default)]
    pub iterate: Option<BTreeMap<String, Vec<Json>>>,
    #[serde(default)]
    pub lines: Option<Vec<RawMap>>,
    #[serde(default)]
    pub ordered: Option<Vec<RawMap>>,
    #[serde(default)]
    pub keys: Option<Vec<String>>,
    #[serde(default)]
    pub set: Option<RawMap>,
    #[serde(default)]
    pub position: Option<usize>,
    #[serde(default)]
    pub get: Option<RawFields>,
    #[serde(default)]
    pub get_list: Option<RawFields>,
    #[serde(default)]
    pub get_expr: Option<RawFields>,
    #[serde(default)]
    pub get_expr_list: Option<RawFields>,
    #[serde(default)]
    pub index_by: Option<String>,
    #[serde(default)]
    pub cmd: Option<String>,
    #[serde(default)]
    pub put: Option<RawTransfer>,
    #[serde(default)]
    pub fetch: Option<RawTransfer>,
}

impl RawTask {
    /// Short label for errors and reports
    pub fn label(&self, index: usize) -> String {
        let what = self.name.clone().or_else(|| match &self.path {
            Some(RawPath::Plain(path)) => Some(path.clone()),
            Some(RawPath::Tagged { v7, v6 }) => v7.clone().or_else(|| v6.clone()),
            None => self.cmd.clone(),
        });
        match what {
            Some(what) => format!("#{} ({what})", index + 1),
            None => format!("#{}", index + 1),
        }
    }
}

#[derive(Deserialize)]
#[serde(untagged)]
enum FileShape {
    List(Vec<RawTask>),
    Table {
        #[serde(default)]
        task: Vec<RawTask>,
    },
}

/// A loaded task file
#[derive(Debug, Clone)]
pub struct TaskFile {
    pub path: PathBuf,
    pub tasks: Vec<RawTask>,
}

impl TaskFile {
    /// Load a TOML or JSON task file
    pub fn load(path: &Path) -> Result<Self> {
        let tasks = match config::load_file::<FileShape>(path)
            .with_context(|| format!("Could not load task file {}", path.display()))?
        {
            FileShape::List(tasks) | FileShape::Table { task: tasks } => tasks,
        };
        Ok(Self {
            path: path.to_path_buf(),
            tasks,
        })
    }

    /// Typed tasks for one firmware generation, in file order
    pub fn tasks_for(&self, os: OsGeneration) -> Result<Vec<Task>, SchemaError> {
        let mut tasks = Vec::with_capacity(self.tasks.len());
        for (index, raw) in self.tasks.iter().enumerate() {
            let built = build(raw, os, &self.path).map_err(|source| SchemaError::InTask {
                label: raw.label(index),
                source: Box::new(source),
            })?;
            if let Some(task) = built {
                tasks.push(task);
            }
        }
        Ok(tasks)
    }

    /// Every problem found when building for each generation
    pub fn check(&self) -> Vec<(OsGeneration, SchemaError)> {
        let mut problems = Vec::new();
        for os in [OsGeneration::V6, OsGeneration::V7] {
            for (index, raw) in self.tasks.iter().enumerate() {
                if let Err(source) = build(raw, os, &self.path) {
                    problems.push((
                        os,
                        SchemaError::InTask {
                            label: raw.label(index),
                            source: Box::new(source),
                        },
                    ));
                }
            }
        }
        problems
    }
}

// ============================================================================
// States
// ============================================================================

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum State {
    Present,
    Absent,
    Enabled,
    Disabled,
    FindOnly,
    CountOnly,
    MoveOnly,
    NotfoundIsFailed,
    NotfoundIsOk,
    SkipEmpty,
    Check,
    Replace,
    Adjust,
}

impl State {
    fn parse(s: &str) -> Result<Self, SchemaError> {
        Ok(match s {
            "present" => State::Present,
            "absent" => State::Absent,
            "enabled" => State::Enabled,
            "disabled" => State::Disabled,
            "find-only" => State::FindOnly,
            "count-only" => State::CountOnly,
            "move-only" => State::MoveOnly,
            "notfound-is-failed" => State::NotfoundIsFailed,
            "notfound-is-ok" => State::NotfoundIsOk,
            "skip-empty" => State::SkipEmpty,
            "check" => State::Check,
            "replace" => State::Replace,
            "adjust" => State::Adjust,
            other => return invalid(format!("unknown state '{other}'")),
        })
    }

    fn missing(self) -> Option<Missing> {
        match self {
            State::Present => Some(Missing::Add),
            State::NotfoundIsFailed => Some(Missing::Fail),
            State::NotfoundIsOk => Some(Missing::Ignore),
            _ => None,
        }
    }
}

// ============================================================================
// Values and Conditions
// ============================================================================

/// Convert a scalar or flat list; `None` for null
fn to_value(key: &str, json: &Json) -> Result<Option<Value>, SchemaError> {
    Ok(Some(match json {
        Json::Null => return Ok(None),
        Json::Bool(b) => Value::Bool(*b),
        Json::Number(n) => match n.as_i64() {
            Some(i) => Value::Int(i),
            None => Value::Str(n.to_string()),
        },
        Json::String(s) => Value::Str(s.clone()),
        Json::Array(items) => {
            let mut values = Vec::with_capacity(items.len());
            for item in items {
                match item {
                    Json::Array(_) | Json::Object(_) | Json::Null => {
                        return bad_value(key, "list elements must be plain values");
                    }
                    _ => values.extend(to_value(key, item)?),
                }
            }
            Value::List(values)
        }
        Json::Object(_) => return bad_value(key, "unexpected table"),
    }))
}

/// The tagged forms `{ literal = ... }` and `{ is_set = ... }`
fn tagged_condition(key: &str, map: &RawMap) -> Result<Condition, SchemaError> {
    match (map.len(), map.get("literal"), map.get("is_set")) {
        (1, Some(literal), None) => match to_value(key, literal)? {
            Some(value) => Ok(Condition::Literal(value)),
            None => bad_value(key, "literal needs a value"),
        },
        (1, None, Some(Json::Bool(true))) => Ok(Condition::IsSet),
        (1, None, Some(Json::Bool(false))) => Ok(Condition::NotSet),
        _ => bad_value(key, "expected { literal = ... } or { is_set = true|false }"),
    }
}

fn to_condition(key: &str, json: &Json) -> Result<Condition, SchemaError> {
    if key == RAW_KEY {
        return match json {
            Json::String(expr) => Ok(Condition::Raw(expr.clone())),
            _ => bad_value(key, "raw filter must be a string"),
        };
    }
    match json {
        Json::Object(map) => tagged_condition(key, map),
        _ => Ok(Condition::parse(to_value(key, json)?.as_ref())),
    }
}

/// Find criteria or a desired line
pub fn find_spec(map: &RawMap) -> Result<FindSpec, SchemaError> {
    let mut spec = FindSpec::new();
    for (key, json) in map {
        spec.insert(key.clone(), to_condition(key, json)?);
    }
    Ok(spec)
}

/// Values for `set`: `"!"` unsets, anything else is written as given
pub fn assignments(map: &RawMap) -> Result<Assignments, SchemaError> {
    let mut values = Assignments::new();
    for (key, json) in map {
        let assignment = match json {
            Json::String(s) if s == "!" => Assignment::Unset,
            Json::Object(tagged) => match tagged_condition(key, tagged)? {
                Condition::Literal(value) => Assignment::Value(value),
                Condition::NotSet => Assignment::Unset,
                _ => return bad_value(key, "cannot set a parameter to \"is set\""),
            },
            _ => match to_value(key, json)? {
                Some(value) => Assignment::Value(value),
                None => return bad_value(key, "set needs a value"),
            },
        };
        values.insert(key.clone(), assignment);
    }
    Ok(values)
}

fn iterate_axes(iterate: &BTreeMap<String, Vec<Json>>) -> Result<Vec<(String, Vec<Value>)>, SchemaError> {
    iterate
        .iter()
        .map(|(key, items)| {
            let mut values = Vec::with_capacity(items.len());
            for item in items {
                match to_value(key, item)? {
                    Some(value) => values.push(value),
                    None => return bad_value(key, "iterate values cannot be null"),
                }
            }
            Ok((key.clone(), values))
        })
        .collect()
}

// ============================================================================
// Building Typed Tasks
// ============================================================================

/// Build the typed task for a generation.
///
/// `None` when the task does not apply to this generation (an `os` filter,
/// or a version-tagged path without an entry for it).
pub fn build(raw: &RawTask, os: OsGeneration, source: &Path) -> Result<Option<Task>, SchemaError> {
    if raw.os.is_some_and(|only| only != os) {
        return Ok(None);
    }

    let specials = [raw.cmd.is_some(), raw.put.is_some(), raw.fetch.is_some()]
        .into_iter()
        .filter(|s| *s)
        .count();
    if specials > 0 {
        return build_special(raw, specials, source).map(Some);
    }

    let Some(path) = &raw.path else {
        return invalid("path is required");
    };
    let Some(path) = path.resolve(os) else {
        log::debug!("no {os} path, skipping");
        return Ok(None);
    };
    let path = FacilityPath::parse(path)?;
    let mode = build_mode(raw)?;
    Ok(Some(Task::Facility(FacilityTask::new(path, mode)?)))
}

fn build_special(raw: &RawTask, specials: usize, source: &Path) -> Result<Task, SchemaError> {
    if specials > 1 {
        return invalid("cmd, put and fetch are separate tasks");
    }
    let extra = raw.path.is_some()
        || raw.state.is_some()
        || raw.find.is_some()
        || raw.iterate.is_some()
        || raw.lines.is_some()
        || raw.ordered.is_some()
        || raw.set.is_some()
        || extraction_fields(raw).is_some();
    if extra {
        return invalid("cmd, put and fetch take no facility parameters");
    }

    if let Some(cmd) = &raw.cmd {
        if cmd.trim().is_empty() {
            return invalid("cmd is empty");
        }
        return Ok(Task::Command(cmd.clone()));
    }
    if let Some(put) = &raw.put {
        return Ok(Task::Put {
            src: config::resolve_relative(source, &put.src),
            dest: put.dest.clone(),
        });
    }
    match &raw.fetch {
        Some(fetch) => Ok(Task::Fetch {
            src: fetch.src.clone(),
            dest: config::resolve_relative(source, &fetch.dest),
        }),
        None => invalid("nothing to do"),
    }
}

fn extraction_fields(raw: &RawTask) -> Option<(Source, bool, &RawFields)> {
    let requested = [
        (Source::Fields, false, &raw.get),
        (Source::Fields, true, &raw.get_list),
        (Source::Expressions, false, &raw.get_expr),
        (Source::Expressions, true, &raw.get_expr_list),
    ];
    requested
        .into_iter()
        .find_map(|(source, many, fields)| fields.as_ref().map(|f| (source, many, f)))
}

fn build_mode(raw: &RawTask) -> Result<Mode, SchemaError> {
    let state = State::parse(raw.state.as_deref().unwrap_or("present"))?;

    let extractions = [&raw.get, &raw.get_list, &raw.get_expr, &raw.get_expr_list]
        .into_iter()
        .filter(|f| f.is_some())
        .count();
    if extractions > 1 {
        return invalid("use only one of get, get_list, get_expr and get_expr_list");
    }
    if raw.index_by.is_some() && extractions == 0 {
        return invalid("index_by needs get, get_list, get_expr or get_expr_list");
    }
    if raw.keys.is_some() && state != State::Adjust {
        return invalid("keys are only used with state adjust");
    }
    if raw.iterate.is_some() && raw.position.is_some() {
        return invalid("position cannot be combined with iterate");
    }

    if let Some((source, many, fields)) = extraction_fields(raw) {
        return extraction_mode(raw, state, source, many, fields);
    }
    if raw.lines.is_some() || raw.ordered.is_some() {
        return lines_mode(raw, state);
    }
    if raw.find.is_some() || raw.iterate.is_some() {
        return find_mode(raw, state);
    }
    match (&raw.set, state) {
        (Some(set), State::Present) => Ok(Mode::Configure {
            values: assignments(set)?,
        }),
        (Some(_), _) => invalid("a singleton set only supports state present"),
        (None, _) => invalid("nothing to do: give set, find, lines, ordered or get*"),
    }
}

fn extraction_mode(
    raw: &RawTask,
    state: State,
    source: Source,
    many: bool,
    fields: &RawFields,
) -> Result<Mode, SchemaError> {
    if raw.set.is_some() || raw.position.is_some() {
        return invalid("get* cannot be combined with set or position");
    }
    if raw.lines.is_some() || raw.ordered.is_some() || raw.iterate.is_some() {
        return invalid("get* cannot be combined with lines, ordered or iterate");
    }
    if !matches!(
        state,
        State::Present | State::NotfoundIsFailed | State::NotfoundIsOk | State::SkipEmpty
    ) {
        return invalid("get* only supports present, notfound-is-failed, notfound-is-ok and skip-empty");
    }

    let require_match = match state {
        State::NotfoundIsOk => false,
        State::NotfoundIsFailed => true,
        _ => !many,
    };
    Ok(Mode::Extract(Extraction {
        find: raw.find.as_ref().map(find_spec).transpose()?,
        fields: fields.pairs()?,
        source,
        many,
        index_by: raw.index_by.as_deref().map(IndexBy::parse),
        skip_empty: state == State::SkipEmpty,
        require_match,
        require_fields: state != State::NotfoundIsOk,
    }))
}

fn lines_mode(raw: &RawTask, state: State) -> Result<Mode, SchemaError> {
    let (rows, ordered) = match (&raw.lines, &raw.ordered) {
        (Some(_), Some(_)) => return invalid("use either lines or ordered"),
        (Some(rows), None) => (rows, false),
        (None, Some(rows)) => (rows, true),
        (None, None) => return invalid("lines or ordered is required"),
    };
    if raw.find.is_some() || raw.set.is_some() {
        return invalid("lines and ordered cannot be combined with find or set");
    }
    if raw.position.is_some() && !ordered {
        return invalid("position needs ordered");
    }
    let position = raw.position.unwrap_or(1);
    let lines = rows.iter().map(find_spec).collect::<Result<Vec<_>, _>>()?;

    Ok(match state {
        State::Present | State::NotfoundIsFailed | State::NotfoundIsOk => Mode::Present {
            lines,
            ordered,
            position,
            missing: state.missing().unwrap_or(Missing::Add),
        },
        State::Absent => Mode::Absent { targets: lines },
        State::Enabled | State::Disabled => Mode::Toggle {
            targets: lines,
            enable: state == State::Enabled,
        },
        State::FindOnly => Mode::FindOnly {
            targets: lines,
            position: ordered.then_some(position),
        },
        State::Check => Mode::Check {
            lines,
            ordered,
            position,
        },
        State::Replace => Mode::Replace {
            lines,
            ordered,
            position,
        },
        State::Adjust => {
            let keys = match &raw.keys {
                Some(keys) if !keys.is_empty() => keys.clone(),
                _ => all_keys(&lines),
            };
            Mode::Adjust {
                lines,
                keys,
                ordered,
                position,
            }
        }
        State::CountOnly | State::MoveOnly | State::SkipEmpty => {
            return invalid("this state needs find, not lines");
        }
    })
}

/// Every parameter named by any line; the identity when `keys` is empty
fn all_keys(lines: &[FindSpec]) -> Vec<String> {
    let mut keys: Vec<String> = lines
        .iter()
        .flat_map(|line| line.clauses().iter().map(|(k, _)| k.clone()))
        .filter(|k| k != RAW_KEY)
        .collect();
    keys.sort();
    keys.dedup();
    keys
}

fn find_mode(raw: &RawTask, state: State) -> Result<Mode, SchemaError> {
    let base = raw.find.as_ref().map(find_spec).transpose()?.unwrap_or_default();
    let finds = match &raw.iterate {
        Some(iterate) => base.iterate(&iterate_axes(iterate)?),
        None => vec![base],
    };
    let no_set = |what: &str| -> Result<(), SchemaError> {
        if raw.set.is_some() {
            return invalid(format!("{what} cannot be combined with set"));
        }
        Ok(())
    };
    let single = |finds: Vec<FindSpec>, what: &str| -> Result<FindSpec, SchemaError> {
        match <[FindSpec; 1]>::try_from(finds) {
            Ok([find]) => Ok(find),
            Err(_) => invalid(format!("{what} cannot be combined with iterate")),
        }
    };

    Ok(match state {
        State::Present | State::NotfoundIsFailed | State::NotfoundIsOk => Mode::Ensure {
            finds,
            set: raw.set.as_ref().map(assignments).transpose()?.unwrap_or_default(),
            position: raw.position,
            missing: state.missing().unwrap_or(Missing::Add),
        },
        State::Absent => {
            no_set("absent")?;
            if raw.position.is_some() {
                return invalid("absent takes no position");
            }
            Mode::Absent { targets: finds }
        }
        State::Enabled | State::Disabled => {
            no_set("enabled/disabled")?;
            Mode::Toggle {
                targets: finds,
                enable: state == State::Enabled,
            }
        }
        State::FindOnly => {
            no_set("find-only")?;
            Mode::FindOnly {
                targets: finds,
                position: raw.position,
            }
        }
        State::CountOnly => {
            no_set("count-only")?;
            Mode::Count {
                find: single(finds, "count-only")?,
            }
        }
        State::MoveOnly => {
            no_set("move-only")?;
            let Some(position) = raw.position else {
                return invalid("move-only needs position");
            };
            Mode::Move {
                find: single(finds, "move-only")?,
                position,
                missing: Missing::Fail,
            }
        }
        State::Check | State::Replace | State::Adjust => {
            return invalid("check, replace and adjust need lines or ordered");
        }
        State::SkipEmpty => return invalid("skip-empty needs get_expr or get_expr_list"),
    })
}

// ============================================================================
// Tests
// ============================================================================
