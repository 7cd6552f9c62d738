//! Find criteria and record predicates.
//!
//! A [`FindSpec`] is an ordered list of `(key, Condition)` clauses taken from
//! a task's `find` block or one of its desired lines. A [`Predicate`] compiles
//! it once and can then be rendered as a device filter expression or matched
//! against records locally.

use regex::Regex;
use std::fmt;

use crate::codec;
use crate::error::{Error, Result};
use crate::types::{Assignment, Assignments, Record, Value};

/// Key carrying a raw filter expression, passed to the device untouched.
pub const RAW_KEY: &str = "_raw";

/// Keys that identify factory records (interfaces and the like) by their
/// default name.
pub const DEFAULT_NAME_KEYS: [&str; 2] = ["default", "default-name"];

/// One condition on a parameter.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Condition {
    /// Parameter equals the value
    Literal(Value),
    /// Parameter is present
    IsSet,
    /// Parameter is absent
    NotSet,
    /// Parameter is present and differs from the value
    NotEqual(Value),
    /// Parameter text matches the pattern
    Matches(String),
    /// Parameter is absent or its text does not match the pattern
    NotMatches(String),
    /// Raw device filter expression
    Raw(String),
}

impl Condition {
    /// Parse the task-file form of a value.
    ///
    /// A missing value means "is set"; strings are checked for the `!`,
    /// `! v`, `~ p` and `!~ p` prefixes; anything else is a literal.
    pub fn parse(value: Option<&Value>) -> Self {
        match value {
            None => Condition::IsSet,
            Some(Value::Str(s)) => Self::parse_text(s),
            Some(other) => Condition::Literal(other.clone()),
        }
    }

    fn parse_text(s: &str) -> Self {
        if s == "!" {
            Condition::NotSet
        } else if let Some(pattern) = s.strip_prefix("!~ ") {
            Condition::NotMatches(pattern.to_string())
        } else if let Some(rest) = s.strip_prefix("! ") {
            Condition::NotEqual(Value::str(rest))
        } else if let Some(pattern) = s.strip_prefix("~ ") {
            Condition::Matches(pattern.to_string())
        } else {
            Condition::Literal(Value::str(s))
        }
    }

    /// The write this condition implies, if it can be written at all.
    pub fn assignment(&self) -> Option<Assignment> {
        match self {
            Condition::Literal(v) => Some(Assignment::Value(v.clone())),
            Condition::NotSet => Some(Assignment::Unset),
            _ => None,
        }
    }
}

impl fmt::Display for Condition {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Condition::Literal(v) => write!(f, "={v}"),
            Condition::IsSet => f.write_str(" is set"),
            Condition::NotSet => f.write_str(" is unset"),
            Condition::NotEqual(v) => write!(f, "!={v}"),
            Condition::Matches(p) => write!(f, "~{p}"),
            Condition::NotMatches(p) => write!(f, "!~{p}"),
            Condition::Raw(expr) => write!(f, " ({expr})"),
        }
    }
}

/// Ordered find criteria, one clause per key.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct FindSpec {
    clauses: Vec<(String, Condition)>,
}

impl FindSpec {
    /// Create empty criteria, matching every record.
    pub fn new() -> Self {
        Self::default()
    }

    /// Builder-style clause insertion.
    pub fn with(mut self, key: impl Into<String>, condition: Condition) -> Self {
        self.insert(key, condition);
        self
    }

    /// Insert a clause, replacing any existing clause on the same key.
    pub fn insert(&mut self, key: impl Into<String>, condition: Condition) {
        let key = key.into();
        match self.clauses.iter_mut().find(|(k, _)| *k == key) {
            Some((_, existing)) => *existing = condition,
            None => self.clauses.push((key, condition)),
        }
    }

    /// Get the clause on a key.
    pub fn get(&self, key: &str) -> Option<&Condition> {
        self.clauses.iter().find(|(k, _)| k == key).map(|(_, c)| c)
    }

    /// All clauses in order.
    pub fn clauses(&self) -> &[(String, Condition)] {
        &self.clauses
    }

    /// Whether there are no clauses.
    pub fn is_empty(&self) -> bool {
        self.clauses.is_empty()
    }

    /// Whether any clause needs the device to evaluate it.
    pub fn has_raw(&self) -> bool {
        self.clauses.iter().any(|(_, c)| matches!(c, Condition::Raw(_)))
    }

    /// Clauses of `other` layered over these.
    pub fn merged(&self, other: &FindSpec) -> FindSpec {
        let mut merged = self.clone();
        for (key, condition) in &other.clauses {
            merged.insert(key.clone(), condition.clone());
        }
        merged
    }

    /// Values to write when this spec is added as a new record.
    ///
    /// Only literal clauses are written; unset clauses are satisfied by
    /// omission and match-only clauses cannot be written.
    pub fn add_values(&self) -> Result<Assignments> {
        let mut values = Assignments::new();
        for (key, condition) in &self.clauses {
            if let Condition::Literal(v) = condition {
                codec::check_writable(v)?;
                values.insert(key.clone(), Assignment::Value(v.clone()));
            }
        }
        Ok(values)
    }

    /// Values to write when bringing an existing record in line with this
    /// spec: literals and unsets.
    pub fn set_values(&self) -> Result<Assignments> {
        let mut values = Assignments::new();
        for (key, condition) in &self.clauses {
            if key == RAW_KEY {
                continue;
            }
            if let Some(assignment) = condition.assignment() {
                if let Assignment::Value(v) = &assignment {
                    codec::check_writable(v)?;
                }
                values.insert(key.clone(), assignment);
            }
        }
        Ok(values)
    }

    /// Split off default-name identity.
    ///
    /// When the criteria name a factory record through `default` or
    /// `default-name`, those clauses alone identify the record and every
    /// other writable clause becomes a value to set on it. Clauses that
    /// can only be matched (`!=`, `~`, `!~`, raw) are dropped.
    pub fn split_default_identity(&self) -> Option<(FindSpec, Assignments)> {
        if !self.clauses.iter().any(|(k, _)| DEFAULT_NAME_KEYS.contains(&k.as_str())) {
            return None;
        }

        let mut identity = FindSpec::new();
        let mut values = Assignments::new();
        for (key, condition) in &self.clauses {
            if DEFAULT_NAME_KEYS.contains(&key.as_str()) {
                identity.insert(key.clone(), condition.clone());
            } else if let Some(assignment) = condition.assignment() {
                values.insert(key.clone(), assignment);
            }
        }
        Some((identity, values))
    }

    /// Expand `iterate` axes into one spec per combination.
    ///
    /// Axes vary in nested-loop order: the first axis is outermost. Each
    /// combination's literals are layered over this spec.
    pub fn iterate(&self, axes: &[(String, Vec<Value>)]) -> Vec<FindSpec> {
        let mut combos = vec![self.clone()];
        for (key, values) in axes {
            let mut next = Vec::with_capacity(combos.len() * values.len());
            for combo in &combos {
                for value in values {
                    next.push(combo.clone().with(key.clone(), Condition::parse(Some(value))));
                }
            }
            combos = next;
        }
        combos
    }
}

impl fmt::Display for FindSpec {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        if self.clauses.is_empty() {
            return f.write_str("(any)");
        }
        let parts: Vec<String> = self
            .clauses
            .iter()
            .map(|(k, c)| match c {
                Condition::Raw(_) => c.to_string().trim_start().to_string(),
                _ => format!("{k}{c}"),
            })
            .collect();
        f.write_str(&parts.join(" "))
    }
}

/// Compiled find criteria plus the standard record exclusions.
#[derive(Debug, Clone)]
pub struct Predicate {
    spec: FindSpec,
    patterns: Vec<Option<Regex>>,
    skip_dynamic: bool,
    skip_builtin: bool,
    skip_default: bool,
}

impl Predicate {
    /// Compile find criteria. Invalid patterns are rejected here.
    pub fn new(spec: FindSpec) -> Result<Self> {
        let patterns = spec
            .clauses
            .iter()
            .map(|(key, condition)| match condition {
                Condition::Matches(p) | Condition::NotMatches(p) => Regex::new(p)
                    .map(Some)
                    .map_err(|e| Error::InvalidTask(format!("bad pattern for {key}: {e}"))),
                _ => Ok(None),
            })
            .collect::<Result<Vec<_>>>()?;

        Ok(Self {
            spec,
            patterns,
            skip_dynamic: false,
            skip_builtin: false,
            skip_default: false,
        })
    }

    /// Predicate matching every record.
    pub fn all() -> Self {
        Self {
            spec: FindSpec::new(),
            patterns: Vec::new(),
            skip_dynamic: false,
            skip_builtin: false,
            skip_default: false,
        }
    }

    /// Exclude dynamic records (`!dynamic`).
    pub fn excluding_dynamic(mut self) -> Self {
        self.skip_dynamic = true;
        self
    }

    /// Exclude builtin records (`!builtin`).
    pub fn excluding_builtin(mut self) -> Self {
        self.skip_builtin = true;
        self
    }

    /// Restrict to records that may be removed: not dynamic, default or
    /// builtin.
    pub fn removable(mut self) -> Self {
        self.skip_dynamic = true;
        self.skip_builtin = true;
        self.skip_default = true;
        self
    }

    /// The criteria this predicate was built from.
    pub fn spec(&self) -> &FindSpec {
        &self.spec
    }

    /// Whether the predicate can be evaluated without the device.
    pub fn is_local(&self) -> bool {
        !self.spec.has_raw()
    }

    /// Render the device filter expression (the part after `find where`).
    pub fn filter_expression(&self) -> Result<String> {
        let mut parts = Vec::with_capacity(self.spec.clauses.len() + 3);
        for (key, condition) in &self.spec.clauses {
            parts.push(match condition {
                Condition::Literal(v) => format!("{key}={}", codec::encode(v)?),
                Condition::IsSet => key.clone(),
                Condition::NotSet => format!("!{key}"),
                Condition::NotEqual(v) => format!("{key}!={}", codec::encode(v)?),
                Condition::Matches(p) => format!("{key}~{}", codec::encode_forced(p)?),
                Condition::NotMatches(p) => format!("!({key}~{})", codec::encode_forced(p)?),
                Condition::Raw(expr) => format!("({expr})"),
            });
        }
        if self.skip_default {
            parts.push("!default".to_string());
        }
        if self.skip_builtin {
            parts.push("!builtin".to_string());
        }
        if self.skip_dynamic {
            parts.push("!dynamic".to_string());
        }
        Ok(parts.join(" "))
    }

    /// Match a record locally.
    ///
    /// Fails with `UnsupportedOperation` when the criteria contain a raw
    /// expression, which only the device can evaluate.
    pub fn matches(&self, record: &Record) -> Result<bool> {
        if self.skip_dynamic && record.flag("dynamic") {
            return Ok(false);
        }
        if self.skip_builtin && record.flag("builtin") {
            return Ok(false);
        }
        if self.skip_default && record.flag("default") {
            return Ok(false);
        }

        for ((key, condition), pattern) in self.spec.clauses.iter().zip(&self.patterns) {
            let actual = record.get(key);
            let ok = match condition {
                Condition::Literal(v) => actual.is_some_and(|a| codec::values_equal(v, a)),
                Condition::IsSet => actual.is_some_and(|a| {
                    codec::as_bool(a) != Some(false) && !a.is_empty()
                }),
                Condition::NotSet => actual.is_none(),
                Condition::NotEqual(v) => actual.is_some_and(|a| !codec::values_equal(v, a)),
                Condition::Matches(_) => {
                    actual.is_some_and(|a| pattern.as_ref().is_some_and(|re| re.is_match(&codec::text(a))))
                }
                Condition::NotMatches(_) => {
                    !actual.is_some_and(|a| pattern.as_ref().is_some_and(|re| re.is_match(&codec::text(a))))
                }
                Condition::Raw(expr) => {
                    return Err(Error::unsupported(
                        "local match",
                        format!("raw expression ({expr}) can only be evaluated by the device"),
                    ));
                }
            };
            if !ok {
                return Ok(false);
            }
        }
        Ok(true)
    }
}

impl fmt::Display for Predicate {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        self.spec.fmt(f)
    }
}
