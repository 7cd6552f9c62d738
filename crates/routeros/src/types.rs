//! Core types for RouterOS facilities and records.

use serde::{Deserialize, Serialize, Serializer};
use indexmap::IndexMap;
use std::time::Duration;

use crate::codec;

/// A parameter value as read from or written to the device.
///
/// Deserialization accepts the scalar and array forms of task files.
/// Durations only come from device reads; in task files they are plain
/// strings and compare against device durations canonically.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(untagged)]
pub enum Value {
    /// Boolean (`yes`/`no` on the device)
    Bool(bool),
    /// Integer
    Int(i64),
    /// Any textual value: names, addresses, ids, expressions
    Str(String),
    /// Array value
    List(Vec<Value>),
    /// Time interval in seconds
    #[serde(skip_deserializing, serialize_with = "serialize_duration")]
    Duration(u64),
}

fn serialize_duration<S: Serializer>(secs: &u64, serializer: S) -> Result<S::Ok, S::Error> {
    serializer.serialize_str(&codec::format_duration(*secs))
}

impl Value {
    /// Create a string value.
    pub fn str(s: impl Into<String>) -> Self {
        Value::Str(s.into())
    }

    /// Canonical text used for comparisons and display.
    pub fn canonical(&self) -> String {
        codec::canonical(self)
    }

    /// Whether the value is empty text or an empty list.
    pub fn is_empty(&self) -> bool {
        match self {
            Value::Str(s) => s.is_empty(),
            Value::List(items) => items.is_empty(),
            _ => false,
        }
    }
}

impl std::fmt::Display for Value {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(&self.canonical())
    }
}

impl From<&str> for Value {
    fn from(s: &str) -> Self {
        Value::Str(s.to_string())
    }
}

impl From<bool> for Value {
    fn from(b: bool) -> Self {
        Value::Bool(b)
    }
}

impl From<i64> for Value {
    fn from(n: i64) -> Self {
        Value::Int(n)
    }
}

/// Device identifier of a record in a multi-record facility, e.g. `*1A`.
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(transparent)]
pub struct ItemId(pub String);

impl ItemId {
    /// Create an id from its device text.
    pub fn new(id: impl Into<String>) -> Self {
        Self(id.into())
    }

    /// The device text of this id.
    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl std::fmt::Display for ItemId {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(&self.0)
    }
}

/// One record of a facility.
///
/// Fields keep the order they were read or inserted in. An absent key is
/// distinct from an empty value.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct Record {
    /// Item id, present for records of multi-record facilities
    #[serde(rename = ".id", default, skip_serializing_if = "Option::is_none")]
    pub id: Option<ItemId>,
    /// Parameter values
    #[serde(flatten)]
    pub fields: IndexMap<String, Value>,
}

impl Record {
    /// Create an empty record.
    pub fn new() -> Self {
        Self::default()
    }

    /// Create a record with an item id.
    pub fn with_id(id: impl Into<String>) -> Self {
        Self {
            id: Some(ItemId::new(id)),
            fields: IndexMap::new(),
        }
    }

    /// Builder-style field insertion.
    pub fn field(mut self, key: impl Into<String>, value: impl Into<Value>) -> Self {
        self.fields.insert(key.into(), value.into());
        self
    }

    /// Get a field value.
    pub fn get(&self, key: &str) -> Option<&Value> {
        self.fields.get(key)
    }

    /// Set a field value.
    pub fn insert(&mut self, key: impl Into<String>, value: Value) {
        self.fields.insert(key.into(), value);
    }

    /// Remove a field, returning its value.
    pub fn remove(&mut self, key: &str) -> Option<Value> {
        self.fields.shift_remove(key)
    }

    /// Whether the record carries a field set to boolean true.
    ///
    /// Used for the `dynamic`, `default` and `builtin` flags.
    pub fn flag(&self, key: &str) -> bool {
        self.get(key)
            .is_some_and(|v| codec::as_bool(v) == Some(true))
    }

    /// Apply assignments in place.
    pub fn apply(&mut self, values: &Assignments) {
        for (key, assignment) in values {
            match assignment {
                Assignment::Value(v) => {
                    self.fields.insert(key.clone(), v.clone());
                }
                Assignment::Unset => {
                    self.fields.shift_remove(key);
                }
            }
        }
    }
}

/// A value to write to a parameter.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Assignment {
    /// Set the parameter to a value
    Value(Value),
    /// Reset the parameter to unset (`!key` on the device)
    Unset,
}

/// Parameter assignments for `add` and `set`, in the order they are written.
pub type Assignments = IndexMap<String, Assignment>;

/// Facility path such as `/ip address` or `/system clock`.
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(try_from = "String", into = "String")]
pub struct FacilityPath(String);

impl FacilityPath {
    /// Parse and normalise a path: a leading `/` and single spaces between
    /// menu levels.
    pub fn parse(path: &str) -> crate::Result<Self> {
        let normalized = path.split_whitespace().collect::<Vec<_>>().join(" ");
        if !normalized.starts_with('/') || normalized.len() < 2 {
            return Err(crate::Error::InvalidTask(format!(
                "facility path must start with '/': {path:?}"
            )));
        }
        if normalized.chars().any(|c| matches!(c, ';' | '[' | ']' | '{' | '}' | '"' | '$')) {
            return Err(crate::Error::InvalidTask(format!(
                "facility path contains script syntax: {path:?}"
            )));
        }
        Ok(Self(normalized))
    }

    /// The normalised path text.
    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl TryFrom<String> for FacilityPath {
    type Error = crate::Error;

    fn try_from(value: String) -> crate::Result<Self> {
        Self::parse(&value)
    }
}

impl From<FacilityPath> for String {
    fn from(path: FacilityPath) -> Self {
        path.0
    }
}

impl std::fmt::Display for FacilityPath {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(&self.0)
    }
}

/// How records of a facility are addressed.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum FacilityShape {
    /// Exactly one record, get/set only
    Singleton,
    /// Records without meaningful order
    Unordered,
    /// Records whose order is significant (firewall rules, routing rules)
    Ordered,
}

/// Major firmware generation; some facilities moved between them.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum OsGeneration {
    /// RouterOS 6.x
    V6,
    /// RouterOS 7.x and later
    V7,
}

impl OsGeneration {
    /// Derive the generation from a version string such as `7.14.2 (stable)`.
    pub fn from_version(version: &str) -> Option<Self> {
        let major: u32 = version
            .trim()
            .split(|c: char| !c.is_ascii_digit())
            .next()?
            .parse()
            .ok()?;
        match major {
            0..=5 => None,
            6 => Some(Self::V6),
            _ => Some(Self::V7),
        }
    }
}

impl std::fmt::Display for OsGeneration {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::V6 => f.write_str("v6"),
            Self::V7 => f.write_str("v7"),
        }
    }
}

/// Configuration for retrying reads on transport timeouts.
#[derive(Debug, Clone)]
pub struct RetryConfig {
    /// Maximum number of attempts
    pub max_attempts: u32,
    /// Base delay between retries
    pub base_delay: Duration,
    /// Multiplier for exponential backoff
    pub backoff_factor: f64,
    /// Maximum delay between retries
    pub max_delay: Duration,
}

impl Default for RetryConfig {
    fn default() -> Self {
        Self {
            max_attempts: 3,
            base_delay: Duration::from_secs(2),
            backoff_factor: 2.0,
            max_delay: Duration::from_secs(30),
        }
    }
}

impl RetryConfig {
    /// Create a new retry config with custom settings.
    pub fn new(max_attempts: u32, base_delay: Duration, backoff_factor: f64) -> Self {
        Self {
            max_attempts,
            base_delay,
            backoff_factor,
            max_delay: Duration::from_secs(30),
        }
    }

    /// Calculate the delay for a given attempt number (0-indexed).
    pub fn delay_for_attempt(&self, attempt: u32) -> Duration {
        let delay = self.base_delay.as_secs_f64() * self.backoff_factor.powi(attempt as i32);
        let capped = delay.min(self.max_delay.as_secs_f64());
        Duration::from_secs_f64(capped)
    }

    /// Create a config that never retries.
    pub fn no_retry() -> Self {
        Self {
            max_attempts: 1,
            ..Default::default()
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_facility_path_normalises_whitespace() {
        let path = FacilityPath::parse("  /ip   firewall filter ").unwrap();
        assert_eq!(path.as_str(), "/ip firewall filter");
    }

    #[test]
    fn test_facility_path_rejects_garbage() {
        assert!(FacilityPath::parse("ip address").is_err());
        assert!(FacilityPath::parse("/").is_err());
        assert!(FacilityPath::parse("/ip address; /system reboot").is_err());
    }

    #[test]
    fn test_record_keeps_field_order() {
        let mut record = Record::new()
            .field("name", "wan")
            .field("mtu", Value::Int(1500))
            .field("comment", "uplink");
        let mut values = Assignments::new();
        values.insert("mtu".to_string(), Assignment::Unset);
        values.insert("arp".to_string(), Assignment::Value(Value::str("proxy-arp")));
        record.apply(&values);

        let keys: Vec<&str> = record.fields.keys().map(String::as_str).collect();
        assert_eq!(keys, ["name", "comment", "arp"]);

        let json = serde_json::to_string(&record).unwrap();
        assert_eq!(json, r#"{"name":"wan","comment":"uplink","arp":"proxy-arp"}"#);
    }

    #[test]
    fn test_os_generation_from_version() {
        assert_eq!(OsGeneration::from_version("7.14.2 (stable)"), Some(OsGeneration::V7));
        assert_eq!(OsGeneration::from_version("6.49.10 (long-term)"), Some(OsGeneration::V6));
        assert_eq!(OsGeneration::from_version("garbage"), None);
    }

    #[test]
    fn test_value_deserialize_forms() {
        let v: Value = serde_json::from_str("true").unwrap();
        assert_eq!(v, Value::Bool(true));
        let v: Value = serde_json::from_str("1500").unwrap();
        assert_eq!(v, Value::Int(1500));
        let v: Value = serde_json::from_str("\"ether1\"").unwrap();
        assert_eq!(v, Value::str("ether1"));
        let v: Value = serde_json::from_str("[\"a\", \"b\"]").unwrap();
        assert_eq!(v, Value::List(vec![Value::str("a"), Value::str("b")]));
    }

    #[test]
    fn test_record_serde_keeps_id() {
        let json = r#"{".id": "*1A", "address": "10.0.0.1/24", "disabled": false}"#;
        let record: Record = serde_json::from_str(json).unwrap();
        assert_eq!(record.id, Some(ItemId::new("*1A")));
        assert_eq!(record.get("address"), Some(&Value::str("10.0.0.1/24")));
        assert!(!record.flag("disabled"));
    }

    #[test]
    fn test_record_apply_assignments() {
        let mut record = Record::new().field("comment", "old").field("mtu", Value::Int(1500));
        let mut values = Assignments::new();
        values.insert("comment".to_string(), Assignment::Unset);
        values.insert("mtu".to_string(), Assignment::Value(Value::Int(9000)));
        record.apply(&values);
        assert_eq!(record.get("comment"), None);
        assert_eq!(record.get("mtu"), Some(&Value::Int(9000)));
    }

    #[test]
    fn test_retry_delay_calculation() {
        let config = RetryConfig::new(5, Duration::from_secs(2), 2.0);

        assert_eq!(config.delay_for_attempt(0), Duration::from_secs(2));
        assert_eq!(config.delay_for_attempt(1), Duration::from_secs(4));
        assert_eq!(config.delay_for_attempt(2), Duration::from_secs(8));
        assert_eq!(config.delay_for_attempt(10), Duration::from_secs(30));
    }
}
