//! In-memory device for offline planning and tests.
//!
//! State is loaded from a JSON snapshot: each key is a facility path whose
//! value is either an object (a singleton) or an array of records.
//!
//! ```json
//! {
//!   "/system clock": { "time-zone-name": "UTC" },
//!   "/ip address": [ { ".id": "*1", "address": "10.0.0.1/24", "interface": "ether1" } ]
//! }
//! ```

use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use std::path::Path;

use crate::backend::Backend;
use crate::codec;
use crate::error::{Error, Result};
use crate::predicate::Predicate;
use crate::types::{Assignment, Assignments, FacilityPath, ItemId, Record, Value};

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(untagged)]
enum FacilityState {
    Items(Vec<Record>),
    Singleton(Record),
}

/// Device state held in memory.
#[derive(Debug, Clone, Default)]
pub struct MemoryBackend {
    facilities: BTreeMap<FacilityPath, FacilityState>,
    next_id: u64,
    journal: Vec<String>,
    writes: usize,
    fail_at_write: Option<usize>,
}

impl MemoryBackend {
    /// Create an empty device.
    pub fn new() -> Self {
        Self {
            next_id: 1,
            ..Self::default()
        }
    }

    /// Load state from snapshot JSON text.
    pub fn from_json(json: &str) -> Result<Self> {
        let facilities: BTreeMap<FacilityPath, FacilityState> = serde_json::from_str(json)?;
        let mut backend = Self {
            facilities,
            ..Self::new()
        };
        backend.assign_missing_ids();
        Ok(backend)
    }

    /// Load state from a snapshot file.
    pub fn from_file(path: &Path) -> Result<Self> {
        Self::from_json(&std::fs::read_to_string(path)?)
    }

    /// Serialize the current state as snapshot JSON.
    pub fn to_json(&self) -> Result<String> {
        Ok(serde_json::to_string_pretty(&self.facilities)?)
    }

    /// Builder-style: add a multi-record facility.
    pub fn with_items(mut self, path: &str, records: Vec<Record>) -> Self {
        if let Ok(path) = FacilityPath::parse(path) {
            self.facilities.insert(path, FacilityState::Items(records));
        }
        self.assign_missing_ids();
        self
    }

    /// Builder-style: add a singleton facility.
    pub fn with_singleton(mut self, path: &str, record: Record) -> Self {
        if let Ok(path) = FacilityPath::parse(path) {
            self.facilities.insert(path, FacilityState::Singleton(record));
        }
        self
    }

    /// Fail the `n`th write (0-based) with `CommandFailed`.
    pub fn fail_at_write(mut self, n: usize) -> Self {
        self.fail_at_write = Some(n);
        self
    }

    /// Records of a multi-record facility in order, or empty.
    pub fn records(&self, path: &str) -> Vec<Record> {
        match FacilityPath::parse(path).ok().and_then(|p| self.facilities.get(&p)) {
            Some(FacilityState::Items(items)) => items.clone(),
            Some(FacilityState::Singleton(record)) => vec![record.clone()],
            None => Vec::new(),
        }
    }

    /// Every write applied so far, one line each.
    pub fn journal(&self) -> &[String] {
        &self.journal
    }

    fn assign_missing_ids(&mut self) {
        let mut ids = Vec::new();
        for state in self.facilities.values() {
            if let FacilityState::Items(items) = state {
                ids.extend(items.iter().filter_map(|r| r.id.as_ref()).filter_map(parse_id));
            }
        }
        self.next_id = self.next_id.max(ids.into_iter().max().map_or(1, |m| m + 1));

        let mut next_id = self.next_id;
        for state in self.facilities.values_mut() {
            if let FacilityState::Items(items) = state {
                for record in items.iter_mut().filter(|r| r.id.is_none()) {
                    record.id = Some(ItemId::new(format!("*{next_id:X}")));
                    next_id += 1;
                }
            }
        }
        self.next_id = next_id;
    }

    fn begin_write(&mut self, description: String) -> Result<()> {
        let index = self.writes;
        self.writes += 1;
        if self.fail_at_write == Some(index) {
            return Err(Error::CommandFailed {
                command: description,
                message: "failure: injected".to_string(),
            });
        }
        log::debug!("memory: {description}");
        self.journal.push(description);
        Ok(())
    }

    fn items_mut(&mut self, path: &FacilityPath) -> Result<&mut Vec<Record>> {
        match self
            .facilities
            .entry(path.clone())
            .or_insert_with(|| FacilityState::Items(Vec::new()))
        {
            FacilityState::Items(items) => Ok(items),
            FacilityState::Singleton(_) => Err(Error::unsupported(
                format!("{path} item access"),
                "facility is a singleton",
            )),
        }
    }

    fn position(&mut self, path: &FacilityPath, id: &ItemId) -> Result<usize> {
        self.items_mut(path)?
            .iter()
            .position(|r| r.id.as_ref() == Some(id))
            .ok_or_else(|| Error::CommandFailed {
                command: format!("{path} {id}"),
                message: "no such item".to_string(),
            })
    }
}

fn parse_id(id: &ItemId) -> Option<u64> {
    u64::from_str_radix(id.as_str().trim_start_matches('*'), 16).ok()
}

fn describe(values: &Assignments) -> String {
    values
        .iter()
        .map(|(k, a)| match a {
            Assignment::Value(v) => format!(" {k}={}", codec::text(v)),
            Assignment::Unset => format!(" !{k}"),
        })
        .collect()
}

fn check_values(values: &Assignments) -> Result<()> {
    values.values().try_for_each(|a| match a {
        Assignment::Value(v) => codec::encode_for_write(v).map(drop),
        Assignment::Unset => Ok(()),
    })
}

impl Backend for MemoryBackend {
    fn read_singleton(&mut self, path: &FacilityPath) -> Result<Record> {
        match self.facilities.get(path) {
            Some(FacilityState::Singleton(record)) => Ok(record.clone()),
            Some(FacilityState::Items(_)) => Err(Error::unsupported(
                format!("{path} get"),
                "facility has multiple records",
            )),
            None => Ok(Record::new()),
        }
    }

    fn read(&mut self, path: &FacilityPath, predicate: &Predicate) -> Result<Vec<Record>> {
        let items = match self.facilities.get(path) {
            Some(FacilityState::Items(items)) => items,
            Some(FacilityState::Singleton(_)) => {
                return Err(Error::unsupported(format!("{path} find"), "facility is a singleton"));
            }
            None => return Ok(Vec::new()),
        };
        let mut matched = Vec::new();
        for record in items {
            if predicate.matches(record)? {
                matched.push(record.clone());
            }
        }
        Ok(matched)
    }

    fn add(&mut self, path: &FacilityPath, values: &Assignments, place_before: Option<&ItemId>) -> Result<ItemId> {
        check_values(values)?;
        let before = place_before.map(|id| format!(" place-before={id}")).unwrap_or_default();
        self.begin_write(format!("{path} add{}{before}", describe(values)))?;

        let id = ItemId::new(format!("*{:X}", self.next_id));
        self.next_id += 1;
        let mut record = Record::with_id(id.as_str());
        record.apply(values);

        let index = match place_before {
            Some(before) => Some(self.position(path, before)?),
            None => None,
        };
        let items = self.items_mut(path)?;
        match index {
            Some(index) => items.insert(index, record),
            None => items.push(record),
        }
        Ok(id)
    }

    fn remove(&mut self, path: &FacilityPath, id: &ItemId) -> Result<()> {
        self.begin_write(format!("{path} remove {id}"))?;
        let index = self.position(path, id)?;
        self.items_mut(path)?.remove(index);
        Ok(())
    }

    fn set(&mut self, path: &FacilityPath, id: Option<&ItemId>, values: &Assignments) -> Result<()> {
        check_values(values)?;
        let target = id.map(|i| format!(" {i}")).unwrap_or_default();
        self.begin_write(format!("{path} set{target}{}", describe(values)))?;

        match id {
            Some(id) => {
                let index = self.position(path, id)?;
                self.items_mut(path)?[index].apply(values);
            }
            None => match self
                .facilities
                .entry(path.clone())
                .or_insert_with(|| FacilityState::Singleton(Record::new()))
            {
                FacilityState::Singleton(record) => record.apply(values),
                FacilityState::Items(_) => {
                    return Err(Error::unsupported(
                        format!("{path} set"),
                        "an item id is required for multi-record facilities",
                    ));
                }
            },
        }
        Ok(())
    }

    fn move_item(&mut self, path: &FacilityPath, id: &ItemId, before: Option<&ItemId>) -> Result<()> {
        let destination = before.map(|b| format!(" destination={b}")).unwrap_or_default();
        self.begin_write(format!("{path} move {id}{destination}"))?;

        let from = self.position(path, id)?;
        let record = self.items_mut(path)?.remove(from);
        let to = match before {
            Some(before) => match self.position(path, before) {
                Ok(to) => to,
                Err(e) => {
                    self.items_mut(path)?.insert(from, record);
                    return Err(e);
                }
            },
            None => self.items_mut(path)?.len(),
        };
        self.items_mut(path)?.insert(to, record);
        Ok(())
    }

    fn set_disabled(&mut self, path: &FacilityPath, id: &ItemId, disabled: bool) -> Result<()> {
        let verb = if disabled { "disable" } else { "enable" };
        self.begin_write(format!("{path} {verb} {id}"))?;
        let index = self.position(path, id)?;
        self.items_mut(path)?[index].insert("disabled", Value::Bool(disabled));
        Ok(())
    }

    /// Supports field references only: `$name`, `$"name"` or `name`.
    fn evaluate(
        &mut self,
        path: &FacilityPath,
        id: Option<&ItemId>,
        exprs: &[(String, String)],
    ) -> Result<Vec<(String, String)>> {
        let record = match id {
            Some(id) => {
                let index = self.position(path, id)?;
                self.items_mut(path)?[index].clone()
            }
            None => self.read_singleton(path)?,
        };

        exprs
            .iter()
            .map(|(alias, expr)| {
                let name = expr.trim().trim_start_matches('$').trim_matches('"');
                if name.is_empty() || name.contains(|c: char| c.is_whitespace() || "[]()".contains(c)) {
                    return Err(Error::unsupported(
                        format!("evaluate {expr}"),
                        "the in-memory device only resolves field references",
                    ));
                }
                let text = record.get(name).map(codec::text).unwrap_or_default();
                Ok((alias.clone(), text))
            })
            .collect()
    }

    fn run(&mut self, command: &str) -> Result<String> {
        self.begin_write(command.to_string())?;
        Ok(String::new())
    }
}
