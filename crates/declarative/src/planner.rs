//! Reconciliation planner - turns a task and the current facility state
//! into an ordered list of writes
//!
//! Planning only reads. Positions are 1-based and count the non-dynamic
//! records of the facility.

use crate::diff::differing;
use crate::extract;
use crate::ordering;
use crate::task::{FacilityTask, Missing, Mode};
use crate::types::{ItemRef, Operation, Plan};
use routeros::codec;
use routeros::predicate::Condition;
use routeros::{Assignment, Assignments, Backend, Error, Facility, FindSpec, ItemId, Predicate, Record, Result};
use serde_json::Value as Json;
use std::collections::HashSet;

/// Plan a facility task against the current device state.
///
/// Errors carry the task's path and mode, and the index of the desired
/// record being processed where there is one.
pub fn plan(task: &FacilityTask, backend: &mut dyn Backend) -> Result<Plan> {
    let shape = task.mode.shape();
    let mut planner = Planner {
        task,
        facility: Facility::new(backend, task.path.clone(), shape),
        plan: Plan::new(task.path.clone(), shape),
    };
    planner.run().map_err(context(task, None))?;
    log::debug!("{task}: {} operation(s) planned", planner.plan.ops.len());
    Ok(planner.plan)
}

fn context(task: &FacilityTask, record: Option<usize>) -> impl Fn(Error) -> Error + '_ {
    move |err| match err {
        Error::InTask { .. } => err,
        err => err.in_task(task.path.as_str(), task.mode.name(), record),
    }
}

fn id_of(record: &Record) -> Result<ItemId> {
    record
        .id
        .clone()
        .ok_or_else(|| Error::not_found("item id of a multi-record facility entry"))
}

fn existing_refs(records: &[Record]) -> Result<Vec<ItemRef>> {
    records.iter().map(|r| id_of(r).map(ItemRef::Existing)).collect()
}

fn check_writable(values: &Assignments) -> Result<()> {
    for assignment in values.values() {
        if let Assignment::Value(v) = assignment {
            codec::check_writable(v)?;
        }
    }
    Ok(())
}

/// Key tuple of a desired line; `None` stands for "unset".
fn key_tuple(line: &FindSpec, keys: &[String]) -> Vec<Option<String>> {
    keys.iter()
        .map(|key| match line.get(key) {
            Some(Condition::Literal(v)) => Some(v.canonical()),
            _ => None,
        })
        .collect()
}

fn render_key(keys: &[String], tuple: &[Option<String>]) -> String {
    keys.iter()
        .zip(tuple)
        .map(|(k, v)| match v {
            Some(v) => format!("{k}={v}"),
            None => format!("!{k}"),
        })
        .collect::<Vec<_>>()
        .join(" ")
}

fn keys_match(line: &FindSpec, keys: &[String], record: &Record) -> bool {
    keys.iter().all(|key| match line.get(key) {
        Some(Condition::Literal(v)) => record.get(key).is_some_and(|a| codec::values_equal(v, a)),
        _ => record.get(key).is_none(),
    })
}

struct Planner<'t, 'b> {
    task: &'t FacilityTask,
    facility: Facility<'b>,
    plan: Plan,
}

impl Planner<'_, '_> {
    fn run(&mut self) -> Result<()> {
        let task = self.task;
        match &task.mode {
            Mode::Configure { values } => self.configure(values),
            Mode::Ensure {
                finds,
                set,
                position,
                missing,
            } => {
                for (i, find) in finds.iter().enumerate() {
                    let record = (finds.len() > 1).then_some(i);
                    self.ensure(find, set, *position, *missing)
                        .map_err(context(task, record))?;
                }
                Ok(())
            }
            Mode::Present {
                lines,
                ordered,
                position,
                missing,
            } => self.present(lines, *ordered, *position, *missing),
            Mode::Absent { targets } => self.absent(targets),
            Mode::Toggle { targets, enable } => self.toggle(targets, *enable),
            Mode::FindOnly { targets, position } => self.find_only(targets, *position),
            Mode::Count { find } => self.count(find),
            Mode::Move {
                find,
                position,
                missing,
            } => self.move_only(find, *position, *missing),
            Mode::Check {
                lines,
                ordered,
                position,
            } => {
                let records = self.snapshot()?;
                self.plan.drift = !self.check(&records, lines, *ordered, *position)?;
                Ok(())
            }
            Mode::Replace {
                lines,
                ordered,
                position,
            } => self.replace(lines, *ordered, *position),
            Mode::Adjust {
                lines,
                keys,
                ordered,
                position,
            } => self.adjust(lines, keys, *ordered, *position),
            Mode::Extract(extraction) => {
                self.plan.return_values = extract::extract(&mut self.facility, extraction)?;
                Ok(())
            }
        }
    }

    /// Queue a write, rejecting values the device would misread.
    fn write(&mut self, op: Operation) -> Result<usize> {
        if let Operation::Add { values, .. } | Operation::Set { values, .. } = &op {
            check_writable(values)?;
        }
        Ok(self.plan.push(op))
    }

    /// Non-dynamic records in device order.
    fn snapshot(&mut self) -> Result<Vec<Record>> {
        self.facility.read(&Predicate::all().excluding_dynamic())
    }

    /// Non-dynamic matches, filtered by the device.
    fn find(&mut self, spec: &FindSpec) -> Result<Vec<Record>> {
        self.facility
            .read(&Predicate::new(spec.clone())?.excluding_dynamic())
    }

    /// Indices into `records` of the records matching `spec`.
    ///
    /// Matching is local unless the criteria have a raw expression, in which
    /// case the device resolves the matching ids.
    fn select(&mut self, records: &[Record], spec: &FindSpec) -> Result<Vec<usize>> {
        let predicate = Predicate::new(spec.clone())?.excluding_dynamic();
        if predicate.is_local() {
            let mut hits = Vec::new();
            for (i, record) in records.iter().enumerate() {
                if predicate.matches(record)? {
                    hits.push(i);
                }
            }
            return Ok(hits);
        }

        let ids: HashSet<ItemId> = self.facility.find_ids(&predicate)?.into_iter().collect();
        Ok(records
            .iter()
            .enumerate()
            .filter(|(_, r)| r.id.as_ref().is_some_and(|id| ids.contains(id)))
            .map(|(i, _)| i)
            .collect())
    }

    fn reposition(&mut self, current: &[ItemRef], block: &[ItemRef], position: usize) {
        for (item, before) in ordering::plan_moves(current, block, position.saturating_sub(1)) {
            self.plan.push(Operation::Move { item, before });
        }
    }

    fn configure(&mut self, values: &Assignments) -> Result<()> {
        let current = self.facility.read_one()?;
        let changes = differing(values, &current);
        if !changes.is_empty() {
            self.write(Operation::Set {
                target: None,
                values: changes,
            })?;
        }
        Ok(())
    }

    fn ensure(&mut self, find: &FindSpec, set: &Assignments, position: Option<usize>, missing: Missing) -> Result<()> {
        let (matches, desired) = match find.split_default_identity() {
            Some((identity, mut values)) => {
                let matches = self.find(&identity)?;
                if matches.is_empty() {
                    return match missing {
                        Missing::Ignore => Ok(()),
                        Missing::Add | Missing::Fail => Err(Error::not_found(format!("default object {identity}"))),
                    };
                }
                values.extend(set.iter().map(|(k, a)| (k.clone(), a.clone())));
                (matches, values)
            }
            None => (self.find(find)?, set.clone()),
        };

        if matches.is_empty() {
            return match missing {
                Missing::Add => self.add_missing(find, set, position),
                Missing::Fail => Err(Error::not_found(find.to_string())),
                Missing::Ignore => Ok(()),
            };
        }
        if position.is_some() && matches.len() > 1 {
            return Err(Error::AmbiguousMatch {
                what: find.to_string(),
                count: matches.len(),
            });
        }

        for record in &matches {
            let changes = differing(&desired, record);
            if !changes.is_empty() {
                self.write(Operation::Set {
                    target: Some(id_of(record)?),
                    values: changes,
                })?;
            }
        }

        if let Some(position) = position {
            let item = ItemRef::Existing(id_of(&matches[0])?);
            let current = existing_refs(&self.snapshot()?)?;
            self.reposition(&current, &[item], position);
        }
        Ok(())
    }

    fn add_missing(&mut self, find: &FindSpec, set: &Assignments, position: Option<usize>) -> Result<()> {
        let mut values = find.add_values()?;
        for (key, assignment) in set {
            match assignment {
                Assignment::Value(_) => {
                    values.insert(key.clone(), assignment.clone());
                }
                Assignment::Unset => {
                    values.shift_remove(key);
                }
            }
        }

        let place_before = match position {
            Some(position) => self
                .snapshot()?
                .get(position.saturating_sub(1))
                .map(id_of)
                .transpose()?
                .map(ItemRef::Existing),
            None => None,
        };
        self.write(Operation::Add { values, place_before })?;
        Ok(())
    }

    fn present(&mut self, lines: &[FindSpec], ordered: bool, position: usize, missing: Missing) -> Result<()> {
        let task = self.task;
        let records = self.snapshot()?;
        let mut claimed = vec![false; records.len()];
        let mut block = Vec::with_capacity(lines.len());

        for (i, line) in lines.iter().enumerate() {
            let item = self
                .present_line(&records, &mut claimed, line, missing)
                .map_err(context(task, Some(i)))?;
            if let Some(item) = item
                && !block.contains(&item)
            {
                block.push(item);
            }
        }

        if ordered {
            let mut current = existing_refs(&records)?;
            current.extend(block.iter().filter(|r| matches!(r, ItemRef::Added(_))).cloned());
            self.reposition(&current, &block, position);
        }
        Ok(())
    }

    fn present_line(
        &mut self,
        records: &[Record],
        claimed: &mut [bool],
        line: &FindSpec,
        missing: Missing,
    ) -> Result<Option<ItemRef>> {
        if let Some((identity, values)) = line.split_default_identity() {
            let Some(j) = self.select(records, &identity)?.into_iter().next() else {
                return match missing {
                    Missing::Ignore => Ok(None),
                    Missing::Add | Missing::Fail => Err(Error::not_found(format!("default object {identity}"))),
                };
            };
            claimed[j] = true;
            let id = id_of(&records[j])?;
            let changes = differing(&values, &records[j]);
            if !changes.is_empty() {
                self.write(Operation::Set {
                    target: Some(id.clone()),
                    values: changes,
                })?;
            }
            return Ok(Some(ItemRef::Existing(id)));
        }

        let hit = self.select(records, line)?.into_iter().find(|&j| !claimed[j]);
        match hit {
            Some(j) => {
                claimed[j] = true;
                Ok(Some(ItemRef::Existing(id_of(&records[j])?)))
            }
            None if missing == Missing::Fail => Err(Error::not_found(line.to_string())),
            None => {
                let index = self.write(Operation::Add {
                    values: line.add_values()?,
                    place_before: None,
                })?;
                Ok(Some(ItemRef::Added(index)))
            }
        }
    }

    fn absent(&mut self, targets: &[FindSpec]) -> Result<()> {
        let task = self.task;
        let mut seen = HashSet::new();
        for (i, target) in targets.iter().enumerate() {
            let at = context(task, Some(i));
            let predicate = Predicate::new(target.clone()).map_err(&at)?.removable();
            for id in self.facility.find_ids(&predicate).map_err(&at)? {
                if seen.insert(id.clone()) {
                    self.plan.push(Operation::Remove { id });
                }
            }
        }
        Ok(())
    }

    fn toggle(&mut self, targets: &[FindSpec], enable: bool) -> Result<()> {
        let task = self.task;
        let mut seen = HashSet::new();
        for (i, target) in targets.iter().enumerate() {
            let at = context(task, Some(i));
            let matches = self.find(target).map_err(&at)?;
            if matches.is_empty() {
                return Err(at(Error::not_found(target.to_string())));
            }
            // only records whose state differs
            for record in matches.iter().filter(|r| r.flag("disabled") == enable) {
                let id = id_of(record).map_err(&at)?;
                if seen.insert(id.clone()) {
                    self.plan.push(if enable {
                        Operation::Enable { id }
                    } else {
                        Operation::Disable { id }
                    });
                }
            }
        }
        Ok(())
    }

    fn find_only(&mut self, targets: &[FindSpec], position: Option<usize>) -> Result<()> {
        let task = self.task;
        let Some(position) = position else {
            for (i, target) in targets.iter().enumerate() {
                if self.find(target).map_err(context(task, Some(i)))?.is_empty() {
                    return Err(context(task, Some(i))(Error::not_found(target.to_string())));
                }
            }
            return Ok(());
        };

        let records = self.snapshot()?;
        for (i, target) in targets.iter().enumerate() {
            let at = context(task, Some(i));
            let hits = self.select(&records, target).map_err(&at)?;
            let expected = position.saturating_sub(1) + i;
            if hits.is_empty() {
                return Err(at(Error::not_found(target.to_string())));
            }
            if !hits.contains(&expected) {
                return Err(at(Error::not_found(format!("{target} at position {}", expected + 1))));
            }
        }
        Ok(())
    }

    fn count(&mut self, find: &FindSpec) -> Result<()> {
        let predicate = Predicate::new(find.clone())?
            .excluding_dynamic()
            .excluding_builtin();
        let count = self.facility.count(&predicate)?;
        self.plan.return_values.insert("count".to_string(), Json::from(count));
        Ok(())
    }

    fn move_only(&mut self, find: &FindSpec, position: usize, missing: Missing) -> Result<()> {
        let records = self.snapshot()?;
        let hits = self.select(&records, find)?;
        let j = match hits.as_slice() {
            [] if missing == Missing::Ignore => return Ok(()),
            [] => return Err(Error::not_found(find.to_string())),
            [j] => *j,
            _ => {
                return Err(Error::AmbiguousMatch {
                    what: find.to_string(),
                    count: hits.len(),
                });
            }
        };
        let current = existing_refs(&records)?;
        let item = current[j].clone();
        self.reposition(&current, &[item], position);
        Ok(())
    }

    /// Whether the records `replace` manages are exactly the desired lines
    /// (and, when ordered, in line order from `position`).
    ///
    /// `records` is the non-dynamic snapshot. Plain lines only claim
    /// removable records; default-name lines may claim factory records.
    /// Unclaimed default and builtin records are left out, since `replace`
    /// can neither remove nor re-add them. Ordered positions use the
    /// snapshot, clamped to the end like the move planner does.
    fn check(&mut self, records: &[Record], lines: &[FindSpec], ordered: bool, position: usize) -> Result<bool> {
        let task = self.task;
        let removable = Predicate::all().removable();
        let is_removable = records
            .iter()
            .map(|r| removable.matches(r))
            .collect::<Result<Vec<_>>>()?;

        let mut claimed = vec![false; records.len()];
        let mut slots = Vec::with_capacity(lines.len());
        for (i, line) in lines.iter().enumerate() {
            let factory = line.split_default_identity().is_some();
            let hit = self
                .select(records, line)
                .map_err(context(task, Some(i)))?
                .into_iter()
                .find(|&j| !claimed[j] && (factory || is_removable[j]));
            let Some(j) = hit else {
                log::debug!("{task}: no record for {line}");
                return Ok(false);
            };
            claimed[j] = true;
            slots.push(j);
        }

        let extra = (0..records.len()).filter(|&j| is_removable[j] && !claimed[j]).count();
        if extra > 0 {
            log::debug!("{task}: {extra} record(s) beyond the {} desired", lines.len());
            return Ok(false);
        }

        if ordered {
            let offset = position.saturating_sub(1).min(records.len() - lines.len());
            for (i, &j) in slots.iter().enumerate() {
                if j != offset + i {
                    log::debug!("{task}: {} at position {}", lines[i], j + 1);
                    return Ok(false);
                }
            }
        }
        Ok(true)
    }

    fn replace(&mut self, lines: &[FindSpec], ordered: bool, position: usize) -> Result<()> {
        let task = self.task;
        let records = self.snapshot()?;
        if self.check(&records, lines, ordered, position)? {
            return Ok(());
        }

        let removable = Predicate::all().removable();
        let mut survivors = Vec::new();
        for record in records {
            if removable.matches(&record)? {
                self.plan.push(Operation::Remove { id: id_of(&record)? });
            } else {
                survivors.push(record);
            }
        }

        let mut block = Vec::with_capacity(lines.len());
        for (i, line) in lines.iter().enumerate() {
            let at = context(task, Some(i));
            let item = match line.split_default_identity() {
                Some((identity, values)) => {
                    let hits = self.select(&survivors, &identity).map_err(&at)?;
                    let Some(&j) = hits.first() else {
                        return Err(at(Error::not_found(format!("default object {identity}"))));
                    };
                    let id = id_of(&survivors[j]).map_err(&at)?;
                    let changes = differing(&values, &survivors[j]);
                    if !changes.is_empty() {
                        self.write(Operation::Set {
                            target: Some(id.clone()),
                            values: changes,
                        })
                        .map_err(&at)?;
                    }
                    ItemRef::Existing(id)
                }
                None => {
                    let values = line.add_values().map_err(&at)?;
                    let index = self
                        .write(Operation::Add {
                            values,
                            place_before: None,
                        })
                        .map_err(&at)?;
                    ItemRef::Added(index)
                }
            };
            if !block.contains(&item) {
                block.push(item);
            }
        }

        if ordered {
            let mut current = existing_refs(&survivors)?;
            current.extend(block.iter().filter(|r| matches!(r, ItemRef::Added(_))).cloned());
            self.reposition(&current, &block, position);
        }
        Ok(())
    }

    fn adjust(&mut self, lines: &[FindSpec], keys: &[String], ordered: bool, position: usize) -> Result<()> {
        let task = self.task;
        let mut tuples = HashSet::new();
        for (i, line) in lines.iter().enumerate() {
            let tuple = key_tuple(line, keys);
            if !tuples.insert(tuple.clone()) {
                return Err(context(task, Some(i))(Error::DuplicateKey {
                    key: render_key(keys, &tuple),
                }));
            }
        }

        let records = self.snapshot()?;
        let mut claimed = vec![false; records.len()];
        let mut adds = Vec::new();
        let mut sets = Vec::new();
        // Err(n): the n-th pending add
        let mut slots: Vec<std::result::Result<ItemId, usize>> = Vec::with_capacity(lines.len());
        for (i, line) in lines.iter().enumerate() {
            let at = context(task, Some(i));
            let hit = (0..records.len()).find(|&j| !claimed[j] && keys_match(line, keys, &records[j]));
            match hit {
                Some(j) => {
                    claimed[j] = true;
                    let id = id_of(&records[j]).map_err(&at)?;
                    let changes = differing(&line.set_values().map_err(&at)?, &records[j]);
                    if !changes.is_empty() {
                        sets.push((i, id.clone(), changes));
                    }
                    slots.push(Ok(id));
                }
                None => {
                    adds.push((i, line.add_values().map_err(&at)?));
                    slots.push(Err(adds.len() - 1));
                }
            }
        }

        let removable = Predicate::all().removable();
        let mut removes = Vec::new();
        let mut survivors = Vec::new();
        for (j, record) in records.iter().enumerate() {
            let id = id_of(record)?;
            if !claimed[j] && removable.matches(record)? {
                removes.push(id);
            } else {
                survivors.push(ItemRef::Existing(id));
            }
        }

        let mut added = Vec::with_capacity(adds.len());
        for (i, values) in adds {
            let index = self
                .write(Operation::Add {
                    values,
                    place_before: None,
                })
                .map_err(context(task, Some(i)))?;
            added.push(ItemRef::Added(index));
        }
        for (i, id, values) in sets {
            self.write(Operation::Set {
                target: Some(id),
                values,
            })
            .map_err(context(task, Some(i)))?;
        }

        if ordered {
            let block: Vec<ItemRef> = slots
                .into_iter()
                .map(|slot| match slot {
                    Ok(id) => ItemRef::Existing(id),
                    Err(n) => added[n].clone(),
                })
                .collect();
            let mut current = survivors;
            current.extend(added.iter().cloned());
            self.reposition(&current, &block, position);
        }

        for id in removes {
            self.plan.push(Operation::Remove { id });
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use routeros::backend::memory::MemoryBackend;
    use routeros::{ErrorKind, FacilityPath, Value};

    fn path(p: &str) -> FacilityPath {
        FacilityPath::parse(p).unwrap()
    }

    fn literal(v: impl Into<Value>) -> Condition {
        Condition::Literal(v.into())
    }

    fn task(p: &str, mode: Mode) -> FacilityTask {
        FacilityTask::new(path(p), mode).unwrap()
    }

    #[test]
    fn test_configure_sets_only_differing_fields() {
        let mut backend = MemoryBackend::new().with_singleton(
            "/system clock",
            Record::new()
                .field("time-zone-name", "UTC")
                .field("time-zone-autodetect", true),
        );
        let mut values = Assignments::new();
        values.insert("time-zone-name".to_string(), Assignment::Value(Value::str("UTC")));
        values.insert("time-zone-autodetect".to_string(), Assignment::Value(Value::str("no")));

        let plan = plan(&task("/system clock", Mode::Configure { values }), &mut backend).unwrap();
        assert_eq!(plan.ops.len(), 1);
        assert_eq!(plan.ops[0].to_string(), "set time-zone-autodetect=no");
    }

    #[test]
    fn test_ensure_adds_with_find_and_set() {
        let mut backend = MemoryBackend::new().with_items("/ip pool", vec![]);
        let mut set = Assignments::new();
        set.insert("ranges".to_string(), Assignment::Value(Value::str("10.0.0.10-10.0.0.99")));
        let mode = Mode::Ensure {
            finds: vec![FindSpec::new().with("name", literal("dhcp"))],
            set,
            position: None,
            missing: Missing::Add,
        };

        let plan = plan(&task("/ip pool", mode), &mut backend).unwrap();
        assert_eq!(plan.ops.len(), 1);
        let Operation::Add { values, .. } = &plan.ops[0] else {
            panic!("expected add, got {}", plan.ops[0]);
        };
        assert!(values.contains_key("name"));
        assert!(values.contains_key("ranges"));
    }

    #[test]
    fn test_ensure_fail_and_ignore() {
        let mut backend = MemoryBackend::new().with_items("/ip pool", vec![]);
        let find = FindSpec::new().with("name", literal("dhcp"));

        let fail = Mode::Ensure {
            finds: vec![find.clone()],
            set: Assignments::new(),
            position: None,
            missing: Missing::Fail,
        };
        let err = plan(&task("/ip pool", fail), &mut backend).unwrap_err();
        assert_eq!(err.kind(), ErrorKind::NotFound);
        assert!(err.to_string().contains("/ip pool [notfound-is-failed]"));

        let ignore = Mode::Ensure {
            finds: vec![find],
            set: Assignments::new(),
            position: None,
            missing: Missing::Ignore,
        };
        assert!(!plan(&task("/ip pool", ignore), &mut backend).unwrap().is_changed());
    }

    #[test]
    fn test_ensure_position_requires_single_match() {
        let mut backend = MemoryBackend::new().with_items(
            "/ip firewall filter",
            vec![
                Record::new().field("chain", "input"),
                Record::new().field("chain", "input"),
            ],
        );
        let mode = Mode::Ensure {
            finds: vec![FindSpec::new().with("chain", literal("input"))],
            set: Assignments::new(),
            position: Some(1),
            missing: Missing::Fail,
        };
        let err = plan(&task("/ip firewall filter", mode), &mut backend).unwrap_err();
        assert_eq!(err.kind(), ErrorKind::AmbiguousMatch);
    }

    #[test]
    fn test_default_name_sets_on_factory_record() {
        let mut backend = MemoryBackend::new().with_items(
            "/interface ethernet",
            vec![
                Record::new()
                    .field("default-name", "ether1")
                    .field("name", "ether1")
                    .field("default", true),
            ],
        );
        let line = FindSpec::new()
            .with("default-name", literal("ether1"))
            .with("name", literal("wan"));
        let mode = Mode::Present {
            lines: vec![line],
            ordered: false,
            position: 1,
            missing: Missing::Add,
        };
        let plan = plan(&task("/interface ethernet", mode), &mut backend).unwrap();
        assert_eq!(plan.ops.len(), 1);
        assert!(matches!(&plan.ops[0], Operation::Set { target: Some(_), values } if values.len() == 1));
    }

    #[test]
    fn test_toggle_only_differing_state() {
        let mut backend = MemoryBackend::new().with_items(
            "/ip route",
            vec![
                Record::new().field("comment", "backup").field("disabled", true),
                Record::new().field("comment", "backup").field("disabled", false),
            ],
        );
        let mode = Mode::Toggle {
            targets: vec![FindSpec::new().with("comment", literal("backup"))],
            enable: false,
        };
        let plan = plan(&task("/ip route", mode), &mut backend).unwrap();
        assert_eq!(plan.ops.len(), 1);
        assert_eq!(plan.ops[0].verb(), "disable");
    }

    #[test]
    fn test_toggle_without_match_is_not_found() {
        let mut backend = MemoryBackend::new().with_items("/ip route", vec![]);
        let mode = Mode::Toggle {
            targets: vec![FindSpec::new().with("comment", literal("backup"))],
            enable: true,
        };
        let err = plan(&task("/ip route", mode), &mut backend).unwrap_err();
        assert_eq!(err.kind(), ErrorKind::NotFound);
    }

    #[test]
    fn test_absent_skips_default_and_builtin() {
        let mut backend = MemoryBackend::new().with_items(
            "/interface list",
            vec![
                Record::new().field("name", "all").field("builtin", true),
                Record::new().field("name", "LAN"),
                Record::new().field("name", "WAN").field("dynamic", true),
            ],
        );
        let mode = Mode::Absent {
            targets: vec![FindSpec::new(), FindSpec::new().with("name", literal("LAN"))],
        };
        let plan = plan(&task("/interface list", mode), &mut backend).unwrap();
        assert_eq!(plan.ops.len(), 1);
        assert_eq!(plan.ops[0].verb(), "remove");
    }

    #[test]
    fn test_find_only_checks_position() {
        let mut backend = MemoryBackend::new().with_items(
            "/ip firewall filter",
            vec![
                Record::new().field("comment", "a"),
                Record::new().field("comment", "b"),
            ],
        );
        let targets = vec![FindSpec::new().with("comment", literal("b"))];

        let at_two = Mode::FindOnly {
            targets: targets.clone(),
            position: Some(2),
        };
        assert!(!plan(&task("/ip firewall filter", at_two), &mut backend).unwrap().is_changed());

        let at_one = Mode::FindOnly {
            targets,
            position: Some(1),
        };
        let err = plan(&task("/ip firewall filter", at_one), &mut backend).unwrap_err();
        assert_eq!(err.kind(), ErrorKind::NotFound);
    }

    #[test]
    fn test_move_only() {
        let mut backend = MemoryBackend::new().with_items(
            "/ip firewall filter",
            vec![
                Record::new().field("comment", "a"),
                Record::new().field("comment", "b"),
                Record::new().field("comment", "c"),
            ],
        );
        let mode = Mode::Move {
            find: FindSpec::new().with("comment", literal("c")),
            position: 1,
            missing: Missing::Fail,
        };
        let plan = plan(&task("/ip firewall filter", mode), &mut backend).unwrap();
        assert_eq!(plan.ops.len(), 1);
        assert!(matches!(
            &plan.ops[0],
            Operation::Move { before: Some(ItemRef::Existing(_)), .. }
        ));
    }

    #[test]
    fn test_check_reports_drift_without_ops() {
        let mut backend = MemoryBackend::new().with_items(
            "/ip dns static",
            vec![Record::new().field("name", "router.lan").field("address", "10.0.0.1")],
        );
        let mode = Mode::Check {
            lines: vec![
                FindSpec::new().with("name", literal("router.lan")),
                FindSpec::new().with("name", literal("nas.lan")),
            ],
            ordered: false,
            position: 1,
        };
        let plan = plan(&task("/ip dns static", mode), &mut backend).unwrap();
        assert!(plan.drift);
        assert!(plan.is_changed());
        assert!(plan.is_empty());
    }

    #[test]
    fn test_adjust_rejects_duplicate_keys() {
        let mut backend = MemoryBackend::new().with_items("/user group", vec![]);
        let line = FindSpec::new().with("name", literal("g1"));
        let mode = Mode::Adjust {
            lines: vec![line.clone(), line],
            keys: vec!["name".to_string()],
            ordered: false,
            position: 1,
        };
        let err = plan(&task("/user group", mode), &mut backend).unwrap_err();
        assert_eq!(err.kind(), ErrorKind::DuplicateKey);
        assert!(matches!(err, Error::InTask { record: Some(1), .. }));
    }

    #[test]
    fn test_sentinel_literal_never_planned() {
        let mut backend = MemoryBackend::new().with_items("/ip pool", vec![]);
        let mode = Mode::Present {
            lines: vec![FindSpec::new().with("name", literal("! pool"))],
            ordered: false,
            position: 1,
            missing: Missing::Add,
        };
        let err = plan(&task("/ip pool", mode), &mut backend).unwrap_err();
        assert_eq!(err.kind(), ErrorKind::EncodingError);
    }
}
