//! End-to-end reconciliation tests over the in-memory device
//!
//! Each test plans and applies tasks against a `MemoryBackend` and checks
//! the resulting device state, then re-plans to check convergence.

use declarative::{
    ApplyContext, Extraction, FacilityTask, IndexBy, Missing, Mode, NoProgress, Operation, Source, Task,
    TaskOutcome, plan, run_task,
};
use routeros::backend::memory::MemoryBackend;
use routeros::transfer::FileTransfer;
use routeros::{Assignment, Assignments, Condition, ErrorKind, FacilityPath, FindSpec, Record, Value};
use serde_json::json;
use std::fs;
use std::path::Path;
use tempfile::TempDir;

fn path(p: &str) -> FacilityPath {
    FacilityPath::parse(p).unwrap()
}

fn line(pairs: &[(&str, Value)]) -> FindSpec {
    pairs
        .iter()
        .fold(FindSpec::new(), |spec, (k, v)| spec.with(*k, Condition::parse(Some(v))))
}

fn comment(c: &str) -> FindSpec {
    line(&[("comment", Value::str(c))])
}

fn facility_task(p: &str, mode: Mode) -> FacilityTask {
    FacilityTask::new(path(p), mode).unwrap()
}

fn run(backend: &mut MemoryBackend, task: &FacilityTask) -> TaskOutcome {
    let mut ctx = ApplyContext::new(false);
    run_task(&Task::Facility(task.clone()), backend, &mut ctx, &mut NoProgress)
}

fn comments(backend: &MemoryBackend, p: &str) -> Vec<String> {
    backend
        .records(p)
        .iter()
        .map(|r| r.get("comment").map(ToString::to_string).unwrap_or_default())
        .collect()
}

fn names(backend: &MemoryBackend, p: &str) -> Vec<String> {
    backend
        .records(p)
        .iter()
        .map(|r| r.get("name").map(ToString::to_string).unwrap_or_default())
        .collect()
}

fn rules(names: &[&str]) -> Vec<Record> {
    names.iter().map(|n| Record::new().field("comment", *n)).collect()
}

// ============================================================================
// Scenarios
// ============================================================================

#[test]
fn test_notfound_is_ok_lines_add_missing_record() {
    let mut backend = MemoryBackend::new().with_items("/interface ethernet", vec![]);
    let desired = line(&[("name", Value::str("eth1")), ("l2mtu", Value::Int(10218))]);
    let task = facility_task(
        "/interface ethernet",
        Mode::Present {
            lines: vec![desired],
            ordered: false,
            position: 1,
            missing: Missing::Ignore,
        },
    );

    let planned = plan(&task, &mut backend).unwrap();
    assert_eq!(planned.ops.len(), 1);
    let Operation::Add { values, place_before } = &planned.ops[0] else {
        panic!("expected add, got {}", planned.ops[0]);
    };
    assert_eq!(values.get("l2mtu"), Some(&Assignment::Value(Value::Int(10218))));
    assert!(place_before.is_none());

    let outcome = run(&mut backend, &task);
    assert!(outcome.changed);
    assert!(!outcome.failed);
}

#[test]
fn test_adjust_sets_only_differing_policy() {
    let mut backend = MemoryBackend::new().with_items(
        "/user group",
        vec![
            Record::new()
                .field("name", "g1")
                .field("policy", Value::List(vec![Value::str("read")])),
        ],
    );
    let desired = line(&[
        ("name", Value::str("g1")),
        ("policy", Value::List(vec![Value::str("read"), Value::str("write")])),
    ]);
    let task = facility_task(
        "/user group",
        Mode::Adjust {
            lines: vec![desired],
            keys: vec!["name".to_string()],
            ordered: false,
            position: 1,
        },
    );

    let planned = plan(&task, &mut backend).unwrap();
    assert_eq!(planned.ops.len(), 1);
    let Operation::Set { target: Some(_), values } = &planned.ops[0] else {
        panic!("expected set, got {}", planned.ops[0]);
    };
    assert_eq!(values.len(), 1);
    assert!(values.contains_key("policy"));
}

#[test]
fn test_unset_sentinel_matches_absent_field_only() {
    let mut backend = MemoryBackend::new().with_items(
        "/ip route",
        vec![
            Record::new().field("comment", "a"),
            Record::new().field("comment", "b").field("disabled", "no"),
        ],
    );
    let task = facility_task(
        "/ip route",
        Mode::Count {
            find: line(&[("disabled", Value::str("!"))]),
        },
    );
    let outcome = run(&mut backend, &task);
    assert_eq!(outcome.return_values["count"], json!(1));
}

#[test]
fn test_count_only_on_empty_facility() {
    let mut backend = MemoryBackend::new();
    let task = facility_task("/interface list", Mode::Count { find: FindSpec::new() });
    let outcome = run(&mut backend, &task);
    assert!(!outcome.changed);
    assert!(!outcome.failed);
    assert_eq!(outcome.return_values["count"], json!(0));
}

// ============================================================================
// Convergence
// ============================================================================

#[test]
fn test_adjust_is_idempotent() {
    let mut backend = MemoryBackend::new().with_items(
        "/user group",
        vec![
            Record::new()
                .field("name", "full")
                .field("policy", "read,write")
                .field("default", true),
            Record::new().field("name", "g1").field("policy", "read"),
            Record::new().field("name", "stale").field("policy", "ftp"),
        ],
    );
    let lines = vec![
        line(&[("name", Value::str("g1")), ("policy", Value::str("read,write"))]),
        line(&[("name", Value::str("g2")), ("policy", Value::str("read"))]),
    ];
    let task = facility_task(
        "/user group",
        Mode::Adjust {
            lines,
            keys: vec!["name".to_string()],
            ordered: false,
            position: 1,
        },
    );

    assert!(run(&mut backend, &task).changed);
    let names: Vec<String> = backend
        .records("/user group")
        .iter()
        .map(|r| r.get("name").unwrap().to_string())
        .collect();
    assert_eq!(names, ["full", "g1", "g2"]);

    let again = plan(&task, &mut backend).unwrap();
    assert!(!again.is_changed(), "unexpected ops: {:?}", again.ops);
}

#[test]
fn test_adjust_ordered_orders_and_removes() {
    let mut backend = MemoryBackend::new().with_items("/ip firewall filter", rules(&["c", "a", "x"]));
    let task = facility_task(
        "/ip firewall filter",
        Mode::Adjust {
            lines: vec![comment("a"), comment("b"), comment("c")],
            keys: vec!["comment".to_string()],
            ordered: true,
            position: 1,
        },
    );

    let planned = plan(&task, &mut backend).unwrap();
    let verbs: Vec<&str> = planned.ops.iter().map(Operation::verb).collect();
    assert_eq!(verbs, ["add", "move", "remove"]);

    assert!(run(&mut backend, &task).changed);
    assert_eq!(comments(&backend, "/ip firewall filter"), ["a", "b", "c"]);
    assert!(plan(&task, &mut backend).unwrap().ops.is_empty());
}

#[test]
fn test_replace_is_idempotent() {
    let mut backend = MemoryBackend::new().with_items("/ip firewall filter", rules(&["x", "b"]));
    let task = facility_task(
        "/ip firewall filter",
        Mode::Replace {
            lines: vec![comment("a"), comment("b")],
            ordered: true,
            position: 1,
        },
    );

    assert!(run(&mut backend, &task).changed);
    assert_eq!(comments(&backend, "/ip firewall filter"), ["a", "b"]);

    let again = plan(&task, &mut backend).unwrap();
    assert!(!again.is_changed());
}

#[test]
fn test_replace_noop_when_check_passes() {
    let mut backend = MemoryBackend::new().with_items("/ip firewall filter", rules(&["a", "b"]));
    let task = facility_task(
        "/ip firewall filter",
        Mode::Replace {
            lines: vec![comment("b"), comment("a")],
            ordered: false,
            position: 1,
        },
    );
    assert!(!run(&mut backend, &task).changed);
    assert!(backend.journal().is_empty());
}

#[test]
fn test_replace_settles_beside_default_record() {
    let mut backend = MemoryBackend::new().with_items(
        "/ppp profile",
        vec![Record::new().field("name", "default").field("default", true)],
    );
    let task = facility_task(
        "/ppp profile",
        Mode::Replace {
            lines: vec![line(&[("name", Value::str("vpn"))])],
            ordered: false,
            position: 1,
        },
    );

    assert!(run(&mut backend, &task).changed);
    assert_eq!(names(&backend, "/ppp profile"), ["default", "vpn"]);
    let writes = backend.journal().len();

    assert!(!run(&mut backend, &task).changed);
    assert!(!run(&mut backend, &task).changed);
    assert_eq!(backend.journal().len(), writes);
}

#[test]
fn test_ordered_replace_positions_count_builtin_records() {
    let mut backend = MemoryBackend::new().with_items(
        "/interface list",
        vec![
            Record::new().field("name", "all").field("builtin", true),
            Record::new().field("name", "none").field("builtin", true),
        ],
    );
    let task = facility_task(
        "/interface list",
        Mode::Replace {
            lines: vec![line(&[("name", Value::str("LAN"))]), line(&[("name", Value::str("WAN"))])],
            ordered: true,
            position: 2,
        },
    );

    assert!(run(&mut backend, &task).changed);
    assert_eq!(names(&backend, "/interface list"), ["all", "LAN", "WAN", "none"]);
    let writes = backend.journal().len();

    assert!(!run(&mut backend, &task).changed);
    assert_eq!(backend.journal().len(), writes);

    let check = facility_task(
        "/interface list",
        Mode::Check {
            lines: vec![line(&[("name", Value::str("LAN"))]), line(&[("name", Value::str("WAN"))])],
            ordered: true,
            position: 2,
        },
    );
    assert!(!plan(&check, &mut backend).unwrap().drift);
}

// ============================================================================
// Ordering
// ============================================================================

#[test]
fn test_present_never_removes_or_reorders_other_records() {
    let mut backend = MemoryBackend::new().with_items("/ip firewall filter", rules(&["x", "a", "y", "b"]));
    let task = facility_task(
        "/ip firewall filter",
        Mode::Present {
            lines: vec![comment("b"), comment("n"), comment("a")],
            ordered: true,
            position: 2,
            missing: Missing::Add,
        },
    );

    assert!(run(&mut backend, &task).changed);
    assert_eq!(comments(&backend, "/ip firewall filter"), ["x", "b", "n", "a", "y"]);
    assert!(!backend.journal().iter().any(|l| l.contains(" remove ")));
    assert!(plan(&task, &mut backend).unwrap().ops.is_empty());
}

#[test]
fn test_ordered_block_lands_at_position() {
    let mut backend = MemoryBackend::new().with_items("/ip firewall filter", rules(&["o1", "c", "o2", "a", "b"]));
    let task = facility_task(
        "/ip firewall filter",
        Mode::Present {
            lines: vec![comment("a"), comment("b"), comment("c")],
            ordered: true,
            position: 2,
            missing: Missing::Add,
        },
    );

    assert!(run(&mut backend, &task).changed);
    assert_eq!(comments(&backend, "/ip firewall filter"), ["o1", "a", "b", "c", "o2"]);

    let check = facility_task(
        "/ip firewall filter",
        Mode::FindOnly {
            targets: vec![comment("a"), comment("b"), comment("c")],
            position: Some(2),
        },
    );
    assert!(!run(&mut backend, &check).failed);
}

#[test]
fn test_dynamic_records_do_not_count_for_positions() {
    let mut records = rules(&["a", "b"]);
    records.insert(0, Record::new().field("comment", "dyn").field("dynamic", true));
    let mut backend = MemoryBackend::new().with_items("/ip firewall filter", records);

    let task = facility_task(
        "/ip firewall filter",
        Mode::Move {
            find: comment("b"),
            position: 1,
            missing: Missing::Fail,
        },
    );
    assert!(run(&mut backend, &task).changed);
    assert_eq!(comments(&backend, "/ip firewall filter"), ["dyn", "b", "a"]);
}

// ============================================================================
// Safety
// ============================================================================

#[test]
fn test_sentinels_are_never_written() {
    let mut backend = MemoryBackend::new().with_items("/ip pool", vec![]);
    let forced = FindSpec::new().with("name", Condition::Literal(Value::str("~ pool")));
    let task = facility_task(
        "/ip pool",
        Mode::Present {
            lines: vec![forced],
            ordered: false,
            position: 1,
            missing: Missing::Add,
        },
    );
    let outcome = run(&mut backend, &task);
    assert!(outcome.failed);
    assert_eq!(outcome.error.unwrap().kind, ErrorKind::EncodingError);

    let mut backend = MemoryBackend::new().with_singleton("/system identity", Record::new());
    let mut values = Assignments::new();
    values.insert("name".to_string(), Assignment::Value(Value::str("!")));
    let task = facility_task("/system identity", Mode::Configure { values });
    assert_eq!(run(&mut backend, &task).error.unwrap().kind, ErrorKind::EncodingError);
    assert!(backend.journal().is_empty());
}

#[test]
fn test_index_by_duplicates_fail() {
    let mut backend = MemoryBackend::new().with_items(
        "/ip address",
        vec![
            Record::new().field("address", "10.0.0.1/24").field("interface", "bridge"),
            Record::new().field("address", "10.0.1.1/24").field("interface", "bridge"),
        ],
    );
    let task = facility_task(
        "/ip address",
        Mode::Extract(Extraction {
            find: Some(FindSpec::new()),
            fields: vec![("address".to_string(), "address".to_string())],
            source: Source::Fields,
            many: true,
            index_by: Some(IndexBy::Key("interface".to_string())),
            skip_empty: false,
            require_match: false,
            require_fields: true,
        }),
    );
    let outcome = run(&mut backend, &task);
    assert!(outcome.failed);
    assert_eq!(outcome.error.unwrap().kind, ErrorKind::DuplicateKey);
}

#[test]
fn test_dry_run_reports_changes_without_writing() {
    let mut backend = MemoryBackend::new().with_items("/ip firewall filter", rules(&["b", "a"]));
    let task = Task::Facility(facility_task(
        "/ip firewall filter",
        Mode::Present {
            lines: vec![comment("a"), comment("b")],
            ordered: true,
            position: 1,
            missing: Missing::Add,
        },
    ));
    let mut ctx = ApplyContext::new(true);
    let outcome = run_task(&task, &mut backend, &mut ctx, &mut NoProgress);
    assert!(outcome.changed);
    assert!(backend.journal().is_empty());
    assert_eq!(comments(&backend, "/ip firewall filter"), ["b", "a"]);
}

// ============================================================================
// File Transfers
// ============================================================================

/// Device file system kept in memory
#[derive(Default)]
struct DeviceFiles {
    files: std::collections::HashMap<String, Vec<u8>>,
    uploads: usize,
}

impl FileTransfer for DeviceFiles {
    fn upload(&mut self, local: &Path, remote: &str) -> routeros::Result<()> {
        self.files.insert(remote.to_string(), fs::read(local)?);
        self.uploads += 1;
        Ok(())
    }

    fn download(&mut self, remote: &str, local: &Path) -> routeros::Result<()> {
        match self.files.get(remote) {
            Some(bytes) => Ok(fs::write(local, bytes)?),
            None => Err(routeros::Error::not_found(remote)),
        }
    }
}

fn run_with_files(task: &Task, files: &mut DeviceFiles, dry_run: bool) -> TaskOutcome {
    let mut backend = MemoryBackend::new();
    let mut ctx = ApplyContext::new(dry_run).with_transfer(files);
    run_task(task, &mut backend, &mut ctx, &mut NoProgress)
}

#[test]
fn test_put_uploads_only_when_contents_differ() {
    let dir = TempDir::new().unwrap();
    let local = dir.path().join("banner.rsc");
    fs::write(&local, "/system note set note=hello\n").unwrap();
    let task = Task::Put {
        src: local,
        dest: "banner.rsc".to_string(),
    };
    let mut files = DeviceFiles::default();

    assert!(run_with_files(&task, &mut files, true).changed);
    assert_eq!(files.uploads, 0);

    assert!(run_with_files(&task, &mut files, false).changed);
    let second = run_with_files(&task, &mut files, false);
    assert!(!second.changed && !second.failed);
    assert_eq!(files.uploads, 1);
}

#[test]
fn test_fetch_keeps_previous_copy() {
    let dir = TempDir::new().unwrap();
    let local = dir.path().join("export.rsc");
    fs::write(&local, "old\n").unwrap();
    let mut files = DeviceFiles::default();
    files.files.insert("export.rsc".to_string(), b"new\n".to_vec());
    let task = Task::Fetch {
        src: "export.rsc".to_string(),
        dest: local.clone(),
    };

    let outcome = run_with_files(&task, &mut files, false);
    assert!(outcome.changed);
    let backup = dir.path().join("export.rsc.bak");
    assert_eq!(outcome.return_values["backup"], json!(backup.display().to_string()));
    assert_eq!(fs::read_to_string(&backup).unwrap(), "old\n");
    assert_eq!(fs::read_to_string(&local).unwrap(), "new\n");

    assert!(!run_with_files(&task, &mut files, false).changed);
}
