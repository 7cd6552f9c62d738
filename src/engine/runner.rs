//! Parallel runs across devices
//!
//! Each device gets its own session on a rayon worker; devices share nothing
//! but the cancellation flag. Tasks within a device run strictly in order.

use anyhow::{Context, Result};
use declarative::{ExecuteSummary, Task, TaskOutcome};
use indicatif::MultiProgress;
use rayon::prelude::*;
use routeros::OsGeneration;
use serde::Serialize;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, Mutex};

use super::progress::{TaskProgress, device_bar, device_spinner};
use super::session::{RunOptions, Session};
use crate::config::Device;

/// What happened on one device
#[derive(Debug, Clone, Serialize)]
pub struct DeviceReport {
    pub device: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub os: Option<OsGeneration>,
    #[serde(flatten)]
    pub outcome: TaskOutcome,
    #[serde(skip)]
    pub summary: ExecuteSummary,
    /// Set when the device could not be reached or its tasks did not build
    #[serde(skip_serializing_if = "Option::is_none")]
    pub setup_error: Option<String>,
}

impl DeviceReport {
    fn not_started(device: &str, os: Option<OsGeneration>, reason: String) -> Self {
        Self {
            device: device.to_string(),
            os,
            outcome: TaskOutcome {
                failed: true,
                ..TaskOutcome::default()
            },
            summary: ExecuteSummary {
                failed: 1,
                ..ExecuteSummary::default()
            },
            setup_error: Some(reason),
        }
    }

    fn cancelled(device: &str) -> Self {
        Self {
            device: device.to_string(),
            os: None,
            outcome: TaskOutcome::default(),
            summary: ExecuteSummary {
                skipped: 1,
                ..ExecuteSummary::default()
            },
            setup_error: Some("cancelled before start".to_string()),
        }
    }

    pub fn failed(&self) -> bool {
        self.outcome.failed
    }

    /// One-line reason for a failure
    pub fn failure_message(&self) -> Option<String> {
        self.setup_error
            .clone()
            .or_else(|| self.outcome.error.as_ref().map(|e| e.message.clone()))
    }
}

/// Opens a session for a device
pub type Opener<'a> = dyn Fn(&Device) -> Result<Session> + Sync + 'a;

/// Builds the task list for a firmware generation
pub type TaskBuilder<'a> = dyn Fn(OsGeneration) -> Result<Vec<Task>> + Sync + 'a;

/// Settings for a multi-device run
pub struct RunSettings<'a> {
    pub opts: RunOptions,
    pub jobs: usize,
    pub cancel: &'a AtomicBool,
    pub show_progress: bool,
}

/// Run tasks on every device, in parallel, returning reports in device order
pub fn run_devices(
    devices: &[&Device],
    open: &Opener<'_>,
    build: &TaskBuilder<'_>,
    settings: &RunSettings<'_>,
) -> Result<Vec<DeviceReport>> {
    let multi = MultiProgress::new();
    let hidden = !settings.show_progress;
    let overall = device_bar(&multi, devices.len() as u64, hidden);
    let results: Arc<Mutex<Vec<(usize, DeviceReport)>>> = Arc::new(Mutex::new(Vec::new()));

    let pool = rayon::ThreadPoolBuilder::new()
        .num_threads(settings.jobs.max(1))
        .build()
        .context("Failed to create device thread pool")?;

    pool.install(|| {
        devices.par_iter().enumerate().for_each(|(index, device)| {
            let report = if settings.cancel.load(Ordering::SeqCst) {
                DeviceReport::cancelled(&device.name)
            } else {
                let spinner = device_spinner(&multi, &device.name, hidden);
                let report = run_device(device, open, build, settings, &spinner);
                spinner.finish_and_clear();
                report
            };

            if report.failed() {
                log::warn!(
                    "{}: {}",
                    report.device,
                    report.failure_message().unwrap_or_else(|| "failed".to_string())
                );
            }
            overall.inc(1);
            push_report(&results, index, report);
        });
    });

    overall.finish_and_clear();

    let mut reports = into_reports(results)?;
    reports.sort_by_key(|(index, _)| *index);
    Ok(reports.into_iter().map(|(_, report)| report).collect())
}

fn run_device(
    device: &Device,
    open: &Opener<'_>,
    build: &TaskBuilder<'_>,
    settings: &RunSettings<'_>,
    spinner: &indicatif::ProgressBar,
) -> DeviceReport {
    let mut session = match open(device) {
        Ok(session) => session,
        Err(err) => return DeviceReport::not_started(&device.name, None, format!("{err:#}")),
    };
    let tasks = match build(session.os) {
        Ok(tasks) => tasks,
        Err(err) => {
            return DeviceReport::not_started(&device.name, Some(session.os), format!("{err:#}"));
        }
    };
    log::debug!("{}: {} task(s) for {}", device.name, tasks.len(), session.os);

    let mut progress = TaskProgress::new(spinner.clone(), &device.name, tasks.len());
    let (outcome, summary) = session.run(&tasks, settings.opts, settings.cancel, &mut progress);
    DeviceReport {
        device: device.name.clone(),
        os: Some(session.os),
        outcome,
        summary,
        setup_error: None,
    }
}

fn push_report(results: &Arc<Mutex<Vec<(usize, DeviceReport)>>>, index: usize, report: DeviceReport) {
    match results.lock() {
        Ok(mut locked) => locked.push((index, report)),
        Err(poisoned) => poisoned.into_inner().push((index, report)),
    }
}

fn into_reports(results: Arc<Mutex<Vec<(usize, DeviceReport)>>>) -> Result<Vec<(usize, DeviceReport)>> {
    let mutex = Arc::try_unwrap(results)
        .map_err(|_| anyhow::anyhow!("Failed to collect device reports: shared result state"))?;

    match mutex.into_inner() {
        Ok(collected) => Ok(collected),
        Err(poisoned) => Ok(poisoned.into_inner()),
    }
}

/// Totals across devices
pub fn summarize(reports: &[DeviceReport]) -> ExecuteSummary {
    let mut total = ExecuteSummary::default();
    for report in reports {
        total.merge(&report.summary);
    }
    total
}

#[cfg(test)]
mod tests {
    use super::*;
    use declarative::{FacilityTask, Missing, Mode};
    use routeros::backend::memory::MemoryBackend;
    use routeros::{Condition, FacilityPath, FindSpec, Value};

    fn device(name: &str) -> Device {
        toml::from_str(&format!("name = \"{name}\"\nhost = \"{name}.lab\"")).unwrap()
    }

    fn open_memory(device: &Device) -> Result<Session> {
        if device.name == "down" {
            anyhow::bail!("connection refused");
        }
        let backend = MemoryBackend::new().with_items("/ip pool", vec![]);
        Ok(Session::with_backend(&device.name, OsGeneration::V7, backend))
    }

    fn pool_tasks(_os: OsGeneration) -> Result<Vec<Task>> {
        let line = FindSpec::new().with("name", Condition::Literal(Value::str("dhcp")));
        let mode = Mode::Present {
            lines: vec![line],
            ordered: false,
            position: 1,
            missing: Missing::Add,
        };
        Ok(vec![Task::Facility(FacilityTask::new(FacilityPath::parse("/ip pool")?, mode)?)])
    }

    fn settings(cancel: &AtomicBool) -> RunSettings<'_> {
        RunSettings {
            opts: RunOptions::default(),
            jobs: 2,
            cancel,
            show_progress: false,
        }
    }

    #[test]
    fn test_reports_keep_device_order() {
        let devices = [device("a"), device("down"), device("c")];
        let refs: Vec<&Device> = devices.iter().collect();
        let cancel = AtomicBool::new(false);

        let reports = run_devices(&refs, &open_memory, &pool_tasks, &settings(&cancel)).unwrap();
        let names: Vec<&str> = reports.iter().map(|r| r.device.as_str()).collect();
        assert_eq!(names, ["a", "down", "c"]);

        assert!(reports[0].outcome.changed);
        assert!(!reports[0].failed());
        assert!(reports[1].failed());
        assert!(reports[1].failure_message().unwrap().contains("connection refused"));

        let total = summarize(&reports);
        assert_eq!(total.changed, 2);
        assert_eq!(total.failed, 1);
    }

    #[test]
    fn test_cancelled_run_starts_nothing() {
        let devices = [device("a")];
        let refs: Vec<&Device> = devices.iter().collect();
        let cancel = AtomicBool::new(true);

        let reports = run_devices(&refs, &open_memory, &pool_tasks, &settings(&cancel)).unwrap();
        assert!(!reports[0].outcome.changed);
        assert_eq!(reports[0].summary.skipped, 1);
    }

    #[test]
    fn test_build_errors_are_reported_per_device() {
        let devices = [device("a")];
        let refs: Vec<&Device> = devices.iter().collect();
        let cancel = AtomicBool::new(false);
        let fail = |os: OsGeneration| -> Result<Vec<Task>> { anyhow::bail!("no tasks for {os}") };

        let reports = run_devices(&refs, &open_memory, &fail, &settings(&cancel)).unwrap();
        assert_eq!(reports[0].os, Some(OsGeneration::V7));
        assert_eq!(reports[0].failure_message().unwrap(), "no tasks for v7");
    }

    #[test]
    fn test_push_report_handles_poisoned_mutex() {
        let results: Arc<Mutex<Vec<(usize, DeviceReport)>>> = Arc::new(Mutex::new(Vec::new()));
        let poisoned = Arc::clone(&results);

        let _ = std::thread::spawn(move || {
            let _guard = poisoned
                .lock()
                .expect("lock should succeed before poisoning");
            panic!("intentional poison");
        })
        .join();

        push_report(&results, 0, DeviceReport::cancelled("a"));

        let collected = into_reports(results).expect("poisoned mutex should be recovered");
        assert_eq!(collected.len(), 1);
    }
}
