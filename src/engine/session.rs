//! Device sessions
//!
//! A session is one device's backend plus its firmware generation, resolved
//! once when the session opens.

use anyhow::{Context, Result};
use declarative::{ApplyContext, ExecuteSummary, ProgressCallback, Task, TaskOutcome};
use routeros::backend::memory::MemoryBackend;
use routeros::backend::script::ScriptBackend;
use routeros::transfer::{FileTransfer, ScpTransfer};
use routeros::transport::SshTransport;
use routeros::{Backend, OsGeneration, RetryConfig};
use std::path::Path;
use std::sync::atomic::AtomicBool;

use crate::config::{Device, DeviceDefaults};

/// Options shared by every device of a run
#[derive(Debug, Clone, Copy, Default)]
pub struct RunOptions {
    pub dry_run: bool,
    pub force_transfers: bool,
}

pub struct Session {
    pub name: String,
    pub os: OsGeneration,
    backend: Box<dyn Backend>,
    transfer: Option<Box<dyn FileTransfer>>,
}

impl Session {
    /// Open a session to a live device over ssh
    pub fn connect(device: &Device, defaults: &DeviceDefaults) -> Result<Self> {
        let target = device.target(defaults);
        let timeout = device.timeout(defaults);
        log::debug!("{}: connecting to {}", device.name, target.destination());

        let transport = SshTransport::new(target.clone(), timeout);
        let mut backend = ScriptBackend::new(transport).with_retry(RetryConfig::default());
        let os = resolve_generation(device.os, &mut backend)
            .with_context(|| format!("Could not reach {} ({})", device.name, device.host))?;

        Ok(Self {
            name: device.name.clone(),
            os,
            backend: Box::new(backend),
            transfer: Some(Box::new(ScpTransfer::new(target, timeout))),
        })
    }

    /// Open a session on a JSON snapshot; nothing is written back to the file
    pub fn offline(snapshot: &Path, os: Option<OsGeneration>) -> Result<Self> {
        let mut backend = MemoryBackend::from_file(snapshot)
            .with_context(|| format!("Could not load snapshot {}", snapshot.display()))?;
        let os = resolve_generation(os, &mut backend)
            .context("Snapshot has no /system resource version; pass --os")?;
        let name = snapshot
            .file_stem()
            .map_or_else(|| "snapshot".to_string(), |s| s.to_string_lossy().into_owned());

        Ok(Self {
            name,
            os,
            backend: Box::new(backend),
            transfer: None,
        })
    }

    #[cfg(test)]
    pub fn with_backend(name: &str, os: OsGeneration, backend: impl Backend + 'static) -> Self {
        Self {
            name: name.to_string(),
            os,
            backend: Box::new(backend),
            transfer: None,
        }
    }

    pub fn backend(&mut self) -> &mut dyn Backend {
        self.backend.as_mut()
    }

    /// Run tasks in order, stopping at the first failure
    pub fn run<P: ProgressCallback>(
        &mut self,
        tasks: &[Task],
        opts: RunOptions,
        cancel: &AtomicBool,
        progress: &mut P,
    ) -> (TaskOutcome, ExecuteSummary) {
        let mut ctx = ApplyContext::new(opts.dry_run)
            .with_force_transfers(opts.force_transfers)
            .with_cancel(cancel);
        if let Some(transfer) = self.transfer.as_deref_mut() {
            ctx = ctx.with_transfer(transfer);
        }
        declarative::run_tasks(tasks, self.backend.as_mut(), &mut ctx, progress)
    }
}

/// The configured generation, or the one the device reports
pub fn resolve_generation(configured: Option<OsGeneration>, backend: &mut dyn Backend) -> Result<OsGeneration> {
    if let Some(os) = configured {
        return Ok(os);
    }
    let os = routeros::detect_generation(backend)?;
    log::debug!("detected RouterOS {os}");
    Ok(os)
}

#[cfg(test)]
mod tests {
    use super::*;
    use declarative::NoProgress;
    use routeros::{Record, Value};
    use std::fs;
    use tempfile::TempDir;

    fn resource(version: &str) -> MemoryBackend {
        MemoryBackend::new().with_singleton(
            "/system resource",
            Record::new().field("version", Value::str(version)),
        )
    }

    #[test]
    fn test_configured_generation_wins() {
        let mut backend = resource("6.49.10 (long-term)");
        assert_eq!(
            resolve_generation(Some(OsGeneration::V7), &mut backend).unwrap(),
            OsGeneration::V7
        );
    }

    #[test]
    fn test_detected_generation() {
        let mut backend = resource("7.15.3 (stable)");
        assert_eq!(resolve_generation(None, &mut backend).unwrap(), OsGeneration::V7);
    }

    #[test]
    fn test_offline_session_from_snapshot() {
        let dir = TempDir::new().unwrap();
        let path = dir.path().join("core.json");
        fs::write(&path, resource("6.49.10").to_json().unwrap()).unwrap();

        let session = Session::offline(&path, None).unwrap();
        assert_eq!(session.name, "core");
        assert_eq!(session.os, OsGeneration::V6);
    }

    #[test]
    fn test_transfer_without_scp_fails_the_task() {
        let mut session = Session::with_backend("lab", OsGeneration::V7, MemoryBackend::new());
        let tasks = [Task::Fetch {
            src: "backup.rsc".to_string(),
            dest: "backup.rsc".into(),
        }];
        let cancel = AtomicBool::new(false);
        let (outcome, summary) = session.run(&tasks, RunOptions::default(), &cancel, &mut NoProgress);
        assert!(outcome.failed);
        assert_eq!(summary.failed, 1);
    }
}
