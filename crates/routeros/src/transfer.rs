//! File transfer to and from the device.
//!
//! `put` and `fetch` only move bytes when the two sides differ; contents
//! are compared by BLAKE3 digest after staging the remote copy in a
//! temporary directory.

use std::fs;
use std::path::{Path, PathBuf};
use std::process::Command;
use std::time::Duration;

use crate::error::{Error, Result};
use crate::transport::{SshTarget, run_with_timeout};

/// Copies files between this machine and the device.
pub trait FileTransfer: Send {
    /// Upload a local file to a remote path.
    fn upload(&mut self, local: &Path, remote: &str) -> Result<()>;

    /// Download a remote file to a local path.
    ///
    /// A missing remote file is `NotFound`.
    fn download(&mut self, remote: &str, local: &Path) -> Result<()>;
}

/// Transfers over the system `scp` client.
#[derive(Debug, Clone)]
pub struct ScpTransfer {
    target: SshTarget,
    timeout: Duration,
}

impl ScpTransfer {
    /// Create a transfer client for a target.
    pub fn new(target: SshTarget, timeout: Duration) -> Self {
        Self { target, timeout }
    }

    fn remote_spec(&self, remote: &str) -> String {
        format!("{}:{}", self.target.destination(), remote.trim_start_matches('/'))
    }

    fn scp(&self, from: &str, to: &str) -> Result<()> {
        let mut cmd = Command::new("scp");
        cmd.arg("-q")
            .args(self.target.options("-P", self.timeout))
            .arg(from)
            .arg(to);
        log::debug!("[{}] scp {} {}", self.target.host, from, to);

        let output = run_with_timeout(cmd, &self.target.host, self.timeout)?;
        if output.success {
            return Ok(());
        }
        let stderr = output.stderr.trim().to_string();
        if stderr.to_lowercase().contains("no such file") {
            return Err(Error::not_found(from.to_string()));
        }
        Err(Error::Transport {
            host: self.target.host.clone(),
            message: stderr,
        })
    }
}

impl FileTransfer for ScpTransfer {
    fn upload(&mut self, local: &Path, remote: &str) -> Result<()> {
        let to = self.remote_spec(remote);
        self.scp(&local.display().to_string(), &to)
    }

    fn download(&mut self, remote: &str, local: &Path) -> Result<()> {
        let from = self.remote_spec(remote);
        self.scp(&from, &local.display().to_string())
    }
}

/// BLAKE3 digest of a file, or `None` when it does not exist.
pub fn digest_file(path: &Path) -> Result<Option<blake3::Hash>> {
    match fs::read(path) {
        Ok(bytes) => Ok(Some(blake3::hash(&bytes))),
        Err(e) if e.kind() == std::io::ErrorKind::NotFound => Ok(None),
        Err(e) => Err(e.into()),
    }
}

/// Outcome of a `fetch`.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct FetchOutcome {
    /// Whether the local file was (or would be) replaced
    pub changed: bool,
    /// Previous local contents, kept next to the file as `<dest>.bak`
    pub backup: Option<PathBuf>,
}

/// Upload `local` to `remote` unless the device already has identical
/// contents. Returns whether an upload was needed.
///
/// With `apply` false the comparison still runs but nothing is uploaded.
pub fn put(transfer: &mut dyn FileTransfer, local: &Path, remote: &str, apply: bool) -> Result<bool> {
    let local_digest = digest_file(local)?.ok_or_else(|| Error::not_found(local.display().to_string()))?;

    let staging = tempfile::tempdir()?;
    let staged = staging.path().join("remote");
    let remote_digest = match transfer.download(remote, &staged) {
        Ok(()) => digest_file(&staged)?,
        Err(e) if e.kind() == crate::ErrorKind::NotFound => None,
        Err(e) => return Err(e),
    };

    if remote_digest == Some(local_digest) {
        log::debug!("{remote} is up to date");
        return Ok(false);
    }
    if apply {
        transfer.upload(local, remote)?;
        log::info!("uploaded {} to {remote}", local.display());
    }
    Ok(true)
}

/// Download `remote` into `local` when it differs from the local copy.
///
/// An existing local file is kept as `<local>.bak` before being replaced.
/// With `apply` false the comparison still runs but `local` is left alone.
pub fn fetch(transfer: &mut dyn FileTransfer, remote: &str, local: &Path, apply: bool) -> Result<FetchOutcome> {
    let staging = tempfile::tempdir()?;
    let staged = staging.path().join("remote");
    transfer.download(remote, &staged)?;

    let remote_digest = digest_file(&staged)?;
    let local_digest = digest_file(local)?;
    if remote_digest == local_digest {
        return Ok(FetchOutcome::default());
    }
    if !apply {
        return Ok(FetchOutcome {
            changed: true,
            backup: None,
        });
    }

    if let Some(parent) = local.parent().filter(|p| !p.as_os_str().is_empty()) {
        fs::create_dir_all(parent)?;
    }
    let backup = if local_digest.is_some() {
        let mut name = local.as_os_str().to_owned();
        name.push(".bak");
        let backup = PathBuf::from(name);
        fs::rename(local, &backup)?;
        Some(backup)
    } else {
        None
    };
    fs::copy(&staged, local)?;
    log::info!("fetched {remote} into {}", local.display());

    Ok(FetchOutcome { changed: true, backup })
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::collections::HashMap;
    use tempfile::TempDir;

    /// Remote side kept in memory.
    #[derive(Default)]
    struct FakeRemote {
        files: HashMap<String, Vec<u8>>,
        uploads: usize,
    }

    impl FileTransfer for FakeRemote {
        fn upload(&mut self, local: &Path, remote: &str) -> Result<()> {
            self.files.insert(remote.to_string(), fs::read(local)?);
            self.uploads += 1;
            Ok(())
        }

        fn download(&mut self, remote: &str, local: &Path) -> Result<()> {
            let bytes = self.files.get(remote).ok_or_else(|| Error::not_found(remote))?;
            fs::write(local, bytes)?;
            Ok(())
        }
    }

    #[test]
    fn test_put_uploads_only_when_different() {
        let dir = TempDir::new().unwrap();
        let local = dir.path().join("hotspot.html");
        fs::write(&local, "<html>v1</html>").unwrap();
        let mut remote = FakeRemote::default();

        assert!(put(&mut remote, &local, "hotspot/login.html", true).unwrap());
        assert_eq!(remote.uploads, 1);

        assert!(!put(&mut remote, &local, "hotspot/login.html", true).unwrap());
        assert_eq!(remote.uploads, 1);
    }

    #[test]
    fn test_put_dry_run_reports_without_upload() {
        let dir = TempDir::new().unwrap();
        let local = dir.path().join("script.rsc");
        fs::write(&local, ":put hi").unwrap();
        let mut remote = FakeRemote::default();

        assert!(put(&mut remote, &local, "script.rsc", false).unwrap());
        assert_eq!(remote.uploads, 0);
    }

    #[test]
    fn test_put_missing_local_file() {
        let dir = TempDir::new().unwrap();
        let mut remote = FakeRemote::default();
        let err = put(&mut remote, &dir.path().join("nope"), "x", true).unwrap_err();
        assert_eq!(err.kind(), crate::ErrorKind::NotFound);
    }

    #[test]
    fn test_fetch_keeps_backup() {
        let dir = TempDir::new().unwrap();
        let local = dir.path().join("backup.rsc");
        fs::write(&local, "old").unwrap();
        let mut remote = FakeRemote::default();
        remote.files.insert("backup.rsc".to_string(), b"new".to_vec());

        let outcome = fetch(&mut remote, "backup.rsc", &local, true).unwrap();
        assert!(outcome.changed);
        assert_eq!(fs::read_to_string(&local).unwrap(), "new");
        let backup = outcome.backup.unwrap();
        assert_eq!(fs::read_to_string(backup).unwrap(), "old");

        let again = fetch(&mut remote, "backup.rsc", &local, true).unwrap();
        assert_eq!(again, FetchOutcome::default());
    }

    #[test]
    fn test_fetch_new_file_without_backup() {
        let dir = TempDir::new().unwrap();
        let local = dir.path().join("sub").join("export.rsc");
        let mut remote = FakeRemote::default();
        remote.files.insert("export.rsc".to_string(), b"data".to_vec());

        let outcome = fetch(&mut remote, "export.rsc", &local, true).unwrap();
        assert!(outcome.changed);
        assert!(outcome.backup.is_none());
        assert_eq!(fs::read_to_string(&local).unwrap(), "data");
    }
}
