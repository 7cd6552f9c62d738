//! Command transports.
//!
//! A [`Transport`] sends one script to the device and returns its output.
//! [`SshTransport`] shells out to the system `ssh` client, optionally hopping
//! through a RoMON agent.

use serde::{Deserialize, Serialize};
use std::io::Read;
use std::path::PathBuf;
use std::process::{Command, Stdio};
use std::thread;
use std::time::{Duration, Instant};
use wait_timeout::ChildExt;

use crate::codec;
use crate::error::{Error, Result};

/// One round trip to the device.
pub trait Transport: Send {
    /// Send a script and return everything it printed.
    ///
    /// A round trip longer than the transport timeout fails with
    /// `TransportTimeout`.
    fn send(&mut self, command: &str) -> Result<String>;

    /// Host name used in logs and errors.
    fn host(&self) -> &str;
}

/// Where and how to reach a device over ssh.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct SshTarget {
    /// Host name or address
    pub host: String,
    /// ssh port, when not 22
    #[serde(default)]
    pub port: Option<u16>,
    /// Login user
    #[serde(default)]
    pub user: Option<String>,
    /// Private key file
    #[serde(default)]
    pub identity_file: Option<PathBuf>,
    /// RoMON id of the final device when `host` is a RoMON agent
    #[serde(default)]
    pub romon_host_id: Option<String>,
}

impl SshTarget {
    /// Create a target for a host with default settings.
    pub fn new(host: impl Into<String>) -> Self {
        Self {
            host: host.into(),
            ..Self::default()
        }
    }

    /// `user@host`, or just the host.
    pub fn destination(&self) -> String {
        match &self.user {
            Some(user) => format!("{user}@{}", self.host),
            None => self.host.clone(),
        }
    }

    /// Common ssh/scp options. `port_flag` differs between the two tools.
    pub(crate) fn options(&self, port_flag: &str, timeout: Duration) -> Vec<String> {
        let mut args = vec![
            "-o".to_string(),
            "BatchMode=yes".to_string(),
            "-o".to_string(),
            format!("ConnectTimeout={}", timeout.as_secs().max(1)),
        ];
        if let Some(port) = self.port {
            args.push(port_flag.to_string());
            args.push(port.to_string());
        }
        if let Some(identity) = &self.identity_file {
            args.push("-i".to_string());
            args.push(identity.display().to_string());
        }
        args
    }
}

/// Wrap a script for execution on a device behind a RoMON agent.
pub fn romon_wrap(host_id: &str, command: &str) -> Result<String> {
    Ok(format!("/tool romon ssh {host_id} command={}", codec::encode_forced(command)?))
}

/// Transport over the system `ssh` client, one process per round trip.
#[derive(Debug, Clone)]
pub struct SshTransport {
    target: SshTarget,
    timeout: Duration,
}

impl SshTransport {
    /// Create a transport with a per-round-trip timeout.
    pub fn new(target: SshTarget, timeout: Duration) -> Self {
        Self { target, timeout }
    }

    /// The target this transport connects to.
    pub fn target(&self) -> &SshTarget {
        &self.target
    }
}

impl Transport for SshTransport {
    fn send(&mut self, command: &str) -> Result<String> {
        let script = match &self.target.romon_host_id {
            Some(id) => romon_wrap(id, command)?,
            None => command.to_string(),
        };
        log::debug!("[{}] > {}", self.target.host, script);

        let mut cmd = Command::new("ssh");
        cmd.args(self.target.options("-p", self.timeout))
            .arg(self.target.destination())
            .arg(&script);

        let output = run_with_timeout(cmd, &self.target.host, self.timeout)?;
        if !output.success {
            return Err(Error::Transport {
                host: self.target.host.clone(),
                message: if output.stderr.trim().is_empty() {
                    format!("ssh exited with status {}", output.code.unwrap_or(-1))
                } else {
                    output.stderr.trim().to_string()
                },
            });
        }
        log::trace!("[{}] < {}", self.target.host, output.stdout);
        Ok(output.stdout)
    }

    fn host(&self) -> &str {
        &self.target.host
    }
}

/// Captured result of a finished child process.
#[derive(Debug)]
pub(crate) struct ProcessOutput {
    pub success: bool,
    pub code: Option<i32>,
    pub stdout: String,
    pub stderr: String,
}

fn drain<R: Read + Send + 'static>(pipe: Option<R>) -> thread::JoinHandle<String> {
    thread::spawn(move || {
        let mut buf = Vec::new();
        if let Some(mut pipe) = pipe {
            let _ = pipe.read_to_end(&mut buf);
        }
        String::from_utf8_lossy(&buf).into_owned()
    })
}

/// Run a command, killing it when it outlives `timeout`.
///
/// Output pipes are drained on separate threads so a chatty child cannot
/// block on a full pipe while we wait for it.
pub(crate) fn run_with_timeout(mut cmd: Command, host: &str, timeout: Duration) -> Result<ProcessOutput> {
    let mut child = cmd
        .stdin(Stdio::null())
        .stdout(Stdio::piped())
        .stderr(Stdio::piped())
        .spawn()
        .map_err(|e| Error::Transport {
            host: host.to_string(),
            message: format!("failed to start {:?}: {e}", cmd.get_program()),
        })?;

    let stdout = drain(child.stdout.take());
    let stderr = drain(child.stderr.take());

    let started = Instant::now();
    let Some(status) = child.wait_timeout(timeout)? else {
        let _ = child.kill();
        let _ = child.wait();
        return Err(Error::TransportTimeout {
            host: host.to_string(),
            after: started.elapsed(),
        });
    };

    Ok(ProcessOutput {
        success: status.success(),
        code: status.code(),
        stdout: stdout.join().unwrap_or_default(),
        stderr: stderr.join().unwrap_or_default(),
    })
}
