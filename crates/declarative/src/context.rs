//! Apply context and progress callbacks
//!
//! These let the executor run without depending on a particular terminal
//! UI or file transfer implementation.

use crate::task::Task;
use crate::types::{Operation, TaskOutcome};
use routeros::transfer::FileTransfer;
use routeros::{Error, FacilityPath, Result};
use std::sync::atomic::{AtomicBool, Ordering};

/// Progress callback for task execution
pub trait ProgressCallback: Send {
    /// Called before a task is planned
    fn on_task_start(&mut self, task: &Task);

    /// Called after each write has been applied
    fn on_operation(&mut self, path: &FacilityPath, op: &Operation);

    /// Called when a task completes, successfully or not
    fn on_task_complete(&mut self, task: &Task, outcome: &TaskOutcome);
}

/// No-op progress callback
pub struct NoProgress;

impl ProgressCallback for NoProgress {
    fn on_task_start(&mut self, _task: &Task) {}
    fn on_operation(&mut self, _path: &FacilityPath, _op: &Operation) {}
    fn on_task_complete(&mut self, _task: &Task, _outcome: &TaskOutcome) {}
}

/// Context passed to task execution
pub struct ApplyContext<'a> {
    /// Plan only; issue no writes
    pub dry_run: bool,
    /// Run `put`/`fetch` even in a dry run
    pub force_transfers: bool,
    /// File transfer for `put`/`fetch`
    pub transfer: Option<&'a mut dyn FileTransfer>,
    /// Checked before each task
    pub cancel: Option<&'a AtomicBool>,
}

impl<'a> ApplyContext<'a> {
    /// Create a new apply context
    pub fn new(dry_run: bool) -> Self {
        Self {
            dry_run,
            force_transfers: false,
            transfer: None,
            cancel: None,
        }
    }

    /// Builder-style: run transfers in dry runs too
    pub fn with_force_transfers(mut self, force: bool) -> Self {
        self.force_transfers = force;
        self
    }

    /// Builder-style: set the file transfer
    pub fn with_transfer(mut self, transfer: &'a mut dyn FileTransfer) -> Self {
        self.transfer = Some(transfer);
        self
    }

    /// Builder-style: set the cancellation flag
    pub fn with_cancel(mut self, cancel: &'a AtomicBool) -> Self {
        self.cancel = Some(cancel);
        self
    }

    /// Whether transfers write (upload or replace local files)
    pub fn transfers_apply(&self) -> bool {
        !self.dry_run || self.force_transfers
    }

    /// Whether cancellation was requested
    pub fn is_cancelled(&self) -> bool {
        self.cancel.is_some_and(|flag| flag.load(Ordering::SeqCst))
    }

    /// The file transfer, or an error naming the task that needs it
    pub fn transfer_for(&mut self, what: &str) -> Result<&mut (dyn FileTransfer + 'a)> {
        match self.transfer.as_deref_mut() {
            Some(transfer) => Ok(transfer),
            None => Err(Error::unsupported(what, "no file transfer configured for this device")),
        }
    }
}
