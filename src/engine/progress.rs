//! Progress display for device runs

use declarative::{Operation, ProgressCallback, Task, TaskOutcome};
use indicatif::{MultiProgress, ProgressBar, ProgressDrawTarget, ProgressStyle};
use routeros::FacilityPath;
use std::time::Duration;

use crate::ui;

/// Bar counting finished devices
pub fn device_bar(multi: &MultiProgress, len: u64, hidden: bool) -> ProgressBar {
    if hidden {
        return ProgressBar::with_draw_target(Some(len), ProgressDrawTarget::hidden());
    }
    let pb = multi.add(ProgressBar::new(len));
    pb.set_style(
        ProgressStyle::default_bar()
            .template("{msg} ({pos}/{len}) [{bar:40.green/dim}] {percent}%")
            .unwrap_or_else(|_| ProgressStyle::default_bar())
            .progress_chars("=>-"),
    );
    pb.set_message("Devices");
    pb
}

/// Spinner for one device, showing the running task
pub fn device_spinner(multi: &MultiProgress, device: &str, hidden: bool) -> ProgressBar {
    if hidden {
        return ProgressBar::hidden();
    }
    let pb = multi.add(ProgressBar::new_spinner());
    pb.set_style(
        ProgressStyle::default_spinner()
            .template("  {spinner:.cyan} {prefix:.bold} {msg}")
            .unwrap_or_else(|_| ProgressStyle::default_spinner()),
    );
    pb.set_prefix(device.to_string());
    pb.set_message("connecting");
    pb.enable_steady_tick(Duration::from_millis(120));
    pb
}

/// Reports task progress of one device on its spinner
pub struct TaskProgress {
    bar: ProgressBar,
    device: String,
    total: usize,
    started: usize,
}

impl TaskProgress {
    pub fn new(bar: ProgressBar, device: &str, total: usize) -> Self {
        Self {
            bar,
            device: device.to_string(),
            total,
            started: 0,
        }
    }
}

impl ProgressCallback for TaskProgress {
    fn on_task_start(&mut self, task: &Task) {
        self.started += 1;
        self.bar.set_message(format!(
            "[{}/{}] {}",
            self.started,
            self.total,
            ui::truncate(&task.to_string(), 60)
        ));
    }

    fn on_operation(&mut self, path: &FacilityPath, op: &Operation) {
        log::info!("{}: {path} {op}", self.device);
    }

    fn on_task_complete(&mut self, task: &Task, outcome: &TaskOutcome) {
        if let Some(err) = &outcome.error {
            log::debug!("{}: {task} failed: {}", self.device, err.message);
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use declarative::{ItemRef, TaskError};
    use routeros::{ErrorKind, ItemId};

    #[test]
    fn test_task_progress_counts_started_tasks() {
        let mut progress = TaskProgress::new(ProgressBar::hidden(), "core", 2);
        let task = Task::Command(":put hello".to_string());

        progress.on_task_start(&task);
        assert_eq!(progress.bar.message(), "[1/2] (cmd) :put hello");

        let path = FacilityPath::parse("/ip pool").unwrap();
        progress.on_operation(
            &path,
            &Operation::Move {
                item: ItemRef::Existing(ItemId::new("*1")),
                before: None,
            },
        );

        let outcome = TaskOutcome {
            failed: true,
            error: Some(TaskError {
                kind: ErrorKind::CommandFailed,
                message: "bad command".to_string(),
            }),
            ..TaskOutcome::default()
        };
        progress.on_task_complete(&task, &outcome);
        progress.on_task_start(&task);
        assert_eq!(progress.started, 2);
    }
}
