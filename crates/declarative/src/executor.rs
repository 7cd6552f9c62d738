//! Execution engine - applies plans and runs task lists

use crate::context::{ApplyContext, ProgressCallback};
use crate::planner;
use crate::task::Task;
use crate::types::{ExecuteSummary, ItemRef, Operation, Plan, TaskOutcome};
use routeros::transfer;
use routeros::{Backend, Error, Facility, ItemId, Result};
use serde_json::Value as Json;
use std::collections::HashMap;

/// Apply a plan, one facility call per operation, in plan order.
///
/// The first failure stops the apply and is reported as
/// [`Error::PartialApply`] with the index of the last operation that went
/// through (`None` when the first one failed). Nothing is retried.
pub fn apply<P: ProgressCallback + ?Sized>(plan: &Plan, facility: &mut Facility<'_>, progress: &mut P) -> Result<()> {
    let mut added: HashMap<usize, ItemId> = HashMap::new();
    for (index, op) in plan.ops.iter().enumerate() {
        if let Err(source) = apply_op(facility, op, index, &mut added) {
            return Err(Error::PartialApply {
                applied: index,
                last_applied: index.checked_sub(1),
                source: Box::new(source),
            });
        }
        log::info!("{}: {op}", plan.path);
        progress.on_operation(&plan.path, op);
    }
    Ok(())
}

fn resolve(item: &ItemRef, added: &HashMap<usize, ItemId>) -> Result<ItemId> {
    match item {
        ItemRef::Existing(id) => Ok(id.clone()),
        ItemRef::Added(op) => added
            .get(op)
            .cloned()
            .ok_or_else(|| Error::not_found(format!("record added by operation #{op}"))),
    }
}

fn apply_op(
    facility: &mut Facility<'_>,
    op: &Operation,
    index: usize,
    added: &mut HashMap<usize, ItemId>,
) -> Result<()> {
    match op {
        Operation::Add { values, place_before } => {
            let before = place_before.as_ref().map(|b| resolve(b, added)).transpose()?;
            let id = facility.add(values, before.as_ref())?;
            added.insert(index, id);
        }
        Operation::Remove { id } => facility.remove(id)?,
        Operation::Set { target, values } => facility.set_values(target.as_ref(), values)?,
        Operation::Move { item, before } => {
            let item = resolve(item, added)?;
            let before = before.as_ref().map(|b| resolve(b, added)).transpose()?;
            facility.move_item(&item, before.as_ref())?;
        }
        Operation::Enable { id } => facility.enable(id)?,
        Operation::Disable { id } => facility.disable(id)?,
    }
    Ok(())
}

/// Run one task: plan, and apply unless this is a dry run.
///
/// Failures are reported in the outcome rather than returned.
pub fn run_task<P: ProgressCallback + ?Sized>(
    task: &Task,
    backend: &mut dyn Backend,
    ctx: &mut ApplyContext<'_>,
    progress: &mut P,
) -> TaskOutcome {
    progress.on_task_start(task);
    let outcome = execute_task(task, backend, ctx, progress).unwrap_or_else(|err| {
        log::debug!("{task} failed: {err}");
        TaskOutcome::failure(&err)
    });
    progress.on_task_complete(task, &outcome);
    outcome
}

fn execute_task<P: ProgressCallback + ?Sized>(
    task: &Task,
    backend: &mut dyn Backend,
    ctx: &mut ApplyContext<'_>,
    progress: &mut P,
) -> Result<TaskOutcome> {
    match task {
        Task::Facility(facility_task) => {
            let plan = planner::plan(facility_task, backend)?;
            let outcome = TaskOutcome {
                changed: plan.is_changed(),
                return_values: plan.return_values.clone(),
                ..TaskOutcome::default()
            };
            if !ctx.dry_run && !plan.is_empty() {
                let mut facility = Facility::new(backend, plan.path.clone(), plan.shape);
                apply(&plan, &mut facility, progress).map_err(|e| {
                    e.in_task(facility_task.path.as_str(), facility_task.mode.name(), None)
                })?;
            }
            Ok(outcome)
        }
        Task::Command(command) => {
            let mut outcome = TaskOutcome {
                changed: true,
                ..TaskOutcome::default()
            };
            if !ctx.dry_run {
                let output = backend.run(command)?;
                outcome
                    .return_values
                    .insert("output".to_string(), Json::String(output.trim_end().to_string()));
            }
            Ok(outcome)
        }
        Task::Put { src, dest } => {
            let apply = ctx.transfers_apply();
            let changed = transfer::put(ctx.transfer_for("put")?, src, dest, apply)?;
            Ok(TaskOutcome {
                changed,
                ..TaskOutcome::default()
            })
        }
        Task::Fetch { src, dest } => {
            let apply = ctx.transfers_apply();
            let fetched = transfer::fetch(ctx.transfer_for("fetch")?, src, dest, apply)?;
            let mut outcome = TaskOutcome {
                changed: fetched.changed,
                ..TaskOutcome::default()
            };
            if let Some(backup) = fetched.backup {
                outcome
                    .return_values
                    .insert("backup".to_string(), Json::String(backup.display().to_string()));
            }
            Ok(outcome)
        }
    }
}

/// Run a task list in order, merging outcomes.
///
/// Stops at the first failed task; the remaining tasks, and any tasks
/// left when cancellation is requested, are counted as skipped.
pub fn run_tasks<P: ProgressCallback + ?Sized>(
    tasks: &[Task],
    backend: &mut dyn Backend,
    ctx: &mut ApplyContext<'_>,
    progress: &mut P,
) -> (TaskOutcome, ExecuteSummary) {
    let mut merged = TaskOutcome::default();
    let mut summary = ExecuteSummary::default();

    for (i, task) in tasks.iter().enumerate() {
        if ctx.is_cancelled() {
            log::warn!("cancelled, skipping {} task(s)", tasks.len() - i);
            summary.skipped += tasks.len() - i;
            break;
        }
        let outcome = run_task(task, backend, ctx, progress);
        summary.add_outcome(&outcome);
        let failed = outcome.failed;
        merged.merge(outcome);
        if failed {
            summary.skipped += tasks.len() - i - 1;
            break;
        }
    }
    (merged, summary)
}
