//! `tikconf plan` - show what apply would write on one device
//!
//! Every facility task is planned against the current state; nothing is
//! applied, so later tasks see the state as it is, not as earlier tasks
//! would leave it.

use anyhow::{Result, bail};
use declarative::{DiffSummary, Task};
use serde_json::{Value as Json, json};

use super::open_one;
use crate::Context;
use crate::cli::PlanArgs;
use crate::engine::Session;
use crate::engine::differ::{display_plan, display_plan_summary, display_unplanned};
use crate::schema::TaskFile;
use crate::ui;

pub fn run(ctx: &Context, args: PlanArgs) -> Result<()> {
    let file = TaskFile::load(&args.tasks)?;
    let mut session = open_one(
        ctx,
        args.device.as_deref(),
        args.snapshot.as_deref(),
        args.os.map(Into::into),
    )?;
    let tasks = file.tasks_for(session.os)?;

    if !ctx.quiet && !ctx.json {
        ui::header(&format!("Plan for {} ({})", session.name, session.os));
        println!();
    }

    let (entries, summary, errors) = plan_tasks(ctx, &mut session, &tasks);

    if ctx.json {
        println!("{}", serde_json::to_string_pretty(&entries)?);
    } else if !ctx.quiet {
        display_plan_summary(&summary);
    }
    if errors > 0 {
        bail!("{} could not be planned", ui::plural(errors, "task"));
    }
    Ok(())
}

fn plan_tasks(ctx: &Context, session: &mut Session, tasks: &[Task]) -> (Vec<Json>, DiffSummary, usize) {
    let show = !ctx.quiet && !ctx.json;
    let mut entries = Vec::with_capacity(tasks.len());
    let mut summary = DiffSummary::default();
    let mut errors = 0;

    for (index, task) in tasks.iter().enumerate() {
        let Task::Facility(facility_task) = task else {
            if show {
                display_unplanned(index, task);
            }
            entries.push(json!({ "task": task.to_string(), "mode": task.mode_name(), "planned": false }));
            continue;
        };

        match declarative::plan(facility_task, session.backend()) {
            Ok(plan) => {
                summary.merge(&DiffSummary::from_plan(&plan));
                if show {
                    display_plan(index, task, &plan);
                }
                let ops: Vec<String> = plan.ops.iter().map(ToString::to_string).collect();
                entries.push(json!({
                    "task": task.to_string(),
                    "mode": task.mode_name(),
                    "changed": plan.is_changed(),
                    "ops": ops,
                    "return_values": plan.return_values,
                }));
            }
            Err(err) => {
                errors += 1;
                if show {
                    ui::error(&format!("[{}] {task}: {err}", index + 1));
                }
                entries.push(json!({
                    "task": task.to_string(),
                    "error": { "kind": err.kind(), "message": err.to_string() },
                }));
            }
        }
    }
    (entries, summary, errors)
}
