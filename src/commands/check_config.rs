//! `tikconf check-config` - validate a task file without a device

use anyhow::{Result, bail};
use routeros::OsGeneration;
use serde_json::json;
use std::path::Path;

use crate::Context;
use crate::schema::TaskFile;
use crate::ui;

pub fn run(ctx: &Context, tasks: &Path) -> Result<()> {
    let file = TaskFile::load(tasks)?;
    let problems = file.check();

    if ctx.json {
        let list: Vec<_> = problems
            .iter()
            .map(|(os, err)| json!({ "os": os, "error": err.to_string() }))
            .collect();
        println!("{}", serde_json::to_string_pretty(&list)?);
    } else if !ctx.quiet {
        ui::header(&format!("Checking {}", tasks.display()));
        for os in [OsGeneration::V6, OsGeneration::V7] {
            let count = file.tasks_for(os).map_or(0, |t| t.len());
            ui::kv(&os.to_string(), &ui::plural(count, "task"));
        }
        println!();
        for (os, err) in &problems {
            ui::error(&format!("[{os}] {err}"));
        }
    }

    if !problems.is_empty() {
        bail!("{} in {}", ui::plural(problems.len(), "problem"), tasks.display());
    }
    if !ctx.quiet && !ctx.json {
        ui::success(&format!("{} valid", ui::plural(file.tasks.len(), "task")));
    }
    Ok(())
}
