//! `tikconf apply` - run a task file on devices

use anyhow::Result;
use declarative::Task;
use routeros::OsGeneration;

use super::{confirm_proceed, finish};
use crate::Context;
use crate::cli::ApplyArgs;
use crate::config::{Device, Inventory};
use crate::engine::{RunOptions, RunSettings, Session, run_devices, signal};
use crate::schema::TaskFile;
use crate::ui;

pub fn run(ctx: &Context, args: ApplyArgs) -> Result<()> {
    let inventory = Inventory::load_default(ctx.inventory.as_deref())?;
    let devices = inventory.select(&args.device)?;
    let file = TaskFile::load(&args.tasks)?;

    if !ctx.quiet && !ctx.json {
        ui::header(if args.dry_run { "Apply (dry run)" } else { "Apply" });
        ui::kv("Tasks", &format!("{} ({})", args.tasks.display(), file.tasks.len()));
        let names: Vec<&str> = devices.iter().map(|d| d.name.as_str()).collect();
        ui::kv("Devices", &names.join(", "));
        println!();
    }

    if !args.yes && !args.dry_run {
        let prompt = format!(
            "Apply {} to {}?",
            ui::plural(file.tasks.len(), "task"),
            ui::plural(devices.len(), "device")
        );
        if !confirm_proceed(&prompt)? {
            ui::warn("Aborted");
            return Ok(());
        }
    }

    let settings = RunSettings {
        opts: RunOptions {
            dry_run: args.dry_run,
            force_transfers: args.force_transfers,
        },
        jobs: args.jobs,
        cancel: signal::install(),
        show_progress: !ctx.quiet && !ctx.json,
    };
    let open = |device: &Device| Session::connect(device, &inventory.defaults);
    let build = |os: OsGeneration| -> Result<Vec<Task>> { Ok(file.tasks_for(os)?) };

    let reports = run_devices(&devices, &open, &build, &settings)?;
    if signal::cancelled() {
        ui::warn("Interrupted; remaining tasks were skipped");
    }
    if args.dry_run && !ctx.quiet && !ctx.json {
        ui::info("Dry run - no changes made");
    }
    finish(ctx, &reports)
}
