//! `tikconf cmd` - run one raw command on devices

use anyhow::{Result, bail};
use declarative::Task;
use routeros::OsGeneration;

use super::{confirm_proceed, finish};
use crate::Context;
use crate::cli::CmdArgs;
use crate::config::{Device, Inventory};
use crate::engine::{RunOptions, RunSettings, Session, run_devices, signal};
use crate::ui;

pub fn run(ctx: &Context, args: CmdArgs) -> Result<()> {
    if args.command.trim().is_empty() {
        bail!("Command is empty");
    }
    let inventory = Inventory::load_default(ctx.inventory.as_deref())?;
    let devices = inventory.select(&args.device)?;

    if !args.yes {
        let prompt = format!(
            "Run '{}' on {}?",
            ui::truncate(&args.command, 60),
            ui::plural(devices.len(), "device")
        );
        if !confirm_proceed(&prompt)? {
            ui::warn("Aborted");
            return Ok(());
        }
    }

    let settings = RunSettings {
        opts: RunOptions::default(),
        jobs: args.jobs,
        cancel: signal::install(),
        show_progress: !ctx.quiet && !ctx.json,
    };
    let open = |device: &Device| Session::connect(device, &inventory.defaults);
    let build = |_os: OsGeneration| -> Result<Vec<Task>> { Ok(vec![Task::Command(args.command.clone())]) };

    let reports = run_devices(&devices, &open, &build, &settings)?;
    finish(ctx, &reports)
}
