// Reconciliation commands
pub mod apply;
pub mod plan;

// Ad-hoc device access
pub mod cmd;
pub mod get;

// Offline checks
pub mod check_config;

use anyhow::{Context as AnyhowContext, Result, bail};
use std::path::Path;

use crate::config::{Device, Inventory};
use crate::engine::{DeviceReport, Session, summarize};
use crate::engine::differ::display_report;
use crate::{Context, ui};
use routeros::OsGeneration;

/// Pick one device: the named one, or the only one in the inventory
pub fn single_device<'a>(inventory: &'a Inventory, name: Option<&str>) -> Result<&'a Device> {
    match name {
        Some(name) => Ok(inventory.select(&[name.to_string()])?[0]),
        None => match inventory.devices.as_slice() {
            [device] => Ok(device),
            [] => bail!("Inventory has no devices"),
            _ => bail!("Inventory has several devices; pass --device"),
        },
    }
}

/// Open a session on a snapshot, or on one device from the inventory
pub fn open_one(
    ctx: &Context,
    device: Option<&str>,
    snapshot: Option<&Path>,
    os: Option<OsGeneration>,
) -> Result<Session> {
    if let Some(snapshot) = snapshot {
        return Session::offline(snapshot, os);
    }
    let inventory = Inventory::load_default(ctx.inventory.as_deref())?;
    let mut device = single_device(&inventory, device)?.clone();
    if os.is_some() {
        device.os = os;
    }
    Session::connect(&device, &inventory.defaults)
}

/// Confirm with user
pub fn confirm_proceed(prompt: &str) -> Result<bool> {
    use dialoguer::Confirm;

    if !console::Term::stdout().is_term() {
        bail!("Not running in a terminal; pass --yes to proceed without confirmation");
    }

    let confirmed = Confirm::new()
        .with_prompt(prompt)
        .default(true)
        .interact()
        .context("Failed to read confirmation")?;

    Ok(confirmed)
}

/// Print device reports and fail when any device failed
pub fn finish(ctx: &Context, reports: &[DeviceReport]) -> Result<()> {
    if ctx.json {
        println!("{}", serde_json::to_string_pretty(reports)?);
    } else if !ctx.quiet {
        println!();
        for report in reports {
            display_report(report);
        }
    }

    let total = summarize(reports);
    let failed_devices = reports.iter().filter(|r| r.failed()).count();
    if !ctx.json && !ctx.quiet {
        println!();
        let line = format!(
            "{} changed, {} ok, {} failed, {} skipped across {}",
            ui::plural(total.changed, "task"),
            total.unchanged,
            total.failed,
            total.skipped,
            ui::plural(reports.len(), "device")
        );
        if failed_devices == 0 {
            ui::success(&line);
        } else {
            ui::warn(&line);
        }
    }

    if failed_devices > 0 {
        bail!("{} failed", ui::plural(failed_devices, "device"));
    }
    Ok(())
}
