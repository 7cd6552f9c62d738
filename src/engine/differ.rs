//! Plan and result display

use colored::{ColoredString, Colorize};
use declarative::{DiffSummary, Operation, Plan, Task, TaskOutcome};
use serde_json::{Map, Value as Json};
use std::fs;
use std::path::Path;

use super::runner::DeviceReport;
use crate::ui;

fn symbol(op: &Operation) -> ColoredString {
    match op {
        Operation::Add { .. } => "+".green(),
        Operation::Remove { .. } => "-".red(),
        Operation::Set { .. } => "~".yellow(),
        Operation::Move { .. } => "↕".cyan(),
        Operation::Enable { .. } | Operation::Disable { .. } => "○".blue(),
    }
}

/// Print the writes planned for one task
pub fn display_plan(index: usize, task: &Task, plan: &Plan) {
    let status = if plan.is_empty() && !plan.drift {
        "ok".green()
    } else if plan.is_empty() {
        "drift".yellow()
    } else {
        ui::plural(plan.ops.len(), "change").yellow()
    };
    println!("{} {} {}", format!("[{}]", index + 1).blue().bold(), task, status);

    for op in &plan.ops {
        println!("    {} {}", symbol(op), op.to_string().dimmed());
    }
    display_values(&plan.return_values);
}

/// Print a task that is not planned offline (cmd, put, fetch)
pub fn display_unplanned(index: usize, task: &Task) {
    println!(
        "{} {} {}",
        format!("[{}]", index + 1).blue().bold(),
        task,
        "(runs on apply)".dimmed()
    );
}

/// Print the totals of a plan run
pub fn display_plan_summary(summary: &DiffSummary) {
    println!();
    if !summary.has_changes() {
        println!("  {} No changes needed", "✓".green());
        return;
    }
    println!(
        "  Summary: {} ({} add, {} remove, {} set, {} move, {} toggle)",
        ui::plural(summary.total(), "change").bold(),
        summary.additions.to_string().green(),
        summary.removals.to_string().red(),
        summary.modifications.to_string().yellow(),
        summary.moves,
        summary.toggles
    );
}

fn display_values(values: &Map<String, Json>) {
    for (key, value) in values {
        let text = match value {
            Json::String(s) => s.clone(),
            other => other.to_string(),
        };
        ui::kv(key, &ui::truncate(&text, 100));
    }
}

/// Print one device's outcome
pub fn display_report(report: &DeviceReport) {
    let os = report.os.map(|os| format!(" ({os})")).unwrap_or_default();
    let (mark, status) = if report.failed() {
        ("✗".red(), "failed".red())
    } else if report.outcome.changed {
        ("✓".green(), "changed".yellow())
    } else {
        ("✓".green(), "ok".green())
    };
    println!("{mark} {}{} {status}", report.device.bold(), os.dimmed());

    if let Some(reason) = report.failure_message() {
        println!("    {}", reason.red());
    }
    let summary = &report.summary;
    if summary.total() > 0 {
        ui::dim(&format!(
            "{} changed, {} ok, {} failed, {} skipped",
            summary.changed, summary.unchanged, summary.failed, summary.skipped
        ));
    }
    display_values(&report.outcome.return_values);
    show_backup_diff(&report.outcome);
}

/// When a fetch replaced a local file, show what changed
fn show_backup_diff(outcome: &TaskOutcome) {
    let Some(Json::String(backup)) = outcome.return_values.get("backup") else {
        return;
    };
    let backup = Path::new(backup);
    let Some(current) = backup.to_str().and_then(|b| b.strip_suffix(".bak")) else {
        return;
    };
    for line in file_diff(backup, Path::new(current)) {
        println!("    {line}");
    }
}

/// Changed lines between two text files, colored; empty when unreadable
pub fn file_diff(old: &Path, new: &Path) -> Vec<String> {
    let Ok(text_old) = fs::read_to_string(old) else {
        return Vec::new();
    };
    let Ok(text_new) = fs::read_to_string(new) else {
        return Vec::new();
    };

    let diff = similar::TextDiff::from_lines(&text_old, &text_new);
    let mut lines = Vec::new();
    for change in diff.iter_all_changes() {
        let text = change.value().trim_end_matches('\n');
        match change.tag() {
            similar::ChangeTag::Delete => lines.push(format!("- {text}").red().to_string()),
            similar::ChangeTag::Insert => lines.push(format!("+ {text}").green().to_string()),
            similar::ChangeTag::Equal => {}
        }
    }
    lines
}
