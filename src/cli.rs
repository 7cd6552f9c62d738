use clap::{Parser, Subcommand, ValueEnum};
use clap_complete::Shell;
use routeros::OsGeneration;
use std::path::PathBuf;

#[derive(Parser)]
#[command(name = "tikconf")]
#[command(author = "Alberto Cavalcante")]
#[command(version)]
#[command(about = "Declarative configuration for RouterOS devices", long_about = None)]
#[command(propagate_version = true)]
pub struct Cli {
    /// Verbosity level
    #[arg(short, long, action = clap::ArgAction::Count, global = true)]
    pub verbose: u8,

    /// Suppress non-essential output
    #[arg(short, long, global = true)]
    pub quiet: bool,

    /// Print results as JSON
    #[arg(long, global = true)]
    pub json: bool,

    /// Device inventory (defaults to inventory.toml in the config directory)
    #[arg(short, long, global = true, env = "TIKCONF_INVENTORY")]
    pub inventory: Option<PathBuf>,

    #[command(subcommand)]
    pub command: Command,
}

#[derive(Subcommand)]
pub enum Command {
    /// Apply a task file to devices
    Apply(ApplyArgs),

    /// Show the writes a task file would make on one device
    Plan(PlanArgs),

    /// Read parameters from a facility
    Get(GetArgs),

    /// Run a raw command on devices
    Cmd(CmdArgs),

    /// Validate a task file for both firmware generations
    CheckConfig {
        /// Task file (TOML or JSON)
        tasks: PathBuf,
    },

    /// Generate shell completions
    Completions {
        /// Shell to generate completions for
        #[arg(value_enum)]
        shell: Shell,
    },
}

// ============================================================================
// Apply
// ============================================================================

#[derive(Parser)]
pub struct ApplyArgs {
    /// Task file (TOML or JSON)
    pub tasks: PathBuf,

    /// Only these devices (repeatable; default: all)
    #[arg(short, long)]
    pub device: Vec<String>,

    /// Dry run - plan and report without writing
    #[arg(short = 'n', long)]
    pub dry_run: bool,

    /// Number of devices configured in parallel
    #[arg(short, long, default_value = "4")]
    pub jobs: usize,

    /// Run put/fetch transfers even in a dry run
    #[arg(long)]
    pub force_transfers: bool,

    /// Skip the confirmation prompt
    #[arg(short, long)]
    pub yes: bool,
}

// ============================================================================
// Plan
// ============================================================================

#[derive(Parser)]
pub struct PlanArgs {
    /// Task file (TOML or JSON)
    pub tasks: PathBuf,

    /// Device to plan against (required unless --snapshot is given)
    #[arg(short, long, conflicts_with = "snapshot")]
    pub device: Option<String>,

    /// Plan against a JSON snapshot instead of a live device
    #[arg(short, long)]
    pub snapshot: Option<PathBuf>,

    /// Firmware generation (detected when omitted)
    #[arg(long, value_enum)]
    pub os: Option<OsArg>,
}

#[derive(Clone, Copy, ValueEnum)]
pub enum OsArg {
    V6,
    V7,
}

impl From<OsArg> for OsGeneration {
    fn from(arg: OsArg) -> Self {
        match arg {
            OsArg::V6 => OsGeneration::V6,
            OsArg::V7 => OsGeneration::V7,
        }
    }
}

// ============================================================================
// Get
// ============================================================================

#[derive(Parser)]
pub struct GetArgs {
    /// Facility path, e.g. "/ip address"
    pub path: String,

    /// Parameters to read (default: whole records)
    pub fields: Vec<String>,

    /// Device to read from (default: the only device in the inventory)
    #[arg(short, long, conflicts_with = "snapshot")]
    pub device: Option<String>,

    /// Read from a JSON snapshot instead of a live device
    #[arg(short, long)]
    pub snapshot: Option<PathBuf>,

    /// Find criteria (repeatable), e.g. --find comment=uplink
    #[arg(short, long, value_parser = parse_key_value)]
    pub find: Vec<(String, String)>,

    /// Read every record of a multi-record facility
    #[arg(short, long)]
    pub all: bool,
}

// ============================================================================
// Cmd
// ============================================================================

#[derive(Parser)]
pub struct CmdArgs {
    /// Command to run, e.g. "/system reboot"
    pub command: String,

    /// Only these devices (repeatable; default: all)
    #[arg(short, long)]
    pub device: Vec<String>,

    /// Number of devices in parallel
    #[arg(short, long, default_value = "4")]
    pub jobs: usize,

    /// Skip the confirmation prompt
    #[arg(short, long)]
    pub yes: bool,
}

/// Parse `key=value`
fn parse_key_value(raw: &str) -> Result<(String, String), String> {
    match raw.split_once('=') {
        Some((key, value)) if !key.is_empty() => Ok((key.to_string(), value.to_string())),
        _ => Err(format!("expected key=value, got '{raw}'")),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use clap::CommandFactory;

    #[test]
    fn test_cli_definition() {
        Cli::command().debug_assert();
    }

    #[test]
    fn test_parse_key_value() {
        assert_eq!(
            parse_key_value("comment=uplink"),
            Ok(("comment".to_string(), "uplink".to_string()))
        );
        assert_eq!(
            parse_key_value("disabled=!"),
            Ok(("disabled".to_string(), "!".to_string()))
        );
        assert!(parse_key_value("novalue").is_err());
        assert!(parse_key_value("=x").is_err());
    }

    #[test]
    fn test_apply_flags() {
        let cli = Cli::try_parse_from([
            "tikconf", "-vv", "apply", "tasks.toml", "-d", "core", "-d", "edge", "-n", "--jobs", "2",
        ])
        .unwrap();
        assert_eq!(cli.verbose, 2);
        let Command::Apply(args) = cli.command else {
            panic!("expected apply");
        };
        assert_eq!(args.device, ["core", "edge"]);
        assert!(args.dry_run);
        assert_eq!(args.jobs, 2);
    }

    #[test]
    fn test_plan_device_and_snapshot_conflict() {
        assert!(
            Cli::try_parse_from(["tikconf", "plan", "t.toml", "-d", "core", "-s", "snap.json"]).is_err()
        );
    }
}
