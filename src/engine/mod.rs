//! Execution engine for tikconf
//!
//! The engine orchestrates:
//! 1. Sessions - Connect to a device and resolve its firmware generation
//! 2. Running - Apply task lists on many devices in parallel
//! 3. Display - Show plans, outcomes and fetched-file diffs

pub mod differ;
pub mod progress;
pub mod runner;
pub mod session;
pub mod signal;

pub use runner::{DeviceReport, RunSettings, run_devices, summarize};
pub use session::{RunOptions, Session};
