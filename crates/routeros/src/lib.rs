//! # routeros
//!
//! Typed access to RouterOS configuration facilities.
//!
//! This crate provides functionality for:
//! - Encoding typed values as RouterOS script literals and decoding reads
//! - Building device filter expressions and local record matchers from
//!   find criteria
//! - Reading and writing facilities through a [`Backend`], either a live
//!   device over ssh or an in-memory snapshot
//! - Comparing and transferring files
//!
//! ## Example
//!
//! ```no_run
//! use routeros::backend::script::ScriptBackend;
//! use routeros::transport::{SshTarget, SshTransport};
//! use routeros::{Facility, FacilityPath, FacilityShape, Predicate};
//! use std::time::Duration;
//!
//! let transport = SshTransport::new(SshTarget::new("192.0.2.1"), Duration::from_secs(30));
//! let mut backend = ScriptBackend::new(transport);
//!
//! let path = FacilityPath::parse("/ip address").unwrap();
//! let mut facility = Facility::new(&mut backend, path, FacilityShape::Unordered);
//! for record in facility.read(&Predicate::all().excluding_dynamic()).unwrap() {
//!     println!("{:?}", record.get("address"));
//! }
//! ```
//!
//! ## Retry Logic
//!
//! Reads that time out are retried with exponential backoff. Configure
//! retry behavior with [`RetryConfig`]. Writes are never retried.

#![warn(missing_docs)]
#![warn(clippy::all)]

pub mod backend;
pub mod codec;
pub mod error;
pub mod facility;
pub mod predicate;
pub mod retry;
pub mod transfer;
pub mod transport;
pub mod types;

pub use backend::Backend;
pub use error::{Error, ErrorKind, Result};
pub use facility::Facility;
pub use predicate::{Condition, FindSpec, Predicate};
pub use types::{
    Assignment, Assignments, FacilityPath, FacilityShape, ItemId, OsGeneration, Record, RetryConfig,
    Value,
};

/// Ask the device for its firmware generation (`/system resource` version).
pub fn detect_generation(backend: &mut dyn Backend) -> Result<OsGeneration> {
    let path = FacilityPath::parse("/system resource")?;
    let resource = Facility::new(backend, path, FacilityShape::Singleton).read_one()?;
    let version = resource
        .get("version")
        .map(codec::text)
        .ok_or_else(|| Error::not_found("/system resource version"))?;
    OsGeneration::from_version(&version).ok_or_else(|| Error::CommandFailed {
        command: "/system resource get version".to_string(),
        message: format!("unrecognised version {version:?}"),
    })
}
