//! Backend abstraction for device access.
//!
//! The [`Backend`] trait is the set of primitive operations the reconciler
//! needs, allowing for different implementations (a live device over a
//! [`Transport`](crate::transport::Transport), an in-memory device for
//! offline planning and tests).

pub mod memory;
pub mod script;

use crate::error::Result;
use crate::predicate::Predicate;
use crate::types::{Assignments, FacilityPath, ItemId, Record};

/// Primitive operations on device facilities.
///
/// Every method is one round trip. Backends hold an exclusive session, so
/// all methods take `&mut self`.
pub trait Backend: Send {
    /// Read the record of a singleton facility.
    fn read_singleton(&mut self, path: &FacilityPath) -> Result<Record>;

    /// Read all records of a multi-record facility matching a predicate,
    /// in device order.
    fn read(&mut self, path: &FacilityPath, predicate: &Predicate) -> Result<Vec<Record>>;

    /// Add a record, optionally before another one. Returns the new id.
    fn add(&mut self, path: &FacilityPath, values: &Assignments, place_before: Option<&ItemId>) -> Result<ItemId>;

    /// Remove a record.
    fn remove(&mut self, path: &FacilityPath, id: &ItemId) -> Result<()>;

    /// Set parameters on a record, or on the singleton when `id` is `None`.
    fn set(&mut self, path: &FacilityPath, id: Option<&ItemId>, values: &Assignments) -> Result<()>;

    /// Move a record before another one, or to the end.
    fn move_item(&mut self, path: &FacilityPath, id: &ItemId, before: Option<&ItemId>) -> Result<()>;

    /// Enable or disable a record.
    fn set_disabled(&mut self, path: &FacilityPath, id: &ItemId, disabled: bool) -> Result<()>;

    /// Evaluate expressions with the record's parameters in scope.
    ///
    /// `exprs` are `(alias, expression)` pairs; the result maps each alias
    /// to the expression's text.
    fn evaluate(
        &mut self,
        path: &FacilityPath,
        id: Option<&ItemId>,
        exprs: &[(String, String)],
    ) -> Result<Vec<(String, String)>>;

    /// Run a raw command and return its output.
    fn run(&mut self, command: &str) -> Result<String>;
}
