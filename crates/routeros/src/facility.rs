//! Shape-aware access to one facility.

use crate::backend::Backend;
use crate::codec;
use crate::error::{Error, Result};
use crate::predicate::Predicate;
use crate::types::{Assignment, Assignments, FacilityPath, FacilityShape, ItemId, Record};

/// A facility bound to a backend.
///
/// Operations that make no sense for the facility's shape fail with
/// `UnsupportedOperation` before anything is sent. Every write is exactly
/// one backend call.
pub struct Facility<'b> {
    backend: &'b mut dyn Backend,
    path: FacilityPath,
    shape: FacilityShape,
}

impl<'b> Facility<'b> {
    /// Bind a path and shape to a backend.
    pub fn new(backend: &'b mut dyn Backend, path: FacilityPath, shape: FacilityShape) -> Self {
        Self { backend, path, shape }
    }

    /// The facility path.
    pub fn path(&self) -> &FacilityPath {
        &self.path
    }

    /// The facility shape.
    pub fn shape(&self) -> FacilityShape {
        self.shape
    }

    fn require_items(&self, operation: &str) -> Result<()> {
        if self.shape == FacilityShape::Singleton {
            return Err(Error::unsupported(
                format!("{operation} on {}", self.path),
                "singleton facilities only support get and set",
            ));
        }
        Ok(())
    }

    /// Read the singleton record.
    pub fn read_one(&mut self) -> Result<Record> {
        if self.shape != FacilityShape::Singleton {
            return Err(Error::unsupported(
                format!("get on {}", self.path),
                "facility has multiple records; use find",
            ));
        }
        self.backend.read_singleton(&self.path)
    }

    /// Read matching records in device order.
    pub fn read(&mut self, predicate: &Predicate) -> Result<Vec<Record>> {
        self.require_items("find")?;
        self.backend.read(&self.path, predicate)
    }

    /// Ids of matching records in device order.
    pub fn find_ids(&mut self, predicate: &Predicate) -> Result<Vec<ItemId>> {
        Ok(self.read(predicate)?.into_iter().filter_map(|r| r.id).collect())
    }

    /// Number of matching records.
    pub fn count(&mut self, predicate: &Predicate) -> Result<usize> {
        Ok(self.read(predicate)?.len())
    }

    /// Add a record, returning its id.
    pub fn add(&mut self, values: &Assignments, place_before: Option<&ItemId>) -> Result<ItemId> {
        self.require_items("add")?;
        if place_before.is_some() && self.shape != FacilityShape::Ordered {
            return Err(Error::unsupported(
                format!("add place-before on {}", self.path),
                "facility is not ordered",
            ));
        }
        check_values(values)?;
        log::debug!("{} add {} value(s)", self.path, values.len());
        self.backend.add(&self.path, values, place_before)
    }

    /// Remove a record.
    pub fn remove(&mut self, id: &ItemId) -> Result<()> {
        self.require_items("remove")?;
        self.backend.remove(&self.path, id)
    }

    /// Set values on a record (`Some(id)`) or on the singleton (`None`).
    pub fn set_values(&mut self, target: Option<&ItemId>, values: &Assignments) -> Result<()> {
        match (self.shape, target) {
            (FacilityShape::Singleton, Some(id)) => {
                return Err(Error::unsupported(
                    format!("set {id} on {}", self.path),
                    "singleton facilities have no item ids",
                ));
            }
            (FacilityShape::Unordered | FacilityShape::Ordered, None) => {
                return Err(Error::unsupported(
                    format!("set on {}", self.path),
                    "an item id is required for multi-record facilities",
                ));
            }
            _ => {}
        }
        check_values(values)?;
        self.backend.set(&self.path, target, values)
    }

    /// Move a record before another one, or to the end.
    pub fn move_item(&mut self, id: &ItemId, before: Option<&ItemId>) -> Result<()> {
        if self.shape != FacilityShape::Ordered {
            return Err(Error::unsupported(
                format!("move on {}", self.path),
                "facility is not ordered",
            ));
        }
        self.backend.move_item(&self.path, id, before)
    }

    /// Enable a record.
    pub fn enable(&mut self, id: &ItemId) -> Result<()> {
        self.require_items("enable")?;
        self.backend.set_disabled(&self.path, id, false)
    }

    /// Disable a record.
    pub fn disable(&mut self, id: &ItemId) -> Result<()> {
        self.require_items("disable")?;
        self.backend.set_disabled(&self.path, id, true)
    }

    /// Evaluate expressions against a record, or the singleton.
    pub fn evaluate(&mut self, id: Option<&ItemId>, exprs: &[(String, String)]) -> Result<Vec<(String, String)>> {
        if id.is_some() {
            self.require_items("evaluate")?;
        }
        self.backend.evaluate(&self.path, id, exprs)
    }
}

fn check_values(values: &Assignments) -> Result<()> {
    for assignment in values.values() {
        if let Assignment::Value(v) = assignment {
            codec::check_writable(v)?;
        }
    }
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::backend::memory::MemoryBackend;
    use crate::types::Value;

    fn path(p: &str) -> FacilityPath {
        FacilityPath::parse(p).unwrap()
    }

    #[test]
    fn test_singleton_rejects_item_operations() {
        let mut backend = MemoryBackend::new().with_singleton("/system clock", Record::new());
        let mut facility = Facility::new(&mut backend, path("/system clock"), FacilityShape::Singleton);

        let id = ItemId::new("*1");
        for err in [
            facility.add(&Assignments::new(), None).unwrap_err(),
            facility.remove(&id).unwrap_err(),
            facility.move_item(&id, None).unwrap_err(),
            facility.enable(&id).unwrap_err(),
            facility.read(&Predicate::all()).unwrap_err(),
            facility.set_values(Some(&id), &Assignments::new()).unwrap_err(),
        ] {
            assert_eq!(err.kind(), crate::ErrorKind::UnsupportedOperation);
        }
        assert!(facility.read_one().is_ok());
        assert!(facility.set_values(None, &Assignments::new()).is_ok());
        assert!(backend.journal().len() == 1);
    }

    #[test]
    fn test_unordered_rejects_moves() {
        let mut backend = MemoryBackend::new().with_items("/ip address", vec![Record::new()]);
        let mut facility = Facility::new(&mut backend, path("/ip address"), FacilityShape::Unordered);
        let err = facility.move_item(&ItemId::new("*1"), None).unwrap_err();
        assert_eq!(err.kind(), crate::ErrorKind::UnsupportedOperation);
        assert!(facility.set_values(None, &Assignments::new()).is_err());
    }

    #[test]
    fn test_sentinel_values_rejected_before_write() {
        let mut backend = MemoryBackend::new();
        let mut facility = Facility::new(&mut backend, path("/ip pool"), FacilityShape::Unordered);
        let mut values = Assignments::new();
        values.insert("name".to_string(), Assignment::Value(Value::str("~ pool")));
        let err = facility.add(&values, None).unwrap_err();
        assert_eq!(err.kind(), crate::ErrorKind::EncodingError);
        assert!(backend.journal().is_empty());
    }

    #[test]
    fn test_find_ids_and_count() {
        let mut backend = MemoryBackend::new().with_items(
            "/interface list",
            vec![
                Record::new().field("name", "all").field("builtin", true),
                Record::new().field("name", "WAN"),
            ],
        );
        let mut facility = Facility::new(&mut backend, path("/interface list"), FacilityShape::Unordered);
        assert_eq!(facility.count(&Predicate::all()).unwrap(), 2);
        assert_eq!(facility.count(&Predicate::all().excluding_builtin()).unwrap(), 1);
        assert_eq!(facility.find_ids(&Predicate::all()).unwrap().len(), 2);
    }
}
