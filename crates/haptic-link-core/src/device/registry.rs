//! Ordered registry of the devices known to a session.

use std::sync::Arc;

use super::record::{DeviceId, DeviceRecord};

/// Devices keyed by id, enumerated in insertion order.
///
/// Mutated only from the session's event-processing path; callers receive
/// shared snapshots of the records.
#[derive(Debug, Default)]
pub struct DeviceRegistry {
    devices: Vec<Arc<DeviceRecord>>,
}

impl DeviceRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    /// Insert a record at the end of the enumeration order.
    ///
    /// An existing record with the same id is removed first and returned, so a
    /// record is never changed in place.
    pub fn upsert(&mut self, record: DeviceRecord) -> (Arc<DeviceRecord>, Option<Arc<DeviceRecord>>) {
        let replaced = self.remove(record.id);
        let record = Arc::new(record);
        self.devices.push(Arc::clone(&record));
        (record, replaced)
    }

    pub fn remove(&mut self, id: DeviceId) -> Option<Arc<DeviceRecord>> {
        let pos = self.devices.iter().position(|d| d.id == id)?;
        Some(self.devices.remove(pos))
    }

    pub fn get(&self, id: DeviceId) -> Option<Arc<DeviceRecord>> {
        self.devices.iter().find(|d| d.id == id).cloned()
    }

    pub fn contains(&self, id: DeviceId) -> bool {
        self.devices.iter().any(|d| d.id == id)
    }

    pub fn list(&self) -> Vec<Arc<DeviceRecord>> {
        self.devices.clone()
    }

    pub fn len(&self) -> usize {
        self.devices.len()
    }

    pub fn is_empty(&self) -> bool {
        self.devices.is_empty()
    }

    /// Drop every record, returning how many were held.
    pub fn clear(&mut self) -> usize {
        let count = self.devices.len();
        self.devices.clear();
        count
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn record(id: u32, name: &str) -> DeviceRecord {
        DeviceRecord::new(DeviceId(id), name)
    }

    #[test]
    fn test_insertion_order() {
        let mut registry = DeviceRegistry::new();
        registry.upsert(record(7, "b"));
        registry.upsert(record(2, "a"));
        registry.upsert(record(5, "c"));

        let ids: Vec<u32> = registry.list().iter().map(|d| d.id.0).collect();
        assert_eq!(ids, vec![7, 2, 5]);
    }

    #[test]
    fn test_remove_then_get() {
        let mut registry = DeviceRegistry::new();
        registry.upsert(record(1, "one"));
        registry.upsert(record(2, "two"));

        let removed = registry.remove(DeviceId(1)).unwrap();
        assert_eq!(removed.name, "one");
        assert!(registry.get(DeviceId(1)).is_none());
        assert!(registry.remove(DeviceId(1)).is_none());
        assert_eq!(registry.len(), 1);
    }

    #[test]
    fn test_upsert_replaces_and_moves_to_end() {
        let mut registry = DeviceRegistry::new();
        registry.upsert(record(1, "old"));
        registry.upsert(record(2, "other"));

        let (inserted, replaced) = registry.upsert(record(1, "new"));
        assert_eq!(replaced.unwrap().name, "old");
        assert_eq!(inserted.name, "new");

        let names: Vec<String> = registry.list().iter().map(|d| d.name.clone()).collect();
        assert_eq!(names, vec!["other", "new"]);
    }

    #[test]
    fn test_clear() {
        let mut registry = DeviceRegistry::new();
        registry.upsert(record(1, "one"));
        registry.upsert(record(2, "two"));

        assert_eq!(registry.clear(), 2);
        assert!(registry.is_empty());
        assert!(!registry.contains(DeviceId(2)));
    }
}
