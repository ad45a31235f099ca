//! Connection Registry
//!
//! Maps driver identities to their live connection handles; the single
//! source of truth for "is this driver reachable right now". Bindings live
//! in a DashMap keyed by driver id, so register/unregister calls for the
//! same driver serialize on its entry lock while distinct drivers never
//! contend.
//!
//! Each successful register/unregister also mirrors the online flag to the
//! durable [`DriverStore`]; a mirror failure is logged and the in-memory
//! binding stands (the registry is authoritative for availability, the store
//! is audit).

use std::sync::Arc;

use dashmap::mapref::entry::Entry;
use dashmap::DashMap;
use tracing::{debug, warn};

use crate::store::DriverStore;
use crate::types::{DriverId, StandId};

use super::channel::ConnectionHandle;

/// Registry of live driver connections
pub struct ConnectionRegistry {
    bindings: DashMap<DriverId, ConnectionHandle>,
    drivers: Arc<dyn DriverStore>,
}

impl ConnectionRegistry {
    pub fn new(drivers: Arc<dyn DriverStore>) -> Self {
        Self {
            bindings: DashMap::new(),
            drivers,
        }
    }

    /// Bind a driver to a connection handle and mark the driver online.
    ///
    /// A prior handle for the same driver is revoked before the new one is
    /// installed, so a send addressed to the stale handle can never succeed
    /// once the new registration is visible.
    pub fn register(&self, driver_id: &DriverId, handle: ConnectionHandle) {
        let connection = handle.id().to_string();

        match self.bindings.entry(driver_id.clone()) {
            Entry::Occupied(mut entry) => {
                let prev = entry.get();
                // Re-registering the same handle is idempotent; only a
                // different prior connection gets revoked.
                if prev.id() != handle.id() {
                    debug!(
                        "Driver {} re-registered: superseding connection {}",
                        driver_id,
                        prev.id()
                    );
                    prev.revoke();
                }
                entry.insert(handle);
            }
            Entry::Vacant(entry) => {
                entry.insert(handle);
            }
        }

        if let Err(e) = self.drivers.set_online(driver_id, true, Some(connection)) {
            warn!("Failed to mirror online flag for driver {}: {}", driver_id, e);
        }
    }

    /// Remove the binding held by this exact handle and mark the driver
    /// offline.
    ///
    /// A handle that was already superseded by a newer registration is a
    /// no-op: the newer binding's online status must survive a late
    /// disconnect of the old connection. Returns the unbound driver id when
    /// the binding was removed.
    pub fn unregister(&self, handle: &ConnectionHandle) -> Option<DriverId> {
        let driver_id = self
            .bindings
            .iter()
            .find(|entry| entry.value().id() == handle.id())
            .map(|entry| entry.key().clone())?;

        // Re-checked under the entry lock: only the exact binding is removed.
        let removed = self
            .bindings
            .remove_if(&driver_id, |_, bound| bound.id() == handle.id());

        if removed.is_none() {
            return None;
        }

        debug!("Driver {} unbound from connection {}", driver_id, handle.id());
        if let Err(e) = self.drivers.set_online(&driver_id, false, None) {
            warn!(
                "Failed to mirror offline flag for driver {}: {}",
                driver_id, e
            );
        }
        Some(driver_id)
    }

    /// Snapshot of driver ids currently online at a stand.
    ///
    /// Resolved fresh from the live bindings and each driver's stand
    /// affiliation; never cached.
    pub fn connected_drivers(&self, stand_id: &StandId) -> Vec<DriverId> {
        self.bindings
            .iter()
            .filter_map(|entry| {
                let driver_id = entry.key();
                match self.drivers.get(driver_id) {
                    Ok(Some(record)) if record.stand_id == *stand_id => Some(driver_id.clone()),
                    Ok(_) => None,
                    Err(e) => {
                        warn!("Failed to resolve driver {}: {}", driver_id, e);
                        None
                    }
                }
            })
            .collect()
    }

    /// Current live handle for a driver, if any
    pub fn handle_for(&self, driver_id: &DriverId) -> Option<ConnectionHandle> {
        self.bindings.get(driver_id).map(|entry| entry.value().clone())
    }

    /// Number of drivers currently bound to a connection
    pub fn online_count(&self) -> usize {
        self.bindings.len()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::store::{MemoryDriverStore, StoreResult};
    use crate::types::DriverRecord;
    use tokio::sync::mpsc;

    fn seeded_store() -> Arc<MemoryDriverStore> {
        let store = Arc::new(MemoryDriverStore::new());
        store
            .put_driver(DriverRecord::new("d1", "Ayşe", "34 ABC 123", "s1", "Taksim"))
            .unwrap();
        store
            .put_driver(DriverRecord::new("d2", "Mehmet", "34 XY 001", "s1", "Taksim"))
            .unwrap();
        store
            .put_driver(DriverRecord::new("d3", "Kemal", "06 KL 042", "s2", "Kızılay"))
            .unwrap();
        store
    }

    fn test_handle() -> ConnectionHandle {
        let (tx, _rx) = mpsc::channel(4);
        ConnectionHandle::new(tx)
    }

    #[test]
    fn test_register_marks_online() {
        let store = seeded_store();
        let registry = ConnectionRegistry::new(store.clone());

        registry.register(&"d1".to_string(), test_handle());

        assert_eq!(registry.online_count(), 1);
        let record = store.get(&"d1".to_string())
            .unwrap()
            .unwrap();
        assert!(record.is_online);
        assert!(record.connection.is_some());
    }

    #[test]
    fn test_register_then_unregister_leaves_offline() {
        let store = seeded_store();
        let registry = ConnectionRegistry::new(store.clone());
        let handle = test_handle();

        registry.register(&"d1".to_string(), handle.clone());
        let unbound = registry.unregister(&handle);

        assert_eq!(unbound, Some("d1".to_string()));
        assert_eq!(registry.online_count(), 0);
        let record = store.get(&"d1".to_string())
            .unwrap()
            .unwrap();
        assert!(!record.is_online);
        assert!(record.connection.is_none());
    }

    #[test]
    fn test_late_disconnect_of_superseded_handle_is_noop() {
        let store = seeded_store();
        let registry = ConnectionRegistry::new(store.clone());
        let h1 = test_handle();
        let h2 = test_handle();

        registry.register(&"d1".to_string(), h1.clone());
        registry.register(&"d1".to_string(), h2.clone());

        // h1 was superseded; its late disconnect must not clobber h2.
        assert_eq!(registry.unregister(&h1), None);
        assert_eq!(registry.online_count(), 1);
        assert_eq!(
            registry.handle_for(&"d1".to_string()).map(|h| h.id()),
            Some(h2.id())
        );
        let record = store.get(&"d1".to_string())
            .unwrap()
            .unwrap();
        assert!(record.is_online);
    }

    #[test]
    fn test_superseded_handle_is_revoked() {
        let store = seeded_store();
        let registry = ConnectionRegistry::new(store);
        let h1 = test_handle();

        registry.register(&"d1".to_string(), h1.clone());
        assert!(!h1.is_revoked());

        registry.register(&"d1".to_string(), test_handle());
        assert!(h1.is_revoked());
    }

    #[test]
    fn test_reregistering_same_handle_is_idempotent() {
        let store = seeded_store();
        let registry = ConnectionRegistry::new(store);
        let h1 = test_handle();

        registry.register(&"d1".to_string(), h1.clone());
        registry.register(&"d1".to_string(), h1.clone());

        assert!(!h1.is_revoked());
        assert_eq!(registry.online_count(), 1);
    }

    #[test]
    fn test_connected_drivers_scoped_to_stand() {
        let store = seeded_store();
        let registry = ConnectionRegistry::new(store);

        registry.register(&"d1".to_string(), test_handle());
        registry.register(&"d2".to_string(), test_handle());
        registry.register(&"d3".to_string(), test_handle());

        let mut at_s1 = registry.connected_drivers(&"s1".to_string());
        at_s1.sort();
        assert_eq!(at_s1, vec!["d1".to_string(), "d2".to_string()]);

        let at_s2 = registry.connected_drivers(&"s2".to_string());
        assert_eq!(at_s2, vec!["d3".to_string()]);
    }

    #[test]
    fn test_store_failure_does_not_roll_back_binding() {
        struct FailingStore;

        impl DriverStore for FailingStore {
            fn get(&self, _id: &DriverId) -> StoreResult<Option<DriverRecord>> {
                Err(crate::store::StoreError::Backend("down".to_string()))
            }
            fn set_online(
                &self,
                _id: &DriverId,
                _online: bool,
                _connection: Option<String>,
            ) -> StoreResult<()> {
                Err(crate::store::StoreError::Backend("down".to_string()))
            }
            fn list_online_by_stand(&self, _stand_id: &StandId) -> StoreResult<Vec<DriverRecord>> {
                Err(crate::store::StoreError::Backend("down".to_string()))
            }
            fn put_driver(&self, _driver: DriverRecord) -> StoreResult<()> {
                Err(crate::store::StoreError::Backend("down".to_string()))
            }
        }

        let registry = ConnectionRegistry::new(Arc::new(FailingStore));
        registry.register(&"d1".to_string(), test_handle());

        // The registry, not the store, is the availability source of truth.
        assert_eq!(registry.online_count(), 1);
        assert!(registry.handle_for(&"d1".to_string()).is_some());
    }
}
