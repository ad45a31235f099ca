//! In-memory store implementations
//!
//! DashMap-backed stores used by the daemon and the test suite. Per-record
//! atomicity comes from the map's entry locks: `update_status` holds the
//! request's entry for the whole read-compare-write, so two racing accepts
//! serialize and exactly one observes `Pending`.

use dashmap::DashMap;

use crate::types::{
    DriverAssignment, DriverId, DriverRecord, RequestId, RequestStatus, RideRequest, StandId,
};

use super::{DriverStore, RequestStore, StoreError, StoreResult};

/// In-memory ride request store
#[derive(Default)]
pub struct MemoryRequestStore {
    requests: DashMap<RequestId, RideRequest>,
}

impl MemoryRequestStore {
    pub fn new() -> Self {
        Self::default()
    }

    /// Number of stored requests
    pub fn len(&self) -> usize {
        self.requests.len()
    }

    pub fn is_empty(&self) -> bool {
        self.requests.is_empty()
    }
}

impl RequestStore for MemoryRequestStore {
    fn create(&self, request: &RideRequest) -> StoreResult<()> {
        use dashmap::mapref::entry::Entry;

        match self.requests.entry(request.request_id.clone()) {
            Entry::Occupied(_) => Err(StoreError::AlreadyExists(request.request_id.clone())),
            Entry::Vacant(entry) => {
                entry.insert(request.clone());
                Ok(())
            }
        }
    }

    fn get(&self, id: &RequestId) -> StoreResult<Option<RideRequest>> {
        Ok(self.requests.get(id).map(|r| r.clone()))
    }

    fn update_status(
        &self,
        id: &RequestId,
        expected: RequestStatus,
        new: RequestStatus,
        assignment: Option<DriverAssignment>,
    ) -> StoreResult<bool> {
        let mut request = match self.requests.get_mut(id) {
            Some(r) => r,
            None => return Ok(false),
        };

        if request.status != expected {
            return Ok(false);
        }

        request.status = new;
        if let Some(assignment) = assignment {
            request.driver_id = Some(assignment.driver_id);
            request.driver_name = Some(assignment.driver_name);
            request.driver_plate = Some(assignment.driver_plate);
        }
        Ok(true)
    }
}

/// In-memory driver record store
#[derive(Default)]
pub struct MemoryDriverStore {
    drivers: DashMap<DriverId, DriverRecord>,
}

impl MemoryDriverStore {
    pub fn new() -> Self {
        Self::default()
    }
}

impl DriverStore for MemoryDriverStore {
    fn get(&self, id: &DriverId) -> StoreResult<Option<DriverRecord>> {
        Ok(self.drivers.get(id).map(|d| d.clone()))
    }

    fn set_online(
        &self,
        id: &DriverId,
        online: bool,
        connection: Option<String>,
    ) -> StoreResult<()> {
        let mut driver = self
            .drivers
            .get_mut(id)
            .ok_or_else(|| StoreError::NotFound(id.clone()))?;

        driver.is_online = online;
        driver.connection = connection;
        Ok(())
    }

    fn list_online_by_stand(&self, stand_id: &StandId) -> StoreResult<Vec<DriverRecord>> {
        Ok(self
            .drivers
            .iter()
            .filter(|d| d.stand_id == *stand_id && d.is_online)
            .map(|d| d.clone())
            .collect())
    }

    fn put_driver(&self, driver: DriverRecord) -> StoreResult<()> {
        self.drivers.insert(driver.driver_id.clone(), driver);
        Ok(())
    }
}
