//! Store Adapters
//!
//! Interfaces to the durable persistence layer for ride requests and driver
//! records. The dispatch core treats these as external collaborators: each
//! record is strongly consistent on its own, and no operation spans records.
//! The compare-and-set in [`RequestStore::update_status`] is the primitive
//! the dispatch engine builds its race resolution on.

pub mod memory;

pub use memory::{MemoryDriverStore, MemoryRequestStore};

use crate::types::{
    DriverAssignment, DriverId, DriverRecord, RequestId, RequestStatus, RideRequest, StandId,
};

/// Errors that can occur in the persistence layer
#[derive(Debug, thiserror::Error)]
pub enum StoreError {
    /// Referenced record does not exist
    #[error("Record not found: {0}")]
    NotFound(String),

    /// A record with this id already exists
    #[error("Record already exists: {0}")]
    AlreadyExists(String),

    /// Backend failure (I/O, connection, ...)
    #[error("Storage backend error: {0}")]
    Backend(String),
}

/// Result type for store operations
pub type StoreResult<T> = Result<T, StoreError>;

/// Durable access to ride request records.
///
/// Object-safe so the engine can hold a `dyn RequestStore` backed by any
/// persistence implementation.
pub trait RequestStore: Send + Sync {
    /// Persist a new request record
    fn create(&self, request: &RideRequest) -> StoreResult<()>;

    /// Fetch a request by id
    fn get(&self, id: &RequestId) -> StoreResult<Option<RideRequest>>;

    /// Atomically transition a request's status.
    ///
    /// The transition applies only if the record exists and its current
    /// status equals `expected`; `assignment` (when given) is attached in the
    /// same atomic step. Returns whether the transition applied. The returned
    /// bool is the authoritative signal: callers must not emit
    /// success-implying notifications when it is false.
    fn update_status(
        &self,
        id: &RequestId,
        expected: RequestStatus,
        new: RequestStatus,
        assignment: Option<DriverAssignment>,
    ) -> StoreResult<bool>;
}

/// Durable access to driver records
pub trait DriverStore: Send + Sync {
    /// Fetch a driver by id
    fn get(&self, id: &DriverId) -> StoreResult<Option<DriverRecord>>;

    /// Mirror a driver's availability. `connection` is the opaque token of
    /// the live connection when going online, `None` when going offline.
    fn set_online(
        &self,
        id: &DriverId,
        online: bool,
        connection: Option<String>,
    ) -> StoreResult<()>;

    /// List drivers whose durable record says online at the given stand
    fn list_online_by_stand(&self, stand_id: &StandId) -> StoreResult<Vec<DriverRecord>>;

    /// Create or replace a driver record. This is the account layer's
    /// doorway; the dispatch core never invents drivers itself.
    fn put_driver(&self, driver: DriverRecord) -> StoreResult<()>;
}
