//! Core types for the TaxiHub system

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::fmt;
use uuid::Uuid;

/// Unique identifier for a driver
pub type DriverId = String;

/// Unique identifier for a passenger account
pub type UserId = String;

/// Unique identifier for a taxi stand
pub type StandId = String;

/// Unique identifier for a ride request
pub type RequestId = String;

/// A WGS84 point, used for request origin and destination
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct Coordinates {
    pub lat: f64,
    pub lng: f64,
}

impl Coordinates {
    pub fn new(lat: f64, lng: f64) -> Self {
        Self { lat, lng }
    }
}

impl fmt::Display for Coordinates {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "({:.5}, {:.5})", self.lat, self.lng)
    }
}

/// Lifecycle state of a ride request.
///
/// `Pending` is the only non-terminal state: once a request is accepted or
/// rejected it never transitions again.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum RequestStatus {
    Pending,
    Accepted,
    Rejected,
}

impl RequestStatus {
    /// Whether this status permits no further transitions
    pub fn is_terminal(&self) -> bool {
        !matches!(self, Self::Pending)
    }

    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Pending => "pending",
            Self::Accepted => "accepted",
            Self::Rejected => "rejected",
        }
    }
}

impl fmt::Display for RequestStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// A passenger's ride request, scoped to a single taxi stand.
///
/// The driver fields are empty while the request is `Pending` and are filled
/// in atomically when a driver's accept wins; they are denormalized copies of
/// the winning driver's record so notification payloads need no extra lookup.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct RideRequest {
    pub request_id: RequestId,
    pub user_id: UserId,
    pub stand_id: StandId,
    pub origin: Coordinates,
    pub destination: Coordinates,
    pub estimated_fare: f64,
    pub requested_at: DateTime<Utc>,
    pub status: RequestStatus,
    pub driver_id: Option<DriverId>,
    pub driver_name: Option<String>,
    pub driver_plate: Option<String>,
}

impl RideRequest {
    /// Create a new pending request with a fresh id and timestamp
    pub fn new(
        user_id: impl Into<UserId>,
        stand_id: impl Into<StandId>,
        origin: Coordinates,
        destination: Coordinates,
        estimated_fare: f64,
    ) -> Self {
        Self {
            request_id: Uuid::new_v4().to_string(),
            user_id: user_id.into(),
            stand_id: stand_id.into(),
            origin,
            destination,
            estimated_fare,
            requested_at: Utc::now(),
            status: RequestStatus::Pending,
            driver_id: None,
            driver_name: None,
            driver_plate: None,
        }
    }

    /// Override the generated request id
    pub fn with_id(mut self, id: impl Into<RequestId>) -> Self {
        self.request_id = id.into();
        self
    }
}

/// The winning driver's identity and display fields, attached to a request
/// when its `Pending -> Accepted` transition applies
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct DriverAssignment {
    pub driver_id: DriverId,
    pub driver_name: String,
    pub driver_plate: String,
}

impl DriverAssignment {
    pub fn from_record(record: &DriverRecord) -> Self {
        Self {
            driver_id: record.driver_id.clone(),
            driver_name: record.driver_name.clone(),
            driver_plate: record.vehicle_plate.clone(),
        }
    }
}

/// Durable record of a provisioned driver.
///
/// Created by the account layer (outside this crate's scope); the dispatch
/// core only reads the display fields and flips the availability fields. The
/// `connection` token mirrors the in-memory registry binding for audit; the
/// registry, not this record, is the source of truth for reachability.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct DriverRecord {
    pub driver_id: DriverId,
    pub driver_name: String,
    pub vehicle_plate: String,
    pub stand_id: StandId,
    pub stand_name: String,
    #[serde(default)]
    pub is_online: bool,
    #[serde(default)]
    pub connection: Option<String>,
}

impl DriverRecord {
    pub fn new(
        driver_id: impl Into<DriverId>,
        driver_name: impl Into<String>,
        vehicle_plate: impl Into<String>,
        stand_id: impl Into<StandId>,
        stand_name: impl Into<String>,
    ) -> Self {
        Self {
            driver_id: driver_id.into(),
            driver_name: driver_name.into(),
            vehicle_plate: vehicle_plate.into(),
            stand_id: stand_id.into(),
            stand_name: stand_name.into(),
            is_online: false,
            connection: None,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_new_request_is_pending() {
        let request = RideRequest::new(
            "user-1",
            "stand-1",
            Coordinates::new(41.0082, 28.9784),
            Coordinates::new(41.0422, 29.0083),
            180.0,
        );

        assert_eq!(request.status, RequestStatus::Pending);
        assert!(request.driver_id.is_none());
        assert!(!request.request_id.is_empty());
    }

    #[test]
    fn test_status_terminality() {
        assert!(!RequestStatus::Pending.is_terminal());
        assert!(RequestStatus::Accepted.is_terminal());
        assert!(RequestStatus::Rejected.is_terminal());
    }

    #[test]
    fn test_assignment_from_record() {
        let record = DriverRecord::new("d1", "Ayşe", "34 ABC 123", "stand-1", "Kadıköy İskele");
        let assignment = DriverAssignment::from_record(&record);
        assert_eq!(assignment.driver_id, "d1");
        assert_eq!(assignment.driver_plate, "34 ABC 123");
    }
}
