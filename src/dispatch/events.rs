//! Dispatch Event Types
//!
//! Defines the real-time events pushed to connected parties during dispatch.
//! One variant per notification, so every payload shape is statically known
//! at its emit site.

use serde::{Deserialize, Serialize};

use crate::types::{RequestId, RideRequest};

/// Events pushed from the daemon to connected parties.
///
/// Carried inside [`Frame::Event`](super::protocol::Frame) on the client
/// stream; `event_name` is the stable protocol name of each variant.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub enum DispatchEvent {
    /// Confirmation to the calling driver that registration succeeded.
    DriverRegistered {
        driver_name: String,
        stand_name: String,
        message: String,
    },

    /// A new ride request at the driver's stand. Sent to each eligible
    /// online driver; carries the full request record.
    NewTaxiRequest { request: RideRequest },

    /// A driver's accept won the request. Broadcast to all connected
    /// parties.
    TaxiAccepted {
        request_id: RequestId,
        driver_name: String,
        plate: String,
        message: String,
    },

    /// The request is no longer on offer. Sent to the other online drivers
    /// at the stand so they retract their local view of it.
    RequestClosed { request_id: RequestId },

    /// A driver declined the request. Broadcast to all connected parties.
    TaxiRejected { request_id: RequestId },
}

impl DispatchEvent {
    /// Returns the protocol name of this event.
    pub fn event_name(&self) -> &'static str {
        match self {
            DispatchEvent::DriverRegistered { .. } => "DriverRegistered",
            DispatchEvent::NewTaxiRequest { .. } => "NewTaxiRequest",
            DispatchEvent::TaxiAccepted { .. } => "TaxiAccepted",
            DispatchEvent::RequestClosed { .. } => "RequestClosed",
            DispatchEvent::TaxiRejected { .. } => "TaxiRejected",
        }
    }
}
