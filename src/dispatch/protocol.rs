//! IPC Protocol Types
//!
//! Defines the request/response types for daemon-client communication.
//! Uses a length-prefixed binary protocol with bincode serialization. Unlike
//! a plain RPC socket, the daemon stream is bidirectional: every outbound
//! message is a [`Frame`], either the reply to a request or a pushed
//! [`DispatchEvent`].

use serde::{Deserialize, Serialize};

use crate::types::{Coordinates, DriverId, DriverRecord, RequestId, RideRequest, StandId, UserId};

use super::events::DispatchEvent;

/// Request types sent from client to daemon
#[derive(Debug, Clone, Serialize, Deserialize)]
pub enum Request {
    // ============ Dispatch Operations ============
    /// Bind this connection to a driver and mark the driver online
    RegisterDriver { driver_id: DriverId },

    /// Submit a ride request and fan it out to eligible drivers
    SubmitRequest {
        user_id: UserId,
        stand_id: StandId,
        origin: Coordinates,
        destination: Coordinates,
        estimated_fare: f64,
    },

    /// Claim a pending request (first writer wins)
    Accept {
        request_id: RequestId,
        driver_id: DriverId,
    },

    /// Decline a pending request
    Reject {
        request_id: RequestId,
        driver_id: DriverId,
    },

    // ============ Provisioning ============
    /// Create or replace a driver record. Stands in for the account layer,
    /// which owns driver provisioning in the full system.
    ProvisionDriver { driver: DriverRecord },

    // ============ Management Operations ============
    /// Check if daemon is running (ping)
    Ping,

    /// Get daemon status
    Status,

    /// Graceful shutdown
    Shutdown,
}

/// Current daemon status
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct DaemonStatus {
    pub running: bool,
    pub uptime_seconds: u64,
    pub connected_peers: usize,
    pub online_drivers: usize,
}

/// Error codes for response errors
#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq)]
pub enum ErrorCode {
    InternalError,
    DriverNotFound,
    InvalidRequest,
}

/// Response types sent from daemon to client
#[derive(Debug, Clone, Serialize, Deserialize)]
pub enum Response {
    /// Driver registration succeeded
    Registered {
        driver_id: DriverId,
        driver_name: String,
    },

    /// Request persisted and offered to `notified_drivers` drivers
    RequestSubmitted {
        request: RideRequest,
        notified_drivers: usize,
    },

    /// Ping response
    Pong,

    /// Daemon status
    Status(DaemonStatus),

    /// Operation succeeded
    Ok,

    /// Operation failed with error
    Error { code: ErrorCode, message: String },
}

impl Response {
    /// Create an error response
    pub fn error(code: ErrorCode, message: impl Into<String>) -> Self {
        Self::Error {
            code,
            message: message.into(),
        }
    }
}

/// A single daemon-to-client message: either the reply to a request or a
/// pushed dispatch event.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub enum Frame {
    Response(Response),
    Event(DispatchEvent),
}

/// Wire format for messages (length-prefixed)
pub const MAX_MESSAGE_SIZE: usize = 1024 * 1024; // 1MB max message

/// Encode a message to bytes with length prefix
pub fn encode_message<T: Serialize>(msg: &T) -> anyhow::Result<Vec<u8>> {
    let payload = bincode::serialize(msg)?;
    if payload.len() > MAX_MESSAGE_SIZE {
        anyhow::bail!("Message too large: {} bytes", payload.len());
    }
    let len = (payload.len() as u32).to_le_bytes();
    let mut buf = Vec::with_capacity(4 + payload.len());
    buf.extend_from_slice(&len);
    buf.extend_from_slice(&payload);
    Ok(buf)
}

/// Decode a message from bytes (after length prefix is read)
pub fn decode_message<T: for<'de> Deserialize<'de>>(data: &[u8]) -> anyhow::Result<T> {
    Ok(bincode::deserialize(data)?)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_request_serialization() {
        let req = Request::Accept {
            request_id: "r1".to_string(),
            driver_id: "d1".to_string(),
        };

        let encoded = encode_message(&req).unwrap();
        assert!(encoded.len() > 4); // At least length prefix

        // Skip length prefix and decode
        let decoded: Request = decode_message(&encoded[4..]).unwrap();
        match decoded {
            Request::Accept {
                request_id,
                driver_id,
            } => {
                assert_eq!(request_id, "r1");
                assert_eq!(driver_id, "d1");
            }
            _ => panic!("Wrong request type"),
        }
    }

    #[test]
    fn test_event_frame_serialization() {
        let frame = Frame::Event(DispatchEvent::RequestClosed {
            request_id: "r1".to_string(),
        });

        let encoded = encode_message(&frame).unwrap();
        let decoded: Frame = decode_message(&encoded[4..]).unwrap();
        match decoded {
            Frame::Event(DispatchEvent::RequestClosed { request_id }) => {
                assert_eq!(request_id, "r1");
            }
            _ => panic!("Wrong frame type"),
        }
    }

    #[test]
    fn test_response_frame_serialization() {
        let frame = Frame::Response(Response::Pong);
        let encoded = encode_message(&frame).unwrap();
        let decoded: Frame = decode_message(&encoded[4..]).unwrap();
        assert!(matches!(decoded, Frame::Response(Response::Pong)));
    }
}
