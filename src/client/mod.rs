//! Client Module
//!
//! Provides client-side IPC communication with the daemon. CLI commands use
//! this module to send requests, receive responses, and follow pushed
//! dispatch events.

pub mod connection;

pub use connection::DaemonClient;

use std::path::PathBuf;

use thiserror::Error;

use crate::dispatch::protocol::{DaemonStatus, ErrorCode, Request, Response};
use crate::types::{Coordinates, DriverRecord, RideRequest};

/// Errors that can occur when communicating with the daemon
#[derive(Debug, Error)]
pub enum ClientError {
    #[error("Daemon is not running. Start it with: taxihub daemon start")]
    DaemonNotRunning,

    #[error("Connection failed: {0}")]
    ConnectionFailed(String),

    #[error("Request failed: {0}")]
    RequestFailed(String),

    #[error("Unexpected response from daemon")]
    UnexpectedResponse,

    #[error("Driver not found: {0}")]
    DriverNotFound(String),

    #[error("Daemon error: {0}")]
    DaemonError(String),
}

/// Send a request to the daemon and extract the response
async fn send_request<T>(
    socket_path: PathBuf,
    request: Request,
    extract: impl FnOnce(Response) -> Result<T, ClientError>,
) -> Result<T, ClientError> {
    let mut client = DaemonClient::connect_to(socket_path).await?;
    let response = client.send(request).await?;
    extract(response)
}

/// Ping the daemon to check if it's running
pub async fn ping(socket_path: PathBuf) -> Result<bool, ClientError> {
    send_request(socket_path, Request::Ping, |response| {
        Ok(matches!(response, Response::Pong))
    })
    .await
}

/// Get daemon status
pub async fn status(socket_path: PathBuf) -> Result<DaemonStatus, ClientError> {
    send_request(socket_path, Request::Status, |response| match response {
        Response::Status(status) => Ok(status),
        Response::Error { message, .. } => Err(ClientError::DaemonError(message)),
        _ => Err(ClientError::UnexpectedResponse),
    })
    .await
}

/// Request daemon shutdown
pub async fn shutdown(socket_path: PathBuf) -> Result<(), ClientError> {
    send_request(socket_path, Request::Shutdown, |response| match response {
        Response::Ok => Ok(()),
        Response::Error { message, .. } => Err(ClientError::DaemonError(message)),
        _ => Err(ClientError::UnexpectedResponse),
    })
    .await
}

/// Provision a driver record on behalf of the account layer
pub async fn provision_driver(
    socket_path: PathBuf,
    driver: DriverRecord,
) -> Result<(), ClientError> {
    send_request(
        socket_path,
        Request::ProvisionDriver { driver },
        |response| match response {
            Response::Ok => Ok(()),
            Response::Error { message, .. } => Err(ClientError::DaemonError(message)),
            _ => Err(ClientError::UnexpectedResponse),
        },
    )
    .await
}

/// Submit a ride request. Returns the persisted request record and the
/// number of drivers the offer reached.
pub async fn submit_request(
    socket_path: PathBuf,
    user_id: String,
    stand_id: String,
    origin: Coordinates,
    destination: Coordinates,
    estimated_fare: f64,
) -> Result<(RideRequest, usize), ClientError> {
    send_request(
        socket_path,
        Request::SubmitRequest {
            user_id,
            stand_id,
            origin,
            destination,
            estimated_fare,
        },
        |response| match response {
            Response::RequestSubmitted {
                request,
                notified_drivers,
            } => Ok((request, notified_drivers)),
            Response::Error { message, .. } => Err(ClientError::DaemonError(message)),
            _ => Err(ClientError::UnexpectedResponse),
        },
    )
    .await
}

/// Register a driver on an already-open client connection.
///
/// The connection stays bound to the driver, so the caller keeps the client
/// alive and follows offers via [`DaemonClient::next_event`].
pub async fn register_driver(
    client: &mut DaemonClient,
    driver_id: String,
) -> Result<String, ClientError> {
    let response = client
        .send(Request::RegisterDriver {
            driver_id: driver_id.clone(),
        })
        .await?;

    match response {
        Response::Registered { driver_name, .. } => Ok(driver_name),
        Response::Error {
            code: ErrorCode::DriverNotFound,
            ..
        } => Err(ClientError::DriverNotFound(driver_id)),
        Response::Error { message, .. } => Err(ClientError::DaemonError(message)),
        _ => Err(ClientError::UnexpectedResponse),
    }
}

/// Claim a pending request on an open connection
pub async fn accept(
    client: &mut DaemonClient,
    request_id: String,
    driver_id: String,
) -> Result<(), ClientError> {
    match client
        .send(Request::Accept {
            request_id,
            driver_id,
        })
        .await?
    {
        Response::Ok => Ok(()),
        Response::Error { message, .. } => Err(ClientError::DaemonError(message)),
        _ => Err(ClientError::UnexpectedResponse),
    }
}

/// Decline a pending request on an open connection
pub async fn reject(
    client: &mut DaemonClient,
    request_id: String,
    driver_id: String,
) -> Result<(), ClientError> {
    match client
        .send(Request::Reject {
            request_id,
            driver_id,
        })
        .await?
    {
        Response::Ok => Ok(()),
        Response::Error { message, .. } => Err(ClientError::DaemonError(message)),
        _ => Err(ClientError::UnexpectedResponse),
    }
}
