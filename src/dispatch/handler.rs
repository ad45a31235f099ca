//! Request Handler
//!
//! Maps incoming protocol requests onto the dispatch engine and returns
//! responses. Stale accept/reject transitions deliberately answer `Ok`: for
//! a racing caller, losing is an expected outcome, and the authoritative
//! story arrives as a pushed event.

use std::sync::Arc;
use std::time::Instant;

use tokio::sync::broadcast;
use tracing::{debug, error, info};

use crate::types::RideRequest;

use super::channel::{ConnectionHandle, PeerChannel};
use super::engine::DispatchEngine;
use super::protocol::{DaemonStatus, ErrorCode, Request, Response};

/// Request handler that processes incoming IPC requests
pub struct RequestHandler {
    engine: Arc<DispatchEngine>,
    channel: Arc<PeerChannel>,
    start_time: Instant,
    shutdown_tx: broadcast::Sender<()>,
}

impl RequestHandler {
    pub fn new(
        engine: Arc<DispatchEngine>,
        channel: Arc<PeerChannel>,
        shutdown_tx: broadcast::Sender<()>,
    ) -> Self {
        Self {
            engine,
            channel,
            start_time: Instant::now(),
            shutdown_tx,
        }
    }

    /// Handle an incoming request from `conn` and return the response
    pub async fn handle(&self, request: Request, conn: &ConnectionHandle) -> Response {
        debug!("Handling request: {:?}", std::mem::discriminant(&request));

        match request {
            Request::RegisterDriver { driver_id } => self.handle_register(driver_id, conn),
            Request::SubmitRequest {
                user_id,
                stand_id,
                origin,
                destination,
                estimated_fare,
            } => self.handle_submit(RideRequest::new(
                user_id,
                stand_id,
                origin,
                destination,
                estimated_fare,
            )),
            Request::Accept {
                request_id,
                driver_id,
            } => match self.engine.accept(&request_id, &driver_id) {
                Ok(_) => Response::Ok,
                Err(e) => {
                    error!("Accept of {} failed: {}", request_id, e);
                    Response::error(ErrorCode::InternalError, e.to_string())
                }
            },
            Request::Reject {
                request_id,
                driver_id,
            } => match self.engine.reject(&request_id, &driver_id) {
                Ok(_) => Response::Ok,
                Err(e) => {
                    error!("Reject of {} failed: {}", request_id, e);
                    Response::error(ErrorCode::InternalError, e.to_string())
                }
            },
            Request::ProvisionDriver { driver } => {
                match self.engine.provision_driver(driver) {
                    Ok(()) => Response::Ok,
                    Err(e) => Response::error(ErrorCode::InternalError, e.to_string()),
                }
            }
            Request::Ping => Response::Pong,
            Request::Status => self.handle_status(),
            Request::Shutdown => self.handle_shutdown(),
        }
    }

    fn handle_register(&self, driver_id: String, conn: &ConnectionHandle) -> Response {
        match self.engine.register_driver(&driver_id, conn.clone()) {
            Ok(Some(record)) => Response::Registered {
                driver_id,
                driver_name: record.driver_name,
            },
            Ok(None) => Response::error(
                ErrorCode::DriverNotFound,
                format!("Driver {} is not provisioned", driver_id),
            ),
            Err(e) => {
                error!("Register of {} failed: {}", driver_id, e);
                Response::error(ErrorCode::InternalError, e.to_string())
            }
        }
    }

    fn handle_submit(&self, request: RideRequest) -> Response {
        match self.engine.submit(request.clone()) {
            Ok(notified_drivers) => Response::RequestSubmitted {
                request,
                notified_drivers,
            },
            Err(e) => {
                error!("Submit of {} failed: {}", request.request_id, e);
                Response::error(ErrorCode::InternalError, e.to_string())
            }
        }
    }

    fn handle_status(&self) -> Response {
        Response::Status(DaemonStatus {
            running: true,
            uptime_seconds: self.start_time.elapsed().as_secs(),
            connected_peers: self.channel.connected(),
            online_drivers: self.engine.online_drivers(),
        })
    }

    fn handle_shutdown(&self) -> Response {
        info!("Shutdown requested");
        let _ = self.shutdown_tx.send(());
        Response::Ok
    }
}
