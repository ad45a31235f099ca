//! Ride-side commands: provision drivers, submit requests, drive

use anyhow::Result;
use std::time::Duration;
use taxihub::{
    client::{self, DaemonClient},
    config::Config,
    dispatch::{DispatchEvent, Request, Response},
    types::{Coordinates, DriverRecord},
};

/// Provision a driver record on the daemon
pub async fn provision_driver(
    config: Config,
    driver_id: String,
    name: String,
    plate: String,
    stand_id: String,
    stand_name: String,
) -> Result<()> {
    let driver = DriverRecord::new(driver_id.clone(), name, plate, stand_id, stand_name);
    client::provision_driver(config.socket_path(), driver).await?;
    println!("Provisioned driver {}", driver_id);
    Ok(())
}

/// Submit a ride request and optionally wait for the outcome
pub async fn submit_request(
    config: Config,
    user_id: String,
    stand_id: String,
    origin: Coordinates,
    destination: Coordinates,
    fare: f64,
    wait_secs: Option<u64>,
) -> Result<()> {
    // Keep one connection for the whole exchange: the accept outcome is
    // pushed, so the submitting socket has to stay open to see it.
    let mut conn = DaemonClient::connect_to(config.socket_path()).await?;

    let response = conn
        .send(Request::SubmitRequest {
            user_id,
            stand_id,
            origin,
            destination,
            estimated_fare: fare,
        })
        .await?;

    let request = match response {
        Response::RequestSubmitted {
            request,
            notified_drivers,
        } => {
            println!("Request {} submitted", request.request_id);
            println!("  Offered to {} drivers at stand {}", notified_drivers, request.stand_id);
            request
        }
        Response::Error { message, .. } => anyhow::bail!("Submit failed: {}", message),
        other => anyhow::bail!("Unexpected response: {:?}", other),
    };

    let Some(wait_secs) = wait_secs else {
        return Ok(());
    };

    println!("Waiting up to {}s for a driver...", wait_secs);
    let deadline = tokio::time::Instant::now() + Duration::from_secs(wait_secs);
    loop {
        let event = match tokio::time::timeout_at(deadline, conn.next_event()).await {
            Ok(event) => event?,
            Err(_) => {
                println!("No driver accepted within {}s; request stays open", wait_secs);
                return Ok(());
            }
        };

        match event {
            DispatchEvent::TaxiAccepted {
                request_id,
                driver_name,
                plate,
                message,
            } if request_id == request.request_id => {
                println!("{}: {} ({})", message, driver_name, plate);
                return Ok(());
            }
            DispatchEvent::TaxiRejected { request_id } if request_id == request.request_id => {
                println!("A driver declined; request stays open to others");
            }
            _ => {}
        }
    }
}

/// Register as a driver and follow incoming offers
pub async fn drive(config: Config, driver_id: String, auto_accept: bool) -> Result<()> {
    let mut conn = DaemonClient::connect_to(config.socket_path()).await?;
    let driver_name = client::register_driver(&mut conn, driver_id.clone()).await?;
    println!("Online as {} ({})", driver_name, driver_id);

    loop {
        match conn.next_event().await? {
            DispatchEvent::NewTaxiRequest { request } => {
                println!(
                    "Offer {}: {} -> {} (est. fare {:.2})",
                    request.request_id, request.origin, request.destination, request.estimated_fare
                );
                if auto_accept {
                    client::accept(&mut conn, request.request_id.clone(), driver_id.clone())
                        .await?;
                    println!("Sent accept for {}", request.request_id);
                }
            }
            DispatchEvent::RequestClosed { request_id } => {
                println!("Offer {} closed", request_id);
            }
            DispatchEvent::TaxiAccepted {
                request_id,
                driver_name,
                ..
            } => {
                println!("Request {} taken by {}", request_id, driver_name);
            }
            DispatchEvent::TaxiRejected { request_id } => {
                println!("Request {} declined by a driver", request_id);
            }
            DispatchEvent::DriverRegistered { message, .. } => {
                println!("{}", message);
            }
        }
    }
}
