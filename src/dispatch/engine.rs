//! Dispatch Engine
//!
//! The core state machine: accepts new ride requests, fans them out to the
//! drivers online at the request's stand, and resolves racing accept/reject
//! calls into a single authoritative outcome per request.
//!
//! Race resolution is first-writer-wins: the status transition is a per-
//! request compare-and-set in the request store, so among any number of
//! concurrent claimants exactly one transition applies. Losers are silent
//! no-ops here and are told through a `RequestClosed` push instead of an
//! error, since losing the race is an expected outcome, not a failure.

use std::sync::Arc;

use tracing::{debug, info, warn};

use crate::store::{DriverStore, RequestStore, StoreResult};
use crate::types::{DriverAssignment, DriverId, DriverRecord, RequestId, RequestStatus, RideRequest};

use super::channel::{ConnectionHandle, NotificationChannel};
use super::events::DispatchEvent;
use super::registry::ConnectionRegistry;

/// The dispatch state machine.
///
/// All methods are safe to call from any number of concurrent tasks; the
/// only shared mutable state is the registry's per-driver bindings and each
/// request's status, both of which serialize per entity.
pub struct DispatchEngine {
    registry: Arc<ConnectionRegistry>,
    requests: Arc<dyn RequestStore>,
    drivers: Arc<dyn DriverStore>,
    channel: Arc<dyn NotificationChannel>,
}

impl DispatchEngine {
    pub fn new(
        registry: Arc<ConnectionRegistry>,
        requests: Arc<dyn RequestStore>,
        drivers: Arc<dyn DriverStore>,
        channel: Arc<dyn NotificationChannel>,
    ) -> Self {
        Self {
            registry,
            requests,
            drivers,
            channel,
        }
    }

    /// Bind a driver to its connection and confirm with `DriverRegistered`.
    ///
    /// An unknown driver id is a no-op returning `None`; provisioning
    /// belongs to the account layer.
    pub fn register_driver(
        &self,
        driver_id: &DriverId,
        handle: ConnectionHandle,
    ) -> StoreResult<Option<DriverRecord>> {
        let record = match self.drivers.get(driver_id)? {
            Some(record) => record,
            None => {
                debug!("Register for unknown driver {} ignored", driver_id);
                return Ok(None);
            }
        };

        self.registry.register(driver_id, handle.clone());
        info!(
            "Driver {} ({}) online at stand {}",
            driver_id, record.driver_name, record.stand_id
        );

        self.channel.send_to(
            &handle,
            DispatchEvent::DriverRegistered {
                driver_name: record.driver_name.clone(),
                stand_name: record.stand_name.clone(),
                message: "You are registered as online".to_string(),
            },
        );
        Ok(Some(record))
    }

    /// Persist a pending request and offer it to every driver currently
    /// online at its stand.
    ///
    /// The eligible set is evaluated fresh at this moment; with nobody
    /// online the request stays `Pending` with zero sends. Returns the
    /// number of drivers notified.
    pub fn submit(&self, request: RideRequest) -> StoreResult<usize> {
        self.requests.create(&request)?;

        let eligible = self.registry.connected_drivers(&request.stand_id);
        if eligible.is_empty() {
            info!(
                "Request {} at stand {} has no reachable drivers, left pending",
                request.request_id, request.stand_id
            );
            return Ok(0);
        }

        let mut notified = 0usize;
        for driver_id in &eligible {
            match self.registry.handle_for(driver_id) {
                Some(handle) => {
                    self.channel.send_to(
                        &handle,
                        DispatchEvent::NewTaxiRequest {
                            request: request.clone(),
                        },
                    );
                    notified += 1;
                }
                // Driver dropped between snapshot and send; best-effort.
                None => debug!("Driver {} went offline before offer", driver_id),
            }
        }

        info!(
            "Request {} offered to {} drivers at stand {}",
            request.request_id, notified, request.stand_id
        );
        Ok(notified)
    }

    /// Claim a pending request for a driver. First writer wins.
    ///
    /// Unknown request or driver ids and already-terminal requests are
    /// silent no-ops. On the winning transition: `TaxiAccepted` goes to all
    /// connected parties, then `RequestClosed` to every other driver still
    /// online at the stand so they retract the offer. Returns whether this
    /// call won the transition.
    pub fn accept(&self, request_id: &RequestId, driver_id: &DriverId) -> StoreResult<bool> {
        let request = match self.requests.get(request_id)? {
            Some(request) => request,
            None => {
                debug!("Accept for unknown request {} ignored", request_id);
                return Ok(false);
            }
        };
        let driver = match self.drivers.get(driver_id)? {
            Some(driver) => driver,
            None => {
                debug!("Accept by unknown driver {} ignored", driver_id);
                return Ok(false);
            }
        };

        let assignment = DriverAssignment::from_record(&driver);
        let applied = self.requests.update_status(
            request_id,
            RequestStatus::Pending,
            RequestStatus::Accepted,
            Some(assignment),
        )?;

        if !applied {
            // Someone else already claimed or declined it; expected under
            // racing, nothing to announce.
            debug!(
                "Stale accept of request {} by driver {}",
                request_id, driver_id
            );
            return Ok(false);
        }

        info!("Request {} accepted by driver {}", request_id, driver_id);
        self.channel.send_to_all(DispatchEvent::TaxiAccepted {
            request_id: request_id.clone(),
            driver_name: driver.driver_name.clone(),
            plate: driver.vehicle_plate.clone(),
            message: "Driver is on the way".to_string(),
        });

        // Retract the offer from the losing drivers. Re-queried now, so a
        // driver who disconnected meanwhile is simply never addressed.
        for other_id in self.registry.connected_drivers(&request.stand_id) {
            if other_id == *driver_id {
                continue;
            }
            if let Some(handle) = self.registry.handle_for(&other_id) {
                self.channel.send_to(
                    &handle,
                    DispatchEvent::RequestClosed {
                        request_id: request_id.clone(),
                    },
                );
            }
        }

        Ok(true)
    }

    /// Decline a pending request. Same compare-and-set discipline as
    /// [`accept`](Self::accept); a request that already left `Pending` is a
    /// silent no-op.
    ///
    /// A rejection does not retract the offer from the other drivers: the
    /// request stays open to them.
    pub fn reject(&self, request_id: &RequestId, driver_id: &DriverId) -> StoreResult<bool> {
        let applied = self.requests.update_status(
            request_id,
            RequestStatus::Pending,
            RequestStatus::Rejected,
            None,
        )?;

        if !applied {
            debug!(
                "Stale reject of request {} by driver {}",
                request_id, driver_id
            );
            return Ok(false);
        }

        info!("Request {} rejected by driver {}", request_id, driver_id);
        self.channel.send_to_all(DispatchEvent::TaxiRejected {
            request_id: request_id.clone(),
        });
        Ok(true)
    }

    /// Handle a dropped connection: unbind the driver if this handle still
    /// holds the binding. In-flight requests are untouched; a request
    /// already offered to this driver is neither retried nor reassigned.
    pub fn handle_disconnect(&self, handle: &ConnectionHandle) -> Option<DriverId> {
        let unbound = self.registry.unregister(handle);
        if let Some(driver_id) = &unbound {
            info!("Driver {} offline (connection {})", driver_id, handle.id());
        }
        unbound
    }

    /// Number of drivers currently reachable
    pub fn online_drivers(&self) -> usize {
        self.registry.online_count()
    }

    /// Provision (or replace) a driver record on behalf of the account
    /// layer.
    pub fn provision_driver(&self, driver: DriverRecord) -> StoreResult<()> {
        info!(
            "Provisioned driver {} at stand {} ({})",
            driver.driver_id, driver.stand_id, driver.stand_name
        );
        if driver.is_online || driver.connection.is_some() {
            warn!(
                "Provisioned record for {} claims availability; registry remains authoritative",
                driver.driver_id
            );
        }
        self.drivers.put_driver(driver)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::dispatch::channel::PeerChannel;
    use crate::dispatch::protocol::Frame;
    use crate::store::{MemoryDriverStore, MemoryRequestStore};
    use crate::types::Coordinates;
    use tokio::sync::mpsc;

    struct TestPeer {
        handle: ConnectionHandle,
        rx: mpsc::Receiver<Frame>,
    }

    impl TestPeer {
        fn new(channel: &PeerChannel) -> Self {
            let (tx, rx) = mpsc::channel(32);
            let handle = ConnectionHandle::new(tx);
            channel.subscribe(handle.clone());
            Self { handle, rx }
        }

        fn drain(&mut self) -> Vec<DispatchEvent> {
            let mut events = Vec::new();
            while let Ok(frame) = self.rx.try_recv() {
                if let Frame::Event(event) = frame {
                    events.push(event);
                }
            }
            events
        }
    }

    struct Fixture {
        engine: Arc<DispatchEngine>,
        requests: Arc<MemoryRequestStore>,
        channel: Arc<PeerChannel>,
    }

    fn fixture() -> Fixture {
        let requests = Arc::new(MemoryRequestStore::new());
        let drivers = Arc::new(MemoryDriverStore::new());
        let channel = Arc::new(PeerChannel::new());
        let registry = Arc::new(ConnectionRegistry::new(drivers.clone()));

        drivers
            .put_driver(DriverRecord::new("dA", "Ayşe", "34 AA 100", "s1", "Taksim"))
            .unwrap();
        drivers
            .put_driver(DriverRecord::new("dB", "Mehmet", "34 BB 200", "s1", "Taksim"))
            .unwrap();
        drivers
            .put_driver(DriverRecord::new("dC", "Kemal", "06 CC 300", "s2", "Kızılay"))
            .unwrap();

        let engine = Arc::new(DispatchEngine::new(
            registry,
            requests.clone(),
            drivers,
            channel.clone(),
        ));
        Fixture {
            engine,
            requests,
            channel,
        }
    }

    fn test_request(id: &str, stand: &str) -> RideRequest {
        RideRequest::new(
            "user-1",
            stand,
            Coordinates::new(41.0, 29.0),
            Coordinates::new(41.1, 29.1),
            150.0,
        )
        .with_id(id)
    }

    #[test]
    fn test_register_unknown_driver_is_noop() {
        let fx = fixture();
        let mut peer = TestPeer::new(&fx.channel);

        let record = fx
            .engine
            .register_driver(&"ghost".to_string(), peer.handle.clone())
            .unwrap();

        assert!(record.is_none());
        assert_eq!(fx.engine.online_drivers(), 0);
        assert!(peer.drain().is_empty());
    }

    #[test]
    fn test_register_confirms_to_caller() {
        let fx = fixture();
        let mut peer = TestPeer::new(&fx.channel);

        let record = fx
            .engine
            .register_driver(&"dA".to_string(), peer.handle.clone())
            .unwrap()
            .unwrap();
        assert_eq!(record.driver_name, "Ayşe");

        let events = peer.drain();
        assert_eq!(events.len(), 1);
        assert!(matches!(
            &events[0],
            DispatchEvent::DriverRegistered { driver_name, .. } if driver_name == "Ayşe"
        ));
    }

    #[test]
    fn test_submit_with_no_drivers_stays_pending() {
        let fx = fixture();

        let notified = fx.engine.submit(test_request("r1", "s1")).unwrap();

        assert_eq!(notified, 0);
        let stored = fx.requests.get(&"r1".to_string()).unwrap().unwrap();
        assert_eq!(stored.status, RequestStatus::Pending);
    }

    #[test]
    fn test_submit_offers_only_to_same_stand() {
        let fx = fixture();
        let mut peer_a = TestPeer::new(&fx.channel);
        let mut peer_b = TestPeer::new(&fx.channel);
        let mut peer_c = TestPeer::new(&fx.channel);

        fx.engine
            .register_driver(&"dA".to_string(), peer_a.handle.clone())
            .unwrap();
        fx.engine
            .register_driver(&"dB".to_string(), peer_b.handle.clone())
            .unwrap();
        fx.engine
            .register_driver(&"dC".to_string(), peer_c.handle.clone())
            .unwrap();
        peer_a.drain();
        peer_b.drain();
        peer_c.drain();

        let notified = fx.engine.submit(test_request("r1", "s1")).unwrap();
        assert_eq!(notified, 2);

        for peer in [&mut peer_a, &mut peer_b] {
            let events = peer.drain();
            assert_eq!(events.len(), 1);
            assert!(matches!(
                &events[0],
                DispatchEvent::NewTaxiRequest { request } if request.request_id == "r1"
            ));
        }
        assert!(peer_c.drain().is_empty());
    }

    #[test]
    fn test_accept_closes_offer_for_losers_only() {
        let fx = fixture();
        let mut peer_a = TestPeer::new(&fx.channel);
        let mut peer_b = TestPeer::new(&fx.channel);

        fx.engine
            .register_driver(&"dA".to_string(), peer_a.handle.clone())
            .unwrap();
        fx.engine
            .register_driver(&"dB".to_string(), peer_b.handle.clone())
            .unwrap();
        fx.engine.submit(test_request("r1", "s1")).unwrap();
        peer_a.drain();
        peer_b.drain();

        let won = fx
            .engine
            .accept(&"r1".to_string(), &"dA".to_string())
            .unwrap();
        assert!(won);

        let stored = fx.requests.get(&"r1".to_string()).unwrap().unwrap();
        assert_eq!(stored.status, RequestStatus::Accepted);
        assert_eq!(stored.driver_id.as_deref(), Some("dA"));
        assert_eq!(stored.driver_plate.as_deref(), Some("34 AA 100"));

        // The loser gets the broadcast plus exactly one RequestClosed.
        let b_events = peer_b.drain();
        let closed: Vec<_> = b_events
            .iter()
            .filter(|e| matches!(e, DispatchEvent::RequestClosed { .. }))
            .collect();
        assert_eq!(closed.len(), 1);
        assert!(b_events
            .iter()
            .any(|e| matches!(e, DispatchEvent::TaxiAccepted { .. })));

        // The winner sees the broadcast but no retraction.
        let a_events = peer_a.drain();
        assert!(a_events
            .iter()
            .any(|e| matches!(e, DispatchEvent::TaxiAccepted { plate, .. } if plate == "34 AA 100")));
        assert!(!a_events
            .iter()
            .any(|e| matches!(e, DispatchEvent::RequestClosed { .. })));
    }

    #[test]
    fn test_second_accept_is_noop() {
        let fx = fixture();
        let peer_a = TestPeer::new(&fx.channel);
        let peer_b = TestPeer::new(&fx.channel);

        fx.engine
            .register_driver(&"dA".to_string(), peer_a.handle.clone())
            .unwrap();
        fx.engine
            .register_driver(&"dB".to_string(), peer_b.handle.clone())
            .unwrap();
        fx.engine.submit(test_request("r1", "s1")).unwrap();

        assert!(fx
            .engine
            .accept(&"r1".to_string(), &"dA".to_string())
            .unwrap());
        assert!(!fx
            .engine
            .accept(&"r1".to_string(), &"dB".to_string())
            .unwrap());

        let stored = fx.requests.get(&"r1".to_string()).unwrap().unwrap();
        assert_eq!(stored.driver_id.as_deref(), Some("dA"));
    }

    #[test]
    fn test_concurrent_accepts_single_winner() {
        let fx = fixture();
        let mut peers = Vec::new();
        for driver in ["dA", "dB"] {
            let peer = TestPeer::new(&fx.channel);
            fx.engine
                .register_driver(&driver.to_string(), peer.handle.clone())
                .unwrap();
            peers.push(peer);
        }
        fx.engine.submit(test_request("r1", "s1")).unwrap();

        let barrier = Arc::new(std::sync::Barrier::new(2));
        let mut handles = Vec::new();
        for driver in ["dA", "dB"] {
            let engine = fx.engine.clone();
            let barrier = barrier.clone();
            handles.push(std::thread::spawn(move || {
                barrier.wait();
                engine
                    .accept(&"r1".to_string(), &driver.to_string())
                    .unwrap()
            }));
        }

        let wins: usize = handles
            .into_iter()
            .map(|h| h.join().unwrap() as usize)
            .sum();
        assert_eq!(wins, 1);

        let stored = fx.requests.get(&"r1".to_string()).unwrap().unwrap();
        assert_eq!(stored.status, RequestStatus::Accepted);
        assert!(stored.driver_id.is_some());
    }

    #[test]
    fn test_reject_broadcasts_and_is_terminal() {
        let fx = fixture();
        let mut peer_a = TestPeer::new(&fx.channel);

        fx.engine
            .register_driver(&"dA".to_string(), peer_a.handle.clone())
            .unwrap();
        fx.engine.submit(test_request("r1", "s1")).unwrap();
        peer_a.drain();

        assert!(fx
            .engine
            .reject(&"r1".to_string(), &"dA".to_string())
            .unwrap());

        let events = peer_a.drain();
        assert!(events
            .iter()
            .any(|e| matches!(e, DispatchEvent::TaxiRejected { request_id } if request_id == "r1")));

        // A reject after the terminal transition changes nothing and stays
        // silent.
        assert!(!fx
            .engine
            .reject(&"r1".to_string(), &"dA".to_string())
            .unwrap());
        assert!(peer_a.drain().is_empty());
    }

    #[test]
    fn test_reject_after_accept_is_noop() {
        let fx = fixture();
        let peer_a = TestPeer::new(&fx.channel);
        fx.engine
            .register_driver(&"dA".to_string(), peer_a.handle.clone())
            .unwrap();
        fx.engine.submit(test_request("r1", "s1")).unwrap();

        assert!(fx
            .engine
            .accept(&"r1".to_string(), &"dA".to_string())
            .unwrap());
        assert!(!fx
            .engine
            .reject(&"r1".to_string(), &"dB".to_string())
            .unwrap());

        let stored = fx.requests.get(&"r1".to_string()).unwrap().unwrap();
        assert_eq!(stored.status, RequestStatus::Accepted);
        assert_eq!(stored.driver_id.as_deref(), Some("dA"));
    }

    #[test]
    fn test_accept_unknown_request_or_driver_is_noop() {
        let fx = fixture();
        assert!(!fx
            .engine
            .accept(&"ghost".to_string(), &"dA".to_string())
            .unwrap());

        fx.engine.submit(test_request("r1", "s1")).unwrap();
        assert!(!fx
            .engine
            .accept(&"r1".to_string(), &"ghost".to_string())
            .unwrap());

        let stored = fx.requests.get(&"r1".to_string()).unwrap().unwrap();
        assert_eq!(stored.status, RequestStatus::Pending);
    }

    #[test]
    fn test_disconnect_leaves_request_state_alone() {
        let fx = fixture();
        let peer_a = TestPeer::new(&fx.channel);

        fx.engine
            .register_driver(&"dA".to_string(), peer_a.handle.clone())
            .unwrap();
        fx.engine.submit(test_request("r1", "s1")).unwrap();

        let unbound = fx.engine.handle_disconnect(&peer_a.handle);
        assert_eq!(unbound, Some("dA".to_string()));
        assert_eq!(fx.engine.online_drivers(), 0);

        let stored = fx.requests.get(&"r1".to_string()).unwrap().unwrap();
        assert_eq!(stored.status, RequestStatus::Pending);
    }
}
