//! Notification Channel
//!
//! The push side of the dispatch daemon: a [`ConnectionHandle`] addresses one
//! connected party's outbound queue, and [`PeerChannel`] tracks every live
//! connection for whole-process broadcasts. Delivery is best-effort
//! throughout; a failed send is logged and dropped, never retried, and never
//! blocks the caller.

use std::fmt;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;

use dashmap::DashMap;
use tokio::sync::mpsc;
use tracing::{debug, warn};
use uuid::Uuid;

use super::events::DispatchEvent;
use super::protocol::Frame;

/// Opaque identity of one live connection
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct ConnectionId(Uuid);

impl ConnectionId {
    pub fn new() -> Self {
        Self(Uuid::new_v4())
    }
}

impl Default for ConnectionId {
    fn default() -> Self {
        Self::new()
    }
}

impl fmt::Display for ConnectionId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.0)
    }
}

/// Errors that can occur when pushing to a connection
#[derive(Debug, thiserror::Error, PartialEq, Eq)]
pub enum SendError {
    /// The handle was superseded by a newer registration
    #[error("Connection handle revoked")]
    Revoked,

    /// The peer's outbound queue is full
    #[error("Connection outbound queue full")]
    Full,

    /// The peer disconnected and its queue is gone
    #[error("Connection closed")]
    Closed,
}

/// The live address of one connected party.
///
/// Cloning shares the same underlying queue and revocation flag, so a handle
/// held by the registry and the one held by the server task stay in sync.
#[derive(Clone)]
pub struct ConnectionHandle {
    id: ConnectionId,
    tx: mpsc::Sender<Frame>,
    revoked: Arc<AtomicBool>,
}

impl ConnectionHandle {
    /// Wrap a connection's outbound queue in a handle
    pub fn new(tx: mpsc::Sender<Frame>) -> Self {
        Self {
            id: ConnectionId::new(),
            tx,
            revoked: Arc::new(AtomicBool::new(false)),
        }
    }

    pub fn id(&self) -> ConnectionId {
        self.id
    }

    /// Mark this handle superseded. Subsequent [`send`](Self::send) calls
    /// fail with [`SendError::Revoked`] even while the socket stays open.
    pub fn revoke(&self) {
        self.revoked.store(true, Ordering::Release);
    }

    pub fn is_revoked(&self) -> bool {
        self.revoked.load(Ordering::Acquire)
    }

    /// Push a dispatch event to this connection.
    ///
    /// Non-blocking: a full queue or a gone peer is an error for the caller
    /// to log, not to wait out.
    pub fn send(&self, event: DispatchEvent) -> Result<(), SendError> {
        if self.is_revoked() {
            return Err(SendError::Revoked);
        }
        self.send_frame(Frame::Event(event))
    }

    /// Push a raw frame to this connection. Used by the transport for RPC
    /// replies, which are owed to the socket even after the handle was
    /// revoked as a driver binding.
    pub fn send_frame(&self, frame: Frame) -> Result<(), SendError> {
        self.tx.try_send(frame).map_err(|e| match e {
            mpsc::error::TrySendError::Full(_) => SendError::Full,
            mpsc::error::TrySendError::Closed(_) => SendError::Closed,
        })
    }
}

impl fmt::Debug for ConnectionHandle {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("ConnectionHandle")
            .field("id", &self.id)
            .field("revoked", &self.is_revoked())
            .finish()
    }
}

/// Abstract push mechanism used by the dispatch engine
pub trait NotificationChannel: Send + Sync {
    /// Send one event to one connection, best-effort
    fn send_to(&self, handle: &ConnectionHandle, event: DispatchEvent);

    /// Broadcast one event to every currently connected party, best-effort
    fn send_to_all(&self, event: DispatchEvent);
}

/// Connection-table-backed notification channel.
///
/// Every accepted connection subscribes here regardless of role (driver,
/// passenger, operations view) and withdraws on disconnect; `send_to_all`
/// walks the table.
#[derive(Default)]
pub struct PeerChannel {
    peers: DashMap<ConnectionId, ConnectionHandle>,
}

impl PeerChannel {
    pub fn new() -> Self {
        Self::default()
    }

    /// Track a newly accepted connection
    pub fn subscribe(&self, handle: ConnectionHandle) {
        self.peers.insert(handle.id(), handle);
    }

    /// Stop tracking a disconnected connection
    pub fn withdraw(&self, id: ConnectionId) {
        self.peers.remove(&id);
    }

    /// Number of currently connected parties
    pub fn connected(&self) -> usize {
        self.peers.len()
    }
}

impl NotificationChannel for PeerChannel {
    fn send_to(&self, handle: &ConnectionHandle, event: DispatchEvent) {
        let name = event.event_name();
        if let Err(e) = handle.send(event) {
            warn!("Dropping {} to connection {}: {}", name, handle.id(), e);
        }
    }

    fn send_to_all(&self, event: DispatchEvent) {
        let name = event.event_name();
        let mut delivered = 0usize;
        for peer in self.peers.iter() {
            match peer.value().send(event.clone()) {
                Ok(()) => delivered += 1,
                Err(e) => warn!("Dropping {} to connection {}: {}", name, peer.key(), e),
            }
        }
        debug!("Broadcast {} to {} connections", name, delivered);
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn test_handle(capacity: usize) -> (ConnectionHandle, mpsc::Receiver<Frame>) {
        let (tx, rx) = mpsc::channel(capacity);
        (ConnectionHandle::new(tx), rx)
    }

    #[test]
    fn test_send_delivers_event_frame() {
        let (handle, mut rx) = test_handle(4);
        handle
            .send(DispatchEvent::RequestClosed {
                request_id: "r1".to_string(),
            })
            .unwrap();

        match rx.try_recv().unwrap() {
            Frame::Event(DispatchEvent::RequestClosed { request_id }) => {
                assert_eq!(request_id, "r1")
            }
            other => panic!("Unexpected frame: {:?}", other),
        }
    }

    #[test]
    fn test_revoked_handle_refuses_events() {
        let (handle, mut rx) = test_handle(4);
        handle.revoke();

        let err = handle
            .send(DispatchEvent::RequestClosed {
                request_id: "r1".to_string(),
            })
            .unwrap_err();
        assert_eq!(err, SendError::Revoked);
        assert!(rx.try_recv().is_err());
    }

    #[test]
    fn test_full_queue_reports_full() {
        let (handle, _rx) = test_handle(1);
        let event = DispatchEvent::RequestClosed {
            request_id: "r1".to_string(),
        };
        handle.send(event.clone()).unwrap();
        assert_eq!(handle.send(event), Err(SendError::Full));
    }

    #[test]
    fn test_broadcast_reaches_all_subscribers() {
        let channel = PeerChannel::new();
        let (h1, mut rx1) = test_handle(4);
        let (h2, mut rx2) = test_handle(4);
        channel.subscribe(h1);
        channel.subscribe(h2);

        channel.send_to_all(DispatchEvent::TaxiRejected {
            request_id: "r1".to_string(),
        });

        assert!(matches!(rx1.try_recv().unwrap(), Frame::Event(_)));
        assert!(matches!(rx2.try_recv().unwrap(), Frame::Event(_)));
    }

    #[test]
    fn test_withdraw_stops_broadcast() {
        let channel = PeerChannel::new();
        let (h1, mut rx1) = test_handle(4);
        let id = h1.id();
        channel.subscribe(h1);
        channel.withdraw(id);
        assert_eq!(channel.connected(), 0);

        channel.send_to_all(DispatchEvent::TaxiRejected {
            request_id: "r1".to_string(),
        });
        assert!(rx1.try_recv().is_err());
    }
}
