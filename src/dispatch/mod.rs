//! Dispatch Module
//!
//! Single daemon architecture for TaxiHub. The daemon owns the connection
//! registry and the dispatch state machine, and provides IPC access for
//! driver and passenger clients.
//!
//! # Architecture
//!
//! ```text
//! ┌─────────────────────────────────────────────────────────────┐
//! │                      taxihub daemon                          │
//! │                                                              │
//! │  ┌──────────────────────────────────────────────────────┐   │
//! │  │                  Dispatch Engine                      │   │
//! │  │  ┌─────────────┐ ┌─────────────┐ ┌────────────────┐  │   │
//! │  │  │ Connection  │ │ Request     │ │ Driver         │  │   │
//! │  │  │ Registry    │ │ Store       │ │ Store          │  │   │
//! │  │  └─────────────┘ └─────────────┘ └────────────────┘  │   │
//! │  └──────────────────────────┬───────────────────────────┘   │
//! │                             │                                │
//! │  ┌──────────────────────────┴───────────────────────────┐   │
//! │  │               Notification Channel                    │   │
//! │  │   per-connection frame queues + broadcast table       │   │
//! │  └──────────────────────────────────────────────────────┘   │
//! │                                                              │
//! │  ┌────────────────┐                                         │
//! │  │ Unix Socket    │ ◀─── IPC from driver/passenger clients  │
//! │  │ (Local IPC)    │                                         │
//! │  └────────────────┘                                         │
//! └──────────────────────────────────────────────────────────────┘
//! ```
//!
//! # Usage
//!
//! Start the daemon:
//! ```bash
//! taxihub daemon start
//! ```
//!
//! Check status:
//! ```bash
//! taxihub daemon status
//! ```
//!
//! Stop the daemon:
//! ```bash
//! taxihub daemon stop
//! ```

pub mod channel;
pub mod engine;
pub mod events;
pub mod handler;
pub mod lifecycle;
pub mod protocol;
pub mod registry;
pub mod server;

pub use channel::{ConnectionHandle, ConnectionId, NotificationChannel, PeerChannel};
pub use engine::DispatchEngine;
pub use events::DispatchEvent;
pub use handler::RequestHandler;
pub use lifecycle::{get_daemon_pid, is_daemon_running, Daemon};
pub use protocol::{
    decode_message, encode_message, DaemonStatus, ErrorCode, Frame, Request, Response,
    MAX_MESSAGE_SIZE,
};
pub use registry::ConnectionRegistry;
pub use server::DispatchServer;
