//! TaxiHub: Real-Time Taxi Dispatch Daemon
//!
//! A stand-scoped ride dispatch service, featuring:
//! - Live driver presence tracking (one connection binding per driver)
//! - Fan-out of ride requests to the drivers online at the request's stand
//! - First-writer-wins resolution of racing accept/reject calls
//! - Typed push notifications over local IPC (Unix domain socket)
//!
//! Account management, payments, and HTTP surfaces live outside this crate;
//! the daemon reaches durable state only through the `store` adapter traits.

pub mod client;
pub mod config;
pub mod dispatch;
pub mod store;
pub mod types;

pub use config::Config;
pub use types::*;
