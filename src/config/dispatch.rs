//! Dispatch engine configuration

use serde::{Deserialize, Serialize};

/// Dispatch configuration
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct DispatchConfig {
    /// Per-connection outbound event queue capacity. Sends to a full queue
    /// are dropped (best-effort delivery), never blocked on.
    #[serde(default = "default_event_buffer")]
    pub event_buffer: usize,
}

fn default_event_buffer() -> usize {
    64
}

impl Default for DispatchConfig {
    fn default() -> Self {
        Self { event_buffer: 64 }
    }
}
