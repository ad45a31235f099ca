//! Node identity and filesystem configuration

use serde::{Deserialize, Serialize};
use std::path::PathBuf;

/// Node configuration
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct NodeConfig {
    /// Data directory (PID file, future durable state)
    pub data_dir: PathBuf,
    /// Socket path override (defaults to XDG_RUNTIME_DIR/taxihub/taxihubd.sock)
    pub socket_path: Option<PathBuf>,
}

impl Default for NodeConfig {
    fn default() -> Self {
        Self {
            data_dir: directories::ProjectDirs::from("", "", "taxihub")
                .map(|d| d.data_dir().to_path_buf())
                .unwrap_or_else(|| PathBuf::from(".taxihub")),
            socket_path: None,
        }
    }
}
