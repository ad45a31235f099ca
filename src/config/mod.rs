//! Configuration for TaxiHub

mod dispatch;
mod logging;
mod node;

pub use dispatch::DispatchConfig;
pub use logging::{LogFormat, LogLevel, LoggingConfig};
pub use node::NodeConfig;

use anyhow::Result;
use std::path::{Path, PathBuf};

use serde::{Deserialize, Serialize};

/// Main configuration for the TaxiHub daemon
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct Config {
    /// Node configuration
    #[serde(default)]
    pub node: NodeConfig,
    /// Dispatch configuration
    #[serde(default)]
    pub dispatch: DispatchConfig,
    /// Logging configuration
    #[serde(default)]
    pub logging: LoggingConfig,
}

impl Config {
    /// Load configuration from a TOML file and validate it.
    pub fn load(path: &Path) -> Result<Self> {
        let content = std::fs::read_to_string(path)
            .map_err(|e| anyhow::anyhow!("Failed to read config file '{}': {}", path.display(), e))?;
        let config: Config = toml::from_str(&content)
            .map_err(|e| anyhow::anyhow!("Failed to parse config file '{}': {}", path.display(), e))?;
        config.validate()?;
        Ok(config)
    }

    /// Validate all configuration fields.
    ///
    /// Collects all validation errors and reports them together so the user
    /// can fix everything in one pass rather than playing whack-a-mole.
    pub fn validate(&self) -> Result<()> {
        let mut errors: Vec<String> = Vec::new();

        if self.dispatch.event_buffer == 0 {
            errors.push("dispatch event_buffer must be positive".to_string());
        }
        if self.dispatch.event_buffer > 65536 {
            errors.push("dispatch event_buffer must be <= 65536".to_string());
        }
        if self.node.data_dir.as_os_str().is_empty() {
            errors.push("node data_dir must not be empty".to_string());
        }

        if errors.is_empty() {
            Ok(())
        } else {
            anyhow::bail!("Invalid configuration:\n  - {}", errors.join("\n  - "))
        }
    }

    /// Resolve the daemon socket path.
    ///
    /// Uses the configured override when present, otherwise
    /// `$XDG_RUNTIME_DIR/taxihub/taxihubd.sock` with a /tmp fallback.
    pub fn socket_path(&self) -> PathBuf {
        if let Some(path) = &self.node.socket_path {
            return path.clone();
        }

        if let Ok(runtime_dir) = std::env::var("XDG_RUNTIME_DIR") {
            return PathBuf::from(runtime_dir)
                .join("taxihub")
                .join("taxihubd.sock");
        }

        PathBuf::from("/tmp/taxihubd.sock")
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_default_config_is_valid() {
        assert!(Config::default().validate().is_ok());
    }

    #[test]
    fn test_zero_event_buffer_rejected() {
        let mut config = Config::default();
        config.dispatch.event_buffer = 0;
        assert!(config.validate().is_err());
    }

    #[test]
    fn test_socket_path_override() {
        let mut config = Config::default();
        config.node.socket_path = Some(PathBuf::from("/tmp/custom.sock"));
        assert_eq!(config.socket_path(), PathBuf::from("/tmp/custom.sock"));
    }

    #[test]
    fn test_load_partial_toml() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("taxihub.toml");
        std::fs::write(&path, "[dispatch]\nevent_buffer = 16\n").unwrap();

        let config = Config::load(&path).unwrap();
        assert_eq!(config.dispatch.event_buffer, 16);
    }
}
