use anyhow::Result;
use std::time::Duration;
use taxihub::{
    client::{self, ClientError},
    config::Config,
    dispatch::{self, Daemon},
};

use crate::DaemonAction;

/// Handle daemon management commands
pub async fn handle_daemon(config: Config, action: DaemonAction) -> Result<()> {
    match action {
        DaemonAction::Start => {
            if dispatch::is_daemon_running(&config.node.data_dir) {
                println!("Daemon is already running");
                return Ok(());
            }

            let daemon = Daemon::start(config)?;
            daemon.run().await?;
            Ok(())
        }
        DaemonAction::Stop => {
            if !dispatch::is_daemon_running(&config.node.data_dir) {
                println!("Daemon is not running");
                return Ok(());
            }

            println!("Stopping daemon...");
            match client::shutdown(config.socket_path()).await {
                Ok(()) => println!("Daemon stopped"),
                Err(ClientError::DaemonNotRunning) => println!("Daemon is not running"),
                Err(e) => anyhow::bail!("Failed to stop daemon: {}", e),
            }
            Ok(())
        }
        DaemonAction::Status => {
            match client::status(config.socket_path()).await {
                Ok(status) => {
                    println!("Daemon Status:");
                    println!("  Running: {}", status.running);
                    println!("  Uptime: {}s", status.uptime_seconds);
                    println!("  Connected peers: {}", status.connected_peers);
                    println!("  Online drivers: {}", status.online_drivers);
                }
                Err(ClientError::DaemonNotRunning) => {
                    println!("Daemon is not running");
                    if let Some(pid) = dispatch::get_daemon_pid(&config.node.data_dir) {
                        println!("  Stale PID file found (PID {})", pid);
                    }
                }
                Err(e) => anyhow::bail!("Failed to get status: {}", e),
            }
            Ok(())
        }
        DaemonAction::Restart => {
            // Stop first if running
            if dispatch::is_daemon_running(&config.node.data_dir) {
                println!("Stopping daemon...");
                let _ = client::shutdown(config.socket_path()).await;
                tokio::time::sleep(Duration::from_secs(1)).await;
            }

            println!("Starting daemon...");
            let daemon = Daemon::start(config)?;
            daemon.run().await?;
            Ok(())
        }
    }
}
