//! Daemon Lifecycle Management
//!
//! Handles daemon startup, shutdown, and single-instance guarantees.

use std::fs::File;
use std::io::{Read, Write};
use std::path::{Path, PathBuf};
use std::sync::Arc;
use std::time::Duration;

use anyhow::{Context, Result};
use tokio::signal;
use tokio::sync::broadcast;
use tracing::{error, info, warn};

use crate::config::Config;
use crate::store::{MemoryDriverStore, MemoryRequestStore};

use super::channel::PeerChannel;
use super::engine::DispatchEngine;
use super::handler::RequestHandler;
use super::registry::ConnectionRegistry;
use super::server::DispatchServer;

/// PID file for single-instance guarantee
const PID_FILE_NAME: &str = "taxihubd.pid";

/// Daemon instance managing all components
pub struct Daemon {
    engine: Arc<DispatchEngine>,
    handler: Arc<RequestHandler>,
    server: Arc<DispatchServer>,
    shutdown_tx: broadcast::Sender<()>,
    pid_file_path: PathBuf,
}

impl Daemon {
    /// Start the daemon: wire the stores, registry, channel, engine, and
    /// server together and acquire the single-instance lock.
    pub fn start(config: Config) -> Result<Self> {
        info!("Starting TaxiHub daemon");

        std::fs::create_dir_all(&config.node.data_dir)
            .context("Failed to create data directory")?;

        // Acquire single-instance lock
        let pid_file_path = config.node.data_dir.join(PID_FILE_NAME);
        Self::acquire_lock(&pid_file_path)?;

        let drivers = Arc::new(MemoryDriverStore::new());
        let requests = Arc::new(MemoryRequestStore::new());
        let channel = Arc::new(PeerChannel::new());
        let registry = Arc::new(ConnectionRegistry::new(drivers.clone()));

        let engine = Arc::new(DispatchEngine::new(
            registry,
            requests,
            drivers,
            channel.clone(),
        ));

        // Create shutdown channel
        let (shutdown_tx, _) = broadcast::channel(16);

        let handler = Arc::new(RequestHandler::new(
            engine.clone(),
            channel.clone(),
            shutdown_tx.clone(),
        ));

        let socket_path = config.socket_path();
        let server = Arc::new(DispatchServer::new(
            socket_path,
            handler.clone(),
            engine.clone(),
            channel,
            config.dispatch.event_buffer,
        ));

        info!("Daemon initialized");
        info!("Data directory: {}", config.node.data_dir.display());
        info!("Socket path: {}", server.socket_path().display());

        Ok(Self {
            engine,
            handler,
            server,
            shutdown_tx,
            pid_file_path,
        })
    }

    /// Run the daemon (blocking)
    pub async fn run(&self) -> Result<()> {
        info!("Daemon running");

        let shutdown_rx = self.shutdown_tx.subscribe();

        // Start dispatch server
        let shutdown_rx_server = self.shutdown_tx.subscribe();
        let server = self.server.clone();
        let server_handle = tokio::spawn(async move {
            match server.run(shutdown_rx_server).await {
                Ok(()) => info!("Dispatch server shut down cleanly"),
                Err(e) => error!("Dispatch server failed: {}", e),
            }
        });

        // Wait for shutdown signal (Ctrl+C, SIGTERM, or IPC)
        tokio::select! {
            _ = signal::ctrl_c() => {
                info!("Received Ctrl+C, shutting down");
            }
            _ = Self::wait_for_sigterm() => {
                info!("Received SIGTERM, shutting down");
            }
            _ = Self::wait_for_shutdown(shutdown_rx) => {
                info!("Shutdown requested via IPC");
            }
        }

        // Trigger shutdown
        let _ = self.shutdown_tx.send(());

        // Wait for the server to stop, aborting if it doesn't in time
        let server_abort = server_handle.abort_handle();
        if tokio::time::timeout(Duration::from_secs(5), server_handle)
            .await
            .is_err()
        {
            warn!("Dispatch server did not shut down within 5s, aborting");
            server_abort.abort();
        }

        self.shutdown()?;

        Ok(())
    }

    /// Shutdown the daemon gracefully
    pub fn shutdown(&self) -> Result<()> {
        info!("Shutting down daemon");
        Self::release_lock(&self.pid_file_path)?;
        info!("Daemon shutdown complete");
        Ok(())
    }

    /// Get the dispatch engine
    pub fn engine(&self) -> Arc<DispatchEngine> {
        self.engine.clone()
    }

    /// Get the request handler
    pub fn request_handler(&self) -> Arc<RequestHandler> {
        self.handler.clone()
    }

    /// Acquire single-instance lock via PID file
    ///
    /// Uses `create_new(true)` for atomic creation to avoid TOCTOU races
    /// where two processes could interleave exists/read/remove/create.
    fn acquire_lock(pid_file_path: &Path) -> Result<()> {
        use std::fs::OpenOptions;

        // Try atomic create — fails if file already exists
        match OpenOptions::new()
            .write(true)
            .create_new(true)
            .open(pid_file_path)
        {
            Ok(mut file) => {
                writeln!(file, "{}", std::process::id())?;
                return Ok(());
            }
            Err(e) if e.kind() == std::io::ErrorKind::AlreadyExists => {
                // File exists — check if it's stale below
            }
            Err(e) => {
                return Err(e).context("Failed to create PID file");
            }
        }

        // PID file exists — check if the process is still running
        let mut file = File::open(pid_file_path)?;
        let mut contents = String::new();
        file.read_to_string(&mut contents)?;

        if let Ok(pid) = contents.trim().parse::<u32>() {
            if Self::process_exists(pid) {
                anyhow::bail!(
                    "Daemon is already running (PID {}). Stop it first or remove {}",
                    pid,
                    pid_file_path.display()
                );
            }
        }

        // Stale PID file — remove and retry once
        std::fs::remove_file(pid_file_path)?;

        match OpenOptions::new()
            .write(true)
            .create_new(true)
            .open(pid_file_path)
        {
            Ok(mut file) => {
                writeln!(file, "{}", std::process::id())?;
                Ok(())
            }
            Err(e) => Err(e).context("Failed to create PID file after removing stale lock"),
        }
    }

    /// Release single-instance lock
    fn release_lock(pid_file_path: &Path) -> Result<()> {
        if pid_file_path.exists() {
            std::fs::remove_file(pid_file_path)?;
        }
        Ok(())
    }

    /// Check if a process with the given PID exists
    fn process_exists(pid: u32) -> bool {
        #[cfg(unix)]
        {
            // Signal 0 doesn't actually send a signal, just checks if the
            // process exists
            unsafe { libc::kill(pid as i32, 0) == 0 }
        }

        #[cfg(not(unix))]
        {
            let _ = pid;
            true
        }
    }

    /// Wait for SIGTERM signal
    #[cfg(unix)]
    async fn wait_for_sigterm() {
        use tokio::signal::unix::{signal, SignalKind};
        match signal(SignalKind::terminate()) {
            Ok(mut sigterm) => {
                sigterm.recv().await;
            }
            Err(e) => {
                tracing::warn!(
                    "Failed to register SIGTERM handler: {}. Falling back to pending future.",
                    e
                );
                std::future::pending::<()>().await;
            }
        }
    }

    #[cfg(not(unix))]
    async fn wait_for_sigterm() {
        // On non-Unix, just wait forever (Ctrl+C will still work)
        std::future::pending::<()>().await
    }

    /// Wait for shutdown signal from broadcast channel
    async fn wait_for_shutdown(mut rx: broadcast::Receiver<()>) {
        let _ = rx.recv().await;
    }
}

/// Check if the daemon is running
pub fn is_daemon_running(data_dir: &Path) -> bool {
    get_daemon_pid(data_dir).is_some()
}

/// Get the PID of the running daemon, if any
pub fn get_daemon_pid(data_dir: &Path) -> Option<u32> {
    let pid_file_path = data_dir.join(PID_FILE_NAME);

    if !pid_file_path.exists() {
        return None;
    }

    File::open(&pid_file_path)
        .ok()
        .and_then(|mut file| {
            let mut contents = String::new();
            file.read_to_string(&mut contents).ok()?;
            contents.trim().parse().ok()
        })
        .filter(|&pid| Daemon::process_exists(pid))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_lock_is_exclusive() {
        let dir = tempfile::tempdir().unwrap();
        let pid_file = dir.path().join(PID_FILE_NAME);

        Daemon::acquire_lock(&pid_file).unwrap();
        // Same (live) process holds the lock, so a second acquire fails.
        assert!(Daemon::acquire_lock(&pid_file).is_err());

        Daemon::release_lock(&pid_file).unwrap();
        assert!(Daemon::acquire_lock(&pid_file).is_ok());
        Daemon::release_lock(&pid_file).unwrap();
    }

    #[test]
    fn test_stale_lock_is_reclaimed() {
        let dir = tempfile::tempdir().unwrap();
        let pid_file = dir.path().join(PID_FILE_NAME);

        // A PID that can't be a live process on Linux (max is well below).
        std::fs::write(&pid_file, "999999999\n").unwrap();
        assert!(Daemon::acquire_lock(&pid_file).is_ok());
        Daemon::release_lock(&pid_file).unwrap();
    }

    #[test]
    fn test_daemon_pid_reporting() {
        let dir = tempfile::tempdir().unwrap();
        assert!(!is_daemon_running(dir.path()));

        let pid_file = dir.path().join(PID_FILE_NAME);
        std::fs::write(&pid_file, format!("{}\n", std::process::id())).unwrap();
        assert_eq!(get_daemon_pid(dir.path()), Some(std::process::id()));
        assert!(is_daemon_running(dir.path()));
    }
}
