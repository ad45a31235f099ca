//! IPC Server
//!
//! Unix domain socket server for client-daemon communication. Every
//! accepted connection gets two tasks: a read loop that decodes requests
//! and feeds the handler, and a write loop that drains the connection's
//! outbound frame queue. The queue carries both RPC replies and pushed
//! dispatch events, so a connection sees one serialized stream.
//!
//! A connection that drops (EOF or error) is treated as an implicit
//! disconnect: its driver binding, if still current, is unregistered and
//! its broadcast subscription withdrawn.

use std::path::{Path, PathBuf};
use std::sync::Arc;

use anyhow::{Context, Result};
use tokio::io::{AsyncReadExt, AsyncWriteExt};
use tokio::net::{unix::OwnedWriteHalf, UnixListener, UnixStream};
use tokio::sync::{broadcast, mpsc};
use tracing::{debug, error, info, warn};

use super::channel::{ConnectionHandle, PeerChannel};
use super::engine::DispatchEngine;
use super::handler::RequestHandler;
use super::protocol::{
    decode_message, encode_message, ErrorCode, Frame, Request, Response, MAX_MESSAGE_SIZE,
};

/// IPC server listening on a Unix domain socket
pub struct DispatchServer {
    socket_path: PathBuf,
    handler: Arc<RequestHandler>,
    engine: Arc<DispatchEngine>,
    channel: Arc<PeerChannel>,
    event_buffer: usize,
}

impl DispatchServer {
    pub fn new(
        socket_path: PathBuf,
        handler: Arc<RequestHandler>,
        engine: Arc<DispatchEngine>,
        channel: Arc<PeerChannel>,
        event_buffer: usize,
    ) -> Self {
        Self {
            socket_path,
            handler,
            engine,
            channel,
            event_buffer,
        }
    }

    /// Run the IPC server
    pub async fn run(&self, mut shutdown: broadcast::Receiver<()>) -> Result<()> {
        // Ensure parent directory exists
        if let Some(parent) = self.socket_path.parent() {
            std::fs::create_dir_all(parent)?;
        }

        // Remove existing socket file if it exists
        if self.socket_path.exists() {
            std::fs::remove_file(&self.socket_path)
                .context("Failed to remove existing socket file")?;
        }

        let listener =
            UnixListener::bind(&self.socket_path).context("Failed to bind to Unix socket")?;

        info!("Dispatch server listening on: {}", self.socket_path.display());

        // Set permissions (readable/writable by owner and group)
        #[cfg(unix)]
        {
            use std::os::unix::fs::PermissionsExt;
            std::fs::set_permissions(&self.socket_path, std::fs::Permissions::from_mode(0o660))?;
        }

        loop {
            tokio::select! {
                accept_result = listener.accept() => {
                    match accept_result {
                        Ok((stream, _addr)) => {
                            debug!("New client connection");
                            let handler = self.handler.clone();
                            let engine = self.engine.clone();
                            let channel = self.channel.clone();
                            let event_buffer = self.event_buffer;
                            tokio::spawn(async move {
                                serve_connection(stream, handler, engine, channel, event_buffer)
                                    .await;
                            });
                        }
                        Err(e) => {
                            error!("Accept error: {}", e);
                        }
                    }
                }
                _ = shutdown.recv() => {
                    info!("Dispatch server shutting down");
                    break;
                }
            }
        }

        // Clean up socket file
        if self.socket_path.exists() {
            let _ = std::fs::remove_file(&self.socket_path);
        }

        Ok(())
    }

    /// Get the socket path
    pub fn socket_path(&self) -> &Path {
        &self.socket_path
    }
}

/// Serve one client connection until it drops, then clean up its bindings
async fn serve_connection(
    stream: UnixStream,
    handler: Arc<RequestHandler>,
    engine: Arc<DispatchEngine>,
    channel: Arc<PeerChannel>,
    event_buffer: usize,
) {
    let (read_half, write_half) = stream.into_split();

    let (tx, rx) = mpsc::channel::<Frame>(event_buffer);
    let conn = ConnectionHandle::new(tx);
    channel.subscribe(conn.clone());

    let writer = tokio::spawn(write_frames(write_half, rx));

    if let Err(e) = read_requests(read_half, &handler, &conn).await {
        debug!("Connection {} closed: {}", conn.id(), e);
    }

    engine.handle_disconnect(&conn);
    channel.withdraw(conn.id());

    // All handle clones are gone now, so the write loop drains and exits.
    drop(conn);
    let _ = writer.await;
}

/// Read loop: decode length-prefixed requests and answer through the
/// connection's frame queue
async fn read_requests(
    mut read_half: tokio::net::unix::OwnedReadHalf,
    handler: &RequestHandler,
    conn: &ConnectionHandle,
) -> Result<()> {
    loop {
        // Read message length (4 bytes, little-endian)
        let mut len_buf = [0u8; 4];
        match read_half.read_exact(&mut len_buf).await {
            Ok(_) => {}
            Err(e) if e.kind() == std::io::ErrorKind::UnexpectedEof => {
                debug!("Client disconnected");
                return Ok(());
            }
            Err(e) => return Err(e.into()),
        }

        let msg_len = u32::from_le_bytes(len_buf) as usize;
        if msg_len > MAX_MESSAGE_SIZE {
            anyhow::bail!("Message too large: {} bytes", msg_len);
        }

        // Read message payload
        let mut payload = vec![0u8; msg_len];
        read_half.read_exact(&mut payload).await?;

        // Decode request. The length prefix was honored, so the stream is
        // still framed correctly and the connection can continue.
        let request: Request = match decode_message(&payload) {
            Ok(req) => req,
            Err(e) => {
                error!("Failed to decode request: {}", e);
                let response = Response::error(
                    ErrorCode::InvalidRequest,
                    format!("Failed to decode request: {}", e),
                );
                if let Err(e) = conn.send_frame(Frame::Response(response)) {
                    warn!("Dropping response to connection {}: {}", conn.id(), e);
                }
                continue;
            }
        };

        // Handle request and reply over the same queue that carries pushed
        // events, keeping the outbound stream ordered.
        let response = handler.handle(request, conn).await;
        if let Err(e) = conn.send_frame(Frame::Response(response)) {
            warn!("Dropping response to connection {}: {}", conn.id(), e);
        }
    }
}

/// Write loop: drain the connection's frame queue onto the socket
async fn write_frames(mut write_half: OwnedWriteHalf, mut rx: mpsc::Receiver<Frame>) {
    while let Some(frame) = rx.recv().await {
        let encoded = match encode_message(&frame) {
            Ok(encoded) => encoded,
            Err(e) => {
                error!("Failed to encode frame: {}", e);
                continue;
            }
        };
        if write_half.write_all(&encoded).await.is_err() {
            break;
        }
        if write_half.flush().await.is_err() {
            break;
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::dispatch::registry::ConnectionRegistry;
    use crate::store::{MemoryDriverStore, MemoryRequestStore};

    fn test_server(socket_path: PathBuf) -> (DispatchServer, broadcast::Sender<()>) {
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
        let (shutdown_tx, _) = broadcast::channel(1);
        let handler = Arc::new(RequestHandler::new(
            engine.clone(),
            channel.clone(),
            shutdown_tx.clone(),
        ));

        (
            DispatchServer::new(socket_path, handler, engine, channel, 16),
            shutdown_tx,
        )
    }

    #[tokio::test]
    async fn test_ping_over_socket() {
        let dir = tempfile::tempdir().unwrap();
        let socket_path = dir.path().join("taxihubd.sock");
        let (server, shutdown_tx) = test_server(socket_path.clone());

        let server_task = tokio::spawn(async move {
            let shutdown_rx = shutdown_tx.subscribe();
            let result = server.run(shutdown_rx).await;
            let _ = shutdown_tx;
            result
        });

        // Wait for the socket to appear
        for _ in 0..50 {
            if socket_path.exists() {
                break;
            }
            tokio::time::sleep(std::time::Duration::from_millis(10)).await;
        }

        let mut stream = UnixStream::connect(&socket_path).await.unwrap();
        let encoded = encode_message(&Request::Ping).unwrap();
        stream.write_all(&encoded).await.unwrap();

        let mut len_buf = [0u8; 4];
        stream.read_exact(&mut len_buf).await.unwrap();
        let mut payload = vec![0u8; u32::from_le_bytes(len_buf) as usize];
        stream.read_exact(&mut payload).await.unwrap();

        let frame: Frame = decode_message(&payload).unwrap();
        assert!(matches!(frame, Frame::Response(Response::Pong)));

        server_task.abort();
    }
}
