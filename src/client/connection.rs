//! Client Connection
//!
//! Handles the Unix socket connection to the daemon. The daemon stream is
//! bidirectional: replies and pushed dispatch events arrive interleaved as
//! frames, so the client buffers events that land while an RPC reply is
//! being awaited.

use std::collections::VecDeque;
use std::path::PathBuf;

use tokio::io::{AsyncReadExt, AsyncWriteExt};
use tokio::net::UnixStream;
use tracing::debug;

use crate::config::Config;
use crate::dispatch::events::DispatchEvent;
use crate::dispatch::protocol::{
    decode_message, encode_message, Frame, Request, Response, MAX_MESSAGE_SIZE,
};

use super::ClientError;

/// Client connection to the daemon
pub struct DaemonClient {
    stream: UnixStream,
    pending_events: VecDeque<DispatchEvent>,
}

impl DaemonClient {
    /// Connect to the daemon at the default socket path
    pub async fn connect() -> Result<Self, ClientError> {
        Self::connect_to(Config::default().socket_path()).await
    }

    /// Connect to the daemon at a specific socket path
    pub async fn connect_to(socket_path: PathBuf) -> Result<Self, ClientError> {
        debug!("Connecting to daemon at: {}", socket_path.display());

        let stream = UnixStream::connect(&socket_path).await.map_err(|e| {
            if e.kind() == std::io::ErrorKind::NotFound
                || e.kind() == std::io::ErrorKind::ConnectionRefused
            {
                ClientError::DaemonNotRunning
            } else {
                ClientError::ConnectionFailed(e.to_string())
            }
        })?;

        debug!("Connected to daemon");
        Ok(Self {
            stream,
            pending_events: VecDeque::new(),
        })
    }

    /// Send a request and receive its response.
    ///
    /// Dispatch events that arrive before the reply are buffered for
    /// [`next_event`](Self::next_event).
    pub async fn send(&mut self, request: Request) -> Result<Response, ClientError> {
        let encoded = encode_message(&request)
            .map_err(|e| ClientError::RequestFailed(format!("Failed to encode request: {}", e)))?;

        self.stream
            .write_all(&encoded)
            .await
            .map_err(|e| ClientError::RequestFailed(format!("Failed to send request: {}", e)))?;

        self.stream
            .flush()
            .await
            .map_err(|e| ClientError::RequestFailed(format!("Failed to flush: {}", e)))?;

        loop {
            match self.read_frame().await? {
                Frame::Response(response) => return Ok(response),
                Frame::Event(event) => self.pending_events.push_back(event),
            }
        }
    }

    /// Receive the next pushed dispatch event, waiting if none is buffered
    pub async fn next_event(&mut self) -> Result<DispatchEvent, ClientError> {
        if let Some(event) = self.pending_events.pop_front() {
            return Ok(event);
        }

        match self.read_frame().await? {
            Frame::Event(event) => Ok(event),
            Frame::Response(_) => Err(ClientError::UnexpectedResponse),
        }
    }

    /// Read a single frame off the stream
    async fn read_frame(&mut self) -> Result<Frame, ClientError> {
        let mut len_buf = [0u8; 4];
        self.stream.read_exact(&mut len_buf).await.map_err(|e| {
            ClientError::RequestFailed(format!("Failed to read frame length: {}", e))
        })?;

        let msg_len = u32::from_le_bytes(len_buf) as usize;
        if msg_len > MAX_MESSAGE_SIZE {
            return Err(ClientError::RequestFailed(format!(
                "Frame too large: {} bytes",
                msg_len
            )));
        }

        let mut payload = vec![0u8; msg_len];
        self.stream
            .read_exact(&mut payload)
            .await
            .map_err(|e| ClientError::RequestFailed(format!("Failed to read frame: {}", e)))?;

        decode_message(&payload)
            .map_err(|e| ClientError::RequestFailed(format!("Failed to decode frame: {}", e)))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn test_connect_when_not_running() {
        // Should fail gracefully when daemon is not running
        let result = DaemonClient::connect_to(PathBuf::from("/tmp/taxihub-test-no-daemon.sock")).await;
        assert!(matches!(result, Err(ClientError::DaemonNotRunning)));
    }
}
