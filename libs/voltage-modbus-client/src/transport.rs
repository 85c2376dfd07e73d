//! Transport abstraction
//!
//! The worker talks to the network only through [`Transport`]. The trait
//! exposes a connect/stop pair, a connection probe, a non-blocking read of
//! whatever bytes are already buffered, and an ordered write + flush.
//! [`TcpTransport`] implements it on a tokio `TcpStream`.

use std::io::ErrorKind;
use std::time::Duration;

use async_trait::async_trait;
use tokio::io::AsyncWriteExt;
use tokio::net::TcpStream;
use tokio::time::timeout;
use tracing::{debug, error, info, warn};

use crate::error::{TransportError, TransportResult};

/// Byte stream to a Modbus server
#[async_trait]
pub trait Transport: Send {
    /// Open a connection, replacing any existing one
    async fn connect(&mut self, host: &str, port: u16, timeout: Duration) -> TransportResult<()>;

    /// Close the connection; no-op when closed
    async fn stop(&mut self);

    fn is_connected(&self) -> bool;

    /// Read bytes that have already arrived
    ///
    /// Returns `Ok(0)` when nothing is pending. A closed peer is an error
    /// and leaves the transport disconnected.
    fn try_read(&mut self, buf: &mut [u8]) -> TransportResult<usize>;

    async fn write_all(&mut self, data: &[u8]) -> TransportResult<()>;

    async fn flush(&mut self) -> TransportResult<()>;
}

/// Transport over a tokio TCP stream
#[derive(Debug, Default)]
pub struct TcpTransport {
    stream: Option<TcpStream>,
    peer: Option<String>,
}

impl TcpTransport {
    pub fn new() -> Self {
        Self::default()
    }

    fn stream_mut(&mut self) -> TransportResult<&mut TcpStream> {
        self.stream.as_mut().ok_or(TransportError::NotConnected)
    }

    fn drop_stream(&mut self, reason: &str) {
        if self.stream.take().is_some() {
            warn!(
                "TCP closed: {} ({})",
                self.peer.as_deref().unwrap_or("-"),
                reason
            );
        }
    }
}

#[async_trait]
impl Transport for TcpTransport {
    async fn connect(&mut self, host: &str, port: u16, timeout_duration: Duration) -> TransportResult<()> {
        self.stream = None;
        let addr = format!("{host}:{port}");
        debug!("TCP connecting: {}", addr);

        match timeout(timeout_duration, TcpStream::connect(&addr)).await {
            Ok(Ok(stream)) => {
                if let Err(e) = stream.set_nodelay(true) {
                    debug!("TCP_NODELAY: {}", e);
                }
                info!("TCP connected: {}", addr);
                self.stream = Some(stream);
                self.peer = Some(addr);
                Ok(())
            },
            Ok(Err(e)) => {
                error!("TCP err: {} - {}", addr, e);
                Err(TransportError::ConnectionFailed(format!(
                    "Failed to connect to {addr}: {e}"
                )))
            },
            Err(_) => {
                warn!("TCP timeout: {}", addr);
                Err(TransportError::Timeout(format!(
                    "Connection to {addr} timed out"
                )))
            },
        }
    }

    async fn stop(&mut self) {
        if let Some(mut stream) = self.stream.take() {
            if let Err(e) = stream.shutdown().await {
                debug!("TCP shutdown: {}", e);
            }
            debug!("Disconnected: {}", self.peer.as_deref().unwrap_or("-"));
        }
    }

    fn is_connected(&self) -> bool {
        self.stream.is_some()
    }

    fn try_read(&mut self, buf: &mut [u8]) -> TransportResult<usize> {
        let stream = self.stream_mut()?;
        match stream.try_read(buf) {
            Ok(0) if !buf.is_empty() => {
                self.drop_stream("peer closed");
                Err(TransportError::ConnectionLost("Peer closed connection".to_string()))
            },
            Ok(n) => Ok(n),
            Err(e) if e.kind() == ErrorKind::WouldBlock => Ok(0),
            Err(e) => {
                error!("TCP RX: {}", e);
                self.drop_stream("read error");
                Err(e.into())
            },
        }
    }

    async fn write_all(&mut self, data: &[u8]) -> TransportResult<()> {
        let result = self.stream_mut()?.write_all(data).await;
        match result {
            Ok(()) => {
                debug!("TCP TX: {}B", data.len());
                Ok(())
            },
            Err(e) => {
                error!("TCP TX: {}", e);
                self.drop_stream("write error");
                Err(e.into())
            },
        }
    }

    async fn flush(&mut self) -> TransportResult<()> {
        let result = self.stream_mut()?.flush().await;
        result.map_err(|e| {
            error!("TCP flush: {}", e);
            TransportError::from(e)
        })
    }
}
