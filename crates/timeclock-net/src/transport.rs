//! Byte-level transport to one terminal endpoint.
//!
//! [`TransportConnection`] owns a single TCP socket wrapped in the
//! protocol codec and enforces every connection-level timeout: connect,
//! write, and idle-read. It knows nothing about correlation or
//! notification semantics; that lives in the session layer.
//!
//! # Design Principles
//!
//! - **No automatic retry**: recovery is the registry's job
//! - **No connection pooling**: one connection per terminal
//! - **Fail closed**: every timeout is an error, never a hang
//!
//! # Timeout Handling
//!
//! The idle-read timeout doubles as the dead-peer detector: if nothing
//! arrives for the configured window (default 75 s, two missed
//! heartbeats) the connection reports [`TransportError::ReadTimeout`]
//! and the session starts recovery instead of waiting forever.

use futures::{SinkExt, StreamExt};
use std::time::Duration;
use thiserror::Error;
use tokio::io::AsyncWriteExt;
use tokio::net::TcpStream;
use tokio_util::codec::Framed;
use tracing::{debug, info, trace, warn};

use timeclock_core::constants::{
    DEFAULT_CONNECT_TIMEOUT_MS, DEFAULT_IDLE_TIMEOUT_MS,
};
use timeclock_protocol::{Message, TerminalCodec};

/// Bound on flush/shutdown during close so an unresponsive network
/// cannot hang teardown.
const CLOSE_TIMEOUT: Duration = Duration::from_millis(500);

/// Configuration for a transport connection
#[derive(Debug, Clone)]
pub struct TransportConfig {
    /// Timeout for establishing the TCP connection.
    pub connect_timeout: Duration,

    /// Maximum silence on the socket before the connection is considered
    /// dead.
    pub idle_timeout: Duration,

    /// Timeout for a single framed write.
    pub write_timeout: Duration,
}

impl Default for TransportConfig {
    fn default() -> Self {
        Self {
            connect_timeout: Duration::from_millis(DEFAULT_CONNECT_TIMEOUT_MS),
            idle_timeout: Duration::from_millis(DEFAULT_IDLE_TIMEOUT_MS),
            write_timeout: Duration::from_millis(DEFAULT_CONNECT_TIMEOUT_MS),
        }
    }
}

/// Errors from transport operations
#[derive(Debug, Error)]
pub enum TransportError {
    /// Connection attempt timed out.
    #[error("Connect timeout after {0}ms")]
    ConnectTimeout(u64),

    /// Endpoint actively refused the connection.
    #[error("Connection refused by {0}")]
    ConnectRefused(String),

    /// No route to the endpoint.
    #[error("Network unreachable: {0}")]
    NetworkUnreachable(String),

    /// Nothing arrived within the idle window.
    #[error("Read timeout after {0}ms")]
    ReadTimeout(u64),

    /// Write failed or timed out; the socket state is unknown.
    #[error("Write failed: {0}")]
    WriteError(String),

    /// Peer closed the connection.
    #[error("Connection closed by peer")]
    ConnectionClosed,

    /// Frame-level protocol violation; the connection itself may still
    /// be usable.
    #[error("Protocol error: {0}")]
    Protocol(#[from] timeclock_core::Error),

    /// Low-level I/O error.
    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),
}

impl TransportError {
    /// Whether the error means the connection is unusable.
    ///
    /// [`Protocol`](TransportError::Protocol) errors describe one bad
    /// frame; everything else condemns the connection.
    pub fn is_fatal(&self) -> bool {
        !matches!(self, TransportError::Protocol(_))
    }
}

/// One TCP connection to one terminal
///
/// # Connection Lifecycle
///
/// 1. [`open`](TransportConnection::open) establishes the connection
/// 2. [`send`](TransportConnection::send) / [`receive`](TransportConnection::receive)
///    exchange framed messages
/// 3. [`close`](TransportConnection::close) releases the socket; safe to
///    call any number of times
///
/// Not `Sync` by design: exactly one session task owns each connection.
pub struct TransportConnection {
    /// Endpoint as configured (`host:port`).
    peer: String,

    /// Framed stream; `None` once closed.
    framed: Option<Framed<TcpStream, TerminalCodec>>,

    config: TransportConfig,
}

impl TransportConnection {
    /// Connect to a terminal endpoint.
    ///
    /// The stream is configured with TCP_NODELAY: attendance round trips
    /// sit directly in the badge-to-feedback path and must not wait on
    /// Nagle batching.
    ///
    /// # Errors
    ///
    /// - [`TransportError::ConnectTimeout`] if the endpoint does not
    ///   answer within the configured window
    /// - [`TransportError::ConnectRefused`] / [`TransportError::NetworkUnreachable`]
    ///   mapped from the socket error
    pub async fn open(peer: &str, config: TransportConfig) -> Result<Self, TransportError> {
        info!("Connecting to terminal at {}", peer);

        let stream =
            match tokio::time::timeout(config.connect_timeout, TcpStream::connect(peer)).await {
                Ok(Ok(stream)) => stream,
                Ok(Err(e)) => {
                    warn!("Connection to {} failed: {}", peer, e);
                    return Err(Self::map_connect_error(peer, e));
                }
                Err(_) => {
                    warn!(
                        "Connect timeout to {} after {}ms",
                        peer,
                        config.connect_timeout.as_millis()
                    );
                    return Err(TransportError::ConnectTimeout(
                        config.connect_timeout.as_millis() as u64,
                    ));
                }
            };

        if let Err(e) = stream.set_nodelay(true) {
            warn!("Failed to set TCP_NODELAY for {}: {}", peer, e);
        }

        debug!("Connected to {}", peer);
        Ok(Self {
            peer: peer.to_string(),
            framed: Some(Framed::new(stream, TerminalCodec::new())),
            config,
        })
    }

    fn map_connect_error(peer: &str, e: std::io::Error) -> TransportError {
        match e.kind() {
            std::io::ErrorKind::ConnectionRefused => {
                TransportError::ConnectRefused(peer.to_string())
            }
            std::io::ErrorKind::NetworkUnreachable | std::io::ErrorKind::HostUnreachable => {
                TransportError::NetworkUnreachable(peer.to_string())
            }
            _ => TransportError::Io(e),
        }
    }

    /// Send one message.
    ///
    /// The frame is written atomically with respect to other frames: the
    /// codec buffers the whole frame before flushing.
    ///
    /// # Errors
    /// [`TransportError::WriteError`] if the socket is closed, resets
    /// mid-write, or the write times out.
    pub async fn send(&mut self, message: Message) -> Result<(), TransportError> {
        let framed = self
            .framed
            .as_mut()
            .ok_or(TransportError::ConnectionClosed)?;

        trace!(
            device_id = %message.device_id,
            sequence = %message.sequence,
            command = %message.command,
            "Sending frame"
        );

        match tokio::time::timeout(self.config.write_timeout, framed.send(message)).await {
            Ok(Ok(())) => Ok(()),
            Ok(Err(timeclock_core::Error::Io(io))) => {
                self.framed = None;
                Err(TransportError::WriteError(io.to_string()))
            }
            // Encode-level rejection (e.g. oversized frame): the socket
            // is untouched and stays usable.
            Ok(Err(e)) => Err(TransportError::Protocol(e)),
            Err(_) => {
                self.framed = None;
                Err(TransportError::WriteError(format!(
                    "write timeout after {}ms",
                    self.config.write_timeout.as_millis()
                )))
            }
        }
    }

    /// Receive the next complete frame.
    ///
    /// Blocks until a frame arrives, the idle window elapses, or the
    /// peer disconnects.
    ///
    /// # Errors
    ///
    /// - [`TransportError::ReadTimeout`] after the idle window
    /// - [`TransportError::ConnectionClosed`] when the peer disconnects
    /// - [`TransportError::Protocol`] for an unparseable frame; the
    ///   connection stays usable and the caller may keep reading
    pub async fn receive(&mut self) -> Result<Message, TransportError> {
        let idle = self.config.idle_timeout;
        let framed = self
            .framed
            .as_mut()
            .ok_or(TransportError::ConnectionClosed)?;

        match tokio::time::timeout(idle, framed.next()).await {
            Ok(Some(Ok(message))) => {
                trace!(
                    device_id = %message.device_id,
                    sequence = %message.sequence,
                    command = %message.command,
                    "Received frame"
                );
                Ok(message)
            }
            Ok(Some(Err(e))) => Err(TransportError::Protocol(e)),
            Ok(None) => {
                debug!("Peer {} closed the connection", self.peer);
                self.framed = None;
                Err(TransportError::ConnectionClosed)
            }
            Err(_) => {
                warn!(
                    "No traffic from {} within {}ms",
                    self.peer,
                    idle.as_millis()
                );
                self.framed = None;
                Err(TransportError::ReadTimeout(idle.as_millis() as u64))
            }
        }
    }

    /// Whether the connection is still open.
    pub fn is_open(&self) -> bool {
        self.framed.is_some()
    }

    /// Endpoint this connection points at.
    pub fn peer(&self) -> &str {
        &self.peer
    }

    /// Close the connection.
    ///
    /// Idempotent. Flush and shutdown are each bounded so teardown never
    /// hangs on a dead network.
    pub async fn close(&mut self) {
        if let Some(mut framed) = self.framed.take() {
            debug!("Closing connection to {}", self.peer);

            if let Ok(Err(e)) = tokio::time::timeout(CLOSE_TIMEOUT, framed.flush()).await {
                debug!("Flush error during close: {}", e);
            }

            let mut stream = framed.into_inner();
            if let Ok(Err(e)) = tokio::time::timeout(CLOSE_TIMEOUT, stream.shutdown()).await {
                debug!("Shutdown error during close: {}", e);
            }
        }
    }
}
