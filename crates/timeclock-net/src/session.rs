//! Correlated command/response exchange with one terminal.
//!
//! A session owns exactly one [`TransportConnection`] inside a dispatch
//! loop task. The loop is the only writer of the socket; callers submit
//! commands through an mpsc channel, so concurrent callers never race on
//! the wire. Each command gets a fresh correlation sequence and a
//! oneshot waiter; inbound frames are classified as:
//!
//! - response to a pending sequence → delivered to the waiter
//! - unsolicited notification (sequence 0000) → forwarded to the
//!   ingestion pipeline as a [`RawNotification`]
//! - unparseable → logged and dropped, the loop keeps running
//!
//! When no traffic has been seen for a heartbeat interval the loop sends
//! a `PING`; a second silent interval is treated exactly like a closed
//! connection. On any exit the loop fails every pending waiter with
//! [`SessionError::SessionClosed`] and reports a [`SessionExit`] so the
//! registry can decide on recovery.

use std::collections::HashMap;
use std::time::Duration;
use thiserror::Error;
use tokio::sync::{mpsc, oneshot};
use tokio::time::{Instant, MissedTickBehavior};
use tracing::{debug, info, trace, warn};

use timeclock_core::{
    DeviceId,
    constants::{DEFAULT_COMMAND_TIMEOUT_MS, DEFAULT_HEARTBEAT_INTERVAL_MS, MAX_SEQUENCE},
};
use timeclock_protocol::{CommandCode, Message, RawNotification, Sequence};

use crate::transport::{TransportConnection, TransportError};

/// Configuration for a device session
#[derive(Debug, Clone)]
pub struct SessionConfig {
    /// Round-trip budget for one command.
    pub command_timeout: Duration,

    /// Silence threshold before a keepalive `PING` is sent.
    pub heartbeat_interval: Duration,

    /// Depth of the inbound command queue.
    pub request_queue_depth: usize,
}

impl Default for SessionConfig {
    fn default() -> Self {
        Self {
            command_timeout: Duration::from_millis(DEFAULT_COMMAND_TIMEOUT_MS),
            heartbeat_interval: Duration::from_millis(DEFAULT_HEARTBEAT_INTERVAL_MS),
            request_queue_depth: 32,
        }
    }
}

/// Errors surfaced to command callers
#[derive(Debug, Clone, Error, PartialEq, Eq)]
pub enum SessionError {
    /// No correlated response arrived within the command timeout.
    #[error("Command timeout after {0}ms")]
    CommandTimeout(u64),

    /// The session ended while the command was pending.
    #[error("Session closed")]
    SessionClosed,

    /// The command could not be written.
    #[error("Transport error: {0}")]
    Transport(String),
}

/// Why a session's dispatch loop ended
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SessionExitReason {
    /// Explicit shutdown through the handle.
    Requested,

    /// The transport reported a fatal error (peer closed, read timeout,
    /// write failure).
    ConnectionLost,

    /// A keepalive went unanswered for a full heartbeat interval.
    HeartbeatMissed,
}

/// Report sent to the registry when a dispatch loop terminates
#[derive(Debug, Clone)]
pub struct SessionExit {
    pub device_id: DeviceId,

    /// Generation counter assigned by the registry; lets it ignore exits
    /// from sessions it has already replaced.
    pub epoch: u64,

    pub reason: SessionExitReason,
}

enum SessionRequest {
    Command {
        command: CommandCode,
        fields: Vec<String>,
        respond_to: oneshot::Sender<Result<Message, SessionError>>,
    },
    Shutdown,
}

/// Cloneable handle to a running session
///
/// Dropping every handle shuts the session down (the request channel
/// closes and the dispatch loop exits).
#[derive(Clone)]
pub struct SessionHandle {
    device_id: DeviceId,
    request_tx: mpsc::Sender<SessionRequest>,
    command_timeout: Duration,
}

impl SessionHandle {
    /// Issue a command and wait for its correlated response.
    ///
    /// Concurrent callers are multiplexed by sequence; a timeout on one
    /// command does not disturb others issued before or after it.
    ///
    /// # Errors
    ///
    /// - [`SessionError::CommandTimeout`] if no response arrives in time
    /// - [`SessionError::SessionClosed`] if the session ends first
    /// - [`SessionError::Transport`] if the write fails
    pub async fn send_command(
        &self,
        command: CommandCode,
        fields: Vec<String>,
    ) -> Result<Message, SessionError> {
        let (respond_to, response) = oneshot::channel();

        self.request_tx
            .send(SessionRequest::Command {
                command,
                fields,
                respond_to,
            })
            .await
            .map_err(|_| SessionError::SessionClosed)?;

        match tokio::time::timeout(self.command_timeout, response).await {
            Ok(Ok(result)) => result,
            // Waiter dropped during teardown.
            Ok(Err(_)) => Err(SessionError::SessionClosed),
            Err(_) => Err(SessionError::CommandTimeout(
                self.command_timeout.as_millis() as u64,
            )),
        }
    }

    /// Request an orderly shutdown of the dispatch loop.
    pub async fn shutdown(&self) {
        let _ = self.request_tx.send(SessionRequest::Shutdown).await;
    }

    /// Whether the dispatch loop has terminated.
    pub fn is_closed(&self) -> bool {
        self.request_tx.is_closed()
    }

    /// Terminal this session talks to.
    pub fn device_id(&self) -> DeviceId {
        self.device_id
    }
}

/// Factory for session dispatch loops
pub struct DeviceSession;

impl DeviceSession {
    /// Spawn the dispatch loop for an established transport connection.
    ///
    /// `epoch` is echoed back in the [`SessionExit`] report so the
    /// registry can match exits to the session generation it installed.
    pub fn spawn(
        device_id: DeviceId,
        epoch: u64,
        transport: TransportConnection,
        raw_tx: mpsc::Sender<RawNotification>,
        exit_tx: mpsc::UnboundedSender<SessionExit>,
        config: SessionConfig,
    ) -> SessionHandle {
        let (request_tx, request_rx) = mpsc::channel(config.request_queue_depth);
        let command_timeout = config.command_timeout;

        tokio::spawn(dispatch_loop(
            device_id, epoch, transport, request_rx, raw_tx, exit_tx, config,
        ));

        SessionHandle {
            device_id,
            request_tx,
            command_timeout,
        }
    }
}

async fn dispatch_loop(
    device_id: DeviceId,
    epoch: u64,
    mut transport: TransportConnection,
    mut request_rx: mpsc::Receiver<SessionRequest>,
    raw_tx: mpsc::Sender<RawNotification>,
    exit_tx: mpsc::UnboundedSender<SessionExit>,
    config: SessionConfig,
) {
    let mut pending: HashMap<u16, oneshot::Sender<Result<Message, SessionError>>> = HashMap::new();
    let mut next_sequence: u16 = 0;
    let mut last_traffic = Instant::now();
    let mut ping_outstanding = false;

    let mut heartbeat = tokio::time::interval_at(
        Instant::now() + config.heartbeat_interval,
        config.heartbeat_interval,
    );
    heartbeat.set_missed_tick_behavior(MissedTickBehavior::Delay);

    info!(device_id = %device_id, "Session dispatch loop started");

    let reason = loop {
        tokio::select! {
            maybe_request = request_rx.recv() => match maybe_request {
                Some(SessionRequest::Command { command, fields, respond_to }) => {
                    next_sequence = next_sequence % MAX_SEQUENCE + 1;
                    let sequence = Sequence::new(next_sequence)
                        .expect("sequence stays within wire range");

                    let message = match Message::new(device_id, sequence, command, fields) {
                        Ok(message) => message,
                        Err(e) => {
                            let _ = respond_to.send(Err(SessionError::Transport(e.to_string())));
                            continue;
                        }
                    };

                    match transport.send(message).await {
                        Ok(()) => {
                            // Replacing a waiter after a full sequence wrap
                            // drops the stale one, which reads as SessionClosed
                            // to a caller that has long since timed out.
                            pending.insert(next_sequence, respond_to);
                        }
                        Err(e) if e.is_fatal() => {
                            let _ = respond_to.send(Err(SessionError::Transport(e.to_string())));
                            warn!(device_id = %device_id, error = %e, "Write failed, closing session");
                            break SessionExitReason::ConnectionLost;
                        }
                        Err(e) => {
                            let _ = respond_to.send(Err(SessionError::Transport(e.to_string())));
                        }
                    }
                }
                Some(SessionRequest::Shutdown) | None => {
                    debug!(device_id = %device_id, "Session shutdown requested");
                    break SessionExitReason::Requested;
                }
            },

            result = transport.receive() => match result {
                Ok(message) => {
                    last_traffic = Instant::now();
                    ping_outstanding = false;

                    if message.is_notification() {
                        trace!(device_id = %device_id, command = %message.command, "Notification received");
                        if raw_tx
                            .send(RawNotification::new(device_id, message))
                            .await
                            .is_err()
                        {
                            debug!(device_id = %device_id, "Ingestion channel closed, notification dropped");
                        }
                    } else if let Some(waiter) = pending.remove(&message.sequence.as_u16()) {
                        let _ = waiter.send(Ok(message));
                    } else {
                        // Late reply for a caller that already timed out,
                        // or a PING acknowledgement.
                        trace!(
                            device_id = %device_id,
                            sequence = %message.sequence,
                            "Response with no pending waiter"
                        );
                    }
                }
                Err(TransportError::Protocol(e)) => {
                    warn!(device_id = %device_id, error = %e, "Unparseable frame dropped");
                }
                Err(e) => {
                    warn!(device_id = %device_id, error = %e, "Transport failed, closing session");
                    break SessionExitReason::ConnectionLost;
                }
            },

            _ = heartbeat.tick() => {
                if last_traffic.elapsed() < config.heartbeat_interval {
                    continue;
                }
                if ping_outstanding {
                    warn!(device_id = %device_id, "Keepalive unanswered, closing session");
                    break SessionExitReason::HeartbeatMissed;
                }

                next_sequence = next_sequence % MAX_SEQUENCE + 1;
                let sequence = Sequence::new(next_sequence)
                    .expect("sequence stays within wire range");
                let ping = Message::ping(device_id, sequence);

                trace!(device_id = %device_id, sequence = %sequence, "Sending keepalive");
                match transport.send(ping).await {
                    Ok(()) => ping_outstanding = true,
                    Err(e) if e.is_fatal() => {
                        warn!(device_id = %device_id, error = %e, "Keepalive write failed, closing session");
                        break SessionExitReason::ConnectionLost;
                    }
                    Err(_) => {}
                }
            }
        }
    };

    transport.close().await;

    // Every pending command fails immediately; nothing waits out its
    // full timeout against a dead session.
    let cancelled = pending.len();
    for (_, waiter) in pending.drain() {
        let _ = waiter.send(Err(SessionError::SessionClosed));
    }
    if cancelled > 0 {
        debug!(device_id = %device_id, cancelled, "Cancelled pending commands");
    }

    info!(device_id = %device_id, reason = ?reason, "Session dispatch loop ended");
    let _ = exit_tx.send(SessionExit {
        device_id,
        epoch,
        reason,
    });
}
