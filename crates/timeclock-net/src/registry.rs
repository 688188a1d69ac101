//! Authoritative terminal list and session lifecycle supervision.
//!
//! The registry owns the configured terminal set and at most one live
//! session per terminal. State transitions for a single terminal are
//! serialized behind its `watch` channel: concurrent `connect` calls
//! coalesce on the first attempt's outcome instead of racing sockets.
//! Different terminals never share a lock across an attempt, so a slow
//! endpoint cannot stall the rest of the fleet.
//!
//! Recovery is supervised: when a session reports an unexpected exit,
//! the registry schedules exactly one retry task with a fixed backoff
//! per terminal. The task is cancelled when the terminal is explicitly
//! disconnected or removed, so no orphaned timer ever references a
//! deleted device. Explicit disconnects never trigger recovery.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::collections::HashMap;
use std::sync::Arc;
use std::time::Duration;
use thiserror::Error;
use tokio::sync::{Mutex, mpsc, watch};
use tokio::task::JoinHandle;
use tracing::{debug, info, warn};

use timeclock_core::{
    ConnectionState, DeviceId, SharedSecret, constants::DEFAULT_RECONNECT_BACKOFF_MS,
};
use timeclock_protocol::{CommandCode, Message, RawNotification};

use crate::session::{
    DeviceSession, SessionConfig, SessionError, SessionExit, SessionExitReason, SessionHandle,
};
use crate::transport::{TransportConfig, TransportConnection, TransportError};

/// Static configuration of one terminal
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct DeviceConfig {
    pub id: DeviceId,
    pub host: String,
    pub port: u16,

    /// Optional shared secret; when present, an `AUTH` exchange must
    /// succeed before the terminal counts as connected.
    #[serde(default)]
    pub secret: Option<SharedSecret>,
}

impl DeviceConfig {
    fn endpoint(&self) -> String {
        format!("{}:{}", self.host, self.port)
    }
}

/// Registry-level configuration
#[derive(Debug, Clone)]
pub struct RegistryConfig {
    pub transport: TransportConfig,
    pub session: SessionConfig,

    /// Fixed delay before each reconnect attempt.
    pub reconnect_backoff: Duration,

    /// Depth of the shared raw-notification channel.
    pub raw_queue_depth: usize,

    /// Depth of the status-event channel.
    pub status_queue_depth: usize,
}

impl Default for RegistryConfig {
    fn default() -> Self {
        Self {
            transport: TransportConfig::default(),
            session: SessionConfig::default(),
            reconnect_backoff: Duration::from_millis(DEFAULT_RECONNECT_BACKOFF_MS),
            raw_queue_depth: 256,
            status_queue_depth: 64,
        }
    }
}

/// Errors from registry operations
#[derive(Debug, Error)]
pub enum RegistryError {
    #[error("Device {0} is not registered")]
    DeviceNotFound(DeviceId),

    #[error("Device {0} is already registered")]
    DuplicateDevice(DeviceId),

    #[error("Device {0} is not connected")]
    DeviceNotConnected(DeviceId),

    /// A coalesced connect observed the leading attempt fail.
    #[error("Connection attempt for device {0} failed")]
    ConnectFailed(DeviceId),

    #[error("Device {0} rejected authentication")]
    AuthRejected(DeviceId),

    #[error("Transport error: {0}")]
    Transport(#[from] TransportError),

    #[error("Command failed: {0}")]
    Command(#[from] SessionError),
}

/// Status change emitted by the registry
///
/// Consumed by the daemon, which fans it out to dashboard subscribers
/// and persists the device state.
#[derive(Debug, Clone, Serialize)]
pub struct DeviceStatusEvent {
    pub device_id: DeviceId,
    pub state: ConnectionState,

    /// Human-readable cause for error/disconnect transitions.
    pub detail: Option<String>,

    pub at: DateTime<Utc>,
}

/// Read-only snapshot of one registered terminal
#[derive(Debug, Clone, Serialize)]
pub struct DeviceInfo {
    pub device_id: DeviceId,
    pub host: String,
    pub port: u16,
    pub state: ConnectionState,
    pub last_seen: Option<DateTime<Utc>>,
}

/// Channels handed out once at registry construction
pub struct RegistryEvents {
    /// Unsolicited terminal notifications from all sessions, per-device
    /// FIFO.
    pub raw_notifications: mpsc::Receiver<RawNotification>,

    /// Connection state changes.
    pub status_events: mpsc::Receiver<DeviceStatusEvent>,
}

struct DeviceEntry {
    config: DeviceConfig,
    state_tx: watch::Sender<ConnectionState>,
    session: Option<SessionHandle>,

    /// Generation of the currently installed session; session exits
    /// carrying an older epoch are stale and ignored.
    session_epoch: u64,

    reconnect: Option<JoinHandle<()>>,
    last_seen: Option<DateTime<Utc>>,
}

struct RegistryShared {
    devices: Mutex<HashMap<DeviceId, DeviceEntry>>,
    raw_tx: mpsc::Sender<RawNotification>,
    status_tx: mpsc::Sender<DeviceStatusEvent>,
    exit_tx: mpsc::UnboundedSender<SessionExit>,
    supervisor: Mutex<Option<JoinHandle<()>>>,
    config: RegistryConfig,
}

/// Owner of the terminal fleet
///
/// Cheap to clone; all clones share the same state. Call
/// [`shutdown`](DeviceRegistry::shutdown) to close every session and
/// stop supervision.
#[derive(Clone)]
pub struct DeviceRegistry {
    shared: Arc<RegistryShared>,
}

impl DeviceRegistry {
    /// Create a registry and its outbound event channels.
    pub fn new(config: RegistryConfig) -> (Self, RegistryEvents) {
        let (raw_tx, raw_rx) = mpsc::channel(config.raw_queue_depth);
        let (status_tx, status_rx) = mpsc::channel(config.status_queue_depth);
        let (exit_tx, exit_rx) = mpsc::unbounded_channel();

        let registry = DeviceRegistry {
            shared: Arc::new(RegistryShared {
                devices: Mutex::new(HashMap::new()),
                raw_tx,
                status_tx,
                exit_tx,
                supervisor: Mutex::new(None),
                config,
            }),
        };

        let supervisor = tokio::spawn(supervise(registry.clone(), exit_rx));
        if let Ok(mut slot) = registry.shared.supervisor.try_lock() {
            *slot = Some(supervisor);
        }

        (
            registry,
            RegistryEvents {
                raw_notifications: raw_rx,
                status_events: status_rx,
            },
        )
    }

    /// Register a terminal in `Disconnected` state and start a
    /// background connect attempt.
    ///
    /// A failed first attempt leaves the device `Faulted` with a retry
    /// scheduled; registration itself still succeeds.
    ///
    /// # Errors
    /// [`RegistryError::DuplicateDevice`] if the ID is already
    /// registered.
    pub async fn add_device(&self, config: DeviceConfig) -> Result<(), RegistryError> {
        let device_id = config.id;
        {
            let mut devices = self.shared.devices.lock().await;
            if devices.contains_key(&device_id) {
                return Err(RegistryError::DuplicateDevice(device_id));
            }

            let (state_tx, _) = watch::channel(ConnectionState::Disconnected);
            devices.insert(
                device_id,
                DeviceEntry {
                    config,
                    state_tx,
                    session: None,
                    session_epoch: 0,
                    reconnect: None,
                    last_seen: None,
                },
            );
        }
        info!(device_id = %device_id, "Device registered");

        let registry = self.clone();
        tokio::spawn(async move {
            if let Err(e) = registry.connect(device_id).await {
                debug!(device_id = %device_id, error = %e, "Initial connect failed");
            }
        });

        Ok(())
    }

    /// Remove a terminal, cancelling any pending reconnect and closing
    /// its session.
    pub async fn remove_device(&self, device_id: DeviceId) -> Result<(), RegistryError> {
        let session = {
            let mut devices = self.shared.devices.lock().await;
            let mut entry = devices
                .remove(&device_id)
                .ok_or(RegistryError::DeviceNotFound(device_id))?;
            if let Some(task) = entry.reconnect.take() {
                task.abort();
            }
            entry.session.take()
        };

        if let Some(handle) = session {
            handle.shutdown().await;
        }
        info!(device_id = %device_id, "Device removed");
        Ok(())
    }

    /// Connect a terminal.
    ///
    /// Transitions `Disconnected`/`Faulted` → `Connecting` → `Connected`.
    /// A call that finds the device already `Connecting` waits for that
    /// attempt's outcome instead of opening a second socket; a call that
    /// finds it `Connected` returns immediately.
    ///
    /// # Errors
    ///
    /// - [`RegistryError::DeviceNotFound`] for an unknown ID
    /// - [`RegistryError::AuthRejected`] if the shared-secret handshake
    ///   fails
    /// - [`RegistryError::Transport`] for connection-level failures; the
    ///   device is left `Faulted` with a retry scheduled
    pub async fn connect(&self, device_id: DeviceId) -> Result<(), RegistryError> {
        enum Attempt {
            Lead { config: DeviceConfig, epoch: u64 },
            Follow(watch::Receiver<ConnectionState>),
        }

        let attempt = {
            let mut devices = self.shared.devices.lock().await;
            let entry = devices
                .get_mut(&device_id)
                .ok_or(RegistryError::DeviceNotFound(device_id))?;

            match *entry.state_tx.borrow() {
                ConnectionState::Connected => return Ok(()),
                ConnectionState::Connecting => Attempt::Follow(entry.state_tx.subscribe()),
                ConnectionState::Disconnected | ConnectionState::Faulted => {
                    entry.state_tx.send_replace(ConnectionState::Connecting);
                    entry.session_epoch += 1;
                    Attempt::Lead {
                        config: entry.config.clone(),
                        epoch: entry.session_epoch,
                    }
                }
            }
        };

        match attempt {
            Attempt::Follow(mut state_rx) => loop {
                if state_rx.changed().await.is_err() {
                    return Err(RegistryError::DeviceNotFound(device_id));
                }
                match *state_rx.borrow_and_update() {
                    ConnectionState::Connected => return Ok(()),
                    ConnectionState::Connecting => {}
                    ConnectionState::Disconnected | ConnectionState::Faulted => {
                        return Err(RegistryError::ConnectFailed(device_id));
                    }
                }
            },
            Attempt::Lead { config, epoch } => {
                self.emit_status(device_id, ConnectionState::Connecting, None);

                match self.establish(&config, epoch).await {
                    Ok(handle) => self.install_session(device_id, handle).await,
                    Err(e) => {
                        self.mark_faulted(device_id, &e).await;
                        Err(e)
                    }
                }
            }
        }
    }

    /// Open the transport, spawn the session and run the AUTH handshake.
    async fn establish(
        &self,
        config: &DeviceConfig,
        epoch: u64,
    ) -> Result<SessionHandle, RegistryError> {
        let transport =
            TransportConnection::open(&config.endpoint(), self.shared.config.transport.clone())
                .await?;

        let handle = DeviceSession::spawn(
            config.id,
            epoch,
            transport,
            self.shared.raw_tx.clone(),
            self.shared.exit_tx.clone(),
            self.shared.config.session.clone(),
        );

        if let Some(secret) = &config.secret {
            let response = match handle
                .send_command(CommandCode::Auth, vec![secret.as_str().to_string()])
                .await
            {
                Ok(response) => response,
                Err(e) => {
                    handle.shutdown().await;
                    return Err(RegistryError::Command(e));
                }
            };
            if response.command != CommandCode::Ack {
                warn!(device_id = %config.id, "Terminal rejected authentication");
                handle.shutdown().await;
                return Err(RegistryError::AuthRejected(config.id));
            }
        }

        Ok(handle)
    }

    async fn install_session(
        &self,
        device_id: DeviceId,
        handle: SessionHandle,
    ) -> Result<(), RegistryError> {
        let installed = {
            let mut devices = self.shared.devices.lock().await;
            match devices.get_mut(&device_id) {
                Some(entry) if *entry.state_tx.borrow() == ConnectionState::Connecting => {
                    entry.session = Some(handle.clone());
                    entry.last_seen = Some(Utc::now());
                    entry.state_tx.send_replace(ConnectionState::Connected);
                    true
                }
                // Removed or explicitly disconnected while we were
                // connecting; discard the fresh session.
                _ => false,
            }
        };

        if installed {
            info!(device_id = %device_id, "Device connected");
            self.emit_status(device_id, ConnectionState::Connected, None);
            Ok(())
        } else {
            handle.shutdown().await;
            Err(RegistryError::ConnectFailed(device_id))
        }
    }

    async fn mark_faulted(&self, device_id: DeviceId, error: &RegistryError) {
        let mut devices = self.shared.devices.lock().await;
        if let Some(entry) = devices.get_mut(&device_id) {
            entry.state_tx.send_replace(ConnectionState::Faulted);
            self.schedule_reconnect(device_id, entry);
        }
        drop(devices);
        self.emit_status(device_id, ConnectionState::Faulted, Some(error.to_string()));
    }

    /// Close one or all sessions.
    ///
    /// Idempotent; an explicit disconnect never triggers the reconnect
    /// policy and cancels any retry already scheduled.
    pub async fn disconnect(&self, device_id: Option<DeviceId>) -> Result<(), RegistryError> {
        let explicit = device_id.is_some();
        let targets = match device_id {
            Some(id) => vec![id],
            None => {
                let devices = self.shared.devices.lock().await;
                devices.keys().copied().collect()
            }
        };

        for id in targets {
            let session = {
                let mut devices = self.shared.devices.lock().await;
                let Some(entry) = devices.get_mut(&id) else {
                    if explicit {
                        return Err(RegistryError::DeviceNotFound(id));
                    }
                    // Removed between the snapshot and now.
                    continue;
                };
                if let Some(task) = entry.reconnect.take() {
                    task.abort();
                }
                let was_connected =
                    *entry.state_tx.borrow() == ConnectionState::Connected;
                entry.state_tx.send_replace(ConnectionState::Disconnected);
                let session = entry.session.take();
                if was_connected {
                    entry.last_seen = Some(Utc::now());
                }
                session
            };

            if let Some(handle) = session {
                handle.shutdown().await;
                info!(device_id = %id, "Device disconnected");
                self.emit_status(id, ConnectionState::Disconnected, Some("requested".into()));
            }
        }
        Ok(())
    }

    /// Route a command to a terminal's live session.
    ///
    /// # Errors
    /// [`RegistryError::DeviceNotConnected`] if the terminal has no live
    /// session; command-level failures map through
    /// [`RegistryError::Command`].
    pub async fn dispatch_command(
        &self,
        device_id: DeviceId,
        command: CommandCode,
        fields: Vec<String>,
    ) -> Result<Message, RegistryError> {
        let handle = {
            let devices = self.shared.devices.lock().await;
            let entry = devices
                .get(&device_id)
                .ok_or(RegistryError::DeviceNotFound(device_id))?;
            entry
                .session
                .clone()
                .ok_or(RegistryError::DeviceNotConnected(device_id))?
        };

        let response = handle.send_command(command, fields).await?;

        let mut devices = self.shared.devices.lock().await;
        if let Some(entry) = devices.get_mut(&device_id) {
            entry.last_seen = Some(Utc::now());
        }
        Ok(response)
    }

    /// Snapshot of every registered terminal.
    pub async fn snapshot(&self) -> Vec<DeviceInfo> {
        let devices = self.shared.devices.lock().await;
        let mut infos: Vec<DeviceInfo> = devices
            .values()
            .map(|entry| DeviceInfo {
                device_id: entry.config.id,
                host: entry.config.host.clone(),
                port: entry.config.port,
                state: *entry.state_tx.borrow(),
                last_seen: entry.last_seen,
            })
            .collect();
        infos.sort_by_key(|info| info.device_id);
        infos
    }

    /// Current state of one terminal.
    pub async fn state(&self, device_id: DeviceId) -> Result<ConnectionState, RegistryError> {
        let devices = self.shared.devices.lock().await;
        devices
            .get(&device_id)
            .map(|entry| *entry.state_tx.borrow())
            .ok_or(RegistryError::DeviceNotFound(device_id))
    }

    /// Close every session and stop supervision.
    pub async fn shutdown(&self) {
        info!("Registry shutting down");
        let sessions = {
            let mut devices = self.shared.devices.lock().await;
            let mut sessions = Vec::new();
            for entry in devices.values_mut() {
                if let Some(task) = entry.reconnect.take() {
                    task.abort();
                }
                entry.state_tx.send_replace(ConnectionState::Disconnected);
                if let Some(session) = entry.session.take() {
                    sessions.push(session);
                }
            }
            sessions
        };

        for session in sessions {
            session.shutdown().await;
        }

        if let Some(task) = self.shared.supervisor.lock().await.take() {
            task.abort();
        }
    }

    /// Schedule the per-device retry task. Caller holds the device lock.
    fn schedule_reconnect(&self, device_id: DeviceId, entry: &mut DeviceEntry) {
        if entry.reconnect.is_some() {
            return;
        }
        let backoff = self.shared.config.reconnect_backoff;
        debug!(
            device_id = %device_id,
            backoff_ms = backoff.as_millis() as u64,
            "Reconnect scheduled"
        );
        entry.reconnect = Some(tokio::spawn(reconnect_loop(
            self.clone(),
            device_id,
            backoff,
        )));
    }

    fn emit_status(&self, device_id: DeviceId, state: ConnectionState, detail: Option<String>) {
        let event = DeviceStatusEvent {
            device_id,
            state,
            detail,
            at: Utc::now(),
        };
        if let Err(e) = self.shared.status_tx.try_send(event) {
            debug!(device_id = %device_id, "Status event dropped: {}", e);
        }
    }
}

/// One retry attempt per backoff period until the terminal connects or
/// is removed.
async fn reconnect_loop(registry: DeviceRegistry, device_id: DeviceId, backoff: Duration) {
    loop {
        tokio::time::sleep(backoff).await;
        match registry.connect(device_id).await {
            Ok(()) => break,
            Err(RegistryError::DeviceNotFound(_)) => return,
            Err(e) => {
                debug!(device_id = %device_id, error = %e, "Reconnect attempt failed");
            }
        }
    }

    let mut devices = registry.shared.devices.lock().await;
    if let Some(entry) = devices.get_mut(&device_id) {
        entry.reconnect = None;
    }
}

/// Consume session exits, distinguish explicit disconnects from
/// unexpected losses, and schedule recovery for the latter.
async fn supervise(registry: DeviceRegistry, mut exit_rx: mpsc::UnboundedReceiver<SessionExit>) {
    while let Some(exit) = exit_rx.recv().await {
        if exit.reason == SessionExitReason::Requested {
            continue;
        }

        let lost = {
            let mut devices = registry.shared.devices.lock().await;
            match devices.get_mut(&exit.device_id) {
                // An entry whose session was already taken was explicitly
                // disconnected; its exit needs no supervision even if the
                // socket died first.
                Some(entry) if entry.session_epoch == exit.epoch && entry.session.is_some() => {
                    entry.session = None;
                    entry.last_seen = Some(Utc::now());
                    entry.state_tx.send_replace(ConnectionState::Disconnected);
                    registry.schedule_reconnect(exit.device_id, entry);
                    true
                }
                // Stale exit from a superseded session, or the device is
                // gone; nothing to supervise.
                _ => false,
            }
        };

        if lost {
            warn!(
                device_id = %exit.device_id,
                reason = ?exit.reason,
                "Session lost unexpectedly"
            );
            registry.emit_status(
                exit.device_id,
                ConnectionState::Disconnected,
                Some(format!("{:?}", exit.reason)),
            );
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_registry_config_defaults() {
        let config = RegistryConfig::default();
        assert_eq!(config.reconnect_backoff.as_secs(), 5);
        assert_eq!(config.raw_queue_depth, 256);
    }

    #[tokio::test]
    async fn test_dispatch_to_unknown_device() {
        let (registry, _events) = DeviceRegistry::new(RegistryConfig::default());
        let result = registry
            .dispatch_command(DeviceId::new(9).unwrap(), CommandCode::Ping, vec![])
            .await;
        assert!(matches!(result, Err(RegistryError::DeviceNotFound(_))));
    }

    #[tokio::test]
    async fn test_duplicate_registration_rejected() {
        let (registry, _events) = DeviceRegistry::new(RegistryConfig::default());
        let config = DeviceConfig {
            id: DeviceId::new(7).unwrap(),
            host: "127.0.0.1".to_string(),
            port: 1, // nothing listens; initial connect just faults
            secret: None,
        };

        registry.add_device(config.clone()).await.unwrap();
        let result = registry.add_device(config).await;
        assert!(matches!(result, Err(RegistryError::DuplicateDevice(_))));

        registry.shutdown().await;
    }

    #[tokio::test]
    async fn test_disconnect_unknown_device() {
        let (registry, _events) = DeviceRegistry::new(RegistryConfig::default());
        let result = registry.disconnect(Some(DeviceId::new(3).unwrap())).await;
        assert!(matches!(result, Err(RegistryError::DeviceNotFound(_))));
    }
}
