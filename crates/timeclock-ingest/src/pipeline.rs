//! The ingestion pipeline task.

use serde::Serialize;
use std::time::Duration;
use thiserror::Error;
use tokio::sync::{mpsc, oneshot};
use tokio::task::JoinHandle;
use tracing::{debug, info, warn};

use chrono::{DateTime, Utc};
use timeclock_broadcast::{BroadcastHub, BroadcastMessage, MessageKind};
use timeclock_core::{
    AttendanceEvent, DeviceId, WireTimestamp,
    constants::{
        DEFAULT_DEDUPE_WINDOW_SECS, DEFAULT_PERSIST_ATTEMPTS, DEFAULT_PERSIST_BACKOFF_MS,
    },
};
use timeclock_net::{DeviceRegistry, RegistryError};
use timeclock_protocol::{
    AttendanceNotification, CommandCode, RawNotification, parse_log_batch,
};

use crate::classify::ShiftSchedule;
use crate::dedupe::DedupeCache;
use crate::gateway::{GatewayError, PersistenceGateway};

/// Pipeline configuration
#[derive(Debug, Clone)]
pub struct IngestConfig {
    /// Duplicate suppression window.
    pub dedupe_window: Duration,

    /// Persistence attempts before an event is dropped.
    pub persist_attempts: u32,

    /// Backoff between persistence attempts.
    pub persist_backoff: Duration,

    /// Fallback classification when terminals omit the kind flag.
    pub schedule: ShiftSchedule,
}

impl Default for IngestConfig {
    fn default() -> Self {
        Self {
            dedupe_window: Duration::from_secs(DEFAULT_DEDUPE_WINDOW_SECS as u64),
            persist_attempts: DEFAULT_PERSIST_ATTEMPTS,
            persist_backoff: Duration::from_millis(DEFAULT_PERSIST_BACKOFF_MS),
            schedule: ShiftSchedule::default(),
        }
    }
}

/// Errors from ingestion operations
#[derive(Debug, Error)]
pub enum IngestError {
    /// Unparseable or undersized notification; the record is dropped and
    /// the pipeline continues.
    #[error("Malformed notification: {0}")]
    MalformedNotification(String),

    #[error("Registry error: {0}")]
    Registry(#[from] RegistryError),

    /// The pipeline task is no longer running.
    #[error("Ingestion pipeline closed")]
    PipelineClosed,
}

/// What happened to one admitted event
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum IngestOutcome {
    /// Persisted and broadcast.
    Persisted,
    /// Suppressed as a duplicate; not re-persisted, not re-broadcast.
    Duplicate,
    /// Persistence retries exhausted; alert raised, event dropped.
    Dropped,
}

/// Running counters, exposed through the handle
#[derive(Debug, Default, Clone, Serialize)]
pub struct IngestStats {
    pub persisted: u64,
    pub duplicates: u64,
    pub malformed: u64,
    pub dropped: u64,
}

/// Result of one bulk resynchronization
#[derive(Debug, Clone, Serialize)]
pub struct SyncReport {
    pub device_id: DeviceId,
    pub received: usize,
    pub persisted: usize,
    pub duplicates: usize,
    pub dropped: usize,
}

enum Control {
    Sync {
        device_id: DeviceId,
        range: (DateTime<Utc>, DateTime<Utc>),
        respond_to: oneshot::Sender<Result<SyncReport, IngestError>>,
    },
    Stats {
        respond_to: oneshot::Sender<IngestStats>,
    },
}

/// Handle to a spawned pipeline
#[derive(Clone)]
pub struct IngestHandle {
    control_tx: mpsc::Sender<Control>,
}

impl IngestHandle {
    /// Request historical records from a terminal and run them through
    /// the regular admission path.
    pub async fn sync(
        &self,
        device_id: DeviceId,
        range: (DateTime<Utc>, DateTime<Utc>),
    ) -> Result<SyncReport, IngestError> {
        let (respond_to, response) = oneshot::channel();
        self.control_tx
            .send(Control::Sync {
                device_id,
                range,
                respond_to,
            })
            .await
            .map_err(|_| IngestError::PipelineClosed)?;
        response.await.map_err(|_| IngestError::PipelineClosed)?
    }

    /// Current pipeline counters.
    pub async fn stats(&self) -> Result<IngestStats, IngestError> {
        let (respond_to, response) = oneshot::channel();
        self.control_tx
            .send(Control::Stats { respond_to })
            .await
            .map_err(|_| IngestError::PipelineClosed)?;
        response.await.map_err(|_| IngestError::PipelineClosed)
    }
}

/// Converts raw notifications into durable, deduplicated attendance
/// events and pushes them downstream
pub struct IngestPipeline<G> {
    gateway: G,
    registry: DeviceRegistry,
    hub: BroadcastHub,
    config: IngestConfig,
    dedupe: DedupeCache,
    stats: IngestStats,
}

impl<G: PersistenceGateway + 'static> IngestPipeline<G> {
    pub fn new(
        gateway: G,
        registry: DeviceRegistry,
        hub: BroadcastHub,
        config: IngestConfig,
    ) -> Self {
        let dedupe = DedupeCache::new(config.dedupe_window);
        IngestPipeline {
            gateway,
            registry,
            hub,
            config,
            dedupe,
            stats: IngestStats::default(),
        }
    }

    /// Current counters.
    pub fn stats(&self) -> &IngestStats {
        &self.stats
    }

    /// Spawn the pipeline over the registry's raw-notification channel.
    pub fn spawn(self, raw_rx: mpsc::Receiver<RawNotification>) -> (IngestHandle, JoinHandle<()>) {
        let (control_tx, control_rx) = mpsc::channel(8);
        let task = tokio::spawn(self.run(raw_rx, control_rx));
        (IngestHandle { control_tx }, task)
    }

    async fn run(
        mut self,
        mut raw_rx: mpsc::Receiver<RawNotification>,
        mut control_rx: mpsc::Receiver<Control>,
    ) {
        info!("Ingestion pipeline started");
        let mut control_open = true;

        loop {
            tokio::select! {
                maybe_raw = raw_rx.recv() => match maybe_raw {
                    Some(raw) => {
                        if let Err(e) = self.ingest(raw).await {
                            warn!(error = %e, "Notification dropped");
                        }
                    }
                    // Registry gone; nothing more will arrive.
                    None => break,
                },
                maybe_control = control_rx.recv(), if control_open => match maybe_control {
                    Some(Control::Sync { device_id, range, respond_to }) => {
                        let report = self.sync(device_id, range).await;
                        let _ = respond_to.send(report);
                    }
                    Some(Control::Stats { respond_to }) => {
                        let _ = respond_to.send(self.stats.clone());
                    }
                    None => control_open = false,
                },
            }
        }

        info!(
            persisted = self.stats.persisted,
            duplicates = self.stats.duplicates,
            malformed = self.stats.malformed,
            dropped = self.stats.dropped,
            "Ingestion pipeline stopped"
        );
    }

    /// Ingest one live notification.
    ///
    /// # Errors
    /// [`IngestError::MalformedNotification`] for unparseable input; the
    /// pipeline itself keeps running.
    pub async fn ingest(&mut self, raw: RawNotification) -> Result<IngestOutcome, IngestError> {
        let note = match AttendanceNotification::parse(&raw.message) {
            Ok(note) => note,
            Err(e) => {
                self.stats.malformed += 1;
                return Err(IngestError::MalformedNotification(e.to_string()));
            }
        };

        let event = self.normalize(raw.device_id, note);
        Ok(self.admit(event).await)
    }

    /// Bulk resynchronization: fetch a historical range from the
    /// terminal and admit every record through the live path, so
    /// backfilled data can never double-count against live data.
    pub async fn sync(
        &mut self,
        device_id: DeviceId,
        range: (DateTime<Utc>, DateTime<Utc>),
    ) -> Result<SyncReport, IngestError> {
        let (start, end) = range;
        let response = self
            .registry
            .dispatch_command(
                device_id,
                CommandCode::SyncRequest,
                vec![
                    WireTimestamp::from_datetime(start).format(),
                    WireTimestamp::from_datetime(end).format(),
                ],
            )
            .await?;

        let records = parse_log_batch(&response)
            .map_err(|e| IngestError::MalformedNotification(e.to_string()))?;

        let mut report = SyncReport {
            device_id,
            received: records.len(),
            persisted: 0,
            duplicates: 0,
            dropped: 0,
        };

        for note in records {
            let event = self.normalize(device_id, note);
            match self.admit(event).await {
                IngestOutcome::Persisted => report.persisted += 1,
                IngestOutcome::Duplicate => report.duplicates += 1,
                IngestOutcome::Dropped => report.dropped += 1,
            }
        }

        info!(
            device_id = %device_id,
            received = report.received,
            persisted = report.persisted,
            duplicates = report.duplicates,
            "Resynchronization complete"
        );
        Ok(report)
    }

    /// Build the canonical event. An explicit kind flag from the
    /// terminal wins; otherwise the shift schedule classifies.
    fn normalize(&self, device_id: DeviceId, note: AttendanceNotification) -> AttendanceEvent {
        let timestamp = note.timestamp.inner();
        let kind = note
            .kind
            .unwrap_or_else(|| self.config.schedule.classify(timestamp));

        AttendanceEvent {
            subject_id: note.subject_id,
            timestamp,
            kind,
            method: note.method,
            device_id,
        }
    }

    /// Steps 3-5: dedupe, persist, broadcast. Shared by live ingestion
    /// and resynchronization.
    async fn admit(&mut self, event: AttendanceEvent) -> IngestOutcome {
        if self
            .dedupe
            .check(&event.subject_id, event.device_id, event.timestamp)
        {
            self.stats.duplicates += 1;
            debug!(
                subject_id = %event.subject_id,
                device_id = %event.device_id,
                "Duplicate suppressed"
            );
            return IngestOutcome::Duplicate;
        }

        match self.persist_with_retry(&event).await {
            Ok(()) => {}
            Err(GatewayError::Duplicate) => {
                // Already stored (e.g. admitted before a restart); skip
                // downstream work without raising an alert.
                self.stats.duplicates += 1;
                return IngestOutcome::Duplicate;
            }
            Err(e) => {
                self.stats.dropped += 1;
                warn!(
                    subject_id = %event.subject_id,
                    device_id = %event.device_id,
                    error = %e,
                    "Persistence retries exhausted, event dropped"
                );
                self.hub.publish(BroadcastMessage::system_alert(
                    "persist_failed",
                    serde_json::json!({
                        "subject_id": event.subject_id,
                        "device_id": event.device_id,
                        "timestamp": event.timestamp,
                        "error": e.to_string(),
                    }),
                ));
                return IngestOutcome::Dropped;
            }
        }

        self.stats.persisted += 1;
        match BroadcastMessage::from_payload(MessageKind::Attendance, &event) {
            Ok(message) => self.hub.publish(message),
            Err(e) => warn!(error = %e, "Attendance event not serializable"),
        }
        IngestOutcome::Persisted
    }

    /// Bounded retry with fixed backoff; no unbounded queue builds up
    /// behind a down store.
    async fn persist_with_retry(&self, event: &AttendanceEvent) -> Result<(), GatewayError> {
        let mut attempt = 0;
        loop {
            attempt += 1;
            match self.gateway.create_attendance_record(event).await {
                Ok(()) => return Ok(()),
                Err(GatewayError::Duplicate) => return Err(GatewayError::Duplicate),
                Err(e) if attempt >= self.config.persist_attempts => return Err(e),
                Err(e) => {
                    debug!(
                        attempt,
                        error = %e,
                        "Persistence attempt failed, backing off"
                    );
                    tokio::time::sleep(self.config.persist_backoff).await;
                }
            }
        }
    }
}
