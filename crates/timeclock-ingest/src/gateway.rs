//! Persistence gateway contract.
//!
//! The pipeline persists through this trait and stays ignorant of the
//! storage technology; `timeclock-storage` provides the SQLite
//! implementation and [`MemoryGateway`] backs tests.
//!
//! Native async trait support (Edition 2024) is used here, so the
//! async-trait crate is not needed; the methods are declared in
//! `impl Future + Send` form because the pipeline task that awaits them
//! is spawned onto the multi-threaded runtime. Implementors still write
//! plain `async fn`.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::collections::HashMap;
use std::future::Future;
use std::sync::Mutex;
use thiserror::Error;

use timeclock_core::{AttendanceEvent, ConnectionState, DeviceId, Employee, SubjectId};

/// Errors surfaced by a persistence gateway
#[derive(Debug, Clone, Error, PartialEq, Eq)]
pub enum GatewayError {
    /// The store already holds this exact event. Expected under
    /// at-most-once ingestion; not a failure.
    #[error("Record already exists")]
    Duplicate,

    /// The store could not complete the operation; retryable.
    #[error("Persistence unavailable: {0}")]
    Unavailable(String),
}

/// Device status row pushed to the store on state changes
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct DeviceStatusRecord {
    pub device_id: DeviceId,
    pub state: ConnectionState,
    pub last_seen: Option<DateTime<Utc>>,
}

/// Durable store consumed by the ingestion pipeline
pub trait PersistenceGateway: Send + Sync {
    /// Persist one attendance event.
    ///
    /// # Errors
    /// [`GatewayError::Duplicate`] if an identical event (same subject,
    /// terminal and timestamp) is already stored.
    fn create_attendance_record(
        &self,
        event: &AttendanceEvent,
    ) -> impl Future<Output = Result<(), GatewayError>> + Send;

    /// Look up an employee by badge ID.
    fn get_employee(
        &self,
        subject_id: &SubjectId,
    ) -> impl Future<Output = Result<Option<Employee>, GatewayError>> + Send;

    /// Insert or update a terminal's status row.
    fn upsert_device(
        &self,
        status: &DeviceStatusRecord,
    ) -> impl Future<Output = Result<(), GatewayError>> + Send;
}

/// Gateways behind an `Arc` satisfy the contract too; tests and the
/// daemon share one instance between the pipeline and direct queries.
impl<G: PersistenceGateway> PersistenceGateway for std::sync::Arc<G> {
    async fn create_attendance_record(&self, event: &AttendanceEvent) -> Result<(), GatewayError> {
        (**self).create_attendance_record(event).await
    }

    async fn get_employee(&self, subject_id: &SubjectId) -> Result<Option<Employee>, GatewayError> {
        (**self).get_employee(subject_id).await
    }

    async fn upsert_device(&self, status: &DeviceStatusRecord) -> Result<(), GatewayError> {
        (**self).upsert_device(status).await
    }
}

#[derive(Default)]
struct MemoryState {
    records: Vec<AttendanceEvent>,
    employees: HashMap<SubjectId, Employee>,
    devices: HashMap<DeviceId, DeviceStatusRecord>,
    /// Failures to inject before succeeding again.
    fail_remaining: u32,
}

/// In-memory gateway for tests and examples
///
/// Duplicate detection mirrors the SQLite unique index: exact
/// (subject, terminal, timestamp) matches are rejected.
#[derive(Default)]
pub struct MemoryGateway {
    state: Mutex<MemoryState>,
}

impl MemoryGateway {
    pub fn new() -> Self {
        Self::default()
    }

    /// Seed an employee row.
    pub fn put_employee(&self, employee: Employee) {
        if let Ok(mut state) = self.state.lock() {
            state.employees.insert(employee.subject_id.clone(), employee);
        }
    }

    /// Make the next `n` persistence calls fail with
    /// [`GatewayError::Unavailable`].
    pub fn fail_next(&self, n: u32) {
        if let Ok(mut state) = self.state.lock() {
            state.fail_remaining = n;
        }
    }

    /// Snapshot of stored attendance events.
    pub fn records(&self) -> Vec<AttendanceEvent> {
        self.state
            .lock()
            .map(|state| state.records.clone())
            .unwrap_or_default()
    }

    /// Snapshot of a terminal's stored status.
    pub fn device(&self, device_id: DeviceId) -> Option<DeviceStatusRecord> {
        self.state
            .lock()
            .ok()
            .and_then(|state| state.devices.get(&device_id).cloned())
    }
}

impl PersistenceGateway for MemoryGateway {
    async fn create_attendance_record(&self, event: &AttendanceEvent) -> Result<(), GatewayError> {
        let mut state = self
            .state
            .lock()
            .map_err(|_| GatewayError::Unavailable("lock poisoned".to_string()))?;

        if state.fail_remaining > 0 {
            state.fail_remaining -= 1;
            return Err(GatewayError::Unavailable("injected failure".to_string()));
        }

        let exists = state.records.iter().any(|stored| {
            stored.subject_id == event.subject_id
                && stored.device_id == event.device_id
                && stored.timestamp == event.timestamp
        });
        if exists {
            return Err(GatewayError::Duplicate);
        }

        state.records.push(event.clone());
        Ok(())
    }

    async fn get_employee(&self, subject_id: &SubjectId) -> Result<Option<Employee>, GatewayError> {
        let state = self
            .state
            .lock()
            .map_err(|_| GatewayError::Unavailable("lock poisoned".to_string()))?;
        Ok(state.employees.get(subject_id).cloned())
    }

    async fn upsert_device(&self, status: &DeviceStatusRecord) -> Result<(), GatewayError> {
        let mut state = self
            .state
            .lock()
            .map_err(|_| GatewayError::Unavailable("lock poisoned".to_string()))?;
        state.devices.insert(status.device_id, status.clone());
        Ok(())
    }
}
