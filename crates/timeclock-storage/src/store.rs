//! SQLite implementation of the persistence gateway.

use chrono::{DateTime, Utc};
use tracing::debug;

use crate::connection::Database;
use crate::error::{StorageError, StorageResult};
use crate::models::{AttendanceRow, EmployeeRow};
use timeclock_core::{AttendanceEvent, DeviceId, Employee, SubjectId};
use timeclock_ingest::{DeviceStatusRecord, GatewayError, PersistenceGateway};

/// Gateway implementation over a [`Database`] pool
#[derive(Debug, Clone)]
pub struct SqliteGateway {
    db: Database,
}

impl SqliteGateway {
    pub fn new(db: Database) -> Self {
        Self { db }
    }

    /// Insert an attendance event.
    ///
    /// # Errors
    /// [`StorageError::Duplicate`] when the (subject, terminal,
    /// timestamp) unique index rejects the row.
    pub async fn insert_attendance(&self, event: &AttendanceEvent) -> StorageResult<i64> {
        let result = sqlx::query(
            r#"
            INSERT INTO attendance_records (
                subject_id, device_id, timestamp, kind, method, recorded_at
            )
            VALUES (?, ?, ?, ?, ?, ?)
            "#,
        )
        .bind(event.subject_id.as_str())
        .bind(i64::from(event.device_id.as_u16()))
        .bind(event.timestamp)
        .bind(event.kind.to_string())
        .bind(event.method.to_string())
        .bind(Utc::now())
        .execute(self.db.pool())
        .await?;

        Ok(result.last_insert_rowid())
    }

    /// Attendance events for one employee, newest first.
    pub async fn find_by_subject(
        &self,
        subject_id: &SubjectId,
        limit: i64,
    ) -> StorageResult<Vec<AttendanceEvent>> {
        let rows = sqlx::query_as::<_, AttendanceRow>(
            r#"
            SELECT id, subject_id, device_id, timestamp, kind, method, recorded_at
            FROM attendance_records
            WHERE subject_id = ?
            ORDER BY timestamp DESC
            LIMIT ?
            "#,
        )
        .bind(subject_id.as_str())
        .bind(limit)
        .fetch_all(self.db.pool())
        .await?;

        rows.into_iter().map(AttendanceRow::into_event).collect()
    }

    /// Attendance events within a time range, oldest first.
    pub async fn find_by_time_range(
        &self,
        start: DateTime<Utc>,
        end: DateTime<Utc>,
    ) -> StorageResult<Vec<AttendanceEvent>> {
        let rows = sqlx::query_as::<_, AttendanceRow>(
            r#"
            SELECT id, subject_id, device_id, timestamp, kind, method, recorded_at
            FROM attendance_records
            WHERE timestamp >= ? AND timestamp <= ?
            ORDER BY timestamp ASC
            "#,
        )
        .bind(start)
        .bind(end)
        .fetch_all(self.db.pool())
        .await?;

        rows.into_iter().map(AttendanceRow::into_event).collect()
    }

    /// Insert or replace an employee row.
    pub async fn put_employee(&self, employee: &Employee) -> StorageResult<()> {
        sqlx::query(
            r#"
            INSERT INTO employees (subject_id, name, active)
            VALUES (?, ?, ?)
            ON CONFLICT (subject_id) DO UPDATE SET
                name = excluded.name,
                active = excluded.active
            "#,
        )
        .bind(employee.subject_id.as_str())
        .bind(&employee.name)
        .bind(employee.active)
        .execute(self.db.pool())
        .await?;
        Ok(())
    }

    /// Look up an employee row.
    pub async fn find_employee(&self, subject_id: &SubjectId) -> StorageResult<Option<Employee>> {
        let row = sqlx::query_as::<_, EmployeeRow>(
            r#"
            SELECT subject_id, name, active
            FROM employees
            WHERE subject_id = ?
            "#,
        )
        .bind(subject_id.as_str())
        .fetch_optional(self.db.pool())
        .await?;

        row.map(EmployeeRow::into_employee).transpose()
    }

    /// Insert or update a terminal's status row.
    pub async fn put_device_status(&self, status: &DeviceStatusRecord) -> StorageResult<()> {
        sqlx::query(
            r#"
            INSERT INTO devices (device_id, state, last_seen)
            VALUES (?, ?, ?)
            ON CONFLICT (device_id) DO UPDATE SET
                state = excluded.state,
                last_seen = excluded.last_seen
            "#,
        )
        .bind(i64::from(status.device_id.as_u16()))
        .bind(status.state.to_string())
        .bind(status.last_seen)
        .execute(self.db.pool())
        .await?;
        Ok(())
    }

    /// Stored state string for one terminal (monitoring queries).
    pub async fn device_state(&self, device_id: DeviceId) -> StorageResult<Option<String>> {
        let state: Option<(String,)> = sqlx::query_as(
            r#"SELECT state FROM devices WHERE device_id = ?"#,
        )
        .bind(i64::from(device_id.as_u16()))
        .fetch_optional(self.db.pool())
        .await?;
        Ok(state.map(|(s,)| s))
    }
}

impl PersistenceGateway for SqliteGateway {
    async fn create_attendance_record(&self, event: &AttendanceEvent) -> Result<(), GatewayError> {
        match self.insert_attendance(event).await {
            Ok(id) => {
                debug!(
                    row_id = id,
                    subject_id = %event.subject_id,
                    device_id = %event.device_id,
                    "Attendance record stored"
                );
                Ok(())
            }
            Err(StorageError::Duplicate) => Err(GatewayError::Duplicate),
            Err(e) => Err(GatewayError::Unavailable(e.to_string())),
        }
    }

    async fn get_employee(&self, subject_id: &SubjectId) -> Result<Option<Employee>, GatewayError> {
        self.find_employee(subject_id)
            .await
            .map_err(|e| GatewayError::Unavailable(e.to_string()))
    }

    async fn upsert_device(&self, status: &DeviceStatusRecord) -> Result<(), GatewayError> {
        self.put_device_status(status)
            .await
            .map_err(|e| GatewayError::Unavailable(e.to_string()))
    }
}
