//! Row types mapping between SQLite and the domain model.

use chrono::{DateTime, Utc};
use sqlx::FromRow;

use crate::error::{StorageError, StorageResult};
use timeclock_core::{
    AttendanceEvent, AuthMethod, DeviceId, Employee, EventKind, SubjectId,
};

#[derive(Debug, Clone, FromRow)]
pub struct EmployeeRow {
    pub subject_id: String,
    pub name: String,
    pub active: bool,
}

impl EmployeeRow {
    pub fn into_employee(self) -> StorageResult<Employee> {
        let subject_id = SubjectId::new(&self.subject_id)
            .map_err(|e| StorageError::Corrupt(format!("employee subject_id: {e}")))?;
        Ok(Employee {
            subject_id,
            name: self.name,
            active: self.active,
        })
    }
}

#[derive(Debug, Clone, FromRow)]
pub struct AttendanceRow {
    pub id: i64,
    pub subject_id: String,
    pub device_id: i64,
    pub timestamp: DateTime<Utc>,
    pub kind: String,
    pub method: String,
    pub recorded_at: DateTime<Utc>,
}

impl AttendanceRow {
    pub fn into_event(self) -> StorageResult<AttendanceEvent> {
        let subject_id = SubjectId::new(&self.subject_id)
            .map_err(|e| StorageError::Corrupt(format!("attendance subject_id: {e}")))?;
        let device_id = u16::try_from(self.device_id)
            .ok()
            .and_then(|id| DeviceId::new(id).ok())
            .ok_or_else(|| {
                StorageError::Corrupt(format!("attendance device_id: {}", self.device_id))
            })?;
        let kind: EventKind = self
            .kind
            .parse()
            .map_err(|e| StorageError::Corrupt(format!("attendance kind: {e}")))?;
        let method: AuthMethod = self
            .method
            .parse()
            .map_err(|e| StorageError::Corrupt(format!("attendance method: {e}")))?;

        Ok(AttendanceEvent {
            subject_id,
            timestamp: self.timestamp,
            kind,
            method,
            device_id,
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_attendance_row_round_trip() {
        let row = AttendanceRow {
            id: 1,
            subject_id: "EMP001".to_string(),
            device_id: 15,
            timestamp: Utc::now(),
            kind: "check-in".to_string(),
            method: "fingerprint".to_string(),
            recorded_at: Utc::now(),
        };

        let event = row.into_event().unwrap();
        assert_eq!(event.kind, EventKind::CheckIn);
        assert_eq!(event.method, AuthMethod::Fingerprint);
        assert_eq!(event.device_id.as_u16(), 15);
    }

    #[test]
    fn test_corrupt_kind_rejected() {
        let row = AttendanceRow {
            id: 1,
            subject_id: "EMP001".to_string(),
            device_id: 15,
            timestamp: Utc::now(),
            kind: "lunch".to_string(),
            method: "fingerprint".to_string(),
            recorded_at: Utc::now(),
        };
        assert!(matches!(row.into_event(), Err(StorageError::Corrupt(_))));
    }
}
