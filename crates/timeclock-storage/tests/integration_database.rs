//! Integration tests for the SQLite gateway against a real (in-memory)
//! database.

use chrono::{TimeZone, Utc};
use timeclock_core::{
    AttendanceEvent, AuthMethod, ConnectionState, DeviceId, Employee, EventKind, SubjectId,
};
use timeclock_ingest::{DeviceStatusRecord, GatewayError, PersistenceGateway};
use timeclock_storage::{Database, SqliteGateway, StorageError};

fn event(subject: &str, device: u16, secs: u32) -> AttendanceEvent {
    AttendanceEvent {
        subject_id: SubjectId::new(subject).unwrap(),
        timestamp: Utc.with_ymd_and_hms(2026, 8, 7, 8, 30, secs).unwrap(),
        kind: EventKind::CheckIn,
        method: AuthMethod::Fingerprint,
        device_id: DeviceId::new(device).unwrap(),
    }
}

async fn gateway() -> SqliteGateway {
    let db = Database::in_memory().await.unwrap();
    SqliteGateway::new(db)
}

#[tokio::test]
async fn insert_and_query_attendance() {
    let gateway = gateway().await;

    gateway.insert_attendance(&event("EMP001", 15, 0)).await.unwrap();
    gateway.insert_attendance(&event("EMP001", 15, 30)).await.unwrap();
    gateway.insert_attendance(&event("EMP002", 15, 0)).await.unwrap();

    let events = gateway
        .find_by_subject(&SubjectId::new("EMP001").unwrap(), 10)
        .await
        .unwrap();
    assert_eq!(events.len(), 2);
    // Newest first.
    assert!(events[0].timestamp > events[1].timestamp);
    assert_eq!(events[0].kind, EventKind::CheckIn);
    assert_eq!(events[0].method, AuthMethod::Fingerprint);
}

#[tokio::test]
async fn duplicate_event_rejected_by_unique_index() {
    let gateway = gateway().await;

    gateway.insert_attendance(&event("EMP001", 15, 0)).await.unwrap();
    let result = gateway.insert_attendance(&event("EMP001", 15, 0)).await;
    assert!(matches!(result, Err(StorageError::Duplicate)));

    // Same instant from a different terminal is a distinct row.
    gateway.insert_attendance(&event("EMP001", 16, 0)).await.unwrap();
}

#[tokio::test]
async fn gateway_contract_maps_duplicate() {
    let gateway = gateway().await;
    let e = event("EMP001", 15, 0);

    gateway.create_attendance_record(&e).await.unwrap();
    let result = gateway.create_attendance_record(&e).await;
    assert_eq!(result, Err(GatewayError::Duplicate));
}

#[tokio::test]
async fn time_range_query_is_inclusive_and_ordered() {
    let gateway = gateway().await;
    for secs in [0, 10, 20, 30] {
        gateway.insert_attendance(&event("EMP001", 15, secs)).await.unwrap();
    }

    let start = Utc.with_ymd_and_hms(2026, 8, 7, 8, 30, 10).unwrap();
    let end = Utc.with_ymd_and_hms(2026, 8, 7, 8, 30, 20).unwrap();
    let events = gateway.find_by_time_range(start, end).await.unwrap();

    assert_eq!(events.len(), 2);
    assert!(events[0].timestamp < events[1].timestamp);
}

#[tokio::test]
async fn employee_upsert_and_lookup() {
    let gateway = gateway().await;
    let subject = SubjectId::new("EMP001").unwrap();

    assert!(gateway.get_employee(&subject).await.unwrap().is_none());

    gateway
        .put_employee(&Employee {
            subject_id: subject.clone(),
            name: "Maria Souza".to_string(),
            active: true,
        })
        .await
        .unwrap();

    let found = gateway.get_employee(&subject).await.unwrap().unwrap();
    assert_eq!(found.name, "Maria Souza");
    assert!(found.active);

    // Upsert replaces.
    gateway
        .put_employee(&Employee {
            subject_id: subject.clone(),
            name: "Maria Souza".to_string(),
            active: false,
        })
        .await
        .unwrap();
    assert!(!gateway.get_employee(&subject).await.unwrap().unwrap().active);
}

#[tokio::test]
async fn device_status_upsert() {
    let gateway = gateway().await;
    let device_id = DeviceId::new(15).unwrap();

    gateway
        .upsert_device(&DeviceStatusRecord {
            device_id,
            state: ConnectionState::Connected,
            last_seen: Some(Utc::now()),
        })
        .await
        .unwrap();
    assert_eq!(
        gateway.device_state(device_id).await.unwrap().as_deref(),
        Some("connected")
    );

    gateway
        .upsert_device(&DeviceStatusRecord {
            device_id,
            state: ConnectionState::Disconnected,
            last_seen: Some(Utc::now()),
        })
        .await
        .unwrap();
    assert_eq!(
        gateway.device_state(device_id).await.unwrap().as_deref(),
        Some("disconnected")
    );
}
