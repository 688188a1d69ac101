//! End-to-end: emulated terminal → registry → pipeline → gateway + hub.

use std::sync::Arc;
use std::time::Duration;
use tokio::time::timeout;

use timeclock_broadcast::{BroadcastHub, MessageKind};
use timeclock_core::{AuthMethod, ConnectionState, DeviceId, SubjectId, WireTimestamp};
use timeclock_emulator::{EmulatedTerminal, EmulatorBehavior};
use timeclock_ingest::{IngestConfig, IngestPipeline, MemoryGateway};
use timeclock_net::{DeviceConfig, DeviceRegistry, RegistryConfig, SessionConfig, TransportConfig};
use timeclock_protocol::AttendanceNotification;

const STEP: Duration = Duration::from_secs(5);

fn note(subject: &str, ts: &str, kind: Option<timeclock_core::EventKind>) -> AttendanceNotification {
    AttendanceNotification {
        subject_id: SubjectId::new(subject).unwrap(),
        timestamp: WireTimestamp::parse(ts).unwrap(),
        method: AuthMethod::Fingerprint,
        kind,
    }
}

fn registry_config() -> RegistryConfig {
    RegistryConfig {
        transport: TransportConfig {
            connect_timeout: Duration::from_secs(1),
            idle_timeout: Duration::from_secs(30),
            write_timeout: Duration::from_secs(1),
        },
        session: SessionConfig {
            command_timeout: Duration::from_millis(500),
            heartbeat_interval: Duration::from_secs(60),
            request_queue_depth: 32,
        },
        reconnect_backoff: Duration::from_millis(100),
        ..RegistryConfig::default()
    }
}

#[tokio::test]
async fn live_events_and_backfill_share_one_dedupe_path() {
    let device_id = DeviceId::new(15).unwrap();

    // The terminal's log holds one record that already arrived live
    // (re-sent with a 5s clock skew) and one genuinely new record.
    let behavior = EmulatorBehavior {
        records: vec![
            note("EMP001", "2026-08-07 08:30:05", None),
            note("EMP002", "2026-08-07 09:00:00", None),
        ],
        ..EmulatorBehavior::default()
    };
    let (terminal, handle) = EmulatedTerminal::start(device_id, behavior).await.unwrap();
    let (host, port) = terminal.host_port();

    let (registry, mut events) = DeviceRegistry::new(registry_config());
    let gateway = Arc::new(MemoryGateway::new());
    let hub = BroadcastHub::default();
    let mut subscriber = hub.subscribe();

    let pipeline = IngestPipeline::new(
        gateway.clone(),
        registry.clone(),
        hub.clone(),
        IngestConfig::default(),
    );
    let (ingest, _pipeline_task) = pipeline.spawn(events.raw_notifications);

    registry
        .add_device(DeviceConfig {
            id: device_id,
            host,
            port,
            secret: None,
        })
        .await
        .unwrap();
    loop {
        let event = timeout(STEP, events.status_events.recv())
            .await
            .expect("status in time")
            .expect("status channel open");
        if event.state == ConnectionState::Connected {
            break;
        }
    }
    handle.wait_connected(true).await;

    // Live notification: persisted once, broadcast once, classified by
    // the shift schedule (08:30 → check-in).
    handle.emit_event(note("EMP001", "2026-08-07 08:30:00", None));

    let broadcast = timeout(STEP, subscriber.recv())
        .await
        .expect("broadcast in time")
        .expect("subscribed");
    assert_eq!(broadcast.kind, MessageKind::Attendance);
    assert_eq!(broadcast.data["subject_id"], "EMP001");
    assert_eq!(broadcast.data["kind"], "check-in");
    assert_eq!(gateway.records().len(), 1);

    // Simulated duplicate re-send 10s later: counted, not re-persisted,
    // not re-broadcast.
    handle.emit_event(note("EMP001", "2026-08-07 08:30:10", None));
    tokio::time::sleep(Duration::from_millis(200)).await;
    assert_eq!(gateway.records().len(), 1);

    let stats = ingest.stats().await.unwrap();
    assert_eq!(stats.persisted, 1);
    assert_eq!(stats.duplicates, 1);

    // Backfill over a range containing both scripted records: the
    // already-seen one dedupes against the live event, the new one
    // persists and broadcasts.
    let report = ingest
        .sync(
            device_id,
            (
                WireTimestamp::parse("2026-08-07 00:00:00").unwrap().inner(),
                WireTimestamp::parse("2026-08-07 23:59:59").unwrap().inner(),
            ),
        )
        .await
        .unwrap();

    assert_eq!(report.received, 2);
    assert_eq!(report.persisted, 1);
    assert_eq!(report.duplicates, 1);
    assert_eq!(report.dropped, 0);

    let records = gateway.records();
    assert_eq!(records.len(), 2);
    assert!(records.iter().any(|r| r.subject_id.as_str() == "EMP002"));

    let backfill_broadcast = timeout(STEP, subscriber.recv())
        .await
        .expect("backfill broadcast in time")
        .expect("subscribed");
    assert_eq!(backfill_broadcast.data["subject_id"], "EMP002");

    registry.shutdown().await;
}
