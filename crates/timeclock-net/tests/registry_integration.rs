//! Integration tests: registry + session + transport against the
//! terminal emulator.

use std::time::Duration;
use tokio::time::timeout;

use timeclock_core::{ConnectionState, DeviceId, SharedSecret};
use timeclock_emulator::{EmulatedTerminal, EmulatorBehavior, TerminalHandle};
use timeclock_net::{
    DeviceConfig, DeviceRegistry, DeviceStatusEvent, RegistryConfig, RegistryError, SessionConfig,
    SessionError, TransportConfig,
};
use timeclock_protocol::{AttendanceNotification, CommandCode, RawNotification};

const STEP: Duration = Duration::from_secs(5);

fn test_config() -> RegistryConfig {
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

fn device(id: u16) -> DeviceId {
    DeviceId::new(id).unwrap()
}

async fn start_terminal(
    id: u16,
    behavior: EmulatorBehavior,
) -> (EmulatedTerminal, TerminalHandle, DeviceConfig) {
    let (terminal, handle) = EmulatedTerminal::start(device(id), behavior).await.unwrap();
    let (host, port) = terminal.host_port();
    let config = DeviceConfig {
        id: device(id),
        host,
        port,
        secret: None,
    };
    (terminal, handle, config)
}

async fn next_status(
    rx: &mut tokio::sync::mpsc::Receiver<DeviceStatusEvent>,
) -> DeviceStatusEvent {
    timeout(STEP, rx.recv())
        .await
        .expect("status event within deadline")
        .expect("status channel open")
}

async fn await_state(
    rx: &mut tokio::sync::mpsc::Receiver<DeviceStatusEvent>,
    state: ConnectionState,
) -> DeviceStatusEvent {
    loop {
        let event = next_status(rx).await;
        if event.state == state {
            return event;
        }
    }
}

#[tokio::test]
async fn connect_and_round_trip_command() {
    let (_terminal, _handle, config) = start_terminal(15, EmulatorBehavior::default()).await;
    let (registry, mut events) = DeviceRegistry::new(test_config());

    registry.add_device(config).await.unwrap();
    await_state(&mut events.status_events, ConnectionState::Connected).await;

    let response = registry
        .dispatch_command(device(15), CommandCode::Ping, vec![])
        .await
        .unwrap();
    assert_eq!(response.command, CommandCode::Ack);

    let snapshot = registry.snapshot().await;
    assert_eq!(snapshot.len(), 1);
    assert_eq!(snapshot[0].state, ConnectionState::Connected);
    assert!(snapshot[0].last_seen.is_some());

    registry.shutdown().await;
}

#[tokio::test]
async fn notification_flows_to_raw_channel() {
    let (_terminal, handle, config) = start_terminal(15, EmulatorBehavior::default()).await;
    let (registry, mut events) = DeviceRegistry::new(test_config());

    registry.add_device(config).await.unwrap();
    await_state(&mut events.status_events, ConnectionState::Connected).await;
    handle.wait_connected(true).await;

    handle.emit_event(AttendanceNotification {
        subject_id: "EMP001".parse().unwrap(),
        timestamp: timeclock_core::WireTimestamp::parse("2026-08-07 08:30:00").unwrap(),
        method: timeclock_core::AuthMethod::Fingerprint,
        kind: None,
    });

    let raw: RawNotification = timeout(STEP, events.raw_notifications.recv())
        .await
        .expect("notification within deadline")
        .expect("raw channel open");
    assert_eq!(raw.device_id, device(15));
    assert_eq!(raw.message.command, CommandCode::EventReport);
    assert_eq!(raw.message.field(0), Some("EMP001"));

    registry.shutdown().await;
}

#[tokio::test]
async fn command_timeout_does_not_poison_session() {
    let (_terminal, handle, config) = start_terminal(15, EmulatorBehavior::default()).await;
    let (registry, mut events) = DeviceRegistry::new(test_config());

    registry.add_device(config).await.unwrap();
    await_state(&mut events.status_events, ConnectionState::Connected).await;

    handle.set_mute(true);
    let result = registry
        .dispatch_command(device(15), CommandCode::Ping, vec![])
        .await;
    assert!(matches!(
        result,
        Err(RegistryError::Command(SessionError::CommandTimeout(_)))
    ));

    // A later command on the same session succeeds once the terminal
    // answers again.
    handle.set_mute(false);
    let response = registry
        .dispatch_command(device(15), CommandCode::QueryStatus, vec![])
        .await
        .unwrap();
    assert_eq!(response.command, CommandCode::Ack);

    registry.shutdown().await;
}

#[tokio::test]
async fn unexpected_drop_triggers_single_reconnect() {
    let (_terminal, handle, config) = start_terminal(15, EmulatorBehavior::default()).await;
    let (registry, mut events) = DeviceRegistry::new(test_config());

    registry.add_device(config).await.unwrap();
    await_state(&mut events.status_events, ConnectionState::Connected).await;

    handle.drop_connection();
    await_state(&mut events.status_events, ConnectionState::Disconnected).await;

    // Exactly one Connected event after recovery, preceded by exactly
    // one Connecting from the scheduled retry.
    let event = await_state(&mut events.status_events, ConnectionState::Connecting).await;
    assert_eq!(event.device_id, device(15));
    let event = next_status(&mut events.status_events).await;
    assert_eq!(event.state, ConnectionState::Connected);

    // The recovered session works.
    let response = registry
        .dispatch_command(device(15), CommandCode::Ping, vec![])
        .await
        .unwrap();
    assert_eq!(response.command, CommandCode::Ack);

    registry.shutdown().await;
}

#[tokio::test]
async fn explicit_disconnect_does_not_reconnect() {
    let (_terminal, handle, config) = start_terminal(15, EmulatorBehavior::default()).await;
    let (registry, mut events) = DeviceRegistry::new(test_config());

    registry.add_device(config).await.unwrap();
    await_state(&mut events.status_events, ConnectionState::Connected).await;
    handle.wait_connected(true).await;

    registry.disconnect(Some(device(15))).await.unwrap();
    await_state(&mut events.status_events, ConnectionState::Disconnected).await;
    handle.wait_connected(false).await;

    // Well past the backoff: still disconnected, no new session.
    tokio::time::sleep(Duration::from_millis(400)).await;
    assert_eq!(
        registry.state(device(15)).await.unwrap(),
        ConnectionState::Disconnected
    );
    let result = registry
        .dispatch_command(device(15), CommandCode::Ping, vec![])
        .await;
    assert!(matches!(
        result,
        Err(RegistryError::DeviceNotConnected(_))
    ));

    registry.shutdown().await;
}

#[tokio::test]
async fn pending_commands_fail_fast_on_disconnect() {
    let (_terminal, handle, config) = start_terminal(15, EmulatorBehavior::default()).await;
    let mut config_registry = test_config();
    // Long command timeout: the point is that SessionClosed arrives
    // well before it.
    config_registry.session.command_timeout = Duration::from_secs(10);
    let (registry, mut events) = DeviceRegistry::new(config_registry);

    registry.add_device(config).await.unwrap();
    await_state(&mut events.status_events, ConnectionState::Connected).await;

    handle.set_mute(true);
    let mut waiters = Vec::new();
    for _ in 0..4 {
        let registry = registry.clone();
        waiters.push(tokio::spawn(async move {
            registry
                .dispatch_command(device(15), CommandCode::Ping, vec![])
                .await
        }));
    }
    // Let the commands reach the wire before tearing down.
    tokio::time::sleep(Duration::from_millis(100)).await;

    registry.disconnect(Some(device(15))).await.unwrap();

    for waiter in waiters {
        let result = timeout(STEP, waiter).await.unwrap().unwrap();
        assert!(matches!(
            result,
            Err(RegistryError::Command(SessionError::SessionClosed))
        ));
    }

    registry.shutdown().await;
}

#[tokio::test]
async fn coalesced_connects_share_one_outcome() {
    let (_terminal, _handle, config) = start_terminal(15, EmulatorBehavior::default()).await;
    let (registry, mut events) = DeviceRegistry::new(test_config());

    registry.add_device(config).await.unwrap();

    // Racing connects while the background attempt runs: every caller
    // observes success, and only one Connected event is emitted.
    let mut calls = Vec::new();
    for _ in 0..4 {
        let registry = registry.clone();
        calls.push(tokio::spawn(
            async move { registry.connect(device(15)).await },
        ));
    }
    for call in calls {
        timeout(STEP, call).await.unwrap().unwrap().unwrap();
    }

    let mut connected_events = 0;
    while let Ok(Some(event)) =
        timeout(Duration::from_millis(300), events.status_events.recv()).await
    {
        if event.state == ConnectionState::Connected {
            connected_events += 1;
        }
    }
    assert_eq!(connected_events, 1);

    registry.shutdown().await;
}

#[tokio::test]
async fn auth_handshake_success_and_rejection() {
    // Accepting terminal.
    let (_terminal, _handle, mut config) = start_terminal(
        15,
        EmulatorBehavior {
            secret: Some("commkey".to_string()),
            ..EmulatorBehavior::default()
        },
    )
    .await;
    config.secret = Some(SharedSecret::new("commkey").unwrap());

    let (registry, mut events) = DeviceRegistry::new(test_config());
    registry.add_device(config).await.unwrap();
    await_state(&mut events.status_events, ConnectionState::Connected).await;
    registry.shutdown().await;

    // Rejecting terminal: wrong secret leaves the device faulted.
    let (_terminal2, _handle2, mut config2) = start_terminal(
        16,
        EmulatorBehavior {
            secret: Some("commkey".to_string()),
            ..EmulatorBehavior::default()
        },
    )
    .await;
    config2.secret = Some(SharedSecret::new("wrong").unwrap());

    let (registry2, mut events2) = DeviceRegistry::new(test_config());
    registry2.add_device(config2).await.unwrap();
    await_state(&mut events2.status_events, ConnectionState::Faulted).await;
    registry2.shutdown().await;
}

#[tokio::test]
async fn missed_heartbeat_closes_session() {
    let (_terminal, handle, config) = start_terminal(15, EmulatorBehavior::default()).await;
    let mut registry_config = test_config();
    registry_config.session.heartbeat_interval = Duration::from_millis(100);
    // No automatic recovery noise during the assertion window.
    registry_config.reconnect_backoff = Duration::from_secs(30);
    let (registry, mut events) = DeviceRegistry::new(registry_config);

    registry.add_device(config).await.unwrap();
    await_state(&mut events.status_events, ConnectionState::Connected).await;

    // Stop answering; the first unanswered PING plus one more silent
    // interval closes the session.
    handle.set_mute(true);
    let event = await_state(&mut events.status_events, ConnectionState::Disconnected).await;
    assert_eq!(event.device_id, device(15));

    registry.shutdown().await;
}

#[tokio::test]
async fn remove_device_cancels_recovery() {
    let (_terminal, handle, config) = start_terminal(15, EmulatorBehavior::default()).await;
    let mut registry_config = test_config();
    registry_config.reconnect_backoff = Duration::from_millis(200);
    let (registry, mut events) = DeviceRegistry::new(registry_config);

    registry.add_device(config).await.unwrap();
    await_state(&mut events.status_events, ConnectionState::Connected).await;

    handle.drop_connection();
    await_state(&mut events.status_events, ConnectionState::Disconnected).await;

    // Remove while the retry is pending; the retry must die with it.
    registry.remove_device(device(15)).await.unwrap();
    tokio::time::sleep(Duration::from_millis(500)).await;

    assert!(matches!(
        registry.state(device(15)).await,
        Err(RegistryError::DeviceNotFound(_))
    ));
    assert!(registry.snapshot().await.is_empty());

    registry.shutdown().await;
}
