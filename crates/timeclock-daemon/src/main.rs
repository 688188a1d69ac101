//! Timeclock daemon: terminal fleet supervision, event ingestion and
//! the dashboard feed, wired together.
//!
//! Configuration is taken from the environment:
//!
//! - `TIMECLOCK_DB` - SQLite database path (default `timeclock.db`)
//! - `TIMECLOCK_DEVICES` - JSON file with the terminal list (optional)
//! - `TIMECLOCK_FEED_ADDR` - bind address of the JSON-lines dashboard
//!   feed (default `127.0.0.1:8425`)
//! - `RUST_LOG` - tracing filter (default `info`)

mod feed;

use anyhow::{Context, Result};
use std::sync::Arc;
use tracing::{info, warn};
use tracing_subscriber::EnvFilter;

use timeclock_broadcast::{BroadcastHub, BroadcastMessage, MessageKind};
use timeclock_ingest::{
    DeviceStatusRecord, IngestConfig, IngestPipeline, PersistenceGateway,
};
use timeclock_net::{DeviceConfig, DeviceRegistry, DeviceStatusEvent, RegistryConfig};
use timeclock_storage::{Database, DatabaseConfig, SqliteGateway};

#[tokio::main]
async fn main() -> Result<()> {
    tracing_subscriber::fmt()
        .with_env_filter(
            EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info")),
        )
        .init();

    let db_path = std::env::var("TIMECLOCK_DB").unwrap_or_else(|_| "timeclock.db".to_string());
    let feed_addr =
        std::env::var("TIMECLOCK_FEED_ADDR").unwrap_or_else(|_| "127.0.0.1:8425".to_string());

    let db = Database::new(DatabaseConfig::new(&db_path))
        .await
        .with_context(|| format!("opening database at {db_path}"))?;
    let gateway = Arc::new(SqliteGateway::new(db.clone()));

    let hub = BroadcastHub::default();
    let heartbeat = hub.start_heartbeat();

    let (registry, events) = DeviceRegistry::new(RegistryConfig::default());

    let pipeline = IngestPipeline::new(
        gateway.clone(),
        registry.clone(),
        hub.clone(),
        IngestConfig::default(),
    );
    let (_ingest, pipeline_task) = pipeline.spawn(events.raw_notifications);

    let status_task = tokio::spawn(forward_status(
        events.status_events,
        hub.clone(),
        gateway.clone(),
    ));

    let feed_task = tokio::spawn(feed::serve(feed_addr.clone(), hub.clone()));
    info!("Dashboard feed listening on {}", feed_addr);

    for device in load_devices()? {
        let id = device.id;
        if let Err(e) = registry.add_device(device).await {
            warn!(device_id = %id, error = %e, "Device not registered");
        }
    }

    tokio::signal::ctrl_c()
        .await
        .context("waiting for shutdown signal")?;
    info!("Shutting down");

    registry.shutdown().await;
    heartbeat.abort();
    feed_task.abort();
    status_task.abort();
    pipeline_task.abort();
    db.close().await;
    Ok(())
}

/// Read the terminal list from `TIMECLOCK_DEVICES`, if configured.
fn load_devices() -> Result<Vec<DeviceConfig>> {
    let Ok(path) = std::env::var("TIMECLOCK_DEVICES") else {
        warn!("TIMECLOCK_DEVICES not set; starting with an empty fleet");
        return Ok(Vec::new());
    };

    let raw = std::fs::read_to_string(&path)
        .with_context(|| format!("reading device list from {path}"))?;
    let devices: Vec<DeviceConfig> =
        serde_json::from_str(&raw).with_context(|| format!("parsing device list from {path}"))?;
    info!(count = devices.len(), "Device list loaded");
    Ok(devices)
}

/// Fan registry status events out to dashboards and persist the device
/// state.
async fn forward_status<G: PersistenceGateway + 'static>(
    mut status_rx: tokio::sync::mpsc::Receiver<DeviceStatusEvent>,
    hub: BroadcastHub,
    gateway: G,
) {
    while let Some(event) = status_rx.recv().await {
        match BroadcastMessage::from_payload(MessageKind::DeviceStatus, &event) {
            Ok(message) => hub.publish(message),
            Err(e) => warn!(error = %e, "Status event not serializable"),
        }

        let record = DeviceStatusRecord {
            device_id: event.device_id,
            state: event.state,
            last_seen: Some(event.at),
        };
        if let Err(e) = gateway.upsert_device(&record).await {
            warn!(device_id = %event.device_id, error = %e, "Device status not persisted");
        }
    }
}
