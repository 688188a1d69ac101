//! Event ingestion pipeline: raw terminal notifications in, durable
//! deduplicated attendance events out.
//!
//! ```text
//! sessions ──RawNotification──> parse ──> classify ──> dedupe ──> persist ──> broadcast
//!                                │                       │           │
//!                              (drop +                 (count,     (bounded retry,
//!                               log)                    skip)       then alert + drop)
//! ```
//!
//! One logical queue feeds persistence for all terminals: per-device
//! arrival order is preserved, no total order across devices is
//! guaranteed, and one bad frame never stalls the stream. Bulk
//! resynchronization replays historical records through the same
//! dedupe/persist/broadcast path, so live and backfilled data can never
//! double-count.

pub mod classify;
pub mod dedupe;
pub mod gateway;
pub mod pipeline;

pub use classify::ShiftSchedule;
pub use dedupe::DedupeCache;
pub use gateway::{DeviceStatusRecord, GatewayError, MemoryGateway, PersistenceGateway};
pub use pipeline::{
    IngestConfig, IngestError, IngestHandle, IngestOutcome, IngestPipeline, IngestStats, SyncReport,
};
