//! Terminal connection management for the timeclock server.
//!
//! This crate owns the only genuinely concurrent part of the system:
//! live TCP connections to attendance terminals, correlated
//! command/response exchange on top of them, and supervised recovery
//! when terminals drop off the network.
//!
//! # Architecture
//!
//! ```text
//! DeviceRegistry ──owns──> DeviceSession (one per connected terminal)
//!       │                        │
//!       │                        └─> TransportConnection ──(TCP)──> Terminal
//!       │
//!       ├──> raw notifications ───> ingestion pipeline (mpsc)
//!       └──> status events ───────> daemon / broadcast hub (mpsc)
//! ```
//!
//! Commands flow down through [`DeviceRegistry::dispatch_command`];
//! unsolicited attendance notifications flow up from each session's
//! dispatch loop into a single raw-notification channel.

pub mod registry;
pub mod session;
pub mod transport;

pub use registry::{
    DeviceConfig, DeviceInfo, DeviceRegistry, DeviceStatusEvent, RegistryConfig, RegistryError,
    RegistryEvents,
};
pub use session::{
    DeviceSession, SessionConfig, SessionError, SessionExit, SessionExitReason, SessionHandle,
};
pub use transport::{TransportConfig, TransportConnection, TransportError};
