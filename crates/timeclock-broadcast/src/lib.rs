//! Best-effort fan-out of attendance and status messages to live
//! dashboard subscribers.
//!
//! ```text
//! ingestion ──publish──> ┌──────────────┐ ──try_send──> Subscriber A
//! registry  ──publish──> │ BroadcastHub │ ──try_send──> Subscriber B
//! heartbeat ──publish──> └──────────────┘ ──try_send──> ...
//! ```
//!
//! Publishing never waits: each subscriber owns a bounded queue, and a
//! subscriber whose queue is full or closed is silently dropped so slow
//! or dead consumers cannot block producers or each other.

pub mod hub;
pub mod message;

pub use hub::{BroadcastHub, HubConfig, Subscriber};
pub use message::{BroadcastMessage, MessageKind};
