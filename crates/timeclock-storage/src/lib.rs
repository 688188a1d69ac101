//! SQLite persistence for the timeclock server.
//!
//! Implements the ingestion pipeline's `PersistenceGateway` contract on
//! a SQLite pool: attendance records with a unique
//! (subject, terminal, timestamp) index, employee lookups, and terminal
//! status upserts. The schema is applied idempotently at startup.

pub mod connection;
pub mod error;
pub mod models;
pub mod store;

pub use connection::{Database, DatabaseConfig};
pub use error::{StorageError, StorageResult};
pub use store::SqliteGateway;
