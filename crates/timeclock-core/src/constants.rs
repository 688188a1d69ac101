//! Protocol and policy constants for the timeclock terminal network.
//!
//! The terminal wire protocol uses an ASCII framing scheme:
//!
//! ```text
//! <STX>ID+TCLK+SEQ+COMMAND]FIELD1]FIELD2]...<ETX>
//! ```
//!
//! Where:
//! - `<STX>` - Start of text marker (0x02)
//! - `ID` - Terminal identifier (001-999, zero-padded)
//! - `TCLK` - Protocol identifier constant
//! - `SEQ` - Correlation sequence (0001-9999; 0000 = unsolicited)
//! - `COMMAND` - Command code (e.g. `EVT`, `PING`, `SYNC`)
//! - `]` - Field delimiter
//! - `<ETX>` - End of text marker (0x03)
//!
//! Timeouts below are defaults only; every timeout in the stack is
//! configurable at the component that applies it.

// ============================================================================
// Protocol Delimiters
// ============================================================================

/// Header component separator.
///
/// Separates terminal ID, protocol identifier, correlation sequence and
/// command code: `015+TCLK+0007+PING`.
pub const DELIMITER_HEADER: &str = "+";

/// Field separator in protocol messages.
///
/// Empty fields (consecutive `]]`) have semantic meaning and must be
/// preserved when splitting.
pub const DELIMITER_FIELD: &str = "]";

// ============================================================================
// Protocol Identification
// ============================================================================

/// Protocol identifier constant.
///
/// Appears in every message immediately after the terminal ID.
pub const PROTOCOL_ID: &str = "TCLK";

/// Protocol identifier field length.
pub const PROTOCOL_ID_LENGTH: usize = 4;

// ============================================================================
// Message Framing
// ============================================================================

/// Start of text marker (STX, 0x02).
pub const START_BYTE: u8 = 0x02;

/// End of text marker (ETX, 0x03).
pub const END_BYTE: u8 = 0x03;

/// Total bytes used for frame markers ([`START_BYTE`] + [`END_BYTE`]).
pub const FRAME_OVERHEAD: usize = 2;

/// Maximum frame size in bytes (16 KiB).
///
/// Frames beyond this size are rejected to bound memory consumption from
/// malformed or hostile streams. The largest legitimate frame is a `LOG`
/// batch response, which stays well below this limit.
pub const MAX_FRAME_SIZE: usize = 16 * 1024;

/// Maximum length for any single protocol field (bytes).
pub const MAX_FIELD_LENGTH: usize = 256;

// ============================================================================
// Message Structure Components
// ============================================================================

/// Terminal ID field length (zero-padded digits).
pub const DEVICE_ID_LENGTH: usize = 3;

/// Correlation sequence field length (zero-padded digits).
pub const SEQUENCE_LENGTH: usize = 4;

/// Minimum valid terminal ID.
pub const MIN_DEVICE_ID: u16 = 1;

/// Maximum valid terminal ID.
///
/// With [`DEVICE_ID_LENGTH`] = 3 this allows 999 unique terminals.
pub const MAX_DEVICE_ID: u16 = 999;

/// Highest correlation sequence before wrapping back to 1.
///
/// Sequence 0 is reserved for unsolicited notifications and never
/// allocated to a command.
pub const MAX_SEQUENCE: u16 = 9999;

// ============================================================================
// Subject Identification
// ============================================================================

/// Minimum subject (employee badge) ID length in characters.
pub const MIN_SUBJECT_LENGTH: usize = 1;

/// Maximum subject (employee badge) ID length in characters.
pub const MAX_SUBJECT_LENGTH: usize = 32;

// ============================================================================
// Timestamps
// ============================================================================

/// Wire timestamp format. All device-reported timestamps are UTC.
pub const TIMESTAMP_FORMAT: &str = "%Y-%m-%d %H:%M:%S";

// ============================================================================
// Timeout Configuration (defaults)
// ============================================================================

/// Default connect timeout (milliseconds).
pub const DEFAULT_CONNECT_TIMEOUT_MS: u64 = 5000;

/// Default per-command round-trip timeout (milliseconds).
///
/// Commands that receive no correlated response within this window fail
/// with a command timeout, which is treated as connection loss by the
/// heartbeat path.
pub const DEFAULT_COMMAND_TIMEOUT_MS: u64 = 5000;

/// Default idle-read timeout (milliseconds).
///
/// If nothing arrives on the socket for this long the transport reports
/// a read timeout and the session starts recovery instead of hanging.
/// Sized to tolerate two missed heartbeat intervals.
pub const DEFAULT_IDLE_TIMEOUT_MS: u64 = 75_000;

/// Default keepalive interval (milliseconds).
///
/// A `PING` is issued when no traffic has been seen for this long.
pub const DEFAULT_HEARTBEAT_INTERVAL_MS: u64 = 30_000;

/// Default reconnect backoff after an unexpected disconnect (milliseconds).
pub const DEFAULT_RECONNECT_BACKOFF_MS: u64 = 5000;

// ============================================================================
// Ingestion Policy (defaults)
// ============================================================================

/// Default dedupe window (seconds).
///
/// Two notifications for the same subject and terminal whose timestamps
/// differ by less than this are treated as one physical event.
pub const DEFAULT_DEDUPE_WINDOW_SECS: i64 = 60;

/// Default number of persistence attempts before an event is dropped.
pub const DEFAULT_PERSIST_ATTEMPTS: u32 = 3;

/// Default backoff between persistence attempts (milliseconds).
pub const DEFAULT_PERSIST_BACKOFF_MS: u64 = 500;

// ============================================================================
// Broadcast Policy (defaults)
// ============================================================================

/// Default per-subscriber outbound queue depth.
///
/// A subscriber whose queue is full when a message is published is
/// considered dead and removed.
pub const DEFAULT_SUBSCRIBER_QUEUE_DEPTH: usize = 64;

/// Default hub heartbeat publish interval (milliseconds).
pub const DEFAULT_HUB_HEARTBEAT_INTERVAL_MS: u64 = 30_000;
