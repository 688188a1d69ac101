//! Attendance payload parsing.
//!
//! Sessions forward unsolicited terminal frames to the ingestion
//! pipeline as [`RawNotification`]s: the wire message plus the
//! originating terminal and arrival time, fields still uninterpreted.
//! [`AttendanceNotification`] is the structured form the pipeline
//! extracts before classification and dedupe.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use timeclock_core::{AuthMethod, DeviceId, Error, EventKind, Result, SubjectId, WireTimestamp};

use crate::message::{CommandCode, Message};

/// Fields per record in a `LOG` batch: subject, timestamp, method, kind.
const LOG_RECORD_FIELDS: usize = 4;

/// Unsolicited terminal notification, consumed exactly once by the
/// ingestion pipeline
#[derive(Debug, Clone)]
pub struct RawNotification {
    /// Terminal that produced the notification.
    pub device_id: DeviceId,

    /// When the frame arrived at the server.
    pub received_at: DateTime<Utc>,

    /// Decoded wire message; fields are not yet interpreted.
    pub message: Message,
}

impl RawNotification {
    /// Wrap a just-received message, stamping the arrival time.
    pub fn new(device_id: DeviceId, message: Message) -> Self {
        RawNotification {
            device_id,
            received_at: Utc::now(),
            message,
        }
    }
}

/// Structured attendance notification extracted from an `EVT` frame or a
/// `LOG` batch record
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct AttendanceNotification {
    pub subject_id: SubjectId,
    pub timestamp: WireTimestamp,
    pub method: AuthMethod,

    /// Explicit kind flag, when the terminal reports one. Simple
    /// fingerprint terminals leave this empty and the pipeline
    /// classifies by shift window instead.
    pub kind: Option<EventKind>,
}

impl AttendanceNotification {
    /// Parse an `EVT` message.
    ///
    /// Expected fields: `subject ] timestamp ] method ] kind?`.
    ///
    /// # Errors
    /// Returns `Error::InvalidMessageFormat` if the command is not `EVT`;
    /// field-level errors propagate from the domain type parsers.
    pub fn parse(message: &Message) -> Result<Self> {
        if message.command != CommandCode::EventReport {
            return Err(Error::InvalidMessageFormat(format!(
                "Expected EVT, got {}",
                message.command
            )));
        }
        Self::from_fields(&message.fields)
    }

    /// Parse one record's worth of fields.
    pub fn from_fields(fields: &[String]) -> Result<Self> {
        let subject = fields
            .first()
            .ok_or_else(|| Error::MissingField("subject".to_string()))?;
        let timestamp = fields
            .get(1)
            .ok_or_else(|| Error::MissingField("timestamp".to_string()))?;
        let method = fields
            .get(2)
            .ok_or_else(|| Error::MissingField("method".to_string()))?;
        let kind = fields.get(3).map(String::as_str).unwrap_or("");

        Ok(AttendanceNotification {
            subject_id: SubjectId::new(subject)?,
            timestamp: WireTimestamp::parse(timestamp)?,
            method: AuthMethod::from_wire(method)?,
            kind: EventKind::from_wire(kind)?,
        })
    }
}

/// Parse a `LOG` batch response into individual notifications.
///
/// Batch fields are flat groups of four: `subject, timestamp, method,
/// kind` (kind may be empty). An empty batch is valid and yields no
/// records.
///
/// # Errors
/// Returns `Error::InvalidMessageFormat` if the command is not `LOG` or
/// the field count is not a multiple of four; per-record errors propagate
/// from the field parsers.
pub fn parse_log_batch(message: &Message) -> Result<Vec<AttendanceNotification>> {
    if message.command != CommandCode::LogBatch {
        return Err(Error::InvalidMessageFormat(format!(
            "Expected LOG, got {}",
            message.command
        )));
    }
    if !message.fields.len().is_multiple_of(LOG_RECORD_FIELDS) {
        return Err(Error::InvalidMessageFormat(format!(
            "LOG batch field count {} is not a multiple of {LOG_RECORD_FIELDS}",
            message.fields.len()
        )));
    }

    message
        .fields
        .chunks(LOG_RECORD_FIELDS)
        .map(AttendanceNotification::from_fields)
        .collect()
}

/// Flatten notifications into `LOG` batch fields (emulator and tests).
pub fn log_batch_fields(records: &[AttendanceNotification]) -> Vec<String> {
    let mut fields = Vec::with_capacity(records.len() * LOG_RECORD_FIELDS);
    for record in records {
        fields.push(record.subject_id.to_string());
        fields.push(record.timestamp.format());
        fields.push(record.method.to_wire().to_string());
        fields.push(
            record
                .kind
                .map(|k| k.to_wire().to_string())
                .unwrap_or_default(),
        );
    }
    fields
}
