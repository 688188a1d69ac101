use serde::{Deserialize, Serialize};
use std::fmt;
use timeclock_core::{
    DeviceId, Error, Result,
    constants::{MAX_FIELD_LENGTH, MAX_SEQUENCE, SEQUENCE_LENGTH},
};

/// Correlation sequence pairing a command with its response
///
/// Sequence 0 is reserved for unsolicited notifications pushed by the
/// terminal and is never allocated to a command.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct Sequence(u16);

impl Sequence {
    /// Sequence carried by unsolicited notifications.
    pub const UNSOLICITED: Sequence = Sequence(0);

    /// Create a sequence with validation.
    ///
    /// # Errors
    /// Returns `Error::InvalidSequence` if the value exceeds the 4-digit
    /// wire range.
    pub fn new(value: u16) -> Result<Self> {
        if value > MAX_SEQUENCE {
            return Err(Error::InvalidSequence(format!(
                "Sequence must be 0-{MAX_SEQUENCE}, got {value}"
            )));
        }
        Ok(Sequence(value))
    }

    /// Returns `true` for the reserved notification sequence.
    #[must_use]
    pub fn is_unsolicited(&self) -> bool {
        self.0 == 0
    }

    /// Get the raw sequence value.
    #[must_use]
    pub fn as_u16(&self) -> u16 {
        self.0
    }
}

impl fmt::Display for Sequence {
    fn fmt(&self, f: &mut fmt::Formatter) -> fmt::Result {
        write!(f, "{:0width$}", self.0, width = SEQUENCE_LENGTH)
    }
}

impl std::str::FromStr for Sequence {
    type Err = Error;

    fn from_str(s: &str) -> Result<Self> {
        let value: u16 = s
            .parse()
            .map_err(|_| Error::InvalidSequence(format!("Invalid sequence: {s}")))?;
        Sequence::new(value)
    }
}

/// Command codes of the terminal protocol
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum CommandCode {
    /// Unsolicited attendance event pushed by the terminal.
    EventReport,
    /// Keepalive probe.
    Ping,
    /// Generic success response.
    Ack,
    /// Error response; first field carries the reason.
    Error,
    /// Shared-secret handshake.
    Auth,
    /// Terminal status query.
    QueryStatus,
    /// Historical record request (fields: start, end).
    SyncRequest,
    /// Historical record batch response.
    LogBatch,
}

impl CommandCode {
    /// Wire representation of the command code.
    #[must_use]
    pub fn as_str(&self) -> &'static str {
        match self {
            CommandCode::EventReport => "EVT",
            CommandCode::Ping => "PING",
            CommandCode::Ack => "ACK",
            CommandCode::Error => "ERR",
            CommandCode::Auth => "AUTH",
            CommandCode::QueryStatus => "STAT",
            CommandCode::SyncRequest => "SYNC",
            CommandCode::LogBatch => "LOG",
        }
    }
}

impl fmt::Display for CommandCode {
    fn fmt(&self, f: &mut fmt::Formatter) -> fmt::Result {
        write!(f, "{}", self.as_str())
    }
}

impl std::str::FromStr for CommandCode {
    type Err = Error;

    fn from_str(s: &str) -> Result<Self> {
        match s {
            "EVT" => Ok(CommandCode::EventReport),
            "PING" => Ok(CommandCode::Ping),
            "ACK" => Ok(CommandCode::Ack),
            "ERR" => Ok(CommandCode::Error),
            "AUTH" => Ok(CommandCode::Auth),
            "STAT" => Ok(CommandCode::QueryStatus),
            "SYNC" => Ok(CommandCode::SyncRequest),
            "LOG" => Ok(CommandCode::LogBatch),
            _ => Err(Error::InvalidCommandCode(s.to_string())),
        }
    }
}

/// Validate a single protocol field.
///
/// Fields must be ASCII, free of header/field delimiters and framing
/// bytes, and bounded in length.
pub(crate) fn validate_field(field: &str) -> Result<()> {
    if field.len() > MAX_FIELD_LENGTH {
        return Err(Error::InvalidMessageFormat(format!(
            "Field exceeds {MAX_FIELD_LENGTH} bytes: {} bytes",
            field.len()
        )));
    }
    if !field.is_ascii() {
        return Err(Error::InvalidMessageFormat(
            "Field must be ASCII".to_string(),
        ));
    }
    if field.contains(['+', ']']) || field.bytes().any(|b| b < 0x20) {
        return Err(Error::InvalidMessageFormat(format!(
            "Field contains protocol delimiters or control bytes: {field:?}"
        )));
    }
    Ok(())
}

/// Parsed terminal protocol message
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Message {
    pub device_id: DeviceId,
    pub sequence: Sequence,
    pub command: CommandCode,
    pub fields: Vec<String>,
}

impl Message {
    /// Create a message, validating every field.
    ///
    /// # Errors
    /// Returns `Error::InvalidMessageFormat` if any field contains
    /// protocol delimiters, control bytes, or exceeds the length limit.
    pub fn new(
        device_id: DeviceId,
        sequence: Sequence,
        command: CommandCode,
        fields: Vec<String>,
    ) -> Result<Self> {
        for field in &fields {
            validate_field(field)?;
        }
        Ok(Message {
            device_id,
            sequence,
            command,
            fields,
        })
    }

    /// Create a message without re-validating fields.
    ///
    /// Used by the frame parser, which validates during tokenization.
    pub(crate) fn new_unchecked(
        device_id: DeviceId,
        sequence: Sequence,
        command: CommandCode,
        fields: Vec<String>,
    ) -> Self {
        Message {
            device_id,
            sequence,
            command,
            fields,
        }
    }

    /// Convenience constructor for a keepalive probe.
    pub fn ping(device_id: DeviceId, sequence: Sequence) -> Self {
        Message::new_unchecked(device_id, sequence, CommandCode::Ping, Vec::new())
    }

    /// Get field by index.
    pub fn field(&self, index: usize) -> Option<&str> {
        self.fields.get(index).map(|s| s.as_str())
    }

    /// Get required field or error.
    pub fn required_field(&self, index: usize, name: &str) -> Result<&str> {
        self.field(index)
            .ok_or_else(|| Error::MissingField(name.to_string()))
    }

    /// Number of fields in the message.
    pub fn field_count(&self) -> usize {
        self.fields.len()
    }

    /// Returns `true` if this is an unsolicited notification.
    pub fn is_notification(&self) -> bool {
        self.sequence.is_unsolicited()
    }
}
