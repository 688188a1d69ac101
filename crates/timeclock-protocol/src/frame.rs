use crate::message::{CommandCode, Message, Sequence};
use bytes::{BufMut, Bytes, BytesMut};
use std::fmt;
use timeclock_core::{DeviceId, Error, Result, constants::*};

/// Byte-level wire representation of one protocol message
///
/// A `Frame` holds the raw bytes of a message, optionally including the
/// STX/ETX framing markers used on the TCP stream.
///
/// # Wire Format
///
/// ```text
/// 015+TCLK+0000+EVT]EMP001]2026-08-07 08:30:00]1]0
/// ^^^      ^^^^ ^^^ ^^^^^^^^^^^^^^^^^^^^^^^^^^^^^^
/// ID       SEQ  CMD Subject | Timestamp | Method | Kind
/// ```
///
/// # Basic Usage
///
/// ```
/// use timeclock_protocol::{Frame, Message, CommandCode, Sequence};
/// use timeclock_core::DeviceId;
///
/// let msg = Message::new(
///     DeviceId::new(15).unwrap(),
///     Sequence::new(7).unwrap(),
///     CommandCode::Ping,
///     vec![],
/// )
/// .unwrap();
///
/// let frame = Frame::encode(&msg);
/// let framed = frame.with_framing();
/// assert_eq!(framed.as_bytes()[0], 0x02); // STX
/// ```
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Frame {
    /// Raw bytes of the frame including all delimiters.
    data: Bytes,

    /// Whether this frame includes STX/ETX framing bytes.
    has_framing: bool,
}

impl Frame {
    /// Create a new frame from raw bytes.
    pub fn new(data: Bytes, has_framing: bool) -> Self {
        Frame { data, has_framing }
    }

    /// Create a frame from a byte slice.
    pub fn from_bytes(bytes: &[u8], has_framing: bool) -> Self {
        Self::new(Bytes::copy_from_slice(bytes), has_framing)
    }

    /// Create a frame from an ASCII string (most common case in tests).
    pub fn from_string(s: &str, has_framing: bool) -> Self {
        Self::from_bytes(s.as_bytes(), has_framing)
    }

    /// Encode a message into its wire representation (no framing bytes).
    pub fn encode(message: &Message) -> Self {
        let mut payload = String::with_capacity(64);
        payload.push_str(&message.device_id.to_string());
        payload.push_str(DELIMITER_HEADER);
        payload.push_str(PROTOCOL_ID);
        payload.push_str(DELIMITER_HEADER);
        payload.push_str(&message.sequence.to_string());
        payload.push_str(DELIMITER_HEADER);
        payload.push_str(message.command.as_str());
        for field in &message.fields {
            payload.push_str(DELIMITER_FIELD);
            payload.push_str(field);
        }
        Frame::new(Bytes::from(payload), false)
    }

    /// Get the raw bytes of the frame.
    pub fn as_bytes(&self) -> &[u8] {
        &self.data
    }

    /// Frame size in bytes.
    pub fn size(&self) -> usize {
        self.data.len()
    }

    /// Check if frame has STX/ETX framing.
    pub fn has_framing(&self) -> bool {
        self.has_framing
    }

    /// Content bytes excluding framing markers when present.
    fn content_bytes(&self) -> &[u8] {
        if self.has_framing && self.data.len() >= FRAME_OVERHEAD {
            &self.data[1..self.data.len() - 1]
        } else {
            &self.data[..]
        }
    }

    /// Add STX/ETX framing bytes for transmission.
    ///
    /// Returns a new frame with framing added; a no-op if framing is
    /// already present.
    pub fn with_framing(self) -> Self {
        if self.has_framing {
            return self;
        }

        let mut buf = BytesMut::with_capacity(self.data.len() + FRAME_OVERHEAD);
        buf.put_u8(START_BYTE);
        buf.put_slice(&self.data);
        buf.put_u8(END_BYTE);
        Frame::new(buf.freeze(), true)
    }

    /// Parse the frame content into a [`Message`].
    ///
    /// # Errors
    /// Returns `Error::InvalidMessageFormat` for non-ASCII content, wrong
    /// protocol identifier, or a malformed header; field validation errors
    /// propagate from the tokenizer.
    pub fn parse(&self) -> Result<Message> {
        let content = self.content_bytes();

        let text = std::str::from_utf8(content)
            .map_err(|_| Error::InvalidMessageFormat("Frame is not valid UTF-8".to_string()))?;
        if !text.is_ascii() {
            return Err(Error::InvalidMessageFormat(
                "Frame contains non-ASCII bytes".to_string(),
            ));
        }

        // Header: ID+TCLK+SEQ+<command and fields>
        let mut header = text.splitn(4, DELIMITER_HEADER);
        let id_part = header
            .next()
            .filter(|s| !s.is_empty())
            .ok_or_else(|| Error::InvalidMessageFormat("Missing terminal ID".to_string()))?;
        let proto_part = header
            .next()
            .ok_or_else(|| Error::InvalidMessageFormat("Missing protocol ID".to_string()))?;
        let seq_part = header
            .next()
            .ok_or_else(|| Error::InvalidMessageFormat("Missing sequence".to_string()))?;
        let tail = header
            .next()
            .ok_or_else(|| Error::InvalidMessageFormat("Missing command".to_string()))?;

        if proto_part != PROTOCOL_ID {
            return Err(Error::InvalidMessageFormat(format!(
                "Unknown protocol ID: {proto_part}"
            )));
        }

        let device_id: DeviceId = id_part.parse()?;
        let sequence: Sequence = seq_part.parse()?;

        let mut parts = tail.split(DELIMITER_FIELD);
        let command: CommandCode = parts
            .next()
            .unwrap_or_default()
            .parse()?;

        let mut fields = Vec::new();
        for part in parts {
            crate::message::validate_field(part)?;
            fields.push(part.to_string());
        }

        Ok(Message::new_unchecked(device_id, sequence, command, fields))
    }
}

impl From<&Message> for Frame {
    fn from(message: &Message) -> Self {
        Frame::encode(message)
    }
}

impl fmt::Display for Frame {
    fn fmt(&self, f: &mut fmt::Formatter) -> fmt::Result {
        write!(f, "{}", String::from_utf8_lossy(self.content_bytes()))
    }
}
