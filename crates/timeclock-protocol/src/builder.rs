use crate::message::{CommandCode, Message, Sequence, validate_field};
use timeclock_core::{DeviceId, Result};

/// Fluent builder for terminal protocol messages
///
/// # Example
/// ```
/// use timeclock_protocol::{MessageBuilder, CommandCode, Sequence};
/// use timeclock_core::DeviceId;
///
/// let msg = MessageBuilder::new(DeviceId::new(15).unwrap(), CommandCode::SyncRequest)
///     .sequence(Sequence::new(3).unwrap())
///     .field("2026-08-01 00:00:00").unwrap()
///     .field("2026-08-07 23:59:59").unwrap()
///     .build()
///     .unwrap();
/// assert_eq!(msg.field_count(), 2);
/// ```
pub struct MessageBuilder {
    device_id: DeviceId,
    sequence: Sequence,
    command: CommandCode,
    fields: Vec<String>,
}

impl MessageBuilder {
    /// Create a builder for the given terminal and command.
    ///
    /// The sequence defaults to [`Sequence::UNSOLICITED`]; commands must
    /// set a real sequence with [`sequence`](MessageBuilder::sequence).
    pub fn new(device_id: DeviceId, command: CommandCode) -> Self {
        MessageBuilder {
            device_id,
            sequence: Sequence::UNSOLICITED,
            command,
            fields: Vec::new(),
        }
    }

    /// Set the correlation sequence.
    pub fn sequence(mut self, sequence: Sequence) -> Self {
        self.sequence = sequence;
        self
    }

    /// Add a single field.
    ///
    /// # Errors
    /// Returns an error if the field contains protocol delimiters or
    /// control bytes.
    pub fn field(mut self, value: impl Into<String>) -> Result<Self> {
        let field = value.into();
        validate_field(&field)?;
        self.fields.push(field);
        Ok(self)
    }

    /// Add multiple fields.
    ///
    /// # Errors
    /// Returns an error if any field contains protocol delimiters or
    /// control bytes.
    pub fn fields(mut self, values: Vec<String>) -> Result<Self> {
        for field in &values {
            validate_field(field)?;
        }
        self.fields.extend(values);
        Ok(self)
    }

    /// Build the message.
    pub fn build(self) -> Result<Message> {
        // Fields were validated on insertion.
        Ok(Message::new_unchecked(
            self.device_id,
            self.sequence,
            self.command,
            self.fields,
        ))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_builder_defaults_to_unsolicited() {
        let msg = MessageBuilder::new(DeviceId::new(1).unwrap(), CommandCode::EventReport)
            .build()
            .unwrap();
        assert!(msg.is_notification());
    }

    #[test]
    fn test_builder_rejects_delimiter_field() {
        let result = MessageBuilder::new(DeviceId::new(1).unwrap(), CommandCode::Ack)
            .field("a]b");
        assert!(result.is_err());
    }
}
