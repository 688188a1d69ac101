//! Tokio codec for terminal protocol framing.
//!
//! [`TerminalCodec`] integrates the protocol with Tokio's async I/O by
//! implementing [`Decoder`] and [`Encoder<Message>`], so a
//! `Framed<TcpStream, TerminalCodec>` yields parsed [`Message`]s and
//! accepts them for transmission.
//!
//! ```text
//! TCP stream -> StreamParser -> Frame::parse -> Message
//! Message -> Frame::encode -> STX payload ETX -> TCP stream
//! ```
//!
//! # Usage
//!
//! ```rust,no_run
//! use tokio::net::TcpStream;
//! use tokio_util::codec::Framed;
//! use timeclock_protocol::{TerminalCodec, CommandCode, Sequence, MessageBuilder};
//! use timeclock_core::DeviceId;
//! use futures::{SinkExt, StreamExt};
//!
//! # async fn example() -> timeclock_core::Result<()> {
//! let stream = TcpStream::connect("10.0.0.5:4370").await?;
//! let mut framed = Framed::new(stream, TerminalCodec::new());
//!
//! let msg = MessageBuilder::new(DeviceId::new(15)?, CommandCode::Ping)
//!     .sequence(Sequence::new(1)?)
//!     .build()?;
//! framed.send(msg).await?;
//!
//! if let Some(Ok(response)) = framed.next().await {
//!     println!("Received: {:?}", response);
//! }
//! # Ok(())
//! # }
//! ```
//!
//! # Error Handling
//!
//! A frame that extracts but fails to parse is logged and skipped: one
//! malformed frame from a terminal must not terminate the stream (a
//! `Framed` stream is fused after a decode error, so skipping happens
//! here rather than in the caller). Oversized payloads are dropped
//! inside the [`StreamParser`].

use bytes::{BufMut, BytesMut};
use tokio_util::codec::{Decoder, Encoder};
use tracing::warn;

use crate::{Frame, Message, StreamParser};
use timeclock_core::{
    Error,
    constants::{END_BYTE, FRAME_OVERHEAD, MAX_FRAME_SIZE, START_BYTE},
};

/// Tokio codec for terminal protocol messages.
#[derive(Debug, Default)]
pub struct TerminalCodec {
    /// Stream parser handling partial frames and resynchronization.
    parser: StreamParser,
}

impl TerminalCodec {
    /// Create a new codec.
    pub fn new() -> Self {
        Self {
            parser: StreamParser::new(),
        }
    }
}

impl Decoder for TerminalCodec {
    type Item = Message;
    type Error = Error;

    fn decode(&mut self, src: &mut BytesMut) -> Result<Option<Message>, Error> {
        if !src.is_empty() {
            let chunk = src.split_to(src.len());
            self.parser.feed(&chunk);
        }

        while let Some(frame) = self.parser.next_frame() {
            match frame.parse() {
                Ok(message) => return Ok(Some(message)),
                Err(e) => {
                    warn!(error = %e, frame = %frame, "Unparseable frame dropped");
                }
            }
        }
        Ok(None)
    }
}

impl Encoder<Message> for TerminalCodec {
    type Error = Error;

    fn encode(&mut self, message: Message, dst: &mut BytesMut) -> Result<(), Error> {
        let frame = Frame::encode(&message);
        let size = frame.size() + FRAME_OVERHEAD;
        if size > MAX_FRAME_SIZE {
            return Err(Error::FrameTooLarge {
                size,
                max: MAX_FRAME_SIZE,
            });
        }

        dst.reserve(size);
        dst.put_u8(START_BYTE);
        dst.put_slice(frame.as_bytes());
        dst.put_u8(END_BYTE);
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::message::{CommandCode, Sequence};
    use timeclock_core::DeviceId;

    fn ping(seq: u16) -> Message {
        Message::new(
            DeviceId::new(1).unwrap(),
            Sequence::new(seq).unwrap(),
            CommandCode::Ping,
            vec![],
        )
        .unwrap()
    }

    #[test]
    fn test_encode_adds_framing() {
        let mut codec = TerminalCodec::new();
        let mut buf = BytesMut::new();

        codec.encode(ping(1), &mut buf).unwrap();
        assert_eq!(&buf[..], b"\x02001+TCLK+0001+PING\x03");
    }

    #[test]
    fn test_decode_empty_buffer() {
        let mut codec = TerminalCodec::new();
        let mut buf = BytesMut::new();
        assert!(codec.decode(&mut buf).unwrap().is_none());
    }

    #[test]
    fn test_decode_across_split_reads() {
        let mut codec = TerminalCodec::new();

        let mut first = BytesMut::from(&b"\x02001+TCLK+00"[..]);
        assert!(codec.decode(&mut first).unwrap().is_none());

        let mut second = BytesMut::from(&b"07+ACK\x03"[..]);
        let msg = codec.decode(&mut second).unwrap().unwrap();
        assert_eq!(msg.command, CommandCode::Ack);
        assert_eq!(msg.sequence.as_u16(), 7);
    }

    #[test]
    fn test_decode_queues_multiple_frames() {
        let mut codec = TerminalCodec::new();
        let mut buf = BytesMut::from(&b"\x02001+TCLK+0001+PING\x03\x02001+TCLK+0002+PING\x03"[..]);

        let first = codec.decode(&mut buf).unwrap().unwrap();
        let second = codec.decode(&mut buf).unwrap().unwrap();
        assert_eq!(first.sequence.as_u16(), 1);
        assert_eq!(second.sequence.as_u16(), 2);
        assert!(codec.decode(&mut buf).unwrap().is_none());
    }

    #[test]
    fn test_malformed_frame_skipped_without_poisoning_stream() {
        let mut codec = TerminalCodec::new();
        let mut buf =
            BytesMut::from(&b"\x02001+WRONG+0001+PING\x03\x02001+TCLK+0002+ACK\x03"[..]);

        // The bad frame is skipped; the good one behind it comes out.
        let msg = codec.decode(&mut buf).unwrap().unwrap();
        assert_eq!(msg.command, CommandCode::Ack);
        assert_eq!(msg.sequence.as_u16(), 2);
    }

    #[test]
    fn test_encode_rejects_oversized_message() {
        let mut codec = TerminalCodec::new();
        let mut buf = BytesMut::new();

        // 256-byte fields are the per-field maximum; enough of them pushes
        // the frame past the total bound.
        let fields: Vec<String> = (0..80).map(|_| "x".repeat(250)).collect();
        let msg = Message::new(
            DeviceId::new(1).unwrap(),
            Sequence::new(1).unwrap(),
            CommandCode::LogBatch,
            fields,
        )
        .unwrap();

        assert!(matches!(
            codec.encode(msg, &mut buf),
            Err(Error::FrameTooLarge { .. })
        ));
    }
}
