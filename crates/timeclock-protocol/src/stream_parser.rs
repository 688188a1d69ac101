//! Stateful frame extraction from TCP byte streams.
//!
//! TCP is a stream protocol without message boundaries: a single read may
//! contain a partial frame, one complete frame, several frames, or
//! garbage between frames. The parser accumulates bytes and extracts
//! complete STX/ETX-delimited frames with a two-state machine.
//!
//! ```text
//! ┌─────────────┐  STX byte    ┌───────────────┐  ETX byte   ┌─────────────┐
//! │WaitingStart │─────────────>│ReadingPayload │────────────>│Frame queued │
//! └─────────────┘              └───────────────┘             └─────────────┘
//!       ^  │                          │
//!       │  │ Non-STX bytes            │ Payload > MAX_FRAME_SIZE
//!       │  │ (discarded)              │ (reset, frame dropped)
//!       │  └──────────────────────────┘
//! ```
//!
//! # Usage
//!
//! ```
//! use timeclock_protocol::StreamParser;
//!
//! let mut parser = StreamParser::new();
//! parser.feed(&[0x02, b'0', b'0', b'1', b'+']);
//! parser.feed(b"TCLK+0001+PING");
//! parser.feed(&[0x03]);
//!
//! let frame = parser.next_frame().expect("complete frame");
//! assert_eq!(frame.as_bytes(), b"001+TCLK+0001+PING");
//! ```

use bytes::{BufMut, BytesMut};
use std::collections::VecDeque;
use timeclock_core::constants::{END_BYTE, MAX_FRAME_SIZE, START_BYTE};

use crate::frame::Frame;

/// Initial payload capacity for frame assembly.
const INITIAL_PAYLOAD_CAPACITY: usize = 256;

/// States of the frame extraction machine.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ParserState {
    /// Scanning for STX; bytes before it are garbage and discarded.
    WaitingStart,

    /// Accumulating payload bytes until ETX.
    ReadingPayload,
}

/// Stateful stream parser for terminal protocol frames.
///
/// Feed raw socket bytes with [`feed`](StreamParser::feed) and drain
/// complete frames with [`next_frame`](StreamParser::next_frame). The
/// returned frames exclude the STX/ETX markers.
#[derive(Debug)]
pub struct StreamParser {
    state: ParserState,
    payload: BytesMut,
    frames: VecDeque<Frame>,
    /// Payloads dropped for exceeding the size bound.
    oversized_dropped: u64,
}

impl StreamParser {
    /// Create a parser in the waiting state.
    pub fn new() -> Self {
        StreamParser {
            state: ParserState::WaitingStart,
            payload: BytesMut::with_capacity(INITIAL_PAYLOAD_CAPACITY),
            frames: VecDeque::new(),
            oversized_dropped: 0,
        }
    }

    /// Consume a chunk of raw stream bytes.
    ///
    /// Complete frames discovered in the chunk are queued for
    /// [`next_frame`](StreamParser::next_frame). Payloads growing past
    /// [`MAX_FRAME_SIZE`] are dropped and the parser resyncs on the next
    /// STX.
    pub fn feed(&mut self, bytes: &[u8]) {
        for &byte in bytes {
            match self.state {
                ParserState::WaitingStart => {
                    if byte == START_BYTE {
                        self.payload.clear();
                        self.state = ParserState::ReadingPayload;
                    }
                    // anything before STX is inter-frame garbage
                }
                ParserState::ReadingPayload => {
                    if byte == END_BYTE {
                        let frame = Frame::from_bytes(&self.payload, false);
                        self.frames.push_back(frame);
                        self.payload.clear();
                        self.state = ParserState::WaitingStart;
                    } else if byte == START_BYTE {
                        // lost the previous ETX; resync on this STX
                        self.payload.clear();
                    } else {
                        if self.payload.len() >= MAX_FRAME_SIZE {
                            self.oversized_dropped += 1;
                            self.payload.clear();
                            self.state = ParserState::WaitingStart;
                            continue;
                        }
                        self.payload.put_u8(byte);
                    }
                }
            }
        }
    }

    /// Pop the next complete frame, if any.
    pub fn next_frame(&mut self) -> Option<Frame> {
        self.frames.pop_front()
    }

    /// Number of complete frames currently queued.
    pub fn pending_frames(&self) -> usize {
        self.frames.len()
    }

    /// Current state (for diagnostics).
    pub fn state(&self) -> ParserState {
        self.state
    }

    /// Count of payloads dropped for exceeding the frame size bound.
    pub fn oversized_dropped(&self) -> u64 {
        self.oversized_dropped
    }
}

impl Default for StreamParser {
    fn default() -> Self {
        Self::new()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_single_complete_frame() {
        let mut parser = StreamParser::new();
        parser.feed(b"\x02001+TCLK+0001+PING\x03");

        let frame = parser.next_frame().unwrap();
        assert_eq!(frame.as_bytes(), b"001+TCLK+0001+PING");
        assert!(parser.next_frame().is_none());
    }

    #[test]
    fn test_partial_feeds_across_reads() {
        let mut parser = StreamParser::new();
        parser.feed(&[0x02, b'0', b'0', b'1']);
        assert!(parser.next_frame().is_none());

        parser.feed(b"+TCLK+0001+PIN");
        assert!(parser.next_frame().is_none());

        parser.feed(&[b'G', 0x03]);
        let frame = parser.next_frame().unwrap();
        assert_eq!(frame.as_bytes(), b"001+TCLK+0001+PING");
    }

    #[test]
    fn test_multiple_frames_in_one_read() {
        let mut parser = StreamParser::new();
        parser.feed(b"\x02001+TCLK+0001+PING\x03\x02001+TCLK+0001+ACK\x03");

        assert_eq!(parser.pending_frames(), 2);
        assert_eq!(parser.next_frame().unwrap().as_bytes(), b"001+TCLK+0001+PING");
        assert_eq!(parser.next_frame().unwrap().as_bytes(), b"001+TCLK+0001+ACK");
    }

    #[test]
    fn test_garbage_before_start_discarded() {
        let mut parser = StreamParser::new();
        parser.feed(b"noise\xff\x00\x02001+TCLK+0001+ACK\x03");

        let frame = parser.next_frame().unwrap();
        assert_eq!(frame.as_bytes(), b"001+TCLK+0001+ACK");
    }

    #[test]
    fn test_resync_on_unexpected_stx() {
        let mut parser = StreamParser::new();
        // First frame never terminated; parser resyncs on the second STX.
        parser.feed(b"\x02001+TCLK+0001+PI\x02001+TCLK+0002+ACK\x03");

        let frame = parser.next_frame().unwrap();
        assert_eq!(frame.as_bytes(), b"001+TCLK+0002+ACK");
        assert!(parser.next_frame().is_none());
    }

    #[test]
    fn test_oversized_payload_dropped() {
        let mut parser = StreamParser::new();
        parser.feed(&[START_BYTE]);
        parser.feed(&vec![b'A'; MAX_FRAME_SIZE + 10]);
        parser.feed(&[END_BYTE]);

        assert!(parser.next_frame().is_none());
        assert_eq!(parser.oversized_dropped(), 1);
        assert_eq!(parser.state(), ParserState::WaitingStart);

        // Parser recovers for subsequent frames.
        parser.feed(b"\x02001+TCLK+0001+ACK\x03");
        assert!(parser.next_frame().is_some());
    }
}
