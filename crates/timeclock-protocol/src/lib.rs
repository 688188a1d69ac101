//! Wire protocol for timeclock attendance terminals.
//!
//! Terminals speak an ASCII protocol over a persistent TCP connection.
//! Every message is framed between STX (0x02) and ETX (0x03) and carries
//! a terminal ID, a correlation sequence and a command code:
//!
//! ```text
//! <STX>015+TCLK+0007+PING<ETX>                      command (sequence 0007)
//! <STX>015+TCLK+0007+ACK<ETX>                       correlated response
//! <STX>015+TCLK+0000+EVT]EMP001]2026-08-07 08:30:00]1]<ETX>   unsolicited event
//! ```
//!
//! The sequence pairs a command with its eventual response on the
//! multiplexed connection; sequence `0000` marks unsolicited
//! notifications pushed by the terminal (live attendance events).
//!
//! Module layout:
//! - [`message`] - parsed message representation and command codes
//! - [`frame`] - wire format conversion
//! - [`stream_parser`] - stateful STX/ETX extraction from TCP streams
//! - [`codec`] - tokio codec integration ([`TerminalCodec`])
//! - [`builder`] - fluent message construction
//! - [`notification`] - attendance payload parsing

pub mod builder;
pub mod codec;
pub mod frame;
pub mod message;
pub mod notification;
pub mod stream_parser;

pub use builder::MessageBuilder;
pub use codec::TerminalCodec;
pub use frame::Frame;
pub use message::{CommandCode, Message, Sequence};
pub use notification::{AttendanceNotification, RawNotification, log_batch_fields, parse_log_batch};
pub use stream_parser::StreamParser;
