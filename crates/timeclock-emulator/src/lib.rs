//! Scriptable attendance terminal emulator.
//!
//! Integration tests drive the server stack against this emulator
//! instead of physical hardware. It binds a local listener, speaks the
//! terminal wire protocol, and exposes a handle for pushing unsolicited
//! attendance events, muting command responses (to provoke timeouts)
//! and dropping the connection mid-session (to provoke recovery).

pub mod terminal;

pub use terminal::{EmulatedTerminal, EmulatorBehavior, EmulatorError, TerminalHandle};
