use crate::{
    Result,
    constants::{
        MAX_DEVICE_ID, MAX_SUBJECT_LENGTH, MIN_DEVICE_ID, MIN_SUBJECT_LENGTH, TIMESTAMP_FORMAT,
    },
    error::Error,
};
use chrono::{DateTime, NaiveDateTime, Utc};
use serde::{Deserialize, Serialize};
use std::fmt;
use subtle::ConstantTimeEq;

/// Terminal identifier (3 digits, zero-padded)
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
pub struct DeviceId(u16);

impl DeviceId {
    /// Create a new terminal ID with validation.
    ///
    /// # Errors
    /// Returns `Error::InvalidDeviceId` if the ID is outside the valid range (1-999).
    pub fn new(id: u16) -> Result<Self> {
        if !(MIN_DEVICE_ID..=MAX_DEVICE_ID).contains(&id) {
            return Err(Error::InvalidDeviceId(format!(
                "Terminal ID must be {MIN_DEVICE_ID}-{MAX_DEVICE_ID}, got {id}"
            )));
        }
        Ok(DeviceId(id))
    }

    /// Get the raw terminal ID.
    #[must_use]
    pub fn as_u16(&self) -> u16 {
        self.0
    }
}

impl fmt::Display for DeviceId {
    fn fmt(&self, f: &mut fmt::Formatter) -> fmt::Result {
        write!(f, "{:03}", self.0)
    }
}

impl std::str::FromStr for DeviceId {
    type Err = Error;

    fn from_str(s: &str) -> Result<Self> {
        let id: u16 = s
            .parse()
            .map_err(|_| Error::InvalidDeviceId(format!("Invalid terminal ID: {s}")))?;
        DeviceId::new(id)
    }
}

/// Employee badge identifier as reported by a terminal (1-32 ASCII chars)
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
pub struct SubjectId(String);

impl SubjectId {
    /// Create a new subject ID with validation.
    ///
    /// The value is trimmed before validation.
    ///
    /// # Errors
    /// Returns `Error::InvalidSubjectId` if the value is empty, longer than
    /// 32 characters, or contains non-ASCII characters.
    pub fn new(id: &str) -> Result<Self> {
        let id = id.trim();

        let len = id.len();
        if !(MIN_SUBJECT_LENGTH..=MAX_SUBJECT_LENGTH).contains(&len) {
            return Err(Error::InvalidSubjectId(format!(
                "Subject ID must be {MIN_SUBJECT_LENGTH}-{MAX_SUBJECT_LENGTH} chars, got {len}"
            )));
        }

        if !id.is_ascii() {
            return Err(Error::InvalidSubjectId(
                "Subject ID must be ASCII".to_string(),
            ));
        }

        Ok(SubjectId(id.to_string()))
    }

    /// Get the subject ID as a string slice.
    #[must_use]
    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl fmt::Display for SubjectId {
    fn fmt(&self, f: &mut fmt::Formatter) -> fmt::Result {
        write!(f, "{}", self.0)
    }
}

impl std::str::FromStr for SubjectId {
    type Err = Error;

    fn from_str(s: &str) -> Result<Self> {
        SubjectId::new(s)
    }
}

/// Optional per-terminal shared secret used in the AUTH handshake
///
/// # Security
/// Comparison is constant-time to avoid leaking how much of a candidate
/// secret matched.
#[derive(Debug, Clone, Eq, Serialize, Deserialize)]
pub struct SharedSecret(String);

impl SharedSecret {
    /// Create a shared secret.
    ///
    /// # Errors
    /// Returns `Error::Config` if the secret is empty or not ASCII.
    pub fn new(secret: &str) -> Result<Self> {
        if secret.is_empty() {
            return Err(Error::Config("Shared secret must not be empty".to_string()));
        }
        if !secret.is_ascii() {
            return Err(Error::Config("Shared secret must be ASCII".to_string()));
        }
        Ok(SharedSecret(secret.to_string()))
    }

    /// Get the secret as a string slice (wire transmission only).
    #[must_use]
    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl PartialEq for SharedSecret {
    fn eq(&self, other: &Self) -> bool {
        self.0.as_bytes().ct_eq(other.0.as_bytes()).into()
    }
}

/// Attendance event classification
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "kebab-case")]
pub enum EventKind {
    CheckIn,
    CheckOut,
    BreakStart,
    BreakEnd,
}

impl EventKind {
    /// Parse a wire kind flag.
    ///
    /// Returns `Ok(None)` for an empty flag: simple fingerprint terminals
    /// do not report a kind and leave classification to the ingestion
    /// pipeline.
    ///
    /// # Errors
    /// Returns `Error::InvalidEventKind` for an unrecognized code.
    pub fn from_wire(code: &str) -> Result<Option<Self>> {
        match code {
            "" => Ok(None),
            "0" => Ok(Some(EventKind::CheckIn)),
            "1" => Ok(Some(EventKind::CheckOut)),
            "2" => Ok(Some(EventKind::BreakStart)),
            "3" => Ok(Some(EventKind::BreakEnd)),
            _ => Err(Error::InvalidEventKind(code.to_string())),
        }
    }

    /// Wire flag for this kind.
    #[must_use]
    pub fn to_wire(self) -> &'static str {
        match self {
            EventKind::CheckIn => "0",
            EventKind::CheckOut => "1",
            EventKind::BreakStart => "2",
            EventKind::BreakEnd => "3",
        }
    }
}

impl fmt::Display for EventKind {
    fn fmt(&self, f: &mut fmt::Formatter) -> fmt::Result {
        match self {
            EventKind::CheckIn => write!(f, "check-in"),
            EventKind::CheckOut => write!(f, "check-out"),
            EventKind::BreakStart => write!(f, "break-start"),
            EventKind::BreakEnd => write!(f, "break-end"),
        }
    }
}

impl std::str::FromStr for EventKind {
    type Err = Error;

    fn from_str(s: &str) -> Result<Self> {
        match s {
            "check-in" => Ok(EventKind::CheckIn),
            "check-out" => Ok(EventKind::CheckOut),
            "break-start" => Ok(EventKind::BreakStart),
            "break-end" => Ok(EventKind::BreakEnd),
            _ => Err(Error::InvalidEventKind(s.to_string())),
        }
    }
}

/// Identification method used at the terminal
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum AuthMethod {
    Fingerprint,
    Face,
    Card,
    Pin,
}

impl AuthMethod {
    /// Parse a wire method code.
    ///
    /// # Errors
    /// Returns `Error::InvalidAuthMethod` for an unrecognized code.
    pub fn from_wire(code: &str) -> Result<Self> {
        match code {
            "1" => Ok(AuthMethod::Fingerprint),
            "2" => Ok(AuthMethod::Face),
            "3" => Ok(AuthMethod::Card),
            "4" => Ok(AuthMethod::Pin),
            _ => Err(Error::InvalidAuthMethod(code.to_string())),
        }
    }

    /// Wire code for this method.
    #[must_use]
    pub fn to_wire(self) -> &'static str {
        match self {
            AuthMethod::Fingerprint => "1",
            AuthMethod::Face => "2",
            AuthMethod::Card => "3",
            AuthMethod::Pin => "4",
        }
    }
}

impl fmt::Display for AuthMethod {
    fn fmt(&self, f: &mut fmt::Formatter) -> fmt::Result {
        match self {
            AuthMethod::Fingerprint => write!(f, "fingerprint"),
            AuthMethod::Face => write!(f, "face"),
            AuthMethod::Card => write!(f, "card"),
            AuthMethod::Pin => write!(f, "pin"),
        }
    }
}

impl std::str::FromStr for AuthMethod {
    type Err = Error;

    fn from_str(s: &str) -> Result<Self> {
        match s {
            "fingerprint" => Ok(AuthMethod::Fingerprint),
            "face" => Ok(AuthMethod::Face),
            "card" => Ok(AuthMethod::Card),
            "pin" => Ok(AuthMethod::Pin),
            _ => Err(Error::InvalidAuthMethod(s.to_string())),
        }
    }
}

/// Connection state of a registered terminal
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum ConnectionState {
    Disconnected,
    Connecting,
    Connected,
    Faulted,
}

impl fmt::Display for ConnectionState {
    fn fmt(&self, f: &mut fmt::Formatter) -> fmt::Result {
        match self {
            ConnectionState::Disconnected => write!(f, "disconnected"),
            ConnectionState::Connecting => write!(f, "connecting"),
            ConnectionState::Connected => write!(f, "connected"),
            ConnectionState::Faulted => write!(f, "faulted"),
        }
    }
}

impl std::str::FromStr for ConnectionState {
    type Err = Error;

    fn from_str(s: &str) -> Result<Self> {
        match s {
            "disconnected" => Ok(ConnectionState::Disconnected),
            "connecting" => Ok(ConnectionState::Connecting),
            "connected" => Ok(ConnectionState::Connected),
            "faulted" => Ok(ConnectionState::Faulted),
            _ => Err(Error::InvalidMessageFormat(format!(
                "Unknown connection state: {s}"
            ))),
        }
    }
}

/// Wire timestamp (`YYYY-MM-DD hh:mm:ss`, UTC)
///
/// Terminals report timestamps in UTC; there is no DST ambiguity to
/// resolve, unlike local-time protocols.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct WireTimestamp(DateTime<Utc>);

impl WireTimestamp {
    /// Create a timestamp from the current time.
    #[must_use]
    pub fn now() -> Self {
        WireTimestamp(Utc::now())
    }

    /// Create a timestamp from a UTC datetime.
    #[must_use]
    pub fn from_datetime(dt: DateTime<Utc>) -> Self {
        WireTimestamp(dt)
    }

    /// Parse from wire format: "2026-08-07 08:30:00".
    ///
    /// # Errors
    /// Returns `Error::InvalidTimestamp` if the string does not match the
    /// wire format.
    pub fn parse(s: &str) -> Result<Self> {
        let dt = NaiveDateTime::parse_from_str(s, TIMESTAMP_FORMAT)
            .map_err(|e| Error::InvalidTimestamp(format!("'{s}': {e}")))?;
        Ok(WireTimestamp(dt.and_utc()))
    }

    /// Format for wire transmission.
    #[must_use]
    pub fn format(&self) -> String {
        self.0.format(TIMESTAMP_FORMAT).to_string()
    }

    /// Get the inner UTC datetime.
    #[must_use]
    pub fn inner(&self) -> DateTime<Utc> {
        self.0
    }
}

impl fmt::Display for WireTimestamp {
    fn fmt(&self, f: &mut fmt::Formatter) -> fmt::Result {
        write!(f, "{}", self.format())
    }
}

/// Canonical attendance record
///
/// Derived from a raw terminal notification by the ingestion pipeline and
/// immutable once created: corrections are new events, never edits.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct AttendanceEvent {
    /// Employee badge ID as reported by the terminal.
    pub subject_id: SubjectId,

    /// Device-reported event time, UTC.
    pub timestamp: DateTime<Utc>,

    /// Event classification.
    pub kind: EventKind,

    /// Identification method used at the terminal.
    pub method: AuthMethod,

    /// Terminal that produced the event.
    pub device_id: DeviceId,
}

/// Employee record as returned by the persistence gateway
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Employee {
    pub subject_id: SubjectId,
    pub name: String,
    pub active: bool,
}

#[cfg(test)]
mod tests {
    use super::*;
    use rstest::rstest;

    #[rstest]
    #[case("15", 15)]
    #[case("001", 1)]
    #[case("999", 999)]
    fn test_device_id_valid(#[case] input: &str, #[case] expected: u16) {
        let id: DeviceId = input.parse().unwrap();
        assert_eq!(id.as_u16(), expected);
        assert_eq!(id.to_string(), format!("{:03}", expected));
    }

    #[rstest]
    #[case("0")] // 0 invalid
    #[case("1000")] // > 999 invalid
    #[case("abc")] // non-numeric
    fn test_device_id_invalid(#[case] input: &str) {
        let result: Result<DeviceId> = input.parse();
        assert!(result.is_err());
    }

    #[rstest]
    #[case("EMP001", "EMP001")]
    #[case("  42  ", "42")]
    #[case("A", "A")]
    fn test_subject_id_valid(#[case] input: &str, #[case] expected: &str) {
        let subject = SubjectId::new(input).unwrap();
        assert_eq!(subject.as_str(), expected);
    }

    #[rstest]
    #[case("")] // empty
    #[case("   ")] // whitespace only
    #[case("ABCDEFGHIJKLMNOPQRSTUVWXYZ0123456")] // 33 chars
    fn test_subject_id_invalid(#[case] input: &str) {
        assert!(SubjectId::new(input).is_err());
    }

    #[test]
    fn test_shared_secret_equality() {
        let a = SharedSecret::new("commkey-42").unwrap();
        let b = SharedSecret::new("commkey-42").unwrap();
        let c = SharedSecret::new("commkey-43").unwrap();
        assert_eq!(a, b);
        assert_ne!(a, c);
    }

    #[test]
    fn test_event_kind_wire_codes() {
        assert_eq!(EventKind::from_wire("0").unwrap(), Some(EventKind::CheckIn));
        assert_eq!(
            EventKind::from_wire("3").unwrap(),
            Some(EventKind::BreakEnd)
        );
        assert_eq!(EventKind::from_wire("").unwrap(), None);
        assert!(EventKind::from_wire("7").is_err());

        assert_eq!(EventKind::CheckOut.to_wire(), "1");
    }

    #[test]
    fn test_auth_method_wire_codes() {
        assert_eq!(AuthMethod::from_wire("1").unwrap(), AuthMethod::Fingerprint);
        assert_eq!(AuthMethod::from_wire("4").unwrap(), AuthMethod::Pin);
        assert!(AuthMethod::from_wire("9").is_err());
        assert!(AuthMethod::from_wire("").is_err());

        assert_eq!(AuthMethod::Face.to_wire(), "2");
    }

    #[test]
    fn test_wire_timestamp_round_trip() {
        let timestamp = WireTimestamp::parse("2026-08-07 08:30:00").unwrap();
        assert_eq!(timestamp.format(), "2026-08-07 08:30:00");
    }

    #[rstest]
    #[case("07/08/2026 08:30:00")] // wrong ordering
    #[case("2026-08-07T08:30:00Z")] // ISO 8601, not wire format
    #[case("garbage")]
    fn test_wire_timestamp_invalid(#[case] input: &str) {
        assert!(WireTimestamp::parse(input).is_err());
    }

    #[test]
    fn test_connection_state_display() {
        assert_eq!(ConnectionState::Connected.to_string(), "connected");
        assert_eq!(ConnectionState::Faulted.to_string(), "faulted");
    }
}
