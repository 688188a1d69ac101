use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::fmt;

/// Kind discriminator carried in every broadcast envelope
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum MessageKind {
    /// Normalized attendance event.
    Attendance,
    /// Terminal connection state change.
    DeviceStatus,
    /// Employee record change from the CRUD layer.
    EmployeeUpdate,
    /// Operational alert (e.g. persistence retries exhausted).
    SystemAlert,
    /// Periodic hub liveness message.
    Heartbeat,
}

impl fmt::Display for MessageKind {
    fn fmt(&self, f: &mut fmt::Formatter) -> fmt::Result {
        match self {
            MessageKind::Attendance => write!(f, "attendance"),
            MessageKind::DeviceStatus => write!(f, "device_status"),
            MessageKind::EmployeeUpdate => write!(f, "employee_update"),
            MessageKind::SystemAlert => write!(f, "system_alert"),
            MessageKind::Heartbeat => write!(f, "heartbeat"),
        }
    }
}

/// Envelope delivered to every subscriber: `{type, data, timestamp}`
///
/// The timestamp is assigned at publish time, not at event time; event
/// payloads carry their own device-reported timestamps.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct BroadcastMessage {
    #[serde(rename = "type")]
    pub kind: MessageKind,
    pub data: serde_json::Value,
    pub timestamp: DateTime<Utc>,
}

impl BroadcastMessage {
    /// Build an envelope stamped with the current time.
    pub fn new(kind: MessageKind, data: serde_json::Value) -> Self {
        BroadcastMessage {
            kind,
            data,
            timestamp: Utc::now(),
        }
    }

    /// Serialize a payload into an envelope.
    ///
    /// # Errors
    /// Propagates `serde_json` serialization failures.
    pub fn from_payload<T: Serialize>(kind: MessageKind, payload: &T) -> serde_json::Result<Self> {
        Ok(Self::new(kind, serde_json::to_value(payload)?))
    }

    /// Operational alert with a reason and free-form detail.
    pub fn system_alert(reason: &str, detail: serde_json::Value) -> Self {
        Self::new(
            MessageKind::SystemAlert,
            serde_json::json!({ "reason": reason, "detail": detail }),
        )
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_envelope_wire_shape() {
        let msg = BroadcastMessage::new(
            MessageKind::DeviceStatus,
            serde_json::json!({ "device_id": 15, "state": "connected" }),
        );
        let json = serde_json::to_value(&msg).unwrap();

        assert_eq!(json["type"], "device_status");
        assert_eq!(json["data"]["state"], "connected");
        assert!(json["timestamp"].is_string());
    }

    #[test]
    fn test_system_alert_shape() {
        let msg = BroadcastMessage::system_alert(
            "persist_failed",
            serde_json::json!({ "subject_id": "EMP001" }),
        );
        assert_eq!(msg.kind, MessageKind::SystemAlert);
        assert_eq!(msg.data["reason"], "persist_failed");
    }
}
