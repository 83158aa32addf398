//! Notification payloads pushed to connected clients.
//!
//! A [`Notification`] is a JSON object with a mandatory `type` discriminator
//! and free-form sibling fields. Clients dispatch on `type`:
//!
//! | `type`                | payload                                     |
//! |-----------------------|---------------------------------------------|
//! | `connection`          | `message`, `connections`                    |
//! | `echo`                | `message`, `user_id`                        |
//! | `mentorship_request`  | `data` (see [`MentorshipRequestCreated`])   |
//! | `mentorship_response` | `data` (see [`MentorshipStatusChanged`])    |
//! | `announcement`        | `message`                                   |

use std::fmt;
use std::sync::Arc;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use serde_json::{json, Map, Value};
use uuid::Uuid;

use crate::error::DeliveryError;
use crate::UserId;

/// Kind sent to a client right after its socket is accepted.
pub const KIND_CONNECTION: &str = "connection";
/// Kind used to echo client text frames back.
pub const KIND_ECHO: &str = "echo";
/// Kind sent to an alumni when a student requests mentorship.
pub const KIND_MENTORSHIP_REQUEST: &str = "mentorship_request";
/// Kind sent to a student when an alumni answers a request.
pub const KIND_MENTORSHIP_RESPONSE: &str = "mentorship_response";
/// Kind used for system-wide broadcasts.
pub const KIND_ANNOUNCEMENT: &str = "announcement";

/// A structured notification document.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Notification {
    #[serde(rename = "type")]
    kind: String,
    #[serde(flatten)]
    fields: Map<String, Value>,
}

impl Notification {
    /// Create an empty notification of the given kind.
    pub fn new(kind: impl Into<String>) -> Self {
        Self {
            kind: kind.into(),
            fields: Map::new(),
        }
    }

    /// Add a field. The `type` key is reserved for the kind: a string value
    /// replaces the kind, anything else is ignored.
    pub fn with_field(mut self, key: impl Into<String>, value: impl Into<Value>) -> Self {
        let key = key.into();
        let value = value.into();
        if key == "type" {
            if let Value::String(kind) = value {
                self.kind = kind;
            }
            return self;
        }
        self.fields.insert(key, value);
        self
    }

    /// The `type` discriminator.
    pub fn kind(&self) -> &str {
        &self.kind
    }

    /// Look up a field other than `type`.
    pub fn get(&self, key: &str) -> Option<&Value> {
        self.fields.get(key)
    }

    /// Encode into the JSON text sent on the wire.
    pub fn encode(&self) -> Result<OutboundNotification, DeliveryError> {
        let text = serde_json::to_string(self)?;
        Ok(OutboundNotification {
            kind: Arc::from(self.kind.as_str()),
            text: Arc::from(text),
        })
    }

    /// Acknowledgement sent when a socket is accepted.
    pub fn connection_ack(user_id: UserId, connections: usize) -> Self {
        Self::new(KIND_CONNECTION)
            .with_field(
                "message",
                format!("Welcome! You are connected as user {}", user_id),
            )
            .with_field("connections", connections)
    }

    /// Echo of a text frame received from a client.
    pub fn echo(user_id: UserId, text: &str) -> Self {
        Self::new(KIND_ECHO)
            .with_field("message", format!("You sent: {}", text))
            .with_field("user_id", user_id.to_string())
    }

    /// System-wide announcement.
    pub fn announcement(message: impl Into<String>) -> Self {
        Self::new(KIND_ANNOUNCEMENT).with_field("message", message.into())
    }
}

/// A notification encoded once and shared by every recipient of a send.
#[derive(Debug, Clone)]
pub struct OutboundNotification {
    kind: Arc<str>,
    text: Arc<str>,
}

impl OutboundNotification {
    /// The `type` of the encoded notification.
    pub fn kind(&self) -> &str {
        &self.kind
    }

    /// JSON text of the notification.
    pub fn as_str(&self) -> &str {
        &self.text
    }
}

/// Status of a mentorship request.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum MentorshipStatus {
    Pending,
    Accepted,
    Rejected,
    Completed,
}

impl MentorshipStatus {
    pub fn as_str(&self) -> &'static str {
        match self {
            MentorshipStatus::Pending => "pending",
            MentorshipStatus::Accepted => "accepted",
            MentorshipStatus::Rejected => "rejected",
            MentorshipStatus::Completed => "completed",
        }
    }
}

impl fmt::Display for MentorshipStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// A student asked an alumni for mentorship. Delivered to the alumni.
#[derive(Debug, Clone)]
pub struct MentorshipRequestCreated {
    pub request_id: Uuid,
    pub student_id: UserId,
    pub student_name: String,
    pub message: String,
    pub created_at: DateTime<Utc>,
}

impl From<MentorshipRequestCreated> for Notification {
    fn from(event: MentorshipRequestCreated) -> Self {
        Notification::new(KIND_MENTORSHIP_REQUEST).with_field(
            "data",
            json!({
                "request_id": event.request_id.to_string(),
                "student_name": event.student_name,
                "student_id": event.student_id.to_string(),
                "message": event.message,
                "created_at": event.created_at.to_rfc3339(),
            }),
        )
    }
}

/// An alumni changed the status of a request. Delivered to the student.
#[derive(Debug, Clone)]
pub struct MentorshipStatusChanged {
    pub request_id: Uuid,
    pub status: MentorshipStatus,
    pub alumni_name: String,
    pub updated_at: DateTime<Utc>,
}

impl From<MentorshipStatusChanged> for Notification {
    fn from(event: MentorshipStatusChanged) -> Self {
        Notification::new(KIND_MENTORSHIP_RESPONSE).with_field(
            "data",
            json!({
                "request_id": event.request_id.to_string(),
                "status": event.status.as_str(),
                "alumni_name": event.alumni_name,
                "updated_at": event.updated_at.to_rfc3339(),
            }),
        )
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::TimeZone;

    #[test]
    fn test_notification_serializes_type_beside_fields() {
        let notification = Notification::new("x").with_field("count", 3);
        let value: Value = serde_json::to_value(&notification).unwrap();

        assert_eq!(value, json!({"type": "x", "count": 3}));
    }

    #[test]
    fn test_type_field_is_reserved() {
        let notification = Notification::new("x")
            .with_field("type", 42)
            .with_field("type", "y");

        assert_eq!(notification.kind(), "y");
        assert!(notification.get("type").is_none());
        let encoded = notification.encode().unwrap();
        assert_eq!(encoded.as_str(), r#"{"type":"y"}"#);
    }

    #[test]
    fn test_notification_deserializes_arbitrary_document() {
        let notification: Notification =
            serde_json::from_str(r#"{"type":"announce","message":"hi","n":1}"#).unwrap();

        assert_eq!(notification.kind(), "announce");
        assert_eq!(notification.get("message"), Some(&json!("hi")));
        assert_eq!(notification.get("n"), Some(&json!(1)));
    }

    #[test]
    fn test_connection_ack() {
        let user_id = Uuid::nil();
        let notification = Notification::connection_ack(user_id, 2);

        assert_eq!(notification.kind(), KIND_CONNECTION);
        assert_eq!(
            notification.get("message"),
            Some(&json!(
                "Welcome! You are connected as user 00000000-0000-0000-0000-000000000000"
            ))
        );
        assert_eq!(notification.get("connections"), Some(&json!(2)));
    }

    #[test]
    fn test_echo() {
        let user_id = Uuid::new_v4();
        let notification = Notification::echo(user_id, "ping");

        assert_eq!(notification.kind(), KIND_ECHO);
        assert_eq!(notification.get("message"), Some(&json!("You sent: ping")));
        assert_eq!(
            notification.get("user_id"),
            Some(&json!(user_id.to_string()))
        );
    }

    #[test]
    fn test_mentorship_request_payload() {
        let request_id = Uuid::new_v4();
        let student_id = Uuid::new_v4();
        let created_at = Utc.with_ymd_and_hms(2025, 3, 1, 12, 0, 0).unwrap();

        let notification: Notification = MentorshipRequestCreated {
            request_id,
            student_id,
            student_name: "Ada Student".to_string(),
            message: "Could you review my resume?".to_string(),
            created_at,
        }
        .into();

        assert_eq!(notification.kind(), KIND_MENTORSHIP_REQUEST);
        let data = notification.get("data").unwrap();
        assert_eq!(data["request_id"], json!(request_id.to_string()));
        assert_eq!(data["student_id"], json!(student_id.to_string()));
        assert_eq!(data["student_name"], json!("Ada Student"));
        assert_eq!(data["message"], json!("Could you review my resume?"));
        assert_eq!(data["created_at"], json!("2025-03-01T12:00:00+00:00"));
    }

    #[test]
    fn test_mentorship_response_payload() {
        let notification: Notification = MentorshipStatusChanged {
            request_id: Uuid::nil(),
            status: MentorshipStatus::Accepted,
            alumni_name: "Grace Alumni".to_string(),
            updated_at: Utc.with_ymd_and_hms(2025, 3, 2, 8, 30, 0).unwrap(),
        }
        .into();

        assert_eq!(notification.kind(), KIND_MENTORSHIP_RESPONSE);
        let data = notification.get("data").unwrap();
        assert_eq!(data["status"], json!("accepted"));
        assert_eq!(data["alumni_name"], json!("Grace Alumni"));
        assert_eq!(data["updated_at"], json!("2025-03-02T08:30:00+00:00"));
    }

    #[test]
    fn test_mentorship_status_serialization() {
        assert_eq!(
            serde_json::to_string(&MentorshipStatus::Rejected).unwrap(),
            "\"rejected\""
        );
        assert_eq!(MentorshipStatus::Completed.to_string(), "completed");
    }

    #[test]
    fn test_encode_keeps_kind() {
        let encoded = Notification::announcement("maintenance at noon")
            .encode()
            .unwrap();

        assert_eq!(encoded.kind(), KIND_ANNOUNCEMENT);
        let value: Value = serde_json::from_str(encoded.as_str()).unwrap();
        assert_eq!(
            value,
            json!({"type": "announcement", "message": "maintenance at noon"})
        );
    }
}
