//! Message envelope.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

/// Envelope shared by inbound requests and outbound results.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct QueueMessage<T> {
    /// Identifier assigned by the sender, echoed on replies.
    #[serde(default)]
    pub message_id: String,
    /// Kind of message, echoed on replies.
    #[serde(default)]
    pub message_type: String,
    /// When the message was published.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub published_date: Option<DateTime<Utc>>,
    /// Payload.
    pub data: T,
}

impl<T> QueueMessage<T> {
    /// Creates a message stamped with the current time.
    pub fn new(message_id: impl Into<String>, message_type: impl Into<String>, data: T) -> Self {
        Self {
            message_id: message_id.into(),
            message_type: message_type.into(),
            published_date: Some(Utc::now()),
            data,
        }
    }

    /// Builds a reply that keeps this message's id and type, carries `data`,
    /// and is stamped with the current time.
    pub fn reply<U>(&self, data: U) -> QueueMessage<U> {
        QueueMessage::new(self.message_id.clone(), self.message_type.clone(), data)
    }

    /// Replaces the payload, keeping the envelope.
    pub fn map<U>(self, f: impl FnOnce(T) -> U) -> QueueMessage<U> {
        QueueMessage {
            message_id: self.message_id,
            message_type: self.message_type,
            published_date: self.published_date,
            data: f(self.data),
        }
    }
}

impl<T: Serialize> QueueMessage<T> {
    /// Converts the payload to untyped JSON for publishing.
    ///
    /// # Errors
    ///
    /// Returns a [`serde_json::Error`] if the payload cannot be serialized.
    pub fn to_raw(&self) -> Result<crate::RawMessage, serde_json::Error> {
        Ok(QueueMessage {
            message_id: self.message_id.clone(),
            message_type: self.message_type.clone(),
            published_date: self.published_date,
            data: serde_json::to_value(&self.data)?,
        })
    }
}

#[cfg(test)]
mod tests {
    use serde_json::json;

    use super::*;

    #[test]
    fn uses_camel_case_envelope() {
        let message: QueueMessage<serde_json::Value> = serde_json::from_value(json!({
            "messageId": "m1",
            "messageType": "workflow",
            "publishedDate": "2024-05-01T12:00:00Z",
            "data": {"data_type": "osw"}
        }))
        .unwrap();

        assert_eq!(message.message_id, "m1");
        assert_eq!(message.message_type, "workflow");
        assert!(message.published_date.is_some());
        assert_eq!(message.data["data_type"], "osw");
    }

    #[test]
    fn reply_keeps_identity_and_restamps() {
        let original = QueueMessage {
            message_id: "m1".to_string(),
            message_type: "workflow".to_string(),
            published_date: None,
            data: json!({"data_type": "osw"}),
        };

        let reply = original.reply(json!({"success": true}));
        let encoded = serde_json::to_value(&reply).unwrap();

        assert_eq!(encoded["messageId"], "m1");
        assert_eq!(encoded["messageType"], "workflow");
        assert!(encoded["publishedDate"].is_string());
        assert_eq!(encoded["data"], json!({"success": true}));
    }
}
