/// Unit of transport on the bus
use crate::topics::META_RECIPIENT_ID;
use bytes::Bytes;
use serde::Serialize;
use std::borrow::Cow;
use std::collections::HashMap;

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Message {
    pub topic: String,
    /// Opaque bytes; the bus never inspects them
    pub payload: Bytes,
    pub user_id: Option<String>,
    pub metadata: HashMap<String, String>,
}

impl Message {
    pub fn new(topic: impl Into<String>, payload: impl Into<Bytes>) -> Self {
        Self {
            topic: topic.into(),
            payload: payload.into(),
            user_id: None,
            metadata: HashMap::new(),
        }
    }

    /// Message whose payload is the JSON encoding of `value`
    pub fn json<T: Serialize>(topic: impl Into<String>, value: &T) -> serde_json::Result<Self> {
        Ok(Self::new(topic, serde_json::to_vec(value)?))
    }

    pub fn with_user(mut self, user_id: impl Into<String>) -> Self {
        self.user_id = Some(user_id.into());
        self
    }

    pub fn with_meta(mut self, key: impl Into<String>, value: impl Into<String>) -> Self {
        self.metadata.insert(key.into(), value.into());
        self
    }

    pub fn with_recipient(self, user_id: impl Into<String>) -> Self {
        self.with_meta(META_RECIPIENT_ID, user_id)
    }

    pub fn recipient_id(&self) -> Option<&str> {
        self.metadata.get(META_RECIPIENT_ID).map(String::as_str)
    }

    pub fn payload_str(&self) -> Cow<'_, str> {
        String::from_utf8_lossy(&self.payload)
    }

    pub fn payload_json<T: serde::de::DeserializeOwned>(&self) -> serde_json::Result<T> {
        serde_json::from_slice(&self.payload)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_builders() {
        let msg = Message::new("ws.html.direct", "HELLO")
            .with_user("system")
            .with_recipient("alice@x");
        assert_eq!(msg.recipient_id(), Some("alice@x"));
        assert_eq!(msg.payload_str(), "HELLO");
        assert_eq!(msg.user_id.as_deref(), Some("system"));
    }

    #[test]
    fn test_json_payload() {
        let msg = Message::json("chat.messages", &serde_json::json!({"text": "hi"})).unwrap();
        let value: serde_json::Value = msg.payload_json().unwrap();
        assert_eq!(value["text"], "hi");
    }
}
