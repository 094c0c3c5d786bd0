/// Wire frames: the transport-neutral frame type, the inbound control schema,
/// and the data endpoint's outbound envelope.
use crate::bus::Message;
use crate::errors::BridgeError;
use serde::{Deserialize, Serialize};
use serde_json::Value;
use std::collections::HashMap;

/// A single WebSocket frame, independent of the server library
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum WsFrame {
    Text(String),
    Binary(Vec<u8>),
    Ping(Vec<u8>),
    Pong(Vec<u8>),
    Close,
}

/// Actions a client may send
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum InboundAction {
    Subscribe,
    Unsubscribe,
    Publish,
}

impl InboundAction {
    fn parse(action: &str) -> Result<Self, BridgeError> {
        match action {
            "subscribe" => Ok(InboundAction::Subscribe),
            "unsubscribe" => Ok(InboundAction::Unsubscribe),
            "publish" => Ok(InboundAction::Publish),
            other => Err(BridgeError::UnknownAction {
                action: other.to_string(),
            }),
        }
    }
}

#[derive(Debug, Deserialize)]
struct RawInbound {
    action: String,
    topic: String,
    #[serde(default)]
    payload: Option<Value>,
    #[serde(default)]
    meta: Option<HashMap<String, Value>>,
}

/// Parsed client frame
#[derive(Debug, Clone, PartialEq)]
pub struct InboundFrame {
    pub action: InboundAction,
    pub topic: String,
    pub payload: Option<Value>,
    pub meta: HashMap<String, String>,
}

impl InboundFrame {
    /// Parse a text frame; JSON errors are `MalformedFrame`, unknown actions
    /// are `UnknownAction`
    pub fn parse(text: &str) -> Result<Self, BridgeError> {
        let raw: RawInbound = serde_json::from_str(text).map_err(BridgeError::malformed)?;
        let action = InboundAction::parse(&raw.action)?;
        let meta = raw
            .meta
            .unwrap_or_default()
            .into_iter()
            .map(|(k, v)| {
                let value = match v {
                    Value::String(s) => s,
                    other => other.to_string(),
                };
                (k, value)
            })
            .collect();

        Ok(Self {
            action,
            topic: raw.topic,
            payload: raw.payload,
            meta,
        })
    }

    /// Payload bytes for the bus: strings travel raw, everything else as JSON
    pub fn payload_bytes(&self) -> Vec<u8> {
        match &self.payload {
            None | Some(Value::Null) => Vec::new(),
            Some(Value::String(s)) => s.as_bytes().to_vec(),
            Some(other) => other.to_string().into_bytes(),
        }
    }
}

/// `/ws/data` outbound envelope
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct DataEnvelope {
    pub topic: String,
    pub payload: Value,
    #[serde(default)]
    pub meta: HashMap<String, String>,
}

impl DataEnvelope {
    /// Payload is embedded as JSON when it parses, otherwise as a string
    pub fn from_message(message: &Message) -> Self {
        let payload = serde_json::from_slice::<Value>(&message.payload)
            .unwrap_or_else(|_| Value::String(message.payload_str().into_owned()));
        Self {
            topic: message.topic.clone(),
            payload,
            meta: message.metadata.clone(),
        }
    }

    pub fn to_json(&self) -> String {
        serde_json::to_string(self).unwrap_or_else(|_| {
            format!(r#"{{"topic":{:?},"payload":null,"meta":{{}}}}"#, self.topic)
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn test_parse_subscribe() {
        let frame = InboundFrame::parse(r#"{"action":"subscribe","topic":"chat.messages"}"#).unwrap();
        assert_eq!(frame.action, InboundAction::Subscribe);
        assert_eq!(frame.topic, "chat.messages");
        assert!(frame.payload.is_none());
    }

    #[test]
    fn test_parse_publish_with_meta() {
        let frame = InboundFrame::parse(
            r#"{"action":"publish","topic":"chat.messages","payload":{"text":"hi"},"meta":{"room":"lobby","n":3}}"#,
        )
        .unwrap();
        assert_eq!(frame.action, InboundAction::Publish);
        assert_eq!(frame.meta.get("room").map(String::as_str), Some("lobby"));
        assert_eq!(frame.meta.get("n").map(String::as_str), Some("3"));
        assert_eq!(frame.payload_bytes(), br#"{"text":"hi"}"#.to_vec());
    }

    #[test]
    fn test_string_payload_travels_raw() {
        let frame =
            InboundFrame::parse(r#"{"action":"publish","topic":"a.b","payload":"plain"}"#).unwrap();
        assert_eq!(frame.payload_bytes(), b"plain".to_vec());
    }

    #[test]
    fn test_parse_errors() {
        assert!(matches!(
            InboundFrame::parse("not json"),
            Err(BridgeError::MalformedFrame { .. })
        ));
        assert!(matches!(
            InboundFrame::parse(r#"{"action":"subscribe"}"#),
            Err(BridgeError::MalformedFrame { .. })
        ));
        assert!(matches!(
            InboundFrame::parse(r#"{"action":"dance","topic":"a.b"}"#),
            Err(BridgeError::UnknownAction { .. })
        ));
    }

    #[test]
    fn test_envelope_non_json_payload_is_string() {
        let msg = Message::new("chat.messages", "P1");
        let envelope = DataEnvelope::from_message(&msg);
        assert_eq!(envelope.payload, json!("P1"));
        assert!(envelope.meta.is_empty());
    }
}
