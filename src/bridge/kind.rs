/// Endpoint kinds and their framing
use super::frame::{DataEnvelope, WsFrame};
use crate::bus::Message;
use crate::topics::*;
use serde::Serialize;
use std::fmt;

/// Which WebSocket endpoint a client is attached to
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize)]
#[serde(rename_all = "lowercase")]
pub enum EndpointKind {
    Html,
    Data,
}

impl EndpointKind {
    pub const ALL: [EndpointKind; 2] = [EndpointKind::Html, EndpointKind::Data];

    pub fn as_str(&self) -> &'static str {
        match self {
            EndpointKind::Html => "html",
            EndpointKind::Data => "data",
        }
    }

    /// Topic namespace owned by this endpoint (`ws.html` / `ws.data`)
    pub fn prefix(&self) -> &'static str {
        match self {
            EndpointKind::Html => "ws.html",
            EndpointKind::Data => "ws.data",
        }
    }

    pub fn broadcast_topic(&self) -> &'static str {
        match self {
            EndpointKind::Html => WS_HTML_BROADCAST,
            EndpointKind::Data => WS_DATA_BROADCAST,
        }
    }

    pub fn direct_topic(&self) -> &'static str {
        match self {
            EndpointKind::Html => WS_HTML_DIRECT,
            EndpointKind::Data => WS_DATA_DIRECT,
        }
    }

    pub fn ready_topic(&self) -> &'static str {
        match self {
            EndpointKind::Html => WS_HTML_CLIENT_READY,
            EndpointKind::Data => WS_DATA_CLIENT_READY,
        }
    }

    pub fn disconnected_topic(&self) -> &'static str {
        match self {
            EndpointKind::Html => WS_HTML_CLIENT_DISCONNECTED,
            EndpointKind::Data => WS_DATA_CLIENT_DISCONNECTED,
        }
    }

    pub fn heartbeat_topic(&self) -> &'static str {
        match self {
            EndpointKind::Html => WS_HTML_CLIENT_HEARTBEAT,
            EndpointKind::Data => WS_DATA_CLIENT_HEARTBEAT,
        }
    }

    /// True for any topic under either endpoint namespace
    pub fn is_endpoint_topic(name: &str) -> bool {
        Self::ALL.iter().any(|kind| {
            name.strip_prefix(kind.prefix())
                .map(|rest| rest.starts_with('.'))
                .unwrap_or(false)
        })
    }

    /// Encode a bus message as an outbound frame for this endpoint
    pub fn encode(&self, message: &Message) -> WsFrame {
        match self {
            EndpointKind::Html => WsFrame::Text(message.payload_str().into_owned()),
            EndpointKind::Data => WsFrame::Text(DataEnvelope::from_message(message).to_json()),
        }
    }
}

impl fmt::Display for EndpointKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::Value;

    #[test]
    fn test_topic_names() {
        assert_eq!(EndpointKind::Html.broadcast_topic(), "ws.html.broadcast");
        assert_eq!(EndpointKind::Data.direct_topic(), "ws.data.direct");
        assert_eq!(EndpointKind::Data.ready_topic(), "ws.data.client.ready");
        assert_eq!(
            EndpointKind::Html.disconnected_topic(),
            "ws.html.client.disconnected"
        );
    }

    #[test]
    fn test_endpoint_topic_detection() {
        assert!(EndpointKind::is_endpoint_topic("ws.html.direct"));
        assert!(EndpointKind::is_endpoint_topic("ws.data.client.ready"));
        assert!(!EndpointKind::is_endpoint_topic("ws.htmlx.thing"));
        assert!(!EndpointKind::is_endpoint_topic("presence.user.online"));
    }

    #[test]
    fn test_html_framing_is_verbatim() {
        let msg = Message::new(WS_HTML_BROADCAST, "<div>hi</div>");
        assert_eq!(
            EndpointKind::Html.encode(&msg),
            WsFrame::Text("<div>hi</div>".to_string())
        );
    }

    #[test]
    fn test_data_framing_wraps_envelope() {
        let msg = Message::new("chat.messages", r#"{"text":"P1"}"#).with_meta("room", "lobby");
        let WsFrame::Text(text) = EndpointKind::Data.encode(&msg) else {
            panic!("expected text frame");
        };
        let value: Value = serde_json::from_str(&text).unwrap();
        assert_eq!(value["topic"], "chat.messages");
        assert_eq!(value["payload"]["text"], "P1");
        assert_eq!(value["meta"]["room"], "lobby");
    }
}
