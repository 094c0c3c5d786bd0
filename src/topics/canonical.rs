/// Canonical framework topic names (fixed for interop with the browser runtime)
use super::descriptor::{define_framework, TopicConfig, TopicDescriptor};
use crate::errors::RegistryError;

pub const WS_HTML_BROADCAST: &str = "ws.html.broadcast";
pub const WS_HTML_DIRECT: &str = "ws.html.direct";
pub const WS_HTML_CLIENT_READY: &str = "ws.html.client.ready";
pub const WS_HTML_CLIENT_DISCONNECTED: &str = "ws.html.client.disconnected";
pub const WS_HTML_CLIENT_HEARTBEAT: &str = "ws.html.client.heartbeat";

pub const WS_DATA_BROADCAST: &str = "ws.data.broadcast";
pub const WS_DATA_DIRECT: &str = "ws.data.direct";
pub const WS_DATA_CLIENT_READY: &str = "ws.data.client.ready";
pub const WS_DATA_CLIENT_DISCONNECTED: &str = "ws.data.client.disconnected";
pub const WS_DATA_CLIENT_HEARTBEAT: &str = "ws.data.client.heartbeat";

pub const PRESENCE_USER_ONLINE: &str = "presence.user.online";
pub const PRESENCE_USER_OFFLINE: &str = "presence.user.offline";
pub const PRESENCE_USER_STATUS: &str = "presence.user.status";

/// Metadata key carrying the target user of a direct message
pub const META_RECIPIENT_ID: &str = "recipient_id";

const FRAMEWORK_TOPICS: &[(&str, &str)] = &[
    (WS_HTML_BROADCAST, "HTML fragment sent to every html client"),
    (WS_HTML_DIRECT, "HTML fragment sent to every html client of meta.recipient_id"),
    (WS_HTML_CLIENT_READY, "An html client connected"),
    (WS_HTML_CLIENT_DISCONNECTED, "An html client went away"),
    (WS_HTML_CLIENT_HEARTBEAT, "An html client answered a ping"),
    (WS_DATA_BROADCAST, "Data envelope sent to every data client"),
    (WS_DATA_DIRECT, "Data envelope sent to every data client of meta.recipient_id"),
    (WS_DATA_CLIENT_READY, "A data client connected"),
    (WS_DATA_CLIENT_DISCONNECTED, "A data client went away"),
    (WS_DATA_CLIENT_HEARTBEAT, "A data client answered a ping"),
    (PRESENCE_USER_ONLINE, "A user came online"),
    (PRESENCE_USER_OFFLINE, "A user went offline after the debounce window"),
    (PRESENCE_USER_STATUS, "Full presence status with per-user connection counts"),
];

/// Descriptors for every canonical framework topic
pub fn framework_descriptors() -> Result<Vec<TopicDescriptor>, RegistryError> {
    FRAMEWORK_TOPICS
        .iter()
        .map(|(name, description)| {
            define_framework(
                TopicConfig::new(*name)
                    .description(*description)
                    .module("framework"),
            )
        })
        .collect()
}

/// Client lifecycle topics are informational and cannot be subscribed to by clients
pub fn is_lifecycle_topic(name: &str) -> bool {
    matches!(
        name,
        WS_HTML_CLIENT_READY
            | WS_HTML_CLIENT_DISCONNECTED
            | WS_HTML_CLIENT_HEARTBEAT
            | WS_DATA_CLIENT_READY
            | WS_DATA_CLIENT_DISCONNECTED
            | WS_DATA_CLIENT_HEARTBEAT
    )
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_framework_descriptors_are_valid() {
        let topics = framework_descriptors().unwrap();
        assert_eq!(topics.len(), 13);
        assert!(topics.iter().all(|t| t.is_framework()));
    }

    #[test]
    fn test_lifecycle_topics() {
        assert!(is_lifecycle_topic(WS_DATA_CLIENT_READY));
        assert!(is_lifecycle_topic(WS_HTML_CLIENT_HEARTBEAT));
        assert!(!is_lifecycle_topic(WS_HTML_BROADCAST));
        assert!(!is_lifecycle_topic(PRESENCE_USER_ONLINE));
    }
}
