/// Client lifecycle events published on `<kind>.client.*`
use super::kind::EndpointKind;
use serde::{Deserialize, Serialize};

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct LifecycleEvent {
    pub client_id: String,
    pub user_id: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub endpoint: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub reason: Option<String>,
}

impl LifecycleEvent {
    pub fn new(client_id: &str, user_id: Option<&str>, kind: EndpointKind) -> Self {
        Self {
            client_id: client_id.to_string(),
            user_id: user_id.map(str::to_string),
            endpoint: Some(kind.as_str().to_string()),
            reason: None,
        }
    }

    pub fn with_reason(mut self, reason: impl Into<String>) -> Self {
        self.reason = Some(reason.into());
        self
    }
}
