/// Handshake authentication
///
/// The host application resolves a user id from the upgrade request; real
/// deployments plug in a session lookup. Without one every connection is
/// anonymous. `HeaderAuthenticator` trusts whatever id the client sends and is
/// only installed when `WS_TRUST_CLIENT_IDENTITY` is set.
use axum::http::HeaderMap;
use std::collections::HashMap;

pub trait Authenticator: Send + Sync {
    /// `None` means the connection is anonymous
    fn authenticate(&self, headers: &HeaderMap, query: &HashMap<String, String>) -> Option<String>;
}

/// Client-declared identity from a header or query parameter
#[derive(Debug, Clone)]
pub struct HeaderAuthenticator {
    header: String,
    query_param: String,
}

impl Default for HeaderAuthenticator {
    fn default() -> Self {
        Self {
            header: "x-user-id".to_string(),
            query_param: "user".to_string(),
        }
    }
}

impl HeaderAuthenticator {
    pub fn new(header: impl Into<String>, query_param: impl Into<String>) -> Self {
        Self {
            header: header.into(),
            query_param: query_param.into(),
        }
    }
}

impl Authenticator for HeaderAuthenticator {
    fn authenticate(&self, headers: &HeaderMap, query: &HashMap<String, String>) -> Option<String> {
        let from_header = headers
            .get(self.header.as_str())
            .and_then(|value| value.to_str().ok())
            .map(str::trim)
            .filter(|value| !value.is_empty());
        let from_query = || {
            query
                .get(&self.query_param)
                .map(|value| value.trim())
                .filter(|value| !value.is_empty())
        };
        from_header.or_else(from_query).map(str::to_string)
    }
}

/// Every connection is anonymous
#[derive(Debug, Clone, Copy, Default)]
pub struct Anonymous;

impl Authenticator for Anonymous {
    fn authenticate(&self, _headers: &HeaderMap, _query: &HashMap<String, String>) -> Option<String> {
        None
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use axum::http::HeaderValue;

    #[test]
    fn test_header_wins_over_query() {
        let auth = HeaderAuthenticator::default();
        let mut headers = HeaderMap::new();
        headers.insert("x-user-id", HeaderValue::from_static("alice@x"));
        let query = HashMap::from([("user".to_string(), "bob".to_string())]);

        assert_eq!(auth.authenticate(&headers, &query).as_deref(), Some("alice@x"));
        assert_eq!(
            auth.authenticate(&HeaderMap::new(), &query).as_deref(),
            Some("bob")
        );
    }

    #[test]
    fn test_blank_values_are_anonymous() {
        let auth = HeaderAuthenticator::new("x-session-user", "u");
        let mut headers = HeaderMap::new();
        headers.insert("x-session-user", HeaderValue::from_static("  "));
        let query = HashMap::from([("u".to_string(), String::new())]);
        assert_eq!(auth.authenticate(&headers, &query), None);
        assert_eq!(Anonymous.authenticate(&headers, &query), None);
    }
}
