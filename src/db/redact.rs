use once_cell::sync::Lazy;
use regex::Regex;
use url::Url;

static USERINFO_PASSWORD: Lazy<Regex> =
    Lazy::new(|| Regex::new(r"://([^:/@\s]*):[^@\s]*@").expect("Invalid userinfo regex"));

/// Replace the password component of a URL with `***`.
///
/// Strings that do not parse as URLs still get any `user:pass@` section masked.
pub fn redact_url(raw: &str) -> String {
    match Url::parse(raw) {
        Ok(mut url) => {
            if url.password().is_some() {
                // Only fails for URLs that cannot carry credentials at all.
                let _ = url.set_password(Some("***"));
            }
            url.to_string()
        }
        Err(_) => USERINFO_PASSWORD
            .replace_all(raw, "://${1}:***@")
            .into_owned(),
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_password_is_masked() {
        assert_eq!(
            redact_url("ws://root:hunter2@db.internal:8000/rpc"),
            "ws://root:***@db.internal:8000/rpc"
        );
        assert_eq!(redact_url("ws://db.internal:8000/rpc"), "ws://db.internal:8000/rpc");
    }

    #[test]
    fn test_unparseable_urls_are_masked_too() {
        let redacted = redact_url("ws://root:hunter2@db internal/rpc");
        assert!(!redacted.contains("hunter2"));
        assert!(redacted.contains("root:***@"));
    }
}
