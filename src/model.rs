use std::sync::OnceLock;

use chrono::{SubsecRound, Utc};
use indexmap::IndexMap;
use regex::Regex;
use serde::{Deserialize, Serialize};

/// UrlRecord is the structure stored for each short code.
#[derive(Clone, Debug, Deserialize, Eq, PartialEq, Serialize)]
pub struct UrlRecord {
    pub url: String, // destination, checked against the scheme pattern on creation only
    pub created: chrono::DateTime<Utc>,
    #[serde(default)]
    pub clicks: u64, // successful resolves since creation
}

impl UrlRecord {
    pub fn new(url: &str) -> Self {
        Self {
            url: url.to_string(),
            // millisecond precision keeps the snapshot in the usual ISO-8601 shape
            created: Utc::now().trunc_subsecs(3),
            clicks: 0,
        }
    }
}

impl std::fmt::Display for UrlRecord {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{} [created: {}, clicks: {}]", self.url, self.created, self.clicks)
    }
}

/// Store maps short code to record. This is the whole persisted snapshot.
/// Entries keep insertion order so the file stays stable between saves.
pub type Store = IndexMap<String, UrlRecord>;

static URL_PATTERN: OnceLock<Regex> = OnceLock::new();

/// returns true when `url` is non-empty and starts with a lowercase http or https scheme.
pub fn is_valid_url(url: &str) -> bool {
    let re = URL_PATTERN.get_or_init(|| Regex::new(r"^https?://.+").expect("static url pattern"));
    re.is_match(url)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_http() {
        assert!(is_valid_url("http://x"));
    }

    #[test]
    fn test_https_with_path() {
        assert!(is_valid_url("https://example.com/a?b=c#d"));
    }

    #[test]
    fn test_other_scheme() {
        assert!(!is_valid_url("ftp://example.com"));
    }

    // The scheme match is case-sensitive.
    #[test]
    fn test_uppercase_scheme() {
        assert!(!is_valid_url("HTTP://example.com"));
    }

    // Nothing after the scheme separator.
    #[test]
    fn test_scheme_only() {
        assert!(!is_valid_url("https://"));
    }

    #[test]
    fn test_empty_string() {
        assert!(!is_valid_url(""));
    }

    #[test]
    fn test_leading_whitespace() {
        assert!(!is_valid_url(" https://example.com"));
    }

    #[test]
    fn test_new_record() {
        let record = UrlRecord::new("https://example.com");
        assert_eq!(record.url, "https://example.com");
        assert_eq!(record.clicks, 0);
        assert!(record.created <= Utc::now());
    }

    #[test]
    fn test_snapshot_shape() {
        let raw = r#"{"abc123": {"url": "https://example.com", "created": "2025-01-02T03:04:05.678Z", "clicks": 7}}"#;
        let store: Store = serde_json::from_str(raw).unwrap();
        let record = store.get("abc123").unwrap();
        assert_eq!(record.url, "https://example.com");
        assert_eq!(record.clicks, 7);

        let json = serde_json::to_value(record).unwrap();
        assert_eq!(json["created"], "2025-01-02T03:04:05.678Z");
    }

    // Older snapshots may lack a clicks field.
    #[test]
    fn test_missing_clicks() {
        let raw = r#"{"url": "https://example.com", "created": "2025-01-02T03:04:05.678Z"}"#;
        let record: UrlRecord = serde_json::from_str(raw).unwrap();
        assert_eq!(record.clicks, 0);
    }
}
