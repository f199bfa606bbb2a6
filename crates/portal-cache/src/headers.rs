//! Cache response headers and validators.

use std::collections::hash_map::DefaultHasher;
use std::hash::{Hash, Hasher};

use crate::entry::CacheEntry;
use crate::policy::CacheControl;

/// Header names written on cached responses.
pub mod header_names {
    /// Standard cache directive header.
    pub const CACHE_CONTROL: &str = "Cache-Control";
    /// Validator header.
    pub const ETAG: &str = "ETag";
    /// Age of a replayed entry in seconds.
    pub const AGE: &str = "Age";
}

/// Generate a validator from content.
pub fn generate_etag(content: &[u8]) -> String {
    let mut hasher = DefaultHasher::new();
    content.hash(&mut hasher);
    format!("{:016x}", hasher.finish())
}

/// Quote a validator for the ETag header.
pub fn format_etag(etag: &str) -> String {
    if etag.starts_with('"') || etag.starts_with("W/") {
        etag.to_string()
    } else {
        format!("\"{}\"", etag)
    }
}

/// Whether an If-None-Match value names the current validator.
///
/// Accepts `*`, comma separated lists and weak validators. Comparison is weak,
/// so `W/"v1"` matches `"v1"`.
pub fn validator_matches(presented: &str, current: &str) -> bool {
    let presented = presented.trim();
    if presented == "*" {
        return true;
    }
    let current = opaque_tag(current);
    !current.is_empty() && presented.split(',').any(|tag| opaque_tag(tag) == current)
}

fn opaque_tag(tag: &str) -> &str {
    let tag = tag.trim();
    tag.strip_prefix("W/").unwrap_or(tag).trim_matches('"')
}

/// Builder for the headers written on a replayed entry.
#[derive(Debug, Default)]
pub struct CacheHeadersBuilder {
    cache_control: Option<String>,
    etag: Option<String>,
    age: Option<i64>,
}

impl CacheHeadersBuilder {
    /// Create a new builder.
    pub fn new() -> Self {
        Self::default()
    }

    /// Set Cache-Control from a control decision.
    pub fn cache_control(mut self, control: &CacheControl) -> Self {
        self.cache_control = Some(control.cache_control_header());
        self
    }

    /// Set ETag header.
    pub fn etag(mut self, value: impl Into<String>) -> Self {
        self.etag = Some(value.into());
        self
    }

    /// Set Age header.
    pub fn age(mut self, seconds: i64) -> Self {
        self.age = Some(seconds.max(0));
        self
    }

    /// Cache-Control, ETag and Age for `entry` under `control`.
    pub fn for_entry(control: &CacheControl, entry: &CacheEntry) -> Self {
        Self::new()
            .cache_control(control)
            .etag(entry.etag.as_str())
            .age(entry.age())
    }

    /// Build the headers.
    pub fn build(self) -> Vec<(&'static str, String)> {
        let mut headers = Vec::new();

        if let Some(cc) = self.cache_control {
            headers.push((header_names::CACHE_CONTROL, cc));
        }

        if let Some(etag) = self.etag {
            headers.push((header_names::ETAG, format_etag(&etag)));
        }

        if let Some(age) = self.age {
            headers.push((header_names::AGE, age.to_string()));
        }

        headers
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_etag_is_stable() {
        assert_eq!(generate_etag(b"abc"), generate_etag(b"abc"));
        assert_ne!(generate_etag(b"abc"), generate_etag(b"abd"));
        assert_eq!(generate_etag(b"abc").len(), 16);
    }

    #[test]
    fn test_format_etag_quotes_once() {
        assert_eq!(format_etag("abc"), "\"abc\"");
        assert_eq!(format_etag("\"abc\""), "\"abc\"");
        assert_eq!(format_etag("W/\"abc\""), "W/\"abc\"");
    }

    #[test]
    fn test_validator_matching_forms() {
        assert!(validator_matches("\"v1\"", "v1"));
        assert!(validator_matches("W/\"v1\"", "v1"));
        assert!(validator_matches("\"zz\", \"v1\"", "v1"));
        assert!(validator_matches("\"zz\",W/\"v1\"", "\"v1\""));
        assert!(validator_matches(" * ", "v1"));
        assert!(!validator_matches("\"zz\"", "v1"));
        assert!(!validator_matches("\"v1x\", \"zz\"", "v1"));
        assert!(!validator_matches("\"\"", ""));
    }

    #[test]
    fn test_builder_output() {
        let control = CacheControl::new(true, 120);
        let headers = CacheHeadersBuilder::new()
            .cache_control(&control)
            .etag("v1")
            .age(7)
            .build();

        assert_eq!(
            headers,
            vec![
                ("Cache-Control", "public, max-age=120".to_string()),
                ("ETag", "\"v1\"".to_string()),
                ("Age", "7".to_string()),
            ]
        );
    }

    #[test]
    fn test_headers_for_entry() {
        use chrono::{Duration, Utc};
        use portal_streaming::OutputBuffer;

        let entry = CacheEntry::new(OutputBuffer::from_characters("x"))
            .with_etag("e1")
            .stored_at(Utc::now() - Duration::seconds(30));
        let headers = CacheHeadersBuilder::for_entry(&CacheControl::new(false, 60), &entry).build();

        assert_eq!(headers[0].0, "Cache-Control");
        assert_eq!(headers[1], ("ETag", "\"e1\"".to_string()));
        let age: i64 = headers[2].1.parse().unwrap();
        assert!((30..=31).contains(&age));
    }
}
