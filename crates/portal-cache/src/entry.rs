//! Cache entries and lookup status.

use chrono::{DateTime, Utc};
use portal_streaming::OutputBuffer;

use crate::headers::generate_etag;

/// Result type for cache operations.
pub type CacheResult<T> = Result<T, CacheError>;

/// Cache operation errors.
#[derive(Debug, thiserror::Error)]
pub enum CacheError {
    /// Backing store could not be reached.
    #[error("cache store unavailable: {0}")]
    Unavailable(String),

    /// Key inputs were incomplete, e.g. no session for a private key.
    #[error("malformed cache key: {0}")]
    MalformedKey(String),
}

/// A cached unit output.
#[derive(Debug, Clone)]
pub struct CacheEntry {
    /// Replayable output, including content type and headers.
    pub payload: OutputBuffer,
    /// Validator offered back to callers as the ETag.
    pub etag: String,
    /// Opaque validity token checked by cacheable units.
    pub validity: Option<String>,
    /// Title published while rendering.
    pub title: Option<String>,
    /// When the entry was stored.
    pub stored_at: DateTime<Utc>,
    /// Store lifetime in seconds; 0 means until explicitly removed.
    pub ttl_secs: u64,
    /// Unit freshness in seconds; negative never goes stale.
    pub expiration_secs: i32,
}

impl CacheEntry {
    /// Create an entry whose validator is a hash of the payload.
    pub fn new(payload: OutputBuffer) -> Self {
        let etag = generate_etag(&payload.to_bytes());
        Self {
            payload,
            etag,
            validity: None,
            title: None,
            stored_at: Utc::now(),
            ttl_secs: 0,
            expiration_secs: -1,
        }
    }

    /// Set the validator.
    pub fn with_etag(mut self, etag: impl Into<String>) -> Self {
        self.etag = etag.into();
        self
    }

    /// Set the validity token.
    pub fn with_validity(mut self, validity: impl Into<String>) -> Self {
        self.validity = Some(validity.into());
        self
    }

    /// Set the title.
    pub fn with_title(mut self, title: Option<String>) -> Self {
        self.title = title;
        self
    }

    /// Set the store lifetime.
    pub fn with_ttl(mut self, ttl_secs: u64) -> Self {
        self.ttl_secs = ttl_secs;
        self
    }

    /// Set the unit freshness window.
    pub fn with_expiration(mut self, expiration_secs: i32) -> Self {
        self.expiration_secs = expiration_secs;
        self
    }

    /// Override the storage time.
    pub fn stored_at(mut self, at: DateTime<Utc>) -> Self {
        self.stored_at = at;
        self
    }

    /// Age in whole seconds at `now`.
    pub fn age_at(&self, now: DateTime<Utc>) -> i64 {
        (now - self.stored_at).num_seconds().max(0)
    }

    /// Age in whole seconds.
    pub fn age(&self) -> i64 {
        self.age_at(Utc::now())
    }

    /// Whether the store lifetime has elapsed at `now`.
    pub fn is_expired_at(&self, now: DateTime<Utc>) -> bool {
        self.ttl_secs > 0 && self.age_at(now) > self.ttl_secs as i64
    }

    /// Whether the store lifetime has elapsed.
    pub fn is_expired(&self) -> bool {
        self.is_expired_at(Utc::now())
    }

    /// Whether the unit's freshness window has passed at `now`.
    pub fn is_stale_at(&self, now: DateTime<Utc>) -> bool {
        self.expiration_secs >= 0 && self.age_at(now) > i64::from(self.expiration_secs)
    }

    /// Whether the unit's freshness window has passed.
    pub fn is_stale(&self) -> bool {
        self.is_stale_at(Utc::now())
    }

    /// Content type recorded with the payload.
    pub fn content_type(&self) -> Option<&str> {
        self.payload.content_type()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::Duration;

    #[test]
    fn test_new_entry_has_content_etag() {
        let a = CacheEntry::new(OutputBuffer::from_characters("same"));
        let b = CacheEntry::new(OutputBuffer::from_characters("same"));
        let c = CacheEntry::new(OutputBuffer::from_characters("other"));
        assert_eq!(a.etag, b.etag);
        assert_ne!(a.etag, c.etag);
    }

    #[test]
    fn test_ttl_expiry() {
        let now = Utc::now();
        let entry = CacheEntry::new(OutputBuffer::from_characters("x"))
            .with_ttl(120)
            .stored_at(now - Duration::seconds(121));
        assert!(entry.is_expired_at(now));
        assert!(!entry.is_expired_at(now - Duration::seconds(10)));
    }

    #[test]
    fn test_zero_ttl_never_expires() {
        let now = Utc::now();
        let entry = CacheEntry::new(OutputBuffer::from_characters("x"))
            .stored_at(now - Duration::days(30));
        assert!(!entry.is_expired_at(now));
    }

    #[test]
    fn test_freshness_is_separate_from_ttl() {
        let now = Utc::now();
        let entry = CacheEntry::new(OutputBuffer::from_characters("x"))
            .with_ttl(600)
            .with_expiration(60)
            .stored_at(now - Duration::seconds(90));
        assert!(entry.is_stale_at(now));
        assert!(!entry.is_expired_at(now));

        let forever = entry.clone().with_expiration(-1);
        assert!(!forever.is_stale_at(now));
    }
}
