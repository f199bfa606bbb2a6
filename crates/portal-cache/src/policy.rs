//! Per-request cache-control decisions.

use portal_core::{CacheScope, UnitConfig};
use serde::{Deserialize, Serialize};

/// Which family of stores an output belongs to.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum OutputKind {
    /// Markup or character output of a render request.
    Render,
    /// Byte output of a resource request.
    Resource,
}

impl std::fmt::Display for OutputKind {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::Render => write!(f, "render"),
            Self::Resource => write!(f, "resource"),
        }
    }
}

/// Cache decision for one unit window within one request.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct CacheControl {
    /// Store in the shared scope instead of the session scope.
    pub public_scope: bool,
    /// Freshness in seconds: 0 never caches, negative never goes stale.
    pub expiration_seconds: i32,
    /// Validator of the current entry, or one set by the unit.
    pub etag: Option<String>,
    /// Unit decided nothing changed and cached content should be replayed.
    pub use_cached_content: bool,
}

impl Default for CacheControl {
    fn default() -> Self {
        Self {
            public_scope: false,
            expiration_seconds: 0,
            etag: None,
            use_cached_content: false,
        }
    }
}

impl CacheControl {
    /// Create a control with a scope and freshness window.
    pub fn new(public_scope: bool, expiration_seconds: i32) -> Self {
        Self {
            public_scope,
            expiration_seconds,
            ..Default::default()
        }
    }

    /// Derive a control from a unit's declared configuration.
    pub fn from_config(config: &UnitConfig) -> Self {
        Self::new(config.cache_scope.is_public(), config.expiration_seconds)
    }

    /// Set the validator.
    pub fn with_etag(mut self, etag: impl Into<String>) -> Self {
        self.etag = Some(etag.into());
        self
    }

    /// Scope this control stores into.
    pub fn scope(&self) -> CacheScope {
        if self.public_scope {
            CacheScope::Public
        } else {
            CacheScope::Private
        }
    }

    /// Whether output under this control may be admitted to a cache.
    ///
    /// Only an expiration of exactly zero disables caching.
    pub fn should_cache(&self) -> bool {
        self.expiration_seconds != 0
    }

    /// Store TTL for a new entry.
    ///
    /// The smaller of the store default and the unit expiration wins; a
    /// non-positive expiration defers to the store default, and a store
    /// default of 0 (unbounded) defers to the expiration.
    pub fn effective_ttl(&self, store_default_secs: u64) -> u64 {
        if self.expiration_seconds <= 0 {
            return store_default_secs;
        }
        let expiration = self.expiration_seconds as u64;
        if store_default_secs == 0 {
            expiration
        } else {
            store_default_secs.min(expiration)
        }
    }

    /// Cache-Control header value for responses produced under this control.
    pub fn cache_control_header(&self) -> String {
        if !self.should_cache() {
            return "no-store".to_string();
        }

        let directive = self.scope().to_string();
        if self.expiration_seconds > 0 {
            format!("{}, max-age={}", directive, self.expiration_seconds)
        } else {
            directive
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_should_cache_only_rejects_zero() {
        assert!(!CacheControl::new(false, 0).should_cache());
        assert!(CacheControl::new(false, -1).should_cache());
        assert!(CacheControl::new(true, 30).should_cache());
    }

    #[test]
    fn test_effective_ttl_selection() {
        assert_eq!(CacheControl::new(true, 120).effective_ttl(600), 120);
        assert_eq!(CacheControl::new(true, 900).effective_ttl(600), 600);
        assert_eq!(CacheControl::new(true, -1).effective_ttl(600), 600);
        assert_eq!(CacheControl::new(true, 0).effective_ttl(600), 600);
        assert_eq!(CacheControl::new(true, 45).effective_ttl(0), 45);
    }

    #[test]
    fn test_cache_control_header() {
        assert_eq!(CacheControl::new(false, 0).cache_control_header(), "no-store");
        assert_eq!(
            CacheControl::new(false, 300).cache_control_header(),
            "private, max-age=300"
        );
        assert_eq!(CacheControl::new(true, -1).cache_control_header(), "public");
    }

    #[test]
    fn test_from_config() {
        let config = UnitConfig::new(1000)
            .with_scope(CacheScope::Public)
            .with_expiration(60);
        let control = CacheControl::from_config(&config);
        assert!(control.public_scope);
        assert_eq!(control.expiration_seconds, 60);
        assert_eq!(control.etag, None);
    }
}
