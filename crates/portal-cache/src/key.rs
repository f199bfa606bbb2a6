//! Cache key composition.
//!
//! Keys are the full joined component string rather than a hash of it, so
//! two callers can only share an entry when every component matches.

use portal_core::{Parameters, RenderRequest, SessionId, WindowId};
use serde::{Deserialize, Serialize};

use crate::entry::{CacheError, CacheResult};
use crate::policy::OutputKind;

/// A cache key uniquely identifying a cached output.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct CacheKey {
    /// The computed key string.
    key: String,
    /// Components that make up the key (for debugging).
    #[serde(skip_serializing_if = "Vec::is_empty")]
    components: Vec<String>,
}

impl CacheKey {
    /// Create a cache key from a string.
    pub fn new(key: impl Into<String>) -> Self {
        Self {
            key: key.into(),
            components: Vec::new(),
        }
    }

    /// Key for the private scope: session, window, entity, definition and
    /// the effective parameters.
    pub fn private(request: &RenderRequest, kind: OutputKind) -> CacheResult<Self> {
        let session = request.session_id.as_ref().ok_or_else(|| {
            CacheError::MalformedKey(format!(
                "no session for private-scope key of window {}",
                request.window.window_id
            ))
        })?;

        let window = &request.window;
        let mut builder = CacheKeyBuilder::new("private")
            .component("s", session.as_str())
            .component("w", window.window_id.as_str())
            .component("e", window.entity_id.as_str())
            .component("d", window.definition_id.as_str())
            .parameters("rp", &window.render_parameters)
            .parameters("pp", &window.public_render_parameters);
        if kind == OutputKind::Resource {
            builder = builder.parameters("q", &request.parameters);
        }
        Ok(builder.build())
    }

    /// Key for the public scope: definition, render parameters and the
    /// declared public parameters only. Never carries caller identity.
    pub fn public(request: &RenderRequest, kind: OutputKind, declared: &[String]) -> Self {
        let window = &request.window;
        let public: Parameters = window
            .public_render_parameters
            .iter()
            .filter(|(name, _)| declared.iter().any(|d| d == *name))
            .map(|(name, values)| (name.clone(), values.clone()))
            .collect();

        let mut builder = CacheKeyBuilder::new("public")
            .component("d", window.definition_id.as_str())
            .parameters("rp", &window.render_parameters)
            .parameters("pp", &public);
        if kind == OutputKind::Resource {
            builder = builder.parameters("q", &request.parameters);
        }
        builder.build()
    }

    /// Get the key string.
    pub fn as_str(&self) -> &str {
        &self.key
    }

    /// Get the key components (for debugging).
    pub fn components(&self) -> &[String] {
        &self.components
    }

    /// The same key confined to one session's window partition.
    pub fn scoped_to(&self, session: &SessionId, window: &WindowId) -> Self {
        CacheKeyBuilder::new("instance")
            .component("s", session.as_str())
            .component("w", window.as_str())
            .component("k", &self.key)
            .build()
    }
}

impl std::fmt::Display for CacheKey {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.key)
    }
}

/// Builder joining escaped `name=value` components.
#[derive(Debug, Clone)]
pub struct CacheKeyBuilder {
    parts: Vec<String>,
    components: Vec<String>,
}

impl CacheKeyBuilder {
    /// Create a builder with a leading namespace.
    pub fn new(namespace: &str) -> Self {
        Self {
            parts: vec![escape(namespace)],
            components: Vec::new(),
        }
    }

    /// Add a single named component.
    pub fn component(mut self, name: &str, value: &str) -> Self {
        self.parts.push(format!("{}={}", name, escape(value)));
        self.components.push(format!("{}:{}", name, value));
        self
    }

    /// Add every parameter under a prefix, in name order.
    pub fn parameters(mut self, prefix: &str, params: &Parameters) -> Self {
        for (name, values) in params {
            let joined: Vec<String> = values.iter().map(|v| escape(v)).collect();
            self.parts
                .push(format!("{}.{}={}", prefix, escape(name), joined.join(",")));
            self.components.push(format!("{}:{}", prefix, name));
        }
        self
    }

    /// Build the key.
    pub fn build(self) -> CacheKey {
        CacheKey {
            key: self.parts.join("|"),
            components: self.components,
        }
    }
}

fn escape(value: &str) -> String {
    let mut out = String::with_capacity(value.len());
    for c in value.chars() {
        if matches!(c, '\\' | '|' | '=' | ',' | '.') {
            out.push('\\');
        }
        out.push(c);
    }
    out
}

/// Scope a cacheable unit asks its output to be stored in.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum KeyScope {
    /// Process-wide store shared by every instance.
    System,
    /// Partitioned per unit instance.
    Instance,
}

/// Key generated by a cacheable unit.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct UnitCacheKey {
    /// Key within the scope.
    pub key: CacheKey,
    /// Which store holds the entry.
    pub scope: KeyScope,
    /// Validity token stored with the entry and checked on replay.
    pub validity: Option<String>,
}

impl UnitCacheKey {
    /// Key in the system scope.
    pub fn system(key: impl Into<String>) -> Self {
        Self {
            key: CacheKey::new(key),
            scope: KeyScope::System,
            validity: None,
        }
    }

    /// Key in the instance scope.
    pub fn instance(key: impl Into<String>) -> Self {
        Self {
            key: CacheKey::new(key),
            scope: KeyScope::Instance,
            validity: None,
        }
    }

    /// Attach a validity token.
    pub fn with_validity(mut self, validity: impl Into<String>) -> Self {
        self.validity = Some(validity.into());
        self
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use portal_core::UnitWindow;

    fn request(session: Option<&str>) -> RenderRequest {
        let window = UnitWindow::new("w1", "e1", "d1")
            .with_render_parameter("page", "2")
            .with_public_parameter("region", "eu")
            .with_public_parameter("debug", "1");
        let req = RenderRequest::render(window);
        match session {
            Some(s) => req.with_session(s),
            None => req,
        }
    }

    #[test]
    fn test_private_key_requires_session() {
        let err = CacheKey::private(&request(None), OutputKind::Render).unwrap_err();
        assert!(matches!(err, CacheError::MalformedKey(_)));
    }

    #[test]
    fn test_private_keys_differ_by_session() {
        let a = CacheKey::private(&request(Some("A")), OutputKind::Render).unwrap();
        let b = CacheKey::private(&request(Some("B")), OutputKind::Render).unwrap();
        let a2 = CacheKey::private(&request(Some("A")), OutputKind::Render).unwrap();
        assert_ne!(a, b);
        assert_eq!(a, a2);
    }

    #[test]
    fn test_public_key_ignores_identity() {
        let declared = vec!["region".to_string()];
        let a = CacheKey::public(&request(Some("A")), OutputKind::Render, &declared);
        let b = CacheKey::public(&request(Some("B")), OutputKind::Render, &declared);
        let anon = CacheKey::public(&request(None), OutputKind::Render, &declared);
        assert_eq!(a, b);
        assert_eq!(a, anon);
        assert!(!a.as_str().contains("w1"));
        assert!(a.as_str().contains("region"));
        assert!(!a.as_str().contains("debug"));
    }

    #[test]
    fn test_resource_key_includes_request_parameters() {
        let declared = vec![];
        let plain = request(None);
        let with_query = request(None).with_parameter("id", "7");
        assert_eq!(
            CacheKey::public(&plain, OutputKind::Render, &declared),
            CacheKey::public(&with_query, OutputKind::Render, &declared)
        );
        assert_ne!(
            CacheKey::public(&plain, OutputKind::Resource, &declared),
            CacheKey::public(&with_query, OutputKind::Resource, &declared)
        );
    }

    #[test]
    fn test_separators_are_escaped() {
        let a = CacheKeyBuilder::new("x").component("a", "1|b=2").build();
        let b = CacheKeyBuilder::new("x")
            .component("a", "1")
            .component("b", "2")
            .build();
        assert_ne!(a, b);
    }

    #[test]
    fn test_instance_scoping() {
        let key = CacheKey::new("k");
        let alice = SessionId::new("alice");
        assert_ne!(
            key.scoped_to(&alice, &WindowId::new("w1")),
            key.scoped_to(&alice, &WindowId::new("w2"))
        );
        assert_ne!(
            key.scoped_to(&alice, &WindowId::new("w1")),
            key.scoped_to(&SessionId::new("bob"), &WindowId::new("w1"))
        );
    }
}
