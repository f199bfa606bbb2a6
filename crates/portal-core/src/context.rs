//! Render request context with typed parameters.

use std::collections::{BTreeMap, HashMap};
use std::time::{Duration, Instant};

use serde::{Deserialize, Serialize};

use crate::ids::{DefinitionId, EntityId, RequestId, SessionId, WindowId};

/// Multi-valued request parameters.
///
/// Ordered so that cache keys built from them are deterministic.
pub type Parameters = BTreeMap<String, Vec<String>>;

/// HTTP headers.
pub type Headers = HashMap<String, String>;

/// Name of the conditional-request validator header.
pub const IF_NONE_MATCH: &str = "If-None-Match";

/// What the caller asked the unit to do.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum RequestType {
    /// State-changing action; produces no markup.
    Action,
    /// Event delivered to the unit; produces no markup.
    Event,
    /// Markup rendering for a page fragment.
    #[default]
    Render,
    /// Direct resource fetch (bytes, own content type).
    Resource,
}

impl RequestType {
    /// Whether this request invalidates previously cached output.
    pub fn invalidates_cache(&self) -> bool {
        matches!(self, Self::Action | Self::Event)
    }
}

impl std::fmt::Display for RequestType {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::Action => write!(f, "action"),
            Self::Event => write!(f, "event"),
            Self::Render => write!(f, "render"),
            Self::Resource => write!(f, "resource"),
        }
    }
}

/// Identity of one unit placement plus its window-scoped parameters.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct UnitWindow {
    /// Window (placement) identity.
    pub window_id: WindowId,
    /// Entity (configured instance) identity.
    pub entity_id: EntityId,
    /// Definition identity.
    pub definition_id: DefinitionId,
    /// Parameters private to this window.
    pub render_parameters: Parameters,
    /// Parameters shared between windows on the page.
    pub public_render_parameters: Parameters,
}

impl UnitWindow {
    /// Create a window with no parameters.
    pub fn new(
        window_id: impl Into<WindowId>,
        entity_id: impl Into<EntityId>,
        definition_id: impl Into<DefinitionId>,
    ) -> Self {
        Self {
            window_id: window_id.into(),
            entity_id: entity_id.into(),
            definition_id: definition_id.into(),
            render_parameters: Parameters::new(),
            public_render_parameters: Parameters::new(),
        }
    }

    /// Add a render parameter value.
    pub fn with_render_parameter(mut self, name: impl Into<String>, value: impl Into<String>) -> Self {
        self.render_parameters
            .entry(name.into())
            .or_default()
            .push(value.into());
        self
    }

    /// Add a public render parameter value.
    pub fn with_public_parameter(mut self, name: impl Into<String>, value: impl Into<String>) -> Self {
        self.public_render_parameters
            .entry(name.into())
            .or_default()
            .push(value.into());
        self
    }
}

/// Typed request context passed to the rendering engine.
#[derive(Debug, Clone)]
pub struct RenderRequest {
    /// Unique request identifier.
    pub request_id: RequestId,
    /// Requested operation.
    pub request_type: RequestType,
    /// The unit placement being rendered.
    pub window: UnitWindow,
    /// Caller session, required for private-scope caching.
    pub session_id: Option<SessionId>,
    /// Query/form parameters of the current request.
    pub parameters: Parameters,
    /// Preferred locale.
    pub locale: Option<String>,
    /// HTTP headers.
    pub headers: Headers,
    /// Absolute deadline imposed by the caller, if any.
    pub deadline: Option<Instant>,
}

impl RenderRequest {
    /// Create a new render request for a window.
    pub fn new(request_type: RequestType, window: UnitWindow) -> Self {
        Self {
            request_id: RequestId::generate(),
            request_type,
            window,
            session_id: None,
            parameters: Parameters::new(),
            locale: None,
            headers: HashMap::new(),
            deadline: None,
        }
    }

    /// Shorthand for a markup render request.
    pub fn render(window: UnitWindow) -> Self {
        Self::new(RequestType::Render, window)
    }

    /// Attach the caller's session.
    pub fn with_session(mut self, session: impl Into<SessionId>) -> Self {
        self.session_id = Some(session.into());
        self
    }

    /// Add a request parameter value.
    pub fn with_parameter(mut self, name: impl Into<String>, value: impl Into<String>) -> Self {
        self.parameters
            .entry(name.into())
            .or_default()
            .push(value.into());
        self
    }

    /// Set a header.
    pub fn with_header(mut self, name: impl Into<String>, value: impl Into<String>) -> Self {
        self.headers.insert(name.into(), value.into());
        self
    }

    /// Set the preferred locale.
    pub fn with_locale(mut self, locale: impl Into<String>) -> Self {
        self.locale = Some(locale.into());
        self
    }

    /// Set an absolute deadline.
    pub fn with_deadline(mut self, deadline: Instant) -> Self {
        self.deadline = Some(deadline);
        self
    }

    /// Get a request parameter's first value.
    pub fn parameter(&self, name: &str) -> Option<&str> {
        self.parameters
            .get(name)
            .and_then(|values| values.first())
            .map(|s| s.as_str())
    }

    /// Get a header value by name (case-insensitive).
    pub fn header(&self, name: &str) -> Option<&str> {
        self.headers
            .iter()
            .find(|(k, _)| k.eq_ignore_ascii_case(name))
            .map(|(_, v)| v.as_str())
    }

    /// The raw `If-None-Match` value presented by the caller.
    ///
    /// May hold a list of quoted, possibly weak, validators or `*`. Blank
    /// values count as absent.
    pub fn if_none_match(&self) -> Option<&str> {
        self.header(IF_NONE_MATCH)
            .map(str::trim)
            .filter(|v| !v.is_empty())
    }

    /// Clamp a configured timeout to the caller's deadline.
    pub fn effective_timeout(&self, configured: Duration) -> Duration {
        match self.deadline {
            Some(deadline) => {
                let remaining = deadline.saturating_duration_since(Instant::now());
                configured.min(remaining)
            }
            None => configured,
        }
    }
}
