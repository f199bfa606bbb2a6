//! Rendering errors.

use portal_cache::CacheError;
use portal_core::{RenderRequest, RequestType, UnitError, WindowId};
use portal_streaming::StreamError;
use thiserror::Error;

/// Errors surfaced by the rendering engine.
///
/// Unit failures keep the unit's error as the source; callers see a generic
/// message and the detail stays in logs.
#[derive(Debug, Error)]
pub enum RenderError {
    #[error("internal rendering error in unit {unit}")]
    UnitFailed {
        unit: WindowId,
        #[source]
        source: UnitError,
    },

    #[error("malformed cache key: {0}")]
    MalformedCacheKey(String),

    #[error(transparent)]
    Stream(#[from] StreamError),

    #[error("unit {unit} cannot handle {request_type} requests")]
    UnsupportedAction {
        unit: WindowId,
        request_type: RequestType,
    },

    #[error("unit {unit} asked for cached content after writing output")]
    CachedContentConflict { unit: WindowId },

    #[error("unable to obtain rendering buffer for unit {unit}")]
    BufferMissing { unit: WindowId },

    #[error("orchestration failed: {0}")]
    Orchestration(String),
}

impl RenderError {
    /// Wrap a unit failure.
    pub fn unit_failed(unit: &WindowId, source: UnitError) -> Self {
        Self::UnitFailed {
            unit: unit.clone(),
            source,
        }
    }

    /// The request type is not handled by the unit.
    pub fn unsupported(request: &RenderRequest) -> Self {
        Self::UnsupportedAction {
            unit: request.window.window_id.clone(),
            request_type: request.request_type,
        }
    }

    /// Whether the error came from unit logic rather than the engine.
    pub fn is_unit_failure(&self) -> bool {
        matches!(
            self,
            Self::UnitFailed { .. } | Self::UnsupportedAction { .. } | Self::CachedContentConflict { .. }
        )
    }
}

impl From<CacheError> for RenderError {
    fn from(err: CacheError) -> Self {
        match err {
            CacheError::MalformedKey(message) => Self::MalformedCacheKey(message),
            CacheError::Unavailable(message) => Self::Orchestration(message),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_unit_failure_message_is_generic() {
        let err = RenderError::unit_failed(&WindowId::new("w1"), UnitError::failed("db password wrong"));
        assert_eq!(err.to_string(), "internal rendering error in unit w1");
        assert!(err.is_unit_failure());

        let source = std::error::Error::source(&err).unwrap();
        assert!(source.to_string().contains("db password wrong"));
    }

    #[test]
    fn test_cache_error_conversion() {
        let err: RenderError = CacheError::MalformedKey("no session".into()).into();
        assert!(matches!(err, RenderError::MalformedCacheKey(_)));
        assert!(!err.is_unit_failure());
    }
}
