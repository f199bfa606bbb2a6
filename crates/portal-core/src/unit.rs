//! Unit failures and the registry collaborator.

use std::collections::HashMap;

use parking_lot::RwLock;
use thiserror::Error;

use crate::config::{UnitConfig, UnitSpec};
use crate::ids::WindowId;

/// Failure raised by a unit's own logic.
#[derive(Debug, Error)]
pub enum UnitError {
    /// The unit reported a failure.
    #[error("{message}")]
    Failed {
        message: String,
        #[source]
        source: Option<Box<dyn std::error::Error + Send + Sync>>,
    },

    /// The unit noticed cancellation and stopped.
    #[error("unit rendering was cancelled")]
    Cancelled,

    /// The unit does not handle this kind of request.
    #[error("unit does not support {0} requests")]
    Unsupported(String),

    #[error(transparent)]
    Other(#[from] anyhow::Error),
}

impl UnitError {
    /// Create a failure with a message.
    pub fn failed(message: impl Into<String>) -> Self {
        Self::Failed {
            message: message.into(),
            source: None,
        }
    }

    /// Create a failure wrapping an underlying cause.
    pub fn with_source(
        message: impl Into<String>,
        source: impl std::error::Error + Send + Sync + 'static,
    ) -> Self {
        Self::Failed {
            message: message.into(),
            source: Some(Box::new(source)),
        }
    }
}

/// Lookup of per-unit configuration by window.
pub trait UnitRegistry: Send + Sync {
    /// Configuration of the unit placed in `window`, if known.
    fn unit_config(&self, window: &WindowId) -> Option<UnitConfig>;
}

/// Registry backed by an in-process map.
#[derive(Debug, Default)]
pub struct InMemoryRegistry {
    units: RwLock<HashMap<WindowId, UnitConfig>>,
}

impl InMemoryRegistry {
    /// Create an empty registry.
    pub fn new() -> Self {
        Self::default()
    }

    /// Build a registry from configured unit specs.
    pub fn from_specs(specs: &[UnitSpec]) -> Self {
        let registry = Self::new();
        for spec in specs {
            registry.register(spec.window.as_str(), spec.config.clone());
        }
        registry
    }

    /// Register or replace a unit's configuration.
    pub fn register(&self, window: impl Into<WindowId>, config: UnitConfig) {
        self.units.write().insert(window.into(), config);
    }

    /// Remove a unit, returning its configuration.
    pub fn unregister(&self, window: &WindowId) -> Option<UnitConfig> {
        self.units.write().remove(window)
    }

    /// Number of registered units.
    pub fn len(&self) -> usize {
        self.units.read().len()
    }

    /// Whether no units are registered.
    pub fn is_empty(&self) -> bool {
        self.units.read().is_empty()
    }
}

impl UnitRegistry for InMemoryRegistry {
    fn unit_config(&self, window: &WindowId) -> Option<UnitConfig> {
        self.units.read().get(window).cloned()
    }
}
