//! Unit and engine configuration.

use std::path::Path;
use std::str::FromStr;

use serde::{Deserialize, Serialize};
use thiserror::Error;

/// Whether cached output is shared across callers or partitioned per session.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum CacheScope {
    /// Shared by every caller with the same logical parameters.
    Public,
    /// Partitioned per session and window.
    #[default]
    Private,
}

impl CacheScope {
    /// Whether this is the shared scope.
    pub fn is_public(&self) -> bool {
        matches!(self, Self::Public)
    }
}

impl FromStr for CacheScope {
    type Err = std::convert::Infallible;

    /// Anything other than "public" (case-insensitive) means private.
    fn from_str(s: &str) -> Result<Self, Self::Err> {
        if s.trim().eq_ignore_ascii_case("public") {
            Ok(Self::Public)
        } else {
            Ok(Self::Private)
        }
    }
}

impl std::fmt::Display for CacheScope {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::Public => write!(f, "public"),
            Self::Private => write!(f, "private"),
        }
    }
}

/// Per-unit configuration supplied by the registry.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct UnitConfig {
    /// Render deadline in milliseconds; 0 means use the engine default.
    #[serde(default)]
    pub timeout_millis: u64,
    /// Cache scope for this unit's output.
    #[serde(default)]
    pub cache_scope: CacheScope,
    /// Freshness window in seconds: 0 never caches, negative never goes stale.
    #[serde(default)]
    pub expiration_seconds: i32,
    /// Public parameters the unit declares; only these enter public keys.
    #[serde(default)]
    pub declared_parameters: Vec<String>,
}

impl Default for UnitConfig {
    fn default() -> Self {
        Self {
            timeout_millis: 0,
            cache_scope: CacheScope::Private,
            expiration_seconds: 0,
            declared_parameters: Vec::new(),
        }
    }
}

impl UnitConfig {
    /// Create a configuration with a timeout and no caching.
    pub fn new(timeout_millis: u64) -> Self {
        Self {
            timeout_millis,
            ..Default::default()
        }
    }

    /// Set the cache scope.
    pub fn with_scope(mut self, scope: CacheScope) -> Self {
        self.cache_scope = scope;
        self
    }

    /// Set the freshness window.
    pub fn with_expiration(mut self, seconds: i32) -> Self {
        self.expiration_seconds = seconds;
        self
    }

    /// Declare a public parameter.
    pub fn with_declared_parameter(mut self, name: impl Into<String>) -> Self {
        self.declared_parameters.push(name.into());
        self
    }

    /// Timeout to apply, falling back to the engine default.
    pub fn effective_timeout_millis(&self, default_ms: u64) -> u64 {
        if self.timeout_millis == 0 {
            default_ms
        } else {
            self.timeout_millis
        }
    }
}

/// Errors loading or saving configuration files.
#[derive(Debug, Error)]
pub enum ConfigError {
    #[error("failed to read config file {path}: {source}")]
    Read {
        path: String,
        #[source]
        source: std::io::Error,
    },

    #[error("failed to write config file {path}: {source}")]
    Write {
        path: String,
        #[source]
        source: std::io::Error,
    },

    #[error("failed to parse config file {path}: {message}")]
    Parse { path: String, message: String },

    #[error("failed to serialize config: {0}")]
    Serialize(String),
}

/// Engine configuration file (`portal.toml` or `portal.json`).
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct PortalConfig {
    /// Renderer settings.
    #[serde(default)]
    pub renderer: RendererConfig,

    /// Cache store settings.
    #[serde(default)]
    pub cache: CacheConfig,

    /// Logging settings.
    #[serde(default)]
    pub logging: LoggingConfig,

    /// Units placed on the demo page.
    #[serde(default)]
    pub units: Vec<UnitSpec>,
}

impl PortalConfig {
    /// Load config from a file, picking the format by extension.
    pub fn load(path: impl AsRef<Path>) -> Result<Self, ConfigError> {
        let path = path.as_ref();
        let display = path.display().to_string();
        let content = std::fs::read_to_string(path).map_err(|source| ConfigError::Read {
            path: display.clone(),
            source,
        })?;

        if is_json(path) {
            serde_json::from_str(&content).map_err(|e| ConfigError::Parse {
                path: display,
                message: e.to_string(),
            })
        } else {
            toml::from_str(&content).map_err(|e| ConfigError::Parse {
                path: display,
                message: e.to_string(),
            })
        }
    }

    /// Save config to a file.
    pub fn save(&self, path: impl AsRef<Path>) -> Result<(), ConfigError> {
        let path = path.as_ref();
        let content = if is_json(path) {
            serde_json::to_string_pretty(self).map_err(|e| ConfigError::Serialize(e.to_string()))?
        } else {
            toml::to_string_pretty(self).map_err(|e| ConfigError::Serialize(e.to_string()))?
        };

        std::fs::write(path, content).map_err(|source| ConfigError::Write {
            path: path.display().to_string(),
            source,
        })
    }
}

fn is_json(path: &Path) -> bool {
    path.extension().is_some_and(|ext| ext == "json")
}

/// Renderer settings.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct RendererConfig {
    /// Maximum number of units rendering at once.
    #[serde(default = "default_pool_size")]
    pub pool_size: usize,

    /// Deadline for units that declare none.
    #[serde(default = "default_timeout_ms")]
    pub default_timeout_ms: u64,

    /// Whether the legacy path caches cacheable units.
    #[serde(default = "default_true")]
    pub cache_units: bool,

    /// Capture character output instead of markup events where possible.
    #[serde(default)]
    pub character_cacheable: bool,
}

fn default_pool_size() -> usize {
    16
}

fn default_timeout_ms() -> u64 {
    5000
}

fn default_true() -> bool {
    true
}

impl Default for RendererConfig {
    fn default() -> Self {
        Self {
            pool_size: default_pool_size(),
            default_timeout_ms: default_timeout_ms(),
            cache_units: true,
            character_cacheable: false,
        }
    }
}

/// Cache store settings.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct CacheConfig {
    /// Store default TTL for private-scope entries.
    #[serde(default = "default_private_ttl")]
    pub private_ttl_secs: u64,

    /// Store default TTL for public-scope entries.
    #[serde(default = "default_public_ttl")]
    pub public_ttl_secs: u64,

    /// Maximum entries per store.
    #[serde(default = "default_max_entries")]
    pub max_entries: usize,

    /// Largest output, in bytes or chars, admitted to a cache.
    #[serde(default = "default_size_threshold")]
    pub size_threshold: usize,
}

fn default_private_ttl() -> u64 {
    300
}

fn default_public_ttl() -> u64 {
    600
}

fn default_max_entries() -> usize {
    10_000
}

fn default_size_threshold() -> usize {
    102_400
}

impl Default for CacheConfig {
    fn default() -> Self {
        Self {
            private_ttl_secs: default_private_ttl(),
            public_ttl_secs: default_public_ttl(),
            max_entries: default_max_entries(),
            size_threshold: default_size_threshold(),
        }
    }
}

/// Log output format.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum LogFormat {
    /// Compact human-readable lines.
    #[default]
    Human,
    /// One JSON object per line.
    Json,
}

/// Log level threshold.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Default, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum LogLevel {
    Trace,
    Debug,
    #[default]
    Info,
    Warn,
    Error,
}

impl LogLevel {
    /// Directive string understood by env filters.
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Trace => "trace",
            Self::Debug => "debug",
            Self::Info => "info",
            Self::Warn => "warn",
            Self::Error => "error",
        }
    }
}

/// Logging settings.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct LoggingConfig {
    /// Minimum level emitted.
    #[serde(default)]
    pub level: LogLevel,

    /// Output format.
    #[serde(default)]
    pub format: LogFormat,
}

/// A unit placed on the demo page, plus its simulated behavior.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct UnitSpec {
    /// Window identity.
    pub window: String,

    /// Definition identity; defaults to the window identity.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub definition: Option<String>,

    /// Title published while rendering.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub title: Option<String>,

    /// Markup the simulated unit writes.
    #[serde(default)]
    pub markup: String,

    /// Simulated render latency.
    #[serde(default)]
    pub latency_ms: u64,

    /// Whether the simulated unit fails.
    #[serde(default)]
    pub fail: bool,

    /// Registry configuration for this unit.
    #[serde(flatten)]
    pub config: UnitConfig,
}
