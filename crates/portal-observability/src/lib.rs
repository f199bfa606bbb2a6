//! Observability for the portal rendering engine.
//!
//! This crate provides:
//! - `init_tracing` - Global subscriber from `LoggingConfig`
//! - `RenderMetricsCollector` - Per-unit lifecycle metrics

mod logging;
mod metrics;

pub use logging::*;
pub use metrics::*;

pub use portal_core::{LogFormat, LogLevel, LoggingConfig};
