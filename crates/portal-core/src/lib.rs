//! Core abstractions for the portal unit rendering engine.
//!
//! This crate provides the fundamental types shared by every layer:
//! - `RenderRequest` - Unit identity plus request-scoped parameters
//! - `UnitConfig` / `PortalConfig` - Per-unit and engine configuration
//! - `UnitRegistry` - Lookup of window identity and unit configuration
//! - `TimingContext` / `RenderObserver` - Render lifecycle tracking

mod config;
mod context;
mod ids;
mod lifecycle;
mod unit;

pub use config::*;
pub use context::*;
pub use ids::*;
pub use lifecycle::*;
pub use unit::*;
