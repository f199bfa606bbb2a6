//! Concurrent unit rendering.
//!
//! This crate renders page units on a bounded worker pool:
//! - `Renderer` / `RenderHandle` - Dispatch with per-unit timeouts
//! - `RenderingGroup` - Units of one page start output together
//! - `PortletRenderer` - Cache-control aware markup and resource rendering
//! - `PageRenderer` - Whole-page assembly with fallbacks
//! - `Unit` - Capability model for unit logic

mod error;
mod fallback;
mod group;
mod page;
mod pool;
mod portlet;
mod renderer;
mod unit;
mod worker;

pub use error::*;
pub use fallback::*;
pub use group::*;
pub use page::*;
pub use pool::*;
pub use portlet::*;
pub use renderer::*;
pub use unit::*;
