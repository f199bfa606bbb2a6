//! Output primitives for unit rendering.
//!
//! This crate provides the write side of the engine:
//! - `OutputSink` - Destination unit logic writes into
//! - `OutputBuffer` - Replayable capture of markup, characters or bytes
//! - `LimitedCapture` - Capture abandoned once a size threshold is crossed
//! - `TeeSink` - Write-through to the real output plus a capture
//! - `StreamingSink` - Async page stream of rendered fragments

mod buffer;
mod event;
mod sink;
mod stream;

pub use buffer::*;
pub use event::*;
pub use sink::*;
pub use stream::*;
