//! Caching infrastructure for unit output.
//!
//! This crate provides:
//! - `CacheStore` - Concurrent key to entry store, with `InMemoryStore`
//! - `CacheKey` - Private (session-partitioned) and public (shared) keys
//! - `CacheControl` - TTL selection, cacheability and response headers
//! - `CacheControlService` - Replay, admit and purge decisions per request
//!
//! # Example
//!
//! ```ignore
//! use portal_cache::{CacheControlService, OutputKind, RequestCacheState};
//!
//! let state = RequestCacheState::new();
//! let control = service.cache_control(&state, &request, OutputKind::Render).await?;
//! if service.is_not_modified(&request, &control) {
//!     // answer 304 without running the unit
//! }
//! ```

mod control;
mod entry;
mod headers;
mod key;
mod policy;
mod store;

pub use control::*;
pub use entry::*;
pub use headers::*;
pub use key::*;
pub use policy::*;
pub use store::*;
