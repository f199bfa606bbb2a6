//! Cache-control decision layer for the standards-based rendering path.

use std::collections::HashMap;
use std::sync::Arc;

use parking_lot::Mutex;
use portal_core::{CacheConfig, RenderRequest, UnitConfig, UnitRegistry, WindowId};
use portal_streaming::OutputBuffer;
use serde::Serialize;
use tracing::{debug, trace, warn};

use crate::entry::{CacheEntry, CacheResult};
use crate::headers::validator_matches;
use crate::key::CacheKey;
use crate::policy::{CacheControl, OutputKind};
use crate::store::{CacheStore, InMemoryStore};

/// Per-request memo of cache-control decisions, keyed by window and kind.
///
/// Lives exactly as long as one incoming request.
#[derive(Debug, Default)]
pub struct RequestCacheState {
    controls: Mutex<HashMap<(WindowId, OutputKind), CacheControl>>,
}

impl RequestCacheState {
    /// Create an empty memo.
    pub fn new() -> Self {
        Self::default()
    }

    /// Memoized control, if computed.
    pub fn get(&self, window: &WindowId, kind: OutputKind) -> Option<CacheControl> {
        self.controls.lock().get(&(window.clone(), kind)).cloned()
    }

    /// Record or replace a control.
    pub fn update(&self, window: &WindowId, kind: OutputKind, control: CacheControl) {
        self.controls.lock().insert((window.clone(), kind), control);
    }

    /// Forget every control for a window.
    pub fn invalidate(&self, window: &WindowId) {
        self.controls.lock().retain(|(w, _), _| w != window);
    }
}

/// Private and public stores for one output kind.
#[derive(Clone)]
pub struct ScopedStores {
    /// Session-partitioned store.
    pub private: Arc<dyn CacheStore>,
    /// Shared store.
    pub public: Arc<dyn CacheStore>,
}

impl ScopedStores {
    fn in_memory(kind: OutputKind, config: &CacheConfig) -> Self {
        Self {
            private: Arc::new(InMemoryStore::new(
                format!("{}-private", kind),
                config.private_ttl_secs,
                config.max_entries,
            )),
            public: Arc::new(InMemoryStore::new(
                format!("{}-public", kind),
                config.public_ttl_secs,
                config.max_entries,
            )),
        }
    }

    fn scope(&self, public: bool) -> &Arc<dyn CacheStore> {
        if public {
            &self.public
        } else {
            &self.private
        }
    }
}

/// Entry counts of every store.
#[derive(Debug, Clone, Copy, Default, Serialize)]
pub struct CacheStats {
    pub render_private: usize,
    pub render_public: usize,
    pub resource_private: usize,
    pub resource_public: usize,
}

/// Decides whether unit output is replayed, admitted or purged.
pub struct CacheControlService {
    registry: Arc<dyn UnitRegistry>,
    render: ScopedStores,
    resource: ScopedStores,
    size_threshold: usize,
}

impl CacheControlService {
    /// Create a service with in-memory stores sized from `config`.
    pub fn new(registry: Arc<dyn UnitRegistry>, config: &CacheConfig) -> Self {
        Self {
            registry,
            render: ScopedStores::in_memory(OutputKind::Render, config),
            resource: ScopedStores::in_memory(OutputKind::Resource, config),
            size_threshold: config.size_threshold,
        }
    }

    /// Replace the stores used for one output kind.
    pub fn with_stores(mut self, kind: OutputKind, stores: ScopedStores) -> Self {
        match kind {
            OutputKind::Render => self.render = stores,
            OutputKind::Resource => self.resource = stores,
        }
        self
    }

    /// Set the capture threshold.
    pub fn with_size_threshold(mut self, bytes: usize) -> Self {
        self.size_threshold = bytes;
        self
    }

    /// Largest output admitted to a cache.
    pub fn size_threshold(&self) -> usize {
        self.size_threshold
    }

    fn stores(&self, kind: OutputKind) -> &ScopedStores {
        match kind {
            OutputKind::Render => &self.render,
            OutputKind::Resource => &self.resource,
        }
    }

    fn unit_config(&self, window: &WindowId) -> Option<UnitConfig> {
        self.registry.unit_config(window)
    }

    /// Cache-control for a window, computed once per request.
    ///
    /// A window unknown to the registry gets a non-caching private control.
    /// When an entry is already cached its validator becomes the ETag.
    pub async fn cache_control(
        &self,
        state: &RequestCacheState,
        request: &RenderRequest,
        kind: OutputKind,
    ) -> CacheResult<CacheControl> {
        let window = &request.window.window_id;
        if let Some(control) = state.get(window, kind) {
            return Ok(control);
        }

        let mut control = match self.unit_config(window) {
            Some(config) => CacheControl::from_config(&config),
            None => {
                warn!(window = %window, "no registry entry for window, using default cache control");
                CacheControl::default()
            }
        };

        if let Some(entry) = self.cached_output(request, kind).await? {
            control.etag = Some(entry.etag);
        }

        state.update(window, kind, control.clone());
        Ok(control)
    }

    /// Look up cached output, public scope first.
    ///
    /// Expired entries are removed and reported as a miss. Stale entries are
    /// returned; the caller decides whether they may be replayed. Store read
    /// failures are misses.
    pub async fn cached_output(
        &self,
        request: &RenderRequest,
        kind: OutputKind,
    ) -> CacheResult<Option<CacheEntry>> {
        let config = self
            .unit_config(&request.window.window_id)
            .unwrap_or_default();
        let stores = self.stores(kind);

        let public_key = CacheKey::public(request, kind, &config.declared_parameters);
        if let Some(entry) = read_entry(stores.public.as_ref(), &public_key).await {
            trace!(key = %public_key, scope = "public", "cache hit");
            return Ok(Some(entry));
        }

        let private_key = match CacheKey::private(request, kind) {
            Ok(key) => key,
            Err(err) => {
                if config.cache_scope.is_public() || config.expiration_seconds == 0 {
                    return Ok(None);
                }
                return Err(err);
            }
        };
        let entry = read_entry(stores.private.as_ref(), &private_key).await;
        if entry.is_some() {
            trace!(key = %private_key, scope = "private", "cache hit");
        }
        Ok(entry)
    }

    /// Admit output to the scope named by `control`.
    ///
    /// Store write failures are logged and dropped.
    pub async fn cache_output(
        &self,
        request: &RenderRequest,
        kind: OutputKind,
        payload: OutputBuffer,
        title: Option<String>,
        control: &CacheControl,
    ) -> CacheResult<()> {
        let key = if control.public_scope {
            let config = self
                .unit_config(&request.window.window_id)
                .unwrap_or_default();
            CacheKey::public(request, kind, &config.declared_parameters)
        } else {
            CacheKey::private(request, kind)?
        };

        let store = self.stores(kind).scope(control.public_scope);
        let ttl = control.effective_ttl(store.default_ttl());
        let mut entry = CacheEntry::new(payload)
            .with_title(title)
            .with_ttl(ttl)
            .with_expiration(control.expiration_seconds);
        if let Some(etag) = &control.etag {
            entry = entry.with_etag(etag.clone());
        }

        debug!(key = %key, scope = %control.scope(), ttl_secs = ttl, "caching output");
        if let Err(err) = store.put(key.clone(), entry).await {
            warn!(key = %key, error = %err, "dropping cache write");
        }
        Ok(())
    }

    /// Whether output under `control` may be cached.
    pub fn should_cache(&self, control: &CacheControl) -> bool {
        control.should_cache()
    }

    /// Whether the caller's validator matches the current entry.
    pub fn is_not_modified(&self, request: &RenderRequest, control: &CacheControl) -> bool {
        match (request.if_none_match(), control.etag.as_deref()) {
            (Some(presented), Some(current)) => validator_matches(presented, current),
            _ => false,
        }
    }

    /// Remove cached render and resource output of a window in both scopes.
    ///
    /// Private entries are only addressable with a session. Returns whether
    /// anything was removed.
    pub async fn purge(&self, state: &RequestCacheState, request: &RenderRequest) -> bool {
        let window = &request.window.window_id;
        state.invalidate(window);

        let config = self.unit_config(window).unwrap_or_default();
        let mut removed = false;

        for kind in [OutputKind::Render, OutputKind::Resource] {
            let stores = self.stores(kind);

            let public_key = CacheKey::public(request, kind, &config.declared_parameters);
            removed |= remove_entry(stores.public.as_ref(), &public_key).await;

            if let Ok(private_key) = CacheKey::private(request, kind) {
                removed |= remove_entry(stores.private.as_ref(), &private_key).await;
            }
        }

        debug!(window = %window, removed, "purged cached output");
        removed
    }

    /// Entry counts per store.
    pub async fn stats(&self) -> CacheStats {
        CacheStats {
            render_private: self.render.private.len().await,
            render_public: self.render.public.len().await,
            resource_private: self.resource.private.len().await,
            resource_public: self.resource.public.len().await,
        }
    }
}

async fn read_entry(store: &dyn CacheStore, key: &CacheKey) -> Option<CacheEntry> {
    match store.get(key).await {
        Ok(Some(entry)) if entry.is_expired() => {
            remove_entry(store, key).await;
            None
        }
        Ok(entry) => entry,
        Err(err) => {
            warn!(key = %key, error = %err, "cache read failed, treating as miss");
            None
        }
    }
}

async fn remove_entry(store: &dyn CacheStore, key: &CacheKey) -> bool {
    match store.remove(key).await {
        Ok(removed) => removed,
        Err(err) => {
            warn!(key = %key, error = %err, "cache remove failed");
            false
        }
    }
}
