//! The task that runs one unit's logic on the pool.

use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::time::{Duration, Instant};

use parking_lot::Mutex;
use portal_cache::{CacheEntry, CacheKey, CacheStore, KeyScope, UnitCacheKey};
use portal_core::{RenderObserver, RenderPhase, RenderRequest, RequestType, WindowId};
use portal_streaming::OutputBuffer;
use tokio::sync::watch;
use tracing::{debug, trace, warn};

use crate::error::RenderError;
use crate::group::{GroupWait, RenderingGroup};
use crate::unit::{Unit, UnitContext};

/// System and instance stores for cacheable units.
#[derive(Clone)]
pub(crate) struct UnitCaches {
    pub system: Arc<dyn CacheStore>,
    pub instance: Arc<dyn CacheStore>,
    pub enabled: bool,
    pub character_cacheable: bool,
    pub size_threshold: usize,
}

impl UnitCaches {
    fn store(&self, scope: KeyScope) -> &Arc<dyn CacheStore> {
        match scope {
            KeyScope::System => &self.system,
            KeyScope::Instance => &self.instance,
        }
    }

    /// Instance keys are partitioned by session and window; a missing
    /// session makes the key malformed.
    fn storage_key(request: &RenderRequest, key: &UnitCacheKey) -> Result<CacheKey, RenderError> {
        match key.scope {
            KeyScope::System => Ok(key.key.clone()),
            KeyScope::Instance => {
                let window = &request.window.window_id;
                let session = request.session_id.as_ref().ok_or_else(|| {
                    RenderError::MalformedCacheKey(format!(
                        "no session for instance-scope key of unit {}",
                        window
                    ))
                })?;
                Ok(key.key.scoped_to(session, window))
            }
        }
    }

    /// Whether output of this size may be admitted.
    pub fn admits(&self, len: usize) -> bool {
        self.enabled && len <= self.size_threshold
    }

    /// Read an entry; read failures and expired entries are misses.
    pub async fn lookup(
        &self,
        request: &RenderRequest,
        key: &UnitCacheKey,
    ) -> Result<Option<CacheEntry>, RenderError> {
        let storage_key = Self::storage_key(request, key)?;
        let window = &request.window.window_id;
        match self.store(key.scope).get(&storage_key).await {
            Ok(Some(entry)) if !entry.is_expired() => Ok(Some(entry)),
            Ok(_) => Ok(None),
            Err(err) => {
                warn!(unit = %window, key = %storage_key, error = %err, "unit cache read failed");
                Ok(None)
            }
        }
    }

    /// Drop an entry; returns whether one was removed.
    pub async fn evict(&self, request: &RenderRequest, key: &UnitCacheKey) -> Result<bool, RenderError> {
        let storage_key = Self::storage_key(request, key)?;
        match self.store(key.scope).remove(&storage_key).await {
            Ok(removed) => Ok(removed),
            Err(err) => {
                warn!(unit = %request.window.window_id, key = %storage_key, error = %err, "unit cache remove failed");
                Ok(false)
            }
        }
    }

    /// Store output under the unit's key. Write failures are dropped.
    pub async fn admit(
        &self,
        request: &RenderRequest,
        key: &UnitCacheKey,
        payload: OutputBuffer,
        title: Option<String>,
    ) -> Result<(), RenderError> {
        let store = self.store(key.scope);
        let storage_key = Self::storage_key(request, key)?;
        let window = &request.window.window_id;
        let mut entry = CacheEntry::new(payload)
            .with_title(title)
            .with_ttl(store.default_ttl());
        if let Some(validity) = &key.validity {
            entry = entry.with_validity(validity.clone());
        }

        trace!(unit = %window, key = %storage_key, "caching unit output");
        if let Err(err) = store.put(storage_key, entry).await {
            warn!(unit = %window, error = %err, "dropping unit cache write");
        }
        Ok(())
    }
}

/// What the worker produced.
#[derive(Debug, Default)]
pub(crate) struct WorkerReport {
    pub successful: bool,
    pub timed_out: bool,
    pub buffer: Option<OutputBuffer>,
    pub error: Option<RenderError>,
    pub title: Option<String>,
    pub from_cache: bool,
    pub render_time: Option<Duration>,
    pub cache_key: Option<UnitCacheKey>,
}

/// State shared between a worker and its handle.
pub(crate) struct WorkerState {
    pub window: WindowId,
    /// Flips once the unit consumed its parameters, or the worker finished.
    pub prepared: watch::Sender<bool>,
    pub done: AtomicBool,
    pub report: Mutex<WorkerReport>,
}

impl WorkerState {
    pub fn new(window: WindowId) -> Arc<Self> {
        let (prepared, _) = watch::channel(false);
        Arc::new(Self {
            window,
            prepared,
            done: AtomicBool::new(false),
            report: Mutex::new(WorkerReport::default()),
        })
    }

    pub fn is_done(&self) -> bool {
        self.done.load(Ordering::SeqCst)
    }
}

/// Runs a unit through prepare, group check-in, cache lookup and render.
pub(crate) struct UnitWorker {
    pub state: Arc<WorkerState>,
    pub unit: Unit,
    pub ctx: UnitContext,
    pub group: Option<RenderingGroup>,
    pub caches: UnitCaches,
    pub deadline: Instant,
    pub observer: Arc<dyn RenderObserver>,
    pub started: Instant,
}

impl UnitWorker {
    pub async fn run(self) {
        if self.ctx.is_cancelled() {
            debug!("unit abandoned before it started");
            self.finish_timed_out();
            return;
        }

        match self.ctx.request().request_type {
            RequestType::Action | RequestType::Event => self.run_action().await,
            RequestType::Render | RequestType::Resource => self.run_render().await,
        }
    }

    async fn run_action(self) {
        let result = match &self.unit {
            Unit::DirectResponse(unit) => match self.ctx.request().request_type {
                RequestType::Action => unit.process_action(&self.ctx).await,
                _ => unit.process_event(&self.ctx).await,
            }
            .map_err(|e| RenderError::unit_failed(&self.state.window, e)),
            _ => Err(RenderError::unsupported(self.ctx.request())),
        };

        self.check_in();
        self.finish(result.map(|_| None));
    }

    async fn run_render(self) {
        let window = self.state.window.clone();

        if let Err(err) = self.unit.prepare(&self.ctx).await {
            self.check_in();
            self.finish(Err(RenderError::unit_failed(&window, err)));
            return;
        }
        self.state.prepared.send_replace(true);
        self.observe(RenderPhase::CheckedIn);

        if let Some(group) = &self.group {
            if group.check_in_and_wait(&window, self.deadline).await == GroupWait::TimedOut {
                self.finish_timed_out();
                return;
            }
        }

        let cache_key = self.cached_lookup().await;
        let cache_key = match cache_key {
            CacheLookup::Finished => return,
            CacheLookup::Miss(key) => key,
        };

        let render_start = Instant::now();
        let mut buffer = OutputBuffer::new();
        let result = match (&self.unit, self.ctx.request().request_type) {
            (Unit::DirectResponse(unit), RequestType::Resource) => {
                unit.serve_resource(&self.ctx, &mut buffer).await
            }
            _ => self.unit.render(&self.ctx, &mut buffer).await,
        };
        let render_time = render_start.elapsed();
        self.state.report.lock().render_time = Some(render_time);

        if let Err(err) = result {
            self.finish(Err(RenderError::unit_failed(&window, err)));
            return;
        }

        let title = self.ctx.hints().title;
        if let Some(key) = &cache_key {
            let admissible = !self.unit.is_character() || self.caches.character_cacheable;
            if admissible && self.caches.admits(buffer.len()) {
                if let Err(err) = self
                    .caches
                    .admit(self.ctx.request(), key, buffer.clone(), title.clone())
                    .await
                {
                    warn!(unit = %window, error = %err, "unit output not cached");
                }
            }
        }

        {
            let mut report = self.state.report.lock();
            report.title = title;
            report.cache_key = cache_key;
        }
        self.finish(Ok(Some(buffer)));
    }

    async fn cached_lookup(&self) -> CacheLookup {
        if !self.caches.enabled {
            return CacheLookup::Miss(None);
        }
        let Some(cacheable) = self.unit.cacheable() else {
            return CacheLookup::Miss(None);
        };
        let Some(key) = cacheable.generate_key(&self.ctx) else {
            return CacheLookup::Miss(None);
        };

        let request = self.ctx.request();
        let cached = match self.caches.lookup(request, &key).await {
            Ok(cached) => cached,
            Err(err) => {
                self.finish(Err(err));
                return CacheLookup::Finished;
            }
        };
        if let Some(entry) = cached {
            if cacheable.is_cache_valid(&self.ctx, entry.validity.as_deref()) {
                debug!(key = %entry.etag, "serving unit output from cache");
                {
                    let mut report = self.state.report.lock();
                    report.title = entry.title.clone();
                    report.from_cache = true;
                    report.cache_key = Some(key);
                }
                self.observe(RenderPhase::CacheHit);
                self.finish(Ok(Some(entry.payload)));
                return CacheLookup::Finished;
            }
            let _ = self.caches.evict(request, &key).await;
        }

        self.observe(RenderPhase::CacheMiss);
        CacheLookup::Miss(Some(key))
    }

    fn check_in(&self) {
        if let Some(group) = &self.group {
            group.check_in(&self.state.window);
        }
    }

    fn observe(&self, phase: RenderPhase) {
        self.observer
            .on_phase(&self.state.window, phase, self.started.elapsed());
    }

    fn finish(&self, result: Result<Option<OutputBuffer>, RenderError>) {
        {
            let mut report = self.state.report.lock();
            match result {
                Ok(buffer) => {
                    report.successful = true;
                    if buffer.is_some() {
                        report.buffer = buffer;
                    }
                }
                Err(err) => {
                    debug!(error = %err, "unit worker failed");
                    report.successful = false;
                    report.error = Some(err);
                }
            }
        }
        self.mark_done();
    }

    fn finish_timed_out(&self) {
        self.state.report.lock().timed_out = true;
        self.mark_done();
    }

    fn mark_done(&self) {
        self.state.done.store(true, Ordering::SeqCst);
        self.state.prepared.send_replace(true);
    }
}

enum CacheLookup {
    /// Served from cache, or failed.
    Finished,
    Miss(Option<UnitCacheKey>),
}
