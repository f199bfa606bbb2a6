//! Standards-based rendering path: cache control, validators and capture.

use std::sync::Arc;
use std::time::{Duration, Instant};

use http::StatusCode;
use portal_cache::{
    CacheControl, CacheControlService, CacheEntry, CacheHeadersBuilder, OutputKind,
    RequestCacheState,
};
use portal_core::{NoopObserver, RenderObserver, RenderPhase, RenderRequest, WindowId};
use portal_streaming::{LimitedCapture, OutputSink, TeeSink};
use tokio_util::sync::CancellationToken;
use tracing::{debug, debug_span, warn, Instrument};

use crate::error::RenderError;
use crate::unit::{Unit, UnitContext, UnitHints};

/// Result of a markup render.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct RenderResult {
    pub title: Option<String>,
    pub link: Option<String>,
    pub new_item_count: Option<u32>,
    pub render_time: Duration,
    pub from_cache: bool,
    /// The caller's validator matched; no body was written.
    pub not_modified: bool,
}

/// Result of serving a resource.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ResourceResult {
    pub status: StatusCode,
    pub render_time: Duration,
    pub from_cache: bool,
    pub not_modified: bool,
}

/// Renders units through the cache-control service.
///
/// Fresh cached output is replayed without invoking the unit. Otherwise the
/// unit renders into the caller's sink and a size-bounded capture at once; the
/// capture is admitted to the cache when the control allows it.
pub struct PortletRenderer {
    cache: Arc<CacheControlService>,
    observer: Arc<dyn RenderObserver>,
}

impl PortletRenderer {
    /// Create a renderer over a cache-control service.
    pub fn new(cache: Arc<CacheControlService>) -> Self {
        Self {
            cache,
            observer: Arc::new(NoopObserver),
        }
    }

    /// Report lifecycle phases to `observer`.
    pub fn with_observer(mut self, observer: Arc<dyn RenderObserver>) -> Self {
        self.observer = observer;
        self
    }

    /// The cache-control service in use.
    pub fn cache(&self) -> &CacheControlService {
        &self.cache
    }

    /// Purge cached output of the window, then run the unit's action.
    pub async fn do_action(
        &self,
        unit: &Unit,
        request: &RenderRequest,
        state: &RequestCacheState,
    ) -> Result<(), RenderError> {
        self.purge(request, state).await;
        let Unit::DirectResponse(direct) = unit else {
            return Err(RenderError::unsupported(request));
        };
        let ctx = self.context(request, None);
        direct
            .process_action(&ctx)
            .await
            .map_err(|e| RenderError::unit_failed(window_of(request), e))
    }

    /// Purge cached output of the window, then deliver the event.
    pub async fn do_event(
        &self,
        unit: &Unit,
        request: &RenderRequest,
        state: &RequestCacheState,
    ) -> Result<(), RenderError> {
        self.purge(request, state).await;
        let Unit::DirectResponse(direct) = unit else {
            return Err(RenderError::unsupported(request));
        };
        let ctx = self.context(request, None);
        direct
            .process_event(&ctx)
            .await
            .map_err(|e| RenderError::unit_failed(window_of(request), e))
    }

    async fn purge(&self, request: &RenderRequest, state: &RequestCacheState) {
        if self.cache.purge(state, request).await {
            self.observe(window_of(request), RenderPhase::Purged, Duration::ZERO);
        }
    }

    /// Render markup, replaying or admitting cached output as allowed.
    pub async fn do_render_markup(
        &self,
        unit: &Unit,
        request: &RenderRequest,
        state: &RequestCacheState,
        sink: &mut dyn OutputSink,
    ) -> Result<RenderResult, RenderError> {
        let span = debug_span!("render_markup", unit = %window_of(request));
        self.render_markup(unit, request, state, sink)
            .instrument(span)
            .await
    }

    async fn render_markup(
        &self,
        unit: &Unit,
        request: &RenderRequest,
        state: &RequestCacheState,
        sink: &mut dyn OutputSink,
    ) -> Result<RenderResult, RenderError> {
        let started = Instant::now();
        let window = window_of(request);
        let kind = OutputKind::Render;

        let control = self.cache.cache_control(state, request, kind).await?;
        let cached = self.cache.cached_output(request, kind).await?;
        if let Some(entry) = cached.as_ref().filter(|entry| !entry.is_stale()) {
            return self.replay_markup(request, &control, entry, sink, started);
        }
        self.observe(window, RenderPhase::CacheMiss, started.elapsed());

        let ctx = self.context(request, control.etag.clone());
        let mut capture = LimitedCapture::new(self.cache.size_threshold());
        let result = {
            let mut tee = TeeSink::new(&mut *sink, &mut capture);
            unit.render(&ctx, &mut tee).await
        };
        if let Err(err) = result {
            self.observe(window, RenderPhase::Failed(err.to_string()), started.elapsed());
            return Err(RenderError::unit_failed(window, err));
        }

        let hints = ctx.hints();
        let control = apply_hints(control, &hints);
        state.update(window, kind, control.clone());

        if control.use_cached_content {
            if let Some(entry) = cached.as_ref() {
                if capture.is_committed() {
                    return Err(RenderError::CachedContentConflict {
                        unit: window.clone(),
                    });
                }
                return self.replay_markup(request, &control, entry, sink, started);
            }
        } else if self.cache.should_cache(&control) {
            self.admit(request, kind, capture, hints.title.clone(), &control)
                .await;
        }

        self.observe(window, RenderPhase::Completed, started.elapsed());
        Ok(RenderResult {
            title: hints.title,
            link: hints.link,
            new_item_count: hints.new_item_count,
            render_time: started.elapsed(),
            from_cache: false,
            not_modified: false,
        })
    }

    fn replay_markup(
        &self,
        request: &RenderRequest,
        control: &CacheControl,
        entry: &CacheEntry,
        sink: &mut dyn OutputSink,
        started: Instant,
    ) -> Result<RenderResult, RenderError> {
        let window = window_of(request);
        let not_modified = self.cache.is_not_modified(request, control);
        if not_modified {
            self.observe(window, RenderPhase::NotModified, started.elapsed());
        } else {
            entry.payload.replay(sink)?;
            self.observe(window, RenderPhase::CacheHit, started.elapsed());
        }
        debug!(unit = %window, not_modified, age_secs = entry.age(), "replayed cached markup");

        Ok(RenderResult {
            title: entry.title.clone(),
            render_time: started.elapsed(),
            from_cache: true,
            not_modified,
            ..Default::default()
        })
    }

    /// Serve a resource, honoring the caller's validator.
    pub async fn do_serve_resource(
        &self,
        unit: &Unit,
        request: &RenderRequest,
        state: &RequestCacheState,
        sink: &mut dyn OutputSink,
    ) -> Result<ResourceResult, RenderError> {
        let span = debug_span!("serve_resource", unit = %window_of(request));
        self.serve_resource(unit, request, state, sink)
            .instrument(span)
            .await
    }

    async fn serve_resource(
        &self,
        unit: &Unit,
        request: &RenderRequest,
        state: &RequestCacheState,
        sink: &mut dyn OutputSink,
    ) -> Result<ResourceResult, RenderError> {
        let started = Instant::now();
        let window = window_of(request);
        let kind = OutputKind::Resource;

        let Unit::DirectResponse(direct) = unit else {
            return Err(RenderError::unsupported(request));
        };

        let control = self.cache.cache_control(state, request, kind).await?;
        let cached = self.cache.cached_output(request, kind).await?;
        if let Some(entry) = cached.as_ref().filter(|entry| !entry.is_stale()) {
            return self.replay_resource(request, &control, entry, sink, started);
        }
        self.observe(window, RenderPhase::CacheMiss, started.elapsed());

        let ctx = self.context(request, control.etag.clone());
        let mut capture = LimitedCapture::new(self.cache.size_threshold());
        let result = {
            let mut tee = TeeSink::new(&mut *sink, &mut capture);
            direct.serve_resource(&ctx, &mut tee).await
        };
        if let Err(err) = result {
            self.observe(window, RenderPhase::Failed(err.to_string()), started.elapsed());
            return Err(RenderError::unit_failed(window, err));
        }

        let hints = ctx.hints();
        let control = apply_hints(control, &hints);
        state.update(window, kind, control.clone());

        if control.use_cached_content {
            if let Some(entry) = cached.as_ref() {
                if capture.is_committed() {
                    return Err(RenderError::CachedContentConflict {
                        unit: window.clone(),
                    });
                }
                return self.replay_resource(request, &control, entry, sink, started);
            }
        } else if self.cache.should_cache(&control) {
            self.admit(request, kind, capture, None, &control).await;
        }

        self.observe(window, RenderPhase::Completed, started.elapsed());
        Ok(ResourceResult {
            status: StatusCode::OK,
            render_time: started.elapsed(),
            from_cache: false,
            not_modified: false,
        })
    }

    fn replay_resource(
        &self,
        request: &RenderRequest,
        control: &CacheControl,
        entry: &CacheEntry,
        sink: &mut dyn OutputSink,
        started: Instant,
    ) -> Result<ResourceResult, RenderError> {
        let window = window_of(request);
        if self.cache.is_not_modified(request, control) {
            self.observe(window, RenderPhase::NotModified, started.elapsed());
            return Ok(ResourceResult {
                status: StatusCode::NOT_MODIFIED,
                render_time: started.elapsed(),
                from_cache: true,
                not_modified: true,
            });
        }

        for (name, value) in CacheHeadersBuilder::for_entry(control, entry).build() {
            sink.add_header(name, &value);
        }
        entry.payload.replay(sink)?;
        self.observe(window, RenderPhase::CacheHit, started.elapsed());

        Ok(ResourceResult {
            status: StatusCode::OK,
            render_time: started.elapsed(),
            from_cache: true,
            not_modified: false,
        })
    }

    async fn admit(
        &self,
        request: &RenderRequest,
        kind: OutputKind,
        capture: LimitedCapture,
        title: Option<String>,
        control: &CacheControl,
    ) {
        let window = window_of(request);
        let Some(buffer) = capture.into_buffer() else {
            debug!(unit = %window, threshold = self.cache.size_threshold(), "output exceeded cache threshold");
            return;
        };
        if let Err(err) = self
            .cache
            .cache_output(request, kind, buffer, title, control)
            .await
        {
            warn!(unit = %window, error = %err, "unable to cache output");
        }
    }

    fn context(&self, request: &RenderRequest, offered_etag: Option<String>) -> UnitContext {
        UnitContext::new(Arc::new(request.clone()), CancellationToken::new())
            .with_offered_etag(offered_etag)
    }

    fn observe(&self, window: &WindowId, phase: RenderPhase, elapsed: Duration) {
        self.observer.on_phase(window, phase, elapsed);
    }
}

fn window_of(request: &RenderRequest) -> &WindowId {
    &request.window.window_id
}

/// Fold unit hints into `control`. Fresh output without a unit validator
/// drops the previous entry's, so the stored entry is keyed by its own hash.
fn apply_hints(mut control: CacheControl, hints: &UnitHints) -> CacheControl {
    if hints.etag.is_some() || !hints.use_cached_content {
        control.etag = hints.etag.clone();
    }
    if let Some(expiration) = hints.expiration_seconds {
        control.expiration_seconds = expiration;
    }
    control.use_cached_content = hints.use_cached_content;
    control
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_hints_override_control() {
        let control = CacheControl::new(false, 300).with_etag("old");
        let hints = UnitHints {
            etag: Some("new".into()),
            expiration_seconds: Some(0),
            use_cached_content: true,
            ..Default::default()
        };
        let updated = apply_hints(control, &hints);
        assert_eq!(updated.etag.as_deref(), Some("new"));
        assert!(!updated.should_cache());
        assert!(updated.use_cached_content);
    }

    #[test]
    fn test_fresh_output_drops_previous_validator() {
        let control = CacheControl::new(true, 60).with_etag("v1");
        let updated = apply_hints(control.clone(), &UnitHints::default());
        assert_eq!(updated.etag, None);
        assert_eq!(updated.expiration_seconds, 60);
        assert!(updated.public_scope);
    }

    #[test]
    fn test_cached_content_keeps_previous_validator() {
        let control = CacheControl::new(true, 60).with_etag("v1");
        let hints = UnitHints {
            use_cached_content: true,
            ..Default::default()
        };
        let updated = apply_hints(control, &hints);
        assert_eq!(updated.etag.as_deref(), Some("v1"));
    }
}
