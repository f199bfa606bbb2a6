//! Asynchronous unit rendering with per-unit timeouts.

use std::collections::HashSet;
use std::sync::Arc;
use std::time::{Duration, Instant};

use parking_lot::Mutex;
use portal_cache::{CacheStore, InMemoryStore};
use portal_core::{
    NoopObserver, PortalConfig, RenderObserver, RenderPhase, RenderRequest, RendererConfig,
    RequestId, RequestType, UnitError, UnitRegistry, WindowId,
};
use portal_streaming::OutputSink;
use tokio::task::JoinHandle;
use tokio_util::sync::CancellationToken;
use tracing::{debug, debug_span, warn, Instrument};

use crate::error::RenderError;
use crate::group::{GroupWait, RenderingGroup};
use crate::pool::{PoolStats, WorkerPool};
use crate::unit::{Unit, UnitContext};
use crate::worker::{UnitCaches, UnitWorker, WorkerState};

/// Final status of one render.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum RenderStatus {
    Successful,
    Failed,
    TimedOut,
}

impl std::fmt::Display for RenderStatus {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::Successful => write!(f, "successful"),
            Self::Failed => write!(f, "failed"),
            Self::TimedOut => write!(f, "timed_out"),
        }
    }
}

/// Details of a successful render.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct RenderSummary {
    pub title: Option<String>,
    pub from_cache: bool,
    pub render_time: Option<Duration>,
}

/// Result of rendering a unit straight into a sink.
#[derive(Debug)]
pub enum RenderOutcome {
    Successful(RenderSummary),
    Failed(RenderError),
    TimedOut,
}

impl RenderOutcome {
    /// Status without details.
    pub fn status(&self) -> RenderStatus {
        match self {
            Self::Successful(_) => RenderStatus::Successful,
            Self::Failed(_) => RenderStatus::Failed,
            Self::TimedOut => RenderStatus::TimedOut,
        }
    }
}

type InFlight = Arc<Mutex<HashSet<(RequestId, WindowId)>>>;

/// Removes a dispatch from the in-flight set when the worker is dropped.
struct InFlightGuard {
    set: InFlight,
    key: (RequestId, WindowId),
}

impl Drop for InFlightGuard {
    fn drop(&mut self) {
        self.set.lock().remove(&self.key);
    }
}

/// Dispatches units to the worker pool and hands back completion handles.
pub struct Renderer {
    pool: WorkerPool,
    caches: UnitCaches,
    registry: Arc<dyn UnitRegistry>,
    settings: RendererConfig,
    observer: Arc<dyn RenderObserver>,
    in_flight: InFlight,
}

impl Renderer {
    /// Create a renderer with in-memory unit caches sized from `config`.
    pub fn new(config: &PortalConfig, registry: Arc<dyn UnitRegistry>) -> Self {
        let caches = UnitCaches {
            system: Arc::new(InMemoryStore::new(
                "unit-system",
                config.cache.public_ttl_secs,
                config.cache.max_entries,
            )),
            instance: Arc::new(InMemoryStore::new(
                "unit-instance",
                config.cache.private_ttl_secs,
                config.cache.max_entries,
            )),
            enabled: config.renderer.cache_units,
            character_cacheable: config.renderer.character_cacheable,
            size_threshold: config.cache.size_threshold,
        };
        Self {
            pool: WorkerPool::new(config.renderer.pool_size),
            caches,
            registry,
            settings: config.renderer.clone(),
            observer: Arc::new(NoopObserver),
            in_flight: Arc::new(Mutex::new(HashSet::new())),
        }
    }

    /// Report lifecycle phases to `observer`.
    pub fn with_observer(mut self, observer: Arc<dyn RenderObserver>) -> Self {
        self.observer = observer;
        self
    }

    /// Replace the system and instance unit caches.
    pub fn with_unit_stores(
        mut self,
        system: Arc<dyn CacheStore>,
        instance: Arc<dyn CacheStore>,
    ) -> Self {
        self.caches.system = system;
        self.caches.instance = instance;
        self
    }

    /// Renderer settings in effect.
    pub fn settings(&self) -> &RendererConfig {
        &self.settings
    }

    /// Worker pool occupancy.
    pub fn pool_stats(&self) -> PoolStats {
        self.pool.stats()
    }

    /// Timeout for a window: registry value, else the renderer default,
    /// clamped to the request deadline.
    pub fn timeout_for(&self, request: &RenderRequest) -> Duration {
        let default_ms = self.settings.default_timeout_ms;
        let millis = self
            .registry
            .unit_config(&request.window.window_id)
            .map(|config| config.effective_timeout_millis(default_ms))
            .unwrap_or(default_ms);
        request.effective_timeout(Duration::from_millis(millis))
    }

    /// Dispatch a unit without a rendering group.
    pub fn start_rendering(
        &self,
        unit: Unit,
        request: RenderRequest,
    ) -> Result<RenderHandle, RenderError> {
        self.dispatch(unit, request, None)
    }

    /// Dispatch a unit as a member of `group`.
    pub fn start_group_rendering(
        &self,
        unit: Unit,
        request: RenderRequest,
        group: &RenderingGroup,
    ) -> Result<RenderHandle, RenderError> {
        self.dispatch(unit, request, Some(group.clone()))
    }

    fn dispatch(
        &self,
        unit: Unit,
        request: RenderRequest,
        group: Option<RenderingGroup>,
    ) -> Result<RenderHandle, RenderError> {
        let window = request.window.window_id.clone();
        let key = (request.request_id.clone(), window.clone());
        if !self.in_flight.lock().insert(key.clone()) {
            return Err(RenderError::Orchestration(format!(
                "unit {} already dispatched for request {}",
                window, request.request_id
            )));
        }
        let guard = InFlightGuard {
            set: Arc::clone(&self.in_flight),
            key,
        };

        let timeout = self.timeout_for(&request);
        let started = Instant::now();
        let request_type = request.request_type;
        let cancel = CancellationToken::new();
        let state = WorkerState::new(window.clone());
        let request = Arc::new(request);

        let span = debug_span!(
            "unit_worker",
            unit = %window,
            kind = unit.kind(),
            request = %request.request_id,
            request_type = %request_type,
        );
        let worker = UnitWorker {
            state: Arc::clone(&state),
            unit,
            ctx: UnitContext::new(Arc::clone(&request), cancel.clone()),
            group: group.clone(),
            caches: self.caches.clone(),
            deadline: started + timeout,
            observer: Arc::clone(&self.observer),
            started,
        };

        self.observer
            .on_phase(&window, RenderPhase::Dispatched, Duration::ZERO);
        debug!(unit = %window, timeout_ms = timeout.as_millis() as u64, "dispatching unit");

        let task = self.pool.spawn(
            async move {
                let _guard = guard;
                worker.run().await;
            }
            .instrument(span),
        );

        Ok(RenderHandle {
            window,
            request,
            request_type,
            state,
            task: Some(task),
            cancel,
            group,
            started,
            timeout,
            status: None,
            caches: self.caches.clone(),
            observer: Arc::clone(&self.observer),
        })
    }

    /// Render a unit and write its output into `sink`.
    ///
    /// Unit failures and timeouts are outcomes; only engine errors are `Err`.
    pub async fn render(
        &self,
        unit: Unit,
        request: RenderRequest,
        sink: &mut dyn OutputSink,
    ) -> Result<RenderOutcome, RenderError> {
        let mut handle = self.start_rendering(unit, request)?;
        match handle.output(sink).await {
            Ok(RenderStatus::Successful) => Ok(RenderOutcome::Successful(handle.summary())),
            Ok(RenderStatus::TimedOut) => Ok(RenderOutcome::TimedOut),
            Ok(RenderStatus::Failed) => Ok(RenderOutcome::Failed(RenderError::BufferMissing {
                unit: handle.window.clone(),
            })),
            Err(err) if err.is_unit_failure() => Ok(RenderOutcome::Failed(err)),
            Err(err) => Err(err),
        }
    }

    /// Drop cached output of a cacheable unit for this request.
    pub async fn purge(&self, unit: &Unit, request: RenderRequest) -> bool {
        let Some(cacheable) = unit.cacheable() else {
            return false;
        };
        let ctx = UnitContext::new(Arc::new(request), CancellationToken::new());
        match cacheable.generate_key(&ctx) {
            Some(key) => self.caches.evict(ctx.request(), &key).await.unwrap_or(false),
            None => false,
        }
    }
}

/// Completion handle for one dispatched unit.
///
/// Dropping an unfinished handle cancels the unit without blocking.
pub struct RenderHandle {
    window: WindowId,
    request: Arc<RenderRequest>,
    request_type: RequestType,
    state: Arc<WorkerState>,
    task: Option<JoinHandle<()>>,
    cancel: CancellationToken,
    group: Option<RenderingGroup>,
    started: Instant,
    timeout: Duration,
    status: Option<RenderStatus>,
    caches: UnitCaches,
    observer: Arc<dyn RenderObserver>,
}

impl RenderHandle {
    /// Window being rendered.
    pub fn window_id(&self) -> &WindowId {
        &self.window
    }

    /// Configured timeout.
    pub fn timeout(&self) -> Duration {
        self.timeout
    }

    /// Whether the worker has finished.
    pub fn is_done(&self) -> bool {
        self.state.is_done()
    }

    /// Wait for the unit, bounded by its timeout.
    ///
    /// Returns the unit's error the first time a failure is observed; later
    /// calls report `Failed`. Timed-out units are cancelled.
    pub async fn complete(&mut self) -> Result<RenderStatus, RenderError> {
        if let Some(status) = self.status {
            return Ok(status);
        }
        let span = debug_span!("render_unit", unit = %self.window);
        let result = self.await_worker().instrument(span).await;
        self.status = Some(match &result {
            Ok(status) => *status,
            Err(_) => RenderStatus::Failed,
        });
        result
    }

    async fn await_worker(&mut self) -> Result<RenderStatus, RenderError> {
        let mut deadline = self.started + self.timeout;

        if let Some(group) = self.group.clone() {
            if !self.wait_prepared(deadline).await {
                return Ok(self.abandon("unit did not consume parameters in time"));
            }
            if group.wait_released(Instant::now() + self.timeout).await == GroupWait::TimedOut {
                return Ok(self.abandon("rendering group did not release in time"));
            }
            deadline = Instant::now() + self.timeout;
        }

        let Some(task) = self.task.as_mut() else {
            return self.status_from_report();
        };

        match tokio::time::timeout_at(tokio::time::Instant::from_std(deadline), task).await {
            Err(_) => Ok(self.abandon("unit exceeded its timeout")),
            Ok(joined) => {
                self.task = None;
                match joined {
                    Ok(()) => self.status_from_report(),
                    Err(err) if err.is_panic() => {
                        self.observe(RenderPhase::Failed("panic".to_string()));
                        Err(RenderError::unit_failed(
                            &self.window,
                            UnitError::failed("unit logic panicked"),
                        ))
                    }
                    Err(_) => Ok(RenderStatus::TimedOut),
                }
            }
        }
    }

    async fn wait_prepared(&self, deadline: Instant) -> bool {
        let mut prepared = self.state.prepared.subscribe();
        let wait = async move { prepared.wait_for(|p| *p).await.map(|_| ()) };
        tokio::time::timeout_at(tokio::time::Instant::from_std(deadline), wait)
            .await
            .is_ok()
    }

    fn abandon(&mut self, reason: &str) -> RenderStatus {
        warn!(unit = %self.window, timeout_ms = self.timeout.as_millis() as u64, "{}", reason);
        self.cancel.cancel();
        if let Some(task) = self.task.take() {
            task.abort();
        }
        self.observe(RenderPhase::TimedOut);
        RenderStatus::TimedOut
    }

    fn status_from_report(&self) -> Result<RenderStatus, RenderError> {
        let no_output = matches!(self.request_type, RequestType::Action | RequestType::Event);
        let (status, error) = {
            let mut report = self.state.report.lock();
            if report.timed_out {
                (RenderStatus::TimedOut, None)
            } else if report.successful && (no_output || report.buffer.is_some()) {
                (RenderStatus::Successful, None)
            } else {
                (RenderStatus::Failed, report.error.take())
            }
        };

        match status {
            RenderStatus::Successful => self.observe(RenderPhase::Completed),
            RenderStatus::TimedOut => self.observe(RenderPhase::TimedOut),
            RenderStatus::Failed => {
                let reason = error
                    .as_ref()
                    .map(|e| e.to_string())
                    .unwrap_or_else(|| "no output".to_string());
                self.observe(RenderPhase::Failed(reason));
            }
        }

        match error {
            Some(err) => Err(err),
            None => Ok(status),
        }
    }

    /// Wait for the unit and replay its output into `sink` on success.
    pub async fn output(&mut self, sink: &mut dyn OutputSink) -> Result<RenderStatus, RenderError> {
        let status = self.complete().await?;
        if status != RenderStatus::Successful
            || matches!(self.request_type, RequestType::Action | RequestType::Event)
        {
            return Ok(status);
        }

        let report = self.state.report.lock();
        let buffer = report.buffer.as_ref().ok_or_else(|| RenderError::BufferMissing {
            unit: self.window.clone(),
        })?;
        buffer.replay(sink)?;
        Ok(status)
    }

    /// Dynamic title, or `None` when the unit did not succeed.
    pub async fn title(&mut self) -> Option<String> {
        match self.complete().await {
            Ok(RenderStatus::Successful) => self.state.report.lock().title.clone(),
            Ok(_) => None,
            Err(err) => {
                warn!(unit = %self.window, error = %err, "unable to obtain unit title");
                None
            }
        }
    }

    /// Store character output under the unit's cache key.
    ///
    /// Returns false when nothing was stored: no key, caching switched off
    /// or output over the size threshold.
    pub async fn set_character_cache(&self, chars: impl Into<String>) -> bool {
        let (key, title) = {
            let report = self.state.report.lock();
            (report.cache_key.clone(), report.title.clone())
        };
        let Some(key) = key else {
            return false;
        };
        let payload = portal_streaming::OutputBuffer::from_characters(chars);
        if !self.caches.admits(payload.len()) {
            debug!(unit = %self.window, len = payload.len(), "character output not cached");
            return false;
        }
        match self.caches.admit(&self.request, &key, payload, title).await {
            Ok(()) => true,
            Err(err) => {
                warn!(unit = %self.window, error = %err, "character output not cached");
                false
            }
        }
    }

    /// Rendered output as text, if any.
    pub fn output_text(&self) -> Option<String> {
        self.state.report.lock().buffer.as_ref().map(|b| b.to_text())
    }

    /// Whether the output was replayed from a unit cache.
    pub fn is_rendered_from_cache(&self) -> bool {
        self.state.report.lock().from_cache
    }

    /// Time the unit spent rendering, if it rendered.
    pub fn render_time(&self) -> Option<Duration> {
        self.state.report.lock().render_time
    }

    /// Summary of a finished render.
    pub fn summary(&self) -> RenderSummary {
        let report = self.state.report.lock();
        RenderSummary {
            title: report.title.clone(),
            from_cache: report.from_cache,
            render_time: report.render_time,
        }
    }

    /// Abandon the render.
    pub fn cancel(&mut self) {
        if self.status.is_none() {
            self.abandon("render cancelled by caller");
            self.status = Some(RenderStatus::TimedOut);
        }
    }

    fn observe(&self, phase: RenderPhase) {
        self.observer
            .on_phase(&self.window, phase, self.started.elapsed());
    }
}

impl Drop for RenderHandle {
    fn drop(&mut self) {
        if let Some(task) = self.task.take() {
            if !task.is_finished() {
                self.cancel.cancel();
                task.abort();
            }
        }
    }
}
