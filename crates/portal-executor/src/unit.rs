//! Unit capabilities and the context handed to unit logic.

use std::sync::Arc;

use async_trait::async_trait;
use parking_lot::Mutex;
use portal_cache::UnitCacheKey;
use portal_core::{RenderRequest, UnitError, WindowId};
use portal_streaming::OutputSink;
use tokio_util::sync::{CancellationToken, WaitForCancellationFuture};

/// Values unit logic publishes while it runs.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct UnitHints {
    /// Dynamic title.
    pub title: Option<String>,
    /// Validator for the produced output.
    pub etag: Option<String>,
    /// Unit decided the cached output is still current.
    pub use_cached_content: bool,
    /// Override of the declared freshness window.
    pub expiration_seconds: Option<i32>,
    /// Link to the unit's full view.
    pub link: Option<String>,
    /// Count of new items shown by the unit.
    pub new_item_count: Option<u32>,
}

/// Explicit request context passed into unit logic.
///
/// Built before dispatch and moved into the worker task; unit logic should
/// poll `is_cancelled` or await `cancelled` at safe points.
pub struct UnitContext {
    request: Arc<RenderRequest>,
    cancel: CancellationToken,
    offered_etag: Option<String>,
    hints: Mutex<UnitHints>,
}

impl UnitContext {
    /// Create a context for a request.
    pub fn new(request: Arc<RenderRequest>, cancel: CancellationToken) -> Self {
        Self {
            request,
            cancel,
            offered_etag: None,
            hints: Mutex::new(UnitHints::default()),
        }
    }

    /// Offer the validator of a previously cached output.
    pub fn with_offered_etag(mut self, etag: Option<String>) -> Self {
        self.offered_etag = etag;
        self
    }

    /// The request being served.
    pub fn request(&self) -> &RenderRequest {
        &self.request
    }

    /// Shared handle to the request.
    pub fn request_arc(&self) -> Arc<RenderRequest> {
        Arc::clone(&self.request)
    }

    /// Window being rendered.
    pub fn window_id(&self) -> &WindowId {
        &self.request.window.window_id
    }

    /// Validator of the cached output, if one exists.
    pub fn offered_etag(&self) -> Option<&str> {
        self.offered_etag.as_deref()
    }

    /// Whether the caller gave up on this render.
    pub fn is_cancelled(&self) -> bool {
        self.cancel.is_cancelled()
    }

    /// Resolves once the caller gives up on this render.
    pub fn cancelled(&self) -> WaitForCancellationFuture<'_> {
        self.cancel.cancelled()
    }

    /// Fail with `UnitError::Cancelled` if the render was abandoned.
    pub fn check_cancelled(&self) -> Result<(), UnitError> {
        if self.is_cancelled() {
            Err(UnitError::Cancelled)
        } else {
            Ok(())
        }
    }

    /// Publish a dynamic title.
    pub fn set_title(&self, title: impl Into<String>) {
        self.hints.lock().title = Some(title.into());
    }

    /// Publish a validator for the produced output.
    pub fn set_etag(&self, etag: impl Into<String>) {
        self.hints.lock().etag = Some(etag.into());
    }

    /// Ask for the cached output to be replayed instead of this render.
    pub fn use_cached_content(&self) {
        self.hints.lock().use_cached_content = true;
    }

    /// Override the freshness window for this output.
    pub fn set_expiration(&self, seconds: i32) {
        self.hints.lock().expiration_seconds = Some(seconds);
    }

    /// Publish a link to the unit's full view.
    pub fn set_link(&self, link: impl Into<String>) {
        self.hints.lock().link = Some(link.into());
    }

    /// Publish a count of new items.
    pub fn set_new_item_count(&self, count: u32) {
        self.hints.lock().new_item_count = Some(count);
    }

    /// Snapshot of published hints.
    pub fn hints(&self) -> UnitHints {
        self.hints.lock().clone()
    }
}

/// Unit producing structured markup.
#[async_trait]
pub trait MarkupUnit: Send + Sync {
    /// Consume request parameters before output starts.
    async fn prepare(&self, _ctx: &UnitContext) -> Result<(), UnitError> {
        Ok(())
    }

    /// Write markup events into `out`.
    async fn render(&self, ctx: &UnitContext, out: &mut dyn OutputSink) -> Result<(), UnitError>;
}

/// Unit producing character output.
#[async_trait]
pub trait CharacterUnit: Send + Sync {
    /// Consume request parameters before output starts.
    async fn prepare(&self, _ctx: &UnitContext) -> Result<(), UnitError> {
        Ok(())
    }

    /// Produce the unit's characters.
    async fn render_characters(&self, ctx: &UnitContext) -> Result<String, UnitError>;
}

/// Unit that handles actions, events and resource requests itself.
#[async_trait]
pub trait DirectResponseUnit: Send + Sync {
    /// Handle a state-changing action.
    async fn process_action(&self, ctx: &UnitContext) -> Result<(), UnitError>;

    /// Handle an event addressed to the unit.
    async fn process_event(&self, _ctx: &UnitContext) -> Result<(), UnitError> {
        Ok(())
    }

    /// Consume request parameters before output starts.
    async fn prepare(&self, _ctx: &UnitContext) -> Result<(), UnitError> {
        Ok(())
    }

    /// Write markup into `out`.
    async fn render(&self, ctx: &UnitContext, out: &mut dyn OutputSink) -> Result<(), UnitError>;

    /// Write a resource response (bytes, content type, headers) into `out`.
    async fn serve_resource(
        &self,
        _ctx: &UnitContext,
        _out: &mut dyn OutputSink,
    ) -> Result<(), UnitError> {
        Err(UnitError::Unsupported("resource".to_string()))
    }
}

/// Unit whose output may be replayed from the legacy caches.
pub trait Cacheable: Send + Sync {
    /// Key for the current request, or `None` to skip caching.
    fn generate_key(&self, ctx: &UnitContext) -> Option<UnitCacheKey>;

    /// Whether an entry stored with `validity` may still be replayed.
    fn is_cache_valid(&self, ctx: &UnitContext, validity: Option<&str>) -> bool;
}

/// Output side of a cacheable unit.
#[derive(Clone)]
pub enum CacheableOutput {
    Markup(Arc<dyn MarkupUnit>),
    Character(Arc<dyn CharacterUnit>),
}

/// A renderable unit, by capability.
#[derive(Clone)]
pub enum Unit {
    Markup(Arc<dyn MarkupUnit>),
    Character(Arc<dyn CharacterUnit>),
    DirectResponse(Arc<dyn DirectResponseUnit>),
    Cacheable {
        output: CacheableOutput,
        cache: Arc<dyn Cacheable>,
    },
}

impl Unit {
    /// Wrap a markup unit.
    pub fn markup(unit: impl MarkupUnit + 'static) -> Self {
        Self::Markup(Arc::new(unit))
    }

    /// Wrap a character unit.
    pub fn character(unit: impl CharacterUnit + 'static) -> Self {
        Self::Character(Arc::new(unit))
    }

    /// Wrap a direct-response unit.
    pub fn direct(unit: impl DirectResponseUnit + 'static) -> Self {
        Self::DirectResponse(Arc::new(unit))
    }

    /// Wrap a unit that is both markup-producing and cacheable.
    pub fn cacheable_markup<U>(unit: U) -> Self
    where
        U: MarkupUnit + Cacheable + 'static,
    {
        let unit = Arc::new(unit);
        Self::Cacheable {
            output: CacheableOutput::Markup(unit.clone()),
            cache: unit,
        }
    }

    /// Wrap a unit that is both character-producing and cacheable.
    pub fn cacheable_characters<U>(unit: U) -> Self
    where
        U: CharacterUnit + Cacheable + 'static,
    {
        let unit = Arc::new(unit);
        Self::Cacheable {
            output: CacheableOutput::Character(unit.clone()),
            cache: unit,
        }
    }

    /// Capability name for logs.
    pub fn kind(&self) -> &'static str {
        match self {
            Self::Markup(_) => "markup",
            Self::Character(_) => "character",
            Self::DirectResponse(_) => "direct",
            Self::Cacheable { .. } => "cacheable",
        }
    }

    /// Cache capability, if any.
    pub fn cacheable(&self) -> Option<&Arc<dyn Cacheable>> {
        match self {
            Self::Cacheable { cache, .. } => Some(cache),
            _ => None,
        }
    }

    /// Consume request parameters.
    pub(crate) async fn prepare(&self, ctx: &UnitContext) -> Result<(), UnitError> {
        match self {
            Self::Markup(unit) => unit.prepare(ctx).await,
            Self::Character(unit) => unit.prepare(ctx).await,
            Self::DirectResponse(unit) => unit.prepare(ctx).await,
            Self::Cacheable { output, .. } => match output {
                CacheableOutput::Markup(unit) => unit.prepare(ctx).await,
                CacheableOutput::Character(unit) => unit.prepare(ctx).await,
            },
        }
    }

    /// Render into `out`. Character units write their characters.
    pub(crate) async fn render(
        &self,
        ctx: &UnitContext,
        out: &mut dyn OutputSink,
    ) -> Result<(), UnitError> {
        match self {
            Self::Markup(unit) => unit.render(ctx, out).await,
            Self::Character(unit) => write_characters(unit.as_ref(), ctx, out).await,
            Self::DirectResponse(unit) => unit.render(ctx, out).await,
            Self::Cacheable { output, .. } => match output {
                CacheableOutput::Markup(unit) => unit.render(ctx, out).await,
                CacheableOutput::Character(unit) => write_characters(unit.as_ref(), ctx, out).await,
            },
        }
    }

    /// Whether this unit produces character output.
    pub fn is_character(&self) -> bool {
        matches!(
            self,
            Self::Character(_)
                | Self::Cacheable {
                    output: CacheableOutput::Character(_),
                    ..
                }
        )
    }
}

async fn write_characters(
    unit: &dyn CharacterUnit,
    ctx: &UnitContext,
    out: &mut dyn OutputSink,
) -> Result<(), UnitError> {
    let chars = unit.render_characters(ctx).await?;
    out.characters(&chars)
        .map_err(|e| UnitError::with_source("failed to write unit characters", e))
}
