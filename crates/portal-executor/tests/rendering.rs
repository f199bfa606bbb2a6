use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Arc;
use std::time::{Duration, Instant};

use async_trait::async_trait;
use chrono::Utc;
use futures::channel::mpsc;
use futures::StreamExt;
use http::StatusCode;
use portal_cache::{
    CacheControlService, CacheEntry, CacheKey, CacheStore, InMemoryStore, OutputKind,
    RequestCacheState, ScopedStores, UnitCacheKey,
};
use portal_core::{
    CacheConfig, CacheScope, InMemoryRegistry, PortalConfig, RenderRequest, RequestType,
    TimingContext, UnitConfig, UnitError, UnitWindow, IF_NONE_MATCH,
};
use portal_executor::{
    Cacheable, CharacterUnit, DirectResponseUnit, FallbackConfig, FallbackStrategy, MarkupUnit,
    PageRenderer, PageUnit, PortletRenderer, RenderError, RenderOutcome, RenderStatus, Renderer,
    Unit, UnitContext,
};
use portal_streaming::{
    ByteSink, MarkupEvent, OutputBuffer, OutputSink, StreamingSink, StringSink,
};

fn write_err(e: portal_streaming::StreamError) -> UnitError {
    UnitError::with_source("write failed", e)
}

/// Markup unit that counts renders and optionally sleeps.
struct Feed {
    renders: Arc<AtomicUsize>,
    body: String,
    delay: Duration,
}

impl Feed {
    fn new(body: &str) -> (Self, Arc<AtomicUsize>) {
        let renders = Arc::new(AtomicUsize::new(0));
        let unit = Self {
            renders: renders.clone(),
            body: body.to_string(),
            delay: Duration::ZERO,
        };
        (unit, renders)
    }

    fn with_delay(mut self, delay: Duration) -> Self {
        self.delay = delay;
        self
    }
}

#[async_trait]
impl MarkupUnit for Feed {
    async fn render(&self, ctx: &UnitContext, out: &mut dyn OutputSink) -> Result<(), UnitError> {
        self.renders.fetch_add(1, Ordering::SeqCst);
        if !self.delay.is_zero() {
            tokio::time::sleep(self.delay).await;
        }
        ctx.set_title("Feed");
        out.markup(&MarkupEvent::start("div")).map_err(write_err)?;
        out.characters(&self.body).map_err(write_err)?;
        out.markup(&MarkupEvent::end("div")).map_err(write_err)
    }
}

struct Sleeper;

#[async_trait]
impl CharacterUnit for Sleeper {
    async fn render_characters(&self, _ctx: &UnitContext) -> Result<String, UnitError> {
        tokio::time::sleep(Duration::from_secs(2)).await;
        Ok("too late".to_string())
    }
}

struct Failing;

#[async_trait]
impl CharacterUnit for Failing {
    async fn render_characters(&self, _ctx: &UnitContext) -> Result<String, UnitError> {
        Err(UnitError::failed("secret connection string"))
    }
}

/// Resource unit with a fixed validator.
struct Image {
    serves: Arc<AtomicUsize>,
    actions: Arc<AtomicUsize>,
}

#[async_trait]
impl DirectResponseUnit for Image {
    async fn process_action(&self, _ctx: &UnitContext) -> Result<(), UnitError> {
        self.actions.fetch_add(1, Ordering::SeqCst);
        Ok(())
    }

    async fn render(&self, _ctx: &UnitContext, out: &mut dyn OutputSink) -> Result<(), UnitError> {
        out.characters("<img/>").map_err(write_err)
    }

    async fn serve_resource(&self, ctx: &UnitContext, out: &mut dyn OutputSink) -> Result<(), UnitError> {
        self.serves.fetch_add(1, Ordering::SeqCst);
        ctx.set_etag("img-v1");
        out.set_content_type("image/png");
        out.bytes(&[0x89, 0x50, 0x4e, 0x47]).map_err(write_err)
    }
}

/// Unit that always asks for its cached content.
struct Unchanged {
    write_first: bool,
}

#[async_trait]
impl MarkupUnit for Unchanged {
    async fn render(&self, ctx: &UnitContext, out: &mut dyn OutputSink) -> Result<(), UnitError> {
        if ctx.offered_etag().is_some() {
            if self.write_first {
                out.characters("partial").map_err(write_err)?;
            }
            ctx.use_cached_content();
            return Ok(());
        }
        out.characters("original").map_err(write_err)
    }
}

/// Cacheable character unit keyed in the system scope.
struct Quote {
    renders: Arc<AtomicUsize>,
    validity: &'static str,
}

#[async_trait]
impl CharacterUnit for Quote {
    async fn render_characters(&self, ctx: &UnitContext) -> Result<String, UnitError> {
        self.renders.fetch_add(1, Ordering::SeqCst);
        ctx.set_title("Quote of the day");
        Ok("carpe diem".to_string())
    }
}

impl Cacheable for Quote {
    fn generate_key(&self, _ctx: &UnitContext) -> Option<UnitCacheKey> {
        Some(UnitCacheKey::system("quote").with_validity(self.validity))
    }

    fn is_cache_valid(&self, _ctx: &UnitContext, validity: Option<&str>) -> bool {
        validity == Some(self.validity)
    }
}

fn window() -> UnitWindow {
    UnitWindow::new("w1", "e1", "d1")
}

fn registry_with(config: UnitConfig) -> Arc<InMemoryRegistry> {
    let registry = InMemoryRegistry::new();
    registry.register("w1", config);
    Arc::new(registry)
}

fn portlet_renderer(config: UnitConfig) -> PortletRenderer {
    let service = CacheControlService::new(registry_with(config), &CacheConfig::default());
    PortletRenderer::new(Arc::new(service))
}

async fn render_markup(
    renderer: &PortletRenderer,
    unit: &Unit,
    request: &RenderRequest,
) -> Result<(portal_executor::RenderResult, String), RenderError> {
    let mut sink = StringSink::new();
    let result = renderer
        .do_render_markup(unit, request, &RequestCacheState::new(), &mut sink)
        .await?;
    Ok((result, sink.into_string()))
}

#[tokio::test]
async fn test_private_output_is_never_served_to_another_session() {
    let renderer = portlet_renderer(
        UnitConfig::new(1000)
            .with_scope(CacheScope::Private)
            .with_expiration(300),
    );
    let (feed, renders) = Feed::new("for A only");
    let unit = Unit::markup(feed);

    let a = RenderRequest::render(window()).with_session("A");
    let b = RenderRequest::render(window()).with_session("B");

    let (first, _) = render_markup(&renderer, &unit, &a).await.unwrap();
    let (second, _) = render_markup(&renderer, &unit, &b).await.unwrap();
    assert!(!first.from_cache);
    assert!(!second.from_cache);
    assert_eq!(renders.load(Ordering::SeqCst), 2);

    let (again, body) = render_markup(&renderer, &unit, &a).await.unwrap();
    assert!(again.from_cache);
    assert_eq!(body, "<div>for A only</div>");
}

#[tokio::test]
async fn test_replay_is_identical_to_first_render() {
    let renderer = portlet_renderer(
        UnitConfig::new(1000)
            .with_scope(CacheScope::Public)
            .with_expiration(60),
    );
    let (feed, renders) = Feed::new("headlines");
    let unit = Unit::markup(feed);
    let request = RenderRequest::render(window());

    let (first, first_body) = render_markup(&renderer, &unit, &request).await.unwrap();
    let (second, second_body) = render_markup(&renderer, &unit, &request).await.unwrap();
    let (_, third_body) = render_markup(&renderer, &unit, &request).await.unwrap();

    assert!(!first.from_cache);
    assert!(second.from_cache);
    assert_eq!(second.title.as_deref(), Some("Feed"));
    assert_eq!(first_body, second_body);
    assert_eq!(second_body, third_body);
    assert_eq!(renders.load(Ordering::SeqCst), 1);
}

#[tokio::test]
async fn test_zero_expiration_never_caches() {
    let renderer = portlet_renderer(UnitConfig::new(1000).with_expiration(0));
    let (feed, renders) = Feed::new("live");
    let unit = Unit::markup(feed);
    let request = RenderRequest::render(window()).with_session("A");

    render_markup(&renderer, &unit, &request).await.unwrap();
    let (second, _) = render_markup(&renderer, &unit, &request).await.unwrap();
    assert!(!second.from_cache);
    assert_eq!(renders.load(Ordering::SeqCst), 2);
}

#[tokio::test]
async fn test_timeout_returns_promptly() {
    let config = PortalConfig::default();
    let renderer = Renderer::new(&config, registry_with(UnitConfig::new(100)));
    let started = Instant::now();

    let mut sink = StringSink::new();
    let outcome = renderer
        .render(Unit::character(Sleeper), RenderRequest::render(window()), &mut sink)
        .await
        .unwrap();

    assert!(matches!(outcome, RenderOutcome::TimedOut));
    assert!(started.elapsed() < Duration::from_secs(1));
    assert!(sink.as_str().is_empty());
}

#[tokio::test]
async fn test_concrete_private_render_within_timeout() {
    let config = PortalConfig::default();
    let registry = registry_with(
        UnitConfig::new(1000)
            .with_scope(CacheScope::Private)
            .with_expiration(300),
    );
    let renderer = Renderer::new(&config, registry.clone());
    let (feed, _) = Feed::new("dashboard");
    let unit = Unit::markup(feed.with_delay(Duration::from_millis(50)));
    let request = RenderRequest::render(window()).with_session("S");

    let mut handle = renderer.start_rendering(unit.clone(), request.clone()).unwrap();
    assert_eq!(handle.complete().await.unwrap(), RenderStatus::Successful);
    assert_eq!(handle.title().await.as_deref(), Some("Feed"));
    assert!(!handle.is_rendered_from_cache());
    assert!(handle.render_time().unwrap() >= Duration::from_millis(50));

    let mut sink = StringSink::new();
    handle.output(&mut sink).await.unwrap();
    assert_eq!(sink.as_str(), "<div>dashboard</div>");

    let service = CacheControlService::new(registry, &config.cache);
    let portlet = PortletRenderer::new(Arc::new(service));
    let (first, _) = render_markup(&portlet, &unit, &request).await.unwrap();
    let (second, _) = render_markup(&portlet, &unit, &request).await.unwrap();
    assert!(!first.from_cache);
    assert!(second.from_cache);
}

#[tokio::test]
async fn test_output_over_threshold_is_delivered_but_not_cached() {
    let service = CacheControlService::new(
        registry_with(
            UnitConfig::new(1000)
                .with_scope(CacheScope::Public)
                .with_expiration(300),
        ),
        &CacheConfig::default(),
    )
    .with_size_threshold(8);
    let renderer = PortletRenderer::new(Arc::new(service));
    let (feed, renders) = Feed::new("this body is larger than eight bytes");
    let unit = Unit::markup(feed);
    let request = RenderRequest::render(window());

    let (_, body) = render_markup(&renderer, &unit, &request).await.unwrap();
    assert_eq!(body, "<div>this body is larger than eight bytes</div>");
    assert_eq!(renderer.cache().stats().await.render_public, 0);

    let (second, _) = render_markup(&renderer, &unit, &request).await.unwrap();
    assert!(!second.from_cache);
    assert_eq!(renders.load(Ordering::SeqCst), 2);
}

#[tokio::test]
async fn test_matching_validator_short_circuits_resource() {
    let renderer = portlet_renderer(
        UnitConfig::new(1000)
            .with_scope(CacheScope::Public)
            .with_expiration(300),
    );
    let serves = Arc::new(AtomicUsize::new(0));
    let unit = Unit::direct(Image {
        serves: serves.clone(),
        actions: Arc::new(AtomicUsize::new(0)),
    });
    let request = RenderRequest::new(RequestType::Resource, window());

    let mut first = ByteSink::new();
    let result = renderer
        .do_serve_resource(&unit, &request, &RequestCacheState::new(), &mut first)
        .await
        .unwrap();
    assert_eq!(result.status, StatusCode::OK);
    assert_eq!(first.content_type(), Some("image/png"));

    let conditional = request.clone().with_header(IF_NONE_MATCH, "\"img-v1\"");
    let mut second = ByteSink::new();
    let result = renderer
        .do_serve_resource(&unit, &conditional, &RequestCacheState::new(), &mut second)
        .await
        .unwrap();
    assert_eq!(result.status, StatusCode::NOT_MODIFIED);
    assert!(result.not_modified);
    assert!(second.body().is_empty());
    assert_eq!(serves.load(Ordering::SeqCst), 1);

    let mut third = ByteSink::new();
    let result = renderer
        .do_serve_resource(&unit, &request, &RequestCacheState::new(), &mut third)
        .await
        .unwrap();
    assert!(result.from_cache);
    assert_eq!(third.body(), first.body());
    assert_eq!(third.header("ETag"), Some("\"img-v1\""));
    assert_eq!(third.header("Cache-Control"), Some("public, max-age=300"));
    assert!(third.header("Age").is_some());
    assert_eq!(third.content_type(), Some("image/png"));
}

#[tokio::test]
async fn test_action_purges_cached_output() {
    let renderer = portlet_renderer(
        UnitConfig::new(1000)
            .with_scope(CacheScope::Public)
            .with_expiration(300),
    );
    let serves = Arc::new(AtomicUsize::new(0));
    let actions = Arc::new(AtomicUsize::new(0));
    let unit = Unit::direct(Image {
        serves: serves.clone(),
        actions: actions.clone(),
    });
    let resource = RenderRequest::new(RequestType::Resource, window());

    renderer
        .do_serve_resource(&unit, &resource, &RequestCacheState::new(), &mut ByteSink::new())
        .await
        .unwrap();

    let action = RenderRequest::new(RequestType::Action, window());
    renderer
        .do_action(&unit, &action, &RequestCacheState::new())
        .await
        .unwrap();
    assert_eq!(actions.load(Ordering::SeqCst), 1);
    assert_eq!(renderer.cache().stats().await.resource_public, 0);

    renderer
        .do_serve_resource(&unit, &resource, &RequestCacheState::new(), &mut ByteSink::new())
        .await
        .unwrap();
    assert_eq!(serves.load(Ordering::SeqCst), 2);
}

#[tokio::test]
async fn test_action_on_markup_unit_is_rejected() {
    let renderer = portlet_renderer(UnitConfig::new(1000));
    let (feed, _) = Feed::new("x");
    let action = RenderRequest::new(RequestType::Action, window());
    let err = renderer
        .do_action(&Unit::markup(feed), &action, &RequestCacheState::new())
        .await
        .unwrap_err();
    assert!(matches!(err, RenderError::UnsupportedAction { .. }));
}

/// Renderer whose public store holds an entry past its freshness window.
async fn renderer_with_stale_entry(request: &RenderRequest) -> PortletRenderer {
    let store: Arc<dyn CacheStore> = Arc::new(InMemoryStore::new("render-public", 600, 100));
    let key = CacheKey::public(request, OutputKind::Render, &[]);
    let stale = CacheEntry::new(OutputBuffer::from_characters("original"))
        .with_etag("v1")
        .with_ttl(600)
        .with_expiration(10)
        .stored_at(Utc::now() - chrono::Duration::seconds(60));
    store.put(key, stale).await.unwrap();

    let service = CacheControlService::new(
        registry_with(
            UnitConfig::new(1000)
                .with_scope(CacheScope::Public)
                .with_expiration(10),
        ),
        &CacheConfig::default(),
    )
    .with_stores(
        OutputKind::Render,
        ScopedStores {
            private: Arc::new(InMemoryStore::new("render-private", 300, 100)),
            public: store,
        },
    );
    PortletRenderer::new(Arc::new(service))
}

#[tokio::test]
async fn test_use_cached_content_replays_stale_entry() {
    let request = RenderRequest::render(window());
    let renderer = renderer_with_stale_entry(&request).await;
    let unit = Unit::markup(Unchanged { write_first: false });

    let (result, body) = render_markup(&renderer, &unit, &request).await.unwrap();
    assert!(result.from_cache);
    assert_eq!(body, "original");
}

#[tokio::test]
async fn test_use_cached_content_after_writing_is_an_error() {
    let request = RenderRequest::render(window());
    let renderer = renderer_with_stale_entry(&request).await;
    let unit = Unit::markup(Unchanged { write_first: true });

    let err = render_markup(&renderer, &unit, &request).await.unwrap_err();
    assert!(matches!(err, RenderError::CachedContentConflict { .. }));
}

#[tokio::test]
async fn test_stale_entry_is_rerendered_without_hint() {
    let request = RenderRequest::render(window());
    let renderer = renderer_with_stale_entry(&request).await;
    let (feed, renders) = Feed::new("fresh");

    let (result, body) = render_markup(&renderer, &Unit::markup(feed), &request)
        .await
        .unwrap();
    assert!(!result.from_cache);
    assert_eq!(body, "<div>fresh</div>");
    assert_eq!(renders.load(Ordering::SeqCst), 1);

    let stored = renderer
        .cache()
        .cached_output(&request, OutputKind::Render)
        .await
        .unwrap()
        .unwrap();
    assert_ne!(stored.etag, "v1");
    assert_eq!(stored.etag, CacheEntry::new(stored.payload.clone()).etag);
}

#[tokio::test]
async fn test_previous_validator_is_not_honored_after_rerender() {
    let request = RenderRequest::render(window());
    let renderer = renderer_with_stale_entry(&request).await;
    let (feed, renders) = Feed::new("fresh");
    let unit = Unit::markup(feed);
    render_markup(&renderer, &unit, &request).await.unwrap();

    let conditional = request.clone().with_header(IF_NONE_MATCH, "\"v1\"");
    let (result, body) = render_markup(&renderer, &unit, &conditional).await.unwrap();
    assert!(result.from_cache);
    assert!(!result.not_modified);
    assert_eq!(body, "<div>fresh</div>");
    assert_eq!(renders.load(Ordering::SeqCst), 1);
}

#[tokio::test]
async fn test_private_scope_without_session_is_malformed() {
    let renderer = portlet_renderer(
        UnitConfig::new(1000)
            .with_scope(CacheScope::Private)
            .with_expiration(300),
    );
    let (feed, _) = Feed::new("x");
    let err = render_markup(&renderer, &Unit::markup(feed), &RenderRequest::render(window()))
        .await
        .unwrap_err();
    assert!(matches!(err, RenderError::MalformedCacheKey(_)));
}

#[tokio::test]
async fn test_cacheable_unit_replays_while_valid() {
    let mut config = PortalConfig::default();
    config.renderer.character_cacheable = true;
    let renderer = Renderer::new(&config, registry_with(UnitConfig::new(1000)));
    let renders = Arc::new(AtomicUsize::new(0));

    let v1 = Unit::cacheable_characters(Quote {
        renders: renders.clone(),
        validity: "v1",
    });
    for _ in 0..2 {
        let mut sink = StringSink::new();
        renderer
            .render(v1.clone(), RenderRequest::render(window()), &mut sink)
            .await
            .unwrap();
        assert_eq!(sink.as_str(), "carpe diem");
    }
    assert_eq!(renders.load(Ordering::SeqCst), 1);

    let mut handle = renderer
        .start_rendering(v1.clone(), RenderRequest::render(window()))
        .unwrap();
    handle.complete().await.unwrap();
    assert!(handle.is_rendered_from_cache());
    assert_eq!(handle.title().await.as_deref(), Some("Quote of the day"));

    let v2 = Unit::cacheable_characters(Quote {
        renders: renders.clone(),
        validity: "v2",
    });
    let mut sink = StringSink::new();
    match renderer
        .render(v2, RenderRequest::render(window()), &mut sink)
        .await
        .unwrap()
    {
        RenderOutcome::Successful(summary) => assert!(!summary.from_cache),
        other => panic!("unexpected outcome: {:?}", other),
    }
    assert_eq!(renders.load(Ordering::SeqCst), 2);
}

#[tokio::test]
async fn test_failing_unit_does_not_abort_page() {
    let config = PortalConfig::default();
    let registry = InMemoryRegistry::new();
    for w in ["top", "middle", "bottom", "slow"] {
        registry.register(w, UnitConfig::new(200));
    }
    let renderer = Arc::new(Renderer::new(&config, Arc::new(registry)));
    let pages = PageRenderer::new(renderer);

    let (top, _) = Feed::new("top");
    let (bottom, _) = Feed::new("bottom");
    let units = vec![
        PageUnit::new(
            Unit::markup(top),
            RenderRequest::render(UnitWindow::new("top", "e", "d")),
        ),
        PageUnit::new(
            Unit::character(Failing),
            RenderRequest::render(UnitWindow::new("middle", "e", "d")),
        )
        .with_fallback(FallbackConfig::new(FallbackStrategy::ShowError)),
        PageUnit::new(
            Unit::character(Sleeper),
            RenderRequest::render(UnitWindow::new("slow", "e", "d")),
        ),
        PageUnit::new(
            Unit::markup(bottom),
            RenderRequest::render(UnitWindow::new("bottom", "e", "d")),
        ),
    ];

    let (tx, rx) = mpsc::unbounded::<Vec<u8>>();
    let mut stream = StreamingSink::new(tx, TimingContext::new());
    let started = Instant::now();
    let report = pages.render_page("home", units, &mut stream).await.unwrap();
    stream.complete().await.unwrap();
    assert!(started.elapsed() < Duration::from_secs(1));

    let chunks: Vec<Vec<u8>> = rx.collect().await;
    let page = String::from_utf8(chunks.concat()).unwrap();
    assert!(page.starts_with("<div>top</div>"));
    assert!(page.ends_with("<div>bottom</div>"));
    assert!(page.contains("unit-error"));
    assert!(!page.contains("secret connection string"));

    assert_eq!(report.count(RenderStatus::Successful), 2);
    assert_eq!(report.count(RenderStatus::Failed), 1);
    assert_eq!(report.count(RenderStatus::TimedOut), 1);
    assert!(report.fragment(&"middle".into()).unwrap().fallback_used);
    assert!(!report.fragment(&"slow".into()).unwrap().fallback_used);
}
