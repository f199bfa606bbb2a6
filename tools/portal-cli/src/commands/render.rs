//! Page rendering command.

use std::sync::Arc;
use std::time::Instant;

use anyhow::{bail, Result};
use chrono::Utc;
use futures::channel::mpsc;
use futures::StreamExt;
use portal_core::{InMemoryRegistry, TimingContext};
use portal_executor::{
    FallbackConfig, FallbackStrategy, PageRenderer, PageReport, PageUnit, Renderer,
};
use portal_observability::RenderMetricsCollector;
use portal_streaming::StreamingSink;
use serde::Serialize;

use super::RenderArgs;
use crate::context::Context;
use crate::output::{format_bytes, format_duration, status_badge};
use crate::units::{request_for, simulated_unit};

#[derive(Debug, Serialize)]
struct FragmentRow {
    window: String,
    status: String,
    from_cache: bool,
    title: Option<String>,
    render_ms: Option<f64>,
    fallback: bool,
}

#[derive(Debug, Serialize)]
struct PassReport {
    pass: usize,
    elapsed_ms: f64,
    bytes: usize,
    fragments: Vec<FragmentRow>,
    #[serde(skip)]
    html: String,
}

impl PassReport {
    fn new(pass: usize, elapsed: std::time::Duration, bytes: usize, report: &PageReport, html: String) -> Self {
        let fragments = report
            .fragments
            .iter()
            .map(|f| FragmentRow {
                window: f.window.to_string(),
                status: f.status.to_string(),
                from_cache: f.from_cache,
                title: f.title.clone(),
                render_ms: f.render_time.map(|d| d.as_secs_f64() * 1000.0),
                fallback: f.fallback_used,
            })
            .collect();
        Self {
            pass,
            elapsed_ms: elapsed.as_secs_f64() * 1000.0,
            bytes,
            fragments,
            html,
        }
    }
}

/// Run the render command.
pub async fn run(args: RenderArgs, ctx: &Context) -> Result<()> {
    let config = &ctx.config;
    if config.units.is_empty() {
        bail!("No units configured. Run `portal config init` to create a sample page.");
    }
    if args.passes == 0 {
        bail!("--passes must be at least 1");
    }

    let registry = Arc::new(InMemoryRegistry::from_specs(&config.units));
    let metrics = Arc::new(RenderMetricsCollector::new());
    let renderer = Renderer::new(config, registry).with_observer(metrics.clone());
    let pages = PageRenderer::new(Arc::new(renderer));

    ctx.output.header(&format!("Rendering page '{}'", args.page));
    if let Some(path) = &ctx.config_path {
        ctx.output.debug(&format!("Using config {}", path.display()));
    }

    let mut passes = Vec::with_capacity(args.passes);
    for pass in 1..=args.passes {
        ctx.output
            .step(pass, args.passes, &format!("Rendering {} units", config.units.len()));

        let units = config
            .units
            .iter()
            .map(|spec| {
                PageUnit::new(simulated_unit(spec), request_for(spec, &args.session))
                    .with_fallback(FallbackConfig::new(FallbackStrategy::ShowError))
            })
            .collect();

        let (tx, rx) = mpsc::unbounded::<Vec<u8>>();
        let mut stream = StreamingSink::new(tx, TimingContext::new());
        let started = Instant::now();
        let report = pages.render_page(&args.page, units, &mut stream).await?;
        stream.complete().await?;
        let elapsed = started.elapsed();
        let bytes = stream.bytes_sent();
        drop(stream);

        let chunks: Vec<Vec<u8>> = rx.collect().await;
        let html = String::from_utf8_lossy(&chunks.concat()).into_owned();

        let pass_report = PassReport::new(pass, elapsed, bytes, &report, html);
        print_pass(ctx, &pass_report);
        passes.push(pass_report);
    }

    let snapshot = metrics.snapshot();
    let pool = pages.renderer().pool_stats();

    if ctx.output.is_json() {
        ctx.output.json(&serde_json::json!({
            "page": args.page,
            "rendered_at": Utc::now().to_rfc3339(),
            "passes": passes,
            "metrics": snapshot,
            "pool": pool,
        }));
        return Ok(());
    }

    ctx.output.header("Metrics");
    ctx.output.raw(&snapshot.to_summary());

    ctx.output.header("Worker pool");
    ctx.output.kv("size", &pool.size.to_string());
    ctx.output.kv("active", &pool.active.to_string());
    ctx.output.kv("queued", &pool.queued.to_string());
    ctx.output.kv("completed", &pool.completed.to_string());

    if args.show_html {
        if let Some(last) = passes.last() {
            ctx.output.header("HTML");
            ctx.output.raw(&last.html);
        }
    }

    ctx.output.success(&format!("Rendered {} passes", passes.len()));
    Ok(())
}

fn print_pass(ctx: &Context, pass: &PassReport) {
    let widths = [12, 12, 8, 10, 24];
    ctx.output
        .table_row(&["UNIT", "STATUS", "CACHE", "TIME", "TITLE"], &widths);
    for fragment in &pass.fragments {
        let time = fragment
            .render_ms
            .map(|ms| format!("{:.1}ms", ms))
            .unwrap_or_else(|| "-".to_string());
        let cache = if fragment.from_cache { "hit" } else { "-" };
        let status = status_badge(&fragment.status);
        let title = fragment.title.as_deref().unwrap_or("");
        ctx.output
            .table_row(&[&fragment.window, &status, cache, &time, title], &widths);
    }
    ctx.output.kv(
        "streamed",
        &format!(
            "{} in {}",
            format_bytes(pass.bytes as u64),
            format_duration(std::time::Duration::from_secs_f64(pass.elapsed_ms / 1000.0))
        ),
    );
}
