//! Page assembly: render a set of units concurrently, stream in page order.

use std::sync::Arc;
use std::time::Duration;

use portal_core::{RenderRequest, WindowId};
use portal_streaming::{OutputBuffer, StreamingSink};
use tracing::{info, warn};

use crate::error::RenderError;
use crate::fallback::{apply_fallback, FallbackConfig, FallbackResult};
use crate::group::RenderingGroup;
use crate::renderer::{RenderHandle, RenderStatus, Renderer};
use crate::unit::Unit;

/// One unit placed on a page.
pub struct PageUnit {
    pub unit: Unit,
    pub request: RenderRequest,
    pub fallback: FallbackConfig,
}

impl PageUnit {
    /// Place a unit with the default (skip) fallback.
    pub fn new(unit: Unit, request: RenderRequest) -> Self {
        Self {
            unit,
            request,
            fallback: FallbackConfig::default(),
        }
    }

    /// Set the fallback used when the unit does not render.
    pub fn with_fallback(mut self, fallback: FallbackConfig) -> Self {
        self.fallback = fallback;
        self
    }
}

/// How one fragment ended up on the page.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct FragmentReport {
    pub window: WindowId,
    pub status: RenderStatus,
    pub from_cache: bool,
    pub title: Option<String>,
    pub render_time: Option<Duration>,
    /// Fallback content was streamed in place of the unit.
    pub fallback_used: bool,
}

/// Outcome of a page render, fragments in page order.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct PageReport {
    pub fragments: Vec<FragmentReport>,
}

impl PageReport {
    /// Fragments with the given status.
    pub fn count(&self, status: RenderStatus) -> usize {
        self.fragments.iter().filter(|f| f.status == status).count()
    }

    /// Fragments served from a cache.
    pub fn from_cache(&self) -> usize {
        self.fragments.iter().filter(|f| f.from_cache).count()
    }

    /// Report for one window.
    pub fn fragment(&self, window: &WindowId) -> Option<&FragmentReport> {
        self.fragments.iter().find(|f| &f.window == window)
    }
}

/// Renders every unit of a page as one rendering group.
///
/// A failing or slow unit never aborts the page; its slot gets the unit's
/// fallback instead.
pub struct PageRenderer {
    renderer: Arc<Renderer>,
}

impl PageRenderer {
    /// Create a page renderer.
    pub fn new(renderer: Arc<Renderer>) -> Self {
        Self { renderer }
    }

    /// The underlying renderer.
    pub fn renderer(&self) -> &Renderer {
        &self.renderer
    }

    /// Dispatch every unit, then stream fragments in page order.
    pub async fn render_page<S, E>(
        &self,
        page_id: &str,
        units: Vec<PageUnit>,
        stream: &mut StreamingSink<S, E>,
    ) -> Result<PageReport, RenderError>
    where
        S: futures::Sink<Vec<u8>, Error = E> + Unpin,
        E: std::fmt::Display,
    {
        let group = RenderingGroup::new(
            page_id,
            units.iter().map(|u| u.request.window.window_id.clone()),
        );

        let mut slots: Vec<(WindowId, Option<RenderHandle>, FallbackConfig)> = Vec::new();
        for placed in units {
            let window = placed.request.window.window_id.clone();
            match self
                .renderer
                .start_group_rendering(placed.unit, placed.request, &group)
            {
                Ok(handle) => slots.push((window, Some(handle), placed.fallback)),
                Err(err) => {
                    warn!(unit = %window, error = %err, "unable to dispatch unit");
                    group.check_in(&window);
                    slots.push((window, None, placed.fallback));
                }
            }
        }

        let mut report = PageReport::default();
        for (window, handle, fallback) in slots {
            let mut buffer = OutputBuffer::new();
            let (status, summary) = match handle {
                Some(mut handle) => {
                    let status = match handle.output(&mut buffer).await {
                        Ok(status) => status,
                        Err(err) => {
                            if fallback.log_failure {
                                warn!(unit = %window, error = %err, "unit failed to render");
                            }
                            RenderStatus::Failed
                        }
                    };
                    (status, Some(handle.summary()))
                }
                None => (RenderStatus::Failed, None),
            };

            let mut fallback_used = false;
            if status == RenderStatus::Successful {
                stream.send_buffer(window.as_str(), &buffer).await?;
            } else {
                if fallback.log_failure && status == RenderStatus::TimedOut {
                    warn!(unit = %window, "unit timed out");
                }
                if let FallbackResult::Rendered(html) = apply_fallback(&fallback, &status.to_string()) {
                    stream.send_fragment(window.as_str(), &html).await?;
                    fallback_used = true;
                }
            }

            let summary = summary.unwrap_or_default();
            report.fragments.push(FragmentReport {
                window,
                status,
                from_cache: status == RenderStatus::Successful && summary.from_cache,
                title: summary.title,
                render_time: summary.render_time,
                fallback_used,
            });
        }

        info!(
            page = page_id,
            units = report.fragments.len(),
            successful = report.count(RenderStatus::Successful),
            from_cache = report.from_cache(),
            bytes = stream.bytes_sent(),
            "page rendered"
        );
        Ok(report)
    }
}
