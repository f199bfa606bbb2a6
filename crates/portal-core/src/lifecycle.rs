//! Render lifecycle tracking.

use std::collections::HashMap;
use std::time::{Duration, Instant};

use crate::ids::WindowId;

/// Lifecycle phases for one unit render.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum RenderPhase {
    /// Work was submitted to the worker pool.
    Dispatched,
    /// The unit checked in with its rendering group.
    CheckedIn,
    /// Output was replayed from a cache.
    CacheHit,
    /// No usable cache entry; the unit ran.
    CacheMiss,
    /// The caller's validator matched; nothing was sent.
    NotModified,
    /// Rendering finished successfully.
    Completed,
    /// Unit logic failed.
    Failed(String),
    /// The deadline elapsed first.
    TimedOut,
    /// Cached data was invalidated.
    Purged,
}

impl RenderPhase {
    /// Short label for logs and metrics.
    pub fn label(&self) -> &'static str {
        match self {
            Self::Dispatched => "dispatched",
            Self::CheckedIn => "checked_in",
            Self::CacheHit => "cache_hit",
            Self::CacheMiss => "cache_miss",
            Self::NotModified => "not_modified",
            Self::Completed => "completed",
            Self::Failed(_) => "failed",
            Self::TimedOut => "timed_out",
            Self::Purged => "purged",
        }
    }

    /// Whether this phase ends the render.
    pub fn is_terminal(&self) -> bool {
        matches!(
            self,
            Self::Completed | Self::Failed(_) | Self::TimedOut | Self::NotModified
        )
    }
}

/// Timing marks for one render.
#[derive(Debug, Clone)]
pub struct TimingContext {
    start: Instant,
    marks: HashMap<String, Instant>,
}

impl TimingContext {
    /// Create a new timing context.
    pub fn new() -> Self {
        Self {
            start: Instant::now(),
            marks: HashMap::new(),
        }
    }

    /// Record a timing mark.
    pub fn mark(&mut self, name: &str) {
        self.marks.insert(name.to_string(), Instant::now());
    }

    /// Mark the point the unit started producing output.
    pub fn mark_render_start(&mut self) {
        self.mark("render_start");
    }

    /// Mark the point the unit finished producing output.
    pub fn mark_render_end(&mut self) {
        self.mark("render_end");
    }

    /// Get elapsed time since start.
    pub fn elapsed(&self) -> Duration {
        self.start.elapsed()
    }

    /// Time from start to a named mark.
    pub fn since_start(&self, name: &str) -> Option<Duration> {
        self.marks.get(name).map(|t| t.duration_since(self.start))
    }

    /// Time spent queued and waiting for the cohort before rendering.
    pub fn wait_time(&self) -> Option<Duration> {
        self.since_start("render_start")
    }

    /// Time the unit itself spent rendering.
    pub fn render_time(&self) -> Option<Duration> {
        let start = self.marks.get("render_start")?;
        let end = self.marks.get("render_end")?;
        Some(end.duration_since(*start))
    }
}

impl Default for TimingContext {
    fn default() -> Self {
        Self::new()
    }
}

/// Observer for render lifecycle events.
pub trait RenderObserver: Send + Sync {
    /// Called when a unit enters a lifecycle phase.
    fn on_phase(&self, window: &WindowId, phase: RenderPhase, elapsed: Duration);
}

/// Observer that discards every event.
#[derive(Debug, Default, Clone, Copy)]
pub struct NoopObserver;

impl RenderObserver for NoopObserver {
    fn on_phase(&self, _window: &WindowId, _phase: RenderPhase, _elapsed: Duration) {}
}
