//! Per-unit render metrics collected from lifecycle phases.

use std::collections::{BTreeMap, HashMap};
use std::time::Duration;

use parking_lot::Mutex;
use portal_core::{RenderObserver, RenderPhase, WindowId};
use serde::{Deserialize, Serialize};
use tracing::trace;

/// Metrics for one unit window.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct UnitMetrics {
    /// Window id.
    pub window: String,
    /// Times the unit was dispatched.
    pub dispatched: u32,
    /// Outputs replayed from a cache.
    pub cache_hits: u32,
    /// Lookups that fell through to rendering.
    pub cache_misses: u32,
    /// Requests answered with not-modified.
    pub not_modified: u32,
    /// Renders that completed.
    pub completed: u32,
    /// Renders that failed.
    pub failed: u32,
    /// Renders abandoned at their timeout.
    pub timed_out: u32,
    /// Cache purges triggered by actions or events.
    pub purged: u32,
    /// Time of the last terminal phase since dispatch (microseconds).
    #[serde(skip_serializing_if = "Option::is_none")]
    pub last_duration_us: Option<u64>,
    /// Reason of the last failure.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub last_error: Option<String>,
}

impl UnitMetrics {
    fn new(window: &WindowId) -> Self {
        Self {
            window: window.to_string(),
            ..Default::default()
        }
    }

    fn record(&mut self, phase: &RenderPhase, elapsed: Duration) {
        match phase {
            RenderPhase::Dispatched => self.dispatched += 1,
            RenderPhase::CheckedIn => {}
            RenderPhase::CacheHit => self.cache_hits += 1,
            RenderPhase::CacheMiss => self.cache_misses += 1,
            RenderPhase::NotModified => self.not_modified += 1,
            RenderPhase::Completed => self.completed += 1,
            RenderPhase::Failed(reason) => {
                self.failed += 1;
                self.last_error = Some(reason.clone());
            }
            RenderPhase::TimedOut => self.timed_out += 1,
            RenderPhase::Purged => self.purged += 1,
        }
        if phase.is_terminal() {
            self.last_duration_us = Some(elapsed.as_micros() as u64);
        }
    }
}

/// Aggregated metrics across every observed unit.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct RenderMetrics {
    /// Per-unit metrics keyed by window.
    pub units: BTreeMap<String, UnitMetrics>,
    pub cache_hits: u32,
    pub cache_misses: u32,
    pub completed: u32,
    pub failed: u32,
    pub timed_out: u32,
}

impl RenderMetrics {
    /// Share of cache lookups served from a cache, if any were made.
    pub fn hit_ratio(&self) -> Option<f64> {
        let lookups = self.cache_hits + self.cache_misses;
        if lookups == 0 {
            None
        } else {
            Some(self.cache_hits as f64 / lookups as f64)
        }
    }

    /// Format as JSON.
    pub fn to_json(&self) -> String {
        serde_json::to_string(self).unwrap_or_default()
    }

    /// Format as JSON (pretty printed).
    pub fn to_json_pretty(&self) -> String {
        serde_json::to_string_pretty(self).unwrap_or_default()
    }

    /// Format as human-readable summary.
    pub fn to_summary(&self) -> String {
        let mut lines = Vec::new();

        lines.push(format!(
            "Renders: {} completed, {} failed, {} timed out",
            self.completed, self.failed, self.timed_out
        ));
        if let Some(ratio) = self.hit_ratio() {
            lines.push(format!(
                "  Cache: {} hits, {} misses ({:.0}% hit ratio)",
                self.cache_hits,
                self.cache_misses,
                ratio * 100.0
            ));
        }

        if !self.units.is_empty() {
            lines.push("  Units:".to_string());
            for (name, unit) in &self.units {
                let duration = unit
                    .last_duration_us
                    .map(|us| format!("{:.2}ms", us as f64 / 1000.0))
                    .unwrap_or_else(|| "-".to_string());
                let mut flags = Vec::new();
                if unit.cache_hits > 0 {
                    flags.push(format!("{} cached", unit.cache_hits));
                }
                if unit.timed_out > 0 {
                    flags.push(format!("{} timed out", unit.timed_out));
                }
                if unit.failed > 0 {
                    flags.push(format!("{} failed", unit.failed));
                }
                let flags = if flags.is_empty() {
                    String::new()
                } else {
                    format!(" [{}]", flags.join(", "))
                };
                lines.push(format!("    {}: {}{}", name, duration, flags));
            }
        }

        lines.join("\n")
    }
}

/// Observer that aggregates lifecycle phases into metrics.
#[derive(Debug, Default)]
pub struct RenderMetricsCollector {
    units: Mutex<HashMap<WindowId, UnitMetrics>>,
}

impl RenderMetricsCollector {
    /// Create an empty collector.
    pub fn new() -> Self {
        Self::default()
    }

    /// Metrics for one window.
    pub fn unit(&self, window: &WindowId) -> Option<UnitMetrics> {
        self.units.lock().get(window).cloned()
    }

    /// Snapshot of everything collected so far.
    pub fn snapshot(&self) -> RenderMetrics {
        let units = self.units.lock();
        let mut metrics = RenderMetrics::default();
        for (window, unit) in units.iter() {
            metrics.cache_hits += unit.cache_hits;
            metrics.cache_misses += unit.cache_misses;
            metrics.completed += unit.completed;
            metrics.failed += unit.failed;
            metrics.timed_out += unit.timed_out;
            metrics.units.insert(window.to_string(), unit.clone());
        }
        metrics
    }

    /// Drop everything collected.
    pub fn reset(&self) {
        self.units.lock().clear();
    }
}

impl RenderObserver for RenderMetricsCollector {
    fn on_phase(&self, window: &WindowId, phase: RenderPhase, elapsed: Duration) {
        trace!(unit = %window, phase = phase.label(), elapsed_us = elapsed.as_micros() as u64, "render phase");
        self.units
            .lock()
            .entry(window.clone())
            .or_insert_with(|| UnitMetrics::new(window))
            .record(&phase, elapsed);
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_phases_are_aggregated() {
        let collector = RenderMetricsCollector::new();
        let a = WindowId::new("a");
        let b = WindowId::new("b");

        collector.on_phase(&a, RenderPhase::Dispatched, Duration::ZERO);
        collector.on_phase(&a, RenderPhase::CacheMiss, Duration::from_millis(1));
        collector.on_phase(&a, RenderPhase::Completed, Duration::from_millis(5));
        collector.on_phase(&b, RenderPhase::CacheHit, Duration::from_millis(1));
        collector.on_phase(&b, RenderPhase::Failed("boom".into()), Duration::from_millis(2));

        let metrics = collector.snapshot();
        assert_eq!(metrics.completed, 1);
        assert_eq!(metrics.failed, 1);
        assert_eq!(metrics.hit_ratio(), Some(0.5));

        let a = collector.unit(&a).unwrap();
        assert_eq!(a.last_duration_us, Some(5000));
        let b = collector.unit(&b).unwrap();
        assert_eq!(b.last_error.as_deref(), Some("boom"));
    }

    #[test]
    fn test_summary_and_json() {
        let collector = RenderMetricsCollector::new();
        let w = WindowId::new("news");
        collector.on_phase(&w, RenderPhase::TimedOut, Duration::from_millis(100));

        let metrics = collector.snapshot();
        assert!(metrics.to_summary().contains("news: 100.00ms [1 timed out]"));
        let parsed: RenderMetrics = serde_json::from_str(&metrics.to_json()).unwrap();
        assert_eq!(parsed, metrics);

        collector.reset();
        assert!(collector.snapshot().units.is_empty());
    }
}
