//! Fallback strategies for units that fail or time out on a page.

/// What to stream in place of a unit that did not render.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub enum FallbackStrategy {
    /// Render fallback HTML.
    RenderFallback(String),

    /// Leave the unit's slot empty.
    #[default]
    Skip,

    /// Show a generic error message.
    ShowError,
}

impl FallbackStrategy {
    /// Create a fallback that renders custom HTML.
    pub fn html(html: impl Into<String>) -> Self {
        Self::RenderFallback(html.into())
    }

    /// Create a fallback that shows a user-friendly message.
    pub fn message(message: impl Into<String>) -> Self {
        Self::RenderFallback(format!(
            r#"<div class="unit-error">{}</div>"#,
            html_escape(&message.into())
        ))
    }
}

/// A unit's fallback behavior.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct FallbackConfig {
    /// The fallback strategy.
    pub strategy: FallbackStrategy,
    /// Whether to log the failure.
    pub log_failure: bool,
}

impl FallbackConfig {
    /// Create a new fallback configuration.
    pub fn new(strategy: FallbackStrategy) -> Self {
        Self {
            strategy,
            log_failure: true,
        }
    }

    /// Set whether to log failures.
    pub fn with_logging(mut self, log: bool) -> Self {
        self.log_failure = log;
        self
    }
}

impl Default for FallbackConfig {
    fn default() -> Self {
        Self::new(FallbackStrategy::default())
    }
}

/// Result of applying a fallback.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum FallbackResult {
    /// Fallback HTML to stream.
    Rendered(String),
    /// Nothing is streamed.
    Skipped,
}

/// Apply a fallback strategy. The reason is shown to users only as a
/// category, never the underlying error.
pub fn apply_fallback(config: &FallbackConfig, reason: &str) -> FallbackResult {
    match &config.strategy {
        FallbackStrategy::RenderFallback(html) => FallbackResult::Rendered(html.clone()),
        FallbackStrategy::Skip => FallbackResult::Skipped,
        FallbackStrategy::ShowError => FallbackResult::Rendered(format!(
            r#"<div class="unit-error">This content is unavailable ({})</div>"#,
            html_escape(reason)
        )),
    }
}

fn html_escape(s: &str) -> String {
    s.replace('&', "&amp;")
        .replace('<', "&lt;")
        .replace('>', "&gt;")
        .replace('"', "&quot;")
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_skip_is_default() {
        assert_eq!(
            apply_fallback(&FallbackConfig::default(), "failed"),
            FallbackResult::Skipped
        );
    }

    #[test]
    fn test_show_error_escapes_reason() {
        let config = FallbackConfig::new(FallbackStrategy::ShowError);
        match apply_fallback(&config, "<timed out>") {
            FallbackResult::Rendered(html) => {
                assert!(html.contains("&lt;timed out&gt;"));
                assert!(!html.contains("<timed"));
            }
            other => panic!("unexpected: {:?}", other),
        }
    }

    #[test]
    fn test_custom_html() {
        let config = FallbackConfig::new(FallbackStrategy::html("<p>later</p>"));
        assert_eq!(
            apply_fallback(&config, "x"),
            FallbackResult::Rendered("<p>later</p>".into())
        );
    }
}
