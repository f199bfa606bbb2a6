//! Simulated units built from configured unit specs.

use std::time::Duration;

use async_trait::async_trait;
use portal_cache::UnitCacheKey;
use portal_core::{CacheScope, RenderRequest, UnitConfig, UnitError, UnitSpec, UnitWindow};
use portal_executor::{Cacheable, MarkupUnit, Unit, UnitContext};
use portal_streaming::OutputSink;

/// A unit that sleeps, then writes its configured markup or fails.
pub struct SimulatedUnit {
    spec: UnitSpec,
}

impl SimulatedUnit {
    /// Wrap a spec.
    pub fn new(spec: UnitSpec) -> Self {
        Self { spec }
    }

    fn markup(&self) -> String {
        if self.spec.markup.is_empty() {
            format!(
                r#"<section id="{}"><p>{} content</p></section>"#,
                self.spec.window, self.spec.window
            )
        } else {
            self.spec.markup.clone()
        }
    }
}

#[async_trait]
impl MarkupUnit for SimulatedUnit {
    async fn render(&self, ctx: &UnitContext, out: &mut dyn OutputSink) -> Result<(), UnitError> {
        if self.spec.latency_ms > 0 {
            tokio::select! {
                _ = tokio::time::sleep(Duration::from_millis(self.spec.latency_ms)) => {}
                _ = ctx.cancelled() => return Err(UnitError::Cancelled),
            }
        }
        if self.spec.fail {
            return Err(UnitError::failed(format!(
                "unit {} is configured to fail",
                self.spec.window
            )));
        }
        if let Some(title) = &self.spec.title {
            ctx.set_title(title.clone());
        }
        out.characters(&self.markup())
            .map_err(|e| UnitError::with_source("write failed", e))
    }
}

impl Cacheable for SimulatedUnit {
    fn generate_key(&self, ctx: &UnitContext) -> Option<UnitCacheKey> {
        let locale = ctx.request().locale.as_deref().unwrap_or("default");
        let key = format!("sim:{}:{}", self.spec.window, locale);
        let key = match self.spec.config.cache_scope {
            CacheScope::Public => UnitCacheKey::system(key),
            CacheScope::Private => UnitCacheKey::instance(key),
        };
        Some(key.with_validity(self.markup()))
    }

    fn is_cache_valid(&self, _ctx: &UnitContext, validity: Option<&str>) -> bool {
        validity == Some(self.markup().as_str())
    }
}

/// Build the unit for a spec. Units with a freshness window are cacheable.
pub fn simulated_unit(spec: &UnitSpec) -> Unit {
    let unit = SimulatedUnit::new(spec.clone());
    if spec.config.expiration_seconds != 0 {
        Unit::cacheable_markup(unit)
    } else {
        Unit::markup(unit)
    }
}

/// Render request for a configured unit within a session.
pub fn request_for(spec: &UnitSpec, session: &str) -> RenderRequest {
    let definition = spec.definition.as_deref().unwrap_or(&spec.window);
    let window = UnitWindow::new(spec.window.as_str(), spec.window.as_str(), definition);
    RenderRequest::render(window).with_session(session)
}

/// Units written by `portal config init`.
pub fn sample_units() -> Vec<UnitSpec> {
    vec![
        UnitSpec {
            window: "header".into(),
            definition: Some("banner".into()),
            title: Some("Welcome".into()),
            markup: r#"<header><h1>Portal</h1></header>"#.into(),
            latency_ms: 20,
            fail: false,
            config: UnitConfig::new(1000)
                .with_scope(CacheScope::Public)
                .with_expiration(300),
        },
        UnitSpec {
            window: "news".into(),
            definition: Some("feed".into()),
            title: Some("Latest news".into()),
            markup: String::new(),
            latency_ms: 150,
            fail: false,
            config: UnitConfig::new(1000).with_expiration(60),
        },
        UnitSpec {
            window: "weather".into(),
            definition: None,
            title: None,
            markup: String::new(),
            latency_ms: 3000,
            fail: false,
            config: UnitConfig::new(500),
        },
        UnitSpec {
            window: "stocks".into(),
            definition: None,
            title: None,
            markup: String::new(),
            latency_ms: 10,
            fail: true,
            config: UnitConfig::default(),
        },
    ]
}

#[cfg(test)]
mod tests {
    use super::*;

    fn spec(markup: &str, expiration: i32) -> UnitSpec {
        UnitSpec {
            window: "w".into(),
            definition: None,
            title: None,
            markup: markup.into(),
            latency_ms: 0,
            fail: false,
            config: UnitConfig::default().with_expiration(expiration),
        }
    }

    #[test]
    fn test_default_markup_names_the_window() {
        let unit = SimulatedUnit::new(spec("", 0));
        assert!(unit.markup().contains(r#"id="w""#));
    }

    #[test]
    fn test_only_expiring_units_are_cacheable() {
        assert!(simulated_unit(&spec("<p/>", 60)).cacheable().is_some());
        assert!(simulated_unit(&spec("<p/>", 0)).cacheable().is_none());
    }

    #[test]
    fn test_request_defaults_definition_to_window() {
        let request = request_for(&spec("", 0), "s1");
        assert_eq!(request.window.definition_id.as_str(), "w");
        assert_eq!(request.session_id.as_ref().map(|s| s.as_str()), Some("s1"));
    }

    #[test]
    fn test_sample_units_round_trip_through_toml() {
        let config = portal_core::PortalConfig {
            units: sample_units(),
            ..Default::default()
        };
        let text = toml::to_string_pretty(&config).unwrap();
        let parsed: portal_core::PortalConfig = toml::from_str(&text).unwrap();
        assert_eq!(parsed.units.len(), 4);
        assert_eq!(parsed.units[0].config.cache_scope, CacheScope::Public);
    }
}
