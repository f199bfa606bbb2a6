//! Configuration management commands.

use std::collections::HashSet;

use anyhow::{bail, Result};
use portal_core::PortalConfig;

use super::{ConfigArgs, ConfigCommand};
use crate::context::Context;
use crate::units::sample_units;

/// Run the config command.
pub async fn run(args: ConfigArgs, ctx: &Context) -> Result<()> {
    match args.command {
        ConfigCommand::Show => show_config(ctx).await,
        ConfigCommand::Init { force, output } => init_config(force, &output, ctx).await,
        ConfigCommand::Validate => validate_config(ctx).await,
    }
}

async fn show_config(ctx: &Context) -> Result<()> {
    if ctx.output.is_json() {
        ctx.output.json(&ctx.config);
        return Ok(());
    }

    ctx.output.header("Current Configuration");
    match &ctx.config_path {
        Some(path) => ctx.output.kv("file", &path.display().to_string()),
        None => ctx.output.kv("file", "(defaults)"),
    }

    let renderer = &ctx.config.renderer;
    ctx.output.info("[renderer]");
    ctx.output.kv("pool_size", &renderer.pool_size.to_string());
    ctx.output
        .kv("default_timeout_ms", &renderer.default_timeout_ms.to_string());
    ctx.output.kv("cache_units", &renderer.cache_units.to_string());
    ctx.output
        .kv("character_cacheable", &renderer.character_cacheable.to_string());

    let cache = &ctx.config.cache;
    ctx.output.info("[cache]");
    ctx.output.kv("private_ttl_secs", &cache.private_ttl_secs.to_string());
    ctx.output.kv("public_ttl_secs", &cache.public_ttl_secs.to_string());
    ctx.output.kv("max_entries", &cache.max_entries.to_string());
    ctx.output.kv("size_threshold", &cache.size_threshold.to_string());

    ctx.output.info("[logging]");
    ctx.output.kv("level", ctx.config.logging.level.as_str());
    ctx.output
        .kv("format", &format!("{:?}", ctx.config.logging.format).to_lowercase());

    if !ctx.config.units.is_empty() {
        ctx.output.info("Units:");
        for unit in &ctx.config.units {
            ctx.output.list_item(&format!(
                "{} ({} scope, expires {}s, timeout {}ms)",
                unit.window,
                unit.config.cache_scope,
                unit.config.expiration_seconds,
                unit.config
                    .effective_timeout_millis(renderer.default_timeout_ms)
            ));
        }
    }

    Ok(())
}

async fn init_config(force: bool, output: &str, ctx: &Context) -> Result<()> {
    let path = ctx.resolve_path(output);
    if path.exists() && !force {
        bail!(
            "{} already exists. Use --force to overwrite.",
            path.display()
        );
    }

    let config = PortalConfig {
        units: sample_units(),
        ..Default::default()
    };
    config.save(&path)?;

    ctx.output
        .success(&format!("Created {} with {} units", path.display(), config.units.len()));
    Ok(())
}

async fn validate_config(ctx: &Context) -> Result<()> {
    let problems = validate(&ctx.config);
    if ctx.output.is_json() {
        ctx.output.json(&serde_json::json!({
            "valid": problems.is_empty(),
            "problems": problems,
        }));
    } else {
        for problem in &problems {
            ctx.output.warn(problem);
        }
    }

    if !problems.is_empty() {
        bail!("Configuration has {} problem(s)", problems.len());
    }
    ctx.output.success("Configuration is valid");
    Ok(())
}

/// Problems that would make a page render misbehave.
fn validate(config: &PortalConfig) -> Vec<String> {
    let mut problems = Vec::new();

    if config.renderer.pool_size == 0 {
        problems.push("renderer.pool_size must be at least 1".to_string());
    }
    if config.renderer.default_timeout_ms == 0 {
        problems.push("renderer.default_timeout_ms must be positive".to_string());
    }

    let mut seen = HashSet::new();
    for unit in &config.units {
        if unit.window.is_empty() {
            problems.push("unit with an empty window id".to_string());
        } else if !seen.insert(unit.window.as_str()) {
            problems.push(format!("duplicate unit window '{}'", unit.window));
        }
    }

    problems
}
