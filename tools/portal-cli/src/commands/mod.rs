//! CLI command implementations.

pub mod config;
pub mod render;

use clap::{Args, Subcommand};

/// Arguments for the render command.
#[derive(Args)]
pub struct RenderArgs {
    /// Page identifier used for the rendering group.
    #[arg(short, long, default_value = "home")]
    pub page: String,

    /// Number of times to render the page (later passes hit the caches).
    #[arg(long, default_value = "2")]
    pub passes: usize,

    /// Session the page is rendered for.
    #[arg(short, long, default_value = "cli-session")]
    pub session: String,

    /// Print the streamed HTML of the last pass.
    #[arg(long)]
    pub show_html: bool,
}

/// Arguments for the config command.
#[derive(Args)]
pub struct ConfigArgs {
    #[command(subcommand)]
    pub command: ConfigCommand,
}

#[derive(Subcommand)]
pub enum ConfigCommand {
    /// Show current configuration.
    Show,
    /// Initialize a new config file with sample units.
    Init {
        /// Force overwrite existing config.
        #[arg(short, long)]
        force: bool,

        /// Output path.
        #[arg(short, long, default_value = "portal.toml")]
        output: String,
    },
    /// Validate the config file.
    Validate,
}
