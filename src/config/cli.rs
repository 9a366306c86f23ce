use std::path::PathBuf;

use clap::{Args, Parser, Subcommand, builder::BoolishValueParser};

/// Command-line arguments for the offline-cache binary.
#[derive(Debug, Parser)]
#[command(
    name = "offline-cache",
    version,
    about = "Route-driven offline response cache"
)]
pub struct CliArgs {
    /// Optional path to a configuration file.
    #[arg(
        long = "config-file",
        env = "OFFLINE_CACHE_CONFIG_FILE",
        value_name = "PATH",
        global = true
    )]
    pub config_file: Option<PathBuf>,

    #[command(flatten)]
    pub overrides: Overrides,

    #[command(subcommand)]
    pub command: Command,
}

#[derive(Debug, Subcommand, Clone)]
pub enum Command {
    /// Print the strategy config a path resolves to.
    Resolve(ResolveArgs),
    /// Install and activate, then dispatch each URL through the engine.
    Fetch(FetchArgs),
}

#[derive(Debug, Args, Clone)]
pub struct ResolveArgs {
    /// Request path, e.g. `/api/profile` or `/app.js`.
    #[arg(value_name = "PATH")]
    pub path: String,
}

#[derive(Debug, Args, Clone)]
pub struct FetchArgs {
    /// Absolute URLs or origin-relative paths; each is dispatched in order.
    #[arg(value_name = "URL", required = true, num_args = 1..)]
    pub urls: Vec<String>,

    /// Send `Authorization: Bearer <TOKEN>` with every request.
    #[arg(long = "bearer", value_name = "TOKEN")]
    pub bearer: Option<String>,

    /// Dispatch the whole list this many times against the same engine.
    #[arg(long, default_value_t = 1, value_parser = clap::value_parser!(u32).range(1..))]
    pub rounds: u32,

    /// After the last round, tear down every cache of this app and print the report.
    #[arg(long)]
    pub decommission: bool,
}

#[derive(Debug, Args, Default, Clone)]
pub struct Overrides {
    /// Override the application id used to name caches.
    #[arg(long = "app-id", value_name = "ID", global = true)]
    pub app_id: Option<String>,

    /// Override the application version used to name caches.
    #[arg(long = "app-version", value_name = "VERSION", global = true)]
    pub app_version: Option<String>,

    /// Override the deployment environment recorded in traces.
    #[arg(long = "environment", value_name = "NAME", global = true)]
    pub environment: Option<String>,

    /// Override the origin whose requests are intercepted.
    #[arg(long = "origin", value_name = "URL", global = true)]
    pub origin: Option<String>,

    /// Override the network timeout applied to every fetch.
    #[arg(long = "network-timeout-ms", value_name = "MS", global = true)]
    pub network_timeout_ms: Option<u64>,

    /// Override the base log level (trace|debug|info|warn|error).
    #[arg(long = "log-level", value_name = "LEVEL", global = true)]
    pub log_level: Option<String>,

    /// Toggle JSON logging.
    #[arg(
        long = "log-json",
        value_name = "BOOL",
        value_parser = BoolishValueParser::new(),
        global = true
    )]
    pub log_json: Option<bool>,
}
