use std::path::PathBuf;

use clap::{Args, Parser, Subcommand, ValueHint, builder::BoolishValueParser};

/// Command-line arguments for the Outpost binary.
#[derive(Debug, Parser)]
#[command(
    name = "outpost",
    version,
    about = "Offline-first interception proxy for installable web apps"
)]
pub struct CliArgs {
    /// Optional path to a configuration file.
    #[arg(
        long = "config-file",
        env = "OUTPOST_CONFIG_FILE",
        value_name = "PATH",
        value_hint = ValueHint::FilePath
    )]
    pub config_file: Option<PathBuf>,

    #[command(subcommand)]
    pub command: Option<Command>,
}

#[derive(Debug, Subcommand, Clone)]
pub enum Command {
    /// Run the interception proxy.
    Serve(Box<ServeArgs>),
    /// Deliver every due outbox item once and exit.
    Sync(StorageArgs),
    /// Run a single eviction pass over the dynamic store and exit.
    Evict(StorageArgs),
    /// Print cache store names with entry counts.
    Status(StorageArgs),
}

#[derive(Debug, Args, Default, Clone)]
pub struct ServeArgs {
    #[command(flatten)]
    pub overrides: ServeOverrides,
}

#[derive(Debug, Args, Default, Clone)]
pub struct StorageArgs {
    #[command(flatten)]
    pub storage: StorageOverrides,
}

#[derive(Debug, Args, Default, Clone)]
pub struct StorageOverrides {
    /// Override the upstream origin every request is resolved against.
    #[arg(long = "upstream-origin", value_name = "URL")]
    pub upstream_origin: Option<String>,

    /// Override the cache store root directory.
    #[arg(long = "cache-directory", value_name = "PATH", value_hint = ValueHint::DirPath)]
    pub cache_directory: Option<PathBuf>,

    /// Override the cache version token embedded in store names.
    #[arg(long = "cache-version", value_name = "TOKEN")]
    pub cache_version: Option<String>,

    /// Override the outbox directory.
    #[arg(long = "outbox-directory", value_name = "PATH", value_hint = ValueHint::DirPath)]
    pub outbox_directory: Option<PathBuf>,
}

#[derive(Debug, Args, Default, Clone)]
pub struct ServeOverrides {
    #[command(flatten)]
    pub storage: StorageOverrides,

    /// Override the listener host.
    #[arg(long = "server-host", value_name = "HOST")]
    pub server_host: Option<String>,

    /// Override the listener port.
    #[arg(long = "server-port", value_name = "PORT")]
    pub server_port: Option<u16>,

    /// Override the base log level (trace|debug|info|warn|error).
    #[arg(long = "log-level", value_name = "LEVEL")]
    pub log_level: Option<String>,

    /// Toggle JSON logging.
    #[arg(
        long = "log-json",
        value_name = "BOOL",
        value_parser = BoolishValueParser::new()
    )]
    pub log_json: Option<bool>,

    /// Toggle background-sync signalling; when off, enqueued orders drain after a fixed delay.
    #[arg(
        long = "outbox-background-sync",
        value_name = "BOOL",
        value_parser = BoolishValueParser::new()
    )]
    pub outbox_background_sync: Option<bool>,

    /// Override the dynamic store byte ceiling.
    #[arg(long = "cache-dynamic-max-bytes", value_name = "BYTES")]
    pub cache_dynamic_max_bytes: Option<u64>,
}
