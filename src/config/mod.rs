//! Configuration layer: typed settings with layered precedence (file → env → CLI).

mod cli;

use std::{
    net::SocketAddr,
    num::{NonZeroU32, NonZeroU64},
    path::PathBuf,
    str::FromStr,
    time::Duration,
};

use clap::Parser;
use config::{Config, Environment, File};
use serde::Deserialize;
use thiserror::Error;
use tracing::level_filters::LevelFilter;
use url::Url;

pub use cli::{CliArgs, Command, ServeArgs, ServeOverrides, StorageArgs, StorageOverrides};

const DEFAULT_CONFIG_BASENAME: &str = "config/default";
const LOCAL_CONFIG_BASENAME: &str = "outpost";
const DEFAULT_HOST: &str = "127.0.0.1";
const DEFAULT_PORT: u16 = 8080;
const DEFAULT_GRACEFUL_SHUTDOWN_SECS: u64 = 10;
const DEFAULT_UPSTREAM_ORIGIN: &str = "http://127.0.0.1:3001";
const DEFAULT_UPSTREAM_TIMEOUT_SECS: u64 = 10;
const DEFAULT_ORDER_PATH: &str = "/api/send-order";
const DEFAULT_MENU_PATH: &str = "/api/menu.json";
const DEFAULT_CACHE_DIR: &str = ".outpost/cache";
const DEFAULT_CACHE_PREFIX: &str = "outpost";
const DEFAULT_CACHE_VERSION: &str = "v1";
pub(crate) const DEFAULT_DYNAMIC_MAX_BYTES: u64 = 10 * 1024 * 1024;
const DEFAULT_EVICTION_INTERVAL_SECS: u64 = 30 * 60;
const DEFAULT_EVICTION_RATIO_PERCENT: u8 = 30;
const DEFAULT_API_PREFIXES: &[&str] = &["/api/"];
const DEFAULT_IMAGE_EXTENSIONS: &[&str] = &["jpg", "jpeg", "png", "gif", "webp", "svg"];
const DEFAULT_PRECACHE: &[&str] = &[
    "/",
    "/index.html",
    "/offline.html",
    "/style.css",
    "/app.js",
    "/manifest.json",
    "/coffee.jpg",
];
const DEFAULT_OFFLINE_DOCUMENT: &str = "/offline.html";
const DEFAULT_OUTBOX_DIR: &str = ".outpost/outbox";
const DEFAULT_FALLBACK_DELAY_MS: u64 = 2000;
const DEFAULT_MAX_ATTEMPTS: u32 = 8;
const DEFAULT_BACKOFF_BASE_SECS: u64 = 15;
const DEFAULT_BACKOFF_MAX_SECS: u64 = 15 * 60;

/// Fully-resolved deployment settings after precedence resolution and validation.
#[derive(Debug, Clone)]
pub struct Settings {
    pub server: ServerSettings,
    pub logging: LoggingSettings,
    pub upstream: UpstreamSettings,
    pub cache: CacheSettings,
    pub outbox: OutboxSettings,
    pub lifecycle: LifecycleSettings,
}

#[derive(Debug, Clone)]
pub struct ServerSettings {
    pub addr: SocketAddr,
    pub graceful_shutdown: Duration,
}

#[derive(Debug, Clone)]
pub struct LoggingSettings {
    pub level: LevelFilter,
    pub format: LogFormat,
}

#[derive(Debug, Clone, Copy)]
pub enum LogFormat {
    Json,
    Compact,
}

#[derive(Debug, Clone)]
pub struct UpstreamSettings {
    pub origin: Url,
    pub timeout: Duration,
    pub order_path: String,
    pub menu_path: String,
}

#[derive(Debug, Clone)]
pub struct CacheSettings {
    pub directory: PathBuf,
    pub name_prefix: String,
    pub version: String,
    pub dynamic_max_bytes: NonZeroU64,
    pub eviction_interval: Duration,
    pub eviction_ratio_percent: u8,
    pub api_prefixes: Vec<String>,
    pub image_extensions: Vec<String>,
    pub precache: Vec<String>,
    pub offline_document: String,
}

#[derive(Debug, Clone)]
pub struct OutboxSettings {
    pub directory: PathBuf,
    pub background_sync: bool,
    pub fallback_delay: Duration,
    pub max_attempts: NonZeroU32,
    pub backoff_base: Duration,
    pub backoff_max: Duration,
}

#[derive(Debug, Clone)]
pub struct LifecycleSettings {
    pub skip_waiting: bool,
}

#[derive(Debug, Error)]
pub enum LoadError {
    #[error("failed to build configuration: {0}")]
    Build(#[from] config::ConfigError),
    #[error("invalid configuration for `{key}`: {reason}")]
    Invalid { key: &'static str, reason: String },
}

impl LoadError {
    fn invalid(key: &'static str, reason: impl Into<String>) -> Self {
        Self::Invalid {
            key,
            reason: reason.into(),
        }
    }
}

/// Load settings using the configured precedence (file → environment → CLI).
pub fn load(cli: &CliArgs) -> Result<Settings, LoadError> {
    let mut builder = Config::builder()
        .add_source(File::with_name(DEFAULT_CONFIG_BASENAME).required(false))
        .add_source(File::with_name(LOCAL_CONFIG_BASENAME).required(false));

    if let Some(path) = cli.config_file.as_ref() {
        builder = builder.add_source(File::from(path.as_path()).required(true));
    }

    builder = builder.add_source(
        Environment::with_prefix("OUTPOST")
            .separator("__")
            .list_separator(",")
            .with_list_parse_key("cache.api_prefixes")
            .with_list_parse_key("cache.image_extensions")
            .with_list_parse_key("cache.precache")
            .try_parsing(true),
    );

    let mut raw: RawSettings = builder.build()?.try_deserialize()?;

    match cli.command.as_ref() {
        Some(Command::Serve(args)) => raw.apply_serve_overrides(&args.overrides),
        Some(Command::Sync(args)) | Some(Command::Evict(args)) | Some(Command::Status(args)) => {
            raw.apply_storage_overrides(&args.storage)
        }
        None => raw.apply_serve_overrides(&ServeOverrides::default()),
    }

    Settings::from_raw(raw)
}

/// Resolve configuration using the supplied CLI arguments, returning both for downstream use.
pub fn load_with_cli() -> Result<(CliArgs, Settings), LoadError> {
    let args = CliArgs::parse();
    let settings = load(&args)?;
    Ok((args, settings))
}

#[derive(Debug, Clone, Deserialize, Default)]
#[serde(default)]
struct RawSettings {
    server: RawServerSettings,
    logging: RawLoggingSettings,
    upstream: RawUpstreamSettings,
    cache: RawCacheSettings,
    outbox: RawOutboxSettings,
    lifecycle: RawLifecycleSettings,
}

impl RawSettings {
    fn apply_serve_overrides(&mut self, overrides: &ServeOverrides) {
        if let Some(host) = overrides.server_host.as_ref() {
            self.server.host = Some(host.clone());
        }
        if let Some(port) = overrides.server_port {
            self.server.port = Some(port);
        }
        if let Some(level) = overrides.log_level.as_ref() {
            self.logging.level = Some(level.clone());
        }
        if let Some(json) = overrides.log_json {
            self.logging.json = Some(json);
        }
        if let Some(enabled) = overrides.outbox_background_sync {
            self.outbox.background_sync = Some(enabled);
        }
        if let Some(bytes) = overrides.cache_dynamic_max_bytes {
            self.cache.dynamic_max_bytes = Some(bytes);
        }

        self.apply_storage_overrides(&overrides.storage);
    }

    fn apply_storage_overrides(&mut self, overrides: &StorageOverrides) {
        if let Some(origin) = overrides.upstream_origin.as_ref() {
            self.upstream.origin = Some(origin.clone());
        }
        if let Some(directory) = overrides.cache_directory.as_ref() {
            self.cache.directory = Some(directory.clone());
        }
        if let Some(version) = overrides.cache_version.as_ref() {
            self.cache.version = Some(version.clone());
        }
        if let Some(directory) = overrides.outbox_directory.as_ref() {
            self.outbox.directory = Some(directory.clone());
        }
    }
}

impl Settings {
    fn from_raw(raw: RawSettings) -> Result<Self, LoadError> {
        let RawSettings {
            server,
            logging,
            upstream,
            cache,
            outbox,
            lifecycle,
        } = raw;

        Ok(Self {
            server: build_server_settings(server)?,
            logging: build_logging_settings(logging)?,
            upstream: build_upstream_settings(upstream)?,
            cache: build_cache_settings(cache)?,
            outbox: build_outbox_settings(outbox)?,
            lifecycle: LifecycleSettings {
                skip_waiting: lifecycle.skip_waiting.unwrap_or(true),
            },
        })
    }
}

fn build_server_settings(server: RawServerSettings) -> Result<ServerSettings, LoadError> {
    let host = server.host.unwrap_or_else(|| DEFAULT_HOST.to_string());
    let port = server.port.unwrap_or(DEFAULT_PORT);
    if port == 0 {
        return Err(LoadError::invalid(
            "server.port",
            "port must be greater than zero",
        ));
    }

    let addr = parse_socket_addr(&host, port)
        .map_err(|reason| LoadError::invalid("server.addr", reason))?;

    let graceful_secs = server
        .graceful_shutdown_seconds
        .unwrap_or(DEFAULT_GRACEFUL_SHUTDOWN_SECS);
    if graceful_secs == 0 {
        return Err(LoadError::invalid(
            "server.graceful_shutdown_seconds",
            "must be greater than zero",
        ));
    }

    Ok(ServerSettings {
        addr,
        graceful_shutdown: Duration::from_secs(graceful_secs),
    })
}

fn build_logging_settings(logging: RawLoggingSettings) -> Result<LoggingSettings, LoadError> {
    let level = match logging.level {
        Some(level) => LevelFilter::from_str(level.as_str()).map_err(|err| {
            LoadError::invalid("logging.level", format!("failed to parse: {err}"))
        })?,
        None => LevelFilter::INFO,
    };

    let format = if logging.json.unwrap_or(false) {
        LogFormat::Json
    } else {
        LogFormat::Compact
    };

    Ok(LoggingSettings { level, format })
}

fn build_upstream_settings(upstream: RawUpstreamSettings) -> Result<UpstreamSettings, LoadError> {
    let origin_value = upstream
        .origin
        .unwrap_or_else(|| DEFAULT_UPSTREAM_ORIGIN.to_string());
    let origin = Url::parse(origin_value.trim())
        .map_err(|err| LoadError::invalid("upstream.origin", format!("invalid url: {err}")))?;
    if !matches!(origin.scheme(), "http" | "https") {
        return Err(LoadError::invalid(
            "upstream.origin",
            "scheme must be http or https",
        ));
    }

    let timeout_secs = upstream
        .timeout_seconds
        .unwrap_or(DEFAULT_UPSTREAM_TIMEOUT_SECS);
    if timeout_secs == 0 {
        return Err(LoadError::invalid(
            "upstream.timeout_seconds",
            "must be greater than zero",
        ));
    }

    let order_path = absolute_path(
        upstream.order_path.as_deref().unwrap_or(DEFAULT_ORDER_PATH),
        "upstream.order_path",
    )?;
    let menu_path = absolute_path(
        upstream.menu_path.as_deref().unwrap_or(DEFAULT_MENU_PATH),
        "upstream.menu_path",
    )?;

    Ok(UpstreamSettings {
        origin,
        timeout: Duration::from_secs(timeout_secs),
        order_path,
        menu_path,
    })
}

fn build_cache_settings(cache: RawCacheSettings) -> Result<CacheSettings, LoadError> {
    let directory = cache
        .directory
        .unwrap_or_else(|| PathBuf::from(DEFAULT_CACHE_DIR));
    if directory.as_os_str().is_empty() {
        return Err(LoadError::invalid(
            "cache.directory",
            "path must not be empty",
        ));
    }

    let name_prefix = store_token(
        cache.name_prefix.as_deref().unwrap_or(DEFAULT_CACHE_PREFIX),
        "cache.name_prefix",
    )?;
    let version = store_token(
        cache.version.as_deref().unwrap_or(DEFAULT_CACHE_VERSION),
        "cache.version",
    )?;

    let dynamic_max_bytes = NonZeroU64::new(
        cache
            .dynamic_max_bytes
            .unwrap_or(DEFAULT_DYNAMIC_MAX_BYTES),
    )
    .ok_or_else(|| LoadError::invalid("cache.dynamic_max_bytes", "must be greater than zero"))?;

    let interval_secs = cache
        .eviction_interval_seconds
        .unwrap_or(DEFAULT_EVICTION_INTERVAL_SECS);
    if interval_secs == 0 {
        return Err(LoadError::invalid(
            "cache.eviction_interval_seconds",
            "must be greater than zero",
        ));
    }

    let ratio = cache
        .eviction_ratio_percent
        .unwrap_or(u64::from(DEFAULT_EVICTION_RATIO_PERCENT));
    if !(1..=100).contains(&ratio) {
        return Err(LoadError::invalid(
            "cache.eviction_ratio_percent",
            "must be between 1 and 100",
        ));
    }

    let api_prefixes = cache
        .api_prefixes
        .unwrap_or_else(|| to_strings(DEFAULT_API_PREFIXES))
        .into_iter()
        .map(|prefix| absolute_path(&prefix, "cache.api_prefixes"))
        .collect::<Result<Vec<_>, _>>()?;

    let image_extensions = cache
        .image_extensions
        .unwrap_or_else(|| to_strings(DEFAULT_IMAGE_EXTENSIONS))
        .into_iter()
        .map(|ext| ext.trim().trim_start_matches('.').to_ascii_lowercase())
        .filter(|ext| !ext.is_empty())
        .collect::<Vec<_>>();

    let precache = cache
        .precache
        .unwrap_or_else(|| to_strings(DEFAULT_PRECACHE))
        .into_iter()
        .map(|path| absolute_path(&path, "cache.precache"))
        .collect::<Result<Vec<_>, _>>()?;

    let offline_document = absolute_path(
        cache
            .offline_document
            .as_deref()
            .unwrap_or(DEFAULT_OFFLINE_DOCUMENT),
        "cache.offline_document",
    )?;
    if !precache.contains(&offline_document) {
        return Err(LoadError::invalid(
            "cache.offline_document",
            format!("`{offline_document}` must be listed in cache.precache"),
        ));
    }

    Ok(CacheSettings {
        directory,
        name_prefix,
        version,
        dynamic_max_bytes,
        eviction_interval: Duration::from_secs(interval_secs),
        eviction_ratio_percent: ratio as u8,
        api_prefixes,
        image_extensions,
        precache,
        offline_document,
    })
}

fn build_outbox_settings(outbox: RawOutboxSettings) -> Result<OutboxSettings, LoadError> {
    let directory = outbox
        .directory
        .unwrap_or_else(|| PathBuf::from(DEFAULT_OUTBOX_DIR));
    if directory.as_os_str().is_empty() {
        return Err(LoadError::invalid(
            "outbox.directory",
            "path must not be empty",
        ));
    }

    let max_attempts = non_zero_u32(
        outbox
            .max_attempts
            .unwrap_or(u64::from(DEFAULT_MAX_ATTEMPTS)),
        "outbox.max_attempts",
    )?;

    let backoff_base = Duration::from_secs(
        outbox
            .backoff_base_seconds
            .unwrap_or(DEFAULT_BACKOFF_BASE_SECS),
    );
    let backoff_max = Duration::from_secs(
        outbox
            .backoff_max_seconds
            .unwrap_or(DEFAULT_BACKOFF_MAX_SECS),
    );
    if backoff_max < backoff_base {
        return Err(LoadError::invalid(
            "outbox.backoff_max_seconds",
            "must not be smaller than outbox.backoff_base_seconds",
        ));
    }

    Ok(OutboxSettings {
        directory,
        background_sync: outbox.background_sync.unwrap_or(true),
        fallback_delay: Duration::from_millis(
            outbox.fallback_delay_ms.unwrap_or(DEFAULT_FALLBACK_DELAY_MS),
        ),
        max_attempts,
        backoff_base,
        backoff_max,
    })
}

#[derive(Debug, Clone, Deserialize, Default)]
#[serde(default)]
struct RawServerSettings {
    host: Option<String>,
    port: Option<u16>,
    graceful_shutdown_seconds: Option<u64>,
}

#[derive(Debug, Clone, Deserialize, Default)]
#[serde(default)]
struct RawLoggingSettings {
    level: Option<String>,
    json: Option<bool>,
}

#[derive(Debug, Clone, Deserialize, Default)]
#[serde(default)]
struct RawUpstreamSettings {
    origin: Option<String>,
    timeout_seconds: Option<u64>,
    order_path: Option<String>,
    menu_path: Option<String>,
}

#[derive(Debug, Clone, Deserialize, Default)]
#[serde(default)]
struct RawCacheSettings {
    directory: Option<PathBuf>,
    name_prefix: Option<String>,
    version: Option<String>,
    dynamic_max_bytes: Option<u64>,
    eviction_interval_seconds: Option<u64>,
    eviction_ratio_percent: Option<u64>,
    api_prefixes: Option<Vec<String>>,
    image_extensions: Option<Vec<String>>,
    precache: Option<Vec<String>>,
    offline_document: Option<String>,
}

#[derive(Debug, Clone, Deserialize, Default)]
#[serde(default)]
struct RawOutboxSettings {
    directory: Option<PathBuf>,
    background_sync: Option<bool>,
    fallback_delay_ms: Option<u64>,
    max_attempts: Option<u64>,
    backoff_base_seconds: Option<u64>,
    backoff_max_seconds: Option<u64>,
}

#[derive(Debug, Clone, Deserialize, Default)]
#[serde(default)]
struct RawLifecycleSettings {
    skip_waiting: Option<bool>,
}

fn parse_socket_addr(host: &str, port: u16) -> Result<SocketAddr, String> {
    let candidate = format!("{host}:{port}");
    candidate
        .parse()
        .map_err(|err| format!("invalid address `{candidate}`: {err}"))
}

fn non_zero_u32(value: u64, key: &'static str) -> Result<NonZeroU32, LoadError> {
    if value == 0 {
        return Err(LoadError::invalid(key, "must be greater than zero"));
    }
    let value_u32: u32 = value
        .try_into()
        .map_err(|_| LoadError::invalid(key, "value exceeds supported range for u32"))?;
    NonZeroU32::new(value_u32).ok_or_else(|| LoadError::invalid(key, "must be greater than zero"))
}

fn absolute_path(value: &str, key: &'static str) -> Result<String, LoadError> {
    let trimmed = value.trim();
    if !trimmed.starts_with('/') {
        return Err(LoadError::invalid(
            key,
            format!("`{trimmed}` must start with `/`"),
        ));
    }
    Ok(trimmed.to_string())
}

/// Store names are `{prefix}-{class}-{version}`, so tokens must not be empty
/// or contain path separators.
fn store_token(value: &str, key: &'static str) -> Result<String, LoadError> {
    let trimmed = value.trim();
    if trimmed.is_empty() {
        return Err(LoadError::invalid(key, "must not be empty"));
    }
    if !trimmed
        .chars()
        .all(|c| c.is_ascii_alphanumeric() || matches!(c, '.' | '_' | '-'))
    {
        return Err(LoadError::invalid(
            key,
            format!("`{trimmed}` may only contain ASCII letters, digits, `.`, `_` or `-`"),
        ));
    }
    Ok(trimmed.to_string())
}

fn to_strings(values: &[&str]) -> Vec<String> {
    values.iter().map(|value| value.to_string()).collect()
}

#[cfg(test)]
mod tests;
