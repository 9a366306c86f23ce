//! Configuration layer: typed settings with layered precedence (file → env → CLI).

use std::{str::FromStr, time::Duration};

use clap::Parser;
use config::{Config, Environment, File};
use regex::Regex;
use serde::Deserialize;
use thiserror::Error;
use tracing::level_filters::LevelFilter;
use url::Url;

use crate::cache::{
    CacheNames, CacheNamespace, CacheStrategyConfig, DEFAULT_API_PREFIX,
    DEFAULT_BREAKER_THRESHOLD, DEFAULT_MAX_RESPONSE_BYTES, DEFAULT_MAX_TOTAL_CACHE_BYTES,
    EngineConfig, EngineLimits, NamespaceTemplate, PrecacheManifest, RoutePattern, RouteRule,
    RouteTable, Strategy,
};

mod cli;

pub use cli::{CliArgs, Command, FetchArgs, Overrides, ResolveArgs};

const DEFAULT_CONFIG_BASENAME: &str = "config/default";
const LOCAL_CONFIG_BASENAME: &str = "offline-cache";
const ENV_PREFIX: &str = "OFFLINE_CACHE";
const DEFAULT_APP_ID: &str = "app";
const DEFAULT_APP_VERSION: &str = "1";
const DEFAULT_ENVIRONMENT: &str = "development";
const DEFAULT_ORIGIN: &str = "http://localhost:8080";
const DEFAULT_NETWORK_TIMEOUT_MS: u64 = 10_000;

/// Fully-resolved settings after precedence resolution and validation.
#[derive(Debug, Clone)]
pub struct Settings {
    pub engine: EngineConfig,
    pub network: NetworkSettings,
    pub logging: LoggingSettings,
}

#[derive(Debug, Clone)]
pub struct NetworkSettings {
    /// Upper bound on any single fetch, independent of per-route timeouts.
    pub timeout: Option<Duration>,
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

    builder = builder.add_source(Environment::with_prefix(ENV_PREFIX).separator("__"));

    let mut raw: RawSettings = builder.build()?.try_deserialize()?;
    raw.apply_overrides(&cli.overrides);

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
    app: RawAppSettings,
    limits: RawLimitSettings,
    precache: RawPrecacheSettings,
    routes: Option<Vec<RawRoute>>,
    fallback: Option<RawRoute>,
    network: RawNetworkSettings,
    logging: RawLoggingSettings,
}

impl RawSettings {
    fn apply_overrides(&mut self, overrides: &Overrides) {
        if let Some(id) = overrides.app_id.as_ref() {
            self.app.id = Some(id.clone());
        }
        if let Some(version) = overrides.app_version.as_ref() {
            self.app.version = Some(version.clone());
        }
        if let Some(environment) = overrides.environment.as_ref() {
            self.app.environment = Some(environment.clone());
        }
        if let Some(origin) = overrides.origin.as_ref() {
            self.app.origin = Some(origin.clone());
        }
        if let Some(timeout) = overrides.network_timeout_ms {
            self.network.timeout_ms = Some(timeout);
        }
        if let Some(level) = overrides.log_level.as_ref() {
            self.logging.level = Some(level.clone());
        }
        if let Some(json) = overrides.log_json {
            self.logging.json = Some(json);
        }
    }
}

impl Settings {
    fn from_raw(raw: RawSettings) -> Result<Self, LoadError> {
        let RawSettings {
            app,
            limits,
            precache,
            routes,
            fallback,
            network,
            logging,
        } = raw;

        let engine = build_engine_config(app, limits, precache, routes, fallback)?;
        let network = build_network_settings(network)?;
        let logging = build_logging_settings(logging)?;

        Ok(Self {
            engine,
            network,
            logging,
        })
    }
}

fn build_engine_config(
    app: RawAppSettings,
    limits: RawLimitSettings,
    precache: RawPrecacheSettings,
    routes: Option<Vec<RawRoute>>,
    fallback: Option<RawRoute>,
) -> Result<EngineConfig, LoadError> {
    let app_id = non_empty(app.id).unwrap_or_else(|| DEFAULT_APP_ID.to_string());
    let version = non_empty(app.version).unwrap_or_else(|| DEFAULT_APP_VERSION.to_string());
    let names = CacheNames::new(app_id, version).map_err(|err| {
        LoadError::invalid("app", err.to_string())
    })?;

    let environment =
        non_empty(app.environment).unwrap_or_else(|| DEFAULT_ENVIRONMENT.to_string());

    let origin_text = non_empty(app.origin).unwrap_or_else(|| DEFAULT_ORIGIN.to_string());
    let origin = Url::parse(&origin_text)
        .map_err(|err| LoadError::invalid("app.origin", format!("`{origin_text}`: {err}")))?;
    if !matches!(origin.scheme(), "http" | "https") {
        return Err(LoadError::invalid(
            "app.origin",
            "origin must use http or https",
        ));
    }

    let api_prefix = non_empty(app.api_prefix).unwrap_or_else(|| DEFAULT_API_PREFIX.to_string());
    if !api_prefix.starts_with('/') {
        return Err(LoadError::invalid(
            "app.api_prefix",
            "must start with `/`",
        ));
    }

    let offline_fallback = non_empty(app.offline_fallback);
    if let Some(path) = offline_fallback.as_deref() {
        origin
            .join(path)
            .map_err(|err| LoadError::invalid("app.offline_fallback", err.to_string()))?;
    }

    let limits = build_limits(limits)?;

    let table = match routes {
        Some(routes) => build_route_table(&names, &api_prefix, routes, fallback)?,
        None => {
            let mut table = RouteTable::defaults(&names, &api_prefix);
            if let Some(fallback) = fallback {
                let config = build_route_config(&names, fallback, "fallback")?;
                table = RouteTable::new(table.rules().to_vec(), config);
            }
            table
        }
    };

    let precache = PrecacheManifest {
        main: precache.main.unwrap_or_default(),
        static_assets: precache.static_assets.unwrap_or_default(),
    };

    Ok(EngineConfig {
        names,
        environment,
        origin,
        api_prefix,
        limits,
        routes: table,
        precache,
        offline_fallback,
        principal_key: app.principal_key.unwrap_or_default().into_bytes(),
    })
}

fn build_limits(limits: RawLimitSettings) -> Result<EngineLimits, LoadError> {
    let max_response_bytes = limits
        .max_response_bytes
        .unwrap_or(DEFAULT_MAX_RESPONSE_BYTES);
    if max_response_bytes == 0 {
        return Err(LoadError::invalid(
            "limits.max_response_bytes",
            "must be greater than zero",
        ));
    }

    let max_total_cache_bytes = limits
        .max_total_cache_bytes
        .unwrap_or(DEFAULT_MAX_TOTAL_CACHE_BYTES);
    if max_total_cache_bytes < max_response_bytes {
        return Err(LoadError::invalid(
            "limits.max_total_cache_bytes",
            "must be at least limits.max_response_bytes",
        ));
    }

    Ok(EngineLimits {
        max_response_bytes,
        max_total_cache_bytes,
        breaker_threshold: limits.breaker_threshold.unwrap_or(DEFAULT_BREAKER_THRESHOLD),
    })
}

fn build_route_table(
    names: &CacheNames,
    api_prefix: &str,
    routes: Vec<RawRoute>,
    fallback: Option<RawRoute>,
) -> Result<RouteTable, LoadError> {
    let mut rules = Vec::with_capacity(routes.len());
    for (index, route) in routes.into_iter().enumerate() {
        let label = format!("route #{index}");
        let pattern = build_pattern(&route, &label)?;
        let config = build_route_config(names, route, &label)?;
        rules.push(RouteRule::new(pattern, config));
    }

    // Without an explicit fallback the stock one still applies.
    let fallback = match fallback {
        Some(raw) => build_route_config(names, raw, "fallback")?,
        None => RouteTable::defaults(names, api_prefix)
            .fallback()
            .cloned()
            .unwrap_or_default(),
    };

    Ok(RouteTable::new(rules, fallback))
}

fn build_pattern(route: &RawRoute, label: &str) -> Result<RoutePattern, LoadError> {
    let Some(pattern) = route.pattern.as_deref().filter(|p| !p.is_empty()) else {
        return Err(LoadError::invalid(
            "routes",
            format!("{label}: `pattern` is required"),
        ));
    };
    if route.regex.unwrap_or(false) {
        let regex = Regex::new(pattern)
            .map_err(|err| LoadError::invalid("routes", format!("{label}: {err}")))?;
        Ok(RoutePattern::Regex(regex))
    } else {
        Ok(RoutePattern::Literal(pattern.to_string()))
    }
}

fn build_route_config(
    names: &CacheNames,
    route: RawRoute,
    label: &str,
) -> Result<CacheStrategyConfig, LoadError> {
    let strategy = match route.strategy.as_deref() {
        Some(value) => Strategy::from_str(value)
            .map_err(|reason| LoadError::invalid("routes", format!("{label}: {reason}")))?,
        None => Strategy::NetworkFirst,
    };

    let namespace = match route.cache.as_deref().map(str::trim) {
        None | Some("main") => CacheNamespace::Fixed(names.main()),
        Some("static") => CacheNamespace::Fixed(names.static_assets()),
        Some("api") => CacheNamespace::PerPrincipal(NamespaceTemplate::new(names.api_prefix())),
        Some("") => {
            return Err(LoadError::invalid(
                "routes",
                format!("{label}: `cache` must not be empty"),
            ));
        }
        Some(custom) => CacheNamespace::Fixed(custom.to_string()),
    };

    let defaults = CacheStrategyConfig::default();
    Ok(CacheStrategyConfig::new(strategy, namespace)
        .max_age_ms(route.max_age_ms.unwrap_or(defaults.max_age_ms))
        .max_entries(route.max_entries.unwrap_or(defaults.max_entries))
        .network_timeout_ms(
            route
                .network_timeout_ms
                .unwrap_or(defaults.network_timeout_ms),
        ))
}

fn build_network_settings(network: RawNetworkSettings) -> Result<NetworkSettings, LoadError> {
    let timeout_ms = network.timeout_ms.unwrap_or(DEFAULT_NETWORK_TIMEOUT_MS);
    let timeout = (timeout_ms > 0).then(|| Duration::from_millis(timeout_ms));
    Ok(NetworkSettings { timeout })
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

fn non_empty(value: Option<String>) -> Option<String> {
    value.and_then(|value| {
        let trimmed = value.trim();
        (!trimmed.is_empty()).then(|| trimmed.to_string())
    })
}

#[derive(Debug, Clone, Deserialize, Default)]
#[serde(default)]
struct RawAppSettings {
    id: Option<String>,
    version: Option<String>,
    environment: Option<String>,
    origin: Option<String>,
    api_prefix: Option<String>,
    offline_fallback: Option<String>,
    principal_key: Option<String>,
}

#[derive(Debug, Clone, Deserialize, Default)]
#[serde(default)]
struct RawLimitSettings {
    max_response_bytes: Option<u64>,
    max_total_cache_bytes: Option<u64>,
    breaker_threshold: Option<u32>,
}

#[derive(Debug, Clone, Deserialize, Default)]
#[serde(default)]
struct RawPrecacheSettings {
    main: Option<Vec<String>>,
    #[serde(rename = "static")]
    static_assets: Option<Vec<String>>,
}

/// One route-table entry. `cache` is `main`, `static`, `api` (per-principal),
/// or a literal cache name.
#[derive(Debug, Clone, Deserialize, Default)]
#[serde(default)]
struct RawRoute {
    pattern: Option<String>,
    regex: Option<bool>,
    strategy: Option<String>,
    cache: Option<String>,
    max_age_ms: Option<u64>,
    max_entries: Option<usize>,
    network_timeout_ms: Option<u64>,
}

#[derive(Debug, Clone, Deserialize, Default)]
#[serde(default)]
struct RawNetworkSettings {
    timeout_ms: Option<u64>,
}

#[derive(Debug, Clone, Deserialize, Default)]
#[serde(default)]
struct RawLoggingSettings {
    level: Option<String>,
    json: Option<bool>,
}
