//! Strategy configuration and engine limits.

use std::fmt;
use std::str::FromStr;

use url::Url;

use super::keys::CacheNames;
use super::routes::RouteTable;

pub const DEFAULT_MAX_RESPONSE_BYTES: u64 = 10 * 1024 * 1024;
pub const DEFAULT_MAX_TOTAL_CACHE_BYTES: u64 = 100 * 1024 * 1024;
pub const DEFAULT_BREAKER_THRESHOLD: u32 = 50;
pub const DEFAULT_API_PREFIX: &str = "/api/";

/// One of the five request-handling policies.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum Strategy {
    NetworkFirst,
    CacheFirst,
    StaleWhileRevalidate,
    NetworkOnly,
    CacheOnly,
}

impl Strategy {
    pub fn as_str(self) -> &'static str {
        match self {
            Strategy::NetworkFirst => "NetworkFirst",
            Strategy::CacheFirst => "CacheFirst",
            Strategy::StaleWhileRevalidate => "StaleWhileRevalidate",
            Strategy::NetworkOnly => "NetworkOnly",
            Strategy::CacheOnly => "CacheOnly",
        }
    }
}

impl fmt::Display for Strategy {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for Strategy {
    type Err = String;

    /// Accepts `NetworkFirst`, `network_first`, and `network-first` spellings.
    fn from_str(value: &str) -> Result<Self, Self::Err> {
        let normalized: String = value
            .chars()
            .filter(|c| *c != '_' && *c != '-')
            .flat_map(char::to_lowercase)
            .collect();
        match normalized.as_str() {
            "networkfirst" => Ok(Strategy::NetworkFirst),
            "cachefirst" => Ok(Strategy::CacheFirst),
            "stalewhilerevalidate" => Ok(Strategy::StaleWhileRevalidate),
            "networkonly" => Ok(Strategy::NetworkOnly),
            "cacheonly" => Ok(Strategy::CacheOnly),
            _ => Err(format!("unknown strategy `{value}`")),
        }
    }
}

/// Maps a principal suffix to a concrete cache name.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct NamespaceTemplate {
    prefix: String,
}

impl NamespaceTemplate {
    pub fn new(prefix: impl Into<String>) -> Self {
        Self {
            prefix: prefix.into(),
        }
    }

    pub fn render(&self, principal_suffix: &str) -> String {
        format!("{}-{}", self.prefix, principal_suffix)
    }

    pub fn prefix(&self) -> &str {
        &self.prefix
    }
}

/// Which cache a route reads and writes.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum CacheNamespace {
    Fixed(String),
    PerPrincipal(NamespaceTemplate),
}

impl CacheNamespace {
    /// Human-readable form; per-principal names show their template.
    pub fn describe(&self) -> String {
        match self {
            CacheNamespace::Fixed(name) => name.clone(),
            CacheNamespace::PerPrincipal(template) => template.render("{principal}"),
        }
    }
}

/// Immutable once resolved for a request.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct CacheStrategyConfig {
    pub strategy: Strategy,
    pub namespace: CacheNamespace,
    pub max_age_ms: u64,
    /// Zero disables the entry-count limit.
    pub max_entries: usize,
    /// Zero disables the network timeout.
    pub network_timeout_ms: u64,
}

impl CacheStrategyConfig {
    pub fn new(strategy: Strategy, namespace: CacheNamespace) -> Self {
        Self {
            strategy,
            namespace,
            max_age_ms: 0,
            max_entries: 0,
            network_timeout_ms: 0,
        }
    }

    pub fn max_age_ms(mut self, value: u64) -> Self {
        self.max_age_ms = value;
        self
    }

    pub fn max_entries(mut self, value: usize) -> Self {
        self.max_entries = value;
        self
    }

    pub fn network_timeout_ms(mut self, value: u64) -> Self {
        self.network_timeout_ms = value;
        self
    }
}

/// Last-resort policy used only when a route table was built without a fallback.
impl Default for CacheStrategyConfig {
    fn default() -> Self {
        CacheStrategyConfig::new(
            Strategy::NetworkFirst,
            CacheNamespace::Fixed("offline-cache-default".to_string()),
        )
        .max_age_ms(24 * 60 * 60 * 1000)
        .max_entries(50)
        .network_timeout_ms(5_000)
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct EngineLimits {
    pub max_response_bytes: u64,
    pub max_total_cache_bytes: u64,
    pub breaker_threshold: u32,
}

impl Default for EngineLimits {
    fn default() -> Self {
        Self {
            max_response_bytes: DEFAULT_MAX_RESPONSE_BYTES,
            max_total_cache_bytes: DEFAULT_MAX_TOTAL_CACHE_BYTES,
            breaker_threshold: DEFAULT_BREAKER_THRESHOLD,
        }
    }
}

/// URLs fetched into the `main` and `static` caches during install.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct PrecacheManifest {
    pub main: Vec<String>,
    pub static_assets: Vec<String>,
}

/// Everything the engine needs at startup. There is no runtime reconfiguration.
#[derive(Debug, Clone)]
pub struct EngineConfig {
    pub names: CacheNames,
    pub environment: String,
    pub origin: Url,
    pub api_prefix: String,
    pub limits: EngineLimits,
    pub routes: RouteTable,
    pub precache: PrecacheManifest,
    /// Path of the offline page inside the `main` cache.
    pub offline_fallback: Option<String>,
    pub principal_key: Vec<u8>,
}

impl EngineConfig {
    /// Config with the default route table and limits.
    pub fn new(names: CacheNames, environment: impl Into<String>, origin: Url) -> Self {
        let routes = RouteTable::defaults(&names, DEFAULT_API_PREFIX);
        Self {
            names,
            environment: environment.into(),
            origin,
            api_prefix: DEFAULT_API_PREFIX.to_string(),
            limits: EngineLimits::default(),
            routes,
            precache: PrecacheManifest::default(),
            offline_fallback: None,
            principal_key: Vec::new(),
        }
    }

    pub fn is_api_path(&self, path: &str) -> bool {
        path.starts_with(&self.api_prefix)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn strategy_parses_common_spellings() {
        assert_eq!(
            "NetworkFirst".parse::<Strategy>(),
            Ok(Strategy::NetworkFirst)
        );
        assert_eq!(
            "stale_while_revalidate".parse::<Strategy>(),
            Ok(Strategy::StaleWhileRevalidate)
        );
        assert_eq!("cache-only".parse::<Strategy>(), Ok(Strategy::CacheOnly));
        assert!("network-sometimes".parse::<Strategy>().is_err());
    }

    #[test]
    fn template_renders_principal_suffix() {
        let template = NamespaceTemplate::new("shop-api-v3");
        assert_eq!(template.render("public"), "shop-api-v3-public");
        assert_eq!(
            CacheNamespace::PerPrincipal(template).describe(),
            "shop-api-v3-{principal}"
        );
    }

    #[test]
    fn default_limits_match_documented_caps() {
        let limits = EngineLimits::default();
        assert_eq!(limits.max_response_bytes, 10 * 1024 * 1024);
        assert_eq!(limits.max_total_cache_bytes, 100 * 1024 * 1024);
        assert_eq!(limits.breaker_threshold, 50);
    }
}
