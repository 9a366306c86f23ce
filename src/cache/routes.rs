//! Ordered route table: first structural match wins.

use regex::Regex;

use super::config::{CacheNamespace, CacheStrategyConfig, NamespaceTemplate, Strategy};
use super::keys::CacheNames;

const MINUTE_MS: u64 = 60 * 1000;
const DAY_MS: u64 = 24 * 60 * MINUTE_MS;

#[derive(Debug, Clone)]
pub enum RoutePattern {
    /// Matches when the path contains the text.
    Literal(String),
    Regex(Regex),
}

impl RoutePattern {
    pub fn matches(&self, path: &str) -> bool {
        match self {
            RoutePattern::Literal(text) => path.contains(text.as_str()),
            RoutePattern::Regex(regex) => regex.is_match(path),
        }
    }

    pub fn as_str(&self) -> &str {
        match self {
            RoutePattern::Literal(text) => text,
            RoutePattern::Regex(regex) => regex.as_str(),
        }
    }
}

impl PartialEq for RoutePattern {
    fn eq(&self, other: &Self) -> bool {
        match (self, other) {
            (RoutePattern::Literal(a), RoutePattern::Literal(b)) => a == b,
            (RoutePattern::Regex(a), RoutePattern::Regex(b)) => a.as_str() == b.as_str(),
            _ => false,
        }
    }
}

#[derive(Debug, Clone, PartialEq)]
pub struct RouteRule {
    pub pattern: RoutePattern,
    pub config: CacheStrategyConfig,
}

impl RouteRule {
    pub fn new(pattern: RoutePattern, config: CacheStrategyConfig) -> Self {
        Self { pattern, config }
    }
}

/// Rules in priority order plus the policy used when none of them match.
#[derive(Debug, Clone)]
pub struct RouteTable {
    rules: Vec<RouteRule>,
    fallback: Option<CacheStrategyConfig>,
}

impl RouteTable {
    pub fn new(rules: Vec<RouteRule>, fallback: CacheStrategyConfig) -> Self {
        Self {
            rules,
            fallback: Some(fallback),
        }
    }

    /// A table with no explicit fallback resolves misses to
    /// [`CacheStrategyConfig::default`].
    pub fn without_fallback(rules: Vec<RouteRule>) -> Self {
        Self {
            rules,
            fallback: None,
        }
    }

    /// Total: every path resolves to exactly one config.
    pub fn resolve(&self, path: &str) -> CacheStrategyConfig {
        self.rules
            .iter()
            .find(|rule| rule.pattern.matches(path))
            .map(|rule| rule.config.clone())
            .or_else(|| self.fallback.clone())
            .unwrap_or_default()
    }

    pub fn rules(&self) -> &[RouteRule] {
        &self.rules
    }

    pub fn fallback(&self) -> Option<&CacheStrategyConfig> {
        self.fallback.as_ref()
    }

    /// The stock table: API via network with per-principal caches, static
    /// assets cache-first, navigations stale-while-revalidate.
    pub fn defaults(names: &CacheNames, api_prefix: &str) -> Self {
        let api = CacheStrategyConfig::new(
            Strategy::NetworkFirst,
            CacheNamespace::PerPrincipal(NamespaceTemplate::new(names.api_prefix())),
        )
        .max_age_ms(5 * MINUTE_MS)
        .max_entries(100)
        .network_timeout_ms(3_000);

        let assets = CacheStrategyConfig::new(
            Strategy::CacheFirst,
            CacheNamespace::Fixed(names.static_assets()),
        )
        .max_age_ms(30 * DAY_MS)
        .max_entries(200);

        let pages = CacheStrategyConfig::new(
            Strategy::StaleWhileRevalidate,
            CacheNamespace::Fixed(names.main()),
        )
        .max_age_ms(DAY_MS)
        .max_entries(50);

        let fallback =
            CacheStrategyConfig::new(Strategy::NetworkFirst, CacheNamespace::Fixed(names.main()))
                .max_age_ms(DAY_MS)
                .max_entries(100)
                .network_timeout_ms(5_000);

        let rules = vec![
            RouteRule::new(RoutePattern::Literal(api_prefix.to_string()), api),
            RouteRule::new(
                RoutePattern::Regex(static_regex(
                    r"\.(?:js|mjs|css|woff2?|ttf|otf|png|jpe?g|gif|svg|webp|avif|ico)$",
                )),
                assets,
            ),
            RouteRule::new(RoutePattern::Regex(static_regex(r"^/[^.]*$")), pages),
        ];

        Self::new(rules, fallback)
    }
}

fn static_regex(pattern: &'static str) -> Regex {
    Regex::new(pattern).expect("built-in route patterns are valid")
}
