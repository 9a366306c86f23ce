//! Offline response cache.
//!
//! Intercepted GET requests are routed to one of five strategies
//! (`NetworkFirst`, `CacheFirst`, `StaleWhileRevalidate`, `NetworkOnly`,
//! `CacheOnly`) that decide between named caches and the network:
//!
//! - **Routing**: an ordered table of literal/regex rules with a dedicated fallback.
//! - **Freshness**: entries carry a write-time marker; no marker means expired.
//! - **Limits**: entry-count and byte-budget eviction, oldest marker first.
//! - **Isolation**: API responses live in per-principal caches keyed by an HMAC
//!   of the bearer credential.
//! - **Health**: a fail-open circuit breaker stops interception after a run of
//!   error results.
//!
//! [`CacheEngine`] ties these together and exposes the worker event hooks.

mod breaker;
mod config;
mod engine;
mod eviction;
mod keys;
mod lifecycle;
pub mod metrics;
mod principal;
mod routes;
mod strategy;
mod trace;
mod ttl;
mod validator;

pub use breaker::{CircuitBreakerState, HealthCircuitBreaker};
pub use config::{
    CacheNamespace, CacheStrategyConfig, DEFAULT_API_PREFIX, DEFAULT_BREAKER_THRESHOLD,
    DEFAULT_MAX_RESPONSE_BYTES, DEFAULT_MAX_TOTAL_CACHE_BYTES, EngineConfig, EngineLimits,
    NamespaceTemplate, PrecacheManifest, Strategy,
};
pub use engine::{CacheEngine, CacheEngineBuilder, ClickAction, should_intercept};
pub use eviction::{EvictionGovernor, EvictionPolicy};
pub use keys::CacheNames;
pub use lifecycle::{
    ActivationReport, DecommissionReport, InstallReport, LifecycleManager, LifecycleStage,
    MigrationContext, MigrationRegistry,
};
pub use principal::{PUBLIC_SUFFIX, PrincipalNamespacer, bearer_credential};
pub use routes::{RoutePattern, RouteRule, RouteTable};
pub use strategy::{OfflinePage, StrategyExecutor};
pub use trace::{
    BufferedTraceSink, LogTraceSink, TRACE_SCHEMA_VERSION, TRACE_TYPE, TraceRecord, TraceSink,
};
pub use ttl::{Clock, EntryTtlPolicy, ManualClock, SystemClock, WRITTEN_AT_HEADER, written_at};
pub use validator::{Rejection, ResponseValidator};
