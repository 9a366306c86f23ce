//! Metric names emitted by the engine.

pub const HIT_TOTAL: &str = "offline_cache_hit_total";
pub const MISS_TOTAL: &str = "offline_cache_miss_total";
pub const NETWORK_ERROR_TOTAL: &str = "offline_cache_network_error_total";
pub const EVICT_TOTAL: &str = "offline_cache_evict_total";
pub const BREAKER_BYPASS_TOTAL: &str = "offline_cache_breaker_bypass_total";
pub const DISPATCH_MS: &str = "offline_cache_dispatch_ms";
