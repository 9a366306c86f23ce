use std::sync::Once;

use metrics::{Unit, describe_counter, describe_histogram};
use tracing_error::ErrorLayer;
use tracing_subscriber::{
    EnvFilter, fmt,
    layer::{Layer, SubscriberExt},
    util::SubscriberInitExt,
};

use crate::cache::metrics as names;
use crate::config::{LogFormat, LoggingSettings};

use super::error::InfraError;

static METRIC_DESCRIPTIONS: Once = Once::new();

/// Install a global tracing subscriber using the provided logging settings.
pub fn init(logging: &LoggingSettings) -> Result<(), InfraError> {
    describe_metrics();

    let env_filter = EnvFilter::builder()
        .with_default_directive(logging.level.into())
        .from_env_lossy();

    // Logs go to stderr; stdout is reserved for command output.
    let fmt_layer = match logging.format {
        LogFormat::Json => fmt::layer()
            .json()
            .with_writer(std::io::stderr)
            .with_current_span(true)
            .with_span_list(true)
            .with_target(true)
            .boxed(),
        LogFormat::Compact => fmt::layer()
            .compact()
            .with_writer(std::io::stderr)
            .with_target(true)
            .boxed(),
    };

    tracing_subscriber::registry()
        .with(env_filter)
        .with(ErrorLayer::default())
        .with(fmt_layer)
        .try_init()
        .map_err(|err| {
            InfraError::telemetry(format!("failed to install tracing subscriber: {err}"))
        })
}

pub fn describe_metrics() {
    METRIC_DESCRIPTIONS.call_once(|| {
        describe_counter!(
            names::HIT_TOTAL,
            Unit::Count,
            "Requests answered from a cache entry (fresh or stale)."
        );
        describe_counter!(
            names::MISS_TOTAL,
            Unit::Count,
            "Cache lookups that found no entry."
        );
        describe_counter!(
            names::NETWORK_ERROR_TOTAL,
            Unit::Count,
            "Network fetches that failed or timed out."
        );
        describe_counter!(
            names::EVICT_TOTAL,
            Unit::Count,
            "Cache entries deleted by the eviction governor, labelled by policy."
        );
        describe_counter!(
            names::BREAKER_BYPASS_TOTAL,
            Unit::Count,
            "Requests passed straight to the network while the circuit breaker was open."
        );
        describe_histogram!(
            names::DISPATCH_MS,
            Unit::Milliseconds,
            "End-to-end dispatch latency in milliseconds, labelled by strategy."
        );
    });
}
