//! Commands behind the `offline-cache` binary.
//!
//! Output goes to the supplied writer as JSON lines; logs go to stderr.

use std::io::Write;
use std::sync::Arc;

use serde_json::json;
use tracing::{info, warn};

use crate::cache::{
    BufferedTraceSink, CacheEngine, CacheNamespace, CacheStrategyConfig, DecommissionReport,
    RoutePattern,
};
use crate::config::{FetchArgs, ResolveArgs, Settings};
use crate::domain::Request;
use crate::domain::http::{ACCEPT, AUTHORIZATION};
use crate::infra::host::{LocalClients, LocalRegistration};
use crate::infra::memory::MemoryCacheStorage;
use crate::infra::network::HttpNetwork;
use crate::runtime::{Network, WorkerRuntime};

use super::error::AppError;

/// In-memory caches, recording clients and registration, and the given network.
pub fn local_runtime(network: Arc<dyn Network>) -> WorkerRuntime {
    WorkerRuntime::new(
        Arc::new(MemoryCacheStorage::new()),
        network,
        Arc::new(LocalClients::new()),
        Arc::new(LocalRegistration::new()),
    )
}

pub fn run_resolve(
    settings: &Settings,
    args: &ResolveArgs,
    out: &mut dyn Write,
) -> Result<(), AppError> {
    let path = args.path.trim();
    if !path.starts_with('/') {
        return Err(AppError::validation(format!(
            "path `{path}` must start with `/`"
        )));
    }

    let routes = &settings.engine.routes;
    let matched = routes
        .rules()
        .iter()
        .find(|rule| rule.pattern.matches(path))
        .map(|rule| match &rule.pattern {
            RoutePattern::Literal(text) => json!({ "literal": text }),
            RoutePattern::Regex(regex) => json!({ "regex": regex.as_str() }),
        });
    let config = routes.resolve(path);

    let line = json!({
        "path": path,
        "rule": matched,
        "config": describe_config(&config),
    });
    write_line(out, &line)
}

fn describe_config(config: &CacheStrategyConfig) -> serde_json::Value {
    let per_principal = matches!(config.namespace, CacheNamespace::PerPrincipal(_));
    json!({
        "strategy": config.strategy.as_str(),
        "cacheName": config.namespace.describe(),
        "perPrincipal": per_principal,
        "maxAgeMs": config.max_age_ms,
        "maxEntries": config.max_entries,
        "networkTimeoutMs": config.network_timeout_ms,
    })
}

/// Installs and activates against the real network, then dispatches each URL.
pub async fn run_fetch(
    settings: &Settings,
    args: &FetchArgs,
    out: &mut dyn Write,
) -> Result<(), AppError> {
    let network = HttpNetwork::new(settings.network.timeout)?;
    let sink = Arc::new(BufferedTraceSink::new());
    let engine = CacheEngine::builder(settings.engine.clone(), local_runtime(Arc::new(network)))
        .trace_sink(sink.clone())
        .build();

    let install = engine.on_install().await?;
    let activation = engine.on_activate().await?;
    info!(
        precached = install.cached,
        precache_failed = install.failed,
        swept = activation.deleted_caches.len(),
        "engine ready"
    );

    fetch_all(&engine, &sink, args, out).await?;
    if args.decommission {
        run_decommission(&engine, out).await?;
    }
    Ok(())
}

/// Dispatches every URL in `args` through `engine`, writing one trace record per
/// intercepted request.
pub async fn fetch_all(
    engine: &CacheEngine,
    sink: &BufferedTraceSink,
    args: &FetchArgs,
    out: &mut dyn Write,
) -> Result<(), AppError> {
    let origin = &engine.config().origin;
    let mut requests = Vec::with_capacity(args.urls.len());
    for raw in &args.urls {
        let url = origin
            .join(raw)
            .map_err(|err| AppError::validation(format!("`{raw}` is not a valid url: {err}")))?;
        let mut request = Request::get(url).with_header(ACCEPT, "*/*");
        if let Some(token) = args.bearer.as_deref() {
            request = request.with_header(AUTHORIZATION, format!("Bearer {token}"));
        }
        requests.push(request);
    }

    for round in 1..=args.rounds {
        for request in &requests {
            if engine.intercept(request).await.is_none() {
                warn!(round, url = %request.url, "not intercepted; outside origin or not a plain GET");
                continue;
            }
            for record in sink.drain() {
                write_line(out, &serde_json::to_value(&record).map_err(to_unexpected)?)?;
            }
        }
        // Let background refreshes land before the next round reads the caches.
        engine.settle().await;
    }

    let breaker = engine.breaker_state();
    info!(
        consecutive_errors = breaker.consecutive_errors,
        "fetch complete"
    );
    Ok(())
}

/// Tears down the caches `engine` has written so far and reports what was removed.
pub async fn run_decommission(
    engine: &CacheEngine,
    out: &mut dyn Write,
) -> Result<DecommissionReport, AppError> {
    let report = engine.on_decommission().await;
    let line = json!({
        "appId": engine.config().names.app_id(),
        "deletedCaches": report.deleted_caches,
        "reloadedClients": report.reloaded_clients,
        "unregistered": report.unregistered,
        "alreadyDecommissioned": report.already_decommissioned,
    });
    write_line(out, &line)?;
    Ok(report)
}

fn write_line(out: &mut dyn Write, value: &serde_json::Value) -> Result<(), AppError> {
    writeln!(out, "{value}").map_err(to_unexpected)
}

fn to_unexpected(err: impl std::fmt::Display) -> AppError {
    AppError::unexpected(err.to_string())
}
