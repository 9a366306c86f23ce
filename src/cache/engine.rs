//! The engine facade the host binds its worker events to.
//!
//! Request path: interception filter, route resolution, circuit-breaker gate,
//! strategy execution, then breaker accounting and one trace record.

use std::collections::HashMap;
use std::sync::Arc;
use std::time::Instant;

use metrics::{counter, histogram};
use tracing::{debug, info, instrument, warn};
use url::Url;

use crate::domain::{
    DomainError, ErrorKind, Request, RequestContext, RequestResult, ResultSource,
    synthesize_error,
};
use crate::domain::http::RANGE;
use crate::runtime::{Notification, RuntimeError, SyncHandler, WorkerRuntime};

use super::breaker::{CircuitBreakerState, HealthCircuitBreaker};
use super::config::{CacheStrategyConfig, EngineConfig};
use super::eviction::EvictionGovernor;
use super::lifecycle::{
    ActivationReport, DecommissionReport, InstallReport, LifecycleManager, LifecycleStage,
    MigrationRegistry,
};
use super::metrics::{BREAKER_BYPASS_TOTAL, DISPATCH_MS};
use super::principal::PrincipalNamespacer;
use super::strategy::{OfflinePage, StrategyExecutor};
use super::trace::{LogTraceSink, TRACE_SCHEMA_VERSION, TRACE_TYPE, TraceRecord, TraceSink};
use super::ttl::{Clock, EntryTtlPolicy, SystemClock};
use super::validator::ResponseValidator;

/// Strategy label recorded while the breaker routes around the strategies.
const BYPASS_LABEL: &str = "Bypass";

/// Same-origin http(s) GET without a `range` header.
pub fn should_intercept(request: &Request, origin: &Url) -> bool {
    matches!(request.url.scheme(), "http" | "https")
        && request.is_get()
        && !request.headers.contains(RANGE)
        && request.url.origin() == origin.origin()
}

/// What a notification click did.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ClickAction {
    Focused { client_id: String },
    Opened { url: String },
}

pub struct CacheEngineBuilder {
    config: EngineConfig,
    runtime: WorkerRuntime,
    clock: Arc<dyn Clock>,
    trace_sink: Arc<dyn TraceSink>,
    migrations: MigrationRegistry,
    sync_handlers: HashMap<String, Arc<dyn SyncHandler>>,
}

impl CacheEngineBuilder {
    pub fn clock(mut self, clock: Arc<dyn Clock>) -> Self {
        self.clock = clock;
        self
    }

    pub fn trace_sink(mut self, sink: Arc<dyn TraceSink>) -> Self {
        self.trace_sink = sink;
        self
    }

    pub fn migrations(mut self, migrations: MigrationRegistry) -> Self {
        self.migrations = migrations;
        self
    }

    pub fn sync_handler(mut self, tag: impl Into<String>, handler: Arc<dyn SyncHandler>) -> Self {
        self.sync_handlers.insert(tag.into(), handler);
        self
    }

    pub fn build(self) -> CacheEngine {
        let config = self.config;
        let ttl = EntryTtlPolicy::new(self.clock);
        let validator =
            ResponseValidator::new(config.limits.max_response_bytes, config.api_prefix.clone());

        let mut executor = StrategyExecutor::new(
            self.runtime.clone(),
            validator.clone(),
            ttl.clone(),
            PrincipalNamespacer::new(config.principal_key.clone()),
            EvictionGovernor::new(config.limits.max_total_cache_bytes),
            config.api_prefix.clone(),
        );
        if let Some(path) = &config.offline_fallback {
            match config.origin.join(path) {
                Ok(url) => {
                    executor = executor.with_offline_page(OfflinePage {
                        cache_name: config.names.main(),
                        url: url.to_string(),
                    });
                }
                Err(err) => warn!(path = %path, error = %err, "ignoring invalid offline fallback path"),
            }
        }

        let lifecycle = LifecycleManager::new(
            self.runtime.clone(),
            config.names.clone(),
            config.origin.clone(),
            config.precache.clone(),
            validator,
            ttl.clone(),
        )
        .with_migrations(self.migrations);

        CacheEngine {
            breaker: HealthCircuitBreaker::new(config.limits.breaker_threshold),
            config: Arc::new(config),
            runtime: self.runtime,
            executor,
            lifecycle,
            ttl,
            trace_sink: self.trace_sink,
            sync_handlers: self.sync_handlers,
        }
    }
}

pub struct CacheEngine {
    config: Arc<EngineConfig>,
    runtime: WorkerRuntime,
    executor: StrategyExecutor,
    breaker: HealthCircuitBreaker,
    lifecycle: LifecycleManager,
    ttl: EntryTtlPolicy,
    trace_sink: Arc<dyn TraceSink>,
    sync_handlers: HashMap<String, Arc<dyn SyncHandler>>,
}

impl CacheEngine {
    pub fn builder(config: EngineConfig, runtime: WorkerRuntime) -> CacheEngineBuilder {
        CacheEngineBuilder {
            config,
            runtime,
            clock: Arc::new(SystemClock),
            trace_sink: Arc::new(LogTraceSink),
            migrations: MigrationRegistry::new(),
            sync_handlers: HashMap::new(),
        }
    }

    pub fn new(config: EngineConfig, runtime: WorkerRuntime) -> Self {
        Self::builder(config, runtime).build()
    }

    pub fn config(&self) -> &EngineConfig {
        &self.config
    }

    pub fn should_intercept(&self, request: &Request) -> bool {
        should_intercept(request, &self.config.origin)
    }

    pub fn resolve(&self, path: &str) -> CacheStrategyConfig {
        self.config.routes.resolve(path)
    }

    /// The cache `request` would read and write under its resolved route.
    pub fn cache_name_for(&self, request: &Request) -> String {
        self.executor
            .cache_name(request, &self.resolve(request.path()))
    }

    pub fn breaker_state(&self) -> CircuitBreakerState {
        self.breaker.state()
    }

    pub fn stage(&self) -> LifecycleStage {
        self.lifecycle.stage()
    }

    /// Entry point for the host's fetch hook. Returns `None` for requests the
    /// engine must not touch; the host then performs them itself.
    ///
    /// A terminated or decommissioned worker passes everything through.
    pub async fn intercept(&self, request: &Request) -> Option<RequestResult> {
        let stage = self.stage();
        if stage.is_terminal() {
            debug!(url = %request.url, %stage, "worker retired; request not intercepted");
            return None;
        }
        if !self.should_intercept(request) {
            debug!(url = %request.url, method = %request.method, "request not intercepted");
            return None;
        }
        Some(self.dispatch(request).await)
    }

    /// Resolves the route and handles the request with a fresh context.
    pub async fn dispatch(&self, request: &Request) -> RequestResult {
        let config = self.resolve(request.path());
        let context = RequestContext::new(self.ttl.now_ms());
        self.handle_request(request, &context, &config).await
    }

    #[instrument(
        skip_all,
        fields(trace_id = %context.trace_id, url = %request.url, strategy = %config.strategy)
    )]
    pub async fn handle_request(
        &self,
        request: &Request,
        context: &RequestContext,
        config: &CacheStrategyConfig,
    ) -> RequestResult {
        let started_at = Instant::now();
        let cache_name = self.executor.cache_name(request, config);

        let (result, strategy) = if self.breaker.is_open() {
            counter!(BREAKER_BYPASS_TOTAL).increment(1);
            (self.bypass(request, context).await, BYPASS_LABEL)
        } else {
            (
                self.executor.execute(request, config, context).await,
                config.strategy.as_str(),
            )
        };

        self.breaker.record(&result);
        self.trace_sink.emit(&TraceRecord {
            kind: TRACE_TYPE,
            schema_version: TRACE_SCHEMA_VERSION,
            trace_id: result.trace_id.clone(),
            url: request.url.to_string(),
            strategy: strategy.to_string(),
            cache_name,
            source: result.source,
            timestamp_ms: result.timestamp_ms,
            app_id: self.config.names.app_id().to_string(),
            environment: self.config.environment.clone(),
        });
        histogram!(DISPATCH_MS, "strategy" => strategy)
            .record(started_at.elapsed().as_secs_f64() * 1000.0);

        result
    }

    /// Straight to the network, no cache involvement.
    async fn bypass(&self, request: &Request, context: &RequestContext) -> RequestResult {
        let (response, source) = match self.runtime.fetch(request).await {
            Ok(response) => (response, ResultSource::Network),
            Err(err) => {
                debug!(error = %err, "bypassed fetch failed");
                (
                    synthesize_error(ErrorKind::Network),
                    ResultSource::Error(ErrorKind::Network),
                )
            }
        };
        RequestResult::new(
            response,
            source,
            self.ttl.now_ms(),
            context.trace_id.clone(),
        )
    }

    pub async fn on_install(&self) -> Result<InstallReport, DomainError> {
        self.lifecycle.install().await
    }

    pub async fn on_activate(&self) -> Result<ActivationReport, DomainError> {
        self.lifecycle.activate().await
    }

    /// Lets in-flight refreshes finish first so none of them writes into a
    /// cache after it has been deleted.
    pub async fn on_decommission(&self) -> DecommissionReport {
        self.settle().await;
        self.lifecycle.decommission().await
    }

    pub fn on_terminate(&self) -> Result<(), DomainError> {
        self.lifecycle.terminate()
    }

    /// Shows a notification for a push message.
    ///
    /// The payload is JSON with optional `title`, `body`, `url`, and `tag`.
    /// A payload that is not JSON becomes the notification body.
    pub async fn on_push(&self, payload: &str) -> Result<Notification, RuntimeError> {
        let notification = parse_push_payload(payload);
        self.runtime
            .registration
            .show_notification(&notification)
            .await?;
        Ok(notification)
    }

    /// Focuses a client already showing `url`, or opens a new window at it.
    pub async fn on_notification_click(&self, url: &str) -> Result<ClickAction, RuntimeError> {
        let target = self
            .config
            .origin
            .join(url)
            .map(String::from)
            .unwrap_or_else(|_| url.to_string());

        let clients = self.runtime.clients.list().await?;
        if let Some(client) = clients.into_iter().find(|client| client.url == target) {
            self.runtime.clients.focus(&client.id).await?;
            return Ok(ClickAction::Focused {
                client_id: client.id,
            });
        }
        self.runtime.clients.open_window(&target).await?;
        Ok(ClickAction::Opened { url: target })
    }

    /// Forwards a sync tag to its handler. Returns `false` for unknown tags.
    pub async fn on_background_sync(&self, tag: &str) -> Result<bool, RuntimeError> {
        let Some(handler) = self.sync_handlers.get(tag) else {
            debug!(tag, "no handler registered for sync tag");
            return Ok(false);
        };
        handler.sync(tag).await.map_err(|err| match err {
            RuntimeError::Sync { .. } => err,
            other => RuntimeError::Sync {
                tag: tag.to_string(),
                message: other.to_string(),
            },
        })?;
        info!(tag, "background sync handled");
        Ok(true)
    }

    /// Waits for detached background refreshes.
    pub async fn settle(&self) {
        self.executor.settle().await;
    }
}

fn parse_push_payload(payload: &str) -> Notification {
    let trimmed = payload.trim();
    if trimmed.is_empty() {
        return Notification::default();
    }
    serde_json::from_str(trimmed).unwrap_or_else(|err| {
        debug!(error = %err, "push payload is not json; using it as the body");
        Notification {
            body: trimmed.to_string(),
            ..Notification::default()
        }
    })
}
