//! Per-request execution of the five caching strategies.
//!
//! Every strategy is a short sequence over {network attempt, cache lookup,
//! write-back}. Cache maintenance failures are logged and swallowed; only the
//! terminal outcome of a request is encoded in its [`RequestResult`].

use std::sync::{Arc, Mutex};
use std::time::Duration;

use metrics::counter;
use tokio::task::JoinSet;
use tracing::{Instrument, debug, debug_span, instrument, warn};

use crate::domain::outcome::ERROR_KIND_HEADER;
use crate::domain::{
    CachedResponse, ErrorKind, Request, RequestContext, RequestResult, ResultSource,
    synthesize_error,
};
use crate::infra::lock::mutex_lock;
use crate::runtime::{FetchError, WorkerRuntime};

use super::config::{CacheNamespace, CacheStrategyConfig, NamespaceTemplate, Strategy};
use super::eviction::EvictionGovernor;
use super::metrics::{HIT_TOTAL, MISS_TOTAL, NETWORK_ERROR_TOTAL};
use super::principal::PrincipalNamespacer;
use super::ttl::EntryTtlPolicy;
use super::validator::ResponseValidator;

const SOURCE: &str = "cache::strategy";

/// Which eviction mechanisms run after a write-back.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum Eviction {
    EntryCount,
    EntryCountAndBytes,
}

/// The stored offline page: `(cache name, entry url)`.
#[derive(Debug, Clone)]
pub struct OfflinePage {
    pub cache_name: String,
    pub url: String,
}

#[derive(Clone)]
pub struct StrategyExecutor {
    runtime: WorkerRuntime,
    validator: ResponseValidator,
    ttl: EntryTtlPolicy,
    namespacer: PrincipalNamespacer,
    governor: EvictionGovernor,
    api_prefix: Arc<str>,
    offline_page: Option<Arc<OfflinePage>>,
    background: Arc<Mutex<JoinSet<()>>>,
}

impl StrategyExecutor {
    pub fn new(
        runtime: WorkerRuntime,
        validator: ResponseValidator,
        ttl: EntryTtlPolicy,
        namespacer: PrincipalNamespacer,
        governor: EvictionGovernor,
        api_prefix: impl Into<String>,
    ) -> Self {
        Self {
            runtime,
            validator,
            ttl,
            namespacer,
            governor,
            api_prefix: Arc::from(api_prefix.into()),
            offline_page: None,
            background: Arc::new(Mutex::new(JoinSet::new())),
        }
    }

    pub fn with_offline_page(mut self, page: OfflinePage) -> Self {
        self.offline_page = Some(Arc::new(page));
        self
    }

    /// The concrete cache a request reads and writes under `config`.
    ///
    /// Requests under the API prefix always land in a per-principal cache,
    /// even when the route was configured with a fixed name.
    pub fn cache_name(&self, request: &Request, config: &CacheStrategyConfig) -> String {
        match &config.namespace {
            CacheNamespace::PerPrincipal(template) => {
                template.render(&self.namespacer.resolve(request))
            }
            CacheNamespace::Fixed(name) if request.path().starts_with(&*self.api_prefix) => {
                NamespaceTemplate::new(name.as_str()).render(&self.namespacer.resolve(request))
            }
            CacheNamespace::Fixed(name) => name.clone(),
        }
    }

    #[instrument(
        skip_all,
        fields(strategy = %config.strategy, trace_id = %context.trace_id, url = %request.url)
    )]
    pub async fn execute(
        &self,
        request: &Request,
        config: &CacheStrategyConfig,
        context: &RequestContext,
    ) -> RequestResult {
        let cache_name = self.cache_name(request, config);
        let (response, source) = match config.strategy {
            Strategy::NetworkOnly => self.network_only(request).await,
            Strategy::CacheOnly => self.cache_only(request, &cache_name).await,
            Strategy::NetworkFirst => self.network_first(request, config, &cache_name).await,
            Strategy::CacheFirst => self.cache_first(request, config, &cache_name).await,
            Strategy::StaleWhileRevalidate => {
                self.stale_while_revalidate(request, config, &cache_name)
                    .await
            }
        };
        debug!(cache = %cache_name, outcome = %source, "strategy finished");
        RequestResult::new(response, source, self.ttl.now_ms(), context.trace_id.clone())
    }

    /// Waits for every detached background refresh, including ones spawned
    /// while waiting.
    pub async fn settle(&self) {
        loop {
            let mut pending = {
                let mut guard = mutex_lock(&self.background, SOURCE, "settle");
                std::mem::replace(&mut *guard, JoinSet::new())
            };
            if pending.is_empty() {
                return;
            }
            while let Some(joined) = pending.join_next().await {
                if let Err(err) = joined {
                    warn!(error = %err, "background refresh task did not complete");
                }
            }
        }
    }

    pub fn pending_refreshes(&self) -> usize {
        mutex_lock(&self.background, SOURCE, "pending_refreshes").len()
    }

    async fn network_only(&self, request: &Request) -> (CachedResponse, ResultSource) {
        match self.runtime.fetch(request).await {
            Ok(response) => (response, ResultSource::Network),
            Err(err) => {
                record_fetch_error(Strategy::NetworkOnly, &err);
                self.exhausted(ErrorKind::Network, request).await
            }
        }
    }

    async fn cache_only(
        &self,
        request: &Request,
        cache_name: &str,
    ) -> (CachedResponse, ResultSource) {
        match self
            .runtime
            .match_cache(cache_name, &request.cache_key())
            .await
        {
            Ok(Some(entry)) => {
                counter!(HIT_TOTAL, "strategy" => Strategy::CacheOnly.as_str()).increment(1);
                (entry, ResultSource::Cache)
            }
            Ok(None) => {
                counter!(MISS_TOTAL, "strategy" => Strategy::CacheOnly.as_str()).increment(1);
                self.exhausted(ErrorKind::CacheMiss, request).await
            }
            Err(err) => {
                warn!(cache = cache_name, error = %err, "cache lookup failed");
                self.exhausted(ErrorKind::Unknown, request).await
            }
        }
    }

    async fn network_first(
        &self,
        request: &Request,
        config: &CacheStrategyConfig,
        cache_name: &str,
    ) -> (CachedResponse, ResultSource) {
        let key = request.cache_key();
        let strategy = Strategy::NetworkFirst;

        match self.fetch_within(request, config.network_timeout_ms).await {
            Ok(response) if self.admit(&response, request) => {
                self.write_back(cache_name, &key, &response, config, Eviction::EntryCount)
                    .await;
                (response, ResultSource::Network)
            }
            Ok(response) => {
                if let Some(entry) = self.lookup(cache_name, &key, strategy).await {
                    return self.from_cache(entry, config);
                }
                // A server failure with nothing to fall back on is a failed
                // request; any other status is the origin's real answer.
                if response.status >= 500 {
                    self.exhausted(ErrorKind::InvalidResponse, request).await
                } else {
                    (response, ResultSource::Network)
                }
            }
            Err(err) => {
                record_fetch_error(strategy, &err);
                match self.lookup(cache_name, &key, strategy).await {
                    Some(entry) => self.from_cache(entry, config),
                    None => self.exhausted(ErrorKind::Network, request).await,
                }
            }
        }
    }

    async fn cache_first(
        &self,
        request: &Request,
        config: &CacheStrategyConfig,
        cache_name: &str,
    ) -> (CachedResponse, ResultSource) {
        let key = request.cache_key();
        let strategy = Strategy::CacheFirst;

        let cached = match self.lookup(cache_name, &key, strategy).await {
            Some(entry) if !self.ttl.is_expired(&entry, config.max_age_ms) => {
                return (entry, ResultSource::Cache);
            }
            other => other,
        };

        match self.runtime.fetch(request).await {
            Ok(response) => {
                if self.admit(&response, request) {
                    self.write_back(
                        cache_name,
                        &key,
                        &response,
                        config,
                        Eviction::EntryCountAndBytes,
                    )
                    .await;
                }
                (response, ResultSource::Network)
            }
            Err(err) => {
                record_fetch_error(strategy, &err);
                match cached {
                    Some(entry) => (entry, ResultSource::Stale),
                    None => self.exhausted(ErrorKind::Network, request).await,
                }
            }
        }
    }

    async fn stale_while_revalidate(
        &self,
        request: &Request,
        config: &CacheStrategyConfig,
        cache_name: &str,
    ) -> (CachedResponse, ResultSource) {
        let key = request.cache_key();
        let strategy = Strategy::StaleWhileRevalidate;

        if let Some(entry) = self.lookup(cache_name, &key, strategy).await {
            self.spawn_refresh(request.clone(), cache_name.to_string(), config.clone());
            return (entry, ResultSource::Stale);
        }

        match self.runtime.fetch(request).await {
            Ok(response) => {
                if self.admit(&response, request) {
                    self.write_back(
                        cache_name,
                        &key,
                        &response,
                        config,
                        Eviction::EntryCountAndBytes,
                    )
                    .await;
                }
                (response, ResultSource::Network)
            }
            Err(err) => {
                record_fetch_error(strategy, &err);
                self.exhausted(ErrorKind::Network, request).await
            }
        }
    }

    fn spawn_refresh(&self, request: Request, cache_name: String, config: CacheStrategyConfig) {
        let executor = self.clone();
        let span = debug_span!("background_refresh", url = %request.url, cache = %cache_name);
        let mut tasks = mutex_lock(&self.background, SOURCE, "spawn_refresh");
        while tasks.try_join_next().is_some() {}
        tasks.spawn(
            async move {
                executor.refresh(&request, &cache_name, &config).await;
            }
            .instrument(span),
        );
    }

    async fn refresh(&self, request: &Request, cache_name: &str, config: &CacheStrategyConfig) {
        match self.runtime.fetch(request).await {
            Ok(response) => {
                if self.admit(&response, request) {
                    self.write_back(
                        cache_name,
                        &request.cache_key(),
                        &response,
                        config,
                        Eviction::EntryCountAndBytes,
                    )
                    .await;
                }
            }
            Err(err) => {
                counter!(NETWORK_ERROR_TOTAL, "strategy" => "background_refresh").increment(1);
                debug!(error = %err, "background refresh failed");
            }
        }
    }

    async fn fetch_within(
        &self,
        request: &Request,
        timeout_ms: u64,
    ) -> Result<CachedResponse, FetchError> {
        if timeout_ms == 0 {
            return self.runtime.fetch(request).await;
        }
        // Dropping the fetch future on timeout cancels the request.
        match tokio::time::timeout(
            Duration::from_millis(timeout_ms),
            self.runtime.fetch(request),
        )
        .await
        {
            Ok(result) => result,
            Err(_) => Err(FetchError::Timeout { timeout_ms }),
        }
    }

    /// Cache read that treats storage failures as a miss.
    async fn lookup(&self, cache_name: &str, key: &str, strategy: Strategy) -> Option<CachedResponse> {
        let found = match self.runtime.match_cache(cache_name, key).await {
            Ok(found) => found,
            Err(err) => {
                warn!(cache = cache_name, error = %err, "cache lookup failed; treating as miss");
                None
            }
        };
        let metric = if found.is_some() { HIT_TOTAL } else { MISS_TOTAL };
        counter!(metric, "strategy" => strategy.as_str()).increment(1);
        found
    }

    fn from_cache(
        &self,
        entry: CachedResponse,
        config: &CacheStrategyConfig,
    ) -> (CachedResponse, ResultSource) {
        let source = if self.ttl.is_expired(&entry, config.max_age_ms) {
            ResultSource::Stale
        } else {
            ResultSource::Cache
        };
        (entry, source)
    }

    fn admit(&self, response: &CachedResponse, request: &Request) -> bool {
        match self.validator.check(response, Some(request)) {
            Ok(()) => true,
            Err(rejection) => {
                debug!(url = %request.url, %rejection, "response not cached");
                false
            }
        }
    }

    /// Stamps and stores an admitted response, then enforces limits.
    async fn write_back(
        &self,
        cache_name: &str,
        key: &str,
        response: &CachedResponse,
        config: &CacheStrategyConfig,
        eviction: Eviction,
    ) {
        let cache = match self.runtime.open_cache(cache_name).await {
            Ok(cache) => cache,
            Err(err) => {
                warn!(cache = cache_name, error = %err, "failed to open cache for write-back");
                return;
            }
        };
        if let Err(err) = cache.put(key, self.ttl.stamp(response)).await {
            warn!(cache = cache_name, url = key, error = %err, "cache write-back failed");
            return;
        }

        if let Err(err) = self
            .governor
            .enforce_entry_limit(cache.as_ref(), cache_name, config.max_entries)
            .await
        {
            warn!(cache = cache_name, error = %err, "entry-count eviction failed");
        }
        if eviction == Eviction::EntryCountAndBytes
            && let Err(err) = self
                .governor
                .enforce_byte_budget(cache.as_ref(), cache_name)
                .await
        {
            warn!(cache = cache_name, error = %err, "byte-budget eviction failed");
        }
    }

    /// Terminal failure: the cached offline page for navigations, otherwise a
    /// synthesized error response. Cache misses never use the offline page.
    async fn exhausted(&self, kind: ErrorKind, request: &Request) -> (CachedResponse, ResultSource) {
        let source = ResultSource::Error(kind);
        if kind != ErrorKind::CacheMiss
            && request.is_navigation()
            && let Some(mut page) = self.offline_page().await
        {
            page.headers.insert(ERROR_KIND_HEADER, kind.as_str());
            return (page, source);
        }
        (synthesize_error(kind), source)
    }

    async fn offline_page(&self) -> Option<CachedResponse> {
        let page = self.offline_page.as_ref()?;
        match self.runtime.match_cache(&page.cache_name, &page.url).await {
            Ok(found) => found,
            Err(err) => {
                warn!(cache = %page.cache_name, error = %err, "offline page lookup failed");
                None
            }
        }
    }
}

fn record_fetch_error(strategy: Strategy, err: &FetchError) {
    let kind = match err {
        FetchError::Timeout { .. } => "timeout",
        FetchError::Transport(_) => "transport",
        FetchError::Aborted => "aborted",
    };
    counter!(NETWORK_ERROR_TOTAL, "strategy" => strategy.as_str(), "kind" => kind).increment(1);
    debug!(%strategy, error = %err, "network attempt failed");
}
