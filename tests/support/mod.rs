#![allow(dead_code)]

use std::collections::HashMap;
use std::sync::atomic::{AtomicBool, AtomicUsize, Ordering};
use std::sync::{Arc, Mutex};
use std::time::Duration;

use async_trait::async_trait;
use offline_cache::cache::{
    BufferedTraceSink, CacheEngine, CacheEngineBuilder, CacheNames, EngineConfig, ManualClock,
    TraceRecord,
};
use offline_cache::domain::{CachedResponse, HeaderList, Request, RequestResult};
use offline_cache::infra::host::{LocalClients, LocalRegistration};
use offline_cache::infra::memory::MemoryCacheStorage;
use offline_cache::runtime::{CacheStorage, ClientInfo, FetchError, Network, WorkerRuntime};
use url::Url;

pub const ORIGIN: &str = "https://shop.test";
pub const START_MS: i64 = 1_700_000_000_000;

pub fn origin() -> Url {
    Url::parse(ORIGIN).expect("origin should parse")
}

pub fn request(path: &str) -> Request {
    Request::get(origin().join(path).expect("path should join"))
}

pub fn navigation(path: &str) -> Request {
    request(path).with_header("accept", "text/html,application/xhtml+xml")
}

pub fn bearer(path: &str, token: &str) -> Request {
    request(path).with_header("authorization", format!("Bearer {token}"))
}

pub fn response(status: u16, content_type: &str, body: &str) -> CachedResponse {
    let headers: HeaderList = [("content-type", content_type)].into_iter().collect();
    CachedResponse::new(status, headers, body.to_string())
}

pub fn config() -> EngineConfig {
    let mut config = EngineConfig::new(
        CacheNames::new("shop", "1").expect("cache names should be valid"),
        "test",
        origin(),
    );
    config.principal_key = b"integration-key".to_vec();
    config
}

/// Network double answering from a path table, with failure and latency switches.
#[derive(Default)]
pub struct ScriptedNetwork {
    routes: Mutex<HashMap<String, CachedResponse>>,
    per_token: Mutex<HashMap<(String, String), CachedResponse>>,
    offline: AtomicBool,
    delay: Mutex<Option<Duration>>,
    calls: AtomicUsize,
    seen: Mutex<Vec<String>>,
}

impl ScriptedNetwork {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn respond(&self, path: &str, response: CachedResponse) {
        self.routes
            .lock()
            .expect("routes lock")
            .insert(path.to_string(), response);
    }

    /// Answer `path` differently depending on the bearer token.
    pub fn respond_for(&self, path: &str, token: &str, response: CachedResponse) {
        self.per_token
            .lock()
            .expect("per-token lock")
            .insert((path.to_string(), token.to_string()), response);
    }

    pub fn set_offline(&self, offline: bool) {
        self.offline.store(offline, Ordering::SeqCst);
    }

    pub fn set_delay(&self, delay: Option<Duration>) {
        *self.delay.lock().expect("delay lock") = delay;
    }

    pub fn calls(&self) -> usize {
        self.calls.load(Ordering::SeqCst)
    }

    pub fn seen(&self) -> Vec<String> {
        self.seen.lock().expect("seen lock").clone()
    }
}

#[async_trait]
impl Network for ScriptedNetwork {
    async fn fetch(&self, request: &Request) -> Result<CachedResponse, FetchError> {
        self.calls.fetch_add(1, Ordering::SeqCst);
        self.seen
            .lock()
            .expect("seen lock")
            .push(request.path().to_string());

        let delay = *self.delay.lock().expect("delay lock");
        if let Some(delay) = delay {
            tokio::time::sleep(delay).await;
        }
        if self.offline.load(Ordering::SeqCst) {
            return Err(FetchError::transport("connection refused"));
        }

        let path = request.path().to_string();
        let token = request
            .headers
            .get("authorization")
            .and_then(|value| value.strip_prefix("Bearer "))
            .map(str::to_string);
        if let Some(token) = token
            && let Some(found) = self
                .per_token
                .lock()
                .expect("per-token lock")
                .get(&(path.clone(), token))
        {
            return Ok(found.clone());
        }

        Ok(self
            .routes
            .lock()
            .expect("routes lock")
            .get(&path)
            .cloned()
            .unwrap_or_else(|| response(404, "text/plain", "not found")))
    }
}

/// An engine wired to in-memory host capabilities the test can inspect.
pub struct Harness {
    pub engine: CacheEngine,
    pub network: Arc<ScriptedNetwork>,
    pub storage: Arc<MemoryCacheStorage>,
    pub clients: Arc<LocalClients>,
    pub registration: Arc<LocalRegistration>,
    pub clock: Arc<ManualClock>,
    pub traces: Arc<BufferedTraceSink>,
}

impl Harness {
    pub fn new(config: EngineConfig) -> Self {
        Self::build(config, Vec::new(), |builder| builder)
    }

    pub fn build(
        config: EngineConfig,
        clients: Vec<ClientInfo>,
        customize: impl FnOnce(CacheEngineBuilder) -> CacheEngineBuilder,
    ) -> Self {
        let network = Arc::new(ScriptedNetwork::new());
        let storage = Arc::new(MemoryCacheStorage::new());
        let clients = Arc::new(LocalClients::with_clients(clients));
        let registration = Arc::new(LocalRegistration::new());
        let clock = Arc::new(ManualClock::new(START_MS));
        let traces = Arc::new(BufferedTraceSink::new());

        let runtime = WorkerRuntime::new(
            storage.clone(),
            network.clone(),
            clients.clone(),
            registration.clone(),
        );
        let builder = CacheEngine::builder(config, runtime)
            .clock(clock.clone())
            .trace_sink(traces.clone());
        let engine = customize(builder).build();

        Self {
            engine,
            network,
            storage,
            clients,
            registration,
            clock,
            traces,
        }
    }

    pub async fn send(&self, request: Request) -> RequestResult {
        self.engine
            .intercept(&request)
            .await
            .expect("request should be intercepted")
    }

    pub async fn get(&self, path: &str) -> RequestResult {
        self.send(request(path)).await
    }

    pub async fn stored(&self, cache_name: &str, path: &str) -> Option<CachedResponse> {
        let cache = self.storage.get(cache_name)?;
        let key = request(path).cache_key();
        offline_cache::runtime::CacheStore::lookup(cache.as_ref(), &key)
            .await
            .expect("memory lookup never fails")
    }

    pub async fn cache_keys(&self, cache_name: &str) -> Vec<String> {
        match self.storage.get(cache_name) {
            Some(cache) => offline_cache::runtime::CacheStore::keys(cache.as_ref())
                .await
                .expect("memory keys never fail"),
            None => Vec::new(),
        }
    }

    pub async fn cache_names(&self) -> Vec<String> {
        self.storage
            .names()
            .await
            .expect("memory names never fail")
    }

    pub fn last_trace(&self) -> TraceRecord {
        self.traces
            .drain()
            .pop()
            .expect("at least one trace record")
    }
}
