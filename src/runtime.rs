//! Host capabilities the engine is allowed to use.
//!
//! Everything the engine touches outside its own memory goes through
//! [`WorkerRuntime`]: named cache storage, the network, open clients, and the
//! worker registration. Hosts supply implementations; `crate::infra` ships
//! in-memory and reqwest-backed ones.

use std::sync::Arc;

use async_trait::async_trait;
use serde::Deserialize;
use thiserror::Error;

use crate::domain::{CachedResponse, Request};

#[derive(Debug, Error)]
pub enum FetchError {
    #[error("network request timed out after {timeout_ms}ms")]
    Timeout { timeout_ms: u64 },
    #[error("network request failed: {0}")]
    Transport(String),
    #[error("network request was aborted")]
    Aborted,
}

impl FetchError {
    pub fn transport(message: impl Into<String>) -> Self {
        Self::Transport(message.into())
    }
}

#[derive(Debug, Error)]
pub enum RuntimeError {
    #[error("cache `{cache}` failed: {message}")]
    Cache { cache: String, message: String },
    #[error("client operation failed: {0}")]
    Client(String),
    #[error("registration operation failed: {0}")]
    Registration(String),
    #[error("migration {from} -> {to} failed: {message}")]
    Migration {
        from: String,
        to: String,
        message: String,
    },
    #[error("background sync `{tag}` failed: {message}")]
    Sync { tag: String, message: String },
}

impl RuntimeError {
    pub fn cache(cache: impl Into<String>, message: impl Into<String>) -> Self {
        Self::Cache {
            cache: cache.into(),
            message: message.into(),
        }
    }
}

/// One named cache: URL-keyed stored responses.
#[async_trait]
pub trait CacheStore: Send + Sync {
    async fn lookup(&self, url: &str) -> Result<Option<CachedResponse>, RuntimeError>;
    async fn put(&self, url: &str, response: CachedResponse) -> Result<(), RuntimeError>;
    async fn delete(&self, url: &str) -> Result<bool, RuntimeError>;
    async fn keys(&self) -> Result<Vec<String>, RuntimeError>;
}

/// The set of named caches visible to the worker.
#[async_trait]
pub trait CacheStorage: Send + Sync {
    /// Opens the named cache, creating it when absent.
    async fn open(&self, name: &str) -> Result<Arc<dyn CacheStore>, RuntimeError>;
    async fn names(&self) -> Result<Vec<String>, RuntimeError>;
    async fn delete(&self, name: &str) -> Result<bool, RuntimeError>;
}

#[async_trait]
pub trait Network: Send + Sync {
    async fn fetch(&self, request: &Request) -> Result<CachedResponse, FetchError>;
}

/// A window or tab controlled by the worker.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ClientInfo {
    pub id: String,
    pub url: String,
    pub focused: bool,
}

#[async_trait]
pub trait Clients: Send + Sync {
    async fn list(&self) -> Result<Vec<ClientInfo>, RuntimeError>;
    /// Take control of every open client without waiting for a reload.
    async fn claim(&self) -> Result<(), RuntimeError>;
    async fn navigate(&self, client_id: &str, url: &str) -> Result<(), RuntimeError>;
    async fn focus(&self, client_id: &str) -> Result<(), RuntimeError>;
    async fn open_window(&self, url: &str) -> Result<(), RuntimeError>;
}

/// Notification shown in response to a push message.
#[derive(Debug, Clone, PartialEq, Eq, Deserialize)]
pub struct Notification {
    #[serde(default = "Notification::default_title")]
    pub title: String,
    #[serde(default)]
    pub body: String,
    #[serde(default = "Notification::default_url")]
    pub url: String,
    #[serde(default)]
    pub tag: Option<String>,
}

impl Default for Notification {
    fn default() -> Self {
        Self {
            title: Self::default_title(),
            body: String::new(),
            url: Self::default_url(),
            tag: None,
        }
    }
}

impl Notification {
    fn default_title() -> String {
        "New notification".to_string()
    }

    fn default_url() -> String {
        "/".to_string()
    }
}

#[async_trait]
pub trait Registration: Send + Sync {
    async fn skip_waiting(&self) -> Result<(), RuntimeError>;
    async fn unregister(&self) -> Result<bool, RuntimeError>;
    async fn show_notification(&self, notification: &Notification) -> Result<(), RuntimeError>;
}

/// Receives background-sync tags; the re-send logic lives with the host.
#[async_trait]
pub trait SyncHandler: Send + Sync {
    async fn sync(&self, tag: &str) -> Result<(), RuntimeError>;
}

/// The injected capability bundle standing in for the worker's global scope.
#[derive(Clone)]
pub struct WorkerRuntime {
    pub caches: Arc<dyn CacheStorage>,
    pub network: Arc<dyn Network>,
    pub clients: Arc<dyn Clients>,
    pub registration: Arc<dyn Registration>,
}

impl WorkerRuntime {
    pub fn new(
        caches: Arc<dyn CacheStorage>,
        network: Arc<dyn Network>,
        clients: Arc<dyn Clients>,
        registration: Arc<dyn Registration>,
    ) -> Self {
        Self {
            caches,
            network,
            clients,
            registration,
        }
    }

    pub async fn open_cache(&self, name: &str) -> Result<Arc<dyn CacheStore>, RuntimeError> {
        self.caches.open(name).await
    }

    /// Looks `url` up in one named cache.
    pub async fn match_cache(
        &self,
        name: &str,
        url: &str,
    ) -> Result<Option<CachedResponse>, RuntimeError> {
        self.open_cache(name).await?.lookup(url).await
    }

    pub async fn fetch(&self, request: &Request) -> Result<CachedResponse, FetchError> {
        self.network.fetch(request).await
    }
}
