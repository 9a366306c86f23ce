//! In-memory cache storage.
//!
//! Stands in for the host's named-cache store in tests and in the CLI. Each
//! named cache keeps URL → response in insertion order; last writer wins.

use std::sync::{Arc, RwLock};

use async_trait::async_trait;
use dashmap::DashMap;

use crate::domain::CachedResponse;
use crate::runtime::{CacheStorage, CacheStore, RuntimeError};

use super::lock::{rw_read, rw_write};

const SOURCE: &str = "infra::memory";

#[derive(Default)]
pub struct MemoryCache {
    entries: RwLock<Vec<(String, CachedResponse)>>,
}

impl MemoryCache {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn len(&self) -> usize {
        rw_read(&self.entries, SOURCE, "len").len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }
}

#[async_trait]
impl CacheStore for MemoryCache {
    async fn lookup(&self, url: &str) -> Result<Option<CachedResponse>, RuntimeError> {
        Ok(rw_read(&self.entries, SOURCE, "lookup")
            .iter()
            .find(|(key, _)| key == url)
            .map(|(_, response)| response.clone()))
    }

    async fn put(&self, url: &str, response: CachedResponse) -> Result<(), RuntimeError> {
        let mut entries = rw_write(&self.entries, SOURCE, "put");
        match entries.iter_mut().find(|(key, _)| key == url) {
            Some((_, existing)) => *existing = response,
            None => entries.push((url.to_string(), response)),
        }
        Ok(())
    }

    async fn delete(&self, url: &str) -> Result<bool, RuntimeError> {
        let mut entries = rw_write(&self.entries, SOURCE, "delete");
        let before = entries.len();
        entries.retain(|(key, _)| key != url);
        Ok(entries.len() != before)
    }

    async fn keys(&self) -> Result<Vec<String>, RuntimeError> {
        Ok(rw_read(&self.entries, SOURCE, "keys")
            .iter()
            .map(|(key, _)| key.clone())
            .collect())
    }
}

/// Named caches, created lazily on first open.
#[derive(Default)]
pub struct MemoryCacheStorage {
    caches: DashMap<String, Arc<MemoryCache>>,
}

impl MemoryCacheStorage {
    pub fn new() -> Self {
        Self::default()
    }

    /// Direct handle for inspection; does not create the cache.
    pub fn get(&self, name: &str) -> Option<Arc<MemoryCache>> {
        self.caches.get(name).map(|entry| Arc::clone(entry.value()))
    }

    pub fn contains(&self, name: &str) -> bool {
        self.caches.contains_key(name)
    }
}

#[async_trait]
impl CacheStorage for MemoryCacheStorage {
    async fn open(&self, name: &str) -> Result<Arc<dyn CacheStore>, RuntimeError> {
        let cache = self
            .caches
            .entry(name.to_string())
            .or_insert_with(|| Arc::new(MemoryCache::new()))
            .value()
            .clone();
        Ok(cache)
    }

    async fn names(&self) -> Result<Vec<String>, RuntimeError> {
        let mut names: Vec<String> = self.caches.iter().map(|entry| entry.key().clone()).collect();
        names.sort();
        Ok(names)
    }

    async fn delete(&self, name: &str) -> Result<bool, RuntimeError> {
        Ok(self.caches.remove(name).is_some())
    }
}
