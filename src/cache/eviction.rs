//! Entry-count and byte-budget eviction.
//!
//! Both policies order entries by write-time marker, oldest first. Entries
//! without a marker are treated as written at time zero, so they are the
//! first to go under either policy, matching how the TTL policy treats them
//! as expired.

use metrics::counter;
use tracing::{debug, instrument, warn};

use crate::runtime::{CacheStore, RuntimeError};

use super::metrics::EVICT_TOTAL;
use super::ttl::written_at;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum EvictionPolicy {
    EntryCount,
    ByteBudget,
}

impl EvictionPolicy {
    pub fn label(self) -> &'static str {
        match self {
            EvictionPolicy::EntryCount => "entries",
            EvictionPolicy::ByteBudget => "bytes",
        }
    }
}

#[derive(Debug)]
struct Candidate {
    url: String,
    written_at: i64,
    size: u64,
}

#[derive(Debug, Clone, Copy)]
pub struct EvictionGovernor {
    max_total_bytes: u64,
}

impl EvictionGovernor {
    pub fn new(max_total_bytes: u64) -> Self {
        Self { max_total_bytes }
    }

    pub fn max_total_bytes(&self) -> u64 {
        self.max_total_bytes
    }

    /// Deletes the oldest entries until at most `max_entries` remain.
    ///
    /// `max_entries == 0` means unlimited. Returns how many entries were deleted.
    #[instrument(skip(self, cache))]
    pub async fn enforce_entry_limit(
        &self,
        cache: &dyn CacheStore,
        cache_name: &str,
        max_entries: usize,
    ) -> Result<usize, RuntimeError> {
        if max_entries == 0 {
            return Ok(0);
        }
        let keys = cache.keys().await?;
        if keys.len() <= max_entries {
            return Ok(0);
        }

        let excess = keys.len() - max_entries;
        let candidates = collect_candidates(cache, keys).await;
        let mut deleted = 0;
        for candidate in candidates.iter().take(excess) {
            if delete_entry(cache, &candidate.url).await {
                deleted += 1;
            }
        }

        record(EvictionPolicy::EntryCount, cache_name, deleted);
        Ok(deleted)
    }

    /// Deletes the oldest entries until the cache fits in the byte budget.
    ///
    /// Entries that cannot be read are left alone and do not count toward the total.
    #[instrument(skip(self, cache), fields(budget = self.max_total_bytes))]
    pub async fn enforce_byte_budget(
        &self,
        cache: &dyn CacheStore,
        cache_name: &str,
    ) -> Result<usize, RuntimeError> {
        let keys = cache.keys().await?;
        let candidates = collect_candidates(cache, keys).await;

        let mut total: u64 = candidates.iter().map(|c| c.size).sum();
        if total <= self.max_total_bytes {
            return Ok(0);
        }

        let mut deleted = 0;
        for candidate in &candidates {
            if total <= self.max_total_bytes {
                break;
            }
            if delete_entry(cache, &candidate.url).await {
                total = total.saturating_sub(candidate.size);
                deleted += 1;
            }
        }

        record(EvictionPolicy::ByteBudget, cache_name, deleted);
        Ok(deleted)
    }
}

/// Readable entries, oldest first. Ties keep storage order.
async fn collect_candidates(cache: &dyn CacheStore, keys: Vec<String>) -> Vec<Candidate> {
    let mut candidates = Vec::with_capacity(keys.len());
    for url in keys {
        match cache.lookup(&url).await {
            Ok(Some(entry)) => candidates.push(Candidate {
                written_at: written_at(&entry).unwrap_or(0),
                size: entry.size_bytes(),
                url,
            }),
            Ok(None) => {}
            Err(err) => {
                debug!(url = %url, error = %err, "skipping unreadable entry during eviction");
            }
        }
    }
    candidates.sort_by_key(|candidate| candidate.written_at);
    candidates
}

async fn delete_entry(cache: &dyn CacheStore, url: &str) -> bool {
    match cache.delete(url).await {
        Ok(removed) => removed,
        Err(err) => {
            warn!(url, error = %err, "failed to evict cache entry");
            false
        }
    }
}

fn record(policy: EvictionPolicy, cache_name: &str, deleted: usize) {
    if deleted == 0 {
        return;
    }
    debug!(
        policy = policy.label(),
        cache = cache_name,
        deleted,
        "evicted cache entries"
    );
    counter!(EVICT_TOTAL, "policy" => policy.label()).increment(deleted as u64);
}

#[cfg(test)]
mod tests {
    use async_trait::async_trait;

    use crate::cache::ttl::WRITTEN_AT_HEADER;
    use crate::domain::{CachedResponse, HeaderList};
    use crate::infra::memory::MemoryCache;

    use super::*;

    fn entry(written_at: Option<i64>, body: &'static str) -> CachedResponse {
        let mut headers: HeaderList = [("content-type", "text/plain")].into_iter().collect();
        if let Some(ts) = written_at {
            headers.insert(WRITTEN_AT_HEADER, ts.to_string());
        }
        CachedResponse::new(200, headers, body)
    }

    async fn keys(cache: &MemoryCache) -> Vec<String> {
        cache.keys().await.unwrap()
    }

    #[tokio::test]
    async fn entry_limit_keeps_most_recent_writes() {
        let cache = MemoryCache::new();
        // Insert out of timestamp order to prove ordering comes from the marker.
        for (url, ts) in [("/c", 30), ("/a", 10), ("/e", 50), ("/b", 20), ("/d", 40)] {
            cache.put(url, entry(Some(ts), "x")).await.unwrap();
        }

        let governor = EvictionGovernor::new(u64::MAX);
        let deleted = governor.enforce_entry_limit(&cache, "t", 3).await.unwrap();

        assert_eq!(deleted, 2);
        let mut remaining = keys(&cache).await;
        remaining.sort();
        assert_eq!(remaining, vec!["/c", "/d", "/e"]);
    }

    #[tokio::test]
    async fn entry_limit_noop_when_within_bounds_or_unlimited() {
        let cache = MemoryCache::new();
        cache.put("/a", entry(Some(1), "x")).await.unwrap();
        cache.put("/b", entry(Some(2), "x")).await.unwrap();

        let governor = EvictionGovernor::new(u64::MAX);
        assert_eq!(governor.enforce_entry_limit(&cache, "t", 2).await.unwrap(), 0);
        assert_eq!(governor.enforce_entry_limit(&cache, "t", 0).await.unwrap(), 0);
        assert_eq!(cache.len(), 2);
    }

    #[tokio::test]
    async fn unmarked_entries_go_first_under_entry_limit() {
        let cache = MemoryCache::new();
        cache.put("/old", entry(Some(10), "x")).await.unwrap();
        cache.put("/unmarked", entry(None, "x")).await.unwrap();
        cache.put("/new", entry(Some(20), "x")).await.unwrap();

        let governor = EvictionGovernor::new(u64::MAX);
        governor.enforce_entry_limit(&cache, "t", 2).await.unwrap();

        let mut remaining = keys(&cache).await;
        remaining.sort();
        assert_eq!(remaining, vec!["/new", "/old"]);
    }

    #[tokio::test]
    async fn unmarked_entries_go_first_under_byte_budget() {
        let cache = MemoryCache::new();
        cache.put("/old", entry(Some(10), "12345")).await.unwrap();
        cache.put("/unmarked", entry(None, "12345")).await.unwrap();
        cache.put("/new", entry(Some(20), "12345")).await.unwrap();

        let governor = EvictionGovernor::new(10);
        let deleted = governor.enforce_byte_budget(&cache, "t").await.unwrap();

        assert_eq!(deleted, 1);
        let mut remaining = keys(&cache).await;
        remaining.sort();
        assert_eq!(remaining, vec!["/new", "/old"]);
    }

    #[tokio::test]
    async fn byte_budget_deletes_oldest_until_under_budget() {
        let cache = MemoryCache::new();
        cache.put("/a", entry(Some(1), "aaaa")).await.unwrap();
        cache.put("/b", entry(Some(2), "bbbb")).await.unwrap();
        cache.put("/c", entry(Some(3), "cccc")).await.unwrap();
        cache.put("/d", entry(Some(4), "dddd")).await.unwrap();

        let governor = EvictionGovernor::new(9);
        let deleted = governor.enforce_byte_budget(&cache, "t").await.unwrap();

        assert_eq!(deleted, 2);
        let mut remaining = keys(&cache).await;
        remaining.sort();
        assert_eq!(remaining, vec!["/c", "/d"]);
    }

    #[tokio::test]
    async fn byte_budget_prefers_declared_length() {
        let cache = MemoryCache::new();
        let mut declared = entry(Some(1), "tiny");
        declared.headers.insert("content-length", "1000");
        cache.put("/declared", declared).await.unwrap();
        cache.put("/small", entry(Some(2), "tiny")).await.unwrap();

        let governor = EvictionGovernor::new(100);
        governor.enforce_byte_budget(&cache, "t").await.unwrap();
        assert_eq!(keys(&cache).await, vec!["/small"]);
    }

    /// Store where one entry cannot be read back.
    struct Flaky {
        inner: MemoryCache,
        broken: &'static str,
    }

    #[async_trait]
    impl CacheStore for Flaky {
        async fn lookup(&self, url: &str) -> Result<Option<CachedResponse>, RuntimeError> {
            if url == self.broken {
                return Err(RuntimeError::cache("flaky", "entry body unreadable"));
            }
            self.inner.lookup(url).await
        }

        async fn put(&self, url: &str, response: CachedResponse) -> Result<(), RuntimeError> {
            self.inner.put(url, response).await
        }

        async fn delete(&self, url: &str) -> Result<bool, RuntimeError> {
            self.inner.delete(url).await
        }

        async fn keys(&self) -> Result<Vec<String>, RuntimeError> {
            self.inner.keys().await
        }
    }

    #[tokio::test]
    async fn unreadable_entries_are_skipped_not_fatal() {
        let flaky = Flaky {
            inner: MemoryCache::new(),
            broken: "/broken",
        };
        flaky.put("/broken", entry(Some(0), "xxxxxxxx")).await.unwrap();
        flaky.put("/a", entry(Some(1), "aaaa")).await.unwrap();
        flaky.put("/b", entry(Some(2), "bbbb")).await.unwrap();

        let governor = EvictionGovernor::new(4);
        let deleted = governor.enforce_byte_budget(&flaky, "t").await.unwrap();

        assert_eq!(deleted, 1);
        let mut remaining = flaky.keys().await.unwrap();
        remaining.sort();
        assert_eq!(remaining, vec!["/b", "/broken"]);
    }
}
