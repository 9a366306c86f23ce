//! Write-time markers and expiry checks.
//!
//! Every stored entry carries [`WRITTEN_AT_HEADER`] with the write time in
//! Unix milliseconds. An entry without a readable marker is always expired.

use std::sync::Arc;
use std::sync::atomic::{AtomicI64, Ordering};

use time::OffsetDateTime;

use crate::domain::CachedResponse;

pub const WRITTEN_AT_HEADER: &str = "x-offline-cache-written-at";

/// Source of "now" in Unix milliseconds.
pub trait Clock: Send + Sync {
    fn now_ms(&self) -> i64;
}

#[derive(Debug, Default, Clone, Copy)]
pub struct SystemClock;

impl Clock for SystemClock {
    fn now_ms(&self) -> i64 {
        (OffsetDateTime::now_utc().unix_timestamp_nanos() / 1_000_000) as i64
    }
}

/// Hand-driven clock for deterministic tests and replays.
#[derive(Debug, Default)]
pub struct ManualClock {
    now_ms: AtomicI64,
}

impl ManualClock {
    pub fn new(now_ms: i64) -> Self {
        Self {
            now_ms: AtomicI64::new(now_ms),
        }
    }

    pub fn set(&self, now_ms: i64) {
        self.now_ms.store(now_ms, Ordering::SeqCst);
    }

    pub fn advance(&self, delta_ms: i64) {
        self.now_ms.fetch_add(delta_ms, Ordering::SeqCst);
    }
}

impl Clock for ManualClock {
    fn now_ms(&self) -> i64 {
        self.now_ms.load(Ordering::SeqCst)
    }
}

/// Reads the write-time marker, if present and parsable.
pub fn written_at(entry: &CachedResponse) -> Option<i64> {
    entry
        .header(WRITTEN_AT_HEADER)
        .and_then(|value| value.trim().parse().ok())
}

#[derive(Clone)]
pub struct EntryTtlPolicy {
    clock: Arc<dyn Clock>,
}

impl EntryTtlPolicy {
    pub fn new(clock: Arc<dyn Clock>) -> Self {
        Self { clock }
    }

    pub fn now_ms(&self) -> i64 {
        self.clock.now_ms()
    }

    /// Copy of `response` carrying the current time as its write-time marker.
    pub fn stamp(&self, response: &CachedResponse) -> CachedResponse {
        let mut stamped = response.clone();
        stamped
            .headers
            .insert(WRITTEN_AT_HEADER, self.clock.now_ms().to_string());
        stamped
    }

    pub fn is_expired(&self, entry: &CachedResponse, max_age_ms: u64) -> bool {
        match written_at(entry) {
            Some(marker) => {
                let age = self.clock.now_ms().saturating_sub(marker);
                age > 0 && age as u64 > max_age_ms
            }
            None => true,
        }
    }
}
