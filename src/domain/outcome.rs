//! Per-request context and the result handed back to the host.

use std::fmt;

use serde::{Serialize, Serializer};
use uuid::Uuid;

use super::http::{CONTENT_TYPE, CachedResponse, HeaderList};

/// Header naming the error kind on synthesized responses.
pub const ERROR_KIND_HEADER: &str = "x-offline-cache-error";

/// Created fresh for every intercepted request; never persisted.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RequestContext {
    pub trace_id: String,
    pub issued_at_ms: i64,
}

impl RequestContext {
    pub fn new(issued_at_ms: i64) -> Self {
        Self {
            trace_id: Uuid::new_v4().to_string(),
            issued_at_ms,
        }
    }

    pub fn with_trace_id(trace_id: impl Into<String>, issued_at_ms: i64) -> Self {
        Self {
            trace_id: trace_id.into(),
            issued_at_ms,
        }
    }
}

/// Terminal failure taxonomy. None of these are retried by the engine.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum ErrorKind {
    /// Fetch rejected or timed out.
    Network,
    /// `CacheOnly` found nothing.
    CacheMiss,
    /// The network answered with something that failed validation.
    InvalidResponse,
    /// Anything else, e.g. the cache storage itself failing.
    Unknown,
}

impl ErrorKind {
    pub fn as_str(self) -> &'static str {
        match self {
            ErrorKind::Network => "NETWORK_ERROR",
            ErrorKind::CacheMiss => "CACHE_MISS",
            ErrorKind::InvalidResponse => "INVALID_RESPONSE",
            ErrorKind::Unknown => "UNKNOWN",
        }
    }

    fn status(self) -> u16 {
        match self {
            ErrorKind::CacheMiss => 504,
            _ => 503,
        }
    }
}

/// Where the response in a [`RequestResult`] came from.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum ResultSource {
    Cache,
    Network,
    Stale,
    Error(ErrorKind),
}

impl ResultSource {
    pub fn is_error(self) -> bool {
        matches!(self, ResultSource::Error(_))
    }

    pub fn label(self) -> String {
        match self {
            ResultSource::Cache => "CACHE".to_string(),
            ResultSource::Network => "NETWORK".to_string(),
            ResultSource::Stale => "STALE".to_string(),
            ResultSource::Error(kind) => format!("ERROR_{}", kind.as_str()),
        }
    }
}

impl fmt::Display for ResultSource {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.label())
    }
}

impl Serialize for ResultSource {
    fn serialize<S: Serializer>(&self, serializer: S) -> Result<S::Ok, S::Error> {
        serializer.serialize_str(&self.label())
    }
}

/// Produced exactly once per request and forwarded to the caller and the trace sink.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RequestResult {
    pub response: CachedResponse,
    pub source: ResultSource,
    pub timestamp_ms: i64,
    pub trace_id: String,
}

impl RequestResult {
    pub fn new(
        response: CachedResponse,
        source: ResultSource,
        timestamp_ms: i64,
        trace_id: impl Into<String>,
    ) -> Self {
        Self {
            response,
            source,
            timestamp_ms,
            trace_id: trace_id.into(),
        }
    }

    pub fn is_error(&self) -> bool {
        self.source.is_error()
    }
}

/// Plain-text stand-in returned when every fallback path is exhausted.
pub fn synthesize_error(kind: ErrorKind) -> CachedResponse {
    let mut headers = HeaderList::new();
    headers.insert(CONTENT_TYPE, "text/plain; charset=utf-8");
    headers.insert(ERROR_KIND_HEADER, kind.as_str());
    let body = match kind {
        ErrorKind::CacheMiss => "Gateway Timeout: resource is not available offline",
        _ => "Service Unavailable: you appear to be offline",
    };
    CachedResponse::new(kind.status(), headers, body)
}
