//! Per-request trace records for an external telemetry sink.

use std::sync::Mutex;

use serde::Serialize;
use tracing::info;

use crate::domain::ResultSource;
use crate::infra::lock::mutex_lock;

pub const TRACE_TYPE: &str = "SW_TRACE";
pub const TRACE_SCHEMA_VERSION: u32 = 1;

const SOURCE: &str = "cache::trace";

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct TraceRecord {
    #[serde(rename = "type")]
    pub kind: &'static str,
    pub schema_version: u32,
    pub trace_id: String,
    pub url: String,
    pub strategy: String,
    pub cache_name: String,
    pub source: ResultSource,
    pub timestamp_ms: i64,
    pub app_id: String,
    pub environment: String,
}

/// Delivery is the sink's concern; the engine only hands records over.
pub trait TraceSink: Send + Sync {
    fn emit(&self, record: &TraceRecord);
}

/// Writes each record as a structured `tracing` event.
#[derive(Debug, Default, Clone, Copy)]
pub struct LogTraceSink;

impl TraceSink for LogTraceSink {
    fn emit(&self, record: &TraceRecord) {
        info!(
            target: "offline_cache::trace",
            trace_id = %record.trace_id,
            url = %record.url,
            strategy = %record.strategy,
            cache = %record.cache_name,
            source = %record.source,
            timestamp_ms = record.timestamp_ms,
            app_id = %record.app_id,
            environment = %record.environment,
            "request traced"
        );
    }
}

/// Keeps records in memory until drained.
#[derive(Debug, Default)]
pub struct BufferedTraceSink {
    records: Mutex<Vec<TraceRecord>>,
}

impl BufferedTraceSink {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn drain(&self) -> Vec<TraceRecord> {
        std::mem::take(&mut *mutex_lock(&self.records, SOURCE, "drain"))
    }

    pub fn len(&self) -> usize {
        mutex_lock(&self.records, SOURCE, "len").len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }
}

impl TraceSink for BufferedTraceSink {
    fn emit(&self, record: &TraceRecord) {
        mutex_lock(&self.records, SOURCE, "emit").push(record.clone());
    }
}

#[cfg(test)]
mod tests {
    use crate::domain::ErrorKind;

    use super::*;

    fn record(source: ResultSource) -> TraceRecord {
        TraceRecord {
            kind: TRACE_TYPE,
            schema_version: TRACE_SCHEMA_VERSION,
            trace_id: "t-1".into(),
            url: "https://app.test/app.js".into(),
            strategy: "CacheFirst".into(),
            cache_name: "shop-static-v3".into(),
            source,
            timestamp_ms: 42,
            app_id: "shop".into(),
            environment: "test".into(),
        }
    }

    #[test]
    fn serializes_with_wire_field_names() {
        let value = serde_json::to_value(record(ResultSource::Error(ErrorKind::CacheMiss))).unwrap();
        assert_eq!(value["type"], "SW_TRACE");
        assert_eq!(value["schemaVersion"], 1);
        assert_eq!(value["cacheName"], "shop-static-v3");
        assert_eq!(value["source"], "ERROR_CACHE_MISS");
        assert_eq!(value["timestampMs"], 42);
    }

    #[test]
    fn buffered_sink_drains_in_order() {
        let sink = BufferedTraceSink::new();
        sink.emit(&record(ResultSource::Network));
        sink.emit(&record(ResultSource::Cache));
        assert_eq!(sink.len(), 2);

        let drained = sink.drain();
        assert_eq!(drained[0].source, ResultSource::Network);
        assert_eq!(drained[1].source, ResultSource::Cache);
        assert!(sink.is_empty());
    }
}
