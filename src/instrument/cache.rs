//! Traced cache wrapper.
//!
//! Every call opens a client child span, records
//! `cache_operation_duration_seconds{operation,hit}` and updates the
//! in-process statistics.

use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;
use std::time::{Duration, Instant};

use serde::Serialize;
use tracing::warn;

use crate::domain::ports::CacheBackend;
use crate::error::Result;
use crate::metrics::{names, MetricsRecorder};
use crate::tracer::{Span, SpanKind};

/// Keys longer than this are truncated in span attributes.
pub const MAX_KEY_ATTRIBUTE_LEN: usize = 128;

/// Counters for cache activity since startup.
#[derive(Debug, Default)]
pub struct CacheStats {
    hits: AtomicU64,
    misses: AtomicU64,
    sets: AtomicU64,
    deletes: AtomicU64,
    errors: AtomicU64,
    operations: AtomicU64,
    total_time_us: AtomicU64,
}

#[derive(Debug, Clone, Copy, PartialEq, Serialize)]
pub struct CacheStatsSnapshot {
    pub hits: u64,
    pub misses: u64,
    pub sets: u64,
    pub deletes: u64,
    pub errors: u64,
    pub operations: u64,
    pub total_time_ms: f64,
    pub hit_ratio: Option<f64>,
}

impl CacheStats {
    pub fn snapshot(&self) -> CacheStatsSnapshot {
        let hits = self.hits.load(Ordering::Relaxed);
        let misses = self.misses.load(Ordering::Relaxed);
        let lookups = hits + misses;
        CacheStatsSnapshot {
            hits,
            misses,
            sets: self.sets.load(Ordering::Relaxed),
            deletes: self.deletes.load(Ordering::Relaxed),
            errors: self.errors.load(Ordering::Relaxed),
            operations: self.operations.load(Ordering::Relaxed),
            total_time_ms: self.total_time_us.load(Ordering::Relaxed) as f64 / 1000.0,
            hit_ratio: (lookups > 0).then(|| hits as f64 / lookups as f64),
        }
    }

    fn bump(counter: &AtomicU64) {
        counter.fetch_add(1, Ordering::Relaxed);
    }
}

fn key_attribute(key: &str) -> String {
    match key.char_indices().nth(MAX_KEY_ATTRIBUTE_LEN) {
        Some((idx, _)) => format!("{}...", &key[..idx]),
        None => key.to_string(),
    }
}

/// Wraps a [`CacheBackend`] with spans and metrics.
#[derive(Debug)]
pub struct TracedCache<B: CacheBackend> {
    backend: B,
    recorder: Arc<MetricsRecorder>,
    stats: CacheStats,
}

impl<B: CacheBackend> TracedCache<B> {
    pub fn new(backend: B, recorder: Arc<MetricsRecorder>) -> Self {
        Self {
            backend,
            recorder,
            stats: CacheStats::default(),
        }
    }

    pub fn backend(&self) -> &B {
        &self.backend
    }

    pub fn stats(&self) -> CacheStatsSnapshot {
        self.stats.snapshot()
    }

    fn start(&self, parent: &Span, operation: &str, key: &str, kind: &'static str) -> Span {
        parent
            .child_builder(format!("cache.{operation}"))
            .with_kind(SpanKind::Client)
            .with_attribute("db.system", self.backend.name())
            .with_attribute("db.operation", operation)
            .with_attribute("cache.key", key_attribute(key))
            .with_attribute("cache.operation_type", kind)
            .start()
    }

    fn complete<T>(
        &self,
        mut span: Span,
        operation: &str,
        hit: Option<bool>,
        started: Instant,
        result: &Result<T>,
    ) {
        let elapsed = started.elapsed();
        CacheStats::bump(&self.stats.operations);
        self.stats
            .total_time_us
            .fetch_add(elapsed.as_micros() as u64, Ordering::Relaxed);

        if let Some(hit) = hit {
            span.set_attribute("cache.hit", hit);
        }
        span.set_attribute("db.execution_time_ms", elapsed.as_secs_f64() * 1000.0);
        if let Err(e) = result {
            CacheStats::bump(&self.stats.errors);
            span.record_error(e);
            warn!(operation = %operation, error = %e, "Cache operation failed");
        }

        let exemplar = span.is_sampled().then(|| span.trace_id());
        if let Err(e) = span.end() {
            warn!(error = %e, "Cache span already ended");
        }

        let hit_label = match hit {
            Some(true) => "true",
            _ => "false",
        };
        self.recorder.observe_latency(
            names::CACHE_OPERATION_DURATION_SECONDS,
            &[("operation", operation), ("hit", hit_label)],
            elapsed.as_secs_f64(),
            exemplar,
        );
    }

    pub async fn get(&self, parent: &Span, key: &str) -> Result<Option<String>> {
        let span = self.start(parent, "get", key, "read");
        let started = Instant::now();
        let result = self.backend.get(key).await;

        let hit = match &result {
            Ok(Some(_)) => {
                CacheStats::bump(&self.stats.hits);
                Some(true)
            }
            Ok(None) => {
                CacheStats::bump(&self.stats.misses);
                Some(false)
            }
            Err(_) => None,
        };
        self.complete(span, "get", hit, started, &result);
        result
    }

    pub async fn set(&self, parent: &Span, key: &str, value: String, ttl: Option<Duration>) -> Result<()> {
        let mut span = self.start(parent, "set", key, "write");
        if let Some(ttl) = ttl {
            span.set_attribute("cache.ttl_seconds", ttl.as_secs() as i64);
        }
        span.set_attribute("cache.value_bytes", value.len());
        let started = Instant::now();
        let result = self.backend.set(key, value, ttl).await;

        if result.is_ok() {
            CacheStats::bump(&self.stats.sets);
        }
        self.complete(span, "set", None, started, &result);
        result
    }

    pub async fn delete(&self, parent: &Span, key: &str) -> Result<bool> {
        let span = self.start(parent, "delete", key, "delete");
        let started = Instant::now();
        let result = self.backend.delete(key).await;

        if result.is_ok() {
            CacheStats::bump(&self.stats.deletes);
        }
        self.complete(span, "delete", None, started, &result);
        result
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::adapters::cache::{InMemoryCache, NoopCache};
    use crate::error::Error;
    use crate::ids::{RandomIdGenerator, Sampler};
    use crate::tracer::{AttributeValue, InMemorySpanProcessor, SpanStatus, Tracer};
    use async_trait::async_trait;

    fn tracer() -> (Tracer, Arc<MetricsRecorder>, Arc<InMemorySpanProcessor>) {
        let recorder = Arc::new(MetricsRecorder::new());
        let spans = Arc::new(InMemorySpanProcessor::new());
        let tracer = Tracer::new(
            "api",
            Arc::new(RandomIdGenerator),
            Sampler::always_on(),
            Arc::clone(&recorder),
            vec![spans.clone()],
        );
        (tracer, recorder, spans)
    }

    #[test]
    fn test_key_truncation() {
        assert_eq!(key_attribute("user:1"), "user:1");
        let long = "k".repeat(200);
        let shown = key_attribute(&long);
        assert_eq!(shown.len(), MAX_KEY_ATTRIBUTE_LEN + 3);
        assert!(shown.ends_with("..."));
        assert_eq!(key_attribute(&"k".repeat(128)), "k".repeat(128));
    }

    #[tokio::test]
    async fn test_hit_and_miss_recorded() {
        let (tracer, recorder, spans) = tracer();
        let cache = TracedCache::new(InMemoryCache::new(), Arc::clone(&recorder));
        let mut root = tracer.start_span("read_users", None);

        assert_eq!(cache.get(&root, "users").await.unwrap(), None);
        cache
            .set(&root, "users", "[]".to_string(), Some(Duration::from_secs(60)))
            .await
            .unwrap();
        assert_eq!(cache.get(&root, "users").await.unwrap().as_deref(), Some("[]"));
        root.end().unwrap();

        let stats = cache.stats();
        assert_eq!((stats.hits, stats.misses, stats.sets), (1, 1, 1));
        assert_eq!(stats.operations, 3);
        assert_eq!(stats.hit_ratio, Some(0.5));

        let finished = spans.spans();
        assert_eq!(finished.len(), 4);
        assert_eq!(finished[0].name, "cache.get");
        assert_eq!(finished[0].parent_span_id, Some(root.span_id()));
        assert_eq!(finished[0].attributes["cache.hit"], AttributeValue::Bool(false));
        assert_eq!(finished[2].attributes["cache.hit"], AttributeValue::Bool(true));

        let hits = recorder.histogram_snapshot(
            names::CACHE_OPERATION_DURATION_SECONDS,
            &[("operation", "get"), ("hit", "true")],
        );
        assert_eq!(hits.count, 1);
    }

    #[derive(Debug)]
    struct BrokenCache;

    #[async_trait]
    impl CacheBackend for BrokenCache {
        fn name(&self) -> &str {
            "broken"
        }

        async fn get(&self, _key: &str) -> Result<Option<String>> {
            Err(Error::Cache("connection refused".to_string()))
        }

        async fn set(&self, _key: &str, _value: String, _ttl: Option<Duration>) -> Result<()> {
            Err(Error::Cache("connection refused".to_string()))
        }

        async fn delete(&self, _key: &str) -> Result<bool> {
            Err(Error::Cache("connection refused".to_string()))
        }
    }

    #[tokio::test]
    async fn test_backend_error_marks_span() {
        let (tracer, recorder, spans) = tracer();
        let cache = TracedCache::new(BrokenCache, recorder);
        let root = tracer.start_span("read_users", None);

        assert!(cache.get(&root, "users").await.is_err());
        assert_eq!(cache.stats().errors, 1);
        assert_eq!(cache.stats().misses, 0);

        let finished = spans.spans();
        assert_eq!(finished[0].status, SpanStatus::Error);
        assert!(finished[0].exception.is_some());
    }

    #[tokio::test]
    async fn test_noop_backend_always_misses() {
        let (tracer, recorder, _) = tracer();
        let cache = TracedCache::new(NoopCache, recorder);
        let root = tracer.start_span("read_items", None);

        cache.set(&root, "k", "v".to_string(), None).await.unwrap();
        assert_eq!(cache.get(&root, "k").await.unwrap(), None);
        assert!(!cache.delete(&root, "k").await.unwrap());
        assert_eq!(cache.stats().misses, 1);
        assert_eq!(cache.stats().deletes, 1);
    }
}
