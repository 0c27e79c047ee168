use dashmap::DashMap;
use parking_lot::RwLock;
use serde::{Deserialize, Serialize};
use std::collections::{BTreeMap, VecDeque};
use std::fmt::Write as _;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Arc;
use std::time::{Duration, Instant};

/// Latency samples kept for percentiles
const LATENCY_WINDOW: usize = 1024;

/// Process-wide metrics collector.
///
/// Tracks predictions, inference latency, translation calls and cache performance.
/// Cheap to clone and safe to share across handlers.
#[derive(Clone)]
pub struct Metrics {
    inner: Arc<MetricsInner>,
}

struct MetricsInner {
    // Prediction metrics
    predictions_served: AtomicUsize,
    predictions_failed: AtomicUsize,
    detections_total: AtomicUsize,
    inference_latency_ms: RwLock<VecDeque<u64>>,

    // Translation metrics
    translations_succeeded: AtomicUsize,
    translations_failed: AtomicUsize,

    // Cache metrics
    cache_hits: AtomicUsize,
    cache_misses: AtomicUsize,
    cache_size: AtomicUsize,

    // Per-endpoint request counters
    endpoint_counters: DashMap<String, AtomicUsize>,

    start_time: Instant,
}

impl Metrics {
    pub fn new() -> Self {
        Self {
            inner: Arc::new(MetricsInner {
                predictions_served: AtomicUsize::new(0),
                predictions_failed: AtomicUsize::new(0),
                detections_total: AtomicUsize::new(0),
                inference_latency_ms: RwLock::new(VecDeque::with_capacity(LATENCY_WINDOW)),
                translations_succeeded: AtomicUsize::new(0),
                translations_failed: AtomicUsize::new(0),
                cache_hits: AtomicUsize::new(0),
                cache_misses: AtomicUsize::new(0),
                cache_size: AtomicUsize::new(0),
                endpoint_counters: DashMap::new(),
                start_time: Instant::now(),
            }),
        }
    }

    // Prediction metrics
    pub fn record_prediction(&self, detections: usize, inference: Duration) {
        self.inner.predictions_served.fetch_add(1, Ordering::Relaxed);
        self.inner
            .detections_total
            .fetch_add(detections, Ordering::Relaxed);

        let mut latencies = self.inner.inference_latency_ms.write();
        if latencies.len() == LATENCY_WINDOW {
            latencies.pop_front();
        }
        latencies.push_back(inference.as_millis() as u64);
    }

    pub fn record_prediction_failure(&self) {
        self.inner.predictions_failed.fetch_add(1, Ordering::Relaxed);
    }

    // Translation metrics
    pub fn record_translation(&self, success: bool) {
        if success {
            self.inner
                .translations_succeeded
                .fetch_add(1, Ordering::Relaxed);
        } else {
            self.inner.translations_failed.fetch_add(1, Ordering::Relaxed);
        }
    }

    // Cache metrics
    pub fn record_cache_hit(&self) {
        self.inner.cache_hits.fetch_add(1, Ordering::Relaxed);
    }

    pub fn record_cache_miss(&self) {
        self.inner.cache_misses.fetch_add(1, Ordering::Relaxed);
    }

    pub fn update_cache_size(&self, size: usize) {
        self.inner.cache_size.store(size, Ordering::Relaxed);
    }

    // Endpoint metrics
    pub fn record_endpoint_request(&self, endpoint: &str) {
        self.inner
            .endpoint_counters
            .entry(endpoint.to_string())
            .or_insert_with(|| AtomicUsize::new(0))
            .fetch_add(1, Ordering::Relaxed);
    }

    // Get snapshot for reporting
    pub fn snapshot(&self) -> MetricsSnapshot {
        let (latency_avg, latency_p50, latency_p95, latency_p99) = {
            let latencies = self.inner.inference_latency_ms.read();
            let values: Vec<u64> = latencies.iter().copied().collect();
            (
                avg(&values),
                percentile(&values, 0.5),
                percentile(&values, 0.95),
                percentile(&values, 0.99),
            )
        };

        let cache_hits = self.inner.cache_hits.load(Ordering::Relaxed);
        let cache_misses = self.inner.cache_misses.load(Ordering::Relaxed);
        let cache_total = cache_hits + cache_misses;
        let cache_hit_rate = if cache_total > 0 {
            cache_hits as f64 / cache_total as f64
        } else {
            0.0
        };

        let endpoint_requests = self
            .inner
            .endpoint_counters
            .iter()
            .map(|entry| (entry.key().clone(), entry.value().load(Ordering::Relaxed)))
            .collect();

        MetricsSnapshot {
            predictions_served: self.inner.predictions_served.load(Ordering::Relaxed),
            predictions_failed: self.inner.predictions_failed.load(Ordering::Relaxed),
            detections_total: self.inner.detections_total.load(Ordering::Relaxed),
            inference_latency_avg_ms: latency_avg,
            inference_latency_p50_ms: latency_p50,
            inference_latency_p95_ms: latency_p95,
            inference_latency_p99_ms: latency_p99,
            translations_succeeded: self.inner.translations_succeeded.load(Ordering::Relaxed),
            translations_failed: self.inner.translations_failed.load(Ordering::Relaxed),
            cache_hits,
            cache_misses,
            cache_hit_rate,
            cache_size: self.inner.cache_size.load(Ordering::Relaxed),
            endpoint_requests,
            uptime_seconds: self.inner.start_time.elapsed().as_secs(),
        }
    }

    /// Generate Prometheus-format metrics
    pub fn to_prometheus(&self) -> String {
        let snapshot = self.snapshot();
        let mut out = format!(
            r#"# HELP predictions_served_total Predictions that returned a result
# TYPE predictions_served_total counter
predictions_served_total {}

# HELP predictions_failed_total Predictions that ended in an error
# TYPE predictions_failed_total counter
predictions_failed_total {}

# HELP detections_total Detections returned across all predictions
# TYPE detections_total counter
detections_total {}

# HELP inference_latency_ms Inference latency over the recent window in milliseconds
# TYPE inference_latency_ms gauge
inference_latency_ms{{stat="avg"}} {}
inference_latency_ms{{stat="p50"}} {}
inference_latency_ms{{stat="p95"}} {}
inference_latency_ms{{stat="p99"}} {}

# HELP translations_total Translation provider calls by outcome
# TYPE translations_total counter
translations_total{{outcome="success"}} {}
translations_total{{outcome="failure"}} {}

# HELP translation_cache_hit_rate Translation cache hit rate (0.0 to 1.0)
# TYPE translation_cache_hit_rate gauge
translation_cache_hit_rate {}

# HELP translation_cache_size Current translation cache size
# TYPE translation_cache_size gauge
translation_cache_size {}

# HELP uptime_seconds Application uptime in seconds
# TYPE uptime_seconds counter
uptime_seconds {}
"#,
            snapshot.predictions_served,
            snapshot.predictions_failed,
            snapshot.detections_total,
            snapshot.inference_latency_avg_ms,
            snapshot.inference_latency_p50_ms,
            snapshot.inference_latency_p95_ms,
            snapshot.inference_latency_p99_ms,
            snapshot.translations_succeeded,
            snapshot.translations_failed,
            snapshot.cache_hit_rate,
            snapshot.cache_size,
            snapshot.uptime_seconds,
        );

        if !snapshot.endpoint_requests.is_empty() {
            out.push_str("\n# HELP http_requests_total Requests per endpoint\n");
            out.push_str("# TYPE http_requests_total counter\n");
            for (endpoint, count) in &snapshot.endpoint_requests {
                let _ = writeln!(out, "http_requests_total{{endpoint=\"{}\"}} {}", endpoint, count);
            }
        }
        out
    }
}

impl Default for Metrics {
    fn default() -> Self {
        Self::new()
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct MetricsSnapshot {
    pub predictions_served: usize,
    pub predictions_failed: usize,
    pub detections_total: usize,
    pub inference_latency_avg_ms: u64,
    pub inference_latency_p50_ms: u64,
    pub inference_latency_p95_ms: u64,
    pub inference_latency_p99_ms: u64,
    pub translations_succeeded: usize,
    pub translations_failed: usize,
    pub cache_hits: usize,
    pub cache_misses: usize,
    pub cache_hit_rate: f64,
    pub cache_size: usize,
    pub endpoint_requests: BTreeMap<String, usize>,
    pub uptime_seconds: u64,
}

fn percentile(values: &[u64], p: f64) -> u64 {
    if values.is_empty() {
        return 0;
    }
    let mut sorted = values.to_vec();
    sorted.sort_unstable();
    let idx = ((values.len() as f64 - 1.0) * p) as usize;
    sorted[idx]
}

fn avg(values: &[u64]) -> u64 {
    if values.is_empty() {
        return 0;
    }
    values.iter().sum::<u64>() / values.len() as u64
}
