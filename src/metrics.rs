use std::collections::BTreeMap;
use std::sync::Arc;
use std::sync::Mutex;
use std::sync::atomic::{AtomicU64, Ordering};
use std::time::Duration;

use crate::error::{ErrorKind, ErrorRecord};
use crate::util::lock_unpoisoned;

#[derive(Clone, Debug, Default, PartialEq)]
pub struct HttpClientMetricsSnapshot {
    pub requests_started: u64,
    pub requests_succeeded: u64,
    pub requests_failed: u64,
    pub requests_cancelled: u64,
    pub requests_superseded: u64,
    pub retries: u64,
    pub attempts: u64,
    pub in_flight: u64,
    pub latency_samples: u64,
    pub latency_total_ms: u64,
    pub latency_avg_ms: f64,
    pub error_counts: BTreeMap<String, u64>,
}

#[derive(Clone, Debug, Default)]
pub(crate) struct HttpClientMetrics {
    inner: Arc<HttpClientMetricsInner>,
}

#[derive(Debug, Default)]
struct HttpClientMetricsInner {
    requests_started: AtomicU64,
    requests_succeeded: AtomicU64,
    requests_failed: AtomicU64,
    requests_cancelled: AtomicU64,
    requests_superseded: AtomicU64,
    retries: AtomicU64,
    attempts: AtomicU64,
    in_flight: AtomicU64,
    latency_total_ms: AtomicU64,
    latency_samples: AtomicU64,
    error_counts: Mutex<BTreeMap<String, u64>>,
}

pub(crate) struct InFlightGuard {
    metrics: HttpClientMetrics,
}

impl HttpClientMetrics {
    pub(crate) fn record_request_started(&self) {
        self.inner.requests_started.fetch_add(1, Ordering::Relaxed);
    }

    pub(crate) fn enter_in_flight(&self) -> InFlightGuard {
        self.inner.in_flight.fetch_add(1, Ordering::Relaxed);
        InFlightGuard {
            metrics: self.clone(),
        }
    }

    pub(crate) fn record_superseded(&self) {
        self.inner
            .requests_superseded
            .fetch_add(1, Ordering::Relaxed);
    }

    pub(crate) fn record_attempt(&self) {
        self.inner.attempts.fetch_add(1, Ordering::Relaxed);
    }

    pub(crate) fn record_retry(&self) {
        self.inner.retries.fetch_add(1, Ordering::Relaxed);
    }

    pub(crate) fn record_request_completed<T>(
        &self,
        result: &Result<T, ErrorRecord>,
        latency: Duration,
    ) {
        self.record_latency(latency);
        match result {
            Ok(_) => {
                self.inner
                    .requests_succeeded
                    .fetch_add(1, Ordering::Relaxed);
            }
            Err(record) if record.kind() == ErrorKind::Cancelled => {
                self.inner
                    .requests_cancelled
                    .fetch_add(1, Ordering::Relaxed);
                self.add_error_count(error_count_key(record.kind()));
            }
            Err(record) => {
                self.inner.requests_failed.fetch_add(1, Ordering::Relaxed);
                self.add_error_count(error_count_key(record.kind()));
            }
        }
    }

    pub(crate) fn snapshot(&self) -> HttpClientMetricsSnapshot {
        let latency_samples = self.inner.latency_samples.load(Ordering::Relaxed);
        let latency_total_ms = self.inner.latency_total_ms.load(Ordering::Relaxed);
        let latency_avg_ms = if latency_samples == 0 {
            0.0
        } else {
            latency_total_ms as f64 / latency_samples as f64
        };

        HttpClientMetricsSnapshot {
            requests_started: self.inner.requests_started.load(Ordering::Relaxed),
            requests_succeeded: self.inner.requests_succeeded.load(Ordering::Relaxed),
            requests_failed: self.inner.requests_failed.load(Ordering::Relaxed),
            requests_cancelled: self.inner.requests_cancelled.load(Ordering::Relaxed),
            requests_superseded: self.inner.requests_superseded.load(Ordering::Relaxed),
            retries: self.inner.retries.load(Ordering::Relaxed),
            attempts: self.inner.attempts.load(Ordering::Relaxed),
            in_flight: self.inner.in_flight.load(Ordering::Relaxed),
            latency_samples,
            latency_total_ms,
            latency_avg_ms,
            error_counts: lock_unpoisoned(&self.inner.error_counts).clone(),
        }
    }

    fn record_latency(&self, latency: Duration) {
        self.inner.latency_samples.fetch_add(1, Ordering::Relaxed);
        self.inner.latency_total_ms.fetch_add(
            latency.as_millis().min(u64::MAX as u128) as u64,
            Ordering::Relaxed,
        );
    }

    fn add_error_count(&self, error_key: String) {
        let mut error_counts = lock_unpoisoned(&self.inner.error_counts);
        *error_counts.entry(error_key).or_insert(0) += 1;
    }
}

// HTTP statuses form a small closed set; business codes come from the backend
// and would grow the map without bound.
fn error_count_key(kind: ErrorKind) -> String {
    match kind {
        ErrorKind::Http { .. } => kind.to_string(),
        other => other.as_str().to_owned(),
    }
}

impl Drop for InFlightGuard {
    fn drop(&mut self) {
        self.metrics.inner.in_flight.fetch_sub(1, Ordering::Relaxed);
    }
}
