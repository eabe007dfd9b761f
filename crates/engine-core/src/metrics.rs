use serde::Serialize;
use std::sync::{
    Arc,
    atomic::{AtomicU64, Ordering},
};

#[derive(Debug, Default)]
struct InnerMetrics {
    requests: AtomicU64,
    retries: AtomicU64,
    throttled: AtomicU64,
    rows_written: AtomicU64,
    batches_committed: AtomicU64,
    batches_quarantined: AtomicU64,
}

/// Counters for one sync job, cheap to clone into every stage.
#[derive(Debug, Clone)]
pub struct Metrics {
    inner: Arc<InnerMetrics>,
}

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize)]
pub struct MetricsSnapshot {
    pub requests: u64,
    pub retries: u64,
    pub throttled: u64,
    pub rows_written: u64,
    pub batches_committed: u64,
    pub batches_quarantined: u64,
}

impl Metrics {
    pub fn new() -> Self {
        Metrics {
            inner: Arc::new(InnerMetrics::default()),
        }
    }

    pub fn increment_requests(&self, count: u64) {
        self.inner.requests.fetch_add(count, Ordering::Relaxed);
    }

    pub fn increment_retries(&self, count: u64) {
        self.inner.retries.fetch_add(count, Ordering::Relaxed);
    }

    pub fn increment_throttled(&self, count: u64) {
        self.inner.throttled.fetch_add(count, Ordering::Relaxed);
    }

    pub fn increment_rows(&self, count: u64) {
        self.inner.rows_written.fetch_add(count, Ordering::Relaxed);
    }

    pub fn increment_committed(&self, count: u64) {
        self.inner
            .batches_committed
            .fetch_add(count, Ordering::Relaxed);
    }

    pub fn increment_quarantined(&self, count: u64) {
        self.inner
            .batches_quarantined
            .fetch_add(count, Ordering::Relaxed);
    }

    pub fn snapshot(&self) -> MetricsSnapshot {
        MetricsSnapshot {
            requests: self.inner.requests.load(Ordering::Relaxed),
            retries: self.inner.retries.load(Ordering::Relaxed),
            throttled: self.inner.throttled.load(Ordering::Relaxed),
            rows_written: self.inner.rows_written.load(Ordering::Relaxed),
            batches_committed: self.inner.batches_committed.load(Ordering::Relaxed),
            batches_quarantined: self.inner.batches_quarantined.load(Ordering::Relaxed),
        }
    }
}

impl Default for Metrics {
    fn default() -> Self {
        Self::new()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn clones_share_counters() {
        let metrics = Metrics::new();
        let other = metrics.clone();
        metrics.increment_requests(3);
        other.increment_rows(10);
        other.increment_committed(1);

        let snap = metrics.snapshot();
        assert_eq!(snap.requests, 3);
        assert_eq!(snap.rows_written, 10);
        assert_eq!(snap.batches_committed, 1);
        assert_eq!(snap.batches_quarantined, 0);
    }
}
