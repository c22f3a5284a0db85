//! # Per-Method Call Latency
//!
//! Ambient observability for the dispatch path: one HDR histogram per
//! registered method name, recording handler execution latency
//! (`hdrhistogram::Histogram<u64>`, 3 significant figures, nanosecond
//! precision).

use std::collections::HashMap;
use std::time::Duration;

use hdrhistogram::Histogram;
use parking_lot::Mutex;

/// Registry of per-method latency histograms, built lazily as methods are
/// first dispatched.
pub struct MethodMetrics {
    histograms: Mutex<HashMap<String, Histogram<u64>>>,
}

impl Default for MethodMetrics {
    fn default() -> Self {
        Self::new()
    }
}

impl MethodMetrics {
    pub fn new() -> Self {
        Self {
            histograms: Mutex::new(HashMap::new()),
        }
    }

    pub fn record(&self, method: &str, latency: Duration) {
        let mut histograms = self.histograms.lock();
        let histogram = histograms
            .entry(method.to_string())
            .or_insert_with(|| Histogram::<u64>::new(3).expect("valid histogram precision"));
        let _ = histogram.record(latency.as_nanos() as u64);
    }

    /// Snapshot of a method's latency distribution, or `None` if it has
    /// never been dispatched.
    pub fn snapshot(&self, method: &str) -> Option<MethodLatencySnapshot> {
        let histograms = self.histograms.lock();
        let histogram = histograms.get(method)?;
        Some(MethodLatencySnapshot {
            count: histogram.len(),
            p50_ns: histogram.value_at_quantile(0.50),
            p99_ns: histogram.value_at_quantile(0.99),
            max_ns: histogram.max(),
        })
    }

    pub fn methods(&self) -> Vec<String> {
        self.histograms.lock().keys().cloned().collect()
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct MethodLatencySnapshot {
    pub count: u64,
    pub p50_ns: u64,
    pub p99_ns: u64,
    pub max_ns: u64,
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn records_and_snapshots_one_method() {
        let metrics = MethodMetrics::new();
        metrics.record("echo", Duration::from_micros(100));
        metrics.record("echo", Duration::from_micros(300));

        let snapshot = metrics.snapshot("echo").unwrap();
        assert_eq!(snapshot.count, 2);
        assert!(snapshot.max_ns >= 300_000);
    }

    #[test]
    fn unknown_method_has_no_snapshot() {
        let metrics = MethodMetrics::new();
        assert!(metrics.snapshot("never_called").is_none());
    }

    #[test]
    fn tracks_multiple_methods_independently() {
        let metrics = MethodMetrics::new();
        metrics.record("a", Duration::from_micros(10));
        metrics.record("b", Duration::from_micros(20));
        assert_eq!(metrics.methods().len(), 2);
    }
}
