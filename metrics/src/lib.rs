//! Per-route and per-upstream traffic metrics.
//!
//! Each request completion updates two records: the route that matched and the
//! upstream it dispatched to. A record keeps monotonic counters, a 5-second
//! bucket ring for 1/5/15-minute rates, and a logarithmic latency histogram
//! from which quantiles are derived. Everything is exposed in Prometheus text
//! format through a [`prometheus_client`] collector.

#![deny(warnings, rust_2018_idioms)]
#![forbid(unsafe_code)]

mod histogram;
pub mod prom;
mod window;

pub use self::histogram::{LatencyHistogram, Percentiles};
pub use self::window::{WindowRing, WindowStats};

use ahash::AHashMap as HashMap;
use parking_lot::{Mutex, RwLock};
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;
use std::time::{SystemTime, UNIX_EPOCH};

#[derive(Clone, Copy, Debug, Hash, PartialEq, Eq)]
pub enum ResourceKind {
    Route,
    Upstream,
}

impl ResourceKind {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Route => "route",
            Self::Upstream => "upstream",
        }
    }
}

#[derive(Clone, Debug, Hash, PartialEq, Eq)]
pub struct MetricKey {
    pub kind: ResourceKind,
    pub namespace: String,
    pub name: String,
}

/// The process-wide store. Readers (the `/metrics` collector) take the outer
/// lock briefly to snapshot record handles; request workers only touch their
/// own record's atomics and inner locks.
#[derive(Debug, Default)]
pub struct TrafficMetrics {
    records: RwLock<HashMap<MetricKey, Arc<Record>>>,
}

#[derive(Debug)]
pub struct Record {
    requests: AtomicU64,
    errors: AtomicU64,
    min_ms: AtomicU64,
    max_ms: AtomicU64,
    sum_ms: AtomicU64,
    window: Mutex<WindowRing>,
    histogram: Mutex<LatencyHistogram>,
}

/// A consistent-enough copy of one record for exposition.
#[derive(Clone, Debug)]
pub struct RecordSnapshot {
    pub requests: u64,
    pub errors: u64,
    pub min_ms: u64,
    pub mean_ms: f64,
    pub max_ms: u64,
    /// (window label, window seconds, stats) for 1/5/15 minutes.
    pub windows: [(&'static str, u64, WindowStats); 3],
    pub percentiles: Percentiles,
}

const WINDOWS: [(&str, u64); 3] = [("1m", 60), ("5m", 300), ("15m", 900)];

// === impl TrafficMetrics ===

impl TrafficMetrics {
    pub fn shared() -> Arc<Self> {
        Arc::new(Self::default())
    }

    /// Records one completed request against `(kind, namespace, name)`.
    pub fn observe(&self, kind: ResourceKind, namespace: &str, name: &str, ms: u64, error: bool) {
        self.record(kind, namespace, name).observe(ms, error, now_epoch());
    }

    pub fn snapshot(&self) -> Vec<(MetricKey, RecordSnapshot)> {
        let records: Vec<(MetricKey, Arc<Record>)> = self
            .records
            .read()
            .iter()
            .map(|(k, v)| (k.clone(), v.clone()))
            .collect();
        let now = now_epoch();
        records
            .into_iter()
            .map(|(key, record)| (key, record.snapshot(now)))
            .collect()
    }

    fn record(&self, kind: ResourceKind, namespace: &str, name: &str) -> Arc<Record> {
        {
            let records = self.records.read();
            if let Some(record) = records.get(&MetricKey {
                kind,
                namespace: namespace.to_string(),
                name: name.to_string(),
            }) {
                return record.clone();
            }
        }
        let key = MetricKey {
            kind,
            namespace: namespace.to_string(),
            name: name.to_string(),
        };
        self.records
            .write()
            .entry(key)
            .or_insert_with(|| Arc::new(Record::new()))
            .clone()
    }
}

// === impl Record ===

impl Record {
    fn new() -> Self {
        Self {
            requests: AtomicU64::new(0),
            errors: AtomicU64::new(0),
            min_ms: AtomicU64::new(u64::MAX),
            max_ms: AtomicU64::new(0),
            sum_ms: AtomicU64::new(0),
            window: Mutex::new(WindowRing::new()),
            histogram: Mutex::new(LatencyHistogram::new()),
        }
    }

    fn observe(&self, ms: u64, error: bool, now: u64) {
        self.requests.fetch_add(1, Ordering::Relaxed);
        if error {
            self.errors.fetch_add(1, Ordering::Relaxed);
        }
        self.min_ms.fetch_min(ms, Ordering::Relaxed);
        self.max_ms.fetch_max(ms, Ordering::Relaxed);
        self.sum_ms.fetch_add(ms, Ordering::Relaxed);
        self.window.lock().record(now, error);
        self.histogram.lock().record(ms);
    }

    fn snapshot(&self, now: u64) -> RecordSnapshot {
        let requests = self.requests.load(Ordering::Relaxed);
        let errors = self.errors.load(Ordering::Relaxed);
        let sum = self.sum_ms.load(Ordering::Relaxed);
        let min = self.min_ms.load(Ordering::Relaxed);

        let window = self.window.lock();
        let windows = WINDOWS.map(|(label, secs)| (label, secs, window.aggregate(now, secs)));
        drop(window);

        let percentiles = self.histogram.lock().percentiles();

        RecordSnapshot {
            requests,
            errors,
            min_ms: if requests == 0 { 0 } else { min },
            mean_ms: if requests == 0 {
                0.0
            } else {
                sum as f64 / requests as f64
            },
            max_ms: self.max_ms.load(Ordering::Relaxed),
            windows,
            percentiles,
        }
    }
}

fn now_epoch() -> u64 {
    SystemTime::now()
        .duration_since(UNIX_EPOCH)
        .map(|d| d.as_secs())
        .unwrap_or(0)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn observe_updates_both_counters_and_extremes() {
        let metrics = TrafficMetrics::default();
        metrics.observe(ResourceKind::Route, "ns", "site", 12, false);
        metrics.observe(ResourceKind::Route, "ns", "site", 40, true);
        metrics.observe(ResourceKind::Upstream, "ns", "oss", 12, false);

        let snapshot = metrics.snapshot();
        assert_eq!(snapshot.len(), 2);
        let (_, route) = snapshot
            .iter()
            .find(|(k, _)| k.kind == ResourceKind::Route)
            .expect("route record");
        assert_eq!(route.requests, 2);
        assert_eq!(route.errors, 1);
        assert_eq!(route.min_ms, 12);
        assert_eq!(route.max_ms, 40);
        assert!((route.mean_ms - 26.0).abs() < f64::EPSILON);
    }

    #[test]
    fn empty_record_reports_zeroes() {
        let record = Record::new();
        let snap = record.snapshot(0);
        assert_eq!(snap.min_ms, 0);
        assert_eq!(snap.max_ms, 0);
        assert_eq!(snap.mean_ms, 0.0);
    }

    #[test]
    fn records_are_reused_per_key() {
        let metrics = TrafficMetrics::default();
        metrics.observe(ResourceKind::Route, "ns", "site", 1, false);
        metrics.observe(ResourceKind::Route, "ns", "site", 1, false);
        assert_eq!(metrics.snapshot().len(), 1);
        assert_eq!(metrics.snapshot()[0].1.requests, 2);
    }
}
