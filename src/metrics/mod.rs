//! In-process metrics for the proof ledger
//!
//! Counters for submissions and their failure classes, plus latency
//! histograms for proof generation and chain confirmation.

use std::collections::BTreeMap;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;
use std::time::Instant;

use serde::Serialize;
use tokio::sync::RwLock;

/// Metric names
pub mod metric_names {
    pub const SUBMISSIONS_ATTEMPTED: &str = "ledger.submissions.attempted";
    pub const SUBMISSIONS_SUCCEEDED: &str = "ledger.submissions.succeeded";
    pub const SUBMISSIONS_FAILED: &str = "ledger.submissions.failed";
    pub const DUPLICATE_REJECTIONS: &str = "ledger.submissions.duplicate";
    pub const SIMULATION_RETRIES: &str = "ledger.simulation.retries";
    pub const ACCESS_DENIALS: &str = "ledger.access.denied";
    pub const PROOFS_GENERATED: &str = "ledger.proofs.generated";
    pub const MAINTENANCE_SCHEDULED: &str = "ledger.maintenance.scheduled";

    pub const PROOF_LATENCY: &str = "ledger.proof.latency_seconds";
    pub const CONFIRMATION_LATENCY: &str = "ledger.confirmation.latency_seconds";
}

/// Counter and histogram registry shared by the service components
pub struct LedgerMetrics {
    counters: RwLock<BTreeMap<String, Arc<AtomicU64>>>,
    histograms: RwLock<BTreeMap<String, Arc<Histogram>>>,
    start_time: Instant,
}

/// Point-in-time copy of every metric
#[derive(Debug, Clone, Serialize)]
pub struct MetricsSnapshot {
    pub uptime_seconds: u64,
    pub counters: BTreeMap<String, u64>,
    pub histograms: BTreeMap<String, HistogramSnapshot>,
}

impl MetricsSnapshot {
    pub fn counter(&self, name: &str) -> u64 {
        self.counters.get(name).copied().unwrap_or(0)
    }
}

impl LedgerMetrics {
    pub fn new() -> Self {
        Self {
            counters: RwLock::new(BTreeMap::new()),
            histograms: RwLock::new(BTreeMap::new()),
            start_time: Instant::now(),
        }
    }

    pub async fn inc_counter(&self, name: &str) {
        self.add_counter(name, 1).await;
    }

    pub async fn add_counter(&self, name: &str, value: u64) {
        if let Some(counter) = self.counters.read().await.get(name) {
            counter.fetch_add(value, Ordering::Relaxed);
            return;
        }

        let mut counters = self.counters.write().await;
        counters
            .entry(name.to_string())
            .or_insert_with(|| Arc::new(AtomicU64::new(0)))
            .fetch_add(value, Ordering::Relaxed);
    }

    pub async fn get_counter(&self, name: &str) -> u64 {
        self.counters
            .read()
            .await
            .get(name)
            .map(|c| c.load(Ordering::Relaxed))
            .unwrap_or(0)
    }

    pub async fn observe(&self, name: &str, seconds: f64) {
        if let Some(histogram) = self.histograms.read().await.get(name) {
            histogram.observe(seconds);
            return;
        }

        let mut histograms = self.histograms.write().await;
        histograms
            .entry(name.to_string())
            .or_insert_with(|| Arc::new(Histogram::default()))
            .observe(seconds);
    }

    pub fn uptime_seconds(&self) -> u64 {
        self.start_time.elapsed().as_secs()
    }

    pub async fn snapshot(&self) -> MetricsSnapshot {
        let counters = self
            .counters
            .read()
            .await
            .iter()
            .map(|(k, v)| (k.clone(), v.load(Ordering::Relaxed)))
            .collect();
        let histograms = self
            .histograms
            .read()
            .await
            .iter()
            .map(|(k, v)| (k.clone(), v.snapshot()))
            .collect();

        MetricsSnapshot {
            uptime_seconds: self.uptime_seconds(),
            counters,
            histograms,
        }
    }
}

impl Default for LedgerMetrics {
    fn default() -> Self {
        Self::new()
    }
}

/// Fixed-bucket latency histogram
pub struct Histogram {
    buckets: Vec<f64>,
    counts: Vec<AtomicU64>,
    /// Sum in milliseconds
    sum_ms: AtomicU64,
    count: AtomicU64,
}

#[derive(Debug, Clone, Serialize)]
pub struct HistogramSnapshot {
    pub buckets: Vec<f64>,
    pub counts: Vec<u64>,
    pub sum: f64,
    pub count: u64,
}

impl Histogram {
    pub fn new(buckets: Vec<f64>) -> Self {
        let counts = buckets.iter().map(|_| AtomicU64::new(0)).collect();
        Self {
            buckets,
            counts,
            sum_ms: AtomicU64::new(0),
            count: AtomicU64::new(0),
        }
    }

    pub fn observe(&self, value: f64) {
        self.sum_ms
            .fetch_add((value * 1000.0) as u64, Ordering::Relaxed);
        self.count.fetch_add(1, Ordering::Relaxed);

        if let Some(i) = self.buckets.iter().position(|bucket| value <= *bucket) {
            self.counts[i].fetch_add(1, Ordering::Relaxed);
        }
    }

    pub fn snapshot(&self) -> HistogramSnapshot {
        HistogramSnapshot {
            buckets: self.buckets.clone(),
            counts: self.counts.iter().map(|c| c.load(Ordering::Relaxed)).collect(),
            sum: self.sum_ms.load(Ordering::Relaxed) as f64 / 1000.0,
            count: self.count.load(Ordering::Relaxed),
        }
    }
}

impl Default for Histogram {
    fn default() -> Self {
        // proof generation and confirmation run from seconds to minutes
        Self::new(vec![0.5, 1.0, 2.5, 5.0, 10.0, 30.0, 60.0, 120.0, 300.0])
    }
}

/// Time an async operation into a histogram
pub async fn timed<F, T>(metrics: &LedgerMetrics, metric_name: &str, f: F) -> T
where
    F: std::future::Future<Output = T>,
{
    let start = Instant::now();
    let result = f.await;
    metrics
        .observe(metric_name, start.elapsed().as_secs_f64())
        .await;
    result
}
