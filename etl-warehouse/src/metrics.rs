use std::sync::Arc;
use std::sync::atomic::{AtomicU64, Ordering};

/// Atomic counters describing warehouse-client traffic, cheap to clone
/// and share across the worker pool.
#[derive(Clone)]
pub struct WarehouseMetrics {
    inserts_total: Arc<AtomicU64>,
    rows_ingested: Arc<AtomicU64>,
    rows_retried: Arc<AtomicU64>,
    inserts_failed: Arc<AtomicU64>,
    connections_active: Arc<AtomicU64>,
    last_insert_latency_ms: Arc<AtomicU64>,
}

impl Default for WarehouseMetrics {
    fn default() -> Self {
        Self {
            inserts_total: Arc::new(AtomicU64::new(0)),
            rows_ingested: Arc::new(AtomicU64::new(0)),
            rows_retried: Arc::new(AtomicU64::new(0)),
            inserts_failed: Arc::new(AtomicU64::new(0)),
            connections_active: Arc::new(AtomicU64::new(0)),
            last_insert_latency_ms: Arc::new(AtomicU64::new(0)),
        }
    }
}

impl WarehouseMetrics {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn record_insert(&self, rows: u64, retried: u64, latency_ms: u64) {
        self.inserts_total.fetch_add(1, Ordering::Relaxed);
        self.rows_ingested.fetch_add(rows, Ordering::Relaxed);
        self.rows_retried.fetch_add(retried, Ordering::Relaxed);
        self.last_insert_latency_ms.store(latency_ms, Ordering::Relaxed);
    }

    pub fn record_failure(&self) {
        self.inserts_failed.fetch_add(1, Ordering::Relaxed);
    }

    pub fn set_active_connections(&self, count: u64) {
        self.connections_active.store(count, Ordering::Relaxed);
    }

    pub fn rows_ingested(&self) -> u64 {
        self.rows_ingested.load(Ordering::Relaxed)
    }

    pub fn rows_retried(&self) -> u64 {
        self.rows_retried.load(Ordering::Relaxed)
    }

    pub fn inserts_failed(&self) -> u64 {
        self.inserts_failed.load(Ordering::Relaxed)
    }

    pub fn active_connections(&self) -> u64 {
        self.connections_active.load(Ordering::Relaxed)
    }
}
