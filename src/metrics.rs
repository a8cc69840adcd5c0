//! Failure counters for one monitored job.

use std::sync::atomic::{AtomicU64, Ordering};

/// Connectivity and startup failure counters, one instance per monitor,
/// injected at construction and shared with the retry wrappers.
#[derive(Debug, Default)]
pub struct MonitorMetrics {
    store_connectivity_failures: AtomicU64,
    cluster_connectivity_failures: AtomicU64,
    trainer_connectivity_failures: AtomicU64,
    lifecycle_connectivity_failures: AtomicU64,
    image_pull_failures: AtomicU64,
    insufficient_resources_failures: AtomicU64,
}

impl MonitorMetrics {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn record_store_connectivity_failure(&self) {
        self.store_connectivity_failures.fetch_add(1, Ordering::Relaxed);
    }

    pub fn record_cluster_connectivity_failure(&self) {
        self.cluster_connectivity_failures.fetch_add(1, Ordering::Relaxed);
    }

    pub fn record_trainer_connectivity_failure(&self) {
        self.trainer_connectivity_failures.fetch_add(1, Ordering::Relaxed);
    }

    pub fn record_lifecycle_connectivity_failure(&self) {
        self.lifecycle_connectivity_failures.fetch_add(1, Ordering::Relaxed);
    }

    pub fn record_image_pull_failure(&self) {
        self.image_pull_failures.fetch_add(1, Ordering::Relaxed);
    }

    pub fn record_insufficient_resources_failure(&self) {
        self.insufficient_resources_failures.fetch_add(1, Ordering::Relaxed);
    }

    pub fn store_connectivity_failures(&self) -> u64 {
        self.store_connectivity_failures.load(Ordering::Relaxed)
    }

    pub fn cluster_connectivity_failures(&self) -> u64 {
        self.cluster_connectivity_failures.load(Ordering::Relaxed)
    }

    pub fn trainer_connectivity_failures(&self) -> u64 {
        self.trainer_connectivity_failures.load(Ordering::Relaxed)
    }

    pub fn lifecycle_connectivity_failures(&self) -> u64 {
        self.lifecycle_connectivity_failures.load(Ordering::Relaxed)
    }

    pub fn image_pull_failures(&self) -> u64 {
        self.image_pull_failures.load(Ordering::Relaxed)
    }

    pub fn insufficient_resources_failures(&self) -> u64 {
        self.insufficient_resources_failures.load(Ordering::Relaxed)
    }
}
