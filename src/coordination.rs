//! Coordination-store port and key layout.
//!
//! The store is a key/value service with ordered, append-only sequences per
//! key and conditional writes. Learners append status records under their
//! own sequence key; the monitor owns the single overall-status key.

use std::collections::HashMap;
use std::sync::atomic::{AtomicU32, Ordering};
use std::sync::Arc;

use async_trait::async_trait;
use tokio::sync::RwLock;

use crate::config::CoordinationConfig;

#[derive(Debug, thiserror::Error)]
pub enum StoreError {
    #[error("coordination store unavailable: {0}")]
    Unavailable(String),

    #[error("coordination store operation failed: {0}")]
    Operation(String),
}

/// Key/value coordination store with ordered per-key sequences.
#[async_trait]
pub trait CoordinationStore: Send + Sync {
    /// Writes `value` under `key` only if the key is absent. Returns whether
    /// the write happened.
    async fn put_if_absent(&self, key: &str, value: &str) -> Result<bool, StoreError>;

    async fn get(&self, key: &str) -> Result<Option<String>, StoreError>;

    /// Conditional write: succeeds only if the stored value equals
    /// `expected`. Returns whether the swap happened.
    async fn compare_and_swap(
        &self,
        key: &str,
        new_value: &str,
        expected: &str,
    ) -> Result<bool, StoreError>;

    /// The full ordered sequence under `key`, oldest first. Sequences are
    /// append-only and safe to re-read from the start.
    async fn list_sequence(&self, key: &str) -> Result<Vec<String>, StoreError>;
}

/// Establishes a [`CoordinationStore`] connection.
#[async_trait]
pub trait StoreConnector: Send + Sync {
    async fn connect(
        &self,
        config: &CoordinationConfig,
    ) -> Result<Arc<dyn CoordinationStore>, StoreError>;
}

pub fn overall_status_path(training_id: &str) -> String {
    format!("{}/status", training_id)
}

/// The trailing slash distinguishes the sequence from the sibling
/// `summary_metrics` key.
pub fn learner_status_path(training_id: &str, learner: u32) -> String {
    format!("{}/learners/learner_{}/status/", training_id, learner)
}

pub fn learner_summary_metrics_path(training_id: &str, learner: u32) -> String {
    format!("{}/learners/learner_{}/summary_metrics", training_id, learner)
}

/// In-memory coordination store - TEST ONLY.
///
/// Provides fast, isolated test data without a real coordination cluster.
/// Sequences are appended through [`InMemoryCoordinationStore::append`],
/// standing in for learners publishing their status.
#[derive(Clone, Default)]
pub struct InMemoryCoordinationStore {
    cells: Arc<RwLock<HashMap<String, String>>>,
    sequences: Arc<RwLock<HashMap<String, Vec<String>>>>,
    list_failures: Arc<AtomicU32>,
}

impl InMemoryCoordinationStore {
    pub fn new() -> Self {
        Self::default()
    }

    /// Appends one value to the sequence under `key`.
    pub async fn append(&self, key: &str, value: &str) {
        let mut sequences = self.sequences.write().await;
        sequences
            .entry(key.to_string())
            .or_default()
            .push(value.to_string());
    }

    /// Makes the next `count` calls to `list_sequence` fail.
    pub fn inject_list_failures(&self, count: u32) {
        self.list_failures.store(count, Ordering::SeqCst);
    }
}

#[async_trait]
impl CoordinationStore for InMemoryCoordinationStore {
    async fn put_if_absent(&self, key: &str, value: &str) -> Result<bool, StoreError> {
        let mut cells = self.cells.write().await;
        if cells.contains_key(key) {
            return Ok(false);
        }
        cells.insert(key.to_string(), value.to_string());
        Ok(true)
    }

    async fn get(&self, key: &str) -> Result<Option<String>, StoreError> {
        let cells = self.cells.read().await;
        Ok(cells.get(key).cloned())
    }

    async fn compare_and_swap(
        &self,
        key: &str,
        new_value: &str,
        expected: &str,
    ) -> Result<bool, StoreError> {
        let mut cells = self.cells.write().await;
        match cells.get(key) {
            Some(current) if current == expected => {
                cells.insert(key.to_string(), new_value.to_string());
                Ok(true)
            }
            _ => Ok(false),
        }
    }

    async fn list_sequence(&self, key: &str) -> Result<Vec<String>, StoreError> {
        let remaining = self.list_failures.load(Ordering::SeqCst);
        if remaining > 0
            && self
                .list_failures
                .compare_exchange(remaining, remaining - 1, Ordering::SeqCst, Ordering::SeqCst)
                .is_ok()
        {
            return Err(StoreError::Unavailable("injected failure".to_string()));
        }
        let sequences = self.sequences.read().await;
        Ok(sequences.get(key).cloned().unwrap_or_default())
    }
}

#[async_trait]
impl StoreConnector for InMemoryCoordinationStore {
    async fn connect(
        &self,
        _config: &CoordinationConfig,
    ) -> Result<Arc<dyn CoordinationStore>, StoreError> {
        Ok(Arc::new(self.clone()))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn key_layout_matches_the_store_convention() {
        assert_eq!(overall_status_path("tr-1"), "tr-1/status");
        assert_eq!(
            learner_status_path("tr-1", 2),
            "tr-1/learners/learner_2/status/"
        );
        assert_eq!(
            learner_summary_metrics_path("tr-1", 2),
            "tr-1/learners/learner_2/summary_metrics"
        );
    }

    #[test]
    fn learner_status_key_is_distinct_from_summary_metrics_prefix() {
        let status = learner_status_path("tr-1", 1);
        let metrics = learner_summary_metrics_path("tr-1", 1);
        assert!(status.ends_with('/'));
        assert!(!metrics.starts_with(&status));
    }

    #[tokio::test]
    async fn put_if_absent_only_writes_once() {
        let store = InMemoryCoordinationStore::new();
        assert!(store.put_if_absent("k", "first").await.unwrap());
        assert!(!store.put_if_absent("k", "second").await.unwrap());
        assert_eq!(store.get("k").await.unwrap().as_deref(), Some("first"));
    }

    #[tokio::test]
    async fn compare_and_swap_rejects_stale_writers() {
        let store = InMemoryCoordinationStore::new();
        store.put_if_absent("k", "a").await.unwrap();

        assert!(store.compare_and_swap("k", "b", "a").await.unwrap());
        assert!(!store.compare_and_swap("k", "c", "a").await.unwrap());
        assert_eq!(store.get("k").await.unwrap().as_deref(), Some("b"));
    }

    #[tokio::test]
    async fn sequences_preserve_append_order() {
        let store = InMemoryCoordinationStore::new();
        store.append("seq", "one").await;
        store.append("seq", "two").await;
        assert_eq!(store.list_sequence("seq").await.unwrap(), vec!["one", "two"]);
        assert!(store.list_sequence("other").await.unwrap().is_empty());
    }

    #[tokio::test]
    async fn injected_list_failures_are_consumed() {
        let store = InMemoryCoordinationStore::new();
        store.append("seq", "one").await;
        store.inject_list_failures(1);

        assert!(store.list_sequence("seq").await.is_err());
        assert_eq!(store.list_sequence("seq").await.unwrap(), vec!["one"]);
    }
}
