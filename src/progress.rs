/// Progress Tracker
///
/// Per-decode live counters keyed by the base txid. The decode pipeline is
/// the only mutator; readers get cloned snapshots, and every mutation is
/// also pushed on a broadcast channel so a streaming surface does not have
/// to poll the map.
///
/// Guarantees: `chunks_found` and `dep_done` only increase,
/// `estimated_total` only grows, and a completed entry is never mutated
/// again.

use chrono::{DateTime, Utc};
use serde::Serialize;
use std::collections::HashMap;
use std::sync::Arc;
use tokio::sync::{broadcast, RwLock};

#[derive(Debug, Clone, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct ProgressEntry {
    pub key: String,
    pub label: String,
    pub chunks_found: u64,
    pub estimated_total: Option<u64>,
    pub dep_total: Option<u64>,
    pub dep_done: u64,
    pub active: bool,
    pub started_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}

pub struct ProgressTracker {
    entries: Arc<RwLock<HashMap<String, ProgressEntry>>>,
    events: broadcast::Sender<ProgressEntry>,
}

impl ProgressTracker {
    pub fn new() -> Self {
        let (events, _) = broadcast::channel(1000);
        Self {
            entries: Arc::new(RwLock::new(HashMap::new())),
            events,
        }
    }

    /// Subscribe to snapshot pushes. Receivers that fall behind miss
    /// intermediate snapshots, never final ones out of order.
    pub fn subscribe(&self) -> broadcast::Receiver<ProgressEntry> {
        self.events.subscribe()
    }

    pub async fn start(&self, key: &str, label: &str) {
        let now = Utc::now();
        let entry = ProgressEntry {
            key: key.to_string(),
            label: label.to_string(),
            chunks_found: 0,
            estimated_total: None,
            dep_total: None,
            dep_done: 0,
            active: true,
            started_at: now,
            updated_at: now,
        };
        self.entries.write().await.insert(key.to_string(), entry.clone());
        let _ = self.events.send(entry);
    }

    /// Accumulate newly found chunks and grow the total estimate. The
    /// estimate is `chunks_found + last_remaining` and never shrinks.
    pub async fn update(&self, key: &str, chunks_delta: u64, last_remaining: u64) {
        let mut entries = self.entries.write().await;
        if let Some(entry) = entries.get_mut(key).filter(|e| e.active) {
            entry.chunks_found += chunks_delta;
            let estimate = entry.chunks_found + last_remaining;
            entry.estimated_total = Some(entry.estimated_total.map_or(estimate, |e| e.max(estimate)));
            entry.updated_at = Utc::now();
            let _ = self.events.send(entry.clone());
        }
    }

    pub async fn set_dependency_plan(&self, key: &str, total: u64) {
        let mut entries = self.entries.write().await;
        if let Some(entry) = entries.get_mut(key).filter(|e| e.active) {
            entry.dep_total = Some(total);
            entry.updated_at = Utc::now();
            let _ = self.events.send(entry.clone());
        }
    }

    pub async fn increment_dependency_done(&self, key: &str) {
        let mut entries = self.entries.write().await;
        if let Some(entry) = entries.get_mut(key).filter(|e| e.active) {
            entry.dep_done += 1;
            entry.updated_at = Utc::now();
            let _ = self.events.send(entry.clone());
        }
    }

    /// Mark the entry inactive without clearing its counters.
    pub async fn complete(&self, key: &str) {
        let mut entries = self.entries.write().await;
        if let Some(entry) = entries.get_mut(key).filter(|e| e.active) {
            entry.active = false;
            entry.updated_at = Utc::now();
            let _ = self.events.send(entry.clone());
        }
    }

    pub async fn snapshot(&self, key: &str) -> Option<ProgressEntry> {
        self.entries.read().await.get(key).cloned()
    }

    pub async fn snapshot_all(&self) -> Vec<ProgressEntry> {
        self.entries.read().await.values().cloned().collect()
    }
}

impl Default for ProgressTracker {
    fn default() -> Self {
        Self::new()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn test_chunks_and_estimate_are_monotone() {
        let tracker = ProgressTracker::new();
        tracker.start("k", "decode k").await;

        tracker.update("k", 1, 5).await;
        let snap = tracker.snapshot("k").await.unwrap();
        assert_eq!(snap.chunks_found, 1);
        assert_eq!(snap.estimated_total, Some(6));

        // a smaller remaining must not shrink the estimate
        tracker.update("k", 1, 0).await;
        let snap = tracker.snapshot("k").await.unwrap();
        assert_eq!(snap.chunks_found, 2);
        assert_eq!(snap.estimated_total, Some(6));

        // a larger one grows it
        tracker.update("k", 1, 9).await;
        assert_eq!(tracker.snapshot("k").await.unwrap().estimated_total, Some(12));
    }

    #[tokio::test]
    async fn test_dependency_counters() {
        let tracker = ProgressTracker::new();
        tracker.start("k", "decode k").await;
        tracker.set_dependency_plan("k", 3).await;
        tracker.increment_dependency_done("k").await;
        tracker.increment_dependency_done("k").await;

        let snap = tracker.snapshot("k").await.unwrap();
        assert_eq!(snap.dep_total, Some(3));
        assert_eq!(snap.dep_done, 2);
    }

    #[tokio::test]
    async fn test_no_mutation_after_complete() {
        let tracker = ProgressTracker::new();
        tracker.start("k", "decode k").await;
        tracker.update("k", 4, 0).await;
        tracker.complete("k").await;

        tracker.update("k", 10, 10).await;
        tracker.increment_dependency_done("k").await;

        let snap = tracker.snapshot("k").await.unwrap();
        assert!(!snap.active);
        assert_eq!(snap.chunks_found, 4);
        assert_eq!(snap.dep_done, 0);
    }

    #[tokio::test]
    async fn test_subscription_receives_snapshots() {
        let tracker = ProgressTracker::new();
        let mut rx = tracker.subscribe();

        tracker.start("k", "decode k").await;
        tracker.update("k", 2, 1).await;
        tracker.complete("k").await;

        let first = rx.recv().await.unwrap();
        assert!(first.active);
        let second = rx.recv().await.unwrap();
        assert_eq!(second.chunks_found, 2);
        let third = rx.recv().await.unwrap();
        assert!(!third.active);
    }
}
