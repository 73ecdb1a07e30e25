//! Concurrent keyed store for live watcher state

use dashmap::DashMap;
use std::collections::{HashMap, HashSet};
use tracing::debug;

/// Latest watcher-reported state for one resource kind, keyed by name.
///
/// One watcher writes, any number of readers load and range concurrently.
/// `range` visits a weakly consistent view: it holds one shard lock at a
/// time, never the whole map.
#[derive(Debug)]
pub struct LiveStore<V> {
    kind: &'static str,
    entries: DashMap<String, V>,
}

impl<V: Clone> LiveStore<V> {
    pub fn new(kind: &'static str) -> Self {
        Self {
            kind,
            entries: DashMap::new(),
        }
    }

    /// Insert or replace an entry
    pub fn store(&self, key: impl Into<String>, value: V) {
        self.entries.insert(key.into(), value);
    }

    /// Get a copy of an entry
    pub fn load(&self, key: &str) -> Option<V> {
        self.entries.get(key).map(|r| r.value().clone())
    }

    /// Remove an entry
    pub fn delete(&self, key: &str) -> Option<V> {
        self.entries.remove(key).map(|(_, v)| v)
    }

    /// Visit every entry.
    ///
    /// The callback must not write to this same store.
    pub fn range<F>(&self, mut f: F)
    where
        F: FnMut(&str, &V),
    {
        for entry in self.entries.iter() {
            f(entry.key(), entry.value());
        }
    }

    /// Sorted list of current keys
    pub fn keys(&self) -> Vec<String> {
        let mut keys: Vec<String> = self.entries.iter().map(|r| r.key().clone()).collect();
        keys.sort();
        keys
    }

    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }

    /// Apply a full-state callback.
    ///
    /// Stores every entry of `latest`, then deletes every key missing from
    /// it. Readers may briefly observe both the new entries and stale keys
    /// between the two phases.
    pub fn reconcile(&self, latest: HashMap<String, V>) {
        let before = self.entries.len();
        let keep: HashSet<String> = latest.keys().cloned().collect();

        for (key, value) in latest {
            self.entries.insert(key, value);
        }

        let mut deleted = 0usize;
        self.entries.retain(|key, _| {
            let present = keep.contains(key);
            if !present {
                deleted += 1;
            }
            present
        });

        debug!(
            kind = self.kind,
            before,
            after = self.entries.len(),
            deleted,
            "Reconciled live state"
        );
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn state(keys: &[&str]) -> HashMap<String, u32> {
        keys.iter()
            .enumerate()
            .map(|(i, k)| (k.to_string(), i as u32))
            .collect()
    }

    #[test]
    fn test_store_load_delete() {
        let store = LiveStore::new("node");
        store.store("n1", 1u32);
        assert_eq!(store.load("n1"), Some(1));

        store.store("n1", 2);
        assert_eq!(store.load("n1"), Some(2));
        assert_eq!(store.len(), 1);

        assert_eq!(store.delete("n1"), Some(2));
        assert!(store.load("n1").is_none());
        assert!(store.is_empty());
    }

    #[test]
    fn test_reconcile_leaves_exactly_latest_keys() {
        let store = LiveStore::new("node");
        store.reconcile(state(&["a", "b", "c"]));
        assert_eq!(store.keys(), vec!["a", "b", "c"]);

        store.reconcile(state(&["b", "d"]));
        assert_eq!(store.keys(), vec!["b", "d"]);

        store.reconcile(state(&[]));
        assert!(store.is_empty());
    }

    #[test]
    fn test_reconcile_sequence_matches_last_state() {
        let store = LiveStore::new("pod");
        let sequence: Vec<Vec<&str>> = vec![
            vec!["x"],
            vec!["x", "y", "z"],
            vec!["z"],
            vec!["a", "b"],
            vec!["b", "z", "q"],
        ];

        for keys in sequence {
            store.reconcile(state(&keys));
            let mut expected: Vec<String> = keys.iter().map(|k| k.to_string()).collect();
            expected.sort();
            assert_eq!(store.keys(), expected);
        }
    }

    #[test]
    fn test_reconcile_replaces_values() {
        let store = LiveStore::new("service");
        store.store("svc", 10u32);

        let mut latest = HashMap::new();
        latest.insert("svc".to_string(), 20u32);
        store.reconcile(latest);

        assert_eq!(store.load("svc"), Some(20));
    }

    #[test]
    fn test_range_visits_every_entry() {
        let store = LiveStore::new("node");
        store.reconcile(state(&["a", "b"]));

        let mut seen = Vec::new();
        store.range(|k, _| seen.push(k.to_string()));
        seen.sort();
        assert_eq!(seen, vec!["a", "b"]);
    }

    #[tokio::test]
    async fn test_concurrent_reconcile_and_range() {
        let store = std::sync::Arc::new(LiveStore::new("pod"));

        let writer = {
            let store = store.clone();
            tokio::spawn(async move {
                for i in 0..200u32 {
                    let keys = if i % 2 == 0 { vec!["a", "b"] } else { vec!["b", "c"] };
                    store.reconcile(state(&keys));
                    tokio::task::yield_now().await;
                }
            })
        };

        let reader = {
            let store = store.clone();
            tokio::spawn(async move {
                for _ in 0..200 {
                    let mut count = 0;
                    store.range(|_, _| count += 1);
                    assert!(count <= 3);
                    tokio::task::yield_now().await;
                }
            })
        };

        writer.await.unwrap();
        reader.await.unwrap();
        assert_eq!(store.keys(), vec!["b", "c"]);
    }
}
