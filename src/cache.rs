// This file is a part of onyx-core.
// Licensed under the GNU Affero General Public License v3.0; see the workspace LICENSE.

//! The in-memory cache. A key→value map with a bounded recency list for
//! evictable keys, a nullish-key set, and a named pending-task map.
//!
//! Grounded on `corestore::htable::Coremap` (a guarded concurrent map wrapper
//! around the crate's hash table) for the map-with-auxiliary-bookkeeping
//! shape, generalized here to also track recency and nullish state, which
//! `Coremap` itself doesn't need since `skyd` evicts at the table level, not
//! the key level.

use crate::value::Value;
use parking_lot::RwLock;
use std::collections::{HashMap, VecDeque};

/// In-memory snapshot of key to value, with recency tracking for LRU
/// eviction and nullish-key bookkeeping.
pub struct Cache {
    inner: RwLock<Inner>,
    max_cached_keys: usize,
    evictable: std::collections::HashSet<String>,
}

struct Inner {
    values: HashMap<String, Value>,
    /// Keys confirmed to hold `null` in storage, distinct from "never read".
    nullish: std::collections::HashSet<String>,
    /// Most-recently-used at the back; only evictable keys are tracked here.
    recency: VecDeque<String>,
}

impl Cache {
    pub fn new(max_cached_keys: usize, evictable: impl IntoIterator<Item = String>) -> Self {
        Self {
            inner: RwLock::new(Inner {
                values: HashMap::new(),
                nullish: std::collections::HashSet::new(),
                recency: VecDeque::new(),
            }),
            max_cached_keys,
            evictable: evictable.into_iter().collect(),
        }
    }

    /// `cache.get(key)`: `None` means "no cached entry" (never read, or
    /// removed). A cached `Value::Null` is a real, present value.
    pub fn get(&self, key: &str) -> Option<Value> {
        let mut inner = self.inner.write();
        let found = inner.values.get(key).cloned();
        if found.is_some() {
            Self::touch(&mut inner.recency, &self.evictable, key);
        }
        found
    }

    pub fn contains(&self, key: &str) -> bool {
        self.inner.read().values.contains_key(key)
    }

    pub fn is_nullish(&self, key: &str) -> bool {
        self.inner.read().nullish.contains(key)
    }

    /// `hasValueChanged(key, v)`: true iff `v` differs structurally from
    /// the cached value, or the key is uncached.
    pub fn has_value_changed(&self, key: &str, v: &Value) -> bool {
        match self.inner.read().values.get(key) {
            Some(existing) => existing != v,
            None => true,
        }
    }

    /// Write `value` into the cache, updating recency and nullish
    /// bookkeeping. Returns the evicted LRU key, if eviction pressure
    /// forced one out as a side effect of inserting a new evictable key.
    pub fn set(&self, key: &str, value: Value) -> Option<String> {
        let mut inner = self.inner.write();
        if value.is_null() {
            inner.nullish.insert(key.to_owned());
        } else {
            inner.nullish.remove(key);
        }
        inner.values.insert(key.to_owned(), value);
        Self::touch(&mut inner.recency, &self.evictable, key);
        self.enforce_capacity(&mut inner)
    }

    pub fn remove(&self, key: &str) {
        let mut inner = self.inner.write();
        inner.values.remove(key);
        inner.nullish.remove(key);
        inner.recency.retain(|k| k != key);
    }

    /// Remove every key for which `keep` returns false. Used by `clear`.
    pub fn retain(&self, mut keep: impl FnMut(&str) -> bool) {
        let mut inner = self.inner.write();
        inner.values.retain(|k, _| keep(k));
        inner.nullish.retain(|k| keep(k));
        inner.recency.retain(|k| keep(k));
    }

    pub fn keys(&self) -> Vec<String> {
        self.inner.read().values.keys().cloned().collect()
    }

    fn touch(recency: &mut VecDeque<String>, evictable: &std::collections::HashSet<String>, key: &str) {
        if !evictable.contains(key) {
            return;
        }
        if let Some(pos) = recency.iter().position(|k| k == key) {
            recency.remove(pos);
        }
        recency.push_back(key.to_owned());
    }

    /// Enforce `max_cached_keys` by evicting the least-recently-used
    /// *evictable* key. `max_cached_keys == 0` disables eviction.
    fn enforce_capacity(&self, inner: &mut Inner) -> Option<String> {
        if self.max_cached_keys == 0 {
            return None;
        }
        if inner.values.len() <= self.max_cached_keys {
            return None;
        }
        let victim = inner.recency.pop_front()?;
        inner.values.remove(&victim);
        inner.nullish.remove(&victim);
        Some(victim)
    }

    /// Explicitly evict the least-recently-used evictable key, regardless
    /// of whether capacity is currently exceeded. Used by the storage-
    /// failure retry path, which evicts to relieve storage pressure rather
    /// than to enforce `max_cached_keys`.
    pub fn evict_lru(&self) -> Option<String> {
        let mut inner = self.inner.write();
        let victim = inner.recency.pop_front()?;
        inner.values.remove(&victim);
        inner.nullish.remove(&victim);
        Some(victim)
    }
}

/// Named long-running tasks other operations may await, e.g. `clear`.
/// Advisory only — nothing enforces that writers actually wait.
#[derive(Default)]
pub struct PendingTasks {
    inner: tokio::sync::Mutex<HashMap<String, tokio::sync::watch::Receiver<bool>>>,
}

impl PendingTasks {
    pub fn new() -> Self {
        Self::default()
    }

    /// Register a named task. Returns a completion signal the caller must
    /// call `.send(true)` on once the task finishes.
    pub async fn register(&self, name: &str) -> tokio::sync::watch::Sender<bool> {
        let (tx, rx) = tokio::sync::watch::channel(false);
        self.inner.lock().await.insert(name.to_owned(), rx);
        tx
    }

    /// Await a previously-registered named task, if one is pending.
    pub async fn wait_for(&self, name: &str) {
        let mut rx = {
            let guard = self.inner.lock().await;
            match guard.get(name) {
                Some(rx) => rx.clone(),
                None => return,
            }
        };
        let _ = rx.wait_for(|done| *done).await;
        self.inner.lock().await.remove(name);
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn uncached_key_has_changed() {
        let c = Cache::new(1000, []);
        assert!(c.has_value_changed("k", &json!(1)));
    }

    #[test]
    fn identical_value_has_not_changed() {
        let c = Cache::new(1000, []);
        c.set("k", json!({"a": 1}));
        assert!(!c.has_value_changed("k", &json!({"a": 1})));
        assert!(c.has_value_changed("k", &json!({"a": 2})));
    }

    #[test]
    fn null_value_is_present_not_absent() {
        let c = Cache::new(1000, []);
        c.set("k", Value::Null);
        assert!(c.contains("k"));
        assert!(c.is_nullish("k"));
    }

    #[test]
    fn remove_clears_nullish_and_value() {
        let c = Cache::new(1000, []);
        c.set("k", Value::Null);
        c.remove("k");
        assert!(!c.contains("k"));
        assert!(!c.is_nullish("k"));
    }

    #[test]
    fn lru_eviction_only_applies_to_evictable_keys() {
        let c = Cache::new(1, ["a".to_owned(), "b".to_owned()]);
        c.set("permanent", json!(0));
        let evicted = c.set("a", json!(1));
        assert_eq!(evicted, None, "capacity not yet exceeded");
        let evicted = c.set("b", json!(2));
        assert_eq!(evicted.as_deref(), Some("a"));
        assert!(c.contains("permanent"), "non-evictable key survives");
        assert!(!c.contains("a"));
    }

    #[test]
    fn zero_max_disables_eviction() {
        let c = Cache::new(0, ["a".to_owned()]);
        for i in 0..10 {
            c.set(&format!("k{i}"), json!(i));
        }
        assert_eq!(c.keys().len(), 10);
    }

    #[tokio::test]
    async fn pending_task_wait_unblocks_on_send() {
        let tasks = std::sync::Arc::new(PendingTasks::new());
        let tx = tasks.register("CLEAR").await;
        let waiter_tasks = tasks.clone();
        let waiter = tokio::spawn(async move { waiter_tasks.wait_for("CLEAR").await });
        tx.send(true).unwrap();
        waiter.await.unwrap();
    }

    #[tokio::test]
    async fn pending_task_wait_is_noop_for_unknown_name() {
        let tasks = PendingTasks::new();
        tasks.wait_for("NOTHING").await;
    }
}
