// This file is a part of onyx-core.
// Licensed under the GNU Affero General Public License v3.0; see the workspace LICENSE.

//! End-to-end behavior of the write pipeline, driven through `Store`
//! against an in-memory `Storage` double and a recording `Subscribers`
//! double, the same shape as `skytable`'s own integration suite
//! (`testsuite`) driving the server through its public surface rather
//! than its internals.

use async_trait::async_trait;
use onyx_core::{Storage, StoreConfig, Subscribers, Value};
use serde_json::json;
use std::collections::{HashMap, HashSet};
use std::sync::{Arc, Mutex};

#[derive(Default)]
struct RecordingStorage {
    data: Mutex<HashMap<String, Value>>,
    merge_calls: Mutex<Vec<(String, Value, Value, bool)>>,
    set_calls: Mutex<Vec<(String, Value)>>,
}

#[async_trait]
impl Storage for RecordingStorage {
    async fn get_item(&self, key: &str) -> Result<Option<Value>, String> {
        Ok(self.data.lock().unwrap().get(key).cloned())
    }
    async fn get_all_keys(&self) -> Result<HashSet<String>, String> {
        Ok(self.data.lock().unwrap().keys().cloned().collect())
    }
    async fn set_item(&self, key: &str, value: Value) -> Result<(), String> {
        self.set_calls.lock().unwrap().push((key.to_owned(), value.clone()));
        self.data.lock().unwrap().insert(key.to_owned(), value);
        Ok(())
    }
    async fn multi_set(&self, pairs: &[(String, Value)]) -> Result<(), String> {
        for (k, v) in pairs {
            self.set_calls.lock().unwrap().push((k.clone(), v.clone()));
            self.data.lock().unwrap().insert(k.clone(), v.clone());
        }
        Ok(())
    }
    async fn merge_item(
        &self,
        key: &str,
        delta: &Value,
        pre_merged: &Value,
        should_set_value: bool,
    ) -> Result<(), String> {
        self.merge_calls.lock().unwrap().push((
            key.to_owned(),
            delta.clone(),
            pre_merged.clone(),
            should_set_value,
        ));
        self.data
            .lock()
            .unwrap()
            .insert(key.to_owned(), pre_merged.clone());
        Ok(())
    }
    async fn multi_merge(&self, pairs: &[(String, Value)]) -> Result<(), String> {
        for (k, v) in pairs {
            self.merge_calls
                .lock()
                .unwrap()
                .push((k.clone(), v.clone(), v.clone(), false));
            self.data.lock().unwrap().insert(k.clone(), v.clone());
        }
        Ok(())
    }
    async fn remove_items(&self, keys: &[String]) -> Result<(), String> {
        for k in keys {
            self.data.lock().unwrap().remove(k);
        }
        Ok(())
    }
}

#[derive(Default)]
struct RecordingSubscribers {
    broadcasts: Mutex<Vec<(String, Option<Value>, bool)>>,
}

#[async_trait]
impl Subscribers for RecordingSubscribers {
    async fn broadcast_update(&self, key: &str, value: &Option<Value>, has_changed: bool) {
        self.broadcasts
            .lock()
            .unwrap()
            .push((key.to_owned(), value.clone(), has_changed));
    }
    async fn schedule_subscriber_update(
        &self,
        _key: &str,
        _value: &Option<Value>,
        _prev_value: &Option<Value>,
    ) {
    }
    async fn schedule_notify_collection_subscribers(
        &self,
        _collection_key: &str,
        _members: &[(String, Option<Value>)],
        _previous: Option<&[(String, Option<Value>)]>,
    ) {
    }
    async fn refresh_session_id(&self) {}
}

#[tokio::test]
async fn merge_coalescing_single_storage_write() {
    let storage = Arc::new(RecordingStorage::default());
    let subs = Arc::new(RecordingSubscribers::default());
    let store = Arc::new(onyx_core::Store::new(StoreConfig::default(), storage.clone(), subs));

    let a = store.merge("a", json!({"x": 1}));
    let b = store.merge("a", json!({"y": 2}));
    let c = store.merge("a", json!({"x": 3}));
    let (r1, r2, r3) = tokio::join!(a, b, c);
    r1.unwrap();
    r2.unwrap();
    r3.unwrap();

    assert_eq!(
        *storage.merge_calls.lock().unwrap(),
        vec![("a".to_owned(), json!({"x": 3, "y": 2}), json!({"x": 3, "y": 2}), true)]
    );
    assert_eq!(storage.data.lock().unwrap().get("a"), Some(&json!({"x": 3, "y": 2})));
}

#[tokio::test]
async fn nested_delete_retains_null_in_delta() {
    let storage = Arc::new(RecordingStorage::default());
    storage
        .data
        .lock()
        .unwrap()
        .insert("u".to_owned(), json!({"a": 1, "b": 2}));
    let subs = Arc::new(RecordingSubscribers::default());
    let store = Arc::new(onyx_core::Store::new(StoreConfig::default(), storage.clone(), subs));

    store.merge("u", json!({"a": null})).await.unwrap();

    let calls = storage.merge_calls.lock().unwrap();
    assert_eq!(calls.len(), 1);
    assert_eq!(calls[0].1, json!({"a": null}), "delta retains the null marker");
    assert_eq!(storage.data.lock().unwrap().get("u"), Some(&json!({"b": 2})));
}

/// A `Storage` whose `get_item` blocks on a `Notify`, so a test can pause an
/// in-flight merge fold at its one suspension point and interleave a
/// competing `set`.
#[derive(Default)]
struct GatedStorage {
    inner: RecordingStorage,
    gate: tokio::sync::Notify,
}

#[async_trait]
impl Storage for GatedStorage {
    async fn get_item(&self, key: &str) -> Result<Option<Value>, String> {
        self.gate.notified().await;
        self.inner.get_item(key).await
    }
    async fn get_all_keys(&self) -> Result<HashSet<String>, String> {
        self.inner.get_all_keys().await
    }
    async fn set_item(&self, key: &str, value: Value) -> Result<(), String> {
        self.inner.set_item(key, value).await
    }
    async fn multi_set(&self, pairs: &[(String, Value)]) -> Result<(), String> {
        self.inner.multi_set(pairs).await
    }
    async fn merge_item(
        &self,
        key: &str,
        delta: &Value,
        pre_merged: &Value,
        should_set_value: bool,
    ) -> Result<(), String> {
        self.inner.merge_item(key, delta, pre_merged, should_set_value).await
    }
    async fn multi_merge(&self, pairs: &[(String, Value)]) -> Result<(), String> {
        self.inner.multi_merge(pairs).await
    }
    async fn remove_items(&self, keys: &[String]) -> Result<(), String> {
        self.inner.remove_items(keys).await
    }
}

#[tokio::test]
async fn set_cancels_in_flight_merge() {
    let storage = Arc::new(GatedStorage::default());
    let subs = Arc::new(RecordingSubscribers::default());
    let store = Arc::new(onyx_core::Store::new(StoreConfig::default(), storage.clone(), subs));

    let merge_store = store.clone();
    let merge_task = tokio::spawn(async move { merge_store.merge("k", json!({"x": 1})).await });

    // Let the spawned merge reach its storage.get_item suspension point.
    for _ in 0..16 {
        tokio::task::yield_now().await;
    }

    store.set("k", Some(json!({"z": 9}))).await.unwrap();

    // Release the gate: the stalled fold resumes, rechecks queue-entry
    // identity, finds itself aborted, and finishes as a no-op.
    storage.gate.notify_one();
    merge_task.await.unwrap().unwrap();

    assert_eq!(store.get_or_default("k"), Some(json!({"z": 9})));
    assert!(
        storage.inner.merge_calls.lock().unwrap().is_empty(),
        "the cancelled merge must never reach storage"
    );
}

#[tokio::test]
async fn clear_with_preserve_and_default() {
    let storage = Arc::new(RecordingStorage::default());
    let subs = Arc::new(RecordingSubscribers::default());
    let cfg = StoreConfig::builder()
        .initial_key_state("lang", json!("en"))
        .build();
    let store = Arc::new(onyx_core::Store::new(cfg, storage.clone(), subs));

    store.set("lang", Some(json!("fr"))).await.unwrap();
    store.set("session", Some(json!("t"))).await.unwrap();
    store.set("pref", Some(json!("dark"))).await.unwrap();

    let preserve: HashSet<String> = ["pref".to_owned()].into_iter().collect();
    store.clear(&preserve).await.unwrap();

    assert_eq!(store.get_or_default("lang"), Some(json!("en")));
    assert_eq!(store.get_or_default("pref"), Some(json!("dark")));
    assert_eq!(store.get_or_default("session"), None);
}

#[tokio::test]
async fn collection_collapse_in_update() {
    let storage = Arc::new(RecordingStorage::default());
    let subs = Arc::new(RecordingSubscribers::default());
    let cfg = StoreConfig::builder().collection_keys(["r_"]).build();
    let store = Arc::new(onyx_core::Store::new(cfg, storage.clone(), subs));

    let ops = vec![
        onyx_core::Operation::Merge {
            key: "r_1".to_owned(),
            value: json!({"a": 1}),
        },
        onyx_core::Operation::Merge {
            key: "r_2".to_owned(),
            value: json!({"a": 2}),
        },
        onyx_core::Operation::Set {
            key: "r_1".to_owned(),
            value: json!({"a": 9}),
        },
    ];
    store.update(ops).await.unwrap();

    assert_eq!(store.get_or_default("r_1"), Some(json!({"a": 9})));
    assert_eq!(store.get_or_default("r_2"), Some(json!({"a": 2})));
    // r_1's queue started with `Null` (the `set` reset it), so it was routed
    // through the forced-set portion as a plain storage write, not a merge.
    assert!(storage
        .merge_calls
        .lock()
        .unwrap()
        .iter()
        .all(|(k, ..)| k != "r_1"));
}

#[tokio::test]
async fn skippable_member_coerces_to_null() {
    let storage = Arc::new(RecordingStorage::default());
    let subs = Arc::new(RecordingSubscribers::default());
    let cfg = StoreConfig::builder()
        .collection_keys(["r_"])
        .skippable_collection_member_ids(["42"])
        .build();
    let store = Arc::new(onyx_core::Store::new(cfg, storage.clone(), subs));

    store.set("r_42", Some(json!({"a": 1}))).await.unwrap();

    assert_eq!(store.get_or_default("r_42"), None);
    assert!(storage.data.lock().unwrap().get("r_42").is_none());
}

#[tokio::test]
async fn update_collapses_same_key_merges_without_dropping_nested_null() {
    // Two merges on the same non-collection key, the first carrying a
    // nested-null field deletion, collapsed by `update()` into a single
    // fold before being handed to the per-key merge path. The deletion
    // marker must survive the collapse, not just a direct `merge` call.
    let storage = Arc::new(RecordingStorage::default());
    storage
        .data
        .lock()
        .unwrap()
        .insert("u".to_owned(), json!({"a": 1, "b": 0}));
    let subs = Arc::new(RecordingSubscribers::default());
    let store = Arc::new(onyx_core::Store::new(StoreConfig::default(), storage.clone(), subs));

    let ops = vec![
        onyx_core::Operation::Merge {
            key: "u".to_owned(),
            value: json!({"a": null}),
        },
        onyx_core::Operation::Merge {
            key: "u".to_owned(),
            value: json!({"b": 2}),
        },
    ];
    store.update(ops).await.unwrap();

    assert_eq!(store.get_or_default("u"), Some(json!({"b": 2})));
}
