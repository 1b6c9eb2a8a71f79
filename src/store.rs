// This file is a part of onyx-core.
// Licensed under the GNU Affero General Public License v3.0; see the workspace LICENSE.

//! Write operations: `set`, `multiSet`, `merge`, `mergeCollection`,
//! `setCollection`, `clear`. `update()` lives in `ops.rs` since it composes
//! these rather than being one itself.
//!
//! `Store` is an explicit construction seam: it bundles the cache, merge
//! queue, and driver so the write pipeline is testable without a
//! process-wide singleton, the same way `skyd`'s `CoreDB` bundles its
//! keyspace table and snapshot engine rather than reaching for statics.

use crate::cache::{Cache, PendingTasks};
use crate::collection::{apply_skippable_filter, member_id, validate_collection_members, KeyRegistry};
use crate::config::StoreConfig;
use crate::error::{log_dropped, DroppedWrite, StoreError, StoreResult};
use crate::merge::apply_merge;
use crate::queue::MergeQueue;
use crate::storage::Storage;
use crate::subscriber::Subscribers;
use crate::value::{check_compatible, remove_nested_nulls, MaybeValue, Value};
use std::collections::{BTreeMap, HashSet};
use std::future::Future;
use std::sync::Arc;

/// Bounded retry count for `evictStorageAndRetry`; typically 1-2 is enough
/// to relieve storage pressure before giving up.
const MAX_EVICT_RETRIES: usize = 2;

pub struct Store {
    config: StoreConfig,
    registry: KeyRegistry,
    cache: Arc<Cache>,
    queue: Arc<MergeQueue>,
    storage: Arc<dyn Storage>,
    subscribers: Arc<dyn Subscribers>,
    pending_tasks: Arc<PendingTasks>,
}

impl Store {
    pub fn new(
        config: StoreConfig,
        storage: Arc<dyn Storage>,
        subscribers: Arc<dyn Subscribers>,
    ) -> Self {
        let registry = KeyRegistry::new(config.collection_keys.clone(), config.keys.clone());
        let cache = Arc::new(Cache::new(
            config.max_cached_keys_count,
            config.evictable_keys.clone(),
        ));
        let queue = Arc::new(MergeQueue::new(cache.clone(), storage.clone(), subscribers.clone()));
        log::info!(
            "onyx-core: initialized with {} declared key(s), {} collection prefix(es), {} evictable key(s)",
            config.keys.len(),
            config.collection_keys.len(),
            config.evictable_keys.len(),
        );
        Self {
            config,
            registry,
            cache,
            queue,
            storage,
            subscribers,
            pending_tasks: Arc::new(PendingTasks::new()),
        }
    }

    pub fn config(&self) -> &StoreConfig {
        &self.config
    }

    pub fn registry(&self) -> &KeyRegistry {
        &self.registry
    }

    pub fn pending_tasks(&self) -> &PendingTasks {
        &self.pending_tasks
    }

    /// Read `key`, falling back to its configured default state when the
    /// cache has never seen it.
    pub fn get_or_default(&self, key: &str) -> MaybeValue {
        if let Some(v) = self.cache.get(key) {
            return Some(v);
        }
        self.config.initial_key_states.get(key).cloned()
    }

    /// Run `op`, and on a storage failure evict the least-recently-used
    /// evictable key from both cache and storage, then retry, bounded.
    async fn with_evict_retry<F, Fut>(&self, mut op: F) -> StoreResult<()>
    where
        F: FnMut() -> Fut,
        Fut: Future<Output = Result<(), String>>,
    {
        let mut attempt = 0;
        loop {
            match op().await {
                Ok(()) => return Ok(()),
                Err(e) if attempt < MAX_EVICT_RETRIES => {
                    attempt += 1;
                    match self.cache.evict_lru() {
                        Some(victim) => {
                            log::debug!(
                                "storage op failed ({e}); evicting '{victim}' and retrying ({attempt}/{MAX_EVICT_RETRIES})"
                            );
                            if let Err(remove_err) =
                                self.storage.remove_items(std::slice::from_ref(&victim)).await
                            {
                                log::error!(
                                    "failed to evict '{victim}' from storage ({remove_err}); retrying anyway"
                                );
                            }
                        }
                        None => {
                            log::error!("storage op failed ({e}) and no evictable key remains");
                            return Err(StoreError::Storage(e));
                        }
                    }
                }
                Err(e) => return Err(StoreError::Storage(e)),
            }
        }
    }

    fn filtered_value(&self, key: &str, value: MaybeValue) -> MaybeValue {
        match self.registry.collection_of(key) {
            Some(collection_key) => apply_skippable_filter(
                collection_key,
                key,
                value,
                &self.config.skippable_collection_member_ids,
            ),
            None => value,
        }
    }

    /// `set(key, value)`.
    pub async fn set(&self, key: &str, value: MaybeValue) -> StoreResult<()> {
        // step 1: set wins over any in-flight merge fold
        self.queue.abort(key);
        // step 2
        let value = self.filtered_value(key, value);
        // step 3: undefined is a no-op
        let Some(value) = value else {
            return Ok(());
        };
        // step 4: null with no existing cache entry is a no-op
        if value.is_null() && !self.cache.contains(key) {
            return Ok(());
        }
        // step 5
        let existing = self.cache.get(key);
        let compat = check_compatible(&Some(value.clone()), &existing);
        if !compat.is_compatible {
            log_dropped(DroppedWrite::Incompatible {
                key: key.to_owned(),
                existing_kind: compat.existing_kind,
                new_kind: compat.new_kind,
            });
            return Ok(());
        }
        // step 6
        let normalized = remove_nested_nulls(value);
        if normalized.is_null() {
            self.cache.remove(key);
            self.subscribers.broadcast_update(key, &None, true).await;
            return self
                .with_evict_retry(|| {
                    let storage = self.storage.clone();
                    let key = key.to_owned();
                    async move { storage.remove_items(&[key]).await }
                })
                .await;
        }
        // step 7
        let has_changed = self.cache.has_value_changed(key, &normalized);
        self.cache.set(key, normalized.clone());
        self.subscribers
            .broadcast_update(key, &Some(normalized.clone()), has_changed)
            .await;
        // step 8
        if !has_changed {
            return Ok(());
        }
        self.with_evict_retry(|| {
            let storage = self.storage.clone();
            let key = key.to_owned();
            let value = normalized.clone();
            async move { storage.set_item(&key, value).await }
        })
        .await
    }

    /// `multiSet(data)`.
    pub async fn multi_set(&self, data: BTreeMap<String, Value>) -> StoreResult<()> {
        let mut pairs = Vec::with_capacity(data.len());
        for (key, value) in data {
            let Some(filtered) = self.filtered_value(&key, Some(value)) else {
                continue;
            };
            self.queue.abort(&key);
            let normalized = remove_nested_nulls(filtered);
            let prev = self.cache.get(&key);
            let new_value = if normalized.is_null() {
                self.cache.remove(&key);
                None
            } else {
                self.cache.set(&key, normalized.clone());
                Some(normalized.clone())
            };
            self.subscribers
                .schedule_subscriber_update(&key, &new_value, &prev)
                .await;
            pairs.push((key, normalized));
        }
        if pairs.is_empty() {
            return Ok(());
        }
        self.with_evict_retry(|| {
            let storage = self.storage.clone();
            let pairs = pairs.clone();
            async move { storage.multi_set(&pairs).await }
        })
        .await
    }

    /// `merge(key, delta)`, routed through the single-flight merge queue.
    pub async fn merge(&self, key: &str, delta: Value) -> StoreResult<()> {
        let filtered = self.filtered_value(key, Some(delta));
        let Some(delta) = filtered else {
            return Ok(());
        };
        self.queue.enqueue(key, delta).await
    }

    /// `mergeCollection(collectionKey, members)`, the public entry point —
    /// every member goes through the existing/new resolution in
    /// [`Self::merge_collection_inner`] with no forced-set portion.
    pub async fn merge_collection(
        &self,
        collection_key: &str,
        members: BTreeMap<String, Value>,
    ) -> StoreResult<()> {
        if members.is_empty() {
            return Ok(());
        }
        validate_collection_members(collection_key, members.keys().map(String::as_str))
            .map_err(|key| StoreError::InvalidCollectionMember {
                collection: collection_key.to_owned(),
                key,
            })?;
        self.merge_collection_inner(collection_key, BTreeMap::new(), members)
            .await
    }

    /// Shared implementation behind the public `mergeCollection` and
    /// `update()`'s Phase 3 collection collapse. `set_members` are forced
    /// full overwrites (bypassing existing/new resolution, the same as a
    /// direct `set`); `merge_members` go through the normal existing-vs-new
    /// split: a null member is removed outright, an existing key merges
    /// with compatibility checking, and a fresh key is written as-is.
    pub(crate) async fn merge_collection_inner(
        &self,
        collection_key: &str,
        set_members: BTreeMap<String, Value>,
        merge_members: BTreeMap<String, Value>,
    ) -> StoreResult<()> {
        let storage_keys = self
            .storage
            .get_all_keys()
            .await
            .map_err(StoreError::Storage)?;

        let mut removed: Vec<String> = Vec::new();
        let mut new_pairs: Vec<(String, Value)> = Vec::new();
        let mut existing_pairs: Vec<(String, Value)> = Vec::new();
        let mut previous: Vec<(String, MaybeValue)> = Vec::new();
        let mut merged: Vec<(String, MaybeValue)> = Vec::new();

        for (key, value) in set_members {
            let Some(filtered) = apply_skippable_filter(
                collection_key,
                &key,
                Some(value),
                &self.config.skippable_collection_member_ids,
            ) else {
                continue;
            };
            previous.push((key.clone(), self.cache.get(&key)));
            let normalized = remove_nested_nulls(filtered);
            if normalized.is_null() {
                removed.push(key.clone());
                merged.push((key, None));
            } else {
                new_pairs.push((key.clone(), normalized.clone()));
                merged.push((key, Some(normalized)));
            }
        }

        for (key, value) in merge_members {
            let Some(filtered) = apply_skippable_filter(
                collection_key,
                &key,
                Some(value),
                &self.config.skippable_collection_member_ids,
            ) else {
                continue;
            };
            // a null member is removed outright
            if filtered.is_null() {
                previous.push((key.clone(), self.cache.get(&key)));
                removed.push(key.clone());
                merged.push((key, None));
                continue;
            }
            let existing_value = self.cache.get(&key);
            previous.push((key.clone(), existing_value.clone()));
            if storage_keys.contains(&key) {
                let compat = check_compatible(&Some(filtered.clone()), &existing_value);
                if !compat.is_compatible {
                    log_dropped(DroppedWrite::Incompatible {
                        key: key.clone(),
                        existing_kind: compat.existing_kind,
                        new_kind: compat.new_kind,
                    });
                    previous.pop();
                    continue;
                }
                let pre_merged =
                    apply_merge(existing_value, std::slice::from_ref(&filtered), true)
                        .expect("non-null delta");
                existing_pairs.push((key.clone(), filtered));
                merged.push((key, Some(pre_merged)));
            } else {
                // fresh write: cannot "delete" fields that don't exist
                let stripped = remove_nested_nulls(filtered);
                new_pairs.push((key.clone(), stripped.clone()));
                merged.push((key, Some(stripped)));
            }
        }

        if !removed.is_empty() {
            self.with_evict_retry(|| {
                let storage = self.storage.clone();
                let removed = removed.clone();
                async move { storage.remove_items(&removed).await }
            })
            .await?;
        }
        if !existing_pairs.is_empty() {
            self.with_evict_retry(|| {
                let storage = self.storage.clone();
                let pairs = existing_pairs.clone();
                async move { storage.multi_merge(&pairs).await }
            })
            .await?;
        }
        if !new_pairs.is_empty() {
            self.with_evict_retry(|| {
                let storage = self.storage.clone();
                let pairs = new_pairs.clone();
                async move { storage.multi_set(&pairs).await }
            })
            .await?;
        }

        for (key, value) in &merged {
            match value {
                Some(v) => {
                    self.cache.set(key, v.clone());
                }
                None => self.cache.remove(key),
            }
        }

        self.subscribers
            .schedule_notify_collection_subscribers(collection_key, &merged, Some(&previous))
            .await;
        Ok(())
    }

    /// `setCollection(collectionKey, members)`: a full-replace of a
    /// collection's membership, removing any existing member absent from
    /// the new set.
    pub async fn set_collection(
        &self,
        collection_key: &str,
        members: BTreeMap<String, Value>,
    ) -> StoreResult<()> {
        validate_collection_members(collection_key, members.keys().map(String::as_str))
            .map_err(|key| StoreError::InvalidCollectionMember {
                collection: collection_key.to_owned(),
                key,
            })?;
        let storage_keys = self
            .storage
            .get_all_keys()
            .await
            .map_err(StoreError::Storage)?;
        let mut combined = members;
        for existing_key in storage_keys {
            if member_id(collection_key, &existing_key).is_some()
                && !combined.contains_key(&existing_key)
            {
                combined.insert(existing_key, Value::Null);
            }
        }
        let previous: Vec<(String, MaybeValue)> = combined
            .keys()
            .map(|k| (k.clone(), self.cache.get(k)))
            .collect();
        let merged: Vec<(String, MaybeValue)> = combined
            .iter()
            .map(|(k, v)| (k.clone(), (!v.is_null()).then(|| v.clone())))
            .collect();
        self.multi_set(combined).await?;
        self.subscribers
            .schedule_notify_collection_subscribers(collection_key, &merged, Some(&previous))
            .await;
        Ok(())
    }

    /// `clear(keysToPreserve)`: resets every key not in `keys_to_preserve`
    /// to its configured default, or removes it entirely if it has none.
    pub async fn clear(&self, keys_to_preserve: &HashSet<String>) -> StoreResult<()> {
        let completion = self.pending_tasks.register("CLEAR").await;
        let result = self.clear_inner(keys_to_preserve).await;
        let _ = completion.send(true);
        result
    }

    async fn clear_inner(&self, keys_to_preserve: &HashSet<String>) -> StoreResult<()> {
        let storage_keys = self
            .storage
            .get_all_keys()
            .await
            .map_err(StoreError::Storage)?;
        let mut all_keys: HashSet<String> = storage_keys;
        all_keys.extend(self.config.initial_key_states.keys().cloned());
        all_keys.extend(self.cache.keys());

        let mut removed = Vec::new();
        let mut defaults = Vec::new();
        for key in all_keys {
            if keys_to_preserve.contains(&key) {
                continue;
            }
            match self.config.initial_key_states.get(&key) {
                Some(default_value) => defaults.push((key, default_value.clone())),
                None => removed.push(key),
            }
        }

        self.cache.retain(|k| keys_to_preserve.contains(k));
        if !removed.is_empty() {
            self.with_evict_retry(|| {
                let storage = self.storage.clone();
                let removed = removed.clone();
                async move { storage.remove_items(&removed).await }
            })
            .await?;
        }
        self.subscribers.refresh_session_id().await;
        if !defaults.is_empty() {
            self.with_evict_retry(|| {
                let storage = self.storage.clone();
                let defaults = defaults.clone();
                async move { storage.multi_set(&defaults).await }
            })
            .await?;
        }
        for (key, value) in &defaults {
            self.cache.set(key, value.clone());
            self.subscribers
                .broadcast_update(key, &Some(value.clone()), true)
                .await;
        }
        for key in &removed {
            self.subscribers.broadcast_update(key, &None, true).await;
        }
        Ok(())
    }

    pub(crate) fn cache(&self) -> &Arc<Cache> {
        &self.cache
    }

    pub(crate) fn storage(&self) -> &Arc<dyn Storage> {
        &self.storage
    }

    pub(crate) fn subscribers(&self) -> &Arc<dyn Subscribers> {
        &self.subscribers
    }
}
