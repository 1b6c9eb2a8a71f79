// This file is a part of onyx-core.
// Licensed under the GNU Affero General Public License v3.0; see the workspace LICENSE.

//! The Merge Queue: a per-key FIFO of pending deltas and a single in-flight
//! fold, guaranteeing at most one storage read and one storage write per
//! batch regardless of how many deltas were coalesced.
//!
//! Grounded on `engine::fractal::mgr::FractalMgr`'s task-dispatch shape (a
//! manager that coalesces work items and drives them through a bounded
//! number of background operations) and on `engine::core::model::delta`'s
//! notion of a queued delta awaiting a fold — generalized here so the
//! "single in-flight future" is explicit instead of an unbounded mpsc queue,
//! since we need single-flight-per-key semantics rather than a global
//! worker pool.

use crate::cache::Cache;
use crate::error::{log_dropped, DroppedWrite, StoreError, StoreResult};
use crate::merge::apply_merge;
use crate::storage::Storage;
use crate::subscriber::Subscribers;
use crate::value::{check_compatible, Value};
use parking_lot::Mutex as SyncMutex;
use std::collections::HashMap;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use tokio::sync::Notify;

struct Entry {
    deltas: SyncMutex<Vec<Value>>,
    finished: AtomicBool,
    result: SyncMutex<Option<Result<(), String>>>,
    notify: Notify,
}

impl Entry {
    fn new(first: Value) -> Self {
        Self {
            deltas: SyncMutex::new(vec![first]),
            finished: AtomicBool::new(false),
            result: SyncMutex::new(None),
            notify: Notify::new(),
        }
    }

    fn finish(&self, result: Result<(), String>) {
        *self.result.lock() = Some(result);
        self.finished.store(true, Ordering::SeqCst);
        self.notify.notify_waiters();
    }

    async fn wait(&self) -> StoreResult<()> {
        loop {
            if self.finished.load(Ordering::SeqCst) {
                return self
                    .result
                    .lock()
                    .clone()
                    .expect("finished implies result is set")
                    .map_err(StoreError::Storage);
            }
            let notified = self.notify.notified();
            if self.finished.load(Ordering::SeqCst) {
                continue;
            }
            notified.await;
        }
    }
}

/// Per-key FIFO of pending deltas plus the single promise representing the
/// eventual completion of folding that list.
pub struct MergeQueue {
    entries: SyncMutex<HashMap<String, Arc<Entry>>>,
    cache: Arc<Cache>,
    storage: Arc<dyn Storage>,
    subscribers: Arc<dyn Subscribers>,
}

impl MergeQueue {
    pub fn new(cache: Arc<Cache>, storage: Arc<dyn Storage>, subscribers: Arc<dyn Subscribers>) -> Self {
        Self {
            entries: SyncMutex::new(HashMap::new()),
            cache,
            storage,
            subscribers,
        }
    }

    /// Enqueue `delta` for `key`. If no fold is pending, this call *becomes*
    /// the fold (running `run_fold` inline) and resolves when the batch it
    /// ends up owning has fully settled. If a fold is already pending, this
    /// call appends to its delta list and awaits the same completion
    /// signal — all enqueuers for the same batch observe the same outcome.
    pub async fn enqueue(&self, key: &str, delta: Value) -> StoreResult<()> {
        let (entry, is_leader) = {
            let mut map = self.entries.lock();
            if let Some(existing) = map.get(key) {
                existing.deltas.lock().push(delta);
                (existing.clone(), false)
            } else {
                let entry = Arc::new(Entry::new(delta));
                map.insert(key.to_owned(), entry.clone());
                (entry, true)
            }
        };
        if is_leader {
            self.run_fold(key, &entry).await;
        }
        entry.wait().await
    }

    /// `set`/`clear` call this to invalidate a running fold's effect.
    /// Implemented as removing the queue entry: the folder rechecks the
    /// entry's identity after every suspension and treats its own
    /// disappearance as the abort signal.
    pub fn abort(&self, key: &str) {
        self.entries.lock().remove(key);
    }

    async fn cache_or_storage_get(&self, key: &str) -> Option<Value> {
        if let Some(v) = self.cache.get(key) {
            return Some(v);
        }
        match self.storage.get_item(key).await {
            Ok(Some(v)) => {
                self.cache.set(key, v.clone());
                Some(v)
            }
            Ok(None) => None,
            Err(e) => {
                log::error!("merge queue: storage read for '{key}' failed: {e}");
                None
            }
        }
    }

    /// True iff this queue entry is still the one registered for `key`
    /// (i.e. hasn't been removed by `abort` or superseded).
    fn still_active(&self, key: &str, mine: &Arc<Entry>) -> bool {
        let map = self.entries.lock();
        matches!(map.get(key), Some(e) if Arc::ptr_eq(e, mine))
    }

    fn remove_if_mine(&self, key: &str, mine: &Arc<Entry>) {
        let mut map = self.entries.lock();
        if matches!(map.get(key), Some(e) if Arc::ptr_eq(e, mine)) {
            map.remove(key);
        }
    }

    async fn run_fold(&self, key: &str, entry: &Arc<Entry>) {
        // step 1
        let existing = self.cache_or_storage_get(key).await;
        // step 2: recheck after the only suspension point before removal
        if !self.still_active(key, entry) {
            entry.finish(Ok(()));
            return;
        }
        // step 3
        let queued = entry.deltas.lock().clone();
        let valid: Vec<Value> = queued
            .into_iter()
            .filter(|d| {
                let compat = check_compatible(&Some(d.clone()), &existing);
                if !compat.is_compatible {
                    log_dropped(DroppedWrite::Incompatible {
                        key: key.to_owned(),
                        existing_kind: compat.existing_kind,
                        new_kind: compat.new_kind,
                    });
                }
                compat.is_compatible
            })
            .collect();
        // step 4
        if valid.is_empty() {
            self.remove_if_mine(key, entry);
            entry.finish(Ok(()));
            return;
        }
        // step 5
        let batched = apply_merge(None, &valid, false).expect("non-empty deltas");
        // step 6
        let should_set_value = existing.is_none() || valid.iter().any(Value::is_null);
        // step 7: later enqueues start a new fold from here on
        self.remove_if_mine(key, entry);
        // step 8
        if batched.is_null() {
            self.cache.remove(key);
            let result = self.storage.remove_items(&[key.to_owned()]).await;
            self.subscribers.broadcast_update(key, &None, true).await;
            entry.finish(result);
            return;
        }
        // step 9
        let base = if should_set_value { None } else { existing.clone() };
        let pre_merged = apply_merge(base, &[batched.clone()], true).expect("batched is non-null");
        // step 10
        let has_changed = self.cache.has_value_changed(key, &pre_merged);
        self.cache.set(key, pre_merged.clone());
        self.subscribers
            .broadcast_update(key, &Some(pre_merged.clone()), has_changed)
            .await;
        // step 11
        if !has_changed {
            entry.finish(Ok(()));
            return;
        }
        // step 12
        let result = self
            .storage
            .merge_item(key, &batched, &pre_merged, should_set_value)
            .await;
        entry.finish(result);
    }
}
