// This file is a part of onyx-core.
// Licensed under the GNU Affero General Public License v3.0; see the workspace LICENSE.

//! Init / lifecycle.
//!
//! `Store::new` only wires up in-memory state; `Store::init` performs the
//! startup work that talks to storage: seeding default states and, if
//! configured, spawning the cross-instance sync drain. Split the same way
//! `skyd`'s `main.rs` separates `Config::new` (pure) from the async
//! bootstrap that opens the keyspace and starts background workers.

use crate::error::StoreResult;
use crate::store::Store;
use crate::value::Value;
use std::sync::Arc;

impl Store {
    /// Run once after construction, before serving any writes.
    ///
    /// 1. Calls the storage driver's own `init` hook.
    /// 2. Seeds `initial_key_states` entries absent from `getAllKeys()`,
    ///    never overwriting an existing value.
    /// 3. If `should_sync_multiple_instances` is set and the driver exposes
    ///    `keep_instances_sync`, spawns a background task draining pushed
    ///    `(key, value)` pairs straight into the cache, bypassing the merge
    ///    queue and storage entirely.
    pub async fn init(self: &Arc<Self>) -> StoreResult<()> {
        self.storage()
            .init()
            .await
            .map_err(crate::error::StoreError::Storage)?;

        self.seed_default_states().await?;

        if self.config().should_sync_multiple_instances {
            if let Some(rx) = self.storage().keep_instances_sync() {
                self.spawn_sync_drain(rx);
            } else {
                log::debug!(
                    "should_sync_multiple_instances is set but the storage driver doesn't implement keep_instances_sync"
                );
            }
        }
        Ok(())
    }

    async fn seed_default_states(&self) -> StoreResult<()> {
        if self.config().initial_key_states.is_empty() {
            return Ok(());
        }
        let existing = self
            .storage()
            .get_all_keys()
            .await
            .map_err(crate::error::StoreError::Storage)?;
        let missing: Vec<(String, Value)> = self
            .config()
            .initial_key_states
            .iter()
            .filter(|(key, _)| !existing.contains(*key))
            .map(|(key, value)| (key.clone(), value.clone()))
            .collect();
        if missing.is_empty() {
            return Ok(());
        }
        log::info!("seeding {} default key state(s) absent from storage", missing.len());
        for (key, value) in &missing {
            self.cache().set(key, value.clone());
        }
        self.storage()
            .multi_set(&missing)
            .await
            .map_err(crate::error::StoreError::Storage)
    }

    /// Drain externally-committed `(key, value)` pairs pushed by another
    /// instance. The pair represents state another instance already
    /// persisted, so this bypasses the merge queue and storage entirely —
    /// only the cache is updated and subscribers are notified, last
    /// delivery wins, no locking.
    fn spawn_sync_drain(self: &Arc<Self>, mut rx: tokio::sync::mpsc::UnboundedReceiver<(String, Value)>) {
        let store = self.clone();
        tokio::spawn(async move {
            while let Some((key, value)) = rx.recv().await {
                log::debug!("applying cross-instance update for '{key}'");
                let has_changed = store.cache().has_value_changed(&key, &value);
                store.cache().set(&key, value.clone());
                store
                    .subscribers()
                    .broadcast_update(&key, &Some(value), has_changed)
                    .await;
            }
            log::debug!("cross-instance sync channel closed");
        });
    }
}
