// This file is a part of onyx-core.
// Licensed under the GNU Affero General Public License v3.0; see the workspace LICENSE.

//! Init options, in the teacher's explicit-construction config style
//! (`config::PortConfig`-style plain structs, built up field by field,
//! rather than a stringly-typed options bag).

use serde::{Deserialize, Serialize};
use std::collections::HashSet;

/// Default recency bound: 1000 cached keys; 0 disables eviction entirely.
pub const DEFAULT_MAX_CACHED_KEYS: usize = 1000;

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct StoreConfig {
    /// Declared individual keys.
    pub keys: Vec<String>,
    /// Declared collection-key prefixes.
    pub collection_keys: Vec<String>,
    /// Default values restored on `clear`.
    pub initial_key_states: std::collections::BTreeMap<String, serde_json::Value>,
    /// Keys eligible for LRU eviction under storage pressure.
    pub evictable_keys: HashSet<String>,
    #[serde(default = "default_max_cached")]
    pub max_cached_keys_count: usize,
    #[serde(default)]
    pub should_sync_multiple_instances: bool,
    #[serde(default)]
    pub debug_set_state: bool,
    #[serde(default)]
    pub enable_performance_metrics: bool,
    /// Collection-member ids whose writes are coerced to `null`.
    #[serde(default)]
    pub skippable_collection_member_ids: HashSet<String>,
    /// Keys whose snapshot subscribers want fully materialized data rather
    /// than delta form.
    #[serde(default)]
    pub fully_merged_snapshot_keys: HashSet<String>,
}

fn default_max_cached() -> usize {
    DEFAULT_MAX_CACHED_KEYS
}

impl Default for StoreConfig {
    fn default() -> Self {
        Self {
            keys: Vec::new(),
            collection_keys: Vec::new(),
            initial_key_states: Default::default(),
            evictable_keys: HashSet::new(),
            max_cached_keys_count: DEFAULT_MAX_CACHED_KEYS,
            should_sync_multiple_instances: false,
            debug_set_state: false,
            enable_performance_metrics: false,
            skippable_collection_member_ids: HashSet::new(),
            fully_merged_snapshot_keys: HashSet::new(),
        }
    }
}

impl StoreConfig {
    pub fn builder() -> StoreConfigBuilder {
        StoreConfigBuilder::default()
    }
}

#[derive(Default)]
pub struct StoreConfigBuilder {
    cfg: StoreConfig,
}

impl StoreConfigBuilder {
    pub fn keys(mut self, keys: impl IntoIterator<Item = impl Into<String>>) -> Self {
        self.cfg.keys = keys.into_iter().map(Into::into).collect();
        self
    }
    pub fn collection_keys(mut self, keys: impl IntoIterator<Item = impl Into<String>>) -> Self {
        self.cfg.collection_keys = keys.into_iter().map(Into::into).collect();
        self
    }
    pub fn initial_key_state(mut self, key: impl Into<String>, value: serde_json::Value) -> Self {
        self.cfg.initial_key_states.insert(key.into(), value);
        self
    }
    pub fn evictable_keys(mut self, keys: impl IntoIterator<Item = impl Into<String>>) -> Self {
        self.cfg.evictable_keys = keys.into_iter().map(Into::into).collect();
        self
    }
    pub fn max_cached_keys_count(mut self, n: usize) -> Self {
        self.cfg.max_cached_keys_count = n;
        self
    }
    pub fn should_sync_multiple_instances(mut self, v: bool) -> Self {
        self.cfg.should_sync_multiple_instances = v;
        self
    }
    pub fn debug_set_state(mut self, v: bool) -> Self {
        self.cfg.debug_set_state = v;
        self
    }
    pub fn enable_performance_metrics(mut self, v: bool) -> Self {
        self.cfg.enable_performance_metrics = v;
        self
    }
    pub fn skippable_collection_member_ids(
        mut self,
        ids: impl IntoIterator<Item = impl Into<String>>,
    ) -> Self {
        self.cfg.skippable_collection_member_ids = ids.into_iter().map(Into::into).collect();
        self
    }
    pub fn fully_merged_snapshot_keys(
        mut self,
        keys: impl IntoIterator<Item = impl Into<String>>,
    ) -> Self {
        self.cfg.fully_merged_snapshot_keys = keys.into_iter().map(Into::into).collect();
        self
    }
    pub fn build(self) -> StoreConfig {
        self.cfg
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn default_max_cached_keys_is_1000() {
        assert_eq!(StoreConfig::default().max_cached_keys_count, 1000);
    }

    #[test]
    fn builder_roundtrips_fields() {
        let cfg = StoreConfig::builder()
            .keys(["lang", "session"])
            .collection_keys(["report_"])
            .initial_key_state("lang", serde_json::json!("en"))
            .evictable_keys(["session"])
            .max_cached_keys_count(5)
            .build();
        assert_eq!(cfg.keys, vec!["lang", "session"]);
        assert_eq!(cfg.collection_keys, vec!["report_"]);
        assert_eq!(cfg.max_cached_keys_count, 5);
        assert!(cfg.evictable_keys.contains("session"));
    }
}
