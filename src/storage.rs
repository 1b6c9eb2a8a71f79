// This file is a part of onyx-core.
// Licensed under the GNU Affero General Public License v3.0; see the workspace LICENSE.

//! The storage driver contract. The core only depends on this trait, never
//! on a concrete backend.
//!
//! Modeled as an `async_trait` object-safe trait the way `skyd`'s own
//! pluggable-backend seam (`engine::storage::*Engine` traits) is specified
//! as an interface the core drives without caring about the concrete
//! file/network implementation behind it.

use crate::value::Value;
use async_trait::async_trait;
use std::collections::HashSet;

/// A pluggable, async blob storage backend. All methods may reject; the
/// pipeline reacts with a bounded evict-and-retry, and a terminal failure
/// surfaces as a rejected promise from the originating call.
#[async_trait]
pub trait Storage: Send + Sync {
    async fn init(&self) -> Result<(), String> {
        Ok(())
    }
    async fn get_item(&self, key: &str) -> Result<Option<Value>, String>;
    async fn get_all_keys(&self) -> Result<HashSet<String>, String>;
    async fn set_item(&self, key: &str, value: Value) -> Result<(), String>;
    async fn multi_set(&self, pairs: &[(String, Value)]) -> Result<(), String>;
    /// `delta` retains nested-null delete markers; `pre_merged` is the fully
    /// materialized value; `should_set_value` tells the driver whether there
    /// was no prior value (so `delta` should be treated as a full `set`
    /// rather than a partial merge). The driver chooses which form to use.
    async fn merge_item(
        &self,
        key: &str,
        delta: &Value,
        pre_merged: &Value,
        should_set_value: bool,
    ) -> Result<(), String>;
    async fn multi_merge(&self, pairs: &[(String, Value)]) -> Result<(), String>;
    async fn remove_items(&self, keys: &[String]) -> Result<(), String>;

    /// Optional cross-instance sync hook. Default: unsupported.
    fn keep_instances_sync(&self) -> Option<tokio::sync::mpsc::UnboundedReceiver<(String, Value)>> {
        None
    }
}
