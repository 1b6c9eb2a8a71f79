// This file is a part of onyx-core.
// Licensed under the GNU Affero General Public License v3.0; see the workspace LICENSE.

//! The subscriber/connection registry contract. Out of scope here: the
//! write pipeline only ever calls these three notification hooks plus
//! `refresh_session_id`, never anything about how subscriptions are
//! attached to keys.

use crate::value::Value;
use async_trait::async_trait;

#[async_trait]
pub trait Subscribers: Send + Sync {
    /// Optimistic, synchronous-feeling broadcast used by `set`/`merge`
    /// right after the cache is updated, before the storage write settles.
    async fn broadcast_update(&self, key: &str, value: &Option<Value>, has_changed: bool);

    /// Deferred-to-next-tick subscriber notification carrying the previous
    /// value, used to coalesce multiple writes to the same key within a tick.
    async fn schedule_subscriber_update(
        &self,
        key: &str,
        value: &Option<Value>,
        prev_value: &Option<Value>,
    );

    /// Collection-level notification for `mergeCollection`/`setCollection`
    /// and their `update()` collapse.
    async fn schedule_notify_collection_subscribers(
        &self,
        collection_key: &str,
        members: &[(String, Option<Value>)],
        previous: Option<&[(String, Option<Value>)]>,
    );

    /// Invalidate correlation tokens after `clear`.
    async fn refresh_session_id(&self);
}
