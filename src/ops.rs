// This file is a part of onyx-core.
// Licensed under the GNU Affero General Public License v3.0; see the workspace LICENSE.

//! `update()`: atomic composition of heterogeneous operations.
//!
//! Collapses an arbitrary list of `set`/`merge`/`multiSet`/`mergeCollection`/
//! `setCollection`/`clear` operations into the minimum number of
//! key-coherent writes. Grounded on `skyd`'s query-batch compilation shape
//! (`queryengine`/`engine::core::dml` folding a sequence of statements into
//! a single executor pass), generalized into a six-phase collapse: validate,
//! queue per key, collapse collections, fold per-key queues, stage
//! snapshots, then dispatch.

use crate::store::Store;
use crate::value::Value;
use std::collections::BTreeMap;

/// One operation in an `update()` batch.
#[derive(Debug, Clone)]
pub enum Operation {
    Set { key: String, value: Value },
    Merge { key: String, value: Value },
    MultiSet { data: BTreeMap<String, Value> },
    MergeCollection { collection_key: String, members: BTreeMap<String, Value> },
    SetCollection { collection_key: String, members: BTreeMap<String, Value> },
    Clear,
}

/// Untyped wire form of [`Operation`], the shape a DevTools payload or a
/// network caller would actually send. Validating this into an [`Operation`]
/// is `update()`'s Phase 1.
#[derive(Debug, Clone, serde::Deserialize)]
pub struct RawOperation {
    pub method: String,
    #[serde(default)]
    pub key: Option<String>,
    #[serde(default)]
    pub value: Option<Value>,
}

impl TryFrom<RawOperation> for Operation {
    type Error = String;

    fn try_from(raw: RawOperation) -> Result<Self, Self::Error> {
        match raw.method.as_str() {
            "clear" => Ok(Operation::Clear),
            "set" => Ok(Operation::Set {
                key: raw.key.ok_or("set requires a key")?,
                value: raw.value.unwrap_or(Value::Null),
            }),
            "merge" => Ok(Operation::Merge {
                key: raw.key.ok_or("merge requires a key")?,
                value: raw.value.unwrap_or(Value::Null),
            }),
            "multiSet" => {
                let Value::Object(map) = raw.value.unwrap_or(Value::Null) else {
                    return Err("multiSet value must be a plain object".to_owned());
                };
                Ok(Operation::MultiSet {
                    data: map.into_iter().collect(),
                })
            }
            "mergeCollection" => {
                let collection_key = raw.key.ok_or("mergeCollection requires a key")?;
                let Value::Object(map) = raw.value.unwrap_or(Value::Null) else {
                    return Err("mergeCollection value must be a plain object".to_owned());
                };
                Ok(Operation::MergeCollection {
                    collection_key,
                    members: map.into_iter().collect(),
                })
            }
            "setCollection" => {
                let collection_key = raw.key.ok_or("setCollection requires a key")?;
                let Value::Object(map) = raw.value.unwrap_or(Value::Null) else {
                    return Err("setCollection value must be a plain object".to_owned());
                };
                Ok(Operation::SetCollection {
                    collection_key,
                    members: map.into_iter().collect(),
                })
            }
            other => Err(format!("unrecognized update method '{other}'")),
        }
    }
}

/// Per-key queue of raw deltas awaiting the Phase 4 fold. A `Set` resets the
/// queue to `[null, v]`; a `Merge(null)` resets it to `[null]`; any other
/// `Merge(v)` appends.
#[derive(Default, Clone)]
struct KeyQueue(Vec<Value>);

impl KeyQueue {
    fn apply_set(&mut self, v: Value) {
        self.0 = vec![Value::Null, v];
    }
    fn apply_merge(&mut self, v: Value) {
        if v.is_null() {
            self.0 = vec![Value::Null];
        } else {
            self.0.push(v);
        }
    }
    fn is_forced_set(&self) -> bool {
        matches!(self.0.first(), Some(Value::Null))
    }
}

/// A deferred snapshot-staging future: runs before the main update batch so
/// UI loading-state data is staged ahead of the updates that triggered it.
/// Supplied by the (out-of-scope) snapshot subsystem; `update()` just has to
/// sequence it correctly.
pub type SnapshotOp =
    std::pin::Pin<Box<dyn std::future::Future<Output = crate::error::StoreResult<()>> + Send>>;

impl Store {
    /// `update(ops)` with no snapshot-staging futures.
    pub async fn update(&self, ops: Vec<Operation>) -> crate::error::StoreResult<()> {
        self.update_with_snapshots(ops, Vec::new()).await
    }

    /// `update(ops)` with explicit Phase 5 snapshot futures, which are
    /// awaited to completion before the main batch starts.
    pub async fn update_with_snapshots(
        &self,
        ops: Vec<Operation>,
        snapshot_ops: Vec<SnapshotOp>,
    ) -> crate::error::StoreResult<()> {
        // Phase 1 is satisfied by `Operation` construction (either directly,
        // which the type system already validates, or via
        // `Operation::try_from(RawOperation)` for untyped callers).

        // Phase 2: build the per-key op queue and pull out `clear`/
        // `setCollection` which aren't folded per-key.
        let mut queue: BTreeMap<String, KeyQueue> = BTreeMap::new();
        let mut set_collections: Vec<(String, BTreeMap<String, Value>)> = Vec::new();
        let mut clear_requested = false;

        for op in ops {
            match op {
                Operation::Clear => clear_requested = true,
                Operation::Set { key, value } => queue.entry(key).or_default().apply_set(value),
                Operation::Merge { key, value } => queue.entry(key).or_default().apply_merge(value),
                Operation::MultiSet { data } => {
                    for (key, value) in data {
                        queue.entry(key).or_default().apply_set(value);
                    }
                }
                Operation::MergeCollection { members, .. } => {
                    for (key, value) in members {
                        queue.entry(key).or_default().apply_merge(value);
                    }
                }
                Operation::SetCollection { collection_key, members } => {
                    set_collections.push((collection_key, members));
                }
            }
        }

        // Phase 3: collapse ≥2 queued keys under a declared collection
        // prefix into one `mergeCollection` call.
        let mut collection_calls: Vec<(String, BTreeMap<String, Value>, BTreeMap<String, Value>)> =
            Vec::new();
        for prefix in self.registry().collection_prefixes().map(str::to_owned).collect::<Vec<_>>() {
            let matching: Vec<String> = queue
                .keys()
                .filter(|k| crate::collection::member_id(&prefix, k).is_some())
                .cloned()
                .collect();
            if matching.len() < 2 {
                continue;
            }
            let mut set_members = BTreeMap::new();
            let mut merge_members = BTreeMap::new();
            for key in matching {
                let kq = queue.remove(&key).expect("just matched");
                let folded = crate::merge::apply_merge(None, &kq.0, false).expect("non-empty op queue");
                if kq.is_forced_set() {
                    set_members.insert(key, folded);
                } else {
                    merge_members.insert(key, folded);
                }
            }
            collection_calls.push((prefix, set_members, merge_members));
        }

        // Phase 4: fold the remaining per-key queues into single writes.
        enum Emit {
            Set(String, Value),
            Merge(String, Value),
        }
        let mut emits = Vec::with_capacity(queue.len());
        for (key, kq) in queue {
            let folded = crate::merge::apply_merge(None, &kq.0, false).expect("non-empty op queue");
            if kq.is_forced_set() {
                emits.push(Emit::Set(key, folded));
            } else {
                emits.push(Emit::Merge(key, folded));
            }
        }

        // Phase 6: `clear` first, then snapshots, then everything else
        // concurrently. Snapshot ops precede the main batch; within the
        // main batch, no cross-key ordering is promised.
        if clear_requested {
            self.clear(&Default::default()).await?;
        }
        for r in futures::future::join_all(snapshot_ops).await {
            r?;
        }

        type BoxedOp<'a> =
            std::pin::Pin<Box<dyn std::future::Future<Output = crate::error::StoreResult<()>> + Send + 'a>>;
        let mut main_ops: Vec<BoxedOp<'_>> = Vec::new();
        for (prefix, set_members, merge_members) in collection_calls {
            main_ops.push(Box::pin(async move {
                self.merge_collection_inner(&prefix, set_members, merge_members)
                    .await
            }));
        }
        for emit in emits {
            main_ops.push(match emit {
                Emit::Set(key, value) => Box::pin(async move { self.set(&key, Some(value)).await }),
                Emit::Merge(key, value) => Box::pin(async move { self.merge(&key, value).await }),
            });
        }
        for (collection_key, members) in set_collections {
            main_ops.push(Box::pin(async move {
                self.set_collection(&collection_key, members).await
            }));
        }

        for r in futures::future::join_all(main_ops).await {
            r?;
        }
        Ok(())
    }
}
