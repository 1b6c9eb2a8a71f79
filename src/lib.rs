// This file is a part of onyx-core.
// Licensed under the GNU Affero General Public License v3.0; see the workspace LICENSE.

//! The core write pipeline and merge engine for a reactive, persistent
//! key-value store: a cache, a per-key merge queue, and the write
//! operations (`set`, `multiSet`, `merge`, `mergeCollection`,
//! `setCollection`, `clear`, `update`) built on top of them. Storage and
//! subscriber delivery are driven through the `Storage`/`Subscribers`
//! traits; this crate ships no concrete backend.

pub mod cache;
pub mod collection;
pub mod config;
pub mod error;
mod init;
pub mod merge;
pub mod ops;
pub mod queue;
pub mod storage;
pub mod store;
pub mod subscriber;
pub mod value;

pub use cache::{Cache, PendingTasks};
pub use collection::KeyRegistry;
pub use config::{StoreConfig, StoreConfigBuilder};
pub use error::{DroppedWrite, StoreError, StoreResult};
pub use merge::apply_merge;
pub use ops::{Operation, RawOperation, SnapshotOp};
pub use queue::MergeQueue;
pub use storage::Storage;
pub use store::Store;
pub use subscriber::Subscribers;
pub use value::{check_compatible, kind_of, Compatibility, MaybeValue, Value, ValueKind};
