// This file is a part of onyx-core.
// Licensed under the GNU Affero General Public License v3.0; see the workspace LICENSE.

//! Error types for the write pipeline.
//!
//! Plain enums with manual `Display`/`Error` impls, in the style of
//! `engine::error::{LexError, LangError, DatabaseError}` rather than a
//! `thiserror`-derived type — the teacher crate hand-rolls its errors.

use crate::value::ValueKind;
use core::fmt;
use std::error::Error as StdError;

pub type StoreResult<T> = Result<T, StoreError>;

#[derive(Debug)]
/// Errors the write pipeline can produce.
///
/// Incompatible updates and fold-internal failures are *not* represented
/// here: they're logged and swallowed rather than surfaced to a caller.
/// This enum only carries the kinds that do propagate to a caller's
/// `Result`.
pub enum StoreError {
    /// `update()` was called with a malformed operation list: an
    /// unrecognized method, a non-object `multiSet` value, or a
    /// non-`clear` op missing its key. Raised synchronously.
    InvalidOperation { reason: String },
    /// `mergeCollection`/`setCollection` was called with keys that don't
    /// belong to the declared collection prefix.
    InvalidCollectionMember { collection: String, key: String },
    /// The storage driver rejected a write or read and the bounded
    /// evict-and-retry was exhausted.
    Storage(String),
}

impl fmt::Display for StoreError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            StoreError::InvalidOperation { reason } => {
                write!(f, "invalid update operation: {reason}")
            }
            StoreError::InvalidCollectionMember { collection, key } => write!(
                f,
                "key '{key}' does not belong to collection '{collection}'"
            ),
            StoreError::Storage(msg) => write!(f, "storage error: {msg}"),
        }
    }
}

impl StdError for StoreError {}

/// Dropped-write reasons, logged at the call site rather than returned.
/// Kept as a type so log call sites stay consistent.
#[derive(Debug)]
pub enum DroppedWrite {
    Incompatible {
        key: String,
        existing_kind: ValueKind,
        new_kind: ValueKind,
    },
    FoldFailed {
        key: String,
        reason: String,
    },
}

impl fmt::Display for DroppedWrite {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            DroppedWrite::Incompatible {
                key,
                existing_kind,
                new_kind,
            } => write!(
                f,
                "dropping incompatible update for '{key}': existing={existing_kind}, new={new_kind}"
            ),
            DroppedWrite::FoldFailed { key, reason } => {
                write!(f, "merge fold for '{key}' failed: {reason}")
            }
        }
    }
}

/// Log a dropped write at warning level — it's a silently-applied
/// deviation from what the caller asked for, not an error the caller can act on.
pub fn log_dropped(d: DroppedWrite) {
    log::warn!("{d}");
}
