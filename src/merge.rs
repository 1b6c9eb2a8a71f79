// This file is a part of onyx-core.
// Licensed under the GNU Affero General Public License v3.0; see the workspace LICENSE.

//! The merge primitive. Deep-merges a sequence of deltas atop a base value,
//! honoring nested `null` as field deletion.
//!
//! This plays the role `engine::core::model::delta::DataDelta` plays in the
//! teacher crate: a unit of change that gets folded, except here the fold
//! target is a whole JSON value tree rather than a single row, and the fold
//! itself (not just the accumulation) is the public API.

use crate::value::{MaybeValue, Value};
use serde_json::Value as Json;

/// Deep-merge `deltas` onto `base`, left to right.
///
/// - If `base` is `undefined`, folding starts from the first delta.
/// - A delta of `null` replaces the accumulator with `null` outright; a
///   later object delta still merges atop that `null` (object-into-null
///   behaves as object-into-undefined).
/// - Object-into-object merges recurse; arrays and scalars are replaced
///   wholesale, never concatenated.
/// - `strip_nulls = false` ("delta" mode) retains nested `null` markers in
///   the result, suitable for a storage driver that understands delete
///   markers natively. `strip_nulls = true` ("snapshot" mode) removes
///   fields whose delta value was `null`, producing a materialized value
///   fit for the cache or a set-only backend.
pub fn apply_merge(base: MaybeValue, deltas: &[Value], strip_nulls: bool) -> MaybeValue {
    let mut acc = base;
    for delta in deltas {
        acc = Some(merge_one(acc, delta.clone(), strip_nulls));
    }
    acc
}

fn merge_one(base: MaybeValue, delta: Value, strip_nulls: bool) -> Value {
    match delta {
        Json::Null => Json::Null,
        Json::Object(delta_map) => {
            // A non-object base (absent, null, scalar, or array — e.g. the
            // accumulator just collapsed to `null`) is discarded: the
            // object delta starts fresh, same as object-into-undefined.
            let mut base_map = match base {
                Some(Json::Object(m)) => m,
                _ => serde_json::Map::new(),
            };
            for (k, v) in delta_map {
                if v.is_null() {
                    if strip_nulls {
                        base_map.remove(&k);
                    } else {
                        base_map.insert(k, Json::Null);
                    }
                    continue;
                }
                let existing = base_map.remove(&k);
                base_map.insert(k, merge_one(existing, v, strip_nulls));
            }
            Json::Object(base_map)
        }
        other => other,
    }
}
