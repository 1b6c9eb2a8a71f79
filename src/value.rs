// This file is a part of onyx-core.
// Licensed under the GNU Affero General Public License v3.0; see the workspace LICENSE.

//! The dynamic-shape value model and the compatibility checker.
//!
//! Values are arbitrary JSON-shaped data: scalars, arrays, or objects. We model
//! this as a tagged sum rather than reaching for a loosely-typed blob, mirroring
//! how `skyd` models its own row/field data as an explicit enum
//! (`engine::core::model::delta::DataDeltaKind`) instead of an untyped byte bag.

use serde_json::Value as Json;
use std::fmt;

/// A dynamic, JSON-shaped value.
///
/// `Null` is significant: at the top level it means "absent / delete from
/// storage"; nested inside an object it means "delete this field" during a
/// merge.
pub type Value = Json;

/// The shape tag used by the compatibility checker. `Undefined` has no
/// representation in [`Value`] itself — it is never stored — and only ever
/// appears as an input to [`check_compatible`].
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ValueKind {
    Undefined,
    Null,
    Array,
    Object,
    Scalar,
}

impl fmt::Display for ValueKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let s = match self {
            ValueKind::Undefined => "undefined",
            ValueKind::Null => "null",
            ValueKind::Array => "array",
            ValueKind::Object => "object",
            ValueKind::Scalar => "scalar",
        };
        f.write_str(s)
    }
}

/// `None` stands in for JS `undefined`; `Some(Value::Null)` is JSON `null`.
pub type MaybeValue = Option<Value>;

pub fn kind_of(v: &MaybeValue) -> ValueKind {
    match v {
        None => ValueKind::Undefined,
        Some(Json::Null) => ValueKind::Null,
        Some(Json::Array(_)) => ValueKind::Array,
        Some(Json::Object(_)) => ValueKind::Object,
        Some(_) => ValueKind::Scalar,
    }
}

/// Result of [`check_compatible`].
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Compatibility {
    pub is_compatible: bool,
    pub existing_kind: ValueKind,
    pub new_kind: ValueKind,
}

/// Decide whether `new` may be written/merged over `existing`.
///
/// Compatible iff: either operand is `undefined` or `null`; or both are
/// arrays; or both are non-array objects. Array-vs-object is incompatible.
/// Incompatible updates are never rejected here with an error — the caller
/// logs and drops them.
pub fn check_compatible(new: &MaybeValue, existing: &MaybeValue) -> Compatibility {
    let existing_kind = kind_of(existing);
    let new_kind = kind_of(new);
    let is_compatible = matches!(existing_kind, ValueKind::Undefined | ValueKind::Null)
        || matches!(new_kind, ValueKind::Undefined | ValueKind::Null)
        || (existing_kind == ValueKind::Array && new_kind == ValueKind::Array)
        || (existing_kind == ValueKind::Object && new_kind == ValueKind::Object);
    Compatibility {
        is_compatible,
        existing_kind,
        new_kind,
    }
}

/// Strip nested `null`s out of an object/array tree (`removeNullValues`). A
/// top-level `null` is left untouched — the caller is responsible for
/// treating a top-level `null` result as "delete the key", not as "an
/// object with nulls removed".
pub fn remove_nested_nulls(v: Value) -> Value {
    match v {
        Json::Object(map) => {
            let mut out = serde_json::Map::with_capacity(map.len());
            for (k, val) in map {
                if val.is_null() {
                    continue;
                }
                out.insert(k, remove_nested_nulls(val));
            }
            Json::Object(out)
        }
        Json::Array(items) => Json::Array(items.into_iter().map(remove_nested_nulls).collect()),
        other => other,
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn undefined_is_always_compatible() {
        let c = check_compatible(&None, &Some(json!([1, 2])));
        assert!(c.is_compatible);
        let c = check_compatible(&Some(json!({"a": 1})), &None);
        assert!(c.is_compatible);
    }

    #[test]
    fn null_is_always_compatible() {
        let c = check_compatible(&Some(Json::Null), &Some(json!({"a": 1})));
        assert!(c.is_compatible);
    }

    #[test]
    fn array_and_object_are_incompatible() {
        let c = check_compatible(&Some(json!([1])), &Some(json!({"a": 1})));
        assert!(!c.is_compatible);
        assert_eq!(c.existing_kind, ValueKind::Object);
        assert_eq!(c.new_kind, ValueKind::Array);
    }

    #[test]
    fn arrays_and_objects_are_self_compatible() {
        assert!(check_compatible(&Some(json!([1])), &Some(json!([2, 3]))).is_compatible);
        assert!(check_compatible(&Some(json!({"a": 1})), &Some(json!({"b": 2}))).is_compatible);
    }

    #[test]
    fn remove_nested_nulls_drops_only_nested_fields() {
        let v = json!({"a": 1, "b": null, "c": {"d": null, "e": 2}});
        let out = remove_nested_nulls(v);
        assert_eq!(out, json!({"a": 1, "c": {"e": 2}}));
    }

    #[test]
    fn remove_nested_nulls_preserves_top_level_null() {
        assert_eq!(remove_nested_nulls(Json::Null), Json::Null);
    }
}
