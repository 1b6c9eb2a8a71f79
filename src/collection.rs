// This file is a part of onyx-core.
// Licensed under the GNU Affero General Public License v3.0; see the workspace LICENSE.

//! Collection-key helpers.
//!
//! A collection key is a declared prefix; any stored key starting with that
//! prefix is a member, with a member id (the suffix). Classification is
//! deterministic from the registered prefix set, mirroring how `skyd`'s
//! `corestore` resolves a raw key into keyspace/table/row coordinates from a
//! small set of declared entities rather than parsing free-form strings.

use std::collections::HashSet;

/// The set of declared collection prefixes and individual keys, used to
/// classify any key deterministically.
#[derive(Debug, Clone, Default)]
pub struct KeyRegistry {
    collection_prefixes: Vec<String>,
    individual_keys: HashSet<String>,
}

impl KeyRegistry {
    pub fn new(
        collection_prefixes: impl IntoIterator<Item = String>,
        individual_keys: impl IntoIterator<Item = String>,
    ) -> Self {
        Self {
            collection_prefixes: collection_prefixes.into_iter().collect(),
            individual_keys: individual_keys.into_iter().collect(),
        }
    }

    /// The longest registered collection prefix `key` starts with, if any.
    pub fn collection_of<'a>(&'a self, key: &str) -> Option<&'a str> {
        self.collection_prefixes
            .iter()
            .filter(|p| key.starts_with(p.as_str()) && key.len() > p.len())
            .max_by_key(|p| p.len())
            .map(|p| p.as_str())
    }

    pub fn is_collection_prefix(&self, prefix: &str) -> bool {
        self.collection_prefixes.iter().any(|p| p == prefix)
    }

    pub fn collection_prefixes(&self) -> impl Iterator<Item = &str> {
        self.collection_prefixes.iter().map(|s| s.as_str())
    }

    pub fn is_declared(&self, key: &str) -> bool {
        self.individual_keys.contains(key) || self.collection_of(key).is_some()
    }
}

/// The member id of `key` under `collection_key` (the suffix after the
/// prefix), or `None` if `key` doesn't belong to that collection or the
/// suffix is empty.
pub fn member_id<'a>(collection_key: &str, key: &'a str) -> Option<&'a str> {
    key.strip_prefix(collection_key).filter(|s| !s.is_empty())
}

/// Validate that every key in `members` belongs to `collection_key`: shares
/// its prefix and has a non-empty member id.
pub fn validate_collection_members<'a>(
    collection_key: &str,
    members: impl IntoIterator<Item = &'a str>,
) -> Result<(), String> {
    for key in members {
        if member_id(collection_key, key).is_none() {
            return Err(key.to_owned());
        }
    }
    Ok(())
}

/// Coerce a member's write to `null` (deletion) if its member id is in the
/// configured skippable set.
pub fn apply_skippable_filter(
    collection_key: &str,
    key: &str,
    value: crate::value::MaybeValue,
    skippable_member_ids: &HashSet<String>,
) -> crate::value::MaybeValue {
    match member_id(collection_key, key) {
        Some(id) if skippable_member_ids.contains(id) => Some(serde_json::Value::Null),
        _ => value,
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn classifies_collection_members() {
        let reg = KeyRegistry::new(["report_".to_owned()], ["lang".to_owned()]);
        assert_eq!(reg.collection_of("report_1"), Some("report_"));
        assert_eq!(reg.collection_of("lang"), None);
        assert!(reg.is_declared("lang"));
        assert!(reg.is_declared("report_1"));
        assert!(!reg.is_declared("unknown"));
    }

    #[test]
    fn bare_prefix_is_not_its_own_member() {
        assert_eq!(member_id("report_", "report_"), None);
    }

    #[test]
    fn validate_rejects_foreign_keys() {
        let err = validate_collection_members("report_", ["report_1", "other_2"]).unwrap_err();
        assert_eq!(err, "other_2");
    }

    #[test]
    fn skippable_member_coerces_to_null() {
        let skip: HashSet<String> = ["42".to_owned()].into_iter().collect();
        let out = apply_skippable_filter(
            "r_",
            "r_42",
            Some(serde_json::json!({"a": 1})),
            &skip,
        );
        assert_eq!(out, Some(serde_json::Value::Null));
        let out = apply_skippable_filter(
            "r_",
            "r_7",
            Some(serde_json::json!({"a": 1})),
            &skip,
        );
        assert_eq!(out, Some(serde_json::json!({"a": 1})));
    }
}
