//! # JSON Merge Patch (RFC 7396)
//!
//! Partial updates of JSON text cells. The controller diffs the old and new
//! document with [`generate_merge_patch`]; the engine applies the patch to
//! whatever is currently stored with [`apply_merge_patch`].
//!
//! ## Deletion by `null`
//!
//! A `null` member in a patch means "remove this key". A modified document
//! that really wants `"key": null` is therefore indistinguishable from one
//! that dropped the key. This matches SQLite's own `json_patch()` and is kept
//! on purpose: patches produced here must mean the same thing there.

use serde_json::{Map, Value};

/// Computes the patch that turns `original` into `modified`.
///
/// Arrays and scalars on either side short-circuit to "replace the whole
/// value": the patch is `modified` itself.
pub fn generate_merge_patch(original: &Value, modified: &Value) -> Value {
    let (Value::Object(orig), Value::Object(modi)) = (original, modified) else {
        return modified.clone();
    };

    let mut patch = Map::new();

    for (key, new_value) in modi {
        match orig.get(key) {
            Some(old_value) if old_value == new_value => {}
            Some(old_value) if old_value.is_object() && new_value.is_object() => {
                patch.insert(key.clone(), generate_merge_patch(old_value, new_value));
            }
            _ => {
                patch.insert(key.clone(), new_value.clone());
            }
        }
    }

    for key in orig.keys() {
        if !modi.contains_key(key) {
            patch.insert(key.clone(), Value::Null);
        }
    }

    Value::Object(patch)
}

/// Applies `patch` to `target` and returns the result.
pub fn apply_merge_patch(target: &Value, patch: &Value) -> Value {
    let Value::Object(patch_map) = patch else {
        // null patch → null; scalar or array patch → wholesale replacement
        return patch.clone();
    };

    let mut result = match target {
        Value::Object(map) => map.clone(),
        _ => Map::new(),
    };

    for (key, value) in patch_map {
        if value.is_null() {
            // stored documents keep their key order
            result.shift_remove(key);
        } else {
            let current = result.get(key).cloned().unwrap_or(Value::Null);
            result.insert(key.clone(), apply_merge_patch(&current, value));
        }
    }

    Value::Object(result)
}

/// Parses stored cell text as JSON, treating anything unparseable as `{}`.
pub fn parse_or_empty(text: Option<&str>) -> Value {
    text.and_then(|t| serde_json::from_str(t).ok())
        .unwrap_or_else(|| Value::Object(Map::new()))
}

// =============================================================================
// Tests
// =============================================================================
