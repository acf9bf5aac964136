//! JSON tree helpers
//!
//! Path addressing over `serde_json::Value` with realtime-database
//! semantics: writing `null` deletes, and objects left empty by a delete are
//! pruned.

use serde_json::{Map, Value};

use super::ServerValue;

/// Split a path into its non-empty segments
pub fn split_path(path: &str) -> Vec<&str> {
    path.split('/').filter(|s| !s.is_empty()).collect()
}

/// Join a base path and a relative path
pub fn join_path(base: &str, relative: &str) -> String {
    let mut segments = split_path(base);
    segments.extend(split_path(relative));
    segments.join("/")
}

/// Read the value at `path`
///
/// Null values and empty objects read as absent.
pub fn get_path<'a>(root: &'a Value, path: &str) -> Option<&'a Value> {
    let mut node = root;
    for segment in split_path(path) {
        node = node.as_object()?.get(segment)?;
    }
    if is_absent(node) {
        None
    } else {
        Some(node)
    }
}

/// Write `value` at `path`, creating intermediate objects
pub fn set_path(root: &mut Value, path: &str, value: Value) {
    let segments = split_path(path);
    let value = strip_nulls(value);

    if is_absent(&value) {
        if segments.is_empty() {
            *root = Value::Null;
        } else {
            remove_at(root, &segments);
        }
    } else {
        insert_at(root, &segments, value);
    }
}

/// Apply a multi-path update below `base`
pub fn apply_update(root: &mut Value, base: &str, patch: &Map<String, Value>) {
    for (relative, value) in patch {
        set_path(root, &join_path(base, relative), value.clone());
    }
}

/// Replace server timestamp placeholders with `now_ms`
pub fn resolve_server_values(value: &mut Value, now_ms: i64) {
    if ServerValue::is_timestamp(value) {
        *value = Value::from(now_ms);
        return;
    }
    match value {
        Value::Object(map) => {
            for child in map.values_mut() {
                resolve_server_values(child, now_ms);
            }
        }
        Value::Array(items) => {
            for child in items {
                resolve_server_values(child, now_ms);
            }
        }
        _ => {}
    }
}

fn is_absent(value: &Value) -> bool {
    match value {
        Value::Null => true,
        Value::Object(map) => map.is_empty(),
        _ => false,
    }
}

fn strip_nulls(value: Value) -> Value {
    match value {
        Value::Object(map) => {
            let cleaned: Map<String, Value> = map
                .into_iter()
                .map(|(k, v)| (k, strip_nulls(v)))
                .filter(|(_, v)| !is_absent(v))
                .collect();
            Value::Object(cleaned)
        }
        other => other,
    }
}

fn insert_at(node: &mut Value, segments: &[&str], value: Value) {
    let Some((first, rest)) = segments.split_first() else {
        *node = value;
        return;
    };

    if !node.is_object() {
        *node = Value::Object(Map::new());
    }
    if let Value::Object(map) = node {
        let child = map.entry(first.to_string()).or_insert(Value::Null);
        insert_at(child, rest, value);
    }
}

fn remove_at(node: &mut Value, segments: &[&str]) {
    let Some((first, rest)) = segments.split_first() else {
        return;
    };
    let Value::Object(map) = node else {
        return;
    };

    if rest.is_empty() {
        map.remove(*first);
        return;
    }

    if let Some(child) = map.get_mut(*first) {
        remove_at(child, rest);
        if is_absent(child) {
            map.remove(*first);
        }
    }
}
