//! Untyped property containers and the comparison/projection helpers used to
//! decide when a field must be reloaded and which keys a mutation may replace.

use std::borrow::Cow;

use serde_json::{Map, Value};

/// Key-value container for forwarded inputs and field data.
///
/// Key order is preserved (`serde_json` is built with `preserve_order`), so
/// projections keep the order in which the caller inserted keys.
pub type PropMap = Map<String, Value>;

/// Structural equality one level deep.
///
/// Scalars compare by value. Containers of different kinds never compare
/// equal. Arrays must have the same length and element-wise equal values;
/// objects must have the same key set and equal values per key. Values are
/// plain data, so per-key comparison is value equality rather than reference
/// identity.
pub fn shallow_equal(a: &Value, b: &Value) -> bool {
    match (a, b) {
        (Value::Object(a), Value::Object(b)) => {
            a.len() == b.len() && a.iter().all(|(key, va)| b.get(key).is_some_and(|vb| va == vb))
        }
        (Value::Array(a), Value::Array(b)) => {
            a.len() == b.len() && a.iter().zip(b.iter()).all(|(va, vb)| va == vb)
        }
        (Value::Object(_) | Value::Array(_), _) | (_, Value::Object(_) | Value::Array(_)) => false,
        _ => a == b,
    }
}

/// Returns `map` without the given keys, preserving the remaining key order.
///
/// Never mutates the input. Returns `Cow::Borrowed` when no listed key is
/// present, so callers keep the original allocation on the common no-op path.
pub fn omit<'a, S: AsRef<str>>(map: &'a PropMap, keys: &[S]) -> Cow<'a, PropMap> {
    if keys.is_empty() || !keys.iter().any(|key| map.contains_key(key.as_ref())) {
        return Cow::Borrowed(map);
    }
    Cow::Owned(
        map.iter()
            .filter(|(key, _)| !keys.iter().any(|k| k.as_ref() == key.as_str()))
            .map(|(key, value)| (key.clone(), value.clone()))
            .collect(),
    )
}

/// Returns only the given keys of `map`, preserving their order.
///
/// Never mutates the input. Returns `Cow::Borrowed` when every key of the map
/// is listed, mirroring the no-op optimisation of [`omit`].
pub fn pick<'a, S: AsRef<str>>(map: &'a PropMap, keys: &[S]) -> Cow<'a, PropMap> {
    if keys.is_empty() {
        return Cow::Owned(PropMap::new());
    }
    if map.keys().all(|key| keys.iter().any(|k| k.as_ref() == key.as_str())) {
        return Cow::Borrowed(map);
    }
    Cow::Owned(
        map.iter()
            .filter(|(key, _)| keys.iter().any(|k| k.as_ref() == key.as_str()))
            .map(|(key, value)| (key.clone(), value.clone()))
            .collect(),
    )
}
