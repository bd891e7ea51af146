use crate::common::value::BoxedValue;
use serde_json::Value;
use std::sync::Arc;

/// Walks a dotted property path (`rest.port`, `servers.0.host`) into a JSON value.
///
/// An empty path returns the value itself. Array segments are numeric indexes.
pub fn get_deep_property<'a>(value: &'a Value, path: &str) -> Option<&'a Value> {
    if path.is_empty() {
        return Some(value);
    }
    path.split('.').try_fold(value, |current, segment| match current {
        Value::Object(map) => map.get(segment),
        Value::Array(items) => segment.parse::<usize>().ok().and_then(|i| items.get(i)),
        _ => None,
    })
}

/// Projects a resolved binding value onto `path`.
///
/// Only JSON values can be navigated. Anything else yields `None` unless the
/// path is empty.
pub(crate) fn project(value: &BoxedValue, path: &str) -> Option<BoxedValue> {
    if path.is_empty() {
        return Some(value.clone());
    }
    let json = value.downcast_ref::<Value>()?;
    let selected = get_deep_property(json, path)?;
    if selected.is_null() {
        return None;
    }
    Some(Arc::new(selected.clone()) as BoxedValue)
}
