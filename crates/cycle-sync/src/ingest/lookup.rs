//! Dotted-path lookup over untyped vendor JSON

use serde_json::{Map, Value};

/// Resolve `path` (segments separated by `.`) inside `root`.
///
/// Every segment but the last must land on an object; anything else is a
/// miss. Arrays are never traversed and empty segments are ordinary keys.
/// The value found is returned as is, without coercion.
pub fn lookup<'a>(root: &'a Map<String, Value>, path: &str) -> Option<&'a Value> {
    let mut segments = path.split('.');
    let last = segments.next_back()?;

    let mut current = root;
    for segment in segments {
        match current.get(segment) {
            Some(Value::Object(next)) => current = next,
            Some(_) | None => return None,
        }
    }
    current.get(last)
}
